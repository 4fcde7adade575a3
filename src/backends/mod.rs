pub mod sim;

pub use sim::{AuxStats, SimAux, SimDevice, SimRig, SimStats};
