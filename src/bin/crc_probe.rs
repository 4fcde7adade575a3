//! crc_probe - one-shot CRC capture against the simulated device

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};

use pipe_crc::backends::SimRig;
use pipe_crc::config::CrcdConfig;
use pipe_crc::CRC_SOURCES;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the accepted source names
    Sources,

    /// Check a source name and print the CRC value count
    Verify {
        #[arg(long, default_value_t = 0)]
        pipe: usize,
        #[arg(long)]
        source: Option<String>,
    },

    /// Enable a source, run vblanks, print captured entries as JSON lines
    Capture {
        #[arg(long, default_value_t = 0)]
        pipe: usize,
        #[arg(long, default_value = "crtc")]
        source: String,
        /// Number of vblanks to run.
        #[arg(long, default_value_t = 8)]
        frames: u32,
        /// Change the scanned-out scene every N frames (0 = static).
        #[arg(long, default_value_t = 0)]
        scene_every: u32,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let cfg = CrcdConfig::load()?;
    let rig = SimRig::from_config(&cfg);

    match args.command {
        Command::Sources => {
            for name in CRC_SOURCES {
                println!("{}", name);
            }
        }
        Command::Verify { pipe, source } => {
            let count = rig.controller.verify_source(pipe, source.as_deref())?;
            println!("{}", count);
        }
        Command::Capture {
            pipe,
            source,
            frames,
            scene_every,
        } => {
            let stream = rig
                .controller
                .pipe_context(pipe)
                .and_then(|ctx| ctx.stream)
                .ok_or_else(|| anyhow!("pipe {} has no stream", pipe))?;
            rig.controller.request_source(pipe, Some(source.as_str()))?;
            for frame in 0..frames {
                if scene_every > 0 && frame % scene_every == 0 {
                    rig.device.set_scene(stream, u64::from(frame / scene_every));
                }
                rig.tick();
                for entry in rig.ring.drain(pipe) {
                    println!("{}", serde_json::to_string(&entry)?);
                }
            }
            rig.controller.request_source(pipe, None)?;
        }
    }
    Ok(())
}
