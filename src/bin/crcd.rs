//! crcd - CRC capture daemon on a simulated display device
//!
//! This daemon:
//! 1. Loads configuration (PIPECRC_CONFIG, env overrides)
//! 2. Builds a controller over simulated display, vblank and sideband collaborators
//! 3. Enables the configured CRC source on every lit pipe
//! 4. Drives vblanks at the configured refresh rate and logs captured CRCs
//! 5. Disables capture on Ctrl-C

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use pipe_crc::backends::SimRig;
use pipe_crc::config::CrcdConfig;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = CrcdConfig::load()?;
    let rig = SimRig::from_config(&cfg);

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .map_err(|e| anyhow!("failed to install Ctrl-C handler: {}", e))?;
    }

    for (pipe, settings) in cfg.pipes.iter().enumerate() {
        if settings.stream.is_none() {
            log::info!("pipe {} unlit, leaving CRC capture off", pipe);
            continue;
        }
        if let Err(e) = rig
            .controller
            .request_source(pipe, Some(cfg.initial_source.name()))
        {
            log::warn!("pipe {}: {}", pipe, e);
        }
    }

    log::info!(
        "crcd running: {} pipes, source={}, {} Hz, ring={} entries",
        cfg.pipes.len(),
        cfg.initial_source,
        cfg.refresh_hz,
        cfg.ring_capacity
    );

    let period = cfg.vblank_period();
    let mut last_report = Instant::now();
    let mut captured = 0u64;

    while running.load(Ordering::SeqCst) {
        let tick_start = Instant::now();
        rig.tick();

        for pipe in 0..rig.controller.pipe_count() {
            for entry in rig.ring.drain(pipe) {
                captured += 1;
                log::debug!(
                    "pipe {} frame {} crc {:04x} {:04x} {:04x}",
                    pipe,
                    entry.frame,
                    entry.crcs[0],
                    entry.crcs[1],
                    entry.crcs[2]
                );
            }
        }

        if last_report.elapsed() >= Duration::from_secs(5) {
            let dropped: u64 = (0..rig.controller.pipe_count())
                .map(|pipe| rig.ring.dropped(pipe))
                .sum();
            log::info!("captured={} dropped={}", captured, dropped);
            last_report = Instant::now();
        }

        if let Some(rest) = period.checked_sub(tick_start.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    log::info!("shutting down, disabling CRC capture");
    rig.controller.shutdown();
    Ok(())
}
