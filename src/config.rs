use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::hw::{LinkId, PipeContext, StreamId};
use crate::source::{parse_source, CaptureSource};

const DEFAULT_RING_CAPACITY: usize = crate::sink::DEFAULT_RING_ENTRIES;
const DEFAULT_REFRESH_HZ: u32 = 60;
const MAX_REFRESH_HZ: u32 = 480;
const DEFAULT_SOURCE: &str = "crtc";

#[derive(Debug, Deserialize, Default)]
struct CrcdConfigFile {
    ring_capacity: Option<usize>,
    refresh_hz: Option<u32>,
    initial_source: Option<String>,
    pipes: Option<Vec<PipeConfigFile>>,
}

#[derive(Debug, Deserialize, Default)]
struct PipeConfigFile {
    stream: Option<bool>,
    link: Option<u32>,
    transport: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct CrcdConfig {
    pub ring_capacity: usize,
    pub refresh_hz: u32,
    pub initial_source: CaptureSource,
    pub pipes: Vec<PipeSettings>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeSettings {
    pub stream: Option<StreamId>,
    pub link: Option<LinkId>,
    /// Whether the connector on `link` exposes a sideband channel.
    pub transport: bool,
}

impl CrcdConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PIPECRC_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CrcdConfigFile) -> Result<Self> {
        let initial_source = parse_source(Some(
            file.initial_source.as_deref().unwrap_or(DEFAULT_SOURCE),
        ))
        .map_err(|e| anyhow!("initial_source: {}", e))?;
        let pipes = match file.pipes {
            Some(pipes) => pipes
                .into_iter()
                .enumerate()
                .map(|(index, pipe)| {
                    let index = index as u32;
                    PipeSettings {
                        stream: pipe.stream.unwrap_or(true).then_some(StreamId(index)),
                        link: Some(LinkId(pipe.link.unwrap_or(index))),
                        transport: pipe.transport.unwrap_or(false),
                    }
                })
                .collect(),
            None => default_pipes(),
        };
        Ok(Self {
            ring_capacity: file.ring_capacity.unwrap_or(DEFAULT_RING_CAPACITY),
            refresh_hz: file.refresh_hz.unwrap_or(DEFAULT_REFRESH_HZ),
            initial_source,
            pipes,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(capacity) = std::env::var("PIPECRC_RING_CAPACITY") {
            self.ring_capacity = capacity
                .trim()
                .parse()
                .map_err(|_| anyhow!("PIPECRC_RING_CAPACITY must be an integer"))?;
        }
        if let Ok(hz) = std::env::var("PIPECRC_REFRESH_HZ") {
            self.refresh_hz = hz
                .trim()
                .parse()
                .map_err(|_| anyhow!("PIPECRC_REFRESH_HZ must be an integer"))?;
        }
        if let Ok(source) = std::env::var("PIPECRC_SOURCE") {
            if !source.trim().is_empty() {
                self.initial_source = parse_source(Some(source.trim()))
                    .map_err(|e| anyhow!("PIPECRC_SOURCE: {}", e))?;
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.ring_capacity < 2 {
            return Err(anyhow!("ring_capacity must be at least 2"));
        }
        if self.refresh_hz == 0 || self.refresh_hz > MAX_REFRESH_HZ {
            return Err(anyhow!(
                "refresh_hz must be between 1 and {}",
                MAX_REFRESH_HZ
            ));
        }
        if self.pipes.is_empty() {
            return Err(anyhow!("at least one pipe must be configured"));
        }
        Ok(())
    }

    pub fn vblank_period(&self) -> Duration {
        Duration::from_secs(1) / self.refresh_hz
    }

    pub fn pipe_contexts(&self) -> Vec<PipeContext> {
        self.pipes
            .iter()
            .map(|pipe| PipeContext {
                stream: pipe.stream,
                link: pipe.link,
                ..PipeContext::default()
            })
            .collect()
    }
}

impl Default for CrcdConfig {
    fn default() -> Self {
        Self {
            ring_capacity: DEFAULT_RING_CAPACITY,
            refresh_hz: DEFAULT_REFRESH_HZ,
            initial_source: CaptureSource::Pipeline,
            pipes: default_pipes(),
        }
    }
}

fn default_pipes() -> Vec<PipeSettings> {
    vec![
        PipeSettings {
            stream: Some(StreamId(0)),
            link: Some(LinkId(0)),
            transport: true,
        },
        PipeSettings {
            stream: Some(StreamId(1)),
            link: Some(LinkId(1)),
            transport: false,
        },
    ]
}

fn read_config_file(path: &Path) -> Result<CrcdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = if path.extension().is_some_and(|ext| ext == "toml") {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_both_link_kinds() {
        let cfg = CrcdConfig::from_file(CrcdConfigFile::default()).unwrap();
        assert_eq!(cfg.ring_capacity, 128);
        assert_eq!(cfg.initial_source, CaptureSource::Pipeline);
        assert!(cfg.pipes[0].transport);
        assert!(!cfg.pipes[1].transport);
        cfg.validate().unwrap();
    }

    #[test]
    fn rejects_unknown_initial_source() {
        let file = CrcdConfigFile {
            initial_source: Some("hdmi".to_string()),
            ..CrcdConfigFile::default()
        };
        assert!(CrcdConfig::from_file(file).is_err());
    }

    #[test]
    fn period_follows_refresh_rate() {
        let cfg = CrcdConfig {
            refresh_hz: 50,
            ..CrcdConfig::default()
        };
        assert_eq!(cfg.vblank_period(), Duration::from_millis(20));
    }

    #[test]
    fn unlit_pipe_has_no_stream_context() {
        let file = CrcdConfigFile {
            pipes: Some(vec![PipeConfigFile {
                stream: Some(false),
                link: None,
                transport: None,
            }]),
            ..CrcdConfigFile::default()
        };
        let cfg = CrcdConfig::from_file(file).unwrap();
        assert_eq!(cfg.pipe_contexts()[0].stream, None);
        assert_eq!(cfg.pipe_contexts()[0].link, Some(LinkId(0)));
    }
}
