use anyhow::{bail, Context, Result};
use iriscap_hw::{DeviceId, FrameSize, SourceConfig};
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound on `IRISCAP_FRAME_RATE`; the frame pump ticks once per frame.
pub const MAX_FRAME_RATE: u32 = 1000;

/// Which native layer drives the cameras.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    V4l2,
    /// In-memory cameras; for development without hardware.
    Mock,
}

/// D-Bus bus hosting the configuration interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    Session,
    System,
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Sensor configuration file passed to every device (default: /etc/iriscap/ov9281.toml).
    pub config_path: PathBuf,
    pub frame_width: u32,
    pub frame_height: u32,
    pub frame_rate: u32,
    /// Number of device sources to run.
    pub sources: usize,
    /// Explicit device ids; enumeration decides when unset.
    pub device_ids: Option<Vec<DeviceId>>,
    pub backend: BackendKind,
    pub bus: BusKind,
    /// mmap buffers per V4L2 stream.
    pub v4l2_buffers: u32,
    /// How long one V4L2 capture waits for a buffer.
    pub capture_timeout: Duration,
}

impl Config {
    /// Load configuration from `IRISCAP_*` environment variables with defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let device_ids = get("IRISCAP_DEVICE_IDS")
            .map(|v| parse_device_ids(&v))
            .transpose()?;

        let backend = match get("IRISCAP_BACKEND").as_deref() {
            None | Some("v4l2") => BackendKind::V4l2,
            Some("mock") => BackendKind::Mock,
            Some(other) => bail!("IRISCAP_BACKEND must be 'v4l2' or 'mock', got {other:?}"),
        };

        let bus = match get("IRISCAP_BUS").as_deref() {
            None | Some("session") => BusKind::Session,
            Some("system") => BusKind::System,
            Some(other) => bail!("IRISCAP_BUS must be 'session' or 'system', got {other:?}"),
        };

        let config = Self {
            config_path: get("IRISCAP_CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/etc/iriscap/ov9281.toml")),
            frame_width: parse_or(&get, "IRISCAP_FRAME_WIDTH", 640),
            frame_height: parse_or(&get, "IRISCAP_FRAME_HEIGHT", 480),
            frame_rate: parse_or(&get, "IRISCAP_FRAME_RATE", 60),
            sources: parse_or(&get, "IRISCAP_SOURCES", 2),
            device_ids,
            backend,
            bus,
            v4l2_buffers: parse_or(&get, "IRISCAP_V4L2_BUFFERS", 4),
            capture_timeout: Duration::from_millis(parse_or(
                &get,
                "IRISCAP_CAPTURE_TIMEOUT_MS",
                2000,
            )),
        };

        if config.frame_width == 0 || config.frame_height == 0 {
            bail!("frame size must be non-zero");
        }
        if config.frame_rate == 0 || config.frame_rate > MAX_FRAME_RATE {
            bail!("IRISCAP_FRAME_RATE must be between 1 and {MAX_FRAME_RATE}");
        }
        if config.v4l2_buffers == 0 {
            bail!("IRISCAP_V4L2_BUFFERS must be non-zero");
        }
        Ok(config)
    }

    /// Construction inputs shared by every device source.
    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            frame_size: FrameSize::new(self.frame_width, self.frame_height),
            frame_rate: self.frame_rate,
            config_path: self.config_path.clone(),
        }
    }
}

fn parse_device_ids(value: &str) -> Result<Vec<DeviceId>> {
    value
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            s.parse::<DeviceId>()
                .with_context(|| format!("bad entry in IRISCAP_DEVICE_IDS: {s:?}"))
        })
        .collect()
}

fn parse_or<T: std::str::FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!((config.frame_width, config.frame_height), (640, 480));
        assert_eq!(config.frame_rate, 60);
        assert_eq!(config.sources, 2);
        assert_eq!(config.backend, BackendKind::V4l2);
        assert_eq!(config.bus, BusKind::Session);
        assert!(config.device_ids.is_none());
    }

    #[test]
    fn test_device_ids_parsed() {
        let config = load(&[("IRISCAP_DEVICE_IDS", "0, 2,")]).unwrap();
        assert_eq!(
            config.device_ids,
            Some(vec![DeviceId::new(0), DeviceId::new(2)])
        );
    }

    #[test]
    fn test_bad_device_id_rejected() {
        assert!(load(&[("IRISCAP_DEVICE_IDS", "0,left")]).is_err());
        assert!(load(&[("IRISCAP_DEVICE_IDS", "-1")]).is_err());
    }

    #[test]
    fn test_unparsable_numbers_fall_back() {
        let config = load(&[("IRISCAP_FRAME_RATE", "fast")]).unwrap();
        assert_eq!(config.frame_rate, 60);
    }

    #[test]
    fn test_zero_rate_rejected() {
        assert!(load(&[("IRISCAP_FRAME_RATE", "0")]).is_err());
    }

    #[test]
    fn test_excessive_rate_rejected() {
        assert!(load(&[("IRISCAP_FRAME_RATE", "1000")]).is_ok());
        assert!(load(&[("IRISCAP_FRAME_RATE", "1000000001")]).is_err());
    }

    #[test]
    fn test_v4l2_tuning() {
        let config = load(&[]).unwrap();
        assert_eq!(config.v4l2_buffers, 4);
        assert_eq!(config.capture_timeout, Duration::from_secs(2));

        let config = load(&[
            ("IRISCAP_V4L2_BUFFERS", "8"),
            ("IRISCAP_CAPTURE_TIMEOUT_MS", "250"),
        ])
        .unwrap();
        assert_eq!(config.v4l2_buffers, 8);
        assert_eq!(config.capture_timeout, Duration::from_millis(250));
        assert!(load(&[("IRISCAP_V4L2_BUFFERS", "0")]).is_err());
    }

    #[test]
    fn test_backend_selection() {
        assert_eq!(
            load(&[("IRISCAP_BACKEND", "mock")]).unwrap().backend,
            BackendKind::Mock
        );
        assert!(load(&[("IRISCAP_BACKEND", "usb")]).is_err());
    }
}
