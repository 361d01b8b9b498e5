//! Device configuration files.
//!
//! The configuration path passed to a device source points at a TOML file
//! describing the sensor behind the bridge and the register writes that
//! bring it up. See `contrib/sensors/*.toml`.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("bad sensor config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("bad pixel format {0:?}: expected four ASCII characters")]
    FourCc(String),
}

/// Top-level structure of a sensor configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorConfig {
    pub sensor: SensorInfo,
    #[serde(default)]
    pub init: Vec<RegisterWrite>,
}

/// `[sensor]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorInfo {
    pub name: String,
    /// V4L2 pixel format, e.g. "GREY" or "Y16 ".
    #[serde(default = "default_fourcc")]
    pub fourcc: String,
    /// Index of the sensor subdevice for register access.
    #[serde(default)]
    pub subdev: u32,
}

/// One `[[init]]` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RegisterWrite {
    pub address: u16,
    pub value: u8,
}

fn default_fourcc() -> String {
    "GREY".to_string()
}

impl SensorConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::Io {
                    path: path.to_path_buf(),
                    source: e,
                }
            }
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.fourcc_bytes()?;
        Ok(config)
    }

    /// Pixel format as the 4-byte code V4L2 expects. Short codes are
    /// space-padded.
    pub fn fourcc_bytes(&self) -> Result<[u8; 4], ConfigError> {
        let code = self.sensor.fourcc.as_bytes();
        if code.is_empty() || code.len() > 4 || !code.iter().all(u8::is_ascii) {
            return Err(ConfigError::FourCc(self.sensor.fourcc.clone()));
        }
        let mut out = [b' '; 4];
        out[..code.len()].copy_from_slice(code);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OV9281: &str = include_str!("../../../contrib/sensors/ov9281.toml");

    #[test]
    fn test_parse_bundled_config() {
        let config = SensorConfig::parse(OV9281).unwrap();
        assert_eq!(config.sensor.name, "OV9281");
        assert_eq!(config.fourcc_bytes().unwrap(), *b"GREY");
        assert_eq!(
            config.init.first(),
            Some(&RegisterWrite {
                address: 0x0103,
                value: 0x01
            })
        );
        assert_eq!(config.init.last().map(|w| w.address), Some(0x0100));
    }

    #[test]
    fn test_defaults() {
        let config = SensorConfig::parse("[sensor]\nname = \"bare\"\n").unwrap();
        assert_eq!(config.sensor.subdev, 0);
        assert!(config.init.is_empty());
        assert_eq!(config.fourcc_bytes().unwrap(), *b"GREY");
    }

    #[test]
    fn test_short_fourcc_is_padded() {
        let config =
            SensorConfig::parse("[sensor]\nname = \"y16\"\nfourcc = \"Y16\"\n").unwrap();
        assert_eq!(config.fourcc_bytes().unwrap(), *b"Y16 ");
    }

    #[test]
    fn test_bad_fourcc_rejected() {
        let err = SensorConfig::parse("[sensor]\nname = \"x\"\nfourcc = \"TOOLONG\"\n");
        assert!(matches!(err, Err(ConfigError::FourCc(_))));
    }

    #[test]
    fn test_register_value_must_fit_a_byte() {
        let text = "[sensor]\nname = \"x\"\n[[init]]\naddress = 0x3500\nvalue = 0x100\n";
        assert!(matches!(SensorConfig::parse(text), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file() {
        let err = SensorConfig::load(Path::new("/nonexistent/iriscap/sensor.toml"));
        assert!(matches!(err, Err(ConfigError::NotFound(_))));
    }
}
