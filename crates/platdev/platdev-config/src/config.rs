use platdev_core::{
    DEFAULT_MAX_OPEN, DeviceOptions, MAX_DEVICES, OversizePolicy, POLL_INTERVAL_MAX_MS,
    POLL_INTERVAL_MIN_MS, PollMode,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PlatdevConfig {
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
    #[serde(default = "defaults::poll_interval_ms")]
    pub poll_interval_ms: u32,
    #[serde(default = "defaults::max_open")]
    pub max_open: usize,
    #[serde(default)]
    pub oversize_write: OversizeWrite,
    /// Loop every inbound byte back out to the peripheral.
    #[serde(default)]
    pub echo: bool,
    #[serde(default = "defaults::devices")]
    pub devices: Vec<DeviceConfig>,
}

/// Backing files of one peripheral's windows.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    pub mem_path: PathBuf,
    pub regs_path: PathBuf,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OversizeWrite {
    #[default]
    Truncate,
    Reject,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),

    #[error("invalid `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

mod defaults {
    use super::DeviceConfig;

    pub fn log_level() -> String {
        "info".into()
    }

    pub fn poll_interval_ms() -> u32 {
        platdev_core::DEFAULT_POLL_INTERVAL_MS
    }

    pub fn max_open() -> usize {
        super::DEFAULT_MAX_OPEN
    }

    pub fn devices() -> Vec<DeviceConfig> {
        (0..super::MAX_DEVICES)
            .map(|i| DeviceConfig {
                mem_path: format!("/tmp/platdev_mem_{i}").into(),
                regs_path: format!("/tmp/platdev_regs_{i}").into(),
            })
            .collect()
    }
}

impl Default for PlatdevConfig {
    fn default() -> Self {
        Self {
            log_level: defaults::log_level(),
            poll_interval_ms: defaults::poll_interval_ms(),
            max_open: defaults::max_open(),
            oversize_write: OversizeWrite::default(),
            echo: false,
            devices: defaults::devices(),
        }
    }
}

impl PlatdevConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let toml_to_str = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::from_toml(&toml_to_str)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        let config: PlatdevConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(POLL_INTERVAL_MIN_MS..=POLL_INTERVAL_MAX_MS).contains(&self.poll_interval_ms) {
            return Err(ConfigError::Invalid {
                field: "poll_interval_ms",
                reason: format!(
                    "{} is outside [{POLL_INTERVAL_MIN_MS}, {POLL_INTERVAL_MAX_MS}]",
                    self.poll_interval_ms
                ),
            });
        }
        if self.max_open == 0 {
            return Err(ConfigError::Invalid {
                field: "max_open",
                reason: "must allow at least one handle".into(),
            });
        }
        if self.devices.len() > MAX_DEVICES {
            return Err(ConfigError::Invalid {
                field: "devices",
                reason: format!("{} configured, at most {MAX_DEVICES}", self.devices.len()),
            });
        }
        for d in &self.devices {
            if d.mem_path == d.regs_path {
                return Err(ConfigError::Invalid {
                    field: "devices",
                    reason: format!("mem and regs share '{}'", d.mem_path.display()),
                });
            }
        }
        Ok(())
    }

    /// Device options for attaching with a background poll thread.
    pub fn to_device_options(&self) -> DeviceOptions {
        DeviceOptions {
            poll_interval_ms: self.poll_interval_ms,
            oversize: match self.oversize_write {
                OversizeWrite::Truncate => OversizePolicy::Truncate,
                OversizeWrite::Reject => OversizePolicy::Reject,
            },
            poll_mode: PollMode::Thread,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let cfg = PlatdevConfig::from_toml("").unwrap();
        assert_eq!(cfg, PlatdevConfig::default());
        assert_eq!(cfg.poll_interval_ms, 10);
        assert_eq!(cfg.devices.len(), 2);
        assert_eq!(cfg.devices[1].regs_path, PathBuf::from("/tmp/platdev_regs_1"));
    }

    /// The config and the controller agree on limits without restating them.
    #[test]
    fn defaults_follow_the_device_limits() {
        let cfg = PlatdevConfig::default();
        assert_eq!(cfg.max_open, platdev_core::DEFAULT_MAX_OPEN);
        assert_eq!(cfg.devices.len(), platdev_core::MAX_DEVICES);
        assert_eq!(cfg.poll_interval_ms, platdev_core::DEFAULT_POLL_INTERVAL_MS);
    }

    #[test]
    fn full_document() {
        let cfg = PlatdevConfig::from_toml(
            r#"
            log_level = "debug"
            poll_interval_ms = 250
            max_open = 1
            oversize_write = "reject"
            echo = true

            [[devices]]
            mem_path = "/dev/shm/mem0"
            regs_path = "/dev/shm/regs0"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.max_open, 1);
        assert!(cfg.echo);
        assert_eq!(cfg.devices.len(), 1);

        let opts = cfg.to_device_options();
        assert_eq!(opts.poll_interval_ms, 250);
        assert_eq!(opts.oversize, OversizePolicy::Reject);
        assert_eq!(opts.poll_mode, PollMode::Thread);
    }

    #[test]
    fn out_of_range_interval_is_invalid() {
        let err = PlatdevConfig::from_toml("poll_interval_ms = 5").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "poll_interval_ms", .. }));
    }

    #[test]
    fn too_many_devices_is_invalid() {
        let doc = (0..3)
            .map(|i| format!("[[devices]]\nmem_path = \"/m{i}\"\nregs_path = \"/r{i}\"\n"))
            .collect::<String>();
        let err = PlatdevConfig::from_toml(&doc).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "devices", .. }));
    }

    #[test]
    fn unknown_policy_is_a_parse_error() {
        let err = PlatdevConfig::from_toml(r#"oversize_write = "drop""#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = PlatdevConfig::load("/nonexistent/platdev.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert_eq!(err.to_string(), "failed to read '/nonexistent/platdev.toml'");
    }
}
