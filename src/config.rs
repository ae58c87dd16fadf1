use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::capture::datalink::CaptureOptions;
use crate::cli::{AgentArgs, CollectorArgs};
use crate::error::ConfigError;
use crate::forward::backoff::ReconnectConfig;

pub const DEFAULT_TARGET_PORT: u16 = 30005;

/// Configuration of the capture side.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    /// Collector address (host:port)
    pub collector: String,
    /// TCP destination port of the frames to forward
    pub target_port: u16,
    pub interfaces: Vec<String>,
    pub capture: CaptureOptions,
    pub reconnect: ReconnectConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            collector: String::new(),
            target_port: DEFAULT_TARGET_PORT,
            interfaces: Vec::new(),
            capture: CaptureOptions::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Configuration of the receiving side.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollectorConfig {
    /// Address to accept agent connections on (host:port)
    pub listen: String,
    /// Number of leading payload bytes to log
    pub payload_preview: usize,
}

impl AgentConfig {
    /// Reads the configuration file (if any), then applies the command line on top of it.
    pub fn load(args: &AgentArgs) -> Result<Self, ConfigError> {
        let mut config: Self = read_file(args.config.as_deref())?;
        config.apply(args);
        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, args: &AgentArgs) {
        if let Some(collector) = &args.collector {
            self.collector.clone_from(collector);
        }
        if let Some(port) = args.target_port {
            self.target_port = port;
        }
        if !args.interfaces.is_empty() {
            self.interfaces.clone_from(&args.interfaces);
        }
        if let Some(mode) = args.capture_mode {
            self.capture.mode = mode;
        }
        if let Some(link_layer) = args.link_layer {
            self.capture.link_layer = link_layer;
        }
        if args.no_promiscuous {
            self.capture.promiscuous = false;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collector.is_empty() {
            return Err(ConfigError::Missing("collector"));
        }
        check_address(&self.collector)?;
        if self.target_port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "target_port",
                reason: "port 0 cannot be a destination".to_string(),
            });
        }
        if self.interfaces.is_empty() {
            return Err(ConfigError::Missing("interfaces"));
        }
        if self.capture.read_buffer_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "capture.read_buffer_size",
                reason: "must be positive".to_string(),
            });
        }
        if self.reconnect.connect_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.connect_timeout_ms",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

impl CollectorConfig {
    /// Reads the configuration file (if any), then applies the command line on top of it.
    pub fn load(args: &CollectorArgs) -> Result<Self, ConfigError> {
        let mut config: Self = read_file(args.config.as_deref())?;
        config.apply(args);
        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, args: &CollectorArgs) {
        if let Some(listen) = &args.listen {
            self.listen.clone_from(listen);
        }
        if let Some(preview) = args.payload_preview {
            self.payload_preview = preview;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.is_empty() {
            return Err(ConfigError::Missing("listen"));
        }
        check_address(&self.listen)
    }
}

/// Without a file, every value starts from its default.
fn read_file<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T, ConfigError> {
    let Some(path) = path else {
        return Ok(T::default());
    };
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

/// Accepts `host:port`, where host is a name, an IPv4 address or a bracketed IPv6 address.
fn check_address(address: &str) -> Result<(), ConfigError> {
    let invalid = || ConfigError::InvalidAddress(address.to_string());
    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    port.parse::<u16>().map_err(|_| invalid())?;
    let host = match host.strip_prefix('[') {
        Some(bracketed) => bracketed.strip_suffix(']').ok_or_else(invalid)?,
        None if host.contains(':') => return Err(invalid()),
        None => host,
    };
    if host.is_empty() || host.contains(char::is_whitespace) {
        return Err(invalid());
    }
    Ok(())
}
