use std::{env, fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{Result, SpillwatchError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub bind_addr: String,
    pub port: u16,
    /// Largest accepted frame upload body.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_max_upload_bytes() -> usize {
    16 * 1024 * 1024
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".into(),
            port: 5000,
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Shared secret expected in `X-Camera-Auth` and control request bodies.
    pub camera_password: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("camera_password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Pacing between two emitted multipart chunks.
    pub frame_interval_ms: u64,
    /// Retry delay while no frame is available or the stream is inactive.
    pub poll_interval_ms: u64,
    /// How long a new viewer waits for a first frame before getting a 503.
    pub grace_period_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 33,
            poll_interval_ms: 50,
            grace_period_ms: 2_000,
        }
    }
}

impl StreamConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub evidence_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            evidence_dir: "oil_spill_frames".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpsConfig {
    pub log_level: String,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ops: OpsConfig,
}

impl ServerConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref).map_err(|err| {
            SpillwatchError::Configuration(format!(
                "unable to read config file {}: {err}",
                path_ref.display()
            ))
        })?;
        toml::from_str(&contents).map_err(|err| {
            SpillwatchError::Configuration(format!(
                "failed to parse config file {}: {err}",
                path_ref.display()
            ))
        })
    }

    /// Overlays the process environment on top of the current values.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Overlays values from an arbitrary key lookup. Unset keys keep the
    /// current value; malformed numbers are rejected.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(password) = lookup("CAMERA_PASSWORD") {
            self.auth.camera_password = password;
        }
        if let Some(bind) = lookup("BIND_ADDR") {
            self.network.bind_addr = bind;
        }
        if let Some(port) = lookup("PORT") {
            self.network.port = parse_number("PORT", &port)?;
        }
        if let Some(bytes) = lookup("MAX_UPLOAD_BYTES") {
            self.network.max_upload_bytes = parse_number("MAX_UPLOAD_BYTES", &bytes)?;
        }
        if let Some(dir) = lookup("EVIDENCE_DIR") {
            self.storage.evidence_dir = dir;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.ops.log_level = level;
        }
        if let Some(ms) = lookup("STREAM_FRAME_INTERVAL_MS") {
            self.stream.frame_interval_ms = parse_number("STREAM_FRAME_INTERVAL_MS", &ms)?;
        }
        if let Some(ms) = lookup("STREAM_POLL_INTERVAL_MS") {
            self.stream.poll_interval_ms = parse_number("STREAM_POLL_INTERVAL_MS", &ms)?;
        }
        if let Some(ms) = lookup("STREAM_GRACE_PERIOD_MS") {
            self.stream.grace_period_ms = parse_number("STREAM_GRACE_PERIOD_MS", &ms)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.auth.camera_password.is_empty() {
            return Err(SpillwatchError::Configuration(
                "CAMERA_PASSWORD must be set to a non-empty value".into(),
            ));
        }
        if self.network.port == 0 {
            return Err(SpillwatchError::Configuration(
                "network.port must be a valid port (>0)".into(),
            ));
        }
        if self.network.max_upload_bytes == 0 {
            return Err(SpillwatchError::Configuration(
                "network.max_upload_bytes must be greater than zero".into(),
            ));
        }
        if self.stream.frame_interval_ms == 0 {
            return Err(SpillwatchError::Configuration(
                "stream.frame_interval_ms must be greater than zero".into(),
            ));
        }
        if self.stream.poll_interval_ms == 0 {
            return Err(SpillwatchError::Configuration(
                "stream.poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.storage.evidence_dir.trim().is_empty() {
            return Err(SpillwatchError::Configuration(
                "storage.evidence_dir must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.network.bind_addr, self.network.port)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| SpillwatchError::Configuration(format!("{key} is not a valid number: {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn load_server_config_from_file() {
        let dir = std::env::temp_dir().join(format!("spillwatch-config-{}", std::process::id()));
        fs::create_dir_all(&dir).expect("create temp dir");
        let temp_path = dir.join("server.toml");
        let mut config = ServerConfig::default();
        config.network.port = 8080;
        config.auth.camera_password = "hunter2".into();
        config.stream.grace_period_ms = 250;

        let doc = toml::to_string(&config).expect("serialize config");
        fs::write(&temp_path, doc).expect("write temp config");

        let loaded = ServerConfig::from_file(&temp_path).expect("load config");
        assert_eq!(loaded.network.port, 8080);
        assert_eq!(loaded.auth.camera_password, "hunter2");
        assert_eq!(loaded.stream.grace_period_ms, 250);
        assert_eq!(loaded.stream.frame_interval_ms, 33);
        fs::remove_dir_all(&dir).expect("cleanup temp config");
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let config: ServerConfig = toml::from_str("[network]\nbind_addr = \"127.0.0.1\"\nport = 9000\n")
            .expect("parse partial config");
        assert_eq!(config.network.port, 9000);
        assert_eq!(config.network.max_upload_bytes, 16 * 1024 * 1024);
        assert_eq!(config.storage.evidence_dir, "oil_spill_frames");
        assert_eq!(config.ops.log_level, "info");
    }

    #[test]
    fn environment_overrides_defaults() {
        let mut config = ServerConfig::default();
        config
            .apply_overrides(lookup(&[
                ("CAMERA_PASSWORD", "s3cret"),
                ("PORT", "6001"),
                ("EVIDENCE_DIR", "/var/lib/spill"),
                ("STREAM_GRACE_PERIOD_MS", "10"),
            ]))
            .expect("apply overrides");
        assert_eq!(config.auth.camera_password, "s3cret");
        assert_eq!(config.network.port, 6001);
        assert_eq!(config.storage.evidence_dir, "/var/lib/spill");
        assert_eq!(config.stream.grace_period_ms, 10);
        assert_eq!(config.listen_addr(), "0.0.0.0:6001");
    }

    #[test]
    fn malformed_port_is_rejected() {
        let mut config = ServerConfig::default();
        let err = config
            .apply_overrides(lookup(&[("PORT", "fifty")]))
            .expect_err("bad port");
        assert!(matches!(err, SpillwatchError::Configuration(_)));
    }

    #[test]
    fn validate_configuration_rules() {
        let mut config = ServerConfig::default();
        assert!(config.validate().is_err());
        config.auth.camera_password = "pw".into();
        assert!(config.validate().is_ok());
        config.network.port = 0;
        assert!(config.validate().is_err());
        config.network.port = 5000;
        config.stream.frame_interval_ms = 0;
        assert!(config.validate().is_err());
        config.stream.frame_interval_ms = 33;
        config.stream.poll_interval_ms = 0;
        assert!(config.validate().is_err());
        config.stream.poll_interval_ms = 50;
        config.storage.evidence_dir = " ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn debug_output_redacts_secret() {
        let auth = AuthConfig {
            camera_password: "topsecret".into(),
        };
        assert!(!format!("{auth:?}").contains("topsecret"));
    }
}
