//! Load config from file and environment.

use han_core::MessengerConfig;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::warn;

/// Daemon configuration. File: ~/.config/han/config.toml or /etc/han/config.toml.
/// Env overrides: HAN_LINK, HAN_HTTP_PORT, HAN_ACK_TIMEOUT_MS, HAN_RETRY_COUNT.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// `tcp://host:port` for a serial bridge, otherwise a device path (default /dev/ttyUSB0).
    #[serde(default = "default_link")]
    pub link: String,
    /// REST front end listen port (default 8080).
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Wait for the device to answer each command (default true).
    #[serde(default = "default_require_ack")]
    pub require_ack: bool,
    #[serde(default)]
    pub messenger: MessengerConfig,
}

fn default_link() -> String {
    "/dev/ttyUSB0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_require_ack() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            link: default_link(),
            http_port: default_http_port(),
            require_ack: default_require_ack(),
            messenger: MessengerConfig::default(),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |key| std::env::var(key).ok());
    c
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(s) = var("HAN_LINK") {
        c.link = s;
    }
    if let Some(p) = var("HAN_HTTP_PORT").and_then(|s| s.parse::<u16>().ok()) {
        c.http_port = p;
    }
    if let Some(ms) = var("HAN_ACK_TIMEOUT_MS").and_then(|s| s.parse::<u64>().ok()) {
        c.messenger.ack_timeout_ms = ms;
    }
    if let Some(n) = var("HAN_RETRY_COUNT").and_then(|s| s.parse::<u32>().ok()) {
        c.messenger.retry_count = n;
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/han/config.toml"));
    }
    out.push(PathBuf::from("/etc/han/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    let path = config_paths().into_iter().find(|p| p.exists())?;
    let text = match std::fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read config file");
            return None;
        }
    };
    match toml::from_str::<Config>(&text) {
        Ok(c) => Some(c),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "invalid config file, using defaults");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn file_with_messenger_section() {
        let c: Config = toml::from_str(
            r#"
            link = "tcp://10.0.0.5:2000"
            require_ack = false

            [messenger]
            print_newlines = true
            retry_count = 3
            "#,
        )
        .unwrap();
        assert_eq!(c.link, "tcp://10.0.0.5:2000");
        assert_eq!(c.http_port, 8080);
        assert!(!c.require_ack);
        assert!(c.messenger.print_newlines);
        assert_eq!(c.messenger.retry_count, 3);
        assert_eq!(c.messenger.buffer_size, 64);
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("HAN_LINK", "/dev/ttyACM0"),
            ("HAN_HTTP_PORT", "9000"),
            ("HAN_ACK_TIMEOUT_MS", "250"),
            ("HAN_RETRY_COUNT", "not-a-number"),
        ]
        .into_iter()
        .collect();
        let mut c = Config::default();
        apply_env(&mut c, |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.link, "/dev/ttyACM0");
        assert_eq!(c.http_port, 9000);
        assert_eq!(c.messenger.ack_timeout_ms, 250);
        assert_eq!(c.messenger.retry_count, 10);
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(toml::from_str::<Config>("baud_rate = 9600").is_err());
    }
}
