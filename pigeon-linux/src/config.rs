//! Load config from file and environment.

use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Daemon configuration. File: ~/.config/pigeon/config.toml or /etc/pigeon/config.toml.
/// Env overrides: PIGEON_API_URL, PIGEON_API_TOKEN, PIGEON_DEVICE_ID, PIGEON_WALLET_ID,
/// PIGEON_POLL_SECS, PIGEON_LOG, PIGEON_STATE_FILE, PIGEON_AUTH_KEY_FILE.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Inbox service base URL.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Bearer token for the inbox service.
    #[serde(default)]
    pub api_token: Option<String>,
    /// Identifier on envelopes this device originates.
    #[serde(default = "default_device_id")]
    pub device_id: String,
    /// Wallet id sent when accepting a pairing.
    #[serde(default = "default_wallet_id")]
    pub wallet_id: String,
    /// Inbox poll interval (default 30).
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Log filter when RUST_LOG is unset (default "info").
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Pairing session and cursor snapshot.
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    /// Hex-encoded auth key.
    #[serde(default = "default_auth_key_file")]
    pub auth_key_file: PathBuf,
    /// Currency code -> receive address. An empty address means the wallet exists but
    /// can't give one out.
    #[serde(default)]
    pub wallets: HashMap<String, String>,
}

fn default_api_url() -> String {
    "http://127.0.0.1:8080".into()
}
fn default_device_id() -> String {
    "pigeon-linux".into()
}
fn default_wallet_id() -> String {
    "default".into()
}
fn default_poll_interval_secs() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".into()
}
fn default_state_file() -> PathBuf {
    match home() {
        Some(h) => h.join(".local/share/pigeon/state.bin"),
        None => PathBuf::from("/var/lib/pigeon/state.bin"),
    }
}
fn default_auth_key_file() -> PathBuf {
    match home() {
        Some(h) => h.join(".config/pigeon/auth.key"),
        None => PathBuf::from("/etc/pigeon/auth.key"),
    }
}

fn home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_token: None,
            device_id: default_device_id(),
            wallet_id: default_wallet_id(),
            poll_interval_secs: default_poll_interval_secs(),
            log_level: default_log_level(),
            state_file: default_state_file(),
            auth_key_file: default_auth_key_file(),
            wallets: HashMap::new(),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> anyhow::Result<Config> {
    let mut c = load_file()?.unwrap_or_default();
    apply_env(&mut c, |k| std::env::var(k).ok());
    Ok(c)
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(s) = var("PIGEON_API_URL") {
        c.api_url = s;
    }
    if let Some(s) = var("PIGEON_API_TOKEN") {
        c.api_token = Some(s).filter(|t| !t.is_empty());
    }
    if let Some(s) = var("PIGEON_DEVICE_ID") {
        c.device_id = s;
    }
    if let Some(s) = var("PIGEON_WALLET_ID") {
        c.wallet_id = s;
    }
    if let Some(s) = var("PIGEON_POLL_SECS") {
        if let Ok(n) = s.parse::<u64>() {
            c.poll_interval_secs = n;
        }
    }
    if let Some(s) = var("PIGEON_LOG") {
        c.log_level = s;
    }
    if let Some(s) = var("PIGEON_STATE_FILE") {
        c.state_file = PathBuf::from(s);
    }
    if let Some(s) = var("PIGEON_AUTH_KEY_FILE") {
        c.auth_key_file = PathBuf::from(s);
    }
}

fn config_paths() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(h) = home() {
        out.push(h.join(".config/pigeon/config.toml"));
    }
    out.push(PathBuf::from("/etc/pigeon/config.toml"));
    out
}

/// First existing config file. A file that exists but doesn't parse is an error.
fn load_file() -> anyhow::Result<Option<Config>> {
    for p in config_paths() {
        if p.exists() {
            let s = std::fs::read_to_string(&p)
                .with_context(|| format!("reading {}", p.display()))?;
            let c = parse(&s).with_context(|| format!("parsing {}", p.display()))?;
            return Ok(Some(c));
        }
    }
    Ok(None)
}

fn parse(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let c = parse("").unwrap();
        assert_eq!(c.poll_interval_secs, 30);
        assert_eq!(c.log_level, "info");
        assert_eq!(c.api_token, None);
        assert!(c.wallets.is_empty());
    }

    #[test]
    fn full_file() {
        let c = parse(
            r#"
            api_url = "https://inbox.example"
            api_token = "t0k"
            device_id = "laptop"
            wallet_id = "w-1"
            poll_interval_secs = 5
            state_file = "/tmp/pigeon/state.bin"
            auth_key_file = "/tmp/pigeon/auth.key"

            [wallets]
            BTC = "bc1qexample"
            ETH = ""
            "#,
        )
        .unwrap();
        assert_eq!(c.api_url, "https://inbox.example");
        assert_eq!(c.api_token.as_deref(), Some("t0k"));
        assert_eq!(c.poll_interval_secs, 5);
        assert_eq!(c.state_file, PathBuf::from("/tmp/pigeon/state.bin"));
        assert_eq!(c.wallets["BTC"], "bc1qexample");
        assert_eq!(c.wallets["ETH"], "");
    }

    #[test]
    fn unknown_field_rejected() {
        assert!(parse("proxy_port = 3128").is_err());
    }

    #[test]
    fn env_overrides() {
        let mut c = Config::default();
        apply_env(&mut c, |k| match k {
            "PIGEON_API_URL" => Some("https://other.example".into()),
            "PIGEON_API_TOKEN" => Some(String::new()),
            "PIGEON_POLL_SECS" => Some("nope".into()),
            "PIGEON_LOG" => Some("debug".into()),
            "PIGEON_AUTH_KEY_FILE" => Some("/run/secrets/auth".into()),
            _ => None,
        });
        assert_eq!(c.api_url, "https://other.example");
        assert_eq!(c.api_token, None);
        assert_eq!(c.poll_interval_secs, 30);
        assert_eq!(c.log_level, "debug");
        assert_eq!(c.auth_key_file, PathBuf::from("/run/secrets/auth"));
    }
}
