use std::{
    env, fs,
    net::{IpAddr, Ipv4Addr},
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use crate::{errors::Error, retry::ReconnectPolicy, Result};

/// Typed configuration for the gateway.
#[derive(Clone, Debug)]
pub struct Config {
    // Control API
    pub bind_addr: IpAddr,
    pub port: u16,
    pub max_upload_bytes: usize,

    // Persistence
    pub auth_dir: PathBuf,
    pub upload_dir: PathBuf,

    // Network link
    pub link_url: String,
    pub link_version_url: Option<String>,
    pub send_timeout: Duration,
    pub reconnect: ReconnectPolicy,

    // Webhook
    pub webhook_url: Option<String>,
    pub webhook_timeout: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (the process env in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        let bind_addr = parse_or(&get, "BIND_ADDR", IpAddr::V4(Ipv4Addr::UNSPECIFIED))?;
        let port = parse_or(&get, "PORT", 3000u16)?;
        let max_upload_bytes = parse_or(&get, "MAX_UPLOAD_BYTES", 64 * 1024 * 1024usize)?;

        let auth_dir = PathBuf::from(get("AUTH_DIR").unwrap_or_else(|| "auth_info".to_string()));
        let upload_dir =
            PathBuf::from(get("UPLOAD_DIR").unwrap_or_else(|| "/tmp/mgw-uploads".to_string()));

        let link_url = get("LINK_URL").unwrap_or_else(|| "ws://127.0.0.1:8765/link".to_string());
        let link_version_url = get("LINK_VERSION_URL");
        let send_timeout = Duration::from_millis(parse_or(&get, "SEND_TIMEOUT_MS", 30_000u64)?);

        let defaults = ReconnectPolicy::default();
        let multiplier = parse_or(&get, "RECONNECT_MULTIPLIER", defaults.multiplier)?;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(Error::Config(format!(
                "RECONNECT_MULTIPLIER must be >= 1, got {multiplier}"
            )));
        }
        let reconnect = ReconnectPolicy {
            initial_delay: Duration::from_millis(parse_or(
                &get,
                "RECONNECT_INITIAL_DELAY_MS",
                defaults.initial_delay.as_millis() as u64,
            )?),
            max_delay: Duration::from_millis(parse_or(
                &get,
                "RECONNECT_MAX_DELAY_MS",
                defaults.max_delay.as_millis() as u64,
            )?),
            multiplier,
            max_attempts: get("RECONNECT_MAX_ATTEMPTS")
                .map(|v| parse_value::<u32>("RECONNECT_MAX_ATTEMPTS", &v))
                .transpose()?,
        };

        let webhook_url = get("WEBHOOK_URL");
        let webhook_timeout =
            Duration::from_millis(parse_or(&get, "WEBHOOK_TIMEOUT_MS", 10_000u64)?);

        Ok(Self {
            bind_addr,
            port,
            max_upload_bytes,
            auth_dir,
            upload_dir,
            link_url,
            link_version_url,
            send_timeout,
            reconnect,
            webhook_url,
            webhook_timeout,
        })
    }

    /// Create directories the gateway writes into.
    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.auth_dir)?;
        fs::create_dir_all(&self.upload_dir)?;
        Ok(())
    }
}

fn parse_or<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match get(key) {
        Some(v) => parse_value(key, &v),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| Error::Config(format!("{key} has an invalid value: {raw:?}")))
}

/// Apply `KEY=value` pairs from a dotenv file; variables already set win.
fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };
    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_none() {
            env::set_var(key, val);
        }
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .filter_map(|(k, v)| {
            let key = k.trim().strip_prefix("export ").unwrap_or(k.trim()).trim();
            if key.is_empty() {
                return None;
            }
            let v = v.trim();
            let unquoted = ['"', '\'']
                .iter()
                .find_map(|q| v.strip_prefix(*q).and_then(|r| r.strip_suffix(*q)))
                .unwrap_or(v);
            Some((key.to_string(), unquoted.to_string()))
        })
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
