//! Environment-driven server configuration.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_TOKEN_EXPIRY: Duration = Duration::from_secs(7 * 24 * 3600);

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub master_secret: String,
    pub token_expiry: Duration,
    pub machines_state_file: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_env(|key| std::env::var(key).ok())
    }

    /// Testable variant taking the environment as a lookup function.
    pub fn from_env(env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let port = match env("PORT") {
            Some(raw) => match raw.parse::<u16>() {
                Ok(port) if port > 0 => port,
                _ => bail!("invalid PORT"),
            },
            None => DEFAULT_PORT,
        };

        let host = env("HOST").unwrap_or_else(|| "0.0.0.0".to_string());

        let Some(master_secret) = env("MASTER_SECRET").filter(|s| !s.is_empty()) else {
            bail!("MASTER_SECRET is required");
        };

        let token_expiry = match env("TOKEN_EXPIRY_SECONDS") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(seconds) if seconds > 0 => Duration::from_secs(seconds),
                _ => bail!("invalid TOKEN_EXPIRY_SECONDS"),
            },
            None => DEFAULT_TOKEN_EXPIRY,
        };

        let machines_state_file = env("MACHINES_STATE_FILE")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            host,
            port,
            master_secret,
            token_expiry,
            machines_state_file,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply() {
        let cfg = Config::from_env(env_of(&[("MASTER_SECRET", "s")])).unwrap();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.token_expiry, DEFAULT_TOKEN_EXPIRY);
        assert!(cfg.machines_state_file.is_none());
    }

    #[test]
    fn master_secret_is_required() {
        assert!(Config::from_env(env_of(&[])).is_err());
        assert!(Config::from_env(env_of(&[("MASTER_SECRET", "")])).is_err());
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(Config::from_env(env_of(&[("MASTER_SECRET", "s"), ("PORT", "nope")])).is_err());
        assert!(Config::from_env(env_of(&[("MASTER_SECRET", "s"), ("PORT", "0")])).is_err());
        assert!(
            Config::from_env(env_of(&[
                ("MASTER_SECRET", "s"),
                ("TOKEN_EXPIRY_SECONDS", "-5"),
            ]))
            .is_err()
        );
    }

    #[test]
    fn explicit_values_win() {
        let cfg = Config::from_env(env_of(&[
            ("MASTER_SECRET", "s"),
            ("PORT", "8080"),
            ("HOST", "127.0.0.1"),
            ("TOKEN_EXPIRY_SECONDS", "60"),
            ("MACHINES_STATE_FILE", "/tmp/machines.json"),
        ]))
        .unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.token_expiry, Duration::from_secs(60));
        assert_eq!(
            cfg.machines_state_file.as_deref(),
            Some(std::path::Path::new("/tmp/machines.json"))
        );
    }
}
