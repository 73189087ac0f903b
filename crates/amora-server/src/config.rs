use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use amora_api::auth::Economy;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("AMORA_JWT_SECRET is unset or still a placeholder")]
    InsecureSecret,

    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },

    #[error("{name} must not be negative")]
    Negative { name: &'static str },

    #[error("{name} must be greater than zero")]
    NotPositive { name: &'static str },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub economy: Economy,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the config from any variable source; `from_env` passes the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = lookup("AMORA_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            return Err(ConfigError::InsecureSecret);
        }

        let db_path = lookup("AMORA_DB_PATH").unwrap_or_else(|| "amora.db".into()).into();
        let host = lookup("AMORA_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = parse(&lookup, "AMORA_PORT", 3000)?;
        let addr_raw = format!("{}:{}", host, port);
        let addr = addr_raw.parse().map_err(|_| ConfigError::Invalid {
            name: "AMORA_HOST",
            value: host,
        })?;

        let defaults = Economy::default();
        let economy = Economy {
            message_fee: non_negative(&lookup, "AMORA_MESSAGE_FEE", defaults.message_fee)?,
            signup_bonus: non_negative(&lookup, "AMORA_SIGNUP_BONUS", defaults.signup_bonus)?,
            faucet_amount: positive(&lookup, "AMORA_FAUCET_AMOUNT", defaults.faucet_amount)?,
        };

        Ok(Self {
            jwt_secret,
            db_path,
            addr,
            economy,
        })
    }
}

fn parse<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

fn non_negative<F>(lookup: &F, name: &'static str, default: i64) -> Result<i64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = parse(lookup, name, default)?;
    if value < 0 {
        return Err(ConfigError::Negative { name });
    }
    Ok(value)
}

/// Amounts the ledger credits directly, where zero is not a valid credit.
fn positive<F>(lookup: &F, name: &'static str, default: i64) -> Result<i64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = parse(lookup, name, default)?;
    if value <= 0 {
        return Err(ConfigError::NotPositive { name });
    }
    Ok(value)
}
