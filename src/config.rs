// ============================================================================
// CONFIGURATION - Environment-driven service settings
// ============================================================================
//
// Everything the server needs is read once at startup from the process
// environment (optionally seeded from a `.env` file). Bad values abort
// startup instead of silently falling back.
//
//   DRAFTBOOK_DATA_DIR                 redb directory          ./draftbook_data
//   DRAFTBOOK_BIND                     HTTP listen address     0.0.0.0:8080
//   DRAFTBOOK_ADMINS                   comma-separated ids     (none)
//   DRAFTBOOK_HOUSE_ACCOUNT            tax recipient           house
//   DRAFTBOOK_TAX_BPS                  prize tax               250 (2.5%)
//   DRAFTBOOK_TURN_SECONDS             default pick timer      60
//   DRAFTBOOK_ORACLE_URL               match oracle base url   (disabled)
//   DRAFTBOOK_ORACLE_MAX_ATTEMPTS      oracle error budget     5
//   DRAFTBOOK_ORACLE_BACKOFF_SECONDS   first retry delay       30
//   DRAFTBOOK_SWEEP_SECONDS            background sweep        15
//
// ============================================================================

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

pub const DEFAULT_TAX_BPS: u32 = 250;
pub const DEFAULT_HOUSE_ACCOUNT: &str = "house";
pub const DEFAULT_TURN_SECONDS: u64 = 60;
/// Longest pick timer a draft may ask for (one day).
pub const MAX_TURN_SECONDS: u64 = 86_400;
pub const MAX_BACKOFF_SECONDS: u64 = 86_400;
pub const MAX_ORACLE_ATTEMPTS: u64 = 1_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Oracle polling policy.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub url: Option<String>,
    pub max_attempts: u32,
    pub backoff_seconds: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_attempts: 5,
            backoff_seconds: 30,
        }
    }
}

/// Settlement policy shared by the draft engine.
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    pub tax_bps: u32,
    pub house_account: String,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            tax_bps: DEFAULT_TAX_BPS,
            house_account: DEFAULT_HOUSE_ACCOUNT.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub bind_addr: SocketAddr,
    pub admins: Vec<String>,
    pub settlement: SettlementConfig,
    pub default_turn_seconds: u64,
    pub oracle: OracleConfig,
    pub sweep_seconds: u64,
}

impl Config {
    /// Load from the environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (used by tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = lookup("DRAFTBOOK_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./draftbook_data"));

        let bind_addr = parse_or(&lookup, "DRAFTBOOK_BIND", || {
            SocketAddr::from(([0, 0, 0, 0], 8080))
        })?;

        let admins = lookup("DRAFTBOOK_ADMINS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let tax_bps: u32 = parse_or(&lookup, "DRAFTBOOK_TAX_BPS", || DEFAULT_TAX_BPS)?;
        if tax_bps > 10_000 {
            return Err(ConfigError::Invalid {
                key: "DRAFTBOOK_TAX_BPS",
                value: tax_bps.to_string(),
                reason: "must be at most 10000".into(),
            });
        }

        let house_account = lookup("DRAFTBOOK_HOUSE_ACCOUNT")
            .unwrap_or_else(|| DEFAULT_HOUSE_ACCOUNT.to_string());
        if house_account.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "DRAFTBOOK_HOUSE_ACCOUNT",
                value: house_account,
                reason: "must not be empty".into(),
            });
        }

        let default_turn_seconds = parse_bounded(
            &lookup,
            "DRAFTBOOK_TURN_SECONDS",
            DEFAULT_TURN_SECONDS,
            MAX_TURN_SECONDS,
        )?;

        let oracle = OracleConfig {
            url: lookup("DRAFTBOOK_ORACLE_URL").filter(|u| !u.trim().is_empty()),
            max_attempts: parse_bounded(&lookup, "DRAFTBOOK_ORACLE_MAX_ATTEMPTS", 5, MAX_ORACLE_ATTEMPTS)? as u32,
            backoff_seconds: parse_bounded(
                &lookup,
                "DRAFTBOOK_ORACLE_BACKOFF_SECONDS",
                30,
                MAX_BACKOFF_SECONDS,
            )?,
        };

        let sweep_seconds = parse_positive(&lookup, "DRAFTBOOK_SWEEP_SECONDS", 15)?;

        Ok(Self {
            data_dir,
            bind_addr,
            admins,
            settlement: SettlementConfig {
                tax_bps,
                house_account,
            },
            default_turn_seconds,
            oracle,
            sweep_seconds,
        })
    }
}

fn parse_or<F, T, D>(lookup: &F, key: &'static str, default: D) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
    D: FnOnce() -> T,
{
    match lookup(key) {
        None => Ok(default()),
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn parse_positive<F>(lookup: &F, key: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value: u64 = parse_or(lookup, key, || default)?;
    if value == 0 {
        return Err(ConfigError::Invalid {
            key,
            value: "0".into(),
            reason: "must be positive".into(),
        });
    }
    Ok(value)
}

fn parse_bounded<F>(lookup: &F, key: &'static str, default: u64, max: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = parse_positive(lookup, key, default)?;
    if value > max {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: format!("must be at most {}", max),
        });
    }
    Ok(value)
}
