//! Match verification oracle.
//!
//! The oracle is an external service that knows who won an in-game battle.
//! The core only depends on [`MatchOracle`]; [`HttpMatchOracle`] is the
//! production adapter and tests plug in scripted ones.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::draft::Side;

/// What the oracle said about one battle code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OracleResponse {
    Verified {
        winner_side: Side,
        /// Items each participant actually used, keyed by account id.
        #[serde(default)]
        used_items: BTreeMap<String, Vec<String>>,
    },
    /// Not played yet. Poll again later.
    NotFound,
    PlayerMismatch,
    WrongPlayers,
    Error {
        #[serde(default)]
        message: Option<String>,
    },
}

impl OracleResponse {
    pub fn error(message: impl Into<String>) -> Self {
        OracleResponse::Error {
            message: Some(message.into()),
        }
    }

    /// Lineup problems need a human; retrying will not help.
    pub fn needs_review(&self) -> bool {
        matches!(self, OracleResponse::PlayerMismatch | OracleResponse::WrongPlayers)
    }
}

#[async_trait]
pub trait MatchOracle: Send + Sync {
    /// Look up one battle. Transport failures come back as
    /// [`OracleResponse::Error`], never as a panic.
    async fn check(&self, battle_code: &str) -> OracleResponse;
}

/// `GET {base_url}/battles/{code}` returning an [`OracleResponse`] body.
pub struct HttpMatchOracle {
    base_url: String,
    client: reqwest::Client,
}

impl HttpMatchOracle {
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl MatchOracle for HttpMatchOracle {
    async fn check(&self, battle_code: &str) -> OracleResponse {
        let url = format!("{}/battles/{}", self.base_url, battle_code);
        debug!(url = %url, "Polling match oracle");

        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(battle_code = %battle_code, error = %e, "Oracle request failed");
                return OracleResponse::error(e.to_string());
            }
        };

        if response.status() == StatusCode::NOT_FOUND {
            return OracleResponse::NotFound;
        }
        if !response.status().is_success() {
            let status = response.status();
            warn!(battle_code = %battle_code, status = %status, "Oracle returned error status");
            return OracleResponse::error(format!("oracle http {}", status));
        }

        match response.json::<OracleResponse>().await {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(battle_code = %battle_code, error = %e, "Unparseable oracle response");
                OracleResponse::error(format!("bad oracle body: {}", e))
            }
        }
    }
}
