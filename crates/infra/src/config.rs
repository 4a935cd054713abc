//! Environment-driven configuration.
//!
//! | variable | default | meaning |
//! |----------|---------|---------|
//! | `LEDGER_STORE` | `memory` | `memory` or `postgres` |
//! | `DATABASE_URL` | none | required when `LEDGER_STORE=postgres` |
//! | `LEDGER_DB_MAX_CONNECTIONS` | `10` | pool size |
//! | `LEDGER_MAX_MOVEMENT_QTY` | `100000` | per-movement quantity bound, `1..=2147483647` |

use thiserror::Error;

use stockledger_movements::QuantityLimit;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Which store backs the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    InMemory,
    Postgres { database_url: String, max_connections: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub store: StoreBackend,
    pub max_movement_qty: QuantityLimit,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            store: StoreBackend::InMemory,
            max_movement_qty: QuantityLimit::default(),
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source (tests inject a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let max_movement_qty = match var("LEDGER_MAX_MOVEMENT_QTY") {
            None => QuantityLimit::default(),
            Some(raw) => raw
                .parse::<u32>()
                .ok()
                .and_then(QuantityLimit::new)
                .ok_or_else(|| ConfigError::Invalid {
                    name: "LEDGER_MAX_MOVEMENT_QTY",
                    reason: format!("expected an integer in 1..={}, got '{raw}'", QuantityLimit::CEILING),
                })?,
        };

        let backend = var("LEDGER_STORE").unwrap_or_else(|| "memory".to_string());
        let store = match backend.to_lowercase().as_str() {
            "memory" | "in-memory" | "in_memory" => StoreBackend::InMemory,
            "postgres" | "postgresql" => {
                let database_url = var("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
                let max_connections = match var("LEDGER_DB_MAX_CONNECTIONS") {
                    None => DEFAULT_MAX_CONNECTIONS,
                    Some(raw) => raw
                        .parse::<u32>()
                        .ok()
                        .filter(|n| *n > 0)
                        .ok_or_else(|| ConfigError::Invalid {
                            name: "LEDGER_DB_MAX_CONNECTIONS",
                            reason: format!("expected a positive integer, got '{raw}'"),
                        })?,
                };
                StoreBackend::Postgres {
                    database_url,
                    max_connections,
                }
            }
            other => {
                return Err(ConfigError::Invalid {
                    name: "LEDGER_STORE",
                    reason: format!("expected 'memory' or 'postgres', got '{other}'"),
                });
            }
        };

        Ok(Self {
            store,
            max_movement_qty,
        })
    }
}
