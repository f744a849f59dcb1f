//! Datasource registry.
//!
//! Maps logical datasource names onto live connection pools. Built once at
//! startup and never mutated afterwards, so the map sits behind a plain
//! `Arc` with no lock. The default datasource's pool must come up or startup
//! fails; secondary datasources that fail to connect are logged and left out
//! of the registry.

use crate::config::FileConfig;
use crate::db::pool::DbPool;
use crate::dialect::Dialect;
use crate::error::{ServerError, ServerResult};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, info, warn};

/// Public description of one datasource (no secrets exposed).
#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct DatasourceSummary {
    /// Logical name. Use this value in the datasource_name parameter.
    pub name: String,
    /// Detected database dialect, e.g. "MySQL" or "PostgreSQL".
    pub dialect: String,
    /// Driver the server uses for this datasource.
    pub driver: String,
    /// Whether this datasource is the default target.
    pub is_default: bool,
}

struct DatasourceEntry {
    pool: DbPool,
    dialect: Dialect,
}

/// Immutable registry of named datasources.
pub struct DatasourceRegistry {
    entries: HashMap<String, DatasourceEntry>,
    default_name: String,
}

impl DatasourceRegistry {
    /// Build the registry from configuration.
    ///
    /// The default datasource connects first and any failure there is fatal.
    /// Secondary datasources connect in declaration order; each failure is
    /// logged and that datasource is skipped.
    pub async fn build(config: &FileConfig, connect_timeout: Duration) -> ServerResult<Self> {
        let default_idx = config
            .default_datasource_index()
            .ok_or(ServerError::NoDatasources)?;
        let default_config = &config.datasources[default_idx];

        let default_pool = DbPool::build(default_config, connect_timeout)
            .await
            .map_err(|e| {
                error!(
                    datasource = %default_config.name,
                    error = %e,
                    "default datasource failed to connect, aborting startup"
                );
                e
            })?;
        info!(datasource = %default_config.name, "default datasource connected");

        let mut entries = HashMap::new();
        entries.insert(
            default_config.name.clone(),
            DatasourceEntry {
                pool: default_pool,
                dialect: Dialect::detect(&default_config.url),
            },
        );

        for (idx, ds) in config.datasources.iter().enumerate() {
            if idx == default_idx {
                continue;
            }
            match DbPool::build(ds, connect_timeout).await {
                Ok(pool) => {
                    info!(datasource = %ds.name, "datasource connected");
                    entries.insert(
                        ds.name.clone(),
                        DatasourceEntry {
                            pool,
                            dialect: Dialect::detect(&ds.url),
                        },
                    );
                }
                Err(e) => {
                    warn!(
                        datasource = %ds.name,
                        error = %e,
                        "datasource failed to connect, skipping"
                    );
                }
            }
        }

        Ok(Self {
            entries,
            default_name: default_config.name.clone(),
        })
    }

    /// Registry over pre-built pools, for tests.
    #[doc(hidden)]
    pub fn from_pools(pools: Vec<(String, DbPool, Dialect)>, default_name: &str) -> Self {
        let entries = pools
            .into_iter()
            .map(|(name, pool, dialect)| (name, DatasourceEntry { pool, dialect }))
            .collect();
        Self {
            entries,
            default_name: default_name.to_string(),
        }
    }

    /// Name of the default datasource.
    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    /// Resolve a requested name to a pool.
    ///
    /// Blank input, the alias "primary", and the default's own name all map
    /// to the default pool. Unknown names also fall back to the default,
    /// with a warning, so a misspelled name degrades to default-scoped
    /// behavior instead of an error.
    pub fn resolve(&self, name: &str) -> ServerResult<&DbPool> {
        self.resolve_entry(name).map(|(_, pool)| pool)
    }

    /// Like [`resolve`](Self::resolve), but also returns the name the lookup
    /// actually landed on, so callers can report fallback targets.
    pub fn resolve_entry(&self, name: &str) -> ServerResult<(&str, &DbPool)> {
        let trimmed = name.trim();
        let key = if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("primary") {
            self.default_name.as_str()
        } else if self.entries.contains_key(trimmed) {
            trimmed
        } else {
            warn!(
                requested = trimmed,
                default = %self.default_name,
                "unknown datasource name, falling back to default"
            );
            self.default_name.as_str()
        };
        self.entries
            .get_key_value(key)
            .map(|(name, entry)| (name.as_str(), &entry.pool))
            .ok_or(ServerError::NoDatasources)
    }

    /// Pool of the default datasource.
    pub fn default_pool(&self) -> ServerResult<&DbPool> {
        self.resolve("")
    }

    /// All datasource names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Pools with their names, for fan-out. Order follows `names()`.
    pub fn pools(&self) -> Vec<(String, DbPool)> {
        self.names()
            .into_iter()
            .filter_map(|name| {
                self.entries
                    .get(&name)
                    .map(|e| (name.clone(), e.pool.clone()))
            })
            .collect()
    }

    /// Number of live datasources.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Detailed description of every datasource, sorted by name.
    pub fn describe_all(&self) -> Vec<DatasourceSummary> {
        self.names()
            .into_iter()
            .map(|name| {
                let entry = &self.entries[&name];
                DatasourceSummary {
                    is_default: name == self.default_name,
                    dialect: entry.dialect.display_name().to_string(),
                    driver: entry.dialect.driver_hint().to_string(),
                    name,
                }
            })
            .collect()
    }

    /// Close every pool gracefully.
    pub async fn close_all(&self) {
        for (name, entry) in &self.entries {
            info!(datasource = %name, "closing datasource pool");
            entry.pool.close().await;
        }
        info!("all datasource pools closed");
    }
}
