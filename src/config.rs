//! Environment-sourced configuration.
//!
//! | Variable                     | Default                                             |
//! |------------------------------|-----------------------------------------------------|
//! | `DASHBOARD_DATA`             | `data/raw_data/ewp_dsh_zgony_po_szczep_20220127.csv` |
//! | `DASHBOARD_CACHE`            | `memory` (`off`, `memory` or `shared`)              |
//! | `DASHBOARD_CACHE_DIR`        | `.dashboard-cache` (store for `shared`)             |
//! | `DASHBOARD_CACHE_NAMESPACE`  | dataset file name + digest of its records           |
//! | `DASHBOARD_CACHE_TTL_SECS`   | unset, entries never expire                         |
//! | `DASHBOARD_CACHE_CAPACITY`   | `256` (`memory` only)                               |
//! | `DASHBOARD_COMPUTE_DELAY_MS` | `3000`                                              |
//! | `DASHBOARD_FAIL_FAST`        | `false`                                             |
//! | `DASHBOARD_WAIT_TIMEOUT_MS`  | unset, wait as long as it takes                     |
//! | `DASHBOARD_COL_SEX`          | `plec`                                              |
//! | `DASHBOARD_COL_AGE`          | `wiek`                                              |
//! | `DASHBOARD_COL_DOSE`         | `dawka_ost`                                         |
//! | `DASHBOARD_COL_DEATHS`       | `liczba_zaraportowanych_zgonow`                     |

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::data::loader::ColumnMapping;
use crate::data::model::Dataset;
use crate::memo::{
    Aggregator, BackendFailure, CacheBackend, CachePolicy, FileBackend, FixedDelay, MemoryBackend,
    NullBackend,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Which cache the aggregator uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Recompute every request.
    Off,
    /// Process-local cache with single-flight.
    Memory,
    /// Directory shared by all processes on the host, with single-flight
    /// inside each process.
    Shared,
}

impl FromStr for CacheMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(CacheMode::Off),
            "memory" => Ok(CacheMode::Memory),
            "shared" | "file" => Ok(CacheMode::Shared),
            other => Err(format!("unknown cache mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardConfig {
    pub data_path: PathBuf,
    pub columns: ColumnMapping,
    pub cache: CacheMode,
    pub cache_dir: PathBuf,
    pub namespace: Option<String>,
    pub cache_ttl: Option<Duration>,
    pub memory_capacity: usize,
    pub compute_delay: Duration,
    pub fail_fast: bool,
    pub wait_timeout: Option<Duration>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("data/raw_data/ewp_dsh_zgony_po_szczep_20220127.csv"),
            columns: ColumnMapping::default(),
            cache: CacheMode::Memory,
            cache_dir: PathBuf::from(".dashboard-cache"),
            namespace: None,
            cache_ttl: None,
            memory_capacity: 256,
            compute_delay: Duration::from_secs(3),
            fail_fast: false,
            wait_timeout: None,
        }
    }
}

fn parse<T: FromStr>(var: &'static str, value: String) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        var,
        reason: e.to_string(),
        value,
    })
}

fn parse_bool(var: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value,
            reason: "expected true or false".to_string(),
        }),
    }
}

impl DashboardConfig {
    /// Read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read variables through `lookup`; unset variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(v) = lookup("DASHBOARD_DATA") {
            cfg.data_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("DASHBOARD_CACHE") {
            cfg.cache = parse("DASHBOARD_CACHE", v)?;
        }
        if let Some(v) = lookup("DASHBOARD_CACHE_DIR") {
            cfg.cache_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("DASHBOARD_CACHE_NAMESPACE") {
            cfg.namespace = Some(v);
        }
        if let Some(v) = lookup("DASHBOARD_CACHE_TTL_SECS") {
            cfg.cache_ttl = Some(Duration::from_secs(parse("DASHBOARD_CACHE_TTL_SECS", v)?));
        }
        if let Some(v) = lookup("DASHBOARD_CACHE_CAPACITY") {
            cfg.memory_capacity = parse("DASHBOARD_CACHE_CAPACITY", v)?;
        }
        if let Some(v) = lookup("DASHBOARD_COMPUTE_DELAY_MS") {
            cfg.compute_delay = Duration::from_millis(parse("DASHBOARD_COMPUTE_DELAY_MS", v)?);
        }
        if let Some(v) = lookup("DASHBOARD_FAIL_FAST") {
            cfg.fail_fast = parse_bool("DASHBOARD_FAIL_FAST", v)?;
        }
        if let Some(v) = lookup("DASHBOARD_WAIT_TIMEOUT_MS") {
            cfg.wait_timeout = Some(Duration::from_millis(parse("DASHBOARD_WAIT_TIMEOUT_MS", v)?));
        }

        let columns = [
            ("DASHBOARD_COL_SEX", &mut cfg.columns.sex),
            ("DASHBOARD_COL_AGE", &mut cfg.columns.age),
            ("DASHBOARD_COL_DOSE", &mut cfg.columns.dose_status),
            ("DASHBOARD_COL_DEATHS", &mut cfg.columns.reported_deaths),
        ];
        for (var, slot) in columns {
            if let Some(v) = lookup(var) {
                *slot = v;
            }
        }

        Ok(cfg)
    }

    /// Backend key prefix: the configured namespace, or the dataset file name
    /// plus a digest of its records, so a file edited in place never reads
    /// entries computed from its old contents.
    pub fn namespace_for(&self, dataset: &Dataset) -> String {
        self.namespace.clone().unwrap_or_else(|| {
            let name = self
                .data_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "dataset".to_string());
            format!("{name}:{}", &dataset.digest()[..16])
        })
    }

    /// Assemble the aggregator this configuration describes.
    ///
    /// If the shared store cannot be opened the aggregator still runs with
    /// single-flight but no storage, unless `fail_fast` is set.
    pub fn build_aggregator(&self, dataset: Arc<Dataset>) -> anyhow::Result<Aggregator> {
        let (policy, backend): (CachePolicy, Arc<dyn CacheBackend>) = match self.cache {
            CacheMode::Off => (CachePolicy::Recompute, Arc::new(NullBackend)),
            CacheMode::Memory => (
                CachePolicy::Memoize,
                Arc::new(MemoryBackend::with_capacity(self.memory_capacity)),
            ),
            CacheMode::Shared => match FileBackend::open(&self.cache_dir) {
                Ok(b) => (CachePolicy::Memoize, Arc::new(b)),
                Err(e) if !self.fail_fast => {
                    log::warn!(
                        "shared cache at {} unavailable, running without storage: {e}",
                        self.cache_dir.display()
                    );
                    (CachePolicy::Memoize, Arc::new(NullBackend))
                }
                Err(e) => {
                    return Err(anyhow::Error::new(e).context(format!(
                        "opening shared cache at {}",
                        self.cache_dir.display()
                    )))
                }
            },
        };

        let on_backend_error = if self.fail_fast {
            BackendFailure::FailFast
        } else {
            BackendFailure::Degrade
        };

        Ok(Aggregator::builder(Arc::clone(&dataset))
            .namespace(self.namespace_for(&dataset))
            .backend(backend)
            .policy(policy)
            .cost(Arc::new(FixedDelay(self.compute_delay)))
            .ttl(self.cache_ttl)
            .on_backend_error(on_backend_error)
            .build())
    }
}
