use crate::sizes::{DEFAULT_SIZE_RANKS, SizeTaxonomy, TaxonomyError};
use crate::sku::SkuNormalizer;
use serde::Deserialize;
use std::{
    collections::{HashMap, HashSet},
    env, fs, io,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tracing::info;

/// Legacy style numbers that were reissued under new ones.
const LEGACY_STYLES: &[(&str, &str)] = &[("A-100", "A-600"), ("B-110", "B-610")];
const DEFAULT_OPAQUE_PREFIX: &str = "wi_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid size ranks: {0}")]
    Sizes(#[from] TaxonomyError),
    #[error("opaque sku prefixes must not be empty")]
    EmptyPrefix,
}

/// On-disk shape of `pickwell.yaml`. Absent keys keep the built-in value.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SkuConfigFile {
    #[serde(default)]
    sku_rewrites: Option<HashMap<String, String>>,
    #[serde(default)]
    opaque_prefixes: Option<Vec<String>>,
    #[serde(default)]
    size_ranks: Option<Vec<String>>,
    #[serde(default)]
    excluded_orders: Option<Vec<String>>,
}

/// Static inputs to the order core: rewrite table, opaque prefixes, size
/// taxonomy and manually excluded orders.
#[derive(Debug, Clone)]
pub struct FulfillmentConfig {
    pub normalizer: SkuNormalizer,
    pub sizes: SizeTaxonomy,
    pub exclusions: HashSet<String>,
}

impl Default for FulfillmentConfig {
    fn default() -> Self {
        Self {
            normalizer: SkuNormalizer::new(
                default_rewrites(),
                vec![DEFAULT_OPAQUE_PREFIX.to_string()],
            ),
            sizes: SizeTaxonomy::default(),
            exclusions: HashSet::new(),
        }
    }
}

impl FulfillmentConfig {
    /// Loads `path`, or the built-in defaults if the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!(
                    target = "pickwell.config",
                    path = %path.display(),
                    "no sku config file; using built-in tables"
                );
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Self::from_yaml(&raw).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let file: SkuConfigFile = if raw.trim().is_empty() {
            SkuConfigFile::default()
        } else {
            serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
                path: PathBuf::new(),
                source,
            })?
        };

        let prefixes = file
            .opaque_prefixes
            .unwrap_or_else(|| vec![DEFAULT_OPAQUE_PREFIX.to_string()]);
        if prefixes.iter().any(|prefix| prefix.is_empty()) {
            return Err(ConfigError::EmptyPrefix);
        }

        let sizes = match file.size_ranks {
            Some(ranks) => SizeTaxonomy::new(ranks)?,
            None => SizeTaxonomy::default(),
        };

        let exclusions = file
            .excluded_orders
            .unwrap_or_default()
            .into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();

        Ok(Self {
            normalizer: SkuNormalizer::new(
                file.sku_rewrites.unwrap_or_else(default_rewrites),
                prefixes,
            ),
            sizes,
            exclusions,
        })
    }
}

fn default_rewrites() -> HashMap<String, String> {
    LEGACY_STYLES
        .iter()
        .flat_map(|(old, new)| {
            DEFAULT_SIZE_RANKS
                .iter()
                .map(move |size| (format!("{old}-{size}"), format!("{new}-{size}")))
        })
        .collect()
}

/// Process settings read from the environment (after `.env`).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub sku_config_path: PathBuf,
    pub ledger_path: PathBuf,
    pub redis_url: Option<String>,
    pub ledger_redis_key: String,
    pub output_dir: PathBuf,
    pub poll_interval: Duration,
    pub refresh_wait: Duration,
    pub notify_webhook_url: Option<String>,
    pub port: u16,
    pub request_max_bytes: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            sku_config_path: env_path("PICKWELL_CONFIG", "pickwell.yaml"),
            ledger_path: env_path("LEDGER_PATH", "ORDER_ID_LIST.jsonl"),
            redis_url: env_opt("REDIS_URL"),
            ledger_redis_key: env_opt("LEDGER_REDIS_KEY")
                .unwrap_or_else(|| "pickwell:processed_orders".to_string()),
            output_dir: env_path("OUTPUT_DIR", "."),
            poll_interval: Duration::from_secs(env_parse("POLL_INTERVAL_MINUTES", 30u64) * 60),
            refresh_wait: Duration::from_secs(env_parse("REFRESH_WAIT_SECS", 60u64)),
            notify_webhook_url: env_opt("NOTIFY_WEBHOOK_URL"),
            port: env_parse("PORT", 8000u16),
            request_max_bytes: env_parse("REQUEST_MAX_BYTES", 1024 * 1024usize),
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_path(key: &str, default: &str) -> PathBuf {
    PathBuf::from(env_opt(key).unwrap_or_else(|| default.to_string()))
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + PartialOrd + Default,
{
    env_opt(key)
        .and_then(|value| value.parse::<T>().ok())
        .filter(|value| *value > T::default())
        .unwrap_or(default)
}
