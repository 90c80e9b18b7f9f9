use std::fs;
use std::path::{Path, PathBuf};

use camdrop_core::{IngestConfig, IngestError};
use once_cell::sync::Lazy;
use serde::Serialize;
use thiserror::Error;

use super::sources::{EnvConfig, FileConfig};

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("camdrop.toml"),
        PathBuf::from("config/camdrop.toml"),
    ]
});

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;

/// Fully resolved server configuration.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub redis_url: String,
    pub shutdown_grace_secs: u64,
    #[serde(flatten)]
    pub pipeline: IngestConfig,
    #[serde(skip)]
    pub metadata: ConfigMetadata,
}

impl Config {
    pub fn shutdown_grace(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Where the configuration came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: Vec<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}

/// Layers `.env`, the TOML file and environment overrides, in that order of
/// increasing precedence.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
            None => dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
        };

        let env = EnvConfig::gather()?;
        let mut load = self.load_with_env(env)?;
        load.config.metadata.env_file_loaded = env_file_loaded;
        Ok(load)
    }

    /// Resolve using already-gathered environment values.
    pub fn load_with_env(&self, env: EnvConfig) -> Result<ConfigLoad, ConfigLoadError> {
        let (file, config_path) = self.load_file_config(&env)?;
        compose_config(file, env, config_path)
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let (path, explicit) = match (&self.options.config_path, &env.config_path) {
            (Some(path), _) | (None, Some(path)) => (path.clone(), true),
            (None, None) => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .find(|candidate| candidate.exists())
            {
                Some(path) => (path.clone(), false),
                None => return Ok((None, None)),
            },
        };

        if !path.exists() {
            if explicit {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        let file = read_file_config(&path)?;
        Ok((Some(file), Some(path)))
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn compose_config(
    file: Option<FileConfig>,
    env: EnvConfig,
    config_path: Option<PathBuf>,
) -> Result<ConfigLoad, ConfigLoadError> {
    let mut warnings = Vec::new();
    if file.is_none() {
        warnings.push(
            "No camdrop.toml detected; using defaults and environment variables".to_string(),
        );
    }

    let FileConfig {
        redis: file_redis,
        shutdown_grace_secs: file_grace,
        pipeline: mut pipeline,
    } = file.unwrap_or_default();

    env.apply(&mut pipeline);
    pipeline.validate().map_err(ConfigLoadError::Invalid)?;

    let redis_url = match env.redis_url.clone().or(file_redis.map(|r| r.url)) {
        Some(url) => url,
        None => {
            warnings.push(format!("REDIS_URL not set; using {DEFAULT_REDIS_URL}"));
            DEFAULT_REDIS_URL.to_string()
        }
    };

    let config = Config {
        redis_url,
        shutdown_grace_secs: env
            .shutdown_grace_secs
            .or(file_grace)
            .unwrap_or(DEFAULT_SHUTDOWN_GRACE_SECS),
        pipeline,
        metadata: ConfigMetadata {
            config_path,
            env_file_loaded: false,
        },
    };

    Ok(ConfigLoad { config, warnings })
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value {value:?} for {name}: {reason}")]
    InvalidEnv {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error(transparent)]
    Invalid(IngestError),
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}
