pub mod loader;
pub mod sources;

pub use loader::{
    Config, ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions, ConfigMetadata,
};
pub use sources::{EnvConfig, FileConfig, FileRedisConfig};
