mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{BrokerSettings, LoggingSettings, Settings, WorkerSettings};

/// Default configuration file stem; any format the `config` crate knows is accepted.
pub const DEFAULT_CONFIG_FILE: &str = "config/default";

/// Prefix for environment overrides, e.g. `FANOUT__BROKER__MAX_RETRIES=5`.
pub const ENV_PREFIX: &str = "FANOUT";

/// Loads the configuration from the default file and environment variables
/// Merges the configuration with default values
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from(DEFAULT_CONFIG_FILE)
}

/// Same as [`load_config`], reading the (optional) file at `file_stem`.
pub fn load_config_from(file_stem: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(file_stem).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(Settings::merged(partial))
}
