mod settings;

use config::{Config, ConfigError, Environment, File};

pub use settings::{
    BrokerSettings, LogSettings, PartialSettings, RetrySettings, Settings,
};

/// Prefix of environment overrides, e.g. `FLEETLINK_BROKER__HOST`.
pub const ENV_PREFIX: &str = "FLEETLINK";

/// Loads the configuration from `config/default.*` and the environment,
/// then merges it over `Settings::default()`.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge_over(Settings::default()))
}

#[cfg(test)]
mod tests;
