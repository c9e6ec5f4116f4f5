mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{
    LoggingSettings, NotifySettings, QueueSettings, Settings, StoreSettings, TopicSettings,
    WorkerSettings,
};

/// Loads the configuration from `config/default.*` and `POPQ_*` environment
/// variables (nested keys use `__`, e.g. `POPQ_QUEUE__MAX_RECEIVE_COUNT`),
/// merges it over the defaults and validates the result.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("POPQ")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    let settings = partial.merge(Settings::default());
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests;
