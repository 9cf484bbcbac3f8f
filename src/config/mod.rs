mod settings;


use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{
    BrokerSettings, KeepaliveSettings, LoggingSettings, MapperSettings, ServerSettings, Settings,
};

/// Prefix of every environment override, e.g. `BUSROUTER_SERVER__PORT=9000`.
pub const ENV_PREFIX: &str = "BUSROUTER";

/// Flat variable names from earlier deployments and the keys they set.
/// They take precedence over every other source.
pub const LEGACY_ENV: [(&str, &str); 3] = [
    ("BUSROUTER_HOST", "server.host"),
    ("BUSROUTER_PORT", "server.port"),
    ("MAPPER_SETUP_URL", "mapper.setup_url"),
];

/// Loads `config/default.{toml,yaml,json}` if present, then environment
/// overrides, and fills whatever is still missing with defaults.
pub fn load_config() -> Result<Settings, ConfigError> {
    let mut builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );
    for (var, key) in LEGACY_ENV {
        builder = builder.set_override_option(key, std::env::var(var).ok())?;
    }

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge_with_defaults())
}
