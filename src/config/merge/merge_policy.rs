//! Base layer of the merge: the serialized defaults of [`BrokerConfig`].

use crate::config::BrokerConfig;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError};

/// Start a builder whose lowest-precedence source is `BrokerConfig::default()`.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let defaults = Config::try_from(&BrokerConfig::default())?;
    Ok(Config::builder().add_source(defaults))
}
