//! MergeService: stacks the config sources and deserializes to BrokerConfig.
//!
//! Precedence, lowest first: built-in defaults, global file, explicit file,
//! `ACB__*` environment.

use crate::config::sources::{environment, global_file};
use crate::config::BrokerConfig;
use config::{ConfigError, File};
use std::path::Path;

use super::merge_policy;

pub struct MergeService;

impl MergeService {
    pub fn load() -> Result<BrokerConfig, ConfigError> {
        Self::merge(None)
    }

    /// `path` must exist; it overrides the global file.
    pub fn load_from_file(path: &Path) -> Result<BrokerConfig, ConfigError> {
        Self::merge(Some(path))
    }

    fn merge(explicit: Option<&Path>) -> Result<BrokerConfig, ConfigError> {
        let mut builder = merge_policy::builder_with_defaults()?;
        builder = global_file::add_to_builder(builder)?;
        if let Some(path) = explicit {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = environment::add_to_builder(builder)?;
        builder.build()?.try_deserialize()
    }
}
