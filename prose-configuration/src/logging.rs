// Copyright 2025 The kmesh Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
//

//! Process wide log subscriber.
//!
//! `RUST_LOG` (e.g. `RUST_LOG=prose::policy=debug`) takes precedence over the configured
//! directive.

use crate::config::common::GenericError;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

pub const DEFAULT_LOG_DIRECTIVE: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LogConfig {
    #[serde(default = "default_directive")]
    pub directive: String,
    #[serde(default)]
    pub ansi: bool,
}

fn default_directive() -> String {
    DEFAULT_LOG_DIRECTIVE.to_owned()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { directive: default_directive(), ansi: false }
    }
}

impl LogConfig {
    pub fn env_filter(&self) -> Result<EnvFilter, GenericError> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.directive)
                .map_err(|e| GenericError::from_msg_with_cause(format!("invalid log directive '{}'", self.directive), e)),
        }
    }
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init(config: &LogConfig) -> Result<(), GenericError> {
    tracing_subscriber::fmt()
        .with_env_filter(config.env_filter()?)
        .with_ansi(config.ansi)
        .with_target(true)
        .try_init()
        .map_err(|e| GenericError::from_msg_with_cause("failed to install log subscriber", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_validation() {
        let config = LogConfig { directive: "prose::filter=debug,warn".to_owned(), ansi: false };
        assert!(config.env_filter().is_ok());
    }

    #[test]
    fn defaults() {
        let config: LogConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, LogConfig::default());
    }
}
