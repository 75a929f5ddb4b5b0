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

//! Settings of the policy decision engine, carried inline in the filter
//! configuration as a YAML document.

use super::common::GenericError;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

pub const DEFAULT_DECISION_PATH: &str = "authz/allow";
pub const DEFAULT_POLICY_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyEngineConfig {
    /// Base address of the engine's data API.
    pub url: Url,
    /// Slash separated rule path, queried as `{url}/v1/data/{decision_path}`.
    #[serde(default = "default_decision_path")]
    pub decision_path: CompactString,
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
}

fn default_decision_path() -> CompactString {
    CompactString::const_new(DEFAULT_DECISION_PATH)
}

fn default_timeout() -> Duration {
    DEFAULT_POLICY_TIMEOUT
}

impl PolicyEngineConfig {
    pub fn from_yaml(blob: &str) -> Result<Self, GenericError> {
        if blob.trim().is_empty() {
            return Err(GenericError::MissingField("policy_engine"));
        }
        let mut config: Self = serde_yaml::from_str(blob)
            .map_err(|e| GenericError::from_msg_with_cause("failed to parse policy_engine configuration", e))?;
        config.decision_path = normalize_decision_path(&config.decision_path)?;
        if config.timeout.is_zero() {
            return Err(GenericError::from_msg("policy_engine timeout must be greater than zero"));
        }
        Ok(config)
    }

    /// Full address of the decision document.
    pub fn decision_url(&self) -> Result<Url, GenericError> {
        let base = self.url.as_str().trim_end_matches('/');
        let raw = format!("{base}/v1/data/{}", self.decision_path);
        Url::parse(&raw).map_err(|e| GenericError::from_msg_with_cause(format!("invalid decision url {raw}"), e))
    }
}

fn normalize_decision_path(path: &str) -> Result<CompactString, GenericError> {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() || trimmed.split('/').any(str::is_empty) {
        return Err(GenericError::from_msg(format!("invalid decision path '{path}'")));
    }
    Ok(CompactString::from(trimmed))
}
