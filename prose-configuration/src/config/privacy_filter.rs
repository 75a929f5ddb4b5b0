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

//! Privacy filter configuration.
//!
//! A [`FilterConfig`] is what a single scope (listener, route, ...) declares. Scopes
//! are combined with [`FilterConfig::merge`] and the result is validated into an
//! [`EffectiveConfig`] when the filter chain is activated.
//!
//! Type URL: `type.googleapis.com/prose.filters.http.privacy.v3.Config`

use super::{common::GenericError, policy_engine::PolicyEngineConfig};
use crate::typed_struct::TypedStructFilter;
use compact_str::CompactString;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::{fmt, num::NonZeroUsize, time::Duration};
use url::Url;

pub const DEFAULT_PII_SERVICE_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_CONCURRENT_ANALYSES: NonZeroUsize = match NonZeroUsize::new(64) {
    Some(v) => v,
    None => unreachable!(),
};
pub const DEFAULT_MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SidecarDirection {
    SidecarInbound,
    SidecarOutbound,
}

impl fmt::Display for SidecarDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SidecarInbound => "SIDECAR_INBOUND",
            Self::SidecarOutbound => "SIDECAR_OUTBOUND",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FilterConfig {
    pub direction: SidecarDirection,
    /// Inline YAML document, see [`PolicyEngineConfig`].
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub policy_engine: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pii_service_url: Option<Url>,
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none", default)]
    pub pii_service_timeout: Option<Duration>,
    /// When set the detection service is never contacted and these labels are reported for every body.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub static_pii_labels: Vec<CompactString>,
    #[serde(default)]
    pub enforce: bool,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub internal_cidrs: Vec<IpNet>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub purpose: Option<CompactString>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tracing_url: Option<Url>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub max_concurrent_analyses: Option<NonZeroUsize>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub max_body_bytes: Option<usize>,
}

impl FilterConfig {
    pub fn new(direction: SidecarDirection) -> Self {
        Self {
            direction,
            policy_engine: String::new(),
            pii_service_url: None,
            pii_service_timeout: None,
            static_pii_labels: Vec::new(),
            enforce: false,
            internal_cidrs: Vec::new(),
            purpose: None,
            tracing_url: None,
            max_concurrent_analyses: None,
            max_body_bytes: None,
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, GenericError> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GenericError::from_msg_with_cause("failed to deserialize privacy filter configuration", e))
    }

    /// Combines a parent scope with a more specific child scope.
    ///
    /// Every field the child leaves empty is inherited from the parent. `direction`
    /// and `enforce` always come from the child.
    #[must_use]
    pub fn merge(parent: &Self, child: &Self) -> Self {
        fn pick<T: Clone>(parent: &Option<T>, child: &Option<T>) -> Option<T> {
            child.as_ref().or(parent.as_ref()).cloned()
        }
        fn pick_vec<T: Clone>(parent: &[T], child: &[T]) -> Vec<T> {
            if child.is_empty() { parent.to_vec() } else { child.to_vec() }
        }

        let purpose = match child.purpose.as_ref() {
            Some(purpose) if !purpose.trim().is_empty() => Some(purpose.clone()),
            _ => parent.purpose.clone(),
        };

        Self {
            direction: child.direction,
            policy_engine: if child.policy_engine.trim().is_empty() {
                parent.policy_engine.clone()
            } else {
                child.policy_engine.clone()
            },
            pii_service_url: pick(&parent.pii_service_url, &child.pii_service_url),
            pii_service_timeout: pick(&parent.pii_service_timeout, &child.pii_service_timeout),
            static_pii_labels: pick_vec(&parent.static_pii_labels, &child.static_pii_labels),
            enforce: child.enforce,
            internal_cidrs: pick_vec(&parent.internal_cidrs, &child.internal_cidrs),
            purpose,
            tracing_url: pick(&parent.tracing_url, &child.tracing_url),
            max_concurrent_analyses: pick(&parent.max_concurrent_analyses, &child.max_concurrent_analyses),
            max_body_bytes: pick(&parent.max_body_bytes, &child.max_body_bytes),
        }
    }
}

impl TypedStructFilter for FilterConfig {
    const TYPE_URL: &'static str = "type.googleapis.com/prose.filters.http.privacy.v3.Config";

    fn from_json_value(value: JsonValue) -> Result<Self, GenericError> {
        serde_json::from_value(value)
            .map_err(|e| GenericError::from_msg_with_cause("failed to deserialize privacy filter configuration", e))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PiiServiceConfig {
    Remote { url: Url, timeout: Duration },
    Static { labels: Vec<CompactString> },
}

/// Validated configuration an active filter chain runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveConfig {
    pub direction: SidecarDirection,
    pub policy_engine: PolicyEngineConfig,
    pub pii_service: PiiServiceConfig,
    pub enforce: bool,
    pub internal_cidrs: Vec<IpNet>,
    pub purpose: Option<CompactString>,
    pub tracing_url: Url,
    pub max_concurrent_analyses: NonZeroUsize,
    pub max_body_bytes: usize,
}

impl TryFrom<FilterConfig> for EffectiveConfig {
    type Error = GenericError;

    fn try_from(config: FilterConfig) -> Result<Self, Self::Error> {
        let FilterConfig {
            direction,
            policy_engine,
            pii_service_url,
            pii_service_timeout,
            static_pii_labels,
            enforce,
            internal_cidrs,
            purpose,
            tracing_url,
            max_concurrent_analyses,
            max_body_bytes,
        } = config;

        let policy_engine = PolicyEngineConfig::from_yaml(&policy_engine)?;

        let pii_service = if static_pii_labels.is_empty() {
            let url = pii_service_url.ok_or(GenericError::MissingField("pii_service_url"))?;
            let timeout = pii_service_timeout.unwrap_or(DEFAULT_PII_SERVICE_TIMEOUT);
            if timeout.is_zero() {
                return Err(GenericError::from_msg("pii_service_timeout must be greater than zero"));
            }
            PiiServiceConfig::Remote { url, timeout }
        } else {
            if static_pii_labels.iter().any(|label| label.trim().is_empty()) {
                return Err(GenericError::from_msg("static_pii_labels can't contain empty labels"));
            }
            PiiServiceConfig::Static { labels: static_pii_labels }
        };

        let tracing_url = tracing_url.ok_or(GenericError::MissingField("tracing_url"))?;
        let purpose = purpose.filter(|p| !p.trim().is_empty());

        Ok(Self {
            direction,
            policy_engine,
            pii_service,
            enforce,
            internal_cidrs,
            purpose,
            tracing_url,
            max_concurrent_analyses: max_concurrent_analyses.unwrap_or(DEFAULT_MAX_CONCURRENT_ANALYSES),
            max_body_bytes: max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typed_struct::ParsedTypedStruct;

    const LISTENER_SCOPE: &str = r#"
direction: SIDECAR_OUTBOUND
policy_engine: |
  url: http://opa.prose-system:8181
  decision_path: authz/allow
pii_service_url: http://presidio.prose-system:3000/batchanalyze
tracing_url: http://otel-collector.observability:4317
enforce: true
internal_cidrs:
  - 10.0.0.0/8
  - fd00::/8
purpose: billing
"#;

    #[test]
    fn parse_listener_scope() {
        let config = FilterConfig::from_yaml(LISTENER_SCOPE).unwrap();
        assert_eq!(config.direction, SidecarDirection::SidecarOutbound);
        assert!(config.enforce);
        assert_eq!(config.internal_cidrs.len(), 2);
        assert_eq!(config.purpose.as_deref(), Some("billing"));

        let effective = EffectiveConfig::try_from(config).unwrap();
        assert_eq!(effective.policy_engine.decision_path, "authz/allow");
        assert_eq!(
            effective.pii_service,
            PiiServiceConfig::Remote {
                url: "http://presidio.prose-system:3000/batchanalyze".parse().unwrap(),
                timeout: DEFAULT_PII_SERVICE_TIMEOUT
            }
        );
        assert_eq!(effective.max_concurrent_analyses, DEFAULT_MAX_CONCURRENT_ANALYSES);
    }

    #[test]
    fn enforce_defaults_to_false() {
        let config = FilterConfig::from_yaml("direction: SIDECAR_INBOUND\n").unwrap();
        assert!(!config.enforce);
    }

    #[test]
    fn direction_is_required() {
        assert!(FilterConfig::from_yaml("enforce: true\n").is_err());
        assert!(FilterConfig::from_yaml("direction: GATEWAY\n").is_err());
    }

    #[test]
    fn missing_required_fields_fail_activation() {
        let config = FilterConfig::from_yaml("direction: SIDECAR_INBOUND\n").unwrap();
        let err = EffectiveConfig::try_from(config.clone()).unwrap_err();
        assert!(err.is_missing_field("policy_engine"));

        let with_policy = FilterConfig { policy_engine: "url: http://opa:8181\n".to_owned(), ..config };
        let err = EffectiveConfig::try_from(with_policy.clone()).unwrap_err();
        assert!(err.is_missing_field("pii_service_url"));

        let with_pii = FilterConfig { pii_service_url: Some("http://pii:3000/".parse().unwrap()), ..with_policy };
        let err = EffectiveConfig::try_from(with_pii).unwrap_err();
        assert!(err.is_missing_field("tracing_url"));
    }

    #[test]
    fn static_labels_replace_the_service() {
        let mut config = FilterConfig::from_yaml(LISTENER_SCOPE).unwrap();
        config.pii_service_url = None;
        config.static_pii_labels = vec!["EMAIL_ADDRESS".into(), "PERSON".into()];
        let effective = EffectiveConfig::try_from(config).unwrap();
        assert_eq!(effective.pii_service, PiiServiceConfig::Static { labels: vec!["EMAIL_ADDRESS".into(), "PERSON".into()] });
    }

    #[test]
    fn child_non_empty_fields_win() {
        let parent = FilterConfig::from_yaml(LISTENER_SCOPE).unwrap();
        let child = FilterConfig {
            pii_service_url: Some("http://pii-canary:3000/".parse().unwrap()),
            purpose: Some("".into()),
            ..FilterConfig::new(SidecarDirection::SidecarOutbound)
        };

        let merged = FilterConfig::merge(&parent, &child);
        assert_eq!(merged.pii_service_url, child.pii_service_url);
        assert_eq!(merged.policy_engine, parent.policy_engine);
        assert_eq!(merged.tracing_url, parent.tracing_url);
        assert_eq!(merged.internal_cidrs, parent.internal_cidrs);
        assert_eq!(merged.purpose, parent.purpose);
    }

    #[test]
    fn direction_and_enforce_come_from_the_child() {
        let parent = FilterConfig::from_yaml(LISTENER_SCOPE).unwrap();
        assert!(parent.enforce);
        let child = FilterConfig::new(SidecarDirection::SidecarInbound);

        let merged = FilterConfig::merge(&parent, &child);
        assert_eq!(merged.direction, SidecarDirection::SidecarInbound);
        assert!(!merged.enforce);
    }

    #[test]
    fn merge_does_not_touch_inputs() {
        let parent = FilterConfig::from_yaml(LISTENER_SCOPE).unwrap();
        let child = FilterConfig { enforce: true, ..FilterConfig::new(SidecarDirection::SidecarOutbound) };
        let before = (parent.clone(), child.clone());
        let _ = FilterConfig::merge(&parent, &child);
        assert_eq!((parent, child), before);
    }

    #[test]
    fn typed_struct_type_url_is_checked() {
        let value = serde_json::json!({ "direction": "SIDECAR_INBOUND", "enforce": true });
        let parsed = ParsedTypedStruct { type_url: FilterConfig::TYPE_URL.to_owned(), value: value.clone() };
        let config = FilterConfig::from_typed_struct(&parsed).unwrap();
        assert!(config.enforce);

        let wrong = ParsedTypedStruct { type_url: "type.googleapis.com/other.Config".to_owned(), value };
        assert!(FilterConfig::from_typed_struct(&wrong).is_err());
    }
}
