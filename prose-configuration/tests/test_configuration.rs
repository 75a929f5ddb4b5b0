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

use prose_configuration::{EffectiveConfig, FilterConfig, PiiServiceConfig, SidecarDirection};
use std::{num::NonZeroUsize, time::Duration};

fn fixture(name: &str) -> FilterConfig {
    let path = format!("{}/tests/fixtures/{name}", env!("CARGO_MANIFEST_DIR"));
    let yaml = std::fs::read_to_string(&path).unwrap();
    FilterConfig::from_yaml(&yaml).unwrap()
}

#[test]
fn listener_scope_is_valid_on_its_own() {
    let effective = EffectiveConfig::try_from(fixture("listener-outbound.yaml")).unwrap();
    assert_eq!(effective.direction, SidecarDirection::SidecarOutbound);
    assert!(!effective.enforce);
    assert_eq!(effective.policy_engine.timeout, Duration::from_millis(300));
    assert_eq!(effective.max_concurrent_analyses, NonZeroUsize::new(16).unwrap());
    assert!(matches!(effective.pii_service, PiiServiceConfig::Remote { timeout, .. } if timeout == Duration::from_secs(2)));
}

#[test]
fn route_scope_alone_is_incomplete() {
    assert!(EffectiveConfig::try_from(fixture("route-enforced.yaml")).is_err());
}

#[test]
fn route_enables_enforcement() {
    let merged = FilterConfig::merge(&fixture("listener-outbound.yaml"), &fixture("route-enforced.yaml"));
    let effective = EffectiveConfig::try_from(merged).unwrap();
    assert!(effective.enforce);
    assert_eq!(effective.purpose.as_deref(), Some("billing"));
    assert_eq!(effective.internal_cidrs.len(), 2);
}

#[test]
fn inbound_route_keeps_parent_cidrs_when_its_own_are_empty() {
    let parent = fixture("listener-outbound.yaml");
    let merged = FilterConfig::merge(&parent, &fixture("route-inbound.yaml"));
    assert_eq!(merged.direction, SidecarDirection::SidecarInbound);
    assert_eq!(merged.internal_cidrs, parent.internal_cidrs);
    assert_eq!(merged.purpose.as_deref(), Some("marketing"));

    let effective = EffectiveConfig::try_from(merged).unwrap();
    match effective.pii_service {
        PiiServiceConfig::Remote { url, .. } => assert_eq!(url.host_str(), Some("presidio-canary.prose-system.svc.cluster.local")),
        PiiServiceConfig::Static { .. } => panic!("expected the detection service"),
    }
}

#[test]
fn merged_scope_survives_serialization() {
    let merged = FilterConfig::merge(&fixture("listener-outbound.yaml"), &fixture("route-enforced.yaml"));
    let yaml = serde_yaml::to_string(&merged).unwrap();
    assert_eq!(FilterConfig::from_yaml(&yaml).unwrap(), merged);
}
