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

use super::PrivacyFilter;
use crate::{
    admission::AnalysisLimiter,
    client::JsonHttpClient,
    direction::{classify_destination, Direction, DirectionError},
    host::StreamInfo,
    pii::{analyzer_from_config, PiiAnalyzer},
    pipeline::DecisionPipeline,
    policy::{OpaPolicyEngine, PolicyEngineHandle},
};
use arc_swap::ArcSwap;
use prose_configuration::{typed_struct::TypedStructFilter, EffectiveConfig, FilterConfig, GenericError};
use prose_error::Context;
use prose_tracing::TracerRegistry;
use std::sync::Arc;
use tracing::{debug, info};

pub const TRACING_SERVICE_NAME: &str = "prose-filter";

/// Collaborators shared by every stream of a filter chain.
#[derive(Debug)]
pub struct FilterServices {
    pub(super) config: EffectiveConfig,
    pub(super) pipeline: DecisionPipeline,
    pub(super) policy: PolicyEngineHandle,
    pub(super) tracer: Arc<TracerRegistry>,
    client: JsonHttpClient,
}

impl FilterServices {
    pub fn new(
        config: EffectiveConfig,
        analyzer: Arc<dyn PiiAnalyzer>,
        policy: PolicyEngineHandle,
        tracer: Arc<TracerRegistry>,
    ) -> Self {
        let limiter = AnalysisLimiter::new(config.max_concurrent_analyses);
        let pipeline = DecisionPipeline::new(analyzer, policy.clone(), limiter, config.enforce);
        Self { config, pipeline, policy, tracer, client: JsonHttpClient::new() }
    }

    /// Connects the chain to the services named by `config`. Must run inside a tokio runtime.
    pub fn from_config(config: EffectiveConfig) -> Result<Self, GenericError> {
        let client = JsonHttpClient::new();
        let policy = PolicyEngineHandle::new(OpaPolicyEngine::new(client.clone(), &config.policy_engine)?);
        let analyzer = analyzer_from_config(&config.pii_service, client.clone());

        let tracer = Arc::new(TracerRegistry::disabled());
        tracer
            .install_otlp(&config.tracing_url, TRACING_SERVICE_NAME)
            .map_err(|e| GenericError::from_msg_with_cause("failed to set up span export", e))?;

        let limiter = AnalysisLimiter::new(config.max_concurrent_analyses);
        let pipeline = DecisionPipeline::new(analyzer, policy.clone(), limiter, config.enforce);
        Ok(Self { config, pipeline, policy, tracer, client })
    }

    pub fn config(&self) -> &EffectiveConfig {
        &self.config
    }

    pub fn policy(&self) -> &PolicyEngineHandle {
        &self.policy
    }

    pub fn tracer(&self) -> &Arc<TracerRegistry> {
        &self.tracer
    }
}

/// Creates one [`PrivacyFilter`] per stream from the current snapshot of the chain's services.
#[derive(Debug)]
pub struct FilterFactory {
    services: ArcSwap<FilterServices>,
}

impl FilterFactory {
    pub fn new(services: FilterServices) -> Self {
        Self { services: ArcSwap::from_pointee(services) }
    }

    pub fn from_config(config: EffectiveConfig) -> Result<Self, GenericError> {
        FilterServices::from_config(config).map(Self::new)
    }

    /// Activates a chain from its listener scope and, when present, the route scope overriding it.
    pub fn activate(listener: &FilterConfig, route: Option<&FilterConfig>) -> prose_error::Result<Self> {
        let merged = route.map_or_else(|| listener.clone(), |route| FilterConfig::merge(listener, route));
        let config = EffectiveConfig::try_from(merged).with_context_msg("invalid privacy filter configuration")?;
        Self::from_config(config).with_context_msg("failed to start the privacy filter")
    }

    /// [`Self::activate`] for the serialized `TypedStruct` configurations the control plane hands over.
    pub fn activate_typed_struct(listener: &[u8], route: Option<&[u8]>) -> prose_error::Result<Self> {
        let listener =
            FilterConfig::from_typed_struct_bytes(listener).with_context_msg("invalid listener privacy filter configuration")?;
        let route = route
            .map(FilterConfig::from_typed_struct_bytes)
            .transpose()
            .with_context_msg("invalid route privacy filter configuration")?;
        Self::activate(&listener, route.as_ref())
    }

    pub fn services(&self) -> Arc<FilterServices> {
        self.services.load_full()
    }

    /// Applies a new configuration. The policy engine and the span exporter are swapped in
    /// place, so streams created before the call see the new endpoints on their next call.
    pub fn rebuild(&self, config: EffectiveConfig) -> Result<(), GenericError> {
        let current = self.services.load_full();
        if config.policy_engine != current.config.policy_engine {
            current.policy.reconfigure(current.client.clone(), &config.policy_engine)?;
        }
        if config.tracing_url != current.config.tracing_url {
            current
                .tracer
                .install_otlp(&config.tracing_url, TRACING_SERVICE_NAME)
                .map_err(|e| GenericError::from_msg_with_cause("failed to set up span export", e))?;
        }

        let analyzer = analyzer_from_config(&config.pii_service, current.client.clone());
        let limiter = if config.max_concurrent_analyses == current.config.max_concurrent_analyses {
            current.pipeline.limiter().clone()
        } else {
            AnalysisLimiter::new(config.max_concurrent_analyses)
        };
        let pipeline = DecisionPipeline::new(analyzer, current.policy.clone(), limiter, config.enforce);
        info!(target: "prose::filter", "{} filter chain reconfigured, enforce={}", config.direction, config.enforce);

        self.services.store(Arc::new(FilterServices {
            config,
            pipeline,
            policy: current.policy.clone(),
            tracer: Arc::clone(&current.tracer),
            client: current.client.clone(),
        }));
        Ok(())
    }

    /// Binds a filter to a new stream. Fails when the listener's direction can't be
    /// resolved or disagrees with the configured one.
    pub fn create_filter(&self, info: &dyn StreamInfo) -> Result<PrivacyFilter, DirectionError> {
        let services = self.services.load_full();
        let direction = Direction::resolve(info)?;
        let configured = Direction::from(services.config.direction);
        if direction != configured {
            return Err(DirectionError::Mismatch { configured, listener: direction });
        }

        let destination = match direction {
            Direction::Outbound => Some(classify_destination(info, &services.config.internal_cidrs)),
            Direction::Inbound => None,
        };
        debug!(target: "prose::filter", "new {direction} stream, destination {destination:?}");
        Ok(PrivacyFilter::new(services, direction, destination))
    }
}
