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

//! Client of the policy decision engine.
//!
//! The engine is queried through an OPA compatible data API:
//! `POST {url}/v1/data/{decision_path}` with `{"input": ...}`, answered by
//! `{"result": <bool>, ...}`.

use crate::{
    client::{ClientError, JsonHttpClient},
    pii::PiiLabel,
};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use compact_str::CompactString;
use http::HeaderMap;
use parking_lot::Mutex;
use prose_configuration::{GenericError, PolicyEngineConfig};
use prose_tracing::TraceInfo;
use serde::Serialize;
use serde_json::Value;
use std::{fmt, sync::Arc, time::Duration};
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    /// PII leaves the mesh towards a third party.
    DataSharing,
    /// A service receives PII for a purpose it may not use it for.
    PurposeOfUseDirect,
    /// A service pulls PII from a dependency for a purpose it may not use it for.
    PurposeOfUseIndirect,
}

impl ViolationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DataSharing => "DATA_SHARING",
            Self::PurposeOfUseDirect => "PURPOSE_OF_USE_DIRECT",
            Self::PurposeOfUseIndirect => "PURPOSE_OF_USE_INDIRECT",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionInput {
    pub purpose_of_use: CompactString,
    pub data_items: Vec<PiiLabel>,
    /// Set only when data leaves the mesh, `null` otherwise.
    pub external_domain: Option<CompactString>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyDecision {
    pub allowed: bool,
    /// The engine's full response document.
    pub diagnostics: Value,
}

impl PolicyDecision {
    pub fn allow() -> Self {
        Self { allowed: true, diagnostics: Value::Null }
    }

    pub fn deny() -> Self {
        Self { allowed: false, diagnostics: Value::Null }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("policy engine: {0}")]
    Client(#[from] ClientError),
    #[error("policy engine returned a malformed response: {0}")]
    MalformedResponse(serde_json::Error),
    #[error("policy engine returned a malformed result: {0}")]
    MalformedResult(Value),
    #[error("failed to encode policy input: {0}")]
    Encode(serde_json::Error),
}

#[async_trait]
pub trait PolicyEngine: Send + Sync + fmt::Debug {
    async fn decide(&self, input: &DecisionInput, trace: Option<&TraceInfo>) -> Result<PolicyDecision, PolicyError>;
}

#[async_trait]
impl<T: PolicyEngine + ?Sized> PolicyEngine for Arc<T> {
    async fn decide(&self, input: &DecisionInput, trace: Option<&TraceInfo>) -> Result<PolicyDecision, PolicyError> {
        (**self).decide(input, trace).await
    }
}

#[derive(Serialize)]
struct DataRequest<'a> {
    input: &'a DecisionInput,
}

#[derive(Debug, Clone)]
pub struct OpaPolicyEngine {
    client: JsonHttpClient,
    decision_url: Url,
    timeout: Duration,
}

impl OpaPolicyEngine {
    pub fn new(client: JsonHttpClient, config: &PolicyEngineConfig) -> Result<Self, GenericError> {
        Ok(Self { client, decision_url: config.decision_url()?, timeout: config.timeout })
    }
}

#[async_trait]
impl PolicyEngine for OpaPolicyEngine {
    async fn decide(&self, input: &DecisionInput, trace: Option<&TraceInfo>) -> Result<PolicyDecision, PolicyError> {
        let body = serde_json::to_vec(&DataRequest { input }).map_err(PolicyError::Encode)?;
        let mut headers = HeaderMap::new();
        if let Some(trace) = trace {
            if let Err(e) = trace.inject_into(&mut headers) {
                debug!(target: "prose::policy", "trace context not propagated: {e}");
            }
        }

        let response = self.client.post_json(&self.decision_url, body, headers, self.timeout).await.inspect_err(|e| {
            warn!(target: "prose::policy", "policy engine {} failed: {e}", self.decision_url);
        })?;
        let mut document: Value = serde_json::from_slice(&response).map_err(PolicyError::MalformedResponse)?;

        // an undefined decision comes back without `result`
        let allowed = match document.get_mut("result").map(Value::take) {
            Some(Value::Bool(allowed)) => allowed,
            Some(other) => return Err(PolicyError::MalformedResult(other)),
            None => return Err(PolicyError::MalformedResult(Value::Null)),
        };
        debug!(target: "prose::policy", "decision for {input:?}: allowed={allowed}");
        Ok(PolicyDecision { allowed, diagnostics: document })
    }
}

/// Shared, atomically replaceable policy engine.
///
/// Every filter instance of a chain decides through the same handle; a new engine
/// configuration is swapped in without disturbing in-flight decisions.
#[derive(Clone)]
pub struct PolicyEngineHandle {
    write_lock: Arc<Mutex<()>>,
    engine: Arc<ArcSwap<Box<dyn PolicyEngine>>>,
}

impl fmt::Debug for PolicyEngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyEngineHandle").field("engine", &**self.engine.load()).finish()
    }
}

impl PolicyEngineHandle {
    pub fn new<E: PolicyEngine + 'static>(engine: E) -> Self {
        let engine: Box<dyn PolicyEngine> = Box::new(engine);
        Self { write_lock: Arc::new(Mutex::new(())), engine: Arc::new(ArcSwap::from_pointee(engine)) }
    }

    pub fn replace<E: PolicyEngine + 'static>(&self, engine: E) {
        let engine: Box<dyn PolicyEngine> = Box::new(engine);
        let _lock = self.write_lock.lock();
        self.engine.store(Arc::new(engine));
    }

    pub fn reconfigure(&self, client: JsonHttpClient, config: &PolicyEngineConfig) -> Result<(), GenericError> {
        let engine = OpaPolicyEngine::new(client, config)?;
        info!(target: "prose::policy", "policy engine now at {}", engine.decision_url);
        self.replace(engine);
        Ok(())
    }
}

#[async_trait]
impl PolicyEngine for PolicyEngineHandle {
    async fn decide(&self, input: &DecisionInput, trace: Option<&TraceInfo>) -> Result<PolicyDecision, PolicyError> {
        let engine = self.engine.load_full();
        (**engine).decide(input, trace).await
    }
}
