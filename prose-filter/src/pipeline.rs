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

//! Decode, analyse and decide for one complete body.

use crate::{
    admission::AnalysisLimiter,
    body::CompleteBody,
    decoder::decode,
    direction::Direction,
    pii::{AnalysisRequest, PiiAnalyzer, PiiFindings},
    policy::{DecisionInput, PolicyEngine, PolicyEngineHandle, ViolationKind},
};
use compact_str::CompactString;
use prose_tracing::{attributes as tags, StageSpan};
use std::{fmt, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Request path, towards the upstream.
    Decode,
    /// Response path, back to the downstream.
    Encode,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Decode => "decode",
            Self::Encode => "encode",
        }
    }

    pub fn span_name(self) -> &'static str {
        match self {
            Self::Decode => "decode_body",
            Self::Encode => "encode_body",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ViolationKind {
    /// Violation reported when a policy denies this phase, `None` if the phase is never evaluated.
    pub fn for_stage(phase: Phase, direction: Direction) -> Option<Self> {
        match (phase, direction) {
            (Phase::Decode, Direction::Outbound) => Some(Self::DataSharing),
            (Phase::Decode, Direction::Inbound) => Some(Self::PurposeOfUseDirect),
            (Phase::Encode, Direction::Outbound) => Some(Self::PurposeOfUseIndirect),
            (Phase::Encode, Direction::Inbound) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    HeadersOnly,
    InternalDestination,
    UnknownDestination,
    BodyOverflow,
    NotEvaluated,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HeadersOnly => "headers_only",
            Self::InternalDestination => "internal_destination",
            Self::UnknownDestination => "unknown_destination",
            Self::BodyOverflow => "body_overflow",
            Self::NotEvaluated => "not_evaluated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    Skipped(SkipReason),
    DecodeFailed,
    AdmissionRefused,
    AnalysisFailed,
    PolicyFailed { findings: PiiFindings },
    Allowed { findings: PiiFindings },
    Denied { findings: PiiFindings, violation: ViolationKind, enforced: bool },
    /// The stream went away while a call was in flight.
    Cancelled,
}

impl PhaseOutcome {
    pub fn findings(&self) -> Option<&PiiFindings> {
        match self {
            Self::PolicyFailed { findings } | Self::Allowed { findings } | Self::Denied { findings, .. } => Some(findings),
            _ => None,
        }
    }

    pub fn rejects(&self) -> bool {
        matches!(self, Self::Denied { enforced: true, .. })
    }
}

/// Everything known about one phase once its body is complete.
#[derive(Debug, Clone, Copy)]
pub struct PhaseRequest<'a> {
    pub phase: Phase,
    pub direction: Direction,
    pub content_type: Option<&'a str>,
    pub body: &'a CompleteBody,
    /// Service name of the caller, forwarded to the PII service.
    pub caller: &'a str,
    pub purpose: &'a str,
    pub external_domain: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct DecisionPipeline {
    analyzer: Arc<dyn PiiAnalyzer>,
    policy: PolicyEngineHandle,
    limiter: AnalysisLimiter,
    enforce: bool,
}

impl DecisionPipeline {
    pub fn new(analyzer: Arc<dyn PiiAnalyzer>, policy: PolicyEngineHandle, limiter: AnalysisLimiter, enforce: bool) -> Self {
        Self { analyzer, policy, limiter, enforce }
    }

    pub fn enforce(&self) -> bool {
        self.enforce
    }

    pub fn limiter(&self) -> &AnalysisLimiter {
        &self.limiter
    }

    /// Runs the phase to a verdict. Every failure short of a denial lets the traffic through;
    /// the outcome and its tags on `span` say what happened.
    pub async fn run(&self, request: PhaseRequest<'_>, span: &mut StageSpan, cancel: &CancellationToken) -> PhaseOutcome {
        let Some(violation) = ViolationKind::for_stage(request.phase, request.direction) else {
            span.set_tag(tags::SKIPPED, SkipReason::NotEvaluated.as_str());
            return PhaseOutcome::Skipped(SkipReason::NotEvaluated);
        };
        if cancel.is_cancelled() {
            return PhaseOutcome::Cancelled;
        }

        span.set_tag(tags::BODY_SIZE, i64::try_from(request.body.len()).unwrap_or(i64::MAX));
        let body = match decode(request.content_type, request.body) {
            Ok(body) => body,
            Err(e) => {
                debug!(target: "prose::filter", "{} body not analysed: {e}", request.phase);
                span.set_error(tags::DECODE_ERROR, &e);
                return PhaseOutcome::DecodeFailed;
            },
        };

        let _permit = match self.limiter.try_admit() {
            Ok(permit) => permit,
            Err(e) => {
                warn!(target: "prose::filter", "{} body not analysed: {e}", request.phase);
                span.set_error(tags::PII_ERROR, &e);
                return PhaseOutcome::AdmissionRefused;
            },
        };

        let findings = {
            let mut stage = span.child("pii_analysis");
            stage.set_tag(tags::DIRECTION, request.direction.as_str());
            stage.set_tag(tags::PHASE, request.phase.as_str());
            let analysis =
                self.analyzer.analyze(AnalysisRequest { body: &body, caller: request.caller, trace: Some(stage.trace_info()) });
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return PhaseOutcome::Cancelled,
                result = analysis => result,
            };
            match result {
                Ok(findings) => {
                    stage.set_tag(tags::PII_TYPES, findings.joined());
                    findings
                },
                Err(e) => {
                    warn!(target: "prose::filter", "pii analysis failed, letting {} through: {e}", request.phase);
                    stage.set_error(tags::PII_ERROR, &e);
                    span.set_error(tags::PII_ERROR, &e);
                    return PhaseOutcome::AnalysisFailed;
                },
            }
        };

        // clean bodies are decided too, with no data items
        if !findings.is_empty() {
            span.set_tag(tags::PII_TYPES, findings.joined());
        }
        span.set_tag(tags::PURPOSE_OF_USE, request.purpose.to_owned());
        if let Some(domain) = request.external_domain {
            span.set_tag(tags::EXTERNAL_DOMAIN, domain.to_owned());
        }

        let input = DecisionInput {
            purpose_of_use: CompactString::from(request.purpose),
            data_items: findings.iter().cloned().collect(),
            external_domain: request.external_domain.map(CompactString::from),
        };

        let mut stage = span.child("policy_decision");
        stage.set_tag(tags::DIRECTION, request.direction.as_str());
        stage.set_tag(tags::PHASE, request.phase.as_str());
        let decision = tokio::select! {
            biased;
            () = cancel.cancelled() => return PhaseOutcome::Cancelled,
            decision = self.policy.decide(&input, Some(stage.trace_info())) => decision,
        };

        match decision {
            Err(e) => {
                warn!(target: "prose::filter", "policy decision failed, letting {} through: {e}", request.phase);
                stage.set_error(tags::POLICY_ERROR, &e);
                span.set_error(tags::POLICY_ERROR, &e);
                PhaseOutcome::PolicyFailed { findings }
            },
            Ok(decision) if decision.allowed => {
                stage.set_tag(tags::DECISION, tags::DECISION_ACCEPT);
                span.set_tag(tags::DECISION, tags::DECISION_ACCEPT);
                PhaseOutcome::Allowed { findings }
            },
            Ok(_) => {
                info!(
                    target: "prose::policy",
                    "{violation} on {} {}: [{}] for '{}'",
                    request.direction,
                    request.phase,
                    findings.joined(),
                    request.purpose
                );
                stage.set_tag(tags::DECISION, tags::DECISION_DENY);
                span.set_tag(tags::DECISION, tags::DECISION_DENY);
                span.set_tag(tags::VIOLATION_TYPE, violation.as_str());
                span.set_tag(tags::ENFORCE, self.enforce);
                PhaseOutcome::Denied { findings, violation, enforced: self.enforce }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pii::{AnalysisError, StaticPiiAnalyzer},
        policy::{PolicyDecision, PolicyError},
    };
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use prose_tracing::TraceInfo;
    use std::num::NonZeroUsize;

    #[derive(Debug, Default)]
    struct RecordingPolicy {
        allow: bool,
        inputs: Mutex<Vec<DecisionInput>>,
    }

    #[async_trait]
    impl PolicyEngine for RecordingPolicy {
        async fn decide(&self, input: &DecisionInput, _: Option<&TraceInfo>) -> Result<PolicyDecision, PolicyError> {
            self.inputs.lock().push(input.clone());
            Ok(if self.allow { PolicyDecision::allow() } else { PolicyDecision::deny() })
        }
    }

    #[derive(Debug)]
    struct BrokenAnalyzer;

    #[async_trait]
    impl PiiAnalyzer for BrokenAnalyzer {
        async fn analyze(&self, _: AnalysisRequest<'_>) -> Result<PiiFindings, AnalysisError> {
            Err(AnalysisError::MalformedResponse(serde_json::from_str::<Vec<String>>("{").unwrap_err()))
        }
    }

    fn pipeline(analyzer: Arc<dyn PiiAnalyzer>, policy: &Arc<RecordingPolicy>, enforce: bool) -> DecisionPipeline {
        DecisionPipeline::new(analyzer, PolicyEngineHandle::new(Arc::clone(policy)), AnalysisLimiter::new(NonZeroUsize::MIN), enforce)
    }

    fn email() -> Arc<dyn PiiAnalyzer> {
        Arc::new(StaticPiiAnalyzer::new(["EMAIL"].into_iter().collect()))
    }

    fn request<'a>(phase: Phase, direction: Direction, body: &'a CompleteBody) -> PhaseRequest<'a> {
        PhaseRequest {
            phase,
            direction,
            content_type: Some("application/json"),
            body,
            caller: "frontend",
            purpose: "advertising",
            external_domain: None,
        }
    }

    #[test]
    fn violation_table() {
        assert_eq!(ViolationKind::for_stage(Phase::Decode, Direction::Outbound), Some(ViolationKind::DataSharing));
        assert_eq!(ViolationKind::for_stage(Phase::Decode, Direction::Inbound), Some(ViolationKind::PurposeOfUseDirect));
        assert_eq!(ViolationKind::for_stage(Phase::Encode, Direction::Outbound), Some(ViolationKind::PurposeOfUseIndirect));
        assert_eq!(ViolationKind::for_stage(Phase::Encode, Direction::Inbound), None);
    }

    #[tokio::test]
    async fn denial_is_enforced() {
        let policy = Arc::new(RecordingPolicy::default());
        let body = CompleteBody::from(r#"{"email":"a@b.c"}"#);
        let mut span = StageSpan::start(None, "test", None);
        let outcome = pipeline(email(), &policy, true)
            .run(request(Phase::Decode, Direction::Inbound, &body), &mut span, &CancellationToken::new())
            .await;
        assert!(outcome.rejects());
        assert_eq!(outcome.findings().map(PiiFindings::joined).as_deref(), Some("EMAIL"));
        let inputs = policy.inputs.lock();
        assert_eq!(inputs[0].purpose_of_use, "advertising");
        assert_eq!(inputs[0].external_domain, None);
    }

    #[tokio::test]
    async fn denial_in_dev_mode_is_reported_only() {
        let policy = Arc::new(RecordingPolicy::default());
        let body = CompleteBody::from("{}");
        let mut span = StageSpan::start(None, "test", None);
        let outcome = pipeline(email(), &policy, false)
            .run(request(Phase::Encode, Direction::Outbound, &body), &mut span, &CancellationToken::new())
            .await;
        assert!(!outcome.rejects());
        assert!(matches!(outcome, PhaseOutcome::Denied { violation: ViolationKind::PurposeOfUseIndirect, enforced: false, .. }));
    }

    #[tokio::test]
    async fn clean_body_is_still_decided() {
        let policy = Arc::new(RecordingPolicy::default());
        let clean: Arc<dyn PiiAnalyzer> = Arc::new(StaticPiiAnalyzer::new(PiiFindings::default()));
        let body = CompleteBody::from("{}");
        let mut span = StageSpan::start(None, "test", None);
        let outcome = pipeline(Arc::clone(&clean), &policy, true)
            .run(request(Phase::Decode, Direction::Inbound, &body), &mut span, &CancellationToken::new())
            .await;
        assert!(outcome.rejects());
        assert!(matches!(
            &outcome,
            PhaseOutcome::Denied { findings, violation: ViolationKind::PurposeOfUseDirect, .. } if findings.is_empty()
        ));
        {
            let inputs = policy.inputs.lock();
            assert_eq!(inputs.len(), 1);
            assert!(inputs[0].data_items.is_empty());
            assert_eq!(inputs[0].purpose_of_use, "advertising");
        }

        let allowing = Arc::new(RecordingPolicy { allow: true, ..RecordingPolicy::default() });
        let outcome = pipeline(clean, &allowing, true)
            .run(request(Phase::Decode, Direction::Inbound, &body), &mut span, &CancellationToken::new())
            .await;
        assert_eq!(outcome, PhaseOutcome::Allowed { findings: PiiFindings::default() });
        assert_eq!(allowing.inputs.lock().len(), 1);
    }

    #[tokio::test]
    async fn failures_let_traffic_through() {
        let policy = Arc::new(RecordingPolicy::default());
        let body = CompleteBody::from("{}");
        let mut span = StageSpan::start(None, "test", None);
        let outcome = pipeline(Arc::new(BrokenAnalyzer), &policy, true)
            .run(request(Phase::Decode, Direction::Inbound, &body), &mut span, &CancellationToken::new())
            .await;
        assert_eq!(outcome, PhaseOutcome::AnalysisFailed);

        let text = CompleteBody::from("hello");
        let mut plain = request(Phase::Decode, Direction::Inbound, &text);
        plain.content_type = Some("text/plain");
        let outcome = pipeline(email(), &policy, true).run(plain, &mut span, &CancellationToken::new()).await;
        assert_eq!(outcome, PhaseOutcome::DecodeFailed);
        assert!(policy.inputs.lock().is_empty());
    }

    #[tokio::test]
    async fn admission_refused_when_saturated() {
        let policy = Arc::new(RecordingPolicy::default());
        let pipeline = pipeline(email(), &policy, true);
        let _held = pipeline.limiter().try_admit().unwrap();
        let body = CompleteBody::from("{}");
        let mut span = StageSpan::start(None, "test", None);
        let outcome =
            pipeline.run(request(Phase::Decode, Direction::Inbound, &body), &mut span, &CancellationToken::new()).await;
        assert_eq!(outcome, PhaseOutcome::AdmissionRefused);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let policy = Arc::new(RecordingPolicy::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let body = CompleteBody::from("{}");
        let mut span = StageSpan::start(None, "test", None);
        let outcome = pipeline(email(), &policy, true).run(request(Phase::Decode, Direction::Inbound, &body), &mut span, &cancel).await;
        assert_eq!(outcome, PhaseOutcome::Cancelled);
    }

    #[tokio::test]
    async fn inbound_responses_are_not_evaluated() {
        let policy = Arc::new(RecordingPolicy::default());
        let body = CompleteBody::from("{}");
        let mut span = StageSpan::start(None, "test", None);
        let outcome = pipeline(email(), &policy, true)
            .run(request(Phase::Encode, Direction::Inbound, &body), &mut span, &CancellationToken::new())
            .await;
        assert_eq!(outcome, PhaseOutcome::Skipped(SkipReason::NotEvaluated));
    }
}
