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

//! Per-stream privacy filter.
//!
//! The host drives a [`PrivacyFilter`] through the stream callbacks in order: request
//! headers, data and trailers (decode), then response headers, data and trailers (encode).
//! Each phase buffers its body until it is complete and then runs the decision pipeline at
//! most once.

mod factory;

pub use factory::{FilterFactory, FilterServices, TRACING_SERVICE_NAME};

use crate::{
    body::{Aggregation, BodyAggregator, CompleteBody},
    direction::{Destination, DestinationError, Direction},
    host::{DestroyReason, FilterStatus, LocalReply},
    metadata::{RequestHeaderMetadata, ResponseHeaderMetadata, UNKNOWN_SERVICE},
    pipeline::{Phase, PhaseOutcome, PhaseRequest, SkipReason},
};
use compact_str::CompactString;
use http::{request, response, HeaderMap, HeaderValue};
use prose_http_header::{X_PROSE_PII_TYPES, X_PROSE_PURPOSE};
use prose_tracing::{attributes as tags, StageSpan, StreamTrace};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Active,
    /// A local reply was sent, nothing else is inspected.
    Rejected,
    Destroyed,
}

#[derive(Debug)]
struct PhaseState {
    body: BodyAggregator,
    /// Set once the headers asked the host to buffer this phase's body.
    armed: bool,
    outcome: Option<PhaseOutcome>,
}

impl PhaseState {
    fn new(max_body_bytes: usize) -> Self {
        Self { body: BodyAggregator::new(max_body_bytes), armed: false, outcome: None }
    }

    fn skip(&mut self, reason: SkipReason) {
        self.armed = false;
        self.body.abandon();
        self.outcome = Some(PhaseOutcome::Skipped(reason));
    }
}

#[derive(Debug)]
pub struct PrivacyFilter {
    services: Arc<FilterServices>,
    direction: Direction,
    /// Only classified for outbound streams.
    destination: Option<Result<Destination, DestinationError>>,
    state: StreamState,
    trace: Option<StreamTrace>,
    request: Option<RequestHeaderMetadata>,
    response: Option<ResponseHeaderMetadata>,
    purpose: CompactString,
    decode: PhaseState,
    encode: PhaseState,
    cancel: CancellationToken,
}

impl PrivacyFilter {
    fn new(
        services: Arc<FilterServices>,
        direction: Direction,
        destination: Option<Result<Destination, DestinationError>>,
    ) -> Self {
        let max_body_bytes = services.config.max_body_bytes;
        Self {
            services,
            direction,
            destination,
            state: StreamState::Active,
            trace: None,
            request: None,
            response: None,
            purpose: CompactString::default(),
            decode: PhaseState::new(max_body_bytes),
            encode: PhaseState::new(max_body_bytes),
            cancel: CancellationToken::new(),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Purpose of use the stream is evaluated for, known after the request headers.
    pub fn purpose(&self) -> &str {
        &self.purpose
    }

    pub fn outcome(&self, phase: Phase) -> Option<&PhaseOutcome> {
        self.phase(phase).outcome.as_ref()
    }

    /// Token the host can trigger from any task when the stream is reset.
    pub fn cancellation_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn decode_headers(&mut self, parts: &mut request::Parts, end_of_stream: bool) -> FilterStatus {
        if self.state != StreamState::Active {
            return FilterStatus::Continue;
        }

        let (mut trace, trace_error) = StreamTrace::from_headers(self.services.tracer.current(), &parts.headers);
        if let Some(e) = trace_error {
            debug!(target: "prose::filter", "ignoring incoming trace context: {e}");
        }
        if let Err(e) = trace.span().trace_info().inject_into(&mut parts.headers) {
            debug!(target: "prose::filter", "trace context not propagated upstream: {e}");
        }

        let request = RequestHeaderMetadata::extract(parts);
        self.purpose = match &self.services.config.purpose {
            Some(purpose) => purpose.clone(),
            None => CompactString::from(request.caller.derived_purpose()),
        };
        match HeaderValue::from_str(&self.purpose) {
            Ok(value) => {
                parts.headers.insert(X_PROSE_PURPOSE, value);
            },
            Err(e) => debug!(target: "prose::filter", "purpose '{}' can't be sent as a header: {e}", self.purpose),
        }

        let span = trace.span_mut();
        span.set_tag(tags::DIRECTION, self.direction.as_str());
        span.set_tag(tags::ENFORCE, self.services.pipeline.enforce());
        span.set_tag(tags::PURPOSE_OF_USE, self.purpose.to_string());

        let mut skip = match &self.destination {
            None => None,
            Some(Ok(destination)) => {
                span.set_tag(tags::DESTINATION, destination.as_str());
                destination.is_internal().then_some(SkipReason::InternalDestination)
            },
            Some(Err(e)) => {
                warn!(target: "prose::filter", "{} {}: {e}, letting the request through", request.method, request.path);
                span.set_error(tags::DESTINATION_ERROR, e);
                Some(SkipReason::UnknownDestination)
            },
        };
        if end_of_stream {
            skip = Some(SkipReason::HeadersOnly);
        }

        self.trace = Some(trace);
        self.request = Some(request);
        self.arm(Phase::Decode, skip)
    }

    pub async fn decode_data(&mut self, data: &[u8], end_of_stream: bool) -> FilterStatus {
        self.on_data(Phase::Decode, data, end_of_stream).await
    }

    pub async fn decode_trailers(&mut self, trailers: &mut HeaderMap) -> FilterStatus {
        self.on_trailers(Phase::Decode, trailers).await
    }

    pub fn encode_headers(&mut self, parts: &mut response::Parts, end_of_stream: bool) -> FilterStatus {
        if self.state != StreamState::Active {
            return FilterStatus::Continue;
        }
        // the upstream answered before the request body was complete
        if self.decode.armed {
            self.decode.skip(SkipReason::NotEvaluated);
        }

        self.response = Some(ResponseHeaderMetadata::extract(parts));
        let skip = match self.direction {
            Direction::Inbound => Some(SkipReason::NotEvaluated),
            Direction::Outbound if end_of_stream => Some(SkipReason::HeadersOnly),
            Direction::Outbound => None,
        };
        self.arm(Phase::Encode, skip)
    }

    pub async fn encode_data(&mut self, data: &[u8], end_of_stream: bool) -> FilterStatus {
        self.on_data(Phase::Encode, data, end_of_stream).await
    }

    pub async fn encode_trailers(&mut self, trailers: &mut HeaderMap) -> FilterStatus {
        self.on_trailers(Phase::Encode, trailers).await
    }

    pub fn on_destroy(&mut self, reason: DestroyReason) {
        self.cancel.cancel();
        if self.state == StreamState::Active {
            self.state = StreamState::Destroyed;
        }
        for phase in [&mut self.decode, &mut self.encode] {
            phase.armed = false;
            phase.body.abandon();
        }
        if let Some(trace) = self.trace.as_mut() {
            trace.finish();
        }
        debug!(target: "prose::filter", "{} stream destroyed ({reason:?})", self.direction);
    }

    fn phase(&self, phase: Phase) -> &PhaseState {
        match phase {
            Phase::Decode => &self.decode,
            Phase::Encode => &self.encode,
        }
    }

    fn phase_mut(&mut self, phase: Phase) -> &mut PhaseState {
        match phase {
            Phase::Decode => &mut self.decode,
            Phase::Encode => &mut self.encode,
        }
    }

    fn arm(&mut self, phase: Phase, skip: Option<SkipReason>) -> FilterStatus {
        let state = self.phase_mut(phase);
        match skip {
            Some(reason) => {
                state.skip(reason);
                FilterStatus::Continue
            },
            None => {
                state.armed = true;
                FilterStatus::StopAndBuffer
            },
        }
    }

    fn stage(&self, phase: Phase) -> StageSpan {
        let mut span = match &self.trace {
            Some(trace) => trace.stage(phase.span_name()),
            None => StageSpan::start(self.services.tracer.current(), phase.span_name(), None),
        };
        span.set_tag(tags::DIRECTION, self.direction.as_str());
        span.set_tag(tags::PHASE, phase.as_str());
        span
    }

    async fn on_data(&mut self, phase: Phase, data: &[u8], end_of_stream: bool) -> FilterStatus {
        if self.state != StreamState::Active || !self.phase(phase).armed {
            return FilterStatus::Continue;
        }
        let aggregation = self.phase_mut(phase).body.push(data, end_of_stream);
        self.on_aggregation(phase, aggregation).await
    }

    async fn on_trailers(&mut self, phase: Phase, trailers: &mut HeaderMap) -> FilterStatus {
        if self.state != StreamState::Active {
            return FilterStatus::Continue;
        }
        let status = if self.phase(phase).armed {
            let aggregation = self.phase_mut(phase).body.finish();
            self.on_aggregation(phase, aggregation).await
        } else {
            FilterStatus::Continue
        };

        if self.state == StreamState::Active {
            let findings = self.phase(phase).outcome.as_ref().and_then(PhaseOutcome::findings);
            if let Some(findings) = findings.filter(|f| !f.is_empty()) {
                match HeaderValue::from_str(&findings.joined()) {
                    Ok(value) => {
                        trailers.insert(X_PROSE_PII_TYPES, value);
                    },
                    Err(e) => debug!(target: "prose::filter", "pii types can't be sent as a trailer: {e}"),
                }
            }
        }
        status
    }

    async fn on_aggregation(&mut self, phase: Phase, aggregation: Aggregation) -> FilterStatus {
        match aggregation {
            Aggregation::Pending => FilterStatus::StopAndBuffer,
            Aggregation::Complete(body) => self.run_phase(phase, body).await,
            Aggregation::Overflowed { received } => {
                let limit = self.services.config.max_body_bytes;
                warn!(target: "prose::filter", "{phase} body of {received}+ bytes exceeds {limit}, letting it through");
                let mut span = self.stage(phase);
                span.set_error(tags::BODY_ERROR, &format!("body exceeds {limit} bytes"));
                span.set_tag(tags::SKIPPED, SkipReason::BodyOverflow.as_str());
                self.phase_mut(phase).skip(SkipReason::BodyOverflow);
                FilterStatus::Continue
            },
            Aggregation::Ignored => FilterStatus::Continue,
        }
    }

    async fn run_phase(&mut self, phase: Phase, body: CompleteBody) -> FilterStatus {
        self.phase_mut(phase).armed = false;
        let mut span = self.stage(phase);

        let request = self.request.as_ref();
        let (content_type, external_domain) = match phase {
            Phase::Decode => (
                request.and_then(|r| r.content_type.as_deref()),
                request
                    .filter(|_| self.direction == Direction::Outbound)
                    .map(|r| r.host.as_str())
                    .filter(|host| !host.is_empty()),
            ),
            Phase::Encode => (self.response.as_ref().and_then(|r| r.content_type.as_deref()), None),
        };
        let phase_request = PhaseRequest {
            phase,
            direction: self.direction,
            content_type,
            body: &body,
            caller: request.map_or(UNKNOWN_SERVICE, |r| r.caller.service_name()),
            purpose: &self.purpose,
            external_domain,
        };
        let outcome = self.services.pipeline.run(phase_request, &mut span, &self.cancel).await;

        let status = match &outcome {
            PhaseOutcome::Cancelled => {
                debug!(target: "prose::filter", "{phase} abandoned, stream went away");
                self.state = StreamState::Destroyed;
                FilterStatus::Continue
            },
            outcome if outcome.rejects() => {
                self.state = StreamState::Rejected;
                FilterStatus::LocalReply(LocalReply::forbidden())
            },
            _ => FilterStatus::Continue,
        };
        self.phase_mut(phase).outcome = Some(outcome);
        status
    }
}

impl Drop for PrivacyFilter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
