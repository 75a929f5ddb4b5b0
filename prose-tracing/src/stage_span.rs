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

use crate::trace_info::TraceInfo;
use opentelemetry::{
    global::{BoxedSpan, BoxedTracer},
    trace::{Span, SpanContext, SpanId, SpanKind, Status, TraceContextExt, TraceFlags, TraceId, TraceState, Tracer},
    Context, KeyValue, Value,
};
use std::{
    fmt::{self, Display},
    sync::Arc,
};

/// One unit of filter work in a trace.
///
/// The identifiers are always allocated so that they can be propagated, the
/// exported span only exists when a tracer is installed and the trace is sampled.
/// The span is ended when the guard is dropped, whatever path the filter took.
pub struct StageSpan {
    info: TraceInfo,
    span: Option<BoxedSpan>,
    tracer: Option<Arc<BoxedTracer>>,
}

impl StageSpan {
    pub fn start(tracer: Option<Arc<BoxedTracer>>, name: &'static str, parent: Option<&TraceInfo>) -> Self {
        let info = parent.map_or_else(
            || TraceInfo::root(crate::trace_info::TraceProvider::W3CTraceContext),
            TraceInfo::child,
        );
        let span = tracer.as_deref().filter(|_| info.sampled()).map(|tracer| start_span(tracer, name, &info, parent));
        Self { info, span, tracer }
    }

    /// Starts a span nested under this one.
    #[must_use]
    pub fn child(&self, name: &'static str) -> Self {
        let tracer = self.span.as_ref().and(self.tracer.clone());
        let info = self.info.child();
        let span = tracer.as_deref().map(|tracer| start_span(tracer, name, &info, Some(&self.info)));
        Self { info, span, tracer }
    }

    pub fn trace_info(&self) -> &TraceInfo {
        &self.info
    }

    pub fn is_recording(&self) -> bool {
        self.span.is_some()
    }

    pub fn set_tag<V: Into<Value>>(&mut self, key: &'static str, value: V) {
        if let Some(span) = self.span.as_mut() {
            span.set_attribute(KeyValue::new(key, value));
        }
    }

    /// Records a failure under `key` and marks the span as errored.
    pub fn set_error<E: Display + ?Sized>(&mut self, key: &'static str, err: &E) {
        if let Some(span) = self.span.as_mut() {
            let msg = err.to_string();
            span.set_attribute(KeyValue::new(key, msg.clone()));
            span.set_status(Status::error(msg));
        }
    }

    pub fn end(&mut self) {
        if let Some(mut span) = self.span.take() {
            span.end();
        }
    }
}

impl fmt::Debug for StageSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageSpan").field("info", &self.info).field("recording", &self.is_recording()).finish()
    }
}

impl Drop for StageSpan {
    fn drop(&mut self) {
        self.end();
    }
}

fn start_span(tracer: &BoxedTracer, name: &'static str, info: &TraceInfo, parent: Option<&TraceInfo>) -> BoxedSpan {
    let builder = tracer
        .span_builder(name)
        .with_span_id(SpanId::from_bytes(info.span_id().to_be_bytes()))
        .with_trace_id(TraceId::from_bytes(info.trace_id().to_be_bytes()))
        .with_kind(SpanKind::Internal);

    let parent_context = match parent {
        Some(parent) => Context::new().with_remote_span_context(SpanContext::new(
            TraceId::from_bytes(parent.trace_id().to_be_bytes()),
            SpanId::from_bytes(parent.span_id().to_be_bytes()),
            if parent.sampled() { TraceFlags::SAMPLED } else { TraceFlags::default() },
            true,
            TraceState::default(),
        )),
        None => Context::new(),
    };

    builder.start_with_context(tracer, &parent_context)
}
