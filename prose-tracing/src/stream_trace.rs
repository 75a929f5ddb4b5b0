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

use crate::{
    stage_span::StageSpan,
    trace_info::{TraceError, TraceInfo},
};
use http::HeaderMap;
use opentelemetry::global::BoxedTracer;
use std::sync::Arc;

pub const STREAM_SPAN_NAME: &str = "prose_filter";

/// Trace lineage of one proxied stream.
///
/// The incoming context (if any) becomes the remote parent of the stream span and
/// every stage span of the filter nests below the stream span.
#[derive(Debug)]
pub struct StreamTrace {
    remote_parent: Option<TraceInfo>,
    span: StageSpan,
}

impl StreamTrace {
    pub fn start(tracer: Option<Arc<BoxedTracer>>, remote_parent: Option<TraceInfo>) -> Self {
        let span = StageSpan::start(tracer, STREAM_SPAN_NAME, remote_parent.as_ref());
        Self { remote_parent, span }
    }

    /// Extracts the incoming context from request headers. A malformed context is
    /// reported to the caller together with a fresh root trace.
    pub fn from_headers(tracer: Option<Arc<BoxedTracer>>, headers: &HeaderMap) -> (Self, Option<TraceError>) {
        match TraceInfo::extract_from(headers) {
            Ok(parent) => (Self::start(tracer, parent), None),
            Err(err) => (Self::start(tracer, None), Some(err)),
        }
    }

    pub fn remote_parent(&self) -> Option<&TraceInfo> {
        self.remote_parent.as_ref()
    }

    pub fn is_root_node(&self) -> bool {
        self.remote_parent.is_none()
    }

    pub fn should_sample(&self) -> bool {
        self.span.trace_info().sampled()
    }

    pub fn span(&self) -> &StageSpan {
        &self.span
    }

    pub fn span_mut(&mut self) -> &mut StageSpan {
        &mut self.span
    }

    pub fn stage(&self, name: &'static str) -> StageSpan {
        self.span.child(name)
    }

    pub fn finish(&mut self) {
        self.span.end();
    }
}
