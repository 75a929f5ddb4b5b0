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

use http::{header::InvalidHeaderValue, HeaderMap, HeaderValue};
use prose_http_header::{B3, TRACEPARENT, X_B3_PARENTSPANID, X_B3_SAMPLED, X_B3_SPANID, X_B3_TRACEID};
use rand::Rng;
use std::fmt::{self, Display};

#[derive(thiserror::Error, Debug)]
pub enum TraceError {
    #[error("invalid trace header format")]
    InvalidFormat,
    #[error("invalid header value: {0}")]
    InvalidHeaderValue(#[from] InvalidHeaderValue),
    #[error("missing span id")]
    MissingSpanId,
    #[error("missing trace id")]
    MissingTraceId,
    #[error("failed to build span exporter: {0}")]
    Exporter(String),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TraceProvider {
    W3CTraceContext,
    B3,
    B3Multi,
}

/// A position in a distributed trace: the identifiers of one span plus the
/// propagation format it travels in.
#[derive(Clone, Eq, PartialEq)]
pub struct TraceInfo {
    trace_id: u128,
    span_id: u64,
    parent_id: Option<u64>,
    provider: TraceProvider,
    sampled: bool,
}

impl Display for TraceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.provider {
            TraceProvider::W3CTraceContext => {
                write!(f, "00-{:032x}-{:016x}-{}", self.trace_id, self.span_id, if self.sampled { "01" } else { "00" })
            },
            TraceProvider::B3 | TraceProvider::B3Multi => {
                write!(f, "{:032x}-{:016x}-{}", self.trace_id, self.span_id, if self.sampled { "1" } else { "0" })?;
                if let Some(parent_id) = self.parent_id {
                    write!(f, "-{parent_id:016x}")?;
                }
                Ok(())
            },
        }
    }
}

impl fmt::Debug for TraceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceInfo")
            .field("trace_id", &format_args!("{:032x}", self.trace_id))
            .field("span_id", &format_args!("{:016x}", self.span_id))
            .field("parent_id", &self.parent_id.map(|id| format!("{id:016x}")))
            .field("provider", &self.provider)
            .field("sampled", &self.sampled)
            .finish()
    }
}

fn non_zero_random<T>() -> T
where
    T: Default + PartialEq,
    rand::distr::StandardUniform: rand::distr::Distribution<T>,
{
    let mut rng = rand::rng();
    loop {
        let id: T = rng.random();
        if id != T::default() {
            return id;
        }
    }
}

fn parse_hex_u128(s: &str) -> Result<u128, TraceError> {
    if s.len() != 32 && s.len() != 16 {
        return Err(TraceError::InvalidFormat);
    }
    match u128::from_str_radix(s, 16) {
        Ok(0) | Err(_) => Err(TraceError::InvalidFormat),
        Ok(id) => Ok(id),
    }
}

fn parse_hex_u64(s: &str) -> Result<u64, TraceError> {
    if s.len() != 16 {
        return Err(TraceError::InvalidFormat);
    }
    match u64::from_str_radix(s, 16) {
        Ok(0) | Err(_) => Err(TraceError::InvalidFormat),
        Ok(id) => Ok(id),
    }
}

fn parse_sampled(s: &str) -> Result<bool, TraceError> {
    match s {
        "1" | "d" => Ok(true),
        "0" => Ok(false),
        _ => Err(TraceError::InvalidFormat),
    }
}

impl TraceInfo {
    /// Starts a brand new trace.
    pub fn root(provider: TraceProvider) -> Self {
        TraceInfo { trace_id: non_zero_random(), span_id: non_zero_random(), parent_id: None, provider, sampled: true }
    }

    /// Identifiers for a new span whose parent is `self`.
    #[must_use]
    pub fn child(&self) -> Self {
        TraceInfo { span_id: non_zero_random(), parent_id: Some(self.span_id), ..self.clone() }
    }

    /// Reads an incoming trace context. `Ok(None)` when the request carries none, an error
    /// when one is present but malformed.
    pub fn extract_from(headers: &HeaderMap) -> Result<Option<Self>, TraceError> {
        if let Some(value) = headers.get(TRACEPARENT) {
            return Self::parse_traceparent(value.to_str().map_err(|_| TraceError::InvalidFormat)?).map(Some);
        }

        if let Some(value) = headers.get(B3) {
            return Self::parse_b3(value.to_str().map_err(|_| TraceError::InvalidFormat)?);
        }

        let header = |name| headers.get(name).map(|v: &HeaderValue| v.to_str().map_err(|_| TraceError::InvalidFormat));
        match (header(X_B3_TRACEID), header(X_B3_SPANID)) {
            (Some(trace_id), Some(span_id)) => {
                let trace_id = parse_hex_u128(trace_id?)?;
                let span_id = parse_hex_u64(span_id?)?;
                let parent_id = header(X_B3_PARENTSPANID).transpose()?.map(parse_hex_u64).transpose()?;
                let sampled = header(X_B3_SAMPLED).transpose()?.map_or(Ok(true), parse_sampled)?;
                Ok(Some(TraceInfo { trace_id, span_id, parent_id, provider: TraceProvider::B3Multi, sampled }))
            },
            (Some(_), None) => Err(TraceError::MissingSpanId),
            (None, Some(_)) => Err(TraceError::MissingTraceId),
            (None, None) => Ok(None),
        }
    }

    fn parse_traceparent(value: &str) -> Result<Self, TraceError> {
        let tp = traceparent::parse(value.trim()).map_err(|_| TraceError::InvalidFormat)?;
        // all-zero identifiers are invalid in W3C trace context
        if tp.trace_id() == 0 || tp.parent_id() == 0 {
            return Err(TraceError::InvalidFormat);
        }
        Ok(TraceInfo {
            trace_id: tp.trace_id(),
            // the header's parent-id is the span id of the caller
            span_id: tp.parent_id(),
            parent_id: None,
            provider: TraceProvider::W3CTraceContext,
            sampled: tp.sampled(),
        })
    }

    fn parse_b3(value: &str) -> Result<Option<Self>, TraceError> {
        let parts: Vec<&str> = value.trim().split('-').collect();
        match parts.as_slice() {
            // a lone sampling decision carries no context to join
            [_] => Ok(None),
            [trace_id, span_id, rest @ ..] if rest.len() <= 2 => {
                let sampled = rest.first().map_or(Ok(true), |s| parse_sampled(s))?;
                let parent_id = rest.get(1).map(|id| parse_hex_u64(id)).transpose()?;
                Ok(Some(TraceInfo {
                    trace_id: parse_hex_u128(trace_id)?,
                    span_id: parse_hex_u64(span_id)?,
                    parent_id,
                    provider: TraceProvider::B3,
                    sampled,
                }))
            },
            _ => Err(TraceError::InvalidFormat),
        }
    }

    /// Writes this context into `headers` in its own propagation format.
    pub fn inject_into(&self, headers: &mut HeaderMap) -> Result<(), TraceError> {
        match self.provider {
            TraceProvider::W3CTraceContext => {
                headers.insert(TRACEPARENT, HeaderValue::from_str(&self.to_string())?);
            },
            TraceProvider::B3 => {
                headers.insert(B3, HeaderValue::from_str(&self.to_string())?);
            },
            TraceProvider::B3Multi => {
                headers.insert(X_B3_TRACEID, HeaderValue::from_str(&format!("{:032x}", self.trace_id))?);
                headers.insert(X_B3_SPANID, HeaderValue::from_str(&format!("{:016x}", self.span_id))?);
                headers.insert(X_B3_SAMPLED, HeaderValue::from_static(if self.sampled { "1" } else { "0" }));
                match self.parent_id {
                    Some(parent_id) => {
                        headers.insert(X_B3_PARENTSPANID, HeaderValue::from_str(&format!("{parent_id:016x}"))?);
                    },
                    None => {
                        headers.remove(X_B3_PARENTSPANID);
                    },
                }
            },
        }
        Ok(())
    }

    pub fn trace_id(&self) -> u128 {
        self.trace_id
    }

    pub fn span_id(&self) -> u64 {
        self.span_id
    }

    pub fn parent_id(&self) -> Option<u64> {
        self.parent_id
    }

    pub fn sampled(&self) -> bool {
        self.sampled
    }

    pub fn provider(&self) -> TraceProvider {
        self.provider
    }
}
