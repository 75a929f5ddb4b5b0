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

//! The seam between the privacy filter and the proxy hosting it.

use bytes::Bytes;
use http::{header::CONTENT_TYPE, HeaderValue, Response, StatusCode};
use http_body_util::Full;
use std::collections::HashMap;

/// Envoy `TrafficDirection` of the listener the stream arrived on.
pub const LISTENER_DIRECTION_PROPERTY: &str = "xds.listener_direction";
/// Original destination of the downstream connection, `ip` or `ip:port`.
pub const DESTINATION_ADDRESS_PROPERTY: &str = "destination.address";

pub const FORBIDDEN_BODY: &str = "Forbidden by data privacy policy\n";

/// Stream level properties exposed by the proxy.
pub trait StreamInfo: Send + Sync {
    fn property(&self, name: &str) -> Option<String>;
}

/// Property bag for hosts which resolve properties up front.
#[derive(Debug, Clone, Default)]
pub struct StaticStreamInfo {
    properties: HashMap<String, String>,
}

impl StaticStreamInfo {
    #[must_use]
    pub fn with_property(mut self, name: &str, value: impl Into<String>) -> Self {
        self.properties.insert(name.to_owned(), value.into());
        self
    }
}

impl StreamInfo for StaticStreamInfo {
    fn property(&self, name: &str) -> Option<String> {
        self.properties.get(name).cloned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalReply {
    pub status: StatusCode,
    pub body: Bytes,
    pub details: &'static str,
}

impl LocalReply {
    pub fn forbidden() -> Self {
        Self { status: StatusCode::FORBIDDEN, body: Bytes::from_static(FORBIDDEN_BODY.as_bytes()), details: "prose_policy_violation" }
    }

    pub fn into_response(self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(self.body));
        *response.status_mut() = self.status;
        response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        response
    }
}

/// What the proxy should do with the stream after a callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterStatus {
    Continue,
    /// Hold the data seen so far, more is needed before a decision.
    StopAndBuffer,
    /// Answer the downstream directly and stop forwarding.
    LocalReply(LocalReply),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyReason {
    Terminate,
    Reset,
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn forbidden_reply() {
        let response = LocalReply::forbidden().into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, FORBIDDEN_BODY.as_bytes());
    }

    #[test]
    fn static_properties() {
        let info = StaticStreamInfo::default().with_property(LISTENER_DIRECTION_PROPERTY, "1");
        assert_eq!(info.property(LISTENER_DIRECTION_PROPERTY).as_deref(), Some("1"));
        assert_eq!(info.property(DESTINATION_ADDRESS_PROPERTY), None);
    }
}
