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

//! Header metadata the pipeline needs, captured once per message.

use base64::{engine::general_purpose::STANDARD, Engine};
use compact_str::{CompactString, ToCompactString};
use http::{
    header::{CONTENT_LENGTH, CONTENT_TYPE, HOST},
    request, response, HeaderMap, HeaderValue, Method, StatusCode,
};
use prost::Message;
use prost_types::{value::Kind, Struct};
use prose_http_header::X_ENVOY_PEER_METADATA;
use std::collections::BTreeMap;
use tracing::debug;

pub const UNKNOWN_SERVICE: &str = "UNKNOWN SVC";
pub const ANY_PURPOSE: &str = "ANY";
pub const PURPOSE_LABEL: &str = "purpose";

#[derive(Debug, thiserror::Error)]
pub enum PeerMetadataError {
    #[error("peer metadata is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("peer metadata is not a protobuf Struct: {0}")]
    Protobuf(#[from] prost::DecodeError),
}

/// Workload that originated the request, as announced by the mesh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerIdentity {
    pub name: Option<CompactString>,
    pub namespace: Option<CompactString>,
    pub labels: BTreeMap<CompactString, CompactString>,
}

fn string_field<'a>(fields: &'a Struct, key: &str) -> Option<&'a str> {
    match fields.fields.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::StringValue(s)) if !s.is_empty() => Some(s.as_str()),
        _ => None,
    }
}

impl CallerIdentity {
    pub fn from_peer_metadata(value: &HeaderValue) -> Result<Self, PeerMetadataError> {
        let raw = STANDARD.decode(value.as_bytes())?;
        let peer = Struct::decode(raw.as_slice())?;

        let labels = match peer.fields.get("LABELS").and_then(|v| v.kind.as_ref()) {
            Some(Kind::StructValue(labels)) => labels
                .fields
                .iter()
                .filter_map(|(key, value)| match value.kind.as_ref() {
                    Some(Kind::StringValue(s)) => Some((key.to_compact_string(), s.to_compact_string())),
                    _ => None,
                })
                .collect(),
            _ => BTreeMap::new(),
        };

        Ok(Self {
            name: string_field(&peer, "NAME").map(CompactString::from),
            namespace: string_field(&peer, "NAMESPACE").map(CompactString::from),
            labels,
        })
    }

    pub fn service_name(&self) -> &str {
        self.name.as_deref().unwrap_or(UNKNOWN_SERVICE)
    }

    /// Purpose declared by the calling workload: its `purpose` label, else its name.
    pub fn derived_purpose(&self) -> &str {
        self.labels
            .get(PURPOSE_LABEL)
            .map(CompactString::as_str)
            .or(self.name.as_deref())
            .unwrap_or(ANY_PURPOSE)
    }
}

fn content_type(headers: &HeaderMap) -> Option<CompactString> {
    headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()).map(CompactString::from)
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers.get(CONTENT_LENGTH).and_then(|v| v.to_str().ok()).and_then(|v| v.trim().parse().ok())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeaderMetadata {
    pub host: CompactString,
    pub method: Method,
    pub path: CompactString,
    pub content_type: Option<CompactString>,
    pub content_length: Option<u64>,
    pub caller: CallerIdentity,
}

impl RequestHeaderMetadata {
    pub fn extract(parts: &request::Parts) -> Self {
        // HTTP/2 carries the host only as :authority
        let host = parts
            .headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(CompactString::from)
            .or_else(|| parts.uri.authority().map(|authority| authority.as_str().to_compact_string()))
            .unwrap_or_default();

        let caller = match parts.headers.get(X_ENVOY_PEER_METADATA) {
            Some(value) => CallerIdentity::from_peer_metadata(value).unwrap_or_else(|e| {
                debug!(target: "prose::filter", "ignoring peer metadata: {e}");
                CallerIdentity::default()
            }),
            None => CallerIdentity::default(),
        };

        Self {
            host,
            method: parts.method.clone(),
            path: parts.uri.path().to_compact_string(),
            content_type: content_type(&parts.headers),
            content_length: content_length(&parts.headers),
            caller,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeaderMetadata {
    pub status: StatusCode,
    pub content_type: Option<CompactString>,
    pub content_length: Option<u64>,
}

impl ResponseHeaderMetadata {
    pub fn extract(parts: &response::Parts) -> Self {
        Self { status: parts.status, content_type: content_type(&parts.headers), content_length: content_length(&parts.headers) }
    }
}

#[cfg(test)]
pub(crate) fn encode_peer_metadata(name: &str, labels: &[(&str, &str)]) -> HeaderValue {
    use prost_types::Value;
    let string = |s: &str| Value { kind: Some(Kind::StringValue(s.to_owned())) };
    let mut fields = BTreeMap::new();
    fields.insert("NAME".to_owned(), string(name));
    fields.insert("NAMESPACE".to_owned(), string("default"));
    let labels = labels.iter().map(|(k, v)| ((*k).to_owned(), string(*v))).collect();
    fields.insert("LABELS".to_owned(), Value { kind: Some(Kind::StructValue(Struct { fields: labels })) });
    let encoded = STANDARD.encode(Struct { fields }.encode_to_vec());
    HeaderValue::from_str(&encoded).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request;

    fn parts(builder: http::request::Builder) -> request::Parts {
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn request_metadata() {
        let p = parts(
            Request::post("http://api.thirdparty.example:8443/v1/users?id=3")
                .header(CONTENT_TYPE, "application/json")
                .header(CONTENT_LENGTH, "42"),
        );
        let meta = RequestHeaderMetadata::extract(&p);
        assert_eq!(meta.host, "api.thirdparty.example:8443");
        assert_eq!(meta.method, Method::POST);
        assert_eq!(meta.path, "/v1/users");
        assert_eq!(meta.content_type.as_deref(), Some("application/json"));
        assert_eq!(meta.content_length, Some(42));
        assert_eq!(meta.caller, CallerIdentity::default());
    }

    #[test]
    fn host_is_kept_verbatim() {
        let p = parts(Request::get("/orders").header(HOST, "orders.shop.svc.cluster.local"));
        let meta = RequestHeaderMetadata::extract(&p);
        assert_eq!(meta.host, "orders.shop.svc.cluster.local");
        assert_eq!(meta.content_type, None);

        let p = parts(Request::get("/").header(HOST, "[2001:db8::1]:8080"));
        assert_eq!(RequestHeaderMetadata::extract(&p).host, "[2001:db8::1]:8080");

        let p = parts(Request::get("http://10.0.0.7:8080/").header(HOST, "api.partner.com:8443"));
        assert_eq!(RequestHeaderMetadata::extract(&p).host, "api.partner.com:8443");
    }

    #[test]
    fn caller_from_peer_metadata() {
        let p = parts(
            Request::get("/").header(X_ENVOY_PEER_METADATA, encode_peer_metadata("reviews", &[("purpose", "billing")])),
        );
        let caller = RequestHeaderMetadata::extract(&p).caller;
        assert_eq!(caller.service_name(), "reviews");
        assert_eq!(caller.namespace.as_deref(), Some("default"));
        assert_eq!(caller.derived_purpose(), "billing");

        let p = parts(Request::get("/").header(X_ENVOY_PEER_METADATA, encode_peer_metadata("ratings", &[])));
        assert_eq!(RequestHeaderMetadata::extract(&p).caller.derived_purpose(), "ratings");
    }

    #[test]
    fn unknown_caller() {
        let p = parts(Request::get("/").header(X_ENVOY_PEER_METADATA, "%%%not-base64"));
        let caller = RequestHeaderMetadata::extract(&p).caller;
        assert_eq!(caller.service_name(), UNKNOWN_SERVICE);
        assert_eq!(caller.derived_purpose(), ANY_PURPOSE);
    }

    #[test]
    fn response_metadata() {
        let (p, ()) = http::Response::builder()
            .status(StatusCode::CREATED)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(())
            .unwrap()
            .into_parts();
        let meta = ResponseHeaderMetadata::extract(&p);
        assert_eq!(meta.status, StatusCode::CREATED);
        assert_eq!(meta.content_type.as_deref(), Some("application/x-www-form-urlencoded"));
        assert_eq!(meta.content_length, None);
    }
}
