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

use crate::body::CompleteBody;
use compact_str::CompactString;
use serde_json::{Map, Value};
use url::form_urlencoded;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Json,
    FormUrlEncoded,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("content type is not set")]
    MissingContentType,
    #[error("unsupported content type '{0}'")]
    UnsupportedContentType(CompactString),
    #[error("body is empty")]
    EmptyBody,
    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

impl MediaType {
    /// Media type of a `content-type` value, ignoring parameters and case.
    pub fn from_content_type(content_type: Option<&str>) -> Result<Self, DecodeError> {
        let raw = content_type.ok_or(DecodeError::MissingContentType)?;
        let essence = raw.split(';').next().unwrap_or_default().trim();
        if essence.eq_ignore_ascii_case("application/json") {
            Ok(Self::Json)
        } else if essence.eq_ignore_ascii_case("application/x-www-form-urlencoded") {
            Ok(Self::FormUrlEncoded)
        } else if essence.is_empty() {
            Err(DecodeError::MissingContentType)
        } else {
            Err(DecodeError::UnsupportedContentType(CompactString::from(raw)))
        }
    }
}

/// Body turned into the generic JSON shape the detection service analyses.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredBody(Value);

impl StructuredBody {
    pub fn as_json(&self) -> &Value {
        &self.0
    }

    pub fn into_json(self) -> Value {
        self.0
    }
}

impl From<Value> for StructuredBody {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

pub fn decode(content_type: Option<&str>, body: &CompleteBody) -> Result<StructuredBody, DecodeError> {
    let media_type = MediaType::from_content_type(content_type)?;
    if body.is_empty() {
        return Err(DecodeError::EmptyBody);
    }
    match media_type {
        MediaType::Json => Ok(StructuredBody(serde_json::from_slice(body.as_bytes())?)),
        MediaType::FormUrlEncoded => Ok(StructuredBody(decode_form(body.as_bytes()))),
    }
}

// Repeated keys accumulate: `a=1&a=2` becomes `{"a": ["1", "2"]}`.
fn decode_form(body: &[u8]) -> Value {
    let mut fields = Map::new();
    for (key, value) in form_urlencoded::parse(body) {
        let values = fields.entry(key.into_owned()).or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(values) = values {
            values.push(Value::String(value.into_owned()));
        }
    }
    Value::Object(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_body() {
        let body = CompleteBody::from(r#"{"email": "a@b.c", "nested": {"phone": ["555-0100"]}}"#);
        let decoded = decode(Some("application/json"), &body).unwrap();
        assert_eq!(decoded.as_json(), &json!({"email": "a@b.c", "nested": {"phone": ["555-0100"]}}));
    }

    #[test]
    fn json_with_parameters() {
        let body = CompleteBody::from("[1, 2]");
        assert!(decode(Some("Application/JSON; charset=utf-8"), &body).is_ok());
    }

    #[test]
    fn invalid_json_is_rejected() {
        let body = CompleteBody::from(r#"{"email": "#);
        assert!(matches!(decode(Some("application/json"), &body), Err(DecodeError::InvalidJson(_))));
    }

    #[test]
    fn form_body() {
        let body = CompleteBody::from("a=1&b=2");
        let decoded = decode(Some("application/x-www-form-urlencoded"), &body).unwrap();
        assert_eq!(decoded.into_json(), json!({"a": ["1"], "b": ["2"]}));
    }

    #[test]
    fn form_repeated_and_escaped_keys() {
        let body = CompleteBody::from("name=Jane+Doe&email=jane%40example.com&name=J.");
        let decoded = decode(Some("application/x-www-form-urlencoded"), &body).unwrap();
        assert_eq!(decoded.into_json(), json!({"name": ["Jane Doe", "J."], "email": ["jane@example.com"]}));
    }

    #[test]
    fn unsupported_or_missing_content_type() {
        let body = CompleteBody::from("hello");
        assert!(matches!(decode(None, &body), Err(DecodeError::MissingContentType)));
        assert!(matches!(decode(Some(""), &body), Err(DecodeError::MissingContentType)));
        assert!(matches!(
            decode(Some("text/plain"), &body),
            Err(DecodeError::UnsupportedContentType(ct)) if ct == "text/plain"
        ));
    }

    #[test]
    fn empty_body() {
        let body = CompleteBody::from("");
        assert!(matches!(decode(Some("application/json"), &body), Err(DecodeError::EmptyBody)));
    }
}
