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

use super::{JsonConverter, ParsedTypedStruct};
use crate::config::common::GenericError;
use prost::Message;

/// `udpa.type.v1.TypedStruct` / `xds.type.v3.TypedStruct`, both share the same layout.
#[derive(Clone, PartialEq, Message)]
pub struct TypedStruct {
    #[prost(string, tag = "1")]
    pub type_url: String,
    #[prost(message, optional, tag = "2")]
    pub value: Option<prost_types::Struct>,
}

pub struct TypedStructParser;

impl TypedStructParser {
    pub fn parse(bytes: &[u8]) -> Result<ParsedTypedStruct, GenericError> {
        let TypedStruct { type_url, value } =
            TypedStruct::decode(bytes).map_err(|e| GenericError::from_msg_with_cause("failed to decode TypedStruct", e))?;
        let value = match value {
            Some(ref fields) => JsonConverter::struct_to_json(fields)?,
            None => serde_json::json!({}),
        };
        Ok(ParsedTypedStruct { type_url, value })
    }

    pub fn is_typed_struct_url(type_url: &str) -> bool {
        matches!(
            type_url,
            "type.googleapis.com/udpa.type.v1.TypedStruct" | "type.googleapis.com/xds.type.v3.TypedStruct"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{typed_struct::TypedStructFilter, FilterConfig, SidecarDirection};
    use prost_types::{value::Kind, ListValue, Struct, Value};
    use std::collections::BTreeMap;

    fn string(s: &str) -> Value {
        Value { kind: Some(Kind::StringValue(s.to_owned())) }
    }

    #[test]
    fn wrapper_urls() {
        assert!(TypedStructParser::is_typed_struct_url("type.googleapis.com/udpa.type.v1.TypedStruct"));
        assert!(TypedStructParser::is_typed_struct_url("type.googleapis.com/xds.type.v3.TypedStruct"));
        assert!(!TypedStructParser::is_typed_struct_url(FilterConfig::TYPE_URL));
    }

    #[test]
    fn empty_value_is_an_empty_object() {
        let bytes = TypedStruct { type_url: FilterConfig::TYPE_URL.to_owned(), value: None }.encode_to_vec();
        let parsed = TypedStructParser::parse(&bytes).unwrap();
        assert_eq!(parsed.value, serde_json::json!({}));
        // direction is mandatory
        assert!(FilterConfig::from_typed_struct(&parsed).is_err());
    }

    #[test]
    fn filter_config_from_typed_struct() {
        let mut fields = BTreeMap::new();
        fields.insert("direction".to_owned(), string("SIDECAR_INBOUND"));
        fields.insert("enforce".to_owned(), Value { kind: Some(Kind::BoolValue(true)) });
        fields.insert(
            "internal_cidrs".to_owned(),
            Value { kind: Some(Kind::ListValue(ListValue { values: vec![string("10.0.0.0/8")] })) },
        );
        fields.insert("pii_service_timeout".to_owned(), string("250ms"));
        let bytes =
            TypedStruct { type_url: FilterConfig::TYPE_URL.to_owned(), value: Some(Struct { fields }) }.encode_to_vec();

        let config = FilterConfig::from_typed_struct_bytes(&bytes).unwrap();
        assert_eq!(config.direction, SidecarDirection::SidecarInbound);
        assert!(config.enforce);
        assert_eq!(config.internal_cidrs, vec!["10.0.0.0/8".parse::<ipnet::IpNet>().unwrap()]);
        assert_eq!(config.pii_service_timeout, Some(std::time::Duration::from_millis(250)));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(TypedStructParser::parse(&[0xff, 0xff, 0xff]).is_err());
        assert!(FilterConfig::from_typed_struct_bytes(&[0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn foreign_type_url_is_rejected() {
        let mut fields = BTreeMap::new();
        fields.insert("direction".to_owned(), string("SIDECAR_OUTBOUND"));
        let bytes = TypedStruct {
            type_url: "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router".to_owned(),
            value: Some(Struct { fields }),
        }
        .encode_to_vec();
        let err = FilterConfig::from_typed_struct_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("type URL mismatch"), "{err}");
    }
}
