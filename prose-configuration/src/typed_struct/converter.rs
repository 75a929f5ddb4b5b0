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

use crate::config::common::GenericError;
use prost_types::{value::Kind, ListValue, Struct, Value};
use serde_json::{Map as JsonMap, Number, Value as JsonValue};

/// `google.protobuf.Struct` to `serde_json::Value`.
pub struct JsonConverter;

impl JsonConverter {
    pub fn struct_to_json(proto_struct: &Struct) -> Result<JsonValue, GenericError> {
        proto_struct
            .fields
            .iter()
            .map(|(key, value)| Ok((key.clone(), Self::value_to_json(value)?)))
            .collect::<Result<JsonMap<_, _>, GenericError>>()
            .map(JsonValue::Object)
    }

    pub fn value_to_json(proto_value: &Value) -> Result<JsonValue, GenericError> {
        Ok(match &proto_value.kind {
            None | Some(Kind::NullValue(_)) => JsonValue::Null,
            Some(Kind::NumberValue(n)) => JsonValue::Number(number(*n)?),
            Some(Kind::StringValue(s)) => JsonValue::String(s.clone()),
            Some(Kind::BoolValue(b)) => JsonValue::Bool(*b),
            Some(Kind::StructValue(s)) => Self::struct_to_json(s)?,
            Some(Kind::ListValue(l)) => Self::list_to_json(l)?,
        })
    }

    pub fn list_to_json(proto_list: &ListValue) -> Result<JsonValue, GenericError> {
        proto_list.values.iter().map(Self::value_to_json).collect::<Result<Vec<_>, _>>().map(JsonValue::Array)
    }
}

// Struct numbers are always doubles; integral values are kept integral so that
// fields such as `max_body_bytes` deserialize into integer types.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn number(n: f64) -> Result<Number, GenericError> {
    if n.fract() == 0.0 && n >= i64::MIN as f64 && n <= i64::MAX as f64 {
        let int = n as i64;
        return Ok(if int >= 0 { Number::from(int.unsigned_abs()) } else { Number::from(int) });
    }
    Number::from_f64(n).ok_or_else(|| GenericError::from_msg(format!("invalid number: {n}")))
}
