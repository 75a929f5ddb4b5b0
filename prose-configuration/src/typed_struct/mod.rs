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

//! xDS `TypedStruct` support.
//!
//! The privacy filter is delivered by the control plane wrapped in a `TypedStruct`
//! (`udpa.type.v1` or `xds.type.v3`), so no protobuf descriptor of the filter
//! configuration is needed on the data plane. The wrapped `google.protobuf.Struct`
//! is turned into JSON and deserialized with serde.

mod converter;
mod parser;

pub use converter::JsonConverter;
pub use parser::{TypedStruct, TypedStructParser};

use crate::config::common::GenericError;
use serde_json::Value as JsonValue;

#[derive(Debug, Clone)]
pub struct ParsedTypedStruct {
    pub type_url: String,
    pub value: JsonValue,
}

pub trait TypedStructFilter: Sized {
    const TYPE_URL: &'static str;

    fn from_typed_struct(typed_struct: &ParsedTypedStruct) -> Result<Self, GenericError> {
        if typed_struct.type_url != Self::TYPE_URL {
            return Err(GenericError::from_msg(format!(
                "TypedStruct type URL mismatch: expected {}, got {}",
                Self::TYPE_URL,
                typed_struct.type_url
            )));
        }
        Self::from_json_value(typed_struct.value.clone())
    }

    /// Decodes a serialized `TypedStruct` as delivered by the control plane.
    fn from_typed_struct_bytes(bytes: &[u8]) -> Result<Self, GenericError> {
        Self::from_typed_struct(&TypedStructParser::parse(bytes)?)
    }

    fn from_json_value(value: JsonValue) -> Result<Self, GenericError>;
}
