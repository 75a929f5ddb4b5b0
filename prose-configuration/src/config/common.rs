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

use prose_error::BoxedErr;
use std::borrow::Cow;

#[derive(Debug, thiserror::Error)]
pub enum GenericError {
    #[error("{0}")]
    Message(Cow<'static, str>),
    #[error("{msg}: {cause}")]
    MessageWithCause { msg: Cow<'static, str>, cause: BoxedErr },
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("unsupported variant: {0}")]
    UnsupportedVariant(Cow<'static, str>),
}

impl GenericError {
    pub fn from_msg<M: Into<Cow<'static, str>>>(msg: M) -> Self {
        Self::Message(msg.into())
    }

    pub fn from_msg_with_cause<M, E>(msg: M, cause: E) -> Self
    where
        M: Into<Cow<'static, str>>,
        E: Into<BoxedErr>,
    {
        Self::MessageWithCause { msg: msg.into(), cause: cause.into() }
    }

    pub fn unsupported_variant<M: Into<Cow<'static, str>>>(variant: M) -> Self {
        Self::UnsupportedVariant(variant.into())
    }

    #[must_use]
    pub fn is_missing_field(&self, name: &str) -> bool {
        matches!(self, Self::MissingField(field) if *field == name)
    }
}
