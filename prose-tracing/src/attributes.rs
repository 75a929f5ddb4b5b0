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

//! Span tag keys set by the privacy filter.

pub const DIRECTION: &str = "direction";
pub const PHASE: &str = "phase";
pub const DESTINATION: &str = "destination";
pub const EXTERNAL_DOMAIN: &str = "external_domain";
pub const PURPOSE_OF_USE: &str = "purpose_of_use";
pub const ENFORCE: &str = "enforce";
pub const BODY_SIZE: &str = "body_size";
pub const PII_TYPES: &str = "pii_types";
pub const DECISION: &str = "decision";
pub const VIOLATION_TYPE: &str = "violation_type";
pub const SKIPPED: &str = "skipped";

pub const DESTINATION_ERROR: &str = "destination_error";
pub const BODY_ERROR: &str = "body_error";
pub const DECODE_ERROR: &str = "decode_error";
pub const PII_ERROR: &str = "pii_error";
pub const POLICY_ERROR: &str = "policy_error";

pub const DECISION_ACCEPT: &str = "accept";
pub const DECISION_DENY: &str = "deny";
