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

use http::HeaderName;

macro_rules! custom_header {
    ($(#[$attr:meta])* $const_name:ident, $header_string:literal) => {
        $(#[$attr])*
        pub const $const_name: HeaderName = HeaderName::from_static($header_string);
    };
}

custom_header!(
    /// W3C Trace Context parent header
    TRACEPARENT, "traceparent");

custom_header!(
    /// B3 single header propagation
    B3, "b3");

custom_header!(
    /// B3 multi header propagation, trace id
    X_B3_TRACEID, "x-b3-traceid");

custom_header!(
    /// B3 multi header propagation, span id
    X_B3_SPANID, "x-b3-spanid");

custom_header!(
    /// B3 multi header propagation, parent span id
    X_B3_PARENTSPANID, "x-b3-parentspanid");

custom_header!(
    /// B3 multi header propagation, sampling decision
    X_B3_SAMPLED, "x-b3-sampled");

custom_header!(
    /// Base64 encoded protobuf `Struct` describing the calling workload, set by the mesh
    X_ENVOY_PEER_METADATA, "x-envoy-peer-metadata");

custom_header!(
    /// Purpose of use attached to requests leaving the filter
    X_PROSE_PURPOSE, "x-prose-purpose");

custom_header!(
    /// Comma separated PII labels detected in the body, sent as a trailer
    X_PROSE_PII_TYPES, "x-prose-pii-types");
