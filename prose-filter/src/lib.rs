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

//! Sidecar HTTP filter detecting personal data in bodies and checking its use against a
//! data privacy policy.

pub mod admission;
pub mod body;
pub mod client;
pub mod decoder;
pub mod direction;
pub mod filter;
pub mod host;
pub mod metadata;
pub mod pii;
pub mod pipeline;
pub mod policy;

pub use filter::{FilterFactory, FilterServices, PrivacyFilter, StreamState};
pub use host::{DestroyReason, FilterStatus, LocalReply, StaticStreamInfo, StreamInfo};
pub use pipeline::{Phase, PhaseOutcome, SkipReason};
pub use prose_error::{Error, Result};
