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

//! Per phase body accumulation.
//!
//! A body only ever reaches the decoder as a [`CompleteBody`], which this module
//! alone can construct once end of stream has been observed.

use bytes::{Bytes, BytesMut};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteBody(Bytes);

impl CompleteBody {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
impl From<&'static str> for CompleteBody {
    fn from(body: &'static str) -> Self {
        Self(Bytes::from_static(body.as_bytes()))
    }
}

#[derive(Debug, Default)]
pub enum BodyState {
    #[default]
    Idle,
    Buffering(BytesMut),
    Complete,
    /// The body grew past the configured bound and is no longer tracked.
    Overflowed,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Aggregation {
    /// More data is expected.
    Pending,
    Complete(CompleteBody),
    Overflowed { received: usize },
    /// Nothing to do, the body was already handed over or abandoned.
    Ignored,
}

#[derive(Debug)]
pub struct BodyAggregator {
    state: BodyState,
    max_bytes: usize,
}

impl BodyAggregator {
    pub fn new(max_bytes: usize) -> Self {
        Self { state: BodyState::Idle, max_bytes }
    }

    pub fn state(&self) -> &BodyState {
        &self.state
    }

    pub fn is_buffering(&self) -> bool {
        matches!(self.state, BodyState::Buffering(_))
    }

    pub fn push(&mut self, data: &[u8], end_of_stream: bool) -> Aggregation {
        if matches!(self.state, BodyState::Idle) {
            self.state = BodyState::Buffering(BytesMut::with_capacity(data.len()));
        }
        let BodyState::Buffering(buffer) = &mut self.state else {
            return Aggregation::Ignored;
        };

        let received = buffer.len() + data.len();
        if received > self.max_bytes {
            self.state = BodyState::Overflowed;
            return Aggregation::Overflowed { received };
        }
        buffer.extend_from_slice(data);

        if end_of_stream {
            self.finish()
        } else {
            Aggregation::Pending
        }
    }

    /// Ends the body without more data, as when trailers follow the last frame.
    pub fn finish(&mut self) -> Aggregation {
        match std::mem::take(&mut self.state) {
            BodyState::Buffering(buffer) => {
                self.state = BodyState::Complete;
                Aggregation::Complete(CompleteBody(buffer.freeze()))
            },
            BodyState::Idle => Aggregation::Ignored,
            other => {
                self.state = other;
                Aggregation::Ignored
            },
        }
    }

    /// Stops tracking the body, whatever was buffered is released.
    pub fn abandon(&mut self) {
        if !matches!(self.state, BodyState::Idle) {
            self.state = BodyState::Complete;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_are_reassembled_in_order() {
        let mut agg = BodyAggregator::new(1024);
        assert_eq!(agg.push(b"{\"email\":", false), Aggregation::Pending);
        assert!(agg.is_buffering());
        assert_eq!(agg.push(b"\"a@b.c\"", false), Aggregation::Pending);
        assert_eq!(agg.push(b"}", true), Aggregation::Complete(CompleteBody::from("{\"email\":\"a@b.c\"}")));
        assert!(matches!(agg.state(), BodyState::Complete));
        // completion happens once
        assert_eq!(agg.push(b"late", true), Aggregation::Ignored);
        assert_eq!(agg.finish(), Aggregation::Ignored);
    }

    #[test]
    fn single_frame_body() {
        let mut agg = BodyAggregator::new(1024);
        assert_eq!(agg.push(b"a=1&b=2", true), Aggregation::Complete(CompleteBody::from("a=1&b=2")));
    }

    #[test]
    fn trailers_end_the_body() {
        let mut agg = BodyAggregator::new(1024);
        assert_eq!(agg.finish(), Aggregation::Ignored);
        assert_eq!(agg.push(b"abc", false), Aggregation::Pending);
        assert_eq!(agg.finish(), Aggregation::Complete(CompleteBody::from("abc")));
    }

    #[test]
    fn overflow_abandons_the_body() {
        let mut agg = BodyAggregator::new(4);
        assert_eq!(agg.push(b"abc", false), Aggregation::Pending);
        assert_eq!(agg.push(b"de", false), Aggregation::Overflowed { received: 5 });
        assert_eq!(agg.push(b"f", true), Aggregation::Ignored);
        assert_eq!(agg.finish(), Aggregation::Ignored);
    }

    #[test]
    fn abandon() {
        let mut agg = BodyAggregator::new(16);
        agg.push(b"abc", false);
        agg.abandon();
        assert_eq!(agg.push(b"d", true), Aggregation::Ignored);
    }
}
