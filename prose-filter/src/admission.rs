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

use std::{num::NonZeroUsize, sync::Arc};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{limit} analyses already in flight")]
pub struct AdmissionError {
    pub limit: usize,
}

/// Bounds the number of bodies analysed at the same time by one filter chain.
///
/// A stream that can't get a permit is let through unanalysed rather than queued.
#[derive(Debug, Clone)]
pub struct AnalysisLimiter {
    permits: Arc<Semaphore>,
    limit: usize,
}

impl AnalysisLimiter {
    pub fn new(limit: NonZeroUsize) -> Self {
        Self { permits: Arc::new(Semaphore::new(limit.get())), limit: limit.get() }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn try_admit(&self) -> Result<OwnedSemaphorePermit, AdmissionError> {
        Arc::clone(&self.permits).try_acquire_owned().map_err(|_| AdmissionError { limit: self.limit })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permits_are_returned_on_drop() {
        let limiter = AnalysisLimiter::new(NonZeroUsize::new(2).unwrap());
        let first = limiter.try_admit().unwrap();
        let _second = limiter.try_admit().unwrap();
        assert_eq!(limiter.try_admit().unwrap_err(), AdmissionError { limit: 2 });
        drop(first);
        assert_eq!(limiter.available(), 1);
        assert!(limiter.try_admit().is_ok());
    }

    #[test]
    fn clones_share_permits() {
        let limiter = AnalysisLimiter::new(NonZeroUsize::MIN);
        let other = limiter.clone();
        let _permit = limiter.try_admit().unwrap();
        assert!(other.try_admit().is_err());
    }
}
