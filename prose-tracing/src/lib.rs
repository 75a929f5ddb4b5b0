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

pub mod attributes;
pub mod stage_span;
pub mod stream_trace;
pub mod trace_info;

pub use stage_span::StageSpan;
pub use stream_trace::StreamTrace;
pub use trace_info::{TraceError, TraceInfo, TraceProvider};

use arc_swap::ArcSwapOption;
use opentelemetry::{global::BoxedTracer, trace::TracerProvider, KeyValue};
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};
use parking_lot::Mutex;
use std::{fmt, sync::Arc, time::Duration};
use tracing::info;
use url::Url;

const EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

/// Holds the tracer used by every filter instance of a chain.
///
/// Readers never block; a reconfiguration builds the new exporter first and then
/// swaps it in atomically, so in-flight streams keep the tracer they started with.
pub struct TracerRegistry {
    write_lock: Mutex<()>,
    tracer: ArcSwapOption<BoxedTracer>,
}

impl fmt::Debug for TracerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracerRegistry").field("enabled", &self.tracer.load().is_some()).finish()
    }
}

impl Default for TracerRegistry {
    fn default() -> Self {
        Self::disabled()
    }
}

impl TracerRegistry {
    pub fn disabled() -> Self {
        Self { write_lock: Mutex::new(()), tracer: ArcSwapOption::empty() }
    }

    pub fn with_tracer(tracer: BoxedTracer) -> Self {
        let registry = Self::disabled();
        registry.replace(Some(tracer));
        registry
    }

    pub fn current(&self) -> Option<Arc<BoxedTracer>> {
        self.tracer.load_full()
    }

    pub fn replace(&self, tracer: Option<BoxedTracer>) {
        let _lock = self.write_lock.lock();
        self.tracer.store(tracer.map(Arc::new));
    }

    /// Installs an OTLP/gRPC exporter towards `endpoint`. Must run inside a tokio runtime.
    pub fn install_otlp(&self, endpoint: &Url, service_name: &str) -> Result<(), TraceError> {
        let _lock = self.write_lock.lock();

        let resource = Resource::builder()
            .with_attribute(KeyValue::new("service.name", service_name.to_owned()))
            .with_attribute(KeyValue::new("service.version", env!("CARGO_PKG_VERSION")))
            .build();

        let exporter = SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint.as_str())
            .with_timeout(EXPORT_TIMEOUT)
            .build()
            .map_err(|e| TraceError::Exporter(e.to_string()))?;

        let provider = SdkTracerProvider::builder().with_batch_exporter(exporter).with_resource(resource).build();
        let tracer = provider.tracer("prose-tracing");

        self.tracer.store(Some(Arc::new(BoxedTracer::new(Box::new(tracer)))));
        info!(target: "prose::tracing", "OTLP tracer installed -> {endpoint}");
        Ok(())
    }
}
