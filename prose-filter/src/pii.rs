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

//! Client of the PII detection service.

use crate::{client::{ClientError, JsonHttpClient}, decoder::StructuredBody};
use async_trait::async_trait;
use compact_str::CompactString;
use http::HeaderMap;
use prose_configuration::PiiServiceConfig;
use prose_tracing::TraceInfo;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt, sync::Arc, time::Duration};
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PiiLabel(CompactString);

impl PiiLabel {
    pub fn new(label: impl Into<CompactString>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PiiLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Labels detected in one body. Empty means the body was analysed and is clean.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PiiFindings(BTreeSet<PiiLabel>);

impl PiiFindings {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, label: &str) -> bool {
        self.0.iter().any(|l| l.as_str() == label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PiiLabel> {
        self.0.iter()
    }

    /// Comma separated, sorted labels.
    pub fn joined(&self) -> String {
        self.0.iter().map(PiiLabel::as_str).collect::<Vec<_>>().join(",")
    }
}

impl<S: Into<CompactString>> FromIterator<S> for PiiFindings {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(PiiLabel::new).filter(|l| !l.as_str().trim().is_empty()).collect())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("pii service: {0}")]
    Client(#[from] ClientError),
    #[error("pii service returned a malformed response: {0}")]
    MalformedResponse(serde_json::Error),
    #[error("failed to encode pii request: {0}")]
    Encode(serde_json::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct AnalysisRequest<'a> {
    pub body: &'a StructuredBody,
    /// Name of the calling workload, lets the service derive a purpose.
    pub caller: &'a str,
    pub trace: Option<&'a TraceInfo>,
}

#[async_trait]
pub trait PiiAnalyzer: Send + Sync + fmt::Debug {
    async fn analyze(&self, request: AnalysisRequest<'_>) -> Result<PiiFindings, AnalysisError>;
}

#[derive(Serialize)]
struct AnalyzeBody<'a> {
    json_to_analyze: &'a serde_json::Value,
    #[serde(skip_serializing_if = "str::is_empty")]
    derive_purpose: &'a str,
}

#[derive(Debug, Clone)]
pub struct HttpPiiAnalyzer {
    client: JsonHttpClient,
    url: Url,
    timeout: Duration,
}

impl HttpPiiAnalyzer {
    pub fn new(client: JsonHttpClient, url: Url, timeout: Duration) -> Self {
        Self { client, url, timeout }
    }
}

#[async_trait]
impl PiiAnalyzer for HttpPiiAnalyzer {
    async fn analyze(&self, request: AnalysisRequest<'_>) -> Result<PiiFindings, AnalysisError> {
        let body = serde_json::to_vec(&AnalyzeBody { json_to_analyze: request.body.as_json(), derive_purpose: request.caller })
            .map_err(AnalysisError::Encode)?;

        let mut headers = HeaderMap::new();
        if let Some(trace) = request.trace {
            if let Err(e) = trace.inject_into(&mut headers) {
                debug!(target: "prose::pii", "trace context not propagated: {e}");
            }
        }

        let response = self.client.post_json(&self.url, body, headers, self.timeout).await.inspect_err(|e| {
            warn!(target: "prose::pii", "pii service {} failed: {e}", self.url);
        })?;
        let labels: Vec<String> = serde_json::from_slice(&response).map_err(AnalysisError::MalformedResponse)?;
        debug!(target: "prose::pii", "pii service reported {labels:?}");
        Ok(labels.into_iter().collect())
    }
}

/// Reports the same labels for every body without contacting the service.
#[derive(Debug, Clone)]
pub struct StaticPiiAnalyzer {
    findings: PiiFindings,
}

impl StaticPiiAnalyzer {
    pub fn new(findings: PiiFindings) -> Self {
        Self { findings }
    }
}

#[async_trait]
impl PiiAnalyzer for StaticPiiAnalyzer {
    async fn analyze(&self, _request: AnalysisRequest<'_>) -> Result<PiiFindings, AnalysisError> {
        Ok(self.findings.clone())
    }
}

pub fn analyzer_from_config(config: &PiiServiceConfig, client: JsonHttpClient) -> Arc<dyn PiiAnalyzer> {
    match config {
        PiiServiceConfig::Remote { url, timeout } => Arc::new(HttpPiiAnalyzer::new(client, url.clone(), *timeout)),
        PiiServiceConfig::Static { labels } => {
            Arc::new(StaticPiiAnalyzer::new(labels.iter().cloned().collect()))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn findings_are_a_set() {
        let findings: PiiFindings = ["PHONE_NUMBER", "EMAIL_ADDRESS", "PHONE_NUMBER", ""].into_iter().collect();
        assert_eq!(findings.len(), 2);
        assert_eq!(findings.joined(), "EMAIL_ADDRESS,PHONE_NUMBER");
        assert!(findings.contains("EMAIL_ADDRESS"));
        assert!(PiiFindings::default().is_empty());
    }

    #[test]
    fn request_body_shape() {
        let json = serde_json::json!({"email": "a@b.c"});
        let body = serde_json::to_value(AnalyzeBody { json_to_analyze: &json, derive_purpose: "reviews" }).unwrap();
        assert_eq!(body, serde_json::json!({"json_to_analyze": {"email": "a@b.c"}, "derive_purpose": "reviews"}));

        let body = serde_json::to_value(AnalyzeBody { json_to_analyze: &json, derive_purpose: "" }).unwrap();
        assert_eq!(body, serde_json::json!({"json_to_analyze": {"email": "a@b.c"}}));
    }

    #[tokio::test]
    async fn static_analyzer() {
        let config = PiiServiceConfig::Static { labels: vec!["PERSON".into(), "LOCATION".into()] };
        let analyzer = analyzer_from_config(&config, JsonHttpClient::new());
        let body = crate::decoder::decode(Some("application/json"), &"{}".into()).unwrap();
        let findings = analyzer.analyze(AnalysisRequest { body: &body, caller: "", trace: None }).await.unwrap();
        assert_eq!(findings.joined(), "LOCATION,PERSON");
    }
}
