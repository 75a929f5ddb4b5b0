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

//! Minimal JSON over HTTP/1.1 client shared by the analysis and policy clients.

use bytes::Bytes;
use http::{
    header::{ACCEPT, CONTENT_TYPE},
    HeaderMap, HeaderValue, Method, Request, StatusCode, Uri,
};
use http_body_util::{BodyExt, Full};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use pingora_timeout::fast_timeout::fast_timeout;
use std::time::Duration;
use tracing::trace;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid uri: {0}")]
    InvalidUri(#[from] http::uri::InvalidUri),
    #[error("unsupported scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("invalid request: {0}")]
    Request(#[from] http::Error),
    #[error("request failed: {0}")]
    Send(#[from] hyper_util::client::legacy::Error),
    #[error("failed to read response body: {0}")]
    Body(#[from] hyper::Error),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("unexpected response status {0}")]
    Status(StatusCode),
}

#[derive(Debug, Clone)]
pub struct JsonHttpClient {
    client: Client<HttpConnector, Full<Bytes>>,
}

impl Default for JsonHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonHttpClient {
    pub fn new() -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        Self { client: Client::builder(TokioExecutor::new()).build(connector) }
    }

    /// POSTs a JSON document and returns the body of a 2xx response. The timeout
    /// covers connecting, sending and reading the whole response.
    pub async fn post_json(
        &self,
        url: &Url,
        body: Vec<u8>,
        extra_headers: HeaderMap,
        timeout: Duration,
    ) -> Result<Bytes, ClientError> {
        if url.scheme() != "http" {
            return Err(ClientError::UnsupportedScheme(url.scheme().to_owned()));
        }
        let uri: Uri = url.as_str().parse()?;

        let mut request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .body(Full::new(Bytes::from(body)))?;
        request.headers_mut().extend(extra_headers);

        let exchange = async {
            let response = self.client.request(request).await?;
            let status = response.status();
            let body = response.into_body().collect().await?.to_bytes();
            trace!(target: "prose::client", "{url} -> {status}, {} bytes", body.len());
            if status.is_success() {
                Ok(body)
            } else {
                Err(ClientError::Status(status))
            }
        };

        fast_timeout(timeout, exchange).await.map_err(|_| ClientError::Timeout(timeout))?
    }
}
