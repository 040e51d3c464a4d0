//! In-memory test doubles for exercising the client without a real network.
//!
//! Grounded on `opentelemetry_sdk::testing::trace::InMemorySpanExporter`
//! (`opentelemetry-sdk/src/testing/trace.rs`): an exporter that records what
//! it was handed behind a lock instead of sending it anywhere, so tests can
//! assert on exactly what the pipeline produced.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::transport::{HttpRequest, HttpResponse, HttpSend, TransportError};

/// Records every request handed to it and always answers `200 OK`.
#[derive(Default)]
pub struct TestTransport {
    requests: Mutex<Vec<HttpRequest>>,
}

impl TestTransport {
    pub fn new() -> Self {
        TestTransport::default()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().expect("in-memory http lock poisoned").clone()
    }

    pub fn clear(&self) {
        self.requests.lock().expect("in-memory http lock poisoned").clear();
    }
}

#[async_trait]
impl HttpSend for TestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().expect("in-memory http lock poisoned").push(request);
        Ok(HttpResponse {
            status: 200,
            headers: Vec::new(),
        })
    }
}

/// An `HttpSend` that always fails, for exercising network-error drop paths.
pub struct FailingHttpSend;

#[async_trait]
impl HttpSend for FailingHttpSend {
    async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
        Err(TransportError::Network("test double always fails".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_every_request_it_sees() {
        let http = TestTransport::new();
        http.send(HttpRequest {
            url: "https://example.com".into(),
            body: b"a".to_vec(),
            headers: Vec::new(),
        })
        .await
        .unwrap();
        assert_eq!(http.requests().len(), 1);
    }

    #[tokio::test]
    async fn failing_double_always_errors() {
        let http = FailingHttpSend;
        let result = http
            .send(HttpRequest {
                url: "https://example.com".into(),
                body: Vec::new(),
                headers: Vec::new(),
            })
            .await;
        assert!(result.is_err());
    }
}
