//! HTTP transport: the whole batch as one JSON array.

use crate::{Transport, TransportError, TransportReport, TransportResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use shipper_core::{Batch, Config, LogRecord};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Posts each batch to a collector endpoint.
///
/// A 2xx response acknowledges every record in the batch; anything else
/// acknowledges none.
pub struct HttpTransport {
    client: Client,
    url: Url,
    cancel: Mutex<CancellationToken>,
}

impl HttpTransport {
    pub fn new(url: Url, timeout: Duration, allow_untrusted_server: bool) -> TransportResult<Self> {
        let client = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .connect_timeout(timeout)
            .danger_accept_invalid_certs(allow_untrusted_server)
            .build()
            .map_err(|e| TransportError::Config(e.to_string()))?;

        Ok(Self {
            client,
            url,
            cancel: Mutex::new(CancellationToken::new()),
        })
    }

    pub fn from_config(config: &Config) -> TransportResult<Self> {
        Self::new(
            config.http_url()?,
            config.timeout(),
            config.allow_untrusted_server,
        )
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn post(&self, batch: &Batch) -> TransportResult<()> {
        let records: Vec<&LogRecord> = batch.iter().map(|(_, q)| &q.record).collect();
        let body = serde_json::to_vec(&records)
            .map_err(|e| TransportError::Serialization(e.to_string()))?;

        let response = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if status.is_success() {
            debug!(status = status.as_u16(), count = batch.len(), "Batch accepted");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Http {
            status: status.as_u16(),
            body,
        })
    }
}

fn request_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connection(e.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, batch: &Batch) -> TransportReport {
        if batch.is_empty() {
            return TransportReport::default();
        }
        let token = self.cancel.lock().clone();

        let result = tokio::select! {
            _ = token.cancelled() => Err(TransportError::Cancelled),
            result = self.post(batch) => result,
        };

        match result {
            Ok(()) => TransportReport::all(batch),
            Err(error) => {
                warn!(url = %self.url, count = batch.len(), error = %error, "HTTP send failed");
                TransportReport::failed(error)
            }
        }
    }

    fn cancel(&self) {
        let mut token = self.cancel.lock();
        token.cancel();
        *token = CancellationToken::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;
    use shipper_core::{QueuedRecord, Tag};

    fn batch() -> Batch {
        vec![
            (
                Tag(1),
                QueuedRecord {
                    record: LogRecord::from_pairs([("message", json!("one")), ("token", json!("t"))]),
                    enqueued_at: 0,
                },
            ),
            (
                Tag(2),
                QueuedRecord {
                    record: LogRecord::from_pairs([("message", json!("two"))]),
                    enqueued_at: 0,
                },
            ),
        ]
        .into_iter()
        .collect()
    }

    fn transport(url: &str) -> HttpTransport {
        HttpTransport::new(Url::parse(url).unwrap(), Duration::from_secs(5), false).unwrap()
    }

    #[tokio::test]
    async fn test_success_acknowledges_whole_batch() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/ingest")
            .match_header("Content-Type", "application/json")
            .match_body(Matcher::Json(json!([
                {"message": "one", "token": "t"},
                {"message": "two"}
            ])))
            .with_status(200)
            .create_async()
            .await;

        let transport = transport(&format!("{}/ingest", server.url()));
        let report = transport.send(&batch()).await;

        mock.assert_async().await;
        assert!(report.error.is_none());
        assert_eq!(report.acknowledged.len(), 2);
    }

    #[tokio::test]
    async fn test_error_status_acknowledges_nothing() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/ingest")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let transport = transport(&format!("{}/ingest", server.url()));
        let report = transport.send(&batch()).await;

        assert!(report.acknowledged.is_empty());
        assert_eq!(
            report.error,
            Some(TransportError::Http {
                status: 503,
                body: "overloaded".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_unreachable_collector() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = transport(&format!("http://127.0.0.1:{port}/ingest"));
        let report = transport.send(&batch()).await;

        assert!(report.acknowledged.is_empty());
        assert!(matches!(report.error, Some(TransportError::Connection(_))));
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_request() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/ingest")
            .expect(0)
            .create_async()
            .await;

        let transport = transport(&format!("{}/ingest", server.url()));
        let report = transport.send(&Batch::new()).await;

        mock.assert_async().await;
        assert_eq!(report, TransportReport::default());
    }

    #[test]
    fn test_from_config_uses_host_and_port() {
        let config = Config {
            host: "logs.example.com".to_string(),
            port: 8443,
            over_http: true,
            ..Config::default()
        };
        let transport = HttpTransport::from_config(&config).unwrap();
        assert_eq!(transport.url().as_str(), "https://logs.example.com:8443/");
    }
}
