//! HTTP webhook sink.
//!
//! POSTs each batch envelope as a JSON body. Classification follows the
//! response status: 2xx delivered; 408, 429, and 5xx retryable; one
//! redirect is followed and anything else is fatal. Network and TLS
//! failures are retryable. Each attempt is bounded by the configured
//! request timeout.

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::debug;
use weir_core::{error_codes, Batch, Error};

use crate::sink::{SendOutcome, SinkTransport};
use crate::tls::{load_client_material, TlsProfileConfig};

/// Default per-attempt request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How a response status classifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Classification {
    Delivered,
    Retryable,
    Fatal,
}

/// Classifies a webhook response status.
fn classify(status: StatusCode) -> Classification {
    if status.is_success() {
        Classification::Delivered
    } else if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        Classification::Retryable
    } else {
        Classification::Fatal
    }
}

/// Checks a webhook destination is a well-formed `http`/`https` URL.
pub fn validate_url(url: &str) -> Result<(), Error> {
    let parsed = reqwest::Url::parse(url).map_err(|e| {
        Error::validation(
            error_codes::INVALID_TRANSPORT,
            format!("invalid webhook URL '{url}': {e}"),
        )
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::validation(
            error_codes::INVALID_TRANSPORT,
            format!("webhook URL '{url}' must use http or https"),
        ));
    }
    Ok(())
}

/// Sink delivering batches by HTTP POST.
pub struct WebhookSink<DT> {
    url: String,
    client: reqwest::Client,
    _marker: PhantomData<fn() -> DT>,
}

impl<DT> WebhookSink<DT> {
    /// Builds a sink for `url`, applying the optional client TLS profile.
    pub fn new(
        url: impl Into<String>,
        tls_profile: Option<&TlsProfileConfig>,
        request_timeout: Duration,
    ) -> Result<Self, Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(request_timeout)
            .redirect(reqwest::redirect::Policy::limited(1));

        if let Some(profile) = tls_profile {
            let material = load_client_material(profile)?;
            for cert in material.root_certs {
                builder = builder.add_root_certificate(cert);
            }
            if let Some(identity) = material.identity {
                builder = builder.identity(identity);
            }
        }

        let client = builder.build().map_err(|e| {
            Error::validation(
                error_codes::CONFIG_INVALID,
                format!("cannot build webhook client: {e}"),
            )
        })?;

        Ok(Self {
            url: url.into(),
            client,
            _marker: PhantomData,
        })
    }
}

#[async_trait]
impl<DT> SinkTransport<DT> for WebhookSink<DT>
where
    DT: Serialize + Send + Sync,
{
    async fn send(&self, batch: &Batch<DT>) -> SendOutcome {
        match self.client.post(&self.url).json(batch).send().await {
            Ok(response) => {
                let status = response.status();
                match classify(status) {
                    Classification::Delivered => {
                        debug!(
                            url = %self.url,
                            batch_id = %batch.batch_id,
                            events = batch.len(),
                            %status,
                            "webhook accepted batch"
                        );
                        SendOutcome::Delivered
                    }
                    Classification::Retryable => SendOutcome::Retryable(
                        Error::transport_retryable(format!("webhook returned {status}")),
                    ),
                    Classification::Fatal => SendOutcome::Fatal(Error::transport_fatal(
                        format!("webhook returned {status}"),
                    )),
                }
            }
            Err(e) if e.is_redirect() => SendOutcome::Fatal(Error::transport_fatal(format!(
                "webhook redirected more than once: {e}"
            ))),
            Err(e) => SendOutcome::Retryable(Error::transport_retryable(format!(
                "webhook request failed: {e}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use weir_core::Event;

    #[test]
    fn test_classification_table() {
        assert_eq!(classify(StatusCode::OK), Classification::Delivered);
        assert_eq!(classify(StatusCode::NO_CONTENT), Classification::Delivered);
        assert_eq!(classify(StatusCode::REQUEST_TIMEOUT), Classification::Retryable);
        assert_eq!(classify(StatusCode::TOO_MANY_REQUESTS), Classification::Retryable);
        assert_eq!(classify(StatusCode::INTERNAL_SERVER_ERROR), Classification::Retryable);
        assert_eq!(classify(StatusCode::SERVICE_UNAVAILABLE), Classification::Retryable);
        assert_eq!(classify(StatusCode::BAD_REQUEST), Classification::Fatal);
        assert_eq!(classify(StatusCode::GONE), Classification::Fatal);
        assert_eq!(classify(StatusCode::NOT_FOUND), Classification::Fatal);
    }

    #[test]
    fn test_validate_url() {
        validate_url("https://example.com/hook").unwrap();
        validate_url("http://10.0.0.1:8080/hook").unwrap();
        assert!(validate_url("not a url").unwrap_err().to_string().contains("FF00114"));
        assert!(validate_url("ftp://example.com/hook").is_err());
    }

    #[test]
    fn test_bad_tls_profile_fails_construction() {
        let profile = TlsProfileConfig {
            ca_file: Some("badness".into()),
            ..TlsProfileConfig::default()
        };
        let err = WebhookSink::<serde_json::Value>::new(
            "https://example.com/hook",
            Some(&profile),
            DEFAULT_REQUEST_TIMEOUT,
        )
        .unwrap_err();
        assert!(err.to_string().contains("FF00153"), "{err}");
    }

    fn batch() -> Batch<serde_json::Value> {
        Batch::new(vec![Event::new("a", serde_json::json!({"n": 1}))])
    }

    /// Accepts one connection, consumes the request, and answers with
    /// the given status line.
    async fn serve_once(listener: tokio::net::TcpListener, status_line: &'static str) {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let (header_end, mut total) = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break (pos + 4, buf.len());
            }
        };
        let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
        let content_length: usize = headers
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .map_or(0, |v| v.trim().parse().unwrap());
        while total < header_end + content_length {
            let n = socket.read(&mut chunk).await.unwrap();
            total += n;
        }
        let response = format!("HTTP/1.1 {status_line}\r\ncontent-length: 0\r\n\r\n");
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.flush().await.unwrap();
    }

    #[tokio::test]
    async fn test_delivered_on_2xx() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_once(listener, "204 No Content"));

        let sink = WebhookSink::<serde_json::Value>::new(
            format!("http://{addr}/hook"),
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(sink.send(&batch()).await.is_delivered());
    }

    #[tokio::test]
    async fn test_retryable_on_503() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_once(listener, "503 Service Unavailable"));

        let sink = WebhookSink::<serde_json::Value>::new(
            format!("http://{addr}/hook"),
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(matches!(
            sink.send(&batch()).await,
            SendOutcome::Retryable(_)
        ));
    }

    #[tokio::test]
    async fn test_fatal_on_4xx() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_once(listener, "410 Gone"));

        let sink = WebhookSink::<serde_json::Value>::new(
            format!("http://{addr}/hook"),
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(matches!(sink.send(&batch()).await, SendOutcome::Fatal(_)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_retryable() {
        // Bind then drop to get a port with nothing listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let sink = WebhookSink::<serde_json::Value>::new(
            format!("http://{addr}/hook"),
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(matches!(
            sink.send(&batch()).await,
            SendOutcome::Retryable(_)
        ));
    }
}
