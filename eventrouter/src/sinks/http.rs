use super::{queue::LineQueue, Error, EventData, EventSink};
use backon::{ExponentialBuilder, Retryable};
use bytes::Bytes;
use http::{header::CONTENT_TYPE, Request, StatusCode, Uri};
use http_body_util::Full;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use k8s_openapi::api::core::v1::Event;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

type HttpClient = Client<HttpConnector, Full<Bytes>>;

const MAX_RETRIES: usize = 3;
const RETRY_MIN_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, thiserror::Error)]
enum DeliveryError {
    #[error("failed to build request: {0}")]
    Request(#[source] http::Error),
    #[error("request failed: {0}")]
    Send(#[source] hyper_util::client::legacy::Error),
    #[error("endpoint responded with {0}")]
    Status(StatusCode),
}

/// Batches events and POSTs them as newline-delimited JSON
///
/// A batch that still fails after retrying is dropped with a warning.
pub struct HttpSink {
    queue: LineQueue,
}

impl HttpSink {
    /// Start a delivery worker for `endpoint`
    ///
    /// # Errors
    ///
    /// Fails if `endpoint` is not a valid `http://` URI.
    pub fn new(endpoint: &str, buffer_size: usize, batch_size: usize) -> Result<Self, Error> {
        let endpoint = endpoint.parse::<Uri>().map_err(Error::InvalidEndpoint)?;
        if endpoint.scheme_str() != Some("http") {
            return Err(Error::UnsupportedScheme(endpoint.scheme_str().map(String::from)));
        }
        let client: HttpClient = Client::builder(TokioExecutor::new()).build_http();
        let batch_size = batch_size.max(1);
        Ok(Self {
            queue: LineQueue::spawn("http", buffer_size, move |rx| {
                deliver(client, endpoint, batch_size, rx)
            }),
        })
    }

    /// Deliver everything published so far and stop the worker
    pub async fn close(self) {
        self.queue.close().await;
    }
}

impl EventSink for HttpSink {
    fn publish(&self, new: &Event, old: Option<&Event>) {
        self.queue.push(&EventData::new(new, old));
    }
}

async fn deliver(
    client: HttpClient,
    endpoint: Uri,
    batch_size: usize,
    mut rx: mpsc::Receiver<Bytes>,
) {
    let mut batch = Vec::with_capacity(batch_size);
    while rx.recv_many(&mut batch, batch_size).await > 0 {
        let events = batch.len();
        let body = Bytes::from(batch.concat());
        batch.clear();
        let result = (|| post(&client, &endpoint, body.clone()))
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(RETRY_MIN_DELAY)
                    .with_max_times(MAX_RETRIES),
            )
            .notify(|err, after| {
                warn!(error = %err, ?after, "event batch delivery failed, retrying");
            })
            .await;
        match result {
            Ok(()) => debug!(events, "delivered event batch"),
            Err(err) => warn!(error = %err, events, "dropping event batch"),
        }
    }
}

async fn post(client: &HttpClient, endpoint: &Uri, body: Bytes) -> Result<(), DeliveryError> {
    let request = Request::post(endpoint.clone())
        .header(CONTENT_TYPE, "application/x-ndjson")
        .body(Full::new(body))
        .map_err(DeliveryError::Request)?;
    let response = client.request(request).await.map_err(DeliveryError::Send)?;
    if response.status().is_success() {
        Ok(())
    } else {
        Err(DeliveryError::Status(response.status()))
    }
}
