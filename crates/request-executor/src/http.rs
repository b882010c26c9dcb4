//! reqwest-backed executor.

use crate::{ExecutorError, ExecutorResult, RequestExecutor};
use async_trait::async_trait;
use futures_util::Stream;
use request_protocol_types::{
    CancelToken, Method, RequestBody, RequestDescriptor, ResponseDescriptor, TransportError,
    TransportErrorKind,
};
use std::io;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// Upload chunk size used when none is configured.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Bytes read from a file body between cancellation checks.
    pub chunk_size: usize,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            connect_timeout: Duration::from_secs(30),
            user_agent: concat!("sendline/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Executes descriptors with a shared reqwest client.
#[derive(Clone)]
pub struct HttpRequestExecutor {
    client: reqwest::Client,
    chunk_size: usize,
}

impl HttpRequestExecutor {
    pub fn new(config: ExecutorConfig) -> ExecutorResult<Self> {
        if config.chunk_size == 0 {
            return Err(ExecutorError::Config("chunk_size must be > 0".into()));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent)
            .build()?;

        Ok(Self {
            client,
            chunk_size: config.chunk_size,
        })
    }

    async fn build_request(
        &self,
        descriptor: &RequestDescriptor,
    ) -> Result<reqwest::RequestBuilder, TransportError> {
        let mut url = url::Url::parse(descriptor.url())
            .map_err(|e| TransportError::new(TransportErrorKind::InvalidRequest, e.to_string()))?;
        if !descriptor.params().is_empty() {
            url.query_pairs_mut().extend_pairs(descriptor.params());
        }

        let mut request = self.client.request(to_reqwest_method(descriptor.method()), url);
        for (name, value) in descriptor.headers() {
            request = request.header(name.as_str(), value.as_str());
        }

        match descriptor.body() {
            None => {}
            Some(RequestBody::Bytes { content_type, data }) => {
                request = request
                    .header(reqwest::header::CONTENT_TYPE, content_type.as_str())
                    .body(data.clone());
            }
            Some(RequestBody::File { content_type, path }) => {
                let file = tokio::fs::File::open(path).await.map_err(|e| {
                    TransportError::new(
                        TransportErrorKind::Io,
                        format!("open {}: {}", path.display(), e),
                    )
                })?;
                let len = file
                    .metadata()
                    .await
                    .map_err(|e| TransportError::new(TransportErrorKind::Io, e.to_string()))?
                    .len();

                let stream = file_chunks(file, self.chunk_size, descriptor.cancel_token().clone());
                request = request
                    .header(reqwest::header::CONTENT_TYPE, content_type.as_str())
                    .header(reqwest::header::CONTENT_LENGTH, len)
                    .body(reqwest::Body::wrap_stream(stream));
            }
        }

        Ok(request)
    }

    async fn run(&self, descriptor: &RequestDescriptor) -> Result<ResponseDescriptor, TransportError> {
        let request = self.build_request(descriptor).await?;
        let response = request.send().await.map_err(classify)?;

        let status = response.status();
        let mut out = ResponseDescriptor::new();
        out.status_code = status.as_u16();
        out.status_message = status.canonical_reason().unwrap_or_default().to_string();
        for (name, value) in response.headers() {
            out.headers.insert(
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            );
        }

        // Error statuses carry a body too; read it either way.
        out.body = response.bytes().await.map_err(classify)?.to_vec();
        Ok(out)
    }
}

#[async_trait]
impl RequestExecutor for HttpRequestExecutor {
    async fn execute(&self, descriptor: &RequestDescriptor) -> ResponseDescriptor {
        debug!(
            request_id = %descriptor.id(),
            method = %descriptor.method(),
            url = %descriptor.url(),
            "Executing request"
        );

        match self.run(descriptor).await {
            Ok(response) => {
                debug!(
                    request_id = %descriptor.id(),
                    status = response.status_code,
                    bytes = response.body.len(),
                    "Request completed"
                );
                response
            }
            Err(error) => {
                warn!(
                    request_id = %descriptor.id(),
                    url = %descriptor.url(),
                    error = %error,
                    "Request failed in transport"
                );
                ResponseDescriptor::from_transport_error(error)
            }
        }
    }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
    }
}

fn classify(error: reqwest::Error) -> TransportError {
    let kind = if error.is_timeout() {
        TransportErrorKind::Timeout
    } else if error.is_connect() {
        TransportErrorKind::Connect
    } else if error.is_builder() {
        TransportErrorKind::InvalidRequest
    } else if error.is_body() || error.is_decode() || error.is_request() {
        TransportErrorKind::Io
    } else {
        TransportErrorKind::Other
    };
    TransportError::new(kind, error.to_string())
}

/// Reads `file` in `chunk_size` pieces, stopping with an error once `cancel`
/// is set.
pub(crate) fn file_chunks(
    file: tokio::fs::File,
    chunk_size: usize,
    cancel: CancelToken,
) -> impl Stream<Item = io::Result<Vec<u8>>> + Send + 'static {
    futures_util::stream::unfold(Some(file), move |state| {
        let cancel = cancel.clone();
        async move {
            let mut file = state?;
            if cancel.is_cancelled() {
                let err = io::Error::new(io::ErrorKind::Interrupted, "request cancelled");
                return Some((Err(err), None));
            }

            let mut chunk = vec![0u8; chunk_size];
            match file.read(&mut chunk).await {
                Ok(0) => None,
                Ok(n) => {
                    chunk.truncate(n);
                    Some((Ok(chunk), Some(file)))
                }
                Err(e) => Some((Err(e), None)),
            }
        }
    })
}
