//! Delta files served by an HTTP mirror

use crate::config::DEFAULT_MAX_FILE_SIZE;
use crate::{ClientError, Config, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use datalayer_core::{DeltaSource, ReplicationError};
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Fetches `{base_url}/{filename}` with retries on server errors
#[derive(Clone, Debug)]
pub struct HttpDeltaSource {
    base_url: String,
    http: Client,
    max_retries: u32,
    max_file_size: u64,
}

impl HttpDeltaSource {
    /// Create a source for one mirror
    pub fn new(base_url: impl Into<String>, config: &Config) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(ClientError::Http)?;
        Ok(Self::with_client(base_url, http, config.max_retries)
            .with_max_file_size(config.max_file_size))
    }

    /// Create a source sharing an existing HTTP client
    pub fn with_client(base_url: impl Into<String>, http: Client, max_retries: u32) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            http,
            max_retries,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }

    /// Refuse files larger than `max_file_size` bytes
    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    /// The mirror's base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, filename: &str) -> String {
        format!("{}/{}", self.base_url, filename)
    }

    /// Read a response body, giving up once it passes the size cap
    async fn read_body(&self, mut response: Response) -> std::result::Result<Bytes, String> {
        let limit = self.max_file_size;
        let too_large = |size: u64| format!("file of {size} bytes exceeds limit of {limit}");
        if let Some(declared) = response.content_length() {
            if declared > limit {
                return Err(too_large(declared));
            }
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| e.to_string())? {
            let size = (body.len() + chunk.len()) as u64;
            if size > limit {
                return Err(too_large(size));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }
}

#[async_trait]
impl DeltaSource for HttpDeltaSource {
    async fn fetch(&self, filename: &str) -> std::result::Result<Bytes, ReplicationError> {
        let url = self.url_for(filename);
        let transport = |message: String| ReplicationError::Transport {
            filename: filename.to_string(),
            message,
        };

        let mut attempt = 0;
        loop {
            debug!(%url, attempt, "Fetching delta file");
            let failure = match self.http.get(&url).send().await {
                Ok(response) if response.status() == StatusCode::OK => {
                    return self
                        .read_body(response)
                        .await
                        .map_err(|e| transport(format!("{url}: {e}")));
                }
                Ok(response) if response.status().is_server_error() => {
                    format!("{url}: HTTP {}", response.status())
                }
                Ok(response) => return Err(transport(format!("{url}: HTTP {}", response.status()))),
                Err(e) => format!("{url}: {e}"),
            };

            if attempt >= self.max_retries {
                return Err(transport(failure));
            }
            attempt += 1;
            warn!(%failure, attempt, "Retrying delta file");
            tokio::time::sleep(RETRY_BACKOFF * attempt).await;
        }
    }
}
