//! Hugging Face Hub client over `reqwest`.

use super::{resolve_token, FetchedBody, RepositoryClient, RepositoryFile};
use crate::config::NetworkConfig;
use crate::error::{HubError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_RANGE, LINK, RANGE, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Deserialize)]
struct TreeEntry {
    #[serde(rename = "type")]
    kind: String,
    path: String,
    size: Option<u64>,
    oid: Option<String>,
    lfs: Option<LfsInfo>,
}

#[derive(Debug, Deserialize)]
struct LfsInfo {
    oid: String,
    size: Option<u64>,
}

impl TreeEntry {
    fn into_file(self) -> Option<RepositoryFile> {
        if self.kind != "file" {
            return None;
        }
        let (size, checksum) = match self.lfs {
            Some(lfs) => (lfs.size.or(self.size), Some(lfs.oid)),
            None => (self.size, self.oid),
        };
        Some(RepositoryFile {
            path: self.path,
            size,
            checksum,
        })
    }
}

/// Client for the Hugging Face Hub HTTP API.
#[derive(Clone)]
pub struct HttpRepositoryClient {
    /// HTTP client for API requests (has total timeout)
    client: Client,
    /// HTTP client for downloads (connect timeout only, no total timeout)
    download_client: Client,
    base_url: Url,
    token: Option<String>,
}

impl std::fmt::Debug for HttpRepositoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRepositoryClient")
            .field("base_url", &self.base_url.as_str())
            .field("has_auth_token", &self.token.is_some())
            .finish()
    }
}

impl HttpRepositoryClient {
    /// Create a client for the public hub, picking up a token from the
    /// environment or the CLI cache.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(NetworkConfig::REQUEST_TIMEOUT)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| HubError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                cause: None,
            })?;

        // A total timeout would kill multi-gigabyte transfers; stalls are
        // caught per chunk by the coordinator instead.
        let download_client = Client::builder()
            .connect_timeout(NetworkConfig::CONNECT_TIMEOUT)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| HubError::Network {
                message: format!("Failed to create download HTTP client: {}", e),
                cause: None,
            })?;

        let token = resolve_token().map(|(token, source)| {
            info!("Hugging Face auth token found from {}", source);
            token
        });

        Ok(Self {
            client,
            download_client,
            base_url: Self::parse_base(NetworkConfig::HF_HUB_BASE)?,
            token,
        })
    }

    /// Point the client at a mirror or a local test server.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self> {
        self.base_url = Self::parse_base(base_url)?;
        Ok(self)
    }

    /// Replace the resolved token.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    fn parse_base(base_url: &str) -> Result<Url> {
        Url::parse(base_url.trim_end_matches('/')).map_err(|e| HubError::Validation {
            field: "base_url".to_string(),
            message: format!("invalid hub URL '{}': {}", base_url, e),
        })
    }

    fn base(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    fn encode_path(path: &str) -> String {
        path.split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => request,
        }
    }

    /// Map a non-success status onto the error taxonomy.
    fn check_status(response: Response, repo_id: &str, path: Option<&str>) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let url = response.url().to_string();
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => HubError::Unauthorized {
                repo_id: repo_id.to_string(),
            },
            StatusCode::NOT_FOUND => match path {
                Some(path) => HubError::FileNotFound {
                    repo_id: repo_id.to_string(),
                    path: path.to_string(),
                },
                None => HubError::RepositoryNotFound {
                    repo_id: repo_id.to_string(),
                },
            },
            StatusCode::RANGE_NOT_SATISFIABLE => HubError::RangeNotSatisfiable {
                url,
                total_len: parse_content_range_total(response.headers()),
            },
            StatusCode::TOO_MANY_REQUESTS => HubError::RateLimited {
                service: "huggingface".to_string(),
                retry_after_secs: parse_retry_after(response.headers()),
            },
            s if s.is_server_error() => HubError::ServerError {
                status: s.as_u16(),
                url,
            },
            s => HubError::HttpStatus {
                status: s.as_u16(),
                url,
            },
        })
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Total length from `Content-Range: bytes 100-199/200` or `bytes */200`.
fn parse_content_range_total(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(CONTENT_RANGE)?.to_str().ok()?;
    value.rsplit('/').next()?.trim().parse().ok()
}

/// `rel="next"` target of a `Link` header.
fn parse_next_link(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(LINK)?.to_str().ok()?;
    value.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        params
            .contains("rel=\"next\"")
            .then(|| target.trim().trim_start_matches('<').trim_end_matches('>').to_string())
    })
}

#[async_trait]
impl RepositoryClient for HttpRepositoryClient {
    async fn list_files(&self, repo_id: &str, revision: &str) -> Result<Vec<RepositoryFile>> {
        let mut next = Some(format!(
            "{}/api/models/{}/tree/{}?recursive=true",
            self.base(),
            repo_id,
            urlencoding::encode(revision)
        ));
        let mut files = Vec::new();

        while let Some(url) = next.take() {
            debug!("Listing {}", url);
            let response = self.authorized(self.client.get(&url)).send().await?;
            let response = Self::check_status(response, repo_id, None)?;
            next = parse_next_link(response.headers());

            let entries: Vec<TreeEntry> = response.json().await.map_err(|e| HubError::Json {
                message: format!("Failed to parse file tree for {}: {}", repo_id, e),
                source: None,
            })?;
            files.extend(entries.into_iter().filter_map(TreeEntry::into_file));
        }

        debug!(repo_id, file_count = files.len(), "Listed repository");
        Ok(files)
    }

    async fn fetch(
        &self,
        repo_id: &str,
        path: &str,
        revision: &str,
        offset: u64,
    ) -> Result<FetchedBody> {
        let url = format!(
            "{}/{}/resolve/{}/{}",
            self.base(),
            repo_id,
            urlencoding::encode(revision),
            Self::encode_path(path)
        );

        let mut request = self.authorized(self.download_client.get(&url));
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={}-", offset));
        }
        let response = request.send().await?;
        let response = Self::check_status(response, repo_id, Some(path))?;

        let resumed = offset > 0 && response.status() == StatusCode::PARTIAL_CONTENT;
        if offset > 0 && !resumed {
            warn!("Server ignored range request for {}, restarting from zero", path);
        }
        let total_len = if resumed {
            parse_content_range_total(response.headers())
        } else {
            response.content_length()
        };

        Ok(FetchedBody {
            offset: if resumed { offset } else { 0 },
            total_len,
            stream: response
                .bytes_stream()
                .map(|chunk| chunk.map_err(HubError::from))
                .boxed(),
        })
    }

    async fn model_card(&self, repo_id: &str, revision: &str) -> Result<Option<String>> {
        let url = format!(
            "{}/{}/raw/{}/README.md",
            self.base(),
            repo_id,
            urlencoding::encode(revision)
        );
        let response = self.authorized(self.client.get(&url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check_status(response, repo_id, Some("README.md"))?;
        Ok(Some(response.text().await?))
    }
}
