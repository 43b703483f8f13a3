//! HTTP client for the per-host metric agent

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::sources::cadvisor::{Container, WireContainerInfo};

/// Errors from talking to a node's metric agent.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("invalid agent address: {0}")]
    Address(#[from] url::ParseError),

    #[error("request to {url} failed: {source}")]
    Http {
        url: Url,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} returned status {status}")]
    Status { url: Url, status: reqwest::StatusCode },

    #[error("failed to decode agent response from {url}: {source}")]
    Decode {
        url: Url,
        #[source]
        source: reqwest::Error,
    },

    #[error("scrape of node {node} exceeded its deadline")]
    DeadlineExceeded { node: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Address of one node's metric agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    pub ip: String,
    pub port: u16,
}

/// Stats request body understood by the agent.
#[derive(Debug, Serialize)]
struct StatsRequest<'a> {
    /// The name of the container for which to request stats. `/` is the
    /// root of the hierarchy.
    #[serde(rename = "containerName")]
    container_name: &'a str,

    /// Max number of stats to return. Ignored when start and end are set.
    num_stats: u32,

    start: DateTime<Utc>,
    end: DateTime<Utc>,

    /// Whether to include stats of all subcontainers.
    subcontainers: bool,
}

/// Client for the agent's `POST /stats/container/` endpoint.
pub struct KubeletClient {
    client: reqwest::Client,
}

impl KubeletClient {
    pub fn new(timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(KubeletClient { client })
    }

    /// One "all containers, subcontainers included" request covering the
    /// scrape window, parsed into per-container spec + newest sample.
    pub async fn all_containers(
        &self,
        host: &Host,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Container>, SourceError> {
        let url = Url::parse(&format!(
            "http://{}:{}/stats/container/",
            host.ip, host.port
        ))?;
        let request = StatsRequest {
            container_name: "/",
            num_stats: 1,
            start,
            end,
            subcontainers: true,
        };

        let response = self
            .client
            .post(url.clone())
            .json(&request)
            .send()
            .await
            .map_err(|source| SourceError::Http {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status { url, status });
        }

        let containers: HashMap<String, WireContainerInfo> =
            response
                .json()
                .await
                .map_err(|source| SourceError::Decode {
                    url: url.clone(),
                    source,
                })?;

        Ok(containers
            .into_values()
            .filter_map(WireContainerInfo::into_container)
            .collect())
    }
}
