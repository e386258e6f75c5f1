use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use snafu::prelude::*;
use tracing::debug;

use crate::application::RuntimeConfig;
use crate::store::keys_api::{
    ClientBuildSnafu, DecodeSnafu, InvalidEndpointSnafu, MissingIndexSnafu, TransportSnafu,
};
use crate::store::{ChangeIndex, KeysApi, Node, Snapshot, StoreError};

const INDEX_HEADER: &str = "x-etcd-index";

/// Body of a keys API answer. The action itself is irrelevant here.
#[derive(Debug, Deserialize)]
struct KeysResponse {
    node: Node,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiErrorBody {
    error_code: u64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    cause: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Member {
    #[serde(default)]
    name: String,
    #[serde(default, rename = "clientURLs")]
    client_urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MembersResponse {
    #[serde(default)]
    members: Vec<Member>,
}

/// What a finished watch request yielded.
#[derive(Debug, PartialEq, Eq)]
enum WatchOutcome {
    Changed(ChangeIndex),
    /// The server closed the long poll without an event.
    Idle,
}

/// Client for the etcd v2 keys API.
///
/// Uses the blocking reqwest client: every call parks the calling thread until
/// the server answers, which is exactly what the watch request needs.
#[derive(Debug)]
pub struct EtcdClient {
    client: Client,
    endpoint: Url,
    request_timeout: Duration,
}

impl EtcdClient {
    pub fn new(config: &RuntimeConfig) -> Result<Self, StoreError> {
        let endpoint = match Url::parse(&config.endpoint) {
            Ok(url) if url.cannot_be_a_base() => {
                return InvalidEndpointSnafu {
                    endpoint: config.endpoint.clone(),
                    reason: "URL cannot carry a path",
                }
                .fail();
            }
            Ok(url) => url,
            Err(e) => {
                return InvalidEndpointSnafu {
                    endpoint: config.endpoint.clone(),
                    reason: e.to_string(),
                }
                .fail();
            }
        };

        // No client wide timeout, a watch may legitimately hang for hours.
        let client = Client::builder()
            .connect_timeout(config.request_timeout)
            .timeout(None::<Duration>)
            .build()
            .context(ClientBuildSnafu)?;

        Ok(Self {
            client,
            endpoint,
            request_timeout: config.request_timeout,
        })
    }

    /// Every prefix segment is percent-encoded on its own. An empty prefix
    /// addresses the whole keyspace.
    fn keys_url(&self, prefix: &str) -> Url {
        let mut segments: Vec<&str> = prefix.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            segments.push("");
        }
        self.api_url(["v2", "keys"].into_iter().chain(segments))
    }

    fn members_url(&self) -> Url {
        self.api_url(["v2", "members"])
    }

    fn api_url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.endpoint.clone();
        // `new` only accepts endpoints that can carry a path.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

impl KeysApi for EtcdClient {
    fn sync(&self) -> Result<Vec<String>, StoreError> {
        let url = self.members_url();
        debug!("Syncing cluster members from {}", url);
        let response = self
            .client
            .get(url.clone())
            .timeout(self.request_timeout)
            .send()
            .context(TransportSnafu { url: url.clone() })?;
        let (status, _, body) = read_response(response, url.as_str())?;
        decode_members(status, &body, url.as_str())
    }

    fn get_recursive(&self, prefix: &str) -> Result<Snapshot, StoreError> {
        let url = self.keys_url(prefix);
        debug!("Fetching {} recursively", url);
        let response = self
            .client
            .get(url.clone())
            .query(&[("recursive", "true")])
            .timeout(self.request_timeout)
            .send()
            .context(TransportSnafu { url: url.clone() })?;
        let (status, index, body) = read_response(response, url.as_str())?;
        decode_snapshot(status, index.as_deref(), &body, url.as_str())
    }

    fn wait_for_change(
        &self,
        prefix: &str,
        after: ChangeIndex,
    ) -> Result<ChangeIndex, StoreError> {
        let url = self.keys_url(prefix);
        let wait_index = after.next().to_string();
        loop {
            debug!("Watching {} from index {}", url, wait_index);
            let response = self
                .client
                .get(url.clone())
                .query(&[
                    ("wait", "true"),
                    ("recursive", "true"),
                    ("waitIndex", wait_index.as_str()),
                ])
                .send()
                .context(TransportSnafu { url: url.clone() })?;
            let (status, _, body) = read_response(response, url.as_str())?;
            match decode_watch_event(status, &body, url.as_str())? {
                WatchOutcome::Changed(index) => return Ok(index),
                WatchOutcome::Idle => debug!("Watch on {} closed without an event", url),
            }
        }
    }
}

fn read_response(
    response: Response,
    url: &str,
) -> Result<(StatusCode, Option<String>, String), StoreError> {
    let status = response.status();
    let index = response
        .headers()
        .get(INDEX_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let body = response.text().context(TransportSnafu { url })?;
    Ok((status, index, body))
}

fn check_status(status: StatusCode, body: &str, url: &str) -> Result<(), StoreError> {
    if status.is_success() {
        return Ok(());
    }
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(api_error) => Err(StoreError::ApiError {
            status: status.as_u16(),
            error_code: api_error.error_code,
            message: api_error.message,
            cause: api_error.cause,
        }),
        Err(_) => Err(StoreError::UnexpectedStatus {
            status: status.as_u16(),
            url: url.to_string(),
            body: body.trim().to_string(),
        }),
    }
}

fn decode_snapshot(
    status: StatusCode,
    index: Option<&str>,
    body: &str,
    url: &str,
) -> Result<Snapshot, StoreError> {
    check_status(status, body, url)?;
    let index = index
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(ChangeIndex::from)
        .context(MissingIndexSnafu { url })?;
    let response: KeysResponse = serde_json::from_str(body).context(DecodeSnafu { url })?;
    Ok(Snapshot {
        root: response.node,
        index,
    })
}

fn decode_watch_event(status: StatusCode, body: &str, url: &str) -> Result<WatchOutcome, StoreError> {
    check_status(status, body, url)?;
    if body.trim().is_empty() {
        return Ok(WatchOutcome::Idle);
    }
    let response: KeysResponse = serde_json::from_str(body).context(DecodeSnafu { url })?;
    Ok(WatchOutcome::Changed(ChangeIndex::from(
        response.node.modified_index,
    )))
}

fn decode_members(status: StatusCode, body: &str, url: &str) -> Result<Vec<String>, StoreError> {
    check_status(status, body, url)?;
    let response: MembersResponse = serde_json::from_str(body).context(DecodeSnafu { url })?;
    for member in &response.members {
        debug!("Cluster member '{}': {:?}", member.name, member.client_urls);
    }
    Ok(response
        .members
        .into_iter()
        .flat_map(|member| member.client_urls)
        .collect())
}
