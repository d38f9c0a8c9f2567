//! A store backed by the etcd v2 keys API.

use crate::{
    store::{Entry, KvEvent, KvStream, Store},
    Error, Result,
};
use ovs_subnet_controller_core::{EventType, Revision};
use reqwest::Response;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

#[cfg(test)]
mod tests;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const INDEX_HEADER: &str = "x-etcd-index";

// See https://etcd.io/docs/v2.3/errorcode/
const KEY_NOT_FOUND: u32 = 100;
const NOT_A_FILE: u32 = 102;
const NODE_EXISTS: u32 = 105;
const EVENT_INDEX_CLEARED: u32 = 401;

#[derive(Clone, Debug)]
pub struct EtcdStore {
    client: reqwest::Client,
    endpoint: Url,
}

#[derive(Debug, Deserialize)]
struct KeysResponse {
    action: String,
    node: Option<Node>,
    #[serde(rename = "prevNode")]
    prev_node: Option<Node>,
}

#[derive(Debug, Deserialize)]
struct Node {
    key: Option<String>,
    value: Option<String>,
    #[serde(default)]
    dir: bool,
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(rename = "modifiedIndex", default)]
    modified_index: Revision,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(rename = "errorCode")]
    error_code: u32,
    message: String,
    #[serde(default)]
    cause: Option<String>,
    #[serde(default)]
    index: Revision,
}

// === impl EtcdStore ===

impl EtcdStore {
    pub fn new(endpoint: Url) -> Result<Self> {
        // Watches are long polls, so the request timeout is applied per call
        // rather than on the client.
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { client, endpoint })
    }

    fn keys_url(&self, key: &str) -> Result<Url> {
        let key = key.trim_start_matches('/');
        Ok(self.endpoint.join(&format!("v2/keys/{key}"))?)
    }

    async fn send_value(
        &self,
        key: &str,
        value: &str,
        query: &[(&str, &str)],
    ) -> Result<Revision> {
        let rsp = self
            .client
            .put(self.keys_url(key)?)
            .query(query)
            .form(&[("value", value)])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        let body = parse_response(key, rsp).await?;
        Ok(body.node.map(|n| n.modified_index).unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl Store for EtcdStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let rsp = self
            .client
            .get(self.keys_url(key)?)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        match parse_response(key, rsp).await {
            Ok(body) => Ok(body.node.and_then(|n| n.value)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn create(&self, key: &str, value: &str) -> Result<Revision> {
        self.send_value(key, value, &[("prevExist", "false")]).await
    }

    async fn put(&self, key: &str, value: &str) -> Result<Revision> {
        self.send_value(key, value, &[]).await
    }

    async fn delete(&self, key: &str) -> Result<Revision> {
        let rsp = self
            .client
            .delete(self.keys_url(key)?)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        let body = parse_response(key, rsp).await?;
        Ok(body.node.map(|n| n.modified_index).unwrap_or_default())
    }

    async fn create_dir(&self, dir: &str) -> Result<()> {
        let rsp = self
            .client
            .put(self.keys_url(dir)?)
            .query(&[("dir", "true"), ("prevExist", "false")])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        parse_response(dir, rsp).await?;
        Ok(())
    }

    async fn list(&self, dir: &str) -> Result<(Vec<Entry>, Revision)> {
        let rsp = self
            .client
            .get(self.keys_url(dir)?)
            .query(&[("recursive", "true")])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        let index = etcd_index(&rsp);
        let mut entries = Vec::new();
        match parse_response(dir, rsp).await {
            Ok(body) => {
                if let Some(node) = body.node {
                    flatten(node, &mut entries);
                }
            }
            Err(Error::NotFound(_)) => {}
            Err(error) => return Err(error),
        }
        let index = index.ok_or_else(|| Error::Unavailable("missing X-Etcd-Index".into()))?;
        Ok((entries, index + 1))
    }

    async fn next_revision(&self) -> Result<Revision> {
        let rsp = self
            .client
            .get(self.keys_url("/")?)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        let index = etcd_index(&rsp)
            .ok_or_else(|| Error::Unavailable("missing X-Etcd-Index".into()))?;
        Ok(index + 1)
    }

    fn watch(&self, dir: &str, from: Revision) -> KvStream {
        let client = self.client.clone();
        let dir = dir.to_string();
        let url = self.keys_url(&dir);

        Box::pin(async_stream::stream! {
            let url = match url {
                Ok(url) => url,
                Err(error) => {
                    yield Err(error);
                    return;
                }
            };

            let mut next = from;
            loop {
                let wait_index = next.to_string();
                let rsp = client
                    .get(url.clone())
                    .query(&[
                        ("wait", "true"),
                        ("recursive", "true"),
                        ("waitIndex", wait_index.as_str()),
                    ])
                    .send()
                    .await;
                let rsp = match rsp {
                    Ok(rsp) => rsp,
                    Err(error) => {
                        yield Err(error.into());
                        return;
                    }
                };

                let body = match parse_response(&dir, rsp).await {
                    Ok(body) => body,
                    Err(Error::Compacted(_)) => {
                        yield Err(Error::Compacted(next));
                        return;
                    }
                    Err(error) => {
                        yield Err(error);
                        return;
                    }
                };

                let revision = body.node.as_ref().map(|n| n.modified_index).unwrap_or(next);
                next = revision + 1;
                match into_event(body) {
                    Some(ev) => yield Ok(ev),
                    None => trace!(revision, "Ignoring directory event"),
                }
            }
        })
    }

    async fn ping(&self) -> Result<()> {
        let rsp = self
            .client
            .get(self.endpoint.join("version")?)
            .timeout(CONNECT_TIMEOUT)
            .send()
            .await?;
        rsp.error_for_status()?;
        Ok(())
    }
}

fn etcd_index(rsp: &Response) -> Option<Revision> {
    rsp.headers()
        .get(INDEX_HEADER)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

async fn parse_response(key: &str, rsp: Response) -> Result<KeysResponse> {
    let status = rsp.status();
    if status.is_success() {
        return Ok(rsp.json().await?);
    }

    let body = rsp.text().await?;
    match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(err) => Err(classify(key, err)),
        Err(_) => Err(Error::Unavailable(format!("{status}: {body}"))),
    }
}

fn classify(key: &str, err: ErrorResponse) -> Error {
    debug!(key, code = err.error_code, message = %err.message, cause = ?err.cause, "etcd error");
    match err.error_code {
        KEY_NOT_FOUND => Error::NotFound(key.to_string()),
        NODE_EXISTS | NOT_A_FILE => Error::AlreadyExists(key.to_string()),
        EVENT_INDEX_CLEARED => Error::Compacted(err.index),
        _ => Error::Unavailable(format!("{} ({})", err.message, err.error_code)),
    }
}

fn flatten(node: Node, entries: &mut Vec<Entry>) {
    if node.dir {
        for child in node.nodes {
            flatten(child, entries);
        }
        return;
    }
    if let (Some(key), Some(value)) = (node.key, node.value) {
        entries.push(Entry {
            key,
            value,
            revision: node.modified_index,
        });
    }
}

/// Converts a watch response into an event. Directory changes carry no
/// value and are dropped.
fn into_event(rsp: KeysResponse) -> Option<KvEvent> {
    let node = rsp.node.filter(|n| !n.dir)?;
    let key = node.key?;
    let (kind, value) = match rsp.action.as_str() {
        "delete" | "expire" | "compareAndDelete" => {
            (EventType::Deleted, rsp.prev_node.and_then(|n| n.value))
        }
        _ => (EventType::Added, node.value),
    };
    Some(KvEvent {
        kind,
        key,
        value,
        revision: node.modified_index,
    })
}
