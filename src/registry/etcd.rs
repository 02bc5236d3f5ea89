//! etcd v3 through its JSON gateway.
//!
//! # Wire Format
//! - Every call is a `POST {endpoint}/v3/...` with a JSON body
//! - Keys and values are base64; 64-bit integers may arrive as strings
//! - `/v3/watch` answers with a never-ending stream of JSON objects, one per
//!   watch response, which is parsed incrementally

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::registry::store::{
    CoordinationStore, KeyValue, LeaseId, StoreError, WatchEvent, WatchStream,
};

#[derive(Debug, Clone)]
pub struct EtcdStore {
    client: reqwest::Client,
    base: Url,
    request_timeout: Duration,
}

impl EtcdStore {
    /// `endpoint` is the gateway base, e.g. `http://127.0.0.1:2379`.
    pub fn new(endpoint: &str, request_timeout: Duration) -> Result<Self, StoreError> {
        let base = Url::parse(endpoint)
            .map_err(|e| StoreError::Protocol(format!("invalid etcd endpoint {endpoint}: {e}")))?;
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            base,
            request_timeout,
        })
    }

    fn url(&self, path: &str) -> Result<Url, StoreError> {
        self.base
            .join(path)
            .map_err(|e| StoreError::Protocol(format!("invalid etcd path {path}: {e}")))
    }

    async fn call<B, R>(&self, path: &str, body: &B) -> Result<R, StoreError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self
            .client
            .post(self.url(path)?)
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(transport_error)?;
        if !status.is_success() {
            let error: GatewayError = serde_json::from_slice(&bytes).unwrap_or_default();
            return Err(gateway_error(status, error));
        }
        first_json(&bytes)
    }
}

fn transport_error(e: reqwest::Error) -> StoreError {
    if e.is_connect() || e.is_timeout() {
        StoreError::Unavailable(e.to_string())
    } else {
        StoreError::Http(e)
    }
}

fn gateway_error(status: reqwest::StatusCode, error: GatewayError) -> StoreError {
    let message = error.message.or(error.error).unwrap_or_else(|| status.to_string());
    if status.is_server_error() {
        StoreError::Unavailable(message)
    } else {
        StoreError::Protocol(message)
    }
}

/// Parse the first JSON value of a (possibly streamed) response body.
fn first_json<R: DeserializeOwned>(bytes: &[u8]) -> Result<R, StoreError> {
    serde_json::Deserializer::from_slice(bytes)
        .into_iter::<R>()
        .next()
        .ok_or_else(|| StoreError::Protocol("empty response body".into()))?
        .map_err(|e| StoreError::Protocol(e.to_string()))
}

fn encode(s: &str) -> String {
    BASE64.encode(s.as_bytes())
}

fn decode(s: &str) -> Result<String, StoreError> {
    let raw = BASE64
        .decode(s)
        .map_err(|e| StoreError::Protocol(format!("invalid base64: {e}")))?;
    String::from_utf8(raw).map_err(|e| StoreError::Protocol(format!("invalid utf-8: {e}")))
}

/// End of the key range covering every key that starts with `prefix`.
pub fn prefix_range_end(prefix: &str) -> Vec<u8> {
    let mut end = prefix.as_bytes().to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return end;
        }
    }
    // Every byte was 0xff: range to the end of the keyspace.
    vec![0]
}

fn de_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Int {
        Num(i64),
        Str(String),
    }
    match Int::deserialize(deserializer)? {
        Int::Num(n) => Ok(n),
        Int::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Default, Deserialize)]
struct GatewayError {
    error: Option<String>,
    message: Option<String>,
}

#[derive(Serialize)]
struct LeaseGrantRequest {
    #[serde(rename = "TTL")]
    ttl: i64,
}

#[derive(Deserialize)]
struct LeaseGrantResponse {
    #[serde(rename = "ID", deserialize_with = "de_i64")]
    id: i64,
}

#[derive(Serialize)]
struct LeaseIdRequest {
    #[serde(rename = "ID")]
    id: i64,
}

#[derive(Deserialize)]
struct KeepAliveEnvelope {
    result: Option<KeepAliveResult>,
}

#[derive(Deserialize)]
struct KeepAliveResult {
    #[serde(rename = "TTL", default, deserialize_with = "de_i64")]
    ttl: i64,
}

#[derive(Serialize)]
struct PutRequest {
    key: String,
    value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    lease: Option<i64>,
}

#[derive(Serialize)]
struct RangeRequest {
    key: String,
    range_end: String,
}

#[derive(Deserialize)]
struct RangeResponse {
    #[serde(default)]
    kvs: Vec<RawKeyValue>,
}

#[derive(Deserialize)]
struct RawKeyValue {
    key: String,
    #[serde(default)]
    value: String,
}

#[derive(Serialize)]
struct WatchRequest {
    create_request: RangeRequest,
}

#[derive(Deserialize)]
struct WatchEnvelope {
    result: Option<WatchResult>,
    error: Option<GatewayError>,
}

#[derive(Deserialize)]
struct WatchResult {
    #[serde(default)]
    events: Vec<RawEvent>,
    #[serde(default)]
    canceled: bool,
    #[serde(default)]
    cancel_reason: Option<String>,
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    kv: RawKeyValue,
}

impl RawEvent {
    fn into_event(self) -> Result<WatchEvent, StoreError> {
        let key = decode(&self.kv.key)?;
        match self.kind.as_deref() {
            Some("DELETE") => Ok(WatchEvent::Delete { key }),
            _ => Ok(WatchEvent::Put {
                key,
                value: decode(&self.kv.value)?,
            }),
        }
    }
}

#[async_trait]
impl CoordinationStore for EtcdStore {
    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, StoreError> {
        let secs = ttl.as_secs_f64().ceil().max(1.0) as i64;
        let response: LeaseGrantResponse = self
            .call("/v3/lease/grant", &LeaseGrantRequest { ttl: secs })
            .await?;
        Ok(LeaseId(response.id))
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<(), StoreError> {
        let response: KeepAliveEnvelope = self
            .call("/v3/lease/keepalive", &LeaseIdRequest { id: lease.0 })
            .await?;
        match response.result {
            Some(result) if result.ttl > 0 => Ok(()),
            _ => Err(StoreError::LeaseNotFound(lease)),
        }
    }

    async fn revoke(&self, lease: LeaseId) -> Result<(), StoreError> {
        match self
            .call::<_, serde_json::Value>("/v3/lease/revoke", &LeaseIdRequest { id: lease.0 })
            .await
        {
            Ok(_) => Ok(()),
            Err(StoreError::Protocol(message)) if message.contains("lease not found") => {
                Err(StoreError::LeaseNotFound(lease))
            }
            Err(e) => Err(e),
        }
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<(), StoreError> {
        let request = PutRequest {
            key: encode(key),
            value: encode(value),
            lease: lease.map(|l| l.0),
        };
        match self.call::<_, serde_json::Value>("/v3/kv/put", &request).await {
            Ok(_) => Ok(()),
            Err(StoreError::Protocol(message)) if message.contains("lease not found") => {
                Err(StoreError::LeaseNotFound(lease.unwrap_or(LeaseId(0))))
            }
            Err(e) => Err(e),
        }
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError> {
        let request = RangeRequest {
            key: encode(prefix),
            range_end: BASE64.encode(prefix_range_end(prefix)),
        };
        let response: RangeResponse = self.call("/v3/kv/range", &request).await?;
        let mut kvs = response
            .kvs
            .into_iter()
            .map(|kv| {
                Ok(KeyValue {
                    key: decode(&kv.key)?,
                    value: decode(&kv.value)?,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        kvs.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(kvs)
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<WatchStream, StoreError> {
        let request = WatchRequest {
            create_request: RangeRequest {
                key: encode(prefix),
                range_end: BASE64.encode(prefix_range_end(prefix)),
            },
        };
        let response = self
            .client
            .post(self.url("/v3/watch")?)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            let status = response.status();
            let bytes = response.bytes().await.map_err(transport_error)?;
            let error: GatewayError = serde_json::from_slice(&bytes).unwrap_or_default();
            return Err(gateway_error(status, error));
        }

        Ok(watch_events(response.bytes_stream().boxed()))
    }
}

struct WatchDecoder {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    buf: Vec<u8>,
    pending: VecDeque<WatchEvent>,
    done: bool,
}

impl WatchDecoder {
    /// Pull the next complete JSON object out of the buffer, if there is one.
    fn next_envelope(&mut self) -> Result<Option<WatchEnvelope>, StoreError> {
        let (item, consumed) = {
            let mut iter =
                serde_json::Deserializer::from_slice(&self.buf).into_iter::<WatchEnvelope>();
            let item = iter.next();
            (item, iter.byte_offset())
        };
        match item {
            Some(Ok(envelope)) => {
                self.buf.drain(..consumed);
                Ok(Some(envelope))
            }
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => Err(StoreError::Protocol(format!("malformed watch response: {e}"))),
            None => Ok(None),
        }
    }

    fn absorb(&mut self, envelope: WatchEnvelope) -> Result<(), StoreError> {
        if let Some(error) = envelope.error {
            let message = error.message.or(error.error).unwrap_or_default();
            return Err(StoreError::Unavailable(format!("watch failed: {message}")));
        }
        let Some(result) = envelope.result else {
            return Ok(());
        };
        if result.canceled {
            return Err(StoreError::Unavailable(format!(
                "watch canceled: {}",
                result.cancel_reason.unwrap_or_default()
            )));
        }
        for raw in result.events {
            self.pending.push_back(raw.into_event()?);
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Option<Result<WatchEvent, StoreError>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            if self.done {
                return None;
            }

            match self.next_envelope() {
                Ok(Some(envelope)) => {
                    if let Err(e) = self.absorb(envelope) {
                        self.done = true;
                        return Some(Err(e));
                    }
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }

            match self.body.next().await {
                Some(Ok(chunk)) => self.buf.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(transport_error(e)));
                }
                None => {
                    self.done = true;
                    return Some(Err(StoreError::Unavailable("watch stream closed".into())));
                }
            }
        }
    }
}

fn watch_events(body: BoxStream<'static, reqwest::Result<Bytes>>) -> WatchStream {
    let decoder = WatchDecoder {
        body,
        buf: Vec::new(),
        pending: VecDeque::new(),
        done: false,
    };
    stream::unfold(decoder, |mut decoder| async move {
        decoder.next_event().await.map(|item| (item, decoder))
    })
    .boxed()
}
