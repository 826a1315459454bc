use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use super::{CacheBackend, CacheError};

const NAME: &str = "rest";

/// Hosted Redis reached over its HTTP command API: each command is POSTed as
/// a JSON array (`["LPUSH", "key", "value"]`) with a bearer token, and the
/// service answers `{"result": ...}` or `{"error": "..."}`.
pub struct RestBackend {
    client: reqwest::Client,
    url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct CommandReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl RestBackend {
    pub fn new(url: &str, token: &str, timeout: Duration) -> Result<Self, CacheError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CacheError::backend(NAME, e))?;

        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    async fn command(&self, args: &[String]) -> Result<Value, CacheError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(args)
            .send()
            .await
            .map_err(|e| CacheError::backend(NAME, e))?;

        let status = response.status();
        let reply: CommandReply = response
            .json()
            .await
            .map_err(|e| CacheError::backend(NAME, format!("HTTP {status}: {e}")))?;

        if let Some(error) = reply.error {
            return Err(CacheError::backend(NAME, error));
        }
        if !status.is_success() {
            return Err(CacheError::backend(NAME, format!("HTTP {status}")));
        }
        Ok(reply.result.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl CacheBackend for RestBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.command(&["LPUSH".into(), key.into(), value.into()])
            .await
            .map(|_| ())
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), CacheError> {
        self.command(&["LTRIM".into(), key.into(), start.to_string(), stop.to_string()])
            .await
            .map(|_| ())
    }

    async fn lrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, CacheError> {
        let result = self
            .command(&["LRANGE".into(), key.into(), start.to_string(), stop.to_string()])
            .await?;
        decode_items(result)
    }
}

/// LRANGE replies are arrays of strings; a missing key comes back as null.
fn decode_items(result: Value) -> Result<Vec<String>, CacheError> {
    match result {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                other => serde_json::to_string(&other).map_err(|e| CacheError::backend(NAME, e)),
            })
            .collect(),
        other => Err(CacheError::backend(
            NAME,
            format!("unexpected LRANGE reply: {other}"),
        )),
    }
}
