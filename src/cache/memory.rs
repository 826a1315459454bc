use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

use super::{resolve_range, CacheBackend, CacheError};

/// In-process list store with the same semantics as the Redis backends.
#[derive(Default)]
pub struct MemoryBackend {
    lists: Mutex<HashMap<String, VecDeque<String>>>,
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut lists = self.lists.lock().await;
        lists
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
        Ok(())
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), CacheError> {
        let mut lists = self.lists.lock().await;
        let Some(list) = lists.get_mut(key) else {
            return Ok(());
        };
        match resolve_range(list.len(), start, stop) {
            Some((from, to)) => {
                list.truncate(to + 1);
                list.drain(..from);
            }
            None => {
                lists.remove(key);
            }
        }
        Ok(())
    }

    async fn lrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, CacheError> {
        let lists = self.lists.lock().await;
        let Some(list) = lists.get(key) else {
            return Ok(Vec::new());
        };
        Ok(match resolve_range(list.len(), start, stop) {
            Some((from, to)) => list.range(from..=to).cloned().collect(),
            None => Vec::new(),
        })
    }
}
