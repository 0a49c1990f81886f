use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::streams::StreamRangeReply;
use redis::AsyncCommands;
use seamgraph_core::{Result, SeamGraphError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Aggregate stream statistics.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct StreamInfo {
    pub length: usize,
    pub first_entry_id: Option<String>,
    pub last_entry_id: Option<String>,
}

/// A live fan-out subscription. Dropping it stops the forwarding loop.
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<String>,
    forwarder: Option<JoinHandle<()>>,
}

impl Subscription {
    pub async fn next(&mut self) -> Option<String> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(handle) = self.forwarder.take() {
            handle.abort();
        }
    }
}

/// The durable append-log plus fan-out topic behind the CDC manager.
/// Appends return the per-entry stream id; range reads are exclusive of
/// `start` except for the beginning sentinel `"0"`.
#[async_trait]
pub trait CdcBackend: Send + Sync {
    async fn append(&self, fields: HashMap<String, String>) -> Result<String>;
    async fn read_range(
        &self,
        start: &str,
        count: usize,
    ) -> Result<Vec<(String, HashMap<String, String>)>>;
    async fn stream_info(&self) -> Result<StreamInfo>;
    /// Best-effort, lossy notification; delivery order is not guaranteed.
    async fn notify(&self, payload: String) -> Result<()>;
    async fn subscribe(&self) -> Result<Subscription>;
}

fn is_beginning(start: &str) -> bool {
    start == "0" || start == "0-0"
}

fn parse_stream_id(id: &str) -> (u64, u64) {
    let mut parts = id.splitn(2, '-');
    let ms = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let seq = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    (ms, seq)
}

// ----------------------------------------------------------------------
// Redis backend
// ----------------------------------------------------------------------

/// Redis streams + pub/sub backend.
pub struct RedisCdcBackend {
    url: String,
    stream_key: String,
    pubsub_key: String,
    connection: Mutex<Option<ConnectionManager>>,
}

impl RedisCdcBackend {
    pub fn new(
        url: impl Into<String>,
        stream_key: impl Into<String>,
        pubsub_key: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            stream_key: stream_key.into(),
            pubsub_key: pubsub_key.into(),
            connection: Mutex::new(None),
        }
    }

    pub async fn connect(&self) -> Result<()> {
        let client = redis::Client::open(self.url.as_str())
            .map_err(|e| SeamGraphError::CdcUnavailable(e.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| SeamGraphError::CdcUnavailable(e.to_string()))?;
        *self.connection.lock() = Some(manager);
        info!("CDC redis backend connected");
        Ok(())
    }

    fn connection(&self) -> Result<ConnectionManager> {
        self.connection
            .lock()
            .clone()
            .ok_or_else(|| SeamGraphError::CdcUnavailable("redis not connected".to_string()))
    }
}

#[async_trait]
impl CdcBackend for RedisCdcBackend {
    async fn append(&self, fields: HashMap<String, String>) -> Result<String> {
        let mut conn = self.connection()?;
        let pairs: Vec<(String, String)> = fields.into_iter().collect();
        conn.xadd(&self.stream_key, "*", &pairs)
            .await
            .map_err(|e| SeamGraphError::CdcUnavailable(e.to_string()))
    }

    async fn read_range(
        &self,
        start: &str,
        count: usize,
    ) -> Result<Vec<(String, HashMap<String, String>)>> {
        let mut conn = self.connection()?;
        let min = if is_beginning(start) {
            "-".to_string()
        } else {
            format!("({}", start)
        };
        let reply: StreamRangeReply = conn
            .xrange_count(&self.stream_key, min, "+", count)
            .await
            .map_err(|e| SeamGraphError::CdcUnavailable(e.to_string()))?;

        let mut entries = Vec::with_capacity(reply.ids.len());
        for stream_id in reply.ids {
            let mut fields = HashMap::new();
            for (key, value) in stream_id.map {
                match redis::from_redis_value::<String>(&value) {
                    Ok(text) => {
                        fields.insert(key, text);
                    }
                    Err(e) => debug!("non-string stream field {}: {}", key, e),
                }
            }
            entries.push((stream_id.id, fields));
        }
        Ok(entries)
    }

    async fn stream_info(&self) -> Result<StreamInfo> {
        let mut conn = self.connection()?;
        let length: usize = conn
            .xlen(&self.stream_key)
            .await
            .map_err(|e| SeamGraphError::CdcUnavailable(e.to_string()))?;

        let first: StreamRangeReply = conn
            .xrange_count(&self.stream_key, "-", "+", 1)
            .await
            .map_err(|e| SeamGraphError::CdcUnavailable(e.to_string()))?;
        let last: StreamRangeReply = conn
            .xrevrange_count(&self.stream_key, "+", "-", 1)
            .await
            .map_err(|e| SeamGraphError::CdcUnavailable(e.to_string()))?;

        Ok(StreamInfo {
            length,
            first_entry_id: first.ids.first().map(|e| e.id.clone()),
            last_entry_id: last.ids.first().map(|e| e.id.clone()),
        })
    }

    async fn notify(&self, payload: String) -> Result<()> {
        let mut conn = self.connection()?;
        conn.publish::<_, _, ()>(&self.pubsub_key, payload)
            .await
            .map_err(|e| SeamGraphError::CdcUnavailable(e.to_string()))
    }

    async fn subscribe(&self) -> Result<Subscription> {
        let client = redis::Client::open(self.url.as_str())
            .map_err(|e| SeamGraphError::CdcUnavailable(e.to_string()))?;
        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| SeamGraphError::CdcUnavailable(e.to_string()))?;
        pubsub
            .subscribe(&self.pubsub_key)
            .await
            .map_err(|e| SeamGraphError::CdcUnavailable(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(async move {
            use futures::StreamExt;
            let mut messages = pubsub.on_message();
            while let Some(message) = messages.next().await {
                match message.get_payload::<String>() {
                    Ok(payload) => {
                        if tx.send(payload).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("undecodable fan-out payload: {}", e),
                }
            }
        });

        Ok(Subscription {
            receiver: rx,
            forwarder: Some(forwarder),
        })
    }
}

// ----------------------------------------------------------------------
// In-memory backend
// ----------------------------------------------------------------------

/// Ordered in-process log plus a broadcast fan-out topic. Used in tests
/// and single-process deployments; semantics mirror the redis backend.
pub struct MemoryCdcBackend {
    entries: Mutex<Vec<(String, HashMap<String, String>)>>,
    sequence: AtomicU64,
    topic: broadcast::Sender<String>,
}

impl Default for MemoryCdcBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCdcBackend {
    pub fn new() -> Self {
        let (topic, _) = broadcast::channel(1024);
        Self {
            entries: Mutex::new(Vec::new()),
            sequence: AtomicU64::new(0),
            topic,
        }
    }
}

#[async_trait]
impl CdcBackend for MemoryCdcBackend {
    async fn append(&self, fields: HashMap<String, String>) -> Result<String> {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("0-{}", seq);
        self.entries.lock().push((id.clone(), fields));
        Ok(id)
    }

    async fn read_range(
        &self,
        start: &str,
        count: usize,
    ) -> Result<Vec<(String, HashMap<String, String>)>> {
        let floor = if is_beginning(start) {
            None
        } else {
            Some(parse_stream_id(start))
        };
        Ok(self
            .entries
            .lock()
            .iter()
            .filter(|(id, _)| floor.map_or(true, |f| parse_stream_id(id) > f))
            .take(count)
            .cloned()
            .collect())
    }

    async fn stream_info(&self) -> Result<StreamInfo> {
        let entries = self.entries.lock();
        Ok(StreamInfo {
            length: entries.len(),
            first_entry_id: entries.first().map(|(id, _)| id.clone()),
            last_entry_id: entries.last().map(|(id, _)| id.clone()),
        })
    }

    async fn notify(&self, payload: String) -> Result<()> {
        // Lossy by design: with no subscribers the notification is gone.
        let _ = self.topic.send(payload);
        Ok(())
    }

    async fn subscribe(&self) -> Result<Subscription> {
        let mut topic_rx = self.topic.subscribe();
        let (tx, rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(async move {
            loop {
                match topic_rx.recv().await {
                    Ok(payload) => {
                        if tx.send(payload).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("fan-out subscriber lagged, dropped {} messages", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription {
            receiver: rx,
            forwarder: Some(forwarder),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(n: u32) -> HashMap<String, String> {
        HashMap::from([("n".to_string(), n.to_string())])
    }

    #[tokio::test]
    async fn memory_log_preserves_append_order() {
        let backend = MemoryCdcBackend::new();
        for n in 1..=3 {
            backend.append(fields(n)).await.unwrap();
        }

        let entries = backend.read_range("0", 10).await.unwrap();
        let values: Vec<&str> = entries.iter().map(|(_, f)| f["n"].as_str()).collect();
        assert_eq!(values, vec!["1", "2", "3"]);

        // Resuming after the second entry yields only the third.
        let tail = backend.read_range(&entries[1].0, 10).await.unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].1["n"], "3");
    }

    #[tokio::test]
    async fn stream_info_tracks_bounds() {
        let backend = MemoryCdcBackend::new();
        backend.append(fields(1)).await.unwrap();
        backend.append(fields(2)).await.unwrap();

        let info = backend.stream_info().await.unwrap();
        assert_eq!(info.length, 2);
        assert_eq!(info.first_entry_id.as_deref(), Some("0-1"));
        assert_eq!(info.last_entry_id.as_deref(), Some("0-2"));
    }

    #[tokio::test]
    async fn subscriptions_receive_notifications_until_dropped() {
        let backend = MemoryCdcBackend::new();
        let mut subscription = backend.subscribe().await.unwrap();

        backend.notify("one".to_string()).await.unwrap();
        assert_eq!(subscription.next().await.as_deref(), Some("one"));

        drop(subscription);
        // Publishing after the consumer closed must not error.
        backend.notify("two".to_string()).await.unwrap();
    }
}
