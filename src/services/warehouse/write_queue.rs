//! Non-blocking write queue in front of the warehouse
//!
//! Callers enqueue and move on; a single background worker drains the queue
//! on a periodic tick, strictly higher priorities first, FIFO within a
//! priority class. A failed request is logged and dropped - retry policy
//! belongs to the caller. Nothing cancels a request once enqueued.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use super::WarehouseClient;
use crate::utils::{ScheduledExecutor, ScheduledTask};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteOperation {
    Insert,
    Upsert,
}

/// Tables whose rows carry created_at/updated_at stamped at enqueue time.
const TIMESTAMPED_TABLES: [&str; 6] = [
    super::tables::RAW_DOCS,
    super::tables::EVENTS,
    super::tables::COMPANIES,
    super::tables::ASSESSMENTS,
    super::tables::USERS,
    super::tables::FINANCIAL_METRICS,
];

#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub table: String,
    pub rows: Vec<Value>,
    pub operation: WriteOperation,
    /// 1 = high, 2 = medium, 3 = low
    pub priority: u8,
    pub request_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WriteQueueStatus {
    pub pending: usize,
    pub by_priority: HashMap<u8, usize>,
    pub by_table: HashMap<String, usize>,
}

pub struct WriteQueue {
    client: Arc<WarehouseClient>,
    pending: Mutex<Vec<WriteRequest>>,
    running: AtomicBool,
}

impl WriteQueue {
    pub fn new(client: Arc<WarehouseClient>) -> Self {
        Self { client, pending: Mutex::new(Vec::new()), running: AtomicBool::new(true) }
    }

    /// Spawn the background worker. Returns the shutdown flag of the
    /// underlying executor; the queue also stops once `shutdown` is called.
    pub fn start(self: &Arc<Self>, tick: Duration) -> Arc<AtomicBool> {
        let executor = ScheduledExecutor::new("warehouse-write-queue", tick);
        let handle = executor.shutdown_handle();
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            executor.start(queue).await;
        });
        handle
    }

    /// Queue a write and return its request id. O(1); never blocks on I/O.
    pub fn enqueue(
        &self,
        table: &str,
        mut rows: Vec<Value>,
        operation: WriteOperation,
        priority: u8,
    ) -> String {
        let request_id = Uuid::new_v4().to_string();
        let priority = priority.clamp(1, 3);

        if TIMESTAMPED_TABLES.contains(&table) {
            let now = Utc::now().to_rfc3339();
            for row in rows.iter_mut() {
                if let Some(obj) = row.as_object_mut() {
                    obj.entry("created_at")
                        .or_insert_with(|| Value::String(now.clone()));
                    obj.entry("updated_at")
                        .or_insert_with(|| Value::String(now.clone()));
                }
            }
        }

        let request = WriteRequest {
            table: table.to_string(),
            rows,
            operation,
            priority,
            request_id: request_id.clone(),
        };

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.push(request);
        tracing::debug!("Queued warehouse write: {} (priority {})", table, priority);

        request_id
    }

    pub fn status(&self) -> WriteQueueStatus {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());

        let mut by_priority: HashMap<u8, usize> = HashMap::new();
        let mut by_table: HashMap<String, usize> = HashMap::new();
        for request in pending.iter() {
            *by_priority.entry(request.priority).or_default() += 1;
            *by_table.entry(request.table.clone()).or_default() += 1;
        }

        WriteQueueStatus { pending: pending.len(), by_priority, by_table }
    }

    /// Drain and execute everything pending right now. Returns the number of
    /// requests processed (including failed-and-dropped ones).
    pub async fn flush(&self) -> usize {
        let batch = self.take_pending();
        let count = batch.len();
        for request in batch {
            self.execute(request).await;
        }
        count
    }

    /// Stop accepting the worker tick and drain what is left.
    pub async fn shutdown(&self) -> usize {
        self.running.store(false, Ordering::Relaxed);
        let drained = self.flush().await;
        tracing::info!("Write queue shut down, {} requests drained", drained);
        drained
    }

    /// Swap out the pending list and return it sorted for execution:
    /// priority 1 before 2 before 3, stable so FIFO holds within a class.
    fn take_pending(&self) -> Vec<WriteRequest> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let mut batch = std::mem::take(&mut *pending);
        drop(pending);
        batch.sort_by_key(|r| r.priority);
        batch
    }

    async fn execute(&self, request: WriteRequest) {
        let outcome = match request.operation {
            WriteOperation::Insert => self.client.insert_all(&request.table, &request.rows).await,
            WriteOperation::Upsert => self.client.upsert(&request.table, &request.rows).await,
        };

        match outcome {
            Ok(()) => {
                tracing::debug!(
                    "Processed warehouse write {} -> {} ({} rows)",
                    request.request_id,
                    request.table,
                    request.rows.len()
                );
            },
            Err(e) => {
                // Dropped: the caller owns any retry policy
                tracing::error!(
                    "Warehouse write {} -> {} failed and was dropped: {}",
                    request.request_id,
                    request.table,
                    e
                );
            },
        }
    }
}

impl ScheduledTask for Arc<WriteQueue> {
    fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>> {
        Box::pin(async move {
            let processed = self.flush().await;
            if processed > 0 {
                tracing::debug!("Write queue tick processed {} requests", processed);
            }
            Ok(())
        })
    }

    fn should_terminate(&self) -> bool {
        !self.running.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn queue() -> WriteQueue {
        // Unroutable client: ordering tests never reach the network
        WriteQueue::new(Arc::new(WarehouseClient::new("http://127.0.0.1:1", "p", "d")))
    }

    #[test]
    fn enqueue_stamps_timestamps() {
        let q = queue();
        q.enqueue(
            super::super::tables::EVENTS,
            vec![json!({"event_id": "BOE:x"})],
            WriteOperation::Insert,
            2,
        );

        let pending = q.pending.lock().unwrap();
        let row = &pending[0].rows[0];
        assert!(row.get("created_at").is_some());
        assert!(row.get("updated_at").is_some());
    }

    #[test]
    fn enqueue_preserves_existing_timestamps() {
        let q = queue();
        q.enqueue(
            super::super::tables::EVENTS,
            vec![json!({"event_id": "BOE:x", "created_at": "2020-01-01T00:00:00Z"})],
            WriteOperation::Insert,
            2,
        );

        let pending = q.pending.lock().unwrap();
        assert_eq!(
            pending[0].rows[0]["created_at"],
            json!("2020-01-01T00:00:00Z")
        );
    }

    #[test]
    fn drain_orders_by_priority_then_fifo() {
        let q = queue();
        q.enqueue("a", vec![json!({"id": 1})], WriteOperation::Insert, 3);
        q.enqueue("b", vec![json!({"id": 2})], WriteOperation::Insert, 1);
        q.enqueue("c", vec![json!({"id": 3})], WriteOperation::Insert, 2);
        q.enqueue("d", vec![json!({"id": 4})], WriteOperation::Insert, 1);

        let batch = q.take_pending();
        let order: Vec<(&str, u8)> =
            batch.iter().map(|r| (r.table.as_str(), r.priority)).collect();
        assert_eq!(order, vec![("b", 1), ("d", 1), ("c", 2), ("a", 3)]);

        // Drained: nothing pending
        assert_eq!(q.status().pending, 0);
    }

    #[test]
    fn status_breaks_down_by_priority_and_table() {
        let q = queue();
        q.enqueue("events", vec![json!({})], WriteOperation::Insert, 2);
        q.enqueue("events", vec![json!({})], WriteOperation::Insert, 2);
        q.enqueue("raw_docs", vec![json!({})], WriteOperation::Insert, 3);

        let status = q.status();
        assert_eq!(status.pending, 3);
        assert_eq!(status.by_priority[&2], 2);
        assert_eq!(status.by_priority[&3], 1);
        assert_eq!(status.by_table["events"], 2);
    }

    #[test]
    fn priority_is_clamped() {
        let q = queue();
        q.enqueue("t", vec![json!({})], WriteOperation::Insert, 0);
        q.enqueue("t", vec![json!({})], WriteOperation::Insert, 9);

        let batch = q.take_pending();
        assert_eq!(batch[0].priority, 1);
        assert_eq!(batch[1].priority, 3);
    }
}
