//! Step log buffer
//!
//! Thread-safe, timestamp-prefixed sink for step output. Each write
//! tokenizes on newlines, prefixes non-empty lines, buffers them, and —
//! when bound to a step — flushes the buffer through the execution store.
//! Writers from child stdout and stderr may interleave; atomicity is at
//! the write-call boundary. A failed flush is reported on the process
//! side and never fails the step.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::persistence::ExecutionStore;

pub struct StepLogBuffer {
    store: Arc<dyn ExecutionStore>,
    step_id: Option<Uuid>,
    buf: Mutex<String>,
}

impl StepLogBuffer {
    /// A buffer bound to a step row; writes flush to persistent storage.
    pub fn bound(store: Arc<dyn ExecutionStore>, step_id: Uuid) -> Self {
        Self {
            store,
            step_id: Some(step_id),
            buf: Mutex::new(String::new()),
        }
    }

    /// An unbound buffer that only accumulates in memory.
    pub fn detached(store: Arc<dyn ExecutionStore>) -> Self {
        Self {
            store,
            step_id: None,
            buf: Mutex::new(String::new()),
        }
    }

    /// Write a chunk of output. Lines are stamped individually; empty
    /// lines are dropped.
    pub async fn write(&self, chunk: &str) {
        let pending = {
            let mut buf = self.buf.lock();
            for line in chunk.split('\n') {
                if line.is_empty() {
                    continue;
                }
                buf.push('[');
                buf.push_str(&Utc::now().format("%Y-%m-%d %H:%M:%S").to_string());
                buf.push_str("] ");
                buf.push_str(line);
                buf.push('\n');
            }
            if self.step_id.is_some() && !buf.is_empty() {
                Some(std::mem::take(&mut *buf))
            } else {
                None
            }
        };

        if let (Some(content), Some(step_id)) = (pending, self.step_id) {
            if let Err(e) = self.store.append_step_logs(step_id, &content).await {
                tracing::error!(%step_id, "failed to persist step logs: {}", e);
            }
        }
    }

    /// Flush anything still buffered. Called when a step exits.
    pub async fn flush(&self) {
        let pending = {
            let mut buf = self.buf.lock();
            if buf.is_empty() {
                None
            } else {
                Some(std::mem::take(&mut *buf))
            }
        };

        if let Some(content) = pending {
            match self.step_id {
                Some(step_id) => {
                    if let Err(e) = self.store.append_step_logs(step_id, &content).await {
                        tracing::error!(%step_id, "failed to persist step logs: {}", e);
                    }
                }
                None => {
                    // nowhere to persist; keep the content buffered
                    self.buf.lock().insert_str(0, &content);
                }
            }
        }
    }

    /// Buffered (unflushed) content.
    pub fn buffered(&self) -> String {
        self.buf.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{
        ExecutionStore, InMemoryPlatformStore, NewExecution, NewStep, StepStatus,
    };

    async fn step_fixture(store: &Arc<InMemoryPlatformStore>) -> Uuid {
        let execution = store
            .create_execution(NewExecution {
                application_name: "shop".into(),
                workflow_name: "deploy".into(),
                total_steps: 1,
                parent_execution_id: None,
            })
            .await
            .unwrap();
        store
            .create_step(NewStep {
                workflow_id: execution.id,
                step_number: 1,
                name: "apply".into(),
                step_type: "dummy".into(),
                status: StepStatus::Pending,
                step_config: None,
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn lines_are_prefixed_and_flushed() {
        let store = Arc::new(InMemoryPlatformStore::new());
        let step_id = step_fixture(&store).await;

        let logs = StepLogBuffer::bound(store.clone(), step_id);
        logs.write("first\nsecond\n").await;

        let content = store.get_step_logs(step_id).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("] first"));
        assert!(lines[1].ends_with("] second"));
    }

    #[tokio::test]
    async fn empty_lines_are_dropped() {
        let store = Arc::new(InMemoryPlatformStore::new());
        let step_id = step_fixture(&store).await;

        let logs = StepLogBuffer::bound(store.clone(), step_id);
        logs.write("\n\nonly\n\n").await;

        let content = store.get_step_logs(step_id).await.unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[tokio::test]
    async fn detached_buffer_accumulates() {
        let store = Arc::new(InMemoryPlatformStore::new());
        let logs = StepLogBuffer::detached(store);
        logs.write("kept in memory").await;
        assert!(logs.buffered().contains("kept in memory"));
    }

    #[tokio::test]
    async fn appends_are_ordered() {
        let store = Arc::new(InMemoryPlatformStore::new());
        let step_id = step_fixture(&store).await;

        let logs = StepLogBuffer::bound(store.clone(), step_id);
        logs.write("one").await;
        logs.write("two").await;
        logs.flush().await;

        let content = store.get_step_logs(step_id).await.unwrap();
        let one = content.find("one").unwrap();
        let two = content.find("two").unwrap();
        assert!(one < two);
    }
}
