use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::{debug, info};

use super::{BrokerError, Consumer, Producer, Record, TopicAdmin, TopicCursor};

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_MAX_RECORDS_PER_TOPIC: usize = 100_000;

struct StoredRecord {
    appended_at: Instant,
    record: Record,
}

#[derive(Default)]
struct LogState {
    base_offset: u64,
    entries: VecDeque<StoredRecord>,
}

impl LogState {
    fn end_offset(&self) -> u64 {
        self.base_offset + self.entries.len() as u64
    }

    fn prune(&mut self, retention: Duration, max_records: usize) {
        let now = Instant::now();
        while let Some(front) = self.entries.front() {
            let expired = now.duration_since(front.appended_at) > retention;
            if !expired && self.entries.len() <= max_records {
                break;
            }
            self.entries.pop_front();
            self.base_offset += 1;
        }
    }
}

struct TopicLog {
    name: String,
    state: RwLock<LogState>,
    appended: Notify,
    deleted: AtomicBool,
}

impl TopicLog {
    fn poisoned(&self) -> BrokerError {
        BrokerError::Unavailable(format!("topic log {} poisoned", self.name))
    }
}

/// In-process broker: one append-only log per topic with time and size based
/// retention. Cursors are per connection and start at the log end.
pub struct InMemoryBroker {
    topics: DashMap<String, Arc<TopicLog>>,
    retention: Duration,
    max_records_per_topic: usize,
}

impl InMemoryBroker {
    pub fn new(retention: Duration, max_records_per_topic: usize) -> Self {
        Self {
            topics: DashMap::new(),
            retention,
            max_records_per_topic,
        }
    }

    #[cfg(test)]
    fn retained(&self, topic: &str) -> Option<usize> {
        let log = self.topics.get(topic)?;
        let len = log.state.read().map(|state| state.entries.len()).ok();
        len
    }

    fn log(&self, topic: &str) -> Result<Arc<TopicLog>, BrokerError> {
        self.topics
            .get(topic)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| BrokerError::TopicNotFound(topic.to_string()))
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION, DEFAULT_MAX_RECORDS_PER_TOPIC)
    }
}

#[async_trait]
impl TopicAdmin for InMemoryBroker {
    async fn create_topic(&self, name: &str) -> Result<(), BrokerError> {
        match self.topics.entry(name.to_string()) {
            Entry::Occupied(_) => Err(BrokerError::TopicAlreadyExists(name.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(TopicLog {
                    name: name.to_string(),
                    state: RwLock::new(LogState::default()),
                    appended: Notify::new(),
                    deleted: AtomicBool::new(false),
                }));
                info!(topic = name, "created topic");
                Ok(())
            }
        }
    }

    async fn delete_topic(&self, name: &str) -> Result<(), BrokerError> {
        let (_, log) = self
            .topics
            .remove(name)
            .ok_or_else(|| BrokerError::TopicNotFound(name.to_string()))?;

        log.deleted.store(true, Ordering::SeqCst);
        log.appended.notify_waiters();
        info!(topic = name, "deleted topic");
        Ok(())
    }
}

#[async_trait]
impl Producer for InMemoryBroker {
    async fn produce(&self, topic: &str, records: Vec<Record>) -> Result<(), BrokerError> {
        let log = self.log(topic)?;
        let count = records.len();
        {
            let mut state = log.state.write().map_err(|_| log.poisoned())?;
            let now = Instant::now();
            state
                .entries
                .extend(records.into_iter().map(|record| StoredRecord {
                    appended_at: now,
                    record,
                }));
            state.prune(self.retention, self.max_records_per_topic);
        }

        log.appended.notify_waiters();
        debug!(topic, count, "produced records");
        Ok(())
    }
}

#[async_trait]
impl Consumer for InMemoryBroker {
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn TopicCursor>, BrokerError> {
        let log = self.log(topic)?;
        let position = log.state.read().map_err(|_| log.poisoned())?.end_offset();

        Ok(Box::new(MemoryCursor { log, position }))
    }
}

struct MemoryCursor {
    log: Arc<TopicLog>,
    position: u64,
}

fn read_from(
    log: &TopicLog,
    position: &mut u64,
    max_records: usize,
) -> Result<Vec<Record>, BrokerError> {
    let state = log.state.read().map_err(|_| log.poisoned())?;

    if *position < state.base_offset {
        *position = state.base_offset;
    }

    let skip = (*position - state.base_offset) as usize;
    let batch: Vec<Record> = state
        .entries
        .iter()
        .skip(skip)
        .take(max_records.max(1))
        .map(|stored| stored.record.clone())
        .collect();

    *position += batch.len() as u64;
    Ok(batch)
}

#[async_trait]
impl TopicCursor for MemoryCursor {
    async fn poll(
        &mut self,
        max_records: usize,
        timeout: Duration,
    ) -> Result<Vec<Record>, BrokerError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let log = Arc::clone(&self.log);

        loop {
            let notified = log.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if log.deleted.load(Ordering::SeqCst) {
                return Err(BrokerError::TopicNotFound(log.name.clone()));
            }

            let batch = read_from(&log, &mut self.position, max_records)?;
            if !batch.is_empty() {
                return Ok(batch);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }
}
