//! Durable at-least-once work queue for per-user analysis tasks, with a
//! dead-letter table.
//!
//! Messages live in SQLite so they survive restarts and can be shared by
//! several worker processes. A received message is hidden for the visibility
//! timeout; if it is not deleted in that window it becomes visible again.
//! Once a message has been received `max_receive_count` times, the next
//! receive moves it to `dead_letters` instead of delivering it.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::db::{apply_pragmas, init_schema, DbError};
use crate::models::AlertPreferences;
use crate::symbols::Symbol;

/// Most entries accepted by one `send_batch` call.
pub const MAX_BATCH_ENTRIES: usize = 10;

#[derive(thiserror::Error, Debug)]
pub enum QueueError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("schema error: {0}")]
    Schema(#[from] DbError),
    #[error("batch of {0} entries exceeds the limit of 10")]
    BatchTooLarge(usize),
    #[error("receipt handle is unknown or expired")]
    UnknownReceipt,
    #[error("no dead letter with id {0}")]
    NoSuchDeadLetter(String),
}

/// Queue message body. Serialized as camelCase JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisTask {
    pub user_id: String,
    pub email: String,
    pub selected_stocks: Vec<Symbol>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_preferences: Option<AlertPreferences>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    pub visibility_timeout: Duration,
    pub max_receive_count: u32,
    pub retention: Duration,
    pub dead_letter_retention: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(6 * 60),
            max_receive_count: 3,
            retention: Duration::from_secs(4 * 24 * 3600),
            dead_letter_retention: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// One received message. Delete it with `receipt_handle` once handled.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub message_id: String,
    pub receipt_handle: String,
    /// 1 on first delivery.
    pub receive_count: u32,
    pub task: AnalysisTask,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntryFailure {
    /// Position in the submitted slice.
    pub index: usize,
    pub user_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSendResult {
    pub successful: Vec<String>,
    pub failed: Vec<BatchEntryFailure>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub message_id: String,
    pub body: String,
    pub receive_count: u32,
    pub sent_at: DateTime<Utc>,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetter {
    /// The decoded task, if the body is valid.
    pub fn task(&self) -> Option<AnalysisTask> {
        serde_json::from_str(&self.body).ok()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub visible: u64,
    pub in_flight: u64,
    pub dead_letters: u64,
}

pub struct AnalysisQueue {
    conn: Mutex<Connection>,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
}

fn random_id() -> String {
    let mut rng = rand::thread_rng();
    format!("{:016x}{:016x}", rng.gen::<u64>(), rng.gen::<u64>())
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

fn validate(task: &AnalysisTask) -> Result<(), String> {
    if task.user_id.trim().is_empty() {
        return Err("userId is empty".to_string());
    }
    if !task.email.contains('@') {
        return Err(format!("invalid email: {}", task.email));
    }
    if task.selected_stocks.is_empty() {
        return Err("selectedStocks is empty".to_string());
    }
    Ok(())
}

impl AnalysisQueue {
    pub fn open(
        path: impl AsRef<Path>,
        config: QueueConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, QueueError> {
        let conn = Connection::open(path)?;
        apply_pragmas(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            config,
            clock,
        })
    }

    /// Open an in-memory queue (for testing).
    pub fn open_in_memory(config: QueueConfig, clock: Arc<dyn Clock>) -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory()?;
        apply_pragmas(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            config,
            clock,
        })
    }

    pub fn init(&self) -> Result<(), QueueError> {
        init_schema(&self.conn())?;
        Ok(())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn send(&self, task: &AnalysisTask) -> Result<String, QueueError> {
        let now = self.clock.now_millis();
        let body = serde_json::to_string(task)?;
        let id = random_id();
        self.conn().execute(
            "INSERT INTO queue_messages (message_id, body, sent_at, visible_at, receive_count)
             VALUES (?1, ?2, ?3, ?3, 0)",
            params![id, body, now],
        )?;
        Ok(id)
    }

    /// Sends up to [`MAX_BATCH_ENTRIES`] tasks. Entries are accepted or
    /// rejected individually; a larger batch is rejected as a whole.
    pub fn send_batch(&self, tasks: &[AnalysisTask]) -> Result<BatchSendResult, QueueError> {
        if tasks.len() > MAX_BATCH_ENTRIES {
            return Err(QueueError::BatchTooLarge(tasks.len()));
        }
        let mut result = BatchSendResult::default();
        for (index, task) in tasks.iter().enumerate() {
            let sent = validate(task)
                .and_then(|()| self.send(task).map_err(|e| e.to_string()));
            match sent {
                Ok(id) => result.successful.push(id),
                Err(reason) => result.failed.push(BatchEntryFailure {
                    index,
                    user_id: task.user_id.clone(),
                    reason,
                }),
            }
        }
        Ok(result)
    }

    /// Receives the oldest visible message, if any.
    pub fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        let now = self.clock.now_millis();
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let expired = tx.execute(
            "DELETE FROM queue_messages WHERE sent_at <= ?1",
            params![now.saturating_sub(millis(self.config.retention))],
        )?;
        if expired > 0 {
            tracing::warn!("Dropped {} messages past queue retention", expired);
        }

        let delivery = loop {
            let next: Option<(String, String, u32)> = tx
                .query_row(
                    "SELECT message_id, body, receive_count FROM queue_messages
                     WHERE visible_at <= ?1
                     ORDER BY sent_at, rowid
                     LIMIT 1",
                    params![now],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;
            let Some((message_id, body, receive_count)) = next else {
                break None;
            };

            if receive_count >= self.config.max_receive_count {
                tracing::warn!(
                    "Message {} exceeded {} receives; moving to dead-letter queue",
                    message_id,
                    self.config.max_receive_count
                );
                dead_letter(&tx, &message_id, now)?;
                continue;
            }

            let task: AnalysisTask = match serde_json::from_str(&body) {
                Ok(task) => task,
                Err(e) => {
                    tracing::error!("Message {} is undecodable ({}); dead-lettering", message_id, e);
                    dead_letter(&tx, &message_id, now)?;
                    continue;
                }
            };

            let receipt_handle = random_id();
            let changed = tx.execute(
                "UPDATE queue_messages
                 SET receive_count = receive_count + 1, visible_at = ?2, receipt_handle = ?3
                 WHERE message_id = ?1 AND visible_at <= ?4",
                params![
                    message_id,
                    now + millis(self.config.visibility_timeout),
                    receipt_handle,
                    now
                ],
            )?;
            if changed == 0 {
                break None;
            }
            break Some(Delivery {
                message_id,
                receipt_handle,
                receive_count: receive_count + 1,
                task,
            });
        };

        tx.commit()?;
        Ok(delivery)
    }

    /// Acknowledges a delivery. Fails if the handle was superseded by a later
    /// receive of the same message.
    pub fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let changed = self.conn().execute(
            "DELETE FROM queue_messages WHERE receipt_handle = ?1",
            params![receipt_handle],
        )?;
        if changed == 0 {
            return Err(QueueError::UnknownReceipt);
        }
        Ok(())
    }

    pub fn stats(&self) -> Result<QueueStats, QueueError> {
        let now = self.clock.now_millis();
        let conn = self.conn();
        let (visible, in_flight): (i64, i64) = conn.query_row(
            "SELECT
               COALESCE(SUM(CASE WHEN visible_at <= ?1 THEN 1 ELSE 0 END), 0),
               COALESCE(SUM(CASE WHEN visible_at > ?1 THEN 1 ELSE 0 END), 0)
             FROM queue_messages",
            params![now],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let dead: i64 = conn.query_row("SELECT COUNT(1) FROM dead_letters", [], |row| row.get(0))?;
        Ok(QueueStats {
            visible: visible as u64,
            in_flight: in_flight as u64,
            dead_letters: dead as u64,
        })
    }

    pub fn dead_letters(&self) -> Result<Vec<DeadLetter>, QueueError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT message_id, body, receive_count, sent_at, dead_lettered_at
             FROM dead_letters ORDER BY dead_lettered_at, message_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(DeadLetter {
                message_id: row.get(0)?,
                body: row.get(1)?,
                receive_count: row.get(2)?,
                sent_at: from_millis(row.get(3)?),
                dead_lettered_at: from_millis(row.get(4)?),
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Deletes dead letters older than the dead-letter retention period.
    pub fn purge_expired_dead_letters(&self) -> Result<usize, QueueError> {
        let cutoff = self
            .clock
            .now_millis()
            .saturating_sub(millis(self.config.dead_letter_retention));
        let removed = self.conn().execute(
            "DELETE FROM dead_letters WHERE dead_lettered_at <= ?1",
            params![cutoff],
        )?;
        Ok(removed)
    }

    /// Moves a dead letter back onto the main queue with a fresh receive count.
    pub fn redrive_dead_letter(&self, message_id: &str) -> Result<(), QueueError> {
        let now = self.clock.now_millis();
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let moved = tx.execute(
            "INSERT INTO queue_messages (message_id, body, sent_at, visible_at, receive_count)
             SELECT message_id, body, ?2, ?2, 0 FROM dead_letters WHERE message_id = ?1",
            params![message_id, now],
        )?;
        if moved == 0 {
            return Err(QueueError::NoSuchDeadLetter(message_id.to_string()));
        }
        tx.execute(
            "DELETE FROM dead_letters WHERE message_id = ?1",
            params![message_id],
        )?;
        tx.commit()?;
        tracing::info!("Redrove dead letter {}", message_id);
        Ok(())
    }
}

fn dead_letter(tx: &rusqlite::Transaction<'_>, message_id: &str, now: i64) -> Result<(), QueueError> {
    tx.execute(
        "INSERT INTO dead_letters (message_id, body, sent_at, receive_count, dead_lettered_at)
         SELECT message_id, body, sent_at, receive_count, ?2 FROM queue_messages WHERE message_id = ?1
         ON CONFLICT(message_id) DO UPDATE SET
           body = excluded.body,
           receive_count = excluded.receive_count,
           dead_lettered_at = excluded.dead_lettered_at",
        params![message_id, now],
    )?;
    tx.execute(
        "DELETE FROM queue_messages WHERE message_id = ?1",
        params![message_id],
    )?;
    Ok(())
}
