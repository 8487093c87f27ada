// Checkpointing - durable conversation records with write-through persistence
use crate::types::{ConversationId, ConversationRecord};
use crate::workflow::state::ConversationState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

pub type RecordSet = HashMap<ConversationId, ConversationRecord>;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("State store is corrupt: {0}")]
    Corrupt(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Background task failed: {0}")]
    Task(String),
}

/// Storage medium behind the conversation store. `load` runs once at startup,
/// `save` receives the complete record set after every mutation.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    fn describe(&self) -> String;
    async fn load(&self) -> Result<RecordSet, PersistenceError>;
    async fn save(&self, records: &RecordSet) -> Result<(), PersistenceError>;
}

// ============================================================================
// JSON FILE BACKEND
// ============================================================================

/// Whole-file JSON store, replaced atomically on every save
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Parse a persisted record set. Individual records that do not parse are
/// skipped; a document that is not a JSON object at all is corrupt.
fn parse_record_set(raw: &str) -> Result<RecordSet, PersistenceError> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| PersistenceError::Corrupt(format!("invalid JSON: {}", e)))?;
    let object = value
        .as_object()
        .ok_or_else(|| PersistenceError::Corrupt("top-level value is not an object".to_string()))?;

    let mut records = RecordSet::with_capacity(object.len());
    for (key, entry) in object {
        match serde_json::from_value::<ConversationRecord>(entry.clone()) {
            Ok(record) => {
                records.insert(ConversationId::new(key), record);
            }
            Err(e) => warn!(conversation_id = %key, "Skipping unreadable conversation record: {}", e),
        }
    }
    Ok(records)
}

fn write_file_atomic(path: &Path, content: &[u8]) -> Result<(), PersistenceError> {
    let io_err = |source: std::io::Error| PersistenceError::Io {
        path: path.display().to_string(),
        source,
    };

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(io_err)?;

    // Temp file must live on the same filesystem for the rename to be atomic
    let mut temp = tempfile::NamedTempFile::new_in(&parent).map_err(io_err)?;
    temp.write_all(content).map_err(io_err)?;
    temp.as_file().sync_all().map_err(io_err)?;
    temp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

#[async_trait]
impl StoreBackend for JsonFileBackend {
    fn describe(&self) -> String {
        format!("json file {}", self.path.display())
    }

    async fn load(&self) -> Result<RecordSet, PersistenceError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No state file at {}, starting empty", self.path.display());
                return Ok(RecordSet::new());
            }
            Err(source) => {
                return Err(PersistenceError::Io {
                    path: self.path.display().to_string(),
                    source,
                })
            }
        };
        parse_record_set(&raw)
    }

    async fn save(&self, records: &RecordSet) -> Result<(), PersistenceError> {
        let content = serde_json::to_vec_pretty(records)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_file_atomic(&path, &content))
            .await
            .map_err(|e| PersistenceError::Task(e.to_string()))?
    }
}

// ============================================================================
// POSTGRES BACKEND
// ============================================================================

/// One row per conversation in `conversation_records`
pub struct PgStoreBackend {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    conversation_id: String,
    state: String,
    data: serde_json::Value,
    updated_at: DateTime<Utc>,
}

impl PgStoreBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Setup record table
    pub async fn setup(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversation_records (
                conversation_id VARCHAR(255) PRIMARY KEY,
                state VARCHAR(64) NOT NULL,
                data JSONB NOT NULL DEFAULT '{}'::jsonb,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_conversation_records_updated_at
            ON conversation_records(updated_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("✅ Conversation record table setup complete");
        Ok(())
    }
}

#[async_trait]
impl StoreBackend for PgStoreBackend {
    fn describe(&self) -> String {
        "postgres conversation_records".to_string()
    }

    async fn load(&self) -> Result<RecordSet, PersistenceError> {
        let rows = sqlx::query_as::<_, RecordRow>(
            "SELECT conversation_id, state, data, updated_at FROM conversation_records",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut records = RecordSet::with_capacity(rows.len());
        for row in rows {
            let Some(state) = ConversationState::parse(&row.state) else {
                warn!(conversation_id = %row.conversation_id, "Skipping record with unknown state '{}'", row.state);
                continue;
            };
            let data = match serde_json::from_value(row.data) {
                Ok(data) => data,
                Err(e) => {
                    warn!(conversation_id = %row.conversation_id, "Skipping record with unreadable data: {}", e);
                    continue;
                }
            };
            records.insert(
                ConversationId::new(&row.conversation_id),
                ConversationRecord {
                    state,
                    data,
                    updated_at: row.updated_at,
                },
            );
        }
        Ok(records)
    }

    async fn save(&self, records: &RecordSet) -> Result<(), PersistenceError> {
        let mut tx = self.pool.begin().await?;
        for (id, record) in records {
            let data = serde_json::to_value(&record.data)?;
            sqlx::query(
                r#"
                INSERT INTO conversation_records (conversation_id, state, data, updated_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (conversation_id)
                DO UPDATE SET state = EXCLUDED.state, data = EXCLUDED.data, updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(id.as_str())
            .bind(record.state.as_str())
            .bind(data)
            .bind(record.updated_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

// ============================================================================
// CONVERSATION STORE
// ============================================================================

/// Owns the conversation-record map. Constructed once at startup and injected
/// into the orchestrator; all mutations are serialized behind one lock and
/// written through to the backend before the lock is released.
pub struct ConversationStore {
    backend: Arc<dyn StoreBackend>,
    records: Mutex<RecordSet>,
}

impl ConversationStore {
    /// Load the record set. A missing or corrupt store is not fatal.
    pub async fn open(backend: Arc<dyn StoreBackend>) -> Self {
        let records = match backend.load().await {
            Ok(records) => {
                info!("💾 Loaded {} conversation records from {}", records.len(), backend.describe());
                records
            }
            Err(e) => {
                error!("Failed to load conversation records from {} (starting empty): {}", backend.describe(), e);
                RecordSet::new()
            }
        };

        Self {
            backend,
            records: Mutex::new(records),
        }
    }

    /// Current record, or the implicit initial record for unseen ids
    pub async fn get(&self, id: &ConversationId) -> ConversationRecord {
        let records = self.records.lock().await;
        records.get(id).cloned().unwrap_or_default()
    }

    pub async fn state(&self, id: &ConversationId) -> ConversationState {
        let records = self.records.lock().await;
        records.get(id).map(|r| r.state).unwrap_or_default()
    }

    /// Record for `id`, creating and persisting it on first sight
    pub async fn ensure(&self, id: &ConversationId) -> ConversationRecord {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get(id) {
            return record.clone();
        }
        let record = ConversationRecord::default();
        records.insert(id.clone(), record.clone());
        self.persist(&records).await;
        info!(conversation_id = %id, "📝 Created conversation record");
        record
    }

    /// Mutate a record and write the full set through to the backend
    pub async fn update<F, R>(&self, id: &ConversationId, mutate: F) -> R
    where
        F: FnOnce(&mut ConversationRecord) -> R,
    {
        let mut records = self.records.lock().await;
        let record = records.entry(id.clone()).or_default();
        let result = mutate(record);
        record.updated_at = Utc::now();
        self.persist(&records).await;
        result
    }

    pub async fn snapshot(&self) -> RecordSet {
        self.records.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    /// Explicit save, used at shutdown
    pub async fn flush(&self) -> Result<(), PersistenceError> {
        let records = self.records.lock().await;
        self.backend.save(&records).await
    }

    async fn persist(&self, records: &RecordSet) {
        if let Err(e) = self.backend.save(records).await {
            // In-memory state stays authoritative; the next successful save catches up
            error!("Failed to persist conversation records to {}: {}", self.backend.describe(), e);
        }
    }
}
