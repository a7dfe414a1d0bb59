use crate::error::{WorkflowError, WorkflowResult};
use crate::ledger::LedgerRow;
use crate::types::TaskType;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Durable access to progress ledger rows, always scoped to one `entry_id`.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    fn backend_label(&self) -> &'static str;

    async fn load(&self, entry_id: &str) -> WorkflowResult<Option<LedgerRow>>;

    /// Insert-or-update by `entry_id`. Markers already stored are never cleared.
    async fn upsert(&self, row: &LedgerRow) -> WorkflowResult<()>;
}

/// Ledger persistence backend configuration.
#[derive(Debug, Clone, Default)]
pub enum LedgerStorageConfig {
    /// Keep rows in process memory only.
    #[default]
    Memory,
    /// Persist rows in PostgreSQL.
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

impl LedgerStorageConfig {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn postgres(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self::Postgres {
            database_url: database_url.into(),
            max_connections,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
        }
    }

    pub async fn bootstrap(self) -> WorkflowResult<Arc<dyn LedgerStore>> {
        match self {
            Self::Memory => Ok(Arc::new(InMemoryLedgerStore::new())),
            Self::Postgres {
                database_url,
                max_connections,
            } => {
                let store = PostgresLedgerStore::connect(&database_url, max_connections).await?;
                Ok(Arc::new(store))
            }
        }
    }
}

/// In-memory ledger, deterministic and test-friendly.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    rows: RwLock<HashMap<String, LedgerRow>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: impl IntoIterator<Item = LedgerRow>) -> Self {
        Self {
            rows: RwLock::new(
                rows.into_iter()
                    .map(|row| (row.entry_id.clone(), row))
                    .collect(),
            ),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    fn backend_label(&self) -> &'static str {
        "memory"
    }

    async fn load(&self, entry_id: &str) -> WorkflowResult<Option<LedgerRow>> {
        let guard = self
            .rows
            .read()
            .map_err(|_| WorkflowError::Ledger("ledger lock poisoned".to_string()))?;
        Ok(guard.get(entry_id).cloned())
    }

    async fn upsert(&self, row: &LedgerRow) -> WorkflowResult<()> {
        let mut guard = self
            .rows
            .write()
            .map_err(|_| WorkflowError::Ledger("ledger lock poisoned".to_string()))?;
        let merged = match guard.get(&row.entry_id) {
            Some(stored) => stored.merge(row),
            None => row.clone(),
        };
        guard.insert(row.entry_id.clone(), merged);
        Ok(())
    }
}

/// PostgreSQL-backed ledger. Each write is a single-row, single-statement commit.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> WorkflowResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| WorkflowError::Ledger(format!("postgres connect failed: {e}")))?;

        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: PgPool) -> WorkflowResult<Self> {
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> WorkflowResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS journal_ledger (
                entry_id TEXT PRIMARY KEY,
                subject_id TEXT NULL,
                case_number TEXT NULL,
                category TEXT NULL,
                linked_at TIMESTAMPTZ NULL,
                finalized_at TIMESTAMPTZ NULL,
                task_id TEXT NULL,
                task_type TEXT NULL,
                task_created_at TIMESTAMPTZ NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                CONSTRAINT journal_ledger_case_pair
                    CHECK ((case_number IS NULL) = (linked_at IS NULL)),
                CONSTRAINT journal_ledger_task_triple
                    CHECK ((task_id IS NULL) = (task_created_at IS NULL)
                       AND (task_type IS NULL) = (task_created_at IS NULL))
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| WorkflowError::Ledger(format!("postgres schema create failed: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    fn backend_label(&self) -> &'static str {
        "postgres"
    }

    async fn load(&self, entry_id: &str) -> WorkflowResult<Option<LedgerRow>> {
        let row = sqlx::query(
            r#"
            SELECT
                entry_id,
                subject_id,
                case_number,
                category,
                linked_at,
                finalized_at,
                task_id,
                task_type,
                task_created_at,
                created_at,
                updated_at
            FROM journal_ledger
            WHERE entry_id = $1
            "#,
        )
        .bind(entry_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| WorkflowError::Ledger(format!("postgres load failed: {e}")))?;

        row.map(|row| row_to_ledger(&row)).transpose()
    }

    async fn upsert(&self, row: &LedgerRow) -> WorkflowResult<()> {
        // Stored markers win over incoming values so a replayed or stale write
        // cannot clear or rewind progress.
        sqlx::query(
            r#"
            INSERT INTO journal_ledger (
                entry_id,
                subject_id,
                case_number,
                category,
                linked_at,
                finalized_at,
                task_id,
                task_type,
                task_created_at,
                created_at,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (entry_id) DO UPDATE SET
                subject_id = COALESCE(journal_ledger.subject_id, EXCLUDED.subject_id),
                category = COALESCE(journal_ledger.category, EXCLUDED.category),
                case_number = CASE WHEN journal_ledger.linked_at IS NULL
                    THEN EXCLUDED.case_number ELSE journal_ledger.case_number END,
                linked_at = COALESCE(journal_ledger.linked_at, EXCLUDED.linked_at),
                finalized_at = COALESCE(journal_ledger.finalized_at, EXCLUDED.finalized_at),
                task_id = CASE WHEN journal_ledger.task_created_at IS NULL
                    THEN EXCLUDED.task_id ELSE journal_ledger.task_id END,
                task_type = CASE WHEN journal_ledger.task_created_at IS NULL
                    THEN EXCLUDED.task_type ELSE journal_ledger.task_type END,
                task_created_at = COALESCE(journal_ledger.task_created_at, EXCLUDED.task_created_at),
                updated_at = GREATEST(journal_ledger.updated_at, EXCLUDED.updated_at)
            "#,
        )
        .bind(&row.entry_id)
        .bind(&row.subject_id)
        .bind(&row.case_number)
        .bind(&row.category)
        .bind(row.linked_at)
        .bind(row.finalized_at)
        .bind(&row.task_id)
        .bind(row.task_type.map(TaskType::code))
        .bind(row.task_created_at)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| WorkflowError::Ledger(format!("postgres upsert failed: {e}")))?;

        Ok(())
    }
}

fn row_to_ledger(row: &PgRow) -> WorkflowResult<LedgerRow> {
    let task_type: Option<String> = decode(row, "task_type")?;
    let task_type = task_type
        .map(|code| {
            TaskType::from_code(&code).ok_or_else(|| {
                WorkflowError::Ledger(format!("unknown task type '{code}' in postgres"))
            })
        })
        .transpose()?;

    Ok(LedgerRow {
        entry_id: decode(row, "entry_id")?,
        subject_id: decode(row, "subject_id")?,
        case_number: decode(row, "case_number")?,
        category: decode(row, "category")?,
        linked_at: decode(row, "linked_at")?,
        finalized_at: decode(row, "finalized_at")?,
        task_id: decode(row, "task_id")?,
        task_type,
        task_created_at: decode(row, "task_created_at")?,
        created_at: decode(row, "created_at")?,
        updated_at: decode(row, "updated_at")?,
    })
}

fn decode<'r, T>(row: &'r PgRow, column: &str) -> WorkflowResult<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(column)
        .map_err(|e| WorkflowError::Ledger(format!("postgres decode {column} failed: {e}")))
}
