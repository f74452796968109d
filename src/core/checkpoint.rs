//! 检查点存储：在挂起点按 thread_id 持久化 ResearchState，恢复时读回
//!
//! - `MemoryCheckpointStore`：进程内，测试与一次性 CLI 运行使用
//! - `SqliteCheckpointStore`：rusqlite 单文件，跨进程恢复；同步调用放在 spawn_blocking 中
//!
//! 状态以 JSON 文本保存；会话完成后仍保留一份归档（status = completed），可显式删除。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::RwLock;

use crate::core::error::ResearchError;
use crate::core::state::{ResearchState, RunStatus};

/// 持久化抽象
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// 写入（覆盖）该 thread 的状态
    async fn save(&self, state: &ResearchState) -> Result<(), ResearchError>;

    /// 读取；不存在时返回 None
    async fn load(&self, thread_id: &str) -> Result<Option<ResearchState>, ResearchError>;

    async fn delete(&self, thread_id: &str) -> Result<(), ResearchError>;
}

fn encode(state: &ResearchState) -> Result<String, ResearchError> {
    serde_json::to_string(state).map_err(|e| ResearchError::Checkpoint(format!("serialize state: {e}")))
}

fn decode(json: &str) -> Result<ResearchState, ResearchError> {
    serde_json::from_str(json).map_err(|e| ResearchError::Checkpoint(format!("deserialize state: {e}")))
}

fn status_str(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Running => "running",
        RunStatus::AwaitingInput => "awaiting_input",
        RunStatus::Completed => "completed",
    }
}

/// 进程内存储
#[derive(Default)]
pub struct MemoryCheckpointStore {
    states: RwLock<HashMap<String, String>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, state: &ResearchState) -> Result<(), ResearchError> {
        let json = encode(state)?;
        self.states.write().await.insert(state.thread_id.clone(), json);
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> Result<Option<ResearchState>, ResearchError> {
        match self.states.read().await.get(thread_id) {
            Some(json) => decode(json).map(Some),
            None => Ok(None),
        }
    }

    async fn delete(&self, thread_id: &str) -> Result<(), ResearchError> {
        self.states.write().await.remove(thread_id);
        Ok(())
    }
}

/// SQLite 存储
pub struct SqliteCheckpointStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl SqliteCheckpointStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, ResearchError> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ResearchError::Checkpoint(format!("create checkpoint directory: {e}")))?;
            }
        }
        let conn = Connection::open(&db_path)
            .map_err(|e| ResearchError::Checkpoint(format!("open checkpoint database: {e}")))?;
        Self::init_schema(&conn)?;
        tracing::debug!(path = %db_path.display(), "Checkpoint database opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn init_schema(conn: &Connection) -> Result<(), ResearchError> {
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS checkpoints (
                thread_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                state TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            ",
        )
        .map_err(|e| ResearchError::Checkpoint(format!("init checkpoint schema: {e}")))
    }

    /// 在阻塞线程池中持锁执行一次数据库操作
    async fn with_conn<T, F>(&self, op: F) -> Result<T, ResearchError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| ResearchError::Checkpoint("checkpoint connection lock poisoned".into()))?;
            op(&guard).map_err(|e| ResearchError::Checkpoint(e.to_string()))
        })
        .await
        .map_err(|e| ResearchError::Checkpoint(format!("checkpoint task failed: {e}")))?
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(&self, state: &ResearchState) -> Result<(), ResearchError> {
        let json = encode(state)?;
        let thread_id = state.thread_id.clone();
        let status = status_str(state.status);
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO checkpoints (thread_id, status, state, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(thread_id) DO UPDATE SET
                    status = excluded.status,
                    state = excluded.state,
                    updated_at = excluded.updated_at",
                params![thread_id, status, json, chrono::Utc::now().to_rfc3339()],
            )
            .map(|_| ())
        })
        .await
    }

    async fn load(&self, thread_id: &str) -> Result<Option<ResearchState>, ResearchError> {
        let thread_id = thread_id.to_string();
        let json: Option<String> = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT state FROM checkpoints WHERE thread_id = ?1",
                    params![thread_id],
                    |row| row.get(0),
                )
                .optional()
            })
            .await?;
        json.as_deref().map(decode).transpose()
    }

    async fn delete(&self, thread_id: &str) -> Result<(), ResearchError> {
        let thread_id = thread_id.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM checkpoints WHERE thread_id = ?1", params![thread_id])
                .map(|_| ())
        })
        .await
    }
}
