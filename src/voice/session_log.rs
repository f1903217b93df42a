//! Append-only persistence for voice sessions and their interactions
//!
//! One row per session, one row per interaction; interactions are never
//! updated or deleted. The orchestrator treats every call here as
//! best-effort: a persistence failure is logged and the call continues.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::types::{AgentKind, Caller, InteractionKind, SessionStatus, UserRole};

pub struct SessionStore {
    conn: Arc<Mutex<Connection>>,
}

/// A single appended interaction. The agent kind, shop, and role are
/// snapshotted at event time because they change mid-session; optional
/// fields stay NULL when the kind does not use them.
#[derive(Debug, Clone)]
pub struct InteractionRecord {
    pub kind: InteractionKind,
    pub agent_kind: AgentKind,
    pub role: UserRole,
    pub shop_id: Option<Uuid>,
    pub content: Option<String>,
    pub tool_name: Option<String>,
    pub tool_input: Option<String>,
    pub tool_output: Option<String>,
    pub tool_success: Option<bool>,
    pub latency_ms: Option<u64>,
    pub tokens: Option<u32>,
}

impl InteractionRecord {
    /// Blank record for a given snapshot; callers fill the kind-specific
    /// fields.
    pub fn snapshot(kind: InteractionKind, agent_kind: AgentKind, role: UserRole, shop_id: Option<Uuid>) -> Self {
        Self {
            kind,
            agent_kind,
            role,
            shop_id,
            content: None,
            tool_name: None,
            tool_input: None,
            tool_output: None,
            tool_success: None,
            latency_ms: None,
            tokens: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionRow {
    pub id: Uuid,
    pub transport_session_id: Option<String>,
    pub caller_id: Option<Uuid>,
    pub agent_kind: String,
    pub shop_id: Option<Uuid>,
    pub role: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub total_interactions: i64,
    pub total_tokens: i64,
}

#[derive(Debug, Clone)]
pub struct InteractionRow {
    pub kind: String,
    pub agent_kind: String,
    pub role: String,
    pub content: Option<String>,
    pub tool_name: Option<String>,
    pub tool_output: Option<String>,
    pub tool_success: Option<bool>,
    pub latency_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl SessionStore {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS voice_sessions (
                id TEXT PRIMARY KEY,
                transport_session_id TEXT,
                caller_id TEXT,
                caller_name TEXT,
                agent_kind TEXT NOT NULL,
                shop_id TEXT,
                shop_name TEXT,
                role TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                duration_seconds INTEGER,
                total_interactions INTEGER NOT NULL DEFAULT 0,
                total_tokens INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS voice_interactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                agent_kind TEXT NOT NULL,
                role TEXT NOT NULL,
                shop_id TEXT,
                content TEXT,
                tool_name TEXT,
                tool_input TEXT,
                tool_output TEXT,
                tool_success INTEGER,
                latency_ms INTEGER,
                tokens INTEGER,
                created_at TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES voice_sessions(id)
            );

            CREATE INDEX IF NOT EXISTS idx_interactions_session
                ON voice_interactions(session_id);
            "#,
        )?;
        Ok(())
    }

    /// Open a new session row. Returns the generated session id.
    pub async fn create_session(
        &self,
        caller: Option<&Caller>,
        kind: AgentKind,
        role: UserRole,
        shop: Option<(Uuid, &str)>,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO voice_sessions
                (id, caller_id, caller_name, agent_kind, shop_id, shop_name, role, status, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id.to_string(),
                caller.map(|c| c.id.to_string()),
                caller.map(|c| c.name.clone()),
                kind.as_str(),
                shop.map(|(id, _)| id.to_string()),
                shop.map(|(_, name)| name.to_string()),
                role.as_str(),
                SessionStatus::Active.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(id)
    }

    /// Record the upstream realtime session id. Overwritten on every agent
    /// switch; only the latest transport session is kept.
    pub async fn set_transport_session(&self, session_id: Uuid, transport_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE voice_sessions SET transport_session_id = ?1 WHERE id = ?2",
            params![transport_id, session_id.to_string()],
        )?;
        Ok(())
    }

    /// Point the session at its current agent after a switch.
    pub async fn update_agent(
        &self,
        session_id: Uuid,
        kind: AgentKind,
        role: UserRole,
        shop: Option<(Uuid, &str)>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE voice_sessions
             SET agent_kind = ?1, shop_id = ?2, shop_name = ?3, role = ?4
             WHERE id = ?5",
            params![
                kind.as_str(),
                shop.map(|(id, _)| id.to_string()),
                shop.map(|(_, name)| name.to_string()),
                role.as_str(),
                session_id.to_string(),
            ],
        )?;
        Ok(())
    }

    pub async fn log_interaction(&self, session_id: Uuid, record: &InteractionRecord) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO voice_interactions
                (session_id, kind, agent_kind, role, shop_id, content, tool_name,
                 tool_input, tool_output, tool_success, latency_ms, tokens, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                session_id.to_string(),
                record.kind.as_str(),
                record.agent_kind.as_str(),
                record.role.as_str(),
                record.shop_id.map(|id| id.to_string()),
                record.content,
                record.tool_name,
                record.tool_input,
                record.tool_output,
                record.tool_success,
                record.latency_ms.map(|v| v as i64),
                record.tokens.map(|v| v as i64),
                Utc::now().to_rfc3339(),
            ],
        )?;
        conn.execute(
            "UPDATE voice_sessions
             SET total_interactions = total_interactions + 1,
                 total_tokens = total_tokens + ?1
             WHERE id = ?2",
            params![record.tokens.unwrap_or(0) as i64, session_id.to_string()],
        )?;
        Ok(())
    }

    pub async fn end_session(&self, session_id: Uuid, status: SessionStatus) -> Result<()> {
        let now = Utc::now();
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE voice_sessions
             SET status = ?1,
                 ended_at = ?2,
                 duration_seconds = CAST(
                     (julianday(?2) - julianday(started_at)) * 86400 AS INTEGER)
             WHERE id = ?3",
            params![status.as_str(), now.to_rfc3339(), session_id.to_string()],
        )?;
        Ok(())
    }

    pub async fn session(&self, session_id: Uuid) -> Result<Option<SessionRow>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT id, transport_session_id, caller_id, agent_kind, shop_id, role, status,
                        started_at, ended_at, duration_seconds, total_interactions, total_tokens
                 FROM voice_sessions WHERE id = ?1",
                params![session_id.to_string()],
                |row| {
                    Ok(SessionRow {
                        id: Uuid::parse_str(&row.get::<_, String>(0)?).unwrap_or_default(),
                        transport_session_id: row.get(1)?,
                        caller_id: row
                            .get::<_, Option<String>>(2)?
                            .and_then(|c| Uuid::parse_str(&c).ok()),
                        agent_kind: row.get(3)?,
                        shop_id: row
                            .get::<_, Option<String>>(4)?
                            .and_then(|s| Uuid::parse_str(&s).ok()),
                        role: row.get(5)?,
                        status: row.get(6)?,
                        started_at: parse_ts(&row.get::<_, String>(7)?),
                        ended_at: row.get::<_, Option<String>>(8)?.as_deref().map(parse_ts),
                        duration_seconds: row.get(9)?,
                        total_interactions: row.get(10)?,
                        total_tokens: row.get(11)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Interactions for a session, oldest first.
    pub async fn interactions(&self, session_id: Uuid) -> Result<Vec<InteractionRow>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT kind, agent_kind, role, content, tool_name, tool_output, tool_success,
                    latency_ms, created_at
             FROM voice_interactions WHERE session_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![session_id.to_string()], |row| {
            Ok(InteractionRow {
                kind: row.get(0)?,
                agent_kind: row.get(1)?,
                role: row.get(2)?,
                content: row.get(3)?,
                tool_name: row.get(4)?,
                tool_output: row.get(5)?,
                tool_success: row.get::<_, Option<i64>>(6)?.map(|v| v != 0),
                latency_ms: row.get(7)?,
                created_at: parse_ts(&row.get::<_, String>(8)?),
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
