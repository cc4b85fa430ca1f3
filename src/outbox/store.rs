//! On-device durable queue of field intakes awaiting server confirmation.
//!
//! Every operation runs on the single tokio-rusqlite background thread, so
//! concurrent callers are serialized without explicit locking. Photo and
//! signature bytes live in `outbox_files` next to their entry.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::models::outbox::{
    Attachment, IllegalTransition, OutboxItem, OutboxKind, OutboxPatch, OutboxStatus, ServerResult,
};
use crate::outbox::OutboxError;

const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;
    CREATE TABLE IF NOT EXISTS outbox (
        id          TEXT PRIMARY KEY,
        kind        TEXT NOT NULL,
        status      TEXT NOT NULL,
        created_at  TEXT NOT NULL,
        payload     TEXT NOT NULL,
        server      TEXT,
        error       TEXT
    );
    CREATE INDEX IF NOT EXISTS outbox_created_at_idx ON outbox (created_at DESC);
    CREATE TABLE IF NOT EXISTS outbox_files (
        item_id       TEXT NOT NULL REFERENCES outbox (id) ON DELETE CASCADE,
        role          TEXT NOT NULL,
        position      INTEGER NOT NULL,
        file_name     TEXT NOT NULL,
        content_type  TEXT NOT NULL,
        bytes         BLOB NOT NULL,
        PRIMARY KEY (item_id, role, position)
    );
";

const SELECT_ITEM: &str =
    "SELECT id, kind, status, created_at, payload, server, error FROM outbox";

const ROLE_PHOTO: &str = "photo";
const ROLE_SIGNATURE: &str = "signature";

#[derive(Debug, Error)]
#[error("unrecognised value {0:?}")]
struct UnknownValue(String);

fn conversion<E>(column: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err))
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn storage(err: impl std::fmt::Display) -> OutboxError {
    OutboxError::Storage(err.to_string())
}

/// Row fields before attachments are loaded.
struct ItemRow {
    id: Uuid,
    kind: OutboxKind,
    status: OutboxStatus,
    created_at: DateTime<Utc>,
    payload: String,
    server: Option<String>,
    error: Option<String>,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ItemRow> {
    let id: String = row.get(0)?;
    let kind: String = row.get(1)?;
    let status: String = row.get(2)?;
    let created_at: String = row.get(3)?;

    Ok(ItemRow {
        id: Uuid::parse_str(&id).map_err(|err| conversion(0, err))?,
        kind: OutboxKind::parse(&kind).ok_or_else(|| conversion(1, UnknownValue(kind.clone())))?,
        status: OutboxStatus::parse(&status)
            .ok_or_else(|| conversion(2, UnknownValue(status.clone())))?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|err| conversion(3, err))?
            .with_timezone(&Utc),
        payload: row.get(4)?,
        server: row.get(5)?,
        error: row.get(6)?,
    })
}

fn hydrate(conn: &Connection, row: ItemRow) -> rusqlite::Result<OutboxItem> {
    let mut stmt = conn.prepare_cached(
        "SELECT role, file_name, content_type, bytes FROM outbox_files
         WHERE item_id = ?1 ORDER BY role, position",
    )?;
    let files = stmt.query_map(params![row.id.to_string()], |file| {
        let role: String = file.get(0)?;
        Ok((
            role,
            Attachment::new(
                file.get::<_, String>(1)?,
                file.get::<_, String>(2)?,
                file.get::<_, Vec<u8>>(3)?,
            ),
        ))
    })?;

    let mut photos = Vec::new();
    let mut signature = None;
    for file in files {
        let (role, attachment) = file?;
        if role == ROLE_SIGNATURE {
            signature = Some(attachment);
        } else {
            photos.push(attachment);
        }
    }

    let payload = serde_json::from_str(&row.payload).map_err(|err| conversion(4, err))?;
    let server = row
        .server
        .as_deref()
        .map(serde_json::from_str::<ServerResult>)
        .transpose()
        .map_err(|err| conversion(5, err))?;

    Ok(OutboxItem {
        id: row.id,
        kind: row.kind,
        status: row.status,
        created_at: row.created_at,
        payload,
        photos,
        signature,
        server,
        error: row.error,
    })
}

fn load(conn: &Connection, id: Uuid) -> rusqlite::Result<Option<OutboxItem>> {
    let row = conn
        .query_row(
            &format!("{SELECT_ITEM} WHERE id = ?1"),
            params![id.to_string()],
            read_row,
        )
        .optional()?;

    row.map(|row| hydrate(conn, row)).transpose()
}

fn write_server(server: &Option<ServerResult>) -> rusqlite::Result<Option<String>> {
    server
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))
}

#[derive(Clone)]
pub struct OutboxStore {
    conn: tokio_rusqlite::Connection,
}

impl OutboxStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, OutboxError> {
        let conn = tokio_rusqlite::Connection::open(path.as_ref())
            .await
            .map_err(storage)?;
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self, OutboxError> {
        let conn = tokio_rusqlite::Connection::open_in_memory()
            .await
            .map_err(storage)?;
        Self::init(conn).await
    }

    async fn init(conn: tokio_rusqlite::Connection) -> Result<Self, OutboxError> {
        conn.call(|conn| -> Result<(), rusqlite::Error> {
            conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
            conn.execute_batch(SCHEMA)
        })
        .await
        .map_err(storage)?;
        Ok(Self { conn })
    }

    /// Inserts or fully replaces the entry with the same id.
    pub async fn put(&self, item: &OutboxItem) -> Result<(), OutboxError> {
        let item = item.clone();
        let item_id = item.id;
        let payload = serde_json::to_string(&item.payload)
            .map_err(|err| OutboxError::Storage(format!("encode payload: {err}")))?;

        self.conn
            .call(move |conn| -> Result<(), rusqlite::Error> {
                let tx = conn.transaction()?;
                let id = item.id.to_string();
                tx.execute(
                    "INSERT INTO outbox (id, kind, status, created_at, payload, server, error)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT (id) DO UPDATE SET
                        kind = excluded.kind,
                        status = excluded.status,
                        created_at = excluded.created_at,
                        payload = excluded.payload,
                        server = excluded.server,
                        error = excluded.error",
                    params![
                        id,
                        item.kind.as_str(),
                        item.status.as_str(),
                        timestamp(&item.created_at),
                        payload,
                        write_server(&item.server)?,
                        item.error,
                    ],
                )?;

                tx.execute("DELETE FROM outbox_files WHERE item_id = ?1", params![id])?;
                {
                    let mut insert = tx.prepare_cached(
                        "INSERT INTO outbox_files (item_id, role, position, file_name, content_type, bytes)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    )?;
                    let files = item
                        .photos
                        .iter()
                        .enumerate()
                        .map(|(position, file)| (ROLE_PHOTO, position, file))
                        .chain(item.signature.iter().map(|file| (ROLE_SIGNATURE, 0, file)));
                    for (role, position, file) in files {
                        insert.execute(params![
                            id,
                            role,
                            position as i64,
                            file.file_name,
                            file.content_type,
                            file.bytes,
                        ])?;
                    }
                }
                tx.commit()
            })
            .await
            .map_err(storage)?;

        debug!(outbox_id = %item_id, "outbox entry written");
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<OutboxItem>, OutboxError> {
        self.conn
            .call(move |conn| -> Result<Option<OutboxItem>, rusqlite::Error> { load(conn, id) })
            .await
            .map_err(storage)
    }

    /// Newest first by `created_at`.
    pub async fn list(&self, kind: Option<OutboxKind>) -> Result<Vec<OutboxItem>, OutboxError> {
        self.conn
            .call(move |conn| -> Result<Vec<OutboxItem>, rusqlite::Error> {
                let conn: &Connection = conn;
                let rows = {
                    let mut stmt = conn.prepare_cached(&format!(
                        "{SELECT_ITEM} WHERE ?1 IS NULL OR kind = ?1 ORDER BY created_at DESC, rowid DESC"
                    ))?;
                    let rows = stmt.query_map(params![kind.map(|k| k.as_str())], read_row)?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()?
                };
                rows.into_iter().map(|row| hydrate(conn, row)).collect()
            })
            .await
            .map_err(storage)
    }

    /// Merges `patch` into the stored entry and returns the result; `None`
    /// when no entry has that id.
    /// Merges `patch` into a stored entry. Status changes outside the
    /// outbox lifecycle are rejected and nothing is written.
    pub async fn patch(&self, id: Uuid, patch: OutboxPatch) -> Result<Option<OutboxItem>, OutboxError> {
        let patched = self
            .conn
            .call(move |conn| -> Result<Result<Option<OutboxItem>, IllegalTransition>, rusqlite::Error> {
                let tx = conn.transaction()?;
                let Some(mut item) = load(&tx, id)? else {
                    return Ok(Ok(None));
                };
                if let Err(rejected) = item.apply(patch) {
                    return Ok(Err(rejected));
                }
                tx.execute(
                    "UPDATE outbox SET status = ?2, server = ?3, error = ?4 WHERE id = ?1",
                    params![
                        id.to_string(),
                        item.status.as_str(),
                        write_server(&item.server)?,
                        item.error,
                    ],
                )?;
                tx.commit()?;
                Ok(Ok(Some(item)))
            })
            .await
            .map_err(storage)?;

        Ok(patched?)
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, OutboxError> {
        self.conn
            .call(move |conn| -> Result<bool, rusqlite::Error> {
                let removed = conn.execute(
                    "DELETE FROM outbox WHERE id = ?1",
                    params![id.to_string()],
                )?;
                Ok(removed > 0)
            })
            .await
            .map_err(storage)
    }

    /// Removes confirmed entries; returns how many were dropped.
    pub async fn purge_synced(&self) -> Result<usize, OutboxError> {
        self.conn
            .call(|conn| -> Result<usize, rusqlite::Error> {
                conn.execute(
                    "DELETE FROM outbox WHERE status = ?1",
                    params![OutboxStatus::Synced.as_str()],
                )
            })
            .await
            .map_err(storage)
    }

    /// Entries left `syncing` by a previous process can never complete;
    /// they are moved to `failed` so they can be retried.
    pub async fn fail_interrupted(&self, message: &str) -> Result<usize, OutboxError> {
        let message = message.to_string();
        self.conn
            .call(move |conn| -> Result<usize, rusqlite::Error> {
                conn.execute(
                    "UPDATE outbox SET status = ?1, error = ?2 WHERE status = ?3",
                    params![
                        OutboxStatus::Failed.as_str(),
                        message,
                        OutboxStatus::Syncing.as_str(),
                    ],
                )
            })
            .await
            .map_err(storage)
    }
}
