//! Cached entities, the conflict audit log and cached HTTP responses.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use tracing::debug;

use super::{format_timestamp, parse_timestamp, Store};
use crate::entity::{CachedEntity, ConflictRecord, EntityKind};
use crate::error::Result;

/// A response stored by the network interceptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachedResponse {
    /// Request path the response was served for.
    pub path: String,
    /// HTTP status.
    pub status: u16,
    /// `Content-Type` header, if any.
    pub content_type: Option<String>,
    /// Response body.
    pub body: Vec<u8>,
    /// When the response was cached.
    pub cached_at: DateTime<Utc>,
}

impl Store {
    /// Store a snapshot, replacing any earlier one for the same entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn put_entity(&self, entity: &CachedEntity) -> Result<()> {
        let data = serde_json::to_string(&entity.data)?;
        self.conn()?.execute(
            "INSERT OR REPLACE INTO cached_entities (kind, remote_id, data, cached_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                entity.kind.as_str(),
                entity.remote_id,
                data,
                format_timestamp(entity.cached_at)
            ],
        )?;
        Ok(())
    }

    /// Get the snapshot of one entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get_entity(&self, kind: EntityKind, remote_id: i64) -> Result<Option<CachedEntity>> {
        let row: Option<(String, String)> = self
            .conn()?
            .query_row(
                "SELECT data, cached_at FROM cached_entities WHERE kind = ?1 AND remote_id = ?2",
                params![kind.as_str(), remote_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        row.map(|(data, cached_at)| {
            Ok(CachedEntity {
                kind,
                remote_id,
                data: serde_json::from_str(&data)?,
                cached_at: parse_timestamp(&cached_at).unwrap_or_else(Utc::now),
            })
        })
        .transpose()
    }

    /// All snapshots of one kind, ordered by remote id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn entities(&self, kind: EntityKind) -> Result<Vec<CachedEntity>> {
        let rows: Vec<(i64, String, String)> = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(
                "SELECT remote_id, data, cached_at FROM cached_entities
                 WHERE kind = ?1 ORDER BY remote_id",
            )?;
            let rows = stmt
                .query_map([kind.as_str()], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        rows.into_iter()
            .map(|(remote_id, data, cached_at)| {
                Ok(CachedEntity {
                    kind,
                    remote_id,
                    data: serde_json::from_str(&data)?,
                    cached_at: parse_timestamp(&cached_at).unwrap_or_else(Utc::now),
                })
            })
            .collect()
    }

    /// Append an entry to the conflict audit log.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn record_conflict(&self, conflict: &ConflictRecord) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sync_conflicts (offline_id, record_id, remote_value, client_value, resolution, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                conflict.offline_id,
                conflict.record_id,
                serde_json::to_string(&conflict.remote_value)?,
                serde_json::to_string(&conflict.client_value)?,
                conflict.resolution,
                format_timestamp(conflict.recorded_at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent conflicts first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn conflicts(&self, limit: usize) -> Result<Vec<ConflictRecord>> {
        type Row = (i64, String, Option<i64>, String, String, String, String);

        let rows: Vec<Row> = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(
                "SELECT id, offline_id, record_id, remote_value, client_value, resolution, recorded_at
                 FROM sync_conflicts ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map([i64::try_from(limit).unwrap_or(i64::MAX)], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        rows.into_iter()
            .map(
                |(id, offline_id, record_id, remote, client, resolution, recorded_at)| {
                    Ok(ConflictRecord {
                        id: Some(id),
                        offline_id,
                        record_id,
                        remote_value: serde_json::from_str(&remote)?,
                        client_value: serde_json::from_str(&client)?,
                        resolution,
                        recorded_at: parse_timestamp(&recorded_at).unwrap_or_else(Utc::now),
                    })
                },
            )
            .collect()
    }

    /// Store a response under a cache name and key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn cache_response(
        &self,
        cache_name: &str,
        cache_key: &str,
        response: &CachedResponse,
    ) -> Result<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO http_cache (cache_name, cache_key, path, status, content_type, body, cached_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                cache_name,
                cache_key,
                response.path,
                response.status,
                response.content_type,
                response.body,
                format_timestamp(response.cached_at),
            ],
        )?;
        Ok(())
    }

    /// Look up a cached response.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn cached_response(
        &self,
        cache_name: &str,
        cache_key: &str,
    ) -> Result<Option<CachedResponse>> {
        let response = self
            .conn()?
            .query_row(
                "SELECT path, status, content_type, body, cached_at FROM http_cache
                 WHERE cache_name = ?1 AND cache_key = ?2",
                params![cache_name, cache_key],
                |row| {
                    let cached_at: String = row.get(4)?;
                    Ok(CachedResponse {
                        path: row.get(0)?,
                        status: row.get(1)?,
                        content_type: row.get(2)?,
                        body: row.get(3)?,
                        cached_at: parse_timestamp(&cached_at).unwrap_or_else(Utc::now),
                    })
                },
            )
            .optional()?;
        Ok(response)
    }

    /// Drop every cache except `keep`.
    ///
    /// Returns the number of responses removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn evict_caches_except(&self, keep: &str) -> Result<usize> {
        let removed = self
            .conn()?
            .execute("DELETE FROM http_cache WHERE cache_name != ?1", [keep])?;
        if removed > 0 {
            debug!(keep, removed, "Evicted stale cached responses");
        }
        Ok(removed)
    }
}
