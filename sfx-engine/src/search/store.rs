//! Record store (§6 external interface, consumed by C6): a paginated,
//! filtered data source over [`AudioRecord`]s, plus insert/delete operations
//! that invalidate the query cache (C4) by table tag.
//!
//! Grounded on `wkmp-ai/src/db/{files,songs}.rs` for the sqlx query-building
//! idiom, and `wkmp-dr/src/db/tables.rs` for the indexed-column layout; the
//! trait abstraction itself is new (the teacher calls sqlx directly against
//! a concrete `SqlitePool`; we keep that as the sole production impl and add
//! an in-memory impl for the deterministic tests in spec.md §8).

use std::sync::Arc;

use parking_lot::RwLock;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::model::AudioRecord;
use crate::query::{CompareOp, Field, SearchExpression, SearchTerm};
use crate::search::engine::{self, Filters, Page};

/// Table tag query-cache invalidations are registered against (§4.4).
pub const RECORDS_TABLE_TAG: &str = "audio_records";

pub trait RecordStore: Send + Sync {
    fn query(
        &self,
        expr: Option<&SearchExpression>,
        filters: &Filters,
        page: Page,
    ) -> impl std::future::Future<Output = sfx_common::Result<(Vec<AudioRecord>, u64)>> + Send;

    fn insert(&self, record: AudioRecord) -> impl std::future::Future<Output = sfx_common::Result<()>> + Send;

    fn delete(&self, id: u64) -> impl std::future::Future<Output = sfx_common::Result<()>> + Send;
}

/// In-memory [`RecordStore`], used by tests that exercise the end-to-end
/// scenarios of spec §8 without a database.
#[derive(Clone)]
pub struct MemoryRecordStore {
    records: Arc<RwLock<Vec<AudioRecord>>>,
}

impl MemoryRecordStore {
    pub fn new(records: Vec<AudioRecord>) -> Self {
        Self { records: Arc::new(RwLock::new(records)) }
    }
}

fn passes_filters(record: &AudioRecord, filters: &Filters) -> bool {
    if let Some(min) = filters.min_duration_s {
        if record.duration_s < min {
            return false;
        }
    }
    if let Some(max) = filters.max_duration_s {
        if record.duration_s > max {
            return false;
        }
    }
    if let Some(rates) = &filters.sample_rates {
        if !rates.contains(&record.sample_rate_hz) {
            return false;
        }
    }
    if let Some(formats) = &filters.formats {
        if !formats.iter().any(|f| f.eq_ignore_ascii_case(&record.format)) {
            return false;
        }
    }
    if let Some(channels) = filters.channels {
        if record.channels != channels {
            return false;
        }
    }
    if let Some(tags) = &filters.tags {
        if !tags.iter().all(|t| record.tags.iter().any(|rt| rt.eq_ignore_ascii_case(t))) {
            return false;
        }
    }
    true
}

impl RecordStore for MemoryRecordStore {
    async fn query(
        &self,
        expr: Option<&SearchExpression>,
        filters: &Filters,
        page: Page,
    ) -> sfx_common::Result<(Vec<AudioRecord>, u64)> {
        let guard = self.records.read();
        let mut matched: Vec<AudioRecord> = guard
            .iter()
            .filter(|r| expr.map(|e| engine::matches(r, e)).unwrap_or(true))
            .filter(|r| passes_filters(r, filters))
            .cloned()
            .collect();

        // Stable id order so pagination is deterministic before scoring/sort.
        matched.sort_by_key(|r| r.id);
        let total = matched.len() as u64;
        let page_slice = matched
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect();
        Ok((page_slice, total))
    }

    async fn insert(&self, record: AudioRecord) -> sfx_common::Result<()> {
        let mut guard = self.records.write();
        guard.retain(|r| r.id != record.id);
        guard.push(record);
        Ok(())
    }

    async fn delete(&self, id: u64) -> sfx_common::Result<()> {
        self.records.write().retain(|r| r.id != id);
        Ok(())
    }
}

/// sqlx-backed [`RecordStore`] over the `audio_records`/`audio_tags` tables
/// (§6's indexed-column list: `path, filename, format, duration, sample_rate,
/// bit_depth, channels, file_size`).
#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append `expr`'s predicate as a parameterized `AND (...)` clause.
    fn push_expr(builder: &mut QueryBuilder<'_, Sqlite>, expr: &SearchExpression) {
        match expr {
            SearchExpression::Term(term) => Self::push_term(builder, term),
            SearchExpression::And(l, r) => {
                builder.push("(");
                Self::push_expr(builder, l);
                builder.push(" AND ");
                Self::push_expr(builder, r);
                builder.push(")");
            }
            SearchExpression::Or(l, r) => {
                builder.push("(");
                Self::push_expr(builder, l);
                builder.push(" OR ");
                Self::push_expr(builder, r);
                builder.push(")");
            }
            SearchExpression::Not(inner) => {
                builder.push("(NOT ");
                Self::push_expr(builder, inner);
                builder.push(")");
            }
        }
    }

    fn push_term(builder: &mut QueryBuilder<'_, Sqlite>, term: &SearchTerm) {
        match term.field {
            None => {
                let text = term.value.as_text().unwrap_or_default();
                if term.match_kind == crate::query::MatchKind::Glob {
                    builder.push("(filename LIKE ").push_bind(engine::glob_to_like(text));
                    builder.push(" ESCAPE '\\')");
                } else {
                    builder.push("(filename LIKE ").push_bind(format!("%{text}%")).push(")");
                }
            }
            Some(Field::Filename) => Self::push_string_cmp(builder, "filename", term),
            Some(Field::Path) => Self::push_string_cmp(builder, "path", term),
            Some(Field::Format) => Self::push_string_cmp(builder, "format", term),
            Some(Field::Description) => Self::push_string_cmp(builder, "description", term),
            Some(Field::Duration) => Self::push_numeric_cmp(builder, "duration_s", term),
            Some(Field::SampleRate) => Self::push_numeric_cmp(builder, "sample_rate_hz", term),
            Some(Field::BitDepth) => Self::push_numeric_cmp(builder, "bit_depth", term),
            Some(Field::Channels) => Self::push_numeric_cmp(builder, "channels", term),
            Some(Field::Size) => Self::push_numeric_cmp(builder, "file_size", term),
            Some(Field::Tag) => {
                let text = term.value.as_text().unwrap_or_default().to_string();
                builder.push("(id IN (SELECT record_id FROM audio_tags WHERE tag = ").push_bind(text).push("))");
            }
        }
    }

    fn push_string_cmp(builder: &mut QueryBuilder<'_, Sqlite>, column: &str, term: &SearchTerm) {
        let text = term.value.as_text().unwrap_or_default().to_string();
        match term.operator {
            CompareOp::Ne => {
                builder.push(format!("({column} != ")).push_bind(text).push(")");
            }
            CompareOp::Contains if term.match_kind == crate::query::MatchKind::Glob => {
                builder.push(format!("({column} LIKE ")).push_bind(engine::glob_to_like(&text));
                builder.push(" ESCAPE '\\')");
            }
            CompareOp::Contains => {
                builder.push(format!("({column} LIKE ")).push_bind(format!("%{text}%")).push(")");
            }
            _ => {
                builder.push(format!("({column} = ")).push_bind(text).push(")");
            }
        }
    }

    fn push_numeric_cmp(builder: &mut QueryBuilder<'_, Sqlite>, column: &str, term: &SearchTerm) {
        let n = term.value.as_number().unwrap_or(0.0);
        let op = match term.operator {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
            CompareOp::Ge => ">=",
            CompareOp::Le => "<=",
            _ => "=",
        };
        builder.push(format!("({column} {op} ")).push_bind(n).push(")");
    }

    fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, filters: &Filters) {
        if let Some(min) = filters.min_duration_s {
            builder.push(" AND duration_s >= ").push_bind(min);
        }
        if let Some(max) = filters.max_duration_s {
            builder.push(" AND duration_s <= ").push_bind(max);
        }
        if let Some(channels) = filters.channels {
            builder.push(" AND channels = ").push_bind(channels as i64);
        }
        if let Some(formats) = &filters.formats {
            if !formats.is_empty() {
                builder.push(" AND format IN (");
                let mut sep = builder.separated(", ");
                for f in formats {
                    sep.push_bind(f.clone());
                }
                builder.push(")");
            }
        }
        if let Some(rates) = &filters.sample_rates {
            if !rates.is_empty() {
                builder.push(" AND sample_rate_hz IN (");
                let mut sep = builder.separated(", ");
                for r in rates {
                    sep.push_bind(*r as i64);
                }
                builder.push(")");
            }
        }
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> sfx_common::Result<AudioRecord> {
        let id: i64 = row.try_get("id")?;
        let path: String = row.try_get("path")?;
        let content_hash: Option<Vec<u8>> = row.try_get("content_hash").unwrap_or(None);
        let filename: String = row.try_get("filename")?;
        let format: String = row.try_get("format")?;
        let file_size: i64 = row.try_get("file_size")?;
        let duration_s: f64 = row.try_get("duration_s")?;
        let sample_rate_hz: i64 = row.try_get("sample_rate_hz")?;
        let bit_depth: i64 = row.try_get("bit_depth").unwrap_or(16);
        let channels: i64 = row.try_get("channels").unwrap_or(2);

        Ok(AudioRecord {
            id: id as u64,
            path: path.into(),
            content_hash,
            filename,
            format,
            file_size: file_size as u64,
            duration_s,
            sample_rate_hz: sample_rate_hz as u32,
            bit_depth: bit_depth as u8,
            channels: channels as u8,
            bitrate_kbps: row.try_get::<Option<i64>, _>("bitrate_kbps").ok().flatten().map(|v| v as u32),
            title: row.try_get("title").unwrap_or(None),
            artist: row.try_get("artist").unwrap_or(None),
            album: row.try_get("album").unwrap_or(None),
            genre: row.try_get("genre").unwrap_or(None),
            year: row.try_get::<Option<i64>, _>("year").unwrap_or(None).map(|v| v as i32),
            track_number: row.try_get::<Option<i64>, _>("track_number").unwrap_or(None).map(|v| v as u32),
            comment: row.try_get("comment").unwrap_or(None),
            tags: Vec::new(),
            translation_status: Default::default(),
            translated_name: row.try_get("translated_name").unwrap_or(None),
            embedding: None,
        })
    }
}

impl RecordStore for SqliteRecordStore {
    async fn query(
        &self,
        expr: Option<&SearchExpression>,
        filters: &Filters,
        page: Page,
    ) -> sfx_common::Result<(Vec<AudioRecord>, u64)> {
        let mut count_builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new("SELECT COUNT(*) FROM audio_records WHERE 1=1");
        if let Some(e) = expr {
            count_builder.push(" AND ");
            Self::push_expr(&mut count_builder, e);
        }
        Self::push_filters(&mut count_builder, filters);
        let total: i64 = count_builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            ?;

        let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new("SELECT * FROM audio_records WHERE 1=1");
        if let Some(e) = expr {
            builder.push(" AND ");
            Self::push_expr(&mut builder, e);
        }
        Self::push_filters(&mut builder, filters);
        builder.push(" LIMIT ").push_bind(page.limit as i64).push(" OFFSET ").push_bind(page.offset as i64);

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            ?;

        let records = rows.iter().map(Self::row_to_record).collect::<sfx_common::Result<Vec<_>>>()?;
        Ok((records, total.max(0) as u64))
    }

    async fn insert(&self, record: AudioRecord) -> sfx_common::Result<()> {
        sqlx::query(
            "INSERT INTO audio_records (id, path, content_hash, filename, format, file_size, duration_s, sample_rate_hz, bit_depth, channels, bitrate_kbps, title, artist, album, genre, year, track_number, comment, translated_name)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                path = excluded.path, filename = excluded.filename, format = excluded.format,
                file_size = excluded.file_size, duration_s = excluded.duration_s",
        )
        .bind(record.id as i64)
        .bind(record.path.to_string_lossy().to_string())
        .bind(record.content_hash)
        .bind(record.filename)
        .bind(record.format)
        .bind(record.file_size as i64)
        .bind(record.duration_s)
        .bind(record.sample_rate_hz as i64)
        .bind(record.bit_depth as i64)
        .bind(record.channels as i64)
        .bind(record.bitrate_kbps.map(|v| v as i64))
        .bind(record.title)
        .bind(record.artist)
        .bind(record.album)
        .bind(record.genre)
        .bind(record.year)
        .bind(record.track_number.map(|v| v as i64))
        .bind(record.comment)
        .bind(record.translated_name)
        .execute(&self.pool)
        .await
        ?;

        Ok(())
    }

    async fn delete(&self, id: u64) -> sfx_common::Result<()> {
        sqlx::query("DELETE FROM audio_records WHERE id = ?")
            .bind(id as i64)
            .execute(&self.pool)
            .await
            ?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: u64) -> AudioRecord {
        AudioRecord {
            id,
            path: format!("/lib/{id}.wav").into(),
            content_hash: None,
            filename: format!("{id}.wav"),
            format: "wav".into(),
            file_size: 100,
            duration_s: 1.0,
            sample_rate_hz: 48_000,
            bit_depth: 16,
            channels: 2,
            bitrate_kbps: None,
            title: None,
            artist: None,
            album: None,
            genre: None,
            year: None,
            track_number: None,
            comment: None,
            tags: vec![],
            translation_status: Default::default(),
            translated_name: None,
            embedding: None,
        }
    }

    #[tokio::test]
    async fn memory_store_paginates_and_reports_total() {
        let store = MemoryRecordStore::new((1..=5).map(rec).collect());
        let (page, total) = store.query(None, &Filters::default(), Page { limit: 2, offset: 1 }).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[tokio::test]
    async fn memory_store_insert_replaces_by_id() {
        let store = MemoryRecordStore::new(vec![rec(1)]);
        let mut updated = rec(1);
        updated.filename = "renamed.wav".into();
        store.insert(updated).await.unwrap();
        let (page, total) = store.query(None, &Filters::default(), Page { limit: 10, offset: 0 }).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(page[0].filename, "renamed.wav");
    }
}
