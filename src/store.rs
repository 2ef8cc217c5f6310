//! Named vector collections persisted in SQLite.
//!
//! Each collection owns a set of `(id, embedding)` entries plus metadata
//! describing the document it was built from. The first upsert fixes the
//! collection's dimensionality. Queries are exhaustive cosine scans, which is
//! plenty for per-document page collections.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::model::CollectionInfo;
use crate::util::now_utc_string;

pub const STORE_FILE_NAME: &str = "pageseek.sqlite";

pub struct VectorStore {
    connection: Connection,
    location: Option<PathBuf>,
}

/// Outcome of [`VectorStore::get_or_create`]; both variants are success.
pub enum CollectionOpen<'s> {
    Created(Collection<'s>),
    Existing(Collection<'s>),
}

impl<'s> CollectionOpen<'s> {
    pub fn was_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }

    pub fn into_collection(self) -> Collection<'s> {
        match self {
            Self::Created(collection) | Self::Existing(collection) => collection,
        }
    }
}

pub struct Collection<'s> {
    store: &'s VectorStore,
    name: String,
}

impl VectorStore {
    /// Opens the store under `persist_dir`, or an in-memory store without one.
    pub fn open(persist_dir: Option<&Path>) -> Result<Self> {
        let (connection, location) = match persist_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(|err| {
                    PipelineError::CollectionUnavailable(format!(
                        "failed to create {}: {err}",
                        dir.display()
                    ))
                })?;
                let path = dir.join(STORE_FILE_NAME);
                let connection = Connection::open(&path).map_err(|err| {
                    PipelineError::CollectionUnavailable(format!(
                        "failed to open {}: {err}",
                        path.display()
                    ))
                })?;
                configure_connection(&connection)?;
                (connection, Some(path))
            }
            None => {
                let connection = Connection::open_in_memory().map_err(|err| {
                    PipelineError::CollectionUnavailable(format!(
                        "failed to open in-memory store: {err}"
                    ))
                })?;
                (connection, None)
            }
        };

        ensure_schema(&connection)?;
        debug!(location = ?location, "vector store opened");
        Ok(Self {
            connection,
            location,
        })
    }

    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    /// Idempotent open: an existing collection of that name is returned as
    /// [`CollectionOpen::Existing`], never as an error.
    pub fn get_or_create(&self, name: &str) -> Result<CollectionOpen<'_>> {
        let name = validate_name(name)?;
        let now = now_utc_string();
        let inserted = self.connection.execute(
            "
            INSERT INTO collections(name, created_at, updated_at)
            VALUES(?1, ?2, ?2)
            ON CONFLICT(name) DO NOTHING
            ",
            params![name, now],
        )?;

        let collection = Collection {
            store: self,
            name: name.to_string(),
        };
        if inserted == 1 {
            info!(collection = %name, "collection created");
            Ok(CollectionOpen::Created(collection))
        } else {
            Ok(CollectionOpen::Existing(collection))
        }
    }

    pub fn get(&self, name: &str) -> Result<Collection<'_>> {
        let name = validate_name(name)?;
        let exists = self
            .connection
            .query_row(
                "SELECT 1 FROM collections WHERE name = ?1 LIMIT 1",
                [name],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .is_some();

        if !exists {
            return Err(PipelineError::CollectionUnavailable(format!(
                "collection '{name}' does not exist"
            )));
        }

        Ok(Collection {
            store: self,
            name: name.to_string(),
        })
    }

    pub fn list(&self) -> Result<Vec<CollectionInfo>> {
        let mut statement = self
            .connection
            .prepare("SELECT name FROM collections ORDER BY name ASC")?;
        let names = statement
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;

        names
            .iter()
            .map(|name| {
                Collection {
                    store: self,
                    name: name.clone(),
                }
                .info()
            })
            .collect()
    }
}

impl Collection<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimension(&self) -> Result<Option<usize>> {
        let dimension = self.store.connection.query_row(
            "SELECT dimension FROM collections WHERE name = ?1",
            [&self.name],
            |row| row.get::<_, Option<i64>>(0),
        )?;
        Ok(dimension.map(|value| value as usize))
    }

    /// Inserts or overwrites entries. Either every entry is written or none.
    pub fn upsert(&self, ids: &[String], vectors: &[Vec<f32>]) -> Result<()> {
        self.write_entries(ids, vectors, false)
    }

    /// Like [`upsert`](Self::upsert), but entries whose id is not in `ids`
    /// are deleted in the same transaction, so the collection holds exactly
    /// the given entries afterwards.
    pub fn replace_all(&self, ids: &[String], vectors: &[Vec<f32>]) -> Result<()> {
        self.write_entries(ids, vectors, true)
    }

    fn write_entries(&self, ids: &[String], vectors: &[Vec<f32>], prune: bool) -> Result<()> {
        if ids.len() != vectors.len() {
            return Err(PipelineError::LengthMismatch {
                ids: ids.len(),
                vectors: vectors.len(),
            });
        }
        let Some(first) = vectors.first() else {
            return Ok(());
        };

        let expected = self.dimension()?.unwrap_or(first.len());
        if let Some(bad) = vectors.iter().find(|vector| vector.len() != expected) {
            return Err(PipelineError::DimensionMismatch {
                expected,
                actual: bad.len(),
            });
        }

        let now = now_utc_string();
        let tx = self.store.connection.unchecked_transaction()?;
        tx.execute(
            "
            UPDATE collections
            SET dimension = COALESCE(dimension, ?2), updated_at = ?3
            WHERE name = ?1
            ",
            params![self.name, expected as i64, now],
        )?;

        let mut pruned = 0;
        if prune {
            let keep = ids.iter().map(String::as_str).collect::<HashSet<&str>>();
            let existing = {
                let mut statement = tx.prepare("SELECT id FROM entries WHERE collection = ?1")?;
                statement
                    .query_map([&self.name], |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<Vec<String>, _>>()?
            };
            let mut statement =
                tx.prepare("DELETE FROM entries WHERE collection = ?1 AND id = ?2")?;
            for stale in existing.iter().filter(|id| !keep.contains(id.as_str())) {
                pruned += statement.execute(params![self.name, stale])?;
            }
        }

        {
            let mut statement = tx.prepare(
                "
                INSERT INTO entries(collection, id, embedding, embedding_dim, updated_at)
                VALUES(?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(collection, id) DO UPDATE SET
                  embedding=excluded.embedding,
                  embedding_dim=excluded.embedding_dim,
                  updated_at=excluded.updated_at
                ",
            )?;
            for (id, vector) in ids.iter().zip(vectors) {
                statement.execute(params![
                    self.name,
                    id,
                    encode_embedding_blob(vector),
                    expected as i64,
                    now,
                ])?;
            }
        }
        tx.commit()?;

        debug!(
            collection = %self.name,
            entries = ids.len(),
            pruned,
            dimension = expected,
            "entries committed"
        );
        Ok(())
    }

    /// Nearest ids per query vector, best first, at most `top_k` each.
    pub fn query(&self, vectors: &[Vec<f32>], top_k: usize) -> Result<Vec<Vec<String>>> {
        let Some(dimension) = self.dimension()? else {
            return Ok(vec![Vec::new(); vectors.len()]);
        };
        if let Some(bad) = vectors.iter().find(|vector| vector.len() != dimension) {
            return Err(PipelineError::DimensionMismatch {
                expected: dimension,
                actual: bad.len(),
            });
        }

        let entries = self.load_entries(dimension)?;
        let results = vectors
            .iter()
            .map(|query| rank_entries(query, &entries, top_k))
            .collect();
        Ok(results)
    }

    pub fn set_source(
        &self,
        source_path: &Path,
        source_sha256: &str,
        label: &str,
        page_count: u32,
        dpi: u32,
    ) -> Result<()> {
        self.store.connection.execute(
            "
            UPDATE collections
            SET source_path = ?2, source_sha256 = ?3, label = ?4, page_count = ?5, dpi = ?6,
                updated_at = ?7
            WHERE name = ?1
            ",
            params![
                self.name,
                source_path.display().to_string(),
                source_sha256,
                label,
                i64::from(page_count),
                i64::from(dpi),
                now_utc_string(),
            ],
        )?;
        Ok(())
    }

    pub fn info(&self) -> Result<CollectionInfo> {
        let info = self.store.connection.query_row(
            "
            SELECT
              c.name,
              c.dimension,
              c.source_path,
              c.source_sha256,
              c.label,
              c.page_count,
              c.dpi,
              (SELECT COUNT(*) FROM entries e WHERE e.collection = c.name),
              c.created_at,
              c.updated_at
            FROM collections c
            WHERE c.name = ?1
            ",
            [&self.name],
            |row| {
                Ok(CollectionInfo {
                    name: row.get(0)?,
                    dimension: row.get::<_, Option<i64>>(1)?.map(|value| value as usize),
                    source_path: row.get(2)?,
                    source_sha256: row.get(3)?,
                    label: row.get(4)?,
                    page_count: row.get::<_, Option<i64>>(5)?.map(|value| value as u32),
                    dpi: row.get::<_, Option<i64>>(6)?.map(|value| value as u32),
                    entry_count: row.get::<_, i64>(7)? as usize,
                    created_at: row.get(8)?,
                    updated_at: row.get(9)?,
                })
            },
        )?;
        Ok(info)
    }

    fn load_entries(&self, dimension: usize) -> Result<Vec<(String, Vec<f32>)>> {
        let mut statement = self.store.connection.prepare(
            "
            SELECT id, embedding
            FROM entries
            WHERE collection = ?1 AND embedding_dim = ?2
            ",
        )?;
        let mut rows = statement.query(params![self.name, dimension as i64])?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let blob = row.get::<_, Vec<u8>>(1)?;
            let Some(vector) = decode_embedding_blob(&blob, dimension) else {
                continue;
            };
            out.push((row.get::<_, String>(0)?, vector));
        }
        Ok(out)
    }
}

fn rank_entries(query: &[f32], entries: &[(String, Vec<f32>)], top_k: usize) -> Vec<String> {
    let mut scored = entries
        .iter()
        .map(|(id, vector)| (cosine_similarity(query, vector), id))
        .collect::<Vec<(f64, &String)>>();

    scored.sort_by(|left, right| {
        right
            .0
            .partial_cmp(&left.0)
            .unwrap_or(Ordering::Equal)
            .then_with(|| left.1.cmp(right.1))
    });

    scored
        .into_iter()
        .take(top_k)
        .map(|(_, id)| id.clone())
        .collect()
}

fn validate_name(name: &str) -> Result<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::CollectionUnavailable(
            "collection name is required".to_string(),
        ));
    }
    Ok(trimmed)
}

fn configure_connection(connection: &Connection) -> Result<()> {
    connection.pragma_update(None, "journal_mode", "WAL")?;
    connection.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(())
}

fn ensure_schema(connection: &Connection) -> Result<()> {
    connection.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS collections (
          name TEXT PRIMARY KEY,
          dimension INTEGER,
          source_path TEXT,
          source_sha256 TEXT,
          label TEXT,
          page_count INTEGER,
          dpi INTEGER,
          created_at TEXT NOT NULL,
          updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS entries (
          collection TEXT NOT NULL,
          id TEXT NOT NULL,
          embedding BLOB NOT NULL,
          embedding_dim INTEGER NOT NULL,
          updated_at TEXT NOT NULL,
          PRIMARY KEY(collection, id),
          FOREIGN KEY(collection) REFERENCES collections(name)
        );
        ",
    )?;
    ensure_column_exists(connection, "collections", "dpi INTEGER")?;
    Ok(())
}

/// Adds a column to stores created before it existed.
fn ensure_column_exists(
    connection: &Connection,
    table_name: &str,
    column_definition: &str,
) -> Result<()> {
    let column_name = column_definition
        .split_whitespace()
        .next()
        .unwrap_or(column_definition);

    let mut statement = connection.prepare(&format!("PRAGMA table_info({table_name})"))?;
    let mut rows = statement.query([])?;
    while let Some(row) = rows.next()? {
        if row.get::<_, String>(1)? == column_name {
            return Ok(());
        }
    }

    connection.execute(
        &format!("ALTER TABLE {table_name} ADD COLUMN {column_definition}"),
        [],
    )?;
    debug!(table = table_name, column = column_name, "schema column added");
    Ok(())
}

/// Cosine similarity; zero when either side has no magnitude.
pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f64;
    let mut left_norm = 0.0_f64;
    let mut right_norm = 0.0_f64;
    for (left_value, right_value) in left.iter().zip(right) {
        let (l, r) = (f64::from(*left_value), f64::from(*right_value));
        dot += l * r;
        left_norm += l * l;
        right_norm += r * r;
    }

    if left_norm <= 0.0 || right_norm <= 0.0 {
        return 0.0;
    }
    dot / (left_norm.sqrt() * right_norm.sqrt())
}

pub fn encode_embedding_blob(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::<u8>::with_capacity(values.len() * 4);
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

pub fn decode_embedding_blob(blob: &[u8], expected_dim: usize) -> Option<Vec<f32>> {
    if expected_dim == 0 || blob.len() != expected_dim.saturating_mul(4) {
        return None;
    }

    Some(
        blob.chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let store = VectorStore::open(None).expect("open");
        assert!(store.get_or_create("pdf_pages").expect("create").was_created());
        assert!(!store.get_or_create("pdf_pages").expect("reopen").was_created());
        assert_eq!(store.list().expect("list").len(), 1);
    }

    #[test]
    fn get_missing_collection_is_unavailable() {
        let store = VectorStore::open(None).expect("open");
        let err = store.get("nope").err().expect("missing");
        assert!(matches!(err, PipelineError::CollectionUnavailable(_)));
    }

    #[test]
    fn query_returns_nearest_first() {
        let store = VectorStore::open(None).expect("open");
        let collection = store.get_or_create("pages").expect("create").into_collection();
        collection
            .upsert(
                &ids(&["0", "1", "2"]),
                &[vec![1.0, 0.0], vec![0.7, 0.7], vec![0.0, 1.0]],
            )
            .expect("upsert");

        let results = collection
            .query(&[vec![0.0, 2.0], vec![1.0, 0.1]], 2)
            .expect("query");
        assert_eq!(results, vec![ids(&["2", "1"]), ids(&["0", "1"])]);
    }

    #[test]
    fn top_k_larger_than_collection_returns_everything() {
        let store = VectorStore::open(None).expect("open");
        let collection = store.get_or_create("pages").expect("create").into_collection();
        collection
            .upsert(&ids(&["0", "1"]), &[vec![1.0, 0.0], vec![0.0, 1.0]])
            .expect("upsert");

        let results = collection.query(&[vec![1.0, 0.0]], 10).expect("query");
        assert_eq!(results[0].len(), 2);
    }

    #[test]
    fn self_match_is_top_result() {
        let store = VectorStore::open(None).expect("open");
        let collection = store.get_or_create("pages").expect("create").into_collection();
        let vectors = vec![
            vec![0.3, 0.1, 0.9],
            vec![0.2, 0.8, 0.1],
            vec![0.9, 0.3, 0.2],
            vec![0.4, 0.4, 0.4],
            vec![0.1, 0.9, 0.7],
            vec![0.5, 0.2, 0.6],
        ];
        let page_ids = (0..vectors.len()).map(|index| index.to_string()).collect::<Vec<String>>();
        collection.upsert(&page_ids, &vectors).expect("upsert");

        let results = collection.query(&[vectors[5].clone()], 3).expect("query");
        assert_eq!(results[0][0], "5");
    }

    #[test]
    fn upserting_twice_matches_upserting_once() {
        let store = VectorStore::open(None).expect("open");
        let collection = store.get_or_create("pages").expect("create").into_collection();
        let entry_ids = ids(&["0", "1"]);
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0]];

        collection.upsert(&entry_ids, &vectors).expect("first");
        let once = collection.query(&vectors, 2).expect("query");
        collection.upsert(&entry_ids, &vectors).expect("second");

        assert_eq!(collection.info().expect("info").entry_count, 2);
        assert_eq!(collection.query(&vectors, 2).expect("query"), once);
    }

    #[test]
    fn reupsert_overwrites_vector() {
        let store = VectorStore::open(None).expect("open");
        let collection = store.get_or_create("pages").expect("create").into_collection();
        collection
            .upsert(&ids(&["0", "1"]), &[vec![1.0, 0.0], vec![0.0, 1.0]])
            .expect("upsert");
        collection
            .upsert(&ids(&["0"]), &[vec![0.0, 1.0]])
            .expect("overwrite");

        let results = collection.query(&[vec![0.0, 1.0]], 2).expect("query");
        assert_eq!(results[0], ids(&["0", "1"]));
    }

    #[test]
    fn dimension_mismatch_writes_nothing() {
        let store = VectorStore::open(None).expect("open");
        let collection = store.get_or_create("pages").expect("create").into_collection();
        collection
            .upsert(&ids(&["0"]), &[vec![1.0, 0.0, 0.0]])
            .expect("upsert");

        let err = collection
            .upsert(&ids(&["1", "2"]), &[vec![1.0, 0.0, 0.0], vec![1.0, 0.0]])
            .expect_err("mismatch");
        assert!(matches!(
            err,
            PipelineError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
        assert_eq!(collection.info().expect("info").entry_count, 1);

        let err = collection.query(&[vec![1.0]], 1).expect_err("query mismatch");
        assert!(matches!(err, PipelineError::DimensionMismatch { .. }));
    }

    #[test]
    fn upsert_requires_one_vector_per_id() {
        let store = VectorStore::open(None).expect("open");
        let collection = store.get_or_create("pages").expect("create").into_collection();
        let err = collection
            .upsert(&ids(&["0", "1"]), &[vec![1.0]])
            .expect_err("length mismatch");
        assert!(matches!(err, PipelineError::LengthMismatch { ids: 2, vectors: 1 }));
    }

    #[test]
    fn empty_collection_query_returns_empty_lists() {
        let store = VectorStore::open(None).expect("open");
        let collection = store.get_or_create("pages").expect("create").into_collection();
        let results = collection.query(&[vec![1.0], vec![2.0]], 5).expect("query");
        assert_eq!(results, vec![Vec::<String>::new(), Vec::new()]);
    }

    #[test]
    fn persisted_collection_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = VectorStore::open(Some(dir.path())).expect("open");
            let collection = store.get_or_create("pdf_pages").expect("create").into_collection();
            collection
                .upsert(&ids(&["0", "1"]), &[vec![1.0, 0.0], vec![0.0, 1.0]])
                .expect("upsert");
            collection
                .set_source(Path::new("/books/strom.pdf"), "abc123", "strom.pdf", 2, 150)
                .expect("source");
        }

        let store = VectorStore::open(Some(dir.path())).expect("reopen");
        assert!(dir.path().join(STORE_FILE_NAME).exists());
        let info = store.get("pdf_pages").expect("get").info().expect("info");
        assert_eq!(info.entry_count, 2);
        assert_eq!(info.dimension, Some(2));
        assert_eq!(info.page_count, Some(2));
        assert_eq!(info.label.as_deref(), Some("strom.pdf"));
        assert_eq!(info.dpi, Some(150));
    }

    #[test]
    fn replace_all_drops_entries_missing_from_the_new_set() {
        let store = VectorStore::open(None).expect("open");
        let collection = store.get_or_create("pages").expect("create").into_collection();
        collection
            .upsert(
                &ids(&["0", "1", "2"]),
                &[vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]],
            )
            .expect("upsert");

        collection
            .replace_all(&ids(&["0"]), &[vec![0.5, 0.5]])
            .expect("replace");

        assert_eq!(collection.info().expect("info").entry_count, 1);
        let results = collection.query(&[vec![0.0, 1.0]], 5).expect("query");
        assert_eq!(results[0], ids(&["0"]));
    }

    #[test]
    fn rejected_replace_keeps_previous_entries() {
        let store = VectorStore::open(None).expect("open");
        let collection = store.get_or_create("pages").expect("create").into_collection();
        collection
            .upsert(&ids(&["0", "1"]), &[vec![1.0, 0.0], vec![0.0, 1.0]])
            .expect("upsert");

        let err = collection
            .replace_all(&ids(&["0"]), &[vec![1.0, 0.0, 0.0]])
            .expect_err("mismatch");
        assert!(matches!(err, PipelineError::DimensionMismatch { .. }));
        assert_eq!(collection.info().expect("info").entry_count, 2);
    }

    #[test]
    fn stores_without_dpi_column_are_migrated() {
        let connection = Connection::open_in_memory().expect("open");
        connection
            .execute_batch(
                "CREATE TABLE collections (
                   name TEXT PRIMARY KEY, dimension INTEGER, source_path TEXT,
                   source_sha256 TEXT, label TEXT, page_count INTEGER,
                   created_at TEXT NOT NULL, updated_at TEXT NOT NULL
                 );",
            )
            .expect("legacy schema");

        ensure_schema(&connection).expect("migrate");
        ensure_schema(&connection).expect("idempotent");
        let columns = connection
            .prepare("PRAGMA table_info(collections)")
            .expect("prepare")
            .query_map([], |row| row.get::<_, String>(1))
            .expect("query")
            .collect::<std::result::Result<Vec<String>, _>>()
            .expect("columns");
        assert!(columns.iter().any(|column| column == "dpi"));
    }

    #[test]
    fn embedding_blob_round_trips() {
        let values = vec![0.25_f32, -1.5, 3.0];
        let blob = encode_embedding_blob(&values);
        assert_eq!(decode_embedding_blob(&blob, 3), Some(values));
        assert_eq!(decode_embedding_blob(&blob, 2), None);
    }

    #[test]
    fn cosine_similarity_handles_zero_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[2.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
    }
}
