//! sqlite-vec backed collection.
//!
//! Each collection is a row in `collections` plus an `<table>_items` table
//! (id, indexed_at) and an `<table>_vec` vec0 table. Every collection shares
//! one connection; `add` holds the connection for the whole transaction, so
//! writes to a collection never interleave.

use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use super::{embedding_to_bytes, QueryResult, VectorStore};
use crate::db::schema::{collection_ddl, table_name};
use crate::embedding::ModelName;
use crate::index::Modality;

/// `{model}_{modality}_collection`, e.g. `dinov2-small_video_collection`.
pub fn collection_name(model: ModelName, modality: Modality) -> String {
    format!("{model}_{modality}_collection")
}

/// One registered collection and its size.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub modality: String,
    pub model: String,
    pub dimensions: usize,
    pub count: usize,
}

/// Every registered collection, by name.
pub fn list_collections(conn: &Connection) -> Result<Vec<CollectionInfo>> {
    let mut stmt = conn.prepare(
        "SELECT name, table_name, modality, model, dimensions FROM collections ORDER BY name",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(name, table, modality, model, dimensions)| {
            let count: i64 = conn
                .query_row(&format!(r#"SELECT COUNT(*) FROM "{table}_items""#), [], |row| {
                    row.get(0)
                })
                .with_context(|| format!("failed to count {name}"))?;
            Ok(CollectionInfo {
                name,
                modality,
                model,
                dimensions: dimensions as usize,
                count: count as usize,
            })
        })
        .collect()
}

pub struct SqliteCollection {
    db: Arc<Mutex<Connection>>,
    name: String,
    table: String,
    modality: Modality,
    model: ModelName,
    dimensions: usize,
}

impl std::fmt::Debug for SqliteCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCollection")
            .field("name", &self.name)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl SqliteCollection {
    /// Open the collection for `model` and `modality`, creating it on first use.
    ///
    /// Fails if a collection of the same name exists with a different
    /// dimensionality.
    pub fn get_or_create(
        db: Arc<Mutex<Connection>>,
        model: ModelName,
        modality: Modality,
    ) -> Result<Self> {
        let name = collection_name(model, modality);
        let table = table_name(&name);
        let dimensions = model.dimensions();

        {
            let conn = db
                .lock()
                .map_err(|e| anyhow::anyhow!("db lock poisoned: {e}"))?;

            let existing: Option<i64> = conn
                .query_row(
                    "SELECT dimensions FROM collections WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;

            match existing {
                Some(dims) if dims as usize != dimensions => bail!(
                    "collection {name} stores {dims}-dim vectors, model {model} produces {dimensions}"
                ),
                Some(_) => {}
                None => {
                    conn.execute(
                        "INSERT INTO collections (name, table_name, modality, model, dimensions, created_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![
                            name,
                            table,
                            modality.as_str(),
                            model.as_str(),
                            dimensions as i64,
                            chrono::Utc::now().to_rfc3339(),
                        ],
                    )?;
                    tracing::info!(collection = %name, dimensions, "collection created");
                }
            }

            conn.execute_batch(&collection_ddl(&table, dimensions))
                .with_context(|| format!("failed to create tables for {name}"))?;
        }

        Ok(Self {
            db,
            name,
            table,
            modality,
            model,
            dimensions,
        })
    }

    pub fn modality(&self) -> Modality {
        self.modality
    }

    pub fn model(&self) -> ModelName {
        self.model
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }
}

impl VectorStore for SqliteCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn add(&self, ids: &[String], embeddings: &[Vec<f32>]) -> Result<usize> {
        anyhow::ensure!(
            ids.len() == embeddings.len(),
            "got {} ids but {} embeddings",
            ids.len(),
            embeddings.len()
        );
        if let Some(bad) = embeddings.iter().find(|e| e.len() != self.dimensions) {
            bail!(
                "embedding has {} dimensions, collection {} expects {}",
                bad.len(),
                self.name,
                self.dimensions
            );
        }

        let mut conn = self
            .db
            .lock()
            .map_err(|e| anyhow::anyhow!("db lock poisoned: {e}"))?;
        let tx = conn.transaction()?;
        let now = chrono::Utc::now().to_rfc3339();
        let mut inserted = 0;

        {
            let mut insert_item = tx.prepare(&format!(
                r#"INSERT OR IGNORE INTO "{}_items" (id, indexed_at) VALUES (?1, ?2)"#,
                self.table
            ))?;
            let mut insert_vec = tx.prepare(&format!(
                r#"INSERT INTO "{}_vec" (id, embedding) VALUES (?1, ?2)"#,
                self.table
            ))?;

            for (id, embedding) in ids.iter().zip(embeddings) {
                // Already indexed (e.g. by a concurrent run): keep the first write.
                if insert_item.execute(params![id, now])? == 0 {
                    continue;
                }
                insert_vec.execute(params![id, embedding_to_bytes(embedding)])?;
                inserted += 1;
            }
        }

        tx.commit()?;
        tracing::debug!(collection = %self.name, inserted, "batch written");
        Ok(inserted)
    }

    fn get(&self, limit: usize, offset: usize) -> Result<Vec<String>> {
        let conn = self
            .db
            .lock()
            .map_err(|e| anyhow::anyhow!("db lock poisoned: {e}"))?;
        let mut stmt = conn.prepare(&format!(
            r#"SELECT id FROM "{}_items" ORDER BY rowid LIMIT ?1 OFFSET ?2"#,
            self.table
        ))?;
        let ids = stmt
            .query_map(params![limit as i64, offset as i64], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    fn count(&self) -> Result<usize> {
        let conn = self
            .db
            .lock()
            .map_err(|e| anyhow::anyhow!("db lock poisoned: {e}"))?;
        let count: i64 = conn.query_row(
            &format!(r#"SELECT COUNT(*) FROM "{}_items""#, self.table),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn query(&self, embeddings: &[Vec<f32>], n_results: usize) -> Result<Vec<QueryResult>> {
        if n_results == 0 {
            return Ok(vec![QueryResult::default(); embeddings.len()]);
        }

        let conn = self
            .db
            .lock()
            .map_err(|e| anyhow::anyhow!("db lock poisoned: {e}"))?;
        let mut stmt = conn.prepare(&format!(
            r#"SELECT id, distance FROM "{}_vec" WHERE embedding MATCH ?1 AND k = ?2 ORDER BY distance"#,
            self.table
        ))?;

        let mut results = Vec::with_capacity(embeddings.len());
        for embedding in embeddings {
            anyhow::ensure!(
                embedding.len() == self.dimensions,
                "query has {} dimensions, collection {} expects {}",
                embedding.len(),
                self.name,
                self.dimensions
            );
            let rows = stmt
                .query_map(
                    params![embedding_to_bytes(embedding), n_results as i64],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)),
                )?
                .collect::<Result<Vec<_>, _>>()?;

            let (ids, distances) = rows.into_iter().map(|(id, d)| (id, d as f32)).unzip();
            results.push(QueryResult { ids, distances });
        }
        Ok(results)
    }
}
