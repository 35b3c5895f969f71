use log::{debug, info};
use ndarray::ArrayView2;
use pgvector::Vector;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use super::{NewTile, Neighbor, TileRecord, VectorStore, check_batch, check_queries};
use crate::error::{DefectError, Result};

/// Persistent backend: one pgvector table where every row holds its own
/// embedding and metadata, and ids come from the database.
pub struct PgStore {
    pool: PgPool,
    table: String,
    dimension: usize,
}

impl PgStore {
    /// Connect and create the extension and table when missing.
    pub async fn connect(url: &str, table: &str, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(DefectError::InvalidInput("embedding dimension must be positive".into()));
        }
        let pool = connect_pool(url).await?;
        let table = quote_ident(table);

        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector").execute(&pool).await?;
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id BIGSERIAL PRIMARY KEY,
                filename TEXT NOT NULL,
                defect_type TEXT NOT NULL,
                tile_x INTEGER NOT NULL DEFAULT 0,
                tile_y INTEGER NOT NULL DEFAULT 0,
                embedding VECTOR({dimension}) NOT NULL
            )",
            table
        );
        sqlx::query(&ddl).execute(&pool).await?;
        add_tile_columns(&pool, &table).await?;

        let existing = table_dimension(&pool, &table)
            .await?
            .ok_or_else(|| DefectError::StoreUnavailable(format!("table {} does not exist", table)))?;
        if existing != dimension {
            return Err(DefectError::DimensionMismatch { expected: existing, actual: dimension });
        }

        info!("connected to {} ({}-d)", table, dimension);
        Ok(Self { pool, table, dimension })
    }

    /// Connect to an existing table, taking the dimension from its schema.
    /// Tables without tile coordinates gain them, with every row at `(0, 0)`.
    pub async fn open(url: &str, table: &str) -> Result<Self> {
        let pool = connect_pool(url).await?;
        let table = quote_ident(table);
        let dimension = table_dimension(&pool, &table)
            .await?
            .ok_or_else(|| DefectError::StoreUnavailable(format!("table {} does not exist", table)))?;
        add_tile_columns(&pool, &table).await?;
        Ok(Self { pool, table, dimension })
    }
}

impl VectorStore for PgStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn count(&self) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table);
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count as u64)
    }

    async fn add(&mut self, vectors: ArrayView2<'_, f32>, tiles: Vec<NewTile>) -> Result<Vec<u64>> {
        check_batch(self.dimension, &vectors, tiles.len())?;

        let sql = format!(
            "INSERT INTO {} (filename, defect_type, tile_x, tile_y, embedding) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
            self.table
        );

        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(tiles.len());
        for (i, tile) in tiles.iter().enumerate() {
            let embedding = Vector::from(vectors.row(i).to_vec());
            let id: i64 = sqlx::query_scalar(&sql)
                .bind(&tile.source_filename)
                .bind(&tile.defect_type)
                .bind(tile.coord.0 as i32)
                .bind(tile.coord.1 as i32)
                .bind(embedding)
                .fetch_one(&mut *tx)
                .await?;
            ids.push(id as u64);
        }
        tx.commit().await?;

        debug!("inserted {} rows into {}", ids.len(), self.table);
        Ok(ids)
    }

    async fn search(&self, queries: ArrayView2<'_, f32>, k: usize) -> Result<Vec<Vec<Neighbor>>> {
        check_queries(self.dimension, &queries)?;

        let sql = format!(
            "SELECT id, filename, defect_type, tile_x, tile_y, \
                    (embedding <-> $1)::real AS distance \
             FROM {} ORDER BY embedding <-> $1, id LIMIT $2",
            self.table
        );

        let mut results = Vec::with_capacity(queries.nrows());
        for i in 0..queries.nrows() {
            if k == 0 {
                results.push(vec![]);
                continue;
            }
            let query = Vector::from(queries.row(i).to_vec());
            let rows = sqlx::query(&sql).bind(query).bind(k as i64).fetch_all(&self.pool).await?;
            let neighbors = rows
                .iter()
                .map(|row| {
                    Ok(Neighbor { record: to_record(row)?, distance: row.try_get("distance")? })
                })
                .collect::<Result<Vec<_>>>()?;
            results.push(neighbors);
        }
        Ok(results)
    }

    async fn records(&self, limit: usize) -> Result<Vec<TileRecord>> {
        let sql = format!(
            "SELECT id, filename, defect_type, tile_x, tile_y FROM {} ORDER BY id ASC LIMIT $1",
            self.table
        );
        let rows = sqlx::query(&sql).bind(limit as i64).fetch_all(&self.pool).await?;
        rows.iter().map(to_record).collect()
    }
}

async fn connect_pool(url: &str) -> Result<PgPool> {
    info!("connecting to postgres");
    PgPoolOptions::new()
        .max_connections(2)
        .connect(url)
        .await
        .map_err(|e| DefectError::StoreUnavailable(e.to_string()))
}

/// Tables created with only `id, filename, defect_type, embedding` lack the
/// tile corner columns.
async fn add_tile_columns(pool: &PgPool, table: &str) -> Result<()> {
    for column in ["tile_x", "tile_y"] {
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} INTEGER NOT NULL DEFAULT 0",
            table, column
        );
        sqlx::query(&sql).execute(pool).await?;
    }
    Ok(())
}

/// Declared dimension of the `embedding` column, `None` if the table is missing
async fn table_dimension(pool: &PgPool, table: &str) -> Result<Option<usize>> {
    let typmod: Option<i32> = sqlx::query_scalar(
        "SELECT atttypmod FROM pg_attribute \
         WHERE attrelid = to_regclass($1) AND attname = 'embedding'",
    )
    .bind(table)
    .fetch_optional(pool)
    .await?;
    typmod.map(|n| declared_dimension(table, n)).transpose()
}

/// `atttypmod` holds the dimension of `vector(D)` and is `-1` for a bare `vector`.
fn declared_dimension(table: &str, typmod: i32) -> Result<usize> {
    usize::try_from(typmod).ok().filter(|&d| d > 0).ok_or_else(|| {
        DefectError::StoreUnavailable(format!("embedding column of {} has no dimension", table))
    })
}

fn to_record(row: &PgRow) -> Result<TileRecord> {
    let id: i64 = row.try_get("id")?;
    let tile_x: i32 = row.try_get("tile_x")?;
    let tile_y: i32 = row.try_get("tile_y")?;
    Ok(TileRecord {
        id: id as u64,
        defect_type: row.try_get("defect_type")?,
        source_filename: row.try_get("filename")?,
        coord: (tile_x as u32, tile_y as u32),
    })
}

/// Quotes a Postgres identifier, escaping embedded quotes.
fn quote_ident(input: &str) -> String {
    format!("\"{}\"", input.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_dimension() {
        assert_eq!(declared_dimension("t", 1024).unwrap(), 1024);
        assert!(matches!(declared_dimension("t", -1), Err(DefectError::StoreUnavailable(_))));
        assert!(matches!(declared_dimension("t", 0), Err(DefectError::StoreUnavailable(_))));
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("defect_images"), "\"defect_images\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
