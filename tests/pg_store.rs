//! Runs against a live Postgres with pgvector when `DATABASE_URL` is set.

use std::time::{SystemTime, UNIX_EPOCH};

use defsearch::DefectError;
use defsearch::store::{NewTile, PgStore, VectorStore};
use ndarray::array;

fn database_url() -> Option<String> {
    let url = std::env::var("DATABASE_URL").ok();
    if url.is_none() {
        eprintln!("DATABASE_URL is not set, skipping");
    }
    url
}

fn table_name(prefix: &str) -> String {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);
    format!("{}_{}_{}", prefix, std::process::id(), nanos)
}

fn tile(defect_type: &str, file: &str, coord: (u32, u32)) -> NewTile {
    NewTile { defect_type: defect_type.into(), source_filename: file.into(), coord }
}

#[tokio::test]
async fn test_add_and_search() {
    let Some(url) = database_url() else { return };
    let table = table_name("defsearch_test");

    let mut store = PgStore::connect(&url, &table, 3).await.unwrap();
    assert_eq!(store.count().await.unwrap(), 0);

    let ids = store
        .add(
            array![[0.0, 0.0, 0.0], [3.0, 4.0, 0.0], [0.0, 0.0, 1.0]].view(),
            vec![
                tile("crack", "a.png", (0, 0)),
                tile("scratch", "b.png", (259, 0)),
                tile("crack", "c.png", (0, 259)),
            ],
        )
        .await
        .unwrap();
    assert_eq!(ids.len(), 3);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));

    let results = store.search(array![[0.0, 0.0, 0.0]].view(), 2).await.unwrap();
    let hits = &results[0];
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].record.source_filename, "a.png");
    assert_eq!(hits[0].distance, 0.0);
    assert_eq!(hits[1].record.source_filename, "c.png");
    assert!((hits[1].distance - 1.0).abs() < 1e-6);

    let far = store.search(array![[3.0, 4.0, 0.0]].view(), 10).await.unwrap();
    assert_eq!(far[0].len(), 3);
    assert_eq!(far[0][0].record.coord, (259, 0));
    assert!((far[0][2].distance - 5.0).abs() < 1e-6);

    let reopened = PgStore::open(&url, &table).await.unwrap();
    assert_eq!(reopened.dimension(), 3);
    assert_eq!(reopened.records(1).await.unwrap()[0].defect_type, "crack");
}

#[tokio::test]
async fn test_dimension_checked() {
    let Some(url) = database_url() else { return };
    let table = table_name("defsearch_dim");

    PgStore::connect(&url, &table, 4).await.unwrap();
    let result = PgStore::connect(&url, &table, 8).await;
    assert!(matches!(result, Err(DefectError::DimensionMismatch { expected: 4, actual: 8 })));
}

#[tokio::test]
async fn test_missing_table() {
    let Some(url) = database_url() else { return };
    let result = PgStore::open(&url, &table_name("defsearch_missing")).await;
    assert!(matches!(result, Err(DefectError::StoreUnavailable(_))));
}

async fn create_table(url: &str, table: &str, embedding: &str) {
    let pool = sqlx::PgPool::connect(url).await.unwrap();
    sqlx::query("CREATE EXTENSION IF NOT EXISTS vector").execute(&pool).await.unwrap();
    let ddl = format!(
        "CREATE TABLE \"{}\" (id BIGSERIAL PRIMARY KEY, filename TEXT NOT NULL, \
         defect_type TEXT NOT NULL, embedding {} NOT NULL)",
        table, embedding
    );
    sqlx::query(&ddl).execute(&pool).await.unwrap();
}

#[tokio::test]
async fn test_table_without_tile_columns() {
    let Some(url) = database_url() else { return };
    let table = table_name("defsearch_plain");
    create_table(&url, &table, "vector(2)").await;

    let pool = sqlx::PgPool::connect(&url).await.unwrap();
    let insert = format!(
        "INSERT INTO \"{}\" (filename, defect_type, embedding) VALUES ('old.png', 'dent', '[1,1]')",
        table
    );
    sqlx::query(&insert).execute(&pool).await.unwrap();

    let reopened = PgStore::open(&url, &table).await.unwrap();
    let records = reopened.records(5).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].source_filename, "old.png");
    assert_eq!(records[0].coord, (0, 0));

    let mut store = PgStore::connect(&url, &table, 2).await.unwrap();
    store.add(array![[0.0, 0.0]].view(), vec![tile("crack", "new.png", (518, 259))]).await.unwrap();
    let results = store.search(array![[0.0, 0.0]].view(), 2).await.unwrap();
    assert_eq!(results[0][0].record.coord, (518, 259));
    assert_eq!(results[0][1].record.defect_type, "dent");
}

#[tokio::test]
async fn test_embedding_without_dimension() {
    let Some(url) = database_url() else { return };
    let table = table_name("defsearch_nodim");
    create_table(&url, &table, "vector").await;

    let result = PgStore::open(&url, &table).await;
    assert!(matches!(result, Err(DefectError::StoreUnavailable(_))));
    let result = PgStore::connect(&url, &table, 3).await;
    assert!(matches!(result, Err(DefectError::StoreUnavailable(_))));
}
