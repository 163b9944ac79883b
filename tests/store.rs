use std::sync::Arc;

use tempfile::TempDir;

use sql_stress::db::policy::ConnectionPolicy;
use sql_stress::db::{Driver, FromRow, Store, Value};
use sql_stress::error::StorageError;
use sql_stress::shutdown::Shutdown;
use sql_stress::workload::Article;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS articles (
    article_id INTEGER PRIMARY KEY,
    title TEXT,
    content TEXT,
    pub_date TEXT,
    author_id INTEGER
);
CREATE INDEX IF NOT EXISTS idx_articles_author_id ON articles (author_id);";

const INSERT: &str =
    "INSERT INTO articles (title, content, pub_date, author_id) VALUES (?1, ?2, ?3, ?4)";
const LOOKUP: &str = "SELECT article_id, title, content, pub_date, author_id \
     FROM articles WHERE article_id = ?1";
const BY_AUTHOR: &str = "SELECT article_id, title, content, pub_date, author_id \
     FROM articles WHERE author_id = ?1 ORDER BY article_id";

struct CounterValue(i64);

impl FromRow for CounterValue {
    fn from_row(row: &[Value]) -> Result<Self, StorageError> {
        match row {
            [n] => Ok(CounterValue(n.as_i64()?)),
            _ => Err(StorageError::Decode("expected one counter column".into())),
        }
    }
}

fn article(title: &str, author_id: i64) -> Article {
    Article {
        id: 0,
        title: title.to_owned(),
        content: "content".to_owned(),
        pub_date: "2024-03-01 10:00:00".to_owned(),
        author_id,
    }
}

fn params(article: &Article) -> [Value; 4] {
    [
        Value::from(article.title.as_str()),
        Value::from(article.content.as_str()),
        Value::from(article.pub_date.as_str()),
        Value::Integer(article.author_id),
    ]
}

async fn open_store(driver: Driver, dir: &TempDir, policy: &ConnectionPolicy) -> Store {
    let setup = Shutdown::new();
    let location = dir.path().join("test.db");
    let store = Store::open(driver, &location.to_string_lossy(), policy)
        .await
        .unwrap();
    store.execute_batch(&setup, SCHEMA).await.unwrap();
    store
}

async fn roundtrip_case(driver: Driver) {
    let dir = TempDir::new().unwrap();
    let store = open_store(driver, &dir, &ConnectionPolicy::default()).await;
    let signal = Shutdown::new();

    let original = article("first title", 7);
    let affected = store.execute(&signal, INSERT, &params(&original)).await.unwrap();
    assert_eq!(affected, 1);

    let fetched: Article = store
        .query_one(&signal, LOOKUP, &[Value::Integer(1)])
        .await
        .unwrap();
    assert_eq!(fetched.id, 1);
    assert_eq!(fetched.title, original.title);
    assert_eq!(fetched.author_id, original.author_id);

    // A key that matches nothing is NotFound, not a driver failure.
    let missing = store
        .query_one::<Article>(&signal, LOOKUP, &[Value::Integer(999)])
        .await
        .unwrap_err();
    assert!(missing.is_not_found());
}

async fn query_many_case(driver: Driver) {
    let dir = TempDir::new().unwrap();
    let store = open_store(driver, &dir, &ConnectionPolicy::default()).await;
    let signal = Shutdown::new();

    for title in ["a", "b", "c"] {
        store
            .execute(&signal, INSERT, &params(&article(title, 7)))
            .await
            .unwrap();
    }
    store
        .execute(&signal, INSERT, &params(&article("d", 8)))
        .await
        .unwrap();

    let by_author: Vec<Article> = store
        .query_many(&signal, BY_AUTHOR, &[Value::Integer(7)])
        .await
        .unwrap();
    assert_eq!(by_author.len(), 3);
    assert!(by_author.iter().all(|a| a.author_id == 7));

    let none: Vec<Article> = store
        .query_many(&signal, BY_AUTHOR, &[Value::Integer(99)])
        .await
        .unwrap();
    assert!(none.is_empty());
}

async fn cancelled_signal_case(driver: Driver) {
    let dir = TempDir::new().unwrap();
    let store = open_store(driver, &dir, &ConnectionPolicy::default()).await;

    let fired = Shutdown::new();
    fired.fire();

    let write = store
        .execute(&fired, INSERT, &params(&article("late", 1)))
        .await
        .unwrap_err();
    assert!(write.is_cancelled());

    let read = store
        .query_one::<Article>(&fired, LOOKUP, &[Value::Integer(1)])
        .await
        .unwrap_err();
    assert!(read.is_cancelled());
}

// Eight workers doing real increments through one serialized store must not
// lose a single update: the stored value equals the number of successful
// write operations.
async fn serialized_counter_case(driver: Driver) {
    const WORKERS: usize = 8;
    const INCREMENTS: usize = 50;

    let dir = TempDir::new().unwrap();
    let policy = ConnectionPolicy {
        serialize_access: true,
        ..Default::default()
    };
    let store = Arc::new(open_store(driver, &dir, &policy).await);
    let signal = Arc::new(Shutdown::new());

    store
        .execute_batch(
            &signal,
            "CREATE TABLE counters (id INTEGER PRIMARY KEY, n INTEGER);
             INSERT INTO counters (id, n) VALUES (1, 0);",
        )
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..WORKERS {
        let store = Arc::clone(&store);
        let signal = Arc::clone(&signal);
        handles.push(tokio::spawn(async move {
            let mut successes = 0u64;
            for _ in 0..INCREMENTS {
                if store
                    .execute(&signal, "UPDATE counters SET n = n + 1 WHERE id = 1", &[])
                    .await
                    .is_ok()
                {
                    successes += 1;
                }
            }
            successes
        }));
    }

    let mut successes = 0u64;
    for handle in handles {
        successes += handle.await.unwrap();
    }

    let CounterValue(stored) = store
        .query_one(&signal, "SELECT n FROM counters WHERE id = 1", &[])
        .await
        .unwrap();
    assert_eq!(stored as u64, successes);
    assert_eq!(successes, (WORKERS * INCREMENTS) as u64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_roundtrip() {
    roundtrip_case(Driver::Sqlite).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_query_many() {
    query_many_case(Driver::Sqlite).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_cancelled_signal() {
    cancelled_signal_case(Driver::Sqlite).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_serialized_counter() {
    serialized_counter_case(Driver::Sqlite).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_capped_connections() {
    let dir = TempDir::new().unwrap();
    let policy = ConnectionPolicy {
        max_connections: std::num::NonZeroUsize::new(1),
        ..Default::default()
    };
    let store = open_store(Driver::Sqlite, &dir, &policy).await;
    let signal = Shutdown::new();

    store
        .execute(&signal, INSERT, &params(&article("capped", 1)))
        .await
        .unwrap();
    let fetched: Article = store
        .query_one(&signal, LOOKUP, &[Value::Integer(1)])
        .await
        .unwrap();
    assert_eq!(fetched.title, "capped");
}

#[cfg(feature = "libsql")]
mod libsql_backend {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_libsql_roundtrip() {
        roundtrip_case(Driver::Libsql).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_libsql_query_many() {
        query_many_case(Driver::Libsql).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_libsql_cancelled_signal() {
        cancelled_signal_case(Driver::Libsql).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_libsql_serialized_counter() {
        serialized_counter_case(Driver::Libsql).await;
    }
}

#[cfg(feature = "postgres")]
mod postgres_backend {
    use super::*;

    fn dsn() -> String {
        std::env::var("SQL_STRESS_PG_DSN")
            .unwrap_or_else(|_| "postgres://bench@localhost:5432/bench".to_owned())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore = "requires a running PostgreSQL server"]
    async fn test_postgres_roundtrip() {
        let signal = Shutdown::new();
        let store = Store::open(Driver::Postgres, &dsn(), &ConnectionPolicy::default())
            .await
            .unwrap();
        store
            .execute_batch(
                &signal,
                "DROP TABLE IF EXISTS articles;
                 CREATE TABLE articles (
                     article_id BIGSERIAL PRIMARY KEY,
                     title TEXT,
                     content TEXT,
                     pub_date TEXT,
                     author_id BIGINT
                 );",
            )
            .await
            .unwrap();

        let original = article("pg title", 3);
        store
            .execute(
                &signal,
                "INSERT INTO articles (title, content, pub_date, author_id) \
                 VALUES ($1, $2, $3, $4)",
                &params(&original),
            )
            .await
            .unwrap();

        let fetched: Article = store
            .query_one(
                &signal,
                "SELECT article_id, title, content, pub_date, author_id \
                 FROM articles WHERE article_id = $1",
                &[Value::Integer(1)],
            )
            .await
            .unwrap();
        assert_eq!(fetched.title, original.title);

        let missing = store
            .query_one::<Article>(
                &signal,
                "SELECT article_id, title, content, pub_date, author_id \
                 FROM articles WHERE article_id = $1",
                &[Value::Integer(999)],
            )
            .await
            .unwrap_err();
        assert!(missing.is_not_found());
    }
}
