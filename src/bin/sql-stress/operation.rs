use std::sync::Arc;

use rand::Rng;

use sql_stress::configuration::{Operation, OperationContext, OperationFactory, OperationOutcome};
use sql_stress::db::{Driver, Store, Value};
use sql_stress::error::{ConfigError, StorageError};
use sql_stress::workload::{self, Article, RngGen, SamplePool};

pub fn schema_sql(driver: Driver) -> &'static str {
    match driver {
        #[cfg(feature = "postgres")]
        Driver::Postgres => {
            "CREATE TABLE IF NOT EXISTS articles (
                article_id BIGSERIAL PRIMARY KEY,
                title TEXT,
                content TEXT,
                pub_date TEXT,
                author_id BIGINT
            );
            CREATE INDEX IF NOT EXISTS idx_articles_author_id ON articles (author_id);"
        }
        _ => {
            "CREATE TABLE IF NOT EXISTS articles (
                article_id INTEGER PRIMARY KEY,
                title TEXT,
                content TEXT,
                pub_date TEXT,
                author_id INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_articles_author_id ON articles (author_id);"
        }
    }
}

pub fn insert_sql(driver: Driver) -> &'static str {
    match driver {
        #[cfg(feature = "postgres")]
        Driver::Postgres => {
            "INSERT INTO articles (title, content, pub_date, author_id) \
             VALUES ($1, $2, $3, $4)"
        }
        _ => {
            "INSERT INTO articles (title, content, pub_date, author_id) \
             VALUES (?1, ?2, ?3, ?4)"
        }
    }
}

pub fn lookup_sql(driver: Driver) -> &'static str {
    match driver {
        #[cfg(feature = "postgres")]
        Driver::Postgres => {
            "SELECT article_id, title, content, pub_date, author_id \
             FROM articles WHERE article_id = $1"
        }
        _ => {
            "SELECT article_id, title, content, pub_date, author_id \
             FROM articles WHERE article_id = ?1"
        }
    }
}

pub fn article_params(article: &Article) -> [Value; 4] {
    [
        Value::from(article.title.as_str()),
        Value::from(article.content.as_str()),
        Value::from(article.pub_date.as_str()),
        Value::Integer(article.author_id),
    ]
}

// An interrupt at the call boundary means the run is over, not that the
// datastore failed; both measured operations treat it as benign. A lookup
// that matches nothing is likewise an expected outcome of drawing keys from
// a sparse pool. Everything else counts as an error.
fn classify_write(result: Result<u64, StorageError>) -> OperationOutcome {
    match result {
        Ok(_) | Err(StorageError::Cancelled) => OperationOutcome::Success,
        Err(err) => {
            tracing::error!(error = %err, "write failed");
            OperationOutcome::Failure
        }
    }
}

fn classify_read(result: Result<Article, StorageError>) -> OperationOutcome {
    match result {
        Ok(_) | Err(StorageError::NotFound) | Err(StorageError::Cancelled) => {
            OperationOutcome::Success
        }
        Err(err) => {
            tracing::error!(error = %err, "read failed");
            OperationOutcome::Failure
        }
    }
}

pub struct InsertOperation {
    store: Arc<Store>,
    pool: Arc<SamplePool>,
    statement: &'static str,
    rng: RngGen,
}

impl InsertOperation {
    fn new(store: Arc<Store>, pool: Arc<SamplePool>) -> Self {
        let statement = insert_sql(store.driver());
        Self {
            store,
            pool,
            statement,
            rng: RngGen::new(rand::thread_rng().gen()),
        }
    }
}

#[async_trait]
impl Operation for InsertOperation {
    async fn execute(&mut self, ctx: &OperationContext<'_>) -> OperationOutcome {
        let article = self.pool.choose(&mut self.rng);
        let params = article_params(article);
        classify_write(
            self.store
                .execute(ctx.interrupt, self.statement, &params)
                .await,
        )
    }
}

pub struct InsertOperationFactory {
    pub store: Arc<Store>,
    pub pool: Arc<SamplePool>,
}

impl OperationFactory for InsertOperationFactory {
    fn create(&self) -> Box<dyn Operation> {
        Box::new(InsertOperation::new(
            Arc::clone(&self.store),
            Arc::clone(&self.pool),
        ))
    }
}

pub struct LookupOperation {
    store: Arc<Store>,
    pool: Arc<SamplePool>,
    statement: &'static str,
    rng: RngGen,
}

impl LookupOperation {
    fn new(store: Arc<Store>, pool: Arc<SamplePool>) -> Self {
        let statement = lookup_sql(store.driver());
        Self {
            store,
            pool,
            statement,
            rng: RngGen::new(rand::thread_rng().gen()),
        }
    }
}

#[async_trait]
impl Operation for LookupOperation {
    async fn execute(&mut self, ctx: &OperationContext<'_>) -> OperationOutcome {
        let id = self.pool.random_id(&mut self.rng);
        classify_read(
            self.store
                .query_one::<Article>(ctx.interrupt, self.statement, &[Value::Integer(id)])
                .await,
        )
    }
}

pub struct LookupOperationFactory {
    pub store: Arc<Store>,
    pub pool: Arc<SamplePool>,
}

impl OperationFactory for LookupOperationFactory {
    fn create(&self) -> Box<dyn Operation> {
        Box::new(LookupOperation::new(
            Arc::clone(&self.store),
            Arc::clone(&self.pool),
        ))
    }
}

/// Dispatches each iteration to an insert or a lookup according to the
/// configured write percentage.
pub struct MixedOperation {
    insert: InsertOperation,
    lookup: LookupOperation,
    write_percent: u8,
    rng: RngGen,
}

#[async_trait]
impl Operation for MixedOperation {
    async fn execute(&mut self, ctx: &OperationContext<'_>) -> OperationOutcome {
        let is_write = match workload::choose_is_write(&mut self.rng, self.write_percent) {
            Ok(is_write) => is_write,
            Err(err) => {
                tracing::error!(error = %err, "mix selection failed");
                return OperationOutcome::Failure;
            }
        };

        if is_write {
            self.insert.execute(ctx).await
        } else {
            self.lookup.execute(ctx).await
        }
    }
}

pub struct MixedOperationFactory {
    store: Arc<Store>,
    pool: Arc<SamplePool>,
    write_percent: u8,
}

impl MixedOperationFactory {
    /// Rejects an out-of-range mix before any worker launches.
    pub fn new(
        store: Arc<Store>,
        pool: Arc<SamplePool>,
        write_percent: u8,
    ) -> Result<Self, ConfigError> {
        let write_percent = workload::validate_write_percent(write_percent)?;
        Ok(Self {
            store,
            pool,
            write_percent,
        })
    }
}

impl OperationFactory for MixedOperationFactory {
    fn create(&self) -> Box<dyn Operation> {
        Box::new(MixedOperation {
            insert: InsertOperation::new(Arc::clone(&self.store), Arc::clone(&self.pool)),
            lookup: LookupOperation::new(Arc::clone(&self.store), Arc::clone(&self.pool)),
            write_percent: self.write_percent,
            rng: RngGen::new(rand::thread_rng().gen()),
        })
    }
}
