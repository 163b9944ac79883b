use chrono::Utc;
use rand::Rng;
use rand_pcg::Pcg64Mcg;

use crate::db::{FromRow, Value};
use crate::error::{ConfigError, StorageError};

/// Random generator threaded through the selector and pool accessors.
///
/// Workers seed their own instance from entropy; tests pass a fixed seed.
pub type RngGen = Pcg64Mcg;

/// Checks a write percentage before a run is built from it.
pub fn validate_write_percent(write_percent: u8) -> Result<u8, ConfigError> {
    if write_percent > 100 {
        return Err(ConfigError::WritePercentOutOfRange(write_percent));
    }
    Ok(write_percent)
}

/// Decides whether the next operation should be a write.
///
/// `0` always selects a read and `100` always a write; in between, the
/// long-run write fraction converges to `write_percent / 100`. Each call
/// draws independently, nothing is carried over between calls.
pub fn choose_is_write(rng: &mut impl Rng, write_percent: u8) -> Result<bool, ConfigError> {
    match validate_write_percent(write_percent)? {
        0 => Ok(false),
        100 => Ok(true),
        p => Ok(rng.gen_range(0..100) < p),
    }
}

/// A benchmark record; rows of the `articles` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub pub_date: String,
    pub author_id: i64,
}

impl FromRow for Article {
    // Column order: article_id, title, content, pub_date, author_id.
    fn from_row(row: &[Value]) -> Result<Self, StorageError> {
        match row {
            [id, title, content, pub_date, author_id] => Ok(Article {
                id: id.as_i64()?,
                title: title.as_text()?.to_owned(),
                content: content.as_text()?.to_owned(),
                pub_date: pub_date.as_text()?.to_owned(),
                author_id: author_id.as_i64()?,
            }),
            _ => Err(StorageError::Decode(format!(
                "expected 5 article columns, got {}",
                row.len()
            ))),
        }
    }
}

const WORDS: &[&str] = &[
    "lorem", "ipsum", "dolor", "sit", "amet", "consectetur", "adipiscing", "elit", "sed",
    "tempor", "incididunt", "labore", "dolore", "magna", "aliqua", "enim", "minim", "veniam",
    "quis", "nostrud", "exercitation", "ullamco", "laboris", "nisi", "aliquip", "commodo",
    "consequat", "duis", "aute", "irure", "reprehenderit", "voluptate", "velit", "esse",
    "cillum", "fugiat", "nulla", "pariatur", "excepteur", "sint",
];

const AUTHOR_SPREAD: i64 = 100;

fn sentence(rng: &mut impl Rng, words: usize) -> String {
    let mut out = String::new();
    for i in 0..words {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(WORDS[rng.gen_range(0..WORDS.len())]);
    }
    out.push('.');
    out
}

fn paragraph(rng: &mut impl Rng) -> String {
    let sentences = rng.gen_range(3..=6);
    let mut out = String::new();
    for i in 0..sentences {
        if i > 0 {
            out.push(' ');
        }
        let words = rng.gen_range(6..=12);
        out.push_str(&sentence(rng, words));
    }
    out
}

/// Pre-generated records a run reads from and inserts copies of.
///
/// Built once before measurement from an explicit random source and never
/// mutated afterwards; workers only borrow from it.
#[derive(Debug, Clone)]
pub struct SamplePool {
    articles: Vec<Article>,
}

impl SamplePool {
    pub fn generate(count: usize, rng: &mut impl Rng) -> Self {
        let pub_date = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let articles = (0..count)
            .map(|_| Article {
                id: 0,
                title: sentence(rng, rng.gen_range(4..=8)),
                content: paragraph(rng),
                pub_date: pub_date.clone(),
                author_id: rng.gen_range(0..AUTHOR_SPREAD),
            })
            .collect();
        Self { articles }
    }

    pub fn len(&self) -> usize {
        self.articles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }

    pub fn articles(&self) -> &[Article] {
        &self.articles
    }

    /// Borrows a uniformly chosen record.
    pub fn choose(&self, rng: &mut impl Rng) -> &Article {
        &self.articles[rng.gen_range(0..self.articles.len())]
    }

    /// A uniformly chosen lookup key.
    ///
    /// Drawn from `[0, len)`; seeded rowids start at 1, so a key of 0 is a
    /// legitimate miss and lookups are expected to occasionally return no
    /// row.
    pub fn random_id(&self, rng: &mut impl Rng) -> i64 {
        rng.gen_range(0..self.articles.len() as i64)
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn test_choose_is_write_boundaries() {
        let mut rng = RngGen::seed_from_u64(42);
        for _ in 0..10_000 {
            assert!(!choose_is_write(&mut rng, 0).unwrap());
            assert!(choose_is_write(&mut rng, 100).unwrap());
        }
    }

    #[test]
    fn test_choose_is_write_converges() {
        for percent in [10u8, 30, 50, 70, 90] {
            let mut rng = RngGen::seed_from_u64(0xbeef + percent as u64);
            let trials = 100_000;
            let writes = (0..trials)
                .filter(|_| choose_is_write(&mut rng, percent).unwrap())
                .count();
            let observed = writes as f64 / trials as f64;
            let expected = percent as f64 / 100.0;
            assert!(
                (observed - expected).abs() < 0.01,
                "percent {}: observed fraction {}",
                percent,
                observed,
            );
        }
    }

    #[test]
    fn test_write_percent_out_of_range() {
        let mut rng = RngGen::seed_from_u64(1);
        assert_eq!(
            choose_is_write(&mut rng, 150).unwrap_err(),
            ConfigError::WritePercentOutOfRange(150),
        );
        assert!(validate_write_percent(101).is_err());
        assert!(validate_write_percent(100).is_ok());
    }

    #[test]
    fn test_pool_generation_is_seeded() {
        let mut a = RngGen::seed_from_u64(7);
        let mut b = RngGen::seed_from_u64(7);
        let pool_a = SamplePool::generate(50, &mut a);
        let pool_b = SamplePool::generate(50, &mut b);
        assert_eq!(pool_a.articles(), pool_b.articles());
        assert_eq!(pool_a.len(), 50);
    }

    #[test]
    fn test_pool_accessors_stay_in_range() {
        let mut rng = RngGen::seed_from_u64(3);
        let pool = SamplePool::generate(10, &mut rng);
        for _ in 0..1_000 {
            let article = pool.choose(&mut rng);
            assert!(!article.title.is_empty());
            assert!((0..AUTHOR_SPREAD).contains(&article.author_id));
            let id = pool.random_id(&mut rng);
            assert!((0..10).contains(&id));
        }
    }

    #[test]
    fn test_article_from_row() {
        let row = vec![
            Value::Integer(7),
            Value::Text("a title".into()),
            Value::Text("a body".into()),
            Value::Text("2024-03-01 10:00:00".into()),
            Value::Integer(42),
        ];
        let article = Article::from_row(&row).unwrap();
        assert_eq!(article.id, 7);
        assert_eq!(article.author_id, 42);

        let short = vec![Value::Integer(1)];
        assert!(matches!(
            Article::from_row(&short),
            Err(StorageError::Decode(_))
        ));
    }
}
