use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use collapser::AsyncCollapser;
use tokio::task::JoinSet;

// ------------------ Configuration ------------------

struct Config {
    callers: usize,
    query_delay: Duration,
}

impl Config {
    fn from_env() -> Result<Self> {
        let callers = std::env::var("CALLERS").unwrap_or("3".to_string());
        let query_delay_ms = std::env::var("QUERY_DELAY_MS").unwrap_or("1000".to_string());

        Ok(Self {
            callers: callers
                .parse()
                .with_context(|| format!("CALLERS must be a number, got {callers:?}"))?,
            query_delay: Duration::from_millis(query_delay_ms.parse().with_context(|| {
                format!("QUERY_DELAY_MS must be a number, got {query_delay_ms:?}")
            })?),
        })
    }
}

// ------------------ Simulated Database ------------------

struct Database {
    delay: Duration,
    hits: AtomicUsize,
}

impl Database {
    async fn exec(&self, query: &str) -> Result<u64> {
        self.hits.fetch_add(1, Ordering::Relaxed);
        tracing::info!("Query hit database: {}", query);
        tokio::time::sleep(self.delay).await;
        // After much thought.
        Ok(42)
    }
}

// ------------------ Main ------------------

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    let database = Arc::new(Database {
        delay: config.query_delay,
        hits: AtomicUsize::new(0),
    });
    let collapser = Arc::new(AsyncCollapser::<String, u64>::new());

    let query = "select count(*) from books".to_string();
    let mut tasks = JoinSet::new();

    for i in 0..config.callers {
        let collapser = Arc::clone(&collapser);
        let database = Arc::clone(&database);
        let query = query.clone();

        tasks.spawn(async move {
            let result = collapser
                .try_do_call(query.clone(), || async move { database.exec(&query).await })
                .await;
            (i, result)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let (i, result) = joined.context("query task panicked")?;
        match result.get() {
            Ok(count) => println!(
                "Query #{}: {} (shared by {} callers)",
                i,
                count,
                result.collapsed()
            ),
            Err(error) => println!("Query #{}: {}", i, error),
        }
    }

    tracing::info!(
        "Database was hit {} times for {} callers",
        database.hits.load(Ordering::Relaxed),
        config.callers
    );

    Ok(())
}
