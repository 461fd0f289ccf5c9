use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use collapser::Collapser;

// Same query as the async demo, served from plain OS threads.
fn exec(query: &str, delay: Duration) -> u64 {
    tracing::info!("Query hit database: {}", query);
    thread::sleep(delay);
    42
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let callers: usize = std::env::var("CALLERS")
        .unwrap_or("3".to_string())
        .parse()
        .context("CALLERS must be a number")?;
    let delay = Duration::from_millis(
        std::env::var("QUERY_DELAY_MS")
            .unwrap_or("1000".to_string())
            .parse()
            .context("QUERY_DELAY_MS must be a number")?,
    );

    let collapser = Arc::new(Collapser::<&'static str, u64>::new());
    let query = "select count(*) from books";

    let handles: Vec<_> = (0..callers)
        .map(|i| {
            let collapser = Arc::clone(&collapser);
            thread::spawn(move || (i, collapser.do_call(query, || exec(query, delay))))
        })
        .collect();

    for handle in handles {
        let (i, result) = handle
            .join()
            .map_err(|_| anyhow!("query thread panicked"))?;
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

    Ok(())
}
