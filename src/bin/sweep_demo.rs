//! Demo that runs a small sweep against the mock generator and an in-memory store,
//! printing every scheduler snapshot.

use std::sync::Arc;

use country_sentiment::cache::SentimentCache;
use country_sentiment::fetcher::BatchFetcher;
use country_sentiment::llm::MockGenerator;
use country_sentiment::store::MemoryStore;
use country_sentiment::{CountryKey, Scheduler, SchedulerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let cache = Arc::new(SentimentCache::new(Arc::new(MemoryStore::new())));
    let fetcher = BatchFetcher::new(Arc::new(MockGenerator)).with_grounding(false);
    let scheduler = Scheduler::new(Arc::new(fetcher), cache.clone(), SchedulerConfig::default());

    scheduler.set_callback(|snap| {
        println!(
            "{:?} current={:?} remaining={}",
            snap.status,
            snap.current.as_ref().map(|k| k.as_str()),
            snap.remaining
        );
    });

    let keys = ["Iceland", "Chile", "Kenya", "Japan", "Peru"]
        .into_iter()
        .map(CountryKey::new)
        .collect();
    scheduler.start(keys, false).await?;
    scheduler.prioritize(CountryKey::new("Peru"));
    scheduler.run_until_idle().await;

    for rec in cache.list_all().await? {
        println!(
            "{:<10} {:+.2} {:?}",
            rec.country_name.as_str(), rec.sentiment_score, rec.sentiment_label
        );
    }
    println!("sweep-demo done");
    Ok(())
}
