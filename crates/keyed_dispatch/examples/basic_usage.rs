//! Basic usage example for the keyed task scheduler
//!
//! Submits a handful of keyed downloads, shows that duplicate requests share
//! one execution, and waits for the scheduler to drain.

use std::time::Duration;

use keyed_dispatch::{KeyedTaskScheduler, SchedulerConfig, SchedulerEvent, TracingReporter};

async fn fetch(name: &'static str, millis: u64) -> Result<usize, String> {
    // Simulate some work
    tokio::time::sleep(Duration::from_millis(millis)).await;
    if name.ends_with(".missing") {
        Err(format!("{name}: not found"))
    } else {
        Ok(name.len() * 100)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    println!("=== Basic Keyed Dispatch Example ===\n");

    let config = SchedulerConfig::new().with_max_parallel(2)?;
    let scheduler: KeyedTaskScheduler<usize, String> = KeyedTaskScheduler::with_config(config)?
        .with_reporter(TracingReporter::with_context("basic_usage"));
    let mut events = scheduler.subscribe();

    let packages = [
        ("numpy.tar", 150),
        ("python.tar", 100),
        ("scipy.missing", 50),
        ("numpy.tar", 10),
    ];

    let handles: Vec<_> = packages
        .iter()
        .map(|&(name, millis)| (name, scheduler.get_or_enqueue(name, move || fetch(name, millis))))
        .collect();
    println!("Submitted {} requests for {} keys", handles.len(), scheduler.len());

    for (name, handle) in &handles {
        match handle.wait_timeout(Duration::from_secs(1)).await? {
            Ok(size) => println!("  {name}: {size} bytes"),
            Err(error) => println!("  {name}: failed -> {error}"),
        }
    }

    scheduler.drained().await;

    println!("\nEvents:");
    while let Ok(event) = events.try_recv() {
        match event {
            SchedulerEvent::Item { key, value } => println!("  item   {key} = {value}"),
            SchedulerEvent::Failed { key, error } => println!("  failed {key}: {error}"),
            SchedulerEvent::Empty { stats } => println!("  empty  {stats:?}"),
        }
    }

    println!("\n=== Example completed ===");
    Ok(())
}
