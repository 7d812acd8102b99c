//! # Session Replay Entry Point
//!
//! Records one session from an NDJSON file of raw events and ships it to
//! the configured collector.
//!
//! Usage:
//!   SESSION_SDK_API_KEY=... [SESSION_SDK_ENDPOINT=...] session-replay <events.ndjson> [page-url]

use std::sync::Arc;
use std::time::Duration;

use session_sdk::capture::ReplayProducer;
use session_sdk::session::Viewport;
use session_sdk::{PageInfo, SdkOptions, SessionManager, StaticHost};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=================================================");
    println!("  Session SDK - Event Replay                     ");
    println!("=================================================");
    println!();

    let mut args = std::env::args().skip(1);
    let events_path = match args.next() {
        Some(path) => path,
        None => {
            eprintln!("usage: session-replay <events.ndjson> [page-url]");
            std::process::exit(2);
        }
    };
    let page_url = args
        .next()
        .unwrap_or_else(|| "http://localhost/replay".to_string());

    let options = SdkOptions::from_env();
    let host = Arc::new(StaticHost::new(PageInfo {
        user_agent: format!("session-replay/{}", env!("CARGO_PKG_VERSION")),
        url: page_url,
        referrer: None,
        viewport: Viewport {
            width: 1280,
            height: 720,
        },
        timezone: "UTC".to_string(),
        language: "en-US".to_string(),
    }));

    let producer = ReplayProducer::new(&events_path);
    let progress = producer.progress();

    println!("Initializing session manager...");
    let manager = match SessionManager::with_http(host, Box::new(producer), options) {
        Ok(manager) => manager,
        Err(e) => {
            eprintln!("✗ Failed to initialize: {}", e);
            return Err(e.into());
        }
    };
    if let Some(config) = manager.config() {
        println!("✓ Initialized");
        println!("  - Collector: {}", config.endpoint);
        println!("  - Upload interval: {}ms", config.upload_interval.as_millis());
        println!("  - Retries: {} x {}ms", config.max_retries, config.retry_delay.as_millis());
    }
    println!();

    manager.on_delivery_failure(|report| {
        eprintln!(
            "✗ Batch {} dropped after {} attempts ({} events)",
            report.batch_id, report.attempts, report.event_count
        );
    });

    println!("Replaying events from {}...", events_path);
    manager.start_recording()?;
    match manager.session_id() {
        Some(id) => println!("  - Session: {}", id),
        None => println!("  - Do-Not-Track enabled, nothing recorded"),
    }

    let report = if manager.is_active() {
        while !progress.is_finished() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        println!("  - Events read: {}", progress.emitted());
        manager.stop().await?
    } else {
        None
    };
    println!();

    let stats = manager.stats();
    println!("Upload Statistics:");
    println!("  - Batches sent: {}", stats.batches_sent);
    println!("  - Batches failed: {}", stats.batches_failed);
    println!("  - Events sent: {}", stats.events_sent);
    println!("  - Events dropped (overflow): {}", stats.events_dropped);
    if let Some(report) = report {
        println!("  - Final batch: {:?} after {} attempt(s)", report.outcome, report.attempts);
    }
    println!("  - Session duration: {}ms", manager.session_duration());

    manager.destroy();

    println!();
    println!("=================================================");
    println!("  Replay Complete");
    println!("=================================================");

    Ok(())
}
