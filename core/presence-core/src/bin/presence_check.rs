//! Debug utility for inspecting shared session state in local environments.

use std::env;

use chrono::Utc;
use presence_core::{DirMedium, HealthReport, Liveness, SharedStore, StorageConfig};
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() {
    init_logging();

    let root = env::args().nth(1).map(|p| StorageConfig::with_root(p.into()));
    let config = root.unwrap_or_default();

    println!("═══════════════════════════════════════════════════════════");
    println!("  Copresence State Check");
    println!("═══════════════════════════════════════════════════════════");
    println!();
    println!("Storage root: {}", config.root().display());
    println!("Store file:   {}", config.store_file().display());
    println!("Events file:  {}", config.events_file().display());
    println!();

    let medium = match DirMedium::new(config) {
        Ok(medium) => medium,
        Err(err) => {
            eprintln!("Failed to open storage root: {err}");
            std::process::exit(1);
        }
    };
    let store = SharedStore::new(medium);
    let now = Utc::now();

    println!("── Registered Sessions ───────────────────────────────────");
    let map = store.read();
    if map.is_empty() {
        println!("  (no sessions in shared store)");
    } else {
        let mut records: Vec<_> = map.into_values().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        for record in &records {
            let liveness = Liveness::classify(record.last_activity, now);
            let marker = match liveness {
                Liveness::Fresh => "🟢",
                Liveness::Idle => "🟡",
                Liveness::Stale => "⚫",
                Liveness::Expired => "✗ ",
            };
            println!(
                "  {} {:?} │ v{} │ {} │ {}",
                marker,
                liveness,
                record.version,
                record.role.as_deref().unwrap_or("-"),
                record.process_id
            );
            if let Some(principal) = &record.principal {
                println!("       └─ {} (id {})", principal.name, principal.id);
            }
        }
    }
    println!();

    println!("── Health ────────────────────────────────────────────────");
    let mut report = HealthReport::default();
    for record in store.read().into_values() {
        report.total += 1;
        match Liveness::classify(record.last_activity, now) {
            Liveness::Fresh => report.fresh += 1,
            Liveness::Idle => report.idle += 1,
            Liveness::Stale => report.stale += 1,
            Liveness::Expired => report.expired += 1,
        }
    }
    println!(
        "  total {} │ fresh {} │ idle {} │ stale {} │ expired {}",
        report.total, report.fresh, report.idle, report.stale, report.expired
    );
    println!();

    println!("── Recent Events ─────────────────────────────────────────");
    let events = store.read_events();
    if events.is_empty() {
        println!("  (event log empty)");
    } else {
        for event in events.iter().rev().take(10) {
            println!(
                "  {} │ {:?} │ {}",
                event.timestamp.format("%H:%M:%S"),
                event.kind,
                event.process_id
            );
        }
    }
    println!();

    println!("═══════════════════════════════════════════════════════════");
    println!("  Check complete");
    println!("═══════════════════════════════════════════════════════════");
}
