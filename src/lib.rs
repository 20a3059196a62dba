// src/lib.rs

//! Per-key FIFO scheduling on top of a concurrent operation queue.
//!
//! Operations added to a [`SubGroupQueue`] under the same key run one at a
//! time, in the order they were added. Operations under different keys run
//! concurrently, bounded only by the executor's concurrency ceiling.

pub mod cli;
pub mod config;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod operation;
pub mod subgroup;
pub mod types;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use tracing::{debug, info};

pub use crate::errors::SubGroupError;
pub use crate::exec::{Executor, OperationQueue};
pub use crate::operation::{Operation, OperationBuilder, OperationId, OperationState, Outcome};
pub use crate::subgroup::{AnyKey, DynamicSubGroupQueue, SubGroupKey, SubGroupQueue};
pub use crate::types::Limit;

use crate::cli::CliArgs;
use crate::config::{default_config_path, load_and_validate, validate_queue_section, ConfigFile};

/// High-level entry point used by `main.rs`.
///
/// Submits `keys × ops_per_key` sleeping operations, interleaving keys,
/// then checks that every key's operations ran one at a time and in order.
pub fn run(args: CliArgs) -> Result<()> {
    let mut cfg = resolve_config(&args)?;
    if let Some(limit) = args.max_concurrent {
        cfg.queue.max_concurrent_operations = limit;
        validate_queue_section(&cfg.queue)?;
    }

    if args.dry_run {
        print_dry_run(&cfg, &args);
        return Ok(());
    }

    let queue = SubGroupQueue::<String>::from_config(&cfg)?;
    let journal = Journal::default();
    let work = Duration::from_millis(args.work_ms);
    let started = Instant::now();

    for seq in 0..args.ops_per_key {
        for k in 0..args.keys {
            let key = format!("key-{k}");
            let journal = journal.clone();
            let body_key = key.clone();
            let op = Operation::builder()
                .name(format!("{key}#{seq}"))
                .build(move || {
                    journal.record(&body_key, seq, Event::Start);
                    thread::sleep(work);
                    journal.record(&body_key, seq, Event::End);
                });
            queue.add_operation(&op, key)?;
        }
    }

    info!(
        keys = args.keys,
        ops_per_key = args.ops_per_key,
        "workload submitted; waiting"
    );
    queue.wait_until_all_operations_are_finished();
    let elapsed = started.elapsed();

    let per_key = journal.verify()?;
    println!("subgroup-queue: ran {} operations over {} keys", per_key.values().sum::<usize>(), per_key.len());
    println!("  max_concurrent_operations = {}", cfg.queue.max_concurrent_operations);
    println!("  elapsed = {elapsed:?}");
    println!(
        "  serial estimate = {:?}",
        serial_estimate(work, args.keys, args.ops_per_key)
    );
    println!("  per-key order: ok");

    Ok(())
}

/// Time the workload would take with no concurrency at all.
fn serial_estimate(work: Duration, keys: usize, ops_per_key: usize) -> Duration {
    let total = u32::try_from(keys.saturating_mul(ops_per_key)).unwrap_or(u32::MAX);
    work.saturating_mul(total)
}

/// Explicit `--config`, else `SubGroupQueue.toml` if present, else defaults.
fn resolve_config(args: &CliArgs) -> Result<ConfigFile> {
    let path = match &args.config {
        Some(path) => path.clone(),
        None => {
            let path = default_config_path();
            if !path.exists() {
                debug!("no config file found; using defaults");
                return Ok(ConfigFile::default());
            }
            path
        }
    };

    debug!(path = %path.display(), "loading config");
    Ok(load_and_validate(&path)?)
}

fn print_dry_run(cfg: &ConfigFile, args: &CliArgs) {
    let queue = &cfg.queue;
    println!("subgroup-queue dry-run");
    println!("  queue.name = {}", queue.name);
    println!(
        "  queue.max_concurrent_operations = {} (resolves to {})",
        queue.max_concurrent_operations,
        queue
            .max_concurrent_operations
            .resolve()
            .map_or_else(|| "unbounded".to_string(), |n| n.to_string())
    );
    if let Some(threads) = queue.worker_threads {
        println!("  queue.worker_threads = {threads}");
    }
    println!("  queue.start_suspended = {}", queue.start_suspended);
    println!();
    println!(
        "workload: {} keys x {} ops, {} ms each",
        args.keys, args.ops_per_key, args.work_ms
    );

    debug!("dry-run complete (no execution)");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Start,
    End,
}

/// Start/end events per key, in the order they happened.
#[derive(Clone, Default)]
struct Journal(Arc<Mutex<BTreeMap<String, Vec<(usize, Event)>>>>);

impl Journal {
    fn record(&self, key: &str, seq: usize, event: Event) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_default()
            .push((seq, event));
    }

    /// Every key must read `Start(0) End(0) Start(1) End(1) ...`.
    /// Returns the number of operations per key.
    fn verify(&self) -> Result<BTreeMap<String, usize>> {
        let journal = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        let mut counts = BTreeMap::new();

        for (key, events) in journal.iter() {
            for (i, pair) in events.chunks(2).enumerate() {
                match pair {
                    [(a, Event::Start), (b, Event::End)] if *a == i && *b == i => {}
                    other => bail!("subgroup {key} ran out of order at position {i}: {other:?}"),
                }
            }
            counts.insert(key.clone(), events.len() / 2);
        }

        Ok(counts)
    }
}
