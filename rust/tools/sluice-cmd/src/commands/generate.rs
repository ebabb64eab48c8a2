//! Generate command implementation
//!
//! Three infinite generators feed their own buffers. Apples are consumed by a
//! worker sub-pool whose lifetime is bounded by a derived timeout; Oranges and
//! Peaches each have a single consumer that lives as long as the root token.
//! The root is cancelled after the requested duration, which stops every
//! generator and consumer that is still running.

use std::{
    io::{self, Write},
    iter,
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use sluice_pipeline::{
    Aggregator, FetchError, Fetcher, PoolReport, WorkerPool, fetch_fn,
    generator::{Generator, GeneratorExit},
};
use sluice_sync::{BoundedBuffer, CancellationToken};

pub struct GenerateArgs {
    pub duration_ms: u64,
    pub subpool_timeout_ms: u64,
    pub subpool_workers: usize,
}

/// Per-stream outcome of a run.
#[derive(Debug)]
pub struct StreamReport {
    pub name: &'static str,
    pub generator: GeneratorExit,
    pub consumed: usize,
    pub pool: PoolReport,
}

pub fn run(args: GenerateArgs) -> Result<()> {
    let reports = run_streams(&args)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for report in &reports {
        let stop = match report.pool.cancelled() {
            Some(reason) => reason.to_string(),
            None => "drained".to_string(),
        };
        writeln!(
            out,
            "{}: produced {}, consumed {} (consumers stopped: {stop})",
            report.name, report.generator.sent, report.consumed
        )?;
    }
    Ok(())
}

pub fn run_streams(args: &GenerateArgs) -> Result<Vec<StreamReport>> {
    anyhow::ensure!(args.subpool_workers > 0, "--subpool-workers must be positive");

    let root = CancellationToken::new();
    let echo = fetch_fn(|item: &&'static str| Ok::<_, FetchError>(*item));

    let streams = [
        (
            "Apple",
            WorkerPool::new(args.subpool_workers)
                .with_name("apple")
                .with_timeout(Duration::from_millis(args.subpool_timeout_ms)),
        ),
        ("Orange", WorkerPool::new(1).with_name("orange")),
        ("Peach", WorkerPool::new(1).with_name("peach")),
    ];

    let mut generators = Vec::with_capacity(streams.len());
    let mut buffers = Vec::with_capacity(streams.len());
    for (name, _) in &streams {
        let buffer = BoundedBuffer::new(1);
        let generator = Generator::spawn(
            format!("gen-{}", name.to_lowercase()),
            iter::repeat(*name),
            buffer.clone(),
            root.clone(),
        )
        .with_context(|| format!("Failed to start the {name} generator"))?;
        generators.push(generator);
        buffers.push(buffer);
    }

    let consumed = thread::scope(|s| {
        let handles = streams
            .iter()
            .zip(&buffers)
            .map(|((name, pool), items)| {
                let echo = &echo;
                let root = &root;
                s.spawn(move || consume(name, pool, echo, items, root))
            })
            .collect::<Vec<_>>();

        root.wait_timeout(Duration::from_millis(args.duration_ms));
        log::info!("cancelling all streams");
        root.cancel();

        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
            })
            .collect::<Vec<_>>()
    });

    Ok(streams
        .iter()
        .zip(generators)
        .zip(consumed)
        .map(|(((name, _), generator), (consumed, pool))| StreamReport {
            name: *name,
            generator: generator.join(),
            consumed,
            pool,
        })
        .collect())
}

/// Runs `pool` over `items` and counts the outcomes it emits.
fn consume<F>(
    name: &str,
    pool: &WorkerPool,
    fetcher: &F,
    items: &BoundedBuffer<&'static str>,
    token: &CancellationToken,
) -> (usize, PoolReport)
where
    F: Fetcher<Target = &'static str, Payload = &'static str>,
{
    let results = BoundedBuffer::new(16);
    thread::scope(|s| {
        let pool_handle = s.spawn(|| pool.run(fetcher, items, &results, token));
        let counted = Aggregator::new(0usize, |n: usize, _: &'static str| n + 1).drain(&results);
        let report = pool_handle
            .join()
            .unwrap_or_else(|payload| std::panic::resume_unwind(payload));
        log::debug!("{name}: {} consumed", counted.value);
        (counted.value, report)
    })
}
