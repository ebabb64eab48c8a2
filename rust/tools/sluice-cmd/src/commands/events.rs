//! Events command implementation
//!
//! Waiter threads block on named events of a shared [`NamedEventSet`] while
//! one signaller per event fires it after a delay. Every waiter is released
//! by its own event only, even though each signal wakes all of them.

use std::{
    io::{self, Write},
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use sluice_sync::{CancelReason, CancellationToken, NamedEventSet};

pub struct EventsArgs {
    pub events: Vec<String>,
    pub waiters: usize,
    pub delay_ms: u64,
}

/// What a single waiter observed.
#[derive(Debug)]
pub struct WaiterReport {
    pub waiter: String,
    pub event: String,
    pub outcome: Result<Duration, CancelReason>,
}

pub fn run(args: EventsArgs) -> Result<()> {
    let reports = run_waiters(&args)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for report in &reports {
        match report.outcome {
            Ok(waited) => writeln!(
                out,
                "{} released by {} after {waited:?}",
                report.waiter, report.event
            )?,
            Err(reason) => writeln!(out, "{} gave up on {}: {reason}", report.waiter, report.event)?,
        }
    }
    Ok(())
}

pub fn run_waiters(args: &EventsArgs) -> Result<Vec<WaiterReport>> {
    anyhow::ensure!(!args.events.is_empty(), "at least one event name is required");

    let set = NamedEventSet::new();
    let delay = Duration::from_millis(args.delay_ms);
    // Waiters give up if the signallers never get to run.
    let token = CancellationToken::new().child_with_timeout(delay * 4 + Duration::from_secs(1));

    thread::scope(|s| {
        let mut waiters = Vec::new();
        for event in &args.events {
            for index in 0..args.waiters {
                let waiter = format!("{event}-waiter-{index}");
                let (set, token) = (&set, &token);
                let handle = thread::Builder::new()
                    .name(waiter.clone())
                    .spawn_scoped(s, move || {
                        let start = Instant::now();
                        let outcome = set
                            .wait_for_until(event, token)
                            .map(|()| start.elapsed());
                        WaiterReport {
                            waiter,
                            event: event.clone(),
                            outcome,
                        }
                    })
                    .context("Failed to start a waiter thread")?;
                waiters.push(handle);
            }
        }

        for event in &args.events {
            let set = &set;
            thread::Builder::new()
                .name(format!("signal-{event}"))
                .spawn_scoped(s, move || {
                    thread::sleep(delay);
                    set.signal(event);
                })
                .context("Failed to start a signaller thread")?;
        }

        Ok(waiters
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
            })
            .collect())
    })
}
