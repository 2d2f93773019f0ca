//! Background learning scheduler
//!
//! Drives pattern mining, relationship suggestion, and maintenance on a
//! cadence with an explicit three-state machine per cycle: a completed
//! run cools down for one full interval before the next may start, so a
//! long cycle can never overlap its successor. Cancellation lands
//! between per-principal steps, letting the in-flight write finish.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::MemoryEngine;
use crate::error::Error;

/// Cycle job states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Running,
    CoolingDown,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Idle => "idle",
            JobState::Running => "running",
            JobState::CoolingDown => "cooling_down",
        }
    }
}

/// Handle to a spawned scheduler
pub struct SchedulerHandle {
    state: Arc<Mutex<JobState>>,
    cancel: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Current job state
    pub fn state(&self) -> JobState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(JobState::Idle)
    }

    /// Signal cancellation; the running cycle stops at its next step
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Cancel and wait for the loop to exit
    pub async fn shutdown(self) {
        self.cancel();
        let _ = self.join.await;
    }
}

/// Background learning-cycle scheduler
pub struct LearningScheduler;

impl LearningScheduler {
    /// Spawn with the configured cadence; `None` when disabled
    pub fn spawn(engine: Arc<MemoryEngine>) -> Option<SchedulerHandle> {
        if !engine.config().scheduler.enabled {
            info!("background scheduler disabled by configuration");
            return None;
        }
        let interval = engine.config().scheduler.interval();
        Some(Self::spawn_with_interval(engine, interval))
    }

    /// Spawn with an explicit interval (test seam)
    pub fn spawn_with_interval(engine: Arc<MemoryEngine>, interval: Duration) -> SchedulerHandle {
        let state = Arc::new(Mutex::new(JobState::Idle));
        let (cancel_tx, mut cancel_rx) = watch::channel(false);

        let loop_state = Arc::clone(&state);
        let join = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately, giving the run-at-startup
            // behavior.
            loop {
                tokio::select! {
                    _ = tick.tick() => {}
                    _ = cancel_rx.changed() => {
                        if *cancel_rx.borrow() {
                            set_state(&loop_state, JobState::Idle);
                            info!("scheduler cancelled");
                            return;
                        }
                        continue;
                    }
                }

                let current = *loop_state.lock().unwrap_or_else(|p| p.into_inner());
                match current {
                    JobState::CoolingDown => {
                        // One full interval has now elapsed since completion.
                        set_state(&loop_state, JobState::Idle);
                        continue;
                    }
                    JobState::Running => continue,
                    JobState::Idle => {}
                }

                set_state(&loop_state, JobState::Running);
                match run_cycle(&engine, &mut cancel_rx).await {
                    Ok(CycleOutcome::Completed { principals }) => {
                        debug!(principals, "learning cycle complete");
                        set_state(&loop_state, JobState::CoolingDown);
                    }
                    Ok(CycleOutcome::Shed) => {
                        // Load above the high-water mark: skip the cycle
                        // entirely and try again next tick.
                        set_state(&loop_state, JobState::Idle);
                    }
                    Ok(CycleOutcome::Cancelled) => {
                        set_state(&loop_state, JobState::Idle);
                        info!("scheduler cancelled mid-cycle");
                        return;
                    }
                    Err(e) => {
                        warn!(error = %e, "learning cycle failed, retrying next tick");
                        set_state(&loop_state, JobState::Idle);
                    }
                }
            }
        });

        SchedulerHandle {
            state,
            cancel: cancel_tx,
            join,
        }
    }
}

enum CycleOutcome {
    Completed { principals: usize },
    Shed,
    Cancelled,
}

async fn run_cycle(
    engine: &MemoryEngine,
    cancel: &mut watch::Receiver<bool>,
) -> crate::error::Result<CycleOutcome> {
    let high_water = engine.config().dispatcher.high_water;
    if engine.tracking_depth() > high_water {
        warn!(
            depth = engine.tracking_depth(),
            high_water, "tracking backlog above high-water mark, shedding learning cycle"
        );
        return Ok(CycleOutcome::Shed);
    }

    let principals = engine.principals()?;
    let mut processed = 0;
    for principal_id in &principals {
        if *cancel.borrow() {
            return Ok(CycleOutcome::Cancelled);
        }
        match engine.analyze(principal_id, None).await {
            Ok(report) => {
                processed += 1;
                debug!(
                    principal_id,
                    patterns = report.patterns.len(),
                    suggestions = report.suggestions.len(),
                    applied = report.applied,
                    stale = report.stale_count,
                    "cycle step complete"
                );
            }
            // Someone else (an explicit analyze call) holds the guard.
            Err(Error::Conflict(_)) => {
                debug!(principal_id = %principal_id, "cycle already running, skipping principal");
            }
            Err(e) => {
                warn!(principal_id = %principal_id, error = %e, "cycle step failed");
            }
        }
    }

    if let Err(e) = engine.store().cache_purge_expired(chrono::Utc::now()) {
        warn!(error = %e, "prediction cache purge failed");
    }

    Ok(CycleOutcome::Completed {
        principals: processed,
    })
}

fn set_state(state: &Arc<Mutex<JobState>>, next: JobState) {
    if let Ok(mut guard) = state.lock() {
        *guard = next;
    }
}

// ============================================================================
// TESTS
// ============================================================================
