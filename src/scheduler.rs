//! Fixed-cadence trigger for the main chain

use crate::config::ScheduleConfig;
use std::future::Future;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Runs a job on a fixed interval until cancelled
///
/// The first run starts immediately. Ticks missed while a run is still in
/// progress are skipped, not caught up.
pub struct Scheduler {
    config: ScheduleConfig,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(config: ScheduleConfig, cancel: CancellationToken) -> Self {
        Self { config, cancel }
    }

    /// Run `job` on every tick; returns the number of runs started
    pub async fn run<F, Fut>(&self, mut job: F) -> u64
    where
        F: FnMut(u64) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval_at(Instant::now(), self.config.every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        log::info!("Scheduling a run every {:?}", self.config.every);

        let mut runs = 0u64;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    log::info!("Scheduler stopped after {} run(s)", runs);
                    return runs;
                }
                _ = interval.tick() => {}
            }

            runs += 1;
            log::debug!("Scheduled run {} starting", runs);
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    log::warn!("Scheduler stopped during run {}", runs);
                    return runs;
                }
                _ = job(runs) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_runs_on_fixed_cadence() {
        let cancel = CancellationToken::new();
        let scheduler = Scheduler::new(
            ScheduleConfig {
                every: Duration::from_secs(3600),
            },
            cancel.clone(),
        );
        let start = Instant::now();
        let starts = Arc::new(Mutex::new(Vec::new()));

        let recorded = starts.clone();
        let runs = scheduler
            .run(move |run| {
                recorded.lock().unwrap().push(start.elapsed());
                let cancel = cancel.clone();
                async move {
                    if run == 3 {
                        cancel.cancel();
                    }
                }
            })
            .await;

        assert_eq!(runs, 3);
        let starts = starts.lock().unwrap();
        assert_eq!(starts[0], Duration::ZERO);
        assert_eq!(starts[1], Duration::from_secs(3600));
        assert_eq!(starts[2], Duration::from_secs(7200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_run_skips_missed_ticks() {
        let cancel = CancellationToken::new();
        let scheduler = Scheduler::new(
            ScheduleConfig {
                every: Duration::from_secs(10),
            },
            cancel.clone(),
        );
        let start = Instant::now();
        let starts = Arc::new(Mutex::new(Vec::new()));

        let recorded = starts.clone();
        scheduler
            .run(move |run| {
                recorded.lock().unwrap().push(start.elapsed());
                let cancel = cancel.clone();
                async move {
                    match run {
                        1 => tokio::time::sleep(Duration::from_secs(25)).await,
                        3 => cancel.cancel(),
                        _ => {}
                    }
                }
            })
            .await;

        // One late tick fires right away, then the cadence resumes on the grid
        let starts = starts.lock().unwrap();
        assert_eq!(
            *starts,
            vec![
                Duration::ZERO,
                Duration::from_secs(25),
                Duration::from_secs(30)
            ]
        );
    }
}
