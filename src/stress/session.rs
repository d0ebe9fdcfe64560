//! One bounded-duration stress run for a single resource kind.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::{
    Deadline, LoadGenerator, MetricSampler, ReadySignal, ResourceKind, StopSignal, StressConfig,
    StressError, WorkerReport,
};

/// How the monitoring loop paces itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// The sampler's own blocking window sets the pace (CPU).
    SamplerWindow,
    /// Sample, then sleep a fixed interval (memory).
    Fixed(Duration),
    /// No sampling; wake at a fixed interval only to check the deadline (GPU).
    Heartbeat(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionPhase {
    Idle,
    WorkersStarted,
    Monitoring,
    StopSignaled,
    Joined,
}

/// Handle to one spawned load generator thread. Consumed by `join`.
pub struct WorkerHandle {
    index: usize,
    handle: JoinHandle<Result<WorkerReport, StressError>>,
}

impl WorkerHandle {
    fn join(self) -> Result<WorkerReport, StressError> {
        match self.handle.join() {
            Ok(result) => result,
            Err(_) => Err(StressError::WorkerPanicked { index: self.index }),
        }
    }
}

/// Summary of a finished session, handed back to the caller in memory.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub kind: ResourceKind,
    pub workers_requested: usize,
    pub workers_started: usize,
    /// Workers that committed their resource before the clock started.
    pub workers_ready: usize,
    pub workers_joined: usize,
    pub worker_reports: Vec<WorkerReport>,
    pub worker_failures: Vec<String>,
    pub allocation_failed: bool,
    pub samples_logged: u32,
    pub sample_failures: u32,
    /// Time from the first spawn until every worker was ready or gone.
    pub warmup: Duration,
    /// Monitoring time when the stop signal was set, measured from the end
    /// of warmup.
    pub stopped_after: Duration,
    /// Total wall time including warmup and the join phase.
    pub elapsed: Duration,
    /// Bytes still held by the session's generators after every join. Only
    /// generators that keep a gauge fill this in.
    pub held_bytes_after_join: Option<u64>,
}

pub struct StressSession {
    config: StressConfig,
    cadence: Cadence,
    phase: SessionPhase,
}

impl StressSession {
    pub fn new(config: StressConfig, cadence: Cadence) -> Self {
        Self {
            config,
            cadence,
            phase: SessionPhase::Idle,
        }
    }

    pub fn config(&self) -> &StressConfig {
        &self.config
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    fn enter(&mut self, phase: SessionPhase) {
        debug!(kind = %self.config.kind, from = ?self.phase, to = ?phase, "session phase");
        self.phase = phase;
    }

    /// Run the session to completion.
    ///
    /// `make_worker` is called once per configured worker. The deadline starts
    /// once every worker has reported ready or given up; if none became ready
    /// the session goes straight to stop. Whatever happens to the workers,
    /// the stop signal is set after the deadline and every started worker is
    /// joined before this returns.
    pub fn run<F>(&mut self, mut make_worker: F, sampler: &mut dyn MetricSampler) -> SessionReport
    where
        F: FnMut(usize) -> Box<dyn LoadGenerator>,
    {
        let kind = self.config.kind;
        let stop = StopSignal::new();
        let started = Instant::now();

        let mut report = SessionReport {
            kind,
            workers_requested: self.config.workers,
            workers_started: 0,
            workers_ready: 0,
            workers_joined: 0,
            worker_reports: Vec::new(),
            worker_failures: Vec::new(),
            allocation_failed: false,
            samples_logged: 0,
            sample_failures: 0,
            warmup: Duration::ZERO,
            stopped_after: Duration::ZERO,
            elapsed: Duration::ZERO,
            held_bytes_after_join: None,
        };

        let (ready, ready_rx) = ReadySignal::channel();
        let mut handles = Vec::with_capacity(self.config.workers);
        for index in 0..self.config.workers {
            match spawn_worker(kind, index, make_worker(index), ready.clone(), stop.clone()) {
                Ok(handle) => {
                    debug!(%kind, worker = index, "worker started");
                    handles.push(handle);
                }
                Err(e) => {
                    error!(%kind, worker = index, error = %e, "worker failed to start");
                    report.worker_failures.push(e.to_string());
                }
            }
        }
        drop(ready);
        report.workers_started = handles.len();

        // Ends once every worker has notified or dropped its signal.
        report.workers_ready = ready_rx.iter().count();
        report.warmup = started.elapsed();
        self.enter(SessionPhase::WorkersStarted);

        let deadline = Deadline::start(self.config.duration);
        if report.workers_ready > 0 {
            self.enter(SessionPhase::Monitoring);
            while !deadline.expired() {
                self.monitor_step(sampler, &deadline, &mut report);
            }
        } else {
            warn!(%kind, "no worker became ready, stopping without monitoring");
        }

        report.stopped_after = deadline.elapsed();
        stop.trigger();
        self.enter(SessionPhase::StopSignaled);

        for handle in handles {
            let index = handle.index;
            let result = handle.join();
            report.workers_joined += 1;
            debug!(%kind, worker = index, "worker joined");
            match result {
                Ok(worker_report) => report.worker_reports.push(worker_report),
                Err(e) => {
                    if e.is_allocation_failure() {
                        report.allocation_failed = true;
                    } else {
                        warn!(%kind, worker = index, error = %e, "worker ended with an error");
                    }
                    report.worker_failures.push(e.to_string());
                }
            }
        }
        self.enter(SessionPhase::Joined);

        report.elapsed = started.elapsed();
        self.enter(SessionPhase::Idle);
        report
    }

    /// One monitoring iteration: sample and log according to the cadence.
    fn monitor_step(
        &self,
        sampler: &mut dyn MetricSampler,
        deadline: &Deadline,
        report: &mut SessionReport,
    ) {
        let kind = self.config.kind;
        let pause = match self.cadence {
            Cadence::Heartbeat(interval) => {
                thread::sleep(interval.min(deadline.remaining()));
                return;
            }
            Cadence::SamplerWindow => None,
            Cadence::Fixed(interval) => Some(interval),
        };

        match sampler.record(kind) {
            Ok(record) => {
                info!("{} Usage: {:.1}%", record.kind.label(), record.percent);
                report.samples_logged += 1;
                if let Some(interval) = pause {
                    thread::sleep(interval.min(deadline.remaining()));
                }
            }
            Err(e) => {
                warn!(%kind, error = %e, "utilization sample failed");
                report.sample_failures += 1;
                let interval = pause.unwrap_or_else(|| sampler.window());
                thread::sleep(interval.min(deadline.remaining()));
            }
        }
    }
}

fn spawn_worker(
    kind: ResourceKind,
    index: usize,
    generator: Box<dyn LoadGenerator>,
    ready: ReadySignal,
    stop: StopSignal,
) -> Result<WorkerHandle, StressError> {
    // Worker log lines go to the same subscriber and span as the session.
    let dispatch = tracing::dispatcher::get_default(|d| d.clone());
    let span = tracing::Span::current();

    let handle = thread::Builder::new()
        .name(format!("{}-load-{}", kind, index))
        .spawn(move || {
            tracing::dispatcher::with_default(&dispatch, || {
                let _entered = span.enter();
                generator.run(ready, stop)
            })
        })
        .map_err(|source| StressError::Spawn { index, source })?;

    Ok(WorkerHandle { index, handle })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stress::SampleError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    /// Sampler returning a fixed value after a short simulated window.
    struct FakeSampler {
        window: Duration,
        value: Result<f32, SampleError>,
        calls: u32,
    }

    impl MetricSampler for FakeSampler {
        fn sample(&mut self, _kind: ResourceKind) -> Result<f32, SampleError> {
            self.calls += 1;
            thread::sleep(self.window);
            self.value.clone()
        }

        fn window(&self) -> Duration {
            self.window
        }
    }

    /// Generator that waits for the stop signal and counts how many saw it.
    struct Waiter {
        observed: Arc<AtomicUsize>,
    }

    impl LoadGenerator for Waiter {
        fn kind(&self) -> ResourceKind {
            ResourceKind::Cpu
        }

        fn run(
            self: Box<Self>,
            ready: ReadySignal,
            stop: StopSignal,
        ) -> Result<WorkerReport, StressError> {
            ready.notify();
            stop.wait(Duration::from_millis(1));
            self.observed.fetch_add(1, Ordering::SeqCst);
            Ok(WorkerReport::Cpu { spins: 0 })
        }
    }

    struct Failing;

    impl LoadGenerator for Failing {
        fn kind(&self) -> ResourceKind {
            ResourceKind::Memory
        }

        fn run(
            self: Box<Self>,
            _ready: ReadySignal,
            _stop: StopSignal,
        ) -> Result<WorkerReport, StressError> {
            Err(StressError::InsufficientMemory {
                requested_bytes: 10,
                available_bytes: 1,
            })
        }
    }

    struct Panicking;

    impl LoadGenerator for Panicking {
        fn kind(&self) -> ResourceKind {
            ResourceKind::Cpu
        }

        fn run(
            self: Box<Self>,
            _ready: ReadySignal,
            _stop: StopSignal,
        ) -> Result<WorkerReport, StressError> {
            panic!("boom");
        }
    }

    /// Takes a while to acquire its resource, then holds it until stopped.
    struct SlowStart {
        warmup: Duration,
    }

    impl LoadGenerator for SlowStart {
        fn kind(&self) -> ResourceKind {
            ResourceKind::Memory
        }

        fn run(
            self: Box<Self>,
            ready: ReadySignal,
            stop: StopSignal,
        ) -> Result<WorkerReport, StressError> {
            thread::sleep(self.warmup);
            let acquired = Instant::now();
            ready.notify();
            stop.wait(Duration::from_millis(1));
            Ok(WorkerReport::Memory {
                bytes_held: 1,
                held_for: acquired.elapsed(),
            })
        }
    }

    fn sampler(value: Result<f32, SampleError>) -> FakeSampler {
        FakeSampler {
            window: Duration::from_millis(20),
            value,
            calls: 0,
        }
    }

    #[test]
    fn test_joins_every_started_worker() {
        let observed = Arc::new(AtomicUsize::new(0));
        let config = StressConfig::cpu(Duration::from_millis(100), 3);
        let mut session = StressSession::new(config, Cadence::SamplerWindow);
        let mut fake = sampler(Ok(42.0));

        let start = Instant::now();
        let report = session.run(
            |_| {
                Box::new(Waiter {
                    observed: observed.clone(),
                })
            },
            &mut fake,
        );

        assert!(start.elapsed() >= Duration::from_millis(100));
        assert!(report.stopped_after >= Duration::from_millis(100));
        assert_eq!(report.workers_started, 3);
        assert_eq!(report.workers_joined, 3);
        assert_eq!(observed.load(Ordering::SeqCst), 3);
        assert_eq!(report.worker_reports.len(), 3);
        assert!(report.samples_logged >= 1);
        assert_eq!(report.samples_logged, fake.calls);
        assert_eq!(session.phase(), SessionPhase::Idle);
    }

    #[test]
    fn test_sampling_failure_is_not_fatal() {
        let observed = Arc::new(AtomicUsize::new(0));
        let config = StressConfig::cpu(Duration::from_millis(60), 1);
        let mut session = StressSession::new(config, Cadence::SamplerWindow);
        let mut fake = sampler(Err(SampleError::UnsupportedPlatform));

        let report = session.run(
            |_| {
                Box::new(Waiter {
                    observed: observed.clone(),
                })
            },
            &mut fake,
        );

        assert_eq!(report.samples_logged, 0);
        assert!(report.sample_failures >= 1);
        assert_eq!(report.workers_joined, 1);
    }

    #[test]
    fn test_worker_failure_still_joined() {
        let config = StressConfig::memory(Duration::from_millis(50), 10);
        let mut session = StressSession::new(config, Cadence::Fixed(Duration::from_millis(10)));
        let mut fake = sampler(Ok(10.0));

        let report = session.run(|_| Box::new(Failing), &mut fake);

        assert_eq!(report.workers_started, 1);
        assert_eq!(report.workers_joined, 1);
        assert!(report.allocation_failed);
        assert_eq!(report.worker_failures.len(), 1);
        assert!(report.worker_reports.is_empty());
    }

    #[test]
    fn test_worker_panic_is_contained() {
        let config = StressConfig::cpu(Duration::from_millis(30), 2);
        let mut session = StressSession::new(config, Cadence::SamplerWindow);
        let mut fake = sampler(Ok(1.0));

        let report = session.run(|_| Box::new(Panicking), &mut fake);

        assert_eq!(report.workers_joined, 2);
        assert_eq!(report.worker_failures.len(), 2);
        assert!(!report.allocation_failed);
    }

    #[test]
    fn test_heartbeat_does_not_sample() {
        let observed = Arc::new(AtomicUsize::new(0));
        let config = StressConfig::gpu(Duration::from_millis(50), 16);
        let mut session =
            StressSession::new(config, Cadence::Heartbeat(Duration::from_millis(10)));
        let mut fake = sampler(Ok(99.0));

        let report = session.run(
            |_| {
                Box::new(Waiter {
                    observed: observed.clone(),
                })
            },
            &mut fake,
        );

        assert_eq!(fake.calls, 0);
        assert_eq!(report.samples_logged, 0);
        assert_eq!(report.workers_joined, 1);
        assert!(report.stopped_after >= Duration::from_millis(50));
    }

    #[test]
    fn test_clock_starts_after_slow_warmup() {
        let config = StressConfig::memory(Duration::from_millis(80), 1);
        let mut session = StressSession::new(config, Cadence::Fixed(Duration::from_millis(10)));
        let mut fake = sampler(Ok(5.0));

        let report = session.run(
            |_| {
                Box::new(SlowStart {
                    warmup: Duration::from_millis(150),
                })
            },
            &mut fake,
        );

        assert_eq!(report.workers_ready, 1);
        assert!(report.warmup >= Duration::from_millis(150));
        assert!(report.stopped_after >= Duration::from_millis(80));
        match &report.worker_reports[..] {
            [WorkerReport::Memory { held_for, .. }] => {
                assert!(*held_for >= Duration::from_millis(80))
            }
            other => panic!("unexpected reports: {:?}", other),
        }
        assert!(report.samples_logged >= 1);
    }

    #[test]
    fn test_no_ready_worker_skips_monitoring() {
        let config = StressConfig::memory(Duration::from_secs(30), 10);
        let mut session = StressSession::new(config, Cadence::Fixed(Duration::from_millis(10)));
        let mut fake = sampler(Ok(10.0));

        let start = Instant::now();
        let report = session.run(|_| Box::new(Failing), &mut fake);

        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(report.workers_ready, 0);
        assert_eq!(fake.calls, 0);
        assert_eq!(report.workers_joined, 1);
        assert!(report.allocation_failed);
    }
}
