//! Test Runner
//!
//! Spawns the two workers, pins each to its core, and drives one test case
//! through prepare, rendezvous and work. Joining the workers is the only
//! blocking step.

use crate::affinity::{CoreBinder, OsCoreBinder};
use crate::barrier::SpinLatch;
use crate::case::{ConfigError, Role, SetupError, TestCase};
use crate::frequency::estimate_cpu_frequency_ghz;
use crate::worker::{worker_main, FailureSlot};
use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{fence, Ordering};
use std::thread;
use thiserror::Error;
use tracing::{debug, error, info};

/// Setup failure tagged with the worker it happened on
#[derive(Debug)]
pub struct WorkerFailure {
    pub role: Role,
    pub error: SetupError,
}

impl fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unexpected error at {}: {}", self.role, self.error)
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("{} worker(s) failed to set up", .0.len())]
    Setup(Vec<WorkerFailure>),

    #[error("{role} panicked during the timed phase")]
    WorkPanicked { role: Role },
}

/// Runs test cases on a fixed pair of cores
pub struct TestRunner<B = OsCoreBinder> {
    cores: [usize; 2],
    binder: B,
    cycles_per_ns: Option<f64>,
}

impl TestRunner {
    /// Runner binding the primary worker to `primary` and the secondary to
    /// `secondary`
    pub fn new(primary: usize, secondary: usize) -> Self {
        Self {
            cores: [primary, secondary],
            binder: OsCoreBinder,
            cycles_per_ns: None,
        }
    }
}

impl<B: CoreBinder> TestRunner<B> {
    /// Replace the core binder
    pub fn with_binder<B2: CoreBinder>(self, binder: B2) -> TestRunner<B2> {
        TestRunner {
            cores: self.cores,
            binder,
            cycles_per_ns: self.cycles_per_ns,
        }
    }

    /// Fix the counter frequency used for nanosecond output
    pub fn with_frequency(mut self, cycles_per_ns: Option<f64>) -> Self {
        self.cycles_per_ns = cycles_per_ns;
        self
    }

    pub fn cores(&self) -> [usize; 2] {
        self.cores
    }

    /// Configured frequency, else the best-effort recorder
    pub fn frequency(&self) -> Option<f64> {
        self.cycles_per_ns.or_else(estimate_cpu_frequency_ghz)
    }

    /// Run `case` once on both workers.
    ///
    /// A fresh shared line is allocated for every run. The configuration is
    /// checked before any worker starts. Setup failures of either worker come
    /// back as [`RunError::Setup`]; in that case neither worker entered its
    /// timed phase.
    pub fn execute<T: TestCase>(&self, case: &mut T) -> Result<(), RunError> {
        case.config().validate()?;

        let name = case.name();
        let [primary_core, secondary_core] = self.cores;
        info!(
            case = name,
            primary_core,
            secondary_core,
            attempts = case.config().attempts_count,
            "starting run"
        );

        let line = Box::<T::Line>::default();
        let latch = SpinLatch::new(2);
        let slots = [FailureSlot::new(), FailureSlot::new()];
        let binder: &dyn CoreBinder = &self.binder;

        let (mut primary, mut secondary) = case.participants(&line);

        let joined = thread::scope(|s| {
            let primary_handle = thread::Builder::new()
                .name("linebench-primary".into())
                .spawn_scoped(s, || {
                    worker_main(
                        Role::Primary,
                        primary_core,
                        binder,
                        &mut primary,
                        &latch,
                        &slots,
                    )
                });
            let primary_handle = match primary_handle {
                Ok(handle) => handle,
                Err(err) => {
                    // Nothing started, so nothing waits on the latch
                    let _ = slots[0].set(SetupError::Spawn(err));
                    return [Ok(false), Ok(false)];
                }
            };

            let secondary_handle = thread::Builder::new()
                .name("linebench-secondary".into())
                .spawn_scoped(s, || {
                    worker_main(
                        Role::Secondary,
                        secondary_core,
                        binder,
                        &mut secondary,
                        &latch,
                        &slots,
                    )
                });
            let secondary_joined = match secondary_handle {
                Ok(handle) => handle.join(),
                Err(err) => {
                    // Arrive on the missing worker's behalf so the primary
                    // sees the failure instead of waiting forever
                    let _ = slots[1].set(SetupError::Spawn(err));
                    fence(Ordering::Release);
                    latch.arrive_and_wait();
                    Ok(false)
                }
            };

            [primary_handle.join(), secondary_joined]
        });

        let failures: Vec<WorkerFailure> = [Role::Primary, Role::Secondary]
            .into_iter()
            .zip(slots)
            .filter_map(|(role, slot)| slot.into_inner().map(|error| WorkerFailure { role, error }))
            .collect();
        if !failures.is_empty() {
            return Err(RunError::Setup(failures));
        }

        for (role, result) in [Role::Primary, Role::Secondary].into_iter().zip(joined) {
            if result.is_err() {
                return Err(RunError::WorkPanicked { role });
            }
        }

        debug!(case = name, "run complete");
        Ok(())
    }

    /// Run `case` and print its report to `sink`.
    ///
    /// Returns the process exit status: 0 on success, 1 if a worker failed.
    /// Failures go to stderr and no report is written.
    pub fn run<T: TestCase>(&self, case: &mut T, sink: &mut dyn Write) -> i32 {
        if let Err(err) = self.execute(case) {
            surface_failures(&err);
            return 1;
        }

        match write_result(case, sink, self.frequency()) {
            Ok(()) => 0,
            Err(err) => {
                error!(error = %err, "unable to write report");
                eprintln!("unable to write report: {}", err);
                1
            }
        }
    }
}

fn write_result<T: TestCase>(
    case: &T,
    sink: &mut dyn Write,
    cycles_per_ns: Option<f64>,
) -> io::Result<()> {
    writeln!(sink, "Test case result:")?;
    case.report(sink, cycles_per_ns)?;
    writeln!(sink)?;
    sink.flush()
}

/// Print each failure of a run to stderr, one line per worker.
pub fn surface_failures(err: &RunError) {
    match err {
        RunError::Config(err) => {
            error!(error = %err, "run rejected");
            eprintln!("invalid configuration: {}", err);
        }
        RunError::Setup(failures) => {
            for failure in failures {
                error!(role = %failure.role, error = %failure.error, "worker setup failed");
                eprintln!("{}", failure);
            }
        }
        RunError::WorkPanicked { role } => {
            error!(%role, "timed phase panicked");
            eprintln!("unexpected error at {}: panicked during the timed phase", role);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::case::{BenchConfig, Participant};
    use crate::line::SharedCacheLine;
    use std::sync::atomic::{AtomicU32, AtomicU64};

    /// Binder that leaves threads wherever the scheduler puts them
    pub(crate) struct NoopBinder;

    impl CoreBinder for NoopBinder {
        fn bind_current(&self, _core: usize) -> Result<(), SetupError> {
            Ok(())
        }
    }

    /// Binder that refuses one core
    struct RefusingBinder(usize);

    impl CoreBinder for RefusingBinder {
        fn bind_current(&self, core: usize) -> Result<(), SetupError> {
            if core == self.0 {
                return Err(SetupError::Affinity {
                    core,
                    source: io::Error::from_raw_os_error(libc::EINVAL),
                });
            }
            Ok(())
        }
    }

    /// Shared event log for [`Recorder`]
    #[derive(Default)]
    struct Events {
        ticks: AtomicU64,
        prepared_at: [AtomicU64; 2],
        worked_at: [AtomicU64; 2],
        work_calls: [AtomicU32; 2],
    }

    impl Events {
        fn tick(&self) -> u64 {
            self.ticks.fetch_add(1, Ordering::SeqCst) + 1
        }
    }

    struct Side<'a> {
        index: usize,
        events: &'a Events,
        fail_prepare: bool,
        panic_in_work: bool,
    }

    impl Participant for Side<'_> {
        fn prepare(&mut self) -> Result<(), SetupError> {
            if self.fail_prepare {
                return Err(SetupError::Panicked("injected".into()));
            }
            // Give the peer a chance to run ahead if the rendezvous were broken
            thread::sleep(std::time::Duration::from_millis(5 * self.index as u64));
            let at = self.events.tick();
            self.events.prepared_at[self.index].store(at, Ordering::SeqCst);
            Ok(())
        }

        fn work(&mut self) {
            self.events.work_calls[self.index].fetch_add(1, Ordering::SeqCst);
            let at = self.events.tick();
            self.events.worked_at[self.index].store(at, Ordering::SeqCst);
            if self.panic_in_work {
                panic!("broke the no-fail contract");
            }
        }
    }

    /// Test case that records when each phase ran
    #[derive(Default)]
    struct Recorder {
        config: BenchConfig,
        events: Events,
        fail_prepare: [bool; 2],
        panic_in_work: [bool; 2],
    }

    impl TestCase for Recorder {
        type Primary<'a> = Side<'a>;
        type Secondary<'a> = Side<'a>;
        type Line = SharedCacheLine;

        fn name(&self) -> &'static str {
            "recorder"
        }

        fn set_config(&mut self, config: BenchConfig) {
            self.config = config;
        }

        fn config(&self) -> &BenchConfig {
            &self.config
        }

        fn participants<'a>(&'a mut self, _line: &'a SharedCacheLine) -> (Side<'a>, Side<'a>) {
            let events = &self.events;
            let (fail_prepare, panic_in_work) = (self.fail_prepare, self.panic_in_work);
            let side = move |index: usize| Side {
                index,
                events,
                fail_prepare: fail_prepare[index],
                panic_in_work: panic_in_work[index],
            };
            (side(0), side(1))
        }

        fn durations(&self) -> Vec<Option<f64>> {
            vec![Some(10.0), Some(20.0), None]
        }
    }

    fn work_calls(recorder: &Recorder) -> [u32; 2] {
        [
            recorder.events.work_calls[0].load(Ordering::SeqCst),
            recorder.events.work_calls[1].load(Ordering::SeqCst),
        ]
    }

    #[test]
    fn test_prepare_completes_before_any_work() {
        let mut recorder = Recorder::default();
        TestRunner::new(0, 1)
            .with_binder(NoopBinder)
            .execute(&mut recorder)
            .unwrap();

        let prepared = recorder.events.prepared_at.iter().map(|a| a.load(Ordering::SeqCst));
        let worked = recorder.events.worked_at.iter().map(|a| a.load(Ordering::SeqCst));
        let last_prepare = prepared.max().unwrap();
        let first_work = worked.min().unwrap();

        assert!(last_prepare > 0);
        assert!(last_prepare < first_work);
        assert_eq!(work_calls(&recorder), [1, 1]);
    }

    #[test]
    fn test_primary_failure_skips_secondary_work() {
        let mut recorder = Recorder {
            fail_prepare: [true, false],
            ..Default::default()
        };

        let err = TestRunner::new(0, 1)
            .with_binder(NoopBinder)
            .execute(&mut recorder)
            .unwrap_err();

        match err {
            RunError::Setup(failures) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].role, Role::Primary);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(work_calls(&recorder), [0, 0]);
    }

    #[test]
    fn test_secondary_failure_skips_primary_work() {
        let mut recorder = Recorder {
            fail_prepare: [false, true],
            ..Default::default()
        };

        let result = TestRunner::new(0, 1).with_binder(NoopBinder).execute(&mut recorder);
        assert!(matches!(result, Err(RunError::Setup(ref f)) if f[0].role == Role::Secondary));
        assert_eq!(work_calls(&recorder), [0, 0]);
    }

    #[test]
    fn test_binding_failure_is_fatal() {
        let mut recorder = Recorder::default();
        let result = TestRunner::new(2, 3)
            .with_binder(RefusingBinder(3))
            .execute(&mut recorder);

        match result {
            Err(RunError::Setup(failures)) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].role, Role::Secondary);
                assert!(matches!(failures[0].error, SetupError::Affinity { core: 3, .. }));
                assert_eq!(
                    failures[0].to_string(),
                    "unexpected error at worker 2: unable to set thread affinity to cpu 3: Invalid argument (os error 22)"
                );
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(work_calls(&recorder), [0, 0]);
    }

    #[test]
    fn test_work_panic_is_reported() {
        let mut recorder = Recorder {
            panic_in_work: [false, true],
            ..Default::default()
        };

        let result = TestRunner::new(0, 1).with_binder(NoopBinder).execute(&mut recorder);
        assert!(matches!(
            result,
            Err(RunError::WorkPanicked {
                role: Role::Secondary
            })
        ));
    }

    #[test]
    fn test_run_writes_report() {
        let mut recorder = Recorder::default();
        let mut out = Vec::new();

        let status = TestRunner::new(0, 1)
            .with_binder(NoopBinder)
            .with_frequency(Some(2.0))
            .run(&mut recorder, &mut out);

        assert_eq!(status, 0);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Test case result:\n"));
        assert!(text.contains("samples      : 2 of 3 (1 dropped)"));
        assert!(text.contains("cycles mean  : 15.00"));
        assert!(text.contains("frequency    : 2.000 GHz"));
        assert!(text.ends_with("\n\n"));
    }

    #[test]
    fn test_invalid_config_rejected_before_spawn() {
        let mut recorder = Recorder::default();
        recorder.set_config(BenchConfig {
            attempts_count: 2,
            round_trips: 3,
            ..Default::default()
        });

        let result = TestRunner::new(0, 1)
            .with_binder(NoopBinder)
            .execute(&mut recorder);

        assert!(matches!(
            result,
            Err(RunError::Config(ConfigError::RoundTrips(3)))
        ));
        assert_eq!(work_calls(&recorder), [0, 0]);
        assert_eq!(recorder.events.ticks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_run_rejects_invalid_config() {
        let mut recorder = Recorder::default();
        recorder.set_config(BenchConfig::with_attempts(0));
        let mut out = Vec::new();

        let status = TestRunner::new(0, 1)
            .with_binder(NoopBinder)
            .run(&mut recorder, &mut out);

        assert_eq!(status, 1);
        assert!(out.is_empty());
    }

    #[test]
    fn test_run_failure_writes_nothing() {
        let mut recorder = Recorder {
            fail_prepare: [true, true],
            ..Default::default()
        };
        let mut out = Vec::new();

        let status = TestRunner::new(0, 1)
            .with_binder(NoopBinder)
            .run(&mut recorder, &mut out);

        assert_eq!(status, 1);
        assert!(out.is_empty());
    }
}
