//! LineBench CLI Library
//!
//! Argument parsing, logging setup and wiring for the `linebench` binary.
//!
//! # Example
//!
//! ```text
//! linebench --t1-cpuid 2 --t2-cpuid 6 --mode ping-pong --attempts 5000
//! ```

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use linebench_core::frequency::{calibrate_cycles_per_ns, estimate_cpu_frequency_ghz};
use linebench_core::{
    allowed_cpus, surface_failures, BenchConfig, CoreBinder, OneSided, OneSidedAsm,
    OneSidedAsmRelaxedBranchPredictor, PingPong, TestCase, TestMode, TestRunner, Tsc,
    DEFAULT_ATTEMPTS, DEFAULT_NOP_DELAY, DEFAULT_ROUND_TRIPS, DEFAULT_WINDOW,
};
use linebench_report::{generate_csv_report, generate_json_report, OutputFormat, Report, RunInfo};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// How long `--calibrate` watches the counter
const CALIBRATION_WINDOW: Duration = Duration::from_millis(100);

/// LineBench CLI arguments
#[derive(Parser, Debug)]
#[command(name = "linebench")]
#[command(author, version, about = "Cache line transfer latency between two CPU cores")]
pub struct Cli {
    /// CPU id worker 1 (the producer) is bound to
    #[arg(long = "t1-cpuid", value_name = "N", required_unless_present = "list_cpus")]
    pub t1_cpuid: Option<usize>,

    /// CPU id worker 2 (the consumer) is bound to
    #[arg(long = "t2-cpuid", value_name = "N", required_unless_present = "list_cpus")]
    pub t2_cpuid: Option<usize>,

    /// Number of timed attempts
    #[arg(long, value_name = "N", default_value_t = DEFAULT_ATTEMPTS)]
    pub attempts: u32,

    /// Test mode: 0 one-sided, 1 one-sided-asm, 2 relaxed-branch-predictor, 3 ping-pong
    #[arg(long, value_name = "MODE", default_value = "0")]
    pub mode: TestMode,

    /// Transfers per ping-pong attempt (even)
    #[arg(long, value_name = "N", default_value_t = DEFAULT_ROUND_TRIPS)]
    pub round_trips: u32,

    /// Samples per attempt taken by the branch-free consumer
    #[arg(long, value_name = "N", default_value_t = DEFAULT_WINDOW)]
    pub window: usize,

    /// No-ops the producer executes before each publish
    #[arg(long, value_name = "N", default_value_t = DEFAULT_NOP_DELAY)]
    pub delay: u32,

    /// Counter frequency in GHz, overriding the probe
    #[arg(long, value_name = "GHZ")]
    pub frequency_ghz: Option<f64>,

    /// Measure the counter frequency if the probe finds nothing
    #[arg(long)]
    pub calibrate: bool,

    /// Output format: human, json, csv
    #[arg(long, default_value = "human")]
    pub format: OutputFormat,

    /// Output file (stdout if not specified)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// List the CPUs this process may be bound to and exit
    #[arg(long)]
    pub list_cpus: bool,
}

impl Cli {
    /// Measurement configuration carried by the arguments
    pub fn bench_config(&self) -> BenchConfig {
        BenchConfig {
            attempts_count: self.attempts,
            nop_delay: self.delay,
            window: self.window,
            round_trips: self.round_trips,
        }
    }
}

/// Run the LineBench CLI with the process arguments.
///
/// Exits the process with status 1 if a worker fails to set up.
pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let status = run_with_cli(cli)?;
    if status != 0 {
        std::process::exit(status);
    }
    Ok(())
}

/// Run the LineBench CLI with pre-parsed arguments, returning the exit status.
pub fn run_with_cli(cli: Cli) -> anyhow::Result<i32> {
    init_logging(cli.verbose);

    if cli.list_cpus {
        list_cpus()?;
        return Ok(0);
    }

    let primary = cli.t1_cpuid.context("--t1-cpuid is required")?;
    let secondary = cli.t2_cpuid.context("--t2-cpuid is required")?;

    match allowed_cpus() {
        Ok(allowed) => check_cores([primary, secondary], &allowed)?,
        Err(err) => warn!(error = %err, "unable to list allowed cpus, skipping core check"),
    }
    if primary == secondary {
        warn!(cpu = primary, "both workers share one cpu; no cache line crosses cores");
    }

    let config = cli.bench_config();
    config.validate()?;

    let cycles_per_ns = resolve_frequency(cli.frequency_ghz, cli.calibrate)?;
    let runner = TestRunner::new(primary, secondary).with_frequency(cycles_per_ns);

    let output = cli.output.as_deref();
    match cli.mode {
        TestMode::OneSided => execute_case(OneSided::new(), &cli, config, &runner, output),
        TestMode::OneSidedAsm => execute_case(OneSidedAsm::new(), &cli, config, &runner, output),
        TestMode::OneSidedAsmRelaxedBranchPredictor => execute_case(
            OneSidedAsmRelaxedBranchPredictor::new(),
            &cli,
            config,
            &runner,
            output,
        ),
        TestMode::PingPong => execute_case(PingPong::new(), &cli, config, &runner, output),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "linebench=debug" } else { "linebench=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // Reports go to stdout; keep the log out of them
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn list_cpus() -> anyhow::Result<()> {
    let cpus = allowed_cpus().context("unable to list allowed cpus")?;
    let cpus: Vec<String> = cpus.iter().map(ToString::to_string).collect();
    println!("{}", cpus.join(" "));
    Ok(())
}

/// Reject core ids this process can never be bound to.
fn check_cores(cores: [usize; 2], allowed: &[usize]) -> anyhow::Result<()> {
    for (worker, core) in cores.into_iter().enumerate() {
        if !allowed.contains(&core) {
            bail!(
                "cpu {} for worker {} is not available to this process (allowed: {:?})",
                core,
                worker + 1,
                allowed
            );
        }
    }
    Ok(())
}

/// Pick the counter frequency: explicit value, then probe, then calibration.
fn resolve_frequency(explicit: Option<f64>, calibrate: bool) -> anyhow::Result<Option<f64>> {
    if let Some(ghz) = explicit {
        if !(ghz.is_finite() && ghz > 0.0) {
            return Err(anyhow!("frequency must be a positive number of GHz, got {}", ghz));
        }
        return Ok(Some(ghz));
    }

    if let Some(ghz) = estimate_cpu_frequency_ghz() {
        return Ok(Some(ghz));
    }

    if calibrate {
        let measured = calibrate_cycles_per_ns(&Tsc, CALIBRATION_WINDOW);
        info!(?measured, "calibrated cycle counter");
        return Ok(measured);
    }

    debug!("counter frequency unknown");
    Ok(None)
}

fn execute_case<T: TestCase>(
    mut case: T,
    cli: &Cli,
    config: BenchConfig,
    runner: &TestRunner,
    output: Option<&Path>,
) -> anyhow::Result<i32> {
    case.set_config(config);

    let rendered = match cli.format {
        OutputFormat::Human => return write_human(&mut case, runner, output),
        OutputFormat::Json | OutputFormat::Csv => {
            let Some(report) = measure(&mut case, cli.mode, runner) else {
                return Ok(1);
            };
            if cli.format == OutputFormat::Json {
                generate_json_report(&report)?
            } else {
                generate_csv_report(&report)
            }
        }
    };

    if let Some(path) = output {
        std::fs::write(path, rendered.as_bytes())
            .with_context(|| format!("unable to write {}", path.display()))?;
        println!("Report written to: {}", path.display());
    } else {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(rendered.as_bytes())?;
        stdout.flush()?;
    }

    Ok(0)
}

/// Print the latency block from the runner.
///
/// With `-o` the block is buffered and the file is only created once the run
/// succeeded, so a failed run leaves no empty report behind.
fn write_human<T: TestCase, B: CoreBinder>(
    case: &mut T,
    runner: &TestRunner<B>,
    output: Option<&Path>,
) -> anyhow::Result<i32> {
    let Some(path) = output else {
        return Ok(runner.run(case, &mut std::io::stdout().lock()));
    };

    let mut buffer = Vec::new();
    let status = runner.run(case, &mut buffer);
    if status != 0 {
        return Ok(status);
    }

    std::fs::write(path, &buffer)
        .with_context(|| format!("unable to write {}", path.display()))?;
    println!("Report written to: {}", path.display());
    Ok(status)
}

/// Run once and collect a full report; `None` if a worker failed.
fn measure<T: TestCase>(case: &mut T, mode: TestMode, runner: &TestRunner) -> Option<Report> {
    if let Err(err) = runner.execute(case) {
        surface_failures(&err);
        return None;
    }

    let [primary_core, secondary_core] = runner.cores();
    let run = RunInfo {
        mode: mode.name().to_string(),
        primary_core,
        secondary_core,
        attempts: case.config().attempts_count,
    };
    Some(Report::new(run, case.metrics(runner.frequency())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use linebench_core::SetupError;

    #[test]
    fn test_parse_defaults() {
        let cli = Cli::try_parse_from(["linebench", "--t1-cpuid", "2", "--t2-cpuid", "5"]).unwrap();
        assert_eq!(cli.t1_cpuid, Some(2));
        assert_eq!(cli.t2_cpuid, Some(5));
        assert_eq!(cli.mode, TestMode::OneSided);
        assert_eq!(cli.format, OutputFormat::Human);
        assert_eq!(cli.bench_config(), BenchConfig::default());
    }

    #[test]
    fn test_parse_mode_by_index_and_name() {
        let cli = Cli::try_parse_from([
            "linebench", "--t1-cpuid", "0", "--t2-cpuid", "1", "--mode", "3",
        ])
        .unwrap();
        assert_eq!(cli.mode, TestMode::PingPong);

        let cli = Cli::try_parse_from([
            "linebench",
            "--t1-cpuid",
            "0",
            "--t2-cpuid",
            "1",
            "--mode",
            "relaxed-branch-predictor",
            "--window",
            "64",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.mode, TestMode::OneSidedAsmRelaxedBranchPredictor);
        assert_eq!(cli.bench_config().window, 64);
        assert_eq!(cli.format, OutputFormat::Json);
    }

    #[test]
    fn test_cores_are_required() {
        assert!(Cli::try_parse_from(["linebench", "--t1-cpuid", "0"]).is_err());
        assert!(Cli::try_parse_from(["linebench", "--list-cpus"]).is_ok());
    }

    #[test]
    fn test_bad_values_rejected() {
        let base = ["linebench", "--t1-cpuid", "0", "--t2-cpuid", "1"];
        let with = |extra: &[&'static str]| {
            let args: Vec<&str> = base.iter().chain(extra).copied().collect();
            Cli::try_parse_from(args)
        };

        assert!(with(&["--mode", "7"]).is_err());
        assert!(with(&["--attempts", "-5"]).is_err());
        assert!(with(&["--format", "html"]).is_err());
    }

    #[test]
    fn test_check_cores() {
        assert!(check_cores([0, 2], &[0, 1, 2, 3]).is_ok());

        let err = check_cores([0, 9], &[0, 1, 2, 3]).unwrap_err();
        assert!(err.to_string().contains("cpu 9 for worker 2"));
    }

    #[test]
    fn test_explicit_frequency_wins() {
        assert_eq!(resolve_frequency(Some(3.5), true).unwrap(), Some(3.5));
        assert!(resolve_frequency(Some(0.0), false).is_err());
        assert!(resolve_frequency(Some(f64::NAN), false).is_err());
    }

    /// Binder that accepts every core, or refuses all of them
    struct FixedBinder(bool);

    impl CoreBinder for FixedBinder {
        fn bind_current(&self, core: usize) -> Result<(), SetupError> {
            if self.0 {
                return Ok(());
            }
            Err(SetupError::Affinity {
                core,
                source: std::io::Error::from(std::io::ErrorKind::InvalidInput),
            })
        }
    }

    fn report_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("linebench-{}-{}.txt", tag, std::process::id()))
    }

    #[test]
    fn test_failed_run_leaves_no_report_file() {
        let path = report_path("failed");
        let _ = std::fs::remove_file(&path);

        let mut case = OneSided::new();
        case.set_config(BenchConfig::with_attempts(8));
        let runner = TestRunner::new(0, 1).with_binder(FixedBinder(false));

        let status = write_human(&mut case, &runner, Some(&path)).unwrap();
        assert_eq!(status, 1);
        assert!(!path.exists());
    }

    #[test]
    fn test_successful_run_writes_report_file() {
        let path = report_path("written");

        let mut case = OneSided::new();
        case.set_config(BenchConfig::with_attempts(8));
        let runner = TestRunner::new(0, 1)
            .with_binder(FixedBinder(true))
            .with_frequency(Some(1.0));

        let status = write_human(&mut case, &runner, Some(&path)).unwrap();
        assert_eq!(status, 0);

        let text = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert!(text.starts_with("Test case result:\n"));
        assert!(text.contains("samples      : 8 of 8"));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let cli = Cli::try_parse_from([
            "linebench", "--t1-cpuid", "0", "--t2-cpuid", "0", "--attempts", "0",
        ])
        .unwrap();
        assert!(cli.bench_config().validate().is_err());
    }
}
