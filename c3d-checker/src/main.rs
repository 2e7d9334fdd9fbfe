//! Model-checking harness CLI: §6 of the spec ("Configuration").
//!
//! Grounded on the teacher's own CLI binaries (`clap` derive for args,
//! `sloggers` for a terminal logger at debug level), generalized from a
//! game-server runner to a protocol checker.

mod explore;

use c3d_core::{Config, System, Value};
use clap::Parser;
use slog::{debug, info, o, warn, Logger};
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "c3d-checker", about = "Model checker for the C3D cache-coherence protocol")]
struct Args {
    /// Number of sockets in the model (minimum 2).
    #[arg(long, default_value_t = 3)]
    sockets: u8,

    /// Cardinality of the value domain.
    #[arg(long, default_value_t = 2)]
    values: u8,

    /// Number of steps for the randomized explorer.
    #[arg(long, default_value_t = 10_000)]
    steps: usize,

    /// RNG seed for the randomized explorer.
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Reproduce the source model's assertion on sole-sharer GETX instead of
    /// taking the fast upgrade path (§9 Open Question).
    #[arg(long)]
    strict_upgrade_assertion: bool,

    /// Run the bounded exhaustive BFS explorer instead of the randomized walk.
    #[arg(long)]
    exhaustive: bool,

    /// Maximum depth for the exhaustive explorer.
    #[arg(long, default_value_t = 6)]
    max_depth: usize,

    /// Maximum number of distinct states the exhaustive explorer will visit
    /// before giving up and reporting truncation.
    #[arg(long, default_value_t = 200_000)]
    max_states: usize,

    #[arg(long, value_enum, default_value = "debug")]
    log_level: LogLevel,
}

#[derive(Debug, Clone, clap::ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
}

impl From<LogLevel> for Severity {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Severity::Trace,
            LogLevel::Debug => Severity::Debug,
            LogLevel::Info => Severity::Info,
            LogLevel::Warning => Severity::Warning,
            LogLevel::Error => Severity::Error,
        }
    }
}

fn build_logger(level: LogLevel) -> Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(level.into());
    builder.destination(Destination::Stderr);
    builder
        .build()
        .expect("terminal logger configuration is always valid")
}

fn main() -> ExitCode {
    let args = Args::parse();
    let root = build_logger(args.log_level);
    let log = root.new(o!("sockets" => args.sockets, "values" => args.values));

    let config = match Config::new(args.sockets, args.values, args.strict_upgrade_assertion) {
        Ok(c) => c,
        Err(e) => {
            warn!(log, "invalid configuration"; "error" => %e);
            return ExitCode::FAILURE;
        }
    };

    if args.exhaustive {
        run_exhaustive(&log, config, args.max_depth, args.max_states)
    } else {
        run_randomized(&log, config, args.steps, args.seed)
    }
}

fn run_randomized(log: &Logger, config: Config, steps: usize, seed: u64) -> ExitCode {
    info!(log, "starting randomized walk"; "steps" => steps, "seed" => seed);
    let mut sys = System::new(config, Value(0));
    let report = explore::randomized_walk(&mut sys, steps, seed);
    debug!(log, "walk finished"; "steps_taken" => report.steps_taken);

    match report.violation {
        None => {
            info!(log, "no invariant violation found"; "steps_taken" => report.steps_taken);
            ExitCode::SUCCESS
        }
        Some(violation) => {
            warn!(log, "protocol violation"; "error" => %violation, "trace_len" => sys.trace.len());
            print_trace(log, &sys);
            ExitCode::FAILURE
        }
    }
}

fn run_exhaustive(log: &Logger, config: Config, max_depth: usize, max_states: usize) -> ExitCode {
    info!(log, "starting bounded exhaustive search"; "max_depth" => max_depth, "max_states" => max_states);
    let sys = System::new(config, Value(0));
    let report = explore::bounded_bfs(sys, max_depth, max_states);

    info!(
        log,
        "search finished";
        "states_visited" => report.states_visited,
        "max_depth_reached" => report.max_depth_reached,
        "truncated" => report.truncated,
    );

    match report.violation {
        None => {
            if report.truncated {
                warn!(log, "search truncated before exhausting the state space; result is inconclusive");
            } else {
                info!(log, "no invariant violation found in the fully-explored state space");
            }
            ExitCode::SUCCESS
        }
        Some((violation, path)) => {
            warn!(log, "protocol violation"; "error" => %violation);
            for (i, rule) in path.iter().enumerate() {
                debug!(log, "counterexample step"; "index" => i, "rule" => %rule);
            }
            ExitCode::FAILURE
        }
    }
}

fn print_trace(log: &Logger, sys: &System) {
    for (i, step) in sys.trace.steps().iter().enumerate() {
        debug!(log, "trace step"; "index" => i, "rule" => %step.rule);
    }
}
