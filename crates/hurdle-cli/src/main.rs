//! Hurdle command-line tracer.
//!
//! Provides the `hurdle` binary. `trace` runs a source file through the same
//! tracer registry the HTTP server uses and prints the `results` JSON;
//! `languages` lists the registered backends.

use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use hurdle_trace::{run_all, LineSnapshot, TraceError, TraceOptions, TracerRegistry};

/// Step tracer for small programs.
#[derive(Parser)]
#[command(name = "hurdle", about = "Trace a program's execution step by step")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Trace a source file once per input and print the traces as JSON.
    Trace {
        /// Source file to trace.
        file: PathBuf,

        /// Standard input of one run. Repeat for several runs.
        #[arg(short, long = "input")]
        inputs: Vec<String>,

        /// File whose contents are the standard input of one more run.
        #[arg(long)]
        input_file: Option<PathBuf>,

        /// Language of the source file.
        #[arg(short, long, default_value = "python")]
        language: String,

        /// Maximum number of recorded steps per run.
        #[arg(long)]
        max_steps: Option<usize>,

        /// Wall-clock limit per run, in milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// When line snapshots are taken: before or after the line runs.
        #[arg(long, default_value = "after", value_parser = parse_line_snapshot)]
        line_snapshot: LineSnapshot,

        /// Pretty-print the JSON output.
        #[arg(long)]
        pretty: bool,
    },
    /// List the languages the tracer knows.
    Languages,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::Trace {
            file,
            inputs,
            input_file,
            language,
            max_steps,
            timeout_ms,
            line_snapshot,
            pretty,
        } => {
            let mut options = TraceOptions {
                line_snapshot,
                ..TraceOptions::default()
            };
            if let Some(steps) = max_steps {
                options.budget.max_steps = steps;
            }
            if let Some(ms) = timeout_ms {
                options.budget.timeout = Duration::from_millis(ms);
            }
            run_trace(&file, inputs, input_file.as_deref(), &language, options, pretty)
        }
        Commands::Languages => {
            let registry = TracerRegistry::with_defaults(TraceOptions::default());
            for info in registry.languages() {
                let status = if info.implemented { "" } else { " (stub)" };
                println!("{}{}", info.language, status);
            }
            0
        }
    };
    process::exit(exit_code);
}

/// Execute the trace subcommand.
///
/// Returns exit code: 0 = traced (even if a trace ends in an error step),
/// 1 = worker failure, 2 = unsupported language, 3 = I/O error.
fn run_trace(
    file: &Path,
    mut inputs: Vec<String>,
    input_file: Option<&Path>,
    language: &str,
    options: TraceOptions,
    pretty: bool,
) -> i32 {
    let registry = TracerRegistry::with_defaults(options);
    let tracer = match registry.get(language) {
        Ok(tracer) => tracer,
        Err(e) => {
            debug!(language, "no tracer registered");
            eprintln!("Error: {}", e);
            return 2;
        }
    };

    let code = match std::fs::read_to_string(file) {
        Ok(code) => code,
        Err(e) => {
            warn!(path = %file.display(), error = %e, "cannot read source file");
            eprintln!("Error: failed to read '{}': {}", file.display(), e);
            return 3;
        }
    };
    if let Some(path) = input_file {
        match std::fs::read_to_string(path) {
            Ok(text) => inputs.push(text),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read input file");
                eprintln!("Error: failed to read '{}': {}", path.display(), e);
                return 3;
            }
        }
    }
    if inputs.is_empty() {
        inputs.push(String::new());
    }
    debug!(
        language,
        runs = inputs.len(),
        source_bytes = code.len(),
        "tracing source file"
    );

    let results = match run_all(tracer, &code, &inputs) {
        Ok(results) => results,
        Err(TraceError::UnsupportedLanguage(language)) => {
            eprintln!("Error: unsupported language '{}'", language);
            return 2;
        }
        Err(e) => {
            warn!(error = %e, "tracing failed");
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    debug!(
        steps = results.iter().map(|r| r.trace.len()).sum::<usize>(),
        "traces complete"
    );

    let body = serde_json::json!({ "results": results });
    let rendered = if pretty {
        serde_json::to_string_pretty(&body)
    } else {
        serde_json::to_string(&body)
    };
    match rendered {
        Ok(json) => {
            println!("{}", json);
            0
        }
        Err(e) => {
            eprintln!("Error: failed to serialize traces: {}", e);
            3
        }
    }
}

fn parse_line_snapshot(s: &str) -> Result<LineSnapshot, String> {
    LineSnapshot::parse(s)
        .ok_or_else(|| format!("invalid line snapshot '{}', expected before/after", s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn trace_flags_parse() {
        let cli = Cli::try_parse_from([
            "hurdle",
            "trace",
            "prog.py",
            "--input",
            "1",
            "-i",
            "2",
            "--max-steps",
            "50",
            "--line-snapshot",
            "before",
            "--pretty",
        ])
        .unwrap();
        match cli.command {
            Commands::Trace {
                file,
                inputs,
                language,
                max_steps,
                line_snapshot,
                pretty,
                ..
            } => {
                assert_eq!(file, PathBuf::from("prog.py"));
                assert_eq!(inputs, vec!["1", "2"]);
                assert_eq!(language, "python");
                assert_eq!(max_steps, Some(50));
                assert_eq!(line_snapshot, LineSnapshot::Before);
                assert!(pretty);
            }
            Commands::Languages => panic!("expected trace"),
        }
    }

    #[test]
    fn bad_line_snapshot_is_rejected() {
        assert!(Cli::try_parse_from(["hurdle", "trace", "p.py", "--line-snapshot", "never"]).is_err());
    }

    #[test]
    fn unsupported_language_exits_with_two() {
        let code = run_trace(
            Path::new("does-not-matter.py"),
            Vec::new(),
            None,
            "cobol",
            TraceOptions::default(),
            false,
        );
        assert_eq!(code, 2);
    }

    #[test]
    fn missing_source_file_exits_with_three() {
        let code = run_trace(
            Path::new("/nonexistent/hurdle/prog.py"),
            Vec::new(),
            None,
            "python",
            TraceOptions::default(),
            false,
        );
        assert_eq!(code, 3);
    }

    #[test]
    fn missing_input_file_exits_with_three() {
        let source = Path::new(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml");
        let code = run_trace(
            &source,
            Vec::new(),
            Some(Path::new("/nonexistent/hurdle/input.txt")),
            "python",
            TraceOptions::default(),
            false,
        );
        assert_eq!(code, 3);
    }
}
