use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use roadmap::compiler::{self, CompileOptions, FsDocumentStore};
use roadmap::core::{RunMode, SortMode};
use roadmap::parser::{parse_document, symbol_table};

#[derive(Debug, Parser)]
#[command(
    name = "roadmap",
    about = "Roadmap compiler built on the roadmap crate",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Compile a roadmap document into a prioritized task list.
    Compile(CompileArgs),

    /// Parse a roadmap document and print the extracted tasks.
    Parse(ParseArgs),

    /// Print the status-symbol legend.
    Legend,
}

#[derive(Debug, Args)]
struct CompileArgs {
    /// Roadmap document to read.
    input: PathBuf,
    /// Task-list document to overwrite.
    output: PathBuf,
    /// Sort strategy.
    #[arg(long, value_enum, default_value_t = SortModeArg::Rws)]
    sort: SortModeArg,
    /// How this run was triggered.
    #[arg(long, value_enum, default_value_t = RunModeArg::Git)]
    run_mode: RunModeArg,
    /// Any extra argument marks a direct manual invocation; required under
    /// `--run-mode manual` so automation cannot clobber a curated file.
    #[arg(trailing_var_arg = true)]
    extra: Vec<String>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum SortModeArg {
    Rws,
    Alpha,
    Status,
    Source,
}

impl From<SortModeArg> for SortMode {
    fn from(arg: SortModeArg) -> Self {
        match arg {
            SortModeArg::Rws => Self::Rws,
            SortModeArg::Alpha => Self::Alpha,
            SortModeArg::Status => Self::Status,
            SortModeArg::Source => Self::Source,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum RunModeArg {
    Git,
    Watcher,
    Manual,
}

impl From<RunModeArg> for RunMode {
    fn from(arg: RunModeArg) -> Self {
        match arg {
            RunModeArg::Git => Self::GitTriggered,
            RunModeArg::Watcher => Self::WatcherTriggered,
            RunModeArg::Manual => Self::ManualOnly,
        }
    }
}

#[derive(Debug, Args)]
struct ParseArgs {
    /// Roadmap document to read.
    input: PathBuf,
    /// Emit JSON instead of a debug representation.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = cli.verbose;
    match cli.command {
        Commands::Compile(args) => handle_compile(args, verbose),
        Commands::Parse(args) => handle_parse(args, verbose),
        Commands::Legend => handle_legend(),
    }
}

fn handle_compile(args: CompileArgs, verbose: bool) -> Result<()> {
    let CompileArgs {
        input,
        output,
        sort,
        run_mode,
        extra,
    } = args;

    let opts = CompileOptions {
        sort_mode: sort.into(),
        run_mode: run_mode.into(),
        manual_invocation: !extra.is_empty(),
    };
    if verbose {
        eprintln!(
            "Compiling {:?} -> {:?} ({:?}, {:?})",
            input, output, opts.sort_mode, opts.run_mode
        );
    }

    let outcome = compiler::compile_file(&FsDocumentStore, &input, &output, &opts)?;
    for warning in &outcome.warnings {
        eprintln!("warning: {warning}");
    }
    println!("Wrote {} tasks to {:?}", outcome.task_count, output);
    Ok(())
}

fn handle_parse(args: ParseArgs, verbose: bool) -> Result<()> {
    let ParseArgs { input, json } = args;
    if verbose {
        eprintln!("Parsing {:?}", input);
    }
    let text = fs::read_to_string(&input).with_context(|| format!("reading {:?}", input))?;
    let parsed = parse_document(&text);
    for warning in &parsed.warnings {
        eprintln!("warning: {warning}");
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&parsed)?);
    } else {
        println!("{:#?}", parsed.tasks);
    }
    Ok(())
}

fn handle_legend() -> Result<()> {
    for (symbol, status) in symbol_table() {
        println!(
            "{symbol}  @{:<15} group {:>3}",
            status.tag(),
            status.priority_group()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use roadmap::compiler::{CompileError, compile_file, compile_str};
    use std::fs;

    #[test]
    fn compile_file_round_trips_through_the_filesystem() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let input = tmp.path().join("roadmap.md");
        let output = tmp.path().join("tasks.txt");
        fs::write(
            &input,
            "## Phase 1: Rollout\n- ⏳ First task [ APP-1 ] • [ rnk:B ]\n- ⏳ Second task [ APP-2 ]\n",
        )
        .expect("write input");

        let opts = CompileOptions::default();
        let outcome =
            compile_file(&FsDocumentStore, &input, &output, &opts).expect("compile file");
        assert_eq!(outcome.task_count, 2);

        let written = fs::read_to_string(&output).expect("read output");
        assert_eq!(
            written,
            "(B) @pending First task - src:+Rollout\n(C) @pending Second task - src:+Rollout\n"
        );
    }

    #[test]
    fn compile_file_fully_replaces_prior_content() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let input = tmp.path().join("roadmap.md");
        let output = tmp.path().join("tasks.txt");
        fs::write(&input, "- ⏳ Only task [ APP-1 ]\n").expect("write input");
        fs::write(&output, "stale line one\nstale line two\nstale line three\n")
            .expect("write stale output");

        compile_file(&FsDocumentStore, &input, &output, &CompileOptions::default())
            .expect("compile file");

        let written = fs::read_to_string(&output).expect("read output");
        assert_eq!(written, "(A) @pending Only task\n");
    }

    #[test]
    fn manual_run_mode_is_gated_on_extra_arguments() {
        let automated = CompileOptions {
            run_mode: RunMode::ManualOnly,
            manual_invocation: false,
            ..CompileOptions::default()
        };
        assert!(matches!(
            compile_str("- ⏳ Guarded [ APP-1 ]\n", &automated),
            Err(CompileError::RefusedAutomatedRun)
        ));

        // The CLI derives the signal from trailing arguments.
        let extra = vec!["manual".to_string()];
        let direct = CompileOptions {
            run_mode: RunMode::ManualOnly,
            manual_invocation: !extra.is_empty(),
            ..CompileOptions::default()
        };
        assert!(compile_str("- ⏳ Guarded [ APP-1 ]\n", &direct).is_ok());
    }

    #[test]
    fn missing_input_is_a_fatal_error() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let input = tmp.path().join("does-not-exist.md");
        let output = tmp.path().join("tasks.txt");

        let result = compile_file(&FsDocumentStore, &input, &output, &CompileOptions::default());
        assert!(result.is_err());
        assert!(!output.exists(), "no output on a failed run");
    }
}
