use clap::Parser;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;

use patchc::diag::{has_errors, Diagnostic};
use patchc::events::JsonLinesSink;
use patchc::hotswap::SwapOutcome;
use patchc::pipeline::{compile, parse_patch, CompiledPatch};
use patchc::registry::Registry;
use patchc::runtime::Executor;

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    Ast,
    Layout,
    BuildInfo,
    Run,
}

#[derive(Parser, Debug)]
#[command(
    name = "patchc",
    version,
    about = "Patch compiler — compiles patches and hot-swaps them with state migration"
)]
struct Cli {
    /// Input patch source file
    source: PathBuf,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Run)]
    emit: EmitStage,

    /// Frames to run before any hot-swap
    #[arg(long, default_value_t = 1)]
    frames: usize,

    /// Patch source to hot-swap in after `--frames` frames
    #[arg(long)]
    swap: Option<PathBuf>,

    /// Frames to run after the hot-swap
    #[arg(long, default_value_t = 1)]
    then: usize,

    /// Block to print after running (repeatable; default: all blocks)
    #[arg(long)]
    probe: Vec<String>,

    /// Print compiler phases and migration decisions
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    tracing::debug!(source = %cli.source.display(), emit = ?cli.emit, "patchc start");
    let registry = Registry::builtin();
    tracing::debug!(ops = registry.len(), "registry loaded");

    let source = read_source(&cli.source);

    match cli.emit {
        EmitStage::Ast => {
            let (patch, diags) = parse_patch(&source);
            report(&diags);
            match patch {
                Some(patch) if !has_errors(&diags) => println!("{:#?}", patch),
                _ => process::exit(1),
            }
        }
        EmitStage::Layout => {
            let compiled = compile_or_exit(&source, &registry);
            print!("{}", compiled.layout);
        }
        EmitStage::BuildInfo => {
            let compiled = compile_or_exit(&source, &registry);
            println!("{}", compiled.provenance.to_json());
        }
        EmitStage::Run => run(&cli, &source, &registry),
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_target(false)
        .init();
}

fn read_source(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("patchc: error: {}: {}", path.display(), e);
            process::exit(2);
        }
    }
}

fn report(diags: &[Diagnostic]) {
    for diag in diags {
        eprintln!("patchc: {}", diag);
    }
}

fn compile_or_exit(source: &str, registry: &Registry) -> CompiledPatch {
    let result = compile(source, registry);
    report(&result.diagnostics);
    match result.compiled {
        Some(compiled) if !result.has_errors() => compiled,
        _ => process::exit(1),
    }
}

fn run(cli: &Cli, source: &str, registry: &Registry) {
    let next = cli.swap.as_ref().map(|path| {
        let next_source = read_source(path);
        compile_or_exit(&next_source, registry)
    });

    let stdout = std::io::stdout();
    let mut sink = JsonLinesSink::new(stdout.lock());
    let mut exec = Executor::new(compile_or_exit(source, registry));

    exec.run(cli.frames, &mut sink);
    if let Some(next) = next {
        print_probes(&exec, &cli.probe, sink.get_mut());
        exec.request_hot_swap(next);
        for outcome in exec.run(cli.then, &mut sink) {
            match outcome {
                SwapOutcome::Installed { report: r, .. } => report(&r.diagnostics),
                SwapOutcome::Aborted { diagnostic, .. } => report(&[diagnostic]),
            }
        }
    }
    print_probes(&exec, &cli.probe, sink.get_mut());
}

fn print_probes(exec: &Executor, probes: &[String], out: &mut impl Write) {
    if let Err(e) = write_probes(exec, probes, out) {
        tracing::warn!(frame = exec.frame_index(), error = %e, "failed to write probe values");
    }
}

fn write_probes(exec: &Executor, probes: &[String], out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "frame {}", exec.frame_index())?;
    if probes.is_empty() {
        for (block, value) in exec.outputs() {
            writeln!(out, "  {} = {}", block, value)?;
        }
        return Ok(());
    }
    for probe in probes {
        match exec.output(probe) {
            Some(value) => writeln!(out, "  {} = {}", probe, value)?,
            None => tracing::warn!(block = %probe, "probe names no block"),
        }
    }
    Ok(())
}
