use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use serde_sarif::sarif::{
    Artifact, ArtifactLocation, Invocation, Location as SarifLocation, LogicalLocation, Message,
    Result as SarifResult, ResultLevel, Run, SCHEMA_URL, Sarif, Tool, ToolComponent,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use jrelocate::config::Config;
use jrelocate::diagnostic::{CollectingDiagnosticHandler, Diagnostic, DiagnosticKind, Location};
use jrelocate::relocator::Relocator;
use jrelocate::scan::open_sources;

/// CLI arguments for jrelocate execution.
#[derive(Parser, Debug)]
#[command(
    name = "jrelocate",
    about = "Keeps the reachable part of JVM libraries and moves it under new package names.",
    version
)]
struct Cli {
    /// Classes that are always kept and seed the reachability walk.
    #[arg(long, value_name = "PATH")]
    root: Vec<PathBuf>,
    /// Classes kept and relocated when reachable from a root.
    #[arg(long, value_name = "PATH")]
    embed: Vec<PathBuf>,
    /// Classes resolved against but never emitted.
    #[arg(long, value_name = "PATH")]
    refer: Vec<PathBuf>,
    /// Relocation entry, e.g. `com/google/gson=app/shaded/gson`.
    #[arg(long, value_name = "FROM=TO", value_parser = parse_relocation)]
    relocate: Vec<(String, String)>,
    /// JSON configuration file; its paths come before those given on the command line.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    #[arg(long)]
    keep_runtime_invisible_annotation: bool,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
}

fn parse_relocation(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((from, to)) if !from.is_empty() && !to.is_empty() => {
            Ok((from.replace('.', "/"), to.replace('.', "/")))
        }
        _ => Err(format!("expected FROM=TO, got '{value}'")),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet);
    run(cli)
}

fn init_logging(quiet: bool) {
    let default_level = if quiet { "error" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let started_at = Instant::now();
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let roots = merged_paths(&config.roots, &cli.root);
    let embeds = merged_paths(&config.embeds, &cli.embed);
    let refers = merged_paths(&config.refers, &cli.refer);
    if roots.is_empty() {
        anyhow::bail!("no root classes given; pass --root or list roots in the config");
    }
    for (label, paths) in [("root", &roots), ("embed", &embeds), ("refer", &refers)] {
        for path in paths {
            if !path.exists() {
                anyhow::bail!("{label} entry not found: {}", path.display());
            }
        }
    }

    let mut relocator = Relocator::new();
    for source in open_sources(&roots)? {
        relocator.add_root_source(source);
    }
    for source in open_sources(&embeds)? {
        relocator.add_embed_source(source);
    }
    for source in open_sources(&refers)? {
        relocator.add_refer_source(source);
    }
    config.apply(&mut relocator)?;
    for (from, to) in &cli.relocate {
        relocator.add_relocation(from, to);
    }
    if cli.keep_runtime_invisible_annotation {
        relocator.keep_runtime_invisible_annotation(true);
    }
    let opened_at = Instant::now();

    let handler = CollectingDiagnosticHandler::new();
    let outcome = relocator.run(&handler);
    let relocated_at = Instant::now();

    let diagnostics = handler.take();
    let results: Vec<SarifResult> = diagnostics.iter().map(diagnostic_result).collect();
    let (artifacts, class_count) = match &outcome {
        Ok(output) => {
            info!(
                classes = output.classes.len(),
                errors = output.error_count,
                warnings = output.warning_count,
                "relocation finished"
            );
            let artifacts: Vec<Artifact> = output
                .classes
                .iter()
                .map(|class| class_artifact(class.name.name()))
                .collect();
            (artifacts, output.classes.len())
        }
        Err(_) => (Vec::new(), 0),
    };
    let invocation = build_invocation(outcome.is_ok());
    let sarif = build_sarif(artifacts, results, invocation);

    let mut writer = output_writer(cli.output.as_deref())?;
    serde_json::to_writer_pretty(&mut writer, &sarif)
        .context("failed to serialize SARIF output")?;
    writer
        .write_all(b"\n")
        .context("failed to write SARIF output")?;

    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} open_ms={} relocate_ms={} classes={} diagnostics={}",
            started_at.elapsed().as_millis(),
            opened_at.duration_since(started_at).as_millis(),
            relocated_at.duration_since(opened_at).as_millis(),
            class_count,
            diagnostics.len()
        );
    }

    outcome.context("relocation failed")?;
    Ok(())
}

fn merged_paths(from_config: &[PathBuf], from_cli: &[PathBuf]) -> Vec<PathBuf> {
    from_config.iter().chain(from_cli).cloned().collect()
}

fn output_writer(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) if path == Path::new("-") => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Ok(Box::new(io::stdout())),
    }
}

fn class_artifact(internal_name: &str) -> Artifact {
    let location = ArtifactLocation::builder()
        .uri(format!("{internal_name}.class"))
        .build();
    Artifact::builder().location(location).build()
}

fn diagnostic_result(diagnostic: &Diagnostic) -> SarifResult {
    let level = match diagnostic.kind() {
        DiagnosticKind::Error => ResultLevel::Error,
        DiagnosticKind::Warning => ResultLevel::Warning,
    };
    let message = Message::builder().text(diagnostic.message()).build();
    match logical_location(&diagnostic.location) {
        Some(logical) => SarifResult::builder()
            .rule_id(diagnostic.id())
            .level(level)
            .message(message)
            .locations(vec![
                SarifLocation::builder()
                    .logical_locations(vec![logical])
                    .build(),
            ])
            .build(),
        None => SarifResult::builder()
            .rule_id(diagnostic.id())
            .level(level)
            .message(message)
            .build(),
    }
}

fn logical_location(location: &Location) -> Option<LogicalLocation> {
    let (name, kind) = match location {
        Location::None => return None,
        Location::Class { name } => (name.clone(), "type"),
        Location::Method {
            owner,
            name,
            descriptor,
        } => (format!("{owner}.{name}{descriptor}"), "function"),
        Location::Field { owner, name, .. } | Location::RecordField { owner, name, .. } => {
            (format!("{owner}.{name}"), "member")
        }
        Location::MethodLocal {
            owner,
            method,
            descriptor,
            name,
            ..
        } => (format!("{owner}.{method}{descriptor}#{name}"), "variable"),
    };
    Some(LogicalLocation::builder().name(name).kind(kind).build())
}

fn build_invocation(successful: bool) -> Invocation {
    let arguments: Vec<String> = std::env::args().collect();
    let command_line = arguments.join(" ");

    Invocation::builder()
        .execution_successful(successful)
        .arguments(arguments)
        .command_line(command_line)
        .build()
}

fn build_sarif(artifacts: Vec<Artifact>, results: Vec<SarifResult>, invocation: Invocation) -> Sarif {
    let driver = ToolComponent::builder()
        .name("jrelocate")
        .version(env!("CARGO_PKG_VERSION"))
        .build();
    let tool = Tool {
        driver,
        extensions: None,
        properties: None,
    };
    let run = if artifacts.is_empty() {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .build()
    } else {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .artifacts(artifacts)
            .build()
    };

    Sarif::builder()
        .schema(SCHEMA_URL)
        .runs(vec![run])
        .version(json!("2.1.0"))
        .build()
}
