use std::error::Error;
use std::path::{Path, PathBuf};

use clap::{Parser, error::ErrorKind};
use serde::Serialize;

use crate::aggregate::StepReport;
use crate::analysis::{AnalysisReport, FunnelAnalysis};
use crate::config::AnalysisConfig;
use crate::constants::action_key::DEFAULT_PROJECT_PATTERN;
use crate::definition::FunnelDefinition;
use crate::ingest::CapsuleReader;

#[derive(Debug, Parser)]
#[command(
    name = "funnel",
    disable_help_subcommand = true,
    about = "Funnel conversion analysis over event capsules",
    long_about = "Group schema-filtered event capsules by user token, match each user's chronological path against a funnel graph, and report per-step reach, conversion, and drop-off.",
    after_help = "Set RUST_LOG=debug to see dropped records and timestamp tie-breaks."
)]
/// CLI for `funnel`.
///
/// Common usage:
/// - Separate node/edge files: `--nodes nodes.json --edges edges.json`
/// - One combined document: `--funnel funnel.json`
/// - Split `en.wikipedia`-style projects: `--host-projects`
struct FunnelCli {
    #[arg(
        long,
        value_name = "PATH",
        help = "Newline-delimited JSON capsules (gzip when the name ends in .gz)"
    )]
    input: PathBuf,
    #[arg(long, value_name = "NAME", help = "Capsule schema to keep")]
    schema: String,
    #[arg(
        long,
        value_name = "PATH",
        requires = "edges",
        required_unless_present = "funnel",
        help = "JSON array of funnel nodes"
    )]
    nodes: Option<PathBuf>,
    #[arg(
        long,
        value_name = "PATH",
        requires = "nodes",
        help = "JSON array of funnel edges"
    )]
    edges: Option<PathBuf>,
    #[arg(
        long,
        value_name = "PATH",
        conflicts_with_all = ["nodes", "edges"],
        help = "Combined {nodes, edges} funnel document"
    )]
    funnel: Option<PathBuf>,
    #[arg(
        long = "project-pattern",
        value_name = "REGEX",
        help = "Regex with `language` and `project` groups used to split the project field"
    )]
    project_pattern: Option<String>,
    #[arg(
        long = "host-projects",
        conflicts_with = "project_pattern",
        help = "Split host-style projects such as en.wikipedia"
    )]
    host_projects: bool,
    #[arg(long, help = "Match users on the calling thread only")]
    sequential: bool,
    #[arg(long, help = "Print the report as JSON instead of a table")]
    json: bool,
}

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    users: u64,
    completed: u64,
    stalled: u64,
    unmatched: u64,
    dropped_records: u64,
    ambiguous_timestamps: usize,
    steps: &'a [StepReport],
}

/// Run the `funnel` command line over `args_iter` (program name excluded).
pub fn run_funnel<I>(args_iter: I) -> Result<(), Box<dyn Error>>
where
    I: Iterator<Item = String>,
{
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let Some(cli) = parse_cli::<FunnelCli, _>(std::iter::once("funnel".to_string()).chain(args_iter))?
    else {
        return Ok(());
    };

    let funnel = load_funnel(&cli)?;
    let project_pattern = if cli.host_projects {
        Some(DEFAULT_PROJECT_PATTERN.to_string())
    } else {
        cli.project_pattern.clone()
    };
    let config = AnalysisConfig {
        project_pattern,
        parallel: !cli.sequential,
        ..AnalysisConfig::default()
    };
    let analysis = FunnelAnalysis::new(funnel, config)?;

    let records = CapsuleReader::new(cli.schema.as_str()).open(&cli.input)?;
    let report = analysis.run(records)?;
    let rows = report.table.report(analysis.funnel());

    if cli.json {
        let summary = JsonReport {
            users: report.table.users,
            completed: report.table.completed,
            stalled: report.table.stalled,
            unmatched: report.table.unmatched,
            dropped_records: report.table.dropped_records,
            ambiguous_timestamps: report.ambiguity_count,
            steps: &rows,
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_report(&cli.input, &cli.schema, &report, &rows);
    }
    Ok(())
}

fn load_funnel(cli: &FunnelCli) -> Result<FunnelDefinition, Box<dyn Error>> {
    match (&cli.funnel, &cli.nodes, &cli.edges) {
        (Some(document), _, _) => Ok(FunnelDefinition::from_document_file(document)?),
        (None, Some(nodes), Some(edges)) => Ok(FunnelDefinition::from_files(nodes, edges)?),
        _ => Err("either --funnel or both --nodes and --edges are required".into()),
    }
}

fn print_report(input: &Path, schema: &str, report: &AnalysisReport, rows: &[StepReport]) {
    let table = &report.table;
    println!("=== funnel report ===");
    println!("input: {} (schema {})", input.display(), schema);
    println!(
        "users: {} | completed: {} | stalled: {} | unmatched: {}",
        table.users, table.completed, table.stalled, table.unmatched
    );
    println!(
        "dropped records: {} | ambiguous timestamps: {}",
        table.dropped_records, report.ambiguity_count
    );
    println!();
    println!(
        "{:<24} {:>10} {:>10} {:>10}  pattern",
        "step", "reach", "share", "drop-off"
    );
    for row in rows {
        println!(
            "{:<24} {:>10} {:>9.1}% {:>10}  {}",
            row.name,
            row.reach,
            row.share_of_entries * 100.0,
            row.drop_off,
            row.pattern
        );
        for edge in &row.conversions {
            println!(
                "  -> {:<20} {:>10} {:>9.1}%",
                edge.to,
                edge.count,
                edge.rate * 100.0
            );
        }
    }
}

fn parse_cli<T, I>(args: I) -> Result<Option<T>, Box<dyn Error>>
where
    T: Parser,
    I: IntoIterator,
    I::Item: Into<std::ffi::OsString> + Clone,
{
    match T::try_parse_from(args) {
        Ok(cli) => Ok(Some(cli)),
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                err.print()?;
                Ok(None)
            }
            _ => Err(err.into()),
        },
    }
}
