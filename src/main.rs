// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use quartile_flow::{
    init_logging, Dataset, FlowConfig, FlowGraph, FlowRun, ResolveReport, SankeyFigure,
};

#[derive(Parser)]
#[command(name = "quartile-flow")]
#[command(version)]
#[command(about = "Quartile transitions of journals across years, as a Sankey flow")]
struct Cli {
    /// JSON config file (defaults: 2022-2024, Q1-Q4, ./<year>.csv)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print node totals, the heaviest flows and the graph fingerprint
    Summary {
        /// Number of edges to list
        #[arg(long, default_value_t = 15)]
        top: usize,
    },

    /// Write the Sankey figure (or the raw graph) as JSON
    Export {
        #[arg(long, short, default_value = "sankey.json")]
        out: PathBuf,

        /// Write nodes and edges instead of the Plotly figure
        #[arg(long)]
        graph: bool,
    },

    /// Show one journal's metadata and quartile timeline
    Journal { id: String },

    /// Browse transitions in the terminal
    Tui,
}

/// Envelope written by `export`
#[derive(Serialize)]
struct ExportDocument<'a, T: Serialize> {
    generated_at: DateTime<Utc>,
    version: &'static str,
    fingerprint: String,
    report: &'a ResolveReport,
    content: T,
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let config = FlowConfig::load(cli.config.as_deref())?;
    let (dataset, run) = load_and_run(&config)?;

    match cli.command.unwrap_or(Commands::Summary { top: 15 }) {
        Commands::Summary { top } => print_summary(&run, top),
        Commands::Export { out, graph } => export(&config, &run, &out, graph)?,
        Commands::Journal { id } => print_journal(&dataset, &run, &id),
        Commands::Tui => run_ui_mode(&config, run)?,
    }

    Ok(())
}

fn load_and_run(config: &FlowConfig) -> Result<(Dataset, FlowRun)> {
    println!("📂 Loading {} period files...", config.periods.len());
    let dataset = config.load_dataset()?;
    let run = config
        .run(&dataset.batches)
        .context("Failed to build flow graph")?;
    println!("✓ {}", run.report.summary());
    Ok((dataset, run))
}

fn print_summary(run: &FlowRun, top: usize) {
    let graph = &run.graph;

    println!("\n📊 Journals per year");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for (period, count) in &run.report.entities_per_period {
        println!("  {:<8} {:>8}", period, count);
    }

    println!("\n🔢 Node throughput (in / out)");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for t in graph.node_throughput() {
        let node = &graph.nodes()[t.index];
        println!("  {:<24} {:>8} {:>8}", node.label, t.inflow, t.outflow);
    }

    println!("\n🌊 Top {} flows", top.min(graph.edges().len()));
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    print_edges(graph, top);

    println!("\n🔐 Fingerprint: {}", graph.fingerprint());
}

fn print_edges(graph: &FlowGraph, top: usize) {
    for edge in graph.edges().iter().take(top) {
        println!(
            "  {:<24} → {:<24} {:>8}",
            graph.nodes()[edge.source].label,
            graph.nodes()[edge.target].label,
            edge.weight
        );
    }
}

fn export(config: &FlowConfig, run: &FlowRun, out: &Path, raw_graph: bool) -> Result<()> {
    let graph = &run.graph;

    let json = if raw_graph {
        serde_json::to_string_pretty(&document(run, graph))?
    } else {
        let figure = SankeyFigure::from_flow(graph, &config.palette, &config.layout);
        serde_json::to_string_pretty(&document(run, figure))?
    };

    fs::write(out, json).with_context(|| format!("Failed to write {}", out.display()))?;
    println!("💾 Wrote {}", out.display());
    Ok(())
}

fn document<T: Serialize>(run: &FlowRun, content: T) -> ExportDocument<'_, T> {
    ExportDocument {
        generated_at: Utc::now(),
        version: quartile_flow::VERSION,
        fingerprint: run.graph.fingerprint(),
        report: &run.report,
        content,
    }
}

fn print_journal(dataset: &Dataset, run: &FlowRun, id: &str) {
    let Some(timeline) = run.timelines.get(id) else {
        eprintln!("❌ Journal {} not found in any period", id);
        std::process::exit(1);
    };

    if let Some(meta) = dataset.catalog.get(id) {
        println!("\n📖 {} ({})", meta.title, meta.id);
        println!("   ISSN:       {}", meta.issn);
        println!("   Publisher:  {}", meta.publisher);
        println!("   Categories: {}", meta.subject_categories);
        println!("   Areas:      {}", meta.areas);
    }

    let categories = run.graph.categories();
    println!();
    for (i, period) in run.timelines.periods().iter().enumerate() {
        let value = match timeline.get(i) {
            Some(category) => categories.label(category).to_string(),
            None => "-".to_string(),
        };
        println!("   {:<8} {}", period, value);
    }
}

#[cfg(feature = "tui")]
fn run_ui_mode(config: &FlowConfig, run: FlowRun) -> Result<()> {
    println!("Starting UI... (Press 'q' to quit)\n");

    let mut app = ui::App::new(run, config.palette.clone());
    ui::run_ui(&mut app)?;

    println!("\n✅ UI closed successfully");
    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_config: &FlowConfig, _run: FlowRun) -> Result<()> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use web UI: cargo run --bin flow-server --features server");
    std::process::exit(1);
}
