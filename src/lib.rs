// Quartile Flow - Core Library
// Categorical transition engine behind the journal quartile Sankey chart.
// Exposes all modules for use in the CLI, the web server, and tests.

pub mod error;
pub mod period;
pub mod category;
pub mod timeline;   // Entity Timeline Resolver
pub mod flow;       // Transition Aggregator
pub mod render;     // Plotly Sankey boundary
pub mod ingest;     // SJR CSV files
pub mod config;

// Re-export commonly used types
pub use error::{FlowError, FlowResult};
pub use period::{Period, PeriodSequence};
pub use category::{normalize_key, Category, CategorySet};
pub use timeline::{
    PeriodRecords, RawRecord, ResolveReport, Timeline, TimelineResolver, TimelineSet,
};
pub use flow::{
    build_flow, Edge, FlowGraph, FlowRun, Node, NodeThroughput, SourceRule,
    TransitionAggregator, TransitionMatrix,
};
pub use render::{Layout, Palette, SankeyFigure};
pub use ingest::{
    load_dataset, load_period_csv, read_period, CsvLayout, Dataset, JournalCatalog,
    JournalMetadata, LoadedPeriod,
};
pub use config::{FlowConfig, DEFAULT_SENTINEL};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install the stderr log subscriber used by both binaries.
/// `RUST_LOG` overrides the default filter.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("quartile_flow=info,flow_server=info"));

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
