// Quartile Flow - Web Server
// Serves the precomputed flow graph and the Sankey page

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use quartile_flow::{
    init_logging, FlowConfig, FlowGraph, FlowRun, JournalCatalog, JournalMetadata, Period,
    ResolveReport, SankeyFigure,
};

#[derive(Parser)]
#[command(name = "flow-server")]
#[command(version)]
#[command(about = "HTTP server for the quartile Sankey chart")]
struct Cli {
    /// JSON config file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Overrides the configured bind address
    #[arg(long)]
    bind: Option<String>,
}

/// Everything the handlers read; computed once at startup, never mutated
struct FlowData {
    run: FlowRun,
    figure: SankeyFigure,
    catalog: JournalCatalog,
    fingerprint: String,
    computed_at: DateTime<Utc>,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    data: Arc<FlowData>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// Flow graph response
#[derive(Serialize)]
struct FlowResponse<'a> {
    computed_at: DateTime<Utc>,
    fingerprint: &'a str,
    report: &'a ResolveReport,
    graph: &'a FlowGraph,
}

/// One period of a journal's timeline; `category` is None when absent
#[derive(Serialize)]
struct TimelineEntry<'a> {
    period: Period,
    category: Option<&'a str>,
}

/// Journal lookup response
#[derive(Serialize)]
struct JournalResponse<'a> {
    id: &'a str,
    metadata: Option<&'a JournalMetadata>,
    timeline: Vec<TimelineEntry<'a>>,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/flow - Nodes and weighted edges
async fn get_flow(State(state): State<AppState>) -> impl IntoResponse {
    let data = &state.data;
    let response = FlowResponse {
        computed_at: data.computed_at,
        fingerprint: &data.fingerprint,
        report: &data.run.report,
        graph: &data.run.graph,
    };

    (StatusCode::OK, Json(ApiResponse::ok(response))).into_response()
}

/// GET /api/sankey - Plotly figure
async fn get_sankey(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(ApiResponse::ok(&state.data.figure))).into_response()
}

/// GET /api/journals/:id - Metadata and quartile timeline of one journal
async fn get_journal(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let data = &state.data;

    // `Path` has already percent-decoded the id
    let Some(timeline) = data.run.timelines.get(&id) else {
        warn!(id = %id, "journal lookup missed");
        return (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<()>::err(format!("Journal {} not found", id))),
        )
            .into_response();
    };

    let categories = data.run.graph.categories();
    let entries = data
        .run
        .timelines
        .periods()
        .iter()
        .enumerate()
        .map(|(i, period)| TimelineEntry {
            period,
            category: timeline.get(i).map(|c| categories.label(c)),
        })
        .collect();

    let response = JournalResponse {
        id: &id,
        metadata: data.catalog.get(&id),
        timeline: entries,
    };

    (StatusCode::OK, Json(ApiResponse::ok(response))).into_response()
}

/// GET / - Serve index.html
async fn serve_index() -> impl IntoResponse {
    Html(include_str!("../web/index.html"))
}

// ============================================================================
// Main Server
// ============================================================================

fn compute(config: &FlowConfig) -> Result<FlowData> {
    let dataset = config.load_dataset()?;
    let run = config
        .run(&dataset.batches)
        .context("Failed to build flow graph")?;

    let figure = SankeyFigure::from_flow(&run.graph, &config.palette, &config.layout);
    let fingerprint = run.graph.fingerprint();

    Ok(FlowData {
        run,
        figure,
        catalog: dataset.catalog,
        fingerprint,
        computed_at: Utc::now(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    info!("Quartile Flow - Web Server starting");

    let config = FlowConfig::load(cli.config.as_deref())?;
    let data = compute(&config)?;
    info!(
        journals = data.run.report.entities,
        edges = data.run.graph.edges().len(),
        fingerprint = %data.fingerprint,
        "flow graph ready"
    );

    let state = AppState {
        data: Arc::new(data),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/flow", get(get_flow))
        .route("/sankey", get(get_sankey))
        .route("/journals/:id", get(get_journal))
        .with_state(state);

    // Build main router
    let app = Router::new()
        .route("/", get(serve_index))
        .nest("/api", api_routes)
        .nest_service("/static", ServeDir::new("web"))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        );

    let addr = cli.bind.unwrap_or(config.server.bind);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Server running on http://{}", addr);
    info!("  API: /api/flow, /api/sankey, /api/journals/:id");

    axum::serve(listener, app)
        .await
        .context("Server terminated")?;

    Ok(())
}
