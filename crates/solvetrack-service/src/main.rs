use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::Serialize;
use solvetrack_api::{ApiError, ScoreSource, SolvetrackApi};
use solvetrack_core::{ClassName, StudentScore};
use solvetrack_scraper::FetchConfig;
use solvetrack_store_sqlite::StoreError;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "solvetrack-service")]
#[command(about = "Per-class solved-problem scoreboard with on-demand scraping")]
struct Args {
    #[arg(long, default_value = "./solvetrack.sqlite3")]
    db: PathBuf,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
    /// Classes to create tables for at startup
    #[arg(long, default_value = "CSE_A,CSE_B,CSE_C", value_delimiter = ',')]
    classes: Vec<String>,
    /// Profile URL prefix override (username appended as a path segment)
    #[arg(long)]
    base_url: Option<String>,
}

struct ServiceState<S = solvetrack_scraper::ProfileFetcher> {
    api: SolvetrackApi<S>,
}

impl<S> Clone for ServiceState<S> {
    fn clone(&self) -> Self {
        Self { api: self.api.clone() }
    }
}

#[derive(Debug, Clone, Serialize)]
struct UpdateResponse {
    message: String,
    updated: usize,
    skipped: usize,
}

#[derive(Debug, Clone, Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_json(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

fn plain_error(err: impl std::fmt::Display) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {err}")).into_response()
}

fn app<S: ScoreSource + 'static>(state: ServiceState<S>) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/update/:class_name", post(update_scores))
        .route("/show/:class_name", get(show_scores))
        .route("/health", get(health))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut classes = Vec::new();
    for name in &args.classes {
        classes.push(ClassName::parse(name).with_context(|| format!("bad --classes entry `{name}`"))?);
    }

    let mut config = FetchConfig::default();
    if let Some(base_url) = args.base_url {
        config.base_url = base_url;
    }

    let api = SolvetrackApi::new(args.db, config)?;
    // Store initialization is the only fatal startup error.
    api.init(&classes).context("failed to initialize score tables")?;

    tracing::info!(bind = %args.bind, classes = classes.len(), "starting solvetrack service");
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    axum::serve(listener, app(ServiceState { api })).await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn home<S: ScoreSource>(State(state): State<ServiceState<S>>) -> Response {
    match state.api.list_classes() {
        Ok(classes) => Html(render::home_page(&classes)).into_response(),
        Err(err) => plain_error(err),
    }
}

async fn update_scores<S: ScoreSource>(
    State(state): State<ServiceState<S>>,
    Path(class_name): Path<String>,
) -> Response {
    // Invalid identifier syntax never reaches the store.
    let Ok(class) = ClassName::parse(&class_name) else {
        return error_json(StatusCode::NOT_FOUND, format!("unknown class: {class_name}"));
    };

    match state.api.update_class(&class).await {
        Ok(summary) => (
            StatusCode::OK,
            Json(UpdateResponse {
                message: summary.message(),
                updated: summary.updated,
                skipped: summary.skipped,
            }),
        )
            .into_response(),
        Err(err) => {
            tracing::warn!(class = %class, error = %err, "score update failed");
            error_json(update_status(&err), err.to_string())
        }
    }
}

fn update_status(err: &ApiError) -> StatusCode {
    match err {
        ApiError::EmptyClass(_) | ApiError::Store(StoreError::ClassNotFound(_)) => {
            StatusCode::NOT_FOUND
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn show_scores<S: ScoreSource>(
    State(state): State<ServiceState<S>>,
    Path(class_name): Path<String>,
) -> Response {
    let Ok(class) = ClassName::parse(&class_name) else {
        return plain_error(format!("unknown class: {class_name}"));
    };

    match state.api.class_scores(&class) {
        Ok(rows) => Html(render::scores_page(&class, &rows)).into_response(),
        Err(err) => plain_error(err),
    }
}

mod render {
    use super::{ClassName, StudentScore};
    use std::fmt::Write;

    pub fn home_page(classes: &[ClassName]) -> String {
        let mut items = String::new();
        for class in classes {
            let name = escape(class.as_str());
            let _ = write!(
                items,
                "<li><a href=\"/show/{name}\">{name}</a> \
                 <form method=\"post\" action=\"/update/{name}\">\
                 <button type=\"submit\">Update</button></form></li>"
            );
        }
        page(
            "Classes",
            &format!("<h1>Classes</h1><ul>{items}</ul>"),
        )
    }

    pub fn scores_page(class: &ClassName, rows: &[StudentScore]) -> String {
        let mut body = String::new();
        let title = escape(class.as_str());
        let _ = write!(
            body,
            "<h1>Scores for {title}</h1>\
             <table class=\"data\"><thead><tr>\
             <th>S.No</th><th>Name</th><th>Roll No</th>\
             <th>Previous Week</th><th>Recent Week</th><th>Count</th>\
             </tr></thead><tbody>"
        );
        for row in rows {
            let _ = write!(
                body,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                row.seq_no,
                escape(row.username.as_str()),
                escape(&row.roll_no),
                row.previous_week,
                row.recent_week,
                row.count
            );
        }
        body.push_str("</tbody></table>");
        page(&format!("Scores - {title}"), &body)
    }

    fn page(title: &str, body: &str) -> String {
        format!(
            "<!DOCTYPE html><html><head><meta charset=\"utf-8\">\
             <title>{title}</title></head><body>{body}</body></html>"
        )
    }

    fn escape(s: &str) -> String {
        s.replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
            .replace('"', "&quot;")
            .replace('\'', "&#39;")
    }
}
