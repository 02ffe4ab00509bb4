use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_prometheus::PrometheusMetricLayer;
use clap::{Args, Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use study_compiler::compiler::{
    compile, CompileOptions, CompiledWorkbook, JoinMode, Upload,
};
use study_compiler::config::AppConfig;
use study_compiler::error::AppError;
use study_compiler::telemetry;
use tracing::info;

const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Spreadsheet exports stay small, but default axum body limits are tighter
/// than a pair of real .xlsx files.
const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

#[derive(Clone)]
struct AppState {
    readiness: Arc<AtomicBool>,
    metrics: PrometheusHandle,
    join_mode: JoinMode,
}

#[derive(Parser, Debug)]
#[command(
    name = "Study Compiler",
    about = "Merge calendar and screener exports into one review workbook",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Compile two export files from disk into a workbook
    Compile(CompileArgs),
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Args, Debug)]
struct CompileArgs {
    /// The calendar and screener exports, in either order
    #[arg(required = true, num_args = 2)]
    inputs: Vec<PathBuf>,
    /// Project label for the output filename; derived from the calendar
    /// filename when omitted
    #[arg(long)]
    project: Option<String>,
    /// Policy for calendar rows without a screener match
    #[arg(long, value_parser = parse_join_mode)]
    join_mode: Option<JoinMode>,
    /// Directory the compiled workbook is written into
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
}

fn parse_join_mode(raw: &str) -> Result<JoinMode, String> {
    JoinMode::parse(raw).ok_or_else(|| format!("expected 'inner' or 'left', got '{raw}'"))
}

#[tokio::main]
async fn main() {
    if let Err(err) = run_cli().await {
        eprintln!("application error: {err}");
        std::process::exit(1);
    }
}

async fn run_cli() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => run_server(args).await,
        Command::Compile(args) => run_compile(args),
    }
}

fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .route("/api/v1/compile", post(compile_endpoint))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

async fn run_server(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let state = AppState {
        readiness: readiness_flag.clone(),
        metrics: prometheus_handle,
        join_mode: config.compiler.join_mode,
    };

    let app = app_router(state).layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "study compiler ready");

    axum::serve(listener, app).await?;
    Ok(())
}

fn run_compile(args: CompileArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;

    let first = load_upload(&args.inputs[0])?;
    let second = load_upload(&args.inputs[1])?;
    let join_mode = args.join_mode.unwrap_or(config.compiler.join_mode);
    let options = CompileOptions {
        project: args.project,
        join_mode,
    };

    let compiled = compile(&first, &second, &options)?;
    let out_path = args.out_dir.join(&compiled.file_name);
    std::fs::write(&out_path, &compiled.bytes)?;

    render_summary(&compiled, &out_path, join_mode);
    Ok(())
}

fn load_upload(path: &Path) -> Result<Upload, AppError> {
    let bytes = std::fs::read(path)?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(Upload::new(file_name, bytes))
}

async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn readiness_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

async fn compile_endpoint(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut uploads: Vec<Upload> = Vec::new();
    let mut project: Option<String> = None;
    let mut join_mode: Option<JoinMode> = None;

    while let Some(field) = multipart.next_field().await? {
        if let Some(file_name) = field.file_name().map(str::to_string) {
            let bytes = field.bytes().await?;
            uploads.push(Upload::new(file_name, bytes.to_vec()));
            continue;
        }

        match field.name() {
            Some("project") => project = Some(field.text().await?),
            Some("join_mode") => {
                let raw = field.text().await?;
                match JoinMode::parse(&raw) {
                    Some(mode) => join_mode = Some(mode),
                    None => {
                        return Ok(unprocessable(format!(
                            "join_mode must be 'inner' or 'left', got '{raw}'"
                        )))
                    }
                }
            }
            _ => {
                // Drain unknown text fields so the stream keeps advancing.
                field.text().await?;
            }
        }
    }

    if uploads.len() != 2 {
        return Ok(unprocessable(format!(
            "expected exactly two uploaded files, got {}",
            uploads.len()
        )));
    }

    let options = CompileOptions {
        project: project.filter(|label| !label.trim().is_empty()),
        join_mode: join_mode.unwrap_or(state.join_mode),
    };
    let compiled = compile(&uploads[0], &uploads[1], &options)?;

    info!(
        project = %compiled.project,
        rows = compiled.summary.compiled_rows,
        unmatched_calendar = compiled.summary.unmatched_calendar,
        unmatched_screener = compiled.summary.unmatched_screener,
        "compiled study workbook"
    );

    let headers = [
        (header::CONTENT_TYPE, XLSX_CONTENT_TYPE.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", compiled.file_name),
        ),
        (
            HeaderName::from_static("x-compiled-rows"),
            compiled.summary.compiled_rows.to_string(),
        ),
    ];
    Ok((StatusCode::OK, headers, compiled.bytes).into_response())
}

fn unprocessable(message: String) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({ "error": message })),
    )
        .into_response()
}

fn render_summary(compiled: &CompiledWorkbook, out_path: &Path, join_mode: JoinMode) {
    let summary = &compiled.summary;

    println!(
        "Compiled {} row(s) for project '{}' ({join_mode} join)",
        summary.compiled_rows, compiled.project
    );
    println!(
        "Calendar: {} row(s), {} unmatched, {} blank email(s)",
        summary.calendar_rows, summary.unmatched_calendar, summary.calendar_blank_emails
    );
    println!(
        "Screener: {} row(s), {} unmatched, {} blank email(s)",
        summary.screener_rows, summary.unmatched_screener, summary.screener_blank_emails
    );
    if summary.duplicates_removed > 0 {
        println!("Removed {} duplicate booking(s)", summary.duplicates_removed);
    }
    println!("Wrote {}", out_path.display());
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::OnceLock;
    use tower::ServiceExt;

    const BOUNDARY: &str = "study-compiler-test-boundary";

    // The prometheus recorder is process-global; install it once for every
    // test that needs an AppState.
    fn metrics_handle() -> PrometheusHandle {
        static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
        HANDLE
            .get_or_init(|| PrometheusMetricLayer::pair().1)
            .clone()
    }

    fn test_state() -> AppState {
        AppState {
            readiness: Arc::new(AtomicBool::new(true)),
            metrics: metrics_handle(),
            join_mode: JoinMode::Inner,
        }
    }

    fn multipart_body(parts: &[(&str, Option<&str>, &str)]) -> String {
        let mut body = String::new();
        for (name, file_name, content) in parts {
            body.push_str(&format!("--{BOUNDARY}\r\n"));
            match file_name {
                Some(file_name) => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: text/csv\r\n\r\n"
                )),
                None => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"\r\n\r\n"
                )),
            }
            body.push_str(content);
            body.push_str("\r\n");
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));
        body
    }

    async fn post_compile(parts: &[(&str, Option<&str>, &str)]) -> Response {
        let request = Request::post("/api/v1/compile")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(parts)))
            .expect("request builds");

        app_router(test_state())
            .oneshot(request)
            .await
            .expect("router responds")
    }

    #[tokio::test]
    async fn compile_route_returns_a_workbook_attachment() {
        let response = post_compile(&[
            (
                "files",
                Some("Acme Calendar.csv"),
                "User name,Email,Start Time\nBob,A@X.com,9:00\n",
            ),
            (
                "files",
                Some("screener.csv"),
                "email,Status,Q1\na@x.com,Pass,Blue\n",
            ),
        ])
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .expect("disposition header");
        assert!(disposition.contains("Compiled Study Data - Acme.xlsx"));
        assert_eq!(
            response
                .headers()
                .get("x-compiled-rows")
                .and_then(|value| value.to_str().ok()),
            Some("1")
        );

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        assert_eq!(&bytes[..2], b"PK");
    }

    #[tokio::test]
    async fn compile_route_reports_role_confusion() {
        let response = post_compile(&[
            ("files", Some("first.csv"), "Email\na@x.com\n"),
            ("files", Some("second.csv"), "Email\na@x.com\n"),
        ])
        .await;

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let payload: serde_json::Value = serde_json::from_slice(&bytes).expect("json error body");
        assert!(payload["error"]
            .as_str()
            .expect("error message")
            .contains("calendar"));
    }

    #[tokio::test]
    async fn compile_route_requires_two_files() {
        let response = post_compile(&[(
            "files",
            Some("calendar.csv"),
            "User name,Email\nBob,a@x.com\n",
        )])
        .await;

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn compile_route_honors_the_join_mode_field() {
        let response = post_compile(&[
            (
                "files",
                Some("calendar.csv"),
                "User name,Email,Start Time\nBob,a@x.com,9:00\nEve,eve@x.com,10:00\n",
            ),
            (
                "files",
                Some("screener.csv"),
                "email,Q1\na@x.com,Blue\n",
            ),
            ("join_mode", None, "left"),
        ])
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get("x-compiled-rows")
                .and_then(|value| value.to_str().ok()),
            Some("2")
        );
    }

    #[tokio::test]
    async fn compile_route_rejects_unknown_join_modes() {
        let response = post_compile(&[
            (
                "files",
                Some("calendar.csv"),
                "User name,Email\nBob,a@x.com\n",
            ),
            ("files", Some("screener.csv"), "email,Q1\na@x.com,Blue\n"),
            ("join_mode", None, "outer"),
        ])
        .await;

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn healthcheck_reports_ok() {
        let Json(body) = healthcheck().await;
        assert_eq!(body["status"], "ok");
    }
}
