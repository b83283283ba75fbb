use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{self, MissedTickBehavior};
use tracing::info;
use tracing_subscriber::EnvFilter;

use quarry_adapters::http::HttpBackend;
use quarry_core::config::WorkbenchConfig;
use quarry_core::query_executor::QueryBackend;
use quarry_core::results::{QueryResponse, Row, TableViewState};
use quarry_core::uploads::{FileHandle, UploadTransport};
use quarry_core::workbench::{MetricsSink, WorkbenchBackend, WorkbenchController};

/// Metrics sink that forwards usage notifications to the log.
struct LogMetrics;

impl MetricsSink for LogMetrics {
    fn record_query(&mut self, response_time_ms: f64, cached: bool) {
        info!(response_time_ms, cached, "query completed");
    }

    fn record_upload_batch(&mut self, file_count: usize) {
        info!(file_count, "upload batch completed");
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Connect(String),
    Query(String),
    Suggest(String),
    Upload(Vec<String>),
    Status,
    Schema,
    History,
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };
    match verb {
        "connect" if !rest.is_empty() => Some(Command::Connect(rest.to_string())),
        "query" if !rest.is_empty() => Some(Command::Query(rest.to_string())),
        "suggest" if !rest.is_empty() => Some(Command::Suggest(rest.to_string())),
        "upload" if !rest.is_empty() => Some(Command::Upload(
            rest.split_whitespace().map(str::to_string).collect(),
        )),
        "status" => Some(Command::Status),
        "schema" => Some(Command::Schema),
        "history" => Some(Command::History),
        "quit" | "exit" => Some(Command::Quit),
        _ => None,
    }
}

/// First page of the result rows, one compact JSON line per row.
fn first_page(rows: &[Row], page_size: usize) -> Vec<String> {
    let view = TableViewState::new(page_size);
    view.visible_rows(rows)
        .into_iter()
        .map(|row| serde_json::to_string(row).unwrap_or_default())
        .collect()
}

fn describe_response(response: &QueryResponse) -> String {
    let mut parts = Vec::new();
    if let Some(sql) = response.payload.sql() {
        parts.push(format!("{} row(s)", sql.rows.len()));
        if let Some(generated) = &sql.generated_sql {
            parts.push(format!("sql: {generated}"));
        }
    }
    if let Some(documents) = response.payload.documents() {
        parts.push(format!("{} document(s)", documents.documents.len()));
    }
    let cached = if response.cached { ", cached" } else { "" };
    parts.push(format!("{:.1} ms{cached}", response.response_time_ms));
    parts.join(" | ")
}

async fn handle_command<B, M>(
    controller: &mut WorkbenchController<B, M>,
    command: Command,
    page_size: usize,
) -> bool
where
    B: WorkbenchBackend + QueryBackend + UploadTransport + Send + Sync + 'static,
    B::Transfer: Send,
    M: MetricsSink,
{
    match command {
        Command::Connect(connection_string) => {
            match controller.connect(&connection_string).await {
                Ok(_) => {
                    if let Some(message) = controller.status_message() {
                        println!("{message}");
                    }
                    if controller.is_connected() {
                        println!(
                            "schema: {} table(s), {} column(s)",
                            controller.schema().table_count(),
                            controller.schema().column_count()
                        );
                    }
                }
                Err(error) => println!("{error}"),
            }
        }
        Command::Query(query_text) => match controller.submit_query(&query_text).await {
            Ok(()) => {
                if let Some(error) = controller.executor().last_error() {
                    println!("{error}");
                } else if let Some(response) = controller.executor().last_response() {
                    println!("{}", describe_response(response));
                    if let Some(sql) = response.payload.sql() {
                        for line in first_page(&sql.rows, page_size) {
                            println!("  {line}");
                        }
                    }
                }
            }
            Err(error) => println!("{error}"),
        },
        Command::Suggest(input) => controller.request_suggestions(&input),
        Command::Upload(paths) => {
            let mut files = Vec::with_capacity(paths.len());
            for path in paths {
                match FileHandle::from_path(&path) {
                    Ok(file) => files.push(file),
                    Err(error) => println!("{path}: {error}"),
                }
            }
            match controller.upload_files(files) {
                Ok(mut events) => {
                    while let Some(event) = events.recv().await {
                        if let Some(report) = controller.apply_upload_event(event) {
                            println!("{}", report.message());
                        }
                    }
                }
                Err(error) => println!("{error}"),
            }
        }
        Command::Status => {
            controller.poll_status_once().await;
            println!(
                "backend: {}",
                if controller.is_connected() {
                    "connected"
                } else {
                    "disconnected"
                }
            );
        }
        Command::Schema => {
            for table in &controller.schema().tables {
                println!("{} ({} columns)", table.name, table.columns.len());
            }
        }
        Command::History => {
            for entry in controller.executor().history() {
                println!("{entry}");
            }
        }
        Command::Quit => return false,
    }
    true
}

async fn run<B, M>(
    mut controller: WorkbenchController<B, M>,
    poll_interval: Duration,
    page_size: usize,
) -> Result<(), std::io::Error>
where
    B: WorkbenchBackend + QueryBackend + UploadTransport + Send + Sync + 'static,
    B::Transfer: Send,
    M: MetricsSink,
{
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut poll = time::interval(poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = poll.tick() => controller.poll_status_once().await,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if let Some(command) = parse_command(&line) {
                    if !handle_command(&mut controller, command, page_size).await {
                        break;
                    }
                } else if !line.trim().is_empty() {
                    println!("commands: connect, query, suggest, upload, status, schema, history, quit");
                }
            }
        }

        controller.uploads_mut().clear_if_due();
        while let Some(candidates) = controller.try_take_suggestions() {
            for candidate in candidates {
                println!("  {}", candidate.name);
            }
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = WorkbenchConfig::load_default()?;
    let backend = Arc::new(HttpBackend::new(&config.backend_url)?);
    let controller = WorkbenchController::new(backend, LogMetrics)
        .with_debounce_window(config.debounce_window())
        .with_upload_clear_delay(config.upload_clear_delay());
    info!(backend_url = %config.backend_url, "workbench started");

    run(
        controller,
        config.status_poll_interval(),
        config.default_page_size,
    )
    .await?;
    Ok(())
}
