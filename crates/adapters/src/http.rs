use async_trait::async_trait;
use futures_util::stream;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use quarry_core::api::ApiError;
use quarry_core::query_executor::QueryBackend;
use quarry_core::results::{
    DocumentHit, DocumentResult, QueryResponse, ResultPayload, Row, SqlResult,
};
use quarry_core::schema::{ColumnDescriptor, SchemaSnapshot, TableDescriptor};
use quarry_core::uploads::{
    ByteProgress, FileHandle, UploadTransfer, UploadTransport, UploadTransportError,
};
use quarry_core::workbench::{ConnectOutcome, WorkbenchBackend};

const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum HttpBackendError {
    #[error("failed to build HTTP client: {source}")]
    Client {
        #[source]
        source: reqwest::Error,
    },
}

/// Backend client over the workbench HTTP contract. One instance is shared
/// (`Arc`) between the query executor, the upload manager and the controller.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    base_url: String,
    client: Client,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Result<Self, HttpBackendError> {
        let client = Client::builder()
            .user_agent("quarry/0.1")
            .build()
            .map_err(|source| HttpBackendError::Client { source })?;
        Ok(Self::with_client(base_url, client))
    }

    #[must_use]
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url, client }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self
            .client
            .get(self.endpoint(path))
            .send()
            .await
            .map_err(|error| ApiError::network(error.to_string()))?;
        decode_response(response).await
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T, ApiError> {
        let response = self
            .client
            .post(self.endpoint(path))
            .json(body)
            .send()
            .await
            .map_err(|error| ApiError::network(error.to_string()))?;
        decode_response(response).await
    }
}

async fn decode_response<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|error| ApiError::network(error.to_string()))?;
    if !status.is_success() {
        return Err(ApiError::backend(detail_message(status, &bytes)));
    }
    serde_json::from_slice(&bytes).map_err(|error| ApiError::network(error.to_string()))
}

/// Structured backend rejections carry a `detail` field; anything else falls
/// back to the bare status line.
fn detail_message(status: StatusCode, body: &[u8]) -> String {
    #[derive(Deserialize)]
    struct DetailBody {
        detail: String,
    }
    serde_json::from_slice::<DetailBody>(body)
        .map(|body| body.detail)
        .unwrap_or_else(|_| format!("HTTP {status}"))
}

#[derive(Debug, Deserialize)]
struct RawSchema {
    #[serde(default)]
    tables: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawTable {
    #[serde(default)]
    columns: Vec<ColumnDescriptor>,
}

fn schema_from_wire(raw: RawSchema) -> Result<SchemaSnapshot, ApiError> {
    let mut tables = Vec::with_capacity(raw.tables.len());
    for (name, value) in raw.tables {
        let table: RawTable = serde_json::from_value(value)
            .map_err(|error| ApiError::backend(format!("malformed schema for table {name}: {error}")))?;
        tables.push(TableDescriptor {
            name,
            columns: table.columns,
        });
    }
    Ok(SchemaSnapshot { tables })
}

#[derive(Debug, Deserialize)]
struct RawConnectResponse {
    message: String,
    #[serde(default)]
    schema: Option<RawSchema>,
}

#[derive(Debug, Deserialize)]
struct RawStatusResponse {
    connected: bool,
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    source: Option<String>,
    content: String,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

impl From<RawDocument> for DocumentHit {
    fn from(raw: RawDocument) -> Self {
        Self {
            source: raw.source,
            content: raw.content,
            score: raw.score,
            metadata: raw.metadata,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawSqlPart {
    #[serde(default)]
    data: Vec<Row>,
    #[serde(default)]
    generated_sql: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDocPart {
    #[serde(default)]
    documents: Vec<RawDocument>,
}

#[derive(Debug, Deserialize)]
struct RawQueryResponse {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<Vec<Row>>,
    #[serde(default)]
    documents: Option<Vec<RawDocument>>,
    #[serde(default)]
    sql_result: Option<RawSqlPart>,
    #[serde(default)]
    doc_result: Option<RawDocPart>,
    #[serde(default)]
    generated_sql: Option<String>,
    #[serde(default)]
    cached: bool,
    #[serde(default)]
    response_time: f64,
}

fn documents_from_wire(documents: Vec<RawDocument>) -> DocumentResult {
    DocumentResult {
        documents: documents.into_iter().map(DocumentHit::from).collect(),
    }
}

/// Validates the `type` discriminant and the fields each variant requires.
fn response_from_wire(raw: RawQueryResponse) -> Result<QueryResponse, ApiError> {
    let payload = match raw.kind.as_str() {
        "sql" => ResultPayload::Sql(SqlResult {
            rows: raw.data.unwrap_or_default(),
            generated_sql: raw.generated_sql,
        }),
        "document" => ResultPayload::Document(documents_from_wire(
            raw.documents.unwrap_or_default(),
        )),
        "hybrid" => {
            let sql = raw
                .sql_result
                .ok_or_else(|| ApiError::backend("hybrid response is missing sql_result"))?;
            let documents = raw
                .doc_result
                .ok_or_else(|| ApiError::backend("hybrid response is missing doc_result"))?;
            ResultPayload::Hybrid {
                sql: SqlResult {
                    rows: sql.data,
                    generated_sql: sql.generated_sql,
                },
                documents: documents_from_wire(documents.documents),
            }
        }
        other => {
            return Err(ApiError::backend(format!("unsupported result type: {other}")));
        }
    };

    Ok(QueryResponse {
        payload,
        cached: raw.cached,
        response_time_ms: raw.response_time,
    })
}

#[async_trait]
impl WorkbenchBackend for HttpBackend {
    async fn connect(&self, connection_string: &str) -> Result<ConnectOutcome, ApiError> {
        debug!(url = %self.endpoint("/ingest/connect-database"), "connecting");
        let raw: RawConnectResponse = self
            .post_json(
                "/ingest/connect-database",
                &json!({ "connection_string": connection_string }),
            )
            .await?;
        let schema = raw.schema.map(schema_from_wire).transpose()?;
        Ok(ConnectOutcome {
            message: raw.message,
            schema,
        })
    }

    async fn fetch_schema(&self) -> Result<SchemaSnapshot, ApiError> {
        let raw: RawSchema = self.get_json("/schema/").await?;
        schema_from_wire(raw)
    }

    async fn backend_status(&self) -> Result<bool, ApiError> {
        let raw: RawStatusResponse = self.get_json("/db/status").await?;
        Ok(raw.connected)
    }
}

#[async_trait]
impl QueryBackend for HttpBackend {
    async fn submit_query(&self, query: &str) -> Result<QueryResponse, ApiError> {
        debug!(query, "submitting query");
        let raw: RawQueryResponse = self
            .post_json("/query/", &json!({ "query": query }))
            .await?;
        response_from_wire(raw)
    }

    async fn fetch_history(&self) -> Result<Vec<String>, ApiError> {
        self.get_json("/query/history").await
    }
}

/// One in-flight multipart upload. The request runs on its own task so the
/// body keeps streaming while the caller polls progress; aborting the task
/// drops the connection mid-request.
pub struct HttpUploadTransfer {
    progress_rx: mpsc::UnboundedReceiver<ByteProgress>,
    done_rx: oneshot::Receiver<Result<(), UploadTransportError>>,
    handle: JoinHandle<()>,
}

#[async_trait]
impl UploadTransfer for HttpUploadTransfer {
    async fn next_progress(&mut self) -> Result<Option<ByteProgress>, UploadTransportError> {
        if let Some(progress) = self.progress_rx.recv().await {
            return Ok(Some(progress));
        }
        // Body fully streamed; await the response outcome.
        match (&mut self.done_rx).await {
            Ok(Ok(())) => Ok(None),
            Ok(Err(error)) => Err(error),
            Err(_) => Err(UploadTransportError::new("upload request task aborted")),
        }
    }

    async fn abort(&mut self) -> Result<(), UploadTransportError> {
        self.handle.abort();
        Ok(())
    }
}

#[async_trait]
impl UploadTransport for HttpBackend {
    type Transfer = HttpUploadTransfer;

    async fn start_upload(&self, file: &FileHandle) -> Result<Self::Transfer, UploadTransportError> {
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();
        let client = self.client.clone();
        let url = self.endpoint("/ingest/upload-documents");
        let file = file.clone();

        let handle = tokio::spawn(async move {
            let outcome = send_upload(&client, &url, &file, &progress_tx).await;
            let _ = done_tx.send(outcome);
        });

        Ok(HttpUploadTransfer {
            progress_rx,
            done_rx,
            handle,
        })
    }
}

async fn send_upload(
    client: &Client,
    url: &str,
    file: &FileHandle,
    progress: &mpsc::UnboundedSender<ByteProgress>,
) -> Result<(), UploadTransportError> {
    let total = file.size_bytes;
    let source = tokio::fs::File::open(&file.path)
        .await
        .map_err(|error| UploadTransportError::new(format!("cannot open {}: {error}", file.name)))?;

    let progress = progress.clone();
    let counted = stream::unfold((source, 0u64), move |(mut source, loaded)| {
        let progress = progress.clone();
        async move {
            let mut chunk = vec![0u8; UPLOAD_CHUNK_SIZE];
            match source.read(&mut chunk).await {
                Ok(0) => None,
                Ok(read) => {
                    chunk.truncate(read);
                    let loaded = loaded + read as u64;
                    let _ = progress.send(ByteProgress { loaded, total });
                    Some((Ok(chunk), (source, loaded)))
                }
                Err(error) => Some((Err(error), (source, loaded))),
            }
        }
    });

    let part = Part::stream_with_length(Body::wrap_stream(counted), total)
        .file_name(file.name.clone());
    let form = Form::new().part("files", part);

    let response = client
        .post(url)
        .multipart(form)
        .send()
        .await
        .map_err(|error| UploadTransportError::new(error.to_string()))?;

    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let bytes = response.bytes().await.unwrap_or_default();
    Err(UploadTransportError::new(detail_message(status, &bytes)))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use quarry_core::results::ResultPayload;

    use super::{
        detail_message, response_from_wire, schema_from_wire, HttpBackend, RawQueryResponse,
        RawSchema,
    };

    fn backend() -> HttpBackend {
        HttpBackend::new("http://127.0.0.1:8000/").expect("client should build")
    }

    #[test]
    fn endpoint_joins_without_doubled_slashes() {
        let backend = backend();
        assert_eq!(backend.base_url(), "http://127.0.0.1:8000");
        assert_eq!(
            backend.endpoint("/query/"),
            "http://127.0.0.1:8000/query/"
        );
    }

    #[test]
    fn schema_conversion_preserves_discovery_order() {
        let raw: RawSchema = serde_json::from_value(json!({
            "tables": {
                "zeta": { "columns": [{ "name": "id", "type": "integer" }] },
                "alpha": { "columns": [
                    { "name": "name", "type": "varchar" },
                    { "name": "age", "type": "integer" }
                ] }
            }
        }))
        .expect("valid wire schema");

        let schema = schema_from_wire(raw).expect("conversion should succeed");
        let names: Vec<_> = schema.tables.iter().map(|table| table.name.as_str()).collect();
        assert_eq!(names, ["zeta", "alpha"]);
        assert_eq!(schema.column_count(), 3);
    }

    #[test]
    fn malformed_schema_table_is_rejected_with_the_table_name() {
        let raw: RawSchema = serde_json::from_value(json!({
            "tables": { "broken": { "columns": "not-a-list" } }
        }))
        .expect("wire parse is lazy per table");

        let error = schema_from_wire(raw).expect_err("conversion should fail");
        assert!(error.user_message().contains("broken"));
    }

    fn raw_response(value: serde_json::Value) -> RawQueryResponse {
        serde_json::from_value(value).expect("valid wire response")
    }

    #[test]
    fn sql_response_converts_to_the_sql_payload() {
        let response = response_from_wire(raw_response(json!({
            "type": "sql",
            "data": [{ "id": 1 }, { "id": 2 }],
            "generated_sql": "SELECT * FROM employees",
            "cached": true,
            "response_time": 12.5
        })))
        .expect("conversion should succeed");

        let ResultPayload::Sql(sql) = &response.payload else {
            panic!("expected sql payload");
        };
        assert_eq!(sql.rows.len(), 2);
        assert_eq!(sql.generated_sql.as_deref(), Some("SELECT * FROM employees"));
        assert!(response.cached);
        assert!((response.response_time_ms - 12.5).abs() < f64::EPSILON);
    }

    #[test]
    fn document_response_converts_hits_with_optional_fields() {
        let response = response_from_wire(raw_response(json!({
            "type": "document",
            "documents": [
                { "source": "report.pdf", "content": "quarterly numbers", "score": 0.92 },
                { "content": "untitled snippet" }
            ]
        })))
        .expect("conversion should succeed");

        let ResultPayload::Document(documents) = &response.payload else {
            panic!("expected document payload");
        };
        assert_eq!(documents.documents.len(), 2);
        assert_eq!(documents.documents[0].source.as_deref(), Some("report.pdf"));
        assert!(documents.documents[1].source.is_none());
    }

    #[test]
    fn hybrid_response_requires_both_sub_results() {
        let response = response_from_wire(raw_response(json!({
            "type": "hybrid",
            "sql_result": { "data": [{ "id": 1 }], "generated_sql": "SELECT 1" },
            "doc_result": { "documents": [{ "content": "note" }] }
        })))
        .expect("conversion should succeed");
        assert!(matches!(response.payload, ResultPayload::Hybrid { .. }));

        let error = response_from_wire(raw_response(json!({
            "type": "hybrid",
            "sql_result": { "data": [] }
        })))
        .expect_err("missing doc_result should fail");
        assert!(error.user_message().contains("doc_result"));
    }

    #[test]
    fn unknown_result_type_is_rejected() {
        let error = response_from_wire(raw_response(json!({ "type": "graph" })))
            .expect_err("unknown discriminant should fail");
        assert!(error.user_message().contains("graph"));
    }

    #[test]
    fn error_detail_falls_back_to_the_status_line() {
        let status = reqwest::StatusCode::BAD_REQUEST;
        assert_eq!(
            detail_message(status, br#"{"detail": "Database not connected."}"#),
            "Database not connected."
        );
        assert_eq!(
            detail_message(status, b"<html>nginx</html>"),
            "HTTP 400 Bad Request"
        );
    }
}
