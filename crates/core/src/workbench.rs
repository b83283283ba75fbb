use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use crate::api::ApiError;
use crate::query_executor::{QueryBackend, QueryExecutor, QuerySubmitError};
use crate::schema::SchemaSnapshot;
use crate::suggestions::{SuggestionCandidate, SuggestionDebouncer};
use crate::uploads::{
    BatchReport, FileHandle, UploadEvent, UploadManager, UploadManagerError, UploadTransport,
};

pub const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Successful connection handshake: a human-readable confirmation plus the
/// schema when the backend includes one in the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOutcome {
    pub message: String,
    pub schema: Option<SchemaSnapshot>,
}

#[async_trait]
pub trait WorkbenchBackend {
    async fn connect(&self, connection_string: &str) -> Result<ConnectOutcome, ApiError>;

    async fn fetch_schema(&self) -> Result<SchemaSnapshot, ApiError>;

    async fn backend_status(&self) -> Result<bool, ApiError>;
}

#[async_trait]
impl<T> WorkbenchBackend for Arc<T>
where
    T: WorkbenchBackend + Send + Sync,
{
    async fn connect(&self, connection_string: &str) -> Result<ConnectOutcome, ApiError> {
        self.as_ref().connect(connection_string).await
    }

    async fn fetch_schema(&self) -> Result<SchemaSnapshot, ApiError> {
        self.as_ref().fetch_schema().await
    }

    async fn backend_status(&self) -> Result<bool, ApiError> {
        self.as_ref().backend_status().await
    }
}

/// Receives usage notifications from the controller. Implementations decide
/// what to do with them (log, aggregate, discard).
pub trait MetricsSink {
    fn record_query(&mut self, response_time_ms: f64, cached: bool);

    fn record_upload_batch(&mut self, file_count: usize);
}

/// Sink that drops every notification. Useful where no metrics are wanted.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMetrics;

impl MetricsSink for NullMetrics {
    fn record_query(&mut self, _response_time_ms: f64, _cached: bool) {}

    fn record_upload_batch(&mut self, _file_count: usize) {}
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("connection string must not be empty")]
    EmptyConnectionString,
}

/// Composition root for one workbench session. Owns the connection state and
/// the active schema snapshot, and routes work to the query executor, the
/// upload manager and the suggestion debouncer. All mutation happens through
/// `&mut self`, so the session state is single-writer by construction.
pub struct WorkbenchController<B, M> {
    backend: Arc<B>,
    metrics: M,
    connected: bool,
    status_message: Option<String>,
    schema: Arc<SchemaSnapshot>,
    executor: QueryExecutor<Arc<B>>,
    uploads: UploadManager,
    debouncer: SuggestionDebouncer,
    suggestions_tx: UnboundedSender<Vec<SuggestionCandidate>>,
    suggestions_rx: UnboundedReceiver<Vec<SuggestionCandidate>>,
}

impl<B, M> WorkbenchController<B, M>
where
    B: WorkbenchBackend + QueryBackend + UploadTransport + Send + Sync + 'static,
    B::Transfer: Send,
    M: MetricsSink,
{
    #[must_use]
    pub fn new(backend: Arc<B>, metrics: M) -> Self {
        let (suggestions_tx, suggestions_rx) = mpsc::unbounded_channel();
        Self {
            executor: QueryExecutor::new(Arc::clone(&backend)),
            backend,
            metrics,
            connected: false,
            status_message: None,
            schema: Arc::new(SchemaSnapshot::default()),
            uploads: UploadManager::new(),
            debouncer: SuggestionDebouncer::default(),
            suggestions_tx,
            suggestions_rx,
        }
    }

    /// Replaces the default suggestion debounce window, for configured
    /// overrides.
    #[must_use]
    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.debouncer = SuggestionDebouncer::new(window);
        self
    }

    /// Replaces the default grace period before completed uploads are
    /// cleared, for configured overrides.
    #[must_use]
    pub fn with_upload_clear_delay(mut self, delay: Duration) -> Self {
        self.uploads.set_clear_delay(delay);
        self
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    #[must_use]
    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<SchemaSnapshot> {
        &self.schema
    }

    #[must_use]
    pub fn executor(&self) -> &QueryExecutor<Arc<B>> {
        &self.executor
    }

    #[must_use]
    pub fn uploads(&self) -> &UploadManager {
        &self.uploads
    }

    pub fn uploads_mut(&mut self) -> &mut UploadManager {
        &mut self.uploads
    }

    /// Connects to a data source. The schema is replaced wholesale: from the
    /// connect response when it carries one, otherwise from a follow-up
    /// schema fetch. A backend failure leaves the session disconnected with
    /// the failure stored as the status message. Returns whether the session
    /// is connected afterwards.
    pub async fn connect(&mut self, connection_string: &str) -> Result<bool, ConnectError> {
        let connection_string = connection_string.trim();
        if connection_string.is_empty() {
            return Err(ConnectError::EmptyConnectionString);
        }

        match self.backend.connect(connection_string).await {
            Ok(outcome) => {
                let schema = match outcome.schema {
                    Some(schema) => schema,
                    None => match self.backend.fetch_schema().await {
                        Ok(schema) => schema,
                        Err(error) => {
                            warn!(error = %error, "schema fetch after connect failed");
                            SchemaSnapshot::default()
                        }
                    },
                };
                debug!(
                    tables = schema.table_count(),
                    columns = schema.column_count(),
                    "connected"
                );
                self.schema = Arc::new(schema);
                self.connected = true;
                self.status_message = Some(outcome.message);
            }
            Err(error) => {
                self.connected = false;
                self.status_message = Some(error.user_message());
            }
        }
        Ok(self.connected)
    }

    /// One round of the periodic status poll. A poll failure leaves the last
    /// known connection state untouched.
    pub async fn poll_status_once(&mut self) {
        match self.backend.backend_status().await {
            Ok(connected) => self.connected = connected,
            Err(error) => debug!(error = %error, "status poll failed"),
        }
    }

    /// Submits a query through the executor, reporting a completed response
    /// to the metrics sink.
    pub async fn submit_query(&mut self, query_text: &str) -> Result<(), QuerySubmitError> {
        let connected = self.connected;
        let recorded = self
            .executor
            .submit(query_text, connected)
            .await?
            .map(|response| (response.response_time_ms, response.cached));
        if let Some((response_time_ms, cached)) = recorded {
            self.metrics.record_query(response_time_ms, cached);
        }
        Ok(())
    }

    /// Schedules a debounced suggestion evaluation against the active schema.
    /// Results arrive through [`WorkbenchController::try_take_suggestions`].
    pub fn request_suggestions(&mut self, input: &str) {
        self.debouncer.request(
            input.to_string(),
            Arc::clone(&self.schema),
            self.suggestions_tx.clone(),
        );
    }

    pub fn cancel_suggestions(&mut self) {
        self.debouncer.cancel_pending();
    }

    pub fn try_take_suggestions(&mut self) -> Option<Vec<SuggestionCandidate>> {
        self.suggestions_rx.try_recv().ok()
    }

    /// Starts one concurrent transfer per selected file. Events from the
    /// returned channel must be fed back through
    /// [`WorkbenchController::apply_upload_event`].
    pub fn upload_files(
        &mut self,
        files: Vec<FileHandle>,
    ) -> Result<UnboundedReceiver<UploadEvent>, UploadManagerError> {
        self.uploads.spawn_batch(Arc::clone(&self.backend), files)
    }

    /// Applies one upload event. When the event settles the batch, a fully
    /// successful batch is reported to the metrics sink, once.
    pub fn apply_upload_event(&mut self, event: UploadEvent) -> Option<BatchReport> {
        let report = self.uploads.apply_event(event);
        if let Some(BatchReport::AllSucceeded { success_count }) = report {
            self.metrics.record_upload_batch(success_count);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{
        ConnectError, ConnectOutcome, MetricsSink, WorkbenchBackend, WorkbenchController,
    };
    use crate::api::ApiError;
    use crate::query_executor::QueryBackend;
    use crate::results::{QueryResponse, ResultPayload, SqlResult};
    use crate::schema::test_support::sample_schema;
    use crate::uploads::{
        ByteProgress, FileHandle, UploadEvent, UploadTransfer, UploadTransport,
        UploadTransportError,
    };

    #[derive(Debug, Default)]
    struct FakeBackend {
        fail_connect: Option<ApiError>,
        schema_in_connect: bool,
        fail_schema: bool,
        status: Option<Result<bool, ApiError>>,
        fail_query: Option<ApiError>,
    }

    #[async_trait]
    impl WorkbenchBackend for FakeBackend {
        async fn connect(&self, _connection_string: &str) -> Result<ConnectOutcome, ApiError> {
            if let Some(error) = &self.fail_connect {
                return Err(error.clone());
            }
            Ok(ConnectOutcome {
                message: "Connected successfully".to_string(),
                schema: self.schema_in_connect.then(sample_schema),
            })
        }

        async fn fetch_schema(&self) -> Result<crate::schema::SchemaSnapshot, ApiError> {
            if self.fail_schema {
                return Err(ApiError::network("schema endpoint unreachable"));
            }
            Ok(sample_schema())
        }

        async fn backend_status(&self) -> Result<bool, ApiError> {
            self.status
                .clone()
                .unwrap_or_else(|| Err(ApiError::network("status endpoint unreachable")))
        }
    }

    #[async_trait]
    impl QueryBackend for FakeBackend {
        async fn submit_query(&self, _query: &str) -> Result<QueryResponse, ApiError> {
            if let Some(error) = &self.fail_query {
                return Err(error.clone());
            }
            Ok(QueryResponse {
                payload: ResultPayload::Sql(SqlResult::default()),
                cached: true,
                response_time_ms: 42.0,
            })
        }

        async fn fetch_history(&self) -> Result<Vec<String>, ApiError> {
            Ok(Vec::new())
        }
    }

    struct FakeTransfer;

    #[async_trait]
    impl UploadTransfer for FakeTransfer {
        async fn next_progress(&mut self) -> Result<Option<ByteProgress>, UploadTransportError> {
            Ok(None)
        }
    }

    #[async_trait]
    impl UploadTransport for FakeBackend {
        type Transfer = FakeTransfer;

        async fn start_upload(
            &self,
            _file: &FileHandle,
        ) -> Result<Self::Transfer, UploadTransportError> {
            Ok(FakeTransfer)
        }
    }

    #[derive(Debug, Default)]
    struct RecordingMetrics {
        queries: Vec<(f64, bool)>,
        upload_batches: Vec<usize>,
    }

    impl MetricsSink for RecordingMetrics {
        fn record_query(&mut self, response_time_ms: f64, cached: bool) {
            self.queries.push((response_time_ms, cached));
        }

        fn record_upload_batch(&mut self, file_count: usize) {
            self.upload_batches.push(file_count);
        }
    }

    fn controller(backend: FakeBackend) -> WorkbenchController<FakeBackend, RecordingMetrics> {
        WorkbenchController::new(Arc::new(backend), RecordingMetrics::default())
    }

    fn file(name: &str) -> FileHandle {
        FileHandle {
            path: PathBuf::from(name),
            name: name.to_string(),
            size_bytes: 1024,
        }
    }

    #[tokio::test]
    async fn empty_connection_string_is_rejected_locally() {
        let mut controller = controller(FakeBackend::default());
        let err = controller
            .connect("   ")
            .await
            .expect_err("empty connection string should be rejected");
        assert_eq!(err, ConnectError::EmptyConnectionString);
        assert!(!controller.is_connected());
    }

    #[tokio::test]
    async fn connect_takes_the_schema_from_the_handshake_when_present() {
        let mut controller = controller(FakeBackend {
            schema_in_connect: true,
            fail_schema: true,
            ..FakeBackend::default()
        });

        let connected = controller.connect("mysql://demo").await.expect("accepted");
        assert!(connected);
        assert_eq!(controller.schema().table_count(), 2);
        assert_eq!(controller.status_message(), Some("Connected successfully"));
    }

    #[tokio::test]
    async fn connect_falls_back_to_a_schema_fetch() {
        let mut controller = controller(FakeBackend::default());

        controller.connect("mysql://demo").await.expect("accepted");
        assert!(controller.is_connected());
        assert_eq!(controller.schema().table_count(), 2);
    }

    #[tokio::test]
    async fn failed_connect_stores_the_message_and_stays_disconnected() {
        let mut controller = controller(FakeBackend {
            fail_connect: Some(ApiError::backend("Could not connect to database.")),
            ..FakeBackend::default()
        });

        let connected = controller.connect("mysql://demo").await.expect("accepted");
        assert!(!connected);
        assert!(!controller.is_connected());
        assert_eq!(
            controller.status_message(),
            Some("Could not connect to database.")
        );
    }

    #[tokio::test]
    async fn status_poll_updates_the_connection_state() {
        let mut controller = controller(FakeBackend {
            status: Some(Ok(false)),
            ..FakeBackend::default()
        });
        controller.connected = true;

        controller.poll_status_once().await;
        assert!(!controller.is_connected());
    }

    #[tokio::test]
    async fn failed_status_poll_leaves_the_last_known_state_untouched() {
        let mut controller = controller(FakeBackend::default());
        controller.connected = true;

        controller.poll_status_once().await;
        assert!(controller.is_connected());
    }

    #[tokio::test]
    async fn completed_queries_are_reported_to_the_metrics_sink() {
        let mut controller = controller(FakeBackend::default());
        controller.connected = true;

        controller.submit_query("show all employees").await.expect("accepted");
        assert_eq!(controller.metrics.queries, [(42.0, true)]);
    }

    #[tokio::test]
    async fn failed_queries_are_not_reported_to_the_metrics_sink() {
        let mut controller = controller(FakeBackend {
            fail_query: Some(ApiError::backend("bad query")),
            ..FakeBackend::default()
        });
        controller.connected = true;

        controller.submit_query("show all employees").await.expect("accepted");
        assert!(controller.metrics.queries.is_empty());
        assert_eq!(controller.executor().last_error(), Some("bad query"));
    }

    #[tokio::test]
    async fn fully_successful_batches_are_reported_exactly_once() {
        let mut controller = controller(FakeBackend::default());
        let ids = controller
            .uploads_mut()
            .register_batch(vec![file("a.pdf"), file("b.pdf")])
            .expect("batch accepted");

        for id in &ids {
            controller.apply_upload_event(UploadEvent::Started { task: *id });
        }
        for id in &ids {
            controller.apply_upload_event(UploadEvent::Completed { task: *id });
        }

        assert_eq!(controller.metrics.upload_batches, [2]);
    }

    #[tokio::test]
    async fn mixed_outcome_batches_are_not_reported_as_successes() {
        let mut controller = controller(FakeBackend::default());
        let ids = controller
            .uploads_mut()
            .register_batch(vec![file("a.pdf"), file("b.pdf")])
            .expect("batch accepted");

        controller.apply_upload_event(UploadEvent::Completed { task: ids[0] });
        controller.apply_upload_event(UploadEvent::Failed {
            task: ids[1],
            message: "connection reset".to_string(),
        });

        assert!(controller.metrics.upload_batches.is_empty());
        assert!(controller.uploads().last_report().is_some());
    }

    #[tokio::test]
    async fn upload_batch_runs_through_the_backend_transport() {
        let mut controller = controller(FakeBackend::default());
        let mut events = controller
            .upload_files(vec![file("a.pdf")])
            .expect("batch accepted");

        let mut report = None;
        while let Some(event) = events.recv().await {
            if let Some(settled) = controller.apply_upload_event(event) {
                report = Some(settled);
            }
        }
        assert!(report.is_some_and(|report| report.is_full_success()));
        assert_eq!(controller.metrics.upload_batches, [1]);
    }

    #[tokio::test(start_paused = true)]
    async fn configured_debounce_window_drives_suggestion_timing() {
        let mut controller = controller(FakeBackend::default())
            .with_debounce_window(Duration::from_millis(100));
        controller.connect("mysql://demo").await.expect("accepted");

        controller.request_suggestions("emp");
        tokio::time::sleep(Duration::from_millis(99)).await;
        assert!(controller.try_take_suggestions().is_none());

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(controller.try_take_suggestions().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn configured_clear_delay_drives_the_upload_grace_period() {
        let mut controller = controller(FakeBackend::default())
            .with_upload_clear_delay(Duration::from_secs(1));
        let ids = controller
            .uploads_mut()
            .register_batch(vec![file("a.pdf")])
            .expect("batch accepted");
        controller.apply_upload_event(UploadEvent::Completed { task: ids[0] });

        controller.uploads_mut().clear_if_due();
        assert_eq!(controller.uploads().tasks().len(), 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        controller.uploads_mut().clear_if_due();
        assert!(controller.uploads().tasks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn suggestion_requests_flow_back_through_the_controller_channel() {
        let mut controller = controller(FakeBackend::default());
        controller.connect("mysql://demo").await.expect("accepted");

        controller.request_suggestions("emp");
        tokio::time::sleep(crate::suggestions::DEBOUNCE_WINDOW * 2).await;

        let delivered = controller
            .try_take_suggestions()
            .expect("debounced evaluation should have fired");
        assert!(delivered.iter().any(|candidate| candidate.name == "employees"));
    }
}
