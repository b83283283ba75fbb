use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;

/// Grace period before a fully successful batch is cleared from display.
pub const CLEAR_DELAY: Duration = Duration::from_secs(3);

pub type TaskId = u64;

#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    pub path: PathBuf,
    pub name: String,
    pub size_bytes: u64,
}

impl FileHandle {
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self, std::io::Error> {
        let path = path.into();
        let metadata = std::fs::metadata(&path)?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self {
            path,
            name,
            size_bytes: metadata.len(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Word,
    Text,
    Csv,
    Other,
}

#[must_use]
pub fn file_kind(name: &str) -> FileKind {
    let extension = Path::new(name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase());
    match extension.as_deref() {
        Some("pdf") => FileKind::Pdf,
        Some("doc" | "docx") => FileKind::Word,
        Some("txt" | "md") => FileKind::Text,
        Some("csv") => FileKind::Csv,
        _ => FileKind::Other,
    }
}

#[must_use]
pub fn size_label(size_bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if size_bytes < 1024 {
        return format!("{size_bytes} B");
    }

    let mut value = size_bytes as f64;
    let mut unit = "B";
    for next_unit in UNITS {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = next_unit;
    }
    format!("{value:.1} {unit}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Pending,
    Uploading,
    Completed,
    Error,
    Cancelled,
}

impl UploadStatus {
    #[must_use]
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTask {
    pub id: TaskId,
    pub file: FileHandle,
    pub display_name: String,
    pub size_label: String,
    pub kind: FileKind,
    pub status: UploadStatus,
    pub progress_percent: u8,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    Started { task: TaskId },
    Progress { task: TaskId, loaded: u64, total: u64 },
    Completed { task: TaskId },
    Failed { task: TaskId, message: String },
    Cancelled { task: TaskId },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct UploadTransportError {
    message: String,
}

impl UploadTransportError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteProgress {
    pub loaded: u64,
    pub total: u64,
}

#[async_trait]
pub trait UploadTransfer: Send {
    /// Next byte-level progress report; `Ok(None)` once the body is fully
    /// sent and the backend confirmed success.
    async fn next_progress(&mut self) -> Result<Option<ByteProgress>, UploadTransportError>;

    async fn abort(&mut self) -> Result<(), UploadTransportError> {
        Ok(())
    }
}

#[async_trait]
pub trait UploadTransport {
    type Transfer: UploadTransfer + Send;

    async fn start_upload(&self, file: &FileHandle) -> Result<Self::Transfer, UploadTransportError>;
}

#[must_use]
fn progress_percent(loaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let ratio = loaded as f64 / total as f64;
    let percent = (ratio * 100.0).round();
    percent.clamp(0.0, 100.0) as u8
}

/// Drives one file transfer to settlement, checking the cancellation token
/// between suspension points and emitting events for the owning manager to
/// apply. A cancelled transfer is aborted at the transport and reported as
/// `Cancelled`, never `Failed`.
pub async fn drive_transfer<T: UploadTransport + ?Sized>(
    transport: &T,
    task: TaskId,
    file: &FileHandle,
    cancellation: &CancellationToken,
    events: &UnboundedSender<UploadEvent>,
) {
    let _ = events.send(UploadEvent::Started { task });

    let mut transfer = match transport.start_upload(file).await {
        Ok(transfer) => transfer,
        Err(error) => {
            let event = if cancellation.is_cancelled() {
                UploadEvent::Cancelled { task }
            } else {
                UploadEvent::Failed {
                    task,
                    message: error.to_string(),
                }
            };
            let _ = events.send(event);
            return;
        }
    };

    loop {
        if cancellation.is_cancelled() {
            let _ = transfer.abort().await;
            let _ = events.send(UploadEvent::Cancelled { task });
            return;
        }

        match transfer.next_progress().await {
            Ok(Some(progress)) => {
                let _ = events.send(UploadEvent::Progress {
                    task,
                    loaded: progress.loaded,
                    total: progress.total,
                });
            }
            Ok(None) => {
                let _ = events.send(UploadEvent::Completed { task });
                return;
            }
            Err(error) => {
                let event = if cancellation.is_cancelled() {
                    UploadEvent::Cancelled { task }
                } else {
                    UploadEvent::Failed {
                        task,
                        message: error.to_string(),
                    }
                };
                let _ = events.send(event);
                return;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchReport {
    AllSucceeded {
        success_count: usize,
    },
    PartialFailure {
        success_count: usize,
        failure_count: usize,
    },
    AllFailed {
        failure_count: usize,
    },
}

impl BatchReport {
    #[must_use]
    pub fn from_counts(success_count: usize, failure_count: usize) -> Self {
        if failure_count == 0 {
            Self::AllSucceeded { success_count }
        } else if success_count == 0 {
            Self::AllFailed { failure_count }
        } else {
            Self::PartialFailure {
                success_count,
                failure_count,
            }
        }
    }

    #[must_use]
    pub fn is_full_success(self) -> bool {
        matches!(self, Self::AllSucceeded { .. })
    }

    #[must_use]
    pub fn message(self) -> String {
        match self {
            Self::AllSucceeded { success_count } => {
                format!("All {success_count} documents uploaded successfully.")
            }
            Self::PartialFailure {
                success_count,
                failure_count,
            } => format!(
                "Uploaded {success_count} of {} documents; {failure_count} failed.",
                success_count + failure_count
            ),
            Self::AllFailed { failure_count } => {
                format!("All {failure_count} document uploads failed.")
            }
        }
    }
}

#[derive(Debug)]
struct BatchState {
    task_ids: Vec<TaskId>,
    reported: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UploadManagerError {
    #[error("no files were selected")]
    NoFilesSelected,
    #[error("an upload batch is already in flight")]
    BatchInFlight,
}

/// Owns the active upload tasks and their cancellation handles. Tasks in a
/// batch run concurrently, one transfer per file; all state mutation funnels
/// through [`UploadManager::apply_event`], which enforces legal status
/// transitions, keeps progress monotonic, and discards events for tasks that
/// already settled (including cancelled-then-late progress).
#[derive(Debug)]
pub struct UploadManager {
    tasks: Vec<UploadTask>,
    cancellations: HashMap<TaskId, CancellationToken>,
    next_task_id: TaskId,
    batch: Option<BatchState>,
    last_report: Option<BatchReport>,
    clear_delay: Duration,
    clear_at: Option<Instant>,
}

impl Default for UploadManager {
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            cancellations: HashMap::new(),
            next_task_id: 0,
            batch: None,
            last_report: None,
            clear_delay: CLEAR_DELAY,
            clear_at: None,
        }
    }
}

impl UploadManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_clear_delay(&mut self, delay: Duration) {
        self.clear_delay = delay;
    }

    #[must_use]
    pub fn tasks(&self) -> &[UploadTask] {
        &self.tasks
    }

    #[must_use]
    pub fn task(&self, id: TaskId) -> Option<&UploadTask> {
        self.tasks.iter().find(|task| task.id == id)
    }

    #[must_use]
    pub fn batch_in_flight(&self) -> bool {
        self.batch.as_ref().is_some_and(|batch| !batch.reported)
    }

    #[must_use]
    pub fn last_report(&self) -> Option<BatchReport> {
        self.last_report
    }

    /// Registers one pending task per file, replacing whatever the previous
    /// batch left behind. Rejected while a batch is still in flight.
    pub fn register_batch(
        &mut self,
        files: Vec<FileHandle>,
    ) -> Result<Vec<TaskId>, UploadManagerError> {
        if files.is_empty() {
            return Err(UploadManagerError::NoFilesSelected);
        }
        if self.batch_in_flight() {
            return Err(UploadManagerError::BatchInFlight);
        }

        self.tasks.clear();
        self.cancellations.clear();
        self.last_report = None;
        self.clear_at = None;

        let mut task_ids = Vec::with_capacity(files.len());
        for file in files {
            let id = self.next_task_id;
            self.next_task_id += 1;

            self.tasks.push(UploadTask {
                id,
                display_name: file.name.clone(),
                size_label: size_label(file.size_bytes),
                kind: file_kind(&file.name),
                file,
                status: UploadStatus::Pending,
                progress_percent: 0,
                error: None,
            });
            self.cancellations.insert(id, CancellationToken::new());
            task_ids.push(id);
        }

        self.batch = Some(BatchState {
            task_ids: task_ids.clone(),
            reported: false,
        });
        Ok(task_ids)
    }

    /// Registers a batch and spawns one concurrent transfer per file. Events
    /// arrive on the returned channel and must be fed back through
    /// [`UploadManager::apply_event`].
    pub fn spawn_batch<T>(
        &mut self,
        transport: Arc<T>,
        files: Vec<FileHandle>,
    ) -> Result<UnboundedReceiver<UploadEvent>, UploadManagerError>
    where
        T: UploadTransport + Send + Sync + 'static,
        T::Transfer: Send,
    {
        let task_ids = self.register_batch(files)?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        for id in task_ids {
            let Some(task) = self.task(id) else { continue };
            let file = task.file.clone();
            let cancellation = self
                .cancellations
                .get(&id)
                .cloned()
                .unwrap_or_default();
            let events = events_tx.clone();
            let transport = Arc::clone(&transport);

            tokio::spawn(async move {
                drive_transfer(&*transport, id, &file, &cancellation, &events).await;
            });
        }

        Ok(events_rx)
    }

    /// Cancels one task. Idempotent: cancelling twice, an unknown id, or a
    /// task that already settled is a no-op.
    pub fn cancel_task(&mut self, id: TaskId) {
        if let Some(token) = self.cancellations.get(&id) {
            token.cancel();
        }
    }

    /// Invokes every outstanding cancellation handle. Called on teardown so
    /// no orphaned transfer keeps mutating state after the owner is gone.
    pub fn cancel_all(&mut self) {
        for token in self.cancellations.values() {
            token.cancel();
        }
    }

    /// Applies one transfer event. Returns the batch report exactly once,
    /// when the last task of the current batch settles.
    pub fn apply_event(&mut self, event: UploadEvent) -> Option<BatchReport> {
        match event {
            UploadEvent::Started { task } => {
                if let Some(task) = self.task_mut(task) {
                    if task.status == UploadStatus::Pending {
                        task.status = UploadStatus::Uploading;
                    }
                }
            }
            UploadEvent::Progress {
                task,
                loaded,
                total,
            } => {
                if let Some(task) = self.task_mut(task) {
                    if task.status == UploadStatus::Uploading {
                        let percent = progress_percent(loaded, total);
                        task.progress_percent = task.progress_percent.max(percent);
                    }
                }
            }
            UploadEvent::Completed { task } => {
                if let Some(settled) = self.settle(task, UploadStatus::Completed, None) {
                    self.tasks[settled].progress_percent = 100;
                }
            }
            UploadEvent::Failed { task, message } => {
                self.settle(task, UploadStatus::Error, Some(message));
            }
            UploadEvent::Cancelled { task } => {
                self.settle(task, UploadStatus::Cancelled, None);
            }
        }

        self.report_if_settled()
    }

    /// When the clear deadline armed by a fully successful batch has
    /// elapsed, removes the completed tasks. Called by the owner's event
    /// loop; a no-op while the deadline is unarmed or still pending.
    pub fn clear_if_due(&mut self) {
        if self
            .clear_at
            .is_some_and(|deadline| Instant::now() >= deadline)
        {
            self.clear_at = None;
            self.clear_finished();
        }
    }

    /// Removes completed tasks once the display grace period is over; failed
    /// and cancelled tasks stay visible for inspection.
    pub fn clear_finished(&mut self) {
        self.tasks
            .retain(|task| task.status != UploadStatus::Completed);
        if self.batch.as_ref().is_some_and(|batch| batch.reported) {
            self.batch = None;
        }
    }

    fn task_mut(&mut self, id: TaskId) -> Option<&mut UploadTask> {
        self.tasks.iter_mut().find(|task| task.id == id)
    }

    fn settle(
        &mut self,
        id: TaskId,
        status: UploadStatus,
        error: Option<String>,
    ) -> Option<usize> {
        let index = self.tasks.iter().position(|task| task.id == id)?;
        if self.tasks[index].status.is_settled() {
            return None;
        }

        self.tasks[index].status = status;
        self.tasks[index].error = error;
        self.cancellations.remove(&id);
        Some(index)
    }

    fn report_if_settled(&mut self) -> Option<BatchReport> {
        let batch = self.batch.as_mut()?;
        if batch.reported {
            return None;
        }

        let mut success_count = 0;
        let mut failure_count = 0;
        for id in &batch.task_ids {
            let task = self.tasks.iter().find(|task| task.id == *id)?;
            match task.status {
                UploadStatus::Completed => success_count += 1,
                UploadStatus::Error | UploadStatus::Cancelled => failure_count += 1,
                UploadStatus::Pending | UploadStatus::Uploading => return None,
            }
        }

        batch.reported = true;
        let report = BatchReport::from_counts(success_count, failure_count);
        self.last_report = Some(report);
        if report.is_full_success() {
            self.clear_at = Some(Instant::now() + self.clear_delay);
        }
        Some(report)
    }
}

impl Drop for UploadManager {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
