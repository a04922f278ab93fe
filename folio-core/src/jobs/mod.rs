//! Job state machine
//!
//! Every conversion, metadata patch and import runs as a job: a spawned task
//! that walks a fixed stage sequence, publishes observable progress, and
//! finalizes atomically. At most one job may target a given book at a time;
//! conflicting submissions are rejected up front, before a job row exists.

use crate::assembler::{self, EpubMetadata};
use crate::error::{FolioError, Result};
use crate::library::LibraryIndex;
use crate::patcher::{self, MetadataPatch};
use crate::segmenter::Segmenter;
use crate::storage;
use crate::templates::RuleTemplateStore;
use crate::types::{
    BookFilter, BookRecord, BookSort, BookStatus, Job, JobErrorRecord, JobStage, MetadataOverrides,
};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// Request to convert a plain-text manuscript into an EPUB
#[derive(Debug, Clone)]
pub struct ConvertRequest {
    pub source: PathBuf,
    pub template_id: String,
    pub overrides: MetadataOverrides,
    pub cover: Option<PathBuf>,
    /// Re-process an existing book in place; a fresh id is allocated when
    /// absent
    pub book_id: Option<Uuid>,
}

/// Request to patch metadata of an existing book's archive
#[derive(Debug, Clone)]
pub struct PatchRequest {
    pub book_id: Uuid,
    pub fields: MetadataPatch,
    pub cover: Option<PathBuf>,
}

/// Request to import an existing EPUB into the library
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub source: PathBuf,
    pub overrides: MetadataOverrides,
}

#[derive(Debug, Clone)]
enum JobInput {
    Convert(ConvertRequest),
    Patch(PatchRequest),
    Import(ImportRequest),
}

/// Shared runner handle; cheap to clone
#[derive(Clone)]
pub struct JobRunner {
    inner: Arc<RunnerInner>,
}

struct RunnerInner {
    root: PathBuf,
    templates: RuleTemplateStore,
    library: RwLock<LibraryIndex>,
    jobs: RwLock<HashMap<Uuid, Job>>,
    /// Original submissions, kept so failed jobs can be retried
    inputs: RwLock<HashMap<Uuid, JobInput>>,
    /// Book ids with a live job; the submission-time conflict gate
    active: Mutex<HashSet<Uuid>>,
    cancels: Mutex<HashMap<Uuid, Arc<AtomicBool>>>,
    handles: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

/// Releases the book's conflict slot on every exit path
struct ActiveGuard {
    inner: Arc<RunnerInner>,
    book_id: Uuid,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if let Ok(mut active) = self.inner.active.lock() {
            active.remove(&self.book_id);
        }
    }
}

/// Job aborted by a cancel request; internal control-flow marker
struct Canceled;

impl JobRunner {
    /// Open a runner rooted at `root`: templates under `root/rules`, archives
    /// under `root/books`, the index at `root/library.json`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        let templates = RuleTemplateStore::open(root.join("rules"))?;
        let library = LibraryIndex::load(&root.join("library.json")).await?;
        info!(root = %root.display(), books = library.len(), "library opened");

        Ok(Self {
            inner: Arc::new(RunnerInner {
                root,
                templates,
                library: RwLock::new(library),
                jobs: RwLock::new(HashMap::new()),
                inputs: RwLock::new(HashMap::new()),
                active: Mutex::new(HashSet::new()),
                cancels: Mutex::new(HashMap::new()),
                handles: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn templates(&self) -> &RuleTemplateStore {
        &self.inner.templates
    }

    /// Submit a conversion job. Fails with [`FolioError::Conflict`] when the
    /// target book already has a live job.
    pub async fn submit_convert(&self, mut req: ConvertRequest) -> Result<Uuid> {
        let book_id = req.book_id.unwrap_or_else(Uuid::new_v4);
        req.book_id = Some(book_id);
        self.spawn(book_id, JobInput::Convert(req)).await
    }

    /// Submit a metadata patch for an existing book
    pub async fn submit_patch(&self, req: PatchRequest) -> Result<Uuid> {
        if self.inner.library.read().await.get(&req.book_id).is_none() {
            return Err(FolioError::UnknownBook(req.book_id));
        }
        self.spawn(req.book_id, JobInput::Patch(req)).await
    }

    /// Import an existing EPUB as a new library book
    pub async fn submit_import(&self, req: ImportRequest) -> Result<Uuid> {
        self.spawn(Uuid::new_v4(), JobInput::Import(req)).await
    }

    async fn spawn(&self, book_id: Uuid, input: JobInput) -> Result<Uuid> {
        let guard = {
            let mut active = self
                .inner
                .active
                .lock()
                .map_err(|_| FolioError::Preprocess("runner state poisoned".into()))?;
            if !active.insert(book_id) {
                return Err(FolioError::Conflict { book_id });
            }
            ActiveGuard {
                inner: self.inner.clone(),
                book_id,
            }
        };

        let job_id = Uuid::new_v4();
        let job = Job::new(job_id, Some(book_id));
        self.inner.jobs.write().await.insert(job_id, job);
        self.inner.inputs.write().await.insert(job_id, input.clone());

        let cancel = Arc::new(AtomicBool::new(false));
        if let Ok(mut cancels) = self.inner.cancels.lock() {
            cancels.insert(job_id, cancel.clone());
        }

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            run_job(inner, job_id, book_id, input, cancel, guard).await;
        });
        if let Ok(mut handles) = self.inner.handles.lock() {
            handles.insert(job_id, handle);
        }

        info!(%job_id, %book_id, "job submitted");
        Ok(job_id)
    }

    /// Request cancellation; takes effect at the next stage boundary.
    /// Canceling a terminal job is a no-op.
    pub async fn cancel(&self, job_id: Uuid) -> Result<()> {
        if self.inner.jobs.read().await.get(&job_id).is_none() {
            return Err(FolioError::UnknownJob(job_id));
        }
        if let Ok(cancels) = self.inner.cancels.lock() {
            if let Some(flag) = cancels.get(&job_id) {
                flag.store(true, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    /// Re-submit a failed or canceled job's original input as a new job
    pub async fn retry(&self, job_id: Uuid) -> Result<Uuid> {
        let stage = self
            .inner
            .jobs
            .read()
            .await
            .get(&job_id)
            .map(|j| j.stage)
            .ok_or(FolioError::UnknownJob(job_id))?;
        if !matches!(stage, JobStage::Failed | JobStage::Canceled) {
            return Err(FolioError::Preprocess(format!(
                "job {job_id} is not in a retryable state"
            )));
        }
        let input = self
            .inner
            .inputs
            .read()
            .await
            .get(&job_id)
            .cloned()
            .ok_or(FolioError::UnknownJob(job_id))?;

        match input {
            JobInput::Convert(req) => self.submit_convert(req).await,
            JobInput::Patch(req) => self.submit_patch(req).await,
            JobInput::Import(req) => self.submit_import(req).await,
        }
    }

    /// Snapshot of a single job
    pub async fn job(&self, job_id: Uuid) -> Option<Job> {
        self.inner.jobs.read().await.get(&job_id).cloned()
    }

    /// Snapshot of all jobs, newest first
    pub async fn jobs(&self) -> Vec<Job> {
        let mut out: Vec<Job> = self.inner.jobs.read().await.values().cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    /// Wait for a job's task to finish and return the terminal snapshot
    pub async fn wait(&self, job_id: Uuid) -> Result<Job> {
        let handle = self
            .inner
            .handles
            .lock()
            .ok()
            .and_then(|mut handles| handles.remove(&job_id));
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.job(job_id).await.ok_or(FolioError::UnknownJob(job_id))
    }

    pub async fn book(&self, book_id: Uuid) -> Option<BookRecord> {
        self.inner.library.read().await.get(&book_id).cloned()
    }

    pub async fn books(&self, filter: &BookFilter, sort: BookSort) -> Vec<BookRecord> {
        self.inner.library.read().await.list(filter, sort)
    }
}

impl RunnerInner {
    fn book_path(&self, book_id: Uuid) -> PathBuf {
        self.root.join("books").join(format!("{book_id}.epub"))
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("library.json")
    }
}

async fn run_job(
    inner: Arc<RunnerInner>,
    job_id: Uuid,
    book_id: Uuid,
    input: JobInput,
    cancel: Arc<AtomicBool>,
    guard: ActiveGuard,
) {
    let outcome = match input {
        JobInput::Convert(req) => run_convert(&inner, job_id, book_id, req, &cancel).await,
        JobInput::Patch(req) => run_patch(&inner, job_id, req, &cancel).await,
        JobInput::Import(req) => run_import(&inner, job_id, book_id, req, &cancel).await,
    };

    match outcome {
        Ok(Ok(())) => {
            finish(&inner, job_id, JobStage::Succeeded, None).await;
            info!(%job_id, "job succeeded");
        }
        Ok(Err(Canceled)) => {
            finish(&inner, job_id, JobStage::Canceled, None).await;
            info!(%job_id, "job canceled");
        }
        Err(err) => {
            warn!(%job_id, error = %err, "job failed");
            let record = JobErrorRecord::classify(&err);
            finish(&inner, job_id, JobStage::Failed, Some(record)).await;
            mark_book_error(&inner, book_id).await;
        }
    }

    // The conflict slot opens only once the terminal state (and any book
    // status write) is visible; a successor admitted for this book can never
    // race the finished job's writes
    drop(guard);
}

/// Advance a job to `stage`; progress never moves backwards within a run
async fn set_stage(inner: &RunnerInner, job_id: Uuid, stage: JobStage) {
    if let Some(job) = inner.jobs.write().await.get_mut(&job_id) {
        job.stage = stage;
        job.progress = job.progress.max(stage.progress_floor());
    }
}

async fn finish(inner: &RunnerInner, job_id: Uuid, stage: JobStage, error: Option<JobErrorRecord>) {
    if let Some(job) = inner.jobs.write().await.get_mut(&job_id) {
        job.stage = stage;
        job.progress = job.progress.max(stage.progress_floor());
        job.error = error;
        job.finished_at = Some(Utc::now());
    }
    // Terminal jobs can no longer be canceled; drop the flag
    if let Ok(mut cancels) = inner.cancels.lock() {
        cancels.remove(&job_id);
    }
}

/// A failed job leaves an existing book flagged, never half-updated
async fn mark_book_error(inner: &RunnerInner, book_id: Uuid) {
    let mut library = inner.library.write().await;
    if library.set_status(&book_id, BookStatus::Error) {
        if let Err(err) = library.save(&inner.index_path()).await {
            warn!(%book_id, error = %err, "failed to persist book error status");
        }
    }
}

/// Stage boundary: returns control-flow `Err(Canceled)` when a cancel request
/// has landed
async fn enter_stage(
    inner: &RunnerInner,
    job_id: Uuid,
    stage: JobStage,
    cancel: &AtomicBool,
) -> std::result::Result<(), Canceled> {
    if cancel.load(Ordering::SeqCst) {
        return Err(Canceled);
    }
    set_stage(inner, job_id, stage).await;
    Ok(())
}

type StageResult = Result<std::result::Result<(), Canceled>>;

async fn read_source(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| FolioError::Preprocess(format!("read {}: {e}", path.display())))
}

async fn run_convert(
    inner: &RunnerInner,
    job_id: Uuid,
    book_id: Uuid,
    req: ConvertRequest,
    cancel: &AtomicBool,
) -> StageResult {
    if enter_stage(inner, job_id, JobStage::Preprocessing, cancel).await.is_err() {
        return Ok(Err(Canceled));
    }
    let raw = read_source(&req.source).await?;
    if raw.is_empty() {
        return Err(FolioError::Preprocess(format!(
            "manuscript {} is empty",
            req.source.display()
        )));
    }
    let (_, rules) = inner.templates.get(&req.template_id)?;
    let cover = match &req.cover {
        Some(path) => Some(read_source(path).await?),
        None => None,
    };

    if enter_stage(inner, job_id, JobStage::Segmenting, cancel).await.is_err() {
        return Ok(Err(Canceled));
    }
    let segmentation = Segmenter::new().segment(&raw, &rules).map_err(FolioError::from)?;

    if enter_stage(inner, job_id, JobStage::Assembling, cancel).await.is_err() {
        return Ok(Err(Canceled));
    }
    let title = req
        .overrides
        .title
        .clone()
        .or_else(|| segmentation.derived_title.clone())
        .or_else(|| {
            req.source
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "Untitled".into());
    let mut meta = EpubMetadata::new(book_id, &title);
    meta.author = req.overrides.author.clone();
    meta.series = req.overrides.series.clone();
    meta.description = req.overrides.description.clone();
    let epub = assembler::assemble(&segmentation.root, &meta, cover.as_deref(), Utc::now())
        .map_err(FolioError::from)?;

    // Assembly succeeded, the book now exists (pending finalization)
    let path = inner.book_path(book_id);
    {
        let mut library = inner.library.write().await;
        let mut record = match library.get(&book_id) {
            Some(existing) => existing.clone(),
            None => BookRecord::new(book_id, &title, &path),
        };
        record.title = title;
        record.author = meta.author;
        record.series = meta.series;
        record.description = meta.description;
        record.cover_ref = cover
            .as_deref()
            .and_then(|bytes| assembler::sniff_cover(bytes).ok())
            .map(|(ext, _)| format!("Images/cover.{ext}"));
        record.status = BookStatus::Pending;
        record.updated_at = Utc::now();
        library.upsert(record);
    }

    if enter_stage(inner, job_id, JobStage::Finalizing, cancel).await.is_err() {
        return Ok(Err(Canceled));
    }
    storage::write_atomic(&path, &epub).await?;

    let mut library = inner.library.write().await;
    library.set_status(&book_id, BookStatus::Synced);
    library.save(&inner.index_path()).await?;

    Ok(Ok(()))
}

async fn run_patch(
    inner: &RunnerInner,
    job_id: Uuid,
    req: PatchRequest,
    cancel: &AtomicBool,
) -> StageResult {
    if enter_stage(inner, job_id, JobStage::Preprocessing, cancel).await.is_err() {
        return Ok(Err(Canceled));
    }
    let record = inner
        .library
        .read()
        .await
        .get(&req.book_id)
        .cloned()
        .ok_or(FolioError::UnknownBook(req.book_id))?;
    let epub = storage::read(&record.path).await?;
    let cover = match &req.cover {
        Some(path) => Some(read_source(path).await?),
        None => None,
    };

    if enter_stage(inner, job_id, JobStage::PatchingMetadata, cancel).await.is_err() {
        return Ok(Err(Canceled));
    }
    let patched =
        patcher::patch(&epub, &req.fields, cover.as_deref()).map_err(FolioError::from)?;

    if enter_stage(inner, job_id, JobStage::Finalizing, cancel).await.is_err() {
        return Ok(Err(Canceled));
    }
    storage::write_atomic(&record.path, &patched).await?;

    let mut library = inner.library.write().await;
    let mut updated = record;
    if let Some(title) = &req.fields.title {
        updated.title = title.clone();
    }
    if let Some(author) = &req.fields.author {
        updated.author = Some(author.clone());
    }
    if let Some(series) = &req.fields.series {
        updated.series = Some(series.clone());
    }
    if let Some(description) = &req.fields.description {
        updated.description = Some(description.clone());
    }
    if let Some(bytes) = cover.as_deref() {
        if let Ok((ext, _)) = assembler::sniff_cover(bytes) {
            updated.cover_ref = Some(format!("cover.{ext}"));
        }
    }
    library.upsert(updated);
    library.set_status(&req.book_id, BookStatus::Synced);
    library.save(&inner.index_path()).await?;

    Ok(Ok(()))
}

async fn run_import(
    inner: &RunnerInner,
    job_id: Uuid,
    book_id: Uuid,
    req: ImportRequest,
    cancel: &AtomicBool,
) -> StageResult {
    if enter_stage(inner, job_id, JobStage::Preprocessing, cancel).await.is_err() {
        return Ok(Err(Canceled));
    }
    let epub = read_source(&req.source).await?;

    if enter_stage(inner, job_id, JobStage::PatchingMetadata, cancel).await.is_err() {
        return Ok(Err(Canceled));
    }
    let summary = patcher::read_summary(&epub).map_err(FolioError::from)?;

    if enter_stage(inner, job_id, JobStage::Finalizing, cancel).await.is_err() {
        return Ok(Err(Canceled));
    }
    let path = inner.book_path(book_id);
    storage::write_atomic(&path, &epub).await?;

    let title = req
        .overrides
        .title
        .clone()
        .or(summary.title)
        .or_else(|| {
            req.source
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "Untitled".into());
    let mut record = BookRecord::new(book_id, title, &path);
    record.author = req.overrides.author.clone().or(summary.author);
    record.series = req.overrides.series.clone().or(summary.series);
    record.description = req.overrides.description.clone().or(summary.description);
    record.cover_ref = summary.cover_href;

    let mut library = inner.library.write().await;
    library.upsert(record);
    library.set_status(&book_id, BookStatus::Synced);
    library.save(&inner.index_path()).await?;

    Ok(Ok(()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANUSCRIPT: &str = "第1卷 初始之地\n这是正文。\n第1章 穿越\n主角醒来。\n";

    async fn runner(dir: &tempfile::TempDir) -> JobRunner {
        JobRunner::open(dir.path().join("library")).await.unwrap()
    }

    async fn write_manuscript(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("book.txt");
        tokio::fs::write(&path, MANUSCRIPT).await.unwrap();
        path
    }

    fn convert_request(source: PathBuf) -> ConvertRequest {
        ConvertRequest {
            source,
            template_id: "default".into(),
            overrides: MetadataOverrides::default(),
            cover: None,
            book_id: None,
        }
    }

    #[tokio::test]
    async fn test_convert_job_produces_synced_book() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(&dir).await;
        let source = write_manuscript(&dir).await;

        let job_id = runner.submit_convert(convert_request(source)).await.unwrap();
        let job = runner.wait(job_id).await.unwrap();

        assert_eq!(job.stage, JobStage::Succeeded);
        assert_eq!(job.progress, 100);
        let book_id = job.book_id.unwrap();
        let book = runner.book(book_id).await.unwrap();
        assert_eq!(book.status, BookStatus::Synced);
        assert!(book.path.exists());
        // First short front-matter line is absent here, title falls back to
        // the file stem
        assert_eq!(book.title, "book");
    }

    #[tokio::test]
    async fn test_failed_convert_records_classified_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(&dir).await;
        let source = dir.path().join("missing.txt");

        let job_id = runner.submit_convert(convert_request(source)).await.unwrap();
        let job = runner.wait(job_id).await.unwrap();

        assert_eq!(job.stage, JobStage::Failed);
        let error = job.error.unwrap();
        assert_eq!(error.kind, crate::types::JobErrorKind::Preprocess);
        assert!(job.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_conflicting_submission_rejected_without_job_row() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(&dir).await;
        let source = write_manuscript(&dir).await;
        let book_id = Uuid::new_v4();

        let mut first = convert_request(source.clone());
        first.book_id = Some(book_id);
        let job_id = runner.submit_convert(first).await.unwrap();

        let mut second = convert_request(source);
        second.book_id = Some(book_id);
        let err = runner.submit_convert(second).await;
        // The first job may already have finished on a fast machine, in
        // which case the second submission is legal
        if let Err(err) = err {
            assert!(matches!(err, FolioError::Conflict { book_id: b } if b == book_id));
            assert_eq!(runner.jobs().await.len(), 1);
        }

        runner.wait(job_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_manuscript_fails_in_preprocessing() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(&dir).await;
        let source = dir.path().join("empty.txt");
        tokio::fs::write(&source, b"").await.unwrap();

        let job_id = runner.submit_convert(convert_request(source)).await.unwrap();
        let job = runner.wait(job_id).await.unwrap();

        assert_eq!(job.stage, JobStage::Failed);
        assert_eq!(job.error.unwrap().kind, crate::types::JobErrorKind::Preprocess);
        // Nothing reached assembly, so no book record exists
        assert!(runner.book(job.book_id.unwrap()).await.is_none());
    }

    #[tokio::test]
    async fn test_convert_job_never_shows_the_metadata_patch_stage() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(&dir).await;
        let source = write_manuscript(&dir).await;

        let job_id = runner.submit_convert(convert_request(source)).await.unwrap();
        let mut seen = Vec::new();
        loop {
            let job = runner.job(job_id).await.unwrap();
            seen.push(job.stage);
            if job.stage.is_terminal() {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(*seen.last().unwrap(), JobStage::Succeeded);
        assert!(!seen.contains(&JobStage::PatchingMetadata), "saw {seen:?}");
    }

    #[tokio::test]
    async fn test_conflict_slot_opens_only_after_terminal_state() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(&dir).await;
        let source = write_manuscript(&dir).await;

        let mut first = convert_request(source.clone());
        let first_job = runner.submit_convert(first.clone()).await.unwrap();
        let book_id = runner.wait(first_job).await.unwrap().book_id.unwrap();

        // Re-process the same book with a missing source so the job fails
        first.source = dir.path().join("gone.txt");
        first.book_id = Some(book_id);
        let failing = runner.submit_convert(first).await.unwrap();

        // The moment a successor is admitted, the failed job must already be
        // terminal and its book-status write visible
        let mut second = convert_request(source);
        second.book_id = Some(book_id);
        let second_id = loop {
            match runner.submit_convert(second.clone()).await {
                Ok(id) => break id,
                Err(FolioError::Conflict { .. }) => tokio::task::yield_now().await,
                Err(err) => panic!("unexpected submit error: {err}"),
            }
        };
        let failed = runner.job(failing).await.unwrap();
        assert_eq!(failed.stage, JobStage::Failed);

        let job = runner.wait(second_id).await.unwrap();
        assert_eq!(job.stage, JobStage::Succeeded);
        assert_eq!(runner.book(book_id).await.unwrap().status, BookStatus::Synced);
    }

    #[tokio::test]
    async fn test_cancel_before_first_stage_terminates_canceled() {
        // Single-threaded test runtime: the job task does not run until the
        // test yields, so the cancel request lands before the first stage
        // boundary
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(&dir).await;
        let source = write_manuscript(&dir).await;

        let job_id = runner.submit_convert(convert_request(source)).await.unwrap();
        runner.cancel(job_id).await.unwrap();

        let job = runner.wait(job_id).await.unwrap();
        assert_eq!(job.stage, JobStage::Canceled);
        assert!(job.error.is_none());
        assert!(job.finished_at.is_some());
        // Never reached assembly, so no book record exists
        assert!(runner.book(job.book_id.unwrap()).await.is_none());
    }

    #[tokio::test]
    async fn test_terminal_job_releases_its_cancel_flag() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(&dir).await;
        let source = write_manuscript(&dir).await;

        let job_id = runner.submit_convert(convert_request(source)).await.unwrap();
        runner.wait(job_id).await.unwrap();

        assert!(runner.inner.cancels.lock().unwrap().is_empty());
        // Canceling afterwards stays a harmless no-op
        runner.cancel(job_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_patch_job_updates_archive_and_record() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(&dir).await;
        let source = write_manuscript(&dir).await;

        let convert = runner.submit_convert(convert_request(source)).await.unwrap();
        let book_id = runner.wait(convert).await.unwrap().book_id.unwrap();

        let patch_id = runner
            .submit_patch(PatchRequest {
                book_id,
                fields: MetadataPatch {
                    title: Some("改名".into()),
                    ..Default::default()
                },
                cover: None,
            })
            .await
            .unwrap();
        let job = runner.wait(patch_id).await.unwrap();
        assert_eq!(job.stage, JobStage::Succeeded);

        let book = runner.book(book_id).await.unwrap();
        assert_eq!(book.title, "改名");
        assert_eq!(book.status, BookStatus::Synced);

        let bytes = tokio::fs::read(&book.path).await.unwrap();
        let summary = patcher::read_summary(&bytes).unwrap();
        assert_eq!(summary.title.as_deref(), Some("改名"));
    }

    #[tokio::test]
    async fn test_patch_unknown_book_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(&dir).await;
        let err = runner
            .submit_patch(PatchRequest {
                book_id: Uuid::new_v4(),
                fields: MetadataPatch::default(),
                cover: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, FolioError::UnknownBook(_)));
    }

    #[tokio::test]
    async fn test_import_job_copies_archive_and_reads_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(&dir).await;

        // Build an EPUB with a conversion, then re-import the file as a new
        // book
        let source = write_manuscript(&dir).await;
        let convert = runner.submit_convert(convert_request(source)).await.unwrap();
        let original = runner.wait(convert).await.unwrap().book_id.unwrap();
        let epub_path = runner.book(original).await.unwrap().path;

        let import = runner
            .submit_import(ImportRequest {
                source: epub_path,
                overrides: MetadataOverrides::default(),
            })
            .await
            .unwrap();
        let job = runner.wait(import).await.unwrap();
        assert_eq!(job.stage, JobStage::Succeeded);

        let imported = runner.book(job.book_id.unwrap()).await.unwrap();
        assert_ne!(imported.id, original);
        assert_eq!(imported.status, BookStatus::Synced);
        assert_eq!(imported.title, "book");
    }

    #[tokio::test]
    async fn test_retry_failed_job_spawns_new_job() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(&dir).await;
        let source = dir.path().join("late.txt");

        let job_id = runner.submit_convert(convert_request(source.clone())).await.unwrap();
        let failed = runner.wait(job_id).await.unwrap();
        assert_eq!(failed.stage, JobStage::Failed);

        // Make the input valid, then retry
        tokio::fs::write(&source, MANUSCRIPT).await.unwrap();
        let retry_id = runner.retry(job_id).await.unwrap();
        assert_ne!(retry_id, job_id);
        let retried = runner.wait(retry_id).await.unwrap();
        assert_eq!(retried.stage, JobStage::Succeeded);
    }

    #[tokio::test]
    async fn test_retry_running_job_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(&dir).await;
        let source = write_manuscript(&dir).await;
        let job_id = runner.submit_convert(convert_request(source)).await.unwrap();
        let job = runner.wait(job_id).await.unwrap();
        assert_eq!(job.stage, JobStage::Succeeded);
        assert!(runner.retry(job_id).await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_terminal_job_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(&dir).await;
        let source = write_manuscript(&dir).await;
        let job_id = runner.submit_convert(convert_request(source)).await.unwrap();
        runner.wait(job_id).await.unwrap();

        runner.cancel(job_id).await.unwrap();
        assert_eq!(runner.job(job_id).await.unwrap().stage, JobStage::Succeeded);
        assert!(matches!(
            runner.cancel(Uuid::new_v4()).await.unwrap_err(),
            FolioError::UnknownJob(_)
        ));
    }

    #[tokio::test]
    async fn test_library_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("library");
        let book_id;
        {
            let runner = JobRunner::open(root.clone()).await.unwrap();
            let source = write_manuscript(&dir).await;
            let job_id = runner.submit_convert(convert_request(source)).await.unwrap();
            book_id = runner.wait(job_id).await.unwrap().book_id.unwrap();
        }

        let reopened = JobRunner::open(root).await.unwrap();
        let book = reopened.book(book_id).await.unwrap();
        assert_eq!(book.status, BookStatus::Synced);
    }
}
