//! Job Supervisor — owns the single-active-job subprocess
//! lifecycle: upload intake, command construction, the three concurrent
//! consumers that multiplex subprocess stdout/stderr and a polled log
//! file onto one `Job`, cooperative cancellation, and restart
//! reconciliation.
//!
//! Cancellation never touches the child process from a second task: the
//! task that owns `Child` races `child.wait()` against a `watch` signal
//! inside a single `tokio::select!`, so `Child` is never shared.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::Stream;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;

use pageindex_domain::config::Config;
use pageindex_domain::error::{Error, Result};
use pageindex_domain::job::{ActivityItem, ActivitySource, InputType, Job, JobOptions, JobStatus, Stage};

use crate::broker::Broker;
use crate::ids;
use crate::stage;
use crate::store::Store;

/// ≤1 MiB per write, regardless of how the upload stream chunks arrive.
const UPLOAD_CHUNK_CAP: usize = 1 << 20;

#[derive(Debug, Clone)]
pub enum JobEvent {
    Update(Job),
    Activity { job_id: String, item: ActivityItem },
    Completed { job_id: String, result_file: String },
    Error { job_id: String, error: String },
}

impl JobEvent {
    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::Update(_) => "job.update",
            JobEvent::Activity { .. } => "job.activity",
            JobEvent::Completed { .. } => "job.completed",
            JobEvent::Error { .. } => "job.error",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            JobEvent::Update(job) => serde_json::to_value(job).unwrap_or(Value::Null),
            JobEvent::Activity { job_id, item } => {
                serde_json::json!({ "job_id": job_id, "item": item })
            }
            JobEvent::Completed { job_id, result_file } => {
                serde_json::json!({ "job_id": job_id, "result_file": result_file })
            }
            JobEvent::Error { job_id, error } => {
                serde_json::json!({ "job_id": job_id, "error": error })
            }
        }
    }
}

/// Per-job cancellation plumbing, kept alive from creation through
/// finalisation so `cancel()` always finds a handle to signal, never a
/// race against "the process hasn't registered yet".
#[derive(Clone)]
struct ProcessHandle {
    cancel_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

struct Inner {
    jobs: HashMap<String, Job>,
    active_job_id: Option<String>,
    processes: HashMap<String, ProcessHandle>,
}

pub struct JobSupervisor {
    store: Arc<Store>,
    config: Arc<Config>,
    broker: Broker<String, JobEvent>,
    inner: Mutex<Inner>,
}

impl JobSupervisor {
    /// Load persisted jobs and reconcile restart state: any job left
    /// `RUNNING` or `QUEUED` by a previous process (it crashed before or
    /// during a run, since both statuses imply a live subprocess or one
    /// about to be spawned) is forced to `FAILED`. No job is left
    /// non-terminal, so `active_job_id` always starts `None`.
    pub fn new(store: Arc<Store>, config: Arc<Config>) -> Result<Arc<Self>> {
        let mut jobs = store.jobs.load_all::<Job>()?;
        for job in jobs.values_mut() {
            if !job.status.is_terminal() {
                job.status = JobStatus::Failed;
                job.error = Some("Backend restarted while job was running".to_string());
                job.pid = None;
                job.updated_at = Utc::now();
                store.jobs.save(&job.id, job)?;
                pageindex_domain::trace::TraceEvent::RestartReconciled { kind: "job", id: job.id.clone() }.emit();
            }
        }
        let job_queue_capacity = config.broker.job_queue_capacity;
        Ok(Arc::new(Self {
            store,
            config,
            broker: Broker::new(job_queue_capacity),
            inner: Mutex::new(Inner { jobs, active_job_id: None, processes: HashMap::new() }),
        }))
    }

    pub fn get(&self, job_id: &str) -> Result<Job> {
        self.inner
            .lock()
            .jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("job {job_id}")))
    }

    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.inner.lock().jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// Create a job from an already-sanitised filename and a stream of
    /// upload bytes; spawns the background run task and returns the
    /// `QUEUED` snapshot.
    pub async fn create(
        self: &Arc<Self>,
        filename: &str,
        input_type: InputType,
        options: JobOptions,
        body: impl Stream<Item = std::io::Result<bytes::Bytes>> + Unpin,
    ) -> Result<Job> {
        let lower = filename.to_lowercase();
        if !lower.ends_with(input_type.expected_suffix()) {
            return Err(Error::validation(format!(
                "filename {filename} does not match expected suffix {}",
                input_type.expected_suffix()
            )));
        }
        {
            let inner = self.inner.lock();
            if inner.active_job_id.is_some() {
                return Err(Error::conflict("another job is already active"));
            }
        }

        let safe_name = sanitize_filename(filename);
        let id = ids::job_id();
        let upload_path = self.store.upload_path(&id, &safe_name);
        stream_to_file(body, &upload_path).await?;

        let job = Job::new(id.clone(), filename.to_string(), input_type, upload_path.to_string_lossy().to_string(), options);
        self.store.jobs.save(&id, &job)?;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);
        {
            let mut inner = self.inner.lock();
            inner.jobs.insert(id.clone(), job.clone());
            inner.active_job_id = Some(id.clone());
            inner.processes.insert(id.clone(), ProcessHandle { cancel_tx, done_rx });
        }
        self.broker.publish(&id, JobEvent::Update(job.clone()));
        pageindex_domain::trace::TraceEvent::JobCreated {
            job_id: id.clone(),
            input_type: format!("{input_type:?}"),
            filename: filename.to_string(),
        }
        .emit();

        let sup = self.clone();
        let run_id = id.clone();
        tokio::spawn(async move {
            sup.run(run_id, cancel_rx, done_tx).await;
        });

        Ok(job)
    }

    /// Request cancellation and wait for the run task to finalise. A
    /// no-op (returns the current snapshot) if the job is already
    /// terminal.
    pub async fn cancel(&self, job_id: &str) -> Result<Job> {
        let snapshot = self.get(job_id)?;
        if snapshot.status.is_terminal() {
            return Ok(snapshot);
        }
        let handle = self.inner.lock().processes.get(job_id).cloned();
        if let Some(handle) = handle {
            let _ = handle.cancel_tx.send(true);
            let mut done_rx = handle.done_rx.clone();
            if !*done_rx.borrow() {
                let _ = done_rx.changed().await;
            }
        }
        self.get(job_id)
    }

    pub fn subscribe(&self, job_id: &str) -> Result<(crate::broker::SubscriberHandle, crate::broker::Subscription<JobEvent>)> {
        let snapshot = self.get(job_id)?;
        Ok(self.broker.subscribe_seeded(job_id.to_string(), Some(JobEvent::Update(snapshot))))
    }

    pub fn unsubscribe(&self, job_id: &str, handle: &crate::broker::SubscriberHandle) {
        self.broker.unsubscribe(&job_id.to_string(), handle);
    }

    // ── Mutation helpers ─────────────────────────────────────────────

    fn mutate_silent(&self, job_id: &str, f: impl FnOnce(&mut Job)) -> Result<Job> {
        let mut inner = self.inner.lock();
        let job = inner.jobs.get_mut(job_id).ok_or_else(|| Error::not_found(format!("job {job_id}")))?;
        f(job);
        self.store.jobs.save(job_id, job)?;
        Ok(job.clone())
    }

    fn publish_update(&self, job_id: &str, job: &Job) {
        self.broker.publish(&job_id.to_string(), JobEvent::Update(job.clone()));
    }

    fn record_line(&self, job_id: &str, source: ActivitySource, line: &str) -> Result<()> {
        let repo_root = self.config.storage.repo_root.clone();
        let mut activity_item = None;
        let job = self.mutate_silent(job_id, |job| {
            let tail_line = if source == ActivitySource::Stderr { format!("[stderr] {line}") } else { line.to_string() };
            job.push_stdout_line(tail_line);
            job.push_activity(source, line.to_string());
            activity_item = job.activity.back().cloned();
            if let Some(raw_path) = parse_result_file(line) {
                job.result_file = Some(resolve_path(&repo_root, &raw_path));
            }
            if let Some(candidate) = stage::stage_from_text(line) {
                job.advance_stage(candidate, line);
            }
        })?;
        if let Some(item) = activity_item {
            self.broker.publish(&job_id.to_string(), JobEvent::Activity { job_id: job_id.to_string(), item });
        }
        self.publish_update(job_id, &job);
        Ok(())
    }

    fn record_log_entry(&self, job_id: &str, entry: &Value) -> Result<()> {
        let mut activity_item = None;
        let job = self.mutate_silent(job_id, |job| {
            job.push_activity(ActivitySource::Log, log_entry_message(entry));
            activity_item = job.activity.back().cloned();
            if let Some(candidate) = stage::stage_from_log_entry(entry) {
                job.advance_stage(candidate, "log entry");
            }
        })?;
        if let Some(item) = activity_item {
            self.broker.publish(&job_id.to_string(), JobEvent::Activity { job_id: job_id.to_string(), item });
        }
        self.publish_update(job_id, &job);
        Ok(())
    }

    // ── Run protocol ─────────────────────────────────────────────────

    async fn run(self: Arc<Self>, job_id: String, cancel_rx: watch::Receiver<bool>, done_tx: watch::Sender<bool>) {
        self.run_inner(&job_id, cancel_rx).await;
        self.clear_active(&job_id);
        let _ = done_tx.send(true);
    }

    fn clear_active(&self, job_id: &str) {
        let mut inner = self.inner.lock();
        if inner.active_job_id.as_deref() == Some(job_id) {
            inner.active_job_id = None;
        }
        inner.processes.remove(job_id);
    }

    async fn run_inner(self: &Arc<Self>, job_id: &str, mut cancel_rx: watch::Receiver<bool>) {
        if *cancel_rx.borrow() {
            self.finalize(job_id, None, true);
            return;
        }

        let repo_root = self.config.storage.repo_root.clone();
        let logs_dir = repo_root.join("logs");
        let pre_existing_logs = snapshot_json_files(&logs_dir);

        let Ok(job) = self.get(job_id) else { return };
        let argv = build_command(&self.config.indexer, &job);
        let Some((program, args)) = argv.split_first() else {
            let _ = self.mutate_silent(job_id, |job| {
                job.error = Some("indexer command is empty".to_string());
            });
            self.finalize(job_id, None, false);
            return;
        };

        let mut command = Command::new(program);
        command.args(args).current_dir(&repo_root).stdout(std::process::Stdio::piped()).stderr(std::process::Stdio::piped());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let _ = self.mutate_silent(job_id, |job| {
                    job.error = Some(format!("failed to spawn indexer: {e}"));
                });
                self.finalize(job_id, None, false);
                return;
            }
        };

        let pid = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let _ = self.mutate_silent(job_id, |job| {
            job.status = JobStatus::Running;
            job.pid = pid;
            job.updated_at = Utc::now();
        });
        if let Ok(snapshot) = self.get(job_id) {
            self.publish_update(job_id, &snapshot);
        }

        let stdout_task = stdout.map(|s| {
            let sup = self.clone();
            let id = job_id.to_string();
            tokio::spawn(consume_stream(sup, id, ActivitySource::Stdout, s))
        });
        let stderr_task = stderr.map(|s| {
            let sup = self.clone();
            let id = job_id.to_string();
            tokio::spawn(consume_stream(sup, id, ActivitySource::Stderr, s))
        });

        let (exited_tx, exited_rx) = watch::channel(false);
        let log_task = {
            let sup = self.clone();
            let id = job_id.to_string();
            let cfg = self.config.indexer.clone();
            let exited_rx = exited_rx.clone();
            tokio::spawn(async move { watch_log_file(sup, id, logs_dir, pre_existing_logs, cfg, exited_rx).await })
        };

        let grace = Duration::from_millis(self.config.indexer.cancel_grace_ms);
        let exit_status = loop {
            tokio::select! {
                status = child.wait() => break status,
                changed = cancel_rx.changed() => {
                    if changed.is_err() || !*cancel_rx.borrow() {
                        continue;
                    }
                    if let Some(pid) = pid {
                        let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
                    }
                    match tokio::time::timeout(grace, child.wait()).await {
                        Ok(status) => break status,
                        Err(_) => {
                            let _ = child.start_kill();
                            break child.wait().await;
                        }
                    }
                }
            }
        };

        let _ = exited_tx.send(true);
        if let Some(task) = stdout_task {
            let _ = task.await;
        }
        if let Some(task) = stderr_task {
            let _ = task.await;
        }
        let _ = log_task.await;

        let cancelled = *cancel_rx.borrow();
        let code = exit_status.ok().and_then(|s| s.code());
        self.finalize(job_id, code, cancelled);
    }

    fn finalize(&self, job_id: &str, exit_code: Option<i32>, cancelled: bool) {
        if cancelled {
            let _ = self.mutate_silent(job_id, |job| {
                job.status = JobStatus::Cancelled;
                job.pid = None;
                job.updated_at = Utc::now();
                job.push_activity(ActivitySource::System, "Job cancelled".to_string());
            });
            if let Ok(snapshot) = self.get(job_id) {
                self.publish_update(job_id, &snapshot);
            }
            pageindex_domain::trace::TraceEvent::JobCancelled { job_id: job_id.to_string() }.emit();
            return;
        }

        let repo_root = self.config.storage.repo_root.clone();
        let Ok(job) = self.get(job_id) else { return };
        let result_file = job.result_file.clone().or_else(|| default_result_file(&repo_root, &job));
        let result_exists = result_file.as_deref().map(|p| Path::new(p).exists()).unwrap_or(false);

        if exit_code == Some(0) && result_exists {
            let result_file = result_file.unwrap();
            let job = match self.mutate_silent(job_id, |job| {
                job.advance_stage(Stage::Finalizing, "process exited 0");
                job.result_file = Some(result_file.clone());
                job.status = JobStatus::Completed;
                job.stage = Stage::Completed;
                job.progress = Stage::Completed.progress_anchor();
                job.pid = None;
                job.updated_at = Utc::now();
            }) {
                Ok(job) => job,
                Err(_) => return,
            };
            self.broker.publish(&job_id.to_string(), JobEvent::Completed { job_id: job_id.to_string(), result_file });
            self.publish_update(job_id, &job);
            pageindex_domain::trace::TraceEvent::JobFinished { job_id: job_id.to_string(), status: "COMPLETED".to_string() }.emit();
        } else {
            let error = determine_error(&job, exit_code);
            let job = match self.mutate_silent(job_id, |job| {
                job.status = JobStatus::Failed;
                job.error = Some(error.clone());
                job.pid = None;
                job.updated_at = Utc::now();
            }) {
                Ok(job) => job,
                Err(_) => return,
            };
            self.broker.publish(&job_id.to_string(), JobEvent::Error { job_id: job_id.to_string(), error });
            self.publish_update(job_id, &job);
            pageindex_domain::trace::TraceEvent::JobFinished { job_id: job_id.to_string(), status: "FAILED".to_string() }.emit();
        }
    }
}

async fn consume_stream(sup: Arc<JobSupervisor>, job_id: String, source: ActivitySource, stream: impl AsyncRead + Unpin) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.is_empty() {
            continue;
        }
        let _ = sup.record_line(&job_id, source, &line);
    }
}

async fn watch_log_file(
    sup: Arc<JobSupervisor>,
    job_id: String,
    logs_dir: PathBuf,
    pre_existing: HashSet<String>,
    cfg: pageindex_domain::config::IndexerConfig,
    mut exited_rx: watch::Receiver<bool>,
) {
    let Some(path) = detect_log_file(&logs_dir, &pre_existing, &cfg, &mut exited_rx).await else { return };
    consume_log_file(sup, job_id, path, cfg, exited_rx).await;
}

async fn detect_log_file(
    logs_dir: &Path,
    pre_existing: &HashSet<String>,
    cfg: &pageindex_domain::config::IndexerConfig,
    exited_rx: &mut watch::Receiver<bool>,
) -> Option<PathBuf> {
    let deadline = Instant::now() + Duration::from_millis(cfg.log_detect_timeout_ms);
    loop {
        if let Some(path) = find_new_json_file(logs_dir, pre_existing) {
            return Some(path);
        }
        if *exited_rx.borrow() {
            for _ in 0..cfg.log_detect_post_exit_polls {
                tokio::time::sleep(Duration::from_millis(cfg.log_detect_post_exit_interval_ms)).await;
                if let Some(path) = find_new_json_file(logs_dir, pre_existing) {
                    return Some(path);
                }
            }
            return None;
        }
        if Instant::now() >= deadline {
            return None;
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(cfg.log_poll_interval_ms)) => {},
            _ = exited_rx.changed() => {},
        }
    }
}

async fn consume_log_file(
    sup: Arc<JobSupervisor>,
    job_id: String,
    path: PathBuf,
    cfg: pageindex_domain::config::IndexerConfig,
    mut exited_rx: watch::Receiver<bool>,
) {
    let mut cursor = 0usize;
    let mut post_exit_remaining = cfg.log_consumer_post_exit_polls;
    loop {
        if let Ok(raw) = tokio::fs::read_to_string(&path).await {
            if let Ok(Value::Array(entries)) = serde_json::from_str::<Value>(&raw) {
                for entry in entries.iter().skip(cursor) {
                    let _ = sup.record_log_entry(&job_id, entry);
                }
                cursor = entries.len();
            }
        }
        if *exited_rx.borrow() {
            if post_exit_remaining == 0 {
                break;
            }
            post_exit_remaining -= 1;
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(cfg.log_poll_interval_ms)) => {},
            _ = exited_rx.changed() => {},
        }
    }
}

fn snapshot_json_files(dir: &Path) -> HashSet<String> {
    let mut set = HashSet::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    set.insert(name.to_string());
                }
            }
        }
    }
    set
}

fn find_new_json_file(dir: &Path, pre_existing: &HashSet<String>) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut candidates: Vec<PathBuf> = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
        if !pre_existing.contains(name) {
            candidates.push(path);
        }
    }
    candidates.sort();
    candidates.into_iter().next()
}

fn log_entry_message(entry: &Value) -> String {
    if let Some(msg) = entry.get("message").or_else(|| entry.get("msg")).and_then(|v| v.as_str()) {
        return msg.to_string();
    }
    serde_json::to_string(entry).unwrap_or_default()
}

/// Parse the `tree structure saved to: <path>` phrase. The path is taken
/// from the first `:` found *after* the phrase, so a path containing a
/// `:` earlier in the line (e.g. a Windows drive letter) is not handled —
/// a known, accepted limitation of this parser.
fn parse_result_file(line: &str) -> Option<String> {
    let marker = "tree structure saved to";
    let lower = line.to_lowercase();
    let idx = lower.find(marker)?;
    let after = &line[idx + marker.len()..];
    let colon = after.find(':')?;
    let path = after[colon + 1..].trim();
    if path.is_empty() {
        None
    } else {
        Some(path.to_string())
    }
}

fn resolve_path(repo_root: &Path, raw: &str) -> String {
    let candidate = Path::new(raw);
    if candidate.is_absolute() {
        raw.to_string()
    } else {
        repo_root.join(candidate).to_string_lossy().to_string()
    }
}

fn default_result_file(repo_root: &Path, job: &Job) -> Option<String> {
    let stem = Path::new(&job.input_path).file_stem()?.to_str()?.to_string();
    Some(repo_root.join("results").join(format!("{stem}_structure.json")).to_string_lossy().to_string())
}

fn determine_error(job: &Job, exit_code: Option<i32>) -> String {
    if let Some(err) = &job.error {
        return err.clone();
    }
    if let Some(line) = job.stdout_tail.iter().rev().find(|l| l.starts_with("[stderr]")) {
        return line.trim_start_matches("[stderr]").trim().to_string();
    }
    if let Some(code) = exit_code {
        if code != 0 {
            return format!("Process exited with code {code}");
        }
    }
    "Process completed but no result file was found".to_string()
}

/// Keep `[A-Za-z0-9._-]`, map spaces and slashes to `_`, trim leading
/// `.`/`_`, fall back to `"document"` if nothing survives.
fn sanitize_filename(name: &str) -> String {
    let mapped: String = name.chars().map(|c| if c == ' ' || c == '/' { '_' } else { c }).collect();
    let kept: String = mapped.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '.' || *c == '_' || *c == '-').collect();
    let trimmed = kept.trim_start_matches(|c: char| c == '.' || c == '_');
    if trimmed.is_empty() {
        "document".to_string()
    } else {
        trimmed.to_string()
    }
}

fn build_command(cfg: &pageindex_domain::config::IndexerConfig, job: &Job) -> Vec<String> {
    let mut argv = cfg.command.clone();
    match job.input_type {
        InputType::Pdf => {
            argv.push("--pdf_path".to_string());
            argv.push(job.input_path.clone());
        }
        InputType::Md => {
            argv.push("--md_path".to_string());
            argv.push(job.input_path.clone());
        }
    }
    let o = &job.options;
    if let Some(v) = &o.model {
        argv.push("--model".to_string());
        argv.push(v.clone());
    }
    if let Some(v) = o.toc_check_pages {
        argv.push("--toc-check-pages".to_string());
        argv.push(v.to_string());
    }
    if let Some(v) = o.max_pages_per_node {
        argv.push("--max-pages-per-node".to_string());
        argv.push(v.to_string());
    }
    if let Some(v) = o.max_tokens_per_node {
        argv.push("--max-tokens-per-node".to_string());
        argv.push(v.to_string());
    }
    if o.if_add_node_id == Some(true) {
        argv.push("--if-add-node-id".to_string());
    }
    if o.if_add_node_summary == Some(true) {
        argv.push("--if-add-node-summary".to_string());
    }
    if o.if_add_doc_description == Some(true) {
        argv.push("--if-add-doc-description".to_string());
    }
    if o.if_add_node_text == Some(true) {
        argv.push("--if-add-node-text".to_string());
    }
    if o.if_thinning == Some(true) {
        argv.push("--if-thinning".to_string());
    }
    if let Some(v) = o.thinning_threshold {
        argv.push("--thinning-threshold".to_string());
        argv.push(v.to_string());
    }
    if let Some(v) = o.summary_token_threshold {
        argv.push("--summary-token-threshold".to_string());
        argv.push(v.to_string());
    }
    argv
}

async fn stream_to_file(mut body: impl Stream<Item = std::io::Result<bytes::Bytes>> + Unpin, path: &Path) -> Result<()> {
    use futures_util::StreamExt;
    let mut file = tokio::fs::File::create(path).await?;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        for piece in chunk.chunks(UPLOAD_CHUNK_CAP) {
            file.write_all(piece).await?;
        }
    }
    file.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_filename_maps_spaces_and_slashes() {
        assert_eq!(sanitize_filename("my report.pdf"), "my_report.pdf");
        assert_eq!(sanitize_filename("a/b/c.pdf"), "a_b_c.pdf");
    }

    #[test]
    fn sanitize_filename_drops_disallowed_chars() {
        assert_eq!(sanitize_filename("weird!@#name.pdf"), "weirdname.pdf");
    }

    #[test]
    fn sanitize_filename_trims_leading_dots_and_underscores() {
        assert_eq!(sanitize_filename("..__hidden.pdf"), "hidden.pdf");
    }

    #[test]
    fn sanitize_filename_falls_back_to_document() {
        assert_eq!(sanitize_filename("...___"), "document");
    }

    #[test]
    fn parse_result_file_takes_first_colon_after_marker() {
        let line = "Tree structure saved to: results/doc_structure.json";
        assert_eq!(parse_result_file(line), Some("results/doc_structure.json".to_string()));
    }

    #[test]
    fn parse_result_file_is_case_insensitive_on_marker() {
        let line = "TREE STRUCTURE SAVED TO: out.json";
        assert_eq!(parse_result_file(line), Some("out.json".to_string()));
    }

    #[test]
    fn parse_result_file_returns_none_without_marker() {
        assert_eq!(parse_result_file("just some output"), None);
    }

    #[test]
    fn determine_error_prefers_preset_error() {
        let mut job = Job::new("j1".into(), "a.pdf".into(), InputType::Pdf, "a.pdf".into(), JobOptions::default());
        job.error = Some("boom".to_string());
        assert_eq!(determine_error(&job, Some(1)), "boom");
    }

    #[test]
    fn determine_error_falls_back_to_last_stderr_line() {
        let mut job = Job::new("j1".into(), "a.pdf".into(), InputType::Pdf, "a.pdf".into(), JobOptions::default());
        job.push_stdout_line("normal line".to_string());
        job.push_stdout_line("[stderr] Traceback: boom".to_string());
        assert_eq!(determine_error(&job, Some(1)), "Traceback: boom");
    }

    #[test]
    fn determine_error_falls_back_to_exit_code() {
        let job = Job::new("j1".into(), "a.pdf".into(), InputType::Pdf, "a.pdf".into(), JobOptions::default());
        assert_eq!(determine_error(&job, Some(2)), "Process exited with code 2");
    }

    #[test]
    fn build_command_appends_flags_for_set_options() {
        let cfg = pageindex_domain::config::IndexerConfig::default();
        let mut job = Job::new("j1".into(), "a.pdf".into(), InputType::Pdf, "/tmp/a.pdf".into(), JobOptions::default());
        job.options.model = Some("gpt-4.1-mini".to_string());
        job.options.if_thinning = Some(true);
        let argv = build_command(&cfg, &job);
        assert!(argv.contains(&"--pdf_path".to_string()));
        assert!(argv.contains(&"/tmp/a.pdf".to_string()));
        assert!(argv.contains(&"--model".to_string()));
        assert!(argv.contains(&"gpt-4.1-mini".to_string()));
        assert!(argv.contains(&"--if-thinning".to_string()));
    }

    #[tokio::test]
    async fn restart_reconciliation_fails_non_terminal_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::new(dir.path()).unwrap());
        let mut job = Job::new("j1".into(), "a.pdf".into(), InputType::Pdf, "/tmp/a.pdf".into(), JobOptions::default());
        job.status = JobStatus::Running;
        store.jobs.save("j1", &job).unwrap();

        let config = Arc::new(Config::default());
        let sup = JobSupervisor::new(store, config).unwrap();
        let reconciled = sup.get("j1").unwrap();
        assert_eq!(reconciled.status, JobStatus::Failed);
        assert!(reconciled.error.is_some());
    }
}
