//! Job data model — the unit of indexing work tracked by the job
//! supervisor. See `gateway::supervisor::job` for the supervisor that
//! owns and mutates these types, and `gateway::stage` for the pure
//! classifier that maps process output onto `Stage`.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Monotonic progress phase of a job. Ordered top-to-bottom; `QUEUED` and
/// `COMPLETED` are set directly by the supervisor and never inferred from
/// process output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Queued,
    ParsingInput,
    TocAnalysis,
    IndexBuild,
    Refinement,
    Summarization,
    Finalizing,
    Completed,
}

impl Stage {
    /// Fixed progress anchor for each stage, per the data model.
    pub fn progress_anchor(self) -> f64 {
        match self {
            Stage::Queued => 0.05,
            Stage::ParsingInput => 0.20,
            Stage::TocAnalysis => 0.35,
            Stage::IndexBuild => 0.60,
            Stage::Refinement => 0.75,
            Stage::Summarization => 0.88,
            Stage::Finalizing => 0.95,
            Stage::Completed => 1.00,
        }
    }

    /// Numeric rank for monotonicity comparisons (`stage_rank(new) >=
    /// stage_rank(old)`). Equivalent to the enum's declaration order since
    /// `Stage` derives `Ord`, exposed explicitly because callers reach for
    /// "rank" by name.
    pub fn rank(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Pdf,
    Md,
}

impl InputType {
    pub fn expected_suffix(self) -> &'static str {
        match self {
            InputType::Pdf => ".pdf",
            InputType::Md => ".md",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivitySource {
    Stdout,
    Stderr,
    Log,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityItem {
    pub timestamp: DateTime<Utc>,
    pub source: ActivitySource,
    pub message: String,
}

pub const STDOUT_TAIL_CAP: usize = 300;
pub const ACTIVITY_CAP: usize = 400;

/// Recognised option keys mirroring the external command's CLI flags
/// one-for-one. Unknown keys passed in by a caller are ignored rather
/// than rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toc_check_pages: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages_per_node: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens_per_node: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_add_node_id: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_add_node_summary: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_add_doc_description: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_add_node_text: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_thinning: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinning_threshold: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_token_threshold: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub filename: String,
    pub input_type: InputType,
    pub status: JobStatus,
    pub stage: Stage,
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub options: JobOptions,
    pub input_path: String,
    #[serde(default)]
    pub log_file: Option<String>,
    #[serde(default)]
    pub result_file: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub stdout_tail: VecDeque<String>,
    #[serde(default)]
    pub activity: VecDeque<ActivityItem>,
    #[serde(default)]
    pub pid: Option<u32>,
}

impl Job {
    pub fn new(id: String, filename: String, input_type: InputType, input_path: String, options: JobOptions) -> Self {
        let now = Utc::now();
        Self {
            id,
            filename,
            input_type,
            status: JobStatus::Queued,
            stage: Stage::Queued,
            progress: Stage::Queued.progress_anchor(),
            created_at: now,
            updated_at: now,
            options,
            input_path,
            log_file: None,
            result_file: None,
            error: None,
            stdout_tail: VecDeque::new(),
            activity: VecDeque::new(),
            pid: None,
        }
    }

    pub fn push_stdout_line(&mut self, line: String) {
        self.stdout_tail.push_back(line);
        while self.stdout_tail.len() > STDOUT_TAIL_CAP {
            self.stdout_tail.pop_front();
        }
    }

    pub fn push_activity(&mut self, source: ActivitySource, message: String) {
        self.activity.push_back(ActivityItem {
            timestamp: Utc::now(),
            source,
            message,
        });
        while self.activity.len() > ACTIVITY_CAP {
            self.activity.pop_front();
        }
    }

    /// Advance to `candidate` only if it ranks strictly above the current
    /// stage. Returns `true` if a transition happened.
    pub fn advance_stage(&mut self, candidate: Stage, reason: &str) -> bool {
        if candidate.rank() <= self.stage.rank() {
            return false;
        }
        self.stage = candidate;
        self.progress = candidate.progress_anchor();
        self.updated_at = Utc::now();
        self.push_activity(
            ActivitySource::System,
            format!("Stage -> {:?}: {reason}", candidate),
        );
        true
    }
}

pub type JobMap = HashMap<String, Job>;
