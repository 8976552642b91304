//! Hierarchical, cancellable progress reporting.
//!
//! Every long-running operation receives a [`Job`]. A job may hand a weighted
//! share of its progress range to a sub-job: a sub-job created with weight `w`
//! while the parent stands at `p` maps its own `[0, 1]` progress onto the
//! parent's `[p, p + w]`. Hints are chained (`parent / child`), cancellation
//! flows from parents to children, and an error message makes a job terminal.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use log::debug;
use tokio::sync::watch;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub(crate) u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Snapshot of a job as seen by observers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JobState {
    pub progress: f64,
    pub hint: String,
    pub error: Option<String>,
    pub cancelled: bool,
    pub completed: bool,
}

struct ParentLink {
    job: Arc<JobInner>,
    start: f64,
    weight: f64,
    hint_prefix: String,
}

struct JobInner {
    id: JobId,
    cancelled: AtomicBool,
    state: Mutex<JobState>,
    parent: Option<ParentLink>,
    children: Mutex<Vec<Weak<JobInner>>>,
    updates: watch::Sender<JobState>,
}

/// Handle to a job. Cloning yields another handle to the same job.
#[derive(Clone)]
pub struct Job {
    inner: Arc<JobInner>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for Job {
    fn default() -> Self {
        Self::new()
    }
}

impl Job {
    /// Create a top-level job.
    pub fn new() -> Self {
        Self::with_parent(None)
    }

    fn with_parent(parent: Option<ParentLink>) -> Self {
        let (updates, _) = watch::channel(JobState::default());
        Self {
            inner: Arc::new(JobInner {
                id: JobId(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed)),
                cancelled: AtomicBool::new(false),
                state: Mutex::new(JobState::default()),
                parent,
                children: Mutex::new(Vec::new()),
                updates,
            }),
        }
    }

    pub fn id(&self) -> JobId {
        self.inner.id
    }

    /// Create a sub-job owning `weight` of this job's progress range,
    /// starting at the current progress.
    pub fn new_sub_job(&self, weight: f64) -> Job {
        let (start, hint_prefix) = {
            let state = lock(&self.inner.state);
            (state.progress, state.hint.clone())
        };
        let weight = weight.clamp(0.0, 1.0 - start);
        let child = Self::with_parent(Some(ParentLink {
            job: Arc::clone(&self.inner),
            start,
            weight,
            hint_prefix,
        }));

        let mut children = lock(&self.inner.children);
        children.retain(|c| c.strong_count() > 0);
        children.push(Arc::downgrade(&child.inner));
        child
    }

    /// Set progress in `[0, 1]`. Ignored once an error was reported.
    pub fn set_progress(&self, progress: f64) {
        let progress = progress.clamp(0.0, 1.0);
        {
            let mut state = lock(&self.inner.state);
            if state.error.is_some() {
                return;
            }
            state.progress = progress;
            self.publish(&state);
        }

        if let Some(link) = &self.inner.parent {
            let parent = Job {
                inner: Arc::clone(&link.job),
            };
            parent.set_progress(link.start + progress * link.weight);
        }
    }

    pub fn progress(&self) -> f64 {
        lock(&self.inner.state).progress
    }

    /// Describe the current step. A sub-job's hint is appended to the
    /// parent's hint as it stood when the sub-job was created.
    pub fn set_hint(&self, hint: &str) {
        {
            let mut state = lock(&self.inner.state);
            state.hint = hint.to_string();
            self.publish(&state);
        }

        if let Some(link) = &self.inner.parent {
            let parent = Job {
                inner: Arc::clone(&link.job),
            };
            if link.hint_prefix.is_empty() {
                parent.set_hint(hint);
            } else {
                parent.set_hint(&format!("{} / {}", link.hint_prefix, hint));
            }
        }
    }

    pub fn hint(&self) -> String {
        lock(&self.inner.state).hint.clone()
    }

    /// Request cancellation of this job and all of its sub-jobs.
    pub fn cancel(&self) {
        debug!("Cancelling job {}", self.inner.id);
        self.inner.cancelled.store(true, Ordering::SeqCst);
        {
            let mut state = lock(&self.inner.state);
            state.cancelled = true;
            self.publish(&state);
        }

        let children: Vec<Arc<JobInner>> = lock(&self.inner.children)
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for child in children {
            Job { inner: child }.cancel();
        }
    }

    /// Whether this job or any of its ancestors was cancelled.
    pub fn is_cancelled(&self) -> bool {
        if self.inner.cancelled.load(Ordering::SeqCst) {
            return true;
        }
        match &self.inner.parent {
            Some(link) => Job {
                inner: Arc::clone(&link.job),
            }
            .is_cancelled(),
            None => false,
        }
    }

    /// Record an error. The first error wins; the job becomes terminal.
    pub fn set_error_message(&self, message: &str) {
        let mut state = lock(&self.inner.state);
        if state.error.is_none() {
            debug!("Job {} failed: {}", self.inner.id, message);
            state.error = Some(message.to_string());
            self.publish(&state);
        }
    }

    pub fn error_message(&self) -> Option<String> {
        lock(&self.inner.state).error.clone()
    }

    pub fn has_error(&self) -> bool {
        lock(&self.inner.state).error.is_some()
    }

    /// Finish the job. Progress jumps to 1 unless an error was reported.
    pub fn complete(&self) {
        if !self.has_error() {
            self.set_progress(1.0);
        }
        let mut state = lock(&self.inner.state);
        state.completed = true;
        self.publish(&state);
    }

    pub fn is_completed(&self) -> bool {
        lock(&self.inner.state).completed
    }

    pub fn state(&self) -> JobState {
        lock(&self.inner.state).clone()
    }

    /// Observe state changes of this job.
    pub fn subscribe(&self) -> watch::Receiver<JobState> {
        self.inner.updates.subscribe()
    }

    fn publish(&self, state: &JobState) {
        self.inner.updates.send_replace(state.clone());
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    #[test]
    fn test_weighted_sub_jobs() {
        let job = Job::new();

        let first = job.new_sub_job(0.3);
        first.set_progress(1.0);
        assert_close(job.progress(), 0.3);

        let second = job.new_sub_job(0.7);
        second.set_progress(0.5);
        assert_close(job.progress(), 0.65);
    }

    #[test]
    fn test_nested_sub_jobs_scale() {
        let job = Job::new();
        let sub = job.new_sub_job(0.5);
        let subsub = sub.new_sub_job(0.5);
        subsub.set_progress(1.0);
        assert_close(sub.progress(), 0.5);
        assert_close(job.progress(), 0.25);
    }

    #[test]
    fn test_complete_sets_full_progress() {
        let job = Job::new();
        job.set_progress(0.2);
        job.complete();
        assert_close(job.progress(), 1.0);
        assert!(job.is_completed());
    }

    #[test]
    fn test_error_is_terminal() {
        let job = Job::new();
        job.set_progress(0.4);
        job.set_error_message("boom");
        job.set_progress(0.9);
        job.complete();

        assert_close(job.progress(), 0.4);
        assert_eq!(job.error_message().as_deref(), Some("boom"));

        job.set_error_message("second");
        assert_eq!(job.error_message().as_deref(), Some("boom"));
    }

    #[test]
    fn test_cancel_propagates_to_children() {
        let job = Job::new();
        let sub = job.new_sub_job(0.5);
        let subsub = sub.new_sub_job(0.5);

        job.cancel();
        assert!(sub.is_cancelled());
        assert!(subsub.is_cancelled());
        assert!(subsub.state().cancelled);
    }

    #[test]
    fn test_cancel_child_does_not_cancel_parent() {
        let job = Job::new();
        let sub = job.new_sub_job(0.5);
        sub.cancel();
        assert!(!job.is_cancelled());
    }

    #[test]
    fn test_sub_job_created_after_cancel_is_cancelled() {
        let job = Job::new();
        job.cancel();
        assert!(job.new_sub_job(0.1).is_cancelled());
    }

    #[test]
    fn test_hint_chaining() {
        let job = Job::new();
        job.set_hint("Installing org.example.Tool 1.0");
        let sub = job.new_sub_job(0.5);
        sub.set_hint("Downloading");
        assert_eq!(sub.hint(), "Downloading");
        assert_eq!(job.hint(), "Installing org.example.Tool 1.0 / Downloading");
    }

    #[test]
    fn test_hint_chaining_through_levels() {
        let job = Job::new();
        job.set_hint("Loading");
        let sub = job.new_sub_job(0.5);
        sub.set_hint("Source 1 of 1");
        let subsub = sub.new_sub_job(0.5);
        subsub.set_hint("Downloading");
        assert_eq!(job.hint(), "Loading / Source 1 of 1 / Downloading");
    }

    #[test]
    fn test_subscribe_sees_updates() {
        let job = Job::new();
        let rx = job.subscribe();
        job.set_progress(0.5);
        assert_close(rx.borrow().progress, 0.5);
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(Job::new().id(), Job::new().id());
    }
}
