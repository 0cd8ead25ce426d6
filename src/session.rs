// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Live roster session
//!
//! A session owns the current document and the latest validation report.
//! Both are published through `tokio::sync::watch`, so readers always see a
//! whole snapshot. Mutations apply synchronously and schedule a debounced
//! validation pass; remote and file-driven actions commit their results on
//! whatever document is current when they finish, and are dropped if a newer
//! request on the same entry (or a profile reload) superseded them.

use crate::config::Config;
use crate::error::{ReimportError, SyncError};
use crate::lms::LmsClient;
use crate::reimport;
use crate::schedule::{Debouncer, KeyedLatest, LatestOnly, RequestTag, DEFAULT_DEBOUNCE};
use crate::sync::{self, GroupSetSync};
use crate::types::{LmsFilter, Roster, ValidationIssue};
use crate::validation;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Issues computed for one document revision
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Revision the issues were computed for
    pub revision: u64,
    /// Issues, sorted by kind
    pub issues: Vec<ValidationIssue>,
}

/// Session tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Quiet period before validation runs
    pub debounce: Duration,
    /// Undo steps kept
    pub history_limit: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            history_limit: 50,
        }
    }
}

impl From<&Config> for SessionOptions {
    fn from(config: &Config) -> Self {
        Self {
            debounce: Duration::from_millis(config.debounce_ms),
            history_limit: config.history_limit,
        }
    }
}

struct Inner {
    document: watch::Sender<Arc<Roster>>,
    report: watch::Sender<Arc<ValidationReport>>,
    revision: AtomicU64,
    history: Mutex<VecDeque<Arc<Roster>>>,
    history_limit: usize,
    debouncer: Debouncer,
    loads: LatestOnly,
    entries: KeyedLatest,
    validation_runs: AtomicU64,
}

impl Inner {
    fn run_validation(&self) {
        let (revision, roster) = {
            let doc = self.document.borrow();
            (self.revision.load(Ordering::SeqCst), Arc::clone(&doc))
        };
        let issues = validation::validate(&roster);
        self.validation_runs.fetch_add(1, Ordering::SeqCst);
        debug!("validated revision {}: {} issues", revision, issues.len());
        self.report.send_if_modified(|current| {
            if current.revision > revision {
                return false;
            }
            *current = Arc::new(ValidationReport { revision, issues });
            true
        });
    }
}

/// Shared handle to a live roster document
#[derive(Clone)]
pub struct RosterSession {
    inner: Arc<Inner>,
}

impl RosterSession {
    /// Start a session on `roster`
    #[must_use]
    pub fn new(roster: Roster, options: SessionOptions) -> Self {
        let issues = validation::validate(&roster);
        let (document, _) = watch::channel(Arc::new(roster));
        let (report, _) = watch::channel(Arc::new(ValidationReport { revision: 0, issues }));
        Self {
            inner: Arc::new(Inner {
                document,
                report,
                revision: AtomicU64::new(0),
                history: Mutex::new(VecDeque::new()),
                history_limit: options.history_limit,
                debouncer: Debouncer::new(options.debounce),
                loads: LatestOnly::new(),
                entries: KeyedLatest::new(),
                validation_runs: AtomicU64::new(0),
            }),
        }
    }

    /// Current document
    #[must_use]
    pub fn snapshot(&self) -> Arc<Roster> {
        Arc::clone(&self.inner.document.borrow())
    }

    /// Current revision; bumped by every committed change
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.inner.revision.load(Ordering::SeqCst)
    }

    /// Latest published validation report
    #[must_use]
    pub fn report(&self) -> Arc<ValidationReport> {
        Arc::clone(&self.inner.report.borrow())
    }

    /// Receiver for document changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<Roster>> {
        self.inner.document.subscribe()
    }

    /// Receiver for validation reports
    #[must_use]
    pub fn reports(&self) -> watch::Receiver<Arc<ValidationReport>> {
        self.inner.report.subscribe()
    }

    /// Number of validation passes run so far
    #[must_use]
    pub fn validation_runs(&self) -> u64 {
        self.inner.validation_runs.load(Ordering::SeqCst)
    }

    /// Whether a validation pass is waiting for its quiet period
    #[must_use]
    pub fn validation_pending(&self) -> bool {
        self.inner.debouncer.is_pending()
    }

    /// Validate the current document right away
    pub fn validate_now(&self) -> Arc<ValidationReport> {
        self.inner.debouncer.cancel();
        self.inner.run_validation();
        self.report()
    }

    fn schedule_validation(&self) {
        if tokio::runtime::Handle::try_current().is_err() {
            self.inner.run_validation();
            return;
        }
        let inner = Arc::clone(&self.inner);
        self.inner.debouncer.schedule(async move {
            inner.run_validation();
        });
    }

    /// Commit `next` if it differs from the current document
    fn commit(&self, next: impl FnOnce(&Roster) -> Option<Roster>, record_history: bool) -> bool {
        let inner = &self.inner;
        let changed = inner.document.send_if_modified(|current| match next(&**current) {
            Some(roster) if roster != **current => {
                let previous = std::mem::replace(current, Arc::new(roster));
                if record_history {
                    let mut history = inner.history.lock().unwrap_or_else(PoisonError::into_inner);
                    history.push_back(previous);
                    while history.len() > inner.history_limit {
                        history.pop_front();
                    }
                }
                inner.revision.fetch_add(1, Ordering::SeqCst);
                true
            }
            _ => false,
        });
        if changed {
            self.schedule_validation();
        }
        changed
    }

    /// Apply a mutation; returns whether the document changed
    pub fn mutate(&self, f: impl FnOnce(&Roster) -> Roster) -> bool {
        self.commit(|current| Some(f(current)), true)
    }

    /// Apply a fallible mutation against the current document
    ///
    /// # Errors
    ///
    /// Returns the mutation's error; the document is left untouched.
    pub fn try_mutate<E>(&self, f: impl FnOnce(&Roster) -> Result<Roster, E>) -> Result<bool, E> {
        let mut failure = None;
        let changed = self.commit(
            |current| match f(current) {
                Ok(next) => Some(next),
                Err(e) => {
                    failure = Some(e);
                    None
                }
            },
            true,
        );
        match failure {
            Some(e) => Err(e),
            None => Ok(changed),
        }
    }

    /// Revert the last mutation
    pub fn undo(&self) -> bool {
        let previous = self
            .inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_back();
        match previous {
            Some(previous) => self.commit(|_| Some((*previous).clone()), false),
            None => false,
        }
    }

    /// Undo steps available
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.inner.history.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn reset_history(&self) {
        self.inner.history.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    // =========================================================================
    // Profile lifecycle
    // =========================================================================

    /// Start loading a profile; supersedes any load still in flight
    pub fn begin_load(&self) -> RequestTag {
        self.inner.loads.issue()
    }

    /// Install a loaded document if `tag` is still the latest load
    pub fn finish_load(&self, tag: RequestTag, roster: Roster) -> bool {
        let Some(roster) = self.inner.loads.accept(tag, roster) else {
            return false;
        };
        self.inner.entries.invalidate_all();
        self.reset_history();
        self.commit(|_| Some(roster), false);
        info!("loaded roster at revision {}", self.revision());
        true
    }

    /// Drop the document and every in-flight request
    pub fn clear(&self) {
        self.inner.loads.invalidate();
        self.inner.entries.invalidate_all();
        self.inner.debouncer.cancel();
        self.reset_history();
        self.commit(|_| Some(Roster::default()), false);
        self.inner.run_validation();
    }

    // =========================================================================
    // Remote and file-driven actions
    // =========================================================================

    fn entry_key(&self, lms_group_set_id: &str) -> Result<String, SyncError> {
        let roster = self.snapshot();
        let context = roster.lms.as_ref().ok_or(SyncError::NoLmsContext)?;
        Ok(roster
            .find_lms_entry(context, lms_group_set_id)
            .map_or_else(|| sync::lms_group_set_id(context, lms_group_set_id), |(set, _)| set.id.clone()))
    }

    /// Link an LMS group-set; `Ok(false)` if a newer request superseded it
    ///
    /// # Errors
    ///
    /// Remote failures and state errors from [`sync::apply_link`].
    pub async fn link<C: LmsClient>(
        &self,
        sync: &GroupSetSync<C>,
        lms_group_set_id: &str,
        filter: LmsFilter,
    ) -> Result<bool, SyncError> {
        let key = self.entry_key(lms_group_set_id)?;
        let snapshot = self.snapshot();
        let context = snapshot.lms.clone().ok_or(SyncError::NoLmsContext)?;
        sync::ensure_linkable(&snapshot, &context, lms_group_set_id)?;
        let tag = self.inner.entries.issue(&key);
        let fetched = sync.fetch_for_link(&context, lms_group_set_id, filter).await;
        if !self.inner.entries.finish(&key, tag) {
            return Ok(false);
        }
        let fetched = fetched?;
        self.try_mutate(|current| sync::apply_link(current, fetched))
    }

    /// Refresh a linked set; `Ok(false)` if a newer request superseded it
    ///
    /// # Errors
    ///
    /// Remote failures and state errors from [`sync::apply_refresh`].
    pub async fn refresh<C: LmsClient>(&self, sync: &GroupSetSync<C>, set_id: &str) -> Result<bool, SyncError> {
        let snapshot = self.snapshot();
        let tag = self.inner.entries.issue(set_id);
        let fetched = sync.fetch_for_refresh(&snapshot, set_id).await;
        if !self.inner.entries.finish(set_id, tag) {
            return Ok(false);
        }
        let fetched = fetched?;
        self.try_mutate(|current| sync::apply_refresh(current, set_id, fetched))
    }

    /// Reimport a group file into a set; `Ok(false)` if superseded
    ///
    /// # Errors
    ///
    /// File, parse and target errors from [`reimport`].
    pub async fn reimport(&self, target_id: &str, path: &Path) -> Result<bool, ReimportError> {
        let tag = self.inner.entries.issue(target_id);
        let content = tokio::fs::read_to_string(path).await;
        if !self.inner.entries.finish(target_id, tag) {
            return Ok(false);
        }
        let content = content.map_err(|source| ReimportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.try_mutate(|current| {
            reimport::apply_reimport_content(current, target_id, path, &content)
                .map(|patch| current.apply_group_set_patch(patch))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RosterMember;

    fn student(name: &str) -> RosterMember {
        RosterMember::student(name, &format!("{}@uni.edu", name.to_lowercase()))
    }

    #[test]
    fn test_mutate_bumps_revision_and_history() {
        let session = RosterSession::new(Roster::new(), SessionOptions::default());
        assert!(session.mutate(|r| r.add_member(student("Alice"))));
        assert!(!session.mutate(Roster::clone));
        assert_eq!(session.revision(), 1);
        assert_eq!(session.history_len(), 1);
        assert!(session.undo());
        assert!(session.snapshot().members.is_empty());
        assert_eq!(session.revision(), 2);
    }

    #[test]
    fn test_validation_runs_inline_without_runtime() {
        let session = RosterSession::new(Roster::new(), SessionOptions::default());
        session.mutate(|r| r.add_member(RosterMember::student("Alice", "not-an-email")));
        let report = session.report();
        assert_eq!(report.revision, 1);
        assert!(!report.issues.is_empty());
        assert_eq!(session.validation_runs(), 1);
    }

    #[test]
    fn test_history_is_bounded() {
        let options = SessionOptions {
            history_limit: 2,
            ..SessionOptions::default()
        };
        let session = RosterSession::new(Roster::new(), options);
        for name in ["A", "B", "C", "D"] {
            session.mutate(|r| r.add_member(student(name)));
        }
        assert_eq!(session.history_len(), 2);
    }

    #[test]
    fn test_stale_load_is_discarded() {
        let session = RosterSession::new(Roster::new(), SessionOptions::default());
        let first = session.begin_load();
        let second = session.begin_load();
        assert!(session.finish_load(second, Roster::new().add_member(student("B"))));
        assert!(!session.finish_load(first, Roster::new().add_member(student("A"))));
        assert_eq!(session.snapshot().members[0].name, "B");
    }

    #[test]
    fn test_try_mutate_error_leaves_document() {
        let session = RosterSession::new(Roster::new(), SessionOptions::default());
        let result: Result<bool, SyncError> = session.try_mutate(|r| sync::break_sync(r, "missing"));
        assert!(result.is_err());
        assert_eq!(session.revision(), 0);
    }
}
