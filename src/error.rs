// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Error types crossing the command boundary

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Structured failure returned by every fallible boundary call
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct CommandError {
    /// User-facing message
    pub message: String,
    /// Optional technical detail
    #[serde(default)]
    pub details: Option<String>,
}

impl CommandError {
    /// Error with a message only
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    /// Attach technical detail
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Result of a boundary call
pub type CommandResult<T> = Result<T, CommandError>;

/// Failures of group-set synchronization actions
#[derive(Debug, Error)]
pub enum SyncError {
    /// The LMS call failed (transport or authentication)
    #[error(transparent)]
    Remote(#[from] CommandError),
    /// The LMS group-set already has a linked or copied entry
    #[error("LMS group-set {lms_group_set_id} is already tracked by {group_set_id}")]
    AlreadyLinked {
        /// LMS-side group-set ID
        lms_group_set_id: String,
        /// Local group-set holding the entry
        group_set_id: String,
    },
    /// No group-set with that ID
    #[error("group-set not found: {0}")]
    NotFound(String),
    /// Refresh or break-sync on a set that is not linked
    #[error("group-set {0} is not linked to the LMS")]
    NotLinked(String),
    /// Sync action on a set without an LMS cache entry
    #[error("group-set {0} does not track an LMS group-set")]
    NotLmsTracked(String),
    /// No LMS course configured on the roster
    #[error("roster has no LMS course connection")]
    NoLmsContext,
    /// The filter pattern does not compile
    #[error("invalid group filter pattern '{pattern}': {reason}")]
    InvalidFilter {
        /// Offending pattern
        pattern: String,
        /// Compiler message
        reason: String,
    },
}

/// Failures of file-driven reimport
#[derive(Debug, Error)]
pub enum ReimportError {
    /// The file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// A row could not be parsed
    #[error("{path}:{line}: {message}")]
    Parse {
        /// File path
        path: PathBuf,
        /// 1-based line number
        line: usize,
        /// What went wrong
        message: String,
    },
    /// A required column is absent
    #[error("{path}: missing required column '{column}'")]
    MissingColumn {
        /// File path
        path: PathBuf,
        /// Column name
        column: &'static str,
    },
    /// No column identifies members
    #[error("{path}: no member column (member_id, student_id, email or lms_user_id)")]
    NoMemberColumn {
        /// File path
        path: PathBuf,
    },
    /// Target group-set does not exist
    #[error("group-set not found: {0}")]
    NotFound(String),
    /// Target group-set is not locally editable
    #[error("group-set {0} is not editable; break sync or pick a local set")]
    NotEditable(String),
}

impl From<SyncError> for CommandError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Remote(inner) => inner,
            other => Self::new(other.to_string()),
        }
    }
}

impl From<ReimportError> for CommandError {
    fn from(err: ReimportError) -> Self {
        match &err {
            ReimportError::Io { source, .. } => {
                Self::new(err.to_string()).with_details(format!("{source:?}"))
            }
            _ => Self::new(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_passes_through_verbatim() {
        let remote = CommandError::new("401 Unauthorized").with_details("token expired");
        let err: CommandError = SyncError::Remote(remote.clone()).into();
        assert_eq!(err, remote);
    }

    #[test]
    fn test_sync_error_message() {
        let err: CommandError = SyncError::NotLinked("groupset:x".into()).into();
        assert_eq!(err.message, "group-set groupset:x is not linked to the LMS");
        assert!(err.details.is_none());
    }
}
