// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! LMS boundary - the remote calls the sync manager depends on

use crate::error::{CommandError, CommandResult};
use crate::types::{LmsContext, LmsFilter};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name of the LMS snapshot inside a data directory
pub const LMS_SNAPSHOT_FILE: &str = "lms.json";

/// A group-set (group category) as listed by the LMS
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LmsGroupSetSummary {
    /// LMS group-set ID
    pub id: String,
    /// Display name on the LMS
    pub name: String,
}

/// A group with its raw member identifiers as returned by the LMS
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LmsGroupRecord {
    /// LMS group ID
    pub id: String,
    /// Display name
    pub name: String,
    /// Raw member identifiers
    #[serde(default)]
    pub member_ids: Vec<String>,
}

/// Remote calls into the LMS backend
///
/// Implementations report transport and authentication failures as
/// [`CommandError`]; they are surfaced verbatim and never retried.
#[async_trait]
pub trait LmsClient: Send + Sync {
    /// List the group-sets of a course
    async fn fetch_group_sets(&self, context: &LmsContext) -> CommandResult<Vec<LmsGroupSetSummary>>;

    /// Fetch the groups of one group-set, scoped by `filter`
    async fn fetch_group_set_members(
        &self,
        context: &LmsContext,
        lms_group_set_id: &str,
        filter: &LmsFilter,
    ) -> CommandResult<Vec<LmsGroupRecord>>;
}

// =============================================================================
// Snapshot client
// =============================================================================

/// One group-set in an LMS snapshot file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotGroupSet {
    /// LMS group-set ID
    pub id: String,
    /// Display name
    pub name: String,
    /// Groups
    #[serde(default)]
    pub groups: Vec<LmsGroupRecord>,
}

/// One course in an LMS snapshot file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotCourse {
    /// Course identity
    pub context: LmsContext,
    /// Group-sets of the course
    #[serde(default)]
    pub group_sets: Vec<SnapshotGroupSet>,
}

/// Contents of an LMS snapshot file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LmsSnapshot {
    /// Courses
    #[serde(default)]
    pub courses: Vec<SnapshotCourse>,
}

/// LMS client serving a JSON snapshot exported by the backend process
///
/// The file is re-read on every call, so a refresh picks up a newer export.
#[derive(Debug, Clone)]
pub struct SnapshotLmsClient {
    path: PathBuf,
}

impl SnapshotLmsClient {
    /// Client over a snapshot file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Client over `lms.json` in a data directory
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(LMS_SNAPSHOT_FILE))
    }

    async fn read(&self) -> CommandResult<LmsSnapshot> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            CommandError::new(format!("LMS snapshot unavailable: {}", self.path.display()))
                .with_details(e.to_string())
        })?;
        serde_json::from_str(&content).map_err(|e| {
            CommandError::new(format!("LMS snapshot is malformed: {}", self.path.display()))
                .with_details(e.to_string())
        })
    }

    async fn course(&self, context: &LmsContext) -> CommandResult<SnapshotCourse> {
        self.read()
            .await?
            .courses
            .into_iter()
            .find(|c| c.context == *context)
            .ok_or_else(|| CommandError::new(format!("course {} not found on {}", context.course_id, context.base_url)))
    }
}

#[async_trait]
impl LmsClient for SnapshotLmsClient {
    async fn fetch_group_sets(&self, context: &LmsContext) -> CommandResult<Vec<LmsGroupSetSummary>> {
        let course = self.course(context).await?;
        debug!("snapshot lists {} group-sets", course.group_sets.len());
        Ok(course
            .group_sets
            .into_iter()
            .map(|s| LmsGroupSetSummary { id: s.id, name: s.name })
            .collect())
    }

    async fn fetch_group_set_members(
        &self,
        context: &LmsContext,
        lms_group_set_id: &str,
        _filter: &LmsFilter,
    ) -> CommandResult<Vec<LmsGroupRecord>> {
        let course = self.course(context).await?;
        course
            .group_sets
            .into_iter()
            .find(|s| s.id == lms_group_set_id)
            .map(|s| s.groups)
            .ok_or_else(|| CommandError::new(format!("group-set {lms_group_set_id} not found on the LMS")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LmsType;

    fn context() -> LmsContext {
        LmsContext {
            lms_type: LmsType::Moodle,
            base_url: "https://moodle.example".into(),
            course_id: "c1".into(),
        }
    }

    #[tokio::test]
    async fn test_snapshot_client_serves_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let snapshot = LmsSnapshot {
            courses: vec![SnapshotCourse {
                context: context(),
                group_sets: vec![SnapshotGroupSet {
                    id: "gs1".into(),
                    name: "Projects".into(),
                    groups: vec![LmsGroupRecord {
                        id: "g1".into(),
                        name: "P1".into(),
                        member_ids: vec!["u1".into()],
                    }],
                }],
            }],
        };
        std::fs::write(dir.path().join(LMS_SNAPSHOT_FILE), serde_json::to_string(&snapshot).unwrap()).unwrap();

        let client = SnapshotLmsClient::in_dir(dir.path());
        let sets = client.fetch_group_sets(&context()).await.unwrap();
        assert_eq!(sets, vec![LmsGroupSetSummary { id: "gs1".into(), name: "Projects".into() }]);
        let groups = client.fetch_group_set_members(&context(), "gs1", &LmsFilter::All).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert!(client.fetch_group_set_members(&context(), "nope", &LmsFilter::All).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_structured_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = SnapshotLmsClient::in_dir(dir.path())
            .fetch_group_sets(&context())
            .await
            .unwrap_err();
        assert!(err.message.starts_with("LMS snapshot unavailable"));
        assert!(err.details.is_some());
    }
}
