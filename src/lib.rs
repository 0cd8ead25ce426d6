// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
//! Rostersystem library - roster and group-set consistency engine
//!
//! This crate holds the course roster (students and staff), the groups and
//! group-sets derived from it, and the assignments that consume them. It keeps
//! that data consistent under local edits and LMS reconciliation, and derives
//! the list of integrity issues a user still has to resolve.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cascade;
pub mod commands;
pub mod config;
pub mod error;
pub mod lms;
pub mod reimport;
pub mod resolution;
pub mod roster;
pub mod schedule;
pub mod session;
pub mod sync;
pub mod validation;

/// Core data types for the roster document
pub mod types {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use sha2::{Digest, Sha256};
    use std::path::PathBuf;
    use std::sync::Arc;

    // =========================================================================
    // Roster Members
    // =========================================================================

    /// Enrollment status of a roster member
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum MemberStatus {
        /// Currently enrolled
        Active,
        /// Dropped the course
        Dropped,
        /// Enrollment not yet complete
        Incomplete,
    }

    /// Whether a member is a student or course staff
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum EnrollmentType {
        /// Student
        Student,
        /// Teacher, TA or other staff
        Staff,
    }

    /// Where a member record came from
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum MemberSource {
        /// Synced from the LMS
        Lms,
        /// Entered by hand
        Local,
        /// Read from an import file
        Import,
    }

    /// Verification state of a git username
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum GitUsernameStatus {
        /// Not checked against the git platform yet
        #[default]
        Unknown,
        /// Known to exist
        Valid,
        /// Known not to exist
        Invalid,
    }

    /// A student or staff member on the roster
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct RosterMember {
        /// Opaque unique identifier, immutable once created
        pub id: String,
        /// Display name
        pub name: String,
        /// Email address (not required to be unique)
        pub email: String,
        /// Enrollment status
        pub status: MemberStatus,
        /// Student or staff
        pub enrollment_type: EnrollmentType,
        /// Origin of this record
        pub source: MemberSource,
        /// User id on the LMS side
        #[serde(default)]
        pub lms_user_id: Option<String>,
        /// Username on the git platform
        #[serde(default)]
        pub git_username: Option<String>,
        /// Verification state of `git_username`
        #[serde(default)]
        pub git_username_status: GitUsernameStatus,
    }

    impl RosterMember {
        /// Generate a deterministic ID for a member from its source and email
        #[must_use]
        pub fn generate_id(source: MemberSource, email: &str, name: &str) -> String {
            let mut hasher = Sha256::new();
            hasher.update(format!("{source:?}").as_bytes());
            hasher.update(email.trim().to_lowercase().as_bytes());
            hasher.update(name.as_bytes());
            let hash = hex::encode(hasher.finalize());
            format!("member:{}", &hash[..12])
        }

        /// Create an active student entered locally
        #[must_use]
        pub fn student(name: &str, email: &str) -> Self {
            Self {
                id: Self::generate_id(MemberSource::Local, email, name),
                name: name.into(),
                email: email.into(),
                status: MemberStatus::Active,
                enrollment_type: EnrollmentType::Student,
                source: MemberSource::Local,
                lms_user_id: None,
                git_username: None,
                git_username_status: GitUsernameStatus::Unknown,
            }
        }

        /// Whether this member is an active student
        #[must_use]
        pub fn is_active_student(&self) -> bool {
            self.status == MemberStatus::Active && self.enrollment_type == EnrollmentType::Student
        }
    }

    // =========================================================================
    // Groups
    // =========================================================================

    /// How a group came to exist
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum GroupOrigin {
        /// Created by hand or from a file
        Local,
        /// Derived by a system group-set
        System,
        /// Materialized from an LMS group
        Lms,
    }

    /// A team of roster members
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Group {
        /// Unique identifier: group:<hash>
        pub id: String,
        /// Display name
        pub name: String,
        /// Member IDs; may reference members missing from the roster
        #[serde(default)]
        pub member_ids: Vec<String>,
        /// Origin of this group
        pub origin: GroupOrigin,
    }

    impl Group {
        /// Generate a deterministic ID for a group within a group-set
        #[must_use]
        pub fn generate_id(group_set_id: &str, key: &str) -> String {
            let mut hasher = Sha256::new();
            hasher.update(group_set_id.as_bytes());
            hasher.update(key.as_bytes());
            let hash = hex::encode(hasher.finalize());
            format!("group:{}", &hash[..12])
        }

        /// Create a local group, dropping duplicate member IDs
        #[must_use]
        pub fn local(id: impl Into<String>, name: impl Into<String>, member_ids: Vec<String>) -> Self {
            Self {
                id: id.into(),
                name: name.into(),
                member_ids: dedup_ids(member_ids),
                origin: GroupOrigin::Local,
            }
        }
    }

    /// Remove repeated IDs while keeping first-seen order
    #[must_use]
    pub fn dedup_ids(ids: Vec<String>) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
    }

    // =========================================================================
    // Group Selection
    // =========================================================================

    /// Inclusion policy over the groups of a group-set
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "mode", rename_all = "snake_case")]
    pub enum GroupSelection {
        /// Every group is included
        #[default]
        All,
        /// Every group except the excluded ones
        Selected {
            /// Group IDs scoped to the referenced group-set
            #[serde(default)]
            excluded_group_ids: Vec<String>,
        },
    }

    impl GroupSelection {
        /// Excluded group IDs (empty for `All`)
        #[must_use]
        pub fn excluded_group_ids(&self) -> &[String] {
            match self {
                Self::All => &[],
                Self::Selected { excluded_group_ids } => excluded_group_ids,
            }
        }

        /// Whether a group is included by this policy
        #[must_use]
        pub fn includes(&self, group_id: &str) -> bool {
            !self.excluded_group_ids().iter().any(|g| g == group_id)
        }

        /// The same policy with no exclusions left
        #[must_use]
        pub fn cleared(&self) -> Self {
            match self {
                Self::All => Self::All,
                Self::Selected { .. } => Self::Selected {
                    excluded_group_ids: Vec::new(),
                },
            }
        }
    }

    // =========================================================================
    // LMS Connection
    // =========================================================================

    /// Supported learning management systems
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum LmsType {
        /// Canvas
        Canvas,
        /// Moodle
        Moodle,
    }

    /// The course an LMS cache entry belongs to
    #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct LmsContext {
        /// LMS flavor
        pub lms_type: LmsType,
        /// Base URL of the LMS instance
        pub base_url: String,
        /// Course identifier on the LMS
        pub course_id: String,
    }

    /// Scope used when importing groups from an LMS group-set
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "kind", rename_all = "snake_case")]
    pub enum LmsFilter {
        /// Every group
        #[default]
        All,
        /// Groups whose name matches a glob pattern
        Pattern {
            /// Glob pattern, e.g. `Team-*`
            pattern: String,
        },
        /// An explicit list of LMS group IDs
        Selected {
            /// LMS group IDs to import
            group_ids: Vec<String>,
        },
    }

    /// A group as last fetched from the LMS
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct CachedLmsGroup {
        /// Local group ID this LMS group is materialized as
        pub id: String,
        /// LMS group ID
        pub lms_group_id: String,
        /// Display name
        pub name: String,
        /// Raw member identifiers as returned by the LMS
        #[serde(default)]
        pub lms_member_ids: Vec<String>,
        /// Subset of `lms_member_ids` mapped to roster member IDs
        #[serde(default)]
        pub resolved_member_ids: Vec<String>,
        /// `lms_member_ids.len() - resolved_member_ids.len()`
        #[serde(default)]
        pub unresolved_count: usize,
        /// Set when a roster change invalidated the last resolution
        #[serde(default)]
        pub needs_reresolution: bool,
    }

    /// Synchronization state of an LMS-known group-set
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "state", rename_all = "snake_case")]
    pub enum CacheState {
        /// Known upstream, never imported
        Unlinked,
        /// Live-synced and refreshable
        Linked {
            /// Groups as of `fetched_at`
            groups: Vec<CachedLmsGroup>,
            /// Import scope used for every refresh
            filter: LmsFilter,
            /// Last successful fetch
            fetched_at: DateTime<Utc>,
        },
        /// Imported once, now locally editable
        Copied {
            /// Last fetch before the sync was broken, if any
            fetched_at: Option<DateTime<Utc>>,
        },
    }

    /// Cache entry tracking one LMS group-set
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct LmsGroupSetCacheEntry {
        /// Course the group-set lives in
        pub context: LmsContext,
        /// Group-set (group category) ID on the LMS
        pub lms_group_set_id: String,
        /// Sync state
        pub state: CacheState,
    }

    impl LmsGroupSetCacheEntry {
        /// Whether this entry tracks the given LMS group-set
        #[must_use]
        pub fn tracks(&self, context: &LmsContext, lms_group_set_id: &str) -> bool {
            self.context == *context && self.lms_group_set_id == lms_group_set_id
        }

        /// Short state name for display
        #[must_use]
        pub fn state_name(&self) -> &'static str {
            match self.state {
                CacheState::Unlinked => "unlinked",
                CacheState::Linked { .. } => "linked",
                CacheState::Copied { .. } => "copied",
            }
        }
    }

    /// Synthetic group-set flavors
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum SystemSetType {
        /// One group per active student
        IndividualStudents,
        /// A single group with every active staff member
        Staff,
    }

    impl SystemSetType {
        /// Fixed group-set ID for this system set
        #[must_use]
        pub fn group_set_id(self) -> &'static str {
            match self {
                Self::IndividualStudents => "groupset:system:individual-students",
                Self::Staff => "groupset:system:staff",
            }
        }

        /// Display name
        #[must_use]
        pub fn display_name(self) -> &'static str {
            match self {
                Self::IndividualStudents => "Individual Students",
                Self::Staff => "Staff",
            }
        }
    }

    /// Where a group-set's groups come from
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "kind", rename_all = "snake_case")]
    pub enum GroupSetConnection {
        /// Derived from the roster
        System {
            /// Which synthetic set
            system_type: SystemSetType,
        },
        /// Created from a one-time file import
        Import {
            /// File the groups were read from
            source_path: PathBuf,
            /// When the import happened
            imported_at: DateTime<Utc>,
        },
        /// Tracks an LMS group-set
        Lms(LmsGroupSetCacheEntry),
    }

    /// A named collection of groups sharing one membership scheme
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct GroupSet {
        /// Unique identifier: groupset:<...>
        pub id: String,
        /// Display name
        pub name: String,
        /// Groups in this set
        #[serde(default)]
        pub group_ids: Vec<String>,
        /// Connection; `None` for a purely local set
        #[serde(default)]
        pub connection: Option<GroupSetConnection>,
        /// Default inclusion policy
        #[serde(default)]
        pub group_selection: GroupSelection,
    }

    impl GroupSet {
        /// Create an empty local group-set
        #[must_use]
        pub fn local(id: impl Into<String>, name: impl Into<String>) -> Self {
            Self {
                id: id.into(),
                name: name.into(),
                group_ids: Vec::new(),
                connection: None,
                group_selection: GroupSelection::All,
            }
        }

        /// The LMS cache entry, if this set tracks one
        #[must_use]
        pub fn lms_entry(&self) -> Option<&LmsGroupSetCacheEntry> {
            match &self.connection {
                Some(GroupSetConnection::Lms(entry)) => Some(entry),
                Some(GroupSetConnection::System { .. } | GroupSetConnection::Import { .. }) | None => None,
            }
        }

        /// Whether groups in this set may be edited locally
        #[must_use]
        pub fn is_editable(&self) -> bool {
            match &self.connection {
                None | Some(GroupSetConnection::Import { .. }) => true,
                Some(GroupSetConnection::System { .. }) => false,
                Some(GroupSetConnection::Lms(entry)) => match entry.state {
                    CacheState::Copied { .. } => true,
                    CacheState::Unlinked | CacheState::Linked { .. } => false,
                },
            }
        }
    }

    // =========================================================================
    // Assignments
    // =========================================================================

    /// Coverage expectation of an assignment
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum AssignmentType {
        /// Every active student must be in some included group
        ClassWide,
        /// Only the selected groups take part
        Selective,
    }

    /// An assignment that provisions one repository per group
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Assignment {
        /// Unique identifier: assignment:<...>
        pub id: String,
        /// Display name, also the repository name prefix
        pub name: String,
        /// Free-form description
        #[serde(default)]
        pub description: Option<String>,
        /// Coverage expectation
        pub assignment_type: AssignmentType,
        /// Referenced group-set (not owned)
        pub group_set_id: String,
        /// Groups of the set that take part
        #[serde(default)]
        pub group_selection: GroupSelection,
    }

    // =========================================================================
    // Validation Issues
    // =========================================================================

    /// Closed set of integrity issue kinds, in report order
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum IssueKind {
        /// Two members share an ID
        DuplicateMemberId,
        /// Two members share an email address
        DuplicateEmail,
        /// Email address is malformed
        InvalidEmail,
        /// Email address is blank
        MissingEmail,
        /// Two assignments share a name
        DuplicateAssignmentName,
        /// Two groups of one assignment share an ID
        DuplicateGroupId,
        /// Two groups of one assignment share a name
        DuplicateGroupName,
        /// Two groups of one assignment map to the same repository
        DuplicateRepoName,
        /// A member sits in more than one group of an assignment
        MemberInMultipleGroups,
        /// A group references a member missing from the roster
        OrphanGroupMember,
        /// Active student without a git username
        MissingGitUsername,
        /// Git username known to be invalid
        InvalidGitUsername,
        /// Group without members
        EmptyGroup,
        /// Active student in no group of a class-wide assignment
        UnassignedStudent,
        /// Cached LMS group awaiting re-resolution
        PendingReresolution,
    }

    impl IssueKind {
        /// Human-readable label
        #[must_use]
        pub fn label(self) -> &'static str {
            match self {
                Self::DuplicateMemberId => "duplicate member id",
                Self::DuplicateEmail => "duplicate email",
                Self::InvalidEmail => "invalid email",
                Self::MissingEmail => "missing email",
                Self::DuplicateAssignmentName => "duplicate assignment name",
                Self::DuplicateGroupId => "duplicate group id",
                Self::DuplicateGroupName => "duplicate group name",
                Self::DuplicateRepoName => "duplicate repository name",
                Self::MemberInMultipleGroups => "member in multiple groups",
                Self::OrphanGroupMember => "orphan group member",
                Self::MissingGitUsername => "missing git username",
                Self::InvalidGitUsername => "invalid git username",
                Self::EmptyGroup => "empty group",
                Self::UnassignedStudent => "unassigned student",
                Self::PendingReresolution => "pending re-resolution",
            }
        }
    }

    /// A data-integrity finding the user should resolve
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ValidationIssue {
        /// What is wrong
        pub kind: IssueKind,
        /// Entities involved, in source-collection order
        pub affected_ids: Vec<String>,
        /// Assignment the issue was found under, for per-assignment checks
        #[serde(default)]
        pub assignment_id: Option<String>,
    }

    // =========================================================================
    // Roster Document
    // =========================================================================

    /// The complete roster document
    ///
    /// Collections sit behind `Arc` so a mutation only copies the collection
    /// it touches; equality still compares by value.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Roster {
        /// Course connection used for LMS sync
        #[serde(default)]
        pub lms: Option<LmsContext>,
        /// Students and staff
        #[serde(default)]
        pub members: Arc<Vec<RosterMember>>,
        /// All groups
        #[serde(default)]
        pub groups: Arc<Vec<Group>>,
        /// All group-sets, including LMS cache entries
        #[serde(default)]
        pub group_sets: Arc<Vec<GroupSet>>,
        /// All assignments
        #[serde(default)]
        pub assignments: Arc<Vec<Assignment>>,
    }
}

/// Prelude for common imports
pub mod prelude {
    pub use crate::types::*;
    pub use anyhow::{Context, Result};
}
