// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Roster store - the mutation API over the roster document
//!
//! Every operation borrows the current document and returns a new one. Only
//! the collections an operation touches are copied; the rest stay shared with
//! the previous snapshot. Operations are total: referencing an unknown entity
//! is a caller bug, logged and answered with an unchanged document.

use crate::cascade;
use crate::types::{
    dedup_ids, Assignment, AssignmentType, EnrollmentType, GitUsernameStatus, Group, GroupSelection,
    GroupSet, LmsContext, LmsGroupSetCacheEntry, MemberStatus, Roster, RosterMember,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// File name of the persisted roster inside a data directory
pub const ROSTER_FILE: &str = "roster.json";

/// Partial update of a roster member; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberUpdate {
    /// New display name
    pub name: Option<String>,
    /// New email
    pub email: Option<String>,
    /// New status
    pub status: Option<MemberStatus>,
    /// New enrollment type
    pub enrollment_type: Option<EnrollmentType>,
    /// New LMS user id (`Some(None)` clears it)
    pub lms_user_id: Option<Option<String>>,
    /// New git username (`Some(None)` clears it)
    pub git_username: Option<Option<String>>,
    /// New git username status
    pub git_username_status: Option<GitUsernameStatus>,
}

/// Partial update of a group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupUpdate {
    /// New name
    pub name: Option<String>,
    /// New member list (deduplicated on write)
    pub member_ids: Option<Vec<String>>,
}

/// Partial update of an assignment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentUpdate {
    /// New name
    pub name: Option<String>,
    /// New description (`Some(None)` clears it)
    pub description: Option<Option<String>>,
    /// New coverage expectation
    pub assignment_type: Option<AssignmentType>,
    /// New referenced group-set
    pub group_set_id: Option<String>,
    /// New group selection
    pub group_selection: Option<GroupSelection>,
}

/// Options for [`Roster::update_assignment`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateAssignmentOptions {
    /// Reset exclusions when the referenced group-set changes
    pub clear_exclusions_on_group_set_change: bool,
}

/// A group referencing a member, with the sets that hold it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffectedGroup {
    /// Group ID
    pub group_id: String,
    /// Group name
    pub group_name: String,
    /// Group-sets listing this group
    pub group_set_ids: Vec<String>,
}

/// What removing a member would touch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalImpact {
    /// Member being removed
    pub member_id: String,
    /// Groups listing the member
    pub groups: Vec<AffectedGroup>,
    /// Assignments that include one of those groups
    pub assignment_ids: Vec<String>,
}

impl RemovalImpact {
    /// Whether removal would change any group
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl Roster {
    /// Create an empty roster
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty roster connected to an LMS course
    #[must_use]
    pub fn for_course(context: LmsContext) -> Self {
        Self {
            lms: Some(context),
            ..Self::default()
        }
    }

    /// Load the roster from a data directory (empty if no file exists)
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(ROSTER_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Save the roster to a data directory
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
        let path = dir.join(ROSTER_FILE);
        let json = serde_json::to_string_pretty(self).context("Failed to serialize roster")?;
        fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Get a member by ID
    #[must_use]
    pub fn member(&self, id: &str) -> Option<&RosterMember> {
        self.members.iter().find(|m| m.id == id)
    }

    /// Get a group by ID
    #[must_use]
    pub fn group(&self, id: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.id == id)
    }

    /// Get a group-set by ID
    #[must_use]
    pub fn group_set(&self, id: &str) -> Option<&GroupSet> {
        self.group_sets.iter().find(|s| s.id == id)
    }

    /// Get an assignment by ID
    #[must_use]
    pub fn assignment(&self, id: &str) -> Option<&Assignment> {
        self.assignments.iter().find(|a| a.id == id)
    }

    /// Groups of a set, in set order (missing IDs are skipped)
    #[must_use]
    pub fn groups_in_set(&self, set_id: &str) -> Vec<&Group> {
        match self.group_set(set_id) {
            Some(set) => set.group_ids.iter().filter_map(|id| self.group(id)).collect(),
            None => vec![],
        }
    }

    /// Group-sets listing a group
    #[must_use]
    pub fn sets_containing(&self, group_id: &str) -> Vec<&GroupSet> {
        self.group_sets
            .iter()
            .filter(|s| s.group_ids.iter().any(|g| g == group_id))
            .collect()
    }

    /// The group-set holding the cache entry for an LMS group-set
    #[must_use]
    pub fn find_lms_entry(&self, context: &LmsContext, lms_group_set_id: &str) -> Option<(&GroupSet, &LmsGroupSetCacheEntry)> {
        self.group_sets.iter().find_map(|set| {
            set.lms_entry()
                .filter(|entry| entry.tracks(context, lms_group_set_id))
                .map(|entry| (set, entry))
        })
    }

    // =========================================================================
    // Collection replacement
    // =========================================================================

    pub(crate) fn with_members(&self, members: Vec<RosterMember>) -> Self {
        Self {
            members: Arc::new(members),
            ..self.clone()
        }
    }

    pub(crate) fn with_groups(&self, groups: Vec<Group>) -> Self {
        Self {
            groups: Arc::new(groups),
            ..self.clone()
        }
    }

    pub(crate) fn with_group_sets(&self, group_sets: Vec<GroupSet>) -> Self {
        Self {
            group_sets: Arc::new(group_sets),
            ..self.clone()
        }
    }

    pub(crate) fn with_assignments(&self, assignments: Vec<Assignment>) -> Self {
        Self {
            assignments: Arc::new(assignments),
            ..self.clone()
        }
    }

    /// Replace one group-set with the result of `f`
    pub(crate) fn map_group_set(&self, set_id: &str, f: impl FnOnce(&GroupSet) -> GroupSet) -> Self {
        let Some(index) = self.group_sets.iter().position(|s| s.id == set_id) else {
            warn!("group-set not found: {}", set_id);
            return self.clone();
        };
        let mut sets = (*self.group_sets).clone();
        sets[index] = f(&sets[index]);
        self.with_group_sets(sets)
    }

    /// Replace the group collection of one set
    ///
    /// Groups that were in the set and are not in `groups` are dropped, along
    /// with their exclusion entries, unless another set still lists them.
    /// Groups are upserted by ID and the set's `group_ids` becomes exactly the
    /// IDs of `groups`, in order.
    #[must_use]
    pub fn replace_group_set_groups(&self, set_id: &str, groups: Vec<Group>) -> Self {
        let Some(set) = self.group_set(set_id) else {
            warn!("group-set not found: {}", set_id);
            return self.clone();
        };
        let new_ids: Vec<String> = groups.iter().map(|g| g.id.clone()).collect();
        if set.group_ids == new_ids
            && groups.iter().all(|g| self.group(&g.id) == Some(g))
        {
            return self.clone();
        }

        let dropped: Vec<String> = set
            .group_ids
            .iter()
            .filter(|id| !new_ids.contains(id))
            .filter(|id| {
                !self
                    .group_sets
                    .iter()
                    .any(|s| s.id != set_id && s.group_ids.contains(id))
            })
            .cloned()
            .collect();

        let mut all_groups: Vec<Group> = self
            .groups
            .iter()
            .filter(|g| !dropped.contains(&g.id))
            .cloned()
            .collect();
        for group in groups {
            if let Some(existing) = all_groups.iter_mut().find(|g| g.id == group.id) {
                *existing = group;
            } else {
                all_groups.push(group);
            }
        }

        dropped
            .iter()
            .fold(self.with_groups(all_groups), |acc, id| cascade::drop_group_references(&acc, id))
            .map_group_set(set_id, |s| GroupSet {
                group_ids: new_ids,
                ..s.clone()
            })
    }

    // =========================================================================
    // Members
    // =========================================================================

    /// Add a member
    #[must_use]
    pub fn add_member(&self, member: RosterMember) -> Self {
        if self.member(&member.id).is_some() {
            warn!("member already exists: {}", member.id);
            return self.clone();
        }
        let mut members = (*self.members).clone();
        members.push(member.clone());
        let next = self.with_members(members);
        let next = cascade::flag_for_new_member(&next, &member);
        cascade::refresh_system_sets(&next)
    }

    /// Update fields of a member; the ID never changes
    #[must_use]
    pub fn update_member(&self, id: &str, update: MemberUpdate) -> Self {
        let Some(index) = self.members.iter().position(|m| m.id == id) else {
            warn!("member not found: {}", id);
            return self.clone();
        };
        let before = self.members[index].clone();
        let mut after = before.clone();
        if let Some(name) = update.name {
            after.name = name;
        }
        if let Some(email) = update.email {
            after.email = email;
        }
        if let Some(status) = update.status {
            after.status = status;
        }
        if let Some(enrollment_type) = update.enrollment_type {
            after.enrollment_type = enrollment_type;
        }
        if let Some(lms_user_id) = update.lms_user_id {
            after.lms_user_id = lms_user_id;
        }
        if let Some(git_username) = update.git_username {
            after.git_username = git_username;
        }
        if let Some(status) = update.git_username_status {
            after.git_username_status = status;
        }
        if after == before {
            return self.clone();
        }

        let mut members = (*self.members).clone();
        members[index] = after.clone();
        let mut next = self.with_members(members);
        if cascade::identity_changed(&before, &after) {
            next = cascade::flag_for_identity_change(&next, &before, &after);
        }
        cascade::refresh_system_sets(&next)
    }

    /// Remove a member, stripping it from every group
    ///
    /// Callers should present [`Roster::removal_impact`] first; the store
    /// itself does not block.
    #[must_use]
    pub fn remove_member(&self, id: &str) -> Self {
        let Some(removed) = self.member(id).cloned() else {
            warn!("member not found: {}", id);
            return self.clone();
        };
        let members: Vec<RosterMember> = self.members.iter().filter(|m| m.id != id).cloned().collect();
        let next = self.with_members(members);
        let next = cascade::strip_member(&next, id);
        let next = cascade::flag_for_removed_member(&next, &removed);
        cascade::refresh_system_sets(&next)
    }

    /// Groups and assignments that reference a member
    #[must_use]
    pub fn removal_impact(&self, member_id: &str) -> RemovalImpact {
        let groups: Vec<AffectedGroup> = self
            .groups
            .iter()
            .filter(|g| g.member_ids.iter().any(|m| m == member_id))
            .map(|g| AffectedGroup {
                group_id: g.id.clone(),
                group_name: g.name.clone(),
                group_set_ids: self.sets_containing(&g.id).iter().map(|s| s.id.clone()).collect(),
            })
            .collect();

        let assignment_ids = self
            .assignments
            .iter()
            .filter(|a| {
                groups.iter().any(|g| {
                    g.group_set_ids.contains(&a.group_set_id) && a.group_selection.includes(&g.group_id)
                })
            })
            .map(|a| a.id.clone())
            .collect();

        RemovalImpact {
            member_id: member_id.to_string(),
            groups,
            assignment_ids,
        }
    }

    // =========================================================================
    // Groups
    // =========================================================================

    fn group_is_editable(&self, group_id: &str) -> bool {
        self.sets_containing(group_id).iter().all(|s| s.is_editable())
    }

    /// Add a group to an editable group-set
    #[must_use]
    pub fn add_group(&self, set_id: &str, group: Group) -> Self {
        let Some(set) = self.group_set(set_id) else {
            warn!("group-set not found: {}", set_id);
            return self.clone();
        };
        if !set.is_editable() {
            warn!("group-set {} is read-only", set_id);
            return self.clone();
        }
        if self.group(&group.id).is_some() {
            warn!("group already exists: {}", group.id);
            return self.clone();
        }
        let group = Group {
            member_ids: dedup_ids(group.member_ids),
            ..group
        };
        let group_id = group.id.clone();
        let mut groups = (*self.groups).clone();
        groups.push(group);
        self.with_groups(groups).map_group_set(set_id, |s| {
            let mut s = s.clone();
            s.group_ids.push(group_id);
            s
        })
    }

    /// Update a group in an editable group-set
    #[must_use]
    pub fn update_group(&self, id: &str, update: GroupUpdate) -> Self {
        let Some(index) = self.groups.iter().position(|g| g.id == id) else {
            warn!("group not found: {}", id);
            return self.clone();
        };
        if !self.group_is_editable(id) {
            warn!("group {} belongs to a read-only group-set", id);
            return self.clone();
        }
        let mut group = self.groups[index].clone();
        if let Some(name) = update.name {
            group.name = name;
        }
        if let Some(member_ids) = update.member_ids {
            group.member_ids = dedup_ids(member_ids);
        }
        if group == self.groups[index] {
            return self.clone();
        }
        let mut groups = (*self.groups).clone();
        groups[index] = group;
        self.with_groups(groups)
    }

    /// Remove a group from the roster and from every set and exclusion list
    #[must_use]
    pub fn remove_group(&self, id: &str) -> Self {
        if self.group(id).is_none() {
            warn!("group not found: {}", id);
            return self.clone();
        }
        if !self.group_is_editable(id) {
            warn!("group {} belongs to a read-only group-set", id);
            return self.clone();
        }
        let groups: Vec<Group> = self.groups.iter().filter(|g| g.id != id).cloned().collect();
        cascade::drop_group_references(&self.with_groups(groups), id)
    }

    // =========================================================================
    // Group-sets
    // =========================================================================

    /// Add a group-set
    #[must_use]
    pub fn add_group_set(&self, set: GroupSet) -> Self {
        if self.group_set(&set.id).is_some() {
            warn!("group-set already exists: {}", set.id);
            return self.clone();
        }
        if let Some(entry) = set.lms_entry() {
            if let Some((existing, _)) = self.find_lms_entry(&entry.context, &entry.lms_group_set_id) {
                warn!(
                    "LMS group-set {} is already tracked by {}",
                    entry.lms_group_set_id, existing.id
                );
                return self.clone();
            }
        }
        let mut sets = (*self.group_sets).clone();
        sets.push(set);
        self.with_group_sets(sets)
    }

    /// Rename a group-set
    #[must_use]
    pub fn rename_group_set(&self, id: &str, name: &str) -> Self {
        if self.group_set(id).is_none() {
            warn!("group-set not found: {}", id);
            return self.clone();
        }
        self.map_group_set(id, |s| GroupSet {
            name: name.to_string(),
            ..s.clone()
        })
    }

    /// Remove a group-set and the groups only it lists
    ///
    /// Assignments referencing the set keep their (now dangling) reference.
    #[must_use]
    pub fn remove_group_set(&self, id: &str) -> Self {
        if self.group_set(id).is_none() {
            warn!("group-set not found: {}", id);
            return self.clone();
        }
        let emptied = self.replace_group_set_groups(id, Vec::new());
        let sets: Vec<GroupSet> = emptied.group_sets.iter().filter(|s| s.id != id).cloned().collect();
        emptied.with_group_sets(sets)
    }

    // =========================================================================
    // Assignments
    // =========================================================================

    /// Add an assignment
    #[must_use]
    pub fn add_assignment(&self, assignment: Assignment) -> Self {
        if self.assignment(&assignment.id).is_some() {
            warn!("assignment already exists: {}", assignment.id);
            return self.clone();
        }
        let mut assignments = (*self.assignments).clone();
        assignments.push(assignment);
        self.with_assignments(assignments)
    }

    /// Update an assignment
    ///
    /// Exclusions are group IDs scoped to the previous group-set, so with
    /// `clear_exclusions_on_group_set_change` a changed `group_set_id` resets
    /// them to empty.
    #[must_use]
    pub fn update_assignment(&self, id: &str, update: AssignmentUpdate, options: UpdateAssignmentOptions) -> Self {
        let Some(index) = self.assignments.iter().position(|a| a.id == id) else {
            warn!("assignment not found: {}", id);
            return self.clone();
        };
        let before = &self.assignments[index];
        let mut after = before.clone();
        if let Some(name) = update.name {
            after.name = name;
        }
        if let Some(description) = update.description {
            after.description = description;
        }
        if let Some(assignment_type) = update.assignment_type {
            after.assignment_type = assignment_type;
        }
        if let Some(selection) = update.group_selection {
            after.group_selection = selection;
        }
        if let Some(group_set_id) = update.group_set_id {
            after.group_set_id = group_set_id;
        }
        if options.clear_exclusions_on_group_set_change && after.group_set_id != before.group_set_id {
            after.group_selection = after.group_selection.cleared();
        }
        if after == *before {
            return self.clone();
        }
        let mut assignments = (*self.assignments).clone();
        assignments[index] = after;
        self.with_assignments(assignments)
    }

    /// Remove an assignment
    #[must_use]
    pub fn remove_assignment(&self, id: &str) -> Self {
        if self.assignment(id).is_none() {
            warn!("assignment not found: {}", id);
            return self.clone();
        }
        let assignments = self.assignments.iter().filter(|a| a.id != id).cloned().collect();
        self.with_assignments(assignments)
    }
}
