// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! File-driven group import and reimport
//!
//! Group files are delimited tables (comma, tab or semicolon) with a header
//! row. Each row is one membership; a row whose member cells are all blank
//! declares an empty group.
//!
//! ```text
//! group_name,group_id,email
//! Team 1,t1,alice@uni.edu
//! Team 1,t1,bob@uni.edu
//! Team 2,t2,
//! ```

use crate::error::ReimportError;
use crate::resolution::MemberIndex;
use crate::types::{dedup_ids, Group, GroupOrigin, GroupSelection, GroupSet, GroupSetConnection, Roster};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const GROUP_NAME_COLUMNS: &[&str] = &["group_name", "group"];
const GROUP_ID_COLUMN: &str = "group_id";
const MEMBER_ID_COLUMNS: &[&str] = &["member_id", "student_id"];
const EMAIL_COLUMNS: &[&str] = &["email"];
const LMS_USER_ID_COLUMNS: &[&str] = &["lms_user_id"];

/// How imported groups were matched to existing ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Every row carried a group ID
    Id,
    /// Fallback: by exact group name
    Name,
}

/// A group as read from a file, members already resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedGroup {
    /// Group ID column, if present on the rows
    pub group_id: Option<String>,
    /// Group name
    pub name: String,
    /// Resolved roster member IDs
    pub member_ids: Vec<String>,
    /// Rows naming a member that is not on the roster
    pub missing: usize,
}

/// All groups of one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedGroups {
    /// Groups in first-appearance order
    pub groups: Vec<ImportedGroup>,
    /// How the groups should be matched
    pub match_mode: MatchMode,
}

impl ImportedGroups {
    /// Total rows naming an unknown member
    #[must_use]
    pub fn total_missing(&self) -> usize {
        self.groups.iter().map(|g| g.missing).sum()
    }

    fn key<'a>(&self, group: &'a ImportedGroup) -> &'a str {
        match (self.match_mode, &group.group_id) {
            (MatchMode::Id, Some(id)) => id,
            _ => &group.name,
        }
    }
}

/// What a reimport would change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReimportDiff {
    /// Groups only in the file
    pub added_group_names: Vec<String>,
    /// Groups only in the set
    pub removed_group_names: Vec<String>,
    /// Matched groups whose name or members differ
    pub updated_group_names: Vec<String>,
    /// Rows naming a member that is not on the roster
    pub total_missing: usize,
    /// Matching mode used
    pub matched_by: MatchMode,
}

impl ReimportDiff {
    /// Whether applying would change nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added_group_names.is_empty() && self.removed_group_names.is_empty() && self.updated_group_names.is_empty()
    }
}

/// Replacement group collection for one set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSetPatch {
    /// Target set
    pub group_set_id: String,
    /// The set's complete new group collection
    pub groups: Vec<Group>,
    /// File the groups came from
    pub source_path: PathBuf,
    /// When the file was read
    pub imported_at: DateTime<Utc>,
}

// =============================================================================
// File parsing
// =============================================================================

fn detect_delimiter(header: &str) -> char {
    [',', '\t', ';']
        .into_iter()
        .max_by_key(|d| header.matches(*d).count())
        .filter(|d| header.contains(*d))
        .unwrap_or(',')
}

fn split_record(line: &str, delimiter: char) -> Option<Vec<String>> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            c if c == delimiter && !in_quotes => fields.push(std::mem::take(&mut field)),
            c => field.push(c),
        }
    }
    if in_quotes {
        return None;
    }
    fields.push(field);
    Some(fields)
}

struct Columns {
    group_name: usize,
    group_id: Option<usize>,
    members: Vec<usize>,
}

impl Columns {
    fn find(path: &Path, header: &[String]) -> Result<Self, ReimportError> {
        let normalized: Vec<String> = header.iter().map(|h| h.trim().to_lowercase()).collect();
        let position = |names: &[&str]| normalized.iter().position(|h| names.contains(&h.as_str()));
        let group_name = position(GROUP_NAME_COLUMNS).ok_or_else(|| ReimportError::MissingColumn {
            path: path.to_path_buf(),
            column: "group_name",
        })?;
        let members: Vec<usize> = [MEMBER_ID_COLUMNS, EMAIL_COLUMNS, LMS_USER_ID_COLUMNS]
            .into_iter()
            .filter_map(|names| position(names))
            .collect();
        if members.is_empty() {
            return Err(ReimportError::NoMemberColumn { path: path.to_path_buf() });
        }
        Ok(Self {
            group_name,
            group_id: position(&[GROUP_ID_COLUMN]),
            members,
        })
    }
}

fn cell(record: &[String], index: usize) -> Option<&str> {
    record.get(index).map(|s| s.trim()).filter(|s| !s.is_empty())
}

/// Read a group file and resolve its members against the roster
///
/// # Errors
///
/// Fails on unreadable files, malformed rows or missing columns.
pub fn read_groups(roster: &Roster, path: &Path) -> Result<ImportedGroups, ReimportError> {
    let content = fs::read_to_string(path).map_err(|source| ReimportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_groups(roster, path, &content)
}

/// Parse group file content already read from `path`
///
/// # Errors
///
/// Fails on malformed rows or missing columns.
pub fn parse_groups(roster: &Roster, path: &Path, content: &str) -> Result<ImportedGroups, ReimportError> {
    let mut lines = content
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim_end_matches('\r')))
        .filter(|(_, l)| !l.trim().is_empty());
    let parse_error = |line: usize, message: &str| ReimportError::Parse {
        path: path.to_path_buf(),
        line,
        message: message.to_string(),
    };

    let Some((header_line, header)) = lines.next() else {
        return Err(ReimportError::MissingColumn {
            path: path.to_path_buf(),
            column: "group_name",
        });
    };
    let delimiter = detect_delimiter(header);
    let header = split_record(header, delimiter).ok_or_else(|| parse_error(header_line, "unterminated quote"))?;
    let columns = Columns::find(path, &header)?;

    let index = MemberIndex::new(roster);
    let mut groups: Vec<ImportedGroup> = Vec::new();
    let mut by_key: HashMap<(Option<String>, String), usize> = HashMap::new();
    let mut every_row_has_id = true;

    for (line, raw) in lines {
        let record = split_record(raw, delimiter).ok_or_else(|| parse_error(line, "unterminated quote"))?;
        let name = cell(&record, columns.group_name)
            .ok_or_else(|| parse_error(line, "empty group name"))?
            .to_string();
        let group_id = columns.group_id.and_then(|i| cell(&record, i)).map(String::from);
        every_row_has_id &= group_id.is_some();

        let slot = *by_key.entry((group_id.clone(), name.clone())).or_insert_with(|| {
            groups.push(ImportedGroup {
                group_id,
                name,
                member_ids: Vec::new(),
                missing: 0,
            });
            groups.len() - 1
        });

        let identifiers: Vec<&str> = columns.members.iter().filter_map(|i| cell(&record, *i)).collect();
        if identifiers.is_empty() {
            continue;
        }
        match identifiers.iter().find_map(|raw| index.lookup(raw)) {
            Some(member_id) => groups[slot].member_ids.push(member_id.to_string()),
            None => groups[slot].missing += 1,
        }
    }

    let match_mode = if every_row_has_id && !groups.is_empty() {
        MatchMode::Id
    } else {
        MatchMode::Name
    };
    let groups = merge_by_mode(groups, match_mode);
    debug!("read {} groups from {} (match by {:?})", groups.len(), path.display(), match_mode);
    Ok(ImportedGroups { groups, match_mode })
}

/// Collapse groups sharing a match key; members are deduplicated
fn merge_by_mode(groups: Vec<ImportedGroup>, match_mode: MatchMode) -> Vec<ImportedGroup> {
    let mut merged: Vec<ImportedGroup> = Vec::with_capacity(groups.len());
    for group in groups {
        let same = |g: &ImportedGroup| match match_mode {
            MatchMode::Id => g.group_id == group.group_id,
            MatchMode::Name => g.name == group.name,
        };
        if let Some(existing) = merged.iter_mut().find(|g| same(g)) {
            existing.member_ids.extend(group.member_ids);
            existing.missing += group.missing;
        } else {
            merged.push(group);
        }
    }
    for group in &mut merged {
        group.member_ids = dedup_ids(std::mem::take(&mut group.member_ids));
    }
    merged
}

// =============================================================================
// Preview and apply
// =============================================================================

fn editable_target<'a>(roster: &'a Roster, target_id: &str) -> Result<&'a GroupSet, ReimportError> {
    let set = roster
        .group_set(target_id)
        .ok_or_else(|| ReimportError::NotFound(target_id.to_string()))?;
    if set.is_editable() {
        Ok(set)
    } else {
        Err(ReimportError::NotEditable(target_id.to_string()))
    }
}

/// Existing group of the set matched by each imported group
fn match_groups<'a>(roster: &'a Roster, target_id: &str, imported: &ImportedGroups) -> Vec<Option<&'a Group>> {
    let existing = roster.groups_in_set(target_id);
    imported
        .groups
        .iter()
        .map(|g| {
            let key = imported.key(g);
            existing
                .iter()
                .find(|e| match imported.match_mode {
                    MatchMode::Id => e.id == key || e.id == Group::generate_id(target_id, key),
                    MatchMode::Name => e.name == key,
                })
                .copied()
        })
        .collect()
}

/// ID for a file group with no existing match
///
/// Under ID matching the file's own group ID is kept unless another group
/// already uses it, so the same file matches again on the next reimport.
fn new_group_id(roster: &Roster, set_id: &str, imported: &ImportedGroups, group: &ImportedGroup) -> String {
    let key = imported.key(group);
    if imported.match_mode == MatchMode::Id && roster.group(key).is_none() {
        key.to_string()
    } else {
        Group::generate_id(set_id, key)
    }
}

fn same_members(a: &[String], b: &[String]) -> bool {
    a.iter().collect::<HashSet<_>>() == b.iter().collect::<HashSet<_>>()
}

fn diff(roster: &Roster, target_id: &str, imported: &ImportedGroups) -> ReimportDiff {
    let matches = match_groups(roster, target_id, imported);
    let matched_ids: HashSet<&str> = matches.iter().flatten().map(|g| g.id.as_str()).collect();

    let mut added_group_names = Vec::new();
    let mut updated_group_names = Vec::new();
    for (group, existing) in imported.groups.iter().zip(&matches) {
        match existing {
            None => added_group_names.push(group.name.clone()),
            Some(e) if e.name != group.name || !same_members(&e.member_ids, &group.member_ids) => {
                updated_group_names.push(group.name.clone());
            }
            Some(_) => {}
        }
    }
    let removed_group_names = roster
        .groups_in_set(target_id)
        .into_iter()
        .filter(|g| !matched_ids.contains(g.id.as_str()))
        .map(|g| g.name.clone())
        .collect();

    ReimportDiff {
        added_group_names,
        removed_group_names,
        updated_group_names,
        total_missing: imported.total_missing(),
        matched_by: imported.match_mode,
    }
}

/// Compute what reimporting `path` into a set would change
///
/// Under name matching a renamed group shows up as one removal and one
/// addition.
///
/// # Errors
///
/// Fails if the target is missing or not editable, or the file is invalid.
pub fn preview_reimport(roster: &Roster, target_id: &str, path: &Path) -> Result<ReimportDiff, ReimportError> {
    editable_target(roster, target_id)?;
    let imported = read_groups(roster, path)?;
    Ok(diff(roster, target_id, &imported))
}

/// Build the patch that reimports `path` into a set
///
/// Matched groups keep their IDs; unmatched file groups get new IDs.
///
/// # Errors
///
/// Fails if the target is missing or not editable, or the file is invalid.
pub fn apply_reimport(roster: &Roster, target_id: &str, path: &Path) -> Result<GroupSetPatch, ReimportError> {
    editable_target(roster, target_id)?;
    let imported = read_groups(roster, path)?;
    Ok(build_patch(roster, target_id, path, &imported))
}

/// [`apply_reimport`] over file content that was read earlier
///
/// # Errors
///
/// Fails if the target is missing or not editable, or the content is invalid.
pub fn apply_reimport_content(
    roster: &Roster,
    target_id: &str,
    path: &Path,
    content: &str,
) -> Result<GroupSetPatch, ReimportError> {
    editable_target(roster, target_id)?;
    let imported = parse_groups(roster, path, content)?;
    Ok(build_patch(roster, target_id, path, &imported))
}

fn build_patch(roster: &Roster, target_id: &str, path: &Path, imported: &ImportedGroups) -> GroupSetPatch {
    let matches = match_groups(roster, target_id, imported);
    let groups = imported
        .groups
        .iter()
        .zip(matches)
        .map(|(group, existing)| Group {
            id: existing.map_or_else(|| new_group_id(roster, target_id, imported, group), |e| e.id.clone()),
            name: group.name.clone(),
            member_ids: group.member_ids.clone(),
            origin: existing.map_or(GroupOrigin::Local, |e| e.origin),
        })
        .collect();
    GroupSetPatch {
        group_set_id: target_id.to_string(),
        groups,
        source_path: path.to_path_buf(),
        imported_at: Utc::now(),
    }
}

fn import_set_id(name: &str, path: &Path, imported_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(path.to_string_lossy().as_bytes());
    hasher.update(imported_at.to_rfc3339().as_bytes());
    format!("groupset:import:{}", hex::encode(&hasher.finalize()[..6]))
}

/// Create a new group-set from a group file
///
/// # Errors
///
/// Fails if the file is invalid.
pub fn import_group_set(roster: &Roster, name: &str, path: &Path) -> Result<Roster, ReimportError> {
    let imported = read_groups(roster, path)?;
    let imported_at = Utc::now();
    let set_id = import_set_id(name, path, imported_at);
    let groups: Vec<Group> = imported
        .groups
        .iter()
        .map(|g| Group {
            id: new_group_id(roster, &set_id, &imported, g),
            name: g.name.clone(),
            member_ids: g.member_ids.clone(),
            origin: GroupOrigin::Local,
        })
        .collect();
    info!("imported {} groups into new set {}", groups.len(), name);
    Ok(roster
        .add_group_set(GroupSet {
            id: set_id.clone(),
            name: name.to_string(),
            group_ids: Vec::new(),
            connection: Some(GroupSetConnection::Import {
                source_path: path.to_path_buf(),
                imported_at,
            }),
            group_selection: GroupSelection::All,
        })
        .replace_group_set_groups(&set_id, groups))
}

impl Roster {
    /// Replace one editable set's groups with a reimport patch
    ///
    /// Nothing outside that set changes, except that dropped groups lose their
    /// exclusion entries. An `Import` connection records the new source and
    /// time.
    #[must_use]
    pub fn apply_group_set_patch(&self, patch: GroupSetPatch) -> Self {
        let Some(set) = self.group_set(&patch.group_set_id) else {
            warn!("group-set not found: {}", patch.group_set_id);
            return self.clone();
        };
        if !set.is_editable() {
            warn!("group-set {} is read-only", patch.group_set_id);
            return self.clone();
        }
        let restamped = match &set.connection {
            Some(GroupSetConnection::Import { .. }) => self.map_group_set(&patch.group_set_id, |s| GroupSet {
                connection: Some(GroupSetConnection::Import {
                    source_path: patch.source_path.clone(),
                    imported_at: patch.imported_at,
                }),
                ..s.clone()
            }),
            _ => self.clone(),
        };
        info!("reimported {} groups into {}", patch.groups.len(), patch.group_set_id);
        restamped.replace_group_set_groups(&patch.group_set_id, patch.groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RosterMember;
    use tempfile::TempDir;

    fn roster() -> Roster {
        let mut alice = RosterMember::student("Alice", "alice@uni.edu");
        alice.id = "member:alice".into();
        let mut bob = RosterMember::student("Bob", "bob@uni.edu");
        bob.id = "member:bob".into();
        Roster::new()
            .add_member(alice)
            .add_member(bob)
            .add_group_set(GroupSet::local("groupset:local", "Teams"))
            .add_group("groupset:local", Group::local("group:t1", "Team 1", vec!["member:alice".into()]))
            .add_group("groupset:local", Group::local("group:t2", "Team 2", vec!["member:bob".into()]))
    }

    fn write(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("groups.csv");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_split_record_quotes() {
        let fields = split_record(r#""Team, A","say ""hi""",x"#, ',').unwrap();
        assert_eq!(fields, vec!["Team, A", r#"say "hi""#, "x"]);
        assert!(split_record(r#""open"#, ',').is_none());
    }

    #[test]
    fn test_delimiter_detection() {
        assert_eq!(detect_delimiter("group_name\temail"), '\t');
        assert_eq!(detect_delimiter("group_name;email"), ';');
        assert_eq!(detect_delimiter("group_name"), ',');
    }

    #[test]
    fn test_read_groups_empty_group_and_missing() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "Group,Email\nTeam 1,alice@uni.edu\nTeam 1,ghost@uni.edu\nTeam 3,\n");
        let imported = read_groups(&roster(), &path).unwrap();
        assert_eq!(imported.match_mode, MatchMode::Name);
        assert_eq!(imported.groups.len(), 2);
        assert_eq!(imported.groups[0].member_ids, vec!["member:alice"]);
        assert!(imported.groups[1].member_ids.is_empty());
        assert_eq!(imported.total_missing(), 1);
    }

    #[test]
    fn test_missing_columns() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "email\nalice@uni.edu\n");
        assert!(matches!(read_groups(&roster(), &path), Err(ReimportError::MissingColumn { .. })));
        let path = write(&dir, "group_name,notes\nTeam 1,x\n");
        assert!(matches!(read_groups(&roster(), &path), Err(ReimportError::NoMemberColumn { .. })));
    }

    #[test]
    fn test_rename_is_remove_plus_add_by_name() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "group_name,member_id\nTeam 1,member:alice\nTeam Two,member:bob\n");
        let diff = preview_reimport(&roster(), "groupset:local", &path).unwrap();
        assert_eq!(diff.matched_by, MatchMode::Name);
        assert_eq!(diff.added_group_names, vec!["Team Two"]);
        assert_eq!(diff.removed_group_names, vec!["Team 2"]);
        assert!(diff.updated_group_names.is_empty());
    }

    #[test]
    fn test_rename_is_update_by_id() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "group_id,group_name,member_id\ngroup:t1,Team 1,member:alice\ngroup:t2,Team Two,member:bob\n",
        );
        let diff = preview_reimport(&roster(), "groupset:local", &path).unwrap();
        assert_eq!(diff.matched_by, MatchMode::Id);
        assert_eq!(diff.updated_group_names, vec!["Team Two"]);
        assert!(diff.added_group_names.is_empty() && diff.removed_group_names.is_empty());
    }

    #[test]
    fn test_reapplying_id_keyed_file_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "group_id,group_name,member_id\nteam-1,Team 1,member:alice\nteam-2,Team 2,member:bob\n",
        );
        let roster = roster();
        let once = roster.apply_group_set_patch(apply_reimport(&roster, "groupset:local", &path).unwrap());
        let ids: Vec<&str> = once.groups_in_set("groupset:local").iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["team-1", "team-2"]);

        let diff = preview_reimport(&once, "groupset:local", &path).unwrap();
        assert_eq!(diff.matched_by, MatchMode::Id);
        assert!(diff.is_empty(), "unexpected diff: {diff:?}");
        let twice = once.apply_group_set_patch(apply_reimport(&once, "groupset:local", &path).unwrap());
        assert_eq!(twice.groups, once.groups);
    }

    #[test]
    fn test_file_id_taken_elsewhere_gets_generated_id() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "group_id,group_name,member_id\ngroup:t1,Team 1,member:alice\n");
        let roster = roster().add_group_set(GroupSet::local("groupset:other", "Other"));
        let next = roster.apply_group_set_patch(apply_reimport(&roster, "groupset:other", &path).unwrap());
        let groups = next.groups_in_set("groupset:other");
        assert_eq!(groups[0].id, Group::generate_id("groupset:other", "group:t1"));
        assert_eq!(next.groups_in_set("groupset:local").len(), 2);
        assert!(preview_reimport(&next, "groupset:other", &path).unwrap().is_empty());
    }

    #[test]
    fn test_apply_keeps_matched_ids() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "group_name;email\nTeam 1;alice@uni.edu\nTeam 1;bob@uni.edu\n");
        let roster = roster();
        let patch = apply_reimport(&roster, "groupset:local", &path).unwrap();
        let next = roster.apply_group_set_patch(patch);
        let groups = next.groups_in_set("groupset:local");
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].id, "group:t1");
        assert_eq!(groups[0].member_ids, vec!["member:alice", "member:bob"]);
        assert!(next.group("group:t2").is_none());
        assert_eq!(next.members, roster.members);
    }

    #[test]
    fn test_reimport_rejects_read_only_targets() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "group_name,email\nTeam 1,alice@uni.edu\n");
        let roster = roster().ensure_system_group_sets();
        let system = crate::types::SystemSetType::Staff.group_set_id();
        assert!(matches!(
            preview_reimport(&roster, system, &path),
            Err(ReimportError::NotEditable(_))
        ));
        assert!(matches!(
            apply_reimport(&roster, "nope", &path),
            Err(ReimportError::NotFound(_))
        ));
    }

    #[test]
    fn test_import_group_set() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "group,lms_user_id,email\nLab A,,alice@uni.edu\nLab B,,bob@uni.edu\n");
        let roster = import_group_set(&roster(), "Labs", &path).unwrap();
        let set = roster.group_sets.iter().find(|s| s.name == "Labs").unwrap();
        assert!(matches!(set.connection, Some(GroupSetConnection::Import { .. })));
        assert!(set.is_editable());
        assert_eq!(roster.groups_in_set(&set.id).len(), 2);
    }
}
