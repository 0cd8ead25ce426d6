// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Validation engine - derives integrity issues from a roster snapshot
//!
//! Checks are pure and independent of each other. Roster-scope checks look at
//! identity fields across all members; assignment-scope checks look at the
//! groups one assignment would provision. Issues come back grouped by
//! [`IssueKind`] in declaration order, with affected IDs in the order the
//! entities appear in their collections.

use crate::types::{
    Assignment, AssignmentType, CacheState, GitUsernameStatus, Group, IssueKind, Roster, ValidationIssue,
};
use std::collections::{HashMap, HashSet};

/// Run every roster-scope and assignment-scope check
#[must_use]
pub fn validate(roster: &Roster) -> Vec<ValidationIssue> {
    let mut issues = validate_roster(roster);
    for assignment in roster.assignments.iter() {
        issues.extend(validate_assignment(roster, &assignment.id));
    }
    sort_issues(&mut issues);
    issues
}

/// Stable sort by kind, keeping discovery order within a kind
pub fn sort_issues(issues: &mut [ValidationIssue]) {
    issues.sort_by_key(|issue| issue.kind);
}

/// Checks that span the whole roster
#[must_use]
pub fn validate_roster(roster: &Roster) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    issues.extend(
        duplicates(roster.members.iter().map(|m| (m.id.clone(), m.id.clone())))
            .into_iter()
            .map(|ids| roster_issue(IssueKind::DuplicateMemberId, ids)),
    );

    issues.extend(
        duplicates(
            roster
                .members
                .iter()
                .filter(|m| !m.email.trim().is_empty())
                .map(|m| (m.email.trim().to_lowercase(), m.id.clone())),
        )
        .into_iter()
        .map(|ids| roster_issue(IssueKind::DuplicateEmail, ids)),
    );

    let invalid_email: Vec<String> = roster
        .members
        .iter()
        .filter(|m| !m.email.trim().is_empty() && !is_valid_email(&m.email))
        .map(|m| m.id.clone())
        .collect();
    push_if_any(&mut issues, IssueKind::InvalidEmail, invalid_email);

    let missing_email: Vec<String> = roster
        .members
        .iter()
        .filter(|m| m.email.trim().is_empty())
        .map(|m| m.id.clone())
        .collect();
    push_if_any(&mut issues, IssueKind::MissingEmail, missing_email);

    issues.extend(
        duplicates(
            roster
                .assignments
                .iter()
                .map(|a| (a.name.trim().to_lowercase(), a.id.clone())),
        )
        .into_iter()
        .map(|ids| roster_issue(IssueKind::DuplicateAssignmentName, ids)),
    );

    let missing_git: Vec<String> = roster
        .members
        .iter()
        .filter(|m| m.is_active_student())
        .filter(|m| m.git_username.as_deref().map_or(true, |u| u.trim().is_empty()))
        .map(|m| m.id.clone())
        .collect();
    push_if_any(&mut issues, IssueKind::MissingGitUsername, missing_git);

    let invalid_git: Vec<String> = roster
        .members
        .iter()
        .filter(|m| m.is_active_student())
        .filter(|m| m.git_username.is_some() && m.git_username_status == GitUsernameStatus::Invalid)
        .map(|m| m.id.clone())
        .collect();
    push_if_any(&mut issues, IssueKind::InvalidGitUsername, invalid_git);

    let pending: Vec<String> = roster
        .group_sets
        .iter()
        .filter_map(|s| match s.lms_entry().map(|e| &e.state) {
            Some(CacheState::Linked { groups, .. }) => Some(groups),
            _ => None,
        })
        .flatten()
        .filter(|g| g.needs_reresolution)
        .map(|g| g.id.clone())
        .collect();
    push_if_any(&mut issues, IssueKind::PendingReresolution, pending);

    sort_issues(&mut issues);
    issues
}

/// Checks over the groups one assignment would provision
///
/// Unknown assignments and assignments whose group-set is missing yield no
/// issues.
#[must_use]
pub fn validate_assignment(roster: &Roster, assignment_id: &str) -> Vec<ValidationIssue> {
    let Some(assignment) = roster.assignment(assignment_id) else {
        return Vec::new();
    };
    let Some(set) = roster.group_set(&assignment.group_set_id) else {
        return Vec::new();
    };
    let groups: Vec<&Group> = set
        .group_ids
        .iter()
        .filter(|id| assignment.group_selection.includes(id))
        .filter_map(|id| roster.group(id))
        .collect();

    let mut issues = Vec::new();
    let scoped = |kind: IssueKind, ids: Vec<String>| ValidationIssue {
        kind,
        affected_ids: ids,
        assignment_id: Some(assignment.id.clone()),
    };

    issues.extend(
        duplicates(
            set.group_ids
                .iter()
                .filter(|id| assignment.group_selection.includes(id))
                .map(|id| (id.clone(), id.clone())),
        )
        .into_iter()
        .map(|ids| scoped(IssueKind::DuplicateGroupId, ids)),
    );
    issues.extend(
        duplicates(groups.iter().map(|g| (g.name.trim().to_lowercase(), g.id.clone())))
            .into_iter()
            .map(|ids| scoped(IssueKind::DuplicateGroupName, ids)),
    );
    issues.extend(
        duplicates(groups.iter().map(|g| (repo_name(assignment, g), g.id.clone())))
            .into_iter()
            .map(|ids| scoped(IssueKind::DuplicateRepoName, ids)),
    );

    let mut membership: HashMap<&str, usize> = HashMap::new();
    for group in &groups {
        for member_id in &group.member_ids {
            *membership.entry(member_id.as_str()).or_insert(0) += 1;
        }
    }
    let multi: Vec<String> = ordered_member_ids(&groups)
        .into_iter()
        .filter(|id| membership.get(id.as_str()).copied().unwrap_or(0) > 1)
        .collect();
    if !multi.is_empty() {
        issues.push(scoped(IssueKind::MemberInMultipleGroups, multi));
    }

    let known: HashSet<&str> = roster.members.iter().map(|m| m.id.as_str()).collect();
    let orphans: Vec<String> = ordered_member_ids(&groups)
        .into_iter()
        .filter(|id| !known.contains(id.as_str()))
        .collect();
    if !orphans.is_empty() {
        issues.push(scoped(IssueKind::OrphanGroupMember, orphans));
    }

    let empty: Vec<String> = groups
        .iter()
        .filter(|g| g.member_ids.is_empty())
        .map(|g| g.id.clone())
        .collect();
    if !empty.is_empty() {
        issues.push(scoped(IssueKind::EmptyGroup, empty));
    }

    if assignment.assignment_type == AssignmentType::ClassWide {
        let unassigned: Vec<String> = roster
            .members
            .iter()
            .filter(|m| m.is_active_student())
            .filter(|m| !membership.contains_key(m.id.as_str()))
            .map(|m| m.id.clone())
            .collect();
        if !unassigned.is_empty() {
            issues.push(scoped(IssueKind::UnassignedStudent, unassigned));
        }
    }

    sort_issues(&mut issues);
    issues
}

/// Repository name an assignment would create for a group
#[must_use]
pub fn repo_name(assignment: &Assignment, group: &Group) -> String {
    format!("{}-{}", slug(&assignment.name), slug(&group.name))
}

/// Lowercase, alphanumeric-and-dash form of a name
#[must_use]
pub fn slug(name: &str) -> String {
    let dashed: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();
    dashed
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Shape check: one `@`, non-empty local part, dotted domain, no whitespace
#[must_use]
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let mut parts = email.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains("..")
}

fn roster_issue(kind: IssueKind, affected_ids: Vec<String>) -> ValidationIssue {
    ValidationIssue {
        kind,
        affected_ids,
        assignment_id: None,
    }
}

fn push_if_any(issues: &mut Vec<ValidationIssue>, kind: IssueKind, ids: Vec<String>) {
    if !ids.is_empty() {
        issues.push(roster_issue(kind, ids));
    }
}

/// Group `(key, id)` pairs by key; return the ID lists of keys seen twice
///
/// Lists are ordered by first appearance of the key, IDs by appearance.
fn duplicates(pairs: impl Iterator<Item = (String, String)>) -> Vec<Vec<String>> {
    let mut order: Vec<String> = Vec::new();
    let mut buckets: HashMap<String, Vec<String>> = HashMap::new();
    for (key, id) in pairs {
        let bucket = buckets.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            Vec::new()
        });
        bucket.push(id);
    }
    order
        .into_iter()
        .filter_map(|key| buckets.remove(&key))
        .filter(|ids| ids.len() > 1)
        .collect()
}

/// Distinct member IDs across groups, in group order
fn ordered_member_ids(groups: &[&Group]) -> Vec<String> {
    let mut seen = HashSet::new();
    groups
        .iter()
        .flat_map(|g| g.member_ids.iter())
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EnrollmentType, GroupSelection, GroupSet, MemberStatus, RosterMember};

    fn member(id: &str, email: &str, git: Option<&str>) -> RosterMember {
        RosterMember {
            id: id.into(),
            git_username: git.map(String::from),
            ..RosterMember::student(id, email)
        }
    }

    fn assignment(id: &str, name: &str, set: &str, kind: AssignmentType) -> Assignment {
        Assignment {
            id: id.into(),
            name: name.into(),
            description: None,
            assignment_type: kind,
            group_set_id: set.into(),
            group_selection: GroupSelection::All,
        }
    }

    fn kinds(issues: &[ValidationIssue]) -> Vec<IssueKind> {
        issues.iter().map(|i| i.kind).collect()
    }

    #[test]
    fn test_clean_roster_has_no_issues() {
        let roster = Roster::new()
            .add_member(member("member:a", "a@uni.edu", Some("alice")))
            .add_group_set(GroupSet::local("groupset:t", "Teams"))
            .add_group("groupset:t", Group::local("group:1", "Team 1", vec!["member:a".into()]))
            .add_assignment(assignment("assignment:1", "HW1", "groupset:t", AssignmentType::ClassWide));
        assert!(validate(&roster).is_empty());
    }

    #[test]
    fn test_email_checks() {
        let roster = Roster::new()
            .add_member(member("member:a", "A@uni.edu", Some("a")))
            .add_member(member("member:b", "not-an-email", Some("b")))
            .add_member(member("member:c", "a@UNI.edu", Some("c")))
            .add_member(member("member:d", "  ", Some("d")));
        let issues = validate(&roster);
        assert_eq!(
            kinds(&issues),
            vec![IssueKind::DuplicateEmail, IssueKind::InvalidEmail, IssueKind::MissingEmail]
        );
        assert_eq!(issues[0].affected_ids, vec!["member:a", "member:c"]);
        assert_eq!(issues[1].affected_ids, vec!["member:b"]);
        assert_eq!(issues[2].affected_ids, vec!["member:d"]);
    }

    #[test]
    fn test_git_username_checks_skip_inactive_and_staff() {
        let mut dropped = member("member:d", "d@uni.edu", None);
        dropped.status = MemberStatus::Dropped;
        let mut staff = member("member:s", "s@uni.edu", None);
        staff.enrollment_type = EnrollmentType::Staff;
        let mut invalid = member("member:i", "i@uni.edu", Some("ghost"));
        invalid.git_username_status = GitUsernameStatus::Invalid;
        let roster = Roster::new()
            .add_member(member("member:m", "m@uni.edu", None))
            .add_member(dropped)
            .add_member(staff)
            .add_member(invalid);
        let issues = validate_roster(&roster);
        assert_eq!(kinds(&issues), vec![IssueKind::MissingGitUsername, IssueKind::InvalidGitUsername]);
        assert_eq!(issues[0].affected_ids, vec!["member:m"]);
        assert_eq!(issues[1].affected_ids, vec!["member:i"]);
    }

    #[test]
    fn test_assignment_checks() {
        let roster = Roster::new()
            .add_member(member("member:a", "a@uni.edu", Some("a")))
            .add_member(member("member:b", "b@uni.edu", Some("b")))
            .add_member(member("member:c", "c@uni.edu", Some("c")))
            .add_group_set(GroupSet::local("groupset:t", "Teams"))
            .add_group("groupset:t", Group::local("group:1", "Team A", vec!["member:a".into(), "member:x".into()]))
            .add_group("groupset:t", Group::local("group:2", "team-a", vec!["member:a".into()]))
            .add_group("groupset:t", Group::local("group:3", "Empty", vec![]))
            .add_assignment(assignment("assignment:1", "HW 1", "groupset:t", AssignmentType::ClassWide));
        let issues = validate_assignment(&roster, "assignment:1");
        assert_eq!(
            kinds(&issues),
            vec![
                IssueKind::DuplicateRepoName,
                IssueKind::MemberInMultipleGroups,
                IssueKind::OrphanGroupMember,
                IssueKind::EmptyGroup,
                IssueKind::UnassignedStudent,
            ]
        );
        assert_eq!(issues[0].affected_ids, vec!["group:1", "group:2"]);
        assert_eq!(issues[1].affected_ids, vec!["member:a"]);
        assert_eq!(issues[2].affected_ids, vec!["member:x"]);
        assert_eq!(issues[3].affected_ids, vec!["group:3"]);
        assert_eq!(issues[4].affected_ids, vec!["member:b", "member:c"]);
        assert!(issues.iter().all(|i| i.assignment_id.as_deref() == Some("assignment:1")));
    }

    #[test]
    fn test_excluded_groups_are_ignored() {
        let roster = Roster::new()
            .add_member(member("member:a", "a@uni.edu", Some("a")))
            .add_group_set(GroupSet::local("groupset:t", "Teams"))
            .add_group("groupset:t", Group::local("group:1", "Team", vec!["member:a".into()]))
            .add_group("groupset:t", Group::local("group:2", "Empty", vec![]))
            .add_assignment(Assignment {
                group_selection: GroupSelection::Selected {
                    excluded_group_ids: vec!["group:2".into()],
                },
                ..assignment("assignment:1", "HW", "groupset:t", AssignmentType::Selective)
            });
        assert!(validate_assignment(&roster, "assignment:1").is_empty());
    }

    #[test]
    fn test_selective_assignment_skips_coverage() {
        let roster = Roster::new()
            .add_member(member("member:a", "a@uni.edu", Some("a")))
            .add_group_set(GroupSet::local("groupset:t", "Teams"))
            .add_assignment(assignment("assignment:1", "HW", "groupset:t", AssignmentType::Selective));
        assert!(validate_assignment(&roster, "assignment:1").is_empty());
    }

    #[test]
    fn test_duplicate_assignment_names() {
        let roster = Roster::new()
            .add_assignment(assignment("assignment:1", "Lab 1", "groupset:x", AssignmentType::Selective))
            .add_assignment(assignment("assignment:2", " lab 1", "groupset:x", AssignmentType::Selective));
        let issues = validate(&roster);
        assert_eq!(kinds(&issues), vec![IssueKind::DuplicateAssignmentName]);
        assert_eq!(issues[0].affected_ids, vec!["assignment:1", "assignment:2"]);
    }

    #[test]
    fn test_validation_is_deterministic() {
        let roster = Roster::new()
            .add_member(member("member:a", "dup@uni.edu", None))
            .add_member(member("member:b", "dup@uni.edu", None));
        assert_eq!(validate(&roster), validate(&roster));
    }

    #[test]
    fn test_slug_and_email_shape() {
        assert_eq!(slug("Team  A!"), "team-a");
        assert_eq!(slug("--x--"), "x");
        assert!(is_valid_email("a.b@uni.edu"));
        assert!(!is_valid_email("a@b@uni.edu"));
        assert!(!is_valid_email("@uni.edu"));
        assert!(!is_valid_email("a@localhost"));
        assert!(!is_valid_email("a b@uni.edu"));
    }
}
