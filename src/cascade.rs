// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Cascade rules - follow-on edits that keep dependent entities consistent
//!
//! The roster store calls these after its primary change. Each takes the
//! document produced so far and returns the next one, copying only the
//! collections it actually changes.

use crate::types::{
    CacheState, CachedLmsGroup, EnrollmentType, GroupSelection, GroupSet, GroupSetConnection, Group,
    GroupOrigin, LmsGroupSetCacheEntry, MemberStatus, Roster, RosterMember, SystemSetType,
};
use tracing::debug;

/// Strip a member ID from every group
#[must_use]
pub fn strip_member(roster: &Roster, member_id: &str) -> Roster {
    if !roster.groups.iter().any(|g| g.member_ids.iter().any(|m| m == member_id)) {
        return roster.clone();
    }
    let groups = roster
        .groups
        .iter()
        .map(|g| {
            let mut g = g.clone();
            g.member_ids.retain(|m| m != member_id);
            g
        })
        .collect();
    roster.with_groups(groups)
}

/// Remove a group ID from every set and every exclusion list
#[must_use]
pub fn drop_group_references(roster: &Roster, group_id: &str) -> Roster {
    let strip_selection = |selection: &GroupSelection| match selection {
        GroupSelection::All => GroupSelection::All,
        GroupSelection::Selected { excluded_group_ids } => GroupSelection::Selected {
            excluded_group_ids: excluded_group_ids.iter().filter(|g| *g != group_id).cloned().collect(),
        },
    };

    let sets_touched = roster.group_sets.iter().any(|s| {
        s.group_ids.iter().any(|g| g == group_id)
            || s.group_selection.excluded_group_ids().iter().any(|g| g == group_id)
    });
    let mut next = roster.clone();
    if sets_touched {
        let sets = roster
            .group_sets
            .iter()
            .map(|s| GroupSet {
                group_ids: s.group_ids.iter().filter(|g| *g != group_id).cloned().collect(),
                group_selection: strip_selection(&s.group_selection),
                ..s.clone()
            })
            .collect();
        next = next.with_group_sets(sets);
    }

    let assignments_touched = roster
        .assignments
        .iter()
        .any(|a| a.group_selection.excluded_group_ids().iter().any(|g| g == group_id));
    if assignments_touched {
        let assignments = roster
            .assignments
            .iter()
            .map(|a| {
                let mut a = a.clone();
                a.group_selection = strip_selection(&a.group_selection);
                a
            })
            .collect();
        next = next.with_assignments(assignments);
    }
    next
}

// =============================================================================
// Re-resolution flags
// =============================================================================

/// Identifiers an LMS member ID may match for this member
fn identity_keys(member: &RosterMember) -> Vec<String> {
    let mut keys = vec![member.id.clone()];
    if let Some(lms_id) = &member.lms_user_id {
        keys.push(lms_id.clone());
    }
    let email = member.email.trim().to_lowercase();
    if !email.is_empty() {
        keys.push(email);
    }
    keys
}

fn mentions_any(group: &CachedLmsGroup, keys: &[String]) -> bool {
    group
        .lms_member_ids
        .iter()
        .any(|raw| keys.iter().any(|k| *k == *raw || *k == raw.to_lowercase()))
}

/// Whether a change touches the fields member resolution matches on
#[must_use]
pub fn identity_changed(before: &RosterMember, after: &RosterMember) -> bool {
    before.lms_user_id != after.lms_user_id
        || before.email.trim().to_lowercase() != after.email.trim().to_lowercase()
}

/// Mark cached LMS groups matching `predicate` as needing re-resolution
#[must_use]
pub fn flag_reresolution(roster: &Roster, predicate: impl Fn(&CachedLmsGroup) -> bool) -> Roster {
    let needs_flag = |set: &GroupSet| match set.lms_entry().map(|e| &e.state) {
        Some(CacheState::Linked { groups, .. }) => {
            groups.iter().any(|g| !g.needs_reresolution && predicate(g))
        }
        _ => false,
    };
    if !roster.group_sets.iter().any(|s| needs_flag(s)) {
        return roster.clone();
    }

    let sets = roster
        .group_sets
        .iter()
        .map(|set| {
            if !needs_flag(set) {
                return set.clone();
            }
            let Some(GroupSetConnection::Lms(entry)) = &set.connection else {
                return set.clone();
            };
            let CacheState::Linked { groups, filter, fetched_at } = &entry.state else {
                return set.clone();
            };
            let groups = groups
                .iter()
                .map(|g| CachedLmsGroup {
                    needs_reresolution: g.needs_reresolution || predicate(g),
                    ..g.clone()
                })
                .collect();
            debug!("flagging cached groups of {} for re-resolution", set.id);
            GroupSet {
                connection: Some(GroupSetConnection::Lms(LmsGroupSetCacheEntry {
                    state: CacheState::Linked {
                        groups,
                        filter: filter.clone(),
                        fetched_at: *fetched_at,
                    },
                    ..entry.clone()
                })),
                ..set.clone()
            }
        })
        .collect();
    roster.with_group_sets(sets)
}

/// Flag groups whose resolution depended on a removed member
#[must_use]
pub fn flag_for_removed_member(roster: &Roster, removed: &RosterMember) -> Roster {
    let keys = identity_keys(removed);
    flag_reresolution(roster, |g| {
        g.resolved_member_ids.contains(&removed.id) || mentions_any(g, &keys)
    })
}

/// Flag groups affected by a change to a member's matching fields
#[must_use]
pub fn flag_for_identity_change(roster: &Roster, before: &RosterMember, after: &RosterMember) -> Roster {
    let mut keys = identity_keys(before);
    keys.extend(identity_keys(after));
    flag_reresolution(roster, |g| {
        g.resolved_member_ids.contains(&before.id) || mentions_any(g, &keys)
    })
}

/// Flag groups with unresolved IDs a new member could satisfy
#[must_use]
pub fn flag_for_new_member(roster: &Roster, added: &RosterMember) -> Roster {
    let keys = identity_keys(added);
    flag_reresolution(roster, |g| g.unresolved_count > 0 && mentions_any(g, &keys))
}

// =============================================================================
// System group-sets
// =============================================================================

/// Derive the groups of a system set from the current members
#[must_use]
pub fn system_groups(members: &[RosterMember], set_id: &str, system_type: SystemSetType) -> Vec<Group> {
    match system_type {
        SystemSetType::IndividualStudents => members
            .iter()
            .filter(|m| m.is_active_student())
            .map(|m| Group {
                id: Group::generate_id(set_id, &m.id),
                name: m.name.clone(),
                member_ids: vec![m.id.clone()],
                origin: GroupOrigin::System,
            })
            .collect(),
        SystemSetType::Staff => vec![Group {
            id: Group::generate_id(set_id, "staff"),
            name: SystemSetType::Staff.display_name().to_string(),
            member_ids: members
                .iter()
                .filter(|m| m.status == MemberStatus::Active && m.enrollment_type == EnrollmentType::Staff)
                .map(|m| m.id.clone())
                .collect(),
            origin: GroupOrigin::System,
        }],
    }
}

/// Re-derive every system set present in the roster
#[must_use]
pub fn refresh_system_sets(roster: &Roster) -> Roster {
    let system_sets: Vec<(String, SystemSetType)> = roster
        .group_sets
        .iter()
        .filter_map(|s| match &s.connection {
            Some(GroupSetConnection::System { system_type }) => Some((s.id.clone(), *system_type)),
            Some(GroupSetConnection::Import { .. } | GroupSetConnection::Lms(_)) | None => None,
        })
        .collect();

    system_sets.iter().fold(roster.clone(), |acc, (set_id, system_type)| {
        let groups = system_groups(&acc.members, set_id, *system_type);
        acc.replace_group_set_groups(set_id, groups)
    })
}

/// Add any missing system sets and derive their groups
#[must_use]
pub fn ensure_system_group_sets(roster: &Roster) -> Roster {
    let next = [SystemSetType::IndividualStudents, SystemSetType::Staff]
        .into_iter()
        .fold(roster.clone(), |acc, system_type| {
            if acc.group_set(system_type.group_set_id()).is_some() {
                return acc;
            }
            acc.add_group_set(GroupSet {
                connection: Some(GroupSetConnection::System { system_type }),
                ..GroupSet::local(system_type.group_set_id(), system_type.display_name())
            })
        });
    refresh_system_sets(&next)
}

impl Roster {
    /// Create the system group-sets if missing and re-derive their groups
    #[must_use]
    pub fn ensure_system_group_sets(&self) -> Self {
        ensure_system_group_sets(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::MemberUpdate;
    use crate::types::{LmsContext, LmsFilter, LmsType};
    use chrono::Utc;

    fn linked_roster() -> Roster {
        let mut alice = RosterMember::student("Alice", "alice@uni.edu");
        alice.lms_user_id = Some("lms-1".into());
        let roster = Roster::new().add_member(alice.clone());
        let entry = LmsGroupSetCacheEntry {
            context: LmsContext {
                lms_type: LmsType::Canvas,
                base_url: "https://canvas.example".into(),
                course_id: "1".into(),
            },
            lms_group_set_id: "gs-1".into(),
            state: CacheState::Linked {
                groups: vec![
                    CachedLmsGroup {
                        id: "group:g1".into(),
                        lms_group_id: "g1".into(),
                        name: "Team 1".into(),
                        lms_member_ids: vec!["lms-1".into()],
                        resolved_member_ids: vec![alice.id.clone()],
                        unresolved_count: 0,
                        needs_reresolution: false,
                    },
                    CachedLmsGroup {
                        id: "group:g2".into(),
                        lms_group_id: "g2".into(),
                        name: "Team 2".into(),
                        lms_member_ids: vec!["lms-2".into()],
                        resolved_member_ids: vec![],
                        unresolved_count: 1,
                        needs_reresolution: false,
                    },
                ],
                filter: LmsFilter::All,
                fetched_at: Utc::now(),
            },
        };
        roster.add_group_set(GroupSet {
            connection: Some(GroupSetConnection::Lms(entry)),
            ..GroupSet::local("groupset:lms", "LMS Teams")
        })
    }

    fn flags(roster: &Roster) -> Vec<bool> {
        match &roster.group_set("groupset:lms").unwrap().lms_entry().unwrap().state {
            CacheState::Linked { groups, .. } => groups.iter().map(|g| g.needs_reresolution).collect(),
            _ => vec![],
        }
    }

    #[test]
    fn test_removed_member_flags_resolved_group() {
        let roster = linked_roster();
        let alice_id = roster.members[0].id.clone();
        let next = roster.remove_member(&alice_id);
        assert_eq!(flags(&next), vec![true, false]);
    }

    #[test]
    fn test_new_member_flags_unresolved_group() {
        let mut bob = RosterMember::student("Bob", "bob@uni.edu");
        bob.lms_user_id = Some("lms-2".into());
        let next = linked_roster().add_member(bob);
        assert_eq!(flags(&next), vec![false, true]);
    }

    #[test]
    fn test_unrelated_member_change_does_not_flag() {
        let roster = linked_roster();
        let next = roster.add_member(RosterMember::student("Carol", "carol@uni.edu"));
        assert_eq!(flags(&next), vec![false, false]);
        assert!(std::sync::Arc::ptr_eq(&roster.group_sets, &next.group_sets));
    }

    fn resolved(roster: &Roster) -> Vec<Vec<String>> {
        match &roster.group_set("groupset:lms").unwrap().lms_entry().unwrap().state {
            CacheState::Linked { groups, .. } => groups.iter().map(|g| g.resolved_member_ids.clone()).collect(),
            _ => vec![],
        }
    }

    #[test]
    fn test_lms_user_id_change_flags_old_and_new_matches() {
        let roster = linked_roster();
        let alice_id = roster.members[0].id.clone();
        let next = roster.update_member(
            &alice_id,
            MemberUpdate {
                lms_user_id: Some(Some("lms-2".into())),
                ..MemberUpdate::default()
            },
        );
        assert_eq!(flags(&next), vec![true, true]);
        assert_eq!(resolved(&next), resolved(&roster));
    }

    #[test]
    fn test_email_change_flags_resolved_group() {
        let roster = linked_roster();
        let alice_id = roster.members[0].id.clone();
        let next = roster.update_member(
            &alice_id,
            MemberUpdate {
                email: Some("alice@elsewhere.edu".into()),
                ..MemberUpdate::default()
            },
        );
        assert_eq!(flags(&next), vec![true, false]);
        assert_eq!(resolved(&next), resolved(&roster));
    }

    #[test]
    fn test_name_change_does_not_flag() {
        let roster = linked_roster();
        let alice_id = roster.members[0].id.clone();
        let next = roster.update_member(
            &alice_id,
            MemberUpdate {
                name: Some("Alice Smith".into()),
                ..MemberUpdate::default()
            },
        );
        assert_eq!(next.members[0].name, "Alice Smith");
        assert_eq!(flags(&next), vec![false, false]);
    }

    #[test]
    fn test_system_sets_follow_members() {
        let roster = Roster::new()
            .add_member(RosterMember::student("Alice", "alice@uni.edu"))
            .ensure_system_group_sets();
        assert_eq!(roster.groups_in_set(SystemSetType::IndividualStudents.group_set_id()).len(), 1);

        let roster = roster.add_member(RosterMember::student("Bob", "bob@uni.edu"));
        assert_eq!(roster.groups_in_set(SystemSetType::IndividualStudents.group_set_id()).len(), 2);

        let alice_id = roster.members[0].id.clone();
        let roster = roster.remove_member(&alice_id);
        let groups = roster.groups_in_set(SystemSetType::IndividualStudents.group_set_id());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "Bob");
    }

    #[test]
    fn test_ensure_system_sets_is_idempotent() {
        let roster = Roster::new()
            .add_member(RosterMember::student("Alice", "alice@uni.edu"))
            .ensure_system_group_sets();
        assert_eq!(roster.ensure_system_group_sets(), roster);
    }
}
