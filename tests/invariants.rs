// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Invariant tests for the roster document
//!
//! These tests verify critical invariants:
//! 1. Cascade completeness - a removed member is referenced nowhere
//! 2. Resolution accounting - resolved plus unresolved equals raw
//! 3. Idempotent merge - applying the same upstream list twice is a no-op
//! 4. Staleness boundary and exclusion clearing

use chrono::{Duration, Utc};
use proptest::prelude::*;
use rostersystem::lms::LmsGroupSetSummary;
use rostersystem::resolution::resolve_member_ids;
use rostersystem::roster::{AssignmentUpdate, UpdateAssignmentOptions};
use rostersystem::sync::{self, FetchedGroupSet};
use rostersystem::types::{
    Assignment, AssignmentType, Group, GroupSelection, GroupSet, LmsContext, LmsFilter, LmsType, Roster,
    RosterMember,
};
use rostersystem::validation;

// =============================================================================
// Test Helpers
// =============================================================================

fn member(i: usize) -> RosterMember {
    let mut m = RosterMember::student(&format!("Student {i}"), &format!("s{i}@uni.edu"));
    m.id = format!("member:{i}");
    m.lms_user_id = Some(format!("lms-{i}"));
    m
}

fn context() -> LmsContext {
    LmsContext {
        lms_type: LmsType::Canvas,
        base_url: "https://canvas.example".into(),
        course_id: "101".into(),
    }
}

/// Roster with `members` students spread over `group_count` groups
fn build_roster(members: usize, layout: &[Vec<usize>]) -> Roster {
    let mut roster = Roster::for_course(context());
    for i in 0..members {
        roster = roster.add_member(member(i));
    }
    roster = roster.add_group_set(GroupSet::local("groupset:teams", "Teams"));
    for (g, ids) in layout.iter().enumerate() {
        let member_ids = ids.iter().filter(|i| **i < members).map(|i| format!("member:{i}")).collect();
        roster = roster.add_group("groupset:teams", Group::local(format!("group:{g}"), format!("Team {g}"), member_ids));
    }
    roster.add_assignment(Assignment {
        id: "assignment:a1".into(),
        name: "A1".into(),
        description: None,
        assignment_type: AssignmentType::ClassWide,
        group_set_id: "groupset:teams".into(),
        group_selection: GroupSelection::All,
    })
}

// =============================================================================
// Cascade
// =============================================================================

proptest! {
    #[test]
    fn removed_member_is_referenced_nowhere(
        members in 1usize..12,
        layout in prop::collection::vec(prop::collection::vec(0usize..12, 0..6), 0..5),
        victim in 0usize..12,
    ) {
        let roster = build_roster(members, &layout).ensure_system_group_sets();
        let victim_id = format!("member:{}", victim % members);
        let after = roster.remove_member(&victim_id);

        prop_assert!(after.member(&victim_id).is_none());
        prop_assert!(after.groups.iter().all(|g| !g.member_ids.contains(&victim_id)));
        let orphans = validation::validate(&after)
            .into_iter()
            .filter(|i| i.kind == rostersystem::types::IssueKind::OrphanGroupMember)
            .count();
        prop_assert_eq!(orphans, 0);
    }

    #[test]
    fn resolution_accounts_for_every_raw_id(
        members in 0usize..10,
        raw in prop::collection::vec(0usize..20, 0..15),
    ) {
        let roster = build_roster(members, &[]);
        let mut raw_ids: Vec<String> = raw.iter().map(|i| format!("lms-{i}")).collect();
        raw_ids.sort();
        raw_ids.dedup();
        let resolution = resolve_member_ids(&roster, &raw_ids);
        prop_assert_eq!(resolution.resolved_member_ids.len() + resolution.unresolved_count, raw_ids.len());
        prop_assert!(resolution.resolved_member_ids.iter().all(|id| roster.member(id).is_some()));
    }

    #[test]
    fn merge_is_idempotent(ids in prop::collection::vec("[a-e]", 0..6)) {
        let upstream: Vec<LmsGroupSetSummary> = ids
            .iter()
            .map(|id| LmsGroupSetSummary { id: id.clone(), name: format!("Set {id}") })
            .collect();
        let roster = build_roster(2, &[]);
        let once = sync::merge_available_group_sets(&roster, &context(), &upstream);
        let twice = sync::merge_available_group_sets(&once, &context(), &upstream);
        prop_assert_eq!(once, twice);
    }
}

// =============================================================================
// Linked groups
// =============================================================================

#[test]
fn test_member_removal_flags_linked_groups() {
    let roster = build_roster(3, &[]);
    let fetched = FetchedGroupSet {
        context: context(),
        lms_group_set_id: "gs".into(),
        filter: LmsFilter::All,
        groups: vec![rostersystem::lms::LmsGroupRecord {
            id: "g".into(),
            name: "Lab".into(),
            member_ids: vec!["lms-0".into(), "lms-1".into()],
        }],
        fetched_at: Utc::now(),
    };
    let linked = sync::apply_link(&roster, fetched).unwrap();
    let set_id = sync::lms_group_set_id(&context(), "gs");

    let removed = linked.remove_member("member:0");
    assert!(removed.groups.iter().all(|g| !g.member_ids.contains(&"member:0".to_string())));
    let pending = validation::validate(&removed)
        .into_iter()
        .any(|i| i.kind == rostersystem::types::IssueKind::PendingReresolution);
    assert!(pending);

    let reresolved = rostersystem::resolution::reresolve_all(&removed);
    let group = &reresolved.groups_in_set(&set_id)[0];
    assert_eq!(group.member_ids, vec!["member:1"]);
}

#[test]
fn test_staleness_boundary() {
    let now = Utc::now();
    let fetched = FetchedGroupSet {
        context: context(),
        lms_group_set_id: "gs".into(),
        filter: LmsFilter::All,
        groups: vec![],
        fetched_at: now - Duration::hours(23),
    };
    let linked = sync::apply_link(&build_roster(0, &[]), fetched).unwrap();
    let entry = linked.group_sets.iter().find_map(GroupSet::lms_entry).unwrap();
    assert!(!sync::is_stale(entry, now, Duration::hours(24)));
    assert!(sync::is_stale(entry, now + Duration::hours(1) + Duration::seconds(1), Duration::hours(24)));
}

// =============================================================================
// Assignments
// =============================================================================

#[test]
fn test_exclusions_cleared_on_group_set_change() {
    let roster = build_roster(2, &[vec![0], vec![1]])
        .add_group_set(GroupSet::local("groupset:other", "Other"))
        .update_assignment(
            "assignment:a1",
            AssignmentUpdate {
                group_selection: Some(GroupSelection::Selected {
                    excluded_group_ids: vec!["group:0".into()],
                }),
                ..AssignmentUpdate::default()
            },
            UpdateAssignmentOptions::default(),
        );
    assert_eq!(roster.assignments[0].group_selection.excluded_group_ids(), ["group:0".to_string()]);

    let moved = roster.update_assignment(
        "assignment:a1",
        AssignmentUpdate {
            group_set_id: Some("groupset:other".into()),
            ..AssignmentUpdate::default()
        },
        UpdateAssignmentOptions {
            clear_exclusions_on_group_set_change: true,
        },
    );
    assert!(moved.assignments[0].group_selection.excluded_group_ids().is_empty());
}

#[test]
fn test_operations_are_deterministic() {
    let layout = vec![vec![0, 1], vec![2]];
    let a = build_roster(3, &layout).remove_member("member:1").ensure_system_group_sets();
    let b = build_roster(3, &layout).remove_member("member:1").ensure_system_group_sets();
    assert_eq!(a, b);
    assert_eq!(validation::validate(&a), validation::validate(&b));
}
