// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Member resolution - mapping LMS member identifiers onto roster members

use crate::types::{
    dedup_ids, CacheState, CachedLmsGroup, Group, GroupOrigin, GroupSet, GroupSetConnection,
    LmsGroupSetCacheEntry, Roster,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Outcome of resolving one list of raw LMS member IDs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Roster member IDs, in the order of the raw IDs they came from
    pub resolved_member_ids: Vec<String>,
    /// Raw IDs that matched no member
    pub unresolved_count: usize,
}

/// Lookup tables over the roster's matching fields
pub struct MemberIndex<'a> {
    by_lms_id: HashMap<&'a str, &'a str>,
    by_member_id: HashSet<&'a str>,
    by_email: HashMap<String, &'a str>,
}

impl<'a> MemberIndex<'a> {
    /// Build the index; the first member wins on duplicate keys
    #[must_use]
    pub fn new(roster: &'a Roster) -> Self {
        let mut by_lms_id = HashMap::new();
        let mut by_member_id = HashSet::new();
        let mut by_email = HashMap::new();
        for member in roster.members.iter() {
            if let Some(lms_id) = member.lms_user_id.as_deref() {
                by_lms_id.entry(lms_id).or_insert(member.id.as_str());
            }
            by_member_id.insert(member.id.as_str());
            let email = member.email.trim().to_lowercase();
            if !email.is_empty() {
                by_email.entry(email).or_insert(member.id.as_str());
            }
        }
        Self {
            by_lms_id,
            by_member_id,
            by_email,
        }
    }

    /// Resolve one raw ID: LMS user id, then member id, then email
    #[must_use]
    pub fn lookup(&self, raw: &str) -> Option<&'a str> {
        if let Some(id) = self.by_lms_id.get(raw) {
            return Some(*id);
        }
        if let Some(id) = self.by_member_id.get(raw) {
            return Some(*id);
        }
        self.by_email.get(&raw.trim().to_lowercase()).copied()
    }

    /// Resolve a list of raw IDs; each member is counted once
    #[must_use]
    pub fn resolve(&self, raw_ids: &[String]) -> Resolution {
        let mut seen = HashSet::new();
        let resolved_member_ids: Vec<String> = raw_ids
            .iter()
            .filter_map(|raw| self.lookup(raw))
            .filter(|id| seen.insert(*id))
            .map(String::from)
            .collect();
        Resolution {
            unresolved_count: raw_ids.len() - resolved_member_ids.len(),
            resolved_member_ids,
        }
    }
}

/// Resolve raw LMS member IDs against the roster (best effort, never fails)
#[must_use]
pub fn resolve_member_ids(roster: &Roster, raw_ids: &[String]) -> Resolution {
    MemberIndex::new(roster).resolve(raw_ids)
}

/// Build a freshly resolved cached group
#[must_use]
pub fn resolve_group(
    index: &MemberIndex<'_>,
    id: String,
    lms_group_id: String,
    name: String,
    lms_member_ids: Vec<String>,
) -> CachedLmsGroup {
    let lms_member_ids = dedup_ids(lms_member_ids);
    let resolution = index.resolve(&lms_member_ids);
    CachedLmsGroup {
        id,
        lms_group_id,
        name,
        lms_member_ids,
        resolved_member_ids: resolution.resolved_member_ids,
        unresolved_count: resolution.unresolved_count,
        needs_reresolution: false,
    }
}

/// The roster group a cached LMS group is materialized as
#[must_use]
pub fn materialize(cached: &CachedLmsGroup) -> Group {
    Group {
        id: cached.id.clone(),
        name: cached.name.clone(),
        member_ids: cached.resolved_member_ids.clone(),
        origin: GroupOrigin::Lms,
    }
}

/// Re-resolve every cached group of one linked set and update its groups
///
/// This is the explicit pass that clears `needs_reresolution`; sets that are
/// not linked are returned unchanged.
#[must_use]
pub fn reresolve_group_set(roster: &Roster, set_id: &str) -> Roster {
    let Some(set) = roster.group_set(set_id) else {
        return roster.clone();
    };
    let Some(GroupSetConnection::Lms(entry)) = &set.connection else {
        return roster.clone();
    };
    let CacheState::Linked { groups, filter, fetched_at } = &entry.state else {
        return roster.clone();
    };

    let index = MemberIndex::new(roster);
    let cached: Vec<CachedLmsGroup> = groups
        .iter()
        .map(|g| {
            resolve_group(
                &index,
                g.id.clone(),
                g.lms_group_id.clone(),
                g.name.clone(),
                g.lms_member_ids.clone(),
            )
        })
        .collect();
    if cached == *groups {
        return roster.clone();
    }
    debug!("re-resolved {} cached groups of {}", cached.len(), set_id);

    let materialized: Vec<Group> = cached.iter().map(materialize).collect();
    let entry = LmsGroupSetCacheEntry {
        state: CacheState::Linked {
            groups: cached,
            filter: filter.clone(),
            fetched_at: *fetched_at,
        },
        ..entry.clone()
    };
    roster
        .map_group_set(set_id, |s| GroupSet {
            connection: Some(GroupSetConnection::Lms(entry)),
            ..s.clone()
        })
        .replace_group_set_groups(set_id, materialized)
}

/// Re-resolve every linked set that has a flagged group
#[must_use]
pub fn reresolve_all(roster: &Roster) -> Roster {
    let pending: Vec<String> = roster
        .group_sets
        .iter()
        .filter(|s| match s.lms_entry().map(|e| &e.state) {
            Some(CacheState::Linked { groups, .. }) => groups.iter().any(|g| g.needs_reresolution),
            _ => false,
        })
        .map(|s| s.id.clone())
        .collect();
    pending
        .iter()
        .fold(roster.clone(), |acc, set_id| reresolve_group_set(&acc, set_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RosterMember;

    fn roster() -> Roster {
        let mut alice = RosterMember::student("Alice", "Alice@Uni.edu");
        alice.id = "member:alice".into();
        alice.lms_user_id = Some("1001".into());
        let mut bob = RosterMember::student("Bob", "bob@uni.edu");
        bob.id = "member:bob".into();
        Roster::new().add_member(alice).add_member(bob)
    }

    #[test]
    fn test_resolution_order() {
        let roster = roster();
        let raw = vec![
            "1001".to_string(),
            "member:bob".to_string(),
            "nobody".to_string(),
        ];
        let resolution = resolve_member_ids(&roster, &raw);
        assert_eq!(resolution.resolved_member_ids, vec!["member:alice", "member:bob"]);
        assert_eq!(resolution.unresolved_count, 1);
    }

    #[test]
    fn test_email_match_is_case_insensitive() {
        let resolution = resolve_member_ids(&roster(), &["alice@uni.EDU".to_string()]);
        assert_eq!(resolution.resolved_member_ids, vec!["member:alice"]);
    }

    #[test]
    fn test_member_counted_once() {
        let raw = vec!["1001".to_string(), "alice@uni.edu".to_string()];
        let resolution = resolve_member_ids(&roster(), &raw);
        assert_eq!(resolution.resolved_member_ids.len(), 1);
        assert_eq!(resolution.unresolved_count, 1);
    }

    #[test]
    fn test_resolve_group_dedups_raw_ids() {
        let roster = roster();
        let index = MemberIndex::new(&roster);
        let group = resolve_group(
            &index,
            "group:x".into(),
            "x".into(),
            "X".into(),
            vec!["1001".into(), "1001".into(), "2002".into()],
        );
        assert_eq!(group.lms_member_ids.len(), 2);
        assert_eq!(group.unresolved_count, 1);
        assert_eq!(
            group.unresolved_count,
            group.lms_member_ids.len() - group.resolved_member_ids.len()
        );
    }
}
