// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Group-set synchronization with the LMS
//!
//! Each LMS-tracked group-set moves through a small state machine:
//!
//! ```text
//! unlinked --link--> linked --refresh--> linked
//! linked --break_sync--> copied
//! any --delete--> removed
//! ```
//!
//! Remote phases (`fetch_for_*`) are async and never touch the document.
//! The matching `apply_*` functions are pure and must be run against the
//! latest document once the fetch completes.

use crate::error::SyncError;
use crate::lms::{LmsClient, LmsGroupRecord, LmsGroupSetSummary};
use crate::resolution::{materialize, resolve_group, MemberIndex};
use crate::types::{
    CacheState, CachedLmsGroup, Group, GroupSelection, GroupSet, GroupSetConnection, LmsContext,
    LmsFilter, LmsGroupSetCacheEntry, Roster,
};
use chrono::{DateTime, Duration, Utc};
use globset::Glob;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::{debug, info};

/// Default staleness threshold for linked sets
pub const DEFAULT_STALE_AFTER_HOURS: i64 = 24;

/// Groups fetched for one LMS group-set, not yet applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedGroupSet {
    /// Course the set lives in
    pub context: LmsContext,
    /// LMS group-set ID
    pub lms_group_set_id: String,
    /// Scope the groups were fetched with
    pub filter: LmsFilter,
    /// Groups after the filter was applied
    pub groups: Vec<LmsGroupRecord>,
    /// When the fetch completed
    pub fetched_at: DateTime<Utc>,
}

/// Local group-set ID for an LMS group-set
#[must_use]
pub fn lms_group_set_id(context: &LmsContext, lms_group_set_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(context.base_url.as_bytes());
    hasher.update(b"\0");
    hasher.update(context.course_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(lms_group_set_id.as_bytes());
    let hash = hex::encode(&hasher.finalize()[..6]);
    format!("groupset:lms:{hash}")
}

/// Keep the groups a filter selects
///
/// # Errors
///
/// Returns [`SyncError::InvalidFilter`] if a pattern does not compile.
pub fn apply_filter(filter: &LmsFilter, groups: Vec<LmsGroupRecord>) -> Result<Vec<LmsGroupRecord>, SyncError> {
    match filter {
        LmsFilter::All => Ok(groups),
        LmsFilter::Pattern { pattern } => {
            let matcher = Glob::new(pattern)
                .map_err(|e| SyncError::InvalidFilter {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })?
                .compile_matcher();
            Ok(groups.into_iter().filter(|g| matcher.is_match(&g.name)).collect())
        }
        LmsFilter::Selected { group_ids } => {
            let wanted: HashSet<&str> = group_ids.iter().map(String::as_str).collect();
            Ok(groups.into_iter().filter(|g| wanted.contains(g.id.as_str())).collect())
        }
    }
}

/// Whether a linked entry's last fetch is older than `threshold`
///
/// Advisory only; unlinked and copied entries are never stale.
#[must_use]
pub fn is_stale(entry: &LmsGroupSetCacheEntry, now: DateTime<Utc>, threshold: Duration) -> bool {
    match &entry.state {
        CacheState::Linked { fetched_at, .. } => now - *fetched_at > threshold,
        CacheState::Unlinked | CacheState::Copied { .. } => false,
    }
}

/// Synchronization manager over an LMS client
pub struct GroupSetSync<C> {
    client: C,
    stale_after: Duration,
}

impl<C: LmsClient> GroupSetSync<C> {
    /// Manager with the default 24h staleness threshold
    pub fn new(client: C) -> Self {
        Self {
            client,
            stale_after: Duration::hours(DEFAULT_STALE_AFTER_HOURS),
        }
    }

    /// Override the staleness threshold
    #[must_use]
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// The underlying client
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Staleness threshold in effect
    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Whether an entry is stale under this manager's threshold
    pub fn is_stale(&self, entry: &LmsGroupSetCacheEntry, now: DateTime<Utc>) -> bool {
        is_stale(entry, now, self.stale_after)
    }

    /// IDs of linked group-sets that are stale at `now`
    pub fn stale_group_sets(&self, roster: &Roster, now: DateTime<Utc>) -> Vec<String> {
        roster
            .group_sets
            .iter()
            .filter(|s| s.lms_entry().is_some_and(|e| self.is_stale(e, now)))
            .map(|s| s.id.clone())
            .collect()
    }

    /// List the course's group-sets on the LMS
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Remote`] when the LMS call fails.
    pub async fn fetch_available(&self, context: &LmsContext) -> Result<Vec<LmsGroupSetSummary>, SyncError> {
        Ok(self.client.fetch_group_sets(context).await?)
    }

    /// Remote phase of `link`
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Remote`] when the LMS call fails, or
    /// [`SyncError::InvalidFilter`] for a bad pattern.
    pub async fn fetch_for_link(
        &self,
        context: &LmsContext,
        lms_group_set_id: &str,
        filter: LmsFilter,
    ) -> Result<FetchedGroupSet, SyncError> {
        debug!("fetching LMS group-set {} for link", lms_group_set_id);
        let records = self
            .client
            .fetch_group_set_members(context, lms_group_set_id, &filter)
            .await?;
        let groups = apply_filter(&filter, records)?;
        Ok(FetchedGroupSet {
            context: context.clone(),
            lms_group_set_id: lms_group_set_id.to_string(),
            filter,
            groups,
            fetched_at: Utc::now(),
        })
    }

    /// Remote phase of `refresh`, using the filter stored on the entry
    ///
    /// # Errors
    ///
    /// Fails if the set is missing or not linked, or if the LMS call fails.
    pub async fn fetch_for_refresh(&self, roster: &Roster, set_id: &str) -> Result<FetchedGroupSet, SyncError> {
        let (entry, filter) = linked_entry(roster, set_id)?;
        let (context, lms_id) = (entry.context.clone(), entry.lms_group_set_id.clone());
        self.fetch_for_link(&context, &lms_id, filter.clone()).await
    }

    /// Fetch and link in one step against `roster`
    ///
    /// Callers holding a live document should prefer the two-phase form so
    /// the result is applied to whatever document is current afterwards.
    ///
    /// # Errors
    ///
    /// See [`GroupSetSync::fetch_for_link`] and [`apply_link`].
    pub async fn link(&self, roster: &Roster, lms_group_set_id: &str, filter: LmsFilter) -> Result<Roster, SyncError> {
        let context = roster.lms.clone().ok_or(SyncError::NoLmsContext)?;
        ensure_linkable(roster, &context, lms_group_set_id)?;
        let fetched = self.fetch_for_link(&context, lms_group_set_id, filter).await?;
        apply_link(roster, fetched)
    }

    /// Fetch and refresh in one step against `roster`
    ///
    /// # Errors
    ///
    /// See [`GroupSetSync::fetch_for_refresh`] and [`apply_refresh`].
    pub async fn refresh(&self, roster: &Roster, set_id: &str) -> Result<Roster, SyncError> {
        let fetched = self.fetch_for_refresh(roster, set_id).await?;
        apply_refresh(roster, set_id, fetched)
    }

    /// Fetch the upstream list and merge it into the roster's placeholders
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoLmsContext`] or [`SyncError::Remote`].
    pub async fn sync_available(&self, roster: &Roster) -> Result<Roster, SyncError> {
        let context = roster.lms.clone().ok_or(SyncError::NoLmsContext)?;
        let upstream = self.fetch_available(&context).await?;
        Ok(merge_available_group_sets(roster, &context, &upstream))
    }
}

// =============================================================================
// Pure apply phases
// =============================================================================

fn linked_entry<'a>(roster: &'a Roster, set_id: &str) -> Result<(&'a LmsGroupSetCacheEntry, &'a LmsFilter), SyncError> {
    let set = roster
        .group_set(set_id)
        .ok_or_else(|| SyncError::NotFound(set_id.to_string()))?;
    let entry = set
        .lms_entry()
        .ok_or_else(|| SyncError::NotLmsTracked(set_id.to_string()))?;
    match &entry.state {
        CacheState::Linked { filter, .. } => Ok((entry, filter)),
        CacheState::Unlinked | CacheState::Copied { .. } => Err(SyncError::NotLinked(set_id.to_string())),
    }
}

/// Check that an LMS group-set is not already linked or copied
///
/// # Errors
///
/// Returns [`SyncError::AlreadyLinked`] naming the set that tracks it.
pub fn ensure_linkable(roster: &Roster, context: &LmsContext, lms_group_set_id: &str) -> Result<(), SyncError> {
    match roster.find_lms_entry(context, lms_group_set_id) {
        Some((set, entry)) if !matches!(entry.state, CacheState::Unlinked) => Err(SyncError::AlreadyLinked {
            lms_group_set_id: lms_group_set_id.to_string(),
            group_set_id: set.id.clone(),
        }),
        _ => Ok(()),
    }
}

fn resolve_fetched(roster: &Roster, set_id: &str, groups: Vec<LmsGroupRecord>) -> (Vec<CachedLmsGroup>, Vec<Group>) {
    let index = MemberIndex::new(roster);
    let cached: Vec<CachedLmsGroup> = groups
        .into_iter()
        .map(|g| resolve_group(&index, Group::generate_id(set_id, &g.id), g.id, g.name, g.member_ids))
        .collect();
    let materialized = cached.iter().map(materialize).collect();
    (cached, materialized)
}

/// Commit a fetched group-set as a linked set
///
/// An existing unlinked placeholder is upgraded in place and keeps its ID and
/// name; otherwise a new group-set is created.
///
/// # Errors
///
/// Returns [`SyncError::AlreadyLinked`] when a linked or copied entry for the
/// same LMS group-set exists.
pub fn apply_link(roster: &Roster, fetched: FetchedGroupSet) -> Result<Roster, SyncError> {
    ensure_linkable(roster, &fetched.context, &fetched.lms_group_set_id)?;
    let placeholder = roster
        .find_lms_entry(&fetched.context, &fetched.lms_group_set_id)
        .map(|(set, _)| set.id.clone());
    let set_id = placeholder
        .clone()
        .unwrap_or_else(|| lms_group_set_id(&fetched.context, &fetched.lms_group_set_id));

    let (cached, materialized) = resolve_fetched(roster, &set_id, fetched.groups);
    let connection = GroupSetConnection::Lms(LmsGroupSetCacheEntry {
        context: fetched.context,
        lms_group_set_id: fetched.lms_group_set_id.clone(),
        state: CacheState::Linked {
            groups: cached,
            filter: fetched.filter,
            fetched_at: fetched.fetched_at,
        },
    });

    let linked = if placeholder.is_some() {
        roster.map_group_set(&set_id, |s| GroupSet {
            connection: Some(connection),
            ..s.clone()
        })
    } else {
        roster.add_group_set(GroupSet {
            id: set_id.clone(),
            name: fetched.lms_group_set_id.clone(),
            group_ids: Vec::new(),
            connection: Some(connection),
            group_selection: GroupSelection::All,
        })
    };
    info!(
        "linked LMS group-set {} as {} ({} groups)",
        fetched.lms_group_set_id,
        set_id,
        materialized.len()
    );
    Ok(linked.replace_group_set_groups(&set_id, materialized))
}

/// Commit a refetch of a linked set
///
/// Cached groups, materialized groups and `fetched_at` are replaced; the set's
/// ID and connection identity stay the same.
///
/// # Errors
///
/// Fails if the set is missing, no longer linked, or the fetch belongs to a
/// different LMS group-set.
pub fn apply_refresh(roster: &Roster, set_id: &str, fetched: FetchedGroupSet) -> Result<Roster, SyncError> {
    let (entry, filter) = linked_entry(roster, set_id)?;
    if !entry.tracks(&fetched.context, &fetched.lms_group_set_id) {
        return Err(SyncError::NotLinked(set_id.to_string()));
    }
    let filter = filter.clone();
    let base = entry.clone();

    let (cached, materialized) = resolve_fetched(roster, set_id, fetched.groups);
    let connection = GroupSetConnection::Lms(LmsGroupSetCacheEntry {
        state: CacheState::Linked {
            groups: cached,
            filter,
            fetched_at: fetched.fetched_at,
        },
        ..base
    });
    info!("refreshed {} ({} groups)", set_id, materialized.len());
    Ok(roster
        .map_group_set(set_id, |s| GroupSet {
            connection: Some(connection),
            ..s.clone()
        })
        .replace_group_set_groups(set_id, materialized))
}

/// Stop syncing a linked set; its groups become locally editable
///
/// # Errors
///
/// Fails if the set is missing or not linked.
pub fn break_sync(roster: &Roster, set_id: &str) -> Result<Roster, SyncError> {
    let (entry, _) = linked_entry(roster, set_id)?;
    let fetched_at = match &entry.state {
        CacheState::Linked { fetched_at, .. } => Some(*fetched_at),
        CacheState::Unlinked | CacheState::Copied { .. } => None,
    };
    let entry = LmsGroupSetCacheEntry {
        state: CacheState::Copied { fetched_at },
        ..entry.clone()
    };
    info!("broke sync on {}", set_id);
    Ok(roster.map_group_set(set_id, |s| GroupSet {
        connection: Some(GroupSetConnection::Lms(entry)),
        ..s.clone()
    }))
}

/// Remove an LMS-tracked group-set in any state
///
/// # Errors
///
/// Fails if the set is missing or does not track an LMS group-set.
pub fn delete_group_set(roster: &Roster, set_id: &str) -> Result<Roster, SyncError> {
    let set = roster
        .group_set(set_id)
        .ok_or_else(|| SyncError::NotFound(set_id.to_string()))?;
    if set.lms_entry().is_none() {
        return Err(SyncError::NotLmsTracked(set_id.to_string()));
    }
    info!("deleted LMS group-set {}", set_id);
    Ok(roster.remove_group_set(set_id))
}

/// Reconcile the roster's LMS group-sets with the upstream list
///
/// Entries already present are kept and only their name is refreshed.
/// Unlinked entries that vanished upstream are dropped; linked and copied
/// entries are always kept. New upstream sets are appended as unlinked
/// placeholders in upstream order. Applying the same list twice is a no-op.
#[must_use]
pub fn merge_available_group_sets(roster: &Roster, context: &LmsContext, upstream: &[LmsGroupSetSummary]) -> Roster {
    let mut seen = HashSet::new();
    let upstream: Vec<&LmsGroupSetSummary> = upstream.iter().filter(|s| seen.insert(s.id.as_str())).collect();
    let find = |id: &str| upstream.iter().find(|s| s.id == id);

    let mut sets: Vec<GroupSet> = Vec::with_capacity(roster.group_sets.len() + upstream.len());
    let mut dropped = 0usize;
    for set in roster.group_sets.iter() {
        let Some(entry) = set.lms_entry().filter(|e| e.context == *context) else {
            sets.push(set.clone());
            continue;
        };
        match (find(&entry.lms_group_set_id), &entry.state) {
            (Some(summary), _) => sets.push(GroupSet {
                name: summary.name.clone(),
                ..set.clone()
            }),
            (None, CacheState::Unlinked) => dropped += 1,
            (None, CacheState::Linked { .. } | CacheState::Copied { .. }) => sets.push(set.clone()),
        }
    }

    let mut added = 0usize;
    for summary in &upstream {
        let known = roster
            .group_sets
            .iter()
            .filter_map(GroupSet::lms_entry)
            .any(|e| e.tracks(context, &summary.id));
        if !known {
            added += 1;
            sets.push(GroupSet {
                id: lms_group_set_id(context, &summary.id),
                name: summary.name.clone(),
                group_ids: Vec::new(),
                connection: Some(GroupSetConnection::Lms(LmsGroupSetCacheEntry {
                    context: context.clone(),
                    lms_group_set_id: summary.id.clone(),
                    state: CacheState::Unlinked,
                })),
                group_selection: GroupSelection::All,
            });
        }
    }

    if sets == *roster.group_sets {
        return roster.clone();
    }
    debug!("merged upstream group-sets: {} added, {} dropped", added, dropped);
    roster.with_group_sets(sets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CommandResult;
    use crate::types::{LmsType, RosterMember};
    use async_trait::async_trait;

    fn context() -> LmsContext {
        LmsContext {
            lms_type: LmsType::Canvas,
            base_url: "https://canvas.example".into(),
            course_id: "42".into(),
        }
    }

    fn summary(id: &str, name: &str) -> LmsGroupSetSummary {
        LmsGroupSetSummary {
            id: id.into(),
            name: name.into(),
        }
    }

    fn record(id: &str, name: &str, members: &[&str]) -> LmsGroupRecord {
        LmsGroupRecord {
            id: id.into(),
            name: name.into(),
            member_ids: members.iter().map(|m| (*m).to_string()).collect(),
        }
    }

    fn roster() -> Roster {
        let mut alice = RosterMember::student("Alice", "alice@uni.edu");
        alice.id = "member:alice".into();
        alice.lms_user_id = Some("u1".into());
        Roster::for_course(context()).add_member(alice)
    }

    fn fetched(groups: Vec<LmsGroupRecord>) -> FetchedGroupSet {
        FetchedGroupSet {
            context: context(),
            lms_group_set_id: "gs1".into(),
            filter: LmsFilter::All,
            groups,
            fetched_at: Utc::now(),
        }
    }

    struct FixedClient(Vec<LmsGroupRecord>);

    #[async_trait]
    impl LmsClient for FixedClient {
        async fn fetch_group_sets(&self, _: &LmsContext) -> CommandResult<Vec<LmsGroupSetSummary>> {
            Ok(vec![summary("gs1", "Projects")])
        }

        async fn fetch_group_set_members(
            &self,
            _: &LmsContext,
            _: &str,
            _: &LmsFilter,
        ) -> CommandResult<Vec<LmsGroupRecord>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_link_materializes_groups() {
        let linked = apply_link(&roster(), fetched(vec![record("g1", "Team 1", &["u1", "u9"])])).unwrap();
        let set_id = lms_group_set_id(&context(), "gs1");
        let groups = linked.groups_in_set(&set_id);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].member_ids, vec!["member:alice"]);
        let Some(CacheState::Linked { groups: cached, .. }) = linked.group_set(&set_id).and_then(|s| s.lms_entry()).map(|e| &e.state) else {
            panic!("expected linked state");
        };
        assert_eq!(cached[0].unresolved_count, 1);
    }

    #[test]
    fn test_link_upgrades_placeholder_in_place() {
        let merged = merge_available_group_sets(&roster(), &context(), &[summary("gs1", "Projects")]);
        let placeholder_id = merged.group_sets[0].id.clone();
        let linked = apply_link(&merged, fetched(vec![record("g1", "Team 1", &[])])).unwrap();
        assert_eq!(linked.group_sets.len(), 1);
        assert_eq!(linked.group_sets[0].id, placeholder_id);
        assert_eq!(linked.group_sets[0].name, "Projects");
    }

    #[test]
    fn test_link_twice_is_rejected() {
        let linked = apply_link(&roster(), fetched(vec![])).unwrap();
        let err = apply_link(&linked, fetched(vec![])).unwrap_err();
        assert!(matches!(err, SyncError::AlreadyLinked { .. }));
    }

    #[test]
    fn test_refresh_replaces_groups_keeps_identity() {
        let linked = apply_link(&roster(), fetched(vec![record("g1", "Team 1", &["u1"])])).unwrap();
        let set_id = lms_group_set_id(&context(), "gs1");
        let refreshed = apply_refresh(&linked, &set_id, fetched(vec![record("g2", "Team 2", &["u1"])])).unwrap();
        let groups = refreshed.groups_in_set(&set_id);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "Team 2");
        assert!(refreshed.group(&Group::generate_id(&set_id, "g1")).is_none());
        assert_eq!(refreshed.group_set(&set_id).unwrap().id, set_id);
    }

    #[test]
    fn test_refresh_after_break_sync_fails() {
        let linked = apply_link(&roster(), fetched(vec![record("g1", "Team 1", &["u1"])])).unwrap();
        let set_id = lms_group_set_id(&context(), "gs1");
        let copied = break_sync(&linked, &set_id).unwrap();
        assert_eq!(copied.groups_in_set(&set_id).len(), 1);
        assert!(copied.group_set(&set_id).unwrap().is_editable());
        let err = apply_refresh(&copied, &set_id, fetched(vec![])).unwrap_err();
        assert!(matches!(err, SyncError::NotLinked(_)));
    }

    #[test]
    fn test_delete_rejects_local_sets() {
        let roster = roster().add_group_set(GroupSet::local("groupset:local", "Local"));
        assert!(matches!(
            delete_group_set(&roster, "groupset:local"),
            Err(SyncError::NotLmsTracked(_))
        ));
        assert!(matches!(delete_group_set(&roster, "nope"), Err(SyncError::NotFound(_))));
    }

    #[test]
    fn test_merge_drops_vanished_placeholders_only() {
        let first = merge_available_group_sets(&roster(), &context(), &[summary("gs1", "A"), summary("gs2", "B")]);
        let linked = apply_link(&first, fetched(vec![])).unwrap();
        let second = merge_available_group_sets(&linked, &context(), &[summary("gs3", "C")]);
        let names: Vec<&str> = second.group_sets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["A", "C"]);
    }

    #[test]
    fn test_merge_refreshes_names_and_is_idempotent() {
        let upstream = [summary("gs1", "Old")];
        let once = merge_available_group_sets(&roster(), &context(), &upstream);
        let renamed = merge_available_group_sets(&once, &context(), &[summary("gs1", "New")]);
        assert_eq!(renamed.group_sets[0].name, "New");
        assert_eq!(renamed.group_sets[0].id, once.group_sets[0].id);
        let twice = merge_available_group_sets(&renamed, &context(), &[summary("gs1", "New")]);
        assert_eq!(twice, renamed);
    }

    #[test]
    fn test_staleness_boundary() {
        let mut f = fetched(vec![]);
        let now = Utc::now();
        f.fetched_at = now - Duration::hours(24) - Duration::seconds(1);
        let linked = apply_link(&roster(), f).unwrap();
        let entry = linked.group_sets[0].lms_entry().unwrap().clone();
        assert!(is_stale(&entry, now, Duration::hours(24)));
        assert!(!is_stale(&entry, now - Duration::hours(1), Duration::hours(24)));
    }

    #[test]
    fn test_pattern_filter() {
        let groups = vec![record("1", "Lab A", &[]), record("2", "Project X", &[])];
        let kept = apply_filter(&LmsFilter::Pattern { pattern: "Lab*".into() }, groups).unwrap();
        assert_eq!(kept.len(), 1);
        assert!(apply_filter(&LmsFilter::Pattern { pattern: "[".into() }, vec![]).is_err());
    }

    #[tokio::test]
    async fn test_link_and_refresh_through_client() {
        let sync = GroupSetSync::new(FixedClient(vec![record("g1", "Team 1", &["u1"])]));
        let roster = sync.sync_available(&roster()).await.unwrap();
        let linked = sync.link(&roster, "gs1", LmsFilter::All).await.unwrap();
        let set_id = linked.group_sets[0].id.clone();
        let refreshed = sync.refresh(&linked, &set_id).await.unwrap();
        assert_eq!(refreshed.groups_in_set(&set_id).len(), 1);
        assert!(sync.stale_group_sets(&refreshed, Utc::now()).is_empty());
    }
}
