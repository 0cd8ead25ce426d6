// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Group-set commands - local sets, system sets and LMS synchronization

use super::{block_on, ensure_changed, CommandContext};
use crate::lms::SnapshotLmsClient;
use crate::resolution;
use crate::sync::{self, GroupSetSync};
use crate::types::{CacheState, GroupSet, GroupSetConnection, LmsFilter};
use crate::validation::slug;
use anyhow::{Context, Result};
use chrono::Utc;
use clap::Subcommand;
use serde::Serialize;

/// Group-set actions
#[derive(Debug, Subcommand)]
pub enum GroupSetAction {
    /// List group-sets
    #[command(alias = "ls")]
    List,
    /// Create an empty local group-set
    #[command(alias = "new")]
    Create {
        /// Display name
        name: String,
    },
    /// Rename a group-set
    Rename {
        /// Group-set ID
        id: String,
        /// New name
        name: String,
    },
    /// Delete a group-set and the groups only it holds
    #[command(alias = "rm")]
    Delete {
        /// Group-set ID
        id: String,
    },
    /// Fetch the LMS group-set list and merge it into placeholders
    SyncList,
    /// Link an LMS group-set
    Link {
        /// LMS group-set ID
        lms_group_set_id: String,
        /// Only groups whose name matches this glob
        #[arg(long, conflicts_with = "groups")]
        pattern: Option<String>,
        /// Only these LMS group IDs
        #[arg(long, value_delimiter = ',')]
        groups: Vec<String>,
    },
    /// Re-fetch a linked group-set
    Refresh {
        /// Group-set ID
        id: String,
    },
    /// Stop syncing a linked group-set and make it editable
    BreakSync {
        /// Group-set ID
        id: String,
    },
    /// Re-resolve flagged LMS members (all sets if no ID is given)
    Reresolve {
        /// Group-set ID
        id: Option<String>,
    },
    /// Show sync state and staleness of LMS group-sets
    Status,
    /// Create or re-derive the system group-sets
    System,
}

/// Sync status of one LMS-tracked set
#[derive(Debug, Serialize)]
struct SyncStatus<'a> {
    id: &'a str,
    name: &'a str,
    lms_group_set_id: &'a str,
    state: &'static str,
    fetched_at: Option<chrono::DateTime<Utc>>,
    stale: bool,
    unresolved: usize,
    pending_reresolution: usize,
}

fn connection_label(set: &GroupSet) -> &'static str {
    match &set.connection {
        None => "local",
        Some(GroupSetConnection::System { .. }) => "system",
        Some(GroupSetConnection::Import { .. }) => "import",
        Some(GroupSetConnection::Lms(entry)) => entry.state_name(),
    }
}

fn filter_from(pattern: Option<String>, groups: Vec<String>) -> LmsFilter {
    match pattern {
        Some(pattern) => LmsFilter::Pattern { pattern },
        None if !groups.is_empty() => LmsFilter::Selected { group_ids: groups },
        None => LmsFilter::All,
    }
}

fn refresh_message(id: &str, committed: bool) -> String {
    if committed {
        format!("Refreshed {id}")
    } else {
        format!("Refresh of {id} was superseded; nothing applied")
    }
}

fn group_set_sync(ctx: &CommandContext) -> GroupSetSync<SnapshotLmsClient> {
    GroupSetSync::new(SnapshotLmsClient::in_dir(ctx.data_dir())).with_stale_after(ctx.config.stale_after())
}

/// Run group-set command
#[allow(clippy::too_many_lines)]
pub fn run(ctx: &CommandContext, action: GroupSetAction) -> Result<()> {
    match action {
        GroupSetAction::List => {
            let roster = ctx.load()?;
            if ctx.json {
                return ctx.print_json(&*roster.group_sets);
            }
            if roster.group_sets.is_empty() {
                println!("No group-sets defined.");
                return Ok(());
            }
            println!("Group-sets ({}):", roster.group_sets.len());
            for set in roster.group_sets.iter() {
                println!(
                    "  {} ({}) [{}] - {} groups",
                    set.name,
                    set.id,
                    connection_label(set),
                    set.group_ids.len()
                );
            }
        }

        GroupSetAction::Create { name } => {
            let id = format!("groupset:{}", slug(&name));
            let set = GroupSet::local(id.clone(), name.clone());
            ensure_changed(ctx.commit(|r| r.add_group_set(set))?, "groupset create")?;
            println!("Created group-set: {name} ({id})");
        }

        GroupSetAction::Rename { id, name } => {
            ensure_changed(ctx.commit(|r| r.rename_group_set(&id, &name))?, "groupset rename")?;
            println!("Renamed {id} to {name}");
        }

        GroupSetAction::Delete { id } => {
            let session = ctx.session()?;
            let tracked = session.snapshot().group_set(&id).and_then(GroupSet::lms_entry).is_some();
            let changed = if tracked {
                session.try_mutate(|r| sync::delete_group_set(r, &id))?
            } else {
                session.mutate(|r| r.remove_group_set(&id))
            };
            ensure_changed(changed, "groupset delete")?;
            ctx.save(&session)?;
            println!("Deleted group-set: {id}");
        }

        GroupSetAction::SyncList => {
            let session = ctx.session()?;
            let context = session
                .snapshot()
                .lms
                .clone()
                .context("No LMS course configured; run 'rostersystem course set' first")?;
            let upstream = block_on(group_set_sync(ctx).fetch_available(&context))??;
            if session.mutate(|r| sync::merge_available_group_sets(r, &context, &upstream)) {
                ctx.save(&session)?;
            }
            println!("LMS lists {} group-set(s)", upstream.len());
        }

        GroupSetAction::Link {
            lms_group_set_id,
            pattern,
            groups,
        } => {
            let session = ctx.session()?;
            let filter = filter_from(pattern, groups);
            let committed = block_on(session.link(&group_set_sync(ctx), &lms_group_set_id, filter))??;
            ensure_changed(committed, "groupset link")?;
            ctx.save(&session)?;
            println!("Linked LMS group-set {lms_group_set_id}");
        }

        GroupSetAction::Refresh { id } => {
            let session = ctx.session()?;
            let committed = block_on(session.refresh(&group_set_sync(ctx), &id))??;
            if committed {
                ctx.save(&session)?;
            }
            println!("{}", refresh_message(&id, committed));
        }

        GroupSetAction::BreakSync { id } => {
            let session = ctx.session()?;
            session.try_mutate(|r| sync::break_sync(r, &id))?;
            ctx.save(&session)?;
            println!("Sync broken; {id} is now locally editable");
        }

        GroupSetAction::Reresolve { id } => {
            let changed = match &id {
                Some(set_id) => {
                    if ctx.load()?.group_set(set_id).is_none() {
                        anyhow::bail!("Group-set not found: {set_id}");
                    }
                    ctx.commit(|r| resolution::reresolve_group_set(r, set_id))?
                }
                None => ctx.commit(resolution::reresolve_all)?,
            };
            if changed {
                println!("Re-resolved LMS members");
            } else {
                println!("Nothing to re-resolve");
            }
        }

        GroupSetAction::Status => {
            let roster = ctx.load()?;
            let sync = group_set_sync(ctx);
            let now = Utc::now();
            let statuses: Vec<SyncStatus<'_>> = roster
                .group_sets
                .iter()
                .filter_map(|set| set.lms_entry().map(|entry| (set, entry)))
                .map(|(set, entry)| {
                    let (fetched_at, unresolved, pending) = match &entry.state {
                        CacheState::Linked { groups, fetched_at, .. } => (
                            Some(*fetched_at),
                            groups.iter().map(|g| g.unresolved_count).sum(),
                            groups.iter().filter(|g| g.needs_reresolution).count(),
                        ),
                        CacheState::Copied { fetched_at } => (*fetched_at, 0, 0),
                        CacheState::Unlinked => (None, 0, 0),
                    };
                    SyncStatus {
                        id: &set.id,
                        name: &set.name,
                        lms_group_set_id: &entry.lms_group_set_id,
                        state: entry.state_name(),
                        fetched_at,
                        stale: sync.is_stale(entry, now),
                        unresolved,
                        pending_reresolution: pending,
                    }
                })
                .collect();
            if ctx.json {
                return ctx.print_json(&statuses);
            }
            if statuses.is_empty() {
                println!("No LMS group-sets tracked.");
                return Ok(());
            }
            for s in &statuses {
                let fetched = s.fetched_at.map_or_else(|| "never".to_string(), |t| t.to_rfc3339());
                println!(
                    "  {} ({}) [{}{}] fetched {} - {} unresolved, {} pending",
                    s.name,
                    s.id,
                    s.state,
                    if s.stale { ", stale" } else { "" },
                    fetched,
                    s.unresolved,
                    s.pending_reresolution
                );
            }
        }

        GroupSetAction::System => {
            ctx.commit(crate::types::Roster::ensure_system_group_sets)?;
            println!("System group-sets are up to date");
        }
    }
    Ok(())
}
