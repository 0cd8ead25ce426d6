// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Group management commands - edit groups of locally editable sets

use super::{ensure_changed, CommandContext};
use crate::roster::GroupUpdate;
use crate::types::{Group, Roster};
use anyhow::Result;
use clap::Subcommand;

/// Group actions
#[derive(Debug, Subcommand)]
pub enum GroupAction {
    /// Create a group in a group-set
    #[command(alias = "new")]
    Create {
        /// Group-set ID
        group_set: String,
        /// Group name
        name: String,
        /// Initial member IDs or emails
        members: Vec<String>,
    },
    /// Add members to a group
    Add {
        /// Group ID or name
        group: String,
        /// Member IDs or emails
        members: Vec<String>,
    },
    /// Remove members from a group
    #[command(alias = "rm")]
    Remove {
        /// Group ID or name
        group: String,
        /// Member IDs or emails
        members: Vec<String>,
    },
    /// Delete a group
    Delete {
        /// Group ID or name
        group: String,
    },
    /// List groups
    #[command(alias = "ls")]
    List {
        /// Only groups of this group-set
        #[arg(long)]
        group_set: Option<String>,
    },
    /// Show a group's members
    Show {
        /// Group ID or name
        group: String,
    },
}

/// Resolve a group argument (ID first, then unique name)
fn resolve_group<'a>(roster: &'a Roster, key: &str) -> Result<&'a Group> {
    if let Some(group) = roster.group(key) {
        return Ok(group);
    }
    let mut named = roster.groups.iter().filter(|g| g.name == key);
    match (named.next(), named.next()) {
        (Some(group), None) => Ok(group),
        (Some(_), Some(_)) => anyhow::bail!("Group name '{key}' is ambiguous; use the group ID"),
        (None, _) => anyhow::bail!("Group not found: {key}"),
    }
}

/// Resolve member arguments (ID or email)
fn resolve_members(roster: &Roster, keys: &[String]) -> Result<Vec<String>> {
    keys.iter()
        .map(|key| {
            roster
                .members
                .iter()
                .find(|m| m.id == *key || m.email.eq_ignore_ascii_case(key))
                .map(|m| m.id.clone())
                .ok_or_else(|| anyhow::anyhow!("Member not found: {key}"))
        })
        .collect()
}

/// Run group command
pub fn run(ctx: &CommandContext, action: GroupAction) -> Result<()> {
    let roster = ctx.load()?;

    match action {
        GroupAction::Create { group_set, name, members } => {
            let set = roster
                .group_set(&group_set)
                .ok_or_else(|| anyhow::anyhow!("Group-set not found: {group_set}"))?;
            if !set.is_editable() {
                anyhow::bail!("Group-set {} is read-only; break sync first", set.name);
            }
            let member_ids = resolve_members(&roster, &members)?;
            let group_id = Group::generate_id(&group_set, &name);
            let group = Group::local(group_id.clone(), name.clone(), member_ids);
            ensure_changed(ctx.commit(|r| r.add_group(&group_set, group))?, "group create")?;
            println!("Created group: {name} ({group_id})");
        }

        GroupAction::Add { group, members } => {
            let target = resolve_group(&roster, &group)?;
            let mut member_ids = target.member_ids.clone();
            for id in resolve_members(&roster, &members)? {
                if member_ids.contains(&id) {
                    println!("{} already in {}", id, target.name);
                } else {
                    println!("Added {} to {}", id, target.name);
                    member_ids.push(id);
                }
            }
            let update = GroupUpdate {
                member_ids: Some(member_ids),
                ..GroupUpdate::default()
            };
            let id = target.id.clone();
            ctx.commit(|r| r.update_group(&id, update))?;
        }

        GroupAction::Remove { group, members } => {
            let target = resolve_group(&roster, &group)?;
            let removed = resolve_members(&roster, &members)?;
            let member_ids: Vec<String> = target
                .member_ids
                .iter()
                .filter(|m| !removed.contains(m))
                .cloned()
                .collect();
            let update = GroupUpdate {
                member_ids: Some(member_ids),
                ..GroupUpdate::default()
            };
            let id = target.id.clone();
            ensure_changed(ctx.commit(|r| r.update_group(&id, update))?, "group remove")?;
            println!("Removed {} member(s) from {}", removed.len(), target.name);
        }

        GroupAction::Delete { group } => {
            let target = resolve_group(&roster, &group)?;
            let (id, name) = (target.id.clone(), target.name.clone());
            ensure_changed(ctx.commit(|r| r.remove_group(&id))?, "group delete")?;
            println!("Deleted group: {name}");
        }

        GroupAction::List { group_set } => {
            let groups: Vec<&Group> = match &group_set {
                Some(set_id) => {
                    if roster.group_set(set_id).is_none() {
                        anyhow::bail!("Group-set not found: {set_id}");
                    }
                    roster.groups_in_set(set_id)
                }
                None => roster.groups.iter().collect(),
            };
            if ctx.json {
                return ctx.print_json(&groups);
            }
            if groups.is_empty() {
                println!("No groups defined.");
                return Ok(());
            }
            println!("Groups ({}):", groups.len());
            for group in groups {
                println!("  {} ({}) - {} members", group.name, group.id, group.member_ids.len());
            }
        }

        GroupAction::Show { group } => {
            let target = resolve_group(&roster, &group)?;
            if ctx.json {
                return ctx.print_json(target);
            }
            println!("Group: {}", target.name);
            println!("  ID: {}", target.id);
            println!("  Origin: {:?}", target.origin);
            let sets: Vec<&str> = roster.sets_containing(&target.id).iter().map(|s| s.name.as_str()).collect();
            println!("  Group-sets: {}", sets.join(", "));
            println!("  Members ({}):", target.member_ids.len());
            for id in &target.member_ids {
                match roster.member(id) {
                    Some(m) => println!("    - {} <{}>", m.name, m.email),
                    None => println!("    - {id} (not on roster)"),
                }
            }
        }
    }

    Ok(())
}
