// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Assignment commands

use super::{ensure_changed, CommandContext};
use crate::roster::{AssignmentUpdate, UpdateAssignmentOptions};
use crate::types::{Assignment, AssignmentType, GroupSelection};
use crate::validation::slug;
use anyhow::Result;
use clap::Subcommand;

/// Assignment actions
#[derive(Debug, Subcommand)]
pub enum AssignmentAction {
    /// Create an assignment over a group-set
    #[command(alias = "new")]
    Create {
        /// Assignment name (repository prefix)
        name: String,
        /// Group-set the assignment uses
        #[arg(long)]
        group_set: String,
        /// Only selected groups take part
        #[arg(long)]
        selective: bool,
        /// Description
        #[arg(long)]
        description: Option<String>,
        /// Group IDs to exclude
        #[arg(long = "exclude")]
        excluded: Vec<String>,
    },
    /// Update an assignment
    Update {
        /// Assignment ID
        id: String,
        /// New name
        #[arg(long)]
        name: Option<String>,
        /// New group-set
        #[arg(long)]
        group_set: Option<String>,
        /// Group IDs to exclude (replaces the current list)
        #[arg(long = "exclude")]
        excluded: Vec<String>,
        /// Include every group again
        #[arg(long, conflicts_with = "excluded")]
        include_all: bool,
        /// Keep exclusions when the group-set changes
        #[arg(long)]
        keep_exclusions: bool,
    },
    /// Delete an assignment
    #[command(alias = "rm")]
    Delete {
        /// Assignment ID
        id: String,
    },
    /// List assignments
    #[command(alias = "ls")]
    List,
}

fn selection(excluded: Vec<String>) -> GroupSelection {
    if excluded.is_empty() {
        GroupSelection::All
    } else {
        GroupSelection::Selected {
            excluded_group_ids: excluded,
        }
    }
}

/// Run assignment command
pub fn run(ctx: &CommandContext, action: AssignmentAction) -> Result<()> {
    match action {
        AssignmentAction::Create {
            name,
            group_set,
            selective,
            description,
            excluded,
        } => {
            if ctx.load()?.group_set(&group_set).is_none() {
                anyhow::bail!("Group-set not found: {group_set}");
            }
            let assignment = Assignment {
                id: format!("assignment:{}", slug(&name)),
                name: name.clone(),
                description,
                assignment_type: if selective {
                    AssignmentType::Selective
                } else {
                    AssignmentType::ClassWide
                },
                group_set_id: group_set,
                group_selection: selection(excluded),
            };
            let id = assignment.id.clone();
            ensure_changed(ctx.commit(|r| r.add_assignment(assignment))?, "assignment create")?;
            println!("Created assignment: {name} ({id})");
        }

        AssignmentAction::Update {
            id,
            name,
            group_set,
            excluded,
            include_all,
            keep_exclusions,
        } => {
            let roster = ctx.load()?;
            if roster.assignment(&id).is_none() {
                anyhow::bail!("Assignment not found: {id}");
            }
            if let Some(set_id) = &group_set {
                if roster.group_set(set_id).is_none() {
                    anyhow::bail!("Group-set not found: {set_id}");
                }
            }
            let group_selection = if include_all {
                Some(GroupSelection::All)
            } else if excluded.is_empty() {
                None
            } else {
                Some(selection(excluded))
            };
            let update = AssignmentUpdate {
                name,
                group_set_id: group_set,
                group_selection,
                ..AssignmentUpdate::default()
            };
            let options = UpdateAssignmentOptions {
                clear_exclusions_on_group_set_change: !keep_exclusions,
            };
            if ctx.commit(|r| r.update_assignment(&id, update, options))? {
                println!("Updated assignment: {id}");
            } else {
                println!("Assignment {id} unchanged");
            }
        }

        AssignmentAction::Delete { id } => {
            ensure_changed(ctx.commit(|r| r.remove_assignment(&id))?, "assignment delete")?;
            println!("Deleted assignment: {id}");
        }

        AssignmentAction::List => {
            let roster = ctx.load()?;
            if ctx.json {
                return ctx.print_json(&*roster.assignments);
            }
            if roster.assignments.is_empty() {
                println!("No assignments defined.");
                return Ok(());
            }
            println!("Assignments ({}):", roster.assignments.len());
            for a in roster.assignments.iter() {
                let set = roster.group_set(&a.group_set_id).map_or("<missing>", |s| s.name.as_str());
                println!(
                    "  {} ({}) - {:?} over {} [{} excluded]",
                    a.name,
                    a.id,
                    a.assignment_type,
                    set,
                    a.group_selection.excluded_group_ids().len()
                );
            }
        }
    }
    Ok(())
}
