// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Import and reimport commands - group-sets from delimited files

use super::{block_on, ensure_changed, CommandContext};
use crate::reimport::{self, ReimportDiff};
use anyhow::Result;
use clap::Subcommand;
use std::path::PathBuf;

/// Reimport actions
#[derive(Debug, Subcommand)]
pub enum ReimportAction {
    /// Show what a reimport would change
    Preview {
        /// Target group-set ID
        group_set: String,
        /// Group file
        file: PathBuf,
    },
    /// Replace a group-set's groups with a file's content
    Apply {
        /// Target group-set ID
        group_set: String,
        /// Group file
        file: PathBuf,
    },
}

fn print_diff(diff: &ReimportDiff) {
    println!("Matched by {:?}", diff.matched_by);
    for name in &diff.added_group_names {
        println!("  + {name}");
    }
    for name in &diff.removed_group_names {
        println!("  - {name}");
    }
    for name in &diff.updated_group_names {
        println!("  ~ {name}");
    }
    if diff.is_empty() {
        println!("  no changes");
    }
    if diff.total_missing > 0 {
        println!("  {} row(s) name members not on the roster", diff.total_missing);
    }
}

/// Run reimport command
pub fn run_reimport(ctx: &CommandContext, action: ReimportAction) -> Result<()> {
    match action {
        ReimportAction::Preview { group_set, file } => {
            let diff = reimport::preview_reimport(&ctx.load()?, &group_set, &file)?;
            if ctx.json {
                return ctx.print_json(&diff);
            }
            print_diff(&diff);
        }
        ReimportAction::Apply { group_set, file } => {
            let session = ctx.session()?;
            let diff = reimport::preview_reimport(&session.snapshot(), &group_set, &file)?;
            let committed = block_on(session.reimport(&group_set, &file))??;
            if committed {
                ctx.save(&session)?;
            }
            if ctx.json {
                return ctx.print_json(&diff);
            }
            print_diff(&diff);
            println!("Reimported {} into {}", file.display(), group_set);
        }
    }
    Ok(())
}

/// Run import command: create a new group-set from a file
pub fn run_import(ctx: &CommandContext, name: &str, file: &std::path::Path) -> Result<()> {
    let session = ctx.session()?;
    let changed = session.try_mutate(|r| reimport::import_group_set(r, name, file))?;
    ensure_changed(changed, "import")?;
    ctx.save(&session)?;
    let roster = session.snapshot();
    if let Some(set) = roster.group_sets.last() {
        println!("Imported {} groups into {} ({})", set.group_ids.len(), set.name, set.id);
    }
    Ok(())
}
