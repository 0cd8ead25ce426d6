// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Export command - exports the roster to various formats

use super::CommandContext;
use crate::types::Roster;
use crate::validation::repo_name;
use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

/// Supported export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// The roster document as JSON
    Json,
    /// Group memberships as a reimportable CSV table
    Csv,
    /// Repository names per assignment, one per line
    Repos,
}

impl ExportFormat {
    /// Parse format from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "csv" => Some(Self::Csv),
            "repos" | "repositories" => Some(Self::Repos),
            _ => None,
        }
    }
}

fn quote(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Memberships of one group-set in the reimport file layout
fn to_csv(roster: &Roster, group_set: &str) -> Result<String> {
    if roster.group_set(group_set).is_none() {
        anyhow::bail!("Group-set not found: {group_set}");
    }
    let mut out = String::from("group_id,group_name,member_id,email\n");
    for group in roster.groups_in_set(group_set) {
        if group.member_ids.is_empty() {
            writeln!(out, "{},{},,", quote(&group.id), quote(&group.name))?;
        }
        for member_id in &group.member_ids {
            let email = roster.member(member_id).map_or("", |m| m.email.as_str());
            writeln!(
                out,
                "{},{},{},{}",
                quote(&group.id),
                quote(&group.name),
                quote(member_id),
                quote(email)
            )?;
        }
    }
    Ok(out)
}

fn to_repos(roster: &Roster) -> String {
    let mut out = String::new();
    for assignment in roster.assignments.iter() {
        for group in roster.groups_in_set(&assignment.group_set_id) {
            if assignment.group_selection.includes(&group.id) {
                out.push_str(&repo_name(assignment, group));
                out.push('\n');
            }
        }
    }
    out
}

/// Run the export command
pub fn run(ctx: &CommandContext, format: &str, output: Option<PathBuf>, group_set: Option<String>) -> Result<()> {
    info!("Exporting to {}", format);

    let export_format = ExportFormat::parse(format)
        .ok_or_else(|| anyhow::anyhow!("Unknown export format: {}. Supported: json, csv, repos", format))?;

    let roster = ctx.load()?;
    let content = match export_format {
        ExportFormat::Json => serde_json::to_string_pretty(&roster).context("Failed to serialize roster")?,
        ExportFormat::Csv => {
            let set = group_set.ok_or_else(|| anyhow::anyhow!("CSV export needs --group-set"))?;
            to_csv(&roster, &set)?
        }
        ExportFormat::Repos => to_repos(&roster),
    };

    match output {
        Some(path) => {
            fs::write(&path, &content).with_context(|| format!("Failed to write to {}", path.display()))?;
            println!("Exported to {}", path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(content.as_bytes())?;
            if !content.ends_with('\n') {
                stdout.write_all(b"\n")?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Group, GroupSet, RosterMember};

    #[test]
    fn test_csv_round_trips_through_reimport_layout() {
        let mut alice = RosterMember::student("Alice", "alice@uni.edu");
        alice.id = "member:alice".into();
        let roster = Roster::new()
            .add_member(alice)
            .add_group_set(GroupSet::local("groupset:t", "Teams"))
            .add_group("groupset:t", Group::local("group:a", "Team, A", vec!["member:alice".into()]))
            .add_group("groupset:t", Group::local("group:b", "Team B", vec![]));
        let csv = to_csv(&roster, "groupset:t").unwrap();
        assert_eq!(
            csv,
            "group_id,group_name,member_id,email\ngroup:a,\"Team, A\",member:alice,alice@uni.edu\ngroup:b,Team B,,\n"
        );
    }
}
