// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Validate command - list integrity issues

use super::CommandContext;
use crate::types::{IssueKind, ValidationIssue};
use crate::validation;
use anyhow::Result;
use owo_colors::OwoColorize;

fn is_error(kind: IssueKind) -> bool {
    matches!(
        kind,
        IssueKind::DuplicateMemberId
            | IssueKind::DuplicateEmail
            | IssueKind::DuplicateGroupId
            | IssueKind::DuplicateRepoName
            | IssueKind::OrphanGroupMember
    )
}

fn print_issue(issue: &ValidationIssue, color: bool) {
    let label = issue.kind.label();
    let scope = issue
        .assignment_id
        .as_deref()
        .map(|a| format!(" [{a}]"))
        .unwrap_or_default();
    let ids = issue.affected_ids.join(", ");
    match (color, is_error(issue.kind)) {
        (true, true) => println!("  {}{}: {}", label.red().bold(), scope, ids),
        (true, false) => println!("  {}{}: {}", label.yellow(), scope, ids),
        (false, _) => println!("  {label}{scope}: {ids}"),
    }
}

/// Run validate command
pub fn run(ctx: &CommandContext, assignment: Option<String>, strict: bool, color: bool) -> Result<()> {
    let roster = ctx.load()?;
    let issues = match &assignment {
        Some(id) => {
            if roster.assignment(id).is_none() {
                anyhow::bail!("Assignment not found: {id}");
            }
            validation::validate_assignment(&roster, id)
        }
        None => validation::validate(&roster),
    };

    if ctx.json {
        ctx.print_json(&issues)?;
    } else if issues.is_empty() {
        println!("No issues found");
    } else {
        println!("{} issue(s):", issues.len());
        for issue in &issues {
            print_issue(issue, color);
        }
    }

    if strict && !issues.is_empty() {
        anyhow::bail!("{} validation issue(s)", issues.len());
    }
    Ok(())
}
