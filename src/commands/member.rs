// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Member commands - add, edit and remove students and staff

use super::{ensure_changed, CommandContext};
use crate::roster::MemberUpdate;
use crate::types::{EnrollmentType, GitUsernameStatus, MemberSource, MemberStatus, RosterMember};
use anyhow::Result;
use clap::{Subcommand, ValueEnum};

/// Enrollment status accepted on the command line
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StatusArg {
    /// Enrolled
    Active,
    /// Left the course
    Dropped,
    /// Enrollment not finished
    Incomplete,
}

impl From<StatusArg> for MemberStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Active => Self::Active,
            StatusArg::Dropped => Self::Dropped,
            StatusArg::Incomplete => Self::Incomplete,
        }
    }
}

/// Member actions
#[derive(Debug, Subcommand)]
pub enum MemberAction {
    /// Add a student (or staff member with --staff)
    Add {
        /// Display name
        name: String,
        /// Email address
        email: String,
        /// Enroll as staff
        #[arg(long)]
        staff: bool,
        /// LMS user id
        #[arg(long)]
        lms_user_id: Option<String>,
        /// Git platform username
        #[arg(long)]
        git_username: Option<String>,
    },
    /// Update fields of a member
    Update {
        /// Member ID
        id: String,
        /// New name
        #[arg(long)]
        name: Option<String>,
        /// New email
        #[arg(long)]
        email: Option<String>,
        /// New status
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
        /// New LMS user id (empty string clears it)
        #[arg(long)]
        lms_user_id: Option<String>,
        /// New git username (empty string clears it)
        #[arg(long)]
        git_username: Option<String>,
    },
    /// Remove a member from the roster and every group
    #[command(alias = "rm")]
    Remove {
        /// Member ID
        id: String,
    },
    /// List members
    #[command(alias = "ls")]
    List,
    /// Show what removing a member would touch
    Impact {
        /// Member ID
        id: String,
    },
}

fn clearable(value: Option<String>) -> Option<Option<String>> {
    value.map(|v| if v.trim().is_empty() { None } else { Some(v) })
}

/// Run member command
pub fn run(ctx: &CommandContext, action: MemberAction) -> Result<()> {
    match action {
        MemberAction::Add {
            name,
            email,
            staff,
            lms_user_id,
            git_username,
        } => {
            let mut member = RosterMember::student(&name, &email);
            if staff {
                member.enrollment_type = EnrollmentType::Staff;
            }
            if lms_user_id.is_some() {
                member.source = MemberSource::Lms;
                member.id = RosterMember::generate_id(MemberSource::Lms, &email, &name);
            }
            member.lms_user_id = lms_user_id;
            member.git_username = git_username;
            member.git_username_status = GitUsernameStatus::Unknown;

            let id = member.id.clone();
            ensure_changed(ctx.commit(|r| r.add_member(member))?, "member add")?;
            println!("Added member: {name} ({id})");
        }

        MemberAction::Update {
            id,
            name,
            email,
            status,
            lms_user_id,
            git_username,
        } => {
            let update = MemberUpdate {
                name,
                email,
                status: status.map(MemberStatus::from),
                lms_user_id: clearable(lms_user_id),
                git_username: clearable(git_username),
                ..MemberUpdate::default()
            };
            if ctx.load()?.member(&id).is_none() {
                anyhow::bail!("Member not found: {id}");
            }
            if ctx.commit(|r| r.update_member(&id, update))? {
                println!("Updated member: {id}");
            } else {
                println!("Member {id} unchanged");
            }
        }

        MemberAction::Remove { id } => {
            let roster = ctx.load()?;
            if roster.member(&id).is_none() {
                anyhow::bail!("Member not found: {id}");
            }
            let impact = roster.removal_impact(&id);
            ctx.commit(|r| r.remove_member(&id))?;
            println!("Removed member: {id}");
            for group in &impact.groups {
                println!("  removed from group {} ({})", group.group_name, group.group_id);
            }
        }

        MemberAction::List => {
            let roster = ctx.load()?;
            if ctx.json {
                return ctx.print_json(&*roster.members);
            }
            if roster.members.is_empty() {
                println!("No members. Add one with 'rostersystem member add'.");
                return Ok(());
            }
            println!("Members ({}):", roster.members.len());
            for member in roster.members.iter() {
                println!(
                    "  {} {} <{}> [{:?}, {:?}]",
                    member.id, member.name, member.email, member.enrollment_type, member.status
                );
            }
        }

        MemberAction::Impact { id } => {
            let roster = ctx.load()?;
            if roster.member(&id).is_none() {
                anyhow::bail!("Member not found: {id}");
            }
            let impact = roster.removal_impact(&id);
            if ctx.json {
                return ctx.print_json(&impact);
            }
            if impact.is_empty() {
                println!("Removing {id} affects no groups");
                return Ok(());
            }
            println!("Removing {id} affects:");
            for group in &impact.groups {
                println!("  group {} ({}) in {}", group.group_name, group.group_id, group.group_set_ids.join(", "));
            }
            for assignment in &impact.assignment_ids {
                println!("  assignment {assignment}");
            }
        }
    }
    Ok(())
}
