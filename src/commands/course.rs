// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Course command - connect the roster to an LMS course

use super::CommandContext;
use crate::types::{LmsContext, LmsType, Roster};
use anyhow::Result;
use clap::{Subcommand, ValueEnum};

/// LMS flavors accepted on the command line
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LmsArg {
    /// Canvas
    Canvas,
    /// Moodle
    Moodle,
}

impl From<LmsArg> for LmsType {
    fn from(arg: LmsArg) -> Self {
        match arg {
            LmsArg::Canvas => Self::Canvas,
            LmsArg::Moodle => Self::Moodle,
        }
    }
}

/// Course actions
#[derive(Debug, Subcommand)]
pub enum CourseAction {
    /// Connect the roster to a course
    Set {
        /// LMS flavor
        #[arg(long, value_enum)]
        lms: LmsArg,
        /// LMS base URL
        #[arg(long)]
        base_url: String,
        /// Course ID on the LMS
        #[arg(long)]
        course_id: String,
    },
    /// Show the connected course
    Show,
}

/// Run course command
pub fn run(ctx: &CommandContext, action: CourseAction) -> Result<()> {
    match action {
        CourseAction::Set { lms, base_url, course_id } => {
            let context = LmsContext {
                lms_type: lms.into(),
                base_url: base_url.trim_end_matches('/').to_string(),
                course_id,
            };
            let shown = format!("{} course {} ({:?})", context.base_url, context.course_id, context.lms_type);
            ctx.commit(|r| Roster {
                lms: Some(context),
                ..r.clone()
            })?;
            println!("Connected to {shown}");
        }
        CourseAction::Show => match &ctx.load()?.lms {
            Some(context) if ctx.json => ctx.print_json(context)?,
            Some(context) => println!(
                "{} course {} ({:?})",
                context.base_url, context.course_id, context.lms_type
            ),
            None => println!("No LMS course configured."),
        },
    }
    Ok(())
}
