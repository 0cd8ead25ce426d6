// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
//! Command implementations

pub mod assignment;
pub mod completions;
pub mod config;
pub mod course;
pub mod export;
pub mod group;
pub mod groupset;
pub mod import;
pub mod member;
pub mod validate;

use crate::config::Config;
use crate::session::{RosterSession, SessionOptions};
use crate::types::Roster;
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;

/// Settings shared by every command
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// Effective configuration
    pub config: Config,
    /// Configuration file in use
    pub config_path: PathBuf,
    /// Emit JSON instead of text
    pub json: bool,
}

impl CommandContext {
    /// Directory holding `roster.json` and `lms.json`
    #[must_use]
    pub fn data_dir(&self) -> &std::path::Path {
        &self.config.data_dir
    }

    /// Load the roster document
    pub fn load(&self) -> Result<Roster> {
        Roster::load(self.data_dir())
            .with_context(|| format!("Failed to load roster from {}", self.data_dir().display()))
    }

    /// Open a session on the stored roster
    pub fn session(&self) -> Result<RosterSession> {
        Ok(RosterSession::new(self.load()?, SessionOptions::from(&self.config)))
    }

    /// Persist the session's current document
    pub fn save(&self, session: &RosterSession) -> Result<()> {
        session.snapshot().save(self.data_dir())
    }

    /// Apply one mutation to the stored roster and save it
    ///
    /// Returns `false` (and leaves the file alone) if nothing changed.
    pub fn commit(&self, f: impl FnOnce(&Roster) -> Roster) -> Result<bool> {
        let session = self.session()?;
        let before = session.report().issues.len();
        if !session.mutate(f) {
            return Ok(false);
        }
        self.save(&session)?;
        let after = session.report().issues.len();
        if after != before && !self.json {
            println!("  validation: {before} -> {after} issues");
        }
        Ok(true)
    }

    /// Print a value as JSON
    pub fn print_json<T: Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value).context("Failed to serialize output")?);
        Ok(())
    }
}

/// Bail unless a mutation changed the roster
pub(crate) fn ensure_changed(changed: bool, what: &str) -> Result<()> {
    if changed {
        Ok(())
    } else {
        anyhow::bail!("{what}: nothing changed")
    }
}

/// Run an async command to completion on a single-threaded runtime
pub(crate) fn block_on<F: std::future::Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    Ok(runtime.block_on(future))
}
