// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
//! Rostersystem CLI - keep course rosters, groups and assignments consistent

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use rostersystem::commands::{self, CommandContext};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rostersystem")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Configuration file path
    #[arg(short, long, env = "ROSTERSYSTEM_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Data directory override
    #[arg(long, env = "ROSTERSYSTEM_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Disable colored output
    #[arg(
        long,
        env = "NO_COLOR",
        global = true,
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    no_color: bool,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage students and staff
    Member {
        #[command(subcommand)]
        action: commands::member::MemberAction,
    },

    /// Manage groups
    Group {
        #[command(subcommand)]
        action: commands::group::GroupAction,
    },

    /// Manage assignments
    Assignment {
        #[command(subcommand)]
        action: commands::assignment::AssignmentAction,
    },

    /// Manage group-sets and LMS synchronization
    #[command(name = "groupset")]
    GroupSet {
        #[command(subcommand)]
        action: commands::groupset::GroupSetAction,
    },

    /// Connect the roster to an LMS course
    Course {
        #[command(subcommand)]
        action: commands::course::CourseAction,
    },

    /// Replace a group-set's groups from a file
    Reimport {
        #[command(subcommand)]
        action: commands::import::ReimportAction,
    },

    /// Create a new group-set from a group file
    Import {
        /// Name of the new group-set
        name: String,

        /// Group file (comma, tab or semicolon separated)
        file: PathBuf,
    },

    /// List integrity issues
    Validate {
        /// Only check this assignment
        #[arg(long)]
        assignment: Option<String>,

        /// Exit with an error if any issue is found
        #[arg(long)]
        strict: bool,
    },

    /// Export the roster
    Export {
        /// Output format (json, csv, repos)
        #[arg(short, long, default_value = "json")]
        format: String,

        /// Output file (stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Group-set to export (csv)
        #[arg(long)]
        group_set: Option<String>,
    },

    /// Get or set configuration
    Config {
        /// Configuration key
        key: String,

        /// Value to set (omit to get)
        value: Option<String>,
    },

    /// Generate shell completions
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        shell: clap_complete::Shell,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(rostersystem::config::default_config_path);
    let mut config = rostersystem::config::load(Some(&config_path))?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    // Initialize logging
    let log_level = match cli.verbose {
        0 if cli.quiet => tracing::Level::ERROR,
        0 => config.log_level.parse().unwrap_or(tracing::Level::INFO),
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let ctx = CommandContext {
        config,
        config_path,
        json: cli.json,
    };

    // Execute command
    match cli.command {
        Commands::Member { action } => commands::member::run(&ctx, action),
        Commands::Group { action } => commands::group::run(&ctx, action),
        Commands::Assignment { action } => commands::assignment::run(&ctx, action),
        Commands::GroupSet { action } => commands::groupset::run(&ctx, action),
        Commands::Course { action } => commands::course::run(&ctx, action),
        Commands::Reimport { action } => commands::import::run_reimport(&ctx, action),
        Commands::Import { name, file } => commands::import::run_import(&ctx, &name, &file),
        Commands::Validate { assignment, strict } => {
            commands::validate::run(&ctx, assignment, strict, !cli.no_color)
        }
        Commands::Export { format, output, group_set } => {
            commands::export::run(&ctx, &format, output, group_set)
        }
        Commands::Config { key, value } => commands::config::run(&ctx, &key, value),
        Commands::Completions { shell } => commands::completions::run(shell, Cli::command()),
    }
}
