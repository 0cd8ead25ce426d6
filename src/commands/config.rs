// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Config command - read effective settings, write the config file

use super::CommandContext;
use anyhow::{Context, Result};
use std::fs;

/// Run config command: print `key`, or store `value` under it
pub fn run(ctx: &CommandContext, key: &str, value: Option<String>) -> Result<()> {
    let effective = serde_json::to_value(&ctx.config).context("Failed to serialize configuration")?;
    if effective.get(key).is_none() {
        anyhow::bail!("Unknown configuration key: {key}");
    }

    let Some(value) = value else {
        match &effective[key] {
            serde_json::Value::String(s) => println!("{s}"),
            other => println!("{other}"),
        }
        return Ok(());
    };

    let path = &ctx.config_path;
    let mut table: toml::Table = if path.exists() {
        let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        content
            .parse()
            .with_context(|| format!("Failed to parse {}", path.display()))?
    } else {
        toml::Table::new()
    };

    let parsed = if effective[key].is_number() {
        toml::Value::Integer(
            value
                .parse()
                .with_context(|| format!("{key} expects an integer, got '{value}'"))?,
        )
    } else {
        toml::Value::String(value.clone())
    };
    table.insert(key.to_string(), parsed);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    fs::write(path, toml::to_string_pretty(&table).context("Failed to serialize configuration")?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!("Setting {} = {}", key, value);
    println!("{key} = {value}");
    Ok(())
}
