use super::build_indexer;
use crate::config::Config;
use crate::error::{Result, SessyncError};
use crate::index::SessionIndex;
use crate::storage::{SessionListItem, SessionSource};
use colored::Colorize;
use prettytable::{format, Table};
use serde_json::json;

/// Refresh the index and print it, optionally for one assistant only
pub async fn list_sessions(config: &Config, assistant: Option<&str>, json: bool) -> Result<()> {
    let indexer = build_indexer(config);
    let index = indexer.refresh_index(true).await;

    if let Some(error) = indexer.last_error() {
        eprintln!("{} {}", "Some sources failed:".yellow(), error);
    }

    let codes: Vec<&String> = index
        .assistants()
        .iter()
        .filter(|code| assistant.map_or(true, |wanted| wanted == code.as_str()))
        .collect();

    if json {
        let groups: Vec<_> = codes
            .iter()
            .map(|code| json!({"assistant": code, "sessions": index.sessions_for(code)}))
            .collect();
        println!("{}", serde_json::to_string_pretty(&groups)?);
        return Ok(());
    }

    if codes.is_empty() {
        println!("{}", "No enabled assistants.".yellow());
        return Ok(());
    }

    for code in codes {
        print_assistant(&index, code);
    }
    println!(
        "Use {} to print a session.",
        "sessync load <ID>".cyan()
    );
    println!();
    Ok(())
}

fn print_assistant(index: &SessionIndex, code: &str) {
    let sessions = index.sessions_for(code);
    println!("\n{} ({})", code.bold(), sessions.len());
    if sessions.is_empty() {
        println!("  {}", "No sessions found.".yellow());
        return;
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(prettytable::row![
        "ID".bold(),
        "Name".bold(),
        "Source".bold(),
        "Last Updated".bold(),
        "Preview".bold()
    ]);

    for item in sessions {
        table.add_row(prettytable::row![
            crate::index::cache::file_stem(&item.basename).cyan(),
            item.conversation_name,
            source_label(item),
            item.lastmod.format("%Y-%m-%d %H:%M").to_string(),
            item.preview
        ]);
    }
    table.printstd();
}

fn source_label(item: &SessionListItem) -> String {
    match item.source {
        SessionSource::Local => "local".green().to_string(),
        SessionSource::Cloud => "cloud".blue().to_string(),
    }
}

/// Find a session in the index and print its document
pub async fn load_session(config: &Config, id: &str) -> Result<()> {
    let indexer = build_indexer(config);
    let index = indexer.refresh_index(true).await;

    let item = index
        .find(id)
        .ok_or_else(|| SessyncError::Storage(format!("Session not found: {}", id)))?;
    tracing::info!("Loading session {} from {}", item.basename, item.source);

    let loaded = indexer.load_session_payload(item).await?;
    println!("{}", serde_json::to_string_pretty(&loaded.session_data)?);
    Ok(())
}
