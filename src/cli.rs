//! Command-line interface definition for sessync
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands to list, load and save stored sessions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// sessync - session persistence and sync
///
/// Index, load and save assistant session documents kept in a local
/// directory and an optional WebDAV remote.
#[derive(Parser, Debug, Clone)]
#[command(name = "sessync")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Override the local sessions directory
    #[arg(long)]
    pub sessions_dir: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for sessync
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List indexed sessions per assistant
    List {
        /// Only show sessions of this assistant
        #[arg(short, long)]
        assistant: Option<String>,

        /// Print the index as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print a stored session document
    Load {
        /// Item id, conversation id or conversation name
        id: String,
    },

    /// Persist a session document into the local sessions directory
    Save {
        /// JSON file holding the session document
        file: PathBuf,

        /// Conversation name to store it under
        #[arg(short, long)]
        name: Option<String>,

        /// Owning assistant (defaults to the document's CODE)
        #[arg(short, long)]
        assistant: Option<String>,
    },

    /// Print the snapshot signature of a session document
    Signature {
        /// JSON file holding the session document
        file: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            sessions_dir: None,
            command: Commands::List {
                assistant: None,
                json: false,
            },
        }
    }
}
