//! CLI argument parsing for chatloom

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "cl")]
#[command(author, version, about = "Chat exchange recorder and app orchestrator", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Extract the first fenced code block from a saved response file
    Extract {
        /// Path to the response text file (- for stdin)
        #[arg(required = true)]
        path: String,
    },

    /// Print the parsed Product and Architecture sections of a response file
    Sections {
        /// Path to the response text file (- for stdin)
        #[arg(required = true)]
        path: String,
    },

    /// Send a prompt to the configured model and orchestrate the result
    Generate {
        /// The prompt text
        #[arg(required = true)]
        prompt: String,

        /// Session id to record the exchange under
        #[arg(short, long, default_value = "cli")]
        session: String,
    },

    /// List stored apps, newest first
    History {
        /// Show the full HTML of each entry
        #[arg(long)]
        full: bool,
    },

    /// Print a stored app's HTML by id
    Show {
        /// Stored app id
        #[arg(required = true)]
        id: String,
    },

    /// Delete a stored app by id
    Delete {
        /// Stored app id
        #[arg(required = true)]
        id: String,
    },

    /// Print the effective configuration
    Config {
        /// Write the effective configuration to the default config path
        #[arg(long)]
        init: bool,
    },
}
