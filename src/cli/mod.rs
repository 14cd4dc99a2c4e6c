//! CLI module for switchboard
//!
//! Provides command-line interface parsing and handling for the switchboard binary.
//! Uses clap for argument parsing and owo-colors for colored terminal output.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// switchboard - hierarchical agent routing for chat messages
///
/// Routes each message through a Router, a Department and a Specialist
/// agent, logging the decision chain of every request.
#[derive(Parser, Debug)]
#[command(
    name = "switchboard",
    version,
    about = "Hierarchical agent routing for chat messages",
    after_help = "EXAMPLES:\n    \
                  switchboard seed hierarchy.toml                 # Load agents and tools\n    \
                  switchboard provision store-1 --instance Acme   # Create the default structure\n    \
                  switchboard ask store-1 \"Do you sell sneakers?\" # Answer one message\n    \
                  switchboard chat store-1                        # Talk line by line\n    \
                  switchboard executions store-1 --limit 5        # Show the audit log"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "switchboard.toml", global = true)]
    pub config: PathBuf,

    /// Database path or URL, overriding `database.url`
    #[arg(long, global = true, env = "SWITCHBOARD_DATABASE")]
    pub database: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Answer one message through the agent hierarchy
    Ask {
        /// Scope (instance) the message arrived on
        scope: String,

        /// Message text
        message: String,

        /// Conversation key for history (defaults to the scope)
        #[arg(long)]
        conversation: Option<String>,
    },

    /// Interactive session: one message per line, sharing one conversation
    ///
    /// Edits to the config file are picked up between messages.
    Chat {
        /// Scope (instance) to talk to
        scope: String,

        /// Conversation key for history (defaults to the scope)
        #[arg(long)]
        conversation: Option<String>,
    },

    /// Load tools and agents from a hierarchy TOML file
    Seed {
        /// Path to the hierarchy file
        file: PathBuf,
    },

    /// Create the default Router / General Support / Product Assistant structure
    ///
    /// Registers the built-in tools first when they are missing.
    Provision {
        /// Scope to provision
        scope: String,

        /// Display name used for the router
        #[arg(long, default_value = "Switchboard")]
        instance: String,
    },

    /// List the agents of a scope
    Agents {
        /// Scope to list
        scope: String,
    },

    /// Deactivate an agent and everything below it
    Deactivate {
        /// Agent ID
        id: String,
    },

    /// Show recent execution records
    Executions {
        /// Scope to show
        scope: String,

        /// Number of records
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Show configuration information
    Config {
        /// Validate the configuration file
        #[arg(long)]
        validate: bool,
    },
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
