//! CLI interface for the hub
//!
//! Defines all commands and global flags using clap's derive API. Commands
//! that take a `<MODULE>` accept either a path to a module directory or the
//! id of a module under the configured modules root.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CPOS Hub module supply chain and lifecycle tool
#[derive(Parser, Debug)]
#[command(name = "hub")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate a module directory
    Validate {
        /// Module directory or module id
        module: String,

        /// Treat warnings as errors
        #[arg(long)]
        strict: bool,
    },

    /// Sign a module directory
    Sign {
        /// Module directory or module id
        module: String,

        /// PKCS#8 PEM private key (defaults to the developer key)
        #[arg(long, value_name = "PATH")]
        key_file: Option<PathBuf>,

        /// Replace an existing signature
        #[arg(long)]
        force: bool,
    },

    /// Verify a module's signature against the trusted keys
    Verify {
        /// Module directory or module id
        module: String,
    },

    /// Build a distributable archive
    Package {
        /// Module directory or module id
        module: String,

        /// Where to write the archive (defaults to packaging.output_dir)
        #[arg(long, value_name = "DIR")]
        output_dir: Option<PathBuf>,

        /// Package without running the validator
        #[arg(long)]
        skip_validation: bool,
    },

    /// Install an archive as an inactive module
    Install {
        /// Archive path or https URL
        archive: String,

        /// Expected SHA-256 of a downloaded archive
        #[arg(long, value_name = "HEX")]
        sha256: Option<String>,
    },

    /// Activate an installed module
    Activate {
        /// Module id
        id: String,
    },

    /// Deactivate an active module
    Deactivate {
        /// Module id
        id: String,
    },

    /// Delete a module and notify the cloud
    Delete {
        /// Module id
        id: String,
    },

    /// List modules
    List {
        /// Include inactive modules
        #[arg(long)]
        all: bool,
    },

    /// Inspect and drive the sync queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },

    /// Manage signing and trusted keys
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },

    /// Manage the control-plane connection
    Cloud {
        #[command(subcommand)]
        action: CloudAction,
    },

    /// Run system diagnostics
    Doctor,

    /// Run the hub daemon in the foreground
    Serve,
}

/// Sync queue actions
#[derive(Subcommand, Debug)]
pub enum QueueAction {
    /// Show row counts per status
    Stats,

    /// Deliver due operations now
    Drain {
        /// Maximum rows to deliver (defaults to sync.batch_size)
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Reset a failed operation so it is delivered again
    Retry {
        /// Queue entry id
        id: String,
    },

    /// List queue entries
    List {
        /// Only entries with this status (pending, processing, completed, failed)
        #[arg(long)]
        status: Option<String>,

        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// Delete completed entries
    Purge {
        /// Only entries completed more than this many days ago
        #[arg(long, default_value = "7")]
        older_than_days: u32,
    },
}

/// Key management actions
#[derive(Subcommand, Debug)]
pub enum KeysAction {
    /// Generate the developer signing key
    Generate {
        /// Replace an existing key
        #[arg(long)]
        force: bool,
    },

    /// Show the developer public key
    Show,

    /// Add a public key to the trusted key store
    Trust {
        /// Name for the key in the store
        name: String,

        /// SPKI PEM public key file
        path: PathBuf,
    },
}

/// Cloud connection actions
#[derive(Subcommand, Debug)]
pub enum CloudAction {
    /// Store the cloud token in the OS keychain (read from stdin if omitted)
    SetToken {
        token: Option<String>,
    },

    /// Remove the cloud token from the OS keychain
    ClearToken,
}
