//! CLI module for lexio
//!
//! Provides command-line interface parsing for the lexio-server binary.
//! Uses clap for argument parsing and owo-colors for colored terminal output.

pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// lexio - retrieval-augmented generation server
///
/// Indexes documents into highlightable passages and streams grounded answers
/// over Server-Sent Events.
#[derive(Parser, Debug)]
#[command(
    name = "lexio-server",
    version,
    about = "lexio - retrieval-augmented generation server",
    long_about = "Indexes document collections into token-bounded passages with page and\n\
                  bounding-box provenance, and streams grounded LLM answers over SSE.\n\n\
                  Run without arguments to start the server, or use 'ingest' to index documents.",
    after_help = "EXAMPLES:\n    \
                  lexio-server                       # Start the server (reads lexio.toml)\n    \
                  lexio-server ingest ./data         # Index a directory\n    \
                  lexio-server ingest ./data --rebuild\n    \
                  lexio-server config --validate     # Check the configuration\n    \
                  lexio-server --config my.toml      # Use a custom config file"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "lexio.toml", global = true)]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Index a file or directory tree into the vector store
    ///
    /// Unchanged passages keep their stored embeddings; passages that no
    /// longer exist are removed.
    Ingest {
        /// File or directory to index (defaults to rag.data_dir)
        path: Option<PathBuf>,

        /// Drop the table before indexing
        #[arg(long)]
        rebuild: bool,
    },

    /// Show the effective configuration
    Config {
        /// Only validate the configuration, do not print it
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
