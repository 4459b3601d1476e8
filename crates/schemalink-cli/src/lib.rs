//! # SchemaLink CLI
//!
//! Thin command-line front end over [`schemalink_client::SchemaLinkClient`].
//!
//! ```text
//! schemalink call get_table_schema --params '{"database":"fin","table":"accounts"}'
//! schemalink health --mode fallback-only
//! schemalink watch --log-format json
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod cli;
pub mod commands;
pub mod logging;

pub use cli::{Cli, Commands, LogFormat, ModeArg};

use clap::Parser;

/// Parse arguments, initialize logging and run the command.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format)?;
    commands::execute(cli).await
}
