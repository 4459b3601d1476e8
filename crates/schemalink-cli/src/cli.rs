//! CLI argument parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use schemalink_client::TransportMode;

/// Main CLI application structure
#[derive(Parser, Debug)]
#[command(
    name = "schemalink",
    version,
    about = "Call tools on a SchemaLink schema/tool server",
    long_about = "SchemaLink CLI issues tool calls over the persistent socket with HTTP fallback.\n\
                  Configuration is layered: built-in defaults, then --config FILE,\n\
                  then SCHEMALINK__* environment variables (e.g. SCHEMALINK__WEBSOCKET__URL).\n\
                  Logs go to stderr and honour RUST_LOG."
)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, short = 'c', global = true, env = "SCHEMALINK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the transport mode
    #[arg(long, global = true, value_enum)]
    pub mode: Option<ModeArg>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

/// Available subcommands
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Call a tool and print its result
    Call {
        /// Tool method name
        method: String,

        /// Parameters as a JSON document
        #[arg(long, short = 'p', default_value = "{}")]
        params: String,

        /// Per-call timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Probe every configured transport
    Health,

    /// Print server events until interrupted
    Watch,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

/// Transport mode override
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Socket with HTTP fallback
    Hybrid,
    /// Socket only
    PrimaryOnly,
    /// HTTP only
    FallbackOnly,
}

impl From<ModeArg> for TransportMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Hybrid => Self::Hybrid,
            ModeArg::PrimaryOnly => Self::PrimaryOnly,
            ModeArg::FallbackOnly => Self::FallbackOnly,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_call_parsing() {
        let cli = Cli::try_parse_from([
            "schemalink",
            "call",
            "get_table_schema",
            "--params",
            r#"{"database":"fin","table":"accounts"}"#,
            "--timeout-ms",
            "500",
        ])
        .unwrap();

        assert_eq!(
            cli.command,
            Commands::Call {
                method: "get_table_schema".to_string(),
                params: r#"{"database":"fin","table":"accounts"}"#.to_string(),
                timeout_ms: Some(500),
            }
        );
        assert_eq!(cli.log_format, LogFormat::Text);
        assert!(cli.mode.is_none());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "schemalink",
            "health",
            "--config",
            "schemalink.toml",
            "--log-format",
            "json",
            "--mode",
            "fallback-only",
        ])
        .unwrap();

        assert_eq!(cli.command, Commands::Health);
        assert_eq!(cli.config, Some(PathBuf::from("schemalink.toml")));
        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(cli.mode.map(TransportMode::from), Some(TransportMode::FallbackOnly));
    }

    #[test]
    fn test_call_defaults_to_empty_params() {
        let cli = Cli::try_parse_from(["schemalink", "call", "discover_databases"]).unwrap();
        let Commands::Call { params, .. } = cli.command else {
            unreachable!()
        };
        assert_eq!(params, "{}");
    }

    #[test]
    fn test_call_requires_method() {
        assert!(Cli::try_parse_from(["schemalink", "call"]).is_err());
    }
}
