//! Shared CLI definitions for censo.
//!
//! Used by the server binary and by the build script (manpage) and
//! gen_docs binary (command-line-options markdown).

use clap::{CommandFactory, Parser, ValueEnum};
use std::path::PathBuf;

/// Output layout for log lines
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-field lines with targets and span context
    Full,
    /// Shorter lines, span context collapsed
    Compact,
}

impl LogFormat {
    /// Parse a format name as written in the config file ("full", "compact").
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "full" => Some(Self::Full),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Compact => "compact",
        }
    }
}

/// Command-line arguments for censo
#[derive(Clone, Parser, Debug, Default)]
#[command(
    name = "censo",
    version,
    about = "Census record store backed by a single spreadsheet file",
    long_about = include_str!("../long_about.txt")
)]
pub struct Args {
    /// Spreadsheet file holding the census (overrides config [store] path)
    #[arg(long = "file", short = 'f', value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// Worksheet holding the census (overrides config [store] sheet)
    #[arg(long = "sheet", value_name = "SHEET")]
    pub sheet: Option<String>,

    /// Address to listen on, e.g. 127.0.0.1:8080 (overrides config [server] bind)
    #[arg(long = "bind", value_name = "ADDR")]
    pub bind: Option<String>,

    /// Read configuration from this file instead of ~/.config/censo/config.toml
    #[arg(long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log filter directive, e.g. "info" or "censo=debug" (RUST_LOG takes precedence)
    #[arg(long = "log-filter", value_name = "FILTER")]
    pub log_filter: Option<String>,

    /// Log line layout
    #[arg(long = "log-format", value_enum)]
    pub log_format: Option<LogFormat>,

    /// Generate default configuration file at ~/.config/censo/config.toml
    #[arg(long = "generate-config", action)]
    pub generate_config: bool,

    /// Force overwrite existing config file when using --generate-config
    #[arg(long = "force", requires = "generate_config", action)]
    pub force: bool,
}

/// Escape `|` and newlines for use in markdown table cells.
fn escape_table_cell(s: &str) -> String {
    s.replace('|', "\\|").replace(['\n', '\r'], " ")
}

/// Render command-line options as markdown.
///
/// Used by the gen_docs binary; output is written to stdout.
pub fn render_options_markdown() -> String {
    let mut cmd = Args::command();
    cmd.build();

    let mut out = String::from("# Command Line Options\n\n");

    out.push_str("## Usage\n\n```\n");
    let usage = cmd.render_usage();
    out.push_str(&usage.to_string());
    out.push_str("\n```\n\n");

    out.push_str("## Options\n\n");
    out.push_str("| Option | Description |\n");
    out.push_str("|--------|-------------|\n");

    for arg in cmd.get_arguments() {
        let id = arg.get_id().as_ref().to_string();
        if id == "help" || id == "version" {
            continue;
        }

        let mut parts = Vec::new();
        if let Some(s) = arg.get_short() {
            parts.push(format!("-{s}"));
        }
        if let Some(l) = arg.get_long() {
            parts.push(format!("--{l}"));
        }
        let op = parts.join(", ");
        let placeholder: String = if arg.get_action().takes_values() {
            arg.get_value_names()
                .map(|names| {
                    names
                        .iter()
                        .map(|n: &clap::builder::Str| format!("<{}>", n.as_ref() as &str))
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .unwrap_or_default()
        } else {
            String::new()
        };
        let option_str = if placeholder.is_empty() {
            op
        } else {
            format!("{op} {placeholder}")
        };

        let help = arg
            .get_help()
            .map(|h| escape_table_cell(&h.to_string()))
            .unwrap_or_else(|| "-".to_string());

        out.push_str(&format!("| `{option_str}` | {help} |\n"));
    }

    out
}
