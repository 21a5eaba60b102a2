//! CLI argument parsing definitions
//!
//! clap handles flags and the known subcommands; everything else falls
//! into the external-subcommand bucket so we can answer with recovery
//! suggestions (`run` -> `call`) or detect the server-name-first
//! ambiguity instead of clap's generic error.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use crate::error::CliError;

#[derive(Parser)]
#[command(
    name = "mcpq",
    version,
    about = "Command-line MCP client: list, inspect and call tools on configured servers",
    disable_version_flag = true
)]
pub struct Cli {
    /// Path to the configuration file (default: mcp.json discovery)
    #[arg(short = 'c', long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Include tool descriptions in listings
    #[arg(short = 'd', long, global = true)]
    pub with_descriptions: bool,

    /// Print version
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    version: Option<bool>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show one server, or one of its tools
    Info {
        /// Server name
        server: String,
        /// Tool name (optional)
        tool: Option<String>,
    },

    /// Search tool names across all servers (glob pattern)
    Grep {
        /// Glob pattern; without wildcards it matches as a substring
        pattern: String,
    },

    /// Invoke a tool: `call <server> <tool> [<json>]` or `call <server>/<tool> [<json>]`
    Call {
        /// Target and arguments
        #[arg(required = true)]
        args: Vec<String>,
    },

    /// Run as a connection daemon for one server (internal use)
    #[command(hide = true, name = "daemon-worker")]
    DaemonWorker {
        /// Server name
        server: String,
    },

    #[command(external_subcommand)]
    External(Vec<String>),
}

/// Subcommand aliases that agents keep guessing; each maps to the real
/// subcommand named in the suggestion.
const ALIASES: [(&str, &str); 8] = [
    ("run", "call"),
    ("exec", "call"),
    ("invoke", "call"),
    ("ls", "list"),
    ("show", "list"),
    ("search", "grep"),
    ("find", "grep"),
    ("describe", "info"),
];

/// Turn an unrecognised first token into the right recovery error.
pub fn resolve_external(tokens: &[String]) -> CliError {
    let Some(first) = tokens.first() else {
        return CliError::MissingArgument {
            what: "subcommand".to_string(),
        };
    };

    if let Some((_, intended)) = ALIASES.iter().find(|(alias, _)| alias == first) {
        return CliError::UnknownSubcommand {
            given: first.clone(),
            intended: Some(intended),
        };
    }

    // `mcpq fs read_file {...}` reads like a call with the subcommand
    // left out, but `fs` could equally be a typoed subcommand.
    if tokens.len() >= 2 {
        return CliError::AmbiguousCommand {
            server: first.clone(),
            tool: tokens[1].clone(),
            json: tokens.get(2).map(|json| format!("'{json}'")),
        };
    }

    CliError::UnknownSubcommand {
        given: first.clone(),
        intended: None,
    }
}

/// A resolved `call` invocation.
#[derive(Debug, PartialEq, Eq)]
pub struct CallTarget {
    pub server: String,
    pub tool: String,
    pub json: Option<String>,
}

/// Accepts both `<server> <tool> [<json>]` and `<server>/<tool> [<json>]`.
pub fn resolve_call_args(args: &[String]) -> Result<CallTarget, CliError> {
    let Some(first) = args.first() else {
        return Err(CliError::MissingArgument {
            what: "server and tool".to_string(),
        });
    };

    if let Some((server, tool)) = first.split_once('/') {
        if server.is_empty() || tool.is_empty() || tool.contains('/') {
            return Err(CliError::InvalidTarget {
                given: first.clone(),
            });
        }
        if args.len() > 2 {
            return Err(CliError::TooManyArguments {
                command: "call".to_string(),
            });
        }
        return Ok(CallTarget {
            server: server.to_string(),
            tool: tool.to_string(),
            json: args.get(1).cloned(),
        });
    }

    let Some(tool) = args.get(1) else {
        return Err(CliError::MissingArgument {
            what: "tool name".to_string(),
        });
    };
    if args.len() > 3 {
        return Err(CliError::TooManyArguments {
            command: "call".to_string(),
        });
    }
    Ok(CallTarget {
        server: first.clone(),
        tool: tool.clone(),
        json: args.get(2).cloned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_alias_maps_to_intended_subcommand() {
        let err = resolve_external(&strings(&["run", "fs", "read_file"]));
        match err {
            CliError::UnknownSubcommand { given, intended } => {
                assert_eq!(given, "run");
                assert_eq!(intended, Some("call"));
            }
            other => panic!("expected UnknownSubcommand, got {other:?}"),
        }
    }

    #[test]
    fn test_server_first_is_ambiguous() {
        let err = resolve_external(&strings(&["fs", "read_file", "{}"]));
        match err {
            CliError::AmbiguousCommand { server, tool, json } => {
                assert_eq!(server, "fs");
                assert_eq!(tool, "read_file");
                assert_eq!(json.as_deref(), Some("'{}'"));
            }
            other => panic!("expected AmbiguousCommand, got {other:?}"),
        }
    }

    #[test]
    fn test_single_unknown_token() {
        let err = resolve_external(&strings(&["frobnicate"]));
        assert!(matches!(
            err,
            CliError::UnknownSubcommand { intended: None, .. }
        ));
    }

    #[test]
    fn test_call_two_token_form() {
        let target = resolve_call_args(&strings(&["fs", "read_file", "{}"])).unwrap();
        assert_eq!(
            target,
            CallTarget {
                server: "fs".to_string(),
                tool: "read_file".to_string(),
                json: Some("{}".to_string()),
            }
        );
    }

    #[test]
    fn test_call_slash_form() {
        let target = resolve_call_args(&strings(&["fs/read_file"])).unwrap();
        assert_eq!(target.server, "fs");
        assert_eq!(target.tool, "read_file");
        assert_eq!(target.json, None);
    }

    #[test]
    fn test_call_missing_tool() {
        let err = resolve_call_args(&strings(&["fs"])).unwrap_err();
        assert!(matches!(err, CliError::MissingArgument { .. }));
    }

    #[test]
    fn test_call_too_many_arguments() {
        let err = resolve_call_args(&strings(&["fs", "read_file", "{}", "extra"])).unwrap_err();
        assert!(matches!(err, CliError::TooManyArguments { .. }));

        let err = resolve_call_args(&strings(&["fs/read_file", "{}", "extra"])).unwrap_err();
        assert!(matches!(err, CliError::TooManyArguments { .. }));
    }

    #[test]
    fn test_call_malformed_slash_target() {
        for bad in ["/read_file", "fs/", "a/b/c"] {
            let err = resolve_call_args(&strings(&[bad])).unwrap_err();
            assert!(matches!(err, CliError::InvalidTarget { .. }), "{bad}");
        }
    }
}
