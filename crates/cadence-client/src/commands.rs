//! Line-oriented commands read from stdin.

use cadence_offline::Method;
use cadence_protocol::ActivityStatus;
use serde_json::Value;
use std::str::FromStr;
use thiserror::Error;

/// Usage text printed by `help`.
pub const HELP: &str = "\
commands:
  status <online|away|offline>      announce an activity status
  get <endpoint> [ttl-minutes]      read through the cache
  post|put|patch|delete <endpoint> [json]
                                    write through the offline queue
  pending                           list queued writes
  replay                            deliver queued writes now
  online | offline                  override the connectivity flag
  state                             show connection and queue state
  help                              show this text
  quit                              disconnect and exit";

/// Command parse errors.
#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    Unknown(String),

    #[error("Missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Invalid TTL: {0}")]
    InvalidTtl(String),

    #[error("Invalid JSON payload: {0}")]
    InvalidPayload(String),
}

/// A parsed command line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Status(ActivityStatus),
    Get {
        endpoint: String,
        ttl_minutes: Option<u64>,
    },
    Write {
        method: Method,
        endpoint: String,
        payload: Value,
    },
    Pending,
    Replay,
    SetOnline(bool),
    State,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        match word.to_ascii_lowercase().as_str() {
            "status" => {
                let status = rest
                    .parse::<ActivityStatus>()
                    .map_err(|_| CommandError::InvalidStatus(rest.to_string()))?;
                Ok(Command::Status(status))
            }
            "get" => {
                let mut args = rest.split_whitespace();
                let endpoint = args
                    .next()
                    .ok_or(CommandError::MissingArgument("endpoint"))?
                    .to_string();
                let ttl_minutes = args
                    .next()
                    .map(|t| t.parse().map_err(|_| CommandError::InvalidTtl(t.to_string())))
                    .transpose()?;
                Ok(Command::Get {
                    endpoint,
                    ttl_minutes,
                })
            }
            "post" | "put" | "patch" | "delete" => {
                let method: Method = word
                    .parse()
                    .map_err(|_| CommandError::Unknown(word.to_string()))?;
                let (endpoint, body) = match rest.split_once(char::is_whitespace) {
                    Some((endpoint, body)) => (endpoint, body.trim()),
                    None => (rest, ""),
                };
                if endpoint.is_empty() {
                    return Err(CommandError::MissingArgument("endpoint"));
                }
                let payload = if body.is_empty() {
                    Value::Null
                } else {
                    serde_json::from_str(body)
                        .map_err(|e| CommandError::InvalidPayload(e.to_string()))?
                };
                Ok(Command::Write {
                    method,
                    endpoint: endpoint.to_string(),
                    payload,
                })
            }
            "pending" => Ok(Command::Pending),
            "replay" => Ok(Command::Replay),
            "online" => Ok(Command::SetOnline(true)),
            "offline" => Ok(Command::SetOnline(false)),
            "state" => Ok(Command::State),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}
