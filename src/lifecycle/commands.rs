//! # Command Protocol
//!
//! Parses console lines into [`Command`]s.
//!
//! Lines take two forms: `+KEY=VALUE` applies a setting, `+KEY` queries a
//! setting or runs a named action. Parsing never touches the store; the
//! lifecycle executes the parsed command.

use crate::error::ErrorKind;
use crate::settings::SettingRegistry;

/// Longest command line accepted by the console, without the terminator.
pub const MAX_LINE_LEN: usize = 71;

/// One parsed console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `+key=value`
    Set { key: String, value: String },
    /// `+key` for a known setting
    Query(String),
    /// `+AT`: print the full configuration
    PrintAll,
    /// `+LOAD`: reload settings from the backing store
    Load,
    /// `+JOIN`: drop the session and join again
    Join,
    /// `+WIPECFG`: every setting back to its default
    WipeConfig,
    /// `+WIPELW`: erase the radio session namespace and join again
    WipeSession,
    /// `+UPLINK`: transmit as soon as possible
    Uplink,
    /// `+SLEEP`: persist and power down now
    Sleep,
}

impl Command {
    /// Parse one line.
    ///
    /// # Arguments
    ///
    /// * `line` - Console line without its terminator
    /// * `registry` - Settings used to recognise `+key` queries
    ///
    /// # Errors
    ///
    /// * [`ErrorKind::FormatError`] - Empty line or missing `+`
    /// * [`ErrorKind::CommandError`] - Neither an action nor a setting key
    pub fn parse(line: &str, registry: &SettingRegistry) -> Result<Self, ErrorKind> {
        // Spaces inside a value are data; only the terminator goes.
        let body = line
            .trim_end_matches(|c: char| c == '\r' || c == '\n')
            .trim_start()
            .strip_prefix('+')
            .ok_or(ErrorKind::FormatError)?;
        if body.trim().is_empty() {
            return Err(ErrorKind::FormatError);
        }

        if let Some((key, value)) = body.split_once('=') {
            let key = key.trim();
            if key.is_empty() {
                return Err(ErrorKind::FormatError);
            }
            return Ok(Command::Set {
                key: key.to_ascii_lowercase(),
                value: value.to_string(),
            });
        }

        let body = body.trim();

        let action = match body.to_ascii_uppercase().as_str() {
            "AT" => Some(Command::PrintAll),
            "LOAD" => Some(Command::Load),
            "JOIN" => Some(Command::Join),
            "WIPECFG" => Some(Command::WipeConfig),
            "WIPELW" => Some(Command::WipeSession),
            "UPLINK" => Some(Command::Uplink),
            "SLEEP" => Some(Command::Sleep),
            _ => None,
        };
        if let Some(action) = action {
            return Ok(action);
        }

        let key = body.to_ascii_lowercase();
        if registry.by_key(&key).is_some() {
            Ok(Command::Query(key))
        } else {
            Err(ErrorKind::CommandError)
        }
    }

    /// The command changes settings, the session or the lifecycle.
    pub fn mutates(&self) -> bool {
        !matches!(self, Command::Query(_) | Command::PrintAll)
    }
}
