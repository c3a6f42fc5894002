//! Client command vocabulary
//!
//! Commands arrive as `verb[:argument]`, e.g. `zoom:42`, `up`, `left`.

use crate::error::{RigError, RigResult};
use std::fmt;
use std::str::FromStr;

/// Verbs accepted from clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// Set digital zoom level (argument required)
    Zoom,
    /// Set LED brightness (argument required)
    Brightness,
    /// Tilt forward
    Forward,
    /// Tilt backward
    Backward,
    /// Pan left
    Left,
    /// Pan right
    Right,
    /// Stage up one position
    Up,
    /// Stage down one position
    Down,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Zoom => "zoom",
            Verb::Brightness => "brightness",
            Verb::Forward => "forward",
            Verb::Backward => "backward",
            Verb::Left => "left",
            Verb::Right => "right",
            Verb::Up => "up",
            Verb::Down => "down",
        }
    }

    /// Whether the verb carries a mandatory integer argument
    pub fn takes_argument(&self) -> bool {
        matches!(self, Verb::Zoom | Verb::Brightness)
    }
}

impl FromStr for Verb {
    type Err = RigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zoom" => Ok(Verb::Zoom),
            "brightness" => Ok(Verb::Brightness),
            "forward" => Ok(Verb::Forward),
            "backward" => Ok(Verb::Backward),
            "left" => Ok(Verb::Left),
            "right" => Ok(Verb::Right),
            "up" => Ok(Verb::Up),
            "down" => Ok(Verb::Down),
            other => Err(RigError::CommandUnsupported(other.to_string())),
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed command tagged with its sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub sender: String,
    pub verb: Verb,
    /// Integer argument; present exactly when the verb takes one
    pub argument: Option<i64>,
}

impl Command {
    /// Parse `verb[:argument]`
    ///
    /// Movement verbs ignore any argument. `zoom` and `brightness` fail with
    /// `CommandMalformed` unless the argument is an integer.
    pub fn parse(sender: impl Into<String>, text: &str) -> RigResult<Self> {
        let (verb, argument) = match text.trim().split_once(':') {
            Some((verb, argument)) => (verb, Some(argument.trim())),
            None => (text.trim(), None),
        };
        let verb: Verb = verb.parse()?;

        let argument = if verb.takes_argument() {
            let raw = argument
                .filter(|a| !a.is_empty())
                .ok_or_else(|| RigError::CommandMalformed(format!("{verb} needs a value")))?;
            let value = raw
                .parse::<i64>()
                .map_err(|_| RigError::CommandMalformed(format!("{verb}:{raw}")))?;
            Some(value)
        } else {
            None
        };

        Ok(Self {
            sender: sender.into(),
            verb,
            argument,
        })
    }
}
