//! Outgoing command representation.
//!
//! A command is a three-character verb with an optional argument, sent as
//! `#<VERB> <arg>\r\n`.

use std::fmt;
use std::str::FromStr;

use crate::error::OppoError;
use crate::protocol_constants::{NOP_VERB, VERB_LENGTH};

/// A validated protocol command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    verb: String,
    arg: Option<String>,
}

impl Command {
    /// Creates a command with no argument.
    ///
    /// # Errors
    ///
    /// Returns [`OppoError::InvalidCommand`] if the verb is not three ASCII
    /// alphanumeric characters.
    pub fn new(verb: &str) -> Result<Self, OppoError> {
        Ok(Self {
            verb: validate_verb(verb)?,
            arg: None,
        })
    }

    /// Creates a command with an argument.
    ///
    /// # Errors
    ///
    /// Returns [`OppoError::InvalidCommand`] if the verb is invalid or the
    /// argument contains a line terminator.
    pub fn with_arg(verb: &str, arg: impl Into<String>) -> Result<Self, OppoError> {
        let arg = arg.into();
        if arg.contains(['\r', '\n']) {
            return Err(OppoError::InvalidCommand(format!(
                "argument for {} contains a line terminator",
                verb
            )));
        }
        Ok(Self {
            verb: validate_verb(verb)?,
            arg: (!arg.is_empty()).then_some(arg),
        })
    }

    /// Builds a command from a verb in one of the crate's fixed tables.
    pub(crate) fn from_static(verb: &'static str) -> Self {
        debug_assert!(validate_verb(verb).is_ok_and(|v| v == verb));
        Self {
            verb: verb.to_string(),
            arg: None,
        }
    }

    /// The no-op probe command.
    pub(crate) fn nop() -> Self {
        Self::from_static(NOP_VERB)
    }

    /// The three-character verb.
    pub fn verb(&self) -> &str {
        &self.verb
    }

    /// The argument, if any.
    pub fn arg(&self) -> Option<&str> {
        self.arg.as_deref()
    }
}

fn validate_verb(verb: &str) -> Result<String, OppoError> {
    if verb.len() != VERB_LENGTH || !verb.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(OppoError::InvalidCommand(format!(
            "verb must be {} ASCII alphanumerics, got {:?}",
            VERB_LENGTH, verb
        )));
    }
    Ok(verb.to_ascii_uppercase())
}

/// Formats the command as it appears on the wire, without prefix or terminator.
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.arg {
            Some(arg) => write!(f, "{} {}", self.verb, arg),
            None => f.write_str(&self.verb),
        }
    }
}

/// Parses raw command text such as `"QDR 5"` or `"#PLA"`.
impl FromStr for Command {
    type Err = OppoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s.strip_prefix('#').unwrap_or(s);
        match s.split_once(' ') {
            Some((verb, arg)) => Self::with_arg(verb, arg.trim()),
            None => Self::new(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verb_is_uppercased() {
        let cmd = Command::new("pla").unwrap();
        assert_eq!(cmd.verb(), "PLA");
        assert_eq!(cmd.to_string(), "PLA");
    }

    #[test]
    fn digits_are_valid_verb_characters() {
        assert_eq!(Command::new("M3D").unwrap().verb(), "M3D");
        assert_eq!(Command::new("NU1").unwrap().verb(), "NU1");
    }

    #[test]
    fn rejects_bad_verbs() {
        assert!(Command::new("PL").is_err());
        assert!(Command::new("PLAY").is_err());
        assert!(Command::new("P A").is_err());
        assert!(Command::new("").is_err());
    }

    #[test]
    fn rejects_arguments_with_terminators() {
        assert!(Command::with_arg("QDR", "1\r#POW").is_err());
        assert!(Command::with_arg("QDR", "1\n").is_err());
    }

    #[test]
    fn parses_raw_text() {
        let cmd: Command = "QDR 5".parse().unwrap();
        assert_eq!(cmd.verb(), "QDR");
        assert_eq!(cmd.arg(), Some("5"));

        let cmd: Command = "#svm 2".parse().unwrap();
        assert_eq!(cmd.to_string(), "SVM 2");

        let cmd: Command = "QVM".parse().unwrap();
        assert_eq!(cmd.arg(), None);
    }

    #[test]
    fn empty_argument_is_dropped() {
        let cmd = Command::with_arg("QVM", "").unwrap();
        assert_eq!(cmd.arg(), None);
    }
}
