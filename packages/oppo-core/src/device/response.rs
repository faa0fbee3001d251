//! Typed parsing of command responses.
//!
//! Every parser takes the verb that was sent so that an echoed acknowledgement
//! (`@SVM OK 2`) can be unwrapped and so that mismatches name the command.

use crate::error::OppoError;
use crate::protocol_constants::ECHO_PREFIX;

/// Entry type characters the player reports for directory queries.
const TYPED_VALUE_KINDS: &[char] = &['D', 'U', 'O', '0', 'F', 'L', 'S', 'N'];

/// A `OK <type> <value>` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedValue {
    /// One-character type discriminator.
    pub kind: char,
    pub value: String,
}

impl TypedValue {
    /// True for folder entries.
    pub fn is_folder(&self) -> bool {
        self.kind == 'D'
    }

    /// True for file entries.
    pub fn is_file(&self) -> bool {
        self.kind == 'F'
    }
}

/// Strips an `@<VERB> ` echo prefix when it names the verb that was sent.
///
/// Trailing blanks are kept; a typed value may legitimately be empty.
pub fn strip_echo<'a>(verb: &str, response: &'a str) -> &'a str {
    let trimmed = response.trim_start();
    trimmed
        .strip_prefix(ECHO_PREFIX)
        .and_then(|rest| rest.strip_prefix(verb))
        .and_then(|rest| rest.strip_prefix(' '))
        .map(str::trim_start)
        .unwrap_or(trimmed)
}

fn mismatch(verb: &str, expected: &'static str, response: &str) -> OppoError {
    OppoError::ProtocolMismatch {
        verb: verb.to_string(),
        expected,
        response: response.to_string(),
    }
}

/// Expects exactly `OK`.
pub fn parse_ok(verb: &str, response: &str) -> Result<(), OppoError> {
    if strip_echo(verb, response).trim_end() == "OK" {
        Ok(())
    } else {
        Err(mismatch(verb, "OK", response))
    }
}

/// Expects `OK <digits>`.
pub fn parse_number(verb: &str, response: &str) -> Result<u64, OppoError> {
    strip_echo(verb, response)
        .strip_prefix("OK ")
        .map(str::trim)
        .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|digits| digits.parse().ok())
        .ok_or_else(|| mismatch(verb, "OK <digits>", response))
}

/// Expects `OK <type> <value>`.
///
/// A bare `OK` means the query had nothing to report and yields `None`.
pub fn parse_typed_value(verb: &str, response: &str) -> Result<Option<TypedValue>, OppoError> {
    let body = strip_echo(verb, response);
    if body.trim_end() == "OK" {
        return Ok(None);
    }
    let rest = body
        .strip_prefix("OK ")
        .ok_or_else(|| mismatch(verb, "OK <type> <value>", response))?;

    let mut chars = rest.chars();
    let kind = chars
        .next()
        .filter(|c| TYPED_VALUE_KINDS.contains(c))
        .ok_or_else(|| mismatch(verb, "OK <type> <value>", response))?;
    let value = chars
        .as_str()
        .strip_prefix(' ')
        .ok_or_else(|| mismatch(verb, "OK <type> <value>", response))?;

    Ok(Some(TypedValue {
        kind,
        value: value.to_string(),
    }))
}
