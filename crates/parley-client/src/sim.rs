//! Line commands for the simulator binary.
//!
//! ```text
//! 3 hello everyone       identity 3 says "hello everyone" in the room
//! 3 @5 just for you      identity 3 sends "just for you" to identity 5
//! ```

use parley_core::IdentityId;

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCommand {
    /// Room message from `identity`
    Room {
        /// Sending identity
        identity: IdentityId,
        /// Message text
        text: String,
    },
    /// Direct message from `from` to `to`
    Direct {
        /// Sending identity
        from: IdentityId,
        /// Recipient identity
        to: IdentityId,
        /// Message text
        text: String,
    },
}

/// Why a line was not understood.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Line holds nothing but whitespace
    #[error("empty line")]
    Empty,
    /// First word is not an identity id
    #[error("`{0}` is not an identity id")]
    BadIdentity(String),
    /// `@` is not followed by an identity id
    #[error("`{0}` is not a recipient")]
    BadTarget(String),
    /// No text after the identity or recipient
    #[error("missing message text")]
    MissingText,
}

/// Parse `<identity> <text>` or `<identity> @<target> <text>`.
///
/// Text keeps its inner spacing; only the ends are trimmed.
pub fn parse_line(line: &str) -> Result<SimCommand, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError::Empty);
    }

    let (head, rest) = split_word(line);
    let identity: IdentityId = head.parse().map_err(|_| ParseError::BadIdentity(head.to_string()))?;

    if let Some(target) = rest.strip_prefix('@') {
        let (target, text) = split_word(target);
        let to: IdentityId = target.parse().map_err(|_| ParseError::BadTarget(target.to_string()))?;
        if text.is_empty() {
            return Err(ParseError::MissingText);
        }
        return Ok(SimCommand::Direct { from: identity, to, text: text.to_string() });
    }

    if rest.is_empty() {
        return Err(ParseError::MissingText);
    }
    Ok(SimCommand::Room { identity, text: rest.to_string() })
}

fn split_word(s: &str) -> (&str, &str) {
    match s.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (s, ""),
    }
}
