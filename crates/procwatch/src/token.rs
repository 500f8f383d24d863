//! Spawn tokens
//!
//! A token is embedded verbatim in the command line of every launched wrapper
//! so the process can be found again in the process table after detachment.

use std::fmt;

/// Prefix of every generated token
pub const TOKEN_PREFIX: &str = "procwatch-";

/// Unique, unpredictable marker for one launch
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token(String);

impl Token {
    /// Generate a fresh token
    pub fn generate() -> Self {
        Self(format!("{}{}", TOKEN_PREFIX, uuid::Uuid::new_v4().simple()))
    }

    /// Wrap an existing token string, e.g. one printed by another supervisor
    pub fn from_string(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Token {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_token_format() {
        let token = Token::generate();
        let suffix = token.as_str().strip_prefix(TOKEN_PREFIX).unwrap();
        assert_eq!(suffix.len(), 32);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_tokens_are_unique() {
        let tokens: std::collections::HashSet<_> = (0..256).map(|_| Token::generate()).collect();
        assert_eq!(tokens.len(), 256);
    }

    #[test]
    fn test_token_needs_no_shell_quoting() {
        let token = Token::generate();
        assert_eq!(shell_words::quote(token.as_str()), token.as_str());
    }
}
