//! Token facade for attestation operations.
//!
//! §6 names exactly one token kind this core ever asks for:
//! `xpki-matter`. The enum exists so a future second kind doesn't require
//! changing the trait signature, but nothing here validates or interprets
//! token contents — that's the SDK's job once attestation takes over.

use crate::error::{DriverError, Result};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TokenKind {
    XpkiMatter,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::XpkiMatter => "xpki-matter",
        }
    }
}

pub trait TokenProvider: Send + Sync {
    fn token(&self, kind: TokenKind) -> Result<String>;
}

/// Holds one opaque token string per kind, set up front.
#[derive(Default)]
pub struct StaticTokenProvider {
    xpki_matter: Option<String>,
}

impl StaticTokenProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_xpki_matter_token(mut self, token: impl Into<String>) -> Self {
        self.xpki_matter = Some(token.into());
        self
    }
}

impl TokenProvider for StaticTokenProvider {
    fn token(&self, kind: TokenKind) -> Result<String> {
        match kind {
            TokenKind::XpkiMatter => self
                .xpki_matter
                .clone()
                .ok_or_else(|| DriverError::Configuration(format!("no token configured for '{}'", kind.as_str()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_token_is_a_configuration_error() {
        let provider = StaticTokenProvider::new();
        assert!(provider.token(TokenKind::XpkiMatter).is_err());
    }

    #[test]
    fn configured_token_round_trips() {
        let provider = StaticTokenProvider::new().with_xpki_matter_token("abc123");
        assert_eq!(provider.token(TokenKind::XpkiMatter).unwrap(), "abc123");
    }
}
