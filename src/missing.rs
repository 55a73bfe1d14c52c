use std::borrow::Cow;

use regex::Regex;

use crate::error::LoadError;

/// Placeholders that stand for an intentionally blank value in lab sheets.
pub const BLANK_TOKENS: &[&str] = &["<blank>", "(blank)"];

/// Leading escape that marks a placeholder token as literal text.
pub const BLANK_ESCAPE: char = '\\';

/// Decodes the blank placeholder encoding.
///
/// `<blank>` and `(blank)` decode to the empty string, a leading backslash
/// escapes the next token so `\<blank>` decodes to the literal `<blank>`.
pub fn decode_blank(value: &str) -> Cow<'_, str> {
    if let Some(rest) = value.strip_prefix(BLANK_ESCAPE) {
        return Cow::Borrowed(rest);
    }
    if BLANK_TOKENS
        .iter()
        .any(|token| value.eq_ignore_ascii_case(token))
    {
        return Cow::Borrowed("");
    }
    Cow::Borrowed(value)
}

#[derive(Debug, Clone)]
pub enum MissingToken {
    Literal(String),
    Pattern(Regex),
}

#[derive(Debug, Clone)]
pub struct MissingValues {
    tokens: Vec<MissingToken>,
    decoder: fn(&str) -> Cow<'_, str>,
}

impl Default for MissingValues {
    fn default() -> Self {
        Self {
            tokens: vec![MissingToken::Literal(String::new())],
            decoder: decode_blank,
        }
    }
}

impl MissingValues {
    pub fn with_literals<I, S>(mut self, literals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tokens
            .extend(literals.into_iter().map(|s| MissingToken::Literal(s.into())));
        self
    }

    pub fn with_pattern(mut self, pattern: &str) -> Result<Self, LoadError> {
        let regex = Regex::new(pattern).map_err(|err| {
            LoadError::Configuration(format!("invalid missing-data pattern '{pattern}': {err}"))
        })?;
        self.tokens.push(MissingToken::Pattern(regex));
        Ok(self)
    }

    pub fn with_decoder(mut self, decoder: fn(&str) -> Cow<'_, str>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn tokens(&self) -> &[MissingToken] {
        &self.tokens
    }

    /// Literal comparison is case-sensitive; patterns match at the start.
    pub fn is_missing(&self, value: &str) -> bool {
        let listed = self.tokens.iter().any(|token| match token {
            MissingToken::Literal(literal) => literal == value,
            MissingToken::Pattern(regex) => regex.find(value).is_some_and(|m| m.start() == 0),
        });
        listed || (self.decoder)(value).is_empty()
    }

    pub fn is_present(&self, value: &str) -> bool {
        !self.is_missing(value)
    }
}
