//! Message filtering for `--grep` style queries.
//!
//! A filter is compiled once per query and then applied to each record's
//! decoded message. Empty patterns match everything without touching the
//! regex engine, and patterns free of regex metacharacters use a substring
//! search instead.

use std::fmt;

use memchr::memmem;
use regex::Regex;

use crate::error::RegexError;
use crate::types::LogRecord;

/// Characters that carry meaning in regex syntax.
const META_CHARACTERS: &[u8] = b"\\.+*?()|[]{}^$#&-~";

#[derive(Clone)]
enum Matcher {
    All,
    Literal(memmem::Finder<'static>),
    Pattern(Regex),
}

/// A compiled message filter.
#[derive(Clone)]
pub struct CompiledFilter {
    pattern: String,
    matcher: Matcher,
}

/// Compiles `pattern` into a filter. An empty pattern matches everything.
pub fn compile(pattern: &str) -> Result<CompiledFilter, RegexError> {
    CompiledFilter::new(pattern)
}

impl CompiledFilter {
    /// Compiles `pattern` into a filter.
    pub fn new(pattern: &str) -> Result<Self, RegexError> {
        let matcher = if pattern.is_empty() {
            Matcher::All
        } else if pattern.bytes().all(|b| !META_CHARACTERS.contains(&b)) {
            Matcher::Literal(memmem::Finder::new(pattern.as_bytes()).into_owned())
        } else {
            let regex = Regex::new(pattern).map_err(|source| RegexError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?;
            Matcher::Pattern(regex)
        };

        Ok(Self {
            pattern: pattern.to_string(),
            matcher,
        })
    }

    /// Compiles an optional pattern; `None` matches everything.
    pub fn from_optional(pattern: Option<&str>) -> Result<Self, RegexError> {
        Self::new(pattern.unwrap_or_default())
    }

    /// A filter that accepts every record.
    #[must_use]
    pub fn match_all() -> Self {
        Self {
            pattern: String::new(),
            matcher: Matcher::All,
        }
    }

    /// Returns true if this filter accepts everything.
    #[must_use]
    pub const fn is_match_all(&self) -> bool {
        matches!(self.matcher, Matcher::All)
    }

    /// The pattern this filter was compiled from.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub(crate) const fn kind(&self) -> &'static str {
        match self.matcher {
            Matcher::All => "all",
            Matcher::Literal(_) => "literal",
            Matcher::Pattern(_) => "regex",
        }
    }

    /// Tests arbitrary text against the filter.
    #[must_use]
    pub fn is_match(&self, text: &str) -> bool {
        match &self.matcher {
            Matcher::All => true,
            Matcher::Literal(finder) => finder.find(text.as_bytes()).is_some(),
            Matcher::Pattern(regex) => regex.is_match(text),
        }
    }

    /// Tests a record's message against the filter.
    #[must_use]
    pub fn matches(&self, record: &LogRecord) -> bool {
        self.is_match(&record.message)
    }
}

impl fmt::Debug for CompiledFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledFilter")
            .field("pattern", &self.pattern)
            .field("kind", &self.kind())
            .finish()
    }
}

impl Default for CompiledFilter {
    fn default() -> Self {
        Self::match_all()
    }
}
