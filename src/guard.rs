//! Question sanitation and validation.
//!
//! Every question passes through the guard before any embedding or
//! generation call. Control characters are stripped, whitespace is
//! normalized, and the result is checked against length limits and a
//! configured denylist of harmful-intent patterns (prompt-injection
//! markers, credential-exfiltration phrasing).
//!
//! A blocked question is reported by reason code only — the offending
//! substring is never echoed back where it could be replayed.

use regex::Regex;

use crate::config::GuardConfig;
use crate::error::{BlockReason, Error, Result};

pub struct QueryGuard {
    max_chars: usize,
    denylist: Vec<Regex>,
}

impl QueryGuard {
    /// Compile the configured denylist. Invalid patterns are a startup
    /// error, not a per-question one.
    pub fn new(config: &GuardConfig) -> Result<Self> {
        let denylist = config
            .denylist
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    Error::Config(format!("invalid guard.denylist pattern {p:?}: {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            max_chars: config.max_query_chars,
            denylist,
        })
    }

    /// Sanitize and validate a raw question.
    ///
    /// On success the returned string is the trimmed, control-character-free
    /// question; otherwise a [`BlockReason`] explains the refusal.
    pub fn check(&self, raw: &str) -> std::result::Result<String, BlockReason> {
        let sanitized: String = raw
            .chars()
            .filter_map(|c| match c {
                '\n' | '\t' | '\r' => Some(' '),
                c if c.is_control() => None,
                c => Some(c),
            })
            .collect();

        let trimmed = sanitized.trim();
        if trimmed.is_empty() {
            return Err(BlockReason::Empty);
        }

        let len = trimmed.chars().count();
        if len > self.max_chars {
            return Err(BlockReason::TooLong {
                len,
                max: self.max_chars,
            });
        }

        if self.denylist.iter().any(|re| re.is_match(trimmed)) {
            return Err(BlockReason::HarmfulContent);
        }

        Ok(trimmed.to_string())
    }
}
