use regex::{Regex, RegexBuilder};

use crate::error::{Error, Result};

/// Title exclusion patterns, compiled once per run.
#[derive(Debug, Clone, Default)]
pub struct ExclusionFilter {
    patterns: Vec<Regex>,
}

impl ExclusionFilter {
    /// Compile every pattern, logging and skipping the ones that fail.
    pub fn compile<S: AsRef<str>>(raw: &[S]) -> Self {
        let patterns = raw
            .iter()
            .map(|p| p.as_ref().trim())
            .filter(|p| !p.is_empty())
            .filter_map(|p| match parse_pattern(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    log::warn!("Ignoring exclusion pattern: {e}");
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn is_excluded(&self, title: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(title))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Parse `/body/flags` or a bare regex body.
///
/// Flags: `i` case-insensitive, `m` multi-line, `s` dot matches newline,
/// `x` verbose. `g` and `u` are accepted and ignored.
pub fn parse_pattern(raw: &str) -> Result<Regex> {
    let invalid = |message: String| Error::InvalidPattern {
        pattern: raw.to_string(),
        message,
    };

    let (body, flags) = match split_delimited(raw) {
        Some(parts) => parts,
        None => (raw, ""),
    };
    if body.is_empty() {
        return Err(invalid("empty pattern".into()));
    }

    let mut builder = RegexBuilder::new(body);
    for flag in flags.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            'g' | 'u' => &mut builder,
            other => return Err(invalid(format!("unsupported flag '{other}'"))),
        };
    }
    builder.build().map_err(|e| invalid(e.to_string()))
}

fn split_delimited(raw: &str) -> Option<(&str, &str)> {
    let rest = raw.strip_prefix('/')?;
    let end = rest.rfind('/')?;
    let flags = &rest[end + 1..];
    flags
        .chars()
        .all(|c| c.is_ascii_alphabetic())
        .then(|| (&rest[..end], flags))
}
