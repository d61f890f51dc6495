//! Escaping of free-form Todoist text for Logseq block content.
//!
//! Logseq treats `[[...]]` as page references and stray brackets can turn a
//! title into a broken reference, so every field that lands in a block goes
//! through [`sanitize_text`] first.

use std::sync::OnceLock;

use regex::{Captures, Regex};

const TRAILING_PUNCTUATION: &[char] = &[',', '.', ';', ':', '!', '?', ')'];

/// Collapse every run of whitespace (including newlines) to one space and
/// trim both ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Replace unmatched `[` / `]` with spaces while keeping well-formed
/// `[[page]]` references and `[label]` spans intact.
///
/// A `[[` is matched to the nearest following `]]`; a single `[` to the
/// nearest following `]`. Applying this twice gives the same result as
/// applying it once.
pub fn sanitize_link_preserving(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '[' => {
                if chars.get(i + 1) == Some(&'[') {
                    if let Some(end) = find_pair(&chars, i + 2, ']') {
                        out.extend(&chars[i..end + 2]);
                        i = end + 2;
                        continue;
                    }
                    out.push(' ');
                    i += 1;
                    continue;
                }
                match chars[i + 1..].iter().position(|&c| c == ']') {
                    Some(offset) => {
                        let end = i + 1 + offset;
                        out.extend(&chars[i..=end]);
                        i = end + 1;
                    }
                    None => {
                        out.push(' ');
                        i += 1;
                    }
                }
            }
            ']' => {
                out.push(' ');
                i += 1;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Index of the first char of the nearest `cc` pair at or after `from`.
fn find_pair(chars: &[char], from: usize, c: char) -> Option<usize> {
    (from..chars.len().saturating_sub(1)).find(|&j| chars[j] == c && chars[j + 1] == c)
}

/// Map a raw Todoist label to a Logseq tag token.
///
/// `@name` becomes a person reference `[[@name]]`, `a/b` a namespaced page
/// reference `[[a/b]]`, anything else a `#plain-tag` stripped down to
/// alphanumerics, spaces and hyphens. Returns `None` when nothing usable is
/// left.
pub fn format_label_tag(label: &str) -> Option<String> {
    let label = label.trim();
    if label.is_empty() {
        return None;
    }
    if let Some(person) = label.strip_prefix('@') {
        let person = strip_brackets(person);
        let person = person.trim();
        if person.is_empty() {
            return None;
        }
        return Some(format!("[[@{person}]]"));
    }
    if label.contains('/') {
        let path = strip_brackets(label);
        let path = path.trim();
        if path.trim_matches('/').is_empty() {
            return None;
        }
        return Some(format!("[[{path}]]"));
    }
    let kept: String = label
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '-')
        .collect();
    let tag = kept.split_whitespace().collect::<Vec<_>>().join("-");
    if tag.is_empty() {
        None
    } else {
        Some(format!("#{tag}"))
    }
}

fn strip_brackets(s: &str) -> String {
    s.chars().filter(|c| *c != '[' && *c != ']').collect()
}

fn mention_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(^|\s)(@@?)([^\s\[\]]+)").expect("static regex"))
}

/// Rewrite `@name` to `#name` and `@@name` to `[[@name]]` outside of
/// `[[...]]` references. Email-like tokens (a `.` and no `/`) are kept as is.
pub fn convert_inline_mentions(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut plain = String::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '[' && chars.get(i + 1) == Some(&'[') {
            if let Some(end) = find_pair(&chars, i + 2, ']') {
                out.push_str(&convert_plain(&plain));
                plain.clear();
                out.extend(&chars[i..end + 2]);
                i = end + 2;
                continue;
            }
        }
        plain.push(chars[i]);
        i += 1;
    }
    out.push_str(&convert_plain(&plain));
    out
}

fn convert_plain(segment: &str) -> String {
    if !segment.contains('@') {
        return segment.to_string();
    }
    mention_regex()
        .replace_all(segment, |caps: &Captures| {
            let lead = &caps[1];
            let ats = &caps[2];
            let body = &caps[3];
            let core = body.trim_end_matches(TRAILING_PUNCTUATION);
            let tail = &body[core.len()..];
            if core.is_empty() || (core.contains('.') && !core.contains('/')) {
                return caps[0].to_string();
            }
            if ats == "@@" {
                format!("{lead}[[@{core}]]{tail}")
            } else {
                format!("{lead}#{core}{tail}")
            }
        })
        .into_owned()
}

/// Full pipeline applied to titles, descriptions and comments.
pub fn sanitize_text(text: &str) -> String {
    convert_inline_mentions(&sanitize_link_preserving(&normalize_whitespace(text)))
}
