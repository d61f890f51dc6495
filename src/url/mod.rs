use crate::error::{Error, Result};

const TASK_URL_BASE: &str = "https://todoist.com/showTask?id=";

/// Parse a Todoist task URL into the task id.
///
/// Supported URL patterns:
/// - `https://todoist.com/showTask?id=<task_id>`
/// - `https://app.todoist.com/app/task/<slug>-<task_id>`
/// - `https://app.todoist.com/app/task/<task_id>`
///
/// If the input is not a Todoist task URL, returns an error.
pub fn parse_task_url(input: &str) -> Result<String> {
    let url = url::Url::parse(input)?;

    let host = url.host_str().unwrap_or("");
    if !host.ends_with("todoist.com") {
        return Err(Error::UrlParse(format!("not a Todoist URL: {input}")));
    }

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    if segments.first() == Some(&"showTask") {
        return url
            .query_pairs()
            .find(|(k, _)| k == "id")
            .map(|(_, v)| v.into_owned())
            .filter(|v| is_task_id(v))
            .ok_or_else(|| Error::UrlParse(format!("missing task id in URL: {input}")));
    }

    // /app/task/<slug-id> (the /app prefix is optional on older links)
    let rest = match segments.first() {
        Some(&"app") => &segments[1..],
        _ => &segments[..],
    };
    match rest {
        ["task", tail, ..] => slug_id(tail)
            .ok_or_else(|| Error::UrlParse(format!("missing task id in URL: {input}"))),
        _ => Err(Error::UrlParse(format!("not a task URL: {input}"))),
    }
}

/// The identifier is the last hyphen-separated part of a `slug-id` segment.
fn slug_id(segment: &str) -> Option<String> {
    let id = segment.rsplit('-').next().unwrap_or("");
    is_task_id(id).then(|| id.to_string())
}

/// Canonical browser link for a task.
pub fn task_url(task_id: &str) -> String {
    format!("{TASK_URL_BASE}{task_id}")
}

/// Check if a string can serve as a task id: it must survive being written
/// as a link label and a URL query value, and be read back unchanged.
pub fn is_task_id(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Extract a task id from a raw id, a Todoist URL or a markdown link
/// `[label](url)`. A link to a task wins over its label. Returns `None` when
/// nothing identifiable is present.
pub fn resolve_task_id(input: &str) -> Option<String> {
    let input = input.trim();
    if let Some((label, target)) = split_markdown_link(input) {
        return parse_task_url(target)
            .ok()
            .or_else(|| is_task_id(label).then(|| label.to_string()));
    }
    if is_task_id(input) {
        return Some(input.to_string());
    }
    parse_task_url(input).ok()
}

/// Split `[label](target)` into its parts.
fn split_markdown_link(s: &str) -> Option<(&str, &str)> {
    let rest = s.strip_prefix('[')?;
    let (label, rest) = rest.split_once("](")?;
    let target = rest.strip_suffix(')')?;
    Some((label.trim(), target.trim()))
}
