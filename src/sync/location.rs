use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::document::{primary_day, Lookups};
use crate::error::{Error, Result};
use crate::task::CanonicalTask;

pub const UNDATED_PAGE: &str = "Undated";
pub const NO_PROJECT_PAGE: &str = "No Project";

/// How tasks are spread over pages under the prefix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum PageMode {
    /// Every task on the prefix page itself.
    #[default]
    Single,
    /// One page per project: `prefix/<project name>`.
    Project,
    /// One page per day: `prefix/<YYYY-MM-DD>`.
    Date,
}

impl PageMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageMode::Single => "single",
            PageMode::Project => "project",
            PageMode::Date => "date",
        }
    }
}

impl fmt::Display for PageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PageMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "single" | "" => Ok(PageMode::Single),
            "project" => Ok(PageMode::Project),
            "date" => Ok(PageMode::Date),
            other => Err(Error::Config(format!(
                "unknown page_mode '{other}' (expected single, project or date)"
            ))),
        }
    }
}

/// Page a task belongs on.
pub fn target_page(
    task: &CanonicalTask,
    lookups: &Lookups,
    prefix: &str,
    mode: PageMode,
) -> String {
    let prefix = prefix.trim().trim_end_matches('/');
    let segment = match mode {
        PageMode::Single => return prefix.to_string(),
        PageMode::Project => lookups
            .task_project(task)
            .map(page_segment)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| NO_PROJECT_PAGE.to_string()),
        PageMode::Date => primary_day(task)
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| UNDATED_PAGE.to_string()),
    };
    format!("{prefix}/{segment}")
}

/// Brackets and slashes would change the page hierarchy or break links.
fn page_segment(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '[' | ']' => ' ',
            '/' => '-',
            c => c,
        })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Due, TaskId, TaskStatus};
    use chrono::NaiveDate;
    use std::collections::HashMap;

    fn task(project: Option<&str>) -> CanonicalTask {
        CanonicalTask {
            id: TaskId::from("1"),
            title: "t".into(),
            description: String::new(),
            project_id: project.map(String::from),
            labels: Vec::new(),
            due: Due::default(),
            status: TaskStatus::Active,
            completed_at: None,
            completed_raw: None,
            comments: None,
        }
    }

    fn lookups() -> Lookups {
        Lookups::new(
            HashMap::from([
                ("p1".to_string(), "Home".to_string()),
                ("p2".to_string(), "Work / [Q3]".to_string()),
            ]),
            HashMap::new(),
        )
    }

    #[test]
    fn test_single_mode_uses_prefix() {
        assert_eq!(
            target_page(&task(Some("p1")), &lookups(), "Todoist", PageMode::Single),
            "Todoist"
        );
    }

    #[test]
    fn test_project_mode() {
        let l = lookups();
        let page = |project: Option<&str>, prefix: &str| {
            target_page(&task(project), &l, prefix, PageMode::Project)
        };
        assert_eq!(page(Some("p1"), "Todoist"), "Todoist/Home");
        assert_eq!(page(Some("p2"), "Todoist/"), "Todoist/Work - Q3");
        assert_eq!(page(None, "Todoist"), "Todoist/No Project");
    }

    #[test]
    fn test_date_mode() {
        let mut t = task(None);
        assert_eq!(target_page(&t, &lookups(), "Todoist", PageMode::Date), "Todoist/Undated");
        t.due.date = NaiveDate::from_ymd_opt(2025, 1, 2);
        assert_eq!(target_page(&t, &lookups(), "Todoist", PageMode::Date), "Todoist/2025-01-02");
    }

    #[test]
    fn test_parse_page_mode() {
        assert_eq!("Project".parse::<PageMode>().unwrap(), PageMode::Project);
        assert_eq!("".parse::<PageMode>().unwrap(), PageMode::Single);
        assert!("weekly".parse::<PageMode>().is_err());
    }
}
