use std::time::Duration;

use crate::error::Result;
use crate::todoist::types::RawComment;
use crate::todoist::TaskSource;

const MAX_RETRIES: u32 = 3;
const BACKOFF_SECONDS: &[u64] = &[60, 120, 240];

/// Attempts made per task when fetching comments.
pub const COMMENT_ATTEMPTS: u32 = 3;
const COMMENT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Retry an API call expression with exponential backoff on 429 errors.
///
/// Usage: `retry_api!(source.active_tasks())`
///
/// The expression is re-evaluated on each retry attempt. This is a macro
/// because async closures that return borrowed futures can't satisfy `Fn`.
macro_rules! retry_api {
    ($expr:expr) => {{
        let mut _attempt: u32 = 0;
        loop {
            match $expr.await {
                Ok(val) => break Ok::<_, $crate::error::Error>(val),
                Err(e) => {
                    if e.is_rate_limited() && _attempt < 3 {
                        $crate::sync::rate_limit::backoff_sleep(_attempt).await;
                        _attempt += 1;
                    } else {
                        break Err(e);
                    }
                }
            }
        }
    }};
}

pub(crate) use retry_api;

/// Sleep for the backoff duration (for use in non-macro contexts).
pub async fn backoff_sleep(attempt: u32) {
    let wait = BACKOFF_SECONDS
        .get(attempt as usize)
        .copied()
        .unwrap_or(240);
    log::warn!(
        "Rate limited (429). Waiting {wait}s before retry {}/{}",
        attempt + 1,
        MAX_RETRIES
    );
    tokio::time::sleep(Duration::from_secs(wait)).await;
}

/// Fetch one task's comments with a small retry budget. Rate limiting
/// backs off like the other endpoints; any other failure is retried after
/// a short pause.
pub async fn fetch_comments<T: TaskSource + ?Sized>(
    source: &T,
    task_id: &str,
) -> Result<Vec<RawComment>> {
    let mut attempt: u32 = 0;
    loop {
        match source.comments(task_id).await {
            Ok(comments) => return Ok(comments),
            Err(e) if attempt + 1 < COMMENT_ATTEMPTS => {
                log::debug!(
                    "Comment fetch for task {task_id} failed (attempt {}): {e}",
                    attempt + 1
                );
                if e.is_rate_limited() {
                    backoff_sleep(attempt).await;
                } else {
                    tokio::time::sleep(COMMENT_RETRY_DELAY).await;
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::todoist::types::{RawLabel, RawProject, RawTask};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls to each endpoint.
    struct Flaky {
        failures: u32,
        status: u16,
        calls: AtomicU32,
    }

    impl Flaky {
        fn fail(&self) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(Error::Api {
                    status: self.status,
                    message: "nope".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl TaskSource for Flaky {
        async fn active_tasks(&self) -> Result<Vec<RawTask>> {
            self.fail()?;
            Ok(Vec::new())
        }
        async fn completed_tasks(&self, _since: Option<NaiveDate>) -> Result<Vec<RawTask>> {
            Ok(Vec::new())
        }
        async fn projects(&self) -> Result<Vec<RawProject>> {
            Ok(Vec::new())
        }
        async fn labels(&self) -> Result<Vec<RawLabel>> {
            Ok(Vec::new())
        }
        async fn comments(&self, _task_id: &str) -> Result<Vec<RawComment>> {
            self.fail()?;
            Ok(Vec::new())
        }
    }

    fn flaky(failures: u32, status: u16) -> Flaky {
        Flaky {
            failures,
            status,
            calls: AtomicU32::new(0),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_comments_recover_within_budget() {
        let source = flaky(2, 500);
        assert!(fetch_comments(&source, "1").await.is_ok());
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_comments_give_up_after_budget() {
        let source = flaky(5, 500);
        assert!(fetch_comments(&source, "1").await.is_err());
        assert_eq!(source.calls.load(Ordering::SeqCst), COMMENT_ATTEMPTS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_api_waits_out_rate_limits() {
        let source = flaky(2, 429);
        let result: Result<Vec<RawTask>> = retry_api!(source.active_tasks());
        assert!(result.is_ok());
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_api_passes_other_errors_through() {
        let source = flaky(1, 500);
        let result: Result<Vec<RawTask>> = retry_api!(source.active_tasks());
        assert!(matches!(result, Err(Error::Api { status: 500, .. })));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }
}
