use tracing::warn;

/// SQLSTATE raised when a statement runs on a connection whose transaction
/// has already failed.
pub const IN_FAILED_SQL_TRANSACTION: &str = "25P02";

/// Which database errors an extract may retry, and how often.
///
/// Retries happen on the same connection after a `ROLLBACK`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retryable_codes: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            retryable_codes: vec![IN_FAILED_SQL_TRANSACTION.to_string()],
        }
    }
}

impl RetryPolicy {
    pub fn never() -> Self {
        Self {
            max_attempts: 1,
            retryable_codes: Vec::new(),
        }
    }

    pub fn is_retryable(&self, code: Option<&str>) -> bool {
        code.is_some_and(|code| self.retryable_codes.iter().any(|c| c == code))
    }

    /// `attempt` is 1-based: the attempt that just failed.
    pub fn should_retry(&self, attempt: u32, code: Option<&str>) -> bool {
        attempt < self.max_attempts && self.is_retryable(code)
    }
}

pub fn sqlstate(err: &sqlx::Error) -> Option<String> {
    err.as_database_error()
        .and_then(|db_err| db_err.code())
        .map(|code| code.into_owned())
}

/// One retryable unit of work and the way to reset its connection.
pub(crate) trait Attempt {
    type Output;
    type Error;

    fn sqlstate(err: &Self::Error) -> Option<String>;

    async fn run(&mut self) -> std::result::Result<Self::Output, Self::Error>;

    async fn rollback(&mut self) -> std::result::Result<(), Self::Error>;
}

#[derive(Debug)]
pub(crate) enum RetryOutcome<T, E> {
    Done(T),
    /// Every attempt failed with a retryable code.
    Exhausted { attempts: u32, error: E },
    /// A non-retryable failure, or the rollback itself failed.
    Failed(E),
}

impl RetryPolicy {
    /// Runs `attempt` until it succeeds or the policy gives up, rolling back
    /// before each retry.
    pub(crate) async fn run<A: Attempt>(
        &self,
        name: &str,
        attempt: &mut A,
    ) -> RetryOutcome<A::Output, A::Error> {
        let mut attempts = 1;
        loop {
            let err = match attempt.run().await {
                Ok(output) => return RetryOutcome::Done(output),
                Err(err) => err,
            };

            let code = A::sqlstate(&err);
            if self.should_retry(attempts, code.as_deref()) {
                warn!(
                    extract = name,
                    attempt = attempts,
                    code = code.as_deref().unwrap_or_default(),
                    "Connection is in an aborted transaction; rolling back and retrying"
                );
                if let Err(rollback_err) = attempt.rollback().await {
                    return RetryOutcome::Failed(rollback_err);
                }
                attempts += 1;
                continue;
            }

            if self.is_retryable(code.as_deref()) {
                return RetryOutcome::Exhausted {
                    attempts,
                    error: err,
                };
            }
            return RetryOutcome::Failed(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// Replays canned results; an error is its own SQLSTATE.
    struct Scripted {
        results: VecDeque<std::result::Result<&'static str, &'static str>>,
        runs: u32,
        rollbacks: u32,
    }

    impl Scripted {
        fn new(results: Vec<std::result::Result<&'static str, &'static str>>) -> Self {
            Self {
                results: results.into(),
                runs: 0,
                rollbacks: 0,
            }
        }
    }

    impl Attempt for Scripted {
        type Output = &'static str;
        type Error = &'static str;

        fn sqlstate(err: &Self::Error) -> Option<String> {
            Some(err.to_string())
        }

        async fn run(&mut self) -> std::result::Result<Self::Output, Self::Error> {
            self.runs += 1;
            self.results.pop_front().unwrap_or(Err("script ran out"))
        }

        async fn rollback(&mut self) -> std::result::Result<(), Self::Error> {
            self.rollbacks += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn aborted_transaction_is_rolled_back_and_retried() {
        let mut attempt = Scripted::new(vec![Err(IN_FAILED_SQL_TRANSACTION), Ok("rows")]);
        let outcome = RetryPolicy::default().run("Int.Poruchenij", &mut attempt).await;

        assert!(matches!(outcome, RetryOutcome::Done("rows")));
        assert_eq!(attempt.runs, 2);
        assert_eq!(attempt.rollbacks, 1);
    }

    #[tokio::test]
    async fn second_aborted_transaction_exhausts_the_policy() {
        let mut attempt = Scripted::new(vec![
            Err(IN_FAILED_SQL_TRANSACTION),
            Err(IN_FAILED_SQL_TRANSACTION),
            Ok("never reached"),
        ]);
        let outcome = RetryPolicy::default().run("Int.Poruchenij", &mut attempt).await;

        match outcome {
            RetryOutcome::Exhausted { attempts, error } => {
                assert_eq!(attempts, 2);
                assert_eq!(error, IN_FAILED_SQL_TRANSACTION);
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(attempt.runs, 2);
        assert_eq!(attempt.rollbacks, 1);
    }

    #[tokio::test]
    async fn other_failures_are_not_retried() {
        let mut attempt = Scripted::new(vec![Err("42P01"), Ok("never reached")]);
        let outcome = RetryPolicy::default().run("Int.Poruchenij", &mut attempt).await;

        assert!(matches!(outcome, RetryOutcome::Failed("42P01")));
        assert_eq!(attempt.runs, 1);
        assert_eq!(attempt.rollbacks, 0);
    }

    #[test]
    fn default_policy_retries_aborted_transaction_once() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(1, Some(IN_FAILED_SQL_TRANSACTION)));
        assert!(!policy.should_retry(2, Some(IN_FAILED_SQL_TRANSACTION)));
    }

    #[test]
    fn other_errors_are_not_retried() {
        let policy = RetryPolicy::default();
        assert!(!policy.should_retry(1, Some("42P01")));
        assert!(!policy.should_retry(1, None));
        assert!(!RetryPolicy::never().should_retry(1, Some(IN_FAILED_SQL_TRANSACTION)));
    }
}
