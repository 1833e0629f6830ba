//! Explicit transactions over a borrowed [`Connection`].
//!
//! Multi-statement writes run as a sequence of awaited steps against
//! [`Transaction::connection`]; the first failing step short-circuits through
//! `?`, and [`Transaction::finish`] settles the outcome:
//!
//! - success: `COMMIT`, whose failure is reported as is;
//! - failure: `ROLLBACK`, then the original error is returned, unless the
//!   rollback itself failed, in which case the rollback error is returned.

use super::Connection;
use crate::Result;

pub struct Transaction<'c, C: Connection> {
    conn: &'c mut C,
}

impl<'c, C: Connection> Transaction<'c, C> {
    /// Sends `BEGIN` on `conn`.
    pub async fn begin(conn: &'c mut C) -> Result<Self> {
        conn.batch("BEGIN").await?;
        Ok(Self { conn })
    }

    /// The connection statements of this transaction run on.
    pub fn connection(&mut self) -> &mut C {
        self.conn
    }

    pub async fn commit(self) -> Result<()> {
        self.conn.batch("COMMIT").await
    }

    pub async fn rollback(self) -> Result<()> {
        self.conn.batch("ROLLBACK").await
    }

    /// Commits on `Ok`, rolls back on `Err`.
    pub async fn finish<T>(self, outcome: Result<T>) -> Result<T> {
        match outcome {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %err, "rolling back transaction");
                match self.rollback().await {
                    Ok(()) => Err(err),
                    Err(rollback_err) => {
                        #[cfg(feature = "tracing")]
                        tracing::error!(error = %rollback_err, "rollback failed");
                        Err(rollback_err)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, Param, Record};
    use async_trait::async_trait;

    #[derive(Default)]
    struct Log {
        statements: Vec<String>,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl Connection for Log {
        async fn query(&mut self, sql: &str, _: &[Param]) -> Result<Vec<Record>> {
            self.statements.push(sql.to_owned());
            Ok(Vec::new())
        }
        async fn execute(&mut self, sql: &str, _: &[Param]) -> Result<u64> {
            self.statements.push(sql.to_owned());
            Ok(1)
        }
        async fn batch(&mut self, sql: &str) -> Result<()> {
            self.statements.push(sql.to_owned());
            if self.fail_on == Some(sql) {
                return Err(Error::backend(format!("{sql} failed")));
            }
            Ok(())
        }
        fn is_closed(&self) -> bool {
            false
        }
    }

    async fn run(conn: &mut Log, fail_step: bool) -> Result<u64> {
        let mut tx = Transaction::begin(conn).await?;
        let outcome = async {
            let n = tx.connection().execute("UPDATE a", &[]).await?;
            if fail_step {
                return Err(Error::NotFound("row".into()));
            }
            tx.connection().execute("UPDATE b", &[]).await?;
            Ok(n)
        }
        .await;
        tx.finish(outcome).await
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn commits_on_success() {
        let mut conn = Log::default();
        assert_eq!(run(&mut conn, false).await.unwrap(), 1);
        assert_eq!(conn.statements, ["BEGIN", "UPDATE a", "UPDATE b", "COMMIT"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn rolls_back_and_keeps_original_error() {
        let mut conn = Log::default();
        let err = run(&mut conn, true).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(conn.statements, ["BEGIN", "UPDATE a", "ROLLBACK"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn rollback_failure_takes_precedence() {
        let mut conn = Log {
            fail_on: Some("ROLLBACK"),
            ..Log::default()
        };
        let err = run(&mut conn, true).await.unwrap_err();
        assert_eq!(err.to_string(), "Backend error: ROLLBACK failed");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_begin_sends_nothing_else() {
        let mut conn = Log {
            fail_on: Some("BEGIN"),
            ..Log::default()
        };
        assert!(run(&mut conn, false).await.is_err());
        assert_eq!(conn.statements, ["BEGIN"]);
    }
}
