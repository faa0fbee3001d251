//! Pairs commands with their responses on the shared TCP stream.
//!
//! The protocol has no transaction IDs, so at most one command may be in
//! flight. Callers queue on a FIFO turn lock; the holder registers a
//! [`PendingCommand`] before writing to the socket and the receive loop hands
//! the next response line to it through a oneshot channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{oneshot, MutexGuard};
use tokio::time::Instant;

use crate::config::UnmatchedResponsePolicy;
use crate::error::{OppoError, OppoResult};

/// The single outstanding command.
#[derive(Debug)]
pub struct PendingCommand {
    pub verb: String,
    pub submitted_at: Instant,
    reply: oneshot::Sender<OppoResult<String>>,
}

/// Result of handing a response line to the correlator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// The line completed the pending command.
    Delivered,
    /// No command was waiting. `disconnect` is set when policy says the
    /// connection should be dropped.
    Orphaned { disconnect: bool },
}

/// Command/response correlator for one session.
pub struct Correlator {
    turn: tokio::sync::Mutex<()>,
    pending: Mutex<Option<PendingCommand>>,
    policy: UnmatchedResponsePolicy,
    orphaned: AtomicU64,
}

impl Correlator {
    pub fn new(policy: UnmatchedResponsePolicy) -> Self {
        Self {
            turn: tokio::sync::Mutex::new(()),
            pending: Mutex::new(None),
            policy,
            orphaned: AtomicU64::new(0),
        }
    }

    /// Waits for this caller's turn to use the stream.
    ///
    /// Turns are granted in request order. Fails with [`OppoError::Timeout`]
    /// if `deadline` passes while still queued.
    pub async fn acquire(
        &self,
        verb: &str,
        deadline: Instant,
        timeout: Duration,
    ) -> OppoResult<Turn<'_>> {
        let guard = tokio::time::timeout_at(deadline, self.turn.lock())
            .await
            .map_err(|_| {
                log::debug!("[Correlator] {} timed out waiting for its turn", verb);
                OppoError::Timeout {
                    verb: verb.to_string(),
                    timeout,
                }
            })?;
        Ok(Turn {
            correlator: self,
            verb: verb.to_string(),
            timeout,
            deadline,
            reply: None,
            _guard: guard,
        })
    }

    /// Takes the turn only if nobody holds or awaits it.
    pub fn try_acquire(&self, verb: &str, deadline: Instant, timeout: Duration) -> Option<Turn<'_>> {
        let guard = self.turn.try_lock().ok()?;
        Some(Turn {
            correlator: self,
            verb: verb.to_string(),
            timeout,
            deadline,
            reply: None,
            _guard: guard,
        })
    }

    /// Hands a response line to the pending command.
    pub fn complete(&self, line: String) -> ResponseOutcome {
        let pending = self.pending.lock().take();
        match pending {
            Some(cmd) => {
                log::trace!(
                    "[Correlator] {} answered in {:?}",
                    cmd.verb,
                    cmd.submitted_at.elapsed()
                );
                match cmd.reply.send(Ok(line)) {
                    Ok(()) => ResponseOutcome::Delivered,
                    Err(returned) => self.orphan(&returned.unwrap_or_default()),
                }
            }
            None => self.orphan(&line),
        }
    }

    fn orphan(&self, line: &str) -> ResponseOutcome {
        let count = self.orphaned.fetch_add(1, Ordering::Relaxed) + 1;
        match self.policy {
            UnmatchedResponsePolicy::Log => {
                log::warn!(
                    "[Correlator] Response with no pending command ({} so far): {:?}",
                    count,
                    line
                );
                ResponseOutcome::Orphaned { disconnect: false }
            }
            UnmatchedResponsePolicy::Ignore => {
                log::trace!("[Correlator] Ignoring unmatched response {:?}", line);
                ResponseOutcome::Orphaned { disconnect: false }
            }
            UnmatchedResponsePolicy::Disconnect => {
                log::warn!(
                    "[Correlator] Response with no pending command, dropping connection: {:?}",
                    line
                );
                ResponseOutcome::Orphaned { disconnect: true }
            }
        }
    }

    /// Fails the pending command with `error`.
    pub fn fail_pending(&self, error: OppoError) {
        if let Some(cmd) = self.pending.lock().take() {
            log::debug!("[Correlator] Failing pending {}: {}", cmd.verb, error);
            // The caller may already have given up.
            let _ = cmd.reply.send(Err(error));
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Verb of the command currently awaiting a response.
    pub fn pending_verb(&self) -> Option<String> {
        self.pending.lock().as_ref().map(|cmd| cmd.verb.clone())
    }

    /// Number of response lines that arrived with no command waiting.
    pub fn orphaned_count(&self) -> u64 {
        self.orphaned.load(Ordering::Relaxed)
    }
}

/// Exclusive use of the stream for one command.
///
/// Dropping the turn clears any pending registration and lets the next caller in.
pub struct Turn<'a> {
    correlator: &'a Correlator,
    verb: String,
    timeout: Duration,
    deadline: Instant,
    reply: Option<oneshot::Receiver<OppoResult<String>>>,
    _guard: MutexGuard<'a, ()>,
}

impl Turn<'_> {
    /// Registers the pending command. Must happen before the command is written
    /// so that a fast response cannot be mistaken for an orphan.
    pub fn register(&mut self) {
        let (tx, rx) = oneshot::channel();
        *self.correlator.pending.lock() = Some(PendingCommand {
            verb: self.verb.clone(),
            submitted_at: Instant::now(),
            reply: tx,
        });
        self.reply = Some(rx);
    }

    /// Waits for the response until the caller's deadline.
    pub async fn wait(mut self) -> OppoResult<String> {
        let Some(rx) = self.reply.take() else {
            return Err(OppoError::InvalidCommand(format!(
                "{} was never registered",
                self.verb
            )));
        };
        match tokio::time::timeout_at(self.deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(OppoError::ConnectionLost(format!(
                "connection closed while waiting for {}",
                self.verb
            ))),
            Err(_) => {
                log::debug!(
                    "[Correlator] {} unanswered after {:?}",
                    self.verb,
                    self.timeout
                );
                Err(OppoError::Timeout {
                    verb: self.verb.clone(),
                    timeout: self.timeout,
                })
            }
        }
    }
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        self.correlator.pending.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn deadline_in(d: Duration) -> Instant {
        Instant::now() + d
    }

    #[tokio::test]
    async fn response_completes_pending_command() {
        let correlator = Arc::new(Correlator::new(UnmatchedResponsePolicy::Log));
        let timeout = Duration::from_secs(2);
        let mut turn = correlator
            .acquire("QVM", deadline_in(timeout), timeout)
            .await
            .unwrap();
        turn.register();
        assert_eq!(correlator.pending_verb().as_deref(), Some("QVM"));

        let receiver = Arc::clone(&correlator);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(receiver.complete("OK 2".into()), ResponseOutcome::Delivered);
        });

        assert_eq!(turn.wait().await.unwrap(), "OK 2");
        assert!(!correlator.has_pending());
    }

    #[tokio::test]
    async fn unanswered_command_times_out_on_schedule() {
        let correlator = Correlator::new(UnmatchedResponsePolicy::Log);
        let timeout = Duration::from_millis(100);
        let started = std::time::Instant::now();

        let mut turn = correlator
            .acquire("QVM", deadline_in(timeout), timeout)
            .await
            .unwrap();
        turn.register();
        let err = turn.wait().await.unwrap_err();

        let elapsed = started.elapsed();
        assert!(matches!(err, OppoError::Timeout { ref verb, .. } if verb == "QVM"));
        assert!(elapsed >= Duration::from_millis(95), "returned early: {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(1), "returned late: {:?}", elapsed);
        assert!(!correlator.has_pending());
    }

    #[tokio::test]
    async fn late_response_after_timeout_is_orphaned() {
        let correlator = Correlator::new(UnmatchedResponsePolicy::Log);
        let timeout = Duration::from_millis(20);
        let mut turn = correlator
            .acquire("QDS", deadline_in(timeout), timeout)
            .await
            .unwrap();
        turn.register();
        assert!(turn.wait().await.is_err());

        assert_eq!(
            correlator.complete("OK 12".into()),
            ResponseOutcome::Orphaned { disconnect: false }
        );
        assert_eq!(correlator.orphaned_count(), 1);
    }

    #[tokio::test]
    async fn disconnect_policy_requests_disconnect() {
        let correlator = Correlator::new(UnmatchedResponsePolicy::Disconnect);
        assert_eq!(
            correlator.complete("OK".into()),
            ResponseOutcome::Orphaned { disconnect: true }
        );

        let correlator = Correlator::new(UnmatchedResponsePolicy::Ignore);
        assert_eq!(
            correlator.complete("OK".into()),
            ResponseOutcome::Orphaned { disconnect: false }
        );
        assert_eq!(correlator.orphaned_count(), 1);
    }

    #[tokio::test]
    async fn failing_pending_hands_the_error_to_the_caller() {
        let correlator = Correlator::new(UnmatchedResponsePolicy::Log);
        let timeout = Duration::from_secs(5);
        let mut turn = correlator
            .acquire("PLA", deadline_in(timeout), timeout)
            .await
            .unwrap();
        turn.register();
        correlator.fail_pending(OppoError::ConnectionLost("peer closed the connection".into()));

        let err = turn.wait().await.unwrap_err();
        assert!(matches!(err, OppoError::ConnectionLost(ref m) if m == "peer closed the connection"));

        let mut turn = correlator
            .acquire("QDR", deadline_in(timeout), timeout)
            .await
            .unwrap();
        turn.register();
        correlator.fail_pending(OppoError::FrameOverflow { limit: 16 });
        let err = turn.wait().await.unwrap_err();
        assert!(matches!(err, OppoError::FrameOverflow { limit: 16 }));
    }

    #[tokio::test]
    async fn try_acquire_fails_while_the_stream_is_held() {
        let correlator = Correlator::new(UnmatchedResponsePolicy::Log);
        let timeout = Duration::from_secs(5);
        let mut held = correlator
            .acquire("QDS", deadline_in(timeout), timeout)
            .await
            .unwrap();
        held.register();

        assert!(correlator
            .try_acquire("NOP", deadline_in(timeout), timeout)
            .is_none());
        assert_eq!(correlator.pending_verb().as_deref(), Some("QDS"));

        drop(held);
        let free = correlator.try_acquire("NOP", deadline_in(timeout), timeout);
        assert!(free.is_some());
    }

    #[tokio::test]
    async fn second_caller_waits_for_first_turn() {
        let correlator = Arc::new(Correlator::new(UnmatchedResponsePolicy::Log));
        let timeout = Duration::from_secs(5);
        let first = correlator
            .acquire("PLA", deadline_in(timeout), timeout)
            .await
            .unwrap();

        let second_correlator = Arc::clone(&correlator);
        let second = tokio::spawn(async move {
            let turn = second_correlator
                .acquire("PAU", deadline_in(timeout), timeout)
                .await
                .unwrap();
            drop(turn);
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!second.is_finished());

        drop(first);
        tokio::time::timeout(Duration::from_secs(1), second)
            .await
            .expect("second turn never granted")
            .unwrap();
    }

    #[tokio::test]
    async fn queue_wait_counts_against_the_deadline() {
        let correlator = Correlator::new(UnmatchedResponsePolicy::Log);
        let long = Duration::from_secs(5);
        let _held = correlator
            .acquire("PLA", deadline_in(long), long)
            .await
            .unwrap();

        let short = Duration::from_millis(50);
        let err = correlator
            .acquire("PAU", deadline_in(short), short)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, OppoError::Timeout { ref verb, .. } if verb == "PAU"));
    }
}
