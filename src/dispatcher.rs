//! Command dispatch: the protocol state machine
//!
//! The dispatcher turns one parsed command from one sender into an
//! [`Outcome`]: either a reply with an envelope decision, or a crash
//! request. It consults the session registry for sender identity, relays
//! gameplay outcomes through the downstream facade, and drives the
//! lifecycle controller on terminal commands.
//!
//! Gameplay verbs are not gated on lifecycle phase: a datagram arriving
//! after EXIT is dispatched normally until the process is externally
//! terminated. WIN and LOSE are a stateless reward relay; the user they
//! name does not have to be a tracked player of any match.

use crate::command::{Command, Verb};
use crate::downstream::Downstream;
use crate::lifecycle::LifecycleController;
use crate::registry::SessionRegistry;
use log::{debug, error, info};
use std::net::SocketAddr;
use std::sync::Arc;

/// Response-wrapping policy for a command's result text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope {
    /// Generic acknowledgment, wire form `ACK: <text>\n`.
    Ack,
    /// Failure report, wire form `ERROR: <text>\n`.
    Error,
    /// Text sent verbatim, no prefix.
    Silent,
}

/// A reply destined for the sending endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub envelope: Envelope,
}

impl Reply {
    pub fn ack(text: impl Into<String>) -> Reply {
        Reply {
            text: text.into(),
            envelope: Envelope::Ack,
        }
    }

    pub fn error(text: impl Into<String>) -> Reply {
        Reply {
            text: text.into(),
            envelope: Envelope::Error,
        }
    }

    pub fn silent(text: impl Into<String>) -> Reply {
        Reply {
            text: text.into(),
            envelope: Envelope::Silent,
        }
    }

    /// Applies the envelope, producing the wire payload.
    pub fn encode(&self) -> String {
        match self.envelope {
            Envelope::Ack => format!("ACK: {}\n", self.text),
            Envelope::Error => format!("ERROR: {}\n", self.text),
            Envelope::Silent => self.text.clone(),
        }
    }
}

/// What the transport loop should do with a handled command.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Send the reply back to the originating endpoint.
    Reply(Reply),
    /// Terminate the process with a non-zero exit code, sending nothing.
    Crash,
}

/// The command dispatcher. One instance per process, driven sequentially
/// by the transport loop, which makes it the registry's single writer.
pub struct Dispatcher {
    registry: SessionRegistry,
    downstream: Arc<dyn Downstream>,
    lifecycle: Arc<LifecycleController>,
}

impl Dispatcher {
    pub fn new(
        registry: SessionRegistry,
        downstream: Arc<dyn Downstream>,
        lifecycle: Arc<LifecycleController>,
    ) -> Self {
        Self {
            registry,
            downstream,
            lifecycle,
        }
    }

    /// Read access to the session registry, mainly for assertions.
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Mutable access for session-establishing extensions.
    pub fn registry_mut(&mut self) -> &mut SessionRegistry {
        &mut self.registry
    }

    /// Handles one command from one sender.
    pub async fn handle(&mut self, cmd: Command, sender: SocketAddr) -> Outcome {
        match cmd.verb {
            Verb::Status => Outcome::Reply(Reply::silent("OK")),
            Verb::Crash => {
                info!("Crashing");
                Outcome::Crash
            }
            Verb::Exit => {
                if let Err(e) = self.lifecycle.shutdown().await {
                    // Not fatal: the external termination signal still ends
                    // the process eventually.
                    error!("Could not shutdown: {}", e);
                }
                Outcome::Reply(Reply::silent("EXIT"))
            }
            Verb::Win => self.handle_win(&cmd, sender).await,
            Verb::Lose => self.handle_lose(&cmd, sender).await,
            Verb::Unknown => Outcome::Reply(Reply::ack(cmd.raw)),
        }
    }

    /// WIN records the statistic first and only then grants currency, so a
    /// reward is never granted for a win that was never logged. The
    /// reverse inconsistency (statistic without currency) is accepted:
    /// at-most-once, no compensation.
    async fn handle_win(&mut self, cmd: &Command, sender: SocketAddr) -> Outcome {
        let Some(user_id) = cmd.args.first() else {
            return Outcome::Reply(Reply::error("no user id provided"));
        };
        self.log_sender_identity(sender);

        if let Err(e) = self.downstream.increment_statistic(user_id, "wins", 1).await {
            error!("Error win statistic: {}", e);
            return Outcome::Reply(Reply::error(format!("could not increment wins: {}", e)));
        }
        if let Err(e) = self
            .downstream
            .update_virtual_currency(user_id, "coins", 100)
            .await
        {
            error!("Error currency: {}", e);
            return Outcome::Reply(Reply::error(format!(
                "could not update user virtual currency: {}",
                e
            )));
        }
        Outcome::Reply(Reply::silent(format!("{} winner\n", user_id)))
    }

    async fn handle_lose(&mut self, cmd: &Command, sender: SocketAddr) -> Outcome {
        let Some(user_id) = cmd.args.first() else {
            return Outcome::Reply(Reply::error("no user id provided"));
        };
        self.log_sender_identity(sender);

        if let Err(e) = self
            .downstream
            .increment_statistic(user_id, "losses", 1)
            .await
        {
            error!("Error lose statistic: {}", e);
            return Outcome::Reply(Reply::error(format!("could not increment losses: {}", e)));
        }
        Outcome::Reply(Reply::silent(format!("{} loser\n", user_id)))
    }

    fn log_sender_identity(&self, sender: SocketAddr) {
        if let Some((match_id, user_id)) = self.registry.resolve(sender) {
            debug!(
                "Sender {} is player {} in match {}",
                sender, user_id, match_id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downstream::RpcError;
    use crate::lifecycle::{GameServerReport, LifecycleError, Sidecar};
    use async_trait::async_trait;
    use futures_util::stream::BoxStream;
    use futures_util::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:9001".parse().unwrap()
    }

    #[derive(Default)]
    struct FakeDownstream {
        statistic_calls: Mutex<Vec<(String, String, i64)>>,
        currency_calls: Mutex<Vec<(String, String, i64)>>,
        fail_statistic: bool,
        fail_currency: bool,
    }

    impl FakeDownstream {
        fn statistic_count(&self) -> usize {
            self.statistic_calls.lock().unwrap().len()
        }

        fn currency_count(&self) -> usize {
            self.currency_calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Downstream for FakeDownstream {
        async fn increment_statistic(
            &self,
            user_id: &str,
            key: &str,
            delta: i64,
        ) -> Result<(), RpcError> {
            self.statistic_calls.lock().unwrap().push((
                user_id.to_string(),
                key.to_string(),
                delta,
            ));
            if self.fail_statistic {
                return Err(RpcError::Status { code: 500 });
            }
            Ok(())
        }

        async fn update_virtual_currency(
            &self,
            user_id: &str,
            currency_name: &str,
            amount: i64,
        ) -> Result<(), RpcError> {
            self.currency_calls.lock().unwrap().push((
                user_id.to_string(),
                currency_name.to_string(),
                amount,
            ));
            if self.fail_currency {
                return Err(RpcError::Status { code: 500 });
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeSidecar {
        shutdown_calls: AtomicUsize,
    }

    #[async_trait]
    impl Sidecar for FakeSidecar {
        async fn ready(&self) -> Result<(), LifecycleError> {
            Ok(())
        }

        async fn shutdown(&self) -> Result<(), LifecycleError> {
            self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn watch(&self) -> Result<BoxStream<'static, GameServerReport>, LifecycleError> {
            Ok(futures_util::stream::empty().boxed())
        }
    }

    fn dispatcher_with(
        downstream: Arc<FakeDownstream>,
        sidecar: Arc<FakeSidecar>,
    ) -> Dispatcher {
        let lifecycle = Arc::new(LifecycleController::new(sidecar as Arc<dyn Sidecar>));
        Dispatcher::new(SessionRegistry::new(), downstream, lifecycle)
    }

    async fn handle_text(dispatcher: &mut Dispatcher, text: &str) -> Outcome {
        dispatcher
            .handle(Command::parse(text.as_bytes()), test_addr())
            .await
    }

    #[tokio::test]
    async fn test_status_returns_liveness_literal() {
        let downstream = Arc::new(FakeDownstream::default());
        let mut dispatcher = dispatcher_with(downstream, Arc::new(FakeSidecar::default()));

        for _ in 0..3 {
            let outcome = handle_text(&mut dispatcher, "STATUS").await;
            assert_eq!(outcome, Outcome::Reply(Reply::silent("OK")));
        }
    }

    #[tokio::test]
    async fn test_win_relays_statistic_then_currency() {
        let downstream = Arc::new(FakeDownstream::default());
        let mut dispatcher =
            dispatcher_with(Arc::clone(&downstream), Arc::new(FakeSidecar::default()));

        let outcome = handle_text(&mut dispatcher, "WIN alice").await;

        assert_eq!(outcome, Outcome::Reply(Reply::silent("alice winner\n")));
        assert_eq!(
            downstream.statistic_calls.lock().unwrap()[0],
            ("alice".to_string(), "wins".to_string(), 1)
        );
        assert_eq!(
            downstream.currency_calls.lock().unwrap()[0],
            ("alice".to_string(), "coins".to_string(), 100)
        );
        // A reward relay creates no session state.
        assert_eq!(dispatcher.registry().match_count(), 0);
        assert_eq!(dispatcher.registry().player_count(), 0);
    }

    #[tokio::test]
    async fn test_win_without_user_id_skips_downstream() {
        let downstream = Arc::new(FakeDownstream::default());
        let mut dispatcher =
            dispatcher_with(Arc::clone(&downstream), Arc::new(FakeSidecar::default()));

        let outcome = handle_text(&mut dispatcher, "WIN").await;

        assert_eq!(outcome, Outcome::Reply(Reply::error("no user id provided")));
        assert_eq!(downstream.statistic_count(), 0);
        assert_eq!(downstream.currency_count(), 0);
    }

    #[tokio::test]
    async fn test_win_statistic_failure_short_circuits_currency() {
        let downstream = Arc::new(FakeDownstream {
            fail_statistic: true,
            ..Default::default()
        });
        let mut dispatcher =
            dispatcher_with(Arc::clone(&downstream), Arc::new(FakeSidecar::default()));

        let outcome = handle_text(&mut dispatcher, "WIN alice").await;

        match outcome {
            Outcome::Reply(reply) => {
                assert_eq!(reply.envelope, Envelope::Error);
                assert!(reply.text.contains("could not increment wins"));
            }
            Outcome::Crash => panic!("WIN must not crash"),
        }
        assert_eq!(downstream.statistic_count(), 1);
        assert_eq!(downstream.currency_count(), 0);
    }

    #[tokio::test]
    async fn test_win_currency_failure_reports_failing_step() {
        let downstream = Arc::new(FakeDownstream {
            fail_currency: true,
            ..Default::default()
        });
        let mut dispatcher =
            dispatcher_with(Arc::clone(&downstream), Arc::new(FakeSidecar::default()));

        let outcome = handle_text(&mut dispatcher, "WIN alice").await;

        match outcome {
            Outcome::Reply(reply) => {
                assert_eq!(reply.envelope, Envelope::Error);
                assert!(reply.text.contains("could not update user virtual currency"));
            }
            Outcome::Crash => panic!("WIN must not crash"),
        }
        assert_eq!(downstream.statistic_count(), 1);
        assert_eq!(downstream.currency_count(), 1);
    }

    #[tokio::test]
    async fn test_lose_relays_statistic_only() {
        let downstream = Arc::new(FakeDownstream::default());
        let mut dispatcher =
            dispatcher_with(Arc::clone(&downstream), Arc::new(FakeSidecar::default()));

        let outcome = handle_text(&mut dispatcher, "LOSE bob").await;

        assert_eq!(outcome, Outcome::Reply(Reply::silent("bob loser\n")));
        assert_eq!(
            downstream.statistic_calls.lock().unwrap()[0],
            ("bob".to_string(), "losses".to_string(), 1)
        );
        assert_eq!(downstream.currency_count(), 0);
    }

    #[tokio::test]
    async fn test_exit_signals_shutdown_once_across_repeats() {
        let sidecar = Arc::new(FakeSidecar::default());
        let downstream = Arc::new(FakeDownstream::default());
        let mut dispatcher = dispatcher_with(downstream, Arc::clone(&sidecar));

        for _ in 0..3 {
            let outcome = handle_text(&mut dispatcher, "EXIT").await;
            assert_eq!(outcome, Outcome::Reply(Reply::silent("EXIT")));
        }

        assert_eq!(sidecar.shutdown_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_commands_still_dispatch_after_exit() {
        let downstream = Arc::new(FakeDownstream::default());
        let mut dispatcher =
            dispatcher_with(Arc::clone(&downstream), Arc::new(FakeSidecar::default()));

        handle_text(&mut dispatcher, "EXIT").await;
        let outcome = handle_text(&mut dispatcher, "WIN alice").await;

        assert_eq!(outcome, Outcome::Reply(Reply::silent("alice winner\n")));
    }

    #[tokio::test]
    async fn test_crash_produces_no_reply() {
        let downstream = Arc::new(FakeDownstream::default());
        let mut dispatcher = dispatcher_with(downstream, Arc::new(FakeSidecar::default()));

        let outcome = handle_text(&mut dispatcher, "CRASH").await;
        assert_eq!(outcome, Outcome::Crash);
    }

    #[tokio::test]
    async fn test_unknown_verb_echoes_with_ack() {
        let downstream = Arc::new(FakeDownstream::default());
        let mut dispatcher = dispatcher_with(downstream, Arc::new(FakeSidecar::default()));

        let outcome = handle_text(&mut dispatcher, "PING").await;

        match outcome {
            Outcome::Reply(reply) => {
                assert_eq!(reply.envelope, Envelope::Ack);
                assert_eq!(reply.encode(), "ACK: PING\n");
            }
            Outcome::Crash => panic!("unknown verbs must not crash"),
        }
    }

    #[test]
    fn test_envelope_encoding() {
        assert_eq!(Reply::ack("PING").encode(), "ACK: PING\n");
        assert_eq!(
            Reply::error("no user id provided").encode(),
            "ERROR: no user id provided\n"
        );
        assert_eq!(Reply::silent("OK").encode(), "OK");
        assert_eq!(Reply::silent("alice winner\n").encode(), "alice winner\n");
    }
}
