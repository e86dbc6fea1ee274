//! Cross-component integration tests
//!
//! These tests drive the registry, broadcast engine, and per-connection
//! sessions through real mpsc channels, without network or server startup.

use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use relay_chat_service::broadcast::Broadcaster;
use relay_chat_service::registry::ConnectionRegistry;
use relay_chat_service::websocket::{
    welcome_text, ClientEvent, OutboundEvent, ServerEvent, Session, SessionState,
};

const GREETING: &str = "Welcome to the chat";

struct TestEnvironment {
    registry: Arc<ConnectionRegistry>,
    broadcaster: Arc<Broadcaster>,
}

fn create_test_environment() -> TestEnvironment {
    let registry = Arc::new(ConnectionRegistry::new());
    let broadcaster = Arc::new(Broadcaster::new(registry.clone()));
    TestEnvironment {
        registry,
        broadcaster,
    }
}

/// One simulated client: a session plus the receiving end of its channel.
struct TestClient {
    session: Session,
    rx: mpsc::Receiver<OutboundEvent>,
}

impl TestClient {
    fn connect(env: &TestEnvironment) -> Self {
        let (tx, rx) = mpsc::channel(32);
        let session = Session::new(
            Uuid::new_v4(),
            tx,
            env.registry.clone(),
            env.broadcaster.clone(),
            GREETING.to_string(),
        );
        Self { session, rx }
    }

    async fn identify(&mut self, username: &str) {
        self.session
            .handle_event(ClientEvent::Identify {
                username: username.to_string(),
            })
            .await;
    }

    async fn send_message(&mut self, text: &str) {
        self.session
            .handle_event(ClientEvent::SendMessage {
                text: text.to_string(),
            })
            .await;
    }

    fn disconnect(&mut self) {
        self.session.close();
    }

    /// Next event pushed to this client, if any.
    fn next_event(&mut self) -> Option<ServerEvent> {
        let outbound = self.rx.try_recv().ok()?;
        let json = outbound.to_json().expect("outbound event serializes");
        Some(serde_json::from_str(&json).expect("valid server event"))
    }

    fn assert_silent(&mut self) {
        assert!(self.next_event().is_none(), "expected no event");
    }
}

// =============================================================================
// Identification & welcome tests
// =============================================================================

mod welcome_tests {
    use super::*;

    #[tokio::test]
    async fn test_welcome_counts_follow_identification_order() {
        let env = create_test_environment();
        let mut alice = TestClient::connect(&env);
        let mut bob = TestClient::connect(&env);

        alice.identify("Alice").await;
        match alice.next_event().expect("welcome for Alice") {
            ServerEvent::Welcome { sender, text } => {
                assert_eq!(sender, "server");
                assert_eq!(text, welcome_text(GREETING, "Alice", 1));
            }
            other => panic!("expected welcome, got {other:?}"),
        }

        bob.identify("Bob").await;
        match bob.next_event().expect("welcome for Bob") {
            ServerEvent::Welcome { text, .. } => {
                assert_eq!(text, welcome_text(GREETING, "Bob", 2));
            }
            other => panic!("expected welcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_welcome_is_not_broadcast_to_other_clients() {
        let env = create_test_environment();
        let mut alice = TestClient::connect(&env);
        let mut bob = TestClient::connect(&env);

        alice.identify("Alice").await;
        let _ = alice.next_event();

        bob.identify("Bob").await;
        let _ = bob.next_event();

        alice.assert_silent();
    }

    #[tokio::test]
    async fn test_empty_username_is_accepted() {
        let env = create_test_environment();
        let mut client = TestClient::connect(&env);

        client.identify("").await;

        assert_eq!(client.session.state(), SessionState::Identified);
        assert_eq!(env.registry.count(), 1);
        assert!(matches!(
            client.next_event(),
            Some(ServerEvent::Welcome { .. })
        ));
    }
}

// =============================================================================
// Broadcast tests
// =============================================================================

mod broadcast_tests {
    use super::*;

    #[tokio::test]
    async fn test_message_reaches_everyone_except_sender() {
        let env = create_test_environment();
        let mut alice = TestClient::connect(&env);
        let mut bob = TestClient::connect(&env);
        let mut carol = TestClient::connect(&env);

        alice.identify("Alice").await;
        bob.identify("Bob").await;
        carol.identify("Carol").await;
        let _ = alice.next_event();
        let _ = bob.next_event();
        let _ = carol.next_event();

        bob.send_message("hi").await;

        for listener in [&mut alice, &mut carol] {
            match listener.next_event().expect("delivered message") {
                ServerEvent::DeliverMessage { sender, text } => {
                    assert_eq!(sender, "Bob");
                    assert_eq!(text, "hi");
                }
                other => panic!("expected deliver-message, got {other:?}"),
            }
        }

        // The sender gets no echo back from the server
        bob.assert_silent();
    }

    #[tokio::test]
    async fn test_send_before_identify_is_ignored() {
        let env = create_test_environment();
        let mut alice = TestClient::connect(&env);
        let mut anon = TestClient::connect(&env);

        alice.identify("Alice").await;
        let _ = alice.next_event();

        anon.send_message("sneaky").await;

        assert_eq!(anon.session.state(), SessionState::Connected);
        alice.assert_silent();
        anon.assert_silent();
    }

    #[tokio::test]
    async fn test_messages_from_one_client_arrive_in_order() {
        let env = create_test_environment();
        let mut alice = TestClient::connect(&env);
        let mut bob = TestClient::connect(&env);

        alice.identify("Alice").await;
        bob.identify("Bob").await;
        let _ = alice.next_event();
        let _ = bob.next_event();

        alice.send_message("first").await;
        alice.send_message("second").await;
        alice.send_message("third").await;

        for expected in ["first", "second", "third"] {
            match bob.next_event().expect("delivered message") {
                ServerEvent::DeliverMessage { text, .. } => assert_eq!(text, expected),
                other => panic!("expected deliver-message, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_torn_down_recipient_does_not_block_others() {
        let env = create_test_environment();
        let mut alice = TestClient::connect(&env);
        let mut bob = TestClient::connect(&env);
        let mut carol = TestClient::connect(&env);

        alice.identify("Alice").await;
        let _ = alice.next_event();
        carol.identify("Carol").await;
        let _ = carol.next_event();

        // Bob registers, then his socket writer disappears while the registry
        // entry still exists
        bob.identify("Bob").await;
        drop(bob.rx);

        alice.send_message("anyone there?").await;

        match carol.next_event().expect("delivery must continue past Bob") {
            ServerEvent::DeliverMessage { sender, text } => {
                assert_eq!(sender, "Alice");
                assert_eq!(text, "anyone there?");
            }
            other => panic!("expected deliver-message, got {other:?}"),
        }
    }
}

// =============================================================================
// Disconnect tests
// =============================================================================

mod disconnect_tests {
    use super::*;

    #[tokio::test]
    async fn test_disconnected_client_is_excluded_from_count_and_delivery() {
        let env = create_test_environment();
        let mut alice = TestClient::connect(&env);
        let mut bob = TestClient::connect(&env);

        alice.identify("Alice").await;
        bob.identify("Bob").await;
        let _ = alice.next_event();
        let _ = bob.next_event();
        assert_eq!(env.registry.count(), 2);

        alice.disconnect();
        assert_eq!(env.registry.count(), 1);

        bob.send_message("still there?").await;
        alice.assert_silent();

        // A newcomer sees the post-disconnect count
        let mut dave = TestClient::connect(&env);
        dave.identify("Dave").await;
        match dave.next_event().expect("welcome for Dave") {
            ServerEvent::Welcome { text, .. } => {
                assert_eq!(text, welcome_text(GREETING, "Dave", 2));
            }
            other => panic!("expected welcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_usernames_disconnect_independently() {
        let env = create_test_environment();
        let mut first = TestClient::connect(&env);
        let mut second = TestClient::connect(&env);
        let mut observer = TestClient::connect(&env);

        first.identify("Alex").await;
        second.identify("Alex").await;
        observer.identify("Olive").await;
        let _ = first.next_event();
        let _ = second.next_event();
        let _ = observer.next_event();
        assert_eq!(env.registry.count(), 3);

        first.disconnect();
        assert_eq!(env.registry.count(), 2);

        observer.send_message("hello").await;
        match second.next_event().expect("surviving Alex still receives") {
            ServerEvent::DeliverMessage { sender, .. } => assert_eq!(sender, "Olive"),
            other => panic!("expected deliver-message, got {other:?}"),
        }
        first.assert_silent();
    }

    #[tokio::test]
    async fn test_send_after_own_disconnect_is_a_silent_noop() {
        let env = create_test_environment();
        let mut alice = TestClient::connect(&env);
        let mut bob = TestClient::connect(&env);

        alice.identify("Alice").await;
        bob.identify("Bob").await;
        let _ = alice.next_event();
        let _ = bob.next_event();

        // Alice's registry entry is gone but a message is still in flight
        env.registry.unregister(alice.session.id());
        alice.send_message("too late").await;

        bob.assert_silent();
    }
}

// =============================================================================
// Full scenario
// =============================================================================

mod scenario_tests {
    use super::*;

    /// The end-to-end flow: two clients join, chat, one leaves.
    #[tokio::test]
    async fn test_alice_and_bob_scenario() {
        let env = create_test_environment();

        // Alice connects and identifies
        let mut alice = TestClient::connect(&env);
        alice.identify("Alice").await;
        match alice.next_event().expect("welcome for Alice") {
            ServerEvent::Welcome { sender, text } => {
                assert_eq!(sender, "server");
                assert_eq!(text, welcome_text(GREETING, "Alice", 1));
            }
            other => panic!("expected welcome, got {other:?}"),
        }

        // Bob connects and identifies; Alice sees nothing
        let mut bob = TestClient::connect(&env);
        bob.identify("Bob").await;
        match bob.next_event().expect("welcome for Bob") {
            ServerEvent::Welcome { text, .. } => {
                assert_eq!(text, welcome_text(GREETING, "Bob", 2));
            }
            other => panic!("expected welcome, got {other:?}"),
        }
        alice.assert_silent();

        // Bob says hi; Alice receives it, Bob gets nothing back
        bob.send_message("hi").await;
        match alice.next_event().expect("Bob's message") {
            ServerEvent::DeliverMessage { sender, text } => {
                assert_eq!(sender, "Bob");
                assert_eq!(text, "hi");
            }
            other => panic!("expected deliver-message, got {other:?}"),
        }
        bob.assert_silent();

        // Alice disconnects; Bob's next message is delivered nowhere, no error
        alice.disconnect();
        bob.send_message("are you still there?").await;
        alice.assert_silent();
        bob.assert_silent();
        assert_eq!(env.registry.count(), 1);
    }
}
