use crate::*;

use callifornia_client::{CallError, ClientState, RequestError};
use callifornia_core::PacketType;

#[tokio::test(flavor = "multi_thread")]
async fn test_authorize() -> Result<()> {
    let relay = FakeRelay::spawn().await?;
    let alice = Peer::login(&relay, "alice").await?;

    assert!(alice.client.is_authorized());
    assert_eq!(alice.client.state(), ClientState::Free);
    assert_eq!(alice.client.nickname().as_deref(), Some("alice"));
    assert_eq!(alice.client.authorize("alice"), Err(CallError::AlreadyAuthorized));

    alice.stop().await
}

#[tokio::test(flavor = "multi_thread")]
async fn test_taken_nickname_is_refused() -> Result<()> {
    let relay = FakeRelay::spawn().await?;
    let alice = Peer::login(&relay, "alice").await?;

    let mut impostor = Peer::start(test_config(relay.addr())).await?;
    impostor.client.authorize("alice")?;
    impostor
        .expect(ClientEvent::AuthorizationResult(Err(RequestError::TakenNickname)))
        .await?;
    assert_eq!(impostor.client.state(), ClientState::Unauthorized);
    assert_eq!(impostor.client.nickname(), None);

    // The refused client can try again under another name.
    impostor.client.authorize("mallory")?;
    impostor.expect(ClientEvent::AuthorizationResult(Ok(()))).await?;

    impostor.stop().await?;
    alice.stop().await
}

#[tokio::test(flavor = "multi_thread")]
async fn test_logout() -> Result<()> {
    let relay = FakeRelay::spawn().await?;
    let mut alice = Peer::login(&relay, "alice").await?;
    let first_key = relay.public_key("alice");
    assert!(first_key.is_some());

    alice.client.logout()?;
    alice.expect(ClientEvent::LogoutCompleted).await?;
    assert_eq!(alice.client.state(), ClientState::Unauthorized);
    assert_eq!(alice.client.logout(), Err(CallError::NotAuthorized));
    assert_eq!(relay.public_key("alice"), None);

    // The nickname is free again, under a freshly generated keypair.
    alice.client.authorize("alice")?;
    alice.expect(ClientEvent::AuthorizationResult(Ok(()))).await?;
    let second_key = relay.public_key("alice");
    assert!(second_key.is_some());
    assert_ne!(first_key, second_key);

    alice.stop().await
}

#[tokio::test(flavor = "multi_thread")]
async fn test_verbs_need_authorization() -> Result<()> {
    let relay = FakeRelay::spawn().await?;
    let peer = Peer::start(test_config(relay.addr())).await?;

    assert_eq!(peer.client.authorize("  "), Err(CallError::InvalidNickname));
    assert_eq!(peer.client.end_call(), Err(CallError::NotAuthorized));
    assert_eq!(peer.client.decline_call("bob"), Err(CallError::NotAuthorized));
    assert_eq!(peer.client.start_screen_sharing(), Err(CallError::NotAuthorized));
    assert!(peer.client.start_calling("bob").is_err());

    peer.stop().await
}

#[tokio::test(flavor = "multi_thread")]
async fn test_silent_relay_drops_the_session() -> Result<()> {
    let relay = FakeRelay::spawn().await?;
    let mut config = test_config(relay.addr());
    config.timing.ping_interval_ms = 50;
    config.timing.ping_check_interval_ms = 100;
    config.timing.max_ping_failures = 3;
    let mut alice = Peer::login_with(config, "alice").await?;
    let before = relay.public_key("alice");

    relay.set_silent(true);
    alice.expect(ClientEvent::ConnectionDown).await?;
    assert_eq!(alice.client.state(), ClientState::Unauthorized);
    assert_eq!(alice.client.nickname(), None);
    assert!(!alice.client.is_authorized());

    relay.set_silent(false);
    alice.expect(ClientEvent::ConnectionRestored).await?;

    // Nothing survives the outage: authorizing again starts from new keys.
    alice.client.authorize("alice")?;
    alice.expect(ClientEvent::AuthorizationResult(Ok(()))).await?;
    assert_eq!(alice.client.state(), ClientState::Free);
    assert_ne!(relay.public_key("alice"), before);

    alice.stop().await
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unanswered_authorize_gives_up() -> Result<()> {
    let relay = FakeRelay::spawn().await?;
    relay.drop_from(PacketType::Authorize, "alice", usize::MAX);

    let mut config = test_config(relay.addr());
    config.timing.task_retry_interval_ms = 100;
    config.timing.task_max_attempts = 3;
    let mut alice = Peer::start(config).await?;

    alice.client.authorize("alice")?;
    alice
        .expect(ClientEvent::AuthorizationResult(Err(RequestError::NetworkError)))
        .await?;
    assert_eq!(alice.client.state(), ClientState::Unauthorized);
    assert_eq!(relay.public_key("alice"), None);

    // The failed attempt leaves the client free to try again.
    alice.client.authorize("bob")?;
    alice.expect(ClientEvent::AuthorizationResult(Ok(()))).await?;

    alice.stop().await
}
