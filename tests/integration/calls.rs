use crate::*;

use callifornia_client::{CallError, ClientState, RequestError};
use callifornia_core::PacketType;

#[tokio::test(flavor = "multi_thread")]
async fn test_call_accepted() -> Result<()> {
    let relay = FakeRelay::spawn().await?;
    let mut alice = Peer::login(&relay, "alice").await?;
    let mut bob = Peer::login(&relay, "bob").await?;

    alice.client.start_calling("bob")?;
    assert_eq!(alice.client.state(), ClientState::Calling);
    assert_eq!(alice.client.calling_nickname().as_deref(), Some("bob"));

    bob.expect(ClientEvent::IncomingCall {
        nickname: "alice".into(),
    })
    .await?;
    alice.expect(ClientEvent::StartCallingResult(Ok(()))).await?;
    assert_eq!(bob.client.callers(), vec!["alice".to_string()]);

    bob.client.accept_call("alice")?;
    alice.expect(ClientEvent::CallingAccepted).await?;
    bob.expect(ClientEvent::AcceptCallResult {
        nickname: "alice".into(),
        result: Ok(()),
    })
    .await?;

    assert_eq!(alice.client.state(), ClientState::Busy);
    assert_eq!(bob.client.state(), ClientState::Busy);
    assert_eq!(alice.client.call_partner().as_deref(), Some("bob"));
    assert_eq!(bob.client.call_partner().as_deref(), Some("alice"));
    assert!(bob.client.callers().is_empty());
    assert!(alice.audio.is_streaming());
    assert!(bob.audio.is_streaming());

    alice.stop().await?;
    bob.stop().await
}

#[tokio::test(flavor = "multi_thread")]
async fn test_voice_reaches_partner() -> Result<()> {
    let relay = FakeRelay::spawn().await?;
    let mut alice = Peer::login(&relay, "alice").await?;
    let mut bob = Peer::login(&relay, "bob").await?;
    establish(&mut alice, &mut bob, "alice", "bob").await?;

    let frame: Vec<u8> = (0..960u32).map(|i| (i * 7) as u8).collect();
    alice.client.on_input_voice(&frame);
    assert!(eventually(|| bob.audio.played().contains(&frame)).await);

    // Through the capture-thread handle, the other way round.
    let input = bob.client.voice_input();
    input.push(b"hello alice");
    assert!(eventually(|| alice.audio.played().iter().any(|f| f == b"hello alice")).await);

    alice.stop().await?;
    bob.stop().await
}

#[tokio::test(flavor = "multi_thread")]
async fn test_muted_voice_is_not_sent() -> Result<()> {
    let relay = FakeRelay::spawn().await?;
    let mut alice = Peer::login(&relay, "alice").await?;
    let mut bob = Peer::login(&relay, "bob").await?;
    establish(&mut alice, &mut bob, "alice", "bob").await?;

    alice.client.mute(true);
    assert!(alice.client.is_muted());
    alice.client.on_input_voice(b"muted");
    alice.client.mute(false);
    alice.client.on_input_voice(b"audible");

    assert!(eventually(|| bob.audio.played().iter().any(|f| f == b"audible")).await);
    assert!(!bob.audio.played().iter().any(|f| f == b"muted"));

    alice.stop().await?;
    bob.stop().await
}

#[tokio::test(flavor = "multi_thread")]
async fn test_call_declined() -> Result<()> {
    let relay = FakeRelay::spawn().await?;
    let mut alice = Peer::login(&relay, "alice").await?;
    let mut bob = Peer::login(&relay, "bob").await?;

    alice.client.start_calling("bob")?;
    bob.expect(ClientEvent::IncomingCall {
        nickname: "alice".into(),
    })
    .await?;
    bob.client.decline_call("alice")?;

    alice.expect(ClientEvent::CallingDeclined).await?;
    assert_eq!(alice.client.state(), ClientState::Free);
    assert_eq!(bob.client.state(), ClientState::Free);
    assert_eq!(
        bob.client.decline_call("alice"),
        Err(CallError::NoIncomingCall("alice".into()))
    );

    alice.stop().await?;
    bob.stop().await
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_calling_withdraws_offer() -> Result<()> {
    let relay = FakeRelay::spawn().await?;
    let mut alice = Peer::login(&relay, "alice").await?;
    let mut bob = Peer::login(&relay, "bob").await?;

    alice.client.start_calling("bob")?;
    bob.expect(ClientEvent::IncomingCall {
        nickname: "alice".into(),
    })
    .await?;
    alice.expect(ClientEvent::StartCallingResult(Ok(()))).await?;

    alice.client.stop_calling()?;
    assert_eq!(alice.client.state(), ClientState::Free);
    bob.expect(ClientEvent::IncomingCallExpired {
        nickname: "alice".into(),
    })
    .await?;
    assert!(bob.client.callers().is_empty());
    assert_eq!(alice.client.stop_calling(), Err(CallError::NoOutgoingCall));

    alice.stop().await?;
    bob.stop().await
}

#[tokio::test(flavor = "multi_thread")]
async fn test_end_call() -> Result<()> {
    let relay = FakeRelay::spawn().await?;
    let mut alice = Peer::login(&relay, "alice").await?;
    let mut bob = Peer::login(&relay, "bob").await?;
    establish(&mut alice, &mut bob, "alice", "bob").await?;

    bob.client.end_call()?;
    assert_eq!(bob.client.state(), ClientState::Free);
    assert!(!bob.audio.is_streaming());

    alice.expect(ClientEvent::RemoteUserEndedCall).await?;
    assert_eq!(alice.client.state(), ClientState::Free);
    assert!(!alice.audio.is_streaming());
    assert_eq!(alice.client.end_call(), Err(CallError::NoActiveCall));

    alice.stop().await?;
    bob.stop().await
}

#[tokio::test(flavor = "multi_thread")]
async fn test_calling_offline_user() -> Result<()> {
    let relay = FakeRelay::spawn().await?;
    let mut alice = Peer::login(&relay, "alice").await?;

    alice.client.start_calling("nobody")?;
    alice
        .expect(ClientEvent::StartCallingResult(Err(RequestError::UnexistingUser)))
        .await?;
    assert_eq!(alice.client.state(), ClientState::Free);

    alice.stop().await
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unanswered_call_expires() -> Result<()> {
    let relay = FakeRelay::spawn().await?;
    let mut config = test_config(relay.addr());
    config.timing.call_expiry_secs = 1;
    let mut alice = Peer::login_with(config.clone(), "alice").await?;
    let mut bob = Peer::login_with(config, "bob").await?;

    alice.client.start_calling("bob")?;
    bob.expect(ClientEvent::IncomingCall {
        nickname: "alice".into(),
    })
    .await?;

    alice.expect(ClientEvent::MaximumCallingTimeReached).await?;
    bob.expect(ClientEvent::IncomingCallExpired {
        nickname: "alice".into(),
    })
    .await?;
    assert_eq!(alice.client.state(), ClientState::Free);
    assert!(bob.client.callers().is_empty());

    alice.stop().await?;
    bob.stop().await
}

#[tokio::test(flavor = "multi_thread")]
async fn test_calling_a_caller_accepts_their_offer() -> Result<()> {
    let relay = FakeRelay::spawn().await?;
    let mut alice = Peer::login(&relay, "alice").await?;
    let mut bob = Peer::login(&relay, "bob").await?;

    alice.client.start_calling("bob")?;
    bob.expect(ClientEvent::IncomingCall {
        nickname: "alice".into(),
    })
    .await?;

    bob.client.start_calling("alice")?;
    alice.expect(ClientEvent::CallingAccepted).await?;
    bob.expect(ClientEvent::AcceptCallResult {
        nickname: "alice".into(),
        result: Ok(()),
    })
    .await?;
    assert_eq!(alice.client.call_partner().as_deref(), Some("bob"));

    alice.stop().await?;
    bob.stop().await
}

#[tokio::test(flavor = "multi_thread")]
async fn test_calling_back_a_caller_while_busy_is_refused() -> Result<()> {
    let relay = FakeRelay::spawn().await?;
    let mut alice = Peer::login(&relay, "alice").await?;
    let mut bob = Peer::login(&relay, "bob").await?;
    let carol = Peer::login(&relay, "carol").await?;
    establish(&mut bob, &mut alice, "bob", "alice").await?;

    carol.client.start_calling("alice")?;
    alice
        .expect(ClientEvent::IncomingCall {
            nickname: "carol".into(),
        })
        .await?;

    // Calling carol back must not silently swap calls.
    assert_eq!(alice.client.start_calling("carol"), Err(CallError::ActiveCallExists));
    assert_eq!(alice.client.state(), ClientState::Busy);
    assert_eq!(alice.client.call_partner().as_deref(), Some("bob"));
    assert_eq!(alice.client.callers(), vec!["carol".to_string()]);
    assert!(carol.client.is_calling());

    alice.stop().await?;
    bob.stop().await?;
    carol.stop().await
}

#[tokio::test(flavor = "multi_thread")]
async fn test_accept_declines_other_callers_despite_loss() -> Result<()> {
    let relay = FakeRelay::spawn().await?;
    let mut alice = Peer::login(&relay, "alice").await?;
    let mut bob = Peer::login(&relay, "bob").await?;
    let mut carol = Peer::login(&relay, "carol").await?;

    bob.client.start_calling("alice")?;
    alice
        .expect(ClientEvent::IncomingCall {
            nickname: "bob".into(),
        })
        .await?;
    carol.client.start_calling("alice")?;
    alice
        .expect(ClientEvent::IncomingCall {
            nickname: "carol".into(),
        })
        .await?;

    // The first decline to carol is lost; the retry has to get through.
    relay.drop_from(PacketType::CallDeclined, "alice", 1);
    alice.client.accept_call("bob")?;
    bob.expect(ClientEvent::CallingAccepted).await?;
    carol.expect(ClientEvent::CallingDeclined).await?;
    assert_eq!(carol.client.state(), ClientState::Free);
    assert_eq!(alice.client.call_partner().as_deref(), Some("bob"));

    alice.stop().await?;
    bob.stop().await?;
    carol.stop().await
}
