use crate::*;

use callifornia_client::{CallError, RequestError};
use callifornia_core::PacketType;

#[tokio::test(flavor = "multi_thread")]
async fn test_screen_sharing() -> Result<()> {
    let relay = FakeRelay::spawn().await?;
    let mut alice = Peer::login(&relay, "alice").await?;
    let mut bob = Peer::login(&relay, "bob").await?;
    establish(&mut alice, &mut bob, "alice", "bob").await?;

    alice.client.start_screen_sharing()?;
    assert_eq!(
        alice.client.start_screen_sharing(),
        Err(CallError::ScreenSharingAlreadyActive)
    );
    alice.expect(ClientEvent::StartScreenSharingResult(Ok(()))).await?;
    bob.expect(ClientEvent::IncomingScreenSharingStarted).await?;
    assert!(alice.client.is_screen_sharing());
    assert!(bob.client.is_viewing_remote_screen());

    // Large enough to need several datagrams.
    let frame: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
    alice.client.send_screen(&frame)?;
    bob.expect(ClientEvent::IncomingScreen(frame)).await?;

    // Watching a remote screen blocks sharing our own.
    assert_eq!(bob.client.start_screen_sharing(), Err(CallError::ViewingRemoteScreen));

    alice.client.stop_screen_sharing()?;
    assert!(!alice.client.is_screen_sharing());
    bob.expect(ClientEvent::IncomingScreenSharingStopped).await?;
    assert!(!bob.client.is_viewing_remote_screen());
    assert_eq!(alice.client.send_screen(b"late"), Err(CallError::ScreenSharingNotActive));

    alice.stop().await?;
    bob.stop().await
}

#[tokio::test(flavor = "multi_thread")]
async fn test_camera_sharing_both_ways() -> Result<()> {
    let relay = FakeRelay::spawn().await?;
    let mut alice = Peer::login(&relay, "alice").await?;
    let mut bob = Peer::login(&relay, "bob").await?;
    establish(&mut alice, &mut bob, "alice", "bob").await?;

    alice.client.start_camera_sharing()?;
    alice.expect(ClientEvent::StartCameraSharingResult(Ok(()))).await?;
    bob.expect(ClientEvent::IncomingCameraSharingStarted).await?;

    bob.client.start_camera_sharing()?;
    bob.expect(ClientEvent::StartCameraSharingResult(Ok(()))).await?;
    alice.expect(ClientEvent::IncomingCameraSharingStarted).await?;

    alice.client.send_camera(b"alice frame")?;
    bob.expect(ClientEvent::IncomingCamera(b"alice frame".to_vec())).await?;
    bob.client.send_camera(b"bob frame")?;
    alice.expect(ClientEvent::IncomingCamera(b"bob frame".to_vec())).await?;

    alice.stop().await?;
    bob.stop().await
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sharing_needs_a_call() -> Result<()> {
    let relay = FakeRelay::spawn().await?;
    let alice = Peer::login(&relay, "alice").await?;

    assert_eq!(alice.client.start_screen_sharing(), Err(CallError::NoActiveCall));
    assert_eq!(alice.client.start_camera_sharing(), Err(CallError::NoActiveCall));
    assert_eq!(alice.client.send_camera(b"frame"), Err(CallError::NoActiveCall));

    alice.stop().await
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sharing_ends_with_the_call() -> Result<()> {
    let relay = FakeRelay::spawn().await?;
    let mut alice = Peer::login(&relay, "alice").await?;
    let mut bob = Peer::login(&relay, "bob").await?;
    establish(&mut alice, &mut bob, "alice", "bob").await?;

    alice.client.start_screen_sharing()?;
    bob.expect(ClientEvent::IncomingScreenSharingStarted).await?;

    alice.client.end_call()?;
    bob.expect(ClientEvent::RemoteUserEndedCall).await?;
    assert!(!alice.client.is_screen_sharing());
    assert!(!bob.client.is_viewing_remote_screen());

    alice.stop().await?;
    bob.stop().await
}

#[tokio::test(flavor = "multi_thread")]
async fn test_peer_refuses_screen_while_sharing_its_own() -> Result<()> {
    let relay = FakeRelay::spawn().await?;
    let mut alice = Peer::login(&relay, "alice").await?;
    let mut bob = Peer::login(&relay, "bob").await?;
    establish(&mut alice, &mut bob, "alice", "bob").await?;

    // Alice's request is lost once, so bob has not seen it when he asks.
    relay.drop_from(PacketType::StartScreenSharing, "alice", 1);
    alice.client.start_screen_sharing()?;
    bob.client.start_screen_sharing()?;

    bob.expect(ClientEvent::StartScreenSharingResult(Err(RequestError::Rejected)))
        .await?;
    assert!(!bob.client.is_screen_sharing());

    // Alice's retry then goes through to the side that gave up.
    alice.expect(ClientEvent::StartScreenSharingResult(Ok(()))).await?;
    bob.expect(ClientEvent::IncomingScreenSharingStarted).await?;
    assert!(alice.client.is_screen_sharing());
    assert!(bob.client.is_viewing_remote_screen());
    assert!(!alice.client.is_viewing_remote_screen());

    alice.stop().await?;
    bob.stop().await
}
