//! Presence semantics observed through delivered events, in local mode.

use wavehub_core::types::{ChannelId, StateMap, UserId};
use wavehub_engine::channel::ChannelMembership;
use wavehub_engine::{LobbyEngine, ManagerFactory};

use crate::helpers::{Inbox, state};

const PRESENCE_JOIN: &str = "presence_join";
const PRESENCE_UPDATE: &str = "presence_update";
const PRESENCE_LEAVE: &str = "presence_leave";

struct Member {
    inbox: Inbox,
    membership: ChannelMembership,
}

async fn join(lobby: &LobbyEngine, user: &str) -> Member {
    let inbox = Inbox::new();
    let membership = lobby
        .join(
            &ChannelId::from("room:1"),
            &UserId::from(user),
            StateMap::new(),
            inbox.callback(),
        )
        .await
        .unwrap();
    Member { inbox, membership }
}

fn lobby() -> LobbyEngine {
    LobbyEngine::new(ManagerFactory::new(None))
}

#[tokio::test]
async fn track_emits_join_with_changed_and_snapshot() {
    let lobby = lobby();
    let alice = join(&lobby, "alice").await;
    let bob = join(&lobby, "bob").await;
    let channel = alice.membership.channel();

    channel
        .track_presence(&"bob".into(), state(serde_json::json!({"status": "lurking"})))
        .await
        .unwrap();
    channel
        .track_presence(&"alice".into(), state(serde_json::json!({"status": "online"})))
        .await
        .unwrap();

    // Presence envelopes address the post-mutation presence key set, so
    // alice's join reaches both tracked members with the full snapshot.
    for member in [&alice, &bob] {
        let event = member
            .inbox
            .events()
            .into_iter()
            .find(|e| e.event == PRESENCE_JOIN && e.payload["changed"]["status"] == "online")
            .unwrap();
        assert_eq!(event.payload["presence"].as_array().unwrap().len(), 2);
    }
    // Bob's own join predates alice's entry and reached bob alone.
    assert_eq!(alice.inbox.count(PRESENCE_JOIN), 1);
    assert_eq!(bob.inbox.count(PRESENCE_JOIN), 2);
}

#[tokio::test]
async fn untracked_members_receive_no_presence_events() {
    let lobby = lobby();
    let alice = join(&lobby, "alice").await;
    let bob = join(&lobby, "bob").await;

    alice
        .membership
        .channel()
        .track_presence(&"alice".into(), state(serde_json::json!({"status": "online"})))
        .await
        .unwrap();

    assert_eq!(alice.inbox.count(PRESENCE_JOIN), 1);
    assert_eq!(bob.inbox.count(PRESENCE_JOIN), 0);
}

#[tokio::test]
async fn double_track_conflicts() {
    let lobby = lobby();
    let alice = join(&lobby, "alice").await;
    let channel = alice.membership.channel();

    channel
        .track_presence(&"alice".into(), state(serde_json::json!({"s": 1})))
        .await
        .unwrap();
    let err = channel
        .track_presence(&"alice".into(), state(serde_json::json!({"s": 2})))
        .await
        .unwrap_err();
    assert_eq!(err.code(), 409);
}

#[tokio::test]
async fn update_requires_a_tracked_entry() {
    let lobby = lobby();
    let alice = join(&lobby, "alice").await;
    let channel = alice.membership.channel();

    let err = channel
        .update_presence(&"alice".into(), state(serde_json::json!({"s": 1})))
        .await
        .unwrap_err();
    assert_eq!(err.code(), 404);
}

#[tokio::test]
async fn safe_remove_of_untracked_presence_is_a_no_op() {
    let lobby = lobby();
    let alice = join(&lobby, "alice").await;
    let channel = alice.membership.channel();

    channel.remove_presence(&"alice".into(), true).await.unwrap();
    let err = channel
        .remove_presence(&"alice".into(), false)
        .await
        .unwrap_err();
    assert_eq!(err.code(), 404);
}

#[tokio::test]
async fn upsert_tracks_then_updates() {
    let lobby = lobby();
    let alice = join(&lobby, "alice").await;
    let channel = alice.membership.channel();
    let user = UserId::from("alice");

    channel
        .upsert_presence(&user, state(serde_json::json!({"s": 1})))
        .await
        .unwrap();
    channel
        .upsert_presence(&user, state(serde_json::json!({"s": 2})))
        .await
        .unwrap();

    assert_eq!(alice.inbox.count(PRESENCE_JOIN), 1);
    assert_eq!(alice.inbox.count(PRESENCE_UPDATE), 1);
    assert_eq!(channel.get_presence(&user).unwrap()["s"], 2);
}

#[tokio::test]
async fn leave_emits_presence_leave_for_tracked_members() {
    let lobby = lobby();
    let alice = join(&lobby, "alice").await;
    let bob = join(&lobby, "bob").await;

    alice
        .membership
        .channel()
        .track_presence(&"bob".into(), state(serde_json::json!({"status": "lurking"})))
        .await
        .unwrap();
    alice
        .membership
        .channel()
        .track_presence(&"alice".into(), state(serde_json::json!({"status": "online"})))
        .await
        .unwrap();
    alice.membership.leave().await.unwrap();

    let event = bob
        .inbox
        .events()
        .into_iter()
        .find(|e| e.event == PRESENCE_LEAVE)
        .unwrap();
    assert_eq!(event.payload["changed"]["status"], "online");
    // Only bob's entry survives in the snapshot.
    let snapshot = event.payload["presence"].as_array().unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0]["status"], "lurking");
}

#[tokio::test]
async fn untracked_leave_emits_no_presence_event() {
    let lobby = lobby();
    let alice = join(&lobby, "alice").await;
    let bob = join(&lobby, "bob").await;

    alice.membership.leave().await.unwrap();
    assert_eq!(bob.inbox.count(PRESENCE_LEAVE), 0);
}
