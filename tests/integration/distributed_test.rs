//! Two-instance convergence through the in-memory cluster fake.

use std::sync::Arc;

use wavehub_core::types::{ChannelId, EndpointId, StateMap, UserId};
use wavehub_engine::channel::{ChannelMembership, RecipientSpec, Sender};
use wavehub_engine::manager::ClientFactory;
use wavehub_engine::message::types::MessageAction;
use wavehub_engine::{LobbyEngine, ManagerFactory};

use crate::helpers::{Inbox, MemoryClientFactory, MemoryHub, state};

fn node(hub: &Arc<MemoryHub>) -> LobbyEngine {
    let factory: Arc<dyn ClientFactory> = Arc::new(MemoryClientFactory::new(
        Arc::clone(hub),
        EndpointId::from("chat"),
    ));
    LobbyEngine::new(ManagerFactory::new(Some(factory)))
}

async fn join(
    lobby: &LobbyEngine,
    user: &str,
) -> (Inbox, ChannelMembership) {
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
    (inbox, membership)
}

#[tokio::test]
async fn membership_converges_across_instances() {
    let hub = MemoryHub::new();
    let node1 = node(&hub);
    let node2 = node(&hub);

    let (_alice, ma) = join(&node1, "alice").await;
    let (_bob, mb) = join(&node2, "bob").await;

    // Node 2 hydrated alice at creation; node 1 learned of bob via the
    // assigns change relay.
    assert!(mb.channel().is_member(&"alice".into()));
    assert!(ma.channel().is_member(&"bob".into()));
}

#[tokio::test]
async fn presence_events_reach_remote_members() {
    let hub = MemoryHub::new();
    let node1 = node(&hub);
    let node2 = node(&hub);

    let (alice, ma) = join(&node1, "alice").await;
    let (bob, mb) = join(&node2, "bob").await;

    mb.channel()
        .track_presence(&"bob".into(), state(serde_json::json!({"status": "lurking"})))
        .await
        .unwrap();
    ma.channel()
        .track_presence(&"alice".into(), state(serde_json::json!({"status": "online"})))
        .await
        .unwrap();

    // Alice sees her own join exactly once (the local emit, no echo
    // duplicate); bob sees his own join plus alice's relayed one.
    assert_eq!(alice.count("presence_join"), 1);
    assert_eq!(bob.count("presence_join"), 2);
    assert_eq!(
        bob.events()
            .into_iter()
            .find(|e| e.event == "presence_join" && e.payload["changed"]["status"] == "online")
            .unwrap()
            .payload["presence"]
            .as_array()
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn broadcasts_deliver_once_per_recipient_cluster_wide() {
    let hub = MemoryHub::new();
    let node1 = node(&hub);
    let node2 = node(&hub);

    let (alice, ma) = join(&node1, "alice").await;
    let (bob, _mb) = join(&node2, "bob").await;

    ma.channel()
        .send_message(
            &Sender::User("alice".into()),
            RecipientSpec::All,
            MessageAction::Broadcast,
            "shout",
            serde_json::json!({"text": "hi"}),
            None,
        )
        .await
        .unwrap();

    assert_eq!(alice.count("shout"), 1);
    assert_eq!(bob.count("shout"), 1);
}

#[tokio::test]
async fn remote_leave_prunes_membership_and_presence() {
    let hub = MemoryHub::new();
    let node1 = node(&hub);
    let node2 = node(&hub);

    let (_alice, ma) = join(&node1, "alice").await;
    let (bob, mb) = join(&node2, "bob").await;

    mb.channel()
        .track_presence(&"bob".into(), state(serde_json::json!({"status": "lurking"})))
        .await
        .unwrap();
    ma.channel()
        .track_presence(&"alice".into(), state(serde_json::json!({"status": "online"})))
        .await
        .unwrap();
    ma.leave().await.unwrap();

    assert!(!mb.channel().is_member(&"alice".into()));
    assert!(mb.channel().get_presence(&"alice".into()).is_none());
    assert_eq!(bob.count("presence_leave"), 1);
}

#[tokio::test]
async fn channel_is_dropped_on_every_node_when_membership_empties() {
    let hub = MemoryHub::new();
    let node1 = node(&hub);
    let node2 = node(&hub);

    let (_alice, ma) = join(&node1, "alice").await;
    let (_bob, mb) = join(&node2, "bob").await;

    ma.leave().await.unwrap();
    // Bob is still a member of node 1's replica, so the channel stays.
    assert!(node1.channel(&ChannelId::from("room:1")).is_some());

    mb.leave().await.unwrap();
    assert!(node2.is_empty());
    // Node 1 only saw the last leave through the cluster and must still
    // drop the channel.
    assert!(node1.is_empty());
}

#[tokio::test]
async fn state_sync_reconciles_changes_missed_on_the_wire() {
    let hub = MemoryHub::new();
    let node1 = node(&hub);
    let endpoint = EndpointId::from("chat");
    let channel = ChannelId::from("room:1");

    let (alice, ma) = join(&node1, "alice").await;
    ma.channel()
        .track_presence(&"alice".into(), state(serde_json::json!({"status": "online"})))
        .await
        .unwrap();

    // A write from an instance whose publish this node never received.
    hub.seed_presence(
        &endpoint,
        &channel,
        &UserId::from("ghost"),
        &state(serde_json::json!({"status": "idle"})),
    );
    hub.sync_presence(&endpoint, &channel);

    assert_eq!(
        ma.channel().get_presence(&"ghost".into()).unwrap()["status"],
        "idle"
    );
    // The reconciliation surfaced the missed join to tracked members.
    assert_eq!(alice.count("presence_join"), 2);
}

#[tokio::test]
async fn assigns_stay_local_to_cache_reads() {
    let hub = MemoryHub::new();
    let node1 = node(&hub);
    let node2 = node(&hub);

    let (alice, ma) = join(&node1, "alice").await;
    let (_bob, mb) = join(&node2, "bob").await;

    ma.channel()
        .update_assigns(&"alice".into(), state(serde_json::json!({"role": "admin"})))
        .await
        .unwrap();

    // Assigns changes replicate silently: state is visible on both
    // nodes but no channel event is delivered for them.
    assert_eq!(
        mb.channel().get_assigns(&"alice".into()).unwrap()["role"],
        "admin"
    );
    assert!(alice.events().iter().all(|e| e.event != "assigns_update"));
}
