//! Channel lifecycle, recipient resolution, and routing in local mode.

use std::sync::{Arc, Mutex};

use wavehub_core::types::{ChannelId, StateMap, UserId};
use wavehub_engine::channel::{ChannelMembership, ClientMessage, RecipientSpec, Sender};
use wavehub_engine::manager::LeaveSnapshot;
use wavehub_engine::message::types::{MessageAction, events};
use wavehub_engine::{LobbyEngine, ManagerFactory};

use crate::helpers::{Inbox, state};

fn lobby() -> LobbyEngine {
    LobbyEngine::new(ManagerFactory::new(None))
}

async fn join(
    lobby: &LobbyEngine,
    channel: &str,
    user: &str,
) -> (Inbox, ChannelMembership) {
    let inbox = Inbox::new();
    let membership = lobby
        .join(
            &ChannelId::from(channel),
            &UserId::from(user),
            StateMap::new(),
            inbox.callback(),
        )
        .await
        .unwrap();
    (inbox, membership)
}

#[tokio::test]
async fn join_acknowledges_to_joiner_only() {
    let lobby = lobby();
    let (alice, _ma) = join(&lobby, "room:1", "alice").await;
    let (bob, _mb) = join(&lobby, "room:1", "bob").await;

    assert_eq!(alice.count(events::ACKNOWLEDGE), 1);
    assert_eq!(bob.count(events::ACKNOWLEDGE), 1);
    // Alice must not see bob's acknowledge.
    assert_eq!(alice.event_names(), vec![events::ACKNOWLEDGE]);
}

#[tokio::test]
async fn all_except_sender_excludes_exactly_the_sender() {
    let lobby = lobby();
    let (alice, ma) = join(&lobby, "room:1", "alice").await;
    let (bob, _mb) = join(&lobby, "room:1", "bob").await;
    let (carol, _mc) = join(&lobby, "room:1", "carol").await;

    ma.channel()
        .send_message(
            &Sender::User("alice".into()),
            RecipientSpec::AllExceptSender,
            MessageAction::Broadcast,
            "shout",
            serde_json::json!({"text": "hi"}),
            None,
        )
        .await
        .unwrap();

    assert_eq!(alice.count("shout"), 0);
    assert_eq!(bob.count("shout"), 1);
    assert_eq!(carol.count("shout"), 1);
}

#[tokio::test]
async fn system_sender_cannot_use_all_except_sender() {
    let lobby = lobby();
    let (_alice, ma) = join(&lobby, "room:1", "alice").await;

    let err = ma
        .channel()
        .send_message(
            &Sender::System,
            RecipientSpec::AllExceptSender,
            MessageAction::System,
            "notice",
            serde_json::json!({}),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), 400);
}

#[tokio::test]
async fn explicit_recipients_must_be_members() {
    let lobby = lobby();
    let (_alice, ma) = join(&lobby, "room:1", "alice").await;

    let err = ma
        .channel()
        .send_message(
            &Sender::User("alice".into()),
            RecipientSpec::Users(vec!["ghost".into()]),
            MessageAction::Broadcast,
            "whisper",
            serde_json::json!({}),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), 400);
}

#[tokio::test]
async fn unknown_sender_is_not_found() {
    let lobby = lobby();
    let (_alice, ma) = join(&lobby, "room:1", "alice").await;

    let err = ma
        .channel()
        .send_message(
            &Sender::User("ghost".into()),
            RecipientSpec::All,
            MessageAction::Broadcast,
            "shout",
            serde_json::json!({}),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), 404);
}

#[tokio::test]
async fn unhandled_broadcast_reports_to_sender_only() {
    let lobby = lobby();
    let (alice, ma) = join(&lobby, "room:1", "alice").await;
    let (bob, _mb) = join(&lobby, "room:1", "bob").await;

    ma.channel()
        .broadcast_message(
            &"alice".into(),
            ClientMessage {
                event: "unknown_event".to_string(),
                payload: serde_json::json!({}),
                request_id: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(alice.count(events::HANDLER_NOT_FOUND), 1);
    assert_eq!(bob.count(events::HANDLER_NOT_FOUND), 0);

    let error_event = alice
        .events()
        .into_iter()
        .find(|e| e.event == events::HANDLER_NOT_FOUND)
        .unwrap();
    assert_eq!(error_event.action, MessageAction::Error);
}

#[tokio::test]
async fn kick_notifies_victim_then_survivors() {
    let lobby = lobby();
    let (alice, ma) = join(&lobby, "room:1", "alice").await;
    let (bob, _mb) = join(&lobby, "room:1", "bob").await;

    ma.channel().kick_user(&"bob".into(), "spam").await.unwrap();

    assert_eq!(bob.count(events::KICKED_OUT), 1);
    assert_eq!(bob.count(events::KICKED), 0);
    assert_eq!(alice.count(events::KICKED), 1);
    assert!(!ma.channel().is_member(&"bob".into()));
}

#[tokio::test]
async fn destroy_notifies_members_and_drops_channel() {
    let lobby = lobby();
    let channel_id = ChannelId::from("room:1");
    let (alice, _ma) = join(&lobby, "room:1", "alice").await;
    let (bob, _mb) = join(&lobby, "room:1", "bob").await;

    lobby.destroy_channel(&channel_id, "maintenance").await.unwrap();

    assert_eq!(alice.count(events::DESTROYED), 1);
    assert_eq!(bob.count(events::DESTROYED), 1);
    assert!(lobby.channel(&channel_id).is_none());
}

#[tokio::test]
async fn leave_callback_receives_final_snapshot() {
    let lobby = lobby();
    let captured: Arc<Mutex<Option<LeaveSnapshot>>> = Arc::new(Mutex::new(None));
    {
        let captured = Arc::clone(&captured);
        lobby.hooks().set_leave_callback(Arc::new(move |_, snapshot| {
            *captured.lock().unwrap() = Some(snapshot.clone());
        }));
    }

    let inbox = Inbox::new();
    let membership = lobby
        .join(
            &ChannelId::from("room:1"),
            &UserId::from("alice"),
            state(serde_json::json!({"role": "admin"})),
            inbox.callback(),
        )
        .await
        .unwrap();
    membership
        .channel()
        .track_presence(&"alice".into(), state(serde_json::json!({"status": "online"})))
        .await
        .unwrap();

    membership.leave().await.unwrap();

    let snapshot = captured.lock().unwrap().clone().unwrap();
    assert_eq!(snapshot.user_id.as_str(), "alice");
    assert_eq!(snapshot.assigns["role"], "admin");
    assert_eq!(snapshot.presence.unwrap()["status"], "online");
}

#[tokio::test]
async fn outgoing_transform_rewrites_delivered_events() {
    let lobby = lobby();
    lobby.hooks().set_outgoing_transform(Arc::new(|mut event| {
        if let Some(obj) = event.payload.as_object_mut() {
            obj.insert("stamped".to_string(), serde_json::Value::Bool(true));
        }
        event
    }));

    let (alice, ma) = join(&lobby, "room:1", "alice").await;
    ma.channel()
        .send_message(
            &Sender::System,
            RecipientSpec::All,
            MessageAction::System,
            "notice",
            serde_json::json!({"text": "hi"}),
            None,
        )
        .await
        .unwrap();

    let event = alice
        .events()
        .into_iter()
        .find(|e| e.event == "notice")
        .unwrap();
    assert_eq!(event.payload["stamped"], true);
}
