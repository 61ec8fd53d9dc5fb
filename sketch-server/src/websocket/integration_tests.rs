use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use uuid::Uuid;
use warp::test::{WsClient, ws};

use super::connection::ConnectionManager;
use crate::change_feed::{ChangeFeed, FEED_CAPACITY};
use crate::config::SessionSettings;
use crate::create_routes;
use crate::session_manager::SessionManager;
use migration::{Migrator, MigratorTrait};
use sketch_core::WordBank;
use sketch_persistence::DatabaseManager;
use sketch_types::{
    BroadcastEvent, ChangeOp, ClientMessage, FeedRecord, Phase, Point, Rgb, ServerMessage,
    SessionId, StrokeShape, Tool,
};

struct TestServer {
    session_manager: Arc<SessionManager>,
    connection_manager: Arc<ConnectionManager>,
}

impl TestServer {
    async fn start() -> Self {
        let db = sketch_persistence::connection::connect_to_memory_database()
            .await
            .unwrap();
        Migrator::up(&db, None).await.unwrap();

        let words = WordBank::from_word_list("apple\nbridge\ncastle\ndragon\neagle\nforest");
        Self {
            session_manager: Arc::new(SessionManager::new(
                DatabaseManager::from_connection(db),
                Arc::new(ChangeFeed::new()),
                words,
                SessionSettings::default(),
            )),
            connection_manager: Arc::new(ConnectionManager::new()),
        }
    }

    async fn connect(&self) -> WsClient {
        let routes = create_routes(self.connection_manager.clone(), self.session_manager.clone());
        ws().path("/ws")
            .handshake(routes)
            .await
            .expect("WebSocket handshake failed")
    }

    /// Connects and joins; returns once the snapshot arrived.
    async fn join(&self, session_id: SessionId, user_id: Uuid, name: &str) -> WsClient {
        let mut client = self.connect().await;
        send(
            &mut client,
            &ClientMessage::JoinSession {
                session_id,
                user_id,
                display_name: name.to_string(),
            },
        )
        .await;
        recv_until(&mut client, |m| matches!(m, ServerMessage::Joined { .. })).await;
        client
    }
}

async fn send(client: &mut WsClient, message: &ClientMessage) {
    client
        .send_text(serde_json::to_string(message).unwrap())
        .await;
}

/// Reads messages until one matches, skipping unrelated feed traffic.
async fn recv_until(
    client: &mut WsClient,
    mut predicate: impl FnMut(&ServerMessage) -> bool,
) -> ServerMessage {
    loop {
        let msg = timeout(Duration::from_secs(2), client.recv())
            .await
            .expect("Timeout waiting for server message")
            .expect("WebSocket closed");
        let server_msg: ServerMessage = serde_json::from_str(msg.to_str().unwrap()).unwrap();
        if predicate(&server_msg) {
            return server_msg;
        }
    }
}

fn session_in(message: &ServerMessage, kind: sketch_types::PhaseKind) -> bool {
    matches!(
        message,
        ServerMessage::Change { notice } if matches!(&notice.record, FeedRecord::Session(s) if s.phase_kind() == kind)
    )
}

struct Round {
    session_id: SessionId,
    host: WsClient,
    guest: WsClient,
    host_id: Uuid,
    guest_id: Uuid,
    word: String,
}

/// Host and guest seated, host drawing the first offered word.
async fn start_drawing(server: &TestServer) -> Round {
    let host_id = Uuid::new_v4();
    let guest_id = Uuid::new_v4();
    let created = server
        .session_manager
        .create_session(host_id, "Host", Some(1), None, Utc::now())
        .await
        .unwrap();

    let mut host = server.join(created.id, host_id, "Host").await;
    let mut guest = server.join(created.id, guest_id, "Guest").await;

    send(&mut host, &ClientMessage::StartGame).await;
    let choosing = recv_until(&mut host, |m| {
        session_in(m, sketch_types::PhaseKind::ChoosingWord)
    })
    .await;
    let ServerMessage::Change { notice } = choosing else {
        unreachable!()
    };
    let FeedRecord::Session(session) = notice.record else {
        unreachable!()
    };
    let Phase::ChoosingWord { drawer_id, choices } = session.phase else {
        unreachable!()
    };
    assert_eq!(drawer_id, host_id);
    assert_eq!(choices.len(), 3);

    // The guest sees that a word is being chosen, never the choices.
    let guest_view = recv_until(&mut guest, |m| {
        session_in(m, sketch_types::PhaseKind::ChoosingWord)
    })
    .await;
    if let ServerMessage::Change { notice } = guest_view {
        if let FeedRecord::Session(s) = notice.record {
            assert_eq!(s.phase, Phase::ChoosingWord {
                drawer_id: host_id,
                choices: vec![]
            });
        }
    }

    let word = choices[0].clone();
    send(&mut host, &ClientMessage::ChooseWord { word: word.clone() }).await;
    recv_until(&mut guest, |m| session_in(m, sketch_types::PhaseKind::Playing)).await;

    Round {
        session_id: created.id,
        host,
        guest,
        host_id,
        guest_id,
        word,
    }
}

#[tokio::test]
async fn test_correct_guess_ends_round_for_everyone() {
    let server = TestServer::start().await;
    let Round {
        mut host,
        mut guest,
        guest_id,
        word,
        ..
    } = start_drawing(&server).await;

    send(
        &mut guest,
        &ClientMessage::SendChat {
            id: Some(Uuid::new_v4()),
            text: word.to_uppercase(),
        },
    )
    .await;

    let chat = recv_until(&mut host, |m| {
        matches!(m, ServerMessage::Change { notice } if matches!(notice.record, FeedRecord::Chat(_)))
    })
    .await;
    let ServerMessage::Change { notice } = chat else {
        unreachable!()
    };
    let FeedRecord::Chat(entry) = notice.record else {
        unreachable!()
    };
    assert!(entry.is_correct);
    assert_eq!(entry.text, "Guest guessed the word!");

    let scored = recv_until(&mut host, |m| {
        matches!(m, ServerMessage::Change { notice }
            if notice.op == ChangeOp::Update
                && matches!(&notice.record, FeedRecord::Participant(p) if p.user_id == guest_id))
    })
    .await;
    if let ServerMessage::Change { notice } = scored {
        if let FeedRecord::Participant(p) = notice.record {
            assert_eq!(p.score, 400);
        }
    }

    recv_until(&mut host, |m| {
        session_in(m, sketch_types::PhaseKind::RoundSummary)
    })
    .await;
    recv_until(&mut guest, |m| {
        session_in(m, sketch_types::PhaseKind::RoundSummary)
    })
    .await;
}

#[tokio::test]
async fn test_guests_see_masked_word_and_live_ink() {
    let server = TestServer::start().await;
    let Round {
        session_id,
        mut host,
        mut guest,
        host_id,
        guest_id,
        word,
    } = start_drawing(&server).await;

    let snapshot = server
        .session_manager
        .snapshot(session_id, guest_id, Utc::now())
        .await
        .unwrap();
    assert_eq!(snapshot.session.current_word().map(str::len), Some(word.len()));
    assert_ne!(snapshot.session.current_word(), Some(word.as_str()));

    let sample = BroadcastEvent::DrawSample {
        path_id: Uuid::new_v4(),
        drawer_id: host_id,
        tool: Tool::Brush,
        color: Rgb::BLACK,
        width: 4.0,
        points: vec![Point::new(1.0, 1.0), Point::new(5.0, 5.0)],
    };
    send(
        &mut host,
        &ClientMessage::LiveInk {
            event: sample.clone(),
        },
    )
    .await;

    let relayed = recv_until(&mut guest, |m| matches!(m, ServerMessage::Ephemeral { .. })).await;
    match relayed {
        ServerMessage::Ephemeral { event } => assert_eq!(event, sample),
        other => panic!("Expected ephemeral event, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_strokes_reach_guests_and_history() {
    let server = TestServer::start().await;
    let Round {
        mut host,
        mut guest,
        ..
    } = start_drawing(&server).await;

    let shape = StrokeShape::Brush {
        points: vec![Point::new(10.0, 10.0), Point::new(40.0, 40.0)],
        color: Rgb::new(200, 0, 0),
        width: 3.0,
    };
    send(
        &mut host,
        &ClientMessage::DrawStroke {
            path_id: Some(Uuid::new_v4()),
            shape: shape.clone(),
        },
    )
    .await;

    recv_until(&mut guest, |m| {
        matches!(m, ServerMessage::Change { notice }
            if notice.op == ChangeOp::Insert && matches!(notice.record, FeedRecord::Stroke(_)))
    })
    .await;

    send(&mut guest, &ClientMessage::FetchStrokes).await;
    let history = recv_until(&mut guest, |m| matches!(m, ServerMessage::StrokeHistory { .. })).await;
    match history {
        ServerMessage::StrokeHistory { strokes } => {
            assert_eq!(strokes.len(), 1);
            assert_eq!(strokes[0].shape, shape);
        }
        other => panic!("Expected stroke history, got: {:?}", other),
    }

    // A guest cannot draw; the attempt is dropped without a notice.
    send(&mut guest, &ClientMessage::Clear).await;
    send(&mut host, &ClientMessage::Undo).await;
    recv_until(&mut guest, |m| {
        matches!(m, ServerMessage::Change { notice }
            if matches!(notice.record, FeedRecord::StrokesRemoved { stroke_id: Some(_), .. }))
    })
    .await;
}

#[tokio::test]
async fn test_leave_releases_seat() {
    let server = TestServer::start().await;
    let host_id = Uuid::new_v4();
    let guest_id = Uuid::new_v4();
    let session = server
        .session_manager
        .create_session(host_id, "Host", None, None, Utc::now())
        .await
        .unwrap();

    let mut host = server.join(session.id, host_id, "Host").await;
    let mut guest = server.join(session.id, guest_id, "Guest").await;

    send(&mut guest, &ClientMessage::LeaveSession).await;
    recv_until(&mut guest, |m| matches!(m, ServerMessage::Left)).await;

    let removed = recv_until(&mut host, |m| {
        matches!(m, ServerMessage::Change { notice } if notice.op == ChangeOp::Delete)
    })
    .await;
    if let ServerMessage::Change { notice } = removed {
        assert!(matches!(notice.record, FeedRecord::Participant(p) if p.user_id == guest_id));
    }

    // Only the host is left, so the game cannot start.
    send(&mut host, &ClientMessage::StartGame).await;
    let notice = recv_until(&mut host, |m| matches!(m, ServerMessage::Notice { .. })).await;
    assert!(matches!(
        notice,
        ServerMessage::Notice {
            kind: sketch_types::NoticeKind::DataAbsent,
            ..
        }
    ));
}

#[tokio::test]
async fn test_lagging_viewer_gets_fresh_snapshot() {
    let server = TestServer::start().await;
    let host_id = Uuid::new_v4();
    let guest_id = Uuid::new_v4();
    let session = server
        .session_manager
        .create_session(host_id, "Host", None, None, Utc::now())
        .await
        .unwrap();
    let mut guest = server.join(session.id, guest_id, "Guest").await;

    // Nothing yields in between, so the relay cannot keep up.
    let feed = server.session_manager.feed();
    for _ in 0..FEED_CAPACITY + 50 {
        feed.publish_ephemeral(session.id, None, BroadcastEvent::Clear { drawer_id: host_id });
    }

    let resynced = recv_until(&mut guest, |m| matches!(m, ServerMessage::Joined { .. })).await;
    match resynced {
        ServerMessage::Joined { snapshot } => {
            assert_eq!(snapshot.session.id, session.id);
            assert!(snapshot.participants.iter().any(|p| p.user_id == guest_id));
        }
        other => panic!("Expected a snapshot, got: {:?}", other),
    }
}
