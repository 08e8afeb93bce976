//! End-to-end quiz flows driven through the public service API with an in-memory store
//! and channel-backed connections.

use std::sync::Arc;

use axum::extract::ws::Message;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use uuid::Uuid;

use quiz_live_back::{
    config::AppConfig,
    dao::session_store::MemorySessionStore,
    dto::{
        session::{CreateSessionRequest, QuestionInput},
        ws::InboundFrame,
    },
    services::{
        gate::{Identity, JwtVerifier},
        session_service::{self, Caller},
        websocket_service,
    },
    state::{AppState, SharedState, state_machine::SessionStatus},
};

struct Client {
    caller: Caller,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Client {
    fn new(user_id: &str, display_name: &str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let identity = Identity {
            user_id: user_id.into(),
            display_name: display_name.into(),
        };
        Self {
            caller: Caller::new(identity, tx),
            rx,
        }
    }

    fn frames(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            if let Message::Text(text) = message {
                frames.push(serde_json::from_str(text.as_str()).unwrap());
            }
        }
        frames
    }

    fn events(&mut self) -> Vec<Value> {
        self.frames()
            .into_iter()
            .filter(|frame| frame["type"] == "event")
            .collect()
    }

    /// Send a raw command frame through the router and return its response.
    async fn send(&mut self, state: &SharedState, frame: Value) -> Value {
        let frame = InboundFrame::parse(&frame.to_string()).unwrap();
        websocket_service::dispatch(state.clone(), self.caller.clone(), frame).await;
        self.frames()
            .into_iter()
            .find(|frame| frame["type"] == "response")
            .expect("no response frame")
    }
}

async fn new_state() -> SharedState {
    let state = AppState::new(
        AppConfig::default().with_jwt_secret("secret"),
        Arc::new(JwtVerifier::new("secret")),
    );
    state
        .set_session_store(Arc::new(MemorySessionStore::new()))
        .await;
    state
}

fn question(text: &str, correct: usize) -> QuestionInput {
    QuestionInput {
        text: text.into(),
        options: vec!["red".into(), "green".into(), "blue".into()],
        correct_option_index: correct,
        time_limit_seconds: 20,
    }
}

fn two_questions() -> CreateSessionRequest {
    CreateSessionRequest {
        title: "Colours".into(),
        questions: vec![question("Sky?", 2), question("Grass?", 1)],
    }
}

fn event_names(events: &[Value]) -> Vec<&str> {
    events
        .iter()
        .map(|event| event["event"].as_str().unwrap())
        .collect()
}

#[tokio::test]
async fn full_game_ranks_the_two_correct_player_first() {
    let state = new_state().await;
    let mut host = Client::new("host", "Host");
    let mut alice = Client::new("alice", "Alice");
    let mut bob = Client::new("bob", "Bob");

    let created = session_service::create_session(&state, &host.caller, two_questions())
        .await
        .unwrap();
    let id = created.session_id;
    assert_eq!(created.join_code.len(), 6);

    session_service::join_session(&state, &alice.caller, &created.join_code)
        .await
        .unwrap();
    session_service::join_session(&state, &bob.caller, &created.join_code)
        .await
        .unwrap();
    session_service::start_game(&state, &host.caller, id)
        .await
        .unwrap();

    let events = bob.events();
    assert_eq!(
        event_names(&events),
        ["waiting_lobby", "game_started", "new_question"]
    );
    let first = &events[2]["data"];
    assert_eq!(first["index"], 0);
    assert_eq!(first["text"], "Sky?");
    assert!(first.get("correct_option_index").is_none());

    // Question 1: both correct, Alice faster.
    let a1 = session_service::submit_answer(&state, &alice.caller, id, 0, 2, 2_000)
        .await
        .unwrap();
    let b1 = session_service::submit_answer(&state, &bob.caller, id, 0, 2, 10_000)
        .await
        .unwrap();
    assert!(a1.correct && b1.correct);
    assert!(a1.points_awarded > b1.points_awarded);
    assert!(b1.points_awarded > 0);

    let board = session_service::get_leaderboard(&state, id).await.unwrap();
    assert_eq!(board.leaderboard.len(), 2);
    assert_eq!(board.leaderboard[0].user_id, "alice");
    assert!(board.leaderboard.iter().all(|entry| entry.score > 0));

    session_service::next_question(&state, &host.caller, id)
        .await
        .unwrap();

    // Question 2: Bob correct, Alice wrong.
    let a2 = session_service::submit_answer(&state, &alice.caller, id, 1, 0, 1_000)
        .await
        .unwrap();
    let b2 = session_service::submit_answer(&state, &bob.caller, id, 1, 1, 19_000)
        .await
        .unwrap();
    assert!(!a2.correct);
    assert_eq!(a2.points_awarded, 0);
    assert!(b2.correct);

    let progress = session_service::next_question(&state, &host.caller, id)
        .await
        .unwrap();
    assert_eq!(progress.status, SessionStatus::Ended);

    let host_events = host.events();
    let game_over = host_events.last().unwrap();
    assert_eq!(game_over["event"], "game_over");
    assert_eq!(game_over["data"]["reason"], "completed");
    let ranking = game_over["data"]["leaderboard"].as_array().unwrap();
    assert_eq!(ranking[0]["user_id"], "bob");
    assert_eq!(ranking[0]["rank"], 1);
    assert_eq!(ranking[1]["user_id"], "alice");
    assert_eq!(ranking[1]["rank"], 2);

    // Nothing moves after the end.
    let err = session_service::submit_answer(&state, &alice.caller, id, 1, 1, 0)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_STATE");
    let err = session_service::next_question(&state, &host.caller, id)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_STATE");
}

#[tokio::test]
async fn concurrent_answers_are_all_scored() {
    let state = new_state().await;
    let host = Client::new("host", "Host");
    let created = session_service::create_session(&state, &host.caller, two_questions())
        .await
        .unwrap();
    let id = created.session_id;

    let players: Vec<Client> = (0..16)
        .map(|i| Client::new(&format!("player-{i}"), &format!("Player {i}")))
        .collect();
    for player in &players {
        session_service::join_session(&state, &player.caller, &created.join_code)
            .await
            .unwrap();
    }
    session_service::start_game(&state, &host.caller, id)
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for player in &players {
        let state = state.clone();
        let caller = player.caller.clone();
        tasks.push(tokio::spawn(async move {
            session_service::submit_answer(&state, &caller, id, 0, 2, 0).await
        }));
    }
    for task in tasks {
        let ack = task.await.unwrap().unwrap();
        assert_eq!(ack.points_awarded, 1000);
    }

    let board = session_service::get_leaderboard(&state, id).await.unwrap();
    assert_eq!(board.leaderboard.len(), players.len());
    assert!(board.leaderboard.iter().all(|entry| entry.score == 1000));
    // Ties keep join order.
    for (i, entry) in board.leaderboard.iter().enumerate() {
        assert_eq!(entry.user_id, format!("player-{i}"));
        assert_eq!(entry.rank, i + 1);
    }
}

#[tokio::test]
async fn answer_and_advance_race_never_scores_the_wrong_question() {
    let state = new_state().await;
    let host = Client::new("host", "Host");
    let alice = Client::new("alice", "Alice");
    let created = session_service::create_session(&state, &host.caller, two_questions())
        .await
        .unwrap();
    let id = created.session_id;
    session_service::join_session(&state, &alice.caller, &created.join_code)
        .await
        .unwrap();
    session_service::start_game(&state, &host.caller, id)
        .await
        .unwrap();

    let answer = {
        let state = state.clone();
        let caller = alice.caller.clone();
        tokio::spawn(async move {
            session_service::submit_answer(&state, &caller, id, 0, 2, 0).await
        })
    };
    let advance = {
        let state = state.clone();
        let caller = host.caller.clone();
        tokio::spawn(async move { session_service::next_question(&state, &caller, id).await })
    };

    let answer = answer.await.unwrap();
    advance.await.unwrap().unwrap();

    let board = session_service::get_leaderboard(&state, id).await.unwrap();
    match answer {
        Ok(ack) => assert_eq!(board.leaderboard[0].score, ack.score),
        Err(err) => {
            assert_eq!(err.code(), "INVALID_STATE");
            assert_eq!(board.leaderboard[0].score, 0);
        }
    }
}

#[tokio::test]
async fn join_rules_after_start() {
    let state = new_state().await;
    let host = Client::new("host", "Host");
    let mut alice = Client::new("alice", "Alice");
    let carol = Client::new("carol", "Carol");

    let err = session_service::join_session(&state, &carol.caller, "ZZZZZZ")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SESSION_NOT_FOUND");

    let created = session_service::create_session(&state, &host.caller, two_questions())
        .await
        .unwrap();
    session_service::join_session(&state, &alice.caller, &created.join_code)
        .await
        .unwrap();
    session_service::start_game(&state, &host.caller, created.session_id)
        .await
        .unwrap();

    let err = session_service::join_session(&state, &carol.caller, &created.join_code)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SESSION_ALREADY_STARTED");

    // Alice comes back on a new connection with the same code.
    let mut alice_again = Client::new("alice", "Alice");
    let snapshot = session_service::join_session(&state, &alice_again.caller, &created.join_code)
        .await
        .unwrap();
    assert_eq!(snapshot.status, SessionStatus::Active);
    assert_eq!(snapshot.players.len(), 1);
    assert_eq!(snapshot.current_question.unwrap().index, 0);
    alice_again.frames();
    alice.frames();

    // The stale connection closing does not knock the new one offline.
    session_service::disconnect(&state, &alice.caller).await;
    let board = session_service::get_leaderboard(&state, created.session_id)
        .await
        .unwrap();
    assert_eq!(board.leaderboard.len(), 1);
    let snapshot = session_service::reconnect_session(&state, &alice_again.caller, created.session_id)
        .await
        .unwrap();
    assert!(snapshot.players[0].is_connected);
}

#[tokio::test]
async fn ended_session_is_reachable_by_id_but_not_by_code() {
    let state = new_state().await;
    let mut host = Client::new("host", "Host");
    let alice = Client::new("alice", "Alice");
    let created = session_service::create_session(&state, &host.caller, two_questions())
        .await
        .unwrap();
    session_service::join_session(&state, &alice.caller, &created.join_code)
        .await
        .unwrap();
    session_service::end_game(&state, &host.caller, created.session_id)
        .await
        .unwrap();

    let last = host.events().pop().unwrap();
    assert_eq!(last["event"], "game_over");
    assert_eq!(last["data"]["reason"], "ended_by_host");

    let late = Client::new("alice", "Alice");
    let err = session_service::join_session(&state, &late.caller, &created.join_code)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SESSION_NOT_FOUND");

    let snapshot = session_service::reconnect_session(&state, &late.caller, created.session_id)
        .await
        .unwrap();
    assert_eq!(snapshot.status, SessionStatus::Ended);
    assert_eq!(snapshot.leaderboard.len(), 1);
}

#[tokio::test]
async fn router_wraps_results_in_envelopes() {
    let state = new_state().await;
    let mut host = Client::new("host", "Host");
    let mut alice = Client::new("alice", "Alice");

    let response = host
        .send(
            &state,
            json!({
                "type": "create_session",
                "request_id": "c-1",
                "title": "Colours",
                "questions": [{
                    "text": "Sky?",
                    "options": ["red", "blue"],
                    "correct_option_index": 1,
                    "time_limit_seconds": 5
                }]
            }),
        )
        .await;
    assert_eq!(response["success"], true);
    assert_eq!(response["command"], "create_session");
    assert_eq!(response["request_id"], "c-1");
    let session_id = response["data"]["session_id"].as_str().unwrap().to_owned();
    let join_code = response["data"]["join_code"].as_str().unwrap().to_owned();

    let response = alice
        .send(&state, json!({"type": "join_session", "join_code": join_code}))
        .await;
    assert_eq!(response["success"], true);
    assert_eq!(response["data"]["status"], "lobby");

    let response = alice
        .send(&state, json!({"type": "start_game", "session_id": session_id}))
        .await;
    assert_eq!(response["success"], false);
    assert_eq!(response["error"]["code"], "NOT_HOST");

    let response = host
        .send(&state, json!({"type": "start_game", "session_id": session_id}))
        .await;
    assert_eq!(response["success"], true);
    assert!(response.get("data").is_none());
    alice.frames();

    // Late answer: failed envelope plus a dedicated error event for the submitter.
    let frame = InboundFrame::parse(
        &json!({
            "type": "submit_answer",
            "session_id": session_id,
            "question_index": 0,
            "option_index": 1,
            "elapsed_ms": 9_000
        })
        .to_string(),
    )
    .unwrap();
    websocket_service::dispatch(state.clone(), alice.caller.clone(), frame).await;
    let frames = alice.frames();
    let error_event = frames
        .iter()
        .find(|frame| frame["type"] == "event")
        .unwrap();
    assert_eq!(error_event["event"], "answer_error");
    assert_eq!(error_event["data"]["code"], "TIME_EXPIRED");
    let response = frames
        .iter()
        .find(|frame| frame["type"] == "response")
        .unwrap();
    assert_eq!(response["error"]["code"], "TIME_EXPIRED");
    assert!(host.events().is_empty());

    let response = alice
        .send(
            &state,
            json!({
                "type": "submit_answer",
                "session_id": session_id,
                "question_index": 0,
                "option_index": 7,
                "elapsed_ms": 100
            }),
        )
        .await;
    assert_eq!(response["error"]["code"], "INVALID_INPUT");

    let response = alice
        .send(&state, json!({"type": "teleport", "request_id": "t-1"}))
        .await;
    assert_eq!(response["success"], false);
    assert_eq!(response["command"], "teleport");
    assert_eq!(response["request_id"], "t-1");
    assert_eq!(response["error"]["code"], "INVALID_INPUT");

    let response = alice
        .send(
            &state,
            json!({"type": "get_leaderboard", "session_id": Uuid::new_v4()}),
        )
        .await;
    assert_eq!(response["error"]["code"], "SESSION_NOT_FOUND");
}
