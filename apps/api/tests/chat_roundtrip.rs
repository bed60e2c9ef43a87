//! Client session against a live server on a local port.

use std::sync::Arc;

use serde_json::json;

use resume_coach_api::agent::{AgentEvent, ScriptedAgent};
use resume_coach_api::chat::threads::{InMemoryThreadStore, ThreadStore};
use resume_coach_api::client::{
    HttpChatTransport, MemoryThreadIdStore, SessionStatus, StreamSession, ThreadIdStore,
};
use resume_coach_api::config::Config;
use resume_coach_api::models::chat::Role;
use resume_coach_api::routes::build_router;
use resume_coach_api::state::AppState;

async fn spawn_server(agent: ScriptedAgent, threads: Arc<InMemoryThreadStore>) -> String {
    let state = AppState {
        threads,
        agent: Arc::new(agent),
        config: Config::default(),
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_router(state)).await.unwrap();
    });
    format!("http://{addr}")
}

fn coach_reply() -> ScriptedAgent {
    ScriptedAgent::new(vec![
        AgentEvent::ToolStart {
            name: "getResume".to_string(),
            input: Some(json!({"resumeId": 3})),
            run_id: Some("r1".to_string()),
        },
        AgentEvent::ToolEnd {
            name: "getResume".to_string(),
            output: Some(json!({"summary": "Engineer"})),
            run_id: Some("r1".to_string()),
        },
        AgentEvent::ModelToken {
            text: "Improve".to_string(),
        },
        AgentEvent::ModelToken {
            text: " it.".to_string(),
        },
    ])
}

#[tokio::test]
async fn test_conversation_round_trip_reuses_thread() {
    let threads = Arc::new(InMemoryThreadStore::new());
    let base_url = spawn_server(coach_reply(), threads.clone()).await;

    let thread_ids = Arc::new(MemoryThreadIdStore::new());
    let transport = Arc::new(HttpChatTransport::new(&base_url).with_user("user-1"));
    let session = StreamSession::new(transport, thread_ids.clone()).with_resume_id(3);

    session.send_message("Review my summary").await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.error, None);
    assert_eq!(snapshot.status, SessionStatus::Idle);
    assert_eq!(snapshot.messages.len(), 2);
    assert_eq!(snapshot.messages[1].role, Role::Assistant);
    assert_eq!(snapshot.messages[1].content, "Improve it.");
    assert!(snapshot.tool_executions.is_empty());

    let thread_id = snapshot.thread_id.clone().expect("thread id learned from done");
    assert_eq!(thread_ids.load().unwrap().as_deref(), Some(thread_id.as_str()));
    let thread = threads.find_thread(&thread_id, "user-1").await.unwrap().unwrap();
    assert_eq!(thread.resume_id, Some(3));

    session.send_message("And my skills?").await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.messages.len(), 4);
    assert_eq!(snapshot.thread_id.as_deref(), Some(thread_id.as_str()));
    assert_eq!(threads.thread_count().await, 1);
}

#[tokio::test]
async fn test_unauthenticated_client_is_asked_to_sign_in() {
    let threads = Arc::new(InMemoryThreadStore::new());
    let base_url = spawn_server(coach_reply(), threads.clone()).await;

    let transport = Arc::new(HttpChatTransport::new(&base_url));
    let session = StreamSession::new(transport, Arc::new(MemoryThreadIdStore::new()));

    session.send_message("Review my summary").await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.error.as_deref(), Some("Please sign in to use the chat"));
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(threads.thread_count().await, 0);
}

#[tokio::test]
async fn test_agent_failure_reaches_the_client() {
    let threads = Arc::new(InMemoryThreadStore::new());
    let base_url = spawn_server(ScriptedAgent::unconfigured(), threads).await;

    let transport = Arc::new(HttpChatTransport::new(&base_url).with_user("user-1"));
    let session = StreamSession::new(transport, Arc::new(MemoryThreadIdStore::new()));

    session.send_message("hello").await;

    let snapshot = session.snapshot();
    assert_eq!(
        snapshot.error.as_deref(),
        Some("The coach is not configured on this server")
    );
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.thread_id, None);
}

#[tokio::test]
async fn test_cancel_mid_stream_keeps_no_partial_reply() {
    let threads = Arc::new(InMemoryThreadStore::new());
    let tokens = (0..20)
        .map(|i| AgentEvent::ModelToken {
            text: format!("word{i} "),
        })
        .collect();
    let agent = ScriptedAgent::new(tokens).with_delay(std::time::Duration::from_millis(20));
    let base_url = spawn_server(agent, threads).await;

    let transport = Arc::new(HttpChatTransport::new(&base_url).with_user("user-1"));
    let session = Arc::new(StreamSession::new(
        transport,
        Arc::new(MemoryThreadIdStore::new()),
    ));

    let send = tokio::spawn({
        let session = session.clone();
        async move { session.send_message("Rewrite everything").await }
    });
    session
        .subscribe()
        .wait_for(|s| !s.current_chunk.is_empty())
        .await
        .unwrap();

    session.cancel_request();
    send.await.unwrap();

    let snapshot = session.snapshot();
    assert_eq!(snapshot.status, SessionStatus::Idle);
    assert_eq!(snapshot.error, None);
    assert_eq!(snapshot.current_chunk, "");
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.messages[0].role, Role::User);
}
