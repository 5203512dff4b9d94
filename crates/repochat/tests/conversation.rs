use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;

use repochat::agent::Agent;
use repochat::client::assembler::assemble;
use repochat::emitter::emit;
use repochat::errors::{AgentError, AgentResult, RegistryError};
use repochat::models::content::Content;
use repochat::models::message::Message;
use repochat::models::tool::{Tool, ToolCall};
use repochat::protocol::{encode, StreamEvent};
use repochat::providers::mock::MockProvider;
use repochat::registry::ToolRegistry;
use repochat::systems::System;

/// A provider with fixed tools that answers every call the same way
struct ScriptedSystem {
    name: String,
    tools: Vec<Tool>,
    alive: AtomicBool,
    calls: AtomicUsize,
    delay: Duration,
    output: Vec<Content>,
}

impl ScriptedSystem {
    fn new(name: &str, tools: &[&str], output: Vec<Content>) -> Self {
        Self {
            name: name.to_string(),
            tools: tools
                .iter()
                .map(|tool| Tool::new(*tool, format!("{} tool", tool), json!({"type": "object"})))
                .collect(),
            alive: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            output,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn dead(self) -> Self {
        self.alive.store(false, Ordering::SeqCst);
        self
    }
}

#[async_trait]
impl System for ScriptedSystem {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        ""
    }

    fn instructions(&self) -> &str {
        ""
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn call(&self, _tool_call: ToolCall) -> AgentResult<Vec<Content>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(self.output.clone())
    }
}

fn three_issues() -> Vec<Content> {
    vec![Content::text(
        json!([
            {"number": 1, "title": "Crash on start", "state": "open"},
            {"number": 2, "title": "Typo in README", "state": "open"},
            {"number": 3, "title": "Slow build", "state": "open"}
        ])
        .to_string(),
    )]
}

/// Run a reply through the emitter, onto the wire and back through the assembler
async fn round_trip(agent: &Agent, question: &str) -> Vec<StreamEvent> {
    let wire = emit(agent.reply(&[Message::user().with_text(question)]))
        .map(|event| encode(&event).unwrap().into_bytes());
    assemble(wire)
        .map(|decoded| decoded.unwrap())
        .collect()
        .await
}

#[tokio::test]
async fn test_list_open_issues() {
    let github = Arc::new(ScriptedSystem::new("github", &["get_issues"], three_issues()));
    let registry = Arc::new(ToolRegistry::discover(vec![github.clone()]).unwrap());
    let provider = Arc::new(MockProvider::new(vec![
        Message::assistant().with_tool_request(
            "call_1",
            Ok(ToolCall::new(
                "get_issues",
                json!({"repo": "acme/widgets", "state": "open"}),
            )),
        ),
        Message::assistant().with_text("acme/widgets has 3 open issues."),
    ]));
    let agent = Agent::new(provider, registry);

    let events = round_trip(&agent, "list open issues for acme/widgets").await;

    match &events[0] {
        StreamEvent::ToolCall { tool_call } => {
            assert_eq!(tool_call.name, "get_issues");
            assert_eq!(tool_call.arguments["state"], "open");
        }
        other => panic!("expected tool_call, got {:?}", other),
    }
    match &events[1] {
        StreamEvent::ToolResult { tool_result } => {
            assert!(!tool_result.is_error);
            assert_eq!(tool_result.tool_call_id, "call_1");
            let issues = tool_result.content[0].as_json().unwrap();
            assert_eq!(issues.as_array().unwrap().len(), 3);
        }
        other => panic!("expected tool_result, got {:?}", other),
    }

    let content: String = events[2..events.len() - 1]
        .iter()
        .map(|event| match event {
            StreamEvent::Content { content } => content.as_str(),
            other => panic!("expected content, got {:?}", other),
        })
        .collect();
    assert_eq!(content, "acme/widgets has 3 open issues.");
    assert!(matches!(events.last(), Some(StreamEvent::Done { tool_calls, tool_results })
        if tool_calls.len() == 1 && tool_results.len() == 1));
    assert_eq!(github.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_dead_screenshot_provider_does_not_abort() {
    let github = Arc::new(ScriptedSystem::new("github", &["get_issues"], three_issues()));
    let screenshot =
        Arc::new(ScriptedSystem::new("screenshot", &["screenshot"], vec![]).dead());
    let registry = Arc::new(ToolRegistry::discover(vec![github, screenshot.clone()]).unwrap());
    let provider = Arc::new(MockProvider::new(vec![
        Message::assistant().with_tool_request(
            "call_1",
            Ok(ToolCall::new(
                "screenshot",
                json!({"url": "https://github.com/acme/widgets"}),
            )),
        ),
        Message::assistant().with_text("The screenshot service is not running right now."),
    ]));
    let agent = Agent::new(provider.clone(), registry);

    let events = round_trip(&agent, "take a screenshot of acme/widgets").await;

    assert!(matches!(&events[0], StreamEvent::ToolCall { tool_call } if tool_call.name == "screenshot"));
    match &events[1] {
        StreamEvent::ToolResult { tool_result } => {
            assert!(tool_result.is_error);
            assert_eq!(tool_result.error.as_ref().unwrap().kind, "ProviderUnavailable");
        }
        other => panic!("expected tool_result, got {:?}", other),
    }
    assert!(events
        .iter()
        .any(|event| matches!(event, StreamEvent::Content { .. })));
    assert!(matches!(events.last(), Some(StreamEvent::Done { .. })));
    assert_eq!(screenshot.calls.load(Ordering::SeqCst), 0);

    // the model was told about the failure
    let second = &provider.histories()[1];
    let response = second[2].content[0].as_tool_response().unwrap();
    assert!(matches!(
        response.tool_result,
        Err(AgentError::ProviderUnavailable(_))
    ));
}

#[test]
fn test_duplicate_fetch_fails_discovery() {
    let result = ToolRegistry::discover(vec![
        Arc::new(ScriptedSystem::new("web", &["fetch"], vec![])),
        Arc::new(ScriptedSystem::new("mirror", &["fetch", "clone"], vec![])),
    ]);
    assert!(matches!(
        result,
        Err(RegistryError::DuplicateTool { ref tool, .. }) if tool == "fetch"
    ));
}

#[tokio::test]
async fn test_loop_cap_stops_after_exactly_five_batches() {
    let github = Arc::new(ScriptedSystem::new("github", &["get_issues"], three_issues()));
    let registry = Arc::new(ToolRegistry::discover(vec![github.clone()]).unwrap());
    let provider = Arc::new(MockProvider::new(Vec::new()).with_fallback(Ok(
        Message::assistant()
            .with_tool_request("again", Ok(ToolCall::new("get_issues", json!({})))),
    )));
    let agent = Agent::new(provider, registry).with_max_turns(5);

    let events = round_trip(&agent, "keep going").await;

    assert_eq!(github.calls.load(Ordering::SeqCst), 5);
    let results = events
        .iter()
        .filter(|event| matches!(event, StreamEvent::ToolResult { .. }))
        .count();
    assert_eq!(results, 5);
    assert!(matches!(events.last(), Some(StreamEvent::Error { kind, .. }) if kind == "ToolLoopExceeded"));
}

#[tokio::test]
async fn test_tool_call_precedes_its_result() {
    let slow = Arc::new(
        ScriptedSystem::new("github", &["get_commits"], vec![Content::text("[]")])
            .with_delay(Duration::from_millis(30)),
    );
    let fast = Arc::new(ScriptedSystem::new("screenshot", &["screenshot"], vec![Content::text("ok")]));
    let registry = Arc::new(ToolRegistry::discover(vec![slow, fast]).unwrap());

    let batch = |round: usize| {
        Message::assistant()
            .with_tool_request(
                format!("commits_{}", round),
                Ok(ToolCall::new("get_commits", json!({}))),
            )
            .with_tool_request(
                format!("shot_{}", round),
                Ok(ToolCall::new("screenshot", json!({}))),
            )
            .with_tool_request(
                format!("missing_{}", round),
                Ok(ToolCall::new("delete_repo", json!({}))),
            )
    };
    let provider = Arc::new(MockProvider::new(vec![
        batch(0),
        batch(1),
        Message::assistant().with_text("done"),
    ]));
    let agent = Agent::new(provider, registry);

    let events = round_trip(&agent, "commits and a screenshot").await;

    let position = |wanted: &dyn Fn(&StreamEvent) -> bool| events.iter().position(wanted);
    for round in 0..2 {
        for id in [
            format!("commits_{}", round),
            format!("shot_{}", round),
            format!("missing_{}", round),
        ] {
            let call = position(&|event| {
                matches!(event, StreamEvent::ToolCall { tool_call } if tool_call.id == id)
            })
            .unwrap();
            let result = position(&|event| {
                matches!(event, StreamEvent::ToolResult { tool_result } if tool_result.tool_call_id == id)
            })
            .unwrap();
            assert!(call < result, "{} out of order", id);
        }
    }

    // results come back in request order, whatever finished first
    let result_ids: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            StreamEvent::ToolResult { tool_result } => Some(tool_result.tool_call_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(
        result_ids,
        vec!["commits_0", "shot_0", "missing_0", "commits_1", "shot_1", "missing_1"]
    );
}
