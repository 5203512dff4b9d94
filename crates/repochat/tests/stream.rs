use proptest::prelude::*;
use serde_json::json;

use repochat::client::assembler::StreamAssembler;
use repochat::client::display::{DisplayRules, Panel};
use repochat::client::state::{apply, ChatState, ReplyStatus};
use repochat::models::content::Content;
use repochat::protocol::{encode, StreamEvent, ToolCallPayload, ToolResultPayload};

fn conversation(tokens: &[String]) -> Vec<StreamEvent> {
    let call = ToolCallPayload {
        id: "call_1".into(),
        name: "get_commits".into(),
        arguments: json!({"repo": "acme/widgets", "limit": 5}),
        error: None,
    };
    let result = ToolResultPayload {
        tool_call_id: "call_1".into(),
        tool_name: "get_commits".into(),
        is_error: false,
        content: vec![Content::text("[{\"sha\":\"4f2a\",\"message\":\"Fix build\"}]")],
        error: None,
    };

    let mut events = vec![
        StreamEvent::ToolCall {
            tool_call: call.clone(),
        },
        StreamEvent::ToolResult {
            tool_result: result.clone(),
        },
    ];
    events.extend(tokens.iter().map(|token| StreamEvent::Content {
        content: token.clone(),
    }));
    events.push(StreamEvent::Done {
        tool_calls: vec![call],
        tool_results: vec![result],
    });
    events
}

fn wire(events: &[StreamEvent]) -> Vec<u8> {
    events
        .iter()
        .map(|event| encode(event).unwrap())
        .collect::<String>()
        .into_bytes()
}

/// Feed `bytes` to a fresh assembler, cut at the given offsets
fn reassemble(bytes: &[u8], cuts: &[usize]) -> Vec<StreamEvent> {
    let mut offsets: Vec<usize> = cuts.iter().map(|cut| cut % (bytes.len() + 1)).collect();
    offsets.sort_unstable();

    let mut assembler = StreamAssembler::new();
    let mut decoded = Vec::new();
    let mut start = 0;
    for offset in offsets {
        decoded.extend(assembler.push(&bytes[start..offset]));
        start = offset;
    }
    decoded.extend(assembler.push(&bytes[start..]));
    decoded.extend(assembler.finish());
    decoded.into_iter().map(|event| event.unwrap()).collect()
}

proptest! {
    #[test]
    fn chunk_boundaries_do_not_change_events(
        tokens in prop::collection::vec(".{0,12}", 0..8),
        cuts in prop::collection::vec(any::<usize>(), 0..16),
    ) {
        let events = conversation(&tokens);
        let bytes = wire(&events);
        prop_assert_eq!(reassemble(&bytes, &cuts), events);
    }

    #[test]
    fn replaying_a_stream_rebuilds_the_same_state(
        tokens in prop::collection::vec("[a-z ]{1,8}", 1..6),
        cuts in prop::collection::vec(any::<usize>(), 0..8),
    ) {
        let bytes = wire(&conversation(&tokens));
        let first = reassemble(&bytes, &cuts)
            .iter()
            .fold(ChatState::default().ask("recent commits?"), apply);
        let second = reassemble(&bytes, &[])
            .iter()
            .fold(ChatState::default().ask("recent commits?"), apply);

        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.tool_calls.len(), 1);
        prop_assert_eq!(first.tool_results.len(), 1);
        prop_assert_eq!(&first.entries[1].text, &tokens.concat());
        prop_assert_eq!(&first.status, &ReplyStatus::Complete);
    }
}

#[test]
fn test_commit_question_shows_commit_panel() {
    let bytes = wire(&conversation(&["Latest: ".into(), "Fix build".into()]));
    let state = reassemble(&bytes, &[3, 40, 41, 200])
        .iter()
        .fold(ChatState::default().ask("What changed in the last commit?"), apply);

    let panels = DisplayRules::default().panels_for(&state);
    assert!(panels.contains(&Panel::Commits));
    assert_eq!(state.results_for("get_commits").count(), 1);
    assert_eq!(state.entries[1].text, "Latest: Fix build");
}
