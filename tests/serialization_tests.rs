use serde_json::json;
use voxlane::sdk::{ToolCatalog, session_update};
use voxlane::error::ApiErrorType;
use voxlane::{ClientEvent, EngineConfig, Item, ServerEvent};

#[test]
fn test_session_update_wire_shape() {
    let config = EngineConfig {
        instructions: Some("You are a patient listener.".to_string()),
        voice: Some("alloy".to_string()),
        ..EngineConfig::default()
    };
    let update = session_update(&config, &ToolCatalog::memory_defaults()).expect("build session.update");
    let event = ClientEvent::SessionUpdate { event_id: None, session: Box::new(update) };
    let json = serde_json::to_value(&event).expect("serialize session.update");

    assert_eq!(json["type"], "session.update");
    assert!(json.get("event_id").is_none());
    let session = &json["session"];
    assert_eq!(session["instructions"], "You are a patient listener.");
    assert_eq!(session["voice"], "alloy");
    assert_eq!(session["input_audio_transcription"]["model"], "gpt-4o-mini-transcribe");
    assert_eq!(session["turn_detection"]["type"], "server_vad");
    assert_eq!(session["turn_detection"]["create_response"], true);
    assert_eq!(session["tool_choice"], "auto");

    let tools = session["tools"].as_array().expect("tools array");
    let names: Vec<_> = tools.iter().map(|t| t["name"].as_str().unwrap_or_default()).collect();
    assert_eq!(names, ["search_memory", "save_memory"]);
    assert!(tools.iter().all(|t| t["type"] == "function"));
    assert_eq!(tools[0]["parameters"]["type"], "object");
    assert!(tools[0]["parameters"]["properties"].get("query").is_some());
}

#[test]
fn test_session_update_without_tools_omits_choice() {
    let update = session_update(&EngineConfig::default(), &ToolCatalog::new()).expect("build session.update");
    let json = serde_json::to_value(&update).expect("serialize");
    assert!(json.get("tools").is_none());
    assert!(json.get("tool_choice").is_none());
    assert!(json.get("instructions").is_none());
}

#[test]
fn test_function_result_and_continue() {
    let result = ClientEvent::function_result("call_7", r#"{"memories":[]}"#.to_string());
    assert_eq!(result.kind(), "conversation.item.create");
    assert_eq!(
        serde_json::to_value(&result).expect("serialize result"),
        json!({
            "type": "conversation.item.create",
            "item": {
                "type": "function_call_output",
                "call_id": "call_7",
                "output": "{\"memories\":[]}"
            }
        })
    );

    let next = serde_json::to_value(ClientEvent::continue_generation()).expect("serialize continue");
    assert_eq!(next, json!({ "type": "response.create" }));
}

#[test]
fn test_argument_stream_events() {
    let delta: ServerEvent = serde_json::from_value(json!({
        "type": "response.function_call_arguments.delta",
        "call_id": "call_1",
        "delta": "{\"query\":"
    }))
    .expect("deserialize delta");
    match delta {
        ServerEvent::ResponseFunctionCallArgumentsDelta { call_id, delta, .. } => {
            assert_eq!(call_id, "call_1");
            assert_eq!(delta, "{\"query\":");
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let done: ServerEvent = serde_json::from_value(json!({
        "type": "response.function_call_arguments.done",
        "event_id": "evt_2",
        "call_id": "call_1",
        "name": "search_memory",
        "arguments": "{\"query\":\"tea\"}"
    }))
    .expect("deserialize done");
    assert_eq!(done.event_type(), "response.function_call_arguments.done");
    match done {
        ServerEvent::ResponseFunctionCallArgumentsDone { call_id, name, arguments, .. } => {
            assert_eq!(call_id, "call_1");
            assert_eq!(name.as_deref(), Some("search_memory"));
            assert_eq!(arguments.as_deref(), Some("{\"query\":\"tea\"}"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn test_output_item_function_call() {
    let event: ServerEvent = serde_json::from_value(json!({
        "type": "response.output_item.added",
        "response_id": "resp_1",
        "output_index": 0,
        "item": {
            "type": "function_call",
            "id": "item_1",
            "status": "in_progress",
            "name": "save_memory",
            "call_id": "call_3",
            "arguments": ""
        }
    }))
    .expect("deserialize output item");
    match event {
        ServerEvent::ResponseOutputItemAdded { item: Item::FunctionCall { name, call_id, .. }, .. } => {
            assert_eq!(name, "save_memory");
            assert_eq!(call_id, "call_3");
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn test_unknown_server_event_is_preserved() {
    let raw = json!({
        "type": "rate_limits.updated",
        "event_id": "evt_9",
        "rate_limits": [{ "name": "requests", "remaining": 10 }]
    });
    let event: ServerEvent = serde_json::from_value(raw.clone()).expect("unknown events never fail");
    assert_eq!(event.event_type(), "rate_limits.updated");
    match event {
        ServerEvent::Unknown(value) => assert_eq!(value, raw),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn test_malformed_known_event_falls_back_to_unknown() {
    let raw = json!({ "type": "response.function_call_arguments.delta", "delta": "x" });
    let event: ServerEvent = serde_json::from_value(raw).expect("missing call_id is not fatal");
    assert!(matches!(event, ServerEvent::Unknown(_)));
}

#[test]
fn test_transcript_events() {
    let user: ServerEvent = serde_json::from_value(json!({
        "type": "conversation.item.input_audio_transcription.completed",
        "item_id": "item_4",
        "content_index": 0,
        "transcript": "remind me about the dentist"
    }))
    .expect("deserialize user transcript");
    assert!(matches!(
        user,
        ServerEvent::InputAudioTranscriptionCompleted { ref transcript, .. }
            if transcript == "remind me about the dentist"
    ));

    let assistant: ServerEvent = serde_json::from_value(json!({
        "type": "response.output_audio_transcript.done",
        "transcript": "I'll remember that."
    }))
    .expect("deserialize assistant transcript");
    assert!(matches!(assistant, ServerEvent::ResponseOutputAudioTranscriptDone { .. }));
}

#[test]
fn test_error_event_without_type_is_still_an_error() {
    let event: ServerEvent = serde_json::from_value(json!({
        "type": "error",
        "event_id": "evt_err",
        "error": { "code": "session_expired", "message": "Your session hit the maximum duration." }
    }))
    .expect("deserialize error event");
    match event {
        ServerEvent::Error { error, .. } => {
            assert_eq!(error.error_type, ApiErrorType::Unknown);
            assert_eq!(error.code.as_deref(), Some("session_expired"));
            assert_eq!(error.message, "Your session hit the maximum duration.");
        }
        other => panic!("unexpected event: {other:?}"),
    }
}
