//! Integration tests for MCP protocol handling.
//!
//! These tests verify the JSON-RPC 2.0 codec and the typed payloads as the
//! public API exposes them.

use binance_mcp::mcp::protocol::{encode, parse_message, IncomingMessage, RequestId};
use binance_mcp::mcp::types::{CreateMessageParams, InitializeParams, InitializeResult};
use binance_mcp::mcp::MCP_PROTOCOL_VERSION;

// =============================================================================
// Protocol Parsing Tests
// =============================================================================

#[test]
fn test_parse_initialize_request() {
    let json = r#"{
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {
                "name": "test-client",
                "version": "1.0.0"
            }
        }
    }"#;

    let result = parse_message(json);
    assert!(result.is_ok());

    if let IncomingMessage::Request(req) = result.unwrap() {
        assert_eq!(req.method, "initialize");
        assert_eq!(req.id, RequestId::Number(1));

        let params: InitializeParams = serde_json::from_value(req.params.unwrap()).unwrap();
        assert_eq!(params.protocol_version, MCP_PROTOCOL_VERSION);
        assert_eq!(params.client_info.unwrap().name, "test-client");
    } else {
        panic!("Expected Request");
    }
}

#[test]
fn test_parse_tools_call_request() {
    let json = r#"{
        "jsonrpc": "2.0",
        "id": "5f0c2d3e-8a4b-4c1d-9e2f-0a1b2c3d4e5f",
        "method": "tools/call",
        "params": {"name": "get_coin_price", "arguments": {"symbol": "BTC"}}
    }"#;

    let result = parse_message(json);
    assert!(result.is_ok());

    if let IncomingMessage::Request(req) = result.unwrap() {
        assert_eq!(req.method, "tools/call");
        assert_eq!(
            req.id,
            RequestId::from("5f0c2d3e-8a4b-4c1d-9e2f-0a1b2c3d4e5f")
        );
    } else {
        panic!("Expected Request");
    }
}

#[test]
fn test_parse_notification() {
    let json = r#"{
        "jsonrpc": "2.0",
        "method": "initialized"
    }"#;

    let result = parse_message(json);
    assert!(result.is_ok());

    if let IncomingMessage::Notification(notif) = result.unwrap() {
        assert_eq!(notif.method, "initialized");
    } else {
        panic!("Expected Notification");
    }
}

#[test]
fn test_parse_error_response() {
    let json = r#"{
        "jsonrpc": "2.0",
        "id": 9,
        "error": {"code": -32602, "message": "Invalid params for tool get_coin_price: Missing required argument: symbol"}
    }"#;

    let Ok(IncomingMessage::Response(resp)) = parse_message(json) else {
        panic!("Expected Response");
    };
    assert_eq!(resp.id, RequestId::Number(9));
    assert_eq!(resp.outcome.unwrap_err().code, -32602);
}

#[test]
fn test_parse_invalid_json() {
    let json = "not valid json";

    let result = parse_message(json);
    assert!(result.is_err());
    assert!(!result.unwrap_err().is_addressable());
}

#[test]
fn test_parse_missing_jsonrpc_version() {
    let json = r#"{
        "id": 1,
        "method": "test"
    }"#;

    let result = parse_message(json);
    assert!(result.is_err());
    assert!(result.unwrap_err().is_addressable());
}

// =============================================================================
// Payload Tests
// =============================================================================

#[test]
fn test_initialize_round_trip_keeps_camel_case() {
    let json = encode(&InitializeParams::host()).unwrap();
    assert!(json.contains(r#""protocolVersion":"2024-11-05""#));
    assert!(json.contains(r#""clientInfo""#));

    let result: InitializeResult = serde_json::from_str(
        r#"{"protocolVersion": "2024-11-05", "serverInfo": {"name": "binance-mcp"}}"#,
    )
    .unwrap();
    assert!(result.capabilities.tools.is_some());
}

#[test]
fn test_create_message_params_flatten_options() {
    let params: CreateMessageParams = serde_json::from_str(
        r#"{
            "messages": [{"role": "user", "content": {"type": "text", "text": "BTC?"}}],
            "systemPrompt": "Latest information about BTC: {}",
            "modelPreferences": {"hints": [{"name": "gpt-4"}], "intelligencePriority": 0.8},
            "maxTokens": 200
        }"#,
    )
    .unwrap();

    assert_eq!(params.messages.len(), 1);
    assert_eq!(params.options.max_tokens, Some(200));
    assert_eq!(
        params.options.model_preferences.unwrap().hints[0].name,
        "gpt-4"
    );
}
