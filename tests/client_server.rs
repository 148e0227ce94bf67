//! End-to-end tests: a real client against a real server on a loopback
//! socket, with a scripted price source in place of the quote service.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use binance_mcp::binance::{PriceError, PriceQuote, PriceSource};
use binance_mcp::default_registry;
use binance_mcp::error::{ClientError, ErrorKind};
use binance_mcp::host::{self, ChatHost};
use binance_mcp::mcp::observer::{Outcome, RecordingObserver};
use binance_mcp::mcp::types::{CreateMessageOptions, Message};
use binance_mcp::mcp::{ConnectionState, McpClient, McpServer, TimeoutPolicy};
use binance_mcp::sampling::system_prompt;

// =============================================================================
// Fixtures
// =============================================================================

/// Price source with scripted behaviour per symbol.
#[derive(Default)]
struct ScriptedPrices {
    calls: AtomicUsize,
}

impl ScriptedPrices {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn quote(symbol: &str, price: f64) -> PriceQuote {
    PriceQuote {
        symbol: symbol.to_string(),
        price,
        trading_pair: format!("{symbol}USDT"),
        timestamp: chrono::Utc::now().to_rfc3339(),
        currency: "USDT".to_string(),
    }
}

#[async_trait]
impl PriceSource for ScriptedPrices {
    async fn quote(&self, symbol: &str) -> Result<PriceQuote, PriceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match symbol {
            "BTC" => Ok(quote("BTC", 67_000.12)),
            "ETH" => Ok(quote("ETH", 3_100.5)),
            "SLOW" => {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(quote("SLOW", 1.0))
            }
            "LATE" => {
                tokio::time::sleep(Duration::from_millis(400)).await;
                Ok(quote("LATE", 2.0))
            }
            "HANG" => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(quote("HANG", 3.0))
            }
            "DOWN" => Err(PriceError::Upstream("connection refused".to_string())),
            other => Err(PriceError::InvalidSymbol(other.to_string())),
        }
    }
}

struct Harness {
    url: String,
    prices: Arc<ScriptedPrices>,
    _stop: oneshot::Sender<()>,
}

async fn start_server() -> Harness {
    let prices = Arc::new(ScriptedPrices::default());
    let registry = default_registry(Arc::clone(&prices)).unwrap();
    let server = McpServer::bind("127.0.0.1:0", Arc::new(registry))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();

    let (stop, stopped) = oneshot::channel::<()>();
    tokio::spawn(server.serve(async move {
        let _ = stopped.await;
    }));

    Harness {
        url: format!("ws://{addr}"),
        prices,
        _stop: stop,
    }
}

async fn connected(harness: &Harness) -> (McpClient, Arc<RecordingObserver>) {
    connected_with(harness, TimeoutPolicy::default()).await
}

async fn connected_with(
    harness: &Harness,
    policy: TimeoutPolicy,
) -> (McpClient, Arc<RecordingObserver>) {
    let observer = Arc::new(RecordingObserver::new());
    let client = McpClient::with_observer(&harness.url, policy, observer.clone());
    client.connect().await.unwrap();
    (client, observer)
}

// =============================================================================
// Handshake
// =============================================================================

#[tokio::test]
async fn test_handshake_then_list_tools() {
    let harness = start_server().await;
    let (client, _observer) = connected(&harness).await;

    assert_eq!(client.state(), ConnectionState::Ready);
    let info = client.server_info().unwrap();
    assert_eq!(info.protocol_version, "2024-11-05");
    assert_eq!(info.server_info.name, "binance-mcp");

    let tools = client.list_tools().await.unwrap();
    let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["get_coin_price"]);
    assert_eq!(tools[0].arguments[0].name, "symbol");
    assert!(tools[0].arguments[0].required);

    let prompts = client.list_prompts().await.unwrap();
    assert_eq!(prompts[0].name, "coin_price_analysis");

    client.ping().await.unwrap();
    client.disconnect().await;
}

#[tokio::test]
async fn test_operations_before_ready_never_reach_the_wire() {
    let harness = start_server().await;
    let observer = Arc::new(RecordingObserver::new());
    let client = McpClient::with_observer(&harness.url, TimeoutPolicy::default(), observer.clone());

    let err = client
        .call_tool("get_coin_price", json!({"symbol": "BTC"}))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::NotReady(ConnectionState::Disconnected)));
    assert_eq!(err.kind(), ErrorKind::Usage);

    assert!(client.list_prompts().await.is_err());
    assert!(client
        .create_message(vec![Message::user("hi")], CreateMessageOptions::default())
        .await
        .is_err());

    assert!(observer.records().is_empty());
    assert_eq!(harness.prices.calls(), 0);
}

#[tokio::test]
async fn test_version_mismatch_is_rejected_and_session_stays_uninitialised() {
    let harness = start_server().await;
    let (mut socket, _) = tokio_tungstenite::connect_async(harness.url.as_str())
        .await
        .unwrap();

    let reply = exchange(
        &mut socket,
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {"protocolVersion": "2023-01-01", "capabilities": {}}
        }),
    )
    .await;
    assert_eq!(reply["id"], 1);
    assert_eq!(reply["error"]["code"], -32600);
    assert!(reply["error"]["message"]
        .as_str()
        .unwrap()
        .contains("Unsupported protocol version"));

    let reply = exchange(
        &mut socket,
        json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
    )
    .await;
    assert_eq!(reply["error"]["code"], -32600);
}

// =============================================================================
// Tool calls
// =============================================================================

#[tokio::test]
async fn test_call_tool_returns_quote() {
    let harness = start_server().await;
    let (client, _observer) = connected(&harness).await;

    let result = client
        .call_tool("get_coin_price", json!({"symbol": "BTC"}))
        .await
        .unwrap();

    assert_eq!(result["symbol"], "BTC");
    assert_eq!(result["price"], 67_000.12);
    assert_eq!(result["tradingPair"], "BTCUSDT");
    assert_eq!(result["currency"], "USDT");
    let timestamp = result["timestamp"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());

    client.disconnect().await;
}

#[tokio::test]
async fn test_missing_symbol_is_invalid_params_without_lookup() {
    let harness = start_server().await;
    let (client, _observer) = connected(&harness).await;

    let err = client
        .call_tool("get_coin_price", json!({}))
        .await
        .unwrap_err();

    assert_eq!(err.rpc_code(), Some(-32602));
    assert_eq!(err.kind(), ErrorKind::Application);
    assert_eq!(harness.prices.calls(), 0);

    // The connection survives application errors.
    assert_eq!(client.state(), ConnectionState::Ready);
    client.ping().await.unwrap();
}

#[tokio::test]
async fn test_lookup_failures_map_to_error_codes() {
    let harness = start_server().await;
    let (client, _observer) = connected(&harness).await;

    let err = client
        .call_tool("get_coin_price", json!({"symbol": "NOTACOIN"}))
        .await
        .unwrap_err();
    assert_eq!(err.rpc_code(), Some(-32602));

    let err = client
        .call_tool("get_coin_price", json!({"symbol": "DOWN"}))
        .await
        .unwrap_err();
    assert_eq!(err.rpc_code(), Some(-32603));

    let err = client
        .call_tool("get_weather", json!({"city": "Hanoi"}))
        .await
        .unwrap_err();
    assert_eq!(err.rpc_code(), Some(-32601));
    assert_eq!(err.kind(), ErrorKind::Protocol);
}

// =============================================================================
// Concurrency and correlation
// =============================================================================

#[tokio::test]
async fn test_fast_call_completes_before_slow_call() {
    let harness = start_server().await;
    let (client, _observer) = connected(&harness).await;
    let client = Arc::new(client);

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();

    let slow = {
        let client = Arc::clone(&client);
        let done = done_tx.clone();
        tokio::spawn(async move {
            let result = client
                .call_tool("get_coin_price", json!({"symbol": "SLOW"}))
                .await;
            let _ = done.send("slow");
            result
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let fast = {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            let result = client
                .call_tool("get_coin_price", json!({"symbol": "ETH"}))
                .await;
            let _ = done_tx.send("fast");
            result
        })
    };

    assert_eq!(done_rx.recv().await, Some("fast"));
    assert_eq!(done_rx.recv().await, Some("slow"));
    assert_eq!(fast.await.unwrap().unwrap()["symbol"], "ETH");
    assert_eq!(slow.await.unwrap().unwrap()["symbol"], "SLOW");
}

#[tokio::test]
async fn test_concurrent_requests_complete_exactly_once() {
    let harness = start_server().await;
    let (client, observer) = connected(&harness).await;
    let client = Arc::new(client);

    let mut handles = Vec::new();
    for n in 0..20 {
        let client = Arc::clone(&client);
        handles.push(tokio::spawn(async move {
            let symbol = if n % 2 == 0 { "BTC" } else { "ETH" };
            client
                .call_tool("get_coin_price", json!({"symbol": symbol}))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let records = observer.records();
    // initialize plus twenty calls
    assert_eq!(records.len(), 21);
    let ids: HashSet<_> = records.iter().map(|r| r.id.clone()).collect();
    assert_eq!(ids.len(), records.len());
    assert!(records.iter().all(|r| r.outcome == Outcome::Success));
    assert!(observer.unknown_responses().is_empty());
}

#[tokio::test]
async fn test_timeout_then_late_response_is_discarded() {
    let harness = start_server().await;
    let policy = TimeoutPolicy::default().with_method("tools/call", Duration::from_millis(150));
    let (client, observer) = connected_with(&harness, policy).await;

    let err = client
        .call_tool("get_coin_price", json!({"symbol": "LATE"}))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Timeout { ref method, .. } if method == "tools/call"));
    assert_eq!(err.kind(), ErrorKind::Timeout);

    let timed_out = observer
        .records()
        .into_iter()
        .find(|r| r.outcome == Outcome::Timeout)
        .unwrap();

    // The server answers after the deadline; the answer is dropped.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(observer.unknown_responses(), vec![timed_out.id.clone()]);
    assert_eq!(observer.records_for(&timed_out.id).len(), 1);

    // Other requests are unaffected.
    assert_eq!(client.state(), ConnectionState::Ready);
    let result = client
        .call_tool("get_coin_price", json!({"symbol": "BTC"}))
        .await
        .unwrap();
    assert_eq!(result["symbol"], "BTC");
}

#[tokio::test]
async fn test_disconnect_rejects_pending_requests() {
    let harness = start_server().await;
    let (client, observer) = connected(&harness).await;
    let client = Arc::new(client);

    let pending = {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            client
                .call_tool("get_coin_price", json!({"symbol": "HANG"}))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    client.disconnect().await;

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, ClientError::ConnectionClosed));
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(client.state(), ConnectionState::Closed);
    assert!(observer
        .records()
        .iter()
        .any(|r| r.method == "tools/call" && r.outcome == Outcome::Closed));

    let err = client.list_tools().await.unwrap_err();
    assert!(matches!(err, ClientError::NotReady(ConnectionState::Closed)));
}

#[tokio::test]
async fn test_malformed_messages_do_not_tear_down_the_connection() {
    let harness = start_server().await;
    let (mut socket, _) = tokio_tungstenite::connect_async(harness.url.as_str())
        .await
        .unwrap();

    let reply = exchange(
        &mut socket,
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {"protocolVersion": "2024-11-05", "capabilities": {}}
        }),
    )
    .await;
    assert!(reply["result"].is_object());
    socket
        .send(WsMessage::Text(
            json!({"jsonrpc": "2.0", "method": "initialized"}).to_string(),
        ))
        .await
        .unwrap();

    socket
        .send(WsMessage::Text("{ definitely not json".to_string()))
        .await
        .unwrap();

    let reply = exchange(&mut socket, json!({"jsonrpc": "2.0", "id": "no-method"})).await;
    assert_eq!(reply["id"], "no-method");
    assert_eq!(reply["error"]["code"], -32600);

    let reply = exchange(
        &mut socket,
        json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/call",
            "params": {"name": "get_coin_price", "arguments": {"symbol": "BTC"}}
        }),
    )
    .await;
    assert_eq!(reply["id"], 2);
    assert_eq!(reply["result"]["price"], 67_000.12);
}

// =============================================================================
// Prompts, sampling and the host
// =============================================================================

#[tokio::test]
async fn test_prompt_and_sampling_round_trip() {
    let harness = start_server().await;
    let (client, _observer) = connected(&harness).await;

    let quote = client
        .call_tool("get_coin_price", json!({"symbol": "BTC"}))
        .await
        .unwrap();

    let prompt = client
        .get_prompt(
            "coin_price_analysis",
            json!({"symbol": "BTC", "price_data": quote}),
        )
        .await
        .unwrap();
    let text = prompt.messages[0].content.as_text().unwrap();
    assert!(text.contains("BTC"));
    assert!(text.contains("67000.12"));

    let err = client
        .get_prompt("coin_price_analysis", json!({"symbol": "BTC"}))
        .await
        .unwrap_err();
    assert_eq!(err.rpc_code(), Some(-32602));

    let reply = client
        .create_message(
            vec![Message::user("How much is bitcoin?")],
            CreateMessageOptions {
                system_prompt: Some(system_prompt("BTC", &quote)),
                ..CreateMessageOptions::default()
            },
        )
        .await
        .unwrap();
    assert!(reply
        .content
        .as_text()
        .unwrap()
        .starts_with("The current price of BTC is 67000.12 USDT."));
    assert_eq!(reply.model, "default-model");
    assert_eq!(reply.stop_reason, "endTurn");

    let err = client
        .create_message(Vec::new(), CreateMessageOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.rpc_code(), Some(-32602));
}

#[tokio::test]
async fn test_chat_host_answers_price_questions() {
    let harness = start_server().await;
    let (client, _observer) = connected(&harness).await;
    let host = ChatHost::new(&client);

    let reply = host.process_query("What is the price of Bitcoin?").await;
    assert!(reply.starts_with("The current price of BTC is 67000.12 USDT."), "{reply}");

    let input: &[u8] = b"how is ethereum doing\nexit\n";
    let mut output = Vec::new();
    host.run(input, &mut output).await.unwrap();
    let transcript = String::from_utf8(output).unwrap();
    assert!(transcript.contains("Chatbot: The current price of ETH is 3100.5 USDT."));
}

#[tokio::test]
async fn test_probe_prints_every_section() {
    let harness = start_server().await;
    let (client, _observer) = connected(&harness).await;

    let mut output = Vec::new();
    host::probe(&client, &mut output).await.unwrap();
    let transcript = String::from_utf8(output).unwrap();

    for section in ["Tools:", "Prompts:", "BTC price:", "Analysis prompt:", "Generated reply:"] {
        assert!(transcript.contains(section), "missing {section}");
    }
    assert!(transcript.contains("BTCUSDT"));
}

// =============================================================================
// Helpers
// =============================================================================

type Socket = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn exchange(socket: &mut Socket, frame: Value) -> Value {
    socket
        .send(WsMessage::Text(frame.to_string()))
        .await
        .unwrap();
    loop {
        match socket.next().await.unwrap().unwrap() {
            WsMessage::Text(text) => return serde_json::from_str(&text).unwrap(),
            WsMessage::Close(_) => panic!("server closed the connection"),
            _ => {}
        }
    }
}
