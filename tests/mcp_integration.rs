//! Integration tests for MCP protocol handling.
//!
//! The server runs on in-memory pipes next to a scripted client, so these
//! tests cover lifecycle, JSON-RPC errors, tool results, concurrent calls,
//! cancellation and mode notifications end to end.

mod common;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use cad_bridge_mcp::bridge::{Dispatcher, Session};
use cad_bridge_mcp::config::Config;
use cad_bridge_mcp::mcp::protocol::{parse_message, IncomingMessage, RequestId};
use cad_bridge_mcp::mcp::resources::RESOURCES;
use cad_bridge_mcp::mcp::McpServer;
use cad_bridge_mcp::tools::CATALOG;
use common::{FakeHost, Reply};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};

// =============================================================================
// Harness
// =============================================================================

struct Client {
    writer: DuplexStream,
    lines: Lines<BufReader<DuplexStream>>,
}

impl Client {
    async fn send(&mut self, message: Value) {
        let mut line = message.to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await.unwrap();
    }

    async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("server did not answer in time")
            .unwrap()
            .expect("server closed its output");
        serde_json::from_str(&line).unwrap()
    }

    async fn request(&mut self, id: i64, method: &str, params: Value) -> Value {
        self.send(json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .await;
        loop {
            let message = self.recv().await;
            if message["id"] == id {
                return message;
            }
        }
    }

    async fn initialize(&mut self) -> Value {
        let response = self
            .request(
                0,
                "initialize",
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": {"name": "integration-test", "version": "1.0.0"}
                }),
            )
            .await;
        self.send(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await;
        response
    }

    async fn call_tool(&mut self, id: i64, name: &str, arguments: Value) -> (bool, Value) {
        let response = self
            .request(id, "tools/call", json!({"name": name, "arguments": arguments}))
            .await;
        tool_body(&response)
    }
}

/// Splits a tools/call response into `isError` and the parsed text body.
fn tool_body(response: &Value) -> (bool, Value) {
    let result = &response["result"];
    let text = result["content"][0]["text"].as_str().unwrap();
    let is_error = result["isError"].as_bool().unwrap_or(false);
    (is_error, serde_json::from_str(text).unwrap())
}

fn simulated() -> Config {
    let mut config = Config::default();
    config.bridge.force_simulation = true;
    config
}

/// Runs a server against `script`. The client's input closes when the script
/// returns, which ends the server.
async fn with_server<F, Fut>(config: Config, script: F)
where
    F: FnOnce(Client) -> Fut,
    Fut: Future<Output = ()>,
{
    let session = Arc::new(Session::new(&config));
    session.start().await;

    let (client_tx, server_rx) = tokio::io::duplex(64 * 1024);
    let (server_tx, client_rx) = tokio::io::duplex(64 * 1024);
    let mut server = McpServer::new(server_rx, server_tx, Dispatcher::new(session));
    let client = Client {
        writer: client_tx,
        lines: BufReader::new(client_rx).lines(),
    };

    let (served, ()) = tokio::join!(server.serve(), script(client));
    served.unwrap();
}

// =============================================================================
// Protocol Parsing Tests
// =============================================================================

#[test]
fn test_parse_tools_call_request() {
    let json = r#"{
        "jsonrpc": "2.0",
        "id": "call-1",
        "method": "tools/call",
        "params": {"name": "create_sketch", "arguments": {"plane": "XY"}}
    }"#;

    let IncomingMessage::Request(req) = parse_message(json).unwrap() else {
        panic!("Expected Request");
    };
    assert_eq!(req.method, "tools/call");
    assert_eq!(req.id, RequestId::String("call-1".to_string()));
}

#[test]
fn test_parse_cancel_notification() {
    let json = r#"{"jsonrpc":"2.0","method":"notifications/cancelled","params":{"requestId":3}}"#;
    let IncomingMessage::Notification(notif) = parse_message(json).unwrap() else {
        panic!("Expected Notification");
    };
    assert_eq!(notif.params.unwrap()["requestId"], 3);
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_initialize_and_list_tools() {
    with_server(simulated(), |mut client| async move {
        let init = client.initialize().await;
        assert_eq!(init["result"]["protocolVersion"], "2024-11-05");
        assert_eq!(init["result"]["serverInfo"]["name"], "cad-bridge-mcp");
        assert!(init["result"]["capabilities"]["tools"].is_object());
        assert!(init["result"]["capabilities"]["logging"].is_object());
        assert!(init["result"]["capabilities"]["resources"].is_object());

        let list = client.request(1, "tools/list", json!({})).await;
        let tools = list["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), CATALOG.len());

        let status = tools
            .iter()
            .find(|t| t["name"] == "get_bridge_status")
            .unwrap();
        assert_eq!(status["inputSchema"]["type"], "object");
        assert_eq!(status["inputSchema"]["additionalProperties"], false);
    })
    .await;
}

#[tokio::test]
async fn test_requests_before_initialisation_are_rejected() {
    with_server(simulated(), |mut client| async move {
        let response = client.request(1, "tools/list", json!({})).await;
        assert_eq!(response["error"]["code"], -32600);

        client.initialize().await;
        let again = client.request(2, "initialize", json!({"protocolVersion": "2024-11-05"}))
            .await;
        assert_eq!(again["error"]["code"], -32600);
    })
    .await;
}

#[tokio::test]
async fn test_json_rpc_errors() {
    with_server(simulated(), |mut client| async move {
        client.initialize().await;

        client.send_raw("{ definitely not json").await;
        let parse_error = client.recv().await;
        assert_eq!(parse_error["error"]["code"], -32700);
        assert!(parse_error.get("id").is_none());

        let unknown = client.request(1, "prompts/list", json!({})).await;
        assert_eq!(unknown["error"]["code"], -32601);

        let ping = client.request(2, "ping", json!({})).await;
        assert_eq!(ping["result"], json!({}));

        let missing = client.request(3, "tools/call", json!(null)).await;
        assert_eq!(missing["error"]["code"], -32602);
    })
    .await;
}

// =============================================================================
// Tool Tests
// =============================================================================

#[tokio::test]
async fn test_simulated_modelling_session() {
    with_server(simulated(), |mut client| async move {
        client.initialize().await;

        let (is_error, body) = client
            .call_tool(1, "create_sketch", json!({"plane": "XZ", "name": "Side"}))
            .await;
        assert!(!is_error, "{body}");
        assert_eq!(body["success"], true);
        assert_eq!(body["sketch_name"], "Side");

        let (is_error, body) = client
            .call_tool(
                2,
                "extrude_feature",
                json!({"sketch_name": "Side", "distance": 15, "operation": "new_body"}),
            )
            .await;
        assert!(!is_error, "{body}");

        let (_, entities) = client.call_tool(3, "list_entities", json!({})).await;
        assert_eq!(entities["count"], 2);

        let (_, context) = client
            .call_tool(4, "get_design_context", json!({"history_limit": 1}))
            .await;
        assert_eq!(context["mode"], "Simulated");
        assert_eq!(context["recent_history"].as_array().unwrap().len(), 1);
        assert_eq!(context["recent_history"][0]["command"], "create_extrude");
    })
    .await;
}

#[tokio::test]
async fn test_tool_failures_use_the_error_contract() {
    with_server(simulated(), |mut client| async move {
        client.initialize().await;

        let (is_error, body) = client
            .call_tool(1, "draw_circle", json!({"sketch_name": "Nope", "radius": 4}))
            .await;
        assert!(is_error);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "UnknownEntity");
        assert!(body["message"].as_str().unwrap().contains("Nope"));

        let (is_error, body) = client
            .call_tool(2, "create_sketch", json!({"plane": "AB"}))
            .await;
        assert!(is_error);
        assert_eq!(body["error"], "InvalidParams");

        let (is_error, body) = client.call_tool(3, "teleport", json!({})).await;
        assert!(is_error);
        assert_eq!(body["error"], "InvalidParams");
    })
    .await;
}

#[tokio::test]
async fn test_local_and_session_tools() {
    with_server(simulated(), |mut client| async move {
        client.initialize().await;

        let (_, distance) = client
            .call_tool(
                1,
                "measure_distance",
                json!({"point1": [0, 0, 0], "point2": [0, 3, 4]}),
            )
            .await;
        assert_eq!(distance["distance"].as_f64(), Some(5.0));

        let (is_error, intent) = client
            .call_tool(
                2,
                "store_design_intent",
                json!({
                    "project_name": "Desk lamp",
                    "description": "Adjustable arm lamp",
                    "requirements": ["Reach 600 mm"]
                }),
            )
            .await;
        assert!(!is_error, "{intent}");
        assert_eq!(intent["design_statement"]["project_name"], "Desk lamp");

        let (_, status) = client.call_tool(3, "get_bridge_status", json!({})).await;
        assert_eq!(status["mode"], "Simulated");
        assert_eq!(status["forcedSimulation"], true);

        let (_, history) = client.call_tool(4, "get_design_history", json!({})).await;
        assert_eq!(history["count"], 0);
    })
    .await;
}

#[tokio::test]
async fn test_reset_can_delete_the_session_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    let mut config = simulated();
    config.session.persistence_path = Some(path.clone());

    with_server(config, |mut client| async move {
        client.initialize().await;

        let (is_error, body) = client
            .call_tool(1, "create_sketch", json!({"name": "Kept"}))
            .await;
        assert!(!is_error, "{body}");
        assert!(path.exists());

        let (is_error, body) = client
            .call_tool(2, "reset_session", json!({"delete_file": true}))
            .await;
        assert!(!is_error, "{body}");
        assert_eq!(body["deleted_file"], json!(path));
        assert!(!path.exists());
    })
    .await;
}

// =============================================================================
// Resource Tests
// =============================================================================

async fn read_resource(client: &mut Client, id: i64, uri: &str) -> Value {
    let response = client
        .request(id, "resources/read", json!({"uri": uri}))
        .await;
    let contents = &response["result"]["contents"][0];
    assert_eq!(contents["uri"], uri);
    assert_eq!(contents["mimeType"], "application/json");
    serde_json::from_str(contents["text"].as_str().unwrap()).unwrap()
}

#[tokio::test]
async fn test_resources_are_listed_and_read() {
    with_server(simulated(), |mut client| async move {
        client.initialize().await;

        let list = client.request(1, "resources/list", json!({})).await;
        let resources = list["result"]["resources"].as_array().unwrap();
        assert_eq!(resources.len(), RESOURCES.len());
        assert!(resources.iter().any(|r| r["uri"] == "cad://context/summary"));

        client
            .call_tool(2, "create_sketch", json!({"plane": "XY", "name": "Base"}))
            .await;
        client
            .call_tool(3, "store_design_intent", json!({"project_name": "Bracket"}))
            .await;

        let sketches = read_resource(&mut client, 4, "cad://design/sketches").await;
        assert_eq!(sketches["count"], 1);
        assert_eq!(sketches["entities"][0]["name"], "Base");

        let summary = read_resource(&mut client, 5, "cad://context/summary").await;
        assert_eq!(summary["mode"], "Simulated");
        assert_eq!(summary["design_statement"]["project_name"], "Bracket");
        assert_eq!(summary["total_entities"], 1);

        let intent = read_resource(&mut client, 6, "cad://context/design_intent").await;
        assert_eq!(intent["design_statement"]["project_name"], "Bracket");

        let info = read_resource(&mut client, 7, "cad://design/info").await;
        assert_eq!(info["success"], true);

        let status = read_resource(&mut client, 8, "cad://system/status").await;
        assert_eq!(status["server"]["name"], "cad-bridge-mcp");
        assert_eq!(status["bridge"]["mode"], "Simulated");

        let missing = client
            .request(9, "resources/read", json!({"uri": "cad://nowhere"}))
            .await;
        assert_eq!(missing["error"]["code"], -32002);
    })
    .await;
}

#[tokio::test]
async fn test_host_resource_reports_degraded_bridge() {
    let mut config = Config::default();
    config.bridge.host = "127.0.0.1".to_string();
    config.bridge.port = common::unused_port().await;
    config.bridge.connect_timeout_ms = 200;
    config.session.persistence_path = None;

    with_server(config, |mut client| async move {
        client.initialize().await;
        let info = read_resource(&mut client, 1, "cad://design/info").await;
        assert_eq!(info["success"], false);
        assert_eq!(info["error"], "ServiceUnavailable");
    })
    .await;
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[tokio::test]
async fn test_ping_is_answered_during_slow_call_and_call_can_be_cancelled() {
    let host = FakeHost::start().await;
    host.script([Reply::delayed(
        2_000,
        Reply::success(json!({"sketch_name": "Slow"})),
    )]);
    let mut config = host.config();
    config.bridge.request_timeout_ms = 5_000;

    with_server(config, |mut client| async move {
        client.initialize().await;

        client
            .send(json!({
                "jsonrpc": "2.0",
                "id": 10,
                "method": "tools/call",
                "params": {"name": "create_sketch", "arguments": {}}
            }))
            .await;
        let ping = client.request(11, "ping", json!({})).await;
        assert_eq!(ping["result"], json!({}));

        client
            .send(json!({
                "jsonrpc": "2.0",
                "method": "notifications/cancelled",
                "params": {"requestId": 10, "reason": "user aborted"}
            }))
            .await;
        let cancelled = client.recv().await;
        assert_eq!(cancelled["id"], 10);
        let (is_error, body) = tool_body(&cancelled);
        assert!(is_error);
        assert_eq!(body["error"], "Cancelled");
    })
    .await;
}

#[tokio::test]
async fn test_mode_transition_is_notified() {
    let host = FakeHost::start().await;
    let mut config = host.config();
    config.bridge.failure_threshold = 1;

    with_server(config, |mut client| async move {
        client.initialize().await;
        host.stop().await;

        client
            .send(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "tools/call",
                "params": {"name": "create_sketch", "arguments": {}}
            }))
            .await;

        let mut notification = None;
        let mut response = None;
        while notification.is_none() || response.is_none() {
            let message = client.recv().await;
            if message["method"] == "notifications/message" {
                notification = Some(message);
            } else if message["id"] == 1 {
                response = Some(message);
            }
        }

        let params = &notification.unwrap()["params"];
        assert_eq!(params["level"], "warning");
        assert_eq!(params["data"]["from"], "Live");
        assert_eq!(params["data"]["to"], "Degraded");

        let (is_error, body) = tool_body(&response.unwrap());
        assert!(is_error);
        assert_eq!(body["error"], "ServiceUnavailable");
    })
    .await;
}
