//! MCP server for the CAD bridge.
//!
//! This module implements the MCP server lifecycle:
//!
//! 1. **Initialisation**: Capability negotiation and version agreement
//! 2. **Operation**: Tool calls and resource reads, each running as its own
//!    task so a slow host command never blocks `ping` or cancellation
//! 3. **Shutdown**: EOF waits for running calls; a signal aborts them
//!
//! Mode transitions of the bridge are forwarded to the client as
//! `notifications/message` log entries.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::oneshot;
use tokio::task::JoinSet;

use crate::bridge::{BridgeError, BridgeResult, Dispatcher, Mode, ModeTransition, ResultEnvelope, Session};
use crate::intent::{export_history, Category, DesignStatement, HistoryFormat};
use crate::mcp::protocol::{
    ErrorCode, IncomingMessage, JsonRpcError, JsonRpcErrorData, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, OutgoingNotification, RequestId, MCP_PROTOCOL_VERSION,
    SERVER_NAME,
};
use crate::mcp::resources::{
    self, ResourceContents, ResourceDefinition, ResourceSource, ResourceSpec, RESOURCES,
    RESOURCE_MIME_TYPE,
};
use crate::mcp::transport::{LineReader, MessageSender};
use crate::tools::{self, local, Route, SessionTool};

/// Server state in the MCP lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Waiting for initialize request.
    AwaitingInit,
    /// Initialize received, waiting for initialized notification.
    Initialising,
    /// Ready for normal operation.
    Running,
    /// Shutdown in progress.
    ShuttingDown,
}

/// Server capabilities advertised during initialisation.
#[derive(Debug, Clone, Serialize)]
pub struct ServerCapabilities {
    /// Tool-related capabilities.
    pub tools: ToolCapabilities,
    /// Resource-related capabilities.
    pub resources: ResourceCapabilities,
    /// Present because the server emits log notifications.
    pub logging: Map<String, Value>,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            tools: ToolCapabilities::default(),
            resources: ResourceCapabilities::default(),
            logging: Map::new(),
        }
    }
}

/// Tool-specific capabilities.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolCapabilities {
    /// Whether the tool list can change during the session.
    #[serde(rename = "listChanged", skip_serializing_if = "is_false")]
    pub list_changed: bool,
}

/// Resource-specific capabilities.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceCapabilities {
    /// Whether clients can subscribe to resource updates.
    #[serde(skip_serializing_if = "is_false")]
    pub subscribe: bool,
    /// Whether the resource list can change during the session.
    #[serde(skip_serializing_if = "is_false")]
    pub list_changed: bool,
}

/// Parameters for resources/read request.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceReadParams {
    /// URI of the resource.
    pub uri: String,
}

#[allow(clippy::trivially_copy_pass_by_ref)] // serde's skip_serializing_if requires a predicate fn(&T) -> bool
const fn is_false(b: &bool) -> bool {
    !*b
}

/// Server information for initialisation response.
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Client information received during initialisation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    #[serde(default)]
    pub version: Option<String>,
}

/// Parameters for the initialize request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version requested by client.
    pub protocol_version: String,
    /// Client capabilities.
    #[serde(default)]
    pub capabilities: Value,
    /// Client information.
    #[serde(default)]
    pub client_info: Option<ClientInfo>,
}

/// A tool definition for tools/list response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for the tool's input parameters.
    pub input_schema: Value,
}

/// Parameters for tools/call request.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallParams {
    /// Name of the tool to call.
    pub name: String,
    /// Arguments for the tool.
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelledParams {
    request_id: RequestId,
    #[serde(default)]
    reason: Option<String>,
}

/// Content item in a tool call response.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    /// Text content.
    Text {
        /// The text content.
        text: String,
    },
}

/// Result of a tool call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    /// Content returned by the tool.
    pub content: Vec<ToolContent>,
    /// Whether the tool call resulted in an error.
    #[serde(skip_serializing_if = "is_false")]
    pub is_error: bool,
}

impl ToolCallResult {
    /// Renders a bridge result as pretty JSON text.
    #[must_use]
    pub fn from_envelope(envelope: &ResultEnvelope) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: format!("{:#}", envelope.to_tool_json()),
            }],
            is_error: !envelope.is_success(),
        }
    }

    /// A successful result with `payload`.
    #[must_use]
    pub fn success(payload: Map<String, Value>) -> Self {
        Self::from_envelope(&ResultEnvelope::success("", payload))
    }

    /// A failed result carrying `error`.
    #[must_use]
    pub fn failure(error: &BridgeError) -> Self {
        Self::from_envelope(&ResultEnvelope::failure("", error))
    }
}

type InFlight = Arc<Mutex<HashMap<RequestId, oneshot::Sender<()>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("result".to_string(), other);
            map
        }
    }
}

fn string_list(params: &Map<String, Value>, key: &str) -> Vec<String> {
    params
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn text<'a>(params: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

/// Executes tool calls. Cheap to clone into per-call tasks.
#[derive(Debug, Clone)]
pub struct ToolHandler {
    dispatcher: Dispatcher,
}

impl ToolHandler {
    /// Creates a handler over `dispatcher`.
    #[must_use]
    pub const fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    fn session(&self) -> &Session {
        self.dispatcher.session()
    }

    /// Runs the named tool. Host commands give up with `Cancelled` once
    /// `cancel` completes.
    pub async fn call<C>(&self, name: &str, arguments: &Value, cancel: C) -> ToolCallResult
    where
        C: Future<Output = ()>,
    {
        let Some(tool) = tools::find(name) else {
            return ToolCallResult::failure(&BridgeError::invalid_params(format!(
                "unknown tool: {name}"
            )));
        };
        let params = match tool.prepare(arguments) {
            Ok(params) => params,
            Err(e) => return ToolCallResult::failure(&e),
        };
        tracing::debug!(tool = name, "Tool call");

        match tool.route {
            Route::Host(command) => {
                let envelope = self
                    .dispatcher
                    .execute_cancellable(command, params, cancel)
                    .await;
                ToolCallResult::from_envelope(&envelope)
            }
            Route::Local(local_tool) => match local::run(local_tool, &params) {
                Ok(payload) => ToolCallResult::success(payload),
                Err(e) => ToolCallResult::failure(&e),
            },
            Route::Session(session_tool) => match self.call_session(session_tool, &params).await {
                Ok(payload) => ToolCallResult::success(payload),
                Err(e) => ToolCallResult::failure(&e),
            },
        }
    }

    async fn call_session(
        &self,
        tool: SessionTool,
        params: &Map<String, Value>,
    ) -> BridgeResult<Map<String, Value>> {
        match tool {
            SessionTool::Status => Ok(into_map(json!(self.session().status().await))),
            SessionTool::Connect => self.call_connect(params).await,
            SessionTool::StoreIntent => self.call_store_intent(params).await,
            SessionTool::DesignContext => self.call_design_context(params).await,
            SessionTool::ListEntities => self.call_list_entities(params).await,
            SessionTool::History => self.call_history(params).await,
            SessionTool::Save => {
                let path = self.session().save_session(text(params, "path").map(Path::new)).await?;
                Ok(into_map(json!({"path": path})))
            }
            SessionTool::Load => {
                let loaded = self.session().load_session(text(params, "path").map(Path::new)).await?;
                Ok(into_map(json!({"entities_loaded": loaded})))
            }
            SessionTool::Reset => {
                self.session().reset().await;
                let mut result = into_map(json!({"message": "Design session reset"}));
                if params.get("delete_file").and_then(Value::as_bool) == Some(true) {
                    let deleted = self.session().delete_session_file()?;
                    result.insert("deleted_file".to_string(), json!(deleted));
                }
                Ok(result)
            }
        }
    }

    async fn call_connect(&self, params: &Map<String, Value>) -> BridgeResult<Map<String, Value>> {
        let session = self.session();
        let mode = match params.get("force_simulation").and_then(Value::as_bool) {
            Some(true) => session.force_simulation(true),
            Some(false) => {
                session.force_simulation(false);
                session.probe(true).await
            }
            None => session.probe(true).await,
        };

        let settings = session.settings();
        let forced = mode == Mode::Simulated && session.status().await.forced_simulation;
        if mode != Mode::Live && !forced {
            return Err(BridgeError::unavailable(format!(
                "could not reach the CAD host plugin at {}:{}; check that the host is running \
                 and the plugin is listening. Bridge mode is {mode}",
                settings.host, settings.port
            )));
        }

        let message = if forced {
            "Simulation is forced; the CAD host is not contacted".to_string()
        } else {
            format!("Connected to the CAD host plugin at {}:{}", settings.host, settings.port)
        };
        Ok(into_map(json!({
            "mode": mode,
            "host": settings.host,
            "port": settings.port,
            "message": message,
        })))
    }

    async fn call_store_intent(
        &self,
        params: &Map<String, Value>,
    ) -> BridgeResult<Map<String, Value>> {
        let now = Utc::now();
        let statement = DesignStatement {
            project_name: text(params, "project_name").unwrap_or_default().to_string(),
            description: text(params, "description").unwrap_or_default().to_string(),
            requirements: string_list(params, "requirements"),
            constraints: string_list(params, "constraints"),
            final_assembly_description: text(params, "final_assembly_description")
                .unwrap_or_default()
                .to_string(),
            tags: string_list(params, "tags"),
            created_at: now,
            updated_at: now,
        };

        let stored = self.session().store().write().await.set_statement(statement).clone();
        tracing::info!(project = %stored.project_name, "Design statement stored");
        self.session().autosave().await;
        Ok(into_map(json!({"design_statement": stored})))
    }

    async fn call_design_context(
        &self,
        params: &Map<String, Value>,
    ) -> BridgeResult<Map<String, Value>> {
        let limit = params
            .get("history_limit")
            .and_then(Value::as_u64)
            .map_or(20, |n| usize::try_from(n).unwrap_or(usize::MAX));
        let mode = self.session().mode();
        let store = self.session().store().read().await;

        let parameters: Map<String, Value> = store
            .list(Some(Category::Parameter))
            .into_iter()
            .map(|record| {
                (
                    record.name.clone(),
                    json!(store.parameter_history(&record.name)),
                )
            })
            .collect();

        Ok(into_map(json!({
            "mode": mode,
            "design_statement": store.statement(),
            "summary": store.summary(),
            "entities": store.list(None),
            "parameter_history": parameters,
            "recent_history": store.history(Some(limit), None),
        })))
    }

    async fn call_list_entities(
        &self,
        params: &Map<String, Value>,
    ) -> BridgeResult<Map<String, Value>> {
        let category = text(params, "category")
            .map(str::parse::<Category>)
            .transpose()
            .map_err(BridgeError::invalid_params)?;
        let matcher = text(params, "pattern")
            .map(|pattern| NameMatcher::new(pattern, text(params, "pattern_type") == Some("regex")))
            .transpose()?;

        let store = self.session().store().read().await;
        let entities: Vec<_> = store
            .list(category)
            .into_iter()
            .filter(|record| matcher.as_ref().map_or(true, |m| m.matches(&record.name)))
            .collect();

        Ok(into_map(json!({
            "count": entities.len(),
            "entities": entities,
        })))
    }

    async fn call_history(&self, params: &Map<String, Value>) -> BridgeResult<Map<String, Value>> {
        let limit = params
            .get("limit")
            .and_then(Value::as_u64)
            .map(|n| usize::try_from(n).unwrap_or(usize::MAX));
        let command = text(params, "command");

        let store = self.session().store().read().await;
        let entries = store.history(limit, command);
        if text(params, "format") == Some("csv") {
            let csv = export_history(&entries, HistoryFormat::Csv)?;
            return Ok(into_map(json!({
                "format": "csv",
                "count": entries.len(),
                "csv": csv,
            })));
        }
        Ok(into_map(json!({
            "format": "json",
            "count": entries.len(),
            "entries": entries,
        })))
    }

    /// Reads a resource. Host-backed resources give up with `Cancelled` once
    /// `cancel` completes; their failures use the tool error contract.
    pub async fn read_resource<C>(&self, spec: &ResourceSpec, cancel: C) -> ResourceContents
    where
        C: Future<Output = ()>,
    {
        let body = match spec.source {
            ResourceSource::DesignInfo => self.host_view("get_design_info", cancel).await,
            ResourceSource::DesignFeatures => self.host_view("get_features", cancel).await,
            ResourceSource::Components => self.entity_view(Category::Component).await,
            ResourceSource::Sketches => self.entity_view(Category::Sketch).await,
            ResourceSource::ContextSummary => {
                let mode = self.session().mode();
                let store = self.session().store().read().await;
                json!({
                    "mode": mode,
                    "summary": store.summary(),
                    "total_entities": store.len(),
                    "design_statement": store.statement(),
                    "recent_history": store.history(Some(10), None),
                })
            }
            ResourceSource::DesignIntent => match self.session().store().read().await.statement() {
                Some(statement) => json!({"design_statement": statement}),
                None => json!({"message": "No design statement stored"}),
            },
            ResourceSource::SystemStatus => json!({
                "server": ServerInfo::default(),
                "bridge": self.session().status().await,
            }),
        };

        ResourceContents {
            uri: spec.uri.to_string(),
            mime_type: RESOURCE_MIME_TYPE,
            text: format!("{body:#}"),
        }
    }

    async fn host_view<C>(&self, command: &str, cancel: C) -> Value
    where
        C: Future<Output = ()>,
    {
        self.dispatcher
            .execute_cancellable(command, Map::new(), cancel)
            .await
            .to_tool_json()
    }

    async fn entity_view(&self, category: Category) -> Value {
        let store = self.session().store().read().await;
        let entities = store.list(Some(category));
        json!({
            "category": category,
            "count": entities.len(),
            "entities": entities,
        })
    }
}

/// Case-insensitive whole-name matcher.
enum NameMatcher {
    Glob(glob::Pattern),
    Regex(regex::Regex),
}

impl NameMatcher {
    fn new(pattern: &str, is_regex: bool) -> BridgeResult<Self> {
        if is_regex {
            regex::RegexBuilder::new(&format!("^(?:{pattern})$"))
                .case_insensitive(true)
                .build()
                .map(Self::Regex)
                .map_err(|e| BridgeError::invalid_params(format!("invalid pattern: {e}")))
        } else {
            glob::Pattern::new(pattern)
                .map(Self::Glob)
                .map_err(|e| BridgeError::invalid_params(format!("invalid pattern: {e}")))
        }
    }

    fn matches(&self, name: &str) -> bool {
        match self {
            Self::Glob(pattern) => pattern.matches_with(
                name,
                glob::MatchOptions {
                    case_sensitive: false,
                    ..glob::MatchOptions::new()
                },
            ),
            Self::Regex(regex) => regex.is_match(name),
        }
    }
}

/// The MCP server for the CAD bridge.
pub struct McpServer<R, W> {
    /// Current server state.
    state: ServerState,
    /// Incoming half of the transport.
    reader: LineReader<R>,
    /// Outgoing half of the transport.
    sender: MessageSender<W>,
    /// Negotiated protocol version (set after initialisation).
    protocol_version: Option<String>,
    /// Tool execution.
    tools: ToolHandler,
    /// Cancellation handles of running tool calls.
    in_flight: InFlight,
    /// Running tool calls.
    tasks: JoinSet<()>,
    /// Mode transitions to forward to the client.
    events: Option<broadcast::Receiver<ModeTransition>>,
}

impl McpServer<tokio::io::Stdin, tokio::io::Stdout> {
    /// Creates a server on stdin and stdout.
    #[must_use]
    pub fn stdio(dispatcher: Dispatcher) -> Self {
        let (reader, sender) = crate::mcp::transport::stdio();
        Self::with_transport(reader, sender, dispatcher)
    }
}

impl<R, W> McpServer<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Creates a server on an arbitrary stream pair.
    #[must_use]
    pub fn new(reader: R, writer: W, dispatcher: Dispatcher) -> Self {
        let (reader, sender) = crate::mcp::transport::split(reader, writer);
        Self::with_transport(reader, sender, dispatcher)
    }

    fn with_transport(reader: LineReader<R>, sender: MessageSender<W>, dispatcher: Dispatcher) -> Self {
        let events = Some(dispatcher.session().subscribe());
        Self {
            state: ServerState::AwaitingInit,
            reader,
            sender,
            protocol_version: None,
            tools: ToolHandler::new(dispatcher),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            tasks: JoinSet::new(),
            events,
        }
    }

    /// Returns the current server state.
    #[must_use]
    pub const fn state(&self) -> ServerState {
        self.state
    }

    /// Returns the list of available tools.
    #[must_use]
    pub fn tool_definitions() -> Vec<ToolDefinition> {
        tools::CATALOG
            .iter()
            .map(|tool| ToolDefinition {
                name: tool.name.to_string(),
                description: tool.description.to_string(),
                input_schema: tool.input_schema(),
            })
            .collect()
    }

    /// Runs the server until EOF, SIGINT or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    #[cfg(unix)]
    pub async fn run(&mut self) -> io::Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        self.serve_until(async move {
            tokio::select! {
                _ = sigint.recv() => tracing::info!("Received SIGINT, initiating graceful shutdown"),
                _ = sigterm.recv() => tracing::info!("Received SIGTERM, initiating graceful shutdown"),
            }
        })
        .await
    }

    /// Runs the server until EOF or Ctrl+C.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    #[cfg(windows)]
    pub async fn run(&mut self) -> io::Result<()> {
        self.serve_until(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown");
            }
        })
        .await
    }

    /// Runs the server until the client closes its input. Running tool calls
    /// are allowed to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    pub async fn serve(&mut self) -> io::Result<()> {
        self.serve_until(std::future::pending::<()>()).await
    }

    async fn serve_until<S>(&mut self, shutdown: S) -> io::Result<()>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    self.state = ServerState::ShuttingDown;
                    self.tasks.abort_all();
                    while self.tasks.join_next().await.is_some() {}
                    return Ok(());
                }

                line_result = self.reader.read_line() => {
                    if self.handle_transport_result(line_result).await? {
                        while let Some(joined) = self.tasks.join_next().await {
                            log_join(joined);
                        }
                        return Ok(());
                    }
                }

                event = next_event(&mut self.events) => self.forward_event(event).await?,

                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => log_join(joined),
            }
        }
    }

    /// Handles the result from transport read.
    ///
    /// Returns `true` if the server should shut down.
    async fn handle_transport_result(
        &mut self,
        line_result: io::Result<Option<String>>,
    ) -> io::Result<bool> {
        let Some(line) = line_result? else {
            tracing::debug!("Client closed input");
            self.state = ServerState::ShuttingDown;
            return Ok(true);
        };

        if line.trim().is_empty() {
            return Ok(false);
        }

        match crate::mcp::protocol::parse_message(&line) {
            Ok(IncomingMessage::Request(req)) => self.handle_request(req).await?,
            Ok(IncomingMessage::Notification(notif)) => self.handle_notification(&notif),
            Err(error) => self.sender.write_error(&error).await?,
        }

        Ok(self.state == ServerState::ShuttingDown)
    }

    /// Handles an incoming request.
    async fn handle_request(&mut self, req: JsonRpcRequest) -> io::Result<()> {
        let response = match req.method.as_str() {
            "initialize" => self.handle_initialize(&req),
            "tools/list" => self.handle_tools_list(&req),
            "resources/list" => self.handle_resources_list(&req),
            "resources/read" => match self.spawn_resource_read(&req) {
                Ok(()) => return Ok(()),
                Err(error) => Err(error),
            },
            "tools/call" => match self.spawn_tool_call(&req) {
                Ok(()) => return Ok(()),
                Err(error) => Err(error),
            },
            "ping" => Ok(JsonRpcResponse::success(req.id.clone(), json!({}))),
            _ => Err(JsonRpcError::method_not_found(req.id.clone(), &req.method)),
        };

        match response {
            Ok(resp) => self.sender.write_response(&resp).await,
            Err(error) => self.sender.write_error(&error).await,
        }
    }

    /// Handles an incoming notification.
    fn handle_notification(&mut self, notif: &JsonRpcNotification) {
        match notif.method.as_str() {
            "notifications/initialized" if self.state == ServerState::Initialising => {
                self.state = ServerState::Running;
                tracing::info!(
                    protocol = self.protocol_version.as_deref().unwrap_or(MCP_PROTOCOL_VERSION),
                    "Client initialised"
                );
            }
            "notifications/cancelled" => {
                let Some(params) = notif
                    .params
                    .clone()
                    .and_then(|p| serde_json::from_value::<CancelledParams>(p).ok())
                else {
                    return;
                };
                if let Some(cancel) = lock(&self.in_flight).remove(&params.request_id) {
                    tracing::debug!(
                        request = %params.request_id,
                        reason = params.reason.as_deref().unwrap_or(""),
                        "Cancelling tool call"
                    );
                    let _ = cancel.send(());
                }
            }
            _ => {}
        }
    }

    /// Handles the initialize request.
    fn handle_initialize(&mut self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        if self.state != ServerState::AwaitingInit {
            return Err(JsonRpcError::new(
                Some(req.id.clone()),
                JsonRpcErrorData::with_message(
                    ErrorCode::InvalidRequest,
                    "Server already initialised",
                ),
            ));
        }

        let params: InitializeParams = req
            .params
            .as_ref()
            .map(|p| serde_json::from_value(p.clone()))
            .transpose()
            .map_err(|e| {
                JsonRpcError::invalid_params(
                    req.id.clone(),
                    format!("Invalid initialize params: {e}"),
                )
            })?
            .ok_or_else(|| {
                JsonRpcError::invalid_params(req.id.clone(), "Missing initialize params")
            })?;

        if let Some(client) = &params.client_info {
            tracing::debug!(
                client = %client.name,
                version = client.version.as_deref().unwrap_or("unknown"),
                requested = %params.protocol_version,
                "Initialize request"
            );
        }

        let negotiated_version = MCP_PROTOCOL_VERSION.to_string();
        self.protocol_version = Some(negotiated_version.clone());
        self.state = ServerState::Initialising;

        Ok(JsonRpcResponse::success(
            req.id.clone(),
            json!({
                "protocolVersion": negotiated_version,
                "capabilities": ServerCapabilities::default(),
                "serverInfo": ServerInfo::default(),
            }),
        ))
    }

    /// Handles the tools/list request.
    fn handle_tools_list(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        self.require_running(&req.id)?;
        Ok(JsonRpcResponse::success(
            req.id.clone(),
            json!({ "tools": Self::tool_definitions() }),
        ))
    }

    /// Handles the resources/list request.
    fn handle_resources_list(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        self.require_running(&req.id)?;
        let resources: Vec<ResourceDefinition> = RESOURCES.iter().map(Into::into).collect();
        Ok(JsonRpcResponse::success(
            req.id.clone(),
            json!({ "resources": resources }),
        ))
    }

    /// Starts a resources/read request as its own task, like a tool call.
    fn spawn_resource_read(&mut self, req: &JsonRpcRequest) -> Result<(), JsonRpcError> {
        self.require_running(&req.id)?;

        let params: ResourceReadParams = req
            .params
            .as_ref()
            .map(|p| serde_json::from_value(p.clone()))
            .transpose()
            .map_err(|e| {
                JsonRpcError::invalid_params(
                    req.id.clone(),
                    format!("Invalid resource read params: {e}"),
                )
            })?
            .ok_or_else(|| {
                JsonRpcError::invalid_params(req.id.clone(), "Missing resource read params")
            })?;
        let spec = resources::find(&params.uri)
            .ok_or_else(|| JsonRpcError::resource_not_found(req.id.clone(), &params.uri))?;

        let id = req.id.clone();
        let cancelled = self.register_cancel(&id);
        let tools = self.tools.clone();
        let sender = self.sender.clone();
        let in_flight = Arc::clone(&self.in_flight);

        self.tasks.spawn(async move {
            let contents = tools.read_resource(spec, cancelled).await;
            lock(&in_flight).remove(&id);
            let response = JsonRpcResponse::success(id, json!({ "contents": [contents] }));
            if let Err(e) = sender.write_response(&response).await {
                tracing::warn!(error = %e, "Failed to write resource read response");
            }
        });
        Ok(())
    }

    /// Registers `id` for `notifications/cancelled`. The returned future
    /// completes only when the client cancels.
    fn register_cancel(&self, id: &RequestId) -> impl Future<Output = ()> + Send + 'static {
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        lock(&self.in_flight).insert(id.clone(), cancel_tx);
        async move {
            // A dropped sender means the call finished, not that it was cancelled.
            if cancel_rx.await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Starts a tools/call request as its own task. The task writes the
    /// response when the call completes.
    fn spawn_tool_call(&mut self, req: &JsonRpcRequest) -> Result<(), JsonRpcError> {
        self.require_running(&req.id)?;

        let params: ToolCallParams = req
            .params
            .as_ref()
            .map(|p| serde_json::from_value(p.clone()))
            .transpose()
            .map_err(|e| {
                JsonRpcError::invalid_params(
                    req.id.clone(),
                    format!("Invalid tool call params: {e}"),
                )
            })?
            .ok_or_else(|| {
                JsonRpcError::invalid_params(req.id.clone(), "Missing tool call params")
            })?;

        let id = req.id.clone();
        let cancelled = self.register_cancel(&id);
        let tools = self.tools.clone();
        let sender = self.sender.clone();
        let in_flight = Arc::clone(&self.in_flight);

        self.tasks.spawn(async move {
            let result = tools.call(&params.name, &params.arguments, cancelled).await;
            lock(&in_flight).remove(&id);

            let written = match serde_json::to_value(&result) {
                Ok(value) => sender.write_response(&JsonRpcResponse::success(id, value)).await,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialise tool call result");
                    sender
                        .write_error(&JsonRpcError::internal_error(
                            id,
                            "Internal error: failed to serialise result",
                        ))
                        .await
                }
            };
            if let Err(e) = written {
                tracing::warn!(error = %e, "Failed to write tool call response");
            }
        });
        Ok(())
    }

    /// Forwards a mode transition as a log notification.
    async fn forward_event(&mut self, event: Result<ModeTransition, RecvError>) -> io::Result<()> {
        match event {
            Ok(transition) => {
                if self.state != ServerState::Running {
                    return Ok(());
                }
                let level = if transition.to == Mode::Live { "info" } else { "warning" };
                let notification = OutgoingNotification::log_message(
                    level,
                    json!({
                        "event": "mode_changed",
                        "from": transition.from,
                        "to": transition.to,
                        "reason": transition.reason,
                        "at": transition.at,
                    }),
                );
                self.sender.write_notification(&notification).await
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Dropped mode notifications");
                Ok(())
            }
            Err(RecvError::Closed) => {
                self.events = None;
                Ok(())
            }
        }
    }

    /// Ensures the server is in the Running state.
    fn require_running(&self, id: &RequestId) -> Result<(), JsonRpcError> {
        if self.state != ServerState::Running {
            return Err(JsonRpcError::new(
                Some(id.clone()),
                JsonRpcErrorData::with_message(ErrorCode::InvalidRequest, "Server not initialised"),
            ));
        }
        Ok(())
    }
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<ModeTransition>>,
) -> Result<ModeTransition, RecvError> {
    match events {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            tracing::error!(error = %e, "Tool call task panicked");
        }
    }
}
