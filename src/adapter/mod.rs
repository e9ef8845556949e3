use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError, ServiceExt,
};
use serde_json::{json, Value};

use crate::daemon::launcher;
use crate::error::Result as CrateResult;
use crate::ipc::client::IpcClient;
use crate::relay::{AskQuestionInput, CheckAnswersInput, MarkAnsweredInput};
use crate::socket_path::socket_path;

/// Adapter-side state: one daemon connection and its registered session.
///
/// Constructed once at process start and threaded through the tool handlers,
/// so tests can build several independent contexts side by side.
pub struct AdapterContext {
    pub session_id: String,
    pub session_label: String,
    pub socket_path: PathBuf,
    client: IpcClient,
}

impl AdapterContext {
    /// Ensure a daemon is up, connect to it, and register this process's
    /// session. Failure here is fatal to adapter startup.
    pub async fn initialize(project_root: &Path) -> CrateResult<Self> {
        let socket = socket_path(project_root);
        launcher::ensure_daemon(&socket, project_root).await?;

        let client = IpcClient::connect(&socket).await?;
        let params = json!({ "project_root": project_root.display().to_string() });
        let timeout = IpcClient::method_timeout("register_session", &params);
        let registered = client.request("register_session", params, timeout).await?;

        let session_id = registered
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let session_label = registered
            .get("label")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        tracing::info!(%session_id, %session_label, "adapter session registered");

        Ok(Self {
            session_id,
            session_label,
            socket_path: socket,
            client,
        })
    }

    /// Forward one relay call to the daemon with its method-specific timeout.
    pub async fn forward(&self, method: &str, params: Value) -> CrateResult<Value> {
        let timeout = IpcClient::method_timeout(method, &params);
        self.client.request(method, params, timeout).await
    }

    /// Unregister the session. Best effort; the daemon also unregisters on
    /// disconnect.
    pub async fn shutdown(&self) {
        let _ = self
            .client
            .request("unregister_session", Value::Null, Duration::from_secs(5))
            .await;
    }
}

/// MCP stdio server exposing the three relay tools, each proxied over IPC.
#[derive(Clone)]
pub struct RelayMcpServer {
    ctx: Arc<AdapterContext>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl RelayMcpServer {
    pub fn new(ctx: Arc<AdapterContext>) -> Self {
        Self {
            ctx,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "Send a blocking question to the user via the relay daemon. Creates a pending question and returns its id for polling."
    )]
    async fn ask_blocking_question(
        &self,
        Parameters(input): Parameters<AskQuestionInput>,
    ) -> std::result::Result<CallToolResult, McpError> {
        self.proxy("ask_blocking_question", &input).await
    }

    #[tool(
        description = "Poll for answers to pending blocking questions. Long-polls up to wait_seconds (default 60, max 300)."
    )]
    async fn check_question_answers(
        &self,
        Parameters(input): Parameters<CheckAnswersInput>,
    ) -> std::result::Result<CallToolResult, McpError> {
        self.proxy("check_question_answers", &input).await
    }

    #[tool(
        description = "Confirm receipt of an answered question. The answer stays in the session log."
    )]
    async fn mark_question_answered(
        &self,
        Parameters(input): Parameters<MarkAnsweredInput>,
    ) -> std::result::Result<CallToolResult, McpError> {
        self.proxy("mark_question_answered", &input).await
    }

    async fn proxy<T: serde::Serialize>(
        &self,
        method: &str,
        input: &T,
    ) -> std::result::Result<CallToolResult, McpError> {
        let params =
            serde_json::to_value(input).map_err(|e| McpError::internal_error(e.to_string(), None))?;
        let result = self
            .ctx
            .forward(method, params)
            .await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        let json = serde_json::to_string_pretty(&result)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }
}

#[tool_handler]
impl rmcp::ServerHandler for RelayMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Relay for blocking questions between a coding agent and a human \
                 operator. ask_blocking_question queues a question, \
                 check_question_answers polls for the answer, \
                 mark_question_answered confirms receipt."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

/// Run the adapter: ensure a daemon, register a session, then serve MCP over
/// stdio until the client hangs up.
pub async fn run(project_root: &Path) -> anyhow::Result<()> {
    let ctx = Arc::new(AdapterContext::initialize(project_root).await?);
    let server = RelayMcpServer::new(ctx.clone());

    let service = server.serve(rmcp::transport::stdio()).await?;
    service.waiting().await?;

    ctx.shutdown().await;
    Ok(())
}
