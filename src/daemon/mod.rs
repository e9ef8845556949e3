pub mod launcher;
pub mod sessions;

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{Result, TelegramMcpError};
use crate::ipc::server::{IpcServer, RequestHandler};
use crate::relay::{AskQuestionInput, CheckAnswersInput, MarkAnsweredInput, RelayService};
use crate::storage::queue::SessionStore;
use sessions::SessionRegistry;

/// Long-lived daemon state shared across adapter connections.
///
/// Each relay operation resolves the caller's session from the connection it
/// arrived on; callers never pass a session id over the wire.
pub struct Daemon {
    registry: SessionRegistry,
    relay: RelayService,
    store: SessionStore,
}

impl Daemon {
    pub fn new(project_root: &Path) -> Self {
        let store = SessionStore::new(project_root);
        Self {
            registry: SessionRegistry::new(),
            relay: RelayService::new(store.clone()),
            store,
        }
    }

    fn session_id_for(&self, client_id: Uuid) -> Result<String> {
        self.registry
            .session_for_client(client_id)
            .map(|session| session.id)
            .ok_or(TelegramMcpError::SessionNotRegistered {
                client_id: client_id.to_string(),
            })
    }
}

#[async_trait::async_trait]
impl RequestHandler for Daemon {
    async fn handle(&self, client_id: Uuid, method: &str, params: Value) -> Result<Value> {
        match method {
            "register_session" => {
                let project_root = params.get("project_root").and_then(Value::as_str);
                let session = self.registry.register(client_id, project_root);
                self.store.create_session(&session.id, &session.label).await?;
                Ok(serde_json::to_value(&session)?)
            }
            "unregister_session" => {
                let session_id = self.session_id_for(client_id)?;
                self.registry.unregister(&session_id);
                Ok(json!({ "success": true }))
            }
            "list_sessions" => Ok(serde_json::to_value(self.registry.all())?),
            "ask_blocking_question" => {
                let session_id = self.session_id_for(client_id)?;
                let input: AskQuestionInput = parse_params(params)?;
                Ok(serde_json::to_value(
                    self.relay.ask(&session_id, input).await?,
                )?)
            }
            "check_question_answers" => {
                let session_id = self.session_id_for(client_id)?;
                let input: CheckAnswersInput = parse_params(params)?;
                Ok(serde_json::to_value(
                    self.relay.check(&session_id, input).await?,
                )?)
            }
            "mark_question_answered" => {
                let session_id = self.session_id_for(client_id)?;
                let input: MarkAnsweredInput = parse_params(params)?;
                Ok(serde_json::to_value(self.relay.mark(&session_id, input)?)?)
            }
            _ => Err(TelegramMcpError::UnknownMethod {
                method: method.to_string(),
            }),
        }
    }

    async fn client_disconnected(&self, client_id: Uuid) {
        if let Some(session) = self.registry.unregister_client(client_id) {
            tracing::info!(
                session_id = %session.id,
                label = %session.label,
                "client dropped, session unregistered"
            );
        }
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T> {
    let params = if params.is_null() {
        Value::Object(Default::default())
    } else {
        params
    };
    serde_json::from_value(params).map_err(|e| TelegramMcpError::Validation {
        reason: format!("invalid params: {}", e),
    })
}

/// Run the daemon in the foreground until shut down.
pub async fn run(project_root: &Path, socket_path: &Path) -> Result<()> {
    let daemon = Arc::new(Daemon::new(project_root));
    let server = IpcServer::new(socket_path.to_path_buf());
    server.serve(daemon).await
}
