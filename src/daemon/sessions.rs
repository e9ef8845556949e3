use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One live adapter connection, as tracked by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub label: String,
    pub connected_at: DateTime<Utc>,
}

/// In-memory registry of active adapter sessions.
///
/// Sessions here are ephemeral for the lifetime of a daemon run; the durable
/// record is the session log on disk, not this map.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Session>,
    client_to_session: DashMap<Uuid, String>,
    label_counters: DashMap<String, u64>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session for the given connection. A connection that
    /// re-registers replaces its previous session.
    pub fn register(&self, client_id: Uuid, project_root: Option<&str>) -> Session {
        if let Some((_, old_session_id)) = self.client_to_session.remove(&client_id) {
            self.sessions.remove(&old_session_id);
        }

        let prefix = label_prefix(project_root);
        let count = {
            let mut counter = self.label_counters.entry(prefix.clone()).or_insert(0);
            *counter += 1;
            *counter
        };

        let session = Session {
            id: Uuid::new_v4().to_string(),
            label: format!("{prefix}/{count}"),
            connected_at: Utc::now(),
        };
        self.sessions.insert(session.id.clone(), session.clone());
        self.client_to_session.insert(client_id, session.id.clone());

        tracing::info!(session_id = %session.id, %client_id, label = %session.label, "session registered");
        session
    }

    /// Remove a session by its id.
    pub fn unregister(&self, session_id: &str) -> Option<Session> {
        let removed = self.sessions.remove(session_id).map(|(_, session)| session);
        self.client_to_session
            .retain(|_, mapped| mapped != session_id);
        if let Some(session) = &removed {
            tracing::info!(session_id = %session.id, label = %session.label, "session unregistered");
        }
        removed
    }

    /// Drop whatever session was registered for a closed connection.
    pub fn unregister_client(&self, client_id: Uuid) -> Option<Session> {
        let (_, session_id) = self.client_to_session.remove(&client_id)?;
        self.sessions.remove(&session_id).map(|(_, session)| session)
    }

    /// Session registered for a connection, if any.
    pub fn session_for_client(&self, client_id: Uuid) -> Option<Session> {
        let session_id = self.client_to_session.get(&client_id)?.value().clone();
        self.sessions
            .get(&session_id)
            .map(|entry| entry.value().clone())
    }

    pub fn all(&self) -> Vec<Session> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}

/// Short project prefix for human-readable session labels.
fn label_prefix(project_root: Option<&str>) -> String {
    let basename = project_root
        .filter(|root| !root.trim().is_empty())
        .and_then(|root| {
            std::path::Path::new(root)
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
        })
        .unwrap_or_else(|| "claude".to_string());
    basename.chars().take(6).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_count_up_per_project() {
        let registry = SessionRegistry::new();
        let a = registry.register(Uuid::new_v4(), Some("/home/user/myproject"));
        let b = registry.register(Uuid::new_v4(), Some("/home/user/myproject"));
        assert_eq!(a.label, "myproj/1");
        assert_eq!(b.label, "myproj/2");
    }

    #[test]
    fn missing_root_falls_back_to_claude() {
        let registry = SessionRegistry::new();
        let session = registry.register(Uuid::new_v4(), None);
        assert_eq!(session.label, "claude/1");
    }

    #[test]
    fn unregister_client_removes_its_session() {
        let registry = SessionRegistry::new();
        let client_id = Uuid::new_v4();
        let session = registry.register(client_id, None);

        let removed = registry.unregister_client(client_id).unwrap();
        assert_eq!(removed.id, session.id);
        assert!(registry.session_for_client(client_id).is_none());
        assert!(registry.all().is_empty());
    }

    #[test]
    fn reregistration_replaces_previous_session() {
        let registry = SessionRegistry::new();
        let client_id = Uuid::new_v4();
        let first = registry.register(client_id, None);
        let second = registry.register(client_id, None);

        assert_ne!(first.id, second.id);
        assert_eq!(registry.all().len(), 1);
        assert_eq!(
            registry.session_for_client(client_id).unwrap().id,
            second.id
        );
    }
}
