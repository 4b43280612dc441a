use crate::grants::{GrantKey, GrantStore, GrantStoreError, PersistentGrants};
use crate::protocol::{PermissionRequestPayload, PermissionResponse, PermissionScope, ToolKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Denied,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub id: String,
    pub tool: ToolKind,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub status: RequestStatus,
}

impl From<PermissionRequestPayload> for PermissionRequest {
    fn from(payload: PermissionRequestPayload) -> Self {
        Self {
            id: payload.request_id,
            tool: payload.tool,
            path: payload.path,
            command: payload.command,
            description: payload.description,
            created_at: Utc::now(),
            status: RequestStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantDecision {
    Allowed,
    Denied,
    Unknown,
}

impl GrantDecision {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            GrantDecision::Allowed => Some(true),
            GrantDecision::Denied => Some(false),
            GrantDecision::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantSource {
    Persistent,
    Session,
}

impl GrantSource {
    pub fn scope(&self) -> PermissionScope {
        match self {
            GrantSource::Persistent => PermissionScope::Always,
            GrantSource::Session => PermissionScope::Session,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedGrant {
    pub key: GrantKey,
    pub allowed: bool,
    pub source: GrantSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued { position: usize },
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRequest {
    pub request: PermissionRequest,
    pub response: PermissionResponse,
}

/// Serial approval queue plus the two grant tiers.
///
/// Only the head of the queue is ever presented. Session grants vanish with
/// the client; persistent grants survive it. The tiers stay separate because
/// they are cleared independently.
#[derive(Debug)]
pub struct PermissionBroker {
    queue: VecDeque<PermissionRequest>,
    session: GrantStore,
    persistent: PersistentGrants,
}

impl PermissionBroker {
    pub fn new(persistent: PersistentGrants) -> Self {
        Self {
            queue: VecDeque::new(),
            session: GrantStore::new(),
            persistent,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(PersistentGrants::in_memory())
    }

    pub fn enqueue(&mut self, request: PermissionRequest) -> EnqueueOutcome {
        if self.queue.iter().any(|queued| queued.id == request.id) {
            debug!(request_id = %request.id, "permission_request_duplicate");
            return EnqueueOutcome::Duplicate;
        }
        debug!(request_id = %request.id, tool = %request.tool, "permission_request_queued");
        self.queue.push_back(request);
        EnqueueOutcome::Queued {
            position: self.queue.len() - 1,
        }
    }

    pub fn current(&self) -> Option<&PermissionRequest> {
        self.queue.front()
    }

    pub fn pending(&self) -> impl Iterator<Item = &PermissionRequest> {
        self.queue.iter()
    }

    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    /// Removes the request whatever the scope, then caches the decision for
    /// `session`/`always`. Unknown ids are a no-op.
    pub fn resolve(
        &mut self,
        request_id: &str,
        allowed: bool,
        scope: PermissionScope,
    ) -> Option<ResolvedRequest> {
        let index = self.queue.iter().position(|queued| queued.id == request_id)?;
        let mut request = self.queue.remove(index)?;
        request.status = if allowed {
            RequestStatus::Approved
        } else {
            RequestStatus::Denied
        };

        let key = GrantKey::new(request.tool, request.path.as_deref());
        match scope {
            PermissionScope::Once => {}
            PermissionScope::Session => self.session.insert(key, allowed),
            PermissionScope::Always => {
                if let Err(err) = self.persistent.set(key.clone(), allowed) {
                    warn!("grant_persist_error: {key}: {err}");
                }
            }
        }

        Some(ResolvedRequest {
            response: PermissionResponse {
                request_id: request.id.clone(),
                allowed,
                scope,
            },
            request,
        })
    }

    /// The response a cached grant gives for `request`, scoped to the tier
    /// that answered. `None` means the operator has to be asked.
    pub fn cached_response(&self, request: &PermissionRequest) -> Option<PermissionResponse> {
        let cached = self.lookup(request.tool, request.path.as_deref())?;
        Some(PermissionResponse {
            request_id: request.id.clone(),
            allowed: cached.allowed,
            scope: cached.source.scope(),
        })
    }

    pub fn check(&self, tool: ToolKind, path: Option<&str>) -> GrantDecision {
        match self.lookup(tool, path) {
            Some(cached) if cached.allowed => GrantDecision::Allowed,
            Some(_) => GrantDecision::Denied,
            None => GrantDecision::Unknown,
        }
    }

    /// Most specific key first, persistent before session at equal
    /// specificity.
    pub fn lookup(&self, tool: ToolKind, path: Option<&str>) -> Option<CachedGrant> {
        let exact = GrantKey::new(tool, path);
        let wildcard = GrantKey::wildcard(tool);
        let candidates = [
            (GrantSource::Persistent, &exact),
            (GrantSource::Session, &exact),
            (GrantSource::Persistent, &wildcard),
            (GrantSource::Session, &wildcard),
        ];
        for (source, key) in candidates {
            let allowed = match source {
                GrantSource::Persistent => self.persistent.get(key),
                GrantSource::Session => self.session.get(key),
            };
            if let Some(allowed) = allowed {
                return Some(CachedGrant {
                    key: key.clone(),
                    allowed,
                    source,
                });
            }
        }
        None
    }

    pub fn clear_session_grants(&mut self) {
        self.session.clear();
    }

    pub fn clear_persistent_grant(
        &mut self,
        tool: ToolKind,
        path: Option<&str>,
    ) -> Result<bool, GrantStoreError> {
        self.persistent.remove(&GrantKey::new(tool, path))
    }

    pub fn clear_all_persistent_grants(&mut self) -> Result<(), GrantStoreError> {
        self.persistent.clear()
    }

    /// Drops every queued request; used when the session ends.
    pub fn clear_queue(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        dropped
    }

    pub fn session_grants(&self) -> impl Iterator<Item = (&GrantKey, bool)> {
        self.session.iter()
    }

    pub fn persistent_grants(&self) -> impl Iterator<Item = (&GrantKey, bool)> {
        self.persistent.store().iter()
    }
}
