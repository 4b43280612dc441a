use crate::protocol::{ToolKind, ToolStatus, ToolUseEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    pub kind: ToolKind,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    pub status: ToolStatus,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolUpdate {
    Created,
    Transitioned(ToolStatus),
    Ignored,
}

/// Lifecycle of every tool invocation reported in a session, keyed by the
/// agent's invocation id. Status only moves forward: running, then completed
/// or error, then frozen.
#[derive(Debug, Default)]
pub struct ToolUseTracker {
    order: Vec<String>,
    by_id: HashMap<String, ToolUse>,
}

impl ToolUseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_tool_event(&mut self, event: &ToolUseEvent) -> ToolUpdate {
        match event.status {
            ToolStatus::Pending | ToolStatus::Running => {
                if self.by_id.contains_key(&event.tool_id) {
                    return ToolUpdate::Ignored;
                }
                let tool = ToolUse {
                    id: event.tool_id.clone(),
                    name: event.tool_name.clone(),
                    kind: ToolKind::from_tool_name(&event.tool_name),
                    path: event.path.clone(),
                    command: event.command.clone(),
                    status: ToolStatus::Running,
                    result: None,
                    error: None,
                    started_at: Utc::now(),
                    finished_at: None,
                };
                self.order.push(tool.id.clone());
                self.by_id.insert(tool.id.clone(), tool);
                ToolUpdate::Created
            }
            ToolStatus::Completed | ToolStatus::Error => {
                let Some(tool) = self.by_id.get_mut(&event.tool_id) else {
                    return ToolUpdate::Ignored;
                };
                if tool.status.is_terminal() {
                    return ToolUpdate::Ignored;
                }
                tool.status = event.status;
                tool.finished_at = Some(Utc::now());
                if event.result.is_some() {
                    tool.result = event.result.clone();
                }
                if event.error.is_some() {
                    tool.error = event.error.clone();
                }
                if tool.path.is_none() {
                    tool.path = event.path.clone();
                }
                if tool.command.is_none() {
                    tool.command = event.command.clone();
                }
                ToolUpdate::Transitioned(event.status)
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&ToolUse> {
        self.by_id.get(id)
    }

    pub fn list_active(&self) -> Vec<&ToolUse> {
        self.all()
            .filter(|tool| !tool.status.is_terminal())
            .collect()
    }

    pub fn all(&self) -> impl Iterator<Item = &ToolUse> {
        self.order.iter().filter_map(|id| self.by_id.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.by_id.clear();
    }
}
