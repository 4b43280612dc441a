use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Matches tungstenite's default message limit, so any frame the transport
/// accepts also decodes.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 << 20;

/// Closed set of side-effect classes a tool use or permission request can
/// belong to. Wire names follow the agent backend (`read`, `write`, `bash`,
/// `browser`, `mcp`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ToolKind {
    #[serde(rename = "read")]
    FileRead,
    #[serde(rename = "write")]
    FileWrite,
    #[serde(rename = "bash")]
    Shell,
    #[serde(rename = "browser")]
    NetworkFetch,
    #[serde(rename = "mcp")]
    Extension,
}

impl ToolKind {
    pub const ALL: [ToolKind; 5] = [
        ToolKind::FileRead,
        ToolKind::FileWrite,
        ToolKind::Shell,
        ToolKind::NetworkFetch,
        ToolKind::Extension,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::FileRead => "read",
            ToolKind::FileWrite => "write",
            ToolKind::Shell => "bash",
            ToolKind::NetworkFetch => "browser",
            ToolKind::Extension => "mcp",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ToolKind::FileRead => "file read",
            ToolKind::FileWrite => "file write",
            ToolKind::Shell => "shell command",
            ToolKind::NetworkFetch => "network fetch",
            ToolKind::Extension => "extension tool",
        }
    }

    /// Classify an agent-reported tool name (`Read`, `Edit`, `Bash`,
    /// `mcp__github__create_issue`, ...). Unrecognized names are extension tools.
    pub fn from_tool_name(name: &str) -> ToolKind {
        let normalized = name.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "read" | "glob" | "grep" | "ls" | "notebookread" => ToolKind::FileRead,
            "edit" | "write" | "multiedit" | "notebookedit" => ToolKind::FileWrite,
            "bash" | "bashoutput" | "killshell" => ToolKind::Shell,
            "webfetch" | "websearch" => ToolKind::NetworkFetch,
            _ => ToolKind::Extension,
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolKind {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "read" | "file-read" | "file_read" => Ok(ToolKind::FileRead),
            "write" | "file-write" | "file_write" => Ok(ToolKind::FileWrite),
            "bash" | "shell" | "shell-command" | "shell_command" => Ok(ToolKind::Shell),
            "browser" | "network" | "network-fetch" | "network_fetch" => {
                Ok(ToolKind::NetworkFetch)
            }
            "mcp" | "extension" | "extension-tool" | "extension_tool" => Ok(ToolKind::Extension),
            other => Err(format!("Unknown tool kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl ToolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolStatus::Pending => "pending",
            ToolStatus::Running => "running",
            ToolStatus::Completed => "completed",
            ToolStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ToolStatus::Completed | ToolStatus::Error)
    }
}

impl fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionScope {
    Once,
    Session,
    Always,
}

impl PermissionScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionScope::Once => "once",
            PermissionScope::Session => "session",
            PermissionScope::Always => "always",
        }
    }
}

impl fmt::Display for PermissionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionScope {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "once" => Ok(PermissionScope::Once),
            "session" => Ok(PermissionScope::Session),
            "always" | "persistent" => Ok(PermissionScope::Always),
            other => Err(format!("Unknown permission scope: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionMode {
    #[default]
    Normal,
    Plan,
}

impl InteractionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionMode::Normal => "normal",
            InteractionMode::Plan => "plan",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            InteractionMode::Normal => InteractionMode::Plan,
            InteractionMode::Plan => InteractionMode::Normal,
        }
    }
}

impl fmt::Display for InteractionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandResultPayload {
    pub command: String,
    pub success: bool,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolUseEvent {
    pub tool_id: String,
    pub tool_name: String,
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolUseEvent {
    pub fn new(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        status: ToolStatus,
    ) -> Self {
        Self {
            tool_id: tool_id.into(),
            tool_name: tool_name.into(),
            status,
            path: None,
            command: None,
            result: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionRequestPayload {
    pub request_id: String,
    pub tool: ToolKind,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

/// Events the agent side pushes down the session channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    Connected {
        working_dir: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    Typing {
        status: bool,
    },
    Response {
        content: String,
    },
    Error {
        content: String,
    },
    CommandResult(CommandResultPayload),
    CommandError {
        command: String,
        error: String,
    },
    TextDelta {
        content: String,
    },
    ToolUse(ToolUseEvent),
    ToolUseStart {
        tool_id: String,
        tool_name: String,
    },
    ToolUseEnd {
        tool_id: String,
        tool_name: String,
    },
    Complete {
        #[serde(default)]
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_uses: Vec<Value>,
    },
    PermissionRequest(PermissionRequestPayload),
    Pong,
}

impl InboundEvent {
    pub const KINDS: &'static [&'static str] = &[
        "connected",
        "typing",
        "response",
        "error",
        "command_result",
        "command_error",
        "text_delta",
        "tool_use",
        "tool_use_start",
        "tool_use_end",
        "complete",
        "permission_request",
        "pong",
    ];

    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::Connected { .. } => "connected",
            InboundEvent::Typing { .. } => "typing",
            InboundEvent::Response { .. } => "response",
            InboundEvent::Error { .. } => "error",
            InboundEvent::CommandResult(_) => "command_result",
            InboundEvent::CommandError { .. } => "command_error",
            InboundEvent::TextDelta { .. } => "text_delta",
            InboundEvent::ToolUse(_) => "tool_use",
            InboundEvent::ToolUseStart { .. } => "tool_use_start",
            InboundEvent::ToolUseEnd { .. } => "tool_use_end",
            InboundEvent::Complete { .. } => "complete",
            InboundEvent::PermissionRequest(_) => "permission_request",
            InboundEvent::Pong => "pong",
        }
    }

    /// Folds the legacy start/end notifications into the `tool_use` shape.
    pub fn as_tool_event(&self) -> Option<ToolUseEvent> {
        match self {
            InboundEvent::ToolUse(event) => Some(event.clone()),
            InboundEvent::ToolUseStart { tool_id, tool_name } => {
                Some(ToolUseEvent::new(tool_id, tool_name, ToolStatus::Running))
            }
            InboundEvent::ToolUseEnd { tool_id, tool_name } => {
                Some(ToolUseEvent::new(tool_id, tool_name, ToolStatus::Completed))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionResponse {
    pub request_id: String,
    pub allowed: bool,
    pub scope: PermissionScope,
}

/// Events the operator side sends up the session channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    Message {
        content: String,
        mode: InteractionMode,
    },
    Command {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
    PermissionResponse(PermissionResponse),
    Ping,
}

impl OutboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundEvent::Message { .. } => "message",
            OutboundEvent::Command { .. } => "command",
            OutboundEvent::PermissionResponse(_) => "permission_response",
            OutboundEvent::Ping => "ping",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("frame has no type discriminant")]
    MissingType,
    #[error("unrecognized event kind: {0}")]
    UnknownKind(String),
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

impl FrameError {
    /// Unknown kinds come from newer agents and are dropped without noise.
    pub fn is_forward_compatible(&self) -> bool {
        matches!(self, FrameError::UnknownKind(_))
    }
}

pub fn encode_frame<T: Serialize>(
    value: &T,
    max_frame_bytes: usize,
) -> Result<String, FrameError> {
    let encoded =
        serde_json::to_string(value).map_err(|err| FrameError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    Ok(encoded)
}

pub fn decode_frame<T: DeserializeOwned>(
    raw: &str,
    max_frame_bytes: usize,
) -> Result<T, FrameError> {
    let raw = raw.trim_end_matches(['\r', '\n']);
    if raw.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    serde_json::from_str(raw).map_err(|err| FrameError::Decode(err.to_string()))
}

pub fn decode_inbound(raw: &str, max_frame_bytes: usize) -> Result<InboundEvent, FrameError> {
    let value: Value = decode_frame(raw, max_frame_bytes)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(FrameError::MissingType)?;
    if !InboundEvent::KINDS.contains(&kind) {
        return Err(FrameError::UnknownKind(kind.to_string()));
    }
    serde_json::from_value(value).map_err(|err| FrameError::Decode(err.to_string()))
}

pub fn encode_outbound(
    event: &OutboundEvent,
    max_frame_bytes: usize,
) -> Result<String, FrameError> {
    encode_frame(event, max_frame_bytes)
}
