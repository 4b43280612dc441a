pub mod commands;
pub mod grants;
pub mod permissions;
pub mod plan;
pub mod protocol;
pub mod session;
pub mod tools;
pub mod transcript;

pub use commands::{HandlerClass, LocalCommand, Route, SlashCommand, COMMANDS};
pub use grants::{FileGrantBackend, GrantBackend, GrantKey, MemoryGrantBackend, PersistentGrants};
pub use permissions::{EnqueueOutcome, GrantDecision, PermissionBroker, PermissionRequest};
pub use plan::{Plan, PlanStep, PlanWorkflow, StepStatus};
pub use protocol::{
    FrameError, InboundEvent, InteractionMode, OutboundEvent, PermissionResponse, PermissionScope,
    ToolKind, ToolStatus, ToolUseEvent, DEFAULT_MAX_FRAME_BYTES,
};
pub use session::{Applied, ConnectionState, SessionContext};
pub use tools::{ToolUpdate, ToolUse, ToolUseTracker};
pub use transcript::{EntryKind, Transcript, TranscriptEntry};
