use crate::commands::{self, LocalCommand, Route};
use crate::permissions::{EnqueueOutcome, PermissionBroker, PermissionRequest};
use crate::plan::{parse_plan, PlanWorkflow, StepStatus};
use crate::protocol::{InboundEvent, InteractionMode, OutboundEvent, PermissionScope, ToolKind};
use crate::tools::{ToolUpdate, ToolUseTracker};
use crate::transcript::{EntryKind, Transcript};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

pub const PROCEED_MESSAGE: &str =
    "The plan is approved. Proceed with the implementation and report progress on each step.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    #[default]
    Disconnected,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What applying one inbound event changed, for the presentation layer.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Applied {
    /// Events to send back, e.g. auto-resolved permission responses.
    pub outbound: Vec<OutboundEvent>,
    pub tool: Option<(String, ToolUpdate)>,
    pub plan_updated: bool,
}

/// Single owner of everything one session knows. Inbound events and operator
/// input are the only mutation paths.
#[derive(Debug)]
pub struct SessionContext {
    session_id: String,
    working_dir: Option<String>,
    connection: ConnectionState,
    typing: bool,
    transcript: Transcript,
    tools: ToolUseTracker,
    broker: PermissionBroker,
    plan: PlanWorkflow,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, broker: PermissionBroker) -> Self {
        Self {
            session_id: session_id.into(),
            working_dir: None,
            connection: ConnectionState::default(),
            typing: false,
            transcript: Transcript::new(),
            tools: ToolUseTracker::new(),
            broker,
            plan: PlanWorkflow::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn working_dir(&self) -> Option<&str> {
        self.working_dir.as_deref()
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn is_typing(&self) -> bool {
        self.typing
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn tools(&self) -> &ToolUseTracker {
        &self.tools
    }

    pub fn broker(&self) -> &PermissionBroker {
        &self.broker
    }

    pub fn plan(&self) -> &PlanWorkflow {
        &self.plan
    }

    pub fn mode(&self) -> InteractionMode {
        self.plan.mode()
    }

    pub fn current_permission(&self) -> Option<&PermissionRequest> {
        self.broker.current()
    }

    pub fn set_connection_state(&mut self, state: ConnectionState) {
        if self.connection == state {
            return;
        }
        debug!(
            session_id = %self.session_id,
            from = %self.connection,
            to = %state,
            "connection_state"
        );
        self.connection = state;
        if state != ConnectionState::Connected {
            self.typing = false;
        }
    }

    pub fn apply_inbound(&mut self, event: InboundEvent) -> Applied {
        let mut applied = Applied::default();

        if let Some(tool_event) = event.as_tool_event() {
            let update = self.tools.on_tool_event(&tool_event);
            if update == ToolUpdate::Ignored {
                debug!(
                    tool_id = %tool_event.tool_id,
                    status = %tool_event.status,
                    "tool_event_ignored"
                );
            }
            applied.tool = Some((tool_event.tool_id, update));
            return applied;
        }

        match event {
            InboundEvent::Connected {
                working_dir,
                session_id,
            } => {
                if let Some(remote) = session_id.filter(|id| *id != self.session_id) {
                    warn!(local = %self.session_id, remote = %remote, "session_id_mismatch");
                }
                self.transcript
                    .push(EntryKind::System, format!("Connected to {working_dir}"));
                self.working_dir = Some(working_dir);
            }
            InboundEvent::Typing { status } => self.typing = status,
            InboundEvent::Response { content } => {
                self.typing = false;
                self.transcript.push_response(&content);
                applied.plan_updated = self.capture_plan(&content);
            }
            InboundEvent::Complete { content, .. } => {
                self.typing = false;
                let text = self
                    .transcript
                    .finish_stream(&content)
                    .map(|entry| entry.text.clone());
                if let Some(text) = text {
                    applied.plan_updated = self.capture_plan(&text);
                }
            }
            InboundEvent::TextDelta { content } => self.transcript.append_delta(&content),
            InboundEvent::Error { content } => {
                self.typing = false;
                self.transcript.push(EntryKind::Error, content);
            }
            InboundEvent::CommandResult(result) => {
                let text = if result.content.is_empty() {
                    let outcome = if result.success { "done" } else { "failed" };
                    format!("/{} {outcome}", result.command)
                } else {
                    result.content.clone()
                };
                let payload = serde_json::to_value(&result).ok();
                self.transcript
                    .push_with_payload(EntryKind::CommandResult, text, payload);
            }
            InboundEvent::CommandError { command, error } => {
                self.transcript
                    .push(EntryKind::Error, format!("/{command}: {error}"));
            }
            InboundEvent::PermissionRequest(payload) => {
                let request = PermissionRequest::from(payload);
                if let Some(response) = self.broker.cached_response(&request) {
                    info!(
                        request_id = %request.id,
                        allowed = response.allowed,
                        scope = %response.scope,
                        "permission_answered_from_grant"
                    );
                    applied
                        .outbound
                        .push(OutboundEvent::PermissionResponse(response));
                } else if let EnqueueOutcome::Queued { position } = self.broker.enqueue(request) {
                    debug!(position, "permission_waiting");
                }
            }
            InboundEvent::Pong => {}
            InboundEvent::ToolUse(_)
            | InboundEvent::ToolUseStart { .. }
            | InboundEvent::ToolUseEnd { .. } => {}
        }
        applied
    }

    /// Routes one line of operator input. Chat text and forwarded commands
    /// are recorded as user entries before they are handed back for sending.
    pub fn submit_input(&mut self, text: &str) -> Option<OutboundEvent> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        match commands::route(text) {
            Route::Chat(content) => {
                self.transcript.push(EntryKind::User, content.as_str());
                Some(OutboundEvent::Message {
                    content,
                    mode: self.plan.mode(),
                })
            }
            Route::Forward(event) => {
                self.transcript.push(EntryKind::User, text);
                Some(event)
            }
            Route::Local { command, args } => self.run_local(command, &args),
        }
    }

    pub fn resolve_permission(
        &mut self,
        request_id: &str,
        allowed: bool,
        scope: PermissionScope,
    ) -> Option<OutboundEvent> {
        let resolved = self.broker.resolve(request_id, allowed, scope)?;
        info!(
            request_id = %resolved.request.id,
            tool = %resolved.request.tool,
            allowed,
            scope = %scope,
            "permission_resolved"
        );
        Some(OutboundEvent::PermissionResponse(resolved.response))
    }

    pub fn update_plan_step(&mut self, step_id: &str, status: StepStatus) -> bool {
        self.plan.update_step_status(step_id, status)
    }

    /// Pending permission requests die with the session; grants do not.
    pub fn end_session(&mut self) {
        let dropped = self.broker.clear_queue();
        if dropped > 0 {
            info!(session_id = %self.session_id, dropped, "pending_permissions_dropped");
        }
        self.typing = false;
        self.connection = ConnectionState::Disconnected;
    }

    fn capture_plan(&mut self, text: &str) -> bool {
        if self.plan.mode() != InteractionMode::Plan {
            return false;
        }
        if self.plan.plan().is_some_and(|plan| plan.approved) {
            return false;
        }
        let Some(steps) = parse_plan(text) else {
            return false;
        };
        self.plan.set_plan(text, steps)
    }

    fn run_local(&mut self, command: LocalCommand, args: &[String]) -> Option<OutboundEvent> {
        match command {
            LocalCommand::Help => {
                self.transcript.push(EntryKind::System, commands::help_text());
                None
            }
            LocalCommand::Clear => {
                self.transcript.clear();
                self.tools.clear();
                None
            }
            LocalCommand::TogglePlan => {
                let mode = self.plan.toggle_mode();
                let text = match mode {
                    InteractionMode::Plan => {
                        "Plan mode on: the agent will propose a plan before changing anything"
                    }
                    InteractionMode::Normal => "Plan mode off",
                };
                self.transcript.push(EntryKind::System, text);
                None
            }
            LocalCommand::Approve => {
                if !self.plan.approve() {
                    self.transcript
                        .push(EntryKind::System, "No unapproved plan to approve");
                    return None;
                }
                self.transcript.push(EntryKind::System, "Plan approved");
                Some(OutboundEvent::Message {
                    content: PROCEED_MESSAGE.to_string(),
                    mode: InteractionMode::Normal,
                })
            }
            LocalCommand::Settings => {
                self.run_settings(args);
                None
            }
        }
    }

    fn run_settings(&mut self, args: &[String]) {
        match args.first().map(String::as_str) {
            None | Some("show") => {
                let text = self.describe_grants();
                self.transcript.push(EntryKind::System, text);
            }
            Some("revoke") => {
                let Some(tool) = args.get(1).and_then(|raw| raw.parse::<ToolKind>().ok()) else {
                    self.transcript.push(
                        EntryKind::Error,
                        "usage: /settings revoke <read|write|bash|browser|mcp> [path]",
                    );
                    return;
                };
                let path = args.get(2).map(String::as_str);
                let key = format!("{tool}:{}", path.unwrap_or("*"));
                match self.broker.clear_persistent_grant(tool, path) {
                    Ok(true) => self
                        .transcript
                        .push(EntryKind::System, format!("Revoked {key}")),
                    Ok(false) => self
                        .transcript
                        .push(EntryKind::System, format!("No saved grant for {key}")),
                    Err(err) => self
                        .transcript
                        .push(EntryKind::Error, format!("Failed to revoke grant: {err}")),
                };
            }
            Some("clear") if args.get(1).map(String::as_str) == Some("session") => {
                self.broker.clear_session_grants();
                self.transcript
                    .push(EntryKind::System, "Session grants cleared");
            }
            Some("clear") => {
                match self.broker.clear_all_persistent_grants() {
                    Ok(()) => self
                        .transcript
                        .push(EntryKind::System, "Saved grants cleared"),
                    Err(err) => self
                        .transcript
                        .push(EntryKind::Error, format!("Failed to clear grants: {err}")),
                };
            }
            Some(other) => {
                self.transcript.push(
                    EntryKind::Error,
                    format!("unknown settings action: {other} (show, revoke, clear)"),
                );
            }
        }
    }

    fn describe_grants(&self) -> String {
        let mut lines = Vec::new();
        for (title, grants) in [
            ("Saved grants", self.broker.persistent_grants().collect::<Vec<_>>()),
            ("Session grants", self.broker.session_grants().collect::<Vec<_>>()),
        ] {
            lines.push(format!("{title}:"));
            if grants.is_empty() {
                lines.push("  (none)".to_string());
            }
            for (key, allowed) in grants {
                let verdict = if allowed { "allow" } else { "deny" };
                lines.push(format!("  {key} {verdict}"));
            }
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CommandResultPayload, PermissionRequestPayload, ToolStatus, ToolUseEvent};
    use crate::permissions::GrantDecision;

    fn context() -> SessionContext {
        SessionContext::new("s1", PermissionBroker::in_memory())
    }

    fn permission_request(id: &str, tool: ToolKind, path: Option<&str>) -> InboundEvent {
        InboundEvent::PermissionRequest(PermissionRequestPayload {
            request_id: id.to_string(),
            tool,
            description: "needs access".to_string(),
            path: path.map(str::to_string),
            command: None,
        })
    }

    #[test]
    fn edit_with_one_time_permission_scenario() {
        let mut ctx = context();

        ctx.apply_inbound(InboundEvent::ToolUse(ToolUseEvent::new(
            "t1",
            "Edit",
            ToolStatus::Running,
        )));
        let applied = ctx.apply_inbound(permission_request(
            "p1",
            ToolKind::FileWrite,
            Some("/src/Hero.tsx"),
        ));
        assert!(applied.outbound.is_empty());
        assert_eq!(ctx.current_permission().map(|r| r.id.as_str()), Some("p1"));

        let response = ctx
            .resolve_permission("p1", true, PermissionScope::Once)
            .expect("response");
        assert_eq!(
            response,
            OutboundEvent::PermissionResponse(crate::protocol::PermissionResponse {
                request_id: "p1".to_string(),
                allowed: true,
                scope: PermissionScope::Once,
            })
        );

        ctx.apply_inbound(InboundEvent::ToolUse(ToolUseEvent::new(
            "t1",
            "Edit",
            ToolStatus::Completed,
        )));

        assert_eq!(
            ctx.tools().get("t1").map(|t| t.status),
            Some(ToolStatus::Completed)
        );
        assert_eq!(ctx.broker().pending_len(), 0);
        assert_eq!(
            ctx.broker()
                .check(ToolKind::FileWrite, Some("/src/Hero.tsx")),
            GrantDecision::Unknown
        );
    }

    #[test]
    fn back_to_back_requests_expose_one_current() {
        let mut ctx = context();
        ctx.apply_inbound(permission_request("p1", ToolKind::Shell, None));
        ctx.apply_inbound(permission_request("p2", ToolKind::FileRead, Some("/a")));
        ctx.apply_inbound(permission_request("p3", ToolKind::FileWrite, Some("/b")));
        assert_eq!(ctx.current_permission().map(|r| r.id.as_str()), Some("p1"));
        assert_eq!(ctx.broker().pending_len(), 3);

        ctx.end_session();
        assert!(ctx.current_permission().is_none());
    }

    #[test]
    fn session_grant_auto_answers_repeat_requests() {
        let mut ctx = context();
        ctx.apply_inbound(permission_request("p1", ToolKind::Shell, None));
        ctx.resolve_permission("p1", true, PermissionScope::Session);

        let applied = ctx.apply_inbound(permission_request("p2", ToolKind::Shell, Some("ls")));
        assert_eq!(
            applied.outbound,
            vec![OutboundEvent::PermissionResponse(
                crate::protocol::PermissionResponse {
                    request_id: "p2".to_string(),
                    allowed: true,
                    scope: PermissionScope::Session,
                }
            )]
        );
        assert!(ctx.current_permission().is_none());
        assert_eq!(ctx.broker().pending_len(), 0);
    }

    #[test]
    fn streamed_turn_lands_as_one_assistant_entry() {
        let mut ctx = context();
        ctx.apply_inbound(InboundEvent::Connected {
            working_dir: "/repo".to_string(),
            session_id: None,
        });
        ctx.submit_input("explain main.rs");
        ctx.apply_inbound(InboundEvent::Typing { status: true });
        ctx.apply_inbound(InboundEvent::TextDelta {
            content: "It ".to_string(),
        });
        ctx.apply_inbound(InboundEvent::TextDelta {
            content: "starts the server.".to_string(),
        });
        assert!(ctx.is_typing());
        ctx.apply_inbound(InboundEvent::Complete {
            content: String::new(),
            tool_uses: vec![],
        });

        let kinds: Vec<_> = ctx.transcript().entries().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EntryKind::System, EntryKind::User, EntryKind::Assistant]
        );
        assert_eq!(ctx.transcript().entries()[2].text, "It starts the server.");
        assert_eq!(ctx.working_dir(), Some("/repo"));
        assert!(!ctx.is_typing());
    }

    #[test]
    fn input_routing_covers_chat_forward_and_local() {
        let mut ctx = context();

        let chat = ctx.submit_input("/etc/hosts is odd");
        assert_eq!(
            chat,
            Some(OutboundEvent::Message {
                content: "/etc/hosts is odd".to_string(),
                mode: InteractionMode::Normal,
            })
        );

        let forwarded = ctx.submit_input("/Files --staged");
        assert_eq!(
            forwarded,
            Some(OutboundEvent::Command {
                command: "files".to_string(),
                args: vec!["--staged".to_string()],
            })
        );

        let help = ctx.submit_input("/help");
        assert!(help.is_none());
        let last = ctx.transcript().entries().last().expect("entry");
        assert_eq!(last.kind, EntryKind::System);
        assert!(last.text.contains("/compact"));

        assert_eq!(ctx.submit_input("   "), None);
    }

    #[test]
    fn clear_drops_transcript_and_tools() {
        let mut ctx = context();
        ctx.submit_input("hello");
        ctx.apply_inbound(InboundEvent::ToolUseStart {
            tool_id: "t1".to_string(),
            tool_name: "Bash".to_string(),
        });
        ctx.submit_input("/clear");
        assert!(ctx.transcript().is_empty());
        assert!(ctx.tools().is_empty());
    }

    #[test]
    fn plan_mode_captures_and_approves_plan() {
        let mut ctx = context();
        ctx.submit_input("/plan");
        assert_eq!(ctx.mode(), InteractionMode::Plan);

        let sent = ctx.submit_input("add a hero banner");
        assert_eq!(
            sent,
            Some(OutboundEvent::Message {
                content: "add a hero banner".to_string(),
                mode: InteractionMode::Plan,
            })
        );

        let applied = ctx.apply_inbound(InboundEvent::Response {
            content: "## Plan\n1. Create Hero.tsx\n2. Render it in App.tsx".to_string(),
        });
        assert!(applied.plan_updated);
        assert_eq!(ctx.plan().plan().map(|p| p.steps.len()), Some(2));
        assert!(ctx.update_plan_step("step-1", StepStatus::Completed));

        let approved = ctx.submit_input("/approve");
        assert_eq!(
            approved,
            Some(OutboundEvent::Message {
                content: PROCEED_MESSAGE.to_string(),
                mode: InteractionMode::Normal,
            })
        );
        assert!(ctx.submit_input("/approve").is_none());

        let later = ctx.apply_inbound(InboundEvent::Response {
            content: "Done:\n1. Created Hero.tsx".to_string(),
        });
        assert!(!later.plan_updated);

        ctx.submit_input("/plan");
        ctx.submit_input("/plan");
        assert!(ctx.plan().plan().is_none());
    }

    #[test]
    fn command_results_and_errors_are_recorded() {
        let mut ctx = context();
        ctx.apply_inbound(InboundEvent::CommandResult(CommandResultPayload {
            command: "status".to_string(),
            success: true,
            content: "On branch main".to_string(),
            data: None,
        }));
        ctx.apply_inbound(InboundEvent::CommandError {
            command: "cost".to_string(),
            error: "unavailable".to_string(),
        });

        let entries = ctx.transcript().entries();
        assert_eq!(entries[0].kind, EntryKind::CommandResult);
        assert_eq!(entries[0].text, "On branch main");
        assert!(entries[0].payload.is_some());
        assert_eq!(entries[1].kind, EntryKind::Error);
        assert_eq!(entries[1].text, "/cost: unavailable");
    }

    #[test]
    fn settings_revoke_and_clear_manage_grants() {
        let mut ctx = context();
        ctx.apply_inbound(permission_request("p1", ToolKind::Shell, None));
        ctx.resolve_permission("p1", true, PermissionScope::Always);
        ctx.apply_inbound(permission_request("p2", ToolKind::FileRead, None));
        ctx.resolve_permission("p2", true, PermissionScope::Session);

        assert!(ctx.submit_input("/settings").is_none());
        let listing = &ctx.transcript().entries().last().expect("listing").text;
        assert!(listing.contains("bash:* allow"));
        assert!(listing.contains("read:* allow"));

        ctx.submit_input("/settings revoke bash");
        assert_eq!(ctx.broker().check(ToolKind::Shell, None), GrantDecision::Unknown);

        ctx.submit_input("/settings clear session");
        assert_eq!(ctx.broker().check(ToolKind::FileRead, None), GrantDecision::Unknown);

        ctx.submit_input("/settings revoke teleport");
        assert_eq!(
            ctx.transcript().entries().last().map(|e| e.kind),
            Some(EntryKind::Error)
        );
    }

    #[test]
    fn dropping_the_connection_stops_typing() {
        let mut ctx = context();
        ctx.set_connection_state(ConnectionState::Connected);
        ctx.apply_inbound(InboundEvent::Typing { status: true });
        ctx.set_connection_state(ConnectionState::Disconnected);
        assert!(!ctx.is_typing());
        assert_eq!(ctx.connection(), ConnectionState::Disconnected);
    }
}
