use chrono::Local;
use std::io::{self, Write};
use steward_core::permissions::PermissionRequest;
use steward_core::{
    ConnectionState, EntryKind, InteractionMode, Plan, SessionContext, StepStatus, ToolStatus,
    ToolUpdate, ToolUse, TranscriptEntry,
};

/// Line-oriented view of a session. Tracks what it has already printed so
/// each `sync` only writes what changed.
pub struct Renderer<W: Write> {
    out: W,
    cursor: usize,
    prompted: Option<String>,
    typing: bool,
    mode: InteractionMode,
    streamed: String,
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            cursor: 0,
            prompted: None,
            typing: false,
            mode: InteractionMode::Normal,
            streamed: String::new(),
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn sync(&mut self, ctx: &SessionContext) -> io::Result<()> {
        let transcript = ctx.transcript();
        if transcript.len() < self.cursor {
            self.end_stream(None)?;
            writeln!(self.out, "--- transcript cleared ---")?;
            self.cursor = 0;
        }
        for entry in transcript.entries_since(self.cursor) {
            if !self.end_stream(Some(entry))? {
                write_entry(&mut self.out, entry)?;
            }
        }
        self.cursor = transcript.len();
        match transcript.streaming_text() {
            Some(text) if !text.is_empty() => self.stream(text)?,
            _ => {
                self.end_stream(None)?;
            }
        }

        if ctx.mode() != self.mode {
            self.mode = ctx.mode();
            writeln!(self.out, "[mode: {}]", self.mode)?;
        }

        if ctx.is_typing() && !self.typing {
            writeln!(self.out, "... agent is working")?;
        }
        self.typing = ctx.is_typing();

        let current = ctx.current_permission();
        if current.map(|r| &r.id) != self.prompted.as_ref() {
            if let Some(request) = current {
                write_prompt(&mut self.out, request, ctx.broker().pending_len())?;
            }
            self.prompted = current.map(|r| r.id.clone());
        }
        self.out.flush()
    }

    pub fn connection(&mut self, state: ConnectionState) -> io::Result<()> {
        let marker = match state {
            ConnectionState::Connected => "●",
            ConnectionState::Connecting => "◌",
            ConnectionState::Disconnected | ConnectionState::Error => "○",
        };
        writeln!(self.out, "[{marker} {state}]")?;
        self.out.flush()
    }

    pub fn tool(&mut self, tool: &ToolUse, update: ToolUpdate) -> io::Result<()> {
        if update == ToolUpdate::Ignored {
            return Ok(());
        }
        let target = tool
            .path
            .as_deref()
            .or(tool.command.as_deref())
            .unwrap_or("");
        match tool.status {
            ToolStatus::Pending | ToolStatus::Running => {
                writeln!(self.out, "  > {} {target}", tool.name)?;
            }
            ToolStatus::Completed => writeln!(self.out, "  ✓ {} {target}", tool.name)?,
            ToolStatus::Error => {
                let reason = tool.error.as_deref().unwrap_or("failed");
                writeln!(self.out, "  ✗ {} {target}: {reason}", tool.name)?;
            }
        }
        self.out.flush()
    }

    pub fn plan(&mut self, plan: &Plan) -> io::Result<()> {
        writeln!(self.out, "┌ plan, {} steps", plan.steps.len())?;
        for (index, step) in plan.steps.iter().enumerate() {
            let mark = match step.status {
                StepStatus::Pending => " ",
                StepStatus::InProgress => ">",
                StepStatus::Completed => "✓",
                StepStatus::Skipped => "-",
            };
            writeln!(self.out, "│ [{mark}] {}. {}", index + 1, step.description)?;
        }
        if plan.approved {
            writeln!(self.out, "└ approved")?;
        } else {
            writeln!(self.out, "└ /approve to proceed, /plan to drop it")?;
        }
        self.out.flush()
    }

    pub fn notice(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "! {text}")?;
        self.out.flush()
    }

    /// Prints whatever the streaming buffer gained since the last call.
    fn stream(&mut self, text: &str) -> io::Result<()> {
        if !text.starts_with(self.streamed.as_str()) {
            self.end_stream(None)?;
        }
        if self.streamed.is_empty() {
            let at = Local::now().format("%H:%M:%S");
            write!(self.out, "{at} {:>6} | ", "agent")?;
        }
        write!(self.out, "{}", &text[self.streamed.len()..])?;
        self.streamed = text.to_string();
        Ok(())
    }

    /// Closes an open streamed line. True when `entry` is the finished form
    /// of what was streamed, which then needs no second print.
    fn end_stream(&mut self, entry: Option<&TranscriptEntry>) -> io::Result<bool> {
        if self.streamed.is_empty() {
            return Ok(false);
        }
        writeln!(self.out)?;
        let shown =
            entry.is_some_and(|e| e.kind == EntryKind::Assistant && e.text == self.streamed);
        self.streamed.clear();
        Ok(shown)
    }
}

fn write_entry(out: &mut impl Write, entry: &TranscriptEntry) -> io::Result<()> {
    let at = entry.created_at.with_timezone(&Local).format("%H:%M:%S");
    let label = match entry.kind {
        EntryKind::User => "you",
        EntryKind::Assistant => "agent",
        EntryKind::System => "system",
        EntryKind::Error => "error",
        EntryKind::CommandResult => "result",
    };
    let mut lines = entry.text.lines();
    writeln!(out, "{at} {label:>6} | {}", lines.next().unwrap_or(""))?;
    for line in lines {
        writeln!(out, "{:>15} | {line}", "")?;
    }
    Ok(())
}

fn write_prompt(
    out: &mut impl Write,
    request: &PermissionRequest,
    pending: usize,
) -> io::Result<()> {
    writeln!(out, "┌ permission needed: {} ({})", request.description, request.tool.label())?;
    if let Some(path) = &request.path {
        writeln!(out, "│ path: {path}")?;
    }
    if let Some(command) = &request.command {
        writeln!(out, "│ command: {command}")?;
    }
    if pending > 1 {
        writeln!(out, "│ {} more waiting", pending - 1)?;
    }
    writeln!(
        out,
        "└ [y] allow once  [s] allow for session  [a] always allow  [n] deny  [N] always deny"
    )
}
