mod config;
mod logging;
mod render;

use anyhow::{Context, Result};
use clap::Parser;
use config::{load_config, Args};
use render::Renderer;
use std::io::{self, Stdout};
use steward_channel::{ChannelEvent, SessionChannel};
use steward_core::{
    FileGrantBackend, OutboundEvent, PermissionBroker, PermissionScope, PersistentGrants,
    SessionContext,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config(Args::parse())?;
    let log_guard = logging::init_logging(&config);
    let log_file = log_guard
        .as_ref()
        .and_then(|guard| guard.path.as_ref())
        .map(|path| path.display().to_string())
        .unwrap_or_default();
    info!(
        session_id = %config.session_id,
        log_file = %log_file,
        base_url = %config.channel.base_url,
        grants_file = %config.grants_file.display(),
        "console_start"
    );

    let grants = PersistentGrants::open(FileGrantBackend::new(&config.grants_file));
    let mut ctx = SessionContext::new(config.session_id.clone(), PermissionBroker::new(grants));
    let (mut channel, mut events) = SessionChannel::new(config.channel.clone());
    let mut renderer = Renderer::new(io::stdout());

    channel
        .open(&config.session_id)
        .await
        .context("failed to open session channel")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => on_line(&mut ctx, &channel, &mut renderer, &line)?,
                Ok(None) => break,
                Err(err) => {
                    warn!("stdin_read_error: {err}");
                    break;
                }
            },
            event = events.recv() => match event {
                Some(event) => on_channel_event(&mut ctx, &channel, &mut renderer, event)?,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    ctx.end_session();
    channel.close().await;
    info!(session_id = %config.session_id, "console_exit");
    Ok(())
}

fn on_line(
    ctx: &mut SessionContext,
    channel: &SessionChannel,
    renderer: &mut Renderer<Stdout>,
    line: &str,
) -> Result<()> {
    if let Some(request_id) = ctx.current_permission().map(|r| r.id.clone()) {
        if let Some((allowed, scope)) = parse_answer(line) {
            if let Some(response) = ctx.resolve_permission(&request_id, allowed, scope) {
                deliver(channel, renderer, response)?;
            }
            renderer.sync(ctx)?;
            return Ok(());
        }
    }

    let outbound = ctx.submit_input(line);
    renderer.sync(ctx)?;
    if let Some(event) = outbound {
        deliver(channel, renderer, event)?;
    }
    Ok(())
}

fn on_channel_event(
    ctx: &mut SessionContext,
    channel: &SessionChannel,
    renderer: &mut Renderer<Stdout>,
    event: ChannelEvent,
) -> Result<()> {
    match event {
        ChannelEvent::State { state, .. } => {
            ctx.set_connection_state(state);
            renderer.connection(state)?;
        }
        ChannelEvent::Inbound { event, .. } => {
            let applied = ctx.apply_inbound(event);
            if let Some((tool_id, update)) = &applied.tool {
                if let Some(tool) = ctx.tools().get(tool_id) {
                    renderer.tool(tool, *update)?;
                }
            }
            for response in applied.outbound {
                deliver(channel, renderer, response)?;
            }
            if applied.plan_updated {
                renderer.sync(ctx)?;
                if let Some(plan) = ctx.plan().plan() {
                    renderer.plan(plan)?;
                }
            }
        }
    }
    renderer.sync(ctx)?;
    Ok(())
}

fn deliver(
    channel: &SessionChannel,
    renderer: &mut Renderer<Stdout>,
    event: OutboundEvent,
) -> Result<()> {
    if !channel.send(event) {
        renderer.notice("not connected; nothing was sent")?;
    }
    Ok(())
}

/// Single-key answers to the current permission prompt.
fn parse_answer(line: &str) -> Option<(bool, PermissionScope)> {
    match line.trim() {
        "y" | "Y" => Some((true, PermissionScope::Once)),
        "s" | "S" => Some((true, PermissionScope::Session)),
        "a" | "A" => Some((true, PermissionScope::Always)),
        "n" => Some((false, PermissionScope::Once)),
        "N" => Some((false, PermissionScope::Always)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_answers_map_to_scopes() {
        assert_eq!(parse_answer("y"), Some((true, PermissionScope::Once)));
        assert_eq!(parse_answer(" s "), Some((true, PermissionScope::Session)));
        assert_eq!(parse_answer("a"), Some((true, PermissionScope::Always)));
        assert_eq!(parse_answer("n"), Some((false, PermissionScope::Once)));
        assert_eq!(parse_answer("N"), Some((false, PermissionScope::Always)));
        assert_eq!(parse_answer("yes please"), None);
        assert_eq!(parse_answer("/help"), None);
    }
}
