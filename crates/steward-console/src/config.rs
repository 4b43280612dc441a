use anyhow::{bail, Context, Result};
use clap::Parser;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use steward_channel::ChannelConfig;
use url::Url;

const DEFAULT_BASE_URL: &str = "ws://127.0.0.1:8000/ws";

#[derive(Parser, Debug)]
#[command(name = "steward", version, about = "Operator console for a remote coding-agent session")]
pub struct Args {
    /// Session id returned by the agent backend when the session was created.
    #[arg(long, default_value = "")]
    pub session: String,
    /// WebSocket base, e.g. ws://host:8000/ws; `/chat/<session>` is appended.
    #[arg(long, default_value = "")]
    pub base_url: String,
    #[arg(long, default_value = "")]
    pub grants_file: String,
    #[arg(long, default_value = "")]
    pub log_dir: String,
    #[arg(long, default_value_t = 30)]
    pub heartbeat_interval: u64,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub session_id: String,
    pub channel: ChannelConfig,
    pub grants_file: PathBuf,
    pub log_dir: String,
    pub log_stdout: bool,
}

pub fn load_config(args: Args) -> Result<RuntimeConfig> {
    let session_id = resolve_session_id(&args.session)?;
    let base_url = resolve_base_url(&args.base_url)?;
    let mut channel = ChannelConfig::new(base_url);
    channel.heartbeat_interval = Duration::from_secs(args.heartbeat_interval.max(1));
    channel
        .endpoint(&session_id)
        .context("invalid session endpoint")?;

    Ok(RuntimeConfig {
        session_id,
        channel,
        grants_file: resolve_grants_file(&args.grants_file),
        log_dir: resolve_log_dir(&args.log_dir),
        log_stdout: resolve_log_stdout(),
    })
}

fn flag_or_env(flag: &str, var: &str) -> Option<String> {
    if !flag.trim().is_empty() {
        return Some(flag.trim().to_string());
    }
    env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn resolve_session_id(flag: &str) -> Result<String> {
    match flag_or_env(flag, "STEWARD_SESSION_ID") {
        Some(id) => Ok(id),
        None => bail!("missing session id: pass --session or set STEWARD_SESSION_ID"),
    }
}

fn resolve_base_url(flag: &str) -> Result<String> {
    let raw = flag_or_env(flag, "STEWARD_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    let url = Url::parse(&raw).with_context(|| format!("invalid base url: {raw}"))?;
    Ok(url.to_string())
}

fn resolve_grants_file(flag: &str) -> PathBuf {
    if let Some(path) = flag_or_env(flag, "STEWARD_GRANTS_FILE") {
        return PathBuf::from(path);
    }
    dirs::data_dir()
        .map(|dir| dir.join("steward"))
        .unwrap_or_else(|| PathBuf::from(".steward"))
        .join("grants.json")
}

fn resolve_log_dir(flag: &str) -> String {
    flag_or_env(flag, "STEWARD_LOG_DIR").unwrap_or_else(|| ".steward/logs".to_string())
}

fn resolve_log_stdout() -> bool {
    env::var("STEWARD_LOG_STDOUT")
        .ok()
        .and_then(|value| parse_bool_env(&value))
        .unwrap_or(false)
}

pub fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" | "off" | "OFF" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(session: &str, base_url: &str) -> Args {
        Args {
            session: session.to_string(),
            base_url: base_url.to_string(),
            grants_file: "/tmp/steward-test/grants.json".to_string(),
            log_dir: "/tmp/steward-test/logs".to_string(),
            heartbeat_interval: 0,
        }
    }

    #[test]
    fn flags_win_over_defaults() {
        let config = load_config(args("s-42", "wss://agent.example.com/ws")).expect("config");
        assert_eq!(config.session_id, "s-42");
        assert_eq!(config.channel.base_url, "wss://agent.example.com/ws");
        assert_eq!(config.channel.heartbeat_interval, Duration::from_secs(1));
        assert_eq!(config.grants_file, PathBuf::from("/tmp/steward-test/grants.json"));
        assert_eq!(config.log_dir, "/tmp/steward-test/logs");
    }

    #[test]
    fn non_websocket_base_url_is_rejected() {
        assert!(load_config(args("s-42", "http://agent.example.com/ws")).is_err());
        assert!(load_config(args("s-42", "::not a url")).is_err());
    }

    #[test]
    fn bool_env_values() {
        assert_eq!(parse_bool_env(" yes "), Some(true));
        assert_eq!(parse_bool_env("OFF"), Some(false));
        assert_eq!(parse_bool_env("maybe"), None);
    }
}
