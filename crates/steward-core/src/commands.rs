use crate::protocol::OutboundEvent;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerClass {
    Local,
    Forwarded,
}

/// Client-side commands. Forwarded commands have no variant here; they leave
/// the process as an outbound `command` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalCommand {
    Help,
    Clear,
    TogglePlan,
    Approve,
    Settings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlashCommand {
    pub name: &'static str,
    pub description: &'static str,
    pub shortcut: Option<&'static str>,
    pub handler: HandlerClass,
    pub icon: &'static str,
    pub keywords: &'static [&'static str],
}

impl SlashCommand {
    pub fn local_action(&self) -> Option<LocalCommand> {
        if self.handler != HandlerClass::Local {
            return None;
        }
        match self.name {
            "help" => Some(LocalCommand::Help),
            "clear" => Some(LocalCommand::Clear),
            "plan" => Some(LocalCommand::TogglePlan),
            "approve" => Some(LocalCommand::Approve),
            "settings" => Some(LocalCommand::Settings),
            _ => None,
        }
    }

    fn matches_prefix(&self, prefix: &str) -> bool {
        self.name.starts_with(prefix) || self.keywords.iter().any(|kw| kw.starts_with(prefix))
    }
}

impl fmt::Display for SlashCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.name)
    }
}

pub const COMMANDS: &[SlashCommand] = &[
    SlashCommand {
        name: "help",
        description: "Show available commands",
        shortcut: Some("?"),
        handler: HandlerClass::Local,
        icon: "?",
        keywords: &["commands", "usage"],
    },
    SlashCommand {
        name: "clear",
        description: "Clear the transcript and tool history",
        shortcut: Some("Ctrl+L"),
        handler: HandlerClass::Local,
        icon: "x",
        keywords: &["reset", "new"],
    },
    SlashCommand {
        name: "plan",
        description: "Toggle plan mode",
        shortcut: Some("Shift+Tab"),
        handler: HandlerClass::Local,
        icon: "#",
        keywords: &["mode", "toggle"],
    },
    SlashCommand {
        name: "approve",
        description: "Approve the current plan and let the agent proceed",
        shortcut: None,
        handler: HandlerClass::Local,
        icon: "+",
        keywords: &["accept", "proceed"],
    },
    SlashCommand {
        name: "settings",
        description: "Show or revoke permission grants",
        shortcut: Some("Ctrl+,"),
        handler: HandlerClass::Local,
        icon: "*",
        keywords: &["config", "permissions", "grants"],
    },
    SlashCommand {
        name: "status",
        description: "Show session status",
        shortcut: None,
        handler: HandlerClass::Forwarded,
        icon: "i",
        keywords: &["session", "info"],
    },
    SlashCommand {
        name: "files",
        description: "List changed files in the working tree",
        shortcut: None,
        handler: HandlerClass::Forwarded,
        icon: "~",
        keywords: &["git", "changes", "diff"],
    },
    SlashCommand {
        name: "compact",
        description: "Summarize the conversation to free context",
        shortcut: None,
        handler: HandlerClass::Forwarded,
        icon: "=",
        keywords: &["summarize"],
    },
    SlashCommand {
        name: "cost",
        description: "Show token usage for this session",
        shortcut: None,
        handler: HandlerClass::Forwarded,
        icon: "$",
        keywords: &["usage", "tokens"],
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub name: String,
    pub args: Vec<String>,
}

/// Where a line of operator input ends up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Local {
        command: LocalCommand,
        args: Vec<String>,
    },
    Forward(OutboundEvent),
    Chat(String),
}

pub fn is_command_input(text: &str) -> bool {
    text.trim_start().starts_with('/')
}

/// Autocomplete candidates, in table order. Both names and keywords count.
pub fn match_prefix(prefix: &str) -> Vec<&'static SlashCommand> {
    let prefix = prefix.trim().trim_start_matches('/').to_lowercase();
    COMMANDS
        .iter()
        .filter(|command| command.matches_prefix(&prefix))
        .collect()
}

pub fn parse(text: &str) -> Option<ParsedCommand> {
    let body = text.trim_start().strip_prefix('/')?;
    let mut tokens = body.split_whitespace();
    let name = tokens.next()?.to_lowercase();
    Some(ParsedCommand {
        name,
        args: tokens.map(str::to_string).collect(),
    })
}

pub fn resolve(name: &str) -> Option<&'static SlashCommand> {
    let name = name.trim_start_matches('/').to_lowercase();
    COMMANDS.iter().find(|command| command.name == name)
}

/// Unknown `/tokens` fall through to chat so paths like `/etc/hosts` stay
/// sendable.
pub fn route(text: &str) -> Route {
    let Some(parsed) = parse(text) else {
        return Route::Chat(text.to_string());
    };
    let Some(command) = resolve(&parsed.name) else {
        return Route::Chat(text.to_string());
    };
    match command.local_action() {
        Some(local) => Route::Local {
            command: local,
            args: parsed.args,
        },
        None => Route::Forward(OutboundEvent::Command {
            command: command.name.to_string(),
            args: parsed.args,
        }),
    }
}

pub fn help_text() -> String {
    let mut lines = vec!["Available commands:".to_string()];
    for command in COMMANDS {
        let mut line = format!("  {:<10} {}", command.to_string(), command.description);
        if let Some(shortcut) = command.shortcut {
            line.push_str(&format!(" ({shortcut})"));
        }
        if command.handler == HandlerClass::Forwarded {
            line.push_str(" [agent]");
        }
        lines.push(line);
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_input_requires_leading_slash_after_whitespace() {
        assert!(is_command_input("/help"));
        assert!(is_command_input("   /status"));
        assert!(!is_command_input("help /me"));
        assert!(!is_command_input(""));
    }

    #[test]
    fn parse_lowercases_name_and_splits_args() {
        let parsed = parse("/Status arg1").expect("parsed");
        assert_eq!(parsed.name, "status");
        assert_eq!(parsed.args, vec!["arg1".to_string()]);
        assert_eq!(resolve(&parsed.name).map(|c| c.name), Some("status"));

        let parsed = parse("  /settings   revoke  bash ").expect("parsed");
        assert_eq!(parsed.args, vec!["revoke".to_string(), "bash".to_string()]);
        assert!(parse("/").is_none());
        assert!(parse("hello").is_none());
    }

    #[test]
    fn unknown_command_falls_back_to_chat() {
        assert!(parse("/nonexistent").is_some());
        assert!(resolve("nonexistent").is_none());
        assert_eq!(
            route("/nonexistent"),
            Route::Chat("/nonexistent".to_string())
        );
        assert_eq!(
            route("/etc/hosts looks wrong"),
            Route::Chat("/etc/hosts looks wrong".to_string())
        );
    }

    #[test]
    fn forwarded_commands_become_outbound_events() {
        assert_eq!(
            route("/COMPACT now"),
            Route::Forward(OutboundEvent::Command {
                command: "compact".to_string(),
                args: vec!["now".to_string()],
            })
        );
    }

    #[test]
    fn local_commands_stay_local() {
        assert_eq!(
            route("/plan"),
            Route::Local {
                command: LocalCommand::TogglePlan,
                args: vec![],
            }
        );
        assert!(COMMANDS
            .iter()
            .filter(|c| c.handler == HandlerClass::Local)
            .all(|c| c.local_action().is_some()));
    }

    #[test]
    fn prefix_matches_names_and_keywords() {
        let names = |prefix: &str| -> Vec<&str> {
            match_prefix(prefix).iter().map(|c| c.name).collect()
        };
        assert_eq!(names("/co"), vec!["help", "settings", "compact", "cost"]);
        assert_eq!(names("/cos"), vec!["cost"]);
        assert_eq!(names("git"), vec!["files"]);
        assert_eq!(names("USA"), vec!["help", "cost"]);
        assert_eq!(names("").len(), COMMANDS.len());
        assert!(names("zzz").is_empty());
    }

    #[test]
    fn help_lists_every_command() {
        let help = help_text();
        for command in COMMANDS {
            assert!(help.contains(&format!("/{}", command.name)));
        }
    }
}
