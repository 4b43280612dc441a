use crate::protocol::InteractionMode;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::InProgress => "in_progress",
            StepStatus::Completed => "completed",
            StepStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub description: String,
    pub status: StepStatus,
}

impl PlanStep {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            status: StepStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Plan {
    pub content: String,
    pub steps: Vec<PlanStep>,
    pub approved: bool,
}

/// Plan-mode state for one session. A plan only exists while the mode is
/// `Plan`, and leaving plan mode drops it wholesale.
#[derive(Debug, Default)]
pub struct PlanWorkflow {
    mode: InteractionMode,
    plan: Option<Plan>,
}

impl PlanWorkflow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> InteractionMode {
        self.mode
    }

    pub fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    pub fn toggle_mode(&mut self) -> InteractionMode {
        self.mode = self.mode.toggled();
        if self.mode == InteractionMode::Normal {
            self.plan = None;
        }
        self.mode
    }

    /// Replaces the current plan. Ignored outside plan mode.
    pub fn set_plan(&mut self, content: impl Into<String>, steps: Vec<PlanStep>) -> bool {
        if self.mode != InteractionMode::Plan {
            return false;
        }
        self.plan = Some(Plan {
            content: content.into(),
            steps,
            approved: false,
        });
        true
    }

    pub fn update_step_status(&mut self, step_id: &str, status: StepStatus) -> bool {
        let Some(step) = self
            .plan
            .as_mut()
            .and_then(|plan| plan.steps.iter_mut().find(|step| step.id == step_id))
        else {
            return false;
        };
        step.status = status;
        true
    }

    /// True only on the unapproved -> approved transition.
    pub fn approve(&mut self) -> bool {
        match self.plan.as_mut() {
            Some(plan) if !plan.approved => {
                plan.approved = true;
                true
            }
            _ => false,
        }
    }

    pub fn reset(&mut self) {
        self.plan = None;
    }
}

fn numbered_item() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d+)[.)]\s+(.+?)\s*$").expect("valid plan item regex"))
}

fn plan_heading() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(#{1,6}\s*|\*\*)?(implementation\s+)?plan\b")
            .expect("valid heading regex")
    })
}

/// Extracts the numbered steps of an agent's `## Plan` section. Without a
/// heading, the first numbered list in the text is used. Steps stop at the
/// next heading after the list has started.
pub fn parse_plan(text: &str) -> Option<Vec<PlanStep>> {
    let has_heading = text.lines().any(|line| plan_heading().is_match(line));
    let mut in_section = !has_heading;
    let mut steps = Vec::new();

    for line in text.lines() {
        if has_heading && !in_section {
            in_section = plan_heading().is_match(line);
            continue;
        }
        if line.trim_start().starts_with('#') {
            if steps.is_empty() {
                continue;
            }
            break;
        }
        if let Some(captures) = numbered_item().captures(line) {
            let description = captures[2].trim();
            let id = format!("step-{}", steps.len() + 1);
            steps.push(PlanStep::new(id, description));
        }
    }

    if steps.is_empty() {
        None
    } else {
        Some(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_mode() -> PlanWorkflow {
        let mut workflow = PlanWorkflow::new();
        workflow.toggle_mode();
        workflow
    }

    #[test]
    fn entering_plan_mode_does_not_create_plan() {
        let workflow = plan_mode();
        assert_eq!(workflow.mode(), InteractionMode::Plan);
        assert!(workflow.plan().is_none());
    }

    #[test]
    fn set_plan_is_ignored_in_normal_mode() {
        let mut workflow = PlanWorkflow::new();
        assert!(!workflow.set_plan("## Plan", vec![PlanStep::new("step-1", "a")]));
        assert!(workflow.plan().is_none());
    }

    #[test]
    fn toggling_out_and_back_yields_empty_plan() {
        let mut workflow = plan_mode();
        workflow.set_plan(
            "## Plan\n1. one\n2. two",
            vec![PlanStep::new("step-1", "one"), PlanStep::new("step-2", "two")],
        );
        workflow.approve();
        assert_eq!(workflow.toggle_mode(), InteractionMode::Normal);
        assert!(workflow.plan().is_none());
        assert_eq!(workflow.toggle_mode(), InteractionMode::Plan);
        assert!(workflow.plan().is_none());
    }

    #[test]
    fn approval_is_one_way_and_idempotent() {
        let mut workflow = plan_mode();
        assert!(!workflow.approve());
        workflow.set_plan("plan", vec![PlanStep::new("step-1", "one")]);
        assert!(workflow.approve());
        assert!(!workflow.approve());
        assert!(workflow.plan().expect("plan").approved);
    }

    #[test]
    fn step_updates_on_unknown_ids_are_no_ops() {
        let mut workflow = plan_mode();
        assert!(!workflow.update_step_status("step-1", StepStatus::Completed));
        workflow.set_plan("plan", vec![PlanStep::new("step-1", "one")]);
        assert!(workflow.update_step_status("step-1", StepStatus::InProgress));
        assert!(!workflow.update_step_status("step-9", StepStatus::Completed));
        let plan = workflow.plan().expect("plan");
        assert_eq!(plan.steps[0].status, StepStatus::InProgress);
    }

    #[test]
    fn reset_keeps_mode() {
        let mut workflow = plan_mode();
        workflow.set_plan("plan", vec![]);
        workflow.reset();
        assert!(workflow.plan().is_none());
        assert_eq!(workflow.mode(), InteractionMode::Plan);
    }

    #[test]
    fn parses_numbered_items_under_plan_heading() {
        let text = "I looked at the repo.\n\n1. not part of the plan\n\n## Plan\n1. Add a `Hero` component\n2) Wire it into **App.tsx**\n   3. Update tests\n\n## Notes\n4. ignored";
        let steps = parse_plan(text).expect("steps");
        let descriptions: Vec<_> = steps.iter().map(|s| s.description.as_str()).collect();
        assert_eq!(
            descriptions,
            vec![
                "Add a `Hero` component",
                "Wire it into **App.tsx**",
                "Update tests"
            ]
        );
        assert_eq!(steps[2].id, "step-3");
        assert!(steps.iter().all(|s| s.status == StepStatus::Pending));
    }

    #[test]
    fn parses_bare_numbered_list_and_rejects_prose() {
        let steps = parse_plan("Steps:\n1. Read config\n2. Patch loader").expect("steps");
        assert_eq!(steps.len(), 2);
        assert!(parse_plan("All done, nothing to plan.").is_none());
    }
}
