//! Cycle prompt composition.

use std::path::Path;

use anyhow::{Result, anyhow};
use minijinja::{Environment, context};

use super::fs_util::read_optional;

const CYCLE_TEMPLATE: &str = include_str!("prompts/cycle.md");

/// Everything the agent sees for one cycle.
#[derive(Debug, Clone)]
pub struct PromptInputs {
    /// Static instructions from `PROMPT.md`.
    pub base: String,
    /// Consensus text, or the first-run placeholder.
    pub consensus: String,
    /// Text of the approved idea, when one is active.
    pub idea: Option<String>,
    pub cycle: u64,
}

impl PromptInputs {
    /// Read `PROMPT.md`; a missing file fails the cycle.
    pub fn load_base(prompt_path: &Path) -> Result<String> {
        read_optional(prompt_path)?
            .ok_or_else(|| anyhow!("PROMPT.md not found at {}", prompt_path.display()))
    }
}

pub struct PromptBuilder {
    env: Environment<'static>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_keep_trailing_newline(true);
        env.add_template("cycle", CYCLE_TEMPLATE)
            .expect("cycle template should be valid");
        Self { env }
    }

    pub fn render(&self, input: &PromptInputs) -> Result<String> {
        let template = self.env.get_template("cycle")?;
        let rendered = template.render(context! {
            base => input.base.trim_end(),
            consensus => input.consensus.trim_end(),
            idea => input.idea.as_deref().map(str::trim).filter(|s| !s.is_empty()),
            cycle => input.cycle,
        })?;
        Ok(rendered)
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(idea: Option<&str>) -> PromptInputs {
        PromptInputs {
            base: "You are the company.\n".to_string(),
            consensus: "## Next Action\nship it\n".to_string(),
            idea: idea.map(str::to_string),
            cycle: 7,
        }
    }

    #[test]
    fn sections_render_in_order() {
        let prompt = PromptBuilder::new()
            .render(&inputs(Some("add billing")))
            .expect("render");
        let base = prompt.find("You are the company.").expect("base");
        let guard = prompt.find("## Runtime Guardrails").expect("guardrails");
        let consensus = prompt.find("ship it").expect("consensus");
        let idea = prompt.find("add billing").expect("idea");
        let footer = prompt
            .find("This is Cycle #7. Act decisively.")
            .expect("footer");
        assert!(base < guard && guard < consensus && consensus < idea && idea < footer);
    }

    #[test]
    fn idea_section_is_omitted_without_idea() {
        let prompt = PromptBuilder::new().render(&inputs(None)).expect("render");
        assert!(!prompt.contains("Approved Idea"));
        let prompt = PromptBuilder::new()
            .render(&inputs(Some("  ")))
            .expect("render");
        assert!(!prompt.contains("Approved Idea"));
    }

    #[test]
    fn missing_prompt_file_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = PromptInputs::load_base(&temp.path().join("PROMPT.md")).unwrap_err();
        assert!(err.to_string().contains("PROMPT.md not found"));
    }
}
