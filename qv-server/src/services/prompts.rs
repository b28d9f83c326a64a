//! System prompts for code generation

use super::agents::Agent;

pub const GENERATION_INSTRUCTIONS: &str = "You are QuickVibe, an expert web developer who turns \
app descriptions into working software. Always answer with ONE complete, self-contained HTML file: \
inline all CSS in a <style> tag and all JavaScript in a <script> tag, with no build step and no \
external files except well-known CDN links when unavoidable. Put the whole document in a single \
```html fenced code block. Before the block, write at most two sentences describing what you \
built or changed. When the user asks for a change, return the full updated file, not a diff.";

/// Base instructions, then the agent persona, then the project type
pub fn generation_system_prompt(agent: Option<&Agent>, project_type: Option<&str>) -> String {
    let mut prompt = GENERATION_INSTRUCTIONS.to_string();

    if let Some(agent) = agent {
        prompt.push_str("\n\n");
        prompt.push_str(agent.system_prompt);
    }

    if let Some(project_type) = project_type.map(str::trim).filter(|t| !t.is_empty()) {
        prompt.push_str("\n\nProject type: ");
        prompt.push_str(project_type);
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::agents::find_agent;

    #[test]
    fn test_prompt_layers() {
        let agent = find_agent("game-developer");
        let prompt = generation_system_prompt(agent, Some("game"));
        assert!(prompt.starts_with(GENERATION_INSTRUCTIONS));
        assert!(prompt.contains("requestAnimationFrame"));
        assert!(prompt.ends_with("Project type: game"));

        assert_eq!(generation_system_prompt(None, Some("  ")), GENERATION_INSTRUCTIONS);
    }
}
