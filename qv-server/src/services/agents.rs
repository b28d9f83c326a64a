//! Agent catalog and agent selection
//!
//! Agents are personas: a system prompt that specializes the LLM for one
//! concern of the generated app. The catalog is static.

use serde::Serialize;
use tracing::{debug, warn};

use super::llm::{LlmClient, LlmRequest, Usage};

pub const DEFAULT_MAX_AGENTS: usize = 3;
pub const MAX_AGENTS_LIMIT: usize = 5;

/// Selection used when neither the LLM nor keyword scoring picks anything
pub const DEFAULT_AGENTS: [&str; 2] = ["ui-designer", "frontend-architect"];

#[derive(Debug, Clone, Serialize)]
pub struct Agent {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub category: &'static str,
    pub capabilities: &'static [&'static str],
    pub icon: &'static str,
    #[serde(skip_serializing)]
    pub keywords: &'static [&'static str],
    #[serde(skip_serializing)]
    pub system_prompt: &'static str,
}

pub static AGENTS: &[Agent] = &[
    Agent {
        id: "frontend-architect",
        name: "Frontend Architect",
        description: "Expert in component architecture and modern frontend structure",
        category: "Frontend",
        capabilities: &["Component architecture", "State management", "Performance optimization"],
        icon: "🏗️",
        keywords: &["component", "state", "react", "vue", "spa", "interactive", "frontend", "app"],
        system_prompt: "You are a senior frontend architect. Structure the app into clear, \
reusable pieces, keep state in one place, wire events cleanly and keep the JavaScript readable.",
    },
    Agent {
        id: "backend-architect",
        name: "Backend Architect",
        description: "Specializes in API design and application data flow",
        category: "Backend",
        capabilities: &["API design", "Microservices", "Database architecture"],
        icon: "⚙️",
        keywords: &["api", "server", "backend", "fetch", "endpoint", "auth", "login", "rest"],
        system_prompt: "You are a senior backend architect. Design the data flow and any API \
interactions; where a real server is unavailable, simulate it in the browser with a small, \
well-defined service layer.",
    },
    Agent {
        id: "database-architect",
        name: "Database Architect",
        description: "Expert in data modeling and client-side persistence",
        category: "Database",
        capabilities: &["Schema design", "Query optimization", "Data modeling"],
        icon: "🗄️",
        keywords: &["database", "data", "store", "storage", "save", "persist", "crud", "inventory", "list"],
        system_prompt: "You are a database architect. Model the app's data explicitly, persist it \
with localStorage or IndexedDB, and keep reads and writes behind small helper functions.",
    },
    Agent {
        id: "ui-designer",
        name: "UI/UX Designer",
        description: "Creates beautiful, intuitive user interfaces",
        category: "Design",
        capabilities: &["UI design", "User experience", "Design systems"],
        icon: "🎨",
        keywords: &["design", "ui", "ux", "beautiful", "modern", "style", "theme", "layout", "landing", "color"],
        system_prompt: "You are a UI/UX designer. Give the app a cohesive visual language: spacing \
scale, typography, color palette, responsive layout and polished interaction states.",
    },
    Agent {
        id: "devops-engineer",
        name: "DevOps Engineer",
        description: "Build, deployment and runtime reliability specialist",
        category: "DevOps",
        capabilities: &["CI/CD pipelines", "Container orchestration", "Infrastructure as code"],
        icon: "🚀",
        keywords: &["deploy", "docker", "pipeline", "monitor", "dashboard", "logs", "uptime", "devops"],
        system_prompt: "You are a DevOps engineer. Make the app robust at runtime: graceful error \
handling, offline behavior, sensible configuration and nothing that breaks when served as a \
static file.",
    },
    Agent {
        id: "accessibility-expert",
        name: "Accessibility Expert",
        description: "Ensures apps are usable by everyone",
        category: "Quality",
        capabilities: &["WCAG compliance", "Keyboard navigation", "Screen reader support"],
        icon: "♿",
        keywords: &["accessible", "accessibility", "a11y", "keyboard", "screen reader", "contrast", "form"],
        system_prompt: "You are an accessibility expert. Use semantic HTML, labels, ARIA only where \
needed, visible focus, full keyboard support and WCAG AA contrast.",
    },
    Agent {
        id: "performance-engineer",
        name: "Performance Engineer",
        description: "Keeps apps fast and smooth",
        category: "Quality",
        capabilities: &["Rendering performance", "Load time", "Memory efficiency"],
        icon: "⚡",
        keywords: &["fast", "performance", "speed", "smooth", "optimize", "large", "realtime", "chart"],
        system_prompt: "You are a performance engineer. Minimize layout thrash, batch DOM updates, \
debounce expensive handlers and keep animations on the compositor.",
    },
    Agent {
        id: "game-developer",
        name: "Game Developer",
        description: "Builds browser games with canvas and game loops",
        category: "Games",
        capabilities: &["Game loops", "Canvas rendering", "Physics and collision"],
        icon: "🎮",
        keywords: &["game", "play", "score", "canvas", "snake", "tetris", "puzzle", "level", "player"],
        system_prompt: "You are a game developer. Build a requestAnimationFrame game loop, separate \
update from render, handle input cleanly and include score, restart and pause.",
    },
];

pub fn find_agent(id: &str) -> Option<&'static Agent> {
    AGENTS.iter().find(|a| a.id == id)
}

/// Clamp a requested agent count to `1..=5`, defaulting to 3
pub fn clamp_max_agents(requested: Option<usize>) -> usize {
    requested
        .unwrap_or(DEFAULT_MAX_AGENTS)
        .clamp(1, MAX_AGENTS_LIMIT)
}

/// Choose agents for a prompt
///
/// The LLM is asked first; its failure or an empty answer falls back to
/// keyword scoring.
/// Agents picked for a prompt, plus what the selection call spent
#[derive(Debug, Clone, Default)]
pub struct AgentSelection {
    pub agents: Vec<&'static str>,
    pub usage: Usage,
}

pub async fn select_agents(
    llm: &dyn LlmClient,
    prompt: &str,
    project_type: Option<&str>,
    max: usize,
) -> AgentSelection {
    let request = LlmRequest::prompt(
        Some(selection_system_prompt(max)),
        selection_user_prompt(prompt, project_type),
    )
    .with_max_tokens(200);

    let mut usage = Usage::default();
    match llm.complete(&request).await {
        Ok(response) => {
            usage = response.usage;
            let picked = parse_agent_ids(&response.text, max);
            if !picked.is_empty() {
                debug!(agents = ?picked, "Agents selected by LLM");
                return AgentSelection { agents: picked, usage };
            }
            debug!("LLM agent selection empty, falling back to keywords");
        }
        Err(e) => warn!("Agent selection via LLM failed: {}", e),
    }

    AgentSelection {
        agents: keyword_selection(prompt, project_type, max),
        usage,
    }
}

fn selection_system_prompt(max: usize) -> String {
    let catalog: Vec<String> = AGENTS
        .iter()
        .map(|a| format!("- {}: {} ({})", a.id, a.description, a.capabilities.join(", ")))
        .collect();

    format!(
        "You assign specialist agents to app-building requests. Available agents:\n{}\n\n\
         Reply with a JSON array of at most {} agent ids, most relevant first, and nothing else.",
        catalog.join("\n"),
        max
    )
}

fn selection_user_prompt(prompt: &str, project_type: Option<&str>) -> String {
    match project_type {
        Some(t) => format!("Project type: {}\n\nRequest: {}", t, prompt),
        None => format!("Request: {}", prompt),
    }
}

/// Parse the first JSON array in `text`, keeping known ids in order without repeats
pub fn parse_agent_ids(text: &str, max: usize) -> Vec<&'static str> {
    let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) else {
        return Vec::new();
    };
    if end < start {
        return Vec::new();
    }

    let ids: Vec<String> = match serde_json::from_str(&text[start..=end]) {
        Ok(ids) => ids,
        Err(_) => return Vec::new(),
    };

    let mut picked: Vec<&'static str> = Vec::new();
    for id in ids {
        if let Some(agent) = find_agent(id.trim()) {
            if !picked.contains(&agent.id) {
                picked.push(agent.id);
            }
        }
        if picked.len() == max {
            break;
        }
    }
    picked
}

/// Score agents by keyword and capability hits in the prompt
pub fn keyword_selection(prompt: &str, project_type: Option<&str>, max: usize) -> Vec<&'static str> {
    let haystack = format!("{} {}", prompt, project_type.unwrap_or("")).to_lowercase();

    let mut scored: Vec<(usize, usize, &'static str)> = AGENTS
        .iter()
        .enumerate()
        .filter_map(|(order, agent)| {
            let keyword_hits = agent.keywords.iter().filter(|k| haystack.contains(*k)).count();
            let capability_hits = agent
                .capabilities
                .iter()
                .filter(|c| haystack.contains(&c.to_lowercase()))
                .count();
            let score = keyword_hits + capability_hits;
            (score > 0).then_some((score, order, agent.id))
        })
        .collect();

    scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    let mut picked: Vec<&'static str> = scored.into_iter().map(|(_, _, id)| id).take(max).collect();
    if picked.is_empty() {
        picked = DEFAULT_AGENTS.iter().copied().take(max).collect();
    }
    picked
}
