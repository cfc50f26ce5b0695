//! Skills: named instruction bundles folded into the system prompt.
//!
//! A skill enriches the prompt in two phases. Phase 1 always runs: every
//! visible skill contributes a `- name: description` line to the listing so
//! the model knows what can be activated. Phase 2 runs on demand: the full
//! `instructions` body of every *activated* skill is appended. Skills with
//! `disable_model_invocation` set are hidden from both phases.
//!
//! Skills may bundle tools; [`SkillRegistry::bind_tools_to`] registers them
//! on a tool registry under the `skill` source tag.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::tools::{Tool, ToolRegistry, ToolSource};
use crate::{Error, Result};

/// A named bundle of additional instructions.
#[derive(Clone)]
pub struct Skill {
    name: String,
    description: String,
    instructions: String,
    disable_model_invocation: bool,
    tools: Vec<Tool>,
}

impl std::fmt::Debug for Skill {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Skill")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("disable_model_invocation", &self.disable_model_invocation)
            .field("tools", &format!("{} tools", self.tools.len()))
            .finish()
    }
}

impl Skill {
    /// Creates a new skill.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            instructions: instructions.into(),
            disable_model_invocation: false,
            tools: Vec::new(),
        }
    }

    /// Hides the skill from the model-facing listing and activation block.
    pub fn with_disable_model_invocation(mut self, disable: bool) -> Self {
        self.disable_model_invocation = disable;
        self
    }

    /// Bundles a tool with this skill.
    pub fn with_tool(mut self, tool: Tool) -> Self {
        self.tools.push(tool);
        self
    }

    /// The skill's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The skill's one-line description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The skill's full instruction body.
    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    /// Whether the skill is hidden from the model.
    pub fn disable_model_invocation(&self) -> bool {
        self.disable_model_invocation
    }
}

struct SkillState {
    skills: Vec<Skill>,
    activated: HashSet<String>,
}

/// Registry of skills with activation state.
///
/// Registration happens at construction time; activation toggles are safe
/// at any point between turns.
pub struct SkillRegistry {
    state: Mutex<SkillState>,
}

impl Default for SkillRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SkillRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SkillState {
                skills: Vec::new(),
                activated: HashSet::new(),
            }),
        }
    }

    /// Registers a skill.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateSkill`] when the name is already taken.
    pub fn register(&self, skill: Skill) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.skills.iter().any(|s| s.name == skill.name) {
            return Err(Error::DuplicateSkill(skill.name));
        }
        log::debug!("registered skill '{}'", skill.name);
        state.skills.push(skill);
        Ok(())
    }

    /// Activates a skill so its full instructions are included.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown names.
    pub fn activate(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.skills.iter().any(|s| s.name == name) {
            return Err(Error::other(format!("unknown skill: {name}")));
        }
        state.activated.insert(name.to_string());
        Ok(())
    }

    /// Deactivates a skill. Unknown or inactive names are a no-op.
    pub fn deactivate(&self, name: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.activated.remove(name);
    }

    /// Whether a skill is currently activated.
    pub fn is_activated(&self, name: &str) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.activated.contains(name)
    }

    /// Every registered skill, in registration order.
    pub fn list(&self) -> Vec<Skill> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.skills.clone()
    }

    /// Looks up a skill by name.
    pub fn get(&self, name: &str) -> Option<Skill> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.skills.iter().find(|s| s.name == name).cloned()
    }

    /// Registers every bundled tool of every skill on `registry` under the
    /// `skill` source tag.
    pub fn bind_tools_to(&self, registry: &ToolRegistry) -> Result<()> {
        let tools: Vec<Tool> = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state
                .skills
                .iter()
                .flat_map(|s| s.tools.iter().cloned())
                .collect()
        };
        for tool in tools {
            registry.register_with_source(tool, ToolSource::Skill)?;
        }
        Ok(())
    }

    /// Folds the skill catalogue into a system prompt.
    ///
    /// An empty registry (no visible skills) returns `base_prompt`
    /// unchanged. Otherwise the result is
    /// `base ⊕ listing ⊕ activated-instructions` with stable delimiters;
    /// hidden skills appear in neither section.
    pub fn compose(&self, base_prompt: &str) -> String {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let visible: Vec<&Skill> = state
            .skills
            .iter()
            .filter(|s| !s.disable_model_invocation)
            .collect();
        if visible.is_empty() {
            return base_prompt.to_string();
        }

        let mut prompt = String::from(base_prompt);
        prompt.push_str("\nAvailable skills:\n");
        for skill in &visible {
            prompt.push_str(&format!("- {}: {}\n", skill.name, skill.description));
        }

        let activated: Vec<&Skill> = visible
            .iter()
            .copied()
            .filter(|s| state.activated.contains(&s.name))
            .collect();
        if !activated.is_empty() {
            prompt.push_str("\n---\n");
            for skill in activated {
                prompt.push_str(&skill.instructions);
                prompt.push('\n');
            }
        }

        prompt
    }
}
