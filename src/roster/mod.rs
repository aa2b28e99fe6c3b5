//! Agent roster - the ordered registry of conversation participants
//!
//! An [`AgentProfile`] describes one participant: a stable id, a display
//! name, a role label, and the behavioral instructions passed verbatim to
//! the inference provider. The [`AgentRoster`] is an ordered collection of
//! profiles; order matters because speaker-selection replies are matched
//! against agent ids in roster order.
//!
//! Profiles are immutable while a cycle runs. Edits happen through
//! configuration, outside the scheduler's control.

use serde::{Deserialize, Serialize};

/// A single agent participating in the roundtable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Stable identifier (e.g. "lead", "critic"). Matched against
    /// speaker-selection replies, so keep ids short and distinctive.
    pub id: String,
    /// Human-readable display name.
    pub name: String,
    /// Role label shown to the selector and in transcripts.
    pub role: String,
    /// Behavioral instructions, passed opaquely to the inference provider.
    pub system_instruction: String,
    /// Optional per-agent model override. Falls back to the provider default.
    #[serde(default)]
    pub model: Option<String>,
}

impl AgentProfile {
    /// Create a profile with the given identity and instructions.
    pub fn new(id: &str, name: &str, role: &str, system_instruction: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            role: role.to_string(),
            system_instruction: system_instruction.to_string(),
            model: None,
        }
    }

    /// Set a per-agent model override (builder pattern).
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = Some(model.to_string());
        self
    }
}

/// Ordered collection of agent profiles.
///
/// # Example
/// ```
/// use roundtable::roster::{AgentProfile, AgentRoster};
///
/// let roster = AgentRoster::new(vec![
///     AgentProfile::new("lead", "Lead", "planner", "You plan."),
///     AgentProfile::new("critic", "Critic", "reviewer", "You review."),
/// ]);
/// assert_eq!(roster.len(), 2);
/// assert!(roster.get("critic").is_some());
/// assert!(roster.get("ghost").is_none());
/// ```
#[derive(Debug, Clone, Default)]
pub struct AgentRoster {
    agents: Vec<AgentProfile>,
}

impl AgentRoster {
    /// Build a roster from an ordered list of profiles.
    pub fn new(agents: Vec<AgentProfile>) -> Self {
        Self { agents }
    }

    /// Look up an agent by id.
    pub fn get(&self, id: &str) -> Option<&AgentProfile> {
        self.agents.iter().find(|a| a.id == id)
    }

    /// Returns true if an agent with the given id exists.
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Iterate profiles in roster order.
    pub fn iter(&self) -> impl Iterator<Item = &AgentProfile> {
        self.agents.iter()
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Returns true if the roster has no agents.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

/// The reference four-agent roster used when no agents are configured.
pub fn default_roster() -> Vec<AgentProfile> {
    vec![
        AgentProfile::new(
            "lead",
            "Lead Planner",
            "planning lead",
            "You are the lead planner. Break the goal into a concrete, ordered \
             plan. Delegate open questions to the analyst and implementation \
             details to the engineer. Keep every reply focused on moving the \
             plan forward.",
        ),
        AgentProfile::new(
            "analyst",
            "Research Analyst",
            "analyst",
            "You are the research analyst. Examine the current plan for gaps, \
             risks, and unstated assumptions. Answer open questions with \
             specifics rather than generalities.",
        ),
        AgentProfile::new(
            "coder",
            "Implementation Engineer",
            "engineer",
            "You are the implementation engineer. Turn the agreed plan into \
             concrete artifacts. When a file needs to be written, request the \
             write_file tool instead of pasting content as prose.",
        ),
        AgentProfile::new(
            "critic",
            "QA Critic",
            "reviewer",
            "You are the QA critic. Challenge the plan until it is complete \
             and actionable. When nothing substantial remains to fix, say so \
             and declare the plan ready for handoff.",
        ),
    ]
}
