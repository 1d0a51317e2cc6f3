//! Mermaid `stateDiagram-v2` export.

use crate::definition::Definition;
use crate::ids::StateId;
use std::fmt::Write;

impl Definition {
    /// Renders the definition as a Mermaid state diagram.
    ///
    /// Wildcard transitions are drawn from every state, trigger-only
    /// transitions as self-loops. `current` is highlighted when given.
    pub fn to_mermaid_diagram(&self, current: Option<StateId>) -> String {
        let mut out = String::from("stateDiagram-v2\n");

        for state in self.states() {
            let id = node_id(state.name());
            if id != state.name() {
                let _ = writeln!(out, "    state \"{}\" as {}", state.name(), id);
            }
        }

        if let Some(initial) = self.initial_state() {
            let _ = writeln!(out, "    [*] --> {}", node_id(initial.name()));
        }

        for transition in self.transitions() {
            let trigger = self.trigger_name(transition.trigger_id());
            let sources: Vec<StateId> = match transition.from_state_id() {
                Some(from) => vec![from],
                None => self.states().iter().map(|s| s.id()).collect(),
            };

            for from in sources {
                let to = transition.to_state_id().unwrap_or(from);
                // wildcard self-loops would add an edge on every state
                if transition.is_wildcard() && !transition.changes_state() {
                    continue;
                }
                let _ = writeln!(
                    out,
                    "    {} --> {} : {}",
                    node_id(&self.state_name(from)),
                    node_id(&self.state_name(to)),
                    trigger
                );
            }
        }

        for state in self.states().iter().filter(|s| s.is_final()) {
            let _ = writeln!(out, "    {} --> [*]", node_id(state.name()));
        }

        if let Some(state) = current.and_then(|id| self.state_by_id(id)) {
            out.push_str("    classDef current fill:#f96,stroke:#333,stroke-width:2px\n");
            let _ = writeln!(out, "    class {} current", node_id(state.name()));
        }

        out
    }
}

/// Mermaid node ids may only contain word characters.
fn node_id(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}
