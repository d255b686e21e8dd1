//! Human-readable designations and inspection views.
//!
//! Debugging conveniences only: one-line "sysdesig" strings for entities
//! and an indented tree view over a mind's descendants. Nothing here is
//! machine-parsed.

use crate::belief::Belief;
use crate::ident::MindId;
use crate::state::State;
use crate::world::World;

/// One-line designation of a belief: id, label (or subject), archetypes.
pub fn sysdesig_belief(world: &World, belief: &Belief) -> String {
    let name = belief
        .label
        .clone()
        .unwrap_or_else(|| world.resolve_subject_label(belief.subject));
    let archetypes: Vec<String> = belief
        .archetypes(world)
        .iter()
        .map(|a| a.label.clone())
        .collect();
    let mut out = format!("{} {name}", belief.id);
    if !archetypes.is_empty() {
        out.push_str(&format!(" <{}>", archetypes.join("+")));
    }
    if let Some(meta) = &belief.branch {
        out.push_str(&format!(" ~{:.2}", meta.certainty));
    }
    out
}

/// One-line designation of a state: id, mind, times, lock and branch weight.
pub fn sysdesig_state(world: &World, state: &State) -> String {
    let mind_name = world
        .mind(state.mind)
        .ok()
        .and_then(|m| m.label)
        .unwrap_or_else(|| state.mind.to_string());
    let mut out = format!(
        "{} in {mind_name} tt={} vt={}",
        state.id, state.tt, state.vt
    );
    if state.is_convergence() {
        out.push_str(" (convergence)");
    }
    if (state.certainty - 1.0).abs() > f32::EPSILON {
        out.push_str(&format!(" ~{:.2}", state.certainty));
    }
    if state.locked {
        out.push_str(" [locked]");
    }
    out
}

/// Indented tree over a mind and its descendants, one state per line.
pub fn mind_tree(world: &World, mind: MindId) -> String {
    let mut out = String::new();
    render_mind(world, mind, 0, &mut out);
    out
}

fn render_mind(world: &World, mind: MindId, depth: usize, out: &mut String) {
    let Ok(m) = world.mind(mind) else {
        return;
    };
    let indent = "  ".repeat(depth);
    let name = m.label.clone().unwrap_or_else(|| m.id.to_string());
    out.push_str(&format!(
        "{indent}{name} ({} states, {} children)\n",
        m.states.len(),
        m.children.len()
    ));
    for state_id in &m.states {
        if let Ok(state) = world.state(*state_id) {
            out.push_str(&format!("{indent}  {}\n", sysdesig_state(world, &state)));
        }
    }
    for child in &m.children {
        render_mind(world, *child, depth + 1, out);
    }
}
