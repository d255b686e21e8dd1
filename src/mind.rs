//! Minds: timelines of states belonging to one observer.
//!
//! A mind owns a tree of states rooted at its origin state. Child minds
//! inherit time coordination from their parent through each state's ground
//! state: a child state's `tt` equals its ground state's `vt`.

use crate::belief::Belief;
use crate::error::{DoxaResult, StateError};
use crate::ident::{MindId, Sid, StateId};
use crate::state::{self, CreateOptions};
use crate::world::World;
use std::sync::Arc;

/// A timeline of states belonging to one observer (the world, an NPC, an
/// NPC's model of another).
#[derive(Debug, Clone)]
pub struct Mind {
    pub id: MindId,
    /// Globally unique label, if named.
    pub label: Option<String>,
    pub parent: Option<MindId>,
    /// Child minds, in creation order.
    pub children: Vec<MindId>,
    /// Every state of this mind, in creation order.
    pub states: Vec<StateId>,
    /// The root state, once the first state is created.
    pub origin: Option<StateId>,
}

impl Mind {
    pub fn new(id: MindId, label: Option<String>, parent: Option<MindId>) -> Self {
        Self {
            id,
            label,
            parent,
            children: Vec::new(),
            states: Vec::new(),
            origin: None,
        }
    }
}

/// Whether `mind` is `ancestor` or a transitive child of it.
pub fn is_self_or_descendant(world: &World, mind: MindId, ancestor: MindId) -> bool {
    let mut cur = Some(mind);
    while let Some(id) = cur {
        if id == ancestor {
            return true;
        }
        cur = world.mind(id).ok().and_then(|m| m.parent);
    }
    false
}

/// Create an open root state in `mind`.
///
/// If the mind has a parent, `ground` must be a state of that parent
/// (*GroundMindMismatch* otherwise). `tt` defaults to the ground state's
/// `vt`; `vt` defaults to `tt`.
pub fn create_state(
    world: &World,
    mind: MindId,
    ground: Option<StateId>,
    opts: CreateOptions,
) -> DoxaResult<StateId> {
    state::create_state(world, mind, ground, opts)
}

/// The belief for `subject` visible at transaction time `tt`: the one whose
/// state has the largest `tt <=` the requested time among states where the
/// subject is visible.
pub fn valid_at(world: &World, mind: MindId, subject: Sid, tt: u64) -> Option<Arc<Belief>> {
    let m = world.mind(mind).ok()?;
    let mut candidates: Vec<(u64, StateId)> = m
        .states
        .iter()
        .filter_map(|&sid| {
            let st = world.state(sid).ok()?;
            (st.tt <= tt).then_some((st.tt, sid))
        })
        .collect();
    // Latest transaction time first; creation order breaks ties.
    candidates.sort_by(|a, b| b.cmp(a));

    for (_, state_id) in candidates {
        if let Some(belief) = state::belief_by_subject(world, state_id, subject, state_id) {
            return Some(belief);
        }
    }
    None
}

/// Reject a ground state that does not belong to the expected parent mind.
pub(crate) fn check_ground_mind(
    world: &World,
    ground: StateId,
    expected_parent: MindId,
) -> DoxaResult<()> {
    let ground_state = world.state(ground)?;
    if ground_state.mind != expected_parent {
        return Err(StateError::GroundMindMismatch {
            ground_id: ground.get(),
            found: ground_state.mind.get(),
            expected: expected_parent.get(),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ancestry_walk() {
        let world = World::new().unwrap();
        let logos = world.logos();
        let m = world.create_mind(Some("world".into()), Some(logos)).unwrap();
        let npc = world.create_mind(Some("npc".into()), Some(m)).unwrap();

        assert!(is_self_or_descendant(&world, npc, logos));
        assert!(is_self_or_descendant(&world, npc, m));
        assert!(is_self_or_descendant(&world, m, m));
        assert!(!is_self_or_descendant(&world, m, npc));
    }

    #[test]
    fn ground_mind_mismatch_detected() {
        let world = World::new().unwrap();
        let logos = world.logos();
        let m = world.create_mind(Some("world".into()), Some(logos)).unwrap();
        let s = create_state(
            &world,
            m,
            Some(world.logos_state()),
            CreateOptions {
                tt: Some(1),
                ..Default::default()
            },
        )
        .unwrap();

        // A sibling mind cannot use `s` (a state of `m`) as its ground.
        let other = world.create_mind(Some("other".into()), Some(logos)).unwrap();
        let result = create_state(
            &world,
            other,
            Some(s),
            CreateOptions {
                tt: Some(1),
                ..Default::default()
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn valid_at_picks_largest_tt_not_after() {
        let world = World::new().unwrap();
        world
            .register_json(
                r#"{
                    "traittypes": { "color": "string" },
                    "archetypes": { "Thing": {} },
                    "prototypes": {}
                }"#,
            )
            .unwrap();
        let m = world.create_mind(Some("world".into()), Some(world.logos())).unwrap();
        let s1 = create_state(
            &world,
            m,
            Some(world.logos_state()),
            CreateOptions {
                tt: Some(1),
                ..Default::default()
            },
        )
        .unwrap();

        let hammer = world
            .add_belief(
                s1,
                crate::belief::BeliefTemplate::new()
                    .with_label("hammer")
                    .with_archetype("Thing")
                    .with_trait("color", "black"),
            )
            .unwrap();
        let subject = world.belief(hammer).unwrap().subject;

        world.lock_state(s1).unwrap();
        let s2 = world.branch_state(s1, None, 3, Default::default()).unwrap();
        let b = world.belief(hammer).unwrap();
        let replaced = b
            .replace(
                &world,
                s2,
                [("color".to_owned(), crate::value::TemplateValue::from("red"))]
                    .into_iter()
                    .collect(),
            )
            .unwrap();

        // s2 inherits s1's tt (no new ground), so both states share tt=1 and
        // the tie breaks toward the later state id: the replacing version
        // wins at every tt >= 1.
        assert_eq!(valid_at(&world, m, subject, 1).unwrap().id, replaced);
        assert_eq!(valid_at(&world, m, subject, 3).unwrap().id, replaced);
        assert!(valid_at(&world, m, subject, 0).is_none());
    }
}
