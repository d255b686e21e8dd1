//! Recall: deriving notions with combined certainty.
//!
//! A [`Notion`] bundles a subject with certainty-weighted trait values
//! recalled from every state that matches the requested valid time and is
//! reachable from a ground state. Combined certainty is the product of the
//! branch certainties along the state chain, the belief's own branch
//! certainty, and, when the stored value is a fuzzy, the alternative's
//! certainty. Equal values merge by summing mass; the clamp to 1.0 happens
//! only at the final merge.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::belief::{BaseRef, Belief};
use crate::error::DoxaResult;
use crate::fuzzy::{Alternative, Fuzzy};
use crate::ident::{MindId, Sid, StateId};
use crate::mind::is_self_or_descendant;
use crate::state::{belief_by_subject, visible_beliefs};
use crate::value::TraitValue;
use crate::world::World;

/// A query result: a subject and its recalled trait values. A value is a
/// plain scalar when recall produced exactly one alternative at full
/// certainty, and a [`Fuzzy`] otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct Notion {
    pub subject: Sid,
    pub traits: BTreeMap<String, TraitValue>,
}

impl Notion {
    pub fn get(&self, trait_label: &str) -> Option<&TraitValue> {
        self.traits.get(trait_label)
    }

    /// The recalled value as a fuzzy, wrapping scalars at certainty 1.0.
    pub fn get_fuzzy(&self, trait_label: &str) -> Option<Fuzzy> {
        match self.traits.get(trait_label)? {
            TraitValue::Fuzzy(f) => Some(f.clone()),
            scalar => Some(Fuzzy::single(scalar.clone(), 1.0)),
        }
    }
}

/// States matching `vt` whose chain reaches `ground_state`, paired with the
/// product of branch certainties below the ground state. States shadowed by
/// a matching descendant in the same chain are dropped so one valuation is
/// never counted twice along a single path.
fn candidate_states(
    world: &World,
    mind: MindId,
    ground_state: StateId,
    vt: u64,
) -> Vec<(StateId, f32)> {
    let mut matching: Vec<(StateId, f32)> = Vec::new();
    for id in world.state_ids() {
        let Ok(st) = world.state(id) else { continue };
        if st.vt != vt || !is_self_or_descendant(world, st.mind, mind) {
            continue;
        }
        if let Some(certainty) = chain_certainty(world, id, ground_state) {
            matching.push((id, certainty));
        }
    }

    let ids: Vec<StateId> = matching.iter().map(|(id, _)| *id).collect();
    matching.retain(|(id, _)| {
        !ids.iter()
            .any(|other| other != id && is_ancestor(world, *id, *other))
    });
    matching
}

/// Product of state certainties walking up from `state` until `ground_state`.
fn chain_certainty(world: &World, state: StateId, ground_state: StateId) -> Option<f32> {
    let mut certainty = 1.0f32;
    let mut cur = state;
    loop {
        if cur == ground_state {
            return Some(certainty);
        }
        let st = world.state(cur).ok()?;
        certainty *= st.certainty;
        cur = st.base.or(st.ground)?;
    }
}

/// Whether `ancestor` lies on `state`'s base/ground chain (strictly above).
fn is_ancestor(world: &World, ancestor: StateId, state: StateId) -> bool {
    let mut cur = world
        .state(state)
        .ok()
        .and_then(|s| s.base.or(s.ground));
    while let Some(id) = cur {
        if id == ancestor {
            return true;
        }
        cur = world.state(id).ok().and_then(|s| s.base.or(s.ground));
    }
    false
}

/// Every valuation of `subject` visible from `state`: the current version
/// for the subject itself, plus imported observations whose `@about` points
/// at it.
fn valuations(world: &World, state: StateId, subject: Sid) -> Vec<Arc<Belief>> {
    let mut out: Vec<Arc<Belief>> = Vec::new();
    if let Some(current) = belief_by_subject(world, state, subject, state) {
        out.push(current);
    }
    for id in world.rev().candidates(subject, "@about") {
        let Ok(observation) = world.belief(id) else {
            continue;
        };
        if let Some(current) = belief_by_subject(world, state, observation.subject, state) {
            if current.id == id && out.iter().all(|b| b.id != id) {
                out.push(current);
            }
        }
    }
    out
}

/// Expand a stored value into `(value, certainty)` alternatives under an
/// external weight. The weight multiplies into every alternative; the clamp
/// waits for the final merge.
fn weighted_alternatives(value: TraitValue, weight: f32, out: &mut Vec<Alternative>) {
    match value {
        TraitValue::Fuzzy(fuzzy) => {
            for alt in fuzzy.alternatives() {
                out.push(Alternative {
                    value: alt.value.clone(),
                    certainty: alt.certainty * weight,
                });
            }
        }
        other => out.push(Alternative {
            value: other,
            certainty: weight,
        }),
    }
}

/// Follow a dot path from a valuation, multiplying each hop's certainty
/// into the surviving alternatives.
fn follow_path(
    world: &World,
    state: StateId,
    belief: &Belief,
    path: &str,
) -> Vec<(TraitValue, f32)> {
    let mut segments = path.split('.');
    let Some(first) = segments.next() else {
        return Vec::new();
    };
    let mut frontier: Vec<(TraitValue, f32)> = Vec::new();
    if let Some(value) = belief.trait_value_by_label(world, first) {
        let mut alts = Vec::new();
        weighted_alternatives(value, 1.0, &mut alts);
        frontier.extend(alts.into_iter().map(|a| (a.value, a.certainty)));
    }

    for segment in segments {
        let mut next = Vec::new();
        for (value, certainty) in frontier {
            let Some(sid) = value.as_subject() else {
                continue;
            };
            let Some(hop) = belief_by_subject(world, state, sid, state) else {
                continue;
            };
            if let Some(found) = hop.trait_value_by_label(world, segment) {
                let mut alts = Vec::new();
                weighted_alternatives(found, certainty, &mut alts);
                next.extend(alts.into_iter().map(|a| (a.value, a.certainty)));
            }
        }
        frontier = next;
    }
    frontier
}

/// All trait labels a belief can answer for: own slots plus everything
/// reachable through the base chain.
fn trait_labels(world: &World, belief: &Belief) -> Vec<String> {
    let mut labels: Vec<String> = belief.traits.keys().cloned().collect();
    let mut queue: Vec<BaseRef> = belief.bases.clone();
    let mut seen_beliefs = std::collections::HashSet::new();
    let mut seen_archetypes = std::collections::HashSet::new();
    while let Some(base) = queue.pop() {
        match base {
            BaseRef::Belief(id) => {
                if !seen_beliefs.insert(id) {
                    continue;
                }
                if let Ok(b) = world.belief(id) {
                    labels.extend(b.traits.keys().cloned());
                    queue.extend(b.bases.iter().cloned());
                }
            }
            BaseRef::Archetype(label) => {
                if !seen_archetypes.insert(label.clone()) {
                    continue;
                }
                if let Some(a) = world.schema().archetype(&label) {
                    labels.extend(a.resolved.keys().cloned());
                    queue.extend(a.bases.iter().map(|b| BaseRef::Archetype(b.clone())));
                }
            }
        }
    }
    labels.sort();
    labels.dedup();
    labels.retain(|l| l != "@about");
    labels
}

/// Recall a subject's traits at `vt` across every matching state reachable
/// from `ground_state`. See the module docs for the certainty algebra.
pub fn recall_by_subject(
    world: &World,
    mind: MindId,
    ground_state: StateId,
    subject: Sid,
    vt: u64,
    request: Option<&[&str]>,
) -> DoxaResult<Notion> {
    world.mind(mind)?;
    world.state(ground_state)?;
    tracing::debug!(mind = %mind, subject = %subject, vt, "recall by subject");

    let mut gathered: BTreeMap<String, Vec<Alternative>> = BTreeMap::new();

    for (state_id, path_certainty) in candidate_states(world, mind, ground_state, vt) {
        for valuation in valuations(world, state_id, subject) {
            let belief_certainty = valuation
                .branch
                .as_ref()
                .map(|m| m.certainty)
                .unwrap_or(1.0);
            let weight = path_certainty * belief_certainty;

            let requested: Vec<String> = match request {
                Some(labels) => labels.iter().map(|s| (*s).to_owned()).collect(),
                None => trait_labels(world, &valuation),
            };

            for label in requested {
                let alternatives = gathered.entry(label.clone()).or_default();
                if label.contains('.') {
                    for (value, certainty) in follow_path(world, state_id, &valuation, &label) {
                        alternatives.push(Alternative {
                            value,
                            certainty: certainty * weight,
                        });
                    }
                } else if let Some(value) = valuation.trait_value_by_label(world, &label) {
                    weighted_alternatives(value, weight, alternatives);
                }
            }
        }
    }

    let mut traits = BTreeMap::new();
    for (label, alternatives) in gathered {
        if alternatives.is_empty() {
            continue;
        }
        let merged = Fuzzy::merge(alternatives);
        let value = match merged.alternatives() {
            [only] if (only.certainty - 1.0).abs() < f32::EPSILON => only.value.clone(),
            _ => TraitValue::Fuzzy(merged),
        };
        traits.insert(label, value);
    }

    Ok(Notion { subject, traits })
}

/// Recall a notion for every subject whose current belief satisfies the
/// archetype closure, across the matching states.
pub fn recall_by_archetype(
    world: &World,
    mind: MindId,
    ground_state: StateId,
    archetype_label: &str,
    vt: u64,
    request: Option<&[&str]>,
) -> DoxaResult<Vec<Notion>> {
    world.mind(mind)?;
    world.state(ground_state)?;

    let mut subjects: Vec<Sid> = Vec::new();
    for (state_id, _) in candidate_states(world, mind, ground_state, vt) {
        for belief in visible_beliefs(world, state_id) {
            if belief.has_archetype(world, archetype_label) && !subjects.contains(&belief.subject)
            {
                subjects.push(belief.subject);
            }
        }
    }
    subjects.sort();

    let mut notions = Vec::with_capacity(subjects.len());
    for subject in subjects {
        notions.push(recall_by_subject(
            world,
            mind,
            ground_state,
            subject,
            vt,
            request,
        )?);
    }
    Ok(notions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::belief::{BeliefTemplate, BranchMeta};
    use crate::state::{branch_state, BranchOptions, CreateOptions};
    use crate::value::TemplateValue;

    fn hammer_world() -> (World, MindId, StateId, Sid) {
        let world = World::new().unwrap();
        world
            .register_json(
                r#"{
                    "traittypes": {
                        "color": "string",
                        "weight": "number",
                        "location": { "type": "Place" }
                    },
                    "archetypes": {
                        "Thing": {},
                        "Tool": { "bases": ["Thing"] },
                        "Place": { "bases": ["Thing"] }
                    },
                    "prototypes": {
                        "workshop": { "bases": ["Place"] },
                        "shed": { "bases": ["Place"] }
                    }
                }"#,
            )
            .unwrap();
        let m = world
            .create_mind(Some("world".into()), Some(world.logos()))
            .unwrap();
        let s = crate::mind::create_state(
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
                s,
                BeliefTemplate::new()
                    .with_label("hammer")
                    .with_archetype("Tool")
                    .with_trait("color", "black"),
            )
            .unwrap();
        let subject = world.belief(hammer).unwrap().subject;
        (world, m, s, subject)
    }

    #[test]
    fn superposed_branches_merge_into_fuzzy() {
        let (world, m, s, hammer) = hammer_world();
        let b1 = branch_state(
            &world,
            s,
            None,
            2,
            BranchOptions {
                certainty: 0.7,
                self_subject: None,
            },
        )
        .unwrap();
        let b2 = branch_state(
            &world,
            s,
            None,
            2,
            BranchOptions {
                certainty: 0.3,
                self_subject: None,
            },
        )
        .unwrap();

        let belief = belief_by_subject(&world, b1, hammer, b1).unwrap();
        belief
            .replace(
                &world,
                b1,
                [("location".to_owned(), TemplateValue::from("workshop"))]
                    .into_iter()
                    .collect(),
            )
            .unwrap();
        let belief = belief_by_subject(&world, b2, hammer, b2).unwrap();
        belief
            .replace(
                &world,
                b2,
                [("location".to_owned(), TemplateValue::from("shed"))]
                    .into_iter()
                    .collect(),
            )
            .unwrap();

        let notion = recall_by_subject(&world, m, s, hammer, 2, Some(&["location"])).unwrap();
        let fuzzy = notion.get_fuzzy("location").unwrap();
        assert_eq!(fuzzy.len(), 2);
        let certainties: Vec<f32> = fuzzy.alternatives().iter().map(|a| a.certainty).collect();
        assert!(certainties.iter().any(|c| (c - 0.7).abs() < 1e-6));
        assert!(certainties.iter().any(|c| (c - 0.3).abs() < 1e-6));
    }

    #[test]
    fn belief_certainty_multiplies_into_path() {
        let (world, m, s, hammer) = hammer_world();
        let b1 = branch_state(
            &world,
            s,
            None,
            2,
            BranchOptions {
                certainty: 0.7,
                self_subject: None,
            },
        )
        .unwrap();

        let belief = belief_by_subject(&world, b1, hammer, b1).unwrap();
        belief
            .branch(
                &world,
                b1,
                [("weight".to_owned(), TemplateValue::from(2.0))]
                    .into_iter()
                    .collect(),
                Some(BranchMeta {
                    certainty: 0.8,
                    tt: None,
                }),
            )
            .unwrap();

        let notion = recall_by_subject(&world, m, s, hammer, 2, Some(&["weight"])).unwrap();
        let fuzzy = notion.get_fuzzy("weight").unwrap();
        assert_eq!(fuzzy.len(), 1);
        assert!((fuzzy.alternatives()[0].certainty - 0.56).abs() < 1e-6);
        assert_eq!(fuzzy.alternatives()[0].value, TraitValue::Number(2.0));
    }

    #[test]
    fn certain_single_value_unwraps_to_scalar() {
        let (world, m, s, hammer) = hammer_world();
        let notion = recall_by_subject(&world, m, s, hammer, 1, Some(&["color"])).unwrap();
        assert_eq!(notion.get("color"), Some(&TraitValue::Text("black".into())));
    }

    #[test]
    fn path_request_multiplies_hop_certainty() {
        let (world, m, s, hammer) = hammer_world();
        let b1 = branch_state(
            &world,
            s,
            None,
            2,
            BranchOptions {
                certainty: 0.5,
                self_subject: None,
            },
        )
        .unwrap();
        let belief = belief_by_subject(&world, b1, hammer, b1).unwrap();
        belief
            .replace(
                &world,
                b1,
                [("location".to_owned(), TemplateValue::from("workshop"))]
                    .into_iter()
                    .collect(),
            )
            .unwrap();
        let workshop = crate::state::belief_by_label(&world, b1, "workshop").unwrap();
        workshop
            .replace(
                &world,
                b1,
                [("color".to_owned(), TemplateValue::from("brown"))]
                    .into_iter()
                    .collect(),
            )
            .unwrap();

        let notion =
            recall_by_subject(&world, m, s, hammer, 2, Some(&["location.color"])).unwrap();
        let fuzzy = notion.get_fuzzy("location.color").unwrap();
        assert_eq!(fuzzy.len(), 1);
        assert_eq!(fuzzy.alternatives()[0].value, TraitValue::Text("brown".into()));
        assert!((fuzzy.alternatives()[0].certainty - 0.5).abs() < 1e-6);
    }

    #[test]
    fn recall_by_archetype_yields_matching_subjects() {
        let (world, m, s, _hammer) = hammer_world();
        world
            .add_belief(
                s,
                BeliefTemplate::new()
                    .with_label("anvil")
                    .with_archetype("Tool")
                    .with_trait("color", "gray"),
            )
            .unwrap();

        let notions =
            recall_by_archetype(&world, m, s, "Tool", 1, Some(&["color"])).unwrap();
        assert_eq!(notions.len(), 2);
    }

    #[test]
    fn ancestor_states_are_shadowed_by_descendants() {
        let (world, m, s, hammer) = hammer_world();
        // Same vt along one chain: only the descendant's valuation counts.
        let s2 = branch_state(&world, s, None, 1, BranchOptions::default()).unwrap();
        let belief = belief_by_subject(&world, s2, hammer, s2).unwrap();
        belief
            .replace(
                &world,
                s2,
                [("color".to_owned(), TemplateValue::from("red"))]
                    .into_iter()
                    .collect(),
            )
            .unwrap();

        let notion = recall_by_subject(&world, m, s, hammer, 1, Some(&["color"])).unwrap();
        assert_eq!(notion.get("color"), Some(&TraitValue::Text("red".into())));
    }
}
