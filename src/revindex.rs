//! Reverse trait index: which beliefs point at a subject?
//!
//! For every traittype whose values are subject references, belief creation
//! records `subject -> { traittype -> beliefs }`, including subjects found
//! inside array containers and fuzzy alternatives. Queries filter the
//! candidates down to the versions actually visible from a state.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use dashmap::DashMap;

use crate::belief::Belief;
use crate::ident::{BeliefId, Sid, StateId};
use crate::schema::SchemaRegistry;
use crate::state;
use crate::world::World;

/// The index: subject -> traittype label -> set of pointing beliefs.
#[derive(Debug, Default)]
pub struct ReverseIndex {
    by_subject: DashMap<Sid, BTreeMap<String, BTreeSet<BeliefId>>>,
}

impl ReverseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record every subject reference in a freshly created belief.
    pub fn index_belief(&self, belief: &Belief, schema: &SchemaRegistry) {
        for (trait_label, value) in &belief.traits {
            let Some(traittype) = schema.traittype(trait_label) else {
                continue;
            };
            if !traittype.kind.is_subject_ref() {
                continue;
            }
            let mut referenced = Vec::new();
            value.referenced_subjects(&mut referenced);
            for sid in referenced {
                self.by_subject
                    .entry(sid)
                    .or_default()
                    .entry(trait_label.clone())
                    .or_default()
                    .insert(belief.id);
            }
        }
    }

    /// All beliefs ever recorded as pointing at `subject` through
    /// `trait_label`, regardless of visibility.
    pub fn candidates(&self, subject: Sid, trait_label: &str) -> Vec<BeliefId> {
        self.by_subject
            .get(&subject)
            .and_then(|entry| {
                entry
                    .value()
                    .get(trait_label)
                    .map(|set| set.iter().copied().collect())
            })
            .unwrap_or_default()
    }

    /// Number of indexed subjects.
    pub fn len(&self) -> usize {
        self.by_subject.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_subject.is_empty()
    }

    pub fn clear(&self) {
        self.by_subject.clear();
    }
}

/// Every belief visible in `state` whose `trait_label` points at `target`.
///
/// Candidates come from the index; each candidate subject is then resolved
/// to its current version in `state` (walking the base chain, honoring
/// convergence resolutions), and kept only if that current version still
/// points at the target. Results are deduplicated by subject and ordered by
/// SID for determinism.
pub fn rev_trait(
    world: &World,
    state: StateId,
    target: Sid,
    trait_label: &str,
) -> Vec<Arc<Belief>> {
    let candidates = world.rev().candidates(target, trait_label);
    let candidate_set: HashSet<BeliefId> = candidates.iter().copied().collect();

    let mut subjects: Vec<Sid> = Vec::new();
    for id in &candidates {
        if let Ok(belief) = world.belief(*id) {
            if !subjects.contains(&belief.subject) {
                subjects.push(belief.subject);
            }
        }
    }
    subjects.sort();

    let mut out = Vec::new();
    for subject in subjects {
        if let Some(current) = state::belief_by_subject(world, state, subject, state) {
            if candidate_set.contains(&current.id) {
                out.push(current);
            }
        }
    }
    out
}
