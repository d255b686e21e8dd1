//! Beliefs: versioned valuations of subjects.
//!
//! A belief binds trait values to a subject within one state. Versioning
//! happens by `replace` (a definite update) or `branch` (an uncertain
//! alternative carrying a branch certainty); the new belief takes the old
//! one as its sole base, so the chain of versions is itself a base chain.
//!
//! Trait resolution walks the base list breadth-first with first-seen
//! deduplication, the same traversal for belief-vs-belief bases,
//! belief-vs-archetype bases, and archetype closures. An explicit `null`
//! blocks further inheritance and is returned as-is.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::compose;
use crate::error::{BeliefError, DoxaResult, SchemaError, StateError};
use crate::ident::{BeliefId, MindId, Sid, StateId};
use crate::revindex;
use crate::schema::{Archetype, Traittype};
use crate::state;
use crate::subject::Subject;
use crate::value::{TemplateValue, TraitValue};
use crate::world::{LabelOwner, World};

/// One entry of a belief's ordered base list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseRef {
    Belief(BeliefId),
    Archetype(String),
}

/// Metadata marking a belief as an uncertain alternative.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchMeta {
    pub certainty: f32,
    pub tt: Option<u64>,
}

impl Default for BranchMeta {
    fn default() -> Self {
        Self {
            certainty: 1.0,
            tt: None,
        }
    }
}

/// Input for belief creation. Bases may be archetype labels or existing
/// beliefs; trait values go through the traittype's template resolver.
#[derive(Debug, Clone, Default)]
pub struct BeliefTemplate {
    pub label: Option<String>,
    /// Reuse an existing identity instead of minting a new subject.
    pub subject: Option<Sid>,
    pub bases: Vec<BaseRef>,
    pub traits: BTreeMap<String, TemplateValue>,
    pub branch: Option<BranchMeta>,
}

impl BeliefTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_subject(mut self, subject: Sid) -> Self {
        self.subject = Some(subject);
        self
    }

    pub fn with_archetype(mut self, label: impl Into<String>) -> Self {
        self.bases.push(BaseRef::Archetype(label.into()));
        self
    }

    pub fn with_base(mut self, belief: BeliefId) -> Self {
        self.bases.push(BaseRef::Belief(belief));
        self
    }

    pub fn with_trait(mut self, label: impl Into<String>, value: impl Into<TemplateValue>) -> Self {
        self.traits.insert(label.into(), value.into());
        self
    }

    pub fn with_branch(mut self, meta: BranchMeta) -> Self {
        self.branch = Some(meta);
        self
    }
}

/// One versioned valuation of a subject. Effectively locked once its
/// originating state locks; never destroyed while referenced.
#[derive(Debug, Clone)]
pub struct Belief {
    pub id: BeliefId,
    pub mind: MindId,
    pub origin_state: StateId,
    pub subject: Sid,
    /// Direct bases, declared order preserved.
    pub bases: Vec<BaseRef>,
    /// Own trait bindings (including creation-time composition results).
    pub traits: BTreeMap<String, TraitValue>,
    pub label: Option<String>,
    pub branch: Option<BranchMeta>,
}

impl Belief {
    /// The trait value visible for `traittype`: own entry first (an explicit
    /// `Null` blocks and is returned as-is), then the base chain
    /// breadth-first, beliefs and archetypes alike.
    pub fn trait_value(&self, world: &World, traittype: &Traittype) -> Option<TraitValue> {
        if let Some(own) = self.traits.get(&traittype.label) {
            return Some(own.clone());
        }

        let schema = world.schema();
        let mut seen_beliefs: HashSet<BeliefId> = HashSet::new();
        let mut seen_archetypes: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<BaseRef> = self.bases.iter().cloned().collect();

        while let Some(base) = queue.pop_front() {
            match base {
                BaseRef::Belief(id) => {
                    if !seen_beliefs.insert(id) {
                        continue;
                    }
                    let Ok(belief) = world.belief(id) else {
                        continue;
                    };
                    if let Some(value) = belief.traits.get(&traittype.label) {
                        return Some(value.clone());
                    }
                    queue.extend(belief.bases.iter().cloned());
                }
                BaseRef::Archetype(label) => {
                    if !seen_archetypes.insert(label.clone()) {
                        continue;
                    }
                    let Some(archetype) = schema.archetype(&label) else {
                        continue;
                    };
                    if let Some(value) = archetype.own_trait(&traittype.label) {
                        return Some(value.clone());
                    }
                    for base in &archetype.bases {
                        queue.push_back(BaseRef::Archetype(base.clone()));
                    }
                }
            }
        }
        None
    }

    /// Convenience lookup by trait label.
    pub fn trait_value_by_label(&self, world: &World, label: &str) -> Option<TraitValue> {
        let traittype = world.schema().traittype(label)?;
        self.trait_value(world, &traittype)
    }

    /// Follow a dot-separated path: the first segment resolves on this
    /// belief, every further hop resolves the current value as a subject to
    /// its belief in `state` and recurses. Any miss or non-subject
    /// intermediate yields `None`.
    pub fn trait_path(&self, world: &World, state: StateId, path: &str) -> Option<TraitValue> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.trait_value_by_label(world, first)?;

        for segment in segments {
            let sid = current.as_subject()?;
            let belief = state::belief_by_subject(world, state, sid, state)?;
            current = belief.trait_value_by_label(world, segment)?;
        }
        Some(current)
    }

    /// Lazy breadth-first closure over the archetypes reachable through the
    /// base chain, deduplicated on first sight.
    pub fn archetypes(&self, world: &World) -> Vec<Arc<Archetype>> {
        let schema = world.schema();
        let mut out = Vec::new();
        let mut seen_beliefs: HashSet<BeliefId> = HashSet::new();
        let mut seen_archetypes: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<BaseRef> = self.bases.iter().cloned().collect();

        while let Some(base) = queue.pop_front() {
            match base {
                BaseRef::Belief(id) => {
                    if !seen_beliefs.insert(id) {
                        continue;
                    }
                    if let Ok(belief) = world.belief(id) {
                        queue.extend(belief.bases.iter().cloned());
                    }
                }
                BaseRef::Archetype(label) => {
                    if !seen_archetypes.insert(label.clone()) {
                        continue;
                    }
                    if let Some(archetype) = schema.archetype(&label) {
                        for base in &archetype.bases {
                            queue.push_back(BaseRef::Archetype(base.clone()));
                        }
                        out.push(archetype);
                    }
                }
            }
        }
        out
    }

    /// Whether the archetype closure contains `label`.
    pub fn has_archetype(&self, world: &World, label: &str) -> bool {
        self.archetypes(world).iter().any(|a| a.label == label)
    }

    /// Every belief visible in `state` whose `trait_label` points at this
    /// belief's subject. See the reverse index module.
    pub fn rev_trait(&self, world: &World, state: StateId, trait_label: &str) -> Vec<Arc<Belief>> {
        revindex::rev_trait(world, state, self.subject, trait_label)
    }

    /// Produce a new version of this subject with the listed trait slots
    /// overridden. Must be called on the subject's current valuation in
    /// `state`; the state records the new version in `insert` and this one
    /// in `remove`.
    pub fn replace(
        &self,
        world: &World,
        state: StateId,
        traits: BTreeMap<String, TemplateValue>,
    ) -> DoxaResult<BeliefId> {
        self.supersede(world, state, traits, None)
    }

    /// Like `replace`, but the new version is an uncertain alternative
    /// weighted by `meta.certainty` rather than a definite update.
    pub fn branch(
        &self,
        world: &World,
        state: StateId,
        traits: BTreeMap<String, TemplateValue>,
        meta: Option<BranchMeta>,
    ) -> DoxaResult<BeliefId> {
        self.supersede(world, state, traits, Some(meta.unwrap_or_default()))
    }

    fn supersede(
        &self,
        world: &World,
        state: StateId,
        traits: BTreeMap<String, TemplateValue>,
        branch: Option<BranchMeta>,
    ) -> DoxaResult<BeliefId> {
        let st = world.state(state)?;
        if st.locked {
            return Err(StateError::Locked {
                state_id: state.get(),
            }
            .into());
        }

        let current = state::belief_by_subject(world, state, self.subject, state).ok_or(
            BeliefError::UnknownBelief {
                belief_id: self.id.get(),
            },
        )?;
        if current.id != self.id {
            return Err(BeliefError::UnknownBelief {
                belief_id: self.id.get(),
            }
            .into());
        }

        let new_id = create_from_template(
            world,
            state,
            BeliefTemplate {
                label: None,
                subject: Some(self.subject),
                bases: vec![BaseRef::Belief(self.id)],
                traits,
                branch,
            },
        )?;
        state::remove_belief(world, state, self.id)?;
        Ok(new_id)
    }
}

/// Create a belief in `state` from a template. The workhorse behind
/// `add_belief_from_template`, `replace`, `branch` and prototype creation.
pub(crate) fn create_from_template(
    world: &World,
    state: StateId,
    template: BeliefTemplate,
) -> DoxaResult<BeliefId> {
    let st = world.state(state)?;
    if st.locked {
        return Err(StateError::Locked {
            state_id: state.get(),
        }
        .into());
    }

    let schema = world.schema();
    for base in &template.bases {
        match base {
            BaseRef::Archetype(label) => {
                if !schema.has_archetype(label) {
                    return Err(SchemaError::UnknownArchetype {
                        label: label.clone(),
                    }
                    .into());
                }
            }
            BaseRef::Belief(id) => {
                world.belief(*id)?;
            }
        }
    }

    if let Some(label) = &template.label {
        if world.lookup_label(label).is_some() {
            return Err(BeliefError::LabelInUse {
                label: label.clone(),
            }
            .into());
        }
    }

    let subject = match template.subject {
        Some(sid) => {
            world.subjects().get(sid)?;
            sid
        }
        None => {
            let sid = world.alloc().next_sid()?;
            world
                .subjects()
                .register(Subject::new(sid, template.label.clone()));
            sid
        }
    };

    let mut traits: BTreeMap<String, TraitValue> = BTreeMap::new();
    for (label, value) in &template.traits {
        let traittype = schema
            .traittype(label)
            .ok_or_else(|| SchemaError::UnknownTraittype {
                label: label.clone(),
            })?;
        if traittype.composable {
            if let Some(composed) =
                compose::compose_trait(world, state, &traittype, &template.bases, Some(value))?
            {
                traits.insert(label.clone(), composed);
            }
        } else {
            traits.insert(label.clone(), traittype.resolve_template(world, value)?);
        }
    }

    // Composable traits contributed by bases compose at creation even when
    // the template does not name them; the composed value becomes the own
    // value, so lookups never re-walk the bases.
    for label in schema.composable_labels() {
        if template.traits.contains_key(&label) {
            continue;
        }
        let traittype = schema.traittype(&label).ok_or_else(|| {
            SchemaError::UnknownTraittype {
                label: label.clone(),
            }
        })?;
        if let Some(composed) =
            compose::compose_trait(world, state, &traittype, &template.bases, None)?
        {
            traits.insert(label, composed);
        }
    }

    let id = world.alloc().next_belief()?;
    let belief = Belief {
        id,
        mind: st.mind,
        origin_state: state,
        subject,
        bases: template.bases,
        traits,
        label: template.label.clone(),
        branch: template.branch,
    };

    if let Some(label) = &template.label {
        world.claim_label(label, LabelOwner::Belief { sid: subject })?;
    }

    world.rev().index_belief(&belief, schema);
    world.insert_belief(Arc::new(belief));
    world.with_state_mut(state, |s| s.insert.push(id))?;
    tracing::debug!(belief = %id, state = %state, "belief created");
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::CreateOptions;

    fn world_with_schema() -> (World, StateId) {
        let world = World::new().unwrap();
        world
            .register_json(
                r#"{
                    "traittypes": {
                        "color": "string",
                        "weight": "number",
                        "mood": { "type": "string", "values": ["calm", "angry"] },
                        "location": { "type": "Place" }
                    },
                    "archetypes": {
                        "Thing": { "traits": { "color": "gray" } },
                        "Place": { "bases": ["Thing"] },
                        "Tool": { "bases": ["Thing"], "traits": { "weight": 1.0 } }
                    },
                    "prototypes": {}
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
        (world, s)
    }

    #[test]
    fn archetype_default_inherited_breadth_first() {
        let (world, s) = world_with_schema();
        let id = world
            .add_belief(
                s,
                BeliefTemplate::new().with_label("hammer").with_archetype("Tool"),
            )
            .unwrap();
        let hammer = world.belief(id).unwrap();

        // Own archetype supplies weight; the transitive Thing supplies color.
        assert_eq!(
            hammer.trait_value_by_label(&world, "weight"),
            Some(TraitValue::Number(1.0))
        );
        assert_eq!(
            hammer.trait_value_by_label(&world, "color"),
            Some(TraitValue::Text("gray".into()))
        );
    }

    #[test]
    fn own_value_shadows_bases_and_null_blocks() {
        let (world, s) = world_with_schema();
        let id = world
            .add_belief(
                s,
                BeliefTemplate::new()
                    .with_label("anvil")
                    .with_archetype("Tool")
                    .with_trait("color", "black")
                    .with_trait("weight", TemplateValue::Null),
            )
            .unwrap();
        let anvil = world.belief(id).unwrap();

        assert_eq!(
            anvil.trait_value_by_label(&world, "color"),
            Some(TraitValue::Text("black".into()))
        );
        // Explicit null blocks the Tool default and is returned as-is.
        assert_eq!(
            anvil.trait_value_by_label(&world, "weight"),
            Some(TraitValue::Null)
        );
    }

    #[test]
    fn label_collision_rejected() {
        let (world, s) = world_with_schema();
        world
            .add_belief(
                s,
                BeliefTemplate::new().with_label("hammer").with_archetype("Tool"),
            )
            .unwrap();
        let result = world.add_belief(
            s,
            BeliefTemplate::new().with_label("hammer").with_archetype("Tool"),
        );
        assert!(result.is_err());
    }

    #[test]
    fn enum_and_type_validation() {
        let (world, s) = world_with_schema();
        let bad_enum = world.add_belief(
            s,
            BeliefTemplate::new()
                .with_label("sulker")
                .with_archetype("Thing")
                .with_trait("mood", "sulking"),
        );
        assert!(bad_enum.is_err());

        let bad_type = world.add_belief(
            s,
            BeliefTemplate::new()
                .with_label("figure")
                .with_archetype("Thing")
                .with_trait("weight", "heavy"),
        );
        assert!(bad_type.is_err());
    }

    #[test]
    fn unknown_archetype_base_rejected() {
        let (world, s) = world_with_schema();
        let result = world.add_belief(
            s,
            BeliefTemplate::new().with_label("wisp").with_archetype("Ghost"),
        );
        assert!(result.is_err());
    }

    #[test]
    fn trait_path_follows_subjects() {
        let (world, s) = world_with_schema();
        let shed = world
            .add_belief(
                s,
                BeliefTemplate::new()
                    .with_label("shed")
                    .with_archetype("Place")
                    .with_trait("color", "red"),
            )
            .unwrap();
        let _ = shed;
        let hammer = world
            .add_belief(
                s,
                BeliefTemplate::new()
                    .with_label("hammer")
                    .with_archetype("Tool")
                    .with_trait("location", "shed"),
            )
            .unwrap();

        let hammer = world.belief(hammer).unwrap();
        assert_eq!(
            hammer.trait_path(&world, s, "location.color"),
            Some(TraitValue::Text("red".into()))
        );
        // Non-subject intermediate reports "not found".
        assert_eq!(hammer.trait_path(&world, s, "color.color"), None);
    }

    #[test]
    fn archetype_closure_is_bfs_deduped() {
        let (world, s) = world_with_schema();
        let id = world
            .add_belief(
                s,
                BeliefTemplate::new()
                    .with_label("kit")
                    .with_archetype("Tool")
                    .with_archetype("Place"),
            )
            .unwrap();
        let kit = world.belief(id).unwrap();
        let labels: Vec<String> = kit
            .archetypes(&world)
            .iter()
            .map(|a| a.label.clone())
            .collect();
        // Direct bases first in declared order, shared Thing once.
        assert_eq!(labels, vec!["Tool", "Place", "Thing"]);
        assert!(kit.has_archetype(&world, "Thing"));
        assert!(!kit.has_archetype(&world, "Ghost"));
    }

    #[test]
    fn replace_requires_current_version() {
        let (world, s) = world_with_schema();
        let v1 = world
            .add_belief(
                s,
                BeliefTemplate::new()
                    .with_label("hammer")
                    .with_archetype("Tool")
                    .with_trait("color", "black"),
            )
            .unwrap();
        let belief = world.belief(v1).unwrap();
        let v2 = belief
            .replace(
                &world,
                s,
                [("color".to_owned(), TemplateValue::from("red"))]
                    .into_iter()
                    .collect(),
            )
            .unwrap();

        // Replacing the superseded version again fails.
        let stale = belief.replace(
            &world,
            s,
            [("color".to_owned(), TemplateValue::from("blue"))]
                .into_iter()
                .collect(),
        );
        assert!(stale.is_err());

        let current = world.belief(v2).unwrap();
        assert_eq!(
            current.trait_value_by_label(&world, "color"),
            Some(TraitValue::Text("red".into()))
        );
        // Untouched slots inherit through the version chain.
        assert_eq!(
            current.trait_value_by_label(&world, "weight"),
            Some(TraitValue::Number(1.0))
        );
    }

    #[test]
    fn branch_records_certainty() {
        let (world, s) = world_with_schema();
        let v1 = world
            .add_belief(
                s,
                BeliefTemplate::new().with_label("coin").with_archetype("Thing"),
            )
            .unwrap();
        let belief = world.belief(v1).unwrap();
        let v2 = belief
            .branch(
                &world,
                s,
                [("color".to_owned(), TemplateValue::from("gold"))]
                    .into_iter()
                    .collect(),
                Some(BranchMeta {
                    certainty: 0.8,
                    tt: None,
                }),
            )
            .unwrap();
        let branched = world.belief(v2).unwrap();
        assert!((branched.branch.as_ref().unwrap().certainty - 0.8).abs() < f32::EPSILON);
    }
}
