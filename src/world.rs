//! World facade: top-level handle owning every registry.
//!
//! The world owns the ID allocator, the schema, the subject/belief/state/
//! mind registries, the global label map and the reverse index. It seeds
//! the root mind (`Logos`) and its origin state on creation; `reset` tears
//! everything down together and re-seeds. All long-lived references
//! (traittypes, archetypes, locked states, locked beliefs) are effectively
//! immutable and safely shareable.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;

use crate::belief::{self, Belief, BeliefTemplate};
use crate::error::{BeliefError, DoxaResult, MindError, SchemaError, SerialError, StateError};
use crate::ident::{AtomicIdAllocator, BeliefId, MindId, Sid, StateId};
use crate::mind::Mind;
use crate::recall::{self, Notion};
use crate::revindex::ReverseIndex;
use crate::schema::{self, SchemaDecl, SchemaRegistry, TraitKind, Traittype};
use crate::state::{self, BranchOptions, State, StateKind};
use crate::subject::SubjectRegistry;
use crate::value::TemplateValue;

/// What a global label currently names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelOwner {
    Traittype,
    Archetype,
    Belief { sid: Sid },
    Mind(MindId),
    Subject(Sid),
}

impl LabelOwner {
    pub fn role(&self) -> &'static str {
        match self {
            Self::Traittype => "traittype",
            Self::Archetype => "archetype",
            Self::Belief { .. } => "belief",
            Self::Mind(_) => "mind",
            Self::Subject(_) => "subject",
        }
    }
}

/// The doxa world: allocator, registries, root mind.
pub struct World {
    alloc: AtomicIdAllocator,
    schema: SchemaRegistry,
    subjects: SubjectRegistry,
    labels: DashMap<String, LabelOwner>,
    /// Archetype label -> subject of its shared belief, created on demand.
    archetype_subjects: DashMap<String, Sid>,
    beliefs: DashMap<BeliefId, Arc<Belief>>,
    states: DashMap<StateId, State>,
    minds: DashMap<MindId, Mind>,
    rev: ReverseIndex,
    root: RwLock<(MindId, StateId)>,
}

impl World {
    /// Create a world with the root mind seeded.
    pub fn new() -> DoxaResult<Self> {
        let world = Self {
            alloc: AtomicIdAllocator::new(),
            schema: SchemaRegistry::new(),
            subjects: SubjectRegistry::new(),
            labels: DashMap::new(),
            archetype_subjects: DashMap::new(),
            beliefs: DashMap::new(),
            states: DashMap::new(),
            minds: DashMap::new(),
            rev: ReverseIndex::new(),
            root: RwLock::new((MindId::new(u64::MAX).expect("nonzero"), StateId::new(u64::MAX).expect("nonzero"))),
        };
        world.seed()?;
        Ok(world)
    }

    /// Clear every registry, reset the allocator and re-seed the root mind.
    pub fn reset(&self) -> DoxaResult<()> {
        self.schema.clear();
        self.subjects.clear();
        self.labels.clear();
        self.archetype_subjects.clear();
        self.beliefs.clear();
        self.states.clear();
        self.minds.clear();
        self.rev.clear();
        self.alloc.reset();
        self.seed()?;
        tracing::info!("world reset");
        Ok(())
    }

    fn seed(&self) -> DoxaResult<()> {
        let logos = self.alloc.next_mind()?;
        self.minds.insert(logos, Mind::new(logos, Some("Logos".into()), None));
        self.labels.insert("Logos".into(), LabelOwner::Mind(logos));

        let origin = self.alloc.next_state()?;
        self.states.insert(
            origin,
            State {
                id: origin,
                mind: logos,
                base: None,
                ground: None,
                tt: 0,
                vt: 0,
                self_subject: None,
                certainty: 1.0,
                locked: false,
                insert: Vec::new(),
                remove: Vec::new(),
                kind: StateKind::Timeline,
                resolutions: Vec::new(),
            },
        );
        self.with_mind_mut(logos, |m| {
            m.origin = Some(origin);
            m.states.push(origin);
        })?;
        *self.root.write().expect("root lock poisoned") = (logos, origin);

        // Built-in traittype used by learn_about to mark observations.
        self.schema.insert_traittype(Traittype {
            label: "@about".into(),
            kind: TraitKind::Subject,
            container: None,
            composable: false,
            mind_scope: None,
            exposure: None,
        });
        self.labels.insert("@about".into(), LabelOwner::Traittype);

        tracing::info!(logos = %logos, origin = %origin, "world seeded");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Registry handles
    // -----------------------------------------------------------------------

    pub fn alloc(&self) -> &AtomicIdAllocator {
        &self.alloc
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    pub fn subjects(&self) -> &SubjectRegistry {
        &self.subjects
    }

    pub fn rev(&self) -> &ReverseIndex {
        &self.rev
    }

    /// The root mind.
    pub fn logos(&self) -> MindId {
        self.root.read().expect("root lock poisoned").0
    }

    /// The root mind's origin state.
    pub fn logos_state(&self) -> StateId {
        self.root.read().expect("root lock poisoned").1
    }

    // -----------------------------------------------------------------------
    // Labels
    // -----------------------------------------------------------------------

    pub fn lookup_label(&self, label: &str) -> Option<LabelOwner> {
        self.labels.get(label).map(|r| r.value().clone())
    }

    pub fn all_labels(&self) -> HashSet<String> {
        self.labels.iter().map(|r| r.key().clone()).collect()
    }

    /// Claim a globally unique label. Errors if the label is taken.
    pub(crate) fn claim_label(&self, label: &str, owner: LabelOwner) -> DoxaResult<()> {
        if self.labels.contains_key(label) {
            return Err(BeliefError::LabelInUse {
                label: label.to_owned(),
            }
            .into());
        }
        self.labels.insert(label.to_owned(), owner);
        Ok(())
    }

    /// Resolve a label to the subject it denotes: a belief's or subject's
    /// own SID, or an archetype's shared-belief subject.
    pub fn resolve_label_to_sid(&self, label: &str) -> DoxaResult<Sid> {
        match self.lookup_label(label) {
            Some(LabelOwner::Belief { sid }) | Some(LabelOwner::Subject(sid)) => Ok(sid),
            Some(LabelOwner::Archetype) => self.archetype_subject(label),
            _ => Err(BeliefError::UnknownSubject {
                subject: label.to_owned(),
            }
            .into()),
        }
    }

    /// The subject of an archetype's shared belief, created on demand in
    /// the logos state.
    pub fn archetype_subject(&self, label: &str) -> DoxaResult<Sid> {
        if let Some(sid) = self.archetype_subjects.get(label) {
            return Ok(*sid.value());
        }
        if !self.schema.has_archetype(label) {
            return Err(SchemaError::UnknownArchetype {
                label: label.to_owned(),
            }
            .into());
        }
        let belief_id = belief::create_from_template(
            self,
            self.logos_state(),
            BeliefTemplate::new().with_archetype(label),
        )?;
        let sid = self.belief(belief_id)?.subject;
        self.archetype_subjects.insert(label.to_owned(), sid);
        Ok(sid)
    }

    // -----------------------------------------------------------------------
    // Schema
    // -----------------------------------------------------------------------

    /// Register a declarative schema (traittypes, archetypes, prototypes).
    pub fn register(&self, decl: SchemaDecl) -> DoxaResult<()> {
        schema::register_schema(self, decl)
    }

    /// Parse and register a JSON schema document.
    pub fn register_json(&self, json: &str) -> DoxaResult<()> {
        let decl: SchemaDecl = serde_json::from_str(json).map_err(|e| SerialError::Json {
            message: e.to_string(),
        })?;
        self.register(decl)
    }

    // -----------------------------------------------------------------------
    // Entities
    // -----------------------------------------------------------------------

    pub fn belief(&self, id: BeliefId) -> DoxaResult<Arc<Belief>> {
        self.beliefs
            .get(&id)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| {
                BeliefError::UnknownBelief {
                    belief_id: id.get(),
                }
                .into()
            })
    }

    pub(crate) fn insert_belief(&self, belief: Arc<Belief>) {
        self.beliefs.insert(belief.id, belief);
    }

    pub fn state(&self, id: StateId) -> DoxaResult<State> {
        self.states
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or_else(|| StateError::Unknown { state_id: id.get() }.into())
    }

    pub(crate) fn insert_state(&self, state: State) {
        self.states.insert(state.id, state);
    }

    pub(crate) fn with_state_mut<R>(
        &self,
        id: StateId,
        f: impl FnOnce(&mut State) -> R,
    ) -> DoxaResult<R> {
        let mut entry = self
            .states
            .get_mut(&id)
            .ok_or(StateError::Unknown { state_id: id.get() })?;
        Ok(f(entry.value_mut()))
    }

    /// Snapshot of every state's (id, ground, locked). Lock propagation and
    /// host-state lookups walk this instead of holding map shards.
    pub(crate) fn states_snapshot(&self) -> Vec<(StateId, Option<StateId>, bool)> {
        self.states
            .iter()
            .map(|r| (r.value().id, r.value().ground, r.value().locked))
            .collect()
    }

    pub fn state_ids(&self) -> Vec<StateId> {
        let mut ids: Vec<StateId> = self.states.iter().map(|r| *r.key()).collect();
        ids.sort();
        ids
    }

    pub fn mind(&self, id: MindId) -> DoxaResult<Mind> {
        self.minds
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or_else(|| MindError::Unknown { mind_id: id.get() }.into())
    }

    pub(crate) fn insert_mind(&self, mind: Mind) {
        self.minds.insert(mind.id, mind);
    }

    pub(crate) fn with_mind_mut<R>(
        &self,
        id: MindId,
        f: impl FnOnce(&mut Mind) -> R,
    ) -> DoxaResult<R> {
        let mut entry = self
            .minds
            .get_mut(&id)
            .ok_or(MindError::Unknown { mind_id: id.get() })?;
        Ok(f(entry.value_mut()))
    }

    pub fn mind_ids(&self) -> Vec<MindId> {
        let mut ids: Vec<MindId> = self.minds.iter().map(|r| *r.key()).collect();
        ids.sort();
        ids
    }

    pub fn belief_ids(&self) -> Vec<BeliefId> {
        let mut ids: Vec<BeliefId> = self.beliefs.iter().map(|r| *r.key()).collect();
        ids.sort();
        ids
    }

    /// Create a mind, optionally labeled and parented.
    pub fn create_mind(&self, label: Option<String>, parent: Option<MindId>) -> DoxaResult<MindId> {
        if let Some(label) = &label {
            if self.labels.contains_key(label) {
                return Err(MindError::LabelInUse {
                    label: label.clone(),
                }
                .into());
            }
        }
        if let Some(parent) = parent {
            self.mind(parent)?;
        }
        let id = self.alloc.next_mind()?;
        if let Some(label) = &label {
            self.labels.insert(label.clone(), LabelOwner::Mind(id));
        }
        self.minds.insert(id, Mind::new(id, label, parent));
        if let Some(parent) = parent {
            self.with_mind_mut(parent, |m| m.children.push(id))?;
        }
        tracing::debug!(mind = %id, "mind created");
        Ok(id)
    }

    // -----------------------------------------------------------------------
    // Facade operations
    // -----------------------------------------------------------------------

    /// Create a belief in `state` from a template.
    pub fn add_belief(&self, state: StateId, template: BeliefTemplate) -> DoxaResult<BeliefId> {
        belief::create_from_template(self, state, template)
    }

    /// Bulk creation: one labeled template per entry.
    pub fn add_beliefs(
        &self,
        state: StateId,
        templates: impl IntoIterator<Item = (String, BeliefTemplate)>,
    ) -> DoxaResult<Vec<BeliefId>> {
        let mut out = Vec::new();
        for (label, template) in templates {
            out.push(self.add_belief(state, template.with_label(label))?);
        }
        Ok(out)
    }

    /// Branch a successor state. See [`state::branch_state`].
    pub fn branch_state(
        &self,
        from: StateId,
        ground: Option<StateId>,
        vt: u64,
        opts: BranchOptions,
    ) -> DoxaResult<StateId> {
        state::branch_state(self, from, ground, vt, opts)
    }

    /// Seal a state and its dependent child-mind states.
    pub fn lock_state(&self, id: StateId) -> DoxaResult<()> {
        state::lock_state(self, id)
    }

    /// Recall a subject's traits at `vt`. See [`recall::recall_by_subject`].
    pub fn recall_by_subject(
        &self,
        mind: MindId,
        ground_state: StateId,
        subject: Sid,
        vt: u64,
        request: Option<&[&str]>,
    ) -> DoxaResult<Notion> {
        recall::recall_by_subject(self, mind, ground_state, subject, vt, request)
    }

    /// Recall a notion per subject satisfying an archetype closure.
    pub fn recall_by_archetype(
        &self,
        mind: MindId,
        ground_state: StateId,
        archetype_label: &str,
        vt: u64,
        request: Option<&[&str]>,
    ) -> DoxaResult<Vec<Notion>> {
        recall::recall_by_archetype(self, mind, ground_state, archetype_label, vt, request)
    }

    /// The belief for `subject` visible at transaction time `tt` in `mind`.
    pub fn valid_at(&self, mind: MindId, subject: Sid, tt: u64) -> Option<Arc<Belief>> {
        crate::mind::valid_at(self, mind, subject, tt)
    }

    /// Serialize a mind tree to JSON. See the serialization module.
    pub fn save_mind(&self, mind: MindId) -> DoxaResult<String> {
        crate::serial::save_mind(self, mind)
    }

    /// Load a payload produced by `save_mind`.
    pub fn load(&self, json: &str) -> DoxaResult<crate::serial::Loaded> {
        crate::serial::load(self, json)
    }

    /// Summary counts over every registry.
    pub fn info(&self) -> WorldInfo {
        WorldInfo {
            traittypes: self.schema.traittype_count(),
            archetypes: self.schema.archetype_count(),
            subjects: self.subjects.len(),
            beliefs: self.beliefs.len(),
            states: self.states.len(),
            minds: self.minds.len(),
            next_id: self.alloc.peek_next(),
        }
    }

    /// Resolve an entity label for diagnostics, falling back to the SID form.
    pub fn resolve_subject_label(&self, sid: Sid) -> String {
        self.subjects
            .get(sid)
            .ok()
            .and_then(|s| s.label)
            .unwrap_or_else(|| sid.to_string())
    }

    /// Helper for templates: a trait value resolved outside any belief.
    pub fn resolve_template_value(
        &self,
        trait_label: &str,
        template: &TemplateValue,
    ) -> DoxaResult<crate::value::TraitValue> {
        let traittype =
            self.schema
                .traittype(trait_label)
                .ok_or_else(|| SchemaError::UnknownTraittype {
                    label: trait_label.to_owned(),
                })?;
        traittype.resolve_template(self, template)
    }
}

/// Summary information about the world registries.
#[derive(Debug, Clone)]
pub struct WorldInfo {
    pub traittypes: usize,
    pub archetypes: usize,
    pub subjects: usize,
    pub beliefs: usize,
    pub states: usize,
    pub minds: usize,
    pub next_id: u64,
}

impl std::fmt::Display for WorldInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "doxa world info")?;
        writeln!(f, "  traittypes: {}", self.traittypes)?;
        writeln!(f, "  archetypes: {}", self.archetypes)?;
        writeln!(f, "  subjects:   {}", self.subjects)?;
        writeln!(f, "  beliefs:    {}", self.beliefs)?;
        writeln!(f, "  states:     {}", self.states)?;
        writeln!(f, "  minds:      {}", self.minds)?;
        writeln!(f, "  next id:    {}", self.next_id)?;
        Ok(())
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("beliefs", &self.beliefs.len())
            .field("states", &self.states.len())
            .field("minds", &self.minds.len())
            .finish()
    }
}
