//! Serialization: typed JSON envelopes with two-phase load.
//!
//! `save_mind` emits a tree rooted at a mind envelope. Child minds (and
//! minds referenced through trait values) are discovered breadth-first and
//! carried under `nested_minds`; states and beliefs are listed per mind,
//! sorted by `_id`; every subject referenced anywhere in the payload is
//! listed once at the root. All cross-references are integer `_id`s, and
//! subject references inside trait values are integer SIDs, preserving
//! temporal meaning across the round trip.
//!
//! Loading is two-phase: envelopes are instantiated by ID first, then
//! references are checked and linked (against the payload, falling back to
//! the live world for referents outside it, such as the logos origin).
//! Afterwards the allocator is advanced past the maximum observed `_id`.
//!
//! Output is deterministic (sorted entity lists, `BTreeMap` trait maps,
//! fixed envelope field order), so `save(load(save(m)))` is byte-identical.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::belief::{BaseRef, Belief, BranchMeta};
use crate::error::{DoxaResult, SerialError};
use crate::fuzzy::{Alternative, Fuzzy};
use crate::ident::{BeliefId, MindId, Sid, StateId};
use crate::mind::Mind;
use crate::state::{State, StateKind};
use crate::subject::Subject;
use crate::value::TraitValue;
use crate::world::{LabelOwner, World};

/// What a payload's root envelope turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loaded {
    Mind(MindId),
    Belief(BeliefId),
    State(StateId),
    Subject(Sid),
}

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MindEnv {
    #[serde(rename = "_type")]
    type_tag: String,
    #[serde(rename = "_id")]
    id: u64,
    label: Option<String>,
    parent: Option<u64>,
    origin: Option<u64>,
    #[serde(default)]
    subjects: Vec<SubjectEnv>,
    states: Vec<StateEnv>,
    beliefs: Vec<BeliefEnv>,
    nested_minds: Vec<MindEnv>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SubjectEnv {
    #[serde(rename = "_type")]
    type_tag: String,
    sid: u64,
    label: Option<String>,
    ground_mind: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StateEnv {
    #[serde(rename = "_type")]
    type_tag: String,
    #[serde(rename = "_id")]
    id: u64,
    in_mind: u64,
    base: Option<u64>,
    ground_state: Option<u64>,
    tt: u64,
    vt: u64,
    #[serde(rename = "self")]
    self_subject: Option<u64>,
    certainty: f32,
    locked: bool,
    insert: Vec<u64>,
    remove: Vec<u64>,
    components: Option<Vec<u64>>,
    resolutions: Vec<(u64, u64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BeliefEnv {
    #[serde(rename = "_type")]
    type_tag: String,
    #[serde(rename = "_id")]
    id: u64,
    in_mind: u64,
    origin_state: u64,
    subject: u64,
    label: Option<String>,
    bases: Vec<BaseEnv>,
    traits: BTreeMap<String, serde_json::Value>,
    branch: Option<BranchEnv>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum BaseEnv {
    Belief { belief: u64 },
    Archetype { archetype: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BranchEnv {
    certainty: f32,
    tt: Option<u64>,
}

// ---------------------------------------------------------------------------
// Trait value <-> JSON
// ---------------------------------------------------------------------------

fn value_to_json(value: &TraitValue) -> serde_json::Value {
    match value {
        TraitValue::Null => serde_json::Value::Null,
        TraitValue::Bool(b) => json!(b),
        TraitValue::Number(n) => json!(n),
        TraitValue::Text(s) => json!(s),
        TraitValue::Subject(sid) => json!({ "_type": "Subject", "sid": sid.get() }),
        TraitValue::MindRef(id) => json!({ "_type": "Mind", "_id": id.get() }),
        TraitValue::StateRef(id) => json!({ "_type": "State", "_id": id.get() }),
        TraitValue::List(items) => {
            serde_json::Value::Array(items.iter().map(value_to_json).collect())
        }
        TraitValue::Fuzzy(fuzzy) => {
            if fuzzy.is_unknown() {
                json!({ "_type": "Fuzzy", "unknown": true })
            } else {
                let alternatives: Vec<serde_json::Value> = fuzzy
                    .alternatives()
                    .iter()
                    .map(|a| json!({ "certainty": a.certainty, "value": value_to_json(&a.value) }))
                    .collect();
                json!({ "_type": "Fuzzy", "alternatives": alternatives })
            }
        }
    }
}

fn value_from_json(value: &serde_json::Value) -> DoxaResult<TraitValue> {
    let malformed = |message: &str| -> crate::error::DoxaError {
        SerialError::MalformedEnvelope {
            message: message.to_owned(),
        }
        .into()
    };

    Ok(match value {
        serde_json::Value::Null => TraitValue::Null,
        serde_json::Value::Bool(b) => TraitValue::Bool(*b),
        serde_json::Value::Number(n) => {
            TraitValue::Number(n.as_f64().ok_or_else(|| malformed("non-finite number"))?)
        }
        serde_json::Value::String(s) => TraitValue::Text(s.clone()),
        serde_json::Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(value_from_json(item)?);
            }
            TraitValue::List(out)
        }
        serde_json::Value::Object(map) => {
            let tag = map
                .get("_type")
                .and_then(|t| t.as_str())
                .ok_or_else(|| malformed("object trait value without _type"))?;
            match tag {
                "Subject" => {
                    let sid = map
                        .get("sid")
                        .and_then(|v| v.as_u64())
                        .and_then(Sid::new)
                        .ok_or_else(|| malformed("Subject reference without sid"))?;
                    TraitValue::Subject(sid)
                }
                "Mind" => {
                    let id = map
                        .get("_id")
                        .and_then(|v| v.as_u64())
                        .and_then(MindId::new)
                        .ok_or_else(|| malformed("Mind reference without _id"))?;
                    TraitValue::MindRef(id)
                }
                "State" => {
                    let id = map
                        .get("_id")
                        .and_then(|v| v.as_u64())
                        .and_then(StateId::new)
                        .ok_or_else(|| malformed("State reference without _id"))?;
                    TraitValue::StateRef(id)
                }
                "Fuzzy" => {
                    if map.get("unknown").and_then(|v| v.as_bool()) == Some(true) {
                        TraitValue::Fuzzy(Fuzzy::unknown())
                    } else {
                        let raw = map
                            .get("alternatives")
                            .and_then(|v| v.as_array())
                            .ok_or_else(|| malformed("Fuzzy without alternatives"))?;
                        let mut alternatives = Vec::with_capacity(raw.len());
                        for alt in raw {
                            let certainty = alt
                                .get("certainty")
                                .and_then(|c| c.as_f64())
                                .ok_or_else(|| malformed("alternative without certainty"))?
                                as f32;
                            let inner = alt
                                .get("value")
                                .ok_or_else(|| malformed("alternative without value"))?;
                            alternatives.push(Alternative {
                                value: value_from_json(inner)?,
                                certainty,
                            });
                        }
                        TraitValue::Fuzzy(Fuzzy::from_alternatives(alternatives))
                    }
                }
                other => return Err(malformed(&format!("unknown _type {other:?}"))),
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Save
// ---------------------------------------------------------------------------

/// Minds to serialize alongside `root`: its child tree plus any mind
/// referenced through trait values, breadth-first, ancestors excluded.
fn discover_minds(world: &World, root: MindId) -> Vec<MindId> {
    let mut ancestors: HashSet<MindId> = HashSet::new();
    let mut cur = world.mind(root).ok().and_then(|m| m.parent);
    while let Some(id) = cur {
        ancestors.insert(id);
        cur = world.mind(id).ok().and_then(|m| m.parent);
    }

    let mut collected: Vec<MindId> = Vec::new();
    let mut seen: HashSet<MindId> = HashSet::new();
    let mut queue: VecDeque<MindId> = VecDeque::new();
    queue.push_back(root);
    seen.insert(root);

    while let Some(mid) = queue.pop_front() {
        collected.push(mid);
        let Ok(mind) = world.mind(mid) else { continue };
        for &child in &mind.children {
            if seen.insert(child) {
                queue.push_back(child);
            }
        }
        for belief_id in world.belief_ids() {
            let Ok(belief) = world.belief(belief_id) else {
                continue;
            };
            if belief.mind != mid {
                continue;
            }
            for value in belief.traits.values() {
                collect_mind_refs(value, &mut |referenced| {
                    if !ancestors.contains(&referenced) && seen.insert(referenced) {
                        queue.push_back(referenced);
                    }
                });
            }
        }
    }
    collected
}

fn collect_mind_refs(value: &TraitValue, visit: &mut impl FnMut(MindId)) {
    match value {
        TraitValue::MindRef(id) => visit(*id),
        TraitValue::List(items) => {
            for item in items {
                collect_mind_refs(item, visit);
            }
        }
        TraitValue::Fuzzy(fuzzy) => {
            for alt in fuzzy.alternatives() {
                collect_mind_refs(&alt.value, visit);
            }
        }
        _ => {}
    }
}

fn state_env(state: &State) -> StateEnv {
    let components = match &state.kind {
        StateKind::Timeline => None,
        StateKind::Convergence { components } => {
            Some(components.iter().map(|c| c.get()).collect())
        }
    };
    StateEnv {
        type_tag: "State".into(),
        id: state.id.get(),
        in_mind: state.mind.get(),
        base: state.base.map(|b| b.get()),
        ground_state: state.ground.map(|g| g.get()),
        tt: state.tt,
        vt: state.vt,
        self_subject: state.self_subject.map(|s| s.get()),
        certainty: state.certainty,
        locked: state.locked,
        insert: state.insert.iter().map(|b| b.get()).collect(),
        remove: state.remove.iter().map(|b| b.get()).collect(),
        components,
        resolutions: state
            .resolutions
            .iter()
            .map(|(from, to)| (from.get(), to.get()))
            .collect(),
    }
}

fn belief_env(belief: &Belief) -> BeliefEnv {
    BeliefEnv {
        type_tag: "Belief".into(),
        id: belief.id.get(),
        in_mind: belief.mind.get(),
        origin_state: belief.origin_state.get(),
        subject: belief.subject.get(),
        label: belief.label.clone(),
        bases: belief
            .bases
            .iter()
            .map(|base| match base {
                BaseRef::Belief(id) => BaseEnv::Belief { belief: id.get() },
                BaseRef::Archetype(label) => BaseEnv::Archetype {
                    archetype: label.clone(),
                },
            })
            .collect(),
        traits: belief
            .traits
            .iter()
            .map(|(label, value)| (label.clone(), value_to_json(value)))
            .collect(),
        branch: belief.branch.as_ref().map(|meta| BranchEnv {
            certainty: meta.certainty,
            tt: meta.tt,
        }),
    }
}

fn mind_env(world: &World, mind: &Mind, collected: &HashSet<MindId>) -> DoxaResult<MindEnv> {
    let mut states: Vec<StateEnv> = Vec::new();
    for id in world.state_ids() {
        let state = world.state(id)?;
        if state.mind == mind.id {
            states.push(state_env(&state));
        }
    }

    let mut beliefs: Vec<BeliefEnv> = Vec::new();
    for id in world.belief_ids() {
        let belief = world.belief(id)?;
        if belief.mind == mind.id {
            beliefs.push(belief_env(&belief));
        }
    }

    let mut nested = Vec::new();
    for &child in &mind.children {
        if collected.contains(&child) {
            nested.push(mind_env(world, &world.mind(child)?, collected)?);
        }
    }

    Ok(MindEnv {
        type_tag: "Mind".into(),
        id: mind.id.get(),
        label: mind.label.clone(),
        parent: mind.parent.map(|p| p.get()),
        origin: mind.origin.map(|o| o.get()),
        subjects: Vec::new(),
        states,
        beliefs,
        nested_minds: nested,
    })
}

fn collect_subjects(env: &MindEnv, out: &mut BTreeSet<u64>) {
    for state in &env.states {
        if let Some(sid) = state.self_subject {
            out.insert(sid);
        }
    }
    for belief in &env.beliefs {
        out.insert(belief.subject);
        for value in belief.traits.values() {
            collect_subject_refs(value, out);
        }
    }
    for nested in &env.nested_minds {
        collect_subjects(nested, out);
    }
}

fn collect_subject_refs(value: &serde_json::Value, out: &mut BTreeSet<u64>) {
    match value {
        serde_json::Value::Array(items) => {
            for item in items {
                collect_subject_refs(item, out);
            }
        }
        serde_json::Value::Object(map) => {
            if map.get("_type").and_then(|t| t.as_str()) == Some("Subject") {
                if let Some(sid) = map.get("sid").and_then(|v| v.as_u64()) {
                    out.insert(sid);
                }
            }
            if let Some(serde_json::Value::Array(alts)) = map.get("alternatives") {
                for alt in alts {
                    if let Some(inner) = alt.get("value") {
                        collect_subject_refs(inner, out);
                    }
                }
            }
        }
        _ => {}
    }
}

/// Serialize a mind tree (child minds, states, beliefs, referenced
/// subjects) to a JSON string.
pub fn save_mind(world: &World, mind: MindId) -> DoxaResult<String> {
    let root = world.mind(mind)?;
    let discovered = discover_minds(world, mind);
    let collected: HashSet<MindId> = discovered.iter().copied().collect();

    let mut env = mind_env(world, &root, &collected)?;

    // Referenced minds that are not part of the child tree attach to the
    // root envelope, sorted by id.
    let mut in_tree: HashSet<MindId> = HashSet::new();
    fn tree_ids(env: &MindEnv, out: &mut HashSet<MindId>) {
        if let Some(id) = MindId::new(env.id) {
            out.insert(id);
        }
        for nested in &env.nested_minds {
            tree_ids(nested, out);
        }
    }
    tree_ids(&env, &mut in_tree);
    let mut extras: Vec<MindId> = discovered
        .iter()
        .copied()
        .filter(|id| !in_tree.contains(id))
        .collect();
    extras.sort();
    for extra in extras {
        env.nested_minds
            .push(mind_env(world, &world.mind(extra)?, &collected)?);
    }

    let mut sids: BTreeSet<u64> = BTreeSet::new();
    collect_subjects(&env, &mut sids);
    env.subjects = sids
        .into_iter()
        .filter_map(|raw| {
            let sid = Sid::new(raw)?;
            let subject = world.subjects().get(sid).ok()?;
            Some(SubjectEnv {
                type_tag: "Subject".into(),
                sid: raw,
                label: subject.label.clone(),
                ground_mind: subject.ground_mind.map(|m| m.get()),
            })
        })
        .collect();

    tracing::debug!(mind = %mind, "mind serialized");
    serde_json::to_string(&env).map_err(|e| {
        SerialError::Json {
            message: e.to_string(),
        }
        .into()
    })
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

fn require<T>(value: Option<T>, kind: &str, id: u64) -> DoxaResult<T> {
    value.ok_or_else(|| {
        SerialError::MissingReferent {
            kind: kind.to_owned(),
            id,
        }
        .into()
    })
}

fn nonzero<T>(value: Option<T>, what: &str) -> DoxaResult<T> {
    value.ok_or_else(|| {
        SerialError::MalformedEnvelope {
            message: format!("zero or missing id for {what}"),
        }
        .into()
    })
}

struct Flattened {
    minds: Vec<MindEnv>,
    states: Vec<StateEnv>,
    beliefs: Vec<BeliefEnv>,
    subjects: Vec<SubjectEnv>,
}

fn flatten(env: MindEnv, out: &mut Flattened) {
    out.subjects.extend(env.subjects.clone());
    out.states.extend(env.states.clone());
    out.beliefs.extend(env.beliefs.clone());
    let mut shallow = env;
    let nested = std::mem::take(&mut shallow.nested_minds);
    out.minds.push(shallow);
    for child in nested {
        flatten(child, out);
    }
}

/// Load a payload produced by [`save_mind`] (or a bare belief/state/subject
/// envelope). Returns a handle to the root entity.
pub fn load(world: &World, json: &str) -> DoxaResult<Loaded> {
    let value: serde_json::Value = serde_json::from_str(json).map_err(|e| SerialError::Json {
        message: e.to_string(),
    })?;
    let tag = value
        .get("_type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| SerialError::MalformedEnvelope {
            message: "payload root has no _type".into(),
        })?
        .to_owned();

    let from_value = |message: serde_json::Error| SerialError::Json {
        message: message.to_string(),
    };

    match tag.as_str() {
        "Mind" => {
            let env: MindEnv = serde_json::from_value(value).map_err(from_value)?;
            let root_id = nonzero(MindId::new(env.id), "mind")?;
            let mut flat = Flattened {
                minds: Vec::new(),
                states: Vec::new(),
                beliefs: Vec::new(),
                subjects: Vec::new(),
            };
            flatten(env, &mut flat);
            load_flattened(world, flat)?;
            Ok(Loaded::Mind(root_id))
        }
        "Belief" => {
            let env: BeliefEnv = serde_json::from_value(value).map_err(from_value)?;
            let id = nonzero(BeliefId::new(env.id), "belief")?;
            load_beliefs(world, std::slice::from_ref(&env), &HashSet::new())?;
            world.alloc().advance_past(env.id);
            Ok(Loaded::Belief(id))
        }
        "State" => {
            let env: StateEnv = serde_json::from_value(value).map_err(from_value)?;
            let id = nonzero(StateId::new(env.id), "state")?;
            load_states(world, std::slice::from_ref(&env), &HashSet::new())?;
            world.alloc().advance_past(env.id);
            Ok(Loaded::State(id))
        }
        "Subject" => {
            let env: SubjectEnv = serde_json::from_value(value).map_err(from_value)?;
            let sid = nonzero(Sid::new(env.sid), "subject")?;
            load_subjects(world, std::slice::from_ref(&env))?;
            world.alloc().advance_past(env.sid);
            Ok(Loaded::Subject(sid))
        }
        other => Err(SerialError::MalformedEnvelope {
            message: format!("unknown root _type {other:?}"),
        }
        .into()),
    }
}

fn load_flattened(world: &World, flat: Flattened) -> DoxaResult<()> {
    // Phase 1: instantiate by id. The payload's own ids form the reference
    // universe; anything else must already exist in the live world.
    let payload_states: HashSet<u64> = flat.states.iter().map(|s| s.id).collect();
    let payload_minds: HashSet<u64> = flat.minds.iter().map(|m| m.id).collect();

    load_subjects(world, &flat.subjects)?;

    for env in &flat.minds {
        if env.type_tag != "Mind" {
            return Err(SerialError::MalformedEnvelope {
                message: format!("expected Mind envelope, found {:?}", env.type_tag),
            }
            .into());
        }
        let id = nonzero(MindId::new(env.id), "mind")?;
        let parent = match env.parent {
            Some(raw) => Some(nonzero(MindId::new(raw), "mind parent")?),
            None => None,
        };
        let mut mind = Mind::new(id, env.label.clone(), parent);
        mind.origin = match env.origin {
            Some(raw) => Some(nonzero(StateId::new(raw), "mind origin")?),
            None => None,
        };
        if let Some(label) = &mind.label {
            world.claim_label(label, LabelOwner::Mind(id))?;
        }
        world.insert_mind(mind);
    }

    load_states(world, &flat.states, &payload_minds)?;
    load_beliefs(world, &flat.beliefs, &payload_states)?;

    // Phase 2: link. Parents adopt loaded children in envelope order; each
    // mind's state list is rebuilt in id order (creation order, since the
    // allocator is monotone).
    for env in &flat.minds {
        let id = MindId::new(env.id).expect("validated above");
        if let Some(parent) = world.mind(id)?.parent {
            if world.mind(parent).is_err() {
                return Err(SerialError::MissingReferent {
                    kind: "mind".into(),
                    id: parent.get(),
                }
                .into());
            }
            world.with_mind_mut(parent, |m| {
                if !m.children.contains(&id) {
                    m.children.push(id);
                }
            })?;
        }
    }
    for env in &flat.states {
        let state_id = StateId::new(env.id).expect("validated above");
        let mind_id = nonzero(MindId::new(env.in_mind), "state mind")?;
        world.with_mind_mut(mind_id, |m| {
            if !m.states.contains(&state_id) {
                m.states.push(state_id);
            }
        })?;
    }

    // Subjects whose labels no belief claimed keep them as subject labels.
    for env in &flat.subjects {
        if let Some(label) = &env.label {
            if world.lookup_label(label).is_none() {
                if let Some(sid) = Sid::new(env.sid) {
                    world.claim_label(label, LabelOwner::Subject(sid))?;
                }
            }
        }
    }

    let max_id = flat
        .minds
        .iter()
        .map(|m| m.id)
        .chain(flat.states.iter().map(|s| s.id))
        .chain(flat.beliefs.iter().map(|b| b.id))
        .chain(flat.subjects.iter().map(|s| s.sid))
        .max()
        .unwrap_or(0);
    world.alloc().advance_past(max_id);

    tracing::info!(
        minds = flat.minds.len(),
        states = flat.states.len(),
        beliefs = flat.beliefs.len(),
        subjects = flat.subjects.len(),
        "payload loaded"
    );
    Ok(())
}

fn load_subjects(world: &World, envs: &[SubjectEnv]) -> DoxaResult<()> {
    for env in envs {
        if env.type_tag != "Subject" {
            return Err(SerialError::MalformedEnvelope {
                message: format!("expected Subject envelope, found {:?}", env.type_tag),
            }
            .into());
        }
        let sid = nonzero(Sid::new(env.sid), "subject")?;
        let mut subject = Subject::new(sid, env.label.clone());
        subject.ground_mind = env.ground_mind.and_then(MindId::new);
        world.subjects().register(subject);
    }
    Ok(())
}

fn load_states(world: &World, envs: &[StateEnv], payload_minds: &HashSet<u64>) -> DoxaResult<()> {
    for env in envs {
        if env.type_tag != "State" {
            return Err(SerialError::MalformedEnvelope {
                message: format!("expected State envelope, found {:?}", env.type_tag),
            }
            .into());
        }
        let id = nonzero(StateId::new(env.id), "state")?;
        let mind = nonzero(MindId::new(env.in_mind), "state mind")?;
        if !payload_minds.contains(&env.in_mind) && world.mind(mind).is_err() {
            return Err(SerialError::MissingReferent {
                kind: "mind".into(),
                id: env.in_mind,
            }
            .into());
        }

        let kind = match &env.components {
            Some(raw) => {
                let mut components = Vec::with_capacity(raw.len());
                for &c in raw {
                    components.push(nonzero(StateId::new(c), "component")?);
                }
                StateKind::Convergence { components }
            }
            None => StateKind::Timeline,
        };

        let mut insert = Vec::with_capacity(env.insert.len());
        for &b in &env.insert {
            insert.push(nonzero(BeliefId::new(b), "insert entry")?);
        }
        let mut remove = Vec::with_capacity(env.remove.len());
        for &b in &env.remove {
            remove.push(nonzero(BeliefId::new(b), "remove entry")?);
        }
        let mut resolutions = Vec::with_capacity(env.resolutions.len());
        for &(from, to) in &env.resolutions {
            resolutions.push((
                nonzero(StateId::new(from), "resolution source")?,
                nonzero(StateId::new(to), "resolution branch")?,
            ));
        }

        world.insert_state(State {
            id,
            mind,
            base: env.base.and_then(StateId::new),
            ground: env.ground_state.and_then(StateId::new),
            tt: env.tt,
            vt: env.vt,
            self_subject: env.self_subject.and_then(Sid::new),
            certainty: env.certainty,
            locked: env.locked,
            insert,
            remove,
            kind,
            resolutions,
        });
    }
    Ok(())
}

fn load_beliefs(
    world: &World,
    envs: &[BeliefEnv],
    payload_states: &HashSet<u64>,
) -> DoxaResult<()> {
    for env in envs {
        if env.type_tag != "Belief" {
            return Err(SerialError::MalformedEnvelope {
                message: format!("expected Belief envelope, found {:?}", env.type_tag),
            }
            .into());
        }
        let id = nonzero(BeliefId::new(env.id), "belief")?;
        let mind = nonzero(MindId::new(env.in_mind), "belief mind")?;
        let origin_state = nonzero(StateId::new(env.origin_state), "belief state")?;
        if !payload_states.contains(&env.origin_state) && world.state(origin_state).is_err() {
            return Err(SerialError::MissingReferent {
                kind: "state".into(),
                id: env.origin_state,
            }
            .into());
        }
        let subject = nonzero(Sid::new(env.subject), "belief subject")?;
        require(world.subjects().get(subject).ok(), "subject", env.subject)?;

        let mut bases = Vec::with_capacity(env.bases.len());
        for base in &env.bases {
            bases.push(match base {
                BaseEnv::Belief { belief } => {
                    BaseRef::Belief(nonzero(BeliefId::new(*belief), "base belief")?)
                }
                BaseEnv::Archetype { archetype } => BaseRef::Archetype(archetype.clone()),
            });
        }

        let mut traits = BTreeMap::new();
        for (label, raw) in &env.traits {
            traits.insert(label.clone(), value_from_json(raw)?);
        }

        let belief = Belief {
            id,
            mind,
            origin_state,
            subject,
            bases,
            traits,
            label: env.label.clone(),
            branch: env.branch.as_ref().map(|b| BranchMeta {
                certainty: b.certainty,
                tt: b.tt,
            }),
        };

        if let Some(label) = &env.label {
            world.claim_label(label, LabelOwner::Belief { sid: subject })?;
        }
        world.rev().index_belief(&belief, world.schema());
        world.insert_belief(Arc::new(belief));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::TraitValue;

    #[test]
    fn trait_value_json_round_trip() {
        let values = vec![
            TraitValue::Null,
            TraitValue::Bool(true),
            TraitValue::Number(2.5),
            TraitValue::Text("hello".into()),
            TraitValue::Subject(Sid::new(9).unwrap()),
            TraitValue::MindRef(MindId::new(4).unwrap()),
            TraitValue::List(vec![
                TraitValue::Subject(Sid::new(1).unwrap()),
                TraitValue::Subject(Sid::new(2).unwrap()),
            ]),
            TraitValue::Fuzzy(Fuzzy::from_alternatives(vec![
                Alternative {
                    value: TraitValue::Text("workshop".into()),
                    certainty: 0.7,
                },
                Alternative {
                    value: TraitValue::Text("shed".into()),
                    certainty: 0.3,
                },
            ])),
        ];
        for value in values {
            let json = value_to_json(&value);
            let back = value_from_json(&json).unwrap();
            assert_eq!(back, value, "round trip failed for {json}");
        }
    }

    #[test]
    fn unknown_fuzzy_round_trips_to_unknown() {
        let json = value_to_json(&TraitValue::Fuzzy(Fuzzy::unknown()));
        assert_eq!(json, serde_json::json!({ "_type": "Fuzzy", "unknown": true }));
        let back = value_from_json(&json).unwrap();
        match back {
            TraitValue::Fuzzy(f) => assert!(f.is_unknown()),
            other => panic!("expected fuzzy, got {other:?}"),
        }
    }

    #[test]
    fn malformed_object_rejected() {
        let json = serde_json::json!({ "no_type": 1 });
        assert!(value_from_json(&json).is_err());
    }

    #[test]
    fn save_and_load_simple_world() {
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
        let m = world
            .create_mind(Some("world".into()), Some(world.logos()))
            .unwrap();
        let s = crate::mind::create_state(
            &world,
            m,
            Some(world.logos_state()),
            crate::state::CreateOptions {
                tt: Some(1),
                ..Default::default()
            },
        )
        .unwrap();
        world
            .add_belief(
                s,
                crate::belief::BeliefTemplate::new()
                    .with_label("hammer")
                    .with_archetype("Thing")
                    .with_trait("color", "black"),
            )
            .unwrap();

        let payload = world.save_mind(m).unwrap();
        world.reset().unwrap();
        let loaded = world.load(&payload).unwrap();
        let Loaded::Mind(loaded_mind) = loaded else {
            panic!("expected mind");
        };
        assert_eq!(loaded_mind, m);

        // The reloaded belief resolves by label and keeps its trait value.
        let restored = crate::state::belief_by_label(&world, s, "hammer").unwrap();
        assert_eq!(
            restored.traits.get("color"),
            Some(&TraitValue::Text("black".into()))
        );

        // Fresh allocations land above everything in the payload.
        let fresh = world.alloc().next_sid().unwrap();
        assert!(fresh.get() > restored.id.get());
    }

    #[test]
    fn second_save_is_byte_identical() {
        let world = World::new().unwrap();
        world
            .register_json(
                r#"{
                    "traittypes": {
                        "color": "string",
                        "location": { "type": "Place" }
                    },
                    "archetypes": {
                        "Thing": {},
                        "Place": { "bases": ["Thing"] }
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
            crate::state::CreateOptions {
                tt: Some(1),
                ..Default::default()
            },
        )
        .unwrap();
        // Circular location references between two rooms.
        let cellar = world
            .add_belief(
                s,
                crate::belief::BeliefTemplate::new()
                    .with_label("cellar")
                    .with_archetype("Place"),
            )
            .unwrap();
        let attic = world
            .add_belief(
                s,
                crate::belief::BeliefTemplate::new()
                    .with_label("attic")
                    .with_archetype("Place")
                    .with_trait("location", "cellar"),
            )
            .unwrap();
        let cellar_belief = world.belief(cellar).unwrap();
        cellar_belief
            .replace(
                &world,
                s,
                [(
                    "location".to_owned(),
                    crate::value::TemplateValue::from("attic"),
                )]
                .into_iter()
                .collect(),
            )
            .unwrap();
        let _ = attic;

        let first = world.save_mind(m).unwrap();
        world.reset().unwrap();
        world.load(&first).unwrap();
        let second = world.save_mind(m).unwrap();
        assert_eq!(first, second);
    }
}
