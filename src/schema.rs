//! Schema registry: traittypes and archetypes.
//!
//! The declarative world schema (three maps: `traittypes`, `archetypes`,
//! `prototypes`) is translated into immutable [`Traittype`] and [`Archetype`]
//! objects at world setup. Registration is two-pass: declarations are fully
//! validated first, then committed and template-resolved, so a failed
//! `register` call leaves the registries untouched.
//!
//! After the second pass, template values that name another archetype have
//! become subject references to that archetype's shared belief; nothing in
//! the registry changes afterwards until `World::reset`.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;

use crate::belief::{BaseRef, BeliefTemplate};
use crate::error::{BeliefError, DoxaResult, SchemaError};
use crate::fuzzy::{Alternative, Fuzzy};
use crate::value::{TemplateValue, TraitValue};
use crate::world::{LabelOwner, World};

// ---------------------------------------------------------------------------
// Traittypes
// ---------------------------------------------------------------------------

/// Base type of a trait slot.
#[derive(Debug, Clone, PartialEq)]
pub enum TraitKind {
    Str,
    Number,
    Boolean,
    Enum { values: Vec<String> },
    /// Values are subjects whose beliefs carry the named archetype.
    ArchetypeRef { label: String },
    Subject,
    Mind,
    State,
    /// Belief references are stored by subject, like `Subject`.
    Belief,
}

impl TraitKind {
    /// Human-readable name of the expected value shape, for error context.
    pub fn expected(&self) -> String {
        match self {
            Self::Str => "string".into(),
            Self::Number => "number".into(),
            Self::Boolean => "boolean".into(),
            Self::Enum { .. } => "enum member".into(),
            Self::ArchetypeRef { label } => label.clone(),
            Self::Subject => "Subject".into(),
            Self::Mind => "Mind".into(),
            Self::State => "State".into(),
            Self::Belief => "Belief".into(),
        }
    }

    /// Whether values of this kind reference subjects (and therefore feed
    /// the reverse index).
    pub fn is_subject_ref(&self) -> bool {
        matches!(
            self,
            Self::ArchetypeRef { .. } | Self::Subject | Self::Belief
        )
    }
}

/// Which mind a `Mind`-typed trait resolves against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MindScope {
    Parent,
    Current,
}

impl MindScope {
    pub fn from_label(s: &str) -> Option<Self> {
        match s {
            "parent" => Some(Self::Parent),
            "current" => Some(Self::Current),
            _ => None,
        }
    }
}

/// Array container constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Container {
    pub min: Option<usize>,
    pub max: Option<usize>,
}

/// Schema of one trait slot. Immutable after registration.
#[derive(Debug, Clone, PartialEq)]
pub struct Traittype {
    pub label: String,
    pub kind: TraitKind,
    pub container: Option<Container>,
    pub composable: bool,
    pub mind_scope: Option<MindScope>,
    pub exposure: Option<String>,
}

impl Traittype {
    /// Resolve a polymorphic template value into a validated [`TraitValue`].
    ///
    /// Strings become subject lookups for subject-referencing kinds, enum
    /// membership and container arity are enforced, and nested alternative
    /// sets become fuzzies. `Null` passes through untouched (it blocks
    /// inheritance and composition downstream).
    pub fn resolve_template(
        &self,
        world: &World,
        template: &TemplateValue,
    ) -> DoxaResult<TraitValue> {
        match template {
            TemplateValue::Null => Ok(TraitValue::Null),
            TemplateValue::Fuzzy(f) => Ok(TraitValue::Fuzzy(f.clone())),
            TemplateValue::Alternatives(alts) => {
                let mut resolved = Vec::with_capacity(alts.len());
                for (value, certainty) in alts {
                    let value = self.resolve_plain(world, value)?;
                    resolved.push(Alternative::new(value, *certainty));
                }
                Ok(TraitValue::Fuzzy(Fuzzy::from_alternatives(resolved)))
            }
            other => self.resolve_plain(world, other),
        }
    }

    /// Resolve a non-fuzzy template, applying container rules first.
    fn resolve_plain(&self, world: &World, template: &TemplateValue) -> DoxaResult<TraitValue> {
        match self.container {
            Some(container) => {
                let items: Vec<&TemplateValue> = match template {
                    TemplateValue::List(items) => items.iter().collect(),
                    single => vec![single],
                };
                let min = container.min.unwrap_or(0);
                let max = container.max.unwrap_or(usize::MAX);
                if items.len() < min || items.len() > max {
                    return Err(BeliefError::ArrayArity {
                        trait_label: self.label.clone(),
                        len: items.len(),
                        min,
                        max: container.max.unwrap_or(usize::MAX),
                    }
                    .into());
                }
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.resolve_scalar(world, item)?);
                }
                Ok(TraitValue::List(out))
            }
            None => self.resolve_scalar(world, template),
        }
    }

    /// Resolve and validate one scalar element against the base type.
    fn resolve_scalar(&self, world: &World, template: &TemplateValue) -> DoxaResult<TraitValue> {
        let mismatch = |actual: &str| -> crate::error::DoxaError {
            BeliefError::TypeMismatch {
                trait_label: self.label.clone(),
                expected: self.kind.expected(),
                actual: actual.to_owned(),
            }
            .into()
        };

        match (&self.kind, template) {
            (_, TemplateValue::Null) => Ok(TraitValue::Null),

            (TraitKind::Str, TemplateValue::Text(s)) => Ok(TraitValue::Text(s.clone())),
            (TraitKind::Number, TemplateValue::Number(n)) => Ok(TraitValue::Number(*n)),
            (TraitKind::Boolean, TemplateValue::Bool(b)) => Ok(TraitValue::Bool(*b)),

            (TraitKind::Enum { values }, TemplateValue::Text(s)) => {
                if values.iter().any(|v| v == s) {
                    Ok(TraitValue::Text(s.clone()))
                } else {
                    Err(BeliefError::EnumOutOfRange {
                        trait_label: self.label.clone(),
                        value: s.clone(),
                    }
                    .into())
                }
            }

            (
                TraitKind::Subject | TraitKind::Belief | TraitKind::ArchetypeRef { .. },
                TemplateValue::Text(label),
            ) => Ok(TraitValue::Subject(world.resolve_label_to_sid(label)?)),
            (
                TraitKind::Subject | TraitKind::Belief | TraitKind::ArchetypeRef { .. },
                TemplateValue::Subject(sid),
            ) => {
                if world.subjects().contains(*sid) {
                    Ok(TraitValue::Subject(*sid))
                } else {
                    Err(BeliefError::UnknownSubject {
                        subject: sid.to_string(),
                    }
                    .into())
                }
            }

            (TraitKind::Mind, TemplateValue::MindRef(id)) => {
                world.mind(*id)?;
                Ok(TraitValue::MindRef(*id))
            }
            (TraitKind::State, TemplateValue::StateRef(id)) => {
                world.state(*id)?;
                Ok(TraitValue::StateRef(*id))
            }

            (_, other) => Err(mismatch(other.shape())),
        }
    }

    /// Check a template against this traittype without touching the world's
    /// registries. `visible_labels` holds every label that will exist once
    /// the current `register` call commits.
    pub(crate) fn validate_template(
        &self,
        visible_labels: &HashSet<String>,
        template: &TemplateValue,
    ) -> DoxaResult<()> {
        match template {
            TemplateValue::Null | TemplateValue::Fuzzy(_) => Ok(()),
            TemplateValue::Alternatives(alts) => {
                for (value, _) in alts {
                    self.validate_plain(visible_labels, value)?;
                }
                Ok(())
            }
            other => self.validate_plain(visible_labels, other),
        }
    }

    fn validate_plain(
        &self,
        visible_labels: &HashSet<String>,
        template: &TemplateValue,
    ) -> DoxaResult<()> {
        match self.container {
            Some(container) => {
                let items: Vec<&TemplateValue> = match template {
                    TemplateValue::List(items) => items.iter().collect(),
                    single => vec![single],
                };
                let min = container.min.unwrap_or(0);
                let max = container.max.unwrap_or(usize::MAX);
                if items.len() < min || items.len() > max {
                    return Err(BeliefError::ArrayArity {
                        trait_label: self.label.clone(),
                        len: items.len(),
                        min,
                        max: container.max.unwrap_or(usize::MAX),
                    }
                    .into());
                }
                for item in items {
                    self.validate_scalar(visible_labels, item)?;
                }
                Ok(())
            }
            None => self.validate_scalar(visible_labels, template),
        }
    }

    fn validate_scalar(
        &self,
        visible_labels: &HashSet<String>,
        template: &TemplateValue,
    ) -> DoxaResult<()> {
        match (&self.kind, template) {
            (_, TemplateValue::Null) => Ok(()),
            (TraitKind::Str, TemplateValue::Text(_)) => Ok(()),
            (TraitKind::Number, TemplateValue::Number(_)) => Ok(()),
            (TraitKind::Boolean, TemplateValue::Bool(_)) => Ok(()),
            (TraitKind::Enum { values }, TemplateValue::Text(s)) => {
                if values.iter().any(|v| v == s) {
                    Ok(())
                } else {
                    Err(BeliefError::EnumOutOfRange {
                        trait_label: self.label.clone(),
                        value: s.clone(),
                    }
                    .into())
                }
            }
            (
                TraitKind::Subject | TraitKind::Belief | TraitKind::ArchetypeRef { .. },
                TemplateValue::Text(label),
            ) => {
                if visible_labels.contains(label) {
                    Ok(())
                } else {
                    Err(BeliefError::UnknownSubject {
                        subject: label.clone(),
                    }
                    .into())
                }
            }
            (
                TraitKind::Subject | TraitKind::Belief | TraitKind::ArchetypeRef { .. },
                TemplateValue::Subject(_),
            ) => Ok(()),
            (TraitKind::Mind, TemplateValue::MindRef(_)) => Ok(()),
            (TraitKind::State, TemplateValue::StateRef(_)) => Ok(()),
            (_, other) => Err(BeliefError::TypeMismatch {
                trait_label: self.label.clone(),
                expected: self.kind.expected(),
                actual: other.shape().to_owned(),
            }
            .into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Archetypes
// ---------------------------------------------------------------------------

/// Trait-bearing template with multiple inheritance. Immutable after the
/// second registration pass resolves its template values.
#[derive(Debug, Clone)]
pub struct Archetype {
    pub label: String,
    /// Base archetype labels, declared order preserved.
    pub bases: Vec<String>,
    /// Raw declared templates, kept for diagnostics.
    pub templates: BTreeMap<String, TemplateValue>,
    /// Trait values after second-pass resolution.
    pub resolved: BTreeMap<String, TraitValue>,
}

impl Archetype {
    /// The archetype's own resolved value for a trait, not consulting bases.
    pub fn own_trait(&self, trait_label: &str) -> Option<&TraitValue> {
        self.resolved.get(trait_label)
    }
}

/// Breadth-first archetype closure with first-seen deduplication.
///
/// The same traversal order is used everywhere multi-inheritance appears:
/// base list order preserved per level, duplicates skipped on first sight.
pub fn archetype_closure(world: &World, roots: &[String]) -> Vec<Arc<Archetype>> {
    let mut out = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = roots.iter().cloned().collect();

    while let Some(label) = queue.pop_front() {
        if !seen.insert(label.clone()) {
            continue;
        }
        if let Some(archetype) = world.schema().archetype(&label) {
            for base in &archetype.bases {
                queue.push_back(base.clone());
            }
            out.push(archetype);
        }
    }
    out
}

/// The latest value of a trait visible through an archetype's closure.
pub fn archetype_trait(world: &World, root: &str, trait_label: &str) -> Option<TraitValue> {
    for archetype in archetype_closure(world, std::slice::from_ref(&root.to_owned())) {
        if let Some(value) = archetype.own_trait(trait_label) {
            return Some(value.clone());
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Holds every traittype and archetype. Owned by the world; entries never
/// change after their registration call completes.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    traittypes: DashMap<String, Arc<Traittype>>,
    archetypes: DashMap<String, Arc<Archetype>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn traittype(&self, label: &str) -> Option<Arc<Traittype>> {
        self.traittypes.get(label).map(|r| Arc::clone(r.value()))
    }

    pub fn archetype(&self, label: &str) -> Option<Arc<Archetype>> {
        self.archetypes.get(label).map(|r| Arc::clone(r.value()))
    }

    pub fn has_traittype(&self, label: &str) -> bool {
        self.traittypes.contains_key(label)
    }

    pub fn has_archetype(&self, label: &str) -> bool {
        self.archetypes.contains_key(label)
    }

    pub fn traittype_count(&self) -> usize {
        self.traittypes.len()
    }

    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    /// Every traittype label marked composable. Belief creation scans these.
    pub fn composable_labels(&self) -> Vec<String> {
        self.traittypes
            .iter()
            .filter(|r| r.value().composable)
            .map(|r| r.key().clone())
            .collect()
    }

    pub(crate) fn insert_traittype(&self, tt: Traittype) {
        self.traittypes.insert(tt.label.clone(), Arc::new(tt));
    }

    pub(crate) fn insert_archetype(&self, archetype: Archetype) {
        self.archetypes
            .insert(archetype.label.clone(), Arc::new(archetype));
    }

    pub(crate) fn clear(&self) {
        self.traittypes.clear();
        self.archetypes.clear();
    }
}

// ---------------------------------------------------------------------------
// Declarative schema layer
// ---------------------------------------------------------------------------

/// The three maps of a declarative world schema.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchemaDecl {
    #[serde(default)]
    pub traittypes: BTreeMap<String, TraittypeDecl>,
    #[serde(default)]
    pub archetypes: BTreeMap<String, ArchetypeDecl>,
    #[serde(default)]
    pub prototypes: BTreeMap<String, PrototypeDecl>,
}

/// A traittype declaration: either the shorthand base-type string or the
/// full form with container, constraints and flags.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TraittypeDecl {
    Shorthand(String),
    Full(TraittypeSpec),
}

#[derive(Debug, Clone, Deserialize)]
pub struct TraittypeSpec {
    #[serde(rename = "type")]
    pub base: String,
    pub container: Option<String>,
    pub min: Option<usize>,
    pub max: Option<usize>,
    pub values: Option<Vec<String>>,
    pub mind: Option<String>,
    #[serde(default)]
    pub composable: bool,
    pub exposure: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArchetypeDecl {
    #[serde(default)]
    pub bases: Vec<String>,
    #[serde(default)]
    pub traits: BTreeMap<String, serde_json::Value>,
}

/// A shared belief created once at registration and referenced by subject.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrototypeDecl {
    #[serde(default)]
    pub bases: Vec<String>,
    #[serde(default)]
    pub traits: BTreeMap<String, serde_json::Value>,
}

fn parse_kind(label: &str, spec: &TraittypeSpec) -> DoxaResult<TraitKind> {
    if let Some(values) = &spec.values {
        if values.is_empty() {
            return Err(SchemaError::BadTraittype {
                label: label.to_owned(),
                message: "enum value list is empty".into(),
            }
            .into());
        }
        return Ok(TraitKind::Enum {
            values: values.clone(),
        });
    }
    Ok(match spec.base.as_str() {
        "string" => TraitKind::Str,
        "number" => TraitKind::Number,
        "boolean" => TraitKind::Boolean,
        "Subject" => TraitKind::Subject,
        "Mind" => TraitKind::Mind,
        "State" => TraitKind::State,
        "Belief" => TraitKind::Belief,
        other => TraitKind::ArchetypeRef {
            label: other.to_owned(),
        },
    })
}

fn build_traittype(label: &str, decl: &TraittypeDecl) -> DoxaResult<Traittype> {
    let spec = match decl {
        TraittypeDecl::Shorthand(base) => TraittypeSpec {
            base: base.clone(),
            container: None,
            min: None,
            max: None,
            values: None,
            mind: None,
            composable: false,
            exposure: None,
        },
        TraittypeDecl::Full(spec) => spec.clone(),
    };

    let container = match spec.container.as_deref() {
        None => None,
        Some("Array") => {
            if let (Some(min), Some(max)) = (spec.min, spec.max) {
                if min > max {
                    return Err(SchemaError::BadTraittype {
                        label: label.to_owned(),
                        message: format!("container min {min} exceeds max {max}"),
                    }
                    .into());
                }
            }
            Some(Container {
                min: spec.min,
                max: spec.max,
            })
        }
        Some(other) => {
            return Err(SchemaError::BadTraittype {
                label: label.to_owned(),
                message: format!("unknown container {other:?}"),
            }
            .into());
        }
    };

    let mind_scope = match spec.mind.as_deref() {
        None => None,
        Some(scope) => Some(MindScope::from_label(scope).ok_or_else(|| {
            SchemaError::BadTraittype {
                label: label.to_owned(),
                message: format!("unknown mind scope {scope:?}"),
            }
        })?),
    };

    Ok(Traittype {
        label: label.to_owned(),
        kind: parse_kind(label, &spec)?,
        container,
        composable: spec.composable,
        mind_scope,
        exposure: spec.exposure,
    })
}

/// Register a declarative schema into the world.
///
/// Validation happens entirely before the first registry mutation, so a
/// failing call leaves the registries in their previous state. Registration
/// is idempotent: labels already registered with the same role are skipped.
pub(crate) fn register_schema(world: &World, decl: SchemaDecl) -> DoxaResult<()> {
    let schema = world.schema();

    // -- Phase A: validate without mutating anything. -----------------------

    let mut new_traittypes: Vec<Traittype> = Vec::new();
    for (label, tt_decl) in &decl.traittypes {
        if schema.has_traittype(label) {
            continue; // idempotent re-registration
        }
        if let Some(owner) = world.lookup_label(label) {
            return Err(SchemaError::LabelClash {
                label: label.clone(),
                existing: owner.role().to_owned(),
            }
            .into());
        }
        new_traittypes.push(build_traittype(label, tt_decl)?);
    }

    // Labels that will exist once this call commits: everything already
    // registered plus this declaration's archetypes and prototypes.
    let mut visible_labels: HashSet<String> = world.all_labels();
    visible_labels.extend(decl.archetypes.keys().cloned());
    visible_labels.extend(decl.prototypes.keys().cloned());

    let lookup_tt = |label: &str| -> DoxaResult<Traittype> {
        if let Some(tt) = new_traittypes.iter().find(|t| t.label == label) {
            return Ok(tt.clone());
        }
        schema
            .traittype(label)
            .map(|tt| (*tt).clone())
            .ok_or_else(|| {
                SchemaError::UnknownTraittype {
                    label: label.to_owned(),
                }
                .into()
            })
    };

    let archetype_known = |label: &str| -> bool {
        schema.has_archetype(label) || decl.archetypes.contains_key(label)
    };

    let mut new_archetypes: Vec<Archetype> = Vec::new();
    for (label, arch_decl) in &decl.archetypes {
        if schema.has_archetype(label) {
            continue;
        }
        if let Some(owner) = world.lookup_label(label) {
            return Err(SchemaError::LabelClash {
                label: label.clone(),
                existing: owner.role().to_owned(),
            }
            .into());
        }
        for base in &arch_decl.bases {
            if !archetype_known(base) {
                return Err(SchemaError::UnknownArchetype {
                    label: base.clone(),
                }
                .into());
            }
        }
        let mut templates = BTreeMap::new();
        for (trait_label, raw) in &arch_decl.traits {
            let tt = lookup_tt(trait_label)?;
            let template = TemplateValue::from_json(raw);
            tt.validate_template(&visible_labels, &template)?;
            templates.insert(trait_label.clone(), template);
        }
        new_archetypes.push(Archetype {
            label: label.clone(),
            bases: arch_decl.bases.clone(),
            templates,
            resolved: BTreeMap::new(),
        });
    }

    let mut new_prototypes: Vec<(String, PrototypeDecl, BTreeMap<String, TemplateValue>)> =
        Vec::new();
    for (label, proto_decl) in &decl.prototypes {
        if matches!(world.lookup_label(label), Some(LabelOwner::Belief { .. })) {
            continue; // idempotent
        }
        if let Some(owner) = world.lookup_label(label) {
            return Err(SchemaError::LabelClash {
                label: label.clone(),
                existing: owner.role().to_owned(),
            }
            .into());
        }
        for base in &proto_decl.bases {
            if !archetype_known(base) {
                return Err(SchemaError::UnknownArchetype {
                    label: base.clone(),
                }
                .into());
            }
        }
        let mut templates = BTreeMap::new();
        for (trait_label, raw) in &proto_decl.traits {
            let tt = lookup_tt(trait_label)?;
            let template = TemplateValue::from_json(raw);
            tt.validate_template(&visible_labels, &template)?;
            templates.insert(trait_label.clone(), template);
        }
        new_prototypes.push((label.clone(), proto_decl.clone(), templates));
    }

    // -- Phase B: commit. ---------------------------------------------------

    let traittype_count = new_traittypes.len();
    let archetype_count = new_archetypes.len();
    let prototype_count = new_prototypes.len();

    for tt in new_traittypes {
        world.claim_label(&tt.label, LabelOwner::Traittype)?;
        schema.insert_traittype(tt);
    }
    let archetype_labels: Vec<String> =
        new_archetypes.iter().map(|a| a.label.clone()).collect();
    for archetype in new_archetypes {
        world.claim_label(&archetype.label, LabelOwner::Archetype)?;
        schema.insert_archetype(archetype);
    }

    // Shared prototype beliefs, created once and referenced by subject.
    // They come before archetype template resolution so archetype defaults
    // may name them.
    for (label, proto_decl, templates) in new_prototypes {
        let template = BeliefTemplate {
            label: Some(label),
            subject: None,
            bases: proto_decl
                .bases
                .iter()
                .map(|b| BaseRef::Archetype(b.clone()))
                .collect(),
            traits: templates,
            branch: None,
        };
        world.add_belief(world.logos_state(), template)?;
    }

    // Second pass: resolve template values now that every archetype of this
    // call is registered. String references to archetypes become subjects of
    // their shared beliefs, created on demand in the logos state.
    for label in &archetype_labels {
        let archetype = schema
            .archetype(label)
            .expect("archetype registered in this call");
        let mut resolved = BTreeMap::new();
        for (trait_label, template) in &archetype.templates {
            let tt = schema.traittype(trait_label).ok_or_else(|| {
                SchemaError::UnknownTraittype {
                    label: trait_label.clone(),
                }
            })?;
            resolved.insert(
                trait_label.clone(),
                tt.resolve_template(world, template)?,
            );
        }
        schema.insert_archetype(Archetype {
            label: archetype.label.clone(),
            bases: archetype.bases.clone(),
            templates: archetype.templates.clone(),
            resolved,
        });
    }

    tracing::info!(
        traittypes = traittype_count,
        archetypes = archetype_count,
        prototypes = prototype_count,
        "schema registered"
    );
    Ok(())
}
