//! Creation-time composition of composable traits.
//!
//! A traittype declared `composable` composes across a belief's direct
//! bases when the belief is created, instead of plain first-hit
//! inheritance. The composed value is stored as the belief's own value, so
//! lookups short-circuit on it and never re-walk the bases.
//!
//! Rules: a `null` template blocks composition outright (the result is
//! exactly `null`); an empty array does not block and composes with base
//! contents; a single contributing base with no template value passes its
//! value through unchanged.

use crate::belief::BaseRef;
use crate::error::{BeliefError, DoxaResult};
use crate::ident::StateId;
use crate::schema::{self, TraitKind, Traittype};
use crate::state::{self, CreateOptions};
use crate::value::{TemplateValue, TraitValue};
use crate::world::World;

/// Compose `traittype` across `bases`, with `own` as the template's own
/// contribution. Returns `None` when nothing contributes at all.
pub(crate) fn compose_trait(
    world: &World,
    state: StateId,
    traittype: &Traittype,
    bases: &[BaseRef],
    own: Option<&TemplateValue>,
) -> DoxaResult<Option<TraitValue>> {
    // Null blocks: no base values contribute.
    if matches!(own, Some(TemplateValue::Null)) {
        return Ok(Some(TraitValue::Null));
    }

    // Latest value of the trait from each direct base, breadth-first order
    // being the base list order; bases with the trait unset are filtered.
    let mut contributions: Vec<TraitValue> = Vec::new();
    for base in bases {
        let value = match base {
            BaseRef::Belief(id) => world
                .belief(*id)
                .ok()
                .and_then(|b| b.trait_value(world, traittype)),
            BaseRef::Archetype(label) => schema::archetype_trait(world, label, &traittype.label),
        };
        match value {
            Some(v) if !v.is_null() => contributions.push(v),
            _ => {}
        }
    }

    // Nothing to compose with: the template value resolves plainly.
    if contributions.is_empty() {
        return match own {
            None => Ok(None),
            Some(template) => traittype.resolve_template(world, template).map(Some),
        };
    }
    if contributions.len() == 1 && own.is_none() {
        return Ok(Some(contributions.pop().expect("one contribution")));
    }

    if traittype.container.is_some() {
        return compose_array(world, traittype, contributions, own).map(Some);
    }
    if traittype.kind == TraitKind::Mind {
        return compose_minds(world, state, contributions, own).map(Some);
    }

    // Other composable kinds: the template wins, else the first base.
    match own {
        Some(template) => traittype.resolve_template(world, template).map(Some),
        None => Ok(contributions.into_iter().next()),
    }
}

/// Concatenate array values in base order, dedup by element identity, and
/// append the template's own list last.
fn compose_array(
    world: &World,
    traittype: &Traittype,
    contributions: Vec<TraitValue>,
    own: Option<&TemplateValue>,
) -> DoxaResult<TraitValue> {
    let mut elements: Vec<TraitValue> = Vec::new();
    let mut push_unique = |item: TraitValue, elements: &mut Vec<TraitValue>| {
        if !elements.contains(&item) {
            elements.push(item);
        }
    };

    for contribution in contributions {
        match contribution {
            TraitValue::List(items) => {
                for item in items {
                    push_unique(item, &mut elements);
                }
            }
            single => push_unique(single, &mut elements),
        }
    }

    if let Some(template) = own {
        match traittype.resolve_template(world, template)? {
            TraitValue::List(items) => {
                for item in items {
                    push_unique(item, &mut elements);
                }
            }
            TraitValue::Null => {}
            single => push_unique(single, &mut elements),
        }
    }

    let container = traittype.container.unwrap_or_default();
    let min = container.min.unwrap_or(0);
    let max = container.max.unwrap_or(usize::MAX);
    if elements.len() < min || elements.len() > max {
        return Err(BeliefError::ArrayArity {
            trait_label: traittype.label.clone(),
            len: elements.len(),
            min,
            max: container.max.unwrap_or(usize::MAX),
        }
        .into());
    }
    Ok(TraitValue::List(elements))
}

/// Compose mind traits: a convergence over each contributing mind's origin
/// state (plus a fresh open state when the template carries own knowledge),
/// wrapped in a new mind parented to the creation state's mind.
fn compose_minds(
    world: &World,
    state: StateId,
    contributions: Vec<TraitValue>,
    own: Option<&TemplateValue>,
) -> DoxaResult<TraitValue> {
    let st = world.state(state)?;
    let composed_mind = world.create_mind(None, Some(st.mind))?;

    let mut components: Vec<StateId> = Vec::new();
    for contribution in &contributions {
        if let TraitValue::MindRef(mind_id) = contribution {
            if let Some(origin) = world.mind(*mind_id)?.origin {
                components.push(origin);
            }
        }
    }

    match own {
        None | Some(TemplateValue::Null) => {}
        Some(TemplateValue::MindRef(mind_id)) => {
            if let Some(origin) = world.mind(*mind_id)?.origin {
                components.push(origin);
            }
        }
        Some(_) => {
            // Own knowledge lands in a fresh open state of the composed mind.
            let own_state = state::create_state(
                world,
                composed_mind,
                Some(state),
                CreateOptions {
                    tt: Some(st.vt),
                    vt: Some(st.vt),
                    self_subject: st.self_subject,
                },
            )?;
            components.push(own_state);
        }
    }

    let convergence = state::new_convergence(world, composed_mind, components, st.tt, st.vt)?;
    world.with_mind_mut(composed_mind, |m| m.origin = Some(convergence))?;
    Ok(TraitValue::MindRef(composed_mind))
}
