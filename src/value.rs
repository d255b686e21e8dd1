//! Trait value model: stored values and polymorphic template inputs.
//!
//! [`TraitValue`] is what a belief actually holds for a trait slot. Belief
//! references inside trait values are always [`Sid`]s, never belief IDs:
//! cycles are pure integers at rest, and resolution to a concrete belief
//! happens in a query state's context.
//!
//! [`TemplateValue`] is the polymorphic input accepted by templates: label
//! strings, subjects, nested alternative sets, fuzzies and primitives. The
//! traittype's resolver turns a template into a validated [`TraitValue`].

use crate::fuzzy::Fuzzy;
use crate::ident::{MindId, Sid, StateId};

/// A validated trait value as stored on a belief.
#[derive(Debug, Clone, PartialEq)]
pub enum TraitValue {
    /// Explicit null: blocks inheritance and composition.
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    /// Reference to a subject; resolved to a belief in a query state.
    Subject(Sid),
    MindRef(MindId),
    StateRef(StateId),
    List(Vec<TraitValue>),
    Fuzzy(Fuzzy),
}

impl TraitValue {
    /// Short name of the value's shape, for error context.
    pub fn shape(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Text(_) => "string",
            Self::Subject(_) => "Subject",
            Self::MindRef(_) => "Mind",
            Self::StateRef(_) => "State",
            Self::List(_) => "Array",
            Self::Fuzzy(_) => "Fuzzy",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The subject this value references, if it is a subject reference.
    pub fn as_subject(&self) -> Option<Sid> {
        match self {
            Self::Subject(sid) => Some(*sid),
            _ => None,
        }
    }

    /// Every subject referenced by this value, including inside lists and
    /// fuzzy alternatives. Feeds the reverse index.
    pub fn referenced_subjects(&self, out: &mut Vec<Sid>) {
        match self {
            Self::Subject(sid) => out.push(*sid),
            Self::List(items) => {
                for item in items {
                    item.referenced_subjects(out);
                }
            }
            Self::Fuzzy(fuzzy) => {
                for alt in fuzzy.alternatives() {
                    alt.value.referenced_subjects(out);
                }
            }
            _ => {}
        }
    }
}

/// Polymorphic template input for a trait slot.
///
/// `Text` is ambiguous on purpose: depending on the traittype it is either a
/// literal string, an enum member, or a label naming a belief or archetype.
/// The traittype resolver disambiguates.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Subject(Sid),
    MindRef(MindId),
    StateRef(StateId),
    List(Vec<TemplateValue>),
    /// Weighted alternatives; builds a [`Fuzzy`] after per-value resolution.
    Alternatives(Vec<(TemplateValue, f32)>),
    Fuzzy(Fuzzy),
}

impl TemplateValue {
    pub fn shape(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Text(_) => "string",
            Self::Subject(_) => "Subject",
            Self::MindRef(_) => "Mind",
            Self::StateRef(_) => "State",
            Self::List(_) => "Array",
            Self::Alternatives(_) => "alternatives",
            Self::Fuzzy(_) => "Fuzzy",
        }
    }

    /// Map a raw JSON value (from a schema file) into a template value.
    ///
    /// Objects with an `alternatives` array become [`TemplateValue::Alternatives`];
    /// every other object shape is rejected by the resolver later with a
    /// type-mismatch carrying the traittype's expectation.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Self::Text(s.clone()),
            serde_json::Value::Array(items) => {
                Self::List(items.iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(map) => {
                if let Some(serde_json::Value::Array(alts)) = map.get("alternatives") {
                    let pairs = alts
                        .iter()
                        .map(|alt| {
                            let value = alt.get("value").map(Self::from_json).unwrap_or(Self::Null);
                            let certainty = alt
                                .get("certainty")
                                .and_then(|c| c.as_f64())
                                .unwrap_or(1.0) as f32;
                            (value, certainty)
                        })
                        .collect();
                    Self::Alternatives(pairs)
                } else {
                    // Unrecognized object shape; surfaces as a mismatch downstream.
                    Self::Null
                }
            }
        }
    }
}

impl From<TraitValue> for TemplateValue {
    /// Re-wrap an already-resolved value as a template. Used when copying
    /// observed values into a new belief (`learn_about`): resolution is a
    /// no-op for values that already passed validation.
    fn from(value: TraitValue) -> Self {
        match value {
            TraitValue::Null => Self::Null,
            TraitValue::Bool(b) => Self::Bool(b),
            TraitValue::Number(n) => Self::Number(n),
            TraitValue::Text(s) => Self::Text(s),
            TraitValue::Subject(sid) => Self::Subject(sid),
            TraitValue::MindRef(id) => Self::MindRef(id),
            TraitValue::StateRef(id) => Self::StateRef(id),
            TraitValue::List(items) => Self::List(items.into_iter().map(Into::into).collect()),
            TraitValue::Fuzzy(f) => Self::Fuzzy(f),
        }
    }
}

impl From<&str> for TemplateValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for TemplateValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for TemplateValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for TemplateValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Sid> for TemplateValue {
    fn from(sid: Sid) -> Self {
        Self::Subject(sid)
    }
}

impl<T: Into<TemplateValue>> From<Vec<T>> for TemplateValue {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(raw: u64) -> Sid {
        Sid::new(raw).unwrap()
    }

    #[test]
    fn referenced_subjects_walks_lists_and_fuzzies() {
        let fuzzy = Fuzzy::single(TraitValue::Subject(sid(3)), 0.5);
        let value = TraitValue::List(vec![
            TraitValue::Subject(sid(1)),
            TraitValue::Text("not a ref".into()),
            TraitValue::List(vec![TraitValue::Subject(sid(2))]),
            TraitValue::Fuzzy(fuzzy),
        ]);

        let mut out = Vec::new();
        value.referenced_subjects(&mut out);
        assert_eq!(out, vec![sid(1), sid(2), sid(3)]);
    }

    #[test]
    fn template_from_json_scalars() {
        assert_eq!(
            TemplateValue::from_json(&serde_json::json!("hello")),
            TemplateValue::Text("hello".into())
        );
        assert_eq!(
            TemplateValue::from_json(&serde_json::json!(2.5)),
            TemplateValue::Number(2.5)
        );
        assert_eq!(
            TemplateValue::from_json(&serde_json::json!(null)),
            TemplateValue::Null
        );
    }

    #[test]
    fn template_from_json_alternatives() {
        let json = serde_json::json!({
            "alternatives": [
                { "value": "workshop", "certainty": 0.7 },
                { "value": "shed", "certainty": 0.3 }
            ]
        });
        let tv = TemplateValue::from_json(&json);
        match tv {
            TemplateValue::Alternatives(alts) => {
                assert_eq!(alts.len(), 2);
                assert_eq!(alts[0].0, TemplateValue::Text("workshop".into()));
                assert!((alts[1].1 - 0.3).abs() < f32::EPSILON);
            }
            other => panic!("expected alternatives, got {other:?}"),
        }
    }

    #[test]
    fn shape_names() {
        assert_eq!(TraitValue::Null.shape(), "null");
        assert_eq!(TraitValue::Subject(sid(1)).shape(), "Subject");
        assert_eq!(TemplateValue::Alternatives(vec![]).shape(), "alternatives");
    }
}
