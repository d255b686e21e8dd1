//! Fuzzy values: immutable sets of weighted alternatives.
//!
//! A [`Fuzzy`] holds zero or more `{value, certainty}` alternatives. The
//! empty set is `unknown()`, the only "unknown" marker the system
//! recognizes. Values are freely copied; two fuzzies are the same exactly
//! when their alternative lists are equal.

use crate::value::TraitValue;

/// One weighted alternative inside a [`Fuzzy`].
#[derive(Debug, Clone, PartialEq)]
pub struct Alternative {
    pub value: TraitValue,
    pub certainty: f32,
}

impl Alternative {
    pub fn new(value: TraitValue, certainty: f32) -> Self {
        debug_assert!(
            (0.0..=1.0).contains(&certainty),
            "alternative certainty {certainty} outside [0,1]"
        );
        Self { value, certainty }
    }
}

/// An immutable set of weighted value alternatives.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Fuzzy {
    alternatives: Vec<Alternative>,
}

impl Fuzzy {
    /// The unknown value: no alternatives at all.
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Whether this is the unknown value.
    pub fn is_unknown(&self) -> bool {
        self.alternatives.is_empty()
    }

    /// A fuzzy with a single alternative.
    pub fn single(value: TraitValue, certainty: f32) -> Self {
        Self {
            alternatives: vec![Alternative::new(value, certainty)],
        }
    }

    /// Build from raw alternatives, keeping the given order.
    pub fn from_alternatives(alternatives: Vec<Alternative>) -> Self {
        debug_assert!(
            alternatives
                .iter()
                .all(|a| (0.0..=1.0).contains(&a.certainty)),
            "alternative certainty outside [0,1]"
        );
        Self { alternatives }
    }

    /// Merge raw alternatives: equal values (SID equality for subjects, deep
    /// equality for primitives) sum their certainties, first occurrence keeps
    /// its position. Each summed certainty is clamped to <= 1.0 on emit; the
    /// clamp is never applied to intermediate products.
    pub fn merge(alternatives: Vec<Alternative>) -> Self {
        let mut merged: Vec<Alternative> = Vec::new();
        for alt in alternatives {
            match merged.iter_mut().find(|m| m.value == alt.value) {
                Some(existing) => existing.certainty += alt.certainty,
                None => merged.push(alt),
            }
        }
        for alt in &mut merged {
            alt.certainty = alt.certainty.min(1.0);
        }
        Self {
            alternatives: merged,
        }
    }

    /// The alternatives, in insertion order.
    pub fn alternatives(&self) -> &[Alternative] {
        &self.alternatives
    }

    /// Number of alternatives.
    pub fn len(&self) -> usize {
        self.alternatives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alternatives.is_empty()
    }

    /// A copy with every certainty multiplied by `factor`. Used when a fuzzy
    /// stored value is weighted by path and branch certainties during recall.
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            alternatives: self
                .alternatives
                .iter()
                .map(|a| Alternative {
                    value: a.value.clone(),
                    certainty: a.certainty * factor,
                })
                .collect(),
        }
    }

    /// True iff `value` is not a fuzzy: plain values are certain by definition.
    pub fn is_certain(value: &TraitValue) -> bool {
        !matches!(value, TraitValue::Fuzzy(_))
    }
}

impl std::fmt::Display for Fuzzy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_unknown() {
            return write!(f, "unknown");
        }
        write!(f, "fuzzy[")?;
        for (i, alt) in self.alternatives.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:?}@{:.2}", alt.value, alt.certainty)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::Sid;

    fn subj(raw: u64) -> TraitValue {
        TraitValue::Subject(Sid::new(raw).unwrap())
    }

    #[test]
    fn unknown_is_empty_and_shared_form() {
        let a = Fuzzy::unknown();
        let b = Fuzzy::unknown();
        assert!(a.is_unknown());
        assert_eq!(a, b);
    }

    #[test]
    fn merge_sums_equal_values() {
        let merged = Fuzzy::merge(vec![
            Alternative::new(subj(1), 0.4),
            Alternative::new(subj(2), 0.3),
            Alternative::new(subj(1), 0.4),
        ]);
        assert_eq!(merged.len(), 2);
        assert!((merged.alternatives()[0].certainty - 0.8).abs() < 1e-6);
        assert!((merged.alternatives()[1].certainty - 0.3).abs() < 1e-6);
    }

    #[test]
    fn merge_clamps_at_one() {
        let merged = Fuzzy::merge(vec![
            Alternative::new(subj(1), 0.9),
            Alternative::new(subj(1), 0.9),
        ]);
        assert_eq!(merged.len(), 1);
        assert!((merged.alternatives()[0].certainty - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn merge_preserves_first_occurrence_order() {
        let merged = Fuzzy::merge(vec![
            Alternative::new(subj(5), 0.2),
            Alternative::new(subj(3), 0.2),
            Alternative::new(subj(5), 0.1),
        ]);
        assert_eq!(merged.alternatives()[0].value, subj(5));
        assert_eq!(merged.alternatives()[1].value, subj(3));
    }

    #[test]
    fn scaled_multiplies_certainties() {
        let fuzzy = Fuzzy::from_alternatives(vec![
            Alternative::new(subj(1), 0.8),
            Alternative::new(subj(2), 0.5),
        ]);
        let scaled = fuzzy.scaled(0.5);
        assert!((scaled.alternatives()[0].certainty - 0.4).abs() < 1e-6);
        assert!((scaled.alternatives()[1].certainty - 0.25).abs() < 1e-6);
    }

    #[test]
    fn plain_values_are_certain() {
        assert!(Fuzzy::is_certain(&TraitValue::Number(1.0)));
        assert!(!Fuzzy::is_certain(&TraitValue::Fuzzy(Fuzzy::unknown())));
    }

    #[test]
    fn display_forms() {
        assert_eq!(Fuzzy::unknown().to_string(), "unknown");
        let single = Fuzzy::single(TraitValue::Text("shed".into()), 0.3);
        assert!(single.to_string().contains("0.30"));
    }
}
