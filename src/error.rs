//! Rich diagnostic error types for the doxa engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and structured context (entity IDs, labels,
//! expected/actual types) so callers know exactly what went wrong.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the doxa engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text, context fields) through to the caller.
#[derive(Debug, Error, Diagnostic)]
pub enum DoxaError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Belief(#[from] BeliefError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Mind(#[from] MindError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Serial(#[from] SerialError),
}

// ---------------------------------------------------------------------------
// Schema errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SchemaError {
    #[error("unknown traittype: {label}")]
    #[diagnostic(
        code(doxa::schema::unknown_traittype),
        help(
            "No traittype with this label is registered. Traittypes must be \
             registered before the archetypes and beliefs that use them."
        )
    )]
    UnknownTraittype { label: String },

    #[error("unknown archetype: {label}")]
    #[diagnostic(
        code(doxa::schema::unknown_archetype),
        help(
            "No archetype with this label is registered. Check the spelling, \
             and make sure the archetype appears in a `register()` call."
        )
    )]
    UnknownArchetype { label: String },

    #[error("label clash: {label} is already registered as {existing}")]
    #[diagnostic(
        code(doxa::schema::label_clash),
        help(
            "Labels are globally unique across traittypes, archetypes, beliefs, \
             minds and subjects. Pick a different label or reset the world first."
        )
    )]
    LabelClash { label: String, existing: String },

    #[error("bad traittype definition for {label}: {message}")]
    #[diagnostic(
        code(doxa::schema::bad_traittype),
        help(
            "The traittype declaration is malformed. Check the base type name, \
             container constraints (min <= max) and the enum value list."
        )
    )]
    BadTraittype { label: String, message: String },
}

// ---------------------------------------------------------------------------
// Belief errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum BeliefError {
    #[error("label in use: {label}")]
    #[diagnostic(
        code(doxa::belief::label_in_use),
        help(
            "A belief, mind or subject with this label already exists. Labels \
             are globally unique; versions of one subject share a single label."
        )
    )]
    LabelInUse { label: String },

    #[error("type mismatch for trait {trait_label}: expected {expected}, got {actual}")]
    #[diagnostic(
        code(doxa::belief::type_mismatch),
        help(
            "The template value does not fit the traittype. Check the traittype \
             declaration for the expected base type and container."
        )
    )]
    TypeMismatch {
        trait_label: String,
        expected: String,
        actual: String,
    },

    #[error("enum value {value:?} out of range for trait {trait_label}")]
    #[diagnostic(
        code(doxa::belief::enum_out_of_range),
        help("The value is not in the traittype's allowed set. Check `values` in the declaration.")
    )]
    EnumOutOfRange { trait_label: String, value: String },

    #[error("array arity violated for trait {trait_label}: {len} elements, bounds {min}..={max}")]
    #[diagnostic(
        code(doxa::belief::array_arity),
        help("The container's min/max constraints were violated. Adjust the element count.")
    )]
    ArrayArity {
        trait_label: String,
        len: usize,
        min: usize,
        max: usize,
    },

    #[error("unknown subject: {subject}")]
    #[diagnostic(
        code(doxa::belief::unknown_subject),
        help(
            "No subject with this SID or label exists. It may belong to a \
             world that was reset, or the label was never registered."
        )
    )]
    UnknownSubject { subject: String },

    #[error("unknown belief: {belief_id}")]
    #[diagnostic(
        code(doxa::belief::unknown_belief),
        help(
            "No belief with this ID exists, or it is not the current valuation \
             of its subject in the given state. Look the subject up again in the \
             query state before replacing or branching."
        )
    )]
    UnknownBelief { belief_id: u64 },
}

// ---------------------------------------------------------------------------
// State errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StateError {
    #[error("state {state_id} is locked")]
    #[diagnostic(
        code(doxa::state::locked),
        help(
            "Locked states are immutable forever. Branch a new state from this \
             one to record further changes."
        )
    )]
    Locked { state_id: u64 },

    #[error("time regression: tt {tt} precedes predecessor tt {prev_tt}")]
    #[diagnostic(
        code(doxa::state::time_regression),
        help(
            "Transaction time never decreases along a base chain. Branch from \
             an earlier state instead of rewinding this one."
        )
    )]
    TimeRegression { tt: u64, prev_tt: u64 },

    #[error("ground mind mismatch: ground state {ground_id} belongs to mind {found}, expected {expected}")]
    #[diagnostic(
        code(doxa::state::ground_mind_mismatch),
        help("A state's ground state must belong to its mind's parent mind.")
    )]
    GroundMindMismatch {
        ground_id: u64,
        found: u64,
        expected: u64,
    },

    #[error("convergence {state_id} is immutable: removes are rejected")]
    #[diagnostic(
        code(doxa::state::convergence_immutable),
        help(
            "A convergence merges component states read-only. Remove the belief \
             in the component state that inserted it, before the convergence is built."
        )
    )]
    ConvergenceImmutable { state_id: u64 },

    #[error("unknown state: {state_id}")]
    #[diagnostic(
        code(doxa::state::unknown),
        help("No state with this ID exists. It may belong to a world that was reset.")
    )]
    Unknown { state_id: u64 },
}

// ---------------------------------------------------------------------------
// Mind errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum MindError {
    #[error("unknown mind: {mind_id}")]
    #[diagnostic(
        code(doxa::mind::unknown),
        help("No mind with this ID exists. It may belong to a world that was reset.")
    )]
    Unknown { mind_id: u64 },

    #[error("label in use: {label}")]
    #[diagnostic(
        code(doxa::mind::label_in_use),
        help("A mind, belief or subject with this label already exists.")
    )]
    LabelInUse { label: String },

    #[error("id space exhausted: cannot allocate more than u64::MAX entities")]
    #[diagnostic(
        code(doxa::mind::ids_exhausted),
        help(
            "The ID space is exhausted. This is extremely unlikely in practice \
             (requires 2^64 allocations); check for an allocation loop."
        )
    )]
    IdsExhausted,
}

// ---------------------------------------------------------------------------
// Serialization errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SerialError {
    #[error("JSON error: {message}")]
    #[diagnostic(
        code(doxa::serial::json),
        help("The payload is not valid JSON. Check for truncation or manual edits.")
    )]
    Json { message: String },

    #[error("malformed envelope: {message}")]
    #[diagnostic(
        code(doxa::serial::malformed_envelope),
        help(
            "An envelope is missing its `_type` tag or a required field. \
             Only payloads produced by `save_mind` can be loaded."
        )
    )]
    MalformedEnvelope { message: String },

    #[error("missing referent: {kind} {id} referenced but not present in payload")]
    #[diagnostic(
        code(doxa::serial::missing_referent),
        help(
            "A cross-reference points at an entity the payload does not carry. \
             Save the owning mind rather than a detached fragment."
        )
    )]
    MissingReferent { kind: String, id: u64 },
}

/// Convenience alias for functions returning doxa results.
pub type DoxaResult<T> = std::result::Result<T, DoxaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_error_converts_to_doxa_error() {
        let err = SchemaError::UnknownArchetype {
            label: "Ghost".into(),
        };
        let doxa: DoxaError = err.into();
        assert!(matches!(
            doxa,
            DoxaError::Schema(SchemaError::UnknownArchetype { .. })
        ));
    }

    #[test]
    fn state_error_converts_to_doxa_error() {
        let err = StateError::Locked { state_id: 7 };
        let doxa: DoxaError = err.into();
        assert!(matches!(doxa, DoxaError::State(StateError::Locked { .. })));
    }

    #[test]
    fn error_display_messages_are_descriptive() {
        let err = BeliefError::ArrayArity {
            trait_label: "inventory".into(),
            len: 5,
            min: 0,
            max: 3,
        };
        let msg = format!("{err}");
        assert!(msg.contains("inventory"));
        assert!(msg.contains('5'));
    }

    #[test]
    fn time_regression_reports_both_times() {
        let err = StateError::TimeRegression { tt: 3, prev_tt: 9 };
        let msg = format!("{err}");
        assert!(msg.contains('3'));
        assert!(msg.contains('9'));
    }
}
