//! Subject identities: the "who/what" beliefs are about.
//!
//! A subject is shared by every version of a thing, across minds. It carries
//! an SID, an optional label, and an optional ground mind (the mind that
//! locally owns it, such as an NPC subject's own mind).

use dashmap::DashMap;

use crate::error::{BeliefError, DoxaResult};
use crate::ident::{MindId, Sid};

/// The identity of a thing across versions.
#[derive(Debug, Clone, PartialEq)]
pub struct Subject {
    pub sid: Sid,
    /// Globally unique label, if named.
    pub label: Option<String>,
    /// The mind that locally owns this subject, if any.
    pub ground_mind: Option<MindId>,
}

impl Subject {
    pub fn new(sid: Sid, label: Option<String>) -> Self {
        Self {
            sid,
            label,
            ground_mind: None,
        }
    }
}

/// Registry of all live subjects, keyed by SID.
#[derive(Debug, Default)]
pub struct SubjectRegistry {
    by_sid: DashMap<Sid, Subject>,
}

impl SubjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, subject: Subject) {
        self.by_sid.insert(subject.sid, subject);
    }

    pub fn get(&self, sid: Sid) -> DoxaResult<Subject> {
        self.by_sid.get(&sid).map(|r| r.value().clone()).ok_or_else(|| {
            BeliefError::UnknownSubject {
                subject: sid.to_string(),
            }
            .into()
        })
    }

    pub fn contains(&self, sid: Sid) -> bool {
        self.by_sid.contains_key(&sid)
    }

    /// Bind a subject to its locally owning mind.
    pub fn set_ground_mind(&self, sid: Sid, mind: MindId) -> DoxaResult<()> {
        let mut entry = self.by_sid.get_mut(&sid).ok_or(BeliefError::UnknownSubject {
            subject: sid.to_string(),
        })?;
        entry.ground_mind = Some(mind);
        Ok(())
    }

    pub fn all(&self) -> Vec<Subject> {
        self.by_sid.iter().map(|r| r.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.by_sid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_sid.is_empty()
    }

    pub fn clear(&self) {
        self.by_sid.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(raw: u64) -> Sid {
        Sid::new(raw).unwrap()
    }

    #[test]
    fn register_and_get() {
        let reg = SubjectRegistry::new();
        reg.register(Subject::new(sid(1), Some("hammer".into())));

        let got = reg.get(sid(1)).unwrap();
        assert_eq!(got.label.as_deref(), Some("hammer"));
        assert!(got.ground_mind.is_none());
    }

    #[test]
    fn missing_subject_errors() {
        let reg = SubjectRegistry::new();
        assert!(reg.get(sid(9)).is_err());
    }

    #[test]
    fn ground_mind_binding() {
        let reg = SubjectRegistry::new();
        reg.register(Subject::new(sid(1), None));
        reg.set_ground_mind(sid(1), MindId::new(4).unwrap()).unwrap();
        assert_eq!(reg.get(sid(1)).unwrap().ground_mind, MindId::new(4));
    }
}
