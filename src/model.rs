use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::engine;

pub type SubjectName = String;

/// Per-student map of required subject to its current tutor (or nothing).
pub type AssignmentMap = BTreeMap<SubjectName, Option<AssignmentRef>>;

/// Snapshot of the tutor taken when the assignment was made.
///
/// `tutor_name` is a cached display copy. It is not rewritten when the tutor
/// is renamed, so it may lag behind the registry; only the tutor id is used
/// for validity checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentRef {
    pub tutor_id: String,
    pub tutor_name: String,
}

impl AssignmentRef {
    pub fn for_tutor(tutor: &Tutor) -> Self {
        Self {
            tutor_id: tutor.id.clone(),
            tutor_name: tutor.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Unassigned,
    Partially,
    Assigned,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Unassigned => "unassigned",
            Status::Partially => "partially",
            Status::Assigned => "assigned",
        }
    }
}

/// Structural problems in raw snapshot parts: a caller bug or a corrupted
/// store, never a business-rule rejection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("{kind} id must not be empty")]
    EmptyId { kind: &'static str },

    #[error("student {student_id} assigns {subject:?}, which is not a required subject")]
    UnknownAssignmentSubject { student_id: String, subject: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tutor {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qualification: Option<String>,
    /// Payout rate; sessions fall back to the default rate when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hourly_rate: Option<u32>,
    pub subjects: BTreeSet<SubjectName>,
}

impl Tutor {
    pub fn new<I, S>(
        id: impl Into<String>,
        name: impl Into<String>,
        email: impl Into<String>,
        subjects: I,
    ) -> Result<Self, SnapshotError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(SnapshotError::EmptyId { kind: "tutor" });
        }
        Ok(Self {
            id,
            name: name.into(),
            email: email.into(),
            phone: None,
            qualification: None,
            hourly_rate: None,
            subjects: subject_set(subjects),
        })
    }

    pub fn teaches(&self, subject: &str) -> bool {
        self.subjects.contains(subject)
    }
}

/// A student snapshot.
///
/// `required_subjects` and `assignments` are kept private so that the map can
/// never hold a key outside the required list; every required subject always
/// has an entry (possibly `None`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grade: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    required_subjects: Vec<SubjectName>,
    assignments: AssignmentMap,
}

impl Student {
    /// New student with every required subject unassigned.
    pub fn new<I, S>(
        id: impl Into<String>,
        name: impl Into<String>,
        required_subjects: I,
    ) -> Result<Self, SnapshotError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::from_parts(id, name, required_subjects, AssignmentMap::new())
    }

    /// Rebuild a snapshot from stored parts. Duplicate or blank required
    /// subjects are dropped (first occurrence wins); required subjects missing
    /// from `assignments` are filled in as unassigned.
    pub fn from_parts<I, S>(
        id: impl Into<String>,
        name: impl Into<String>,
        required_subjects: I,
        assignments: AssignmentMap,
    ) -> Result<Self, SnapshotError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(SnapshotError::EmptyId { kind: "student" });
        }

        let mut required: Vec<SubjectName> = Vec::new();
        for s in required_subjects {
            let s = s.as_ref().trim();
            if s.is_empty() || required.iter().any(|r| r == s) {
                continue;
            }
            required.push(s.to_string());
        }

        if let Some(stray) = assignments.keys().find(|k| !required.contains(*k)) {
            return Err(SnapshotError::UnknownAssignmentSubject {
                student_id: id,
                subject: stray.clone(),
            });
        }

        let mut full = assignments;
        for s in &required {
            full.entry(s.clone()).or_insert(None);
        }

        Ok(Self {
            id,
            name: name.into(),
            email: String::new(),
            grade: None,
            phone: None,
            required_subjects: required,
            assignments: full,
        })
    }

    pub fn required_subjects(&self) -> &[SubjectName] {
        &self.required_subjects
    }

    pub fn assignments(&self) -> &AssignmentMap {
        &self.assignments
    }

    pub fn requires(&self, subject: &str) -> bool {
        self.required_subjects.iter().any(|s| s == subject)
    }

    pub fn assignment(&self, subject: &str) -> Option<&AssignmentRef> {
        self.assignments.get(subject).and_then(|a| a.as_ref())
    }

    /// Assigned subjects in required-subject order.
    pub fn assigned(&self) -> impl Iterator<Item = (&str, &AssignmentRef)> + '_ {
        self.required_subjects
            .iter()
            .filter_map(|s| self.assignment(s).map(|a| (s.as_str(), a)))
    }

    pub fn references_tutor(&self, tutor_id: &str) -> bool {
        self.assigned().any(|(_, a)| a.tutor_id == tutor_id)
    }

    pub fn status(&self) -> Status {
        engine::compute_status(&self.required_subjects, &self.assignments)
    }

    // Engine only. Unknown subjects are ignored.
    pub(crate) fn set_assignment(&mut self, subject: &str, value: Option<AssignmentRef>) {
        if let Some(slot) = self.assignments.get_mut(subject) {
            *slot = value;
        }
    }

    pub(crate) fn replace_assignments(&mut self, assignments: AssignmentMap) {
        self.assignments = assignments;
    }
}

/// Trimmed, non-empty, de-duplicated subject names.
pub fn subject_set<I, S>(subjects: I) -> BTreeSet<SubjectName>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    subjects
        .into_iter()
        .map(|s| s.as_ref().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
