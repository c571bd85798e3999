//! Assignment consistency rules.
//!
//! Pure functions over snapshots. Inputs are borrowed and outputs are fresh
//! values; nothing here touches storage or logs. Every assignment change must
//! go through `propose_assignment` or `propose_bulk_assignment`.

use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::model::{AssignmentMap, AssignmentRef, Status, Student, SubjectName};
use crate::registry::TutorRegistry;
use crate::roster::StudentRoster;

/// Business-rule rejection for one subject of a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssignmentError {
    #[error("{subject} is not one of the student's required subjects")]
    InvalidSubject { subject: SubjectName },

    #[error("cannot assign {subject}: tutor {tutor_id} does not exist")]
    TutorNotFound {
        subject: SubjectName,
        tutor_id: String,
    },

    #[error("cannot assign {subject}: {tutor_name} does not teach it")]
    SubjectNotTaught {
        subject: SubjectName,
        tutor_id: String,
        tutor_name: String,
    },
}

impl AssignmentError {
    pub fn code(&self) -> &'static str {
        match self {
            AssignmentError::InvalidSubject { .. } => "invalid_subject",
            AssignmentError::TutorNotFound { .. } => "tutor_not_found",
            AssignmentError::SubjectNotTaught { .. } => "subject_not_taught",
        }
    }

    pub fn subject(&self) -> &str {
        match self {
            AssignmentError::InvalidSubject { subject }
            | AssignmentError::TutorNotFound { subject, .. }
            | AssignmentError::SubjectNotTaught { subject, .. } => subject,
        }
    }
}

impl Serialize for AssignmentError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Body<'a> {
            code: &'a str,
            subject: &'a str,
            message: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            tutor_id: Option<&'a str>,
            #[serde(skip_serializing_if = "Option::is_none")]
            tutor_name: Option<&'a str>,
        }

        let (tutor_id, tutor_name) = match self {
            AssignmentError::InvalidSubject { .. } => (None, None),
            AssignmentError::TutorNotFound { tutor_id, .. } => (Some(tutor_id.as_str()), None),
            AssignmentError::SubjectNotTaught {
                tutor_id,
                tutor_name,
                ..
            } => (Some(tutor_id.as_str()), Some(tutor_name.as_str())),
        };
        Body {
            code: self.code(),
            subject: self.subject(),
            message: self.to_string(),
            tutor_id,
            tutor_name,
        }
        .serialize(serializer)
    }
}

/// An assignment whose tutor no longer teaches the bound subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StaleAssignment {
    pub student_id: String,
    pub student_name: String,
    pub subject: SubjectName,
    pub tutor_id: String,
    pub tutor_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleReason {
    SubjectNotTaught,
    TutorNotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditFinding {
    #[serde(flatten)]
    pub assignment: StaleAssignment,
    pub reason: StaleReason,
}

/// `Assigned` iff every required subject has a tutor (vacuously true for an
/// empty list), `Unassigned` iff none do, `Partially` otherwise.
pub fn compute_status(required_subjects: &[SubjectName], assignments: &AssignmentMap) -> Status {
    let assigned = required_subjects
        .iter()
        .filter(|s| matches!(assignments.get(s.as_str()), Some(Some(_))))
        .count();
    if assigned == required_subjects.len() {
        Status::Assigned
    } else if assigned == 0 {
        Status::Unassigned
    } else {
        Status::Partially
    }
}

fn validate_entry(
    student: &Student,
    subject: &str,
    tutor_id: Option<&str>,
    registry: &TutorRegistry,
) -> Result<Option<AssignmentRef>, AssignmentError> {
    if !student.requires(subject) {
        return Err(AssignmentError::InvalidSubject {
            subject: subject.to_string(),
        });
    }
    let Some(tutor_id) = tutor_id else {
        return Ok(None);
    };
    let Some(tutor) = registry.find_by_id(tutor_id) else {
        return Err(AssignmentError::TutorNotFound {
            subject: subject.to_string(),
            tutor_id: tutor_id.to_string(),
        });
    };
    if !tutor.teaches(subject) {
        return Err(AssignmentError::SubjectNotTaught {
            subject: subject.to_string(),
            tutor_id: tutor.id.clone(),
            tutor_name: tutor.name.clone(),
        });
    }
    Ok(Some(AssignmentRef::for_tutor(tutor)))
}

/// Assign (or with `None`, unassign) one subject. Returns the full updated
/// snapshot; the input is never touched.
pub fn propose_assignment(
    student: &Student,
    subject: &str,
    tutor_id: Option<&str>,
    registry: &TutorRegistry,
) -> Result<Student, AssignmentError> {
    let value = validate_entry(student, subject, tutor_id, registry)?;
    let mut next = student.clone();
    next.set_assignment(subject, value);
    Ok(next)
}

/// Validate a whole assignment form and apply it all-or-nothing.
///
/// Every entry is checked and every violation is returned. Errors are ordered
/// by the student's required-subject order, followed by unknown subjects in
/// map order. On success the proposal replaces the assignment map wholesale:
/// required subjects absent from `proposal` end up unassigned.
pub fn propose_bulk_assignment(
    student: &Student,
    proposal: &BTreeMap<SubjectName, Option<String>>,
    registry: &TutorRegistry,
) -> Result<Student, Vec<AssignmentError>> {
    let mut errors = Vec::new();
    let mut next_map = AssignmentMap::new();

    for subject in student.required_subjects() {
        let tutor_id = proposal.get(subject).and_then(|t| t.as_deref());
        match validate_entry(student, subject, tutor_id, registry) {
            Ok(v) => {
                next_map.insert(subject.clone(), v);
            }
            Err(e) => errors.push(e),
        }
    }
    for subject in proposal.keys().filter(|k| !student.requires(k)) {
        errors.push(AssignmentError::InvalidSubject {
            subject: subject.clone(),
        });
    }

    if !errors.is_empty() {
        return Err(errors);
    }
    let mut next = student.clone();
    next.replace_assignments(next_map);
    Ok(next)
}

/// Report the assignments that a tutor subject edit would leave stale.
///
/// Only assignments bound to `tutor_id` are considered; the result follows
/// `affected_students` order, then required-subject order within a student.
/// Nothing is cleared: unassigning is a separate, explicit call.
pub fn on_tutor_subjects_changed<'a, I>(
    tutor_id: &str,
    new_subjects: &BTreeSet<SubjectName>,
    affected_students: I,
) -> Vec<StaleAssignment>
where
    I: IntoIterator<Item = &'a Student>,
{
    let mut out = Vec::new();
    for student in affected_students {
        for (subject, a) in student.assigned() {
            if a.tutor_id != tutor_id || new_subjects.contains(subject) {
                continue;
            }
            out.push(StaleAssignment {
                student_id: student.id.clone(),
                student_name: student.name.clone(),
                subject: subject.to_string(),
                tutor_id: a.tutor_id.clone(),
                tutor_name: a.tutor_name.clone(),
            });
        }
    }
    out
}

/// Every assignment in the roster that the current registry no longer backs.
pub fn audit(roster: &StudentRoster, registry: &TutorRegistry) -> Vec<AuditFinding> {
    let mut out = Vec::new();
    for student in roster.iter() {
        for (subject, a) in student.assigned() {
            let reason = match registry.find_by_id(&a.tutor_id) {
                None => StaleReason::TutorNotFound,
                Some(t) if !t.teaches(subject) => StaleReason::SubjectNotTaught,
                Some(_) => continue,
            };
            out.push(AuditFinding {
                assignment: StaleAssignment {
                    student_id: student.id.clone(),
                    student_name: student.name.clone(),
                    subject: subject.to_string(),
                    tutor_id: a.tutor_id.clone(),
                    tutor_name: a.tutor_name.clone(),
                },
                reason,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Tutor;

    fn registry() -> TutorRegistry {
        TutorRegistry::new([
            Tutor::new("t1", "T1", "t1@example.com", ["Math"]).unwrap(),
            Tutor::new("t2", "T2", "t2@example.com", ["Physics"]).unwrap(),
        ])
    }

    fn s1() -> Student {
        Student::new("s1", "S1", ["Math", "Physics"]).unwrap()
    }

    fn bulk(pairs: &[(&str, Option<&str>)]) -> BTreeMap<SubjectName, Option<String>> {
        pairs
            .iter()
            .map(|(s, t)| (s.to_string(), t.map(|t| t.to_string())))
            .collect()
    }

    #[test]
    fn assigning_one_subject_makes_student_partial() {
        let s = s1();
        assert_eq!(s.status(), Status::Unassigned);
        let next = propose_assignment(&s, "Math", Some("t1"), &registry()).expect("assign");
        assert_eq!(next.status(), Status::Partially);
        let a = next.assignment("Math").expect("math assignment");
        assert_eq!(a.tutor_id, "t1");
        assert_eq!(a.tutor_name, "T1");
        assert_eq!(s.status(), Status::Unassigned);
    }

    #[test]
    fn tutor_must_teach_the_subject() {
        let e = propose_assignment(&s1(), "Physics", Some("t1"), &registry()).unwrap_err();
        assert_eq!(
            e,
            AssignmentError::SubjectNotTaught {
                subject: "Physics".into(),
                tutor_id: "t1".into(),
                tutor_name: "T1".into()
            }
        );
        assert_eq!(e.code(), "subject_not_taught");
    }

    #[test]
    fn unknown_subject_and_unknown_tutor_are_rejected() {
        let reg = registry();
        let e = propose_assignment(&s1(), "Chemistry", None, &reg).unwrap_err();
        assert_eq!(e.code(), "invalid_subject");
        let e = propose_assignment(&s1(), "Math", Some("t9"), &reg).unwrap_err();
        assert_eq!(e.code(), "tutor_not_found");
        assert_eq!(e.subject(), "Math");
    }

    #[test]
    fn unassign_always_succeeds_and_is_idempotent() {
        let reg = registry();
        let s = s1();
        let again = propose_assignment(&s, "Physics", None, &reg).expect("unassign");
        assert_eq!(again, s);

        let assigned = propose_assignment(&s, "Math", Some("t1"), &reg).unwrap();
        let cleared = propose_assignment(&assigned, "Math", None, &reg).unwrap();
        assert_eq!(cleared.status(), Status::Unassigned);
    }

    #[test]
    fn bulk_assignment_applies_when_everything_validates() {
        let s = s1();
        let next = propose_bulk_assignment(
            &s,
            &bulk(&[("Math", Some("t1")), ("Physics", Some("t2"))]),
            &registry(),
        )
        .expect("bulk");
        assert_eq!(next.status(), Status::Assigned);
    }

    #[test]
    fn bulk_assignment_replaces_map_wholesale() {
        let reg = registry();
        let s = propose_bulk_assignment(
            &s1(),
            &bulk(&[("Math", Some("t1")), ("Physics", Some("t2"))]),
            &reg,
        )
        .unwrap();
        let next = propose_bulk_assignment(&s, &bulk(&[("Physics", Some("t2"))]), &reg).unwrap();
        assert!(next.assignment("Math").is_none());
        assert_eq!(next.status(), Status::Partially);
    }

    #[test]
    fn bulk_assignment_collects_every_violation() {
        let s = s1();
        let errors = propose_bulk_assignment(
            &s,
            &bulk(&[
                ("Art", Some("t1")),
                ("Math", Some("t2")),
                ("Physics", Some("t9")),
            ]),
            &registry(),
        )
        .unwrap_err();
        let codes: Vec<_> = errors.iter().map(|e| (e.subject(), e.code())).collect();
        assert_eq!(
            codes,
            vec![
                ("Math", "subject_not_taught"),
                ("Physics", "tutor_not_found"),
                ("Art", "invalid_subject"),
            ]
        );
    }

    #[test]
    fn empty_requirements_are_vacuously_assigned() {
        assert_eq!(compute_status(&[], &AssignmentMap::new()), Status::Assigned);
    }

    #[test]
    fn shrinking_subjects_flags_only_that_tutors_assignments() {
        let reg = TutorRegistry::new([
            Tutor::new("t1", "T1", "t1@example.com", ["Math", "English"]).unwrap(),
            Tutor::new("t3", "T3", "t3@example.com", ["Math", "Physics"]).unwrap(),
        ]);
        let s = propose_bulk_assignment(
            &s1(),
            &bulk(&[("Math", Some("t1")), ("Physics", Some("t3"))]),
            &reg,
        )
        .unwrap();
        let other = Student::new("s2", "S2", ["Math"]).unwrap();
        let other = propose_assignment(&other, "Math", Some("t3"), &reg).unwrap();

        let new_subjects: BTreeSet<SubjectName> = ["English".to_string()].into_iter().collect();
        let stale = on_tutor_subjects_changed("t1", &new_subjects, [&s, &other]);
        assert_eq!(
            stale,
            vec![StaleAssignment {
                student_id: "s1".into(),
                student_name: "S1".into(),
                subject: "Math".into(),
                tutor_id: "t1".into(),
                tutor_name: "T1".into(),
            }]
        );
        // Reporting does not clear anything.
        assert_eq!(s.assignment("Math").map(|a| a.tutor_id.as_str()), Some("t1"));
    }

    #[test]
    fn audit_reports_missing_tutors_and_dropped_subjects() {
        let reg = registry();
        let s = propose_bulk_assignment(
            &s1(),
            &bulk(&[("Math", Some("t1")), ("Physics", Some("t2"))]),
            &reg,
        )
        .unwrap();
        let roster = StudentRoster::new([s]);
        let later =
            TutorRegistry::new([Tutor::new("t1", "T1", "t1@example.com", ["English"]).unwrap()]);

        let findings = audit(&roster, &later);
        let got: Vec<_> = findings
            .iter()
            .map(|f| (f.assignment.subject.as_str(), f.reason))
            .collect();
        assert_eq!(
            got,
            vec![
                ("Math", StaleReason::SubjectNotTaught),
                ("Physics", StaleReason::TutorNotFound),
            ]
        );
        assert!(audit(&roster, &reg).is_empty());
    }

    #[test]
    fn errors_serialize_with_code_and_tutor_name() {
        let e = AssignmentError::SubjectNotTaught {
            subject: "Physics".into(),
            tutor_id: "t1".into(),
            tutor_name: "T1".into(),
        };
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["code"], "subject_not_taught");
        assert_eq!(v["tutorName"], "T1");
        assert_eq!(v["subject"], "Physics");
        let v = serde_json::to_value(AssignmentError::InvalidSubject {
            subject: "Art".into(),
        })
        .unwrap();
        assert!(v.get("tutorId").is_none());
    }
}
