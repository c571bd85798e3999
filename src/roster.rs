use serde::Serialize;
use std::collections::HashMap;

use crate::engine;
use crate::model::{Status, Student};
use crate::registry::TutorRegistry;

#[derive(Debug, Clone, Default)]
pub struct StudentRoster {
    students: Vec<Student>,
    by_id: HashMap<String, usize>,
}

impl StudentRoster {
    pub fn new<I>(students: I) -> Self
    where
        I: IntoIterator<Item = Student>,
    {
        let mut out = Self::default();
        for s in students {
            match out.by_id.get(&s.id) {
                Some(&idx) => out.students[idx] = s,
                None => {
                    out.by_id.insert(s.id.clone(), out.students.len());
                    out.students.push(s);
                }
            }
        }
        out
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Student> {
        self.by_id.get(id).map(|&idx| &self.students[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Student> + '_ {
        self.students.iter()
    }

    pub fn len(&self) -> usize {
        self.students.len()
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }

    /// Students with at least one assignment to `tutor_id`, in roster order.
    /// This is the affected set for a tutor subject edit.
    pub fn referencing<'a>(&'a self, tutor_id: &'a str) -> impl Iterator<Item = &'a Student> + 'a {
        self.students
            .iter()
            .filter(move |s| s.references_tutor(tutor_id))
    }

    /// Case-insensitive substring match on name or email.
    pub fn search<'a>(&'a self, term: &str) -> Vec<&'a Student> {
        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return self.students.iter().collect();
        }
        self.students
            .iter()
            .filter(|s| {
                s.name.to_lowercase().contains(&needle) || s.email.to_lowercase().contains(&needle)
            })
            .collect()
    }
}

/// Dashboard aggregates over the roster and registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterStats {
    pub total_students: usize,
    pub total_tutors: usize,
    pub fully_assigned: usize,
    pub partially_assigned: usize,
    pub unassigned: usize,
    pub available_subjects: usize,
    pub stale_assignments: usize,
}

impl RosterStats {
    pub fn compute(roster: &StudentRoster, registry: &TutorRegistry) -> Self {
        let mut out = Self {
            total_students: roster.len(),
            total_tutors: registry.len(),
            available_subjects: registry.taught_subjects().len(),
            ..Self::default()
        };
        for s in roster.iter() {
            match s.status() {
                Status::Assigned => out.fully_assigned += 1,
                Status::Partially => out.partially_assigned += 1,
                Status::Unassigned => out.unassigned += 1,
            }
        }
        out.stale_assignments = engine::audit(roster, registry).len();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AssignmentMap, AssignmentRef, Tutor};

    fn assigned(pairs: &[(&str, &str)]) -> AssignmentMap {
        pairs
            .iter()
            .map(|(subj, tid)| {
                (
                    subj.to_string(),
                    Some(AssignmentRef {
                        tutor_id: tid.to_string(),
                        tutor_name: tid.to_uppercase(),
                    }),
                )
            })
            .collect()
    }

    fn roster() -> StudentRoster {
        let mut s1 = Student::from_parts(
            "s1",
            "Asha",
            ["Math", "Physics"],
            assigned(&[("Math", "t1")]),
        )
        .unwrap();
        s1.email = "asha@example.com".into();
        let s2 = Student::from_parts(
            "s2",
            "Kabir",
            ["Math", "English"],
            assigned(&[("Math", "t2"), ("English", "t1")]),
        )
        .unwrap();
        let s3 = Student::new("s3", "Nila", ["Biology"]).unwrap();
        StudentRoster::new([s1, s2, s3])
    }

    #[test]
    fn referencing_keeps_roster_order() {
        let r = roster();
        let ids: Vec<_> = r.referencing("t1").map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2"]);
        assert_eq!(r.referencing("t9").count(), 0);
    }

    #[test]
    fn search_by_name_or_email() {
        let r = roster();
        assert_eq!(r.search("asha@").len(), 1);
        assert_eq!(r.search("KAB").len(), 1);
        assert_eq!(r.search("").len(), 3);
    }

    #[test]
    fn stats_count_statuses_and_stale_rows() {
        let r = roster();
        let reg = TutorRegistry::new([
            Tutor::new("t1", "T1", "t1@example.com", ["Math"]).unwrap(),
            Tutor::new("t2", "T2", "t2@example.com", ["Math", "Physics"]).unwrap(),
        ]);
        let stats = RosterStats::compute(&r, &reg);
        assert_eq!(stats.total_students, 3);
        assert_eq!(stats.total_tutors, 2);
        assert_eq!(stats.fully_assigned, 1);
        assert_eq!(stats.partially_assigned, 1);
        assert_eq!(stats.unassigned, 1);
        assert_eq!(stats.available_subjects, 2);
        // s2 English -> t1, who only teaches Math.
        assert_eq!(stats.stale_assignments, 1);
    }
}
