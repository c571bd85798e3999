use std::collections::{BTreeSet, HashMap};

use crate::model::{SubjectName, Tutor};

/// Read-only tutor snapshot used to validate assignment proposals.
#[derive(Debug, Clone, Default)]
pub struct TutorRegistry {
    tutors: Vec<Tutor>,
    by_id: HashMap<String, usize>,
}

impl TutorRegistry {
    /// Builds a registry. A repeated id replaces the earlier entry in place.
    pub fn new<I>(tutors: I) -> Self
    where
        I: IntoIterator<Item = Tutor>,
    {
        let mut out = Self::default();
        for t in tutors {
            match out.by_id.get(&t.id) {
                Some(&idx) => out.tutors[idx] = t,
                None => {
                    out.by_id.insert(t.id.clone(), out.tutors.len());
                    out.tutors.push(t);
                }
            }
        }
        out
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Tutor> {
        self.by_id.get(id).map(|&idx| &self.tutors[idx])
    }

    pub fn subjects_of(&self, id: &str) -> Option<&BTreeSet<SubjectName>> {
        self.find_by_id(id).map(|t| &t.subjects)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tutor> + '_ {
        self.tutors.iter()
    }

    pub fn len(&self) -> usize {
        self.tutors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tutors.is_empty()
    }

    /// Candidate tutors for one subject, in registry order.
    pub fn tutors_for_subject<'a>(
        &'a self,
        subject: &'a str,
    ) -> impl Iterator<Item = &'a Tutor> + 'a {
        self.tutors.iter().filter(move |t| t.teaches(subject))
    }

    /// Distinct subjects taught by at least one tutor.
    pub fn taught_subjects(&self) -> BTreeSet<&str> {
        self.tutors
            .iter()
            .flat_map(|t| t.subjects.iter().map(|s| s.as_str()))
            .collect()
    }

    /// Case-insensitive substring match on name, email, or any subject.
    pub fn search<'a>(&'a self, term: &str) -> Vec<&'a Tutor> {
        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return self.tutors.iter().collect();
        }
        self.tutors
            .iter()
            .filter(|t| {
                t.name.to_lowercase().contains(&needle)
                    || t.email.to_lowercase().contains(&needle)
                    || t.subjects.iter().any(|s| s.to_lowercase().contains(&needle))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TutorRegistry {
        TutorRegistry::new([
            Tutor::new("t1", "Ravi Kumar", "ravi@example.com", ["Mathematics", "English"]).unwrap(),
            Tutor::new("t2", "Meera Shah", "meera@example.com", ["Physics"]).unwrap(),
            Tutor::new("t3", "Arjun Das", "arjun@example.com", ["Mathematics", "Physics"]).unwrap(),
        ])
    }

    #[test]
    fn lookup_and_subjects() {
        let r = registry();
        assert_eq!(r.find_by_id("t2").map(|t| t.name.as_str()), Some("Meera Shah"));
        assert!(r.find_by_id("nope").is_none());
        assert!(r.subjects_of("t1").expect("t1").contains("English"));
        assert!(r.subjects_of("nope").is_none());
    }

    #[test]
    fn repeated_id_replaces_in_place() {
        let r = TutorRegistry::new([
            Tutor::new("t1", "Old", "a@example.com", ["Math"]).unwrap(),
            Tutor::new("t2", "Other", "b@example.com", ["Math"]).unwrap(),
            Tutor::new("t1", "New", "a@example.com", ["English"]).unwrap(),
        ]);
        assert_eq!(r.len(), 2);
        let names: Vec<_> = r.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["New", "Other"]);
        assert!(!r.find_by_id("t1").unwrap().teaches("Math"));
    }

    #[test]
    fn candidates_and_taught_subjects() {
        let r = registry();
        let ids: Vec<_> = r.tutors_for_subject("Physics").map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t2", "t3"]);
        assert_eq!(r.tutors_for_subject("Hindi").count(), 0);
        assert_eq!(r.taught_subjects().len(), 3);
    }

    #[test]
    fn search_matches_name_email_and_subject() {
        let r = registry();
        assert_eq!(r.search("meera").len(), 1);
        assert_eq!(r.search("ARJUN@").len(), 1);
        assert_eq!(r.search("phys").len(), 2);
        assert_eq!(r.search("  ").len(), 3);
    }
}
