pub mod assignments;
pub mod backup_exchange;
pub mod core;
pub mod dashboard;
pub mod payments;
pub mod sessions;
pub mod students;
pub mod tutors;
