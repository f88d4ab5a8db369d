pub mod approval;
pub mod fields;
pub mod submission;
