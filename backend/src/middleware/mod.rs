pub mod observability;

pub use observability::{detailed_health_check, request_context};
