pub mod callback;
pub mod performance;
pub mod scheduler;
