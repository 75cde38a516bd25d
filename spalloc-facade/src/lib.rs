pub mod facade;
pub mod memory;
pub mod types;

pub use facade::{AllocatorFacade, Job, JobList, Machine, SubMachine};
pub use types::*;
