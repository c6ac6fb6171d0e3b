pub mod canonical;
pub mod executor;
pub mod plan;
pub mod policy;
pub mod registration;
pub mod runner;

pub use executor::{execute_plan, MergeWriter};
pub use plan::plan_merge;
pub use policy::{BranchPolicy, DedupPolicy, JobPolicy, SalesPersonPolicy};
pub use registration::{register_sales_person, resolve_registration, RegistrationDecision};
pub use runner::DedupRunner;
