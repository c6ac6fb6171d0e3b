pub mod core;
pub mod report;

pub use self::core::{
    BranchRecord, ChildLink, ChildRow, DedupRecord, EntityKind, ForeignKeyRelation, JobRecord,
    KeyedRelation, SalesPersonRecord,
};
pub use self::report::{
    ClusterFailure, ConsolidationSummary, GroupReport, GroupStatus, MemberSummary, MergeAction,
    MergeOutcome, MergePlan, RunMode, RunReport,
};
