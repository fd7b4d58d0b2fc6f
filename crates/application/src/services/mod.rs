mod capacity_ledger;


pub use capacity_ledger::{
    CancelRequest, CapacityLedger, CapacityLedgerDependencies, ProjectOverview, RegisterRequest,
};
