pub mod approvals;
pub mod audit;
pub mod run;
