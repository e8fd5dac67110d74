pub mod ai;
pub mod context;
pub mod decision_log;
pub mod exchange;
pub mod kelly;
pub mod okx;
pub mod orchestrator;
