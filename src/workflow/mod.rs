// Workflow orchestration: state machine, persistence, stage execution and the conversation driver
pub mod checkpoint;
pub mod executor;
pub mod orchestrator;
pub mod stages;
pub mod state;
