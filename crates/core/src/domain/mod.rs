pub mod conversation;
pub mod decision;
pub mod rule;
pub mod snapshot;
pub mod thinking;
pub mod tool;
pub mod workflow;
