pub mod bootstrap;
pub mod commands;
pub mod plan_store;
pub mod plan_sync;
