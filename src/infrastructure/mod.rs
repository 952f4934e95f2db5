pub mod config;
pub mod credential_store;
pub mod enforcement_sink;
pub mod error;
pub mod kv_store;
pub mod plan_api_client;
