pub mod backoff;
pub mod cancel;
pub mod consts;
pub mod discovery;
pub mod error;
pub mod generator;
pub mod orchestrator;
pub mod platform;
pub mod settings;
pub mod stats;
pub mod store;
pub mod task;
pub mod worker;
