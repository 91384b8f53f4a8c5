pub mod config;
pub mod dates;
pub mod fetch;
pub mod infra;
pub mod logging;
pub mod manifest;
pub mod orchestrator;
pub mod output;
pub mod parser;
pub mod partition;
pub mod record;
pub mod report;
pub mod services;
pub mod sources;
pub mod stats;
pub mod storage;
pub mod transform;
pub mod validate;
