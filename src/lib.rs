pub mod backup;
pub mod config;
pub mod db;
pub mod dedupe;
pub mod enrich;
pub mod fetcher;
pub mod model;
pub mod pipeline;
pub mod render;
pub mod retry;
pub mod secrets;
pub mod snapshot;
pub mod sources;
