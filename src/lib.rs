#![forbid(unsafe_code)]

pub mod api;
pub mod config;
pub mod credentials;
pub mod dedup;
pub mod duration;
pub mod enrich;
pub mod fetcher;
pub mod metadata;
pub mod orchestrator;
pub mod plan;
pub mod retention;
pub mod sink;

#[cfg(test)]
pub(crate) mod testing;
