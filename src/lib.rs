pub mod api;
pub mod classifier;
pub mod config;
pub mod discovery;
pub mod humanize;
pub mod observability;
pub mod retrieval;
pub mod tasks;
pub mod transcode;
