pub mod auth;
pub mod config;
pub mod constraints;
pub mod engine;
pub mod feedback;
pub mod orchestrator;
pub mod population;
pub mod realtime;
pub mod store;
pub mod task;
