pub mod config;
pub mod error;
pub mod event;
pub mod job;
pub mod model;
pub mod registry;
