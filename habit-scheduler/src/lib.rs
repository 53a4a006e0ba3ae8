pub mod clock;
pub mod config;
pub mod engine;
pub mod recurrence;
pub mod remote;
pub mod scheduler;
pub mod store;
pub mod task;
pub mod web;
