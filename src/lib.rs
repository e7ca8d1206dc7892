pub mod accelerator;
pub mod app;
pub mod components;
pub mod config;
pub mod engine;
pub mod error;
pub mod generator;
pub mod kernel;
pub mod logging;
pub mod metrics;
pub mod report;
pub mod scheduler;
pub mod simulator;
pub mod task;
pub mod task_queue;
