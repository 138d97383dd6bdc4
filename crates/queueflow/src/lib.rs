pub mod admin;
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod settings;
pub mod telemetry;
pub mod worker;
pub mod workers;
