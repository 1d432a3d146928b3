pub mod audit;
pub mod config;
pub mod config_api;
pub mod console;
pub mod constants;
pub mod dashboard;
pub mod db;
pub mod identity;
pub mod models;
pub mod session;
pub mod sync;
pub mod telemetry;

#[cfg(test)]
mod test_utils;
