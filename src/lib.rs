pub mod audit;
pub mod bank;
pub mod config;
pub mod gateway;
pub mod scoring;
pub mod store;
pub mod trainer;
