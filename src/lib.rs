pub mod action;
pub mod config;
pub mod monitor;
pub mod pose;
