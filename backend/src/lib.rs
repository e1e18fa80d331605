pub mod cache;
pub mod cli;
pub mod config;
pub mod db;
pub mod service;
