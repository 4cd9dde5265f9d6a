pub mod config;
pub mod domain;
pub mod history;
pub mod repo;
pub mod script;
pub mod store;
