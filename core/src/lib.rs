pub mod assistant;
pub mod db;
pub mod library_import;
pub mod models;
pub mod parser;
pub mod service;
pub mod shopping;
