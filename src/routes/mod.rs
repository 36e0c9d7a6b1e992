//! Route modules for the ingestion server

pub mod health;
pub mod upload;
