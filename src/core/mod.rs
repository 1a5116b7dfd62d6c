pub mod agent;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod n8n;
pub mod security;
pub mod terminal;
pub mod webhook;
