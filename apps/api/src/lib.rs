//! Streaming chat for the résumé coach: the HTTP endpoint that runs an agent
//! turn and streams its events, and the client session that consumes them.

pub mod agent;
pub mod auth;
pub mod chat;
pub mod client;
pub mod config;
pub mod db;
pub mod errors;
pub mod llm_client;
pub mod models;
pub mod protocol;
pub mod routes;
pub mod state;
