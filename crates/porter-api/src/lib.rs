pub mod auth;
pub mod chat;
pub mod deliveries;
pub mod error;
pub mod middleware;
pub mod tags;
