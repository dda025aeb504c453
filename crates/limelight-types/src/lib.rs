pub mod api;
pub mod chat;
pub mod events;
pub mod models;
