/// GoalLeader core - team chat, calling and assistant services
///
/// The client-side chat/call session model over a push-subscribed document
/// store, plus the dashboard's HTTP API and assistant prompt flows.

pub mod error;
pub mod config;
pub mod models;
pub mod events;
pub mod store;
pub mod contact_directory;
pub mod message_store;
pub mod call;
pub mod chat_controller;
pub mod ai;
pub mod http_api;
pub mod cli_app;
pub mod utils;

pub use error::{GoalError, Result};
pub use config::Config;
pub use chat_controller::{ChatController, ChatServices};
pub use contact_directory::{ContactDirectory, Roster};
pub use message_store::{ChatError, MessageDraft, MessageStore};
pub use store::{DocumentStore, MemoryStore, SledStore};
