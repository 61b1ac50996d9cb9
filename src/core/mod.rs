//! Core chat orchestration
//!
//! This module drives one submission from request to rendered reply.

mod chat;

pub use chat::{ChatEngine, ChatError, Reply, ReplyEvent};
