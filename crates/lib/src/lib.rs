//! Postbox core library: messages, the event bus, the reply workflow and the web server
//! used by the CLI.

pub mod app;
pub mod auth;
pub mod config;
pub mod events;
pub mod init;
pub mod llm;
pub mod message;
pub mod steps;
pub mod store;
pub mod submit;
pub mod web;
pub mod workflow;
