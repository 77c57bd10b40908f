pub mod acquire;
pub mod catalog;
pub mod commands;
pub mod compose;
pub mod config;
pub mod current;
pub mod error;
pub mod feed;
pub mod format;
pub mod identity;
pub mod manager;
pub mod package;
pub mod property;
pub mod recognizer;
pub mod runtime;
