pub mod archive;
pub mod catalog;
pub mod cleanup;
pub mod commands;
pub mod config;
pub mod detect;
pub mod executor;
pub mod http;
pub mod install;
pub mod job;
pub mod manager;
pub mod package;
pub mod plan;
pub mod runtime;
