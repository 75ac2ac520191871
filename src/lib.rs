// This file exposes the modules as public modules in the crate

pub mod config;
pub mod errors;
pub mod handlers;
pub mod json_parser;
pub mod json_repair;
pub mod json_scanner;
pub mod llm_client;
pub mod llm_json;
pub mod prompt_builder;
pub mod sessions;
pub mod workflow_runner;
pub mod workflows;
