#![forbid(unsafe_code)]

pub mod app;
pub mod chapter_text;
pub mod cli;
pub mod commands;
pub mod config;
pub mod import;
pub mod logging;
pub mod model;
pub mod source;
pub mod store;
