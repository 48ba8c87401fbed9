pub mod app;
pub mod artifact;
pub mod config;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod output;
pub mod remote;
pub mod shortcut;
pub mod store;
pub mod tui;
