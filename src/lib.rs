pub mod bridge;
pub mod channels;
pub mod config;
pub mod error;
pub mod identity;
pub mod render;
pub mod settings;
pub mod watcher;
pub mod web;

#[cfg(test)]
pub(crate) mod testing;
