// Resolves social media post links into directly playable media

pub mod config;
pub mod resolver;
pub mod server;
