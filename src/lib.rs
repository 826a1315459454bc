// Library exports for sudoroot
// This allows integration tests and the binary to share the server modules

pub mod access;
pub mod auth;
pub mod cache;
pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod members;
pub mod routes;
pub mod state;
pub mod support;
pub mod writeups;
