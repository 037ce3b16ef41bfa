//! gifcap-session - authentication and session synchronisation core
//!
//! This library provides the background-process session logic of the GIF
//! capture extension: acquiring credentials from the backend, persisting
//! the session, and keeping it fresh across UI surfaces.

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod storage;

#[cfg(test)]
mod testing;
