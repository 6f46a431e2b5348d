//! Middleware module
//!
//! Contains the bearer credential middleware for the relay routes.

pub mod auth;
