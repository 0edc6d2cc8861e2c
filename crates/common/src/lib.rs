//! Common utilities and types shared across identity validator components.

#![warn(clippy::pedantic)]

/// Module for common configuration
pub mod config;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for JWT compact-serialization utilities (size limits, header peeking, iat checks)
pub mod jwt;
