//! Identity Validator Library
//!
//! Authenticates bearer tokens from several trusted issuers, each with its
//! own validation policy, and projects the validated claims into user and
//! tenant contexts.
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> middleware/auth.rs -> auth::MultiIssuerDispatcher
//!                                          -> auth::IssuerRegistry (candidate order)
//!                                          -> keys::KeyMaterialResolver (secrets, JWKS cache)
//!                                          -> auth::TokenValidator (per-issuer checks)
//!                                       -> auth::ClaimsProjector
//! ```
//!
//! # Modules
//!
//! - `auth` - Issuer policies, validation, dispatch and claims projection
//! - `config` - Service configuration from environment
//! - `errors` - HTTP error type
//! - `handlers` - HTTP request handlers
//! - `keys` - Verification keys, OIDC discovery and JWKS caching
//! - `middleware` - Authentication and metrics middleware
//! - `observability` - Prometheus metrics
//! - `routes` - Axum router and application state

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod keys;
pub mod middleware;
pub mod observability;
pub mod routes;
