//! # Identity Validator Test Utilities
//!
//! This crate provides:
//! - Deterministic Ed25519 fixtures (fixed keys for reproducible tests)
//! - Claim builders and HS256/EdDSA signing helpers
//! - A mock OIDC issuer serving discovery and JWKS documents
//!
//! ## Usage
//!
//! ```rust,ignore
//! use identity_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let key = TestKeypair::new(1, "key-1");
//!     let issuer = MockOidcIssuer::start(&[&key]).await;
//!
//!     let claims = TestClaimsBuilder::new(&issuer.uri(), "api://app")
//!         .for_user("alice")
//!         .build();
//!     let token = key.sign(&claims);
//! }
//! ```

pub mod crypto_fixtures;
pub mod mock_issuer;
pub mod token_builders;

pub use crypto_fixtures::*;
pub use mock_issuer::*;
pub use token_builders::*;
