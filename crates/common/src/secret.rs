//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types used for issuer signing secrets and
//! minted bearer tokens. `Debug` on these types prints a redaction marker,
//! so configuration structs that derive `Debug` stay safe to log.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct IssuerEntry {
//!     name: String,
//!     secret: SecretString,
//! }
//!
//! let json = r#"{"name": "LocalAuth", "secret": "hmac-shared-secret"}"#;
//! let entry: IssuerEntry = serde_json::from_str(json).unwrap();
//!
//! assert!(!format!("{entry:?}").contains("hmac-shared-secret"));
//! assert_eq!(entry.secret.expose_secret(), "hmac-shared-secret");
//! ```
//!
//! Use `SecretString` for HMAC issuer secrets and for tokens handed back to
//! callers. Call `expose_secret()` only at the point where the raw bytes are
//! fed to a signing or verification key.

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
