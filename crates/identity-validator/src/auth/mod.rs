//! Multi-issuer bearer token authentication.
//!
//! # Components
//!
//! - `policy` - Per-issuer validation policy
//! - `registry` - Named issuer policies and candidate ordering
//! - `validator` - Signature, issuer, audience and lifetime checks for one issuer
//! - `dispatcher` - Tries candidate issuers until one accepts a token
//! - `claims` - Claims of a validated token
//! - `projector` - User and tenant contexts built from validated claims
//! - `diagnostics` - Per-issuer success and failure counters
//! - `minting` - HS256 development tokens for a symmetric issuer

pub mod claims;
pub mod diagnostics;
pub mod dispatcher;
pub mod minting;
pub mod policy;
pub mod projector;
pub mod registry;
pub mod validator;

pub use claims::ValidatedClaims;
pub use diagnostics::{Diagnostics, DiagnosticsReport, FailureCategory, IssuerReport};
pub use dispatcher::{AuthenticationFailed, IssuerAttempt, MultiIssuerDispatcher};
pub use minting::{IssueError, IssuedToken, TokenIssuer, TokenRequest};
pub use policy::{IssuerKind, IssuerPolicy, IssuerType, PolicyError};
pub use projector::{
    ClaimsProjector, TenantContext, UserContext, DEFAULT_TENANT_ID, UNKNOWN_EMAIL,
};
pub use registry::{IssuerRegistry, RegistryError};
pub use validator::{ParsedToken, TokenValidator, ValidationError};
