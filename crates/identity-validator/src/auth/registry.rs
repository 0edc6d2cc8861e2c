//! Registry of trusted issuers.
//!
//! Built once at startup and shared read-only. Candidate ordering uses the
//! token's unverified `iss` only as a hint: every candidate is still fully
//! validated against its own policy.

use crate::auth::policy::{IssuerPolicy, PolicyError};
use crate::config::IssuerConfig;
use common::jwt::{normalize_issuer, peek_issuer};
use std::sync::Arc;
use thiserror::Error;

/// Configuration-time registry errors. These are fatal at startup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Two policies share a name.
    #[error("duplicate issuer name: {0}")]
    DuplicateIssuer(String),

    /// A policy failed validation.
    #[error("invalid issuer policy: {0}")]
    InvalidPolicy(#[from] PolicyError),
}

/// Ordered set of issuer policies, unique by name.
#[derive(Debug, Clone, Default)]
pub struct IssuerRegistry {
    policies: Vec<Arc<IssuerPolicy>>,
}

impl IssuerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configuration records, in order.
    ///
    /// # Errors
    ///
    /// Returns the first `InvalidPolicy` or `DuplicateIssuer` encountered.
    pub fn from_config(configs: &[IssuerConfig]) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for config in configs {
            registry.register(IssuerPolicy::try_from(config)?)?;
        }
        Ok(registry)
    }

    /// Add a policy.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::DuplicateIssuer` if the name is already registered.
    pub fn register(&mut self, policy: IssuerPolicy) -> Result<(), RegistryError> {
        if self.get(policy.name()).is_some() {
            return Err(RegistryError::DuplicateIssuer(policy.name().to_string()));
        }

        tracing::debug!(
            target: "idv.registry",
            issuer_name = %policy.name(),
            issuer_type = %policy.issuer_type(),
            audiences = policy.audiences().len(),
            "Issuer registered"
        );
        self.policies.push(Arc::new(policy));
        Ok(())
    }

    /// Look up a policy by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<IssuerPolicy>> {
        self.policies.iter().find(|p| p.name() == name)
    }

    /// All policies in registration order.
    #[must_use]
    pub fn policies(&self) -> &[Arc<IssuerPolicy>] {
        &self.policies
    }

    /// Registered names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.policies.iter().map(|p| p.name())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Candidate policies for a token, in the order they should be tried.
    ///
    /// Policies whose issuer matches the token's unverified `iss` come
    /// first; every other policy follows in registration order.
    #[must_use]
    pub fn policies_for(&self, token: &str) -> Vec<Arc<IssuerPolicy>> {
        self.policies_for_issuer(peek_issuer(token).as_deref())
    }

    /// Candidate ordering for an already-extracted `iss` hint.
    #[must_use]
    pub fn policies_for_issuer(&self, iss: Option<&str>) -> Vec<Arc<IssuerPolicy>> {
        let Some(iss) = iss.map(normalize_issuer) else {
            return self.policies.clone();
        };

        let (mut matching, rest): (Vec<_>, Vec<_>) = self
            .policies
            .iter()
            .cloned()
            .partition(|p| normalize_issuer(p.issuer()) == iss);

        matching.extend(rest);
        matching
    }
}
