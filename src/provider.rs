//! Cryptographic provider resolution.
//!
//! A provider set is an ordered list of named providers, each declaring
//! which validator/key-factory algorithms it can instantiate.  Resolution
//! walks the set in order and picks the first provider that passes the
//! optional name filter and supports the requested algorithm; when no set
//! is supplied the platform default provider is used.

use tracing::trace;

use crate::{Error, Result};

/// Default trust-validator algorithm when none is configured.
pub const DEFAULT_TRUST_ALGORITHM: &str = "PKIX";

/// Default key-manager algorithm when none is configured.
pub const DEFAULT_KEY_ALGORITHM: &str = "SunX509";

/// One named cryptographic provider.
#[derive(Debug, Clone)]
pub struct Provider {
    name: String,
    algorithms: Vec<String>,
    secure_random_name: String,
}

impl Provider {
    /// Create a provider declaring the algorithms it supports.
    pub fn new(
        name: impl Into<String>,
        algorithms: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            algorithms: algorithms.into_iter().map(Into::into).collect(),
            secure_random_name: "platform-random".to_string(),
        }
    }

    /// Override the name of the provider's secure-random implementation.
    ///
    /// Used by the restricted-cryptography probe's fallback heuristic.
    #[must_use]
    pub fn with_secure_random_name(mut self, name: impl Into<String>) -> Self {
        self.secure_random_name = name.into();
        self
    }

    /// Provider name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the provider's secure-random implementation.
    #[must_use]
    pub fn secure_random_name(&self) -> &str {
        &self.secure_random_name
    }

    /// `true` when the provider can instantiate `algorithm`.
    #[must_use]
    pub fn supports(&self, algorithm: &str) -> bool {
        self.algorithms.iter().any(|a| a == algorithm)
    }
}

/// Ordered set of providers consulted during resolution.
#[derive(Debug, Clone, Default)]
pub struct ProviderSet {
    providers: Vec<Provider>,
}

impl ProviderSet {
    /// Build a set from an ordered list of providers.
    #[must_use]
    pub fn new(providers: Vec<Provider>) -> Self {
        Self { providers }
    }

    /// The platform default provider set.
    #[must_use]
    pub fn platform_default() -> Self {
        Self::new(vec![Provider::new(
            "default",
            [DEFAULT_TRUST_ALGORITHM, DEFAULT_KEY_ALGORITHM],
        )])
    }

    /// Providers in resolution order.
    #[must_use]
    pub fn providers(&self) -> &[Provider] {
        &self.providers
    }

    /// Resolve the first provider matching `provider_name` (any, when
    /// unfiltered) that supports `algorithm`.
    ///
    /// `kind` names the factory being resolved and only feeds the error.
    pub fn resolve(
        &self,
        kind: &'static str,
        provider_name: Option<&str>,
        algorithm: &str,
    ) -> Result<&Provider> {
        for provider in &self.providers {
            if let Some(filter) = provider_name {
                if provider.name() != filter {
                    continue;
                }
            }
            if provider.supports(algorithm) {
                trace!(
                    provider = provider.name(),
                    algorithm,
                    kind,
                    "provider resolved"
                );
                return Ok(provider);
            }
        }
        Err(Error::ProviderResolution {
            kind,
            algorithm: algorithm.to_string(),
        })
    }
}
