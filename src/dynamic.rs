//! Configuration-following context resolution.
//!
//! A dynamic resolver never caches: every acquisition consults the live
//! authentication context and assembles a fresh client descriptor from
//! whatever configuration is in effect at that moment.  Two consecutive
//! acquisitions straddling a configuration change therefore produce
//! different descriptors.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::trace;

use crate::config::{ClientContextConfig, DynamicClientContextConfig};
use crate::context::ContextDescriptor;
use crate::delegating::{DelegatingKeyManager, DelegatingTrustManager};
use crate::provider::ProviderSet;
use crate::Result;

// ─────────────────────────────────────────────────────────────────────────────
// Authentication context
// ─────────────────────────────────────────────────────────────────────────────

/// Snapshot of an authentication context at one point in time.
#[derive(Clone, Default)]
pub struct AuthenticationContext {
    /// Client-context configuration in effect.
    pub config: ClientContextConfig,
    /// Key material supplier, when the context authenticates itself.
    pub key_manager: Option<Arc<DelegatingKeyManager>>,
    /// Peer-chain validator, when the context pins trust.
    pub trust_manager: Option<Arc<DelegatingTrustManager>>,
}

/// Live source of authentication-context snapshots.
///
/// Implementations are owned by the external authentication collaborator;
/// `current` must return the configuration in effect at call time.
pub trait AuthenticationContextSource: Send + Sync {
    /// The snapshot in effect right now.
    fn current(&self) -> Result<AuthenticationContext>;
}

/// Source whose snapshot can be replaced atomically at runtime.
#[derive(Default)]
pub struct SwappableAuthenticationContext {
    current: ArcSwap<AuthenticationContext>,
}

impl SwappableAuthenticationContext {
    /// Create with an initial snapshot.
    #[must_use]
    pub fn new(context: AuthenticationContext) -> Self {
        Self {
            current: ArcSwap::from_pointee(context),
        }
    }

    /// Replace the snapshot served to subsequent acquisitions.
    pub fn replace(&self, context: AuthenticationContext) {
        self.current.store(Arc::new(context));
    }
}

impl AuthenticationContextSource for SwappableAuthenticationContext {
    fn current(&self) -> Result<AuthenticationContext> {
        Ok(AuthenticationContext::clone(&self.current.load()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolver
// ─────────────────────────────────────────────────────────────────────────────

/// Builds a client context afresh on every acquisition.
pub struct DynamicContextResolver {
    authentication_context: String,
    source: Arc<dyn AuthenticationContextSource>,
    providers: ProviderSet,
}

impl DynamicContextResolver {
    /// Create a resolver over the named authentication context.
    #[must_use]
    pub fn new(
        config: &DynamicClientContextConfig,
        source: Arc<dyn AuthenticationContextSource>,
        providers: ProviderSet,
    ) -> Self {
        Self {
            authentication_context: config.authentication_context.clone(),
            source,
            providers,
        }
    }

    /// Name of the authentication context this resolver follows.
    #[must_use]
    pub fn authentication_context(&self) -> &str {
        &self.authentication_context
    }

    /// Assemble a descriptor from the configuration in effect right now.
    ///
    /// No caching: the returned descriptor belongs to this acquisition
    /// alone and is not reused by later calls.
    pub fn acquire(&self) -> Result<ContextDescriptor> {
        let snapshot = self.source.current()?;
        trace!(
            authentication_context = %self.authentication_context,
            "dynamic context acquisition"
        );
        ContextDescriptor::client(
            &snapshot.config,
            snapshot.key_manager,
            snapshot.trust_manager,
            &self.providers,
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
