//! TLS context descriptors and session caches.
//!
//! A [`ContextDescriptor`] is the aggregate the handshake implementation
//! consumes: key/trust material behind capability interfaces, the
//! evaluated cipher-suite selection, the protocol set, client-auth flags
//! and the session cache.  Assembly also applies the restricted-platform
//! rule: in restricted-cryptography mode one delegating indirection level
//! is unwrapped so the handshake stack receives the concrete managers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::cipher::CipherSuiteSelector;
use crate::config::{ClientContextConfig, Protocol, ServerContextConfig, UNBOUNDED};
use crate::delegating::{DelegatingKeyManager, DelegatingTrustManager};
use crate::fips;
use crate::keymanager::KeyManager;
use crate::provider::ProviderSet;
use crate::trust::TrustValidator;
use crate::Result;

// ─────────────────────────────────────────────────────────────────────────────
// Client authentication
// ─────────────────────────────────────────────────────────────────────────────

/// Client-authentication flags for a server context.
///
/// The flags are non-exclusive; policy (request vs require vs tolerate
/// failure) is decided by the handshake implementation reading them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientAuth {
    /// Request a client certificate.
    pub want: bool,
    /// Require a client certificate.
    pub need: bool,
    /// Accept handshakes whose client authentication failed.
    pub authentication_optional: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Session cache
// ─────────────────────────────────────────────────────────────────────────────

/// Cache of session identifiers with capacity and lifetime bounds.
///
/// A size or timeout of −1 means unbounded; a size of 0 also means
/// unbounded, matching the runtime the configured value is handed to.
/// Expired entries are pruned on read, so the active count reflects
/// lifetimes without a background sweeper.
#[derive(Debug)]
pub struct SessionCache {
    sessions: DashMap<Vec<u8>, Instant>,
    maximum_size: i64,
    timeout_secs: i64,
}

impl SessionCache {
    /// Create a cache with the given capacity and lifetime bounds.
    #[must_use]
    pub fn new(maximum_size: i64, timeout_secs: i64) -> Self {
        Self {
            sessions: DashMap::new(),
            maximum_size,
            timeout_secs,
        }
    }

    /// Record a session identifier, evicting the oldest entry when full.
    pub fn insert(&self, session_id: impl Into<Vec<u8>>) {
        if self.maximum_size > 0 && self.sessions.len() >= self.maximum_size as usize {
            let oldest = self
                .sessions
                .iter()
                .min_by_key(|entry| *entry.value())
                .map(|entry| entry.key().clone());
            if let Some(key) = oldest {
                self.sessions.remove(&key);
            }
        }
        self.sessions.insert(session_id.into(), Instant::now());
    }

    /// Forget a session identifier.
    pub fn remove(&self, session_id: &[u8]) {
        self.sessions.remove(session_id);
    }

    /// Drop all cached sessions.
    pub fn clear(&self) {
        self.sessions.clear();
    }

    /// Number of currently cached, non-expired session identifiers.
    #[must_use]
    pub fn active_session_count(&self) -> usize {
        if self.timeout_secs >= 0 {
            let horizon = Duration::from_secs(self.timeout_secs as u64);
            self.sessions.retain(|_, created| created.elapsed() < horizon);
        }
        self.sessions.len()
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new(UNBOUNDED, UNBOUNDED)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Descriptor
// ─────────────────────────────────────────────────────────────────────────────

/// Named collaborators resolved for a context by the lifecycle framework.
#[derive(Debug, Clone, Default)]
pub struct NamedReferences {
    /// Security domain for post-handshake authorization.
    pub security_domain: Option<String>,
    /// Principal transformer applied before realm selection.
    pub pre_realm_principal_transformer: Option<String>,
    /// Principal transformer applied after realm selection.
    pub post_realm_principal_transformer: Option<String>,
    /// Principal transformer applied last.
    pub final_principal_transformer: Option<String>,
    /// Realm mapper.
    pub realm_mapper: Option<String>,
}

/// Whether a descriptor drives the server or client side of a handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextRole {
    /// Accepts handshakes.
    Server,
    /// Initiates handshakes.
    Client,
}

/// Everything the handshake implementation needs from one context.
pub struct ContextDescriptor {
    role: ContextRole,
    key_manager: Option<Arc<dyn KeyManager>>,
    trust_validator: Option<Arc<dyn TrustValidator>>,
    cipher_suites: CipherSuiteSelector,
    protocols: Vec<Protocol>,
    client_auth: ClientAuth,
    use_cipher_suites_order: bool,
    wrap: bool,
    session_cache: SessionCache,
    references: NamedReferences,
}

impl std::fmt::Debug for ContextDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextDescriptor")
            .field("role", &self.role)
            .field("key_manager", &self.key_manager.is_some())
            .field("trust_validator", &self.trust_validator.is_some())
            .field("protocols", &self.protocols)
            .field("client_auth", &self.client_auth)
            .finish()
    }
}

impl ContextDescriptor {
    /// Assemble a server-side descriptor.
    pub fn server(
        config: &ServerContextConfig,
        key_manager: Arc<DelegatingKeyManager>,
        trust_manager: Option<Arc<DelegatingTrustManager>>,
        providers: &ProviderSet,
    ) -> Result<Self> {
        Self::server_with_restriction(
            config,
            key_manager,
            trust_manager,
            fips::is_restricted(providers),
        )
    }

    fn server_with_restriction(
        config: &ServerContextConfig,
        key_manager: Arc<DelegatingKeyManager>,
        trust_manager: Option<Arc<DelegatingTrustManager>>,
        restricted: bool,
    ) -> Result<Self> {
        let cipher_suites = CipherSuiteSelector::aggregate_expressions(
            config.cipher_suite_names.as_deref(),
            &config.cipher_suite_filter,
        )?;
        let key_manager = unwrap_key_manager(key_manager, restricted)?;
        let trust_validator = trust_manager
            .map(|tm| unwrap_trust_manager(tm, restricted))
            .transpose()?;

        debug!(
            role = "server",
            restricted,
            protocols = config.protocols.len(),
            "context descriptor assembled"
        );
        Ok(Self {
            role: ContextRole::Server,
            key_manager: Some(key_manager),
            trust_validator,
            cipher_suites,
            protocols: config.protocols.clone(),
            client_auth: ClientAuth {
                want: config.want_client_auth,
                need: config.need_client_auth,
                authentication_optional: config.authentication_optional,
            },
            use_cipher_suites_order: config.use_cipher_suites_order,
            wrap: config.wrap,
            session_cache: SessionCache::new(
                config.maximum_session_cache_size,
                config.session_timeout,
            ),
            references: NamedReferences {
                security_domain: config.security_domain.clone(),
                pre_realm_principal_transformer: config.pre_realm_principal_transformer.clone(),
                post_realm_principal_transformer: config.post_realm_principal_transformer.clone(),
                final_principal_transformer: config.final_principal_transformer.clone(),
                realm_mapper: config.realm_mapper.clone(),
            },
        })
    }

    /// Assemble a client-side descriptor.
    pub fn client(
        config: &ClientContextConfig,
        key_manager: Option<Arc<DelegatingKeyManager>>,
        trust_manager: Option<Arc<DelegatingTrustManager>>,
        providers: &ProviderSet,
    ) -> Result<Self> {
        Self::client_with_restriction(
            config,
            key_manager,
            trust_manager,
            fips::is_restricted(providers),
        )
    }

    fn client_with_restriction(
        config: &ClientContextConfig,
        key_manager: Option<Arc<DelegatingKeyManager>>,
        trust_manager: Option<Arc<DelegatingTrustManager>>,
        restricted: bool,
    ) -> Result<Self> {
        let cipher_suites = CipherSuiteSelector::aggregate_expressions(
            config.cipher_suite_names.as_deref(),
            &config.cipher_suite_filter,
        )?;
        let key_manager = key_manager
            .map(|km| unwrap_key_manager(km, restricted))
            .transpose()?;
        let trust_validator = trust_manager
            .map(|tm| unwrap_trust_manager(tm, restricted))
            .transpose()?;

        debug!(role = "client", restricted, "context descriptor assembled");
        Ok(Self {
            role: ContextRole::Client,
            key_manager,
            trust_validator,
            cipher_suites,
            protocols: config.protocols.clone(),
            client_auth: ClientAuth::default(),
            use_cipher_suites_order: true,
            wrap: false,
            session_cache: SessionCache::default(),
            references: NamedReferences::default(),
        })
    }

    /// Server or client side.
    #[must_use]
    pub fn role(&self) -> ContextRole {
        self.role
    }

    /// The key material supplier, when the context has one.
    #[must_use]
    pub fn key_manager(&self) -> Option<&Arc<dyn KeyManager>> {
        self.key_manager.as_ref()
    }

    /// The peer-chain validator, when the context has one.
    #[must_use]
    pub fn trust_validator(&self) -> Option<&Arc<dyn TrustValidator>> {
        self.trust_validator.as_ref()
    }

    /// The aggregated cipher-suite selection.
    #[must_use]
    pub fn cipher_suites(&self) -> &CipherSuiteSelector {
        &self.cipher_suites
    }

    /// Enabled protocols; empty means handshake-implementation default.
    #[must_use]
    pub fn protocols(&self) -> &[Protocol] {
        &self.protocols
    }

    /// Client-authentication flags.
    #[must_use]
    pub fn client_auth(&self) -> ClientAuth {
        self.client_auth
    }

    /// Honour the local cipher-suite order over the peer's.
    #[must_use]
    pub fn use_cipher_suites_order(&self) -> bool {
        self.use_cipher_suites_order
    }

    /// Wrap the engine handed to the handshake implementation.
    #[must_use]
    pub fn wrap(&self) -> bool {
        self.wrap
    }

    /// The context's session cache.
    #[must_use]
    pub fn session_cache(&self) -> &SessionCache {
        &self.session_cache
    }

    /// Named collaborators resolved by the lifecycle framework.
    #[must_use]
    pub fn references(&self) -> &NamedReferences {
        &self.references
    }
}

fn unwrap_key_manager(
    manager: Arc<DelegatingKeyManager>,
    restricted: bool,
) -> Result<Arc<dyn KeyManager>> {
    if restricted {
        // Restricted stacks refuse wrapped security types; hand over the
        // concrete delegate instead of the indirection layer.
        let delegate = manager.current()?;
        trace!("key manager unwrapped for restricted platform");
        Ok(delegate)
    } else {
        Ok(manager)
    }
}

fn unwrap_trust_manager(
    manager: Arc<DelegatingTrustManager>,
    restricted: bool,
) -> Result<Arc<dyn TrustValidator>> {
    if restricted {
        let delegate = manager.current()?;
        trace!("trust manager unwrapped for restricted platform");
        Ok(delegate)
    } else {
        Ok(manager)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
