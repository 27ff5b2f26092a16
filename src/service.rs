//! Service lifecycle around trust and key managers.
//!
//! A service owns its delegating manager for the whole process lifetime;
//! `start` resolves configuration into a concrete delegate and swaps it
//! in, `stop` clears it, `init` is a stop followed by a start so every
//! dependency is re-resolved.  Runtime operations address the running
//! service and fail with a state error otherwise.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustls_pki_types::CertificateDer;
use tracing::{debug, info};

use crate::config::{KeyManagerConfig, TrustManagerConfig};
use crate::delegating::{DelegatingKeyManager, DelegatingTrustManager};
use crate::keymanager::{LazyKeyManager, StoreKeyManager};
use crate::keystore::{AliasFilter, CredentialSource as _, KeyStore, SharedKeyStore};
use crate::provider::{ProviderSet, DEFAULT_KEY_ALGORITHM};
use crate::reload::ReloadableTrustValidator;
use crate::revocation::{OcspResponder, RevocationPolicyBuilder};
use crate::trust::TrustMaterialBuilder;
use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Trust manager service
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle wrapper around one configured trust manager.
pub struct TrustManagerService {
    name: String,
    config: TrustManagerConfig,
    providers: ProviderSet,
    responder: Option<Arc<dyn OcspResponder>>,
    manager: Arc<DelegatingTrustManager>,
    reloadable: RwLock<Option<Arc<ReloadableTrustValidator>>>,
    running: AtomicBool,
}

impl std::fmt::Debug for TrustManagerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustManagerService")
            .field("name", &self.name)
            .field("responder", &self.responder.is_some())
            .field("running", &self.is_running())
            .finish()
    }
}

impl TrustManagerService {
    /// Create a stopped service; configuration is validated eagerly.
    pub fn new(
        name: impl Into<String>,
        config: TrustManagerConfig,
        providers: ProviderSet,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            config,
            providers,
            responder: None,
            manager: Arc::new(DelegatingTrustManager::new()),
            reloadable: RwLock::new(None),
            running: AtomicBool::new(false),
        })
    }

    /// Inject the transport used to reach the online responder.
    #[must_use]
    pub fn with_responder(mut self, responder: Arc<dyn OcspResponder>) -> Self {
        self.responder = Some(responder);
        self
    }

    /// The delegating manager handed to context descriptors.  Valid for
    /// the service's whole lifetime; its delegate follows start/stop.
    #[must_use]
    pub fn manager(&self) -> Arc<DelegatingTrustManager> {
        Arc::clone(&self.manager)
    }

    /// `true` while the service is started.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Resolve configuration into a validator and set it as delegate.
    pub fn start(&self) -> Result<()> {
        let store = KeyStore::open_dir(&self.config.key_store)?;
        // Alias filtering happens inside the builder; the unfiltered view
        // stays available for responder-certificate lookup.
        let base = TrustMaterialBuilder::new(&self.config, &store)
            .providers(&self.providers)
            .build()?;

        if self.config.has_revocation() {
            let mut builder = RevocationPolicyBuilder::from_config(&self.config)?;
            if let Some(responder) = &self.responder {
                builder = builder.responder(Arc::clone(responder));
            }
            if let Some(cert) = self.resolve_responder_certificate(&store)? {
                builder = builder.responder_certificate(cert);
            }

            if self.config.has_crls() {
                // CRL-backed validators support hot reload.
                let reloadable = Arc::new(ReloadableTrustValidator::new(builder, base)?);
                self.manager.set_delegate(reloadable.clone());
                *self.reloadable.write() = Some(reloadable);
            } else {
                let validator = builder.build(base)?;
                self.manager.set_delegate(Arc::new(validator));
            }
        } else {
            self.manager.set_delegate(base);
        }

        self.running.store(true, Ordering::Release);
        info!(service = %self.name, "trust manager service started");
        Ok(())
    }

    /// Clear the delegate; capability calls fail until the next start.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        *self.reloadable.write() = None;
        self.manager.clear_delegate();
        debug!(service = %self.name, "trust manager service stopped");
    }

    /// Stop then start, forcing re-resolution of every dependency.
    pub fn init(&self) -> Result<()> {
        self.stop();
        self.start()
    }

    /// Reload the CRL data behind the running validator.
    ///
    /// Fails with a state error when the service is stopped or the
    /// running validator is not a reloadable CRL-backed one.
    pub fn reload_certificate_revocation_list(&self) -> Result<()> {
        if !self.is_running() {
            return Err(Error::state(format!(
                "trust manager service '{}' is not running",
                self.name
            )));
        }
        let guard = self.reloadable.read();
        let reloadable = guard.as_ref().ok_or_else(|| {
            Error::state(format!(
                "trust manager '{}' is not a reloadable CRL-backed trust manager",
                self.name
            ))
        })?;
        reloadable.reload()
    }

    fn resolve_responder_certificate(
        &self,
        trust_store: &KeyStore,
    ) -> Result<Option<CertificateDer<'static>>> {
        let Some(ocsp) = &self.config.ocsp else {
            return Ok(None);
        };
        let Some(alias) = &ocsp.responder_certificate else {
            return Ok(None);
        };

        // The responder certificate lives in its own keystore when one is
        // configured, otherwise in the trust manager's store.
        let cert = match &ocsp.responder_keystore {
            Some(dir) => KeyStore::open_dir(dir)?.certificate(alias).cloned(),
            None => trust_store.certificate(alias).cloned(),
        };
        cert.ok_or_else(|| {
            Error::config(format!(
                "responder certificate alias '{alias}' not found in keystore"
            ))
        })
        .map(Some)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Key manager service
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle wrapper around one configured key manager.
pub struct KeyManagerService {
    name: String,
    config: KeyManagerConfig,
    providers: ProviderSet,
    manager: Arc<DelegatingKeyManager>,
    running: AtomicBool,
}

impl KeyManagerService {
    /// Create a stopped service.
    pub fn new(
        name: impl Into<String>,
        config: KeyManagerConfig,
        providers: ProviderSet,
    ) -> Result<Self> {
        if let Some(expression) = &config.alias_filter {
            AliasFilter::parse(expression)?;
        }
        Ok(Self {
            name: name.into(),
            config,
            providers,
            manager: Arc::new(DelegatingKeyManager::new()),
            running: AtomicBool::new(false),
        })
    }

    /// The delegating manager handed to context descriptors.
    #[must_use]
    pub fn manager(&self) -> Arc<DelegatingKeyManager> {
        Arc::clone(&self.manager)
    }

    /// `true` while the service is started.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Resolve configuration into a key manager and set it as delegate.
    ///
    /// Credential resolution happens here, so an unresolvable keystore
    /// password blocks activation rather than failing handshakes later.
    pub fn start(&self) -> Result<()> {
        let algorithm = self
            .config
            .algorithm
            .clone()
            .unwrap_or_else(|| DEFAULT_KEY_ALGORITHM.to_string());
        self.providers.resolve(
            "key manager",
            self.config.provider_name.as_deref(),
            &algorithm,
        )?;

        self.config.credential_reference.resolve()?;

        let store = KeyStore::open_dir(&self.config.key_store)?;
        let filter = self
            .config
            .alias_filter
            .as_deref()
            .map(AliasFilter::parse)
            .transpose()?;

        match &self.config.generate_self_signed_certificate_host {
            Some(host) if !store.has_key_material() => {
                let shared: SharedKeyStore = Arc::new(RwLock::new(store));
                let lazy = LazyKeyManager::new(shared, host.clone(), filter);
                self.manager.set_delegate(Arc::new(lazy));
                info!(
                    service = %self.name,
                    host,
                    "key manager service started with deferred self-signed provisioning"
                );
            }
            _ => {
                if !store.has_key_material() {
                    return Err(Error::config(format!(
                        "keystore '{}' contains no key material",
                        self.config.key_store.display()
                    )));
                }
                let manager = StoreKeyManager::from_store(&store, filter.as_ref());
                self.manager.set_delegate(Arc::new(manager));
                info!(service = %self.name, "key manager service started");
            }
        }

        self.running.store(true, Ordering::Release);
        Ok(())
    }

    /// Clear the delegate; capability calls fail until the next start.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.manager.clear_delegate();
        debug!(service = %self.name, "key manager service stopped");
    }

    /// Stop then start, forcing re-resolution of every dependency.
    pub fn init(&self) -> Result<()> {
        self.stop();
        self.start()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
