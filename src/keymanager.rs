//! Key material selection.
//!
//! [`StoreKeyManager`] serves chain and key material straight out of a
//! loaded [`KeyStore`].  [`LazyKeyManager`] wraps a
//! [`DelegatingKeyManager`] and defers self-signed generation to the
//! first capability call, so a service can start without key material
//! and mint its own on first use.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tracing::{error, info};

use crate::delegating::DelegatingKeyManager;
use crate::keystore::{AliasFilter, KeyStore, SharedKeyStore};
use crate::Result;

/// Alias under which a lazily generated self-signed entry is stored.
pub const SELF_SIGNED_ALIAS: &str = "server";

// ─────────────────────────────────────────────────────────────────────────────
// Capability trait
// ─────────────────────────────────────────────────────────────────────────────

/// Supplier of key material for handshakes.
pub trait KeyManager: Send + Sync {
    /// Pick an alias whose private key matches `key_type` (`"RSA"`, `"EC"`,
    /// or `None` for any).
    fn choose_alias(&self, key_type: Option<&str>) -> Result<Option<String>>;

    /// Certificate chain of an alias, leaf first.
    fn certificate_chain(&self, alias: &str) -> Result<Option<Vec<CertificateDer<'static>>>>;

    /// Private key of an alias.
    fn private_key(&self, alias: &str) -> Result<Option<PrivateKeyDer<'static>>>;

    /// All aliases holding a private key, in sorted order.
    fn aliases(&self) -> Result<Vec<String>>;
}

fn key_algorithm(key: &PrivateKeyDer<'_>) -> Option<&'static str> {
    match key {
        PrivateKeyDer::Pkcs1(_) => Some("RSA"),
        PrivateKeyDer::Sec1(_) => Some("EC"),
        // PKCS#8 wraps its own algorithm identifier; treat as any.
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store-backed manager
// ─────────────────────────────────────────────────────────────────────────────

/// Key manager over the keyed entries of a [`KeyStore`].
pub struct StoreKeyManager {
    entries: Vec<(String, Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)>,
}

impl StoreKeyManager {
    /// Build from the keyed aliases of `store`, optionally restricted by
    /// `filter`.  Aliases without a private key are skipped.
    #[must_use]
    pub fn from_store(store: &KeyStore, filter: Option<&AliasFilter>) -> Self {
        let mut entries = Vec::new();
        for alias in store.aliases() {
            if let Some(filter) = filter {
                if !filter.matches(&alias) {
                    continue;
                }
            }
            let Some(entry) = store.entry(&alias) else {
                continue;
            };
            let Some(key) = &entry.key else { continue };
            entries.push((alias, entry.chain.clone(), key.clone_key()));
        }
        Self { entries }
    }

    /// Number of keyed aliases served.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when no keyed aliases are available.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyManager for StoreKeyManager {
    fn choose_alias(&self, key_type: Option<&str>) -> Result<Option<String>> {
        let chosen = self
            .entries
            .iter()
            .find(|(_, _, key)| match (key_type, key_algorithm(key)) {
                (None, _) | (_, None) => true,
                (Some(wanted), Some(actual)) => wanted.eq_ignore_ascii_case(actual),
            })
            .map(|(alias, _, _)| alias.clone());
        Ok(chosen)
    }

    fn certificate_chain(&self, alias: &str) -> Result<Option<Vec<CertificateDer<'static>>>> {
        Ok(self
            .entries
            .iter()
            .find(|(a, _, _)| a == alias)
            .map(|(_, chain, _)| chain.clone()))
    }

    fn private_key(&self, alias: &str) -> Result<Option<PrivateKeyDer<'static>>> {
        Ok(self
            .entries
            .iter()
            .find(|(a, _, _)| a == alias)
            .map(|(_, _, key)| key.clone_key()))
    }

    fn aliases(&self) -> Result<Vec<String>> {
        Ok(self.entries.iter().map(|(a, _, _)| a.clone()).collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lazy self-signed provisioning
// ─────────────────────────────────────────────────────────────────────────────

/// Key manager that generates a self-signed entry on first use.
///
/// Initialization runs at most once: a fast-path flag skips the lock once
/// provisioning has been attempted, and the cold path rechecks under the
/// lock so concurrent first callers produce a single generation.  A failed
/// attempt is not retried; subsequent calls surface the unset-delegate
/// state error.
pub struct LazyKeyManager {
    inner: DelegatingKeyManager,
    store: SharedKeyStore,
    host: String,
    filter: Option<AliasFilter>,
    ready: AtomicBool,
    init_lock: Mutex<()>,
    generations: AtomicUsize,
}

impl LazyKeyManager {
    /// Create a manager that will mint a self-signed certificate for `host`
    /// into `store` on first capability call.
    #[must_use]
    pub fn new(store: SharedKeyStore, host: impl Into<String>, filter: Option<AliasFilter>) -> Self {
        Self {
            inner: DelegatingKeyManager::new(),
            store,
            host: host.into(),
            filter,
            ready: AtomicBool::new(false),
            init_lock: Mutex::new(()),
            generations: AtomicUsize::new(0),
        }
    }

    /// `true` once provisioning has been attempted (success or failure).
    #[must_use]
    pub fn is_provisioned(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// How many generation events have happened (0 or 1).
    #[must_use]
    pub fn generation_count(&self) -> usize {
        self.generations.load(Ordering::Acquire)
    }

    fn provision(&self) -> Result<()> {
        if self.ready.load(Ordering::Acquire) {
            return Ok(());
        }
        let _guard = self.init_lock.lock();
        if self.ready.load(Ordering::Acquire) {
            return Ok(());
        }
        let result = self.initialize();
        // Attempted exactly once, whether it worked or not.
        self.ready.store(true, Ordering::Release);
        if let Err(e) = &result {
            error!(host = %self.host, error = %e, "lazy key provisioning failed");
        }
        result
    }

    fn initialize(&self) -> Result<()> {
        let mut store = self.store.write();
        let (chain, key) = crate::keystore::generate_self_signed(&self.host)?;
        store.insert(SELF_SIGNED_ALIAS, chain, Some(key));
        store.persist(SELF_SIGNED_ALIAS)?;
        self.generations.fetch_add(1, Ordering::AcqRel);
        let manager = StoreKeyManager::from_store(&store, self.filter.as_ref());
        drop(store);
        self.inner.set_delegate(Arc::new(manager));
        info!(host = %self.host, alias = SELF_SIGNED_ALIAS, "self-signed key material provisioned");
        Ok(())
    }
}

impl KeyManager for LazyKeyManager {
    fn choose_alias(&self, key_type: Option<&str>) -> Result<Option<String>> {
        self.provision()?;
        self.inner.choose_alias(key_type)
    }

    fn certificate_chain(&self, alias: &str) -> Result<Option<Vec<CertificateDer<'static>>>> {
        self.provision()?;
        self.inner.certificate_chain(alias)
    }

    fn private_key(&self, alias: &str) -> Result<Option<PrivateKeyDer<'static>>> {
        self.provision()?;
        self.inner.private_key(alias)
    }

    fn aliases(&self) -> Result<Vec<String>> {
        self.provision()?;
        self.inner.aliases()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::generate_self_signed;
    use crate::Error;
    use parking_lot::RwLock;

    fn keyed_store(aliases: &[&str]) -> KeyStore {
        let mut store = KeyStore::in_memory();
        for alias in aliases {
            let (chain, key) = generate_self_signed(&format!("{alias}.example.com")).unwrap();
            store.insert(*alias, chain, Some(key));
        }
        store
    }

    #[test]
    fn store_manager_skips_cert_only_aliases() {
        let mut store = keyed_store(&["keyed"]);
        let (chain, _) = generate_self_signed("certonly.example.com").unwrap();
        store.insert("certonly", chain, None);

        let manager = StoreKeyManager::from_store(&store, None);
        assert_eq!(manager.aliases().unwrap(), vec!["keyed".to_string()]);
        assert!(manager.private_key("certonly").unwrap().is_none());
    }

    #[test]
    fn store_manager_honours_alias_filter() {
        let store = keyed_store(&["a", "b"]);
        let filter = AliasFilter::parse("ALL:-b").unwrap();
        let manager = StoreKeyManager::from_store(&store, Some(&filter));
        assert_eq!(manager.aliases().unwrap(), vec!["a".to_string()]);
        assert!(manager.certificate_chain("b").unwrap().is_none());
    }

    #[test]
    fn choose_alias_without_key_type_picks_first() {
        let store = keyed_store(&["a", "b"]);
        let manager = StoreKeyManager::from_store(&store, None);
        assert_eq!(manager.choose_alias(None).unwrap(), Some("a".to_string()));
    }

    #[test]
    fn lazy_manager_generates_once_and_persists() {
        // GIVEN: an empty on-disk store
        let dir = tempfile::tempdir().unwrap();
        let store: SharedKeyStore =
            Arc::new(RwLock::new(KeyStore::open_dir(dir.path()).unwrap()));
        let lazy = LazyKeyManager::new(Arc::clone(&store), "node1.example.com", None);
        assert!(!lazy.is_provisioned());

        // WHEN: capability calls arrive
        let alias = lazy.choose_alias(None).unwrap();
        lazy.aliases().unwrap();
        lazy.certificate_chain(SELF_SIGNED_ALIAS).unwrap();

        // THEN: exactly one generation, visible in the store and on disk
        assert_eq!(alias, Some(SELF_SIGNED_ALIAS.to_string()));
        assert_eq!(lazy.generation_count(), 1);
        assert!(store.read().has_key_material());
        assert!(dir.path().join("server.crt").is_file());
        assert!(dir.path().join("server.key").is_file());
    }

    #[test]
    fn lazy_manager_failure_is_not_retried() {
        // Non-ASCII host makes the IA5 SAN encoding fail.
        let store: SharedKeyStore = Arc::new(RwLock::new(KeyStore::in_memory()));
        let lazy = LazyKeyManager::new(Arc::clone(&store), "bäd.example.com", None);

        assert!(lazy.choose_alias(None).is_err());
        assert!(lazy.is_provisioned());
        assert_eq!(lazy.generation_count(), 0);

        // Second call is the unset-delegate state error, not a fresh attempt.
        assert!(matches!(
            lazy.choose_alias(None).unwrap_err(),
            Error::State(_)
        ));
        assert_eq!(lazy.generation_count(), 0);
    }
}
