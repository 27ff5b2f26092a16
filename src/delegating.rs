//! Delegating trust and key managers.
//!
//! Pure indirection layers: every capability call forwards to whatever
//! delegate is currently referenced.  Setting the delegate is a single
//! atomic reference replace; readers observe either the previous
//! fully-formed delegate or the new one, never a partial state, so no
//! lock is needed.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};

use crate::keymanager::KeyManager;
use crate::trust::TrustValidator;
use crate::{Error, Result};

// Sized cells so the trait objects can live inside the atomic holders.
struct TrustSlot(Arc<dyn TrustValidator>);
struct KeySlot(Arc<dyn KeyManager>);

// ─────────────────────────────────────────────────────────────────────────────
// Trust manager
// ─────────────────────────────────────────────────────────────────────────────

/// Trust manager whose delegate can be swapped after construction.
#[derive(Default)]
pub struct DelegatingTrustManager {
    delegate: ArcSwapOption<TrustSlot>,
}

impl DelegatingTrustManager {
    /// Create with no delegate set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replace the delegate.
    pub fn set_delegate(&self, validator: Arc<dyn TrustValidator>) {
        self.delegate.store(Some(Arc::new(TrustSlot(validator))));
    }

    /// Drop the delegate (service stop).
    pub fn clear_delegate(&self) {
        self.delegate.store(None);
    }

    /// The current delegate.
    pub fn current(&self) -> Result<Arc<dyn TrustValidator>> {
        self.delegate
            .load()
            .as_ref()
            .map(|slot| Arc::clone(&slot.0))
            .ok_or_else(|| Error::state("trust manager has no delegate set"))
    }
}

impl TrustValidator for DelegatingTrustManager {
    fn validate_chain(&self, chain: &[CertificateDer<'static>]) -> Result<()> {
        self.current()?.validate_chain(chain)
    }

    fn accepted_issuers(&self) -> Vec<CertificateDer<'static>> {
        self.current()
            .map(|v| v.accepted_issuers())
            .unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Key manager
// ─────────────────────────────────────────────────────────────────────────────

/// Key manager whose delegate can be swapped after construction.
#[derive(Default)]
pub struct DelegatingKeyManager {
    delegate: ArcSwapOption<KeySlot>,
}

impl DelegatingKeyManager {
    /// Create with no delegate set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replace the delegate.
    pub fn set_delegate(&self, manager: Arc<dyn KeyManager>) {
        self.delegate.store(Some(Arc::new(KeySlot(manager))));
    }

    /// Drop the delegate (service stop).
    pub fn clear_delegate(&self) {
        self.delegate.store(None);
    }

    /// The current delegate.
    pub fn current(&self) -> Result<Arc<dyn KeyManager>> {
        self.delegate
            .load()
            .as_ref()
            .map(|slot| Arc::clone(&slot.0))
            .ok_or_else(|| Error::state("key manager has no delegate set"))
    }
}

impl KeyManager for DelegatingKeyManager {
    fn choose_alias(&self, key_type: Option<&str>) -> Result<Option<String>> {
        self.current()?.choose_alias(key_type)
    }

    fn certificate_chain(&self, alias: &str) -> Result<Option<Vec<CertificateDer<'static>>>> {
        self.current()?.certificate_chain(alias)
    }

    fn private_key(&self, alias: &str) -> Result<Option<PrivateKeyDer<'static>>> {
        self.current()?.private_key(alias)
    }

    fn aliases(&self) -> Result<Vec<String>> {
        self.current()?.aliases()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::generate_self_signed;
    use crate::trust::StoreTrustValidator;

    #[test]
    fn capability_before_delegate_is_a_state_error() {
        let manager = DelegatingTrustManager::new();
        let (chain, _) = generate_self_signed("a.example.com").unwrap();
        assert!(matches!(
            manager.validate_chain(&chain).unwrap_err(),
            Error::State(_)
        ));
    }

    #[test]
    fn swap_is_visible_to_subsequent_calls() {
        let manager = DelegatingTrustManager::new();
        let (chain_a, _) = generate_self_signed("a.example.com").unwrap();
        let (chain_b, _) = generate_self_signed("b.example.com").unwrap();

        manager.set_delegate(Arc::new(
            StoreTrustValidator::new(chain_a.clone(), None).unwrap(),
        ));
        manager.validate_chain(&chain_a).unwrap();
        assert!(manager.validate_chain(&chain_b).is_err());

        manager.set_delegate(Arc::new(
            StoreTrustValidator::new(chain_b.clone(), None).unwrap(),
        ));
        manager.validate_chain(&chain_b).unwrap();
    }

    #[test]
    fn clear_delegate_returns_to_unset_state() {
        let manager = DelegatingTrustManager::new();
        let (chain, _) = generate_self_signed("a.example.com").unwrap();
        manager.set_delegate(Arc::new(StoreTrustValidator::new(chain, None).unwrap()));
        assert!(manager.current().is_ok());
        manager.clear_delegate();
        assert!(manager.current().is_err());
    }
}
