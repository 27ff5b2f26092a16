//! Hot-reloadable validator handle.
//!
//! [`ReloadableTrustValidator`] wraps a CRL-backed revocation validator in
//! an atomically swappable holder.  `reload()` re-opens the CRL sources and
//! swaps in a freshly built validator; handshake threads read the current
//! delegate through an atomic load and never block, never observe a
//! partially constructed validator, and never participate in the reload
//! protocol.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use rustls_pki_types::CertificateDer;
use tracing::{debug, warn};

use crate::revocation::{RevocationPolicyBuilder, RevocationValidator};
use crate::trust::TrustValidator;
use crate::Result;

/// Atomically swappable holder around a CRL-backed validator.
///
/// State machine: `Idle` ⇄ `Reloading`, tracked by a compare-and-set flag.
/// At most one reload proceeds at a time; a `reload()` issued while one is
/// already in progress is a no-op.
pub struct ReloadableTrustValidator {
    builder: RevocationPolicyBuilder,
    base: Arc<dyn TrustValidator>,
    delegate: ArcSwap<RevocationValidator>,
    reloading: AtomicBool,
    rebuilds: AtomicUsize,
}

impl ReloadableTrustValidator {
    /// Build the initial validator and wrap it in a reloadable handle.
    pub fn new(builder: RevocationPolicyBuilder, base: Arc<dyn TrustValidator>) -> Result<Self> {
        let initial = builder.build(Arc::clone(&base))?;
        Ok(Self {
            builder,
            base,
            delegate: ArcSwap::from_pointee(initial),
            reloading: AtomicBool::new(false),
            rebuilds: AtomicUsize::new(0),
        })
    }

    /// Rebuild the CRL streams and swap in a new validator.
    ///
    /// If a reload is already in progress the call returns `Ok(())`
    /// without doing anything.  On failure the previous validator stays
    /// in effect and only this call observes the error.
    pub fn reload(&self) -> Result<()> {
        if self
            .reloading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("reload already in progress, skipping");
            return Ok(());
        }

        let outcome = self.builder.build(Arc::clone(&self.base));
        let result = match outcome {
            Ok(rebuilt) => {
                self.delegate.store(Arc::new(rebuilt));
                self.rebuilds.fetch_add(1, Ordering::AcqRel);
                debug!("certificate revocation lists reloaded");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "CRL reload failed, previous validator retained");
                Err(e)
            }
        };
        self.reloading.store(false, Ordering::Release);
        result
    }

    /// `true` while a reload is executing (diagnostic only).
    #[must_use]
    pub fn is_reloading(&self) -> bool {
        self.reloading.load(Ordering::Acquire)
    }

    /// Number of reloads that rebuilt and swapped in a validator.
    ///
    /// The initial build does not count; failed and backed-off reload
    /// calls do not count either.
    #[must_use]
    pub fn reload_count(&self) -> usize {
        self.rebuilds.load(Ordering::Acquire)
    }
}

impl TrustValidator for ReloadableTrustValidator {
    fn validate_chain(&self, chain: &[CertificateDer<'static>]) -> Result<()> {
        self.delegate.load().validate_chain(chain)
    }

    fn accepted_issuers(&self) -> Vec<CertificateDer<'static>> {
        self.delegate.load().accepted_issuers()
    }
}
