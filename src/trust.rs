//! Trust material: base certificate validators.
//!
//! [`TrustMaterialBuilder`] resolves an algorithm/provider/keystore triple
//! into a [`StoreTrustValidator`], the base validator every revocation
//! layer wraps.  The validator checks a presented chain against the trust
//! anchors visible in the (possibly alias-filtered) keystore view.

use std::sync::Arc;

use rustls_pki_types::CertificateDer;
use tracing::trace;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::config::TrustManagerConfig;
use crate::keystore::{AliasFilter, KeyStore};
use crate::provider::{ProviderSet, DEFAULT_TRUST_ALGORITHM};
use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Validator capability surface
// ─────────────────────────────────────────────────────────────────────────────

/// Validates a peer's certificate chain.
///
/// Callers always access this interface, never a concrete type, so the
/// delegate behind an indirection layer can be swapped invisibly.
pub trait TrustValidator: Send + Sync {
    /// Validate a chain presented by a peer, leaf first.
    fn validate_chain(&self, chain: &[CertificateDer<'static>]) -> Result<()>;

    /// The trust anchors this validator accepts issuers from.
    fn accepted_issuers(&self) -> Vec<CertificateDer<'static>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Base validator
// ─────────────────────────────────────────────────────────────────────────────

/// Base validator backed by keystore trust anchors.
pub struct StoreTrustValidator {
    anchors: Vec<CertificateDer<'static>>,
    anchor_subjects: Vec<Vec<u8>>,
    max_cert_path: Option<u32>,
}

impl StoreTrustValidator {
    /// Build a validator from trust anchors and an optional path limit.
    pub fn new(anchors: Vec<CertificateDer<'static>>, max_cert_path: Option<u32>) -> Result<Self> {
        let mut anchor_subjects = Vec::with_capacity(anchors.len());
        for anchor in &anchors {
            let (_, cert) = X509Certificate::from_der(anchor.as_ref())
                .map_err(|e| Error::config(format!("Unparsable trust anchor: {e}")))?;
            anchor_subjects.push(cert.subject().as_raw().to_vec());
        }
        Ok(Self {
            anchors,
            anchor_subjects,
            max_cert_path,
        })
    }
}

impl std::fmt::Debug for StoreTrustValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreTrustValidator")
            .field("anchors", &self.anchors.len())
            .field("max_cert_path", &self.max_cert_path)
            .finish()
    }
}

impl TrustValidator for StoreTrustValidator {
    fn validate_chain(&self, chain: &[CertificateDer<'static>]) -> Result<()> {
        if chain.is_empty() {
            return Err(Error::Validation("empty certificate chain".to_string()));
        }
        if let Some(max) = self.max_cert_path {
            if chain.len() > max as usize {
                return Err(Error::Validation(format!(
                    "certificate path length {} exceeds maximum {max}",
                    chain.len()
                )));
            }
        }

        // Trusted when any chain certificate is an anchor itself, or is
        // issued by an anchor (issuer DN matches an anchor subject DN).
        for cert in chain {
            if self.anchors.iter().any(|a| a.as_ref() == cert.as_ref()) {
                return Ok(());
            }
            let (_, parsed) = X509Certificate::from_der(cert.as_ref())
                .map_err(|e| Error::Validation(format!("unparsable certificate: {e}")))?;
            let issuer = parsed.issuer().as_raw();
            if self.anchor_subjects.iter().any(|s| s.as_slice() == issuer) {
                return Ok(());
            }
        }

        Err(Error::Validation(
            "certificate chain does not terminate at a trust anchor".to_string(),
        ))
    }

    fn accepted_issuers(&self) -> Vec<CertificateDer<'static>> {
        self.anchors.clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Resolves an algorithm/provider/keystore triple into a base validator.
pub struct TrustMaterialBuilder<'a> {
    config: &'a TrustManagerConfig,
    store: &'a KeyStore,
    providers: Option<&'a ProviderSet>,
}

impl<'a> TrustMaterialBuilder<'a> {
    /// Start a builder over a configuration and its keystore.
    #[must_use]
    pub fn new(config: &'a TrustManagerConfig, store: &'a KeyStore) -> Self {
        Self {
            config,
            store,
            providers: None,
        }
    }

    /// Supply an ordered provider set; platform default when not called.
    #[must_use]
    pub fn providers(mut self, providers: &'a ProviderSet) -> Self {
        self.providers = Some(providers);
        self
    }

    /// Build the base validator.
    ///
    /// Fails with [`Error::ProviderResolution`] when no provider in the
    /// set can instantiate the configured algorithm, and with
    /// [`Error::Configuration`] for an invalid alias filter.
    pub fn build(&self) -> Result<Arc<StoreTrustValidator>> {
        let algorithm = self
            .config
            .algorithm
            .as_deref()
            .unwrap_or(DEFAULT_TRUST_ALGORITHM);

        let platform_default;
        let providers = match self.providers {
            Some(set) => set,
            None => {
                platform_default = ProviderSet::platform_default();
                &platform_default
            }
        };
        let provider = providers.resolve(
            "trust manager",
            self.config.provider_name.as_deref(),
            algorithm,
        )?;

        let anchors = match self.config.alias_filter.as_deref() {
            Some(expression) => {
                let filter = AliasFilter::parse(expression)?;
                self.store.filtered(&filter).certificates()
            }
            None => self.store.certificates(),
        };

        trace!(
            provider = provider.name(),
            algorithm,
            alias_filter = self.config.alias_filter.as_deref().unwrap_or("<none>"),
            anchors = anchors.len(),
            "TrustValidator supplying"
        );

        Ok(Arc::new(StoreTrustValidator::new(
            anchors,
            self.config.effective_max_cert_path(),
        )?))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
