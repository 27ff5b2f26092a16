//! Revocation policy composition.
//!
//! Wraps a base [`TrustValidator`] with CRL and/or online-responder
//! checking.  Precedence is computed from which sources are present:
//!
//! | CRL | responder | prefer-crls        | allow-fallback |
//! |-----|-----------|--------------------|----------------|
//! | yes | no        | true               | false          |
//! | no  | yes       | false              | false          |
//! | yes | yes       | configured (false) | true           |
//!
//! `soft-fail` downgrades an inconclusive check (unreadable CRL,
//! unreachable responder) to "not revoked"; a positive revocation answer
//! is never downgraded.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use rustls_pki_types::{CertificateDer, CertificateRevocationListDer};
use tracing::{debug, trace, warn};
use url::Url;
use x509_parser::prelude::{CertificateRevocationList, FromDer, X509Certificate};

use crate::config::{CrlConfig, TrustManagerConfig};
use crate::trust::TrustValidator;
use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// CRL sources
// ─────────────────────────────────────────────────────────────────────────────

/// One CRL file location, resolved lazily at build/reload time.
#[derive(Debug, Clone)]
pub struct CrlSource {
    path: PathBuf,
    relative_to: Option<PathBuf>,
}

impl CrlSource {
    /// Create a source from its configuration block.
    #[must_use]
    pub fn from_config(config: &CrlConfig) -> Self {
        Self {
            path: config.path.clone(),
            relative_to: config.relative_to.clone(),
        }
    }

    /// The effective file location.
    #[must_use]
    pub fn resolved_path(&self) -> PathBuf {
        match &self.relative_to {
            Some(base) => base.join(&self.path),
            None => self.path.clone(),
        }
    }

    /// Open and parse the CRL file.
    pub fn load(&self) -> Result<Vec<CertificateRevocationListDer<'static>>> {
        let path = self.resolved_path();
        let pem = fs::read(&path)
            .map_err(|e| Error::revocation(format!("unable to access CRL '{}': {e}", path.display())))?;
        let crls: Vec<CertificateRevocationListDer<'static>> =
            rustls_pemfile::crls(&mut pem.as_slice())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| {
                    Error::revocation(format!("unable to parse CRL '{}': {e}", path.display()))
                })?;
        if crls.is_empty() {
            return Err(Error::revocation(format!(
                "no CRL entries found in '{}'",
                path.display()
            )));
        }
        Ok(crls)
    }
}

/// Parsed revoked-serial registry aggregated over every loaded CRL.
#[derive(Debug, Default, Clone)]
pub struct CrlRegistry {
    serials: Vec<Vec<u8>>,
}

impl CrlRegistry {
    /// Parse the revoked serials out of DER-encoded CRLs.
    pub fn from_ders(ders: &[CertificateRevocationListDer<'static>]) -> Result<Self> {
        let mut serials = Vec::new();
        for der in ders {
            let (_, crl) = CertificateRevocationList::from_der(der.as_ref())
                .map_err(|e| Error::revocation(format!("unparsable CRL: {e}")))?;
            for revoked in crl.iter_revoked_certificates() {
                serials.push(normalize_serial(revoked.raw_serial()));
            }
        }
        Ok(Self { serials })
    }

    /// Registry from raw serial numbers (testing and tooling).
    #[must_use]
    pub fn from_serials(serials: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Self {
            serials: serials.into_iter().map(|s| normalize_serial(&s)).collect(),
        }
    }

    /// `true` when the registry holds no revoked serials.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.serials.is_empty()
    }

    fn contains(&self, serial: &[u8]) -> bool {
        let serial = normalize_serial(serial);
        self.serials.iter().any(|s| *s == serial)
    }
}

// DER integer content may carry a sign-padding zero; strip it so serials
// compare equal regardless of which library produced them.
fn normalize_serial(serial: &[u8]) -> Vec<u8> {
    let start = serial.iter().position(|b| *b != 0).unwrap_or(serial.len());
    serial[start..].to_vec()
}

// ─────────────────────────────────────────────────────────────────────────────
// Online responder
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of a single revocation query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationStatus {
    /// Certificate is not revoked.
    Good,
    /// Certificate is revoked.
    Revoked,
    /// The source could not answer for this certificate.
    Unknown,
}

/// Online revocation responder.
///
/// The network client behind this trait is an external collaborator; the
/// engine only composes its answers with CRL data under the configured
/// precedence and fallback rules.
pub trait OcspResponder: Send + Sync {
    /// Query the revocation status of a certificate.
    ///
    /// An `Err` means the responder was unreachable or answered
    /// malformed data, which is an inconclusive result for policy
    /// purposes.
    fn check(&self, cert: &CertificateDer<'static>) -> Result<RevocationStatus>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Policy
// ─────────────────────────────────────────────────────────────────────────────

/// Computed precedence between CRL and responder checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevocationPolicy {
    /// Consult CRLs before the responder.
    pub prefer_crls: bool,
    /// Fall back to the other source when the first is inconclusive.
    pub allow_fallback: bool,
}

impl RevocationPolicy {
    /// Compute the policy from which sources are present.
    ///
    /// `configured_prefer_crls` is only honoured when both sources are
    /// present; it defaults to `false`.
    #[must_use]
    pub fn compute(has_crls: bool, has_responder: bool, configured_prefer_crls: Option<bool>) -> Self {
        match (has_crls, has_responder) {
            (true, false) => Self {
                prefer_crls: true,
                allow_fallback: false,
            },
            (false, true) => Self {
                prefer_crls: false,
                allow_fallback: false,
            },
            _ => Self {
                prefer_crls: configured_prefer_crls.unwrap_or(false),
                allow_fallback: true,
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Builds revocation-checking validators from configuration.
///
/// The builder is retained by the reloadable handle so `reload` can
/// rebuild the CRL registry from the same sources.
pub struct RevocationPolicyBuilder {
    crl_sources: Vec<CrlSource>,
    responder: Option<Arc<dyn OcspResponder>>,
    responder_uri: Option<Url>,
    responder_certificate: Option<CertificateDer<'static>>,
    policy: RevocationPolicy,
    soft_fail: bool,
    only_leaf_cert: bool,
}

impl std::fmt::Debug for RevocationPolicyBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevocationPolicyBuilder")
            .field("crl_sources", &self.crl_sources)
            .field("responder", &self.responder.is_some())
            .field("responder_uri", &self.responder_uri)
            .field("policy", &self.policy)
            .field("soft_fail", &self.soft_fail)
            .field("only_leaf_cert", &self.only_leaf_cert)
            .finish()
    }
}

impl RevocationPolicyBuilder {
    /// Derive a builder from a validated trust-manager configuration.
    pub fn from_config(config: &TrustManagerConfig) -> Result<Self> {
        config.validate()?;
        if !config.has_revocation() {
            return Err(Error::config(
                "trust manager declares no revocation source",
            ));
        }

        let mut crl_sources = Vec::new();
        if let Some(crl) = &config.certificate_revocation_list {
            crl_sources.push(CrlSource::from_config(crl));
        } else if let Some(crls) = &config.certificate_revocation_lists {
            crl_sources.extend(crls.iter().map(CrlSource::from_config));
        }

        let (responder_uri, configured_prefer) = match &config.ocsp {
            Some(ocsp) => (ocsp.responder_uri()?, ocsp.prefer_crls),
            None => (None, None),
        };

        let policy = RevocationPolicy::compute(
            config.has_crls(),
            config.ocsp.is_some(),
            configured_prefer,
        );

        Ok(Self {
            crl_sources,
            responder: None,
            responder_uri,
            responder_certificate: None,
            policy,
            soft_fail: config.soft_fail,
            only_leaf_cert: config.only_leaf_cert,
        })
    }

    /// Attach the online responder client.
    #[must_use]
    pub fn responder(mut self, responder: Arc<dyn OcspResponder>) -> Self {
        self.responder = Some(responder);
        self
    }

    /// Attach the responder's signing certificate, resolved by alias from
    /// the responder keystore (or the trust store) by the caller.
    #[must_use]
    pub fn responder_certificate(mut self, cert: CertificateDer<'static>) -> Self {
        self.responder_certificate = Some(cert);
        self
    }

    /// The computed precedence policy.
    #[must_use]
    pub fn policy(&self) -> RevocationPolicy {
        self.policy
    }

    /// The configured responder URI, when present.
    #[must_use]
    pub fn responder_uri(&self) -> Option<&Url> {
        self.responder_uri.as_ref()
    }

    /// The CRL sources that will be opened at build time.
    #[must_use]
    pub fn crl_sources(&self) -> &[CrlSource] {
        &self.crl_sources
    }

    /// Open every CRL source and build a validator over `base`.
    ///
    /// Each unreadable source fails individually: under `soft-fail` it is
    /// logged and skipped, otherwise the build aborts with the
    /// [`Error::RevocationCheck`] of the failing stream.
    pub fn build(&self, base: Arc<dyn TrustValidator>) -> Result<RevocationValidator> {
        let mut ders = Vec::new();
        for source in &self.crl_sources {
            match source.load() {
                Ok(loaded) => ders.extend(loaded),
                Err(e) if self.soft_fail => {
                    warn!(
                        path = %source.resolved_path().display(),
                        error = %e,
                        "skipping unreadable CRL (soft-fail)"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        let crls = CrlRegistry::from_ders(&ders)?;

        debug!(
            crl_sources = self.crl_sources.len(),
            prefer_crls = self.policy.prefer_crls,
            allow_fallback = self.policy.allow_fallback,
            soft_fail = self.soft_fail,
            only_leaf_cert = self.only_leaf_cert,
            responder = self.responder_uri.as_ref().map(Url::as_str).unwrap_or("<none>"),
            "revocation validator built"
        );

        Ok(RevocationValidator {
            base,
            crls,
            responder: self.responder.clone(),
            responder_certificate: self.responder_certificate.clone(),
            policy: self.policy,
            soft_fail: self.soft_fail,
            only_leaf_cert: self.only_leaf_cert,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Validator
// ─────────────────────────────────────────────────────────────────────────────

/// Validator wrapping a base validator with revocation checking.
pub struct RevocationValidator {
    base: Arc<dyn TrustValidator>,
    crls: CrlRegistry,
    responder: Option<Arc<dyn OcspResponder>>,
    responder_certificate: Option<CertificateDer<'static>>,
    policy: RevocationPolicy,
    soft_fail: bool,
    only_leaf_cert: bool,
}

impl std::fmt::Debug for RevocationValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevocationValidator")
            .field("responder", &self.responder.is_some())
            .field("policy", &self.policy)
            .field("soft_fail", &self.soft_fail)
            .field("only_leaf_cert", &self.only_leaf_cert)
            .finish()
    }
}

impl RevocationValidator {
    /// Compose a validator directly from its parts.
    #[must_use]
    pub fn new(
        base: Arc<dyn TrustValidator>,
        crls: CrlRegistry,
        responder: Option<Arc<dyn OcspResponder>>,
        policy: RevocationPolicy,
        soft_fail: bool,
        only_leaf_cert: bool,
    ) -> Self {
        Self {
            base,
            crls,
            responder,
            responder_certificate: None,
            policy,
            soft_fail,
            only_leaf_cert,
        }
    }

    /// The responder signing certificate the validator was built with.
    ///
    /// The transport behind [`OcspResponder`] reads this to verify the
    /// responder's signature on its answers.
    #[must_use]
    pub fn responder_certificate(&self) -> Option<&CertificateDer<'static>> {
        self.responder_certificate.as_ref()
    }

    fn check_crls(&self, cert: &CertificateDer<'static>) -> Result<RevocationStatus> {
        let (_, parsed) = X509Certificate::from_der(cert.as_ref())
            .map_err(|e| Error::Validation(format!("unparsable certificate: {e}")))?;
        if self.crls.contains(parsed.raw_serial()) {
            Ok(RevocationStatus::Revoked)
        } else {
            Ok(RevocationStatus::Good)
        }
    }

    fn check_responder(&self, cert: &CertificateDer<'static>) -> Result<RevocationStatus> {
        match &self.responder {
            Some(responder) => responder.check(cert),
            None => Ok(RevocationStatus::Unknown),
        }
    }

    /// Run primary then (when allowed) secondary source for one cert.
    fn check_one(&self, cert: &CertificateDer<'static>) -> Result<()> {
        let primary = if self.policy.prefer_crls {
            self.check_crls(cert)
        } else {
            self.check_responder(cert)
        };

        let outcome = match primary {
            Ok(RevocationStatus::Revoked) => {
                return Err(Error::revocation("certificate is revoked"));
            }
            Ok(RevocationStatus::Good) => return Ok(()),
            inconclusive @ (Ok(RevocationStatus::Unknown) | Err(_)) => {
                if self.policy.allow_fallback {
                    trace!("primary revocation source inconclusive, falling back");
                    let secondary = if self.policy.prefer_crls {
                        self.check_responder(cert)
                    } else {
                        self.check_crls(cert)
                    };
                    match secondary {
                        Ok(RevocationStatus::Revoked) => {
                            return Err(Error::revocation("certificate is revoked"));
                        }
                        Ok(RevocationStatus::Good) => return Ok(()),
                        other => other,
                    }
                } else {
                    inconclusive
                }
            }
        };

        // Inconclusive after every permitted source.
        match outcome {
            Err(e) if self.soft_fail => {
                warn!(error = %e, "revocation check inconclusive, continuing (soft-fail)");
                Ok(())
            }
            Err(e) => Err(e),
            Ok(_) if self.soft_fail => {
                warn!("revocation status unknown, continuing (soft-fail)");
                Ok(())
            }
            Ok(_) => Err(Error::revocation(
                "revocation status could not be determined",
            )),
        }
    }
}

impl TrustValidator for RevocationValidator {
    fn validate_chain(&self, chain: &[CertificateDer<'static>]) -> Result<()> {
        self.base.validate_chain(chain)?;
        let targets = if self.only_leaf_cert && !chain.is_empty() {
            &chain[..1]
        } else {
            chain
        };
        for cert in targets {
            self.check_one(cert)?;
        }
        Ok(())
    }

    fn accepted_issuers(&self) -> Vec<CertificateDer<'static>> {
        self.base.accepted_issuers()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CrlConfig, OcspConfig};
    use crate::keystore::generate_self_signed;
    use crate::trust::StoreTrustValidator;
    use std::path::PathBuf;

    struct FixedResponder(RevocationStatus);

    impl OcspResponder for FixedResponder {
        fn check(&self, _cert: &CertificateDer<'static>) -> Result<RevocationStatus> {
            Ok(self.0)
        }
    }

    struct UnreachableResponder;

    impl OcspResponder for UnreachableResponder {
        fn check(&self, _cert: &CertificateDer<'static>) -> Result<RevocationStatus> {
            Err(Error::revocation("responder unreachable"))
        }
    }

    fn self_trusting_chain() -> (Arc<dyn TrustValidator>, Vec<CertificateDer<'static>>) {
        let (chain, _) = generate_self_signed("peer.example.com").unwrap();
        let base = StoreTrustValidator::new(chain.clone(), None).unwrap();
        (Arc::new(base), chain)
    }

    fn serial_of(cert: &CertificateDer<'static>) -> Vec<u8> {
        let (_, parsed) = X509Certificate::from_der(cert.as_ref()).unwrap();
        parsed.raw_serial().to_vec()
    }

    // ─── policy table ─────────────────────────────────────────────────────────

    #[test]
    fn crl_only_prefers_crls_without_fallback() {
        let policy = RevocationPolicy::compute(true, false, None);
        assert_eq!(
            policy,
            RevocationPolicy {
                prefer_crls: true,
                allow_fallback: false
            }
        );
    }

    #[test]
    fn responder_only_prefers_responder_without_fallback() {
        let policy = RevocationPolicy::compute(false, true, None);
        assert_eq!(
            policy,
            RevocationPolicy {
                prefer_crls: false,
                allow_fallback: false
            }
        );
    }

    #[test]
    fn both_sources_honour_configured_preference_with_fallback() {
        let policy = RevocationPolicy::compute(true, true, Some(true));
        assert_eq!(
            policy,
            RevocationPolicy {
                prefer_crls: true,
                allow_fallback: true
            }
        );
        // default preference is false
        let policy = RevocationPolicy::compute(true, true, None);
        assert!(!policy.prefer_crls);
        assert!(policy.allow_fallback);
    }

    #[test]
    fn builder_computes_policy_from_config_shapes() {
        let crl_only = TrustManagerConfig {
            certificate_revocation_list: Some(CrlConfig {
                path: PathBuf::from("a.crl"),
                ..CrlConfig::default()
            }),
            ..TrustManagerConfig::default()
        };
        let builder = RevocationPolicyBuilder::from_config(&crl_only).unwrap();
        assert!(builder.policy().prefer_crls);
        assert!(!builder.policy().allow_fallback);

        let ocsp_only = TrustManagerConfig {
            ocsp: Some(OcspConfig {
                responder: Some("http://ocsp.example.com".to_string()),
                ..OcspConfig::default()
            }),
            ..TrustManagerConfig::default()
        };
        let builder = RevocationPolicyBuilder::from_config(&ocsp_only).unwrap();
        assert!(!builder.policy().prefer_crls);
        assert!(!builder.policy().allow_fallback);
        assert!(builder.responder_uri().is_some());
    }

    #[test]
    fn builder_rejects_config_without_revocation() {
        let err = RevocationPolicyBuilder::from_config(&TrustManagerConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    // ─── revocation decisions ─────────────────────────────────────────────────

    #[test]
    fn revoked_serial_in_crl_fails_validation() {
        let (base, chain) = self_trusting_chain();
        let crls = CrlRegistry::from_serials([serial_of(&chain[0])]);
        let validator = RevocationValidator::new(
            base,
            crls,
            None,
            RevocationPolicy::compute(true, false, None),
            false,
            false,
        );
        assert!(matches!(
            validator.validate_chain(&chain).unwrap_err(),
            Error::RevocationCheck(_)
        ));
    }

    #[test]
    fn unlisted_serial_passes_crl_check() {
        let (base, chain) = self_trusting_chain();
        let crls = CrlRegistry::from_serials([vec![0x01, 0x02]]);
        let validator = RevocationValidator::new(
            base,
            crls,
            None,
            RevocationPolicy::compute(true, false, None),
            false,
            false,
        );
        validator.validate_chain(&chain).unwrap();
    }

    #[test]
    fn unreachable_responder_hard_fails_without_soft_fail() {
        let (base, chain) = self_trusting_chain();
        let validator = RevocationValidator::new(
            base,
            CrlRegistry::default(),
            Some(Arc::new(UnreachableResponder)),
            RevocationPolicy::compute(false, true, None),
            false,
            false,
        );
        assert!(matches!(
            validator.validate_chain(&chain).unwrap_err(),
            Error::RevocationCheck(_)
        ));
    }

    #[test]
    fn unreachable_responder_passes_under_soft_fail() {
        let (base, chain) = self_trusting_chain();
        let validator = RevocationValidator::new(
            base,
            CrlRegistry::default(),
            Some(Arc::new(UnreachableResponder)),
            RevocationPolicy::compute(false, true, None),
            true,
            false,
        );
        validator.validate_chain(&chain).unwrap();
    }

    #[test]
    fn revoked_answer_is_never_soft_failed() {
        let (base, chain) = self_trusting_chain();
        let validator = RevocationValidator::new(
            base,
            CrlRegistry::default(),
            Some(Arc::new(FixedResponder(RevocationStatus::Revoked))),
            RevocationPolicy::compute(false, true, None),
            true,
            false,
        );
        assert!(validator.validate_chain(&chain).is_err());
    }

    #[test]
    fn fallback_consults_crls_when_responder_inconclusive() {
        // GIVEN: both sources, responder preferred but unreachable
        let (base, chain) = self_trusting_chain();
        let crls = CrlRegistry::from_serials([serial_of(&chain[0])]);
        let validator = RevocationValidator::new(
            base,
            crls,
            Some(Arc::new(UnreachableResponder)),
            RevocationPolicy::compute(true, true, None),
            false,
            false,
        );
        // THEN: the fallback CRL lookup still finds the revocation
        assert!(matches!(
            validator.validate_chain(&chain).unwrap_err(),
            Error::RevocationCheck(_)
        ));
    }

    #[test]
    fn only_leaf_cert_skips_rest_of_chain() {
        // GIVEN: a two-cert chain where only the second cert is revoked
        let (leaf_chain, _) = generate_self_signed("leaf.example.com").unwrap();
        let (issuer_chain, _) = generate_self_signed("issuer.example.com").unwrap();
        let chain = vec![leaf_chain[0].clone(), issuer_chain[0].clone()];
        let base = Arc::new(StoreTrustValidator::new(chain.clone(), None).unwrap());
        let crls = CrlRegistry::from_serials([serial_of(&issuer_chain[0])]);

        let leaf_only = RevocationValidator::new(
            Arc::clone(&base) as Arc<dyn TrustValidator>,
            crls.clone(),
            None,
            RevocationPolicy::compute(true, false, None),
            false,
            true,
        );
        leaf_only.validate_chain(&chain).unwrap();

        let full_chain = RevocationValidator::new(
            base,
            crls,
            None,
            RevocationPolicy::compute(true, false, None),
            false,
            false,
        );
        assert!(full_chain.validate_chain(&chain).is_err());
    }

    #[test]
    fn missing_crl_file_aborts_build_unless_soft_fail() {
        let config = TrustManagerConfig {
            certificate_revocation_list: Some(CrlConfig {
                path: PathBuf::from("/nonexistent/missing.crl"),
                ..CrlConfig::default()
            }),
            ..TrustManagerConfig::default()
        };
        let (base, _) = self_trusting_chain();
        let builder = RevocationPolicyBuilder::from_config(&config).unwrap();
        assert!(matches!(
            builder.build(Arc::clone(&base)).unwrap_err(),
            Error::RevocationCheck(_)
        ));

        let soft = TrustManagerConfig {
            soft_fail: true,
            ..config
        };
        let builder = RevocationPolicyBuilder::from_config(&soft).unwrap();
        builder.build(base).unwrap();
    }

    #[test]
    fn responder_certificate_is_carried_into_the_validator() {
        let config = TrustManagerConfig {
            ocsp: Some(OcspConfig {
                responder: Some("http://ocsp.example.com".to_string()),
                responder_certificate: Some("responder".to_string()),
                ..OcspConfig::default()
            }),
            ..TrustManagerConfig::default()
        };
        let (signer_chain, _) = generate_self_signed("ocsp.example.com").unwrap();
        let builder = RevocationPolicyBuilder::from_config(&config)
            .unwrap()
            .responder(Arc::new(FixedResponder(RevocationStatus::Good)))
            .responder_certificate(signer_chain[0].clone());

        let (base, _) = self_trusting_chain();
        let validator = builder.build(base).unwrap();
        assert_eq!(
            validator.responder_certificate(),
            Some(&signer_chain[0])
        );
    }

    #[test]
    fn serial_normalization_ignores_sign_padding() {
        let registry = CrlRegistry::from_serials([vec![0x00, 0x8f, 0x01]]);
        assert!(registry.contains(&[0x8f, 0x01]));
        assert!(registry.contains(&[0x00, 0x8f, 0x01]));
        assert!(!registry.contains(&[0x8f, 0x02]));
    }
}
