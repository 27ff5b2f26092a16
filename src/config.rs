//! Declarative configuration surface.
//!
//! All types deserialise from YAML and are immutable after resolution.
//! Validation is explicit: each top-level block has a `validate()` method
//! returning [`Error::Configuration`] for invalid or conflicting
//! declarations, invoked before any service is built from the block.
//!
//! # Example YAML
//!
//! ```yaml
//! trust-manager:
//!   algorithm: PKIX
//!   key-store: "/etc/pki/trust"
//!   certificate-revocation-list:
//!     path: "ca.crl"
//!     relative-to: "/var/run/crl"
//!   soft-fail: false
//!   only-leaf-cert: false
//!   maximum-cert-path: 5
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Protocols
// ─────────────────────────────────────────────────────────────────────────────

/// The fixed set of protocol names a context may enable.
///
/// The engine stores the selection; enforcing it is the handshake
/// implementation's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Protocol {
    /// SSL version 2
    #[serde(rename = "SSLv2")]
    SslV2,
    /// SSLv2-compatible hello
    #[serde(rename = "SSLv2Hello")]
    SslV2Hello,
    /// SSL version 3
    #[serde(rename = "SSLv3")]
    SslV3,
    /// TLS version 1.0
    #[serde(rename = "TLSv1")]
    TlsV1,
    /// TLS version 1.1
    #[serde(rename = "TLSv1.1")]
    TlsV1_1,
    /// TLS version 1.2
    #[serde(rename = "TLSv1.2")]
    TlsV1_2,
    /// TLS version 1.3
    #[serde(rename = "TLSv1.3")]
    TlsV1_3,
}

impl Protocol {
    /// Canonical name as it appears in configuration.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::SslV2 => "SSLv2",
            Self::SslV2Hello => "SSLv2Hello",
            Self::SslV3 => "SSLv3",
            Self::TlsV1 => "TLSv1",
            Self::TlsV1_1 => "TLSv1.1",
            Self::TlsV1_2 => "TLSv1.2",
            Self::TlsV1_3 => "TLSv1.3",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Revocation configuration
// ─────────────────────────────────────────────────────────────────────────────

/// One certificate revocation list file.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct CrlConfig {
    /// Path to the PEM-encoded CRL file.
    pub path: PathBuf,

    /// Base directory the path is resolved against when relative.
    ///
    /// Resolution of the base itself is the caller's responsibility; the
    /// engine only joins the two.
    pub relative_to: Option<PathBuf>,

    /// Deprecated nest of the certificate-path limit.
    ///
    /// Retained for legacy configurations only; conflicts with the
    /// primary `maximum-cert-path` on the trust manager.
    pub maximum_cert_path: Option<u32>,
}

/// Online responder (OCSP) configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct OcspConfig {
    /// Responder URI, e.g. `http://ocsp.example.com:8080`.
    pub responder: Option<String>,

    /// Prefer CRL lookup over the responder when both are configured.
    pub prefer_crls: Option<bool>,

    /// Alias of the responder's signing certificate.
    pub responder_certificate: Option<String>,

    /// Keystore holding the responder certificate.
    ///
    /// Requires `responder-certificate`; when absent the trust manager's
    /// own keystore is searched.
    pub responder_keystore: Option<PathBuf>,
}

impl OcspConfig {
    /// Parse and validate the responder URI.
    pub fn responder_uri(&self) -> Result<Option<Url>> {
        match &self.responder {
            None => Ok(None),
            Some(raw) => Url::parse(raw)
                .map(Some)
                .map_err(|e| Error::config(format!("Unparsable responder URI '{raw}': {e}"))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Credential reference
// ─────────────────────────────────────────────────────────────────────────────

/// Reference to the credential protecting a keystore.
///
/// Only the clear-text form is resolvable by the engine itself; a store
/// reference must have been resolved by the external credential
/// collaborator beforehand, so encountering one unresolved is a
/// [`Error::CredentialResolution`].
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct CredentialReference {
    /// Clear-text credential value.
    pub clear_text: Option<String>,

    /// Name of an external credential store entry.
    pub store: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Trust manager
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration of one trust manager.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "kebab-case")]
pub struct TrustManagerConfig {
    /// Validator-factory algorithm; platform default when absent.
    pub algorithm: Option<String>,

    /// Restrict provider resolution to the provider with this name.
    pub provider_name: Option<String>,

    /// Directory holding the trusted certificates (`<alias>.crt` files).
    pub key_store: PathBuf,

    /// Alias filter expression limiting which store entries are visible.
    pub alias_filter: Option<String>,

    /// Single CRL file. Mutually exclusive with `certificate-revocation-lists`.
    pub certificate_revocation_list: Option<CrlConfig>,

    /// Ordered CRL list. Mutually exclusive with `certificate-revocation-list`.
    pub certificate_revocation_lists: Option<Vec<CrlConfig>>,

    /// Online responder configuration.
    pub ocsp: Option<OcspConfig>,

    /// Treat an inconclusive revocation check as "not revoked".
    pub soft_fail: bool,

    /// Check revocation only for the end-entity certificate.
    pub only_leaf_cert: bool,

    /// Maximum accepted certificate-path depth.
    pub maximum_cert_path: Option<u32>,
}

impl TrustManagerConfig {
    /// `true` when any revocation source is declared.
    #[must_use]
    pub fn has_revocation(&self) -> bool {
        self.certificate_revocation_list.is_some()
            || self.certificate_revocation_lists.is_some()
            || self.ocsp.is_some()
    }

    /// `true` when at least one CRL file is declared.
    #[must_use]
    pub fn has_crls(&self) -> bool {
        self.certificate_revocation_list.is_some() || self.certificate_revocation_lists.is_some()
    }

    /// Effective certificate-path limit, honouring the legacy nested form.
    ///
    /// The legacy `maximum-cert-path` inside `certificate-revocation-list`
    /// wins when only it is set (with a deprecation warning at validation
    /// time); both set is rejected by [`Self::validate`].
    #[must_use]
    pub fn effective_max_cert_path(&self) -> Option<u32> {
        let legacy = self
            .certificate_revocation_list
            .as_ref()
            .and_then(|crl| crl.maximum_cert_path);
        legacy.or(self.maximum_cert_path)
    }

    /// Validate the block, rejecting conflicting declarations.
    pub fn validate(&self) -> Result<()> {
        if self.certificate_revocation_list.is_some()
            && self.certificate_revocation_lists.is_some()
        {
            return Err(Error::config(
                "certificate-revocation-list and certificate-revocation-lists \
                 are mutually exclusive",
            ));
        }

        let legacy = self
            .certificate_revocation_list
            .as_ref()
            .and_then(|crl| crl.maximum_cert_path);
        if let Some(legacy) = legacy {
            tracing::warn!(
                maximum_cert_path = legacy,
                "maximum-cert-path in certificate-revocation-list is for legacy \
                 support; prefer the trust-manager attribute"
            );
            if self.maximum_cert_path.is_some() {
                return Err(Error::config(
                    "maximum-cert-path declared both on the trust manager and \
                     inside certificate-revocation-list",
                ));
            }
        }

        if let Some(ocsp) = &self.ocsp {
            ocsp.responder_uri()?;
            if ocsp.responder_keystore.is_some() && ocsp.responder_certificate.is_none() {
                return Err(Error::config(
                    "ocsp responder-keystore requires responder-certificate",
                ));
            }
        }

        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Key manager
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration of one key manager.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "kebab-case")]
pub struct KeyManagerConfig {
    /// Key-manager-factory algorithm; platform default when absent.
    pub algorithm: Option<String>,

    /// Restrict provider resolution to the provider with this name.
    pub provider_name: Option<String>,

    /// Directory holding the key material (`<alias>.crt` / `<alias>.key`).
    pub key_store: PathBuf,

    /// Alias filter expression limiting which store entries are visible.
    pub alias_filter: Option<String>,

    /// Credential protecting the keystore.
    pub credential_reference: CredentialReference,

    /// Hostname to self-sign a certificate for on first use, when the
    /// store holds no key material yet.
    pub generate_self_signed_certificate_host: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Contexts
// ─────────────────────────────────────────────────────────────────────────────

/// Unbounded sentinel for session cache size and timeout.
pub const UNBOUNDED: i64 = -1;

fn default_cipher_suite_filter() -> String {
    "DEFAULT".to_string()
}

fn default_use_cipher_suites_order() -> bool {
    true
}

fn default_unbounded() -> i64 {
    UNBOUNDED
}

/// Configuration of one server-side TLS context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ServerContextConfig {
    /// Legacy cipher-suite filter expression.
    pub cipher_suite_filter: String,

    /// Explicit cipher-suite name list, aggregated with the filter.
    pub cipher_suite_names: Option<String>,

    /// Enabled protocols; empty means handshake-implementation default.
    pub protocols: Vec<Protocol>,

    /// Request (but do not require) a client certificate.
    pub want_client_auth: bool,

    /// Require a client certificate.
    pub need_client_auth: bool,

    /// Accept handshakes whose client authentication failed.
    pub authentication_optional: bool,

    /// Honour the server's cipher-suite order over the client's.
    pub use_cipher_suites_order: bool,

    /// Session cache capacity; −1 = unbounded.
    pub maximum_session_cache_size: i64,

    /// Session lifetime in seconds; −1 = unbounded.
    pub session_timeout: i64,

    /// Wrap the engine handed to the handshake implementation.
    pub wrap: bool,

    /// Named key manager supplying local credentials.
    pub key_manager: Option<String>,

    /// Named trust manager validating peer chains.
    pub trust_manager: Option<String>,

    /// Named security domain for post-handshake authorization.
    pub security_domain: Option<String>,

    /// Principal transformer applied before realm selection.
    pub pre_realm_principal_transformer: Option<String>,

    /// Principal transformer applied after realm selection.
    pub post_realm_principal_transformer: Option<String>,

    /// Principal transformer applied last.
    pub final_principal_transformer: Option<String>,

    /// Named realm mapper.
    pub realm_mapper: Option<String>,

    /// Restrict provider resolution to the provider with this name.
    pub provider_name: Option<String>,
}

impl Default for ServerContextConfig {
    fn default() -> Self {
        Self {
            cipher_suite_filter: default_cipher_suite_filter(),
            cipher_suite_names: None,
            protocols: Vec::new(),
            want_client_auth: false,
            need_client_auth: false,
            authentication_optional: false,
            use_cipher_suites_order: default_use_cipher_suites_order(),
            maximum_session_cache_size: default_unbounded(),
            session_timeout: default_unbounded(),
            wrap: false,
            key_manager: None,
            trust_manager: None,
            security_domain: None,
            pre_realm_principal_transformer: None,
            post_realm_principal_transformer: None,
            final_principal_transformer: None,
            realm_mapper: None,
            provider_name: None,
        }
    }
}

/// Configuration of one client-side TLS context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ClientContextConfig {
    /// Legacy cipher-suite filter expression.
    pub cipher_suite_filter: String,

    /// Explicit cipher-suite name list, aggregated with the filter.
    pub cipher_suite_names: Option<String>,

    /// Enabled protocols; empty means handshake-implementation default.
    pub protocols: Vec<Protocol>,

    /// Named key manager supplying local credentials.
    pub key_manager: Option<String>,

    /// Named trust manager validating peer chains.
    pub trust_manager: Option<String>,

    /// Restrict provider resolution to the provider with this name.
    pub provider_name: Option<String>,
}

impl Default for ClientContextConfig {
    fn default() -> Self {
        Self {
            cipher_suite_filter: default_cipher_suite_filter(),
            cipher_suite_names: None,
            protocols: Vec::new(),
            key_manager: None,
            trust_manager: None,
            provider_name: None,
        }
    }
}

/// Configuration of an SNI-routing context.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "kebab-case")]
pub struct SniContextConfig {
    /// Context used when no host pattern matches. Required.
    pub default_ssl_context: String,

    /// Hostname-pattern → context-name routes, declared as a YAML
    /// mapping whose entry order decides match order.
    ///
    /// Patterns are validated against both the hostname grammar and
    /// general regex syntax before any route is installed.
    #[serde(
        deserialize_with = "ordered_host_context_map",
        serialize_with = "host_context_map_as_mapping"
    )]
    pub host_context_map: Vec<(String, String)>,
}

// A plain map container would lose declaration order, which routing
// depends on, so the mapping is read entry by entry into a Vec.
fn ordered_host_context_map<'de, D>(
    deserializer: D,
) -> std::result::Result<Vec<(String, String)>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct MappingVisitor;

    impl<'de> serde::de::Visitor<'de> for MappingVisitor {
        type Value = Vec<(String, String)>;

        fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("a mapping of hostname patterns to context names")
        }

        fn visit_map<A>(self, mut access: A) -> std::result::Result<Self::Value, A::Error>
        where
            A: serde::de::MapAccess<'de>,
        {
            let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
            while let Some(entry) = access.next_entry()? {
                entries.push(entry);
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(MappingVisitor)
}

fn host_context_map_as_mapping<S>(
    entries: &[(String, String)],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_map(entries.iter().map(|(pattern, context)| (pattern, context)))
}

/// Configuration of a dynamic client context that follows an
/// authentication context.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "kebab-case")]
pub struct DynamicClientContextConfig {
    /// Name of the authentication context to follow. Required.
    pub authentication_context: String,
}

impl DynamicClientContextConfig {
    /// Validate the block.
    pub fn validate(&self) -> Result<()> {
        if self.authentication_context.is_empty() {
            return Err(Error::config("authentication-context is required"));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn crl(path: &str) -> CrlConfig {
        CrlConfig {
            path: PathBuf::from(path),
            ..CrlConfig::default()
        }
    }

    #[test]
    fn trust_manager_defaults_are_permissive() {
        let cfg = TrustManagerConfig::default();
        assert!(!cfg.soft_fail);
        assert!(!cfg.only_leaf_cert);
        assert!(cfg.maximum_cert_path.is_none());
        assert!(!cfg.has_revocation());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn single_crl_and_crl_list_are_mutually_exclusive() {
        // GIVEN: both CRL shapes declared
        let cfg = TrustManagerConfig {
            certificate_revocation_list: Some(crl("a.crl")),
            certificate_revocation_lists: Some(vec![crl("b.crl")]),
            ..TrustManagerConfig::default()
        };
        // THEN: validation rejects the block
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn legacy_and_primary_max_cert_path_conflict() {
        let cfg = TrustManagerConfig {
            certificate_revocation_list: Some(CrlConfig {
                path: PathBuf::from("a.crl"),
                maximum_cert_path: Some(3),
                ..CrlConfig::default()
            }),
            maximum_cert_path: Some(5),
            ..TrustManagerConfig::default()
        };
        assert!(matches!(
            cfg.validate().unwrap_err(),
            Error::Configuration(_)
        ));
    }

    #[test]
    fn legacy_max_cert_path_wins_when_primary_absent() {
        let cfg = TrustManagerConfig {
            certificate_revocation_list: Some(CrlConfig {
                path: PathBuf::from("a.crl"),
                maximum_cert_path: Some(3),
                ..CrlConfig::default()
            }),
            ..TrustManagerConfig::default()
        };
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.effective_max_cert_path(), Some(3));
    }

    #[test]
    fn responder_keystore_requires_responder_certificate() {
        let cfg = TrustManagerConfig {
            ocsp: Some(OcspConfig {
                responder: Some("http://ocsp.example.com".to_string()),
                responder_keystore: Some(PathBuf::from("/stores/ocsp")),
                ..OcspConfig::default()
            }),
            ..TrustManagerConfig::default()
        };
        assert!(matches!(
            cfg.validate().unwrap_err(),
            Error::Configuration(_)
        ));
    }

    #[test]
    fn unparsable_responder_uri_is_rejected() {
        let cfg = TrustManagerConfig {
            ocsp: Some(OcspConfig {
                responder: Some("not a uri".to_string()),
                ..OcspConfig::default()
            }),
            ..TrustManagerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn trust_manager_deserialises_from_yaml() {
        let yaml = r"
key-store: /etc/pki/trust
certificate-revocation-list:
  path: ca.crl
  relative-to: /var/run/crl
soft-fail: true
maximum-cert-path: 5
";
        let cfg: TrustManagerConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.soft_fail);
        assert_eq!(cfg.maximum_cert_path, Some(5));
        let crl = cfg.certificate_revocation_list.as_ref().unwrap();
        assert_eq!(crl.path, PathBuf::from("ca.crl"));
        assert_eq!(crl.relative_to.as_deref(), Some(PathBuf::from("/var/run/crl").as_path()));
    }

    #[test]
    fn protocols_deserialise_by_canonical_name() {
        let yaml = "protocols: [TLSv1.2, TLSv1.3]";
        let cfg: ServerContextConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.protocols, vec![Protocol::TlsV1_2, Protocol::TlsV1_3]);
        assert_eq!(Protocol::TlsV1_3.name(), "TLSv1.3");
    }

    #[test]
    fn unknown_protocol_is_rejected() {
        let yaml = "protocols: [TLSv9]";
        assert!(serde_yaml::from_str::<ServerContextConfig>(yaml).is_err());
    }

    #[test]
    fn host_context_map_deserialises_from_a_mapping_in_order() {
        let yaml = r"
default-ssl-context: ctxD
host-context-map:
  a\.example\.com: ctxA
  b\.example\.com: ctxB
  .*\.example\.com: ctxW
";
        let cfg: SniContextConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.default_ssl_context, "ctxD");
        assert_eq!(
            cfg.host_context_map,
            vec![
                ("a\\.example\\.com".to_string(), "ctxA".to_string()),
                ("b\\.example\\.com".to_string(), "ctxB".to_string()),
                (".*\\.example\\.com".to_string(), "ctxW".to_string()),
            ]
        );
    }

    #[test]
    fn host_context_map_round_trips_as_a_mapping() {
        let cfg = SniContextConfig {
            default_ssl_context: "ctxD".to_string(),
            host_context_map: vec![("a\\.example\\.com".to_string(), "ctxA".to_string())],
        };
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let parsed: SniContextConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.host_context_map, cfg.host_context_map);
    }

    #[test]
    fn server_context_defaults_are_conservative() {
        let cfg = ServerContextConfig::default();
        assert_eq!(cfg.cipher_suite_filter, "DEFAULT");
        assert!(cfg.use_cipher_suites_order);
        assert!(!cfg.want_client_auth);
        assert!(!cfg.need_client_auth);
        assert!(!cfg.authentication_optional);
        assert_eq!(cfg.maximum_session_cache_size, UNBOUNDED);
        assert_eq!(cfg.session_timeout, UNBOUNDED);
        assert!(!cfg.wrap);
    }

    #[test]
    fn dynamic_context_requires_authentication_context() {
        let cfg = DynamicClientContextConfig::default();
        assert!(cfg.validate().is_err());
    }
}
