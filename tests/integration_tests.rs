//! End-to-end provisioning tests
//!
//! Wires configuration through services into context descriptors:
//! - trust manager lifecycle with online-responder composition
//! - soft-fail behaviour with an unreachable responder
//! - SNI routing from configuration to resolved context names
//! - server context assembly and the active-session-count attribute

use std::sync::Arc;

use pretty_assertions::assert_eq;
use rustls_pki_types::CertificateDer;

use tls_provision::config::CredentialReference;
use tls_provision::config::{
    KeyManagerConfig, OcspConfig, Protocol, ServerContextConfig, SniContextConfig,
    TrustManagerConfig, UNBOUNDED,
};
use tls_provision::context::ContextDescriptor;
use tls_provision::keystore::{generate_self_signed, KeyStore};
use tls_provision::provider::ProviderSet;
use tls_provision::revocation::{OcspResponder, RevocationStatus};
use tls_provision::service::{KeyManagerService, TrustManagerService};
use tls_provision::sni::HostContextRouter;
use tls_provision::trust::TrustValidator;
use tls_provision::{Error, Result};

struct UnreachableResponder;

impl OcspResponder for UnreachableResponder {
    fn check(&self, _cert: &CertificateDer<'static>) -> Result<RevocationStatus> {
        Err(Error::revocation("responder unreachable"))
    }
}

struct AlwaysGoodResponder;

impl OcspResponder for AlwaysGoodResponder {
    fn check(&self, _cert: &CertificateDer<'static>) -> Result<RevocationStatus> {
        Ok(RevocationStatus::Good)
    }
}

fn trust_store() -> (tempfile::TempDir, Vec<CertificateDer<'static>>) {
    let dir = tempfile::tempdir().unwrap();
    let (chain, key) = generate_self_signed("anchor.example.com").unwrap();
    let mut store = KeyStore::open_dir(dir.path()).unwrap();
    store.insert("anchor", chain.clone(), Some(key));
    store.persist("anchor").unwrap();
    (dir, chain)
}

fn responder_config(dir: &std::path::Path, soft_fail: bool) -> TrustManagerConfig {
    TrustManagerConfig {
        key_store: dir.to_path_buf(),
        ocsp: Some(OcspConfig {
            responder: Some("http://ocsp.example.com:8080".to_string()),
            prefer_crls: None,
            responder_certificate: None,
            responder_keystore: None,
        }),
        soft_fail,
        ..TrustManagerConfig::default()
    }
}

/// An unreachable responder fails validation under hard-fail and is
/// tolerated under soft-fail.
#[test]
fn test_soft_fail_controls_unreachable_responder_outcome() {
    let (dir, chain) = trust_store();

    let hard = TrustManagerService::new(
        "hard",
        responder_config(dir.path(), false),
        ProviderSet::platform_default(),
    )
    .unwrap()
    .with_responder(Arc::new(UnreachableResponder));
    hard.start().unwrap();
    assert!(matches!(
        hard.manager().validate_chain(&chain).unwrap_err(),
        Error::RevocationCheck(_)
    ));

    let soft = TrustManagerService::new(
        "soft",
        responder_config(dir.path(), true),
        ProviderSet::platform_default(),
    )
    .unwrap()
    .with_responder(Arc::new(UnreachableResponder));
    soft.start().unwrap();
    soft.manager().validate_chain(&chain).unwrap();
}

/// A reachable responder answering Good lets validation pass without
/// soft-fail.
#[test]
fn test_responder_good_answer_passes_validation() {
    let (dir, chain) = trust_store();
    let service = TrustManagerService::new(
        "trust",
        responder_config(dir.path(), false),
        ProviderSet::platform_default(),
    )
    .unwrap()
    .with_responder(Arc::new(AlwaysGoodResponder));
    service.start().unwrap();
    service.manager().validate_chain(&chain).unwrap();
}

/// Full path from SNI configuration to resolved context names.
#[test]
fn test_sni_routing_from_configuration() {
    let config = SniContextConfig {
        default_ssl_context: "ctxD".to_string(),
        host_context_map: vec![
            ("a\\.example\\.com".to_string(), "ctxA".to_string()),
            ("b\\.example\\.com".to_string(), "ctxB".to_string()),
        ],
    };
    let router = HostContextRouter::from_config(&config).unwrap();

    assert_eq!(router.route(Some("a.example.com")), "ctxA");
    assert_eq!(router.route(Some("b.example.com")), "ctxB");
    assert_eq!(router.route(Some("c.example.com")), "ctxD");
    assert_eq!(router.route(None), "ctxD");
}

/// Server context assembly over running services, including the
/// active-session-count runtime attribute.
#[test]
fn test_server_context_assembly_and_session_count() {
    let (trust_dir, chain) = trust_store();

    let key_dir = tempfile::tempdir().unwrap();
    let key_config = KeyManagerConfig {
        key_store: key_dir.path().to_path_buf(),
        credential_reference: CredentialReference {
            clear_text: Some("secret".to_string()),
            store: None,
        },
        generate_self_signed_certificate_host: Some("node1.example.com".to_string()),
        ..KeyManagerConfig::default()
    };
    let key_service =
        KeyManagerService::new("key", key_config, ProviderSet::platform_default()).unwrap();
    key_service.start().unwrap();

    let trust_config = TrustManagerConfig {
        key_store: trust_dir.path().to_path_buf(),
        ..TrustManagerConfig::default()
    };
    let trust_service =
        TrustManagerService::new("trust", trust_config, ProviderSet::platform_default()).unwrap();
    trust_service.start().unwrap();

    let config = ServerContextConfig {
        protocols: vec![Protocol::TlsV1_2, Protocol::TlsV1_3],
        want_client_auth: true,
        maximum_session_cache_size: UNBOUNDED,
        session_timeout: UNBOUNDED,
        ..ServerContextConfig::default()
    };
    let descriptor = ContextDescriptor::server(
        &config,
        key_service.manager(),
        Some(trust_service.manager()),
        &ProviderSet::platform_default(),
    )
    .unwrap();

    // Trust material flows through the descriptor
    descriptor
        .trust_validator()
        .unwrap()
        .validate_chain(&chain)
        .unwrap();

    // Session identifiers are counted until removed
    let cache = descriptor.session_cache();
    assert_eq!(cache.active_session_count(), 0);
    cache.insert(b"id-1".to_vec());
    cache.insert(b"id-2".to_vec());
    assert_eq!(cache.active_session_count(), 2);
    cache.clear();
    assert_eq!(cache.active_session_count(), 0);

    // Stopping the trust service takes the delegate away
    trust_service.stop();
    assert!(descriptor
        .trust_validator()
        .unwrap()
        .validate_chain(&chain)
        .is_err());
}
