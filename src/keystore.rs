//! Aliased key/certificate stores.
//!
//! A store is a directory of PEM files: `<alias>.crt` holds a certificate
//! chain, an optional `<alias>.key` the matching private key.  DER is not
//! supported to keep operator tooling simple (openssl, cfssl, cert-manager
//! all default to PEM).
//!
//! Stores are loaded once and owned by the service that declares them; the
//! only post-load mutation is lazy self-signed provisioning, which inserts
//! and persists a single generated entry.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rcgen::{CertificateParams, DistinguishedName, DnType, Ia5String, KeyPair, SanType};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tracing::{debug, info};

use crate::config::CredentialReference;
use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Credential resolution
// ─────────────────────────────────────────────────────────────────────────────

/// Supplier of the credential protecting a keystore.
pub trait CredentialSource: Send + Sync {
    /// Resolve the credential value.
    fn resolve(&self) -> Result<String>;
}

impl CredentialSource for CredentialReference {
    fn resolve(&self) -> Result<String> {
        if let Some(clear) = &self.clear_text {
            return Ok(clear.clone());
        }
        if let Some(store) = &self.store {
            return Err(Error::CredentialResolution(format!(
                "credential store '{store}' was not resolved by the credential collaborator"
            )));
        }
        Err(Error::CredentialResolution(
            "keystore password cannot be resolved".to_string(),
        ))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Alias filter
// ─────────────────────────────────────────────────────────────────────────────

/// Filter expression limiting which aliases of a store are visible.
///
/// Three forms are accepted:
/// - `one,two` — only the listed aliases
/// - `ALL:-one:-two` — everything except the removed aliases
/// - `NONE:+one:+two` — nothing except the added aliases
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasFilter {
    /// Only the listed aliases are visible.
    Include(Vec<String>),
    /// All aliases except the listed ones.
    AllExcept(Vec<String>),
}

impl AliasFilter {
    /// Parse a filter expression.
    pub fn parse(expression: &str) -> Result<Self> {
        if expression.is_empty() {
            return Err(Error::config("empty alias filter expression"));
        }
        let mut parts = expression.split(':');
        let head = parts.next().unwrap_or_default();
        match head {
            "ALL" => {
                let removed = Self::ops(parts, '-')?;
                Ok(Self::AllExcept(removed))
            }
            "NONE" => {
                let added = Self::ops(parts, '+')?;
                Ok(Self::Include(added))
            }
            _ => {
                if expression.contains(':') {
                    return Err(Error::config(format!(
                        "invalid alias filter expression '{expression}'"
                    )));
                }
                Ok(Self::Include(
                    expression.split(',').map(str::to_string).collect(),
                ))
            }
        }
    }

    fn ops<'a>(parts: impl Iterator<Item = &'a str>, op: char) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for part in parts {
            let mut chars = part.chars();
            if chars.next() != Some(op) {
                return Err(Error::config(format!(
                    "invalid alias filter operation '{part}', expected '{op}<alias>'"
                )));
            }
            out.push(chars.as_str().to_string());
        }
        Ok(out)
    }

    /// `true` when `alias` passes the filter.
    #[must_use]
    pub fn matches(&self, alias: &str) -> bool {
        match self {
            Self::Include(aliases) => aliases.iter().any(|a| a == alias),
            Self::AllExcept(aliases) => !aliases.iter().any(|a| a == alias),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Key store
// ─────────────────────────────────────────────────────────────────────────────

/// Shared, lockable handle to a key store whose contents may be mutated
/// after load (lazy self-signed provisioning).
pub type SharedKeyStore = std::sync::Arc<parking_lot::RwLock<KeyStore>>;

/// One aliased entry: a certificate chain and an optional private key.
#[derive(Debug)]
pub struct KeyStoreEntry {
    /// Certificate chain, leaf first.
    pub chain: Vec<CertificateDer<'static>>,
    /// Private key matching the leaf, when present.
    pub key: Option<PrivateKeyDer<'static>>,
}

impl KeyStoreEntry {
    fn duplicate(&self) -> Self {
        Self {
            chain: self.chain.clone(),
            key: self.key.as_ref().map(PrivateKeyDer::clone_key),
        }
    }
}

/// Aliased PEM-backed key/certificate store.
#[derive(Debug, Default)]
pub struct KeyStore {
    entries: BTreeMap<String, KeyStoreEntry>,
    dir: Option<PathBuf>,
}

impl KeyStore {
    /// Create an empty in-memory store (no persistence target).
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load every `<alias>.crt` (plus matching `<alias>.key`) under `dir`.
    ///
    /// A missing directory yields an empty store bound to `dir`, so lazy
    /// provisioning can create it on first use.
    pub fn open_dir(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let mut entries = BTreeMap::new();

        if dir.is_dir() {
            for file in fs::read_dir(&dir)? {
                let path = file?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("crt") {
                    continue;
                }
                let Some(alias) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let chain = load_cert_chain(&path)?;
                let key_path = path.with_extension("key");
                let key = if key_path.is_file() {
                    Some(load_private_key(&key_path)?)
                } else {
                    None
                };
                entries.insert(alias.to_string(), KeyStoreEntry { chain, key });
            }
        }

        debug!(dir = %dir.display(), aliases = entries.len(), "keystore loaded");
        Ok(Self {
            entries,
            dir: Some(dir),
        })
    }

    /// All aliases, in sorted order.
    #[must_use]
    pub fn aliases(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `true` when any entry holds a private key.
    #[must_use]
    pub fn has_key_material(&self) -> bool {
        self.entries.values().any(|e| e.key.is_some())
    }

    /// Look up an entry by alias.
    #[must_use]
    pub fn entry(&self, alias: &str) -> Option<&KeyStoreEntry> {
        self.entries.get(alias)
    }

    /// End-entity certificate of an alias.
    #[must_use]
    pub fn certificate(&self, alias: &str) -> Option<&CertificateDer<'static>> {
        self.entries.get(alias).and_then(|e| e.chain.first())
    }

    /// Owned copy of the private key of an alias, when present.
    #[must_use]
    pub fn private_key(&self, alias: &str) -> Option<PrivateKeyDer<'static>> {
        self.entries
            .get(alias)
            .and_then(|e| e.key.as_ref())
            .map(PrivateKeyDer::clone_key)
    }

    /// Every certificate visible in the store (first of each chain).
    #[must_use]
    pub fn certificates(&self) -> Vec<CertificateDer<'static>> {
        self.entries
            .values()
            .filter_map(|e| e.chain.first().cloned())
            .collect()
    }

    /// Insert (or replace) an entry.
    pub fn insert(
        &mut self,
        alias: impl Into<String>,
        chain: Vec<CertificateDer<'static>>,
        key: Option<PrivateKeyDer<'static>>,
    ) {
        self.entries.insert(alias.into(), KeyStoreEntry { chain, key });
    }

    /// A copy of the store restricted to aliases passing `filter`.
    #[must_use]
    pub fn filtered(&self, filter: &AliasFilter) -> Self {
        let entries = self
            .entries
            .iter()
            .filter(|(alias, _)| filter.matches(alias))
            .map(|(alias, entry)| (alias.clone(), entry.duplicate()))
            .collect();
        Self {
            entries,
            dir: self.dir.clone(),
        }
    }

    /// Persist one alias back to the store directory as PEM files.
    pub fn persist(&self, alias: &str) -> Result<()> {
        let dir = self.dir.as_ref().ok_or_else(|| {
            Error::state("keystore has no backing directory to persist into")
        })?;
        let entry = self
            .entries
            .get(alias)
            .ok_or_else(|| Error::state(format!("unknown alias '{alias}'")))?;

        fs::create_dir_all(dir)?;

        let mut cert_pem = String::new();
        for cert in &entry.chain {
            cert_pem.push_str(&pem_encode("CERTIFICATE", cert.as_ref()));
        }
        fs::write(dir.join(format!("{alias}.crt")), cert_pem)?;

        if let Some(key) = &entry.key {
            fs::write(
                dir.join(format!("{alias}.key")),
                pem_encode("PRIVATE KEY", key.secret_der()),
            )?;
        }

        debug!(alias, dir = %dir.display(), "keystore entry persisted");
        Ok(())
    }

    /// Resolved absolute/backing directory, when the store has one.
    #[must_use]
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PEM loading / writing
// ─────────────────────────────────────────────────────────────────────────────

/// Load all certificates from a PEM file.
pub fn load_cert_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let pem = fs::read(path)?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            Error::config(format!("Failed to parse certs from '{}': {e}", path.display()))
        })?;
    if certs.is_empty() {
        return Err(Error::config(format!(
            "No certificates found in '{}'",
            path.display()
        )));
    }
    Ok(certs)
}

/// Load the first private key from a PEM file (RSA, PKCS#8 or EC).
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let pem = fs::read(path)?;
    rustls_pemfile::private_key(&mut pem.as_slice())
        .map_err(|e| {
            Error::config(format!(
                "Failed to parse private key from '{}': {e}",
                path.display()
            ))
        })?
        .ok_or_else(|| {
            Error::config(format!("No private key found in '{}'", path.display()))
        })
}

fn pem_encode(tag: &str, der: &[u8]) -> String {
    let body = BASE64.encode(der);
    let mut out = format!("-----BEGIN {tag}-----\n");
    for chunk in body.as_bytes().chunks(64) {
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        out.push('\n');
    }
    out.push_str(&format!("-----END {tag}-----\n"));
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Self-signed generation
// ─────────────────────────────────────────────────────────────────────────────

/// Generate a self-signed certificate and key pair for `host`.
///
/// The certificate carries `host` as both Common Name and DNS SAN.  Used by
/// lazy key provisioning when a key manager is configured with
/// `generate-self-signed-certificate-host` and the backing store holds no
/// key material yet.
pub fn generate_self_signed(
    host: &str,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let key_pair = KeyPair::generate()
        .map_err(|e| Error::config(format!("Failed to generate key pair: {e}")))?;

    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, host);
    params.distinguished_name = dn;
    let san = Ia5String::try_from(host)
        .map_err(|e| Error::config(format!("Invalid self-signed host '{host}': {e}")))?;
    params.subject_alt_names = vec![SanType::DnsName(san)];

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| Error::config(format!("Self-signed generation failed: {e}")))?;

    info!(host, "self-signed certificate generated");

    let key = PrivateKeyDer::from(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
    Ok((vec![cert.der().clone()], key))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
