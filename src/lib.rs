//! TLS Provisioning Library
//!
//! Trust and key-material provisioning for a TLS handshake implementation.
//!
//! # Features
//!
//! - **Trust Material**: validator construction over PEM keystores with
//!   provider/algorithm resolution and alias filtering
//! - **Revocation**: CRL and online-responder checking with explicit
//!   precedence, fallback and soft-fail rules
//! - **Hot Reload**: atomically swappable CRL-backed validators, readers
//!   never block
//! - **Lazy Provisioning**: self-signed certificate generation on first
//!   cryptographic use
//! - **Routing**: per-hostname context dispatch with a default fallback
//! - **Dynamic Contexts**: configuration-following client contexts built
//!   afresh on every acquisition
//!
//! # Restricted Platforms
//!
//! On restricted-cryptography (FIPS) platforms, delegating indirection
//! layers are unwrapped at context assembly.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cipher;
pub mod config;
pub mod context;
pub mod delegating;
pub mod dynamic;
pub mod error;
pub mod fips;
pub mod keymanager;
pub mod keystore;
pub mod provider;
pub mod reload;
pub mod revocation;
pub mod service;
pub mod sni;
pub mod trust;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
