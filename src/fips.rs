//! Restricted-cryptography (FIPS) platform probe.
//!
//! Some deployments run with the operating system in a restricted
//! cryptography mode.  In that mode indirection layers around security
//! objects must be unwrapped before handing them to the handshake
//! implementation, because the underlying stack refuses wrapped types it
//! cannot certify.  The probe result never changes at runtime, so it is
//! computed once and cached for the process lifetime.

use std::fs;
use std::sync::OnceLock;

use tracing::{debug, trace};

use crate::provider::ProviderSet;

/// Kernel switch exposed when the platform runs in restricted mode.
const PLATFORM_FLAG: &str = "/proc/sys/crypto/fips_enabled";

static RESTRICTED: OnceLock<bool> = OnceLock::new();

/// `true` when the platform runs in restricted-cryptography mode.
///
/// The first call probes the platform flag, falling back to inspecting
/// the provider set's secure-random naming; later calls return the
/// cached result regardless of the provider set passed.
pub fn is_restricted(providers: &ProviderSet) -> bool {
    *RESTRICTED.get_or_init(|| {
        let platform_flag = fs::read_to_string(PLATFORM_FLAG).ok();
        let restricted = probe_with(platform_flag.as_deref(), providers);
        debug!(restricted, "restricted-cryptography probe completed");
        restricted
    })
}

/// Pure probe over an already-read platform flag and a provider set.
///
/// The flag wins when readable; otherwise a provider whose secure-random
/// implementation name mentions "fips" marks the platform restricted.
#[must_use]
pub fn probe_with(platform_flag: Option<&str>, providers: &ProviderSet) -> bool {
    if let Some(flag) = platform_flag {
        let enabled = flag.trim() == "1";
        trace!(enabled, "platform restricted-mode flag read");
        return enabled;
    }
    providers
        .providers()
        .iter()
        .any(|p| p.secure_random_name().to_ascii_lowercase().contains("fips"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Provider;

    #[test]
    fn platform_flag_takes_precedence() {
        let set = ProviderSet::platform_default();
        assert!(probe_with(Some("1\n"), &set));
        assert!(!probe_with(Some("0\n"), &set));
    }

    #[test]
    fn flag_beats_provider_heuristic() {
        let set = ProviderSet::new(vec![
            Provider::new("restricted", ["PKIX"]).with_secure_random_name("FIPS-DRBG"),
        ]);
        assert!(!probe_with(Some("0"), &set));
    }

    #[test]
    fn provider_heuristic_applies_without_flag() {
        let restricted = ProviderSet::new(vec![
            Provider::new("restricted", ["PKIX"]).with_secure_random_name("FIPS-DRBG"),
        ]);
        assert!(probe_with(None, &restricted));

        let plain = ProviderSet::platform_default();
        assert!(!probe_with(None, &plain));
    }
}
