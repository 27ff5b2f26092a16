//! Cipher-suite selection.
//!
//! Two configuration surfaces feed one selector: a legacy OpenSSL-style
//! filter expression (`DEFAULT`, `ALL:!NULL`, ...) and an explicit list
//! of TLS 1.3 suite names.  Both are validated at configuration time;
//! the handshake implementation receives the aggregated, ordered result.

use std::collections::HashSet;

use tracing::trace;

use crate::{Error, Result};

/// One suite the selector knows about.
struct Suite {
    name: &'static str,
    tls13: bool,
    null_cipher: bool,
}

const fn suite(name: &'static str, tls13: bool, null_cipher: bool) -> Suite {
    Suite {
        name,
        tls13,
        null_cipher,
    }
}

/// Suites this engine is willing to offer to the handshake layer.
/// Order is preference order within each set keyword.
static SUITES: &[Suite] = &[
    suite("TLS_AES_256_GCM_SHA384", true, false),
    suite("TLS_AES_128_GCM_SHA256", true, false),
    suite("TLS_CHACHA20_POLY1305_SHA256", true, false),
    suite("TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384", false, false),
    suite("TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256", false, false),
    suite("TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256", false, false),
    suite("TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384", false, false),
    suite("TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256", false, false),
    suite("TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256", false, false),
    suite("TLS_RSA_WITH_AES_256_GCM_SHA384", false, false),
    suite("TLS_RSA_WITH_AES_128_GCM_SHA256", false, false),
    suite("TLS_RSA_WITH_NULL_SHA256", false, true),
    suite("TLS_ECDHE_ECDSA_WITH_NULL_SHA", false, true),
];

fn resolve_set(name: &str) -> Result<Vec<&'static str>> {
    let matched: Vec<&'static str> = match name {
        "ALL" => SUITES.iter().map(|s| s.name).collect(),
        "DEFAULT" => SUITES
            .iter()
            .filter(|s| !s.null_cipher)
            .map(|s| s.name)
            .collect(),
        "NULL" | "eNULL" => SUITES
            .iter()
            .filter(|s| s.null_cipher)
            .map(|s| s.name)
            .collect(),
        _ => SUITES
            .iter()
            .filter(|s| s.name == name)
            .map(|s| s.name)
            .collect(),
    };
    if matched.is_empty() {
        return Err(Error::config(format!(
            "unknown cipher suite or set '{name}' in filter expression"
        )));
    }
    Ok(matched)
}

/// Ordered cipher-suite selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherSuiteSelector {
    ordered: Vec<&'static str>,
}

impl CipherSuiteSelector {
    /// Parse a legacy filter expression.
    ///
    /// Tokens are separated by `:`, `,` or space.  Each token is a suite
    /// name or a set keyword (`DEFAULT`, `ALL`, `NULL`), optionally
    /// prefixed: `!` removes permanently, `-` removes, `+` moves matches
    /// to the end of the selection.  Unknown tokens are a configuration
    /// error.
    pub fn from_filter(expression: &str) -> Result<Self> {
        let mut selected: Vec<&'static str> = Vec::new();
        let mut banned: HashSet<&'static str> = HashSet::new();
        let mut saw_token = false;

        for token in expression.split([':', ',', ' ']).filter(|t| !t.is_empty()) {
            saw_token = true;
            let (op, name) = match token.as_bytes()[0] {
                b'!' => (b'!', &token[1..]),
                b'-' => (b'-', &token[1..]),
                b'+' => (b'+', &token[1..]),
                _ => (b' ', token),
            };
            if name.is_empty() {
                return Err(Error::config(format!(
                    "cipher filter operation '{token}' names no suite"
                )));
            }
            let set = resolve_set(name)?;
            match op {
                b'!' => {
                    for s in set {
                        banned.insert(s);
                        selected.retain(|x| *x != s);
                    }
                }
                b'-' => {
                    for s in set {
                        selected.retain(|x| *x != s);
                    }
                }
                b'+' => {
                    for s in set {
                        if selected.contains(&s) {
                            selected.retain(|x| *x != s);
                            selected.push(s);
                        }
                    }
                }
                _ => {
                    for s in set {
                        if !banned.contains(s) && !selected.contains(&s) {
                            selected.push(s);
                        }
                    }
                }
            }
        }

        if !saw_token {
            return Err(Error::config("empty cipher suite filter expression"));
        }
        trace!(expression, suites = selected.len(), "cipher filter evaluated");
        Ok(Self { ordered: selected })
    }

    /// Build from an explicit list of TLS 1.3 suite names.
    pub fn from_names(names: &[String]) -> Result<Self> {
        let mut ordered = Vec::with_capacity(names.len());
        for name in names {
            let known = SUITES
                .iter()
                .find(|s| s.name == name)
                .ok_or_else(|| Error::config(format!("unknown cipher suite name '{name}'")))?;
            if !known.tls13 {
                return Err(Error::config(format!(
                    "cipher suite '{name}' is not a TLSv1.3 suite"
                )));
            }
            if !ordered.contains(&known.name) {
                ordered.push(known.name);
            }
        }
        Ok(Self { ordered })
    }

    /// Aggregate an optional explicit name list with a filter expression.
    /// Named TLS 1.3 suites come first, then the filter's selection.
    pub fn aggregate(names: Option<&[String]>, filter: &str) -> Result<Self> {
        let mut combined = match names {
            Some(names) => Self::from_names(names)?,
            None => Self {
                ordered: Vec::new(),
            },
        };
        for suite in Self::from_filter(filter)?.ordered {
            if !combined.ordered.contains(&suite) {
                combined.ordered.push(suite);
            }
        }
        Ok(combined)
    }

    /// Aggregate a colon-separated name list with a filter expression.
    pub fn aggregate_expressions(names: Option<&str>, filter: &str) -> Result<Self> {
        let names: Option<Vec<String>> = names.map(|n| {
            n.split(':')
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect()
        });
        Self::aggregate(names.as_deref(), filter)
    }

    /// The ordered selection.
    #[must_use]
    pub fn suites(&self) -> Vec<String> {
        self.ordered.iter().map(|s| (*s).to_string()).collect()
    }

    /// Intersect the selection with what the handshake layer supports,
    /// preserving selection order.
    #[must_use]
    pub fn evaluate(&self, supported: &[&str]) -> Vec<String> {
        self.ordered
            .iter()
            .filter(|s| supported.contains(*s))
            .map(|s| (*s).to_string())
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
