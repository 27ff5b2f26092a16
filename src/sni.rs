//! Per-hostname context routing.
//!
//! A router maps the server name presented during the handshake to a
//! named TLS context through a list of hostname patterns, falling back
//! to a default context when nothing matches.  Patterns are a constrained
//! hostname grammar layered on regular expressions: letters, digits,
//! hyphens and regex metacharacters `[ ] * ? ^ .`, where a non-escaped
//! dot is the regex wildcard and `\.` is a literal label delimiter.

use regex::Regex;
use tracing::{debug, trace};

use crate::config::SniContextConfig;
use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Pattern grammar
// ─────────────────────────────────────────────────────────────────────────────

fn first_char_ok(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '[' | '.' | '*')
}

fn middle_char_ok(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '*' | '.' | '[' | ']' | '?' | '^' | '-')
}

fn last_char_ok(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '*' | '.' | '[' | ']' | '?')
}

/// Validate a host pattern against the hostname grammar, then against
/// regex syntax (unbalanced brackets and the like).
///
/// Grammar: the first character is a letter, digit, `[`, `.` or `*`; the
/// last is a letter, digit, `*`, `.`, `[`, `]` or `?` (no trailing hyphen,
/// caret or escaped dot); in between, hostname characters or escaped dots,
/// with no two escaped dots adjacent.  A backslash may only escape a dot.
pub fn validate_host_pattern(pattern: &str) -> Result<()> {
    let invalid =
        || Error::config(format!("invalid host pattern '{pattern}' in host context map"));

    let chars: Vec<char> = pattern.chars().collect();
    if chars.len() < 2 {
        return Err(invalid());
    }
    let last = chars.len() - 1;
    if !first_char_ok(chars[0]) || !last_char_ok(chars[last]) {
        return Err(invalid());
    }

    let mut i = 1;
    let mut prev_escaped_dot = false;
    while i < last {
        if chars[i] == '\\' {
            // Backslash is only valid as an escaped dot, never two in a
            // row and never ending the pattern.
            if i + 1 >= last || chars[i + 1] != '.' || prev_escaped_dot {
                return Err(invalid());
            }
            prev_escaped_dot = true;
            i += 2;
        } else if middle_char_ok(chars[i]) {
            prev_escaped_dot = false;
            i += 1;
        } else {
            return Err(invalid());
        }
    }

    Regex::new(pattern).map_err(|_| invalid())?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// One pattern → context mapping.
#[derive(Debug)]
pub struct HostRoute {
    pattern: String,
    regex: Regex,
    context: String,
}

impl HostRoute {
    /// Compile a validated pattern into a route targeting `context`.
    pub fn new(pattern: impl Into<String>, context: impl Into<String>) -> Result<Self> {
        let pattern = pattern.into();
        validate_host_pattern(&pattern)?;
        // Full-match semantics over the presented server name.
        let regex = Regex::new(&format!("^(?:{pattern})$"))
            .map_err(|e| Error::config(format!("host pattern '{pattern}' is not valid: {e}")))?;
        Ok(Self {
            pattern,
            regex,
            context: context.into(),
        })
    }

    /// The raw pattern expression.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// The target context name.
    #[must_use]
    pub fn context(&self) -> &str {
        &self.context
    }
}

/// Routes a presented server name to a named TLS context.
///
/// Routes are consulted in declaration order, first full match wins; a
/// handshake presenting no name or an unmatched name gets the default.
#[derive(Debug)]
pub struct HostContextRouter {
    routes: Vec<HostRoute>,
    default_context: String,
}

impl HostContextRouter {
    /// Build from a default context name and ordered pattern mappings.
    pub fn new(
        default_context: impl Into<String>,
        mappings: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self> {
        let mut routes = Vec::new();
        for (pattern, context) in mappings {
            routes.push(HostRoute::new(pattern, context)?);
        }
        let default_context = default_context.into();
        debug!(
            default = %default_context,
            routes = routes.len(),
            "host context router built"
        );
        Ok(Self {
            routes,
            default_context,
        })
    }

    /// Build from configuration.
    pub fn from_config(config: &SniContextConfig) -> Result<Self> {
        Self::new(
            config.default_ssl_context.clone(),
            config.host_context_map.iter().cloned(),
        )
    }

    /// Resolve the context name for a presented server name.
    #[must_use]
    pub fn route(&self, server_name: Option<&str>) -> &str {
        if let Some(name) = server_name {
            for route in &self.routes {
                if route.regex.is_match(name) {
                    trace!(server_name = name, pattern = route.pattern(), context = route.context(), "host route matched");
                    return route.context();
                }
            }
            trace!(server_name = name, context = %self.default_context, "no host route matched, using default");
        }
        &self.default_context
    }

    /// The default context name.
    #[must_use]
    pub fn default_context(&self) -> &str {
        &self.default_context
    }

    /// The configured routes, in match order.
    #[must_use]
    pub fn routes(&self) -> &[HostRoute] {
        &self.routes
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
