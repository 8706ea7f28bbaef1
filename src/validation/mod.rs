//! Syntactic validation of connection-request parameters.
//!
//! Requests are checked before any socket operation is attempted; a failed
//! check surfaces as a validation error carrying every violation found.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::proxy::NewConnectionRequest;

const MAX_DOMAIN_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// Which address families a string may denote.
///
/// Remote targets accept hostnames as well as literal addresses; bind
/// addresses accept literals only.
#[derive(Debug, Clone, Copy)]
pub struct NetAddressPolicy {
    pub allow_domains: bool,
    pub allow_ipv4: bool,
    pub allow_ipv6: bool,
}

impl NetAddressPolicy {
    /// Accepts hostnames, IPv4 and IPv6 literals.
    pub fn any() -> Self {
        Self {
            allow_domains: true,
            allow_ipv4: true,
            allow_ipv6: true,
        }
    }

    /// Accepts IPv4 and IPv6 literals only.
    pub fn addresses_only() -> Self {
        Self {
            allow_domains: false,
            allow_ipv4: true,
            allow_ipv6: true,
        }
    }

    pub fn is_valid(&self, value: &str) -> bool {
        if !self.allow_domains && !self.allow_ipv4 && !self.allow_ipv6 {
            return false;
        }
        if self.allow_ipv4 && value.parse::<Ipv4Addr>().is_ok() {
            return true;
        }
        if self.allow_ipv6 && value.parse::<Ipv6Addr>().is_ok() {
            return true;
        }
        self.allow_domains && is_valid_domain(value)
    }
}

/// RFC 1035-style hostname check: dot-separated labels of letters, digits
/// and inner hyphens. Single-label names ("localhost") are accepted.
fn is_valid_domain(value: &str) -> bool {
    if value.is_empty() || value.len() > MAX_DOMAIN_LEN {
        return false;
    }
    // A value of all digits and dots would be a malformed IPv4 literal
    if value.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return false;
    }
    value.split('.').all(is_valid_label)
}

fn is_valid_label(label: &str) -> bool {
    if label.is_empty() || label.len() > MAX_LABEL_LEN {
        return false;
    }
    if label.starts_with('-') || label.ends_with('-') {
        return false;
    }
    label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Validate a new-connection request; an empty list means the request is
/// acceptable.
pub fn validate_new_request(request: &NewConnectionRequest) -> Vec<String> {
    let mut violations = Vec::new();
    if !NetAddressPolicy::any().is_valid(&request.address) {
        violations.push(format!("{} is not a valid network address", request.address));
    }
    if request.port == 0 {
        violations.push("port must be between 1 and 65535".to_string());
    }
    violations
}
