//! Target grammar validation (spec.md §3, §4.1 step 1, §6 "Target grammar")
//!
//! Accepted shapes: an RFC1918 IPv4 address, a private IPv4 CIDR, a loopback
//! address, or a hostname ending in `.lab.internal`. `http://`/`https://`
//! prefixes are stripped before shape validation so URL-mode tools can
//! still be checked against the same grammar; whether a scheme was present
//! (and required) is enforced separately by mode extraction.

use ipnet::Ipv4Net;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::types::GatewayError;

/// The parsed shape of a validated target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetShape {
    Ip(Ipv4Addr),
    Cidr(Ipv4Net),
    Hostname(String),
}

/// A target that has passed grammar validation.
#[derive(Debug, Clone)]
pub struct ValidatedTarget {
    /// Exactly as supplied by the caller — this is what gets placed in argv.
    pub raw: String,
    pub shape: TargetShape,
    pub had_url_scheme: bool,
}

const LAB_SUFFIX: &str = ".lab.internal";

fn strip_scheme(raw: &str) -> (&str, bool) {
    if let Some(rest) = raw.strip_prefix("http://") {
        (rest, true)
    } else if let Some(rest) = raw.strip_prefix("https://") {
        (rest, true)
    } else {
        (raw, false)
    }
}

/// Drop a trailing `/path` and `:port`, leaving just the host or CIDR part.
fn host_part(scheme_stripped: &str) -> &str {
    let without_path = scheme_stripped.split('/').next().unwrap_or(scheme_stripped);
    // CIDR has its own '/', but we already split on the first '/' above which
    // would wrongly truncate "10.0.0.0/22". Re-handle: if the ORIGINAL had no
    // scheme, a '/' indicates CIDR notation, not a path, so don't split.
    without_path
}

fn is_valid_hostname_label_sequence(host: &str) -> bool {
    if host.is_empty() || host.len() > 253 {
        return false;
    }
    host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
            && !label.starts_with('-')
            && !label.ends_with('-')
    })
}

fn cidr_address_count(net: &Ipv4Net) -> u64 {
    1u64 << (32 - net.prefix_len() as u32)
}

fn validation_error(msg: impl Into<String>) -> GatewayError {
    GatewayError::Validation(msg.into())
}

/// Validate a raw target string against the grammar. `max_cidr_hosts`
/// applies only to tools that bound the scanned address space (the
/// network-mapper descriptor sets `Some(1024)`).
pub fn validate_target(
    raw: &str,
    max_cidr_hosts: Option<u32>,
) -> Result<ValidatedTarget, GatewayError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(validation_error("target must not be empty"));
    }

    let (scheme_stripped, had_url_scheme) = strip_scheme(trimmed);

    // A CIDR target never carries a URL scheme or a path; only strip a
    // trailing path/port when there was a scheme to begin with.
    let candidate: &str = if had_url_scheme {
        host_part(scheme_stripped)
    } else {
        scheme_stripped
    };

    // Host:port without a scheme — strip a trailing :port for hostname/IP
    // forms (a CIDR never contains ':').
    let candidate_no_port = if !candidate.contains('/') {
        candidate.split(':').next().unwrap_or(candidate)
    } else {
        candidate
    };

    if candidate_no_port.contains('/') {
        let net = Ipv4Net::from_str(candidate_no_port).map_err(|_| {
            validation_error(format!(
                "'{candidate_no_port}' is not a valid IPv4 CIDR"
            ))
        })?;
        let network_addr = net.network();
        if !(network_addr.is_private() || network_addr.is_loopback()) {
            return Err(validation_error(format!(
                "CIDR '{net}' is not within RFC1918 or loopback space"
            )));
        }
        if let Some(max_hosts) = max_cidr_hosts {
            let count = cidr_address_count(&net);
            if count > max_hosts as u64 {
                return Err(validation_error(format!(
                    "CIDR '{net}' spans {count} addresses, exceeding the limit of {max_hosts}"
                )));
            }
        }
        return Ok(ValidatedTarget {
            raw: trimmed.to_string(),
            shape: TargetShape::Cidr(net),
            had_url_scheme,
        });
    }

    if let Ok(ip) = Ipv4Addr::from_str(candidate_no_port) {
        if ip.is_private() || ip.is_loopback() {
            return Ok(ValidatedTarget {
                raw: trimmed.to_string(),
                shape: TargetShape::Ip(ip),
                had_url_scheme,
            });
        }
        return Err(validation_error(format!(
            "IPv4 address '{ip}' is not within RFC1918 or loopback space"
        )));
    }

    // Reject IPv6 literals explicitly rather than falling through to the
    // hostname branch with a confusing error.
    if candidate_no_port.contains(':') {
        return Err(validation_error(
            "IPv6 targets are not supported; use an IPv4 address, CIDR, or .lab.internal hostname",
        ));
    }

    let lower = candidate_no_port.to_ascii_lowercase();
    if lower.ends_with(LAB_SUFFIX) && lower.len() > LAB_SUFFIX.len() {
        if !is_valid_hostname_label_sequence(&lower) {
            return Err(validation_error(format!(
                "'{candidate_no_port}' is not a syntactically valid hostname"
            )));
        }
        return Ok(ValidatedTarget {
            raw: trimmed.to_string(),
            shape: TargetShape::Hostname(lower),
            had_url_scheme,
        });
    }

    Err(validation_error(format!(
        "'{trimmed}' matches none of: RFC1918/loopback IPv4, private IPv4 CIDR, or a hostname ending in '{LAB_SUFFIX}'"
    )))
}
