//! The static catalog of five registered tools (spec.md §1, §9 Open
//! Question on directory-brute-forcer thread defaults).
//!
//! Tool names double as the `PATH`-resolved executable name and the
//! transport URL segment (`POST /tools/{name}/execute`), matching spec.md's
//! own literal scenario (`POST /tools/nmap/execute`).

use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::types::{ModeSpec, TargetKind, ToolDescriptor};

fn default_breaker() -> CircuitBreakerConfig {
    CircuitBreakerConfig::default()
}

/// Network mapper. Timing/parallelism/host-discovery optimizer defaults per
/// spec.md §4.1 step 4's own worked example.
fn network_mapper() -> ToolDescriptor {
    ToolDescriptor {
        name: "nmap".to_string(),
        command: "nmap".to_string(),
        allowed_flags: vec![
            "-Pn".into(),
            "-sn".into(),
            "-sV".into(),
            "-sC".into(),
            "-O".into(),
            "-T4".into(),
            "-p".into(),
            "--max-parallelism".into(),
            "--top-ports".into(),
        ],
        allowed_modes: vec![],
        concurrency_limit: 2,
        default_timeout_seconds: 300.0,
        circuit_breaker_config: default_breaker(),
        optimizer_defaults: vec!["-T4".into(), "--max-parallelism=10".into(), "-Pn".into()],
        default_target_kind: TargetKind::Positional,
        max_cidr_hosts: Some(1024),
    }
}

/// Port sweeper. No mode concept, no CIDR host cap (the cap is specific to
/// the network mapper per spec.md §3).
fn port_sweeper() -> ToolDescriptor {
    ToolDescriptor {
        name: "masscan".to_string(),
        command: "masscan".to_string(),
        allowed_flags: vec![
            "-p".into(),
            "--rate".into(),
            "--banners".into(),
            "-e".into(),
            "--open-only".into(),
        ],
        allowed_modes: vec![],
        concurrency_limit: 2,
        default_timeout_seconds: 300.0,
        circuit_breaker_config: default_breaker(),
        optimizer_defaults: vec!["--rate=1000".into()],
        default_target_kind: TargetKind::Positional,
        max_cidr_hosts: None,
    }
}

/// Directory brute-forcer. `dir`/`vhost` take a URL target; `dns` takes a
/// bare hostname. Resolved Open Question (spec.md §9, SPEC_FULL.md): dir and
/// vhost default to 50 threads, dns to 100 — gobuster's own heavier default
/// for raw DNS brute-forcing versus HTTP-bound modes.
fn directory_brute_forcer() -> ToolDescriptor {
    ToolDescriptor {
        name: "gobuster".to_string(),
        command: "gobuster".to_string(),
        allowed_flags: vec![
            "-w".into(),
            "-t".into(),
            "-x".into(),
            "-u".into(),
            "-d".into(),
            "--timeout".into(),
            "-k".into(),
        ],
        allowed_modes: vec![
            ModeSpec {
                token: "dir".into(),
                target_kind: TargetKind::UrlFlag,
                mode_defaults: vec!["-t=50".into()],
            },
            ModeSpec {
                token: "vhost".into(),
                target_kind: TargetKind::UrlFlag,
                mode_defaults: vec!["-t=50".into()],
            },
            ModeSpec {
                token: "dns".into(),
                target_kind: TargetKind::DnsFlag,
                mode_defaults: vec!["-t=100".into()],
            },
        ],
        concurrency_limit: 2,
        default_timeout_seconds: 300.0,
        circuit_breaker_config: default_breaker(),
        optimizer_defaults: vec![],
        default_target_kind: TargetKind::UrlFlag,
        max_cidr_hosts: None,
    }
}

/// Credential tester.
fn credential_tester() -> ToolDescriptor {
    ToolDescriptor {
        name: "hydra".to_string(),
        command: "hydra".to_string(),
        allowed_flags: vec![
            "-l".into(),
            "-L".into(),
            "-p".into(),
            "-P".into(),
            "-t".into(),
            "-s".into(),
            "-f".into(),
            "-V".into(),
        ],
        allowed_modes: vec![],
        concurrency_limit: 1,
        default_timeout_seconds: 300.0,
        circuit_breaker_config: default_breaker(),
        optimizer_defaults: vec!["-t=4".into()],
        default_target_kind: TargetKind::Positional,
        max_cidr_hosts: None,
    }
}

/// SQL-injection tester. Single-use concurrency (1) — this tool is the
/// heaviest per-invocation and the most likely to trip shared resource
/// limits if allowed to run concurrently with itself.
fn sql_injection_tester() -> ToolDescriptor {
    ToolDescriptor {
        name: "sqlmap".to_string(),
        command: "sqlmap".to_string(),
        allowed_flags: vec![
            "-u".into(),
            "--batch".into(),
            "--risk".into(),
            "--level".into(),
            "--dbs".into(),
            "--tables".into(),
            "--technique".into(),
        ],
        allowed_modes: vec![],
        concurrency_limit: 1,
        default_timeout_seconds: 300.0,
        circuit_breaker_config: default_breaker(),
        optimizer_defaults: vec!["--batch".into(), "--risk=1".into()],
        default_target_kind: TargetKind::UrlFlag,
        max_cidr_hosts: None,
    }
}

/// The fixed catalog registered at startup (spec.md §1).
pub fn all() -> Vec<ToolDescriptor> {
    vec![
        network_mapper(),
        port_sweeper(),
        directory_brute_forcer(),
        credential_tester(),
        sql_injection_tester(),
    ]
}

/// Sanity invariant the registry relies on: every descriptor's
/// `default_timeout` must resolve without panicking and stay within the
/// configuration schema's bounds (spec.md §6, 1..3600s).
pub fn default_timeout_in_bounds(desc: &ToolDescriptor) -> bool {
    let secs = desc.default_timeout().as_secs_f64();
    (1.0..=3600.0).contains(&secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_five_unique_names() {
        let descriptors = all();
        let names: std::collections::HashSet<&str> =
            descriptors.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names.len(), 5);
    }

    #[test]
    fn all_descriptors_within_timeout_bounds() {
        for desc in all() {
            assert!(default_timeout_in_bounds(&desc), "{} out of bounds", desc.name);
        }
    }

    #[test]
    fn nmap_has_cidr_cap_others_do_not() {
        let catalog = all();
        let nmap = catalog.iter().find(|d| d.name == "nmap").unwrap();
        assert_eq!(nmap.max_cidr_hosts, Some(1024));
        for other in catalog.iter().filter(|d| d.name != "nmap") {
            assert_eq!(other.max_cidr_hosts, None);
        }
    }

    #[test]
    fn gobuster_dns_mode_uses_higher_thread_default_than_dir() {
        let catalog = all();
        let gobuster = catalog.iter().find(|d| d.name == "gobuster").unwrap();
        let dir = gobuster.mode("dir").unwrap();
        let dns = gobuster.mode("dns").unwrap();
        assert_eq!(dir.mode_defaults, vec!["-t=50".to_string()]);
        assert_eq!(dns.mode_defaults, vec!["-t=100".to_string()]);
    }

    #[test]
    fn every_optimizer_default_governing_flag_is_allowed() {
        for desc in all() {
            for default_token in &desc.optimizer_defaults {
                let governing = default_token.split('=').next().unwrap();
                assert!(
                    desc.allows_flag(governing),
                    "{}: optimizer default '{}' not in its own allow-list",
                    desc.name,
                    default_token
                );
            }
            for mode in &desc.allowed_modes {
                for default_token in &mode.mode_defaults {
                    let governing = default_token.split('=').next().unwrap();
                    assert!(
                        desc.allows_flag(governing),
                        "{}/{}: mode default '{}' not in its own allow-list",
                        desc.name,
                        mode.token,
                        default_token
                    );
                }
            }
        }
    }
}
