//! Argument tokenization and flag allow-listing (spec.md §4.1 steps 2-5)

use regex::Regex;
use std::sync::OnceLock;

use crate::types::{ModeSpec, TargetKind, ToolDescriptor};

fn token_grammar() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9.:/=+\-,@%_]+$").unwrap())
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TokenizeError {
    #[error("could not split extra_args: {0}")]
    Split(String),
    #[error("token '{0}' contains characters outside the allowed grammar")]
    IllegalCharacters(String),
    #[error("flag '{0}' is not in this tool's allow-list")]
    FlagNotAllowed(String),
    #[error("a second mode token '{0}' was supplied; only one is permitted")]
    DuplicateMode(String),
    #[error("positional token '{0}' is not a recognized mode and not a flag value")]
    UnexpectedPositional(String),
}

/// The outcome of tokenizing one request's `extra_args` against a descriptor.
#[derive(Debug, Clone, Default)]
pub struct TokenizedArgs {
    /// Mode token, if the descriptor declares modes and one was supplied.
    pub mode: Option<ModeSpec>,
    /// All tokens in user-supplied order, mode token excluded.
    pub tokens: Vec<String>,
}

/// Split `extra_args` with shell-style quoting rules (no command substitution —
/// `shell-words` only ever produces literal strings, never executes anything).
fn split(extra_args: &str) -> Result<Vec<String>, TokenizeError> {
    shell_words::split(extra_args).map_err(|e| TokenizeError::Split(e.to_string()))
}

/// Does `flag` match an allow-list entry, comparing only the part up to the
/// first `=`? Prefix matching is explicitly forbidden.
fn flag_key(token: &str) -> &str {
    token.split('=').next().unwrap_or(token)
}

/// Tokenize and validate `extra_args` against `desc`. Mode extraction (step 2)
/// and flag allow-listing (step 3) happen here; default injection (step 4)
/// and target placement (step 5) are the caller's job since they need the
/// validated target too.
pub fn tokenize(desc: &ToolDescriptor, extra_args: &str) -> Result<TokenizedArgs, TokenizeError> {
    let raw_tokens = split(extra_args)?;

    for t in &raw_tokens {
        if !token_grammar().is_match(t) {
            return Err(TokenizeError::IllegalCharacters(t.clone()));
        }
    }

    let mut mode: Option<ModeSpec> = None;
    let mut tokens = Vec::with_capacity(raw_tokens.len());
    let mut iter = raw_tokens.into_iter().peekable();

    while let Some(tok) = iter.next() {
        if !tok.starts_with('-') {
            // Candidate: mode token, or a value for the previous flag (already
            // consumed inline below), or an unexpected positional.
            if desc.has_modes() && mode.is_none() {
                match desc.mode(&tok) {
                    Some(m) => {
                        mode = Some(m.clone());
                        continue;
                    }
                    None => {
                        return Err(TokenizeError::UnexpectedPositional(tok));
                    }
                }
            }
            if desc.has_modes() && mode.is_some() {
                // A second bare positional after the mode was already chosen —
                // only legal as a value immediately following a value-taking
                // flag, which is handled when we see the flag itself below.
                return Err(TokenizeError::DuplicateMode(tok));
            }
            return Err(TokenizeError::UnexpectedPositional(tok));
        }

        let key = flag_key(&tok);
        if !desc.allows_flag(key) {
            return Err(TokenizeError::FlagNotAllowed(tok));
        }
        tokens.push(tok.clone());

        // A bare flag (no '=') may be followed by its value as the next
        // token, which is allowed through without re-checking the grammar
        // against the flag allow-list.
        if !tok.contains('=') {
            if let Some(next) = iter.peek() {
                if !next.starts_with('-') {
                    tokens.push(iter.next().unwrap());
                }
            }
        }
    }

    Ok(TokenizedArgs { mode, tokens })
}

/// Append any `optimizer_defaults` whose governing flag is absent from
/// `tokens`, self-checking each injected token against the allow-list. When a
/// mode was selected, its `mode_defaults` are merged in first and take
/// precedence over a descriptor-level default for the same governing flag
/// (e.g. the directory brute-forcer's `dns` mode uses more threads than its
/// `dir`/`vhost` modes).
pub fn inject_defaults(desc: &ToolDescriptor, mode: Option<&ModeSpec>, tokens: &mut Vec<String>) {
    let mut defaults: Vec<&String> = desc.optimizer_defaults.iter().collect();
    if let Some(mode) = mode {
        for mode_default in &mode.mode_defaults {
            let governing = flag_key(mode_default);
            defaults.retain(|d| flag_key(d) != governing);
            defaults.push(mode_default);
        }
    }

    for default_token in defaults {
        let governing = flag_key(default_token);
        let already_present = tokens.iter().any(|t| flag_key(t) == governing);
        if already_present {
            continue;
        }
        if !desc.allows_flag(governing) {
            tracing::error!(
                tool = desc.name,
                token = default_token,
                "optimizer default fails its own tool's allow-list; dropping"
            );
            continue;
        }
        tokens.push(default_token.clone());
    }
}

/// Place the target in argv per the descriptor's (or mode's) target kind,
/// unless the user already supplied the governing flag.
pub fn place_target(target_kind: TargetKind, target: &str, tokens: &mut Vec<String>) {
    match target_kind {
        TargetKind::Positional => tokens.push(target.to_string()),
        TargetKind::UrlFlag => {
            if !tokens.iter().any(|t| flag_key(t) == "-u") {
                tokens.push("-u".to_string());
                tokens.push(target.to_string());
            }
        }
        TargetKind::DnsFlag => {
            if !tokens.iter().any(|t| flag_key(t) == "-d") {
                tokens.push("-d".to_string());
                tokens.push(target.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::CircuitBreakerConfig;

    fn nmap_descriptor() -> ToolDescriptor {
        ToolDescriptor {
            name: "network_mapper".into(),
            command: "nmap".into(),
            allowed_flags: vec![
                "-Pn".into(),
                "-sn".into(),
                "-T4".into(),
                "--max-parallelism".into(),
            ],
            allowed_modes: vec![],
            concurrency_limit: 2,
            default_timeout_seconds: 30.0,
            circuit_breaker_config: CircuitBreakerConfig::default(),
            optimizer_defaults: vec!["-T4".into(), "--max-parallelism=10".into(), "-Pn".into()],
            default_target_kind: TargetKind::Positional,
            max_cidr_hosts: Some(1024),
        }
    }

    fn dir_descriptor() -> ToolDescriptor {
        ToolDescriptor {
            name: "directory_brute_forcer".into(),
            command: "gobuster".into(),
            allowed_flags: vec!["-t".into(), "-x".into()],
            allowed_modes: vec![
                ModeSpec {
                    token: "dir".into(),
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
            default_timeout_seconds: 60.0,
            circuit_breaker_config: CircuitBreakerConfig::default(),
            optimizer_defaults: vec!["-t=50".into()],
            default_target_kind: TargetKind::UrlFlag,
            max_cidr_hosts: None,
        }
    }

    #[test]
    fn rejects_disallowed_flag() {
        let desc = nmap_descriptor();
        assert!(matches!(
            tokenize(&desc, "--script=vuln"),
            Err(TokenizeError::FlagNotAllowed(_))
        ));
    }

    #[test]
    fn prefix_matching_is_forbidden() {
        let desc = nmap_descriptor();
        // "--max-parallelism=10" is allowed because the key up to '=' matches.
        assert!(tokenize(&desc, "--max-parallelism=10").is_ok());
        // But "--max-parallelism-extra" must not match by prefix.
        assert!(matches!(
            tokenize(&desc, "--max-parallelism-extra"),
            Err(TokenizeError::FlagNotAllowed(_))
        ));
    }

    #[test]
    fn extracts_mode_token() {
        let desc = dir_descriptor();
        let out = tokenize(&desc, "dir -x php,txt").unwrap();
        assert_eq!(out.mode.unwrap().token, "dir");
        assert_eq!(out.tokens, vec!["-x".to_string(), "php,txt".to_string()]);
    }

    #[test]
    fn rejects_second_mode_token() {
        let desc = dir_descriptor();
        assert!(matches!(
            tokenize(&desc, "dir dns"),
            Err(TokenizeError::DuplicateMode(_))
        ));
    }

    #[test]
    fn rejects_illegal_characters() {
        let desc = nmap_descriptor();
        assert!(matches!(
            tokenize(&desc, "-Pn; rm -rf /"),
            Err(TokenizeError::IllegalCharacters(_)) | Err(TokenizeError::Split(_))
        ));
    }

    #[test]
    fn injects_missing_defaults_only() {
        let desc = nmap_descriptor();
        let mut tokens = tokenize(&desc, "-T4").unwrap().tokens;
        inject_defaults(&desc, None, &mut tokens);
        assert!(tokens.iter().filter(|t| t.as_str() == "-T4").count() == 1);
        assert!(tokens.contains(&"--max-parallelism=10".to_string()));
        assert!(tokens.contains(&"-Pn".to_string()));
    }

    #[test]
    fn places_positional_target() {
        let mut tokens = vec!["-T4".to_string()];
        place_target(TargetKind::Positional, "192.168.1.1", &mut tokens);
        assert_eq!(tokens.last().unwrap(), "192.168.1.1");
    }

    #[test]
    fn places_url_flag_target_when_absent() {
        let mut tokens = vec!["-x".to_string(), "php".to_string()];
        place_target(TargetKind::UrlFlag, "http://scanner1.lab.internal", &mut tokens);
        assert_eq!(tokens[2], "-u");
        assert_eq!(tokens[3], "http://scanner1.lab.internal");
    }
}
