// ── Known hosts trust store ──────────────────────────────────────────────────
//
// OpenSSH `known_hosts` format:
//   [@revoked|@cert-authority] <patterns> <key-type> <base64-key> [comment]
// where <patterns> is a comma-separated host list (`*`/`?` wildcards,
// `!` negation, `[host]:port` for non-standard ports) or a single
// `|1|salt|hmac` token.

use base64::{engine::general_purpose::STANDARD, Engine};
use glob::Pattern;
use hmac::{Hmac, Mac};
use log::{debug, info, warn};
use rscp_core::AuthError;
use sha1::Sha1;
use ssh_key::{HashAlg, PublicKey};
use std::path::Path;

type HmacSha1 = Hmac<Sha1>;

const HASHED_MARKER: &str = "|1|";
const DEFAULT_SSH_PORT: u16 = 22;

// ── Host patterns ────────────────────────────────────────────────────────────

/// One name from a comma-separated host list. `!name` negates.
#[derive(Debug, Clone)]
struct NamePattern {
    negated: bool,
    glob: Pattern,
}

impl NamePattern {
    fn parse(raw: &str) -> Option<Self> {
        let (negated, name) = match raw.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        if name.is_empty() {
            return None;
        }
        // Only `*` and `?` are wildcards in known_hosts; brackets are literal.
        let mut escaped = String::with_capacity(name.len());
        for c in name.to_ascii_lowercase().chars() {
            match c {
                '[' => escaped.push_str("[[]"),
                ']' => escaped.push_str("[]]"),
                c => escaped.push(c),
            }
        }
        let glob = Pattern::new(&escaped).ok()?;
        Some(NamePattern { negated, glob })
    }
}

#[derive(Debug, Clone)]
enum HostPattern {
    Plain(Vec<NamePattern>),
    Hashed { salt: Vec<u8>, digest: Vec<u8> },
}

impl HostPattern {
    fn parse(field: &str) -> Option<Self> {
        if let Some(rest) = field.strip_prefix(HASHED_MARKER) {
            let (salt, digest) = rest.split_once('|')?;
            return Some(HostPattern::Hashed {
                salt: STANDARD.decode(salt).ok()?,
                digest: STANDARD.decode(digest).ok()?,
            });
        }
        let names = field
            .split(',')
            .filter(|n| !n.is_empty())
            .map(NamePattern::parse)
            .collect::<Option<Vec<_>>>()?;
        if names.is_empty() {
            None
        } else {
            Some(HostPattern::Plain(names))
        }
    }

    /// A matching negated name vetoes the whole list.
    fn matches(&self, name: &str) -> bool {
        match self {
            HostPattern::Plain(names) => {
                let name = name.to_ascii_lowercase();
                let mut positive = false;
                for pattern in names {
                    if pattern.glob.matches(&name) {
                        if pattern.negated {
                            return false;
                        }
                        positive = true;
                    }
                }
                positive
            }
            HostPattern::Hashed { salt, digest } => {
                let mut mac = match HmacSha1::new_from_slice(salt) {
                    Ok(m) => m,
                    Err(_) => return false,
                };
                mac.update(name.as_bytes());
                mac.verify_slice(digest).is_ok()
            }
        }
    }
}

// ── Trust store ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct TrustEntry {
    pattern: HostPattern,
    key: PublicKey,
}

/// Parsed `known_hosts`, split by marker. Immutable after load.
#[derive(Debug, Clone, Default)]
pub struct TrustStore {
    known: Vec<TrustEntry>,
    revoked: Vec<TrustEntry>,
    cert_authorities: Vec<TrustEntry>,
}

impl TrustStore {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load from disk. A missing file is an empty store, so every host is
    /// unknown.
    pub fn load(path: &Path) -> Result<Self, AuthError> {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let store = Self::parse(&text);
                debug!(
                    "loaded {} known, {} revoked, {} CA entries from '{}'",
                    store.known.len(),
                    store.revoked.len(),
                    store.cert_authorities.len(),
                    path.display()
                );
                Ok(store)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("known hosts file '{}' not found", path.display());
                Ok(Self::empty())
            }
            Err(e) => Err(AuthError::KeyFile {
                path: path.display().to_string(),
                source: e,
            }),
        }
    }

    pub fn parse(text: &str) -> Self {
        let mut store = Self::empty();

        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (marker, rest) = match line.strip_prefix('@') {
                Some(marked) => match marked.split_once(char::is_whitespace) {
                    Some((m, rest)) => (Some(m), rest.trim_start()),
                    None => {
                        debug!("known_hosts line {}: marker without entry", idx + 1);
                        continue;
                    }
                },
                None => (None, line),
            };

            let entry = match parse_entry(rest) {
                Some(e) => e,
                None => {
                    debug!("known_hosts line {}: malformed entry, skipping", idx + 1);
                    continue;
                }
            };

            match marker {
                None => store.known.push(entry),
                Some("revoked") => store.revoked.push(entry),
                Some("cert-authority") => {
                    info!(
                        "known_hosts line {}: @cert-authority entries are not used for verification",
                        idx + 1
                    );
                    store.cert_authorities.push(entry);
                }
                Some(other) => {
                    debug!("known_hosts line {}: unknown marker @{}", idx + 1, other);
                }
            }
        }

        store
    }

    pub fn known_count(&self) -> usize {
        self.known.len()
    }

    pub fn revoked_count(&self) -> usize {
        self.revoked.len()
    }

    pub fn cert_authority_count(&self) -> usize {
        self.cert_authorities.len()
    }

    /// Verify `offered` for `host` (and `[host]:port` when the port is not 22).
    pub fn verify(&self, host: &str, port: u16, offered: &PublicKey) -> Result<(), AuthError> {
        let mut names = Vec::with_capacity(2);
        if port != DEFAULT_SSH_PORT {
            names.push(format!("[{}]:{}", host, port));
        }
        names.push(host.to_string());

        let revoked = self.revoked.iter().any(|e| {
            e.key.key_data() == offered.key_data() && names.iter().any(|n| e.pattern.matches(n))
        });
        if revoked {
            warn!("host key for '{}' is marked @revoked", host);
            return Err(AuthError::HostKeyRevoked(host.to_string()));
        }

        for name in &names {
            let mut seen = false;
            for entry in self.known.iter().filter(|e| e.pattern.matches(name)) {
                seen = true;
                if entry.key.key_data() == offered.key_data() {
                    debug!(
                        "host '{}' matched known key {}",
                        name,
                        offered.fingerprint(HashAlg::Sha256)
                    );
                    return Ok(());
                }
            }
            if seen {
                warn!(
                    "host key for '{}' changed; offered {}",
                    name,
                    offered.fingerprint(HashAlg::Sha256)
                );
                return Err(AuthError::HostKeyMismatch { host: name.clone() });
            }
        }

        Err(AuthError::HostUnknown(host.to_string()))
    }
}

fn parse_entry(rest: &str) -> Option<TrustEntry> {
    let mut fields = rest.split_whitespace();
    let pattern = HostPattern::parse(fields.next()?)?;
    let key_type = fields.next()?;
    let key_b64 = fields.next()?;
    let key = PublicKey::from_openssh(&format!("{} {}", key_type, key_b64)).ok()?;
    Some(TrustEntry { pattern, key })
}

// ── Host key check policies ──────────────────────────────────────────────────

/// Callback used by the transport during key exchange. `offered_key` is the
/// SSH wire encoding of the server's host key.
pub trait HostKeyCheck: Send + Sync {
    fn check(&self, remote_addr: &str, offered_key: &[u8]) -> Result<(), AuthError>;
}

/// Fail-closed verifier over a `TrustStore`: unknown hosts are rejected,
/// never appended.
#[derive(Debug, Clone)]
pub struct KnownHostsVerifier {
    store: TrustStore,
}

impl KnownHostsVerifier {
    pub fn new(store: TrustStore) -> Self {
        KnownHostsVerifier { store }
    }

    pub fn from_file(path: &Path) -> Result<Self, AuthError> {
        Ok(Self::new(TrustStore::load(path)?))
    }

    pub fn store(&self) -> &TrustStore {
        &self.store
    }
}

impl HostKeyCheck for KnownHostsVerifier {
    fn check(&self, remote_addr: &str, offered_key: &[u8]) -> Result<(), AuthError> {
        let (host, port) = split_host_port(remote_addr);
        let offered = PublicKey::from_bytes(offered_key)
            .map_err(|e| AuthError::InvalidHostKey(e.to_string()))?;
        self.store.verify(host, port, &offered)
    }
}

/// Accepts every host key. Only for explicitly disabled host checking.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAnyHostKey;

impl HostKeyCheck for AcceptAnyHostKey {
    fn check(&self, remote_addr: &str, _offered_key: &[u8]) -> Result<(), AuthError> {
        debug!("accepting host key for '{}' without verification", remote_addr);
        Ok(())
    }
}

/// `host:port`, `[v6]:port`, bare `host` or bare IPv6 literal.
fn split_host_port(addr: &str) -> (&str, u16) {
    if let Some(rest) = addr.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            let port = tail
                .strip_prefix(':')
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_SSH_PORT);
            return (host, port);
        }
    }
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => match port.parse() {
            Ok(port) => (host, port),
            Err(_) => (addr, DEFAULT_SSH_PORT),
        },
        _ => (addr, DEFAULT_SSH_PORT),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ssh_key::rand_core::OsRng;
    use ssh_key::{Algorithm, PrivateKey};

    fn random_key() -> PublicKey {
        PrivateKey::random(&mut OsRng, Algorithm::Ed25519)
            .unwrap()
            .public_key()
            .clone()
    }

    fn line(pattern: &str, key: &PublicKey) -> String {
        format!("{} {}", pattern, key.to_openssh().unwrap())
    }

    #[test]
    fn test_known_host_matches() {
        let key = random_key();
        let store = TrustStore::parse(&line("example.com", &key));
        let verifier = KnownHostsVerifier::new(store);
        verifier
            .check("example.com:22", &key.to_bytes().unwrap())
            .unwrap();
    }

    #[test]
    fn test_different_key_is_mismatch() {
        let key = random_key();
        let other = random_key();
        let verifier = KnownHostsVerifier::new(TrustStore::parse(&line("example.com", &key)));
        let err = verifier
            .check("example.com:22", &other.to_bytes().unwrap())
            .unwrap_err();
        assert!(matches!(err, AuthError::HostKeyMismatch { .. }));
    }

    #[test]
    fn test_unknown_host() {
        let key = random_key();
        let verifier = KnownHostsVerifier::new(TrustStore::parse(&line("example.com", &key)));
        let err = verifier
            .check("unknown.example:22", &key.to_bytes().unwrap())
            .unwrap_err();
        assert!(matches!(err, AuthError::HostUnknown(h) if h == "unknown.example"));
    }

    #[test]
    fn test_hashed_host_vector() {
        let pattern =
            HostPattern::parse("|1|NcRR/Ygr6aS/eCU01dPoQAP8F60=|8Cip+TT/Inx8zpljsGyypTSMy6A=")
                .unwrap();
        assert!(pattern.matches("192.168.3.99"));
        assert!(!pattern.matches("192.168.3.98"));
    }

    #[test]
    fn test_hashed_entry_verifies() {
        let key = random_key();
        let text = line(
            "|1|NcRR/Ygr6aS/eCU01dPoQAP8F60=|8Cip+TT/Inx8zpljsGyypTSMy6A=",
            &key,
        );
        let verifier = KnownHostsVerifier::new(TrustStore::parse(&text));
        let blob = key.to_bytes().unwrap();
        verifier.check("192.168.3.99:22", &blob).unwrap();
        assert!(matches!(
            verifier.check("192.168.3.100:22", &blob),
            Err(AuthError::HostUnknown(_))
        ));
    }

    #[test]
    fn test_comma_list_and_case() {
        let key = random_key();
        let verifier = KnownHostsVerifier::new(TrustStore::parse(&line(
            "alpha.example,Beta.Example,10.0.0.7",
            &key,
        )));
        let blob = key.to_bytes().unwrap();
        verifier.check("beta.example:22", &blob).unwrap();
        verifier.check("10.0.0.7", &blob).unwrap();
    }

    #[test]
    fn test_non_default_port_uses_bracket_form() {
        let key = random_key();
        let verifier =
            KnownHostsVerifier::new(TrustStore::parse(&line("[example.com]:2222", &key)));
        let blob = key.to_bytes().unwrap();
        verifier.check("example.com:2222", &blob).unwrap();
        assert!(matches!(
            verifier.check("example.com:22", &blob),
            Err(AuthError::HostUnknown(_))
        ));
    }

    #[test]
    fn test_any_matching_entry_accepts() {
        let old = random_key();
        let new = random_key();
        let text = format!("{}\n{}\n", line("example.com", &old), line("example.com", &new));
        let verifier = KnownHostsVerifier::new(TrustStore::parse(&text));
        verifier
            .check("example.com:22", &new.to_bytes().unwrap())
            .unwrap();
    }

    #[test]
    fn test_revoked_rejects_before_known() {
        let key = random_key();
        let text = format!(
            "{}\n@revoked {}\n",
            line("example.com", &key),
            line("*", &key)
        );
        let store = TrustStore::parse(&text);
        assert_eq!(store.revoked_count(), 1);
        let err = KnownHostsVerifier::new(store)
            .check("example.com:22", &key.to_bytes().unwrap())
            .unwrap_err();
        assert!(matches!(err, AuthError::HostKeyRevoked(_)));
    }

    #[test]
    fn test_cert_authority_never_authorizes() {
        let key = random_key();
        let store = TrustStore::parse(&format!("@cert-authority {}", line("*.example.com", &key)));
        assert_eq!(store.cert_authority_count(), 1);
        assert_eq!(store.known_count(), 0);
        let err = KnownHostsVerifier::new(store)
            .check("host.example.com:22", &key.to_bytes().unwrap())
            .unwrap_err();
        assert!(matches!(err, AuthError::HostUnknown(_)));
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let key = random_key();
        let text = format!(
            "# comment\n\ngarbage\nexample.org ssh-ed25519 !!!notbase64\n{}\n",
            line("example.com", &key)
        );
        let store = TrustStore::parse(&text);
        assert_eq!(store.known_count(), 1);
    }

    #[test]
    fn test_invalid_offered_key() {
        let verifier = KnownHostsVerifier::new(TrustStore::empty());
        let err = verifier.check("example.com:22", &[0, 0, 0, 7, 1]).unwrap_err();
        assert!(matches!(err, AuthError::InvalidHostKey(_)));
    }

    #[test]
    fn test_missing_file_is_empty_store() {
        let store = TrustStore::load(Path::new("/nonexistent/rscp/known_hosts")).unwrap();
        assert_eq!(store.known_count(), 0);
    }

    #[test]
    fn test_accept_any() {
        AcceptAnyHostKey.check("anything:22", &[]).unwrap();
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("example.com:2222"), ("example.com", 2222));
        assert_eq!(split_host_port("example.com"), ("example.com", 22));
        assert_eq!(split_host_port("[::1]:2200"), ("::1", 2200));
        assert_eq!(split_host_port("fe80::1"), ("fe80::1", 22));
    }

    #[test]
    fn test_wildcards() {
        let pattern = HostPattern::parse("*.example.com,host?").unwrap();
        assert!(pattern.matches("a.example.com"));
        assert!(pattern.matches("host7"));
        assert!(!pattern.matches("example.org"));
        assert!(HostPattern::parse("*").unwrap().matches("anything"));
    }

    #[test]
    fn test_brackets_are_literal() {
        let pattern = HostPattern::parse("[example.com]:2222").unwrap();
        assert!(pattern.matches("[example.com]:2222"));
        assert!(!pattern.matches("e:2222"));
    }

    #[test]
    fn test_negated_name_vetoes_wildcard() {
        let key = random_key();
        let verifier = KnownHostsVerifier::new(TrustStore::parse(&line(
            "!bad.example.com,*.example.com",
            &key,
        )));
        let blob = key.to_bytes().unwrap();
        verifier.check("good.example.com:22", &blob).unwrap();
        assert!(matches!(
            verifier.check("bad.example.com:22", &blob),
            Err(AuthError::HostUnknown(_))
        ));
    }

    #[test]
    fn test_only_negated_names_match_nothing() {
        let pattern = HostPattern::parse("!bad.example.com").unwrap();
        assert!(!pattern.matches("bad.example.com"));
        assert!(!pattern.matches("good.example.com"));
    }
}
