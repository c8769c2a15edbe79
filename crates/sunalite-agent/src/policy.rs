//! Static allow/deny policies applied before a tool touches the outside world.
//!
//! - [`CommandPolicy`] classifies shell command strings.
//! - [`DomainPolicy`] decides which hosts the network tools may reach.
//!
//! Both are built once per session from configuration and shared read-only
//! (`Arc`) across concurrent tool calls.
//!
//! The command filter matches substrings of the lower-cased command. It is a
//! best-effort screen against obviously destructive or smuggled commands,
//! not a sandbox: quoting, variables, and aliases can evade it.

use sunalite_core::config::schema::SecurityConfig;
use thiserror::Error;
use url::Url;

/// Destructive invocations denied regardless of configuration.
pub const BUILTIN_DENY_LITERALS: &[&str] = &[
    "rm -rf /",
    "sudo rm -rf /",
    "mkfs",
    "dd if=",
    "shutdown",
    "reboot",
    "halt",
    "poweroff",
    ":(){ :|:& };:",
    "chmod -r 777 /",
    "chown -r root:root /",
    "mv / /dev/null",
    "> /dev/sda",
    "nc -l -p",
    "ncat -l -p",
    "socat tcp-listen",
    "userdel -r",
    "format c:",
    "del /f /s /q",
    "diskpart",
    "bcdedit",
    "reg delete",
];

/// Operators that chain, pipe, redirect, or substitute commands.
///
/// Multi-character operators come first so the reported marker is the most
/// specific one.
pub const SHELL_MARKERS: &[&str] = &[
    "&&", "||", ">>", "$(", "|", ">", "<", "&", ";", "`", "\n", "\r",
];

// ─────────────────────────────────────────────
// Violations
// ─────────────────────────────────────────────

/// Which rule rejected a command or URL.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    #[error("command denied: empty command")]
    EmptyCommand,

    #[error("command denied: matches blocked pattern '{0}'")]
    DeniedLiteral(String),

    #[error("command denied: shell operator '{}' is not allowed", .0.escape_debug())]
    Metacharacter(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("network access is disabled by security.allowNetwork")]
    NetworkDisabled,

    #[error("domain not allowed: '{host}' is not in security.allowedDomains")]
    DomainNotAllowed { host: String },
}

// ─────────────────────────────────────────────
// CommandPolicy
// ─────────────────────────────────────────────

/// Deny-list plus structural metacharacter filter for shell commands.
#[derive(Clone, Debug)]
pub struct CommandPolicy {
    /// Lower-cased deny literals, configured ones first.
    deny_literals: Vec<String>,
}

impl CommandPolicy {
    /// Built-in literals merged with `extra`.
    pub fn new<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut deny_literals: Vec<String> = Vec::new();
        let configured = extra.into_iter().map(|s| s.as_ref().trim().to_lowercase());
        let builtin = BUILTIN_DENY_LITERALS.iter().map(|s| s.to_string());
        for literal in configured.chain(builtin) {
            if !literal.is_empty() && !deny_literals.contains(&literal) {
                deny_literals.push(literal);
            }
        }
        Self { deny_literals }
    }

    pub fn from_config(security: &SecurityConfig) -> Self {
        Self::new(&security.block_shell_commands)
    }

    pub fn deny_literals(&self) -> &[String] {
        &self.deny_literals
    }

    /// Classify `command`, naming the rule that rejected it.
    pub fn check(&self, command: &str) -> Result<(), PolicyViolation> {
        let lower = command.trim().to_lowercase();
        if lower.is_empty() {
            return Err(PolicyViolation::EmptyCommand);
        }

        if let Some(literal) = self.deny_literals.iter().find(|l| lower.contains(l.as_str())) {
            return Err(PolicyViolation::DeniedLiteral(literal.clone()));
        }

        if let Some(marker) = SHELL_MARKERS.iter().find(|m| lower.contains(*m)) {
            return Err(PolicyViolation::Metacharacter(marker.to_string()));
        }

        Ok(())
    }

    pub fn is_allowed(&self, command: &str) -> bool {
        self.check(command).is_ok()
    }
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self::new(std::iter::empty::<&str>())
    }
}

// ─────────────────────────────────────────────
// DomainPolicy
// ─────────────────────────────────────────────

/// Network gate for fetch, search, and browser tools.
#[derive(Clone, Debug)]
pub struct DomainPolicy {
    allow_network: bool,
    /// Lower-cased hosts; empty allows every host.
    allowed_domains: Vec<String>,
}

impl DomainPolicy {
    pub fn new<I, S>(allow_network: bool, allowed_domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed_domains = allowed_domains
            .into_iter()
            .map(|d| d.as_ref().trim().trim_start_matches("*.").trim_end_matches('.').to_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        Self {
            allow_network,
            allowed_domains,
        }
    }

    pub fn from_config(security: &SecurityConfig) -> Self {
        Self::new(security.allow_network, &security.allowed_domains)
    }

    /// Allow every host.
    pub fn open() -> Self {
        Self::new(true, std::iter::empty::<&str>())
    }

    pub fn network_enabled(&self) -> Result<(), PolicyViolation> {
        if self.allow_network {
            Ok(())
        } else {
            Err(PolicyViolation::NetworkDisabled)
        }
    }

    /// Whether `host` equals an allowed domain or is a subdomain of one.
    pub fn host_allowed(&self, host: &str) -> bool {
        if !self.allow_network {
            return false;
        }
        if self.allowed_domains.is_empty() {
            return true;
        }
        let host = host.trim_end_matches('.').to_lowercase();
        self.allowed_domains.iter().any(|d| {
            host == *d
                || host
                    .strip_suffix(d.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }

    /// Parse `raw` and check scheme and host.
    pub fn check_url(&self, raw: &str) -> Result<Url, PolicyViolation> {
        self.network_enabled()?;
        let url = Url::parse(raw.trim()).map_err(|e| PolicyViolation::InvalidUrl(format!("{raw}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(PolicyViolation::InvalidUrl(format!(
                "{raw}: only http and https are supported"
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| PolicyViolation::InvalidUrl(format!("{raw}: missing host")))?;
        if !self.host_allowed(host) {
            return Err(PolicyViolation::DomainNotAllowed {
                host: host.to_string(),
            });
        }
        Ok(url)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_commands_allowed() {
        let policy = CommandPolicy::default();
        assert!(policy.is_allowed("ls -la"));
        assert!(policy.is_allowed("echo hello"));
        assert!(policy.is_allowed("python3 script.py --verbose"));
    }

    #[test]
    fn test_builtin_literal_denied_any_case() {
        let policy = CommandPolicy::default();
        for cmd in ["rm -rf /", "RM -RF /", "Rm -Rf /tmp", "sudo MKFS.ext4 /dev/sdb", "shutdown -h now"] {
            assert!(
                matches!(policy.check(cmd), Err(PolicyViolation::DeniedLiteral(_))),
                "expected deny for {cmd}"
            );
        }
    }

    #[test]
    fn test_configured_literal_denied() {
        let policy = CommandPolicy::new(["curl"]);
        assert_eq!(
            policy.check("CURL http://x"),
            Err(PolicyViolation::DeniedLiteral("curl".into()))
        );
    }

    #[test]
    fn test_configured_literals_deduplicated() {
        let policy = CommandPolicy::new(["MKFS", "", "mkfs"]);
        let count = policy.deny_literals().iter().filter(|l| *l == "mkfs").count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_metacharacters_denied() {
        let policy = CommandPolicy::default();
        let cases = [
            ("echo a && echo b", "&&"),
            ("false || true", "||"),
            ("cat x | grep y", "|"),
            ("echo hi > out.txt", ">"),
            ("echo hi >> out.txt", ">>"),
            ("sleep 10 &", "&"),
            ("echo a; echo b", ";"),
            ("echo `id`", "`"),
            ("echo $(id)", "$("),
            ("wc -l < file", "<"),
            ("echo a\necho b", "\n"),
        ];
        for (cmd, marker) in cases {
            assert_eq!(
                policy.check(cmd),
                Err(PolicyViolation::Metacharacter(marker.to_string())),
                "command {cmd:?}"
            );
        }
    }

    #[test]
    fn test_empty_command_denied() {
        let policy = CommandPolicy::default();
        assert_eq!(policy.check("   "), Err(PolicyViolation::EmptyCommand));
    }

    #[test]
    fn test_from_config_uses_block_list() {
        let security = SecurityConfig::default();
        let policy = CommandPolicy::from_config(&security);
        assert!(!policy.is_allowed("rm -rf build"));
        assert!(policy.deny_literals().len() > BUILTIN_DENY_LITERALS.len());
    }

    #[test]
    fn test_violation_message_names_rule() {
        let msg = PolicyViolation::DeniedLiteral("mkfs".into()).to_string();
        assert!(msg.contains("mkfs"));
        let msg = PolicyViolation::Metacharacter("\n".into()).to_string();
        assert!(msg.contains("\\n"));
    }

    // ── DomainPolicy ──

    #[test]
    fn test_empty_allow_list_allows_all() {
        let policy = DomainPolicy::open();
        assert!(policy.check_url("https://example.com/page").is_ok());
    }

    #[test]
    fn test_subdomains_allowed() {
        let policy = DomainPolicy::new(true, ["example.com"]);
        assert!(policy.host_allowed("example.com"));
        assert!(policy.host_allowed("docs.Example.com"));
        assert!(!policy.host_allowed("badexample.com"));
        assert!(!policy.host_allowed("example.com.evil.net"));
    }

    #[test]
    fn test_disallowed_host() {
        let policy = DomainPolicy::new(true, ["rust-lang.org"]);
        assert_eq!(
            policy.check_url("https://evil.test/x").unwrap_err(),
            PolicyViolation::DomainNotAllowed {
                host: "evil.test".into()
            }
        );
    }

    #[test]
    fn test_network_disabled() {
        let policy = DomainPolicy::new(false, std::iter::empty::<&str>());
        assert_eq!(
            policy.check_url("https://example.com").unwrap_err(),
            PolicyViolation::NetworkDisabled
        );
        assert!(!policy.host_allowed("example.com"));
    }

    #[test]
    fn test_bad_scheme_and_garbage() {
        let policy = DomainPolicy::open();
        assert!(matches!(policy.check_url("file:///etc/passwd"), Err(PolicyViolation::InvalidUrl(_))));
        assert!(matches!(policy.check_url("not a url"), Err(PolicyViolation::InvalidUrl(_))));
    }
}
