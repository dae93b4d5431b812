//! Tunnel profile document model.
//!
//! A profile is the line-oriented `[Interface]`/`[Peer]` document consumed
//! by the external WireGuard tooling (`wg-quick` and friends). The server
//! renders one per issuance; the client parses it back before applying it,
//! so both directions have to agree byte-for-byte on the format.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Default resolver pushed to clients.
pub const DEFAULT_DNS: &str = "1.1.1.1";

/// Route everything through the tunnel.
pub const DEFAULT_ALLOWED_IPS: &str = "0.0.0.0/0";

/// Keepalive interval in seconds, chosen to survive typical NAT timeouts.
pub const DEFAULT_KEEPALIVE: u32 = 25;

/// Errors raised while parsing a profile document.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// A `Key = Value` line was malformed
    #[error("malformed line in tunnel profile: {0}")]
    MalformedLine(String),

    /// A key appeared outside any section
    #[error("key outside of a section: {0}")]
    OrphanKey(String),

    /// A required field was missing
    #[error("missing field in tunnel profile: {0}")]
    MissingField(&'static str),

    /// A field failed to parse
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },
}

/// A complete tunnel configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelProfile {
    /// Client private key (base64, 32 bytes once decoded)
    pub private_key: String,

    /// Address assigned to the client, applied as a /32 host route
    pub address: Ipv4Addr,

    /// Resolver address pushed to the client
    pub dns: String,

    /// Server public key (base64)
    pub server_public_key: String,

    /// Server endpoint as `host:port`
    pub endpoint: String,

    /// Destination ranges routed through the tunnel
    pub allowed_ips: String,

    /// Persistent keepalive interval in seconds
    pub keepalive: u32,
}

impl TunnelProfile {
    /// Render the document in the exact shape the tunnel binary expects:
    /// section headers, `Key = Value` lines, one blank line between the
    /// interface and peer sections.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "[Interface]");
        let _ = writeln!(out, "PrivateKey = {}", self.private_key);
        let _ = writeln!(out, "Address = {}/32", self.address);
        let _ = writeln!(out, "DNS = {}", self.dns);
        let _ = writeln!(out);
        let _ = writeln!(out, "[Peer]");
        let _ = writeln!(out, "PublicKey = {}", self.server_public_key);
        let _ = writeln!(out, "Endpoint = {}", self.endpoint);
        let _ = writeln!(out, "AllowedIPs = {}", self.allowed_ips);
        let _ = writeln!(out, "PersistentKeepalive = {}", self.keepalive);
        out
    }

    /// Parse a rendered document back into a profile.
    ///
    /// Tolerant of leading/trailing whitespace and blank lines, strict about
    /// everything else: every non-blank line must be a section header or a
    /// `Key = Value` pair inside a known section.
    pub fn parse(text: &str) -> Result<Self, ProfileError> {
        #[derive(PartialEq)]
        enum Section {
            None,
            Interface,
            Peer,
        }

        let mut section = Section::None;
        let mut private_key = None;
        let mut address = None;
        let mut dns = None;
        let mut server_public_key = None;
        let mut endpoint = None;
        let mut allowed_ips = None;
        let mut keepalive = None;

        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            if line.eq_ignore_ascii_case("[Interface]") {
                section = Section::Interface;
                continue;
            }
            if line.eq_ignore_ascii_case("[Peer]") {
                section = Section::Peer;
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .map(|(k, v)| (k.trim(), v.trim()))
                .ok_or_else(|| ProfileError::MalformedLine(line.to_string()))?;

            if section == Section::None {
                return Err(ProfileError::OrphanKey(key.to_string()));
            }

            match (&section, key) {
                (Section::Interface, "PrivateKey") => private_key = Some(value.to_string()),
                (Section::Interface, "Address") => {
                    let host = value.strip_suffix("/32").unwrap_or(value);
                    let addr: Ipv4Addr =
                        host.parse().map_err(|e| ProfileError::InvalidValue {
                            field: "Address",
                            message: format!("{e}"),
                        })?;
                    address = Some(addr);
                }
                (Section::Interface, "DNS") => dns = Some(value.to_string()),
                (Section::Peer, "PublicKey") => server_public_key = Some(value.to_string()),
                (Section::Peer, "Endpoint") => endpoint = Some(value.to_string()),
                (Section::Peer, "AllowedIPs") => allowed_ips = Some(value.to_string()),
                (Section::Peer, "PersistentKeepalive") => {
                    let secs: u32 = value.parse().map_err(|e| ProfileError::InvalidValue {
                        field: "PersistentKeepalive",
                        message: format!("{e}"),
                    })?;
                    keepalive = Some(secs);
                }
                // Unknown keys are ignored; the tunnel binary accepts more
                // fields than we ever emit.
                _ => {}
            }
        }

        Ok(TunnelProfile {
            private_key: private_key.ok_or(ProfileError::MissingField("PrivateKey"))?,
            address: address.ok_or(ProfileError::MissingField("Address"))?,
            dns: dns.unwrap_or_else(|| DEFAULT_DNS.to_string()),
            server_public_key: server_public_key
                .ok_or(ProfileError::MissingField("PublicKey"))?,
            endpoint: endpoint.ok_or(ProfileError::MissingField("Endpoint"))?,
            allowed_ips: allowed_ips.unwrap_or_else(|| DEFAULT_ALLOWED_IPS.to_string()),
            keepalive: keepalive.unwrap_or(DEFAULT_KEEPALIVE),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TunnelProfile {
        TunnelProfile {
            private_key: "cHJpdmF0ZWtleXByaXZhdGVrZXlwcml2YXRlMDA=".to_string(),
            address: Ipv4Addr::new(10, 13, 13, 2),
            dns: DEFAULT_DNS.to_string(),
            server_public_key: "c2VydmVycHVibGlja2V5c2VydmVycHVibGljMDA=".to_string(),
            endpoint: "vpn.example.com:51820".to_string(),
            allowed_ips: DEFAULT_ALLOWED_IPS.to_string(),
            keepalive: DEFAULT_KEEPALIVE,
        }
    }

    #[test]
    fn render_matches_expected_shape() {
        let rendered = sample().render();
        let expected = "\
[Interface]
PrivateKey = cHJpdmF0ZWtleXByaXZhdGVrZXlwcml2YXRlMDA=
Address = 10.13.13.2/32
DNS = 1.1.1.1

[Peer]
PublicKey = c2VydmVycHVibGlja2V5c2VydmVycHVibGljMDA=
Endpoint = vpn.example.com:51820
AllowedIPs = 0.0.0.0/0
PersistentKeepalive = 25
";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn round_trip_preserves_fields() {
        let profile = sample();
        let parsed = TunnelProfile::parse(&profile.render()).unwrap();
        assert_eq!(parsed, profile);
        assert_eq!(parsed.allowed_ips, "0.0.0.0/0");
    }

    #[test]
    fn parse_rejects_missing_private_key() {
        let text = "[Interface]\nAddress = 10.13.13.2/32\n\n[Peer]\nPublicKey = x\nEndpoint = h:1\n";
        let err = TunnelProfile::parse(text).unwrap_err();
        assert!(matches!(err, ProfileError::MissingField("PrivateKey")));
    }

    #[test]
    fn parse_rejects_key_outside_section() {
        let err = TunnelProfile::parse("PrivateKey = abc\n").unwrap_err();
        assert!(matches!(err, ProfileError::OrphanKey(_)));
    }

    #[test]
    fn parse_rejects_garbage_line() {
        let err = TunnelProfile::parse("[Interface]\nnot a key value line\n").unwrap_err();
        assert!(matches!(err, ProfileError::MalformedLine(_)));
    }
}
