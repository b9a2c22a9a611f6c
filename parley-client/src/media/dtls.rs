//! Per-session DTLS identity
//!
//! Each session generates a fresh self-signed certificate. Its SHA-256
//! fingerprint is what transports hand to the server when they connect.

use parley_common::media::{
    DTLS_FINGERPRINT_ALGORITHM, DtlsFingerprint, DtlsParameters, DtlsRole,
};
use rcgen::{CertificateParams, KeyPair};
use sha2::{Digest, Sha256};

use crate::constants::DTLS_CERT_COMMON_NAME;

/// Self-signed certificate and key for one session
pub struct DtlsIdentity {
    cert_pem: String,
    key_pem: String,
    fingerprint: String,
}

impl DtlsIdentity {
    /// Generate a fresh key pair and self-signed certificate
    ///
    /// # Errors
    ///
    /// Returns a message if key generation or signing fails.
    pub fn generate() -> Result<Self, String> {
        let key_pair = KeyPair::generate().map_err(|e| format!("key generation failed: {e}"))?;

        let mut params = CertificateParams::new(vec![])
            .map_err(|e| format!("certificate parameters rejected: {e}"))?;
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, DTLS_CERT_COMMON_NAME);

        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| format!("certificate signing failed: {e}"))?;

        Ok(Self {
            cert_pem: cert.pem(),
            key_pem: key_pair.serialize_pem(),
            fingerprint: fingerprint(cert.der()),
        })
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }

    /// Colon-separated upper-case SHA-256 fingerprint of the certificate
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Network parameters a transport forwards when it connects
    pub fn dtls_parameters(&self, role: DtlsRole) -> DtlsParameters {
        DtlsParameters {
            role,
            fingerprints: vec![DtlsFingerprint {
                algorithm: DTLS_FINGERPRINT_ALGORITHM.to_string(),
                value: self.fingerprint.clone(),
            }],
        }
    }
}

impl std::fmt::Debug for DtlsIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DtlsIdentity")
            .field("fingerprint", &self.fingerprint)
            .field("key_pem", &"[REDACTED]")
            .finish()
    }
}

/// Format a SHA-256 digest as colon-separated upper-case hex
fn fingerprint(der: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(der);
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_format() {
        let value = fingerprint(b"parley");
        let parts: Vec<&str> = value.split(':').collect();
        assert_eq!(parts.len(), 32);
        assert!(parts.iter().all(|p| p.len() == 2));
        assert_eq!(value, value.to_uppercase());
    }

    #[test]
    fn test_generate_identity() {
        let identity = DtlsIdentity::generate().unwrap();
        assert!(identity.cert_pem().starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(identity.key_pem().contains("PRIVATE KEY"));

        let params = identity.dtls_parameters(DtlsRole::Client);
        assert_eq!(params.role, DtlsRole::Client);
        assert_eq!(params.fingerprints[0].algorithm, "sha-256");
        assert_eq!(params.fingerprints[0].value, identity.fingerprint());
    }

    #[test]
    fn test_identities_are_unique() {
        let a = DtlsIdentity::generate().unwrap();
        let b = DtlsIdentity::generate().unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_debug_redacts_key() {
        let identity = DtlsIdentity::generate().unwrap();
        let debug = format!("{identity:?}");
        assert!(!debug.contains("PRIVATE KEY"));
    }
}
