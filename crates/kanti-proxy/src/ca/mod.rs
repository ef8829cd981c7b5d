//! Certificate authority: a persisted self-signed root plus on-demand leaf
//! issuance for TLS interception.

mod leaf_cache;

use std::fs;
use std::path::{Path, PathBuf};

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, PKCS_RSA_SHA256, SanType,
};
use rsa::RsaPrivateKey;
use rsa::pkcs8::EncodePrivateKey;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use time::{Duration, OffsetDateTime};

const RSA_KEY_BITS: usize = 2048;

pub use leaf_cache::LeafCache;

const ROOT_CN: &str = "Kanti CA";
const ROOT_VALIDITY_YEARS: i64 = 10;
const LEAF_VALIDITY_YEARS: i64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum CaError {
    #[error("failed to read certificate authority material at {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to persist certificate authority material at {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to generate certificate: {0}")]
    Generate(#[from] rcgen::Error),
    #[error("failed to generate RSA key: {0}")]
    KeyGeneration(String),
    #[error("invalid domain name for leaf certificate: {0}")]
    InvalidDomain(String),
}

/// Generates a fresh 2048-bit RSA key pair. `rcgen` cannot generate RSA
/// keys itself (only ECDSA/Ed25519); the `rsa` crate generates the key and
/// `rcgen::KeyPair::from_pkcs8_der_and_sign_algo` adopts it for signing.
fn generate_rsa_keypair() -> Result<KeyPair, CaError> {
    let rsa_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, RSA_KEY_BITS)
        .map_err(|e| CaError::KeyGeneration(e.to_string()))?;
    let der = rsa_key
        .to_pkcs8_der()
        .map_err(|e| CaError::KeyGeneration(e.to_string()))?;
    Ok(KeyPair::from_pkcs8_der_and_sign_algo(
        &PrivatePkcs8KeyDer::from(der.as_bytes().to_vec()),
        &PKCS_RSA_SHA256,
    )?)
}

/// Root key + certificate, persisted under `<dataDir>/certificates/`.
pub struct CertificateAuthority {
    cert_path: PathBuf,
    key_path: PathBuf,
    root_cert: Certificate,
    root_key: KeyPair,
    leaf_cache: LeafCache,
}

impl CertificateAuthority {
    /// Loads the root from `dir` if present, otherwise generates and
    /// persists a fresh one. `dir` is created if missing.
    pub fn load_or_generate(dir: &Path, leaf_cache_capacity: usize) -> Result<Self, CaError> {
        fs::create_dir_all(dir).map_err(|source| CaError::Persist {
            path: dir.to_path_buf(),
            source,
        })?;
        let cert_path = dir.join("ca.crt");
        let key_path = dir.join("ca.key");

        let (cert_pem, key_pem) = if cert_path.exists() && key_path.exists() {
            let cert_pem = fs::read_to_string(&cert_path).map_err(|source| CaError::Load {
                path: cert_path.clone(),
                source,
            })?;
            let key_pem = fs::read_to_string(&key_path).map_err(|source| CaError::Load {
                path: key_path.clone(),
                source,
            })?;
            (cert_pem, key_pem)
        } else {
            let (cert_pem, key_pem) = generate_root()?;
            fs::write(&cert_path, &cert_pem).map_err(|source| CaError::Persist {
                path: cert_path.clone(),
                source,
            })?;
            write_private_key(&key_path, &key_pem)?;
            (cert_pem, key_pem)
        };

        let root_key = KeyPair::from_pem(&key_pem)?;
        // rcgen cannot deserialize a `Certificate` directly; re-deriving the
        // self-signed wrapper from the persisted params + key yields an
        // identical certificate, usable as an issuer for new leaves.
        let root_params = CertificateParams::from_ca_cert_pem(&cert_pem)?;
        let root_cert = root_params.self_signed(&root_key)?;

        Ok(Self {
            cert_path,
            key_path,
            root_cert,
            root_key,
            leaf_cache: LeafCache::new(leaf_cache_capacity),
        })
    }

    pub fn certificate_path(&self) -> &Path {
        &self.cert_path
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    pub fn root_der(&self) -> CertificateDer<'static> {
        self.root_cert.der().clone()
    }

    /// Issues (or returns a cached) leaf certificate + private key for
    /// `domain`, suitable for building a `rustls::ServerConfig`.
    pub fn issue(
        &self,
        domain: &str,
    ) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), CaError> {
        if let Some(leaf) = self.leaf_cache.get(domain) {
            return Ok(leaf);
        }
        let leaf = self.generate_leaf(domain)?;
        self.leaf_cache.insert(domain.to_string(), leaf.clone());
        Ok(leaf)
    }

    fn generate_leaf(
        &self,
        domain: &str,
    ) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), CaError> {
        let san = if let Ok(ip) = domain.parse::<std::net::IpAddr>() {
            SanType::IpAddress(ip)
        } else {
            SanType::DnsName(
                domain
                    .to_string()
                    .try_into()
                    .map_err(|_| CaError::InvalidDomain(domain.to_string()))?,
            )
        };

        let mut params = CertificateParams::default();
        params.not_before = OffsetDateTime::now_utc() - Duration::hours(1);
        params.not_after = OffsetDateTime::now_utc() + Duration::days(365 * LEAF_VALIDITY_YEARS);
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.distinguished_name = {
            let mut dn = DistinguishedName::new();
            dn.push(DnType::CommonName, domain);
            dn
        };
        params.subject_alt_names = vec![san];

        let key_pair = generate_rsa_keypair()?;
        let cert = params.signed_by(&key_pair, &self.root_cert, &self.root_key)?;

        let leaf_der = cert.der().clone();
        let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
        Ok((vec![leaf_der], key_der))
    }
}

fn generate_root() -> Result<(String, String), CaError> {
    let key_pair = generate_rsa_keypair()?;
    let mut params = CertificateParams::default();
    params.not_before = OffsetDateTime::now_utc() - Duration::hours(1);
    params.not_after = OffsetDateTime::now_utc() + Duration::days(365 * ROOT_VALIDITY_YEARS);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.distinguished_name = {
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, ROOT_CN);
        dn.push(DnType::OrganizationName, ROOT_CN);
        dn
    };

    let cert = params.self_signed(&key_pair)?;
    Ok((cert.pem(), key_pair.serialize_pem()))
}

#[cfg(unix)]
fn write_private_key(path: &Path, pem: &str) -> Result<(), CaError> {
    use std::os::unix::fs::PermissionsExt;
    fs::write(path, pem).map_err(|source| CaError::Persist {
        path: path.to_path_buf(),
        source,
    })?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|source| {
        CaError::Persist {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(not(unix))]
fn write_private_key(path: &Path, pem: &str) -> Result<(), CaError> {
    fs::write(path, pem).map_err(|source| CaError::Persist {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_and_persists_root_on_first_use() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::load_or_generate(dir.path(), 4).unwrap();
        assert!(ca.certificate_path().exists());
        assert!(ca.key_path().exists());
    }

    #[test]
    fn reloading_the_same_dir_reuses_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let first = CertificateAuthority::load_or_generate(dir.path(), 4).unwrap();
        let second = CertificateAuthority::load_or_generate(dir.path(), 4).unwrap();
        assert_eq!(first.root_der(), second.root_der());
    }

    #[test]
    fn issues_a_leaf_for_a_domain() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::load_or_generate(dir.path(), 4).unwrap();
        let (chain, _key) = ca.issue("example.com").unwrap();
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn repeated_issuance_for_the_same_domain_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::load_or_generate(dir.path(), 4).unwrap();
        let (first, _) = ca.issue("example.com").unwrap();
        let (second, _) = ca.issue("example.com").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn issues_a_leaf_for_an_ip_literal() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::load_or_generate(dir.path(), 4).unwrap();
        assert!(ca.issue("127.0.0.1").is_ok());
    }
}
