use std::fs::File;
use std::io::Read;
use std::path::Path;

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use crate::error::{HermetoError, Result};

const CHUNK_SIZE: usize = 10 * 1024;
const KNOWN_ALGORITHMS: &[&str] = &["md5", "sha1", "sha256", "sha512"];

/// A cryptographic algorithm and a hex-encoded checksum computed by it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChecksumInfo {
    pub algorithm: String,
    pub hexdigest: String,
}

impl ChecksumInfo {
    pub fn new(algorithm: impl Into<String>, hexdigest: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            hexdigest: hexdigest.into(),
        }
    }

    /// Parse a `algorithm:hexdigest` specifier, the form used in lockfiles
    /// across every ecosystem this tool supports.
    pub fn parse_specifier(specifier: &str) -> Result<Self> {
        match specifier.split_once(':') {
            Some((algo, hex)) if !algo.is_empty() && !hex.is_empty() => {
                Ok(Self::new(algo, hex.to_ascii_lowercase()))
            }
            _ => Err(HermetoError::package_rejected(
                format!("Not a valid hash specifier: '{specifier}' (expected 'algorithm:digest')"),
                None,
            )),
        }
    }
}

enum Hasher {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Hasher {
    fn new(algorithm: &str) -> Option<Self> {
        match algorithm.to_ascii_lowercase().as_str() {
            "md5" => Some(Self::Md5(Md5::new())),
            "sha1" => Some(Self::Sha1(Sha1::new())),
            "sha256" => Some(Self::Sha256(Sha256::new())),
            "sha512" => Some(Self::Sha512(Sha512::new())),
            _ => None,
        }
    }

    fn update(&mut self, chunk: &[u8]) {
        match self {
            Self::Md5(h) => h.update(chunk),
            Self::Sha1(h) => h.update(chunk),
            Self::Sha256(h) => h.update(chunk),
            Self::Sha512(h) => h.update(chunk),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Self::Md5(h) => hex_encode(&h.finalize()),
            Self::Sha1(h) => hex_encode(&h.finalize()),
            Self::Sha256(h) => hex_encode(&h.finalize()),
            Self::Sha512(h) => hex_encode(&h.finalize()),
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Stream `path` in bounded chunks, compute the named hash, and compare to
/// `checksum_info.hexdigest`. Fails with `PackageRejected` on mismatch or
/// unknown algorithm.
pub fn verify(path: &Path, checksum_info: &ChecksumInfo) -> Result<()> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    let mut hasher = Hasher::new(&checksum_info.algorithm).ok_or_else(|| {
        HermetoError::package_rejected(
            format!(
                "Cannot perform checksum on the file {filename}, unknown algorithm: {}. Known: {}",
                checksum_info.algorithm,
                KNOWN_ALGORITHMS.join(", ")
            ),
            Some("Please use one of the known hash algorithms.".to_string()),
        )
    })?;

    let mut file = File::open(path)
        .map_err(|e| HermetoError::package_rejected(format!("cannot open {filename}: {e}"), None))?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| HermetoError::package_rejected(format!("cannot read {filename}: {e}"), None))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    let computed = hasher.finalize_hex();
    if computed != checksum_info.hexdigest.to_ascii_lowercase() {
        return Err(HermetoError::package_rejected(
            format!(
                "The file {filename} has an unexpected checksum value, expected {} but computed {computed}",
                checksum_info.hexdigest
            ),
            Some(
                "Please verify that the specified hash is correct.\n\
                 Caution is advised; if the hash was previously correct, it means the content has changed!"
                    .to_string(),
            ),
        ));
    }

    Ok(())
}

/// Succeed iff `path` matches at least one of the declared checksums. An
/// empty list is a caller-side error.
pub fn must_match_any(path: &Path, checksums: &[ChecksumInfo]) -> Result<()> {
    if checksums.is_empty() {
        return Err(HermetoError::invalid_input(
            "must_match_any called with no checksums to verify against",
        ));
    }

    let mut last_err = None;
    for checksum in checksums {
        match verify(path, checksum) {
            Ok(()) => return Ok(()),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.expect("checksums is non-empty"))
}
