//! Content hashing and signature verification. Every trust decision in the
//! crate reduces to these two primitives; no other module hashes or
//! verifies on its own.

use std::io::Read;
use std::{fs, io, path::Path};

use base64::engine::general_purpose;
use base64::Engine as _;
use ed25519_dalek::pkcs8::DecodePublicKey;
use ed25519_dalek::{Signature, VerifyingKey};
use sha2::{Digest, Sha256};

/// Streaming SHA-256 of a file, returned as lowercase hex. The file is read
/// in fixed-size chunks and never held in memory whole.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Verify an Ed25519 signature over exactly `payload`.
///
/// The key is accepted as PKCS#8 PEM, raw base64, or raw hex; the
/// signature must be 64 bytes. Malformed keys or signatures return
/// `false` so callers can report "verification failed" distinctly from a
/// hash mismatch without handling a second error channel.
pub fn verify_signature(payload: &[u8], public_key: &str, signature: &[u8]) -> bool {
    let Some(key) = decode_public_key(public_key) else {
        return false;
    };
    let signature: [u8; 64] = match signature.try_into() {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    key.verify_strict(payload, &Signature::from_bytes(&signature))
        .is_ok()
}

/// Decode a base64 (or hex) signature field from a catalog or release.
pub fn decode_signature(value: &str) -> Option<Vec<u8>> {
    decode_field(value)
}

fn decode_public_key(value: &str) -> Option<VerifyingKey> {
    let trimmed = value.trim();
    if trimmed.contains("BEGIN PUBLIC KEY") {
        return VerifyingKey::from_public_key_pem(trimmed).ok();
    }
    let raw = decode_field(trimmed)?;
    let bytes: [u8; 32] = raw.as_slice().try_into().ok()?;
    VerifyingKey::from_bytes(&bytes).ok()
}

fn decode_field(value: &str) -> Option<Vec<u8>> {
    let normalized: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    if normalized.is_empty() {
        return None;
    }
    if let Ok(bytes) = hex::decode(&normalized) {
        return Some(bytes);
    }
    general_purpose::STANDARD.decode(normalized.as_bytes()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use ed25519_dalek::{Signer, SigningKey};
    use std::io::Write;

    fn test_keypair() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    #[test]
    fn hash_file_known_content() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"hello\n").unwrap();
        f.flush().unwrap();
        assert_eq!(
            hash_file(f.path()).unwrap(),
            "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"
        );
    }

    #[test]
    fn hash_file_matches_hash_bytes() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"some artifact bytes").unwrap();
        f.flush().unwrap();
        assert_eq!(hash_file(f.path()).unwrap(), hash_bytes(b"some artifact bytes"));
    }

    #[test]
    fn verify_signature_accepts_base64_key() {
        let signing = test_keypair();
        let payload = b"yt-dlp@2025.06.30:abcdef";
        let signature = signing.sign(payload);
        let key_b64 =
            base64::engine::general_purpose::STANDARD.encode(signing.verifying_key().as_bytes());

        assert!(verify_signature(payload, &key_b64, &signature.to_bytes()));
    }

    #[test]
    fn verify_signature_accepts_hex_key() {
        let signing = test_keypair();
        let payload = b"payload";
        let signature = signing.sign(payload);
        let key_hex = hex::encode(signing.verifying_key().as_bytes());

        assert!(verify_signature(payload, &key_hex, &signature.to_bytes()));
    }

    #[test]
    fn verify_signature_rejects_tampered_payload() {
        let signing = test_keypair();
        let signature = signing.sign(b"original");
        let key_b64 =
            base64::engine::general_purpose::STANDARD.encode(signing.verifying_key().as_bytes());

        assert!(!verify_signature(b"tampered", &key_b64, &signature.to_bytes()));
    }

    #[test]
    fn verify_signature_is_false_on_garbage_key_or_signature() {
        assert!(!verify_signature(b"payload", "not a key at all!!", &[0u8; 64]));
        assert!(!verify_signature(b"payload", &hex::encode([1u8; 32]), b"short"));
        assert!(!verify_signature(b"payload", "", &[0u8; 64]));
    }

    #[test]
    fn decode_signature_handles_base64_and_hex() {
        let bytes = [0xabu8, 0xcd, 0x01];
        let b64 = base64::engine::general_purpose::STANDARD.encode(bytes);
        assert_eq!(decode_signature(&b64).unwrap(), bytes);
        assert_eq!(decode_signature("abcd01").unwrap(), bytes);
        assert!(decode_signature("  ").is_none());
    }
}
