//! HMAC request signing and nonces for CEX REST APIs

use hmac::{Hmac, Mac};
use sha2::{Sha384, Sha512};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Hash function behind the HMAC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Digest {
    /// Bitfinex
    Sha384,
    /// Bittrex
    Sha512,
}

/// API key plus HMAC secret
#[derive(Clone)]
pub struct HmacSigner {
    api_key: String,
    api_secret: String,
    digest: Digest,
}

impl HmacSigner {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>, digest: Digest) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            digest,
        }
    }

    /// Lower-case hex HMAC of `message`
    pub fn sign(&self, message: &[u8]) -> String {
        match self.digest {
            Digest::Sha384 => {
                let mut mac = Hmac::<Sha384>::new_from_slice(self.api_secret.as_bytes())
                    .expect("HMAC can take key of any size");
                mac.update(message);
                hex::encode(mac.finalize().into_bytes())
            }
            Digest::Sha512 => {
                let mut mac = Hmac::<Sha512>::new_from_slice(self.api_secret.as_bytes())
                    .expect("HMAC can take key of any size");
                mac.update(message);
                hex::encode(mac.finalize().into_bytes())
            }
        }
    }

    pub fn key_id(&self) -> &str {
        &self.api_key
    }
}

impl std::fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSigner")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("digest", &self.digest)
            .finish()
    }
}

/// Last nonce handed out by any `Nonce` in this process
static LAST: AtomicU64 = AtomicU64::new(0);

/// Microseconds since the epoch, strictly increasing across the whole process.
/// Every instance draws from the same counter.
#[derive(Debug, Default)]
pub struct Nonce;

impl Nonce {
    pub fn new() -> Self {
        Self
    }

    pub fn next(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);

        let prev = LAST
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        now.max(prev + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 4231 test case 2
    const KEY: &str = "Jefe";
    const DATA: &[u8] = b"what do ya want for nothing?";

    #[test]
    fn test_hmac_sha384() {
        let signer = HmacSigner::new("key", KEY, Digest::Sha384);
        assert_eq!(
            signer.sign(DATA),
            "af45d2e376484031617f78d2b58a6b1b9c7ef464f5a01b47e42ec3736322445e\
             8e2240ca5e69e2c78b3239ecfab21649"
        );
    }

    #[test]
    fn test_hmac_sha512() {
        let signer = HmacSigner::new("key", KEY, Digest::Sha512);
        assert_eq!(
            signer.sign(DATA),
            "164b7a7bfcf819e2e395fbe73b56e0a387bd64222e831fd610270cd7ea250554\
             9758bf75c05a994a6d034f65f8f0e6fdcaeab1a34d4a6b4b636e070a38bce737"
        );
    }

    #[test]
    fn test_debug_hides_secret() {
        let signer = HmacSigner::new("my-key", "my-secret", Digest::Sha384);
        let debug = format!("{:?}", signer);
        assert!(debug.contains("my-key"));
        assert!(!debug.contains("my-secret"));
    }

    #[test]
    fn test_nonce_strictly_increasing() {
        let nonce = Nonce::new();
        let mut prev = nonce.next();
        for _ in 0..1000 {
            let n = nonce.next();
            assert!(n > prev);
            prev = n;
        }
    }

    #[test]
    fn test_nonce_increasing_across_instances() {
        let a = Nonce::new();
        let b = Nonce::new();
        let mut prev = a.next();
        for _ in 0..10_000 {
            let n = b.next();
            assert!(n > prev);
            let m = a.next();
            assert!(m > n);
            prev = m;
        }
    }

    #[test]
    fn test_nonce_unique_across_threads() {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                std::thread::spawn(|| {
                    let nonce = Nonce::new();
                    (0..1000).map(|_| nonce.next()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), total);
    }
}
