use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

pub fn hmac_sha256(secret: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

pub fn hmac_sha512(secret: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha512::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

pub fn hmac_sha256_hex(secret: &[u8], message: &[u8]) -> String {
    hex::encode(hmac_sha256(secret, message))
}

pub fn hmac_sha512_hex(secret: &[u8], message: &[u8]) -> String {
    hex::encode(hmac_sha512(secret, message))
}

pub fn hmac_sha256_base64(secret: &[u8], message: &[u8]) -> String {
    BASE64.encode(hmac_sha256(secret, message))
}

pub fn hmac_sha512_base64(secret: &[u8], message: &[u8]) -> String {
    BASE64.encode(hmac_sha512(secret, message))
}

pub fn sha256(message: &[u8]) -> Vec<u8> {
    Sha256::digest(message).to_vec()
}

pub fn sha512_hex(message: &[u8]) -> String {
    hex::encode(Sha512::digest(message))
}

/// Strictly increasing millisecond timestamps, as nonce-ordered signing
/// schemes require within one handle.
#[derive(Default, Debug)]
pub struct NonceClock {
    last_ms: i64,
}

impl NonceClock {
    pub fn next_ms(&mut self) -> i64 {
        let now = Utc::now().timestamp_millis();
        self.last_ms = if now > self.last_ms {
            now
        } else {
            self.last_ms + 1
        };
        self.last_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_sha256_known_vector() {
        // RFC 4231 test case 2.
        let digest = hmac_sha256_hex(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(
            digest,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn hmac_sha512_known_vector() {
        let digest = hmac_sha512_hex(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(
            digest,
            "164b7a7bfcf819e2e395fbe73b56e0a387bd64222e831fd610270cd7ea2505549758bf75c05a994a6d034f65f8f0e6fdcaeab1a34d4a6b4b636e070a38bce737"
        );
    }

    #[test]
    fn nonces_strictly_increase() {
        let mut clock = NonceClock::default();
        let first = clock.next_ms();
        let second = clock.next_ms();
        let third = clock.next_ms();
        assert!(first < second && second < third);
    }
}
