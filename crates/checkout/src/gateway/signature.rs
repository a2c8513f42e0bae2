use hmac::{Hmac, Mac};
use sha2::Sha512;

use super::GatewayError;

/// Signature parameter appended to outgoing and checked on incoming messages.
pub const SECURE_HASH: &str = "vnp_SecureHash";
pub const SECURE_HASH_TYPE: &str = "vnp_SecureHashType";

type HmacSha512 = Hmac<Sha512>;

/// Builds the string that is signed.
///
/// Signature fields and empty values are dropped, the rest is sorted by key
/// and form-urlencoded. Signing and verification both go through here.
pub fn canonicalize<I, K, V>(params: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut pairs: Vec<(K, V)> = params
        .into_iter()
        .filter(|(key, value)| {
            let key = key.as_ref();
            key != SECURE_HASH && key != SECURE_HASH_TYPE && !value.as_ref().is_empty()
        })
        .collect();
    pairs.sort_by(|a, b| a.0.as_ref().cmp(b.0.as_ref()));

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in &pairs {
        serializer.append_pair(key.as_ref(), value.as_ref());
    }
    serializer.finish()
}

/// HMAC-SHA512 keyed with the merchant secret.
#[derive(Clone)]
pub struct Signer {
    mac: HmacSha512,
}

impl Signer {
    pub fn new(secret: &[u8]) -> Result<Self, GatewayError> {
        if secret.is_empty() {
            return Err(GatewayError::Config("hash secret is empty".into()));
        }
        let mac = HmacSha512::new_from_slice(secret)
            .map_err(|e| GatewayError::Config(e.to_string()))?;
        Ok(Self { mac })
    }

    /// Returns the lowercase hex signature of `canonical`.
    pub fn sign(&self, canonical: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(canonical.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Compares in constant time. Hex case is ignored.
    pub fn verify(&self, canonical: &str, signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature.trim()) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(canonical.as_bytes());
        mac.verify_slice(&expected).is_ok()
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_sorts_and_drops() {
        let canonical = canonicalize([
            ("vnp_TxnRef", "abc"),
            ("vnp_Amount", "20000000"),
            ("vnp_SecureHash", "deadbeef"),
            ("vnp_SecureHashType", "HmacSHA512"),
            ("vnp_BankCode", ""),
        ]);
        assert_eq!(canonical, "vnp_Amount=20000000&vnp_TxnRef=abc");
    }

    #[test]
    fn test_canonicalize_form_encodes() {
        let canonical = canonicalize([
            ("vnp_OrderInfo", "Thanh toan don hang"),
            ("vnp_ReturnUrl", "http://localhost:3000/payments/vnpay/return"),
        ]);
        assert_eq!(
            canonical,
            "vnp_OrderInfo=Thanh+toan+don+hang&vnp_ReturnUrl=http%3A%2F%2Flocalhost%3A3000%2Fpayments%2Fvnpay%2Freturn"
        );
    }

    #[test]
    fn test_sign_known_vector() {
        let signer = Signer::new(b"SECRETKEY").unwrap();
        assert_eq!(
            signer.sign("vnp_Amount=20000000&vnp_TxnRef=abc"),
            "06f645a43cb1cf26cd32604e503f22c8af49e9ec31a9ece0ddfdcd5cea2c1ef006c6c1725ceaa3d6e74e1d1bbcf49dbc2c9a13a19792c0a44fa3c981d52e7f73"
        );
    }

    #[test]
    fn test_verify_round_trip_and_case() {
        let signer = Signer::new(b"SECRETKEY").unwrap();
        let canonical = "vnp_Amount=20000000&vnp_TxnRef=abc";
        let signature = signer.sign(canonical);

        assert!(signer.verify(canonical, &signature));
        assert!(signer.verify(canonical, &signature.to_uppercase()));
        assert!(!signer.verify("vnp_Amount=20000001&vnp_TxnRef=abc", &signature));
        assert!(!signer.verify(canonical, "not hex"));
        assert!(!signer.verify(canonical, ""));
    }

    #[test]
    fn test_other_secret_does_not_verify() {
        let signature = Signer::new(b"SECRETKEY").unwrap().sign("a=1");
        assert!(!Signer::new(b"OTHERKEY").unwrap().verify("a=1", &signature));
    }

    #[test]
    fn test_empty_secret_is_rejected() {
        assert!(matches!(Signer::new(b""), Err(GatewayError::Config(_))));
    }
}
