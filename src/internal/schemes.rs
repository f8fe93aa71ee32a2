use crate::internal::curve::CurvePoint;
use crate::internal::errors::{PveErrors, DECRYPTION_FAILED};

use aead::consts::U12;
use aead::generic_array::GenericArray;
use aead::{Aead, KeyInit, Payload};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use hkdf::Hkdf;
use sha2::{Digest, Sha256};

pub const DEM_KEYSIZE: usize = 32;
pub const DEM_NONCE_SIZE: usize = 12;
pub const DEM_TAG_SIZE: usize = 12;
pub const KEM_AEAD_INFO: &[u8] = b"CBMPC|KEM-AEAD|v1|KDF=HKDF-SHA256|AEAD=AES-GCM-256";

/// AES-256-GCM with 96-bit nonce and 96-bit tag.
type Aes256Gcm12 = AesGcm<Aes256, U12, U12>;

pub trait Hash {
    fn new(customization_string: &[u8]) -> Self;
    fn update(&mut self, data: &[u8]);
    fn finalize(self) -> Vec<u8>;
}

pub struct SHA256Hash {
    digest: Sha256,
}

impl Hash for SHA256Hash {
    fn new(customization_string: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(customization_string);
        Self { digest: hasher }
    }

    fn update(&mut self, data: &[u8]) {
        self.digest.update(data);
    }

    fn finalize(self) -> Vec<u8> {
        self.digest.finalize().to_vec()
    }
}

pub fn sha256(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).to_vec()
}

/// Random oracle over mixed byte-string / point arguments.
///
/// Every item is absorbed with a 4-byte big-endian length prefix and vectors
/// carry their element count, so distinct argument lists never collide.
pub struct RandomOracle<H: Hash = SHA256Hash> {
    hash: H,
}

impl<H: Hash> RandomOracle<H> {
    pub fn new(domain: &[u8]) -> Self {
        let mut hash = H::new(b"");
        hash.update(&(domain.len() as u32).to_be_bytes());
        hash.update(domain);
        RandomOracle { hash }
    }

    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.hash.update(&(data.len() as u32).to_be_bytes());
        self.hash.update(data);
        self
    }

    pub fn bytes_list<T: AsRef<[u8]>>(&mut self, items: &[T]) -> &mut Self {
        self.count(items.len());
        for item in items {
            self.bytes(item.as_ref());
        }
        self
    }

    pub fn point(&mut self, point: &CurvePoint) -> &mut Self {
        self.bytes(&point.to_bytes())
    }

    pub fn points(&mut self, points: &[CurvePoint]) -> &mut Self {
        self.count(points.len());
        for point in points {
            self.point(point);
        }
        self
    }

    fn count(&mut self, n: usize) {
        self.hash.update(&(n as u32).to_be_bytes());
    }

    /// Digest truncated to `bits` bits (a multiple of 8, at most 256).
    pub fn finalize_bits(self, bits: usize) -> Vec<u8> {
        let mut digest = self.hash.finalize();
        digest.truncate(bits / 8);
        digest
    }
}

pub fn get_bit(bits: &[u8], index: usize) -> bool {
    (bits[index / 8] >> (index % 8)) & 1 == 1
}

pub fn hkdf_extract_sha256(salt: Option<&[u8]>, ikm: &[u8]) -> Vec<u8> {
    let (prk, _) = Hkdf::<Sha256>::extract(salt, ikm);
    prk.to_vec()
}

pub fn hkdf_expand_sha256(prk: &[u8], info: &[u8], len: usize) -> Result<Vec<u8>, PveErrors> {
    let hk = Hkdf::<Sha256>::from_prk(prk).map_err(|_| PveErrors::General("invalid prk length"))?;
    let mut buf = vec![0; len];
    match hk.expand(info, &mut buf) {
        Ok(_) => Ok(buf),
        Err(_) => Err(PveErrors::General("invalid hkdf output length")),
    }
}

/// Symmetric key for the KEM-AEAD layer, derived from a KEM shared secret.
pub fn kdf(shared_secret: &[u8], info: &[u8]) -> Result<Vec<u8>, PveErrors> {
    let prk = hkdf_extract_sha256(None, shared_secret);
    hkdf_expand_sha256(&prk, info, DEM_KEYSIZE)
}

pub fn dem_encrypt(key: &[u8], iv: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, PveErrors> {
    if iv.len() != DEM_NONCE_SIZE {
        return Err(PveErrors::BadArg("invalid nonce size"));
    }
    let cipher =
        Aes256Gcm12::new_from_slice(key).map_err(|_| PveErrors::BadArg("invalid key size"))?;
    let payload = Payload {
        msg: plaintext,
        aad,
    };

    match cipher.encrypt(GenericArray::from_slice(iv), payload) {
        Ok(ciphertext) => Ok(ciphertext),
        Err(_) => Err(PveErrors::General("encryption failed")),
    }
}

pub fn dem_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, PveErrors> {
    if iv.len() != DEM_NONCE_SIZE || ciphertext.len() < DEM_TAG_SIZE {
        return Err(DECRYPTION_FAILED);
    }
    let cipher = Aes256Gcm12::new_from_slice(key).map_err(|_| DECRYPTION_FAILED)?;
    let payload = Payload {
        msg: ciphertext,
        aad,
    };

    cipher
        .decrypt(GenericArray::from_slice(iv), payload)
        .map_err(|_| DECRYPTION_FAILED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    // RFC 5869, test case 1.
    #[test]
    fn hkdf_sha256_known_answer() {
        let ikm = hex!("0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b");
        let salt = hex!("000102030405060708090a0b0c");
        let info = hex!("f0f1f2f3f4f5f6f7f8f9");
        let prk = hkdf_extract_sha256(Some(&salt), &ikm);
        assert_eq!(
            prk,
            hex!("077709362c2e32df0ddc3f0dc47bba6390b6c73bb50f9c3122ec844ad7c2b3e5").to_vec()
        );
        let okm = hkdf_expand_sha256(&prk, &info, 42).unwrap();
        assert_eq!(
            okm,
            hex!(
                "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865"
            )
            .to_vec()
        );
    }

    #[test]
    fn dem_roundtrip_and_tamper() {
        let key = kdf(b"shared secret", KEM_AEAD_INFO).unwrap();
        let iv = [7u8; DEM_NONCE_SIZE];
        let ct = dem_encrypt(&key, &iv, b"Hello, pve!", b"aad").unwrap();
        assert_eq!(ct.len(), 11 + DEM_TAG_SIZE);
        assert_eq!(dem_decrypt(&key, &iv, &ct, b"aad").unwrap(), b"Hello, pve!");

        assert_eq!(dem_decrypt(&key, &iv, &ct, b"other").unwrap_err(), DECRYPTION_FAILED);
        let mut tampered = ct.clone();
        tampered[0] ^= 0x80;
        assert_eq!(dem_decrypt(&key, &iv, &tampered, b"aad").unwrap_err(), DECRYPTION_FAILED);
        assert_eq!(dem_decrypt(&key, &iv, &ct[..4], b"aad").unwrap_err(), DECRYPTION_FAILED);
    }

    #[test]
    fn oracle_separates_lists() {
        let mut a = RandomOracle::<SHA256Hash>::new(b"test");
        a.bytes_list(&[b"ab".to_vec(), b"c".to_vec()]);
        let mut b = RandomOracle::<SHA256Hash>::new(b"test");
        b.bytes_list(&[b"a".to_vec(), b"bc".to_vec()]);
        let a = a.finalize_bits(128);
        assert_eq!(a.len(), 16);
        assert_ne!(a, b.finalize_bits(128));
    }

    #[test]
    fn bits() {
        let b = [0b0000_0101u8, 0b1000_0000];
        assert!(get_bit(&b, 0));
        assert!(!get_bit(&b, 1));
        assert!(get_bit(&b, 2));
        assert!(get_bit(&b, 15));
        assert!(!get_bit(&b, 8));
    }
}
