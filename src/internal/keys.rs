use crate::internal::drbg::Drbg;
use crate::internal::errors::PveErrors;
use crate::internal::kem::{EcdhP256, KemAeadCiphertext, RsaOaep};
use crate::internal::schemes::{Hash, SHA256Hash};
use crate::internal::utils::Reader;

use std::fmt;

use openssl::bn::{BigNum, BigNumContext};
use openssl::ec::{EcGroup, EcKey, EcPoint, PointConversionForm};
use openssl::ecdsa::EcdsaSig;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private, Public};
use openssl::rsa::Rsa;
use openssl::sign::{Signer, Verifier};

const ECC_SCALAR_SIZE: usize = 32;
const P256_UNCOMPRESSED_SIZE: usize = 65;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyType {
    Rsa = 1,
    Ecc = 2,
}

impl KeyType {
    fn from_tag(tag: u8) -> Result<Self, PveErrors> {
        match tag {
            1 => Ok(KeyType::Rsa),
            2 => Ok(KeyType::Ecc),
            _ => Err(PveErrors::BadArg("unknown key type")),
        }
    }
}

fn p256_group() -> Result<EcGroup, PveErrors> {
    Ok(EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?)
}

fn sha256_digest(msg: &[u8]) -> Vec<u8> {
    let mut hash = SHA256Hash::new(b"");
    hash.update(msg);
    hash.finalize()
}

/// Public half of an RSA or ECC (P-256) key.
#[derive(Clone)]
pub enum PublicKey {
    Rsa(Rsa<Public>),
    Ecc(EcKey<Public>),
}

/// Never serialized: there is deliberately no `to_bytes`.
#[derive(Clone)]
pub enum PrivateKey {
    Rsa(Rsa<Private>),
    Ecc(EcKey<Private>),
}

/// Ciphertext tagged with the key type that produced it.
#[derive(Clone, Debug, PartialEq)]
pub enum UnifiedCiphertext {
    Rsa(KemAeadCiphertext),
    Ecc(KemAeadCiphertext),
}

impl PublicKey {
    pub fn key_type(&self) -> KeyType {
        match self {
            PublicKey::Rsa(_) => KeyType::Rsa,
            PublicKey::Ecc(_) => KeyType::Ecc,
        }
    }

    pub fn encrypt(
        &self,
        aad: &[u8],
        plaintext: &[u8],
        drbg: Option<&mut Drbg>,
    ) -> Result<UnifiedCiphertext, PveErrors> {
        match self {
            PublicKey::Rsa(ek) => Ok(UnifiedCiphertext::Rsa(KemAeadCiphertext::seal(
                &RsaOaep, ek, aad, plaintext, drbg,
            )?)),
            PublicKey::Ecc(ek) => Ok(UnifiedCiphertext::Ecc(KemAeadCiphertext::seal(
                &EcdhP256::new()?,
                ek,
                aad,
                plaintext,
                drbg,
            )?)),
        }
    }

    /// Tag byte followed by PKCS#1 DER (RSA) or the uncompressed point (ECC).
    pub fn to_bytes(&self) -> Result<Vec<u8>, PveErrors> {
        let mut out = vec![self.key_type() as u8];
        match self {
            PublicKey::Rsa(key) => out.extend(key.public_key_to_der_pkcs1()?),
            PublicKey::Ecc(key) => {
                let mut ctx = BigNumContext::new()?;
                out.extend(key.public_key().to_bytes(
                    key.group(),
                    PointConversionForm::UNCOMPRESSED,
                    &mut ctx,
                )?)
            }
        }
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PveErrors> {
        let mut reader = Reader::new(bytes);
        let tag = reader.get_raw(1)?[0];
        let body = &bytes[1..];
        match KeyType::from_tag(tag)? {
            KeyType::Rsa => Ok(PublicKey::Rsa(
                Rsa::public_key_from_der_pkcs1(body).map_err(|_| PveErrors::InvalidBytes)?,
            )),
            KeyType::Ecc => {
                if body.len() != P256_UNCOMPRESSED_SIZE || body[0] != 0x04 {
                    return Err(PveErrors::InvalidBytes);
                }
                let group = p256_group()?;
                let mut ctx = BigNumContext::new()?;
                let point = EcPoint::from_bytes(&group, body, &mut ctx)
                    .map_err(|_| PveErrors::InvalidBytes)?;
                let key = EcKey::from_public_key(&group, &point)?;
                key.check_key().map_err(|_| PveErrors::InvalidBytes)?;
                Ok(PublicKey::Ecc(key))
            }
        }
    }

    pub fn verify(&self, msg: &[u8], signature: &[u8]) -> Result<(), PveErrors> {
        let valid = match self {
            PublicKey::Rsa(key) => {
                let pkey = PKey::from_rsa(key.clone())?;
                let mut verifier = Verifier::new(MessageDigest::sha256(), &pkey)?;
                verifier.update(msg)?;
                verifier.verify(signature).unwrap_or(false)
            }
            PublicKey::Ecc(key) => {
                if signature.len() != 2 * ECC_SCALAR_SIZE {
                    return Err(PveErrors::Crypto("invalid signature"));
                }
                let r = BigNum::from_slice(&signature[..ECC_SCALAR_SIZE])?;
                let s = BigNum::from_slice(&signature[ECC_SCALAR_SIZE..])?;
                let sig = EcdsaSig::from_private_components(r, s)?;
                sig.verify(&sha256_digest(msg), key).unwrap_or(false)
            }
        };
        if valid {
            Ok(())
        } else {
            Err(PveErrors::Crypto("invalid signature"))
        }
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &PublicKey) -> bool {
        match (self.to_bytes(), other.to_bytes()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.to_bytes() {
            Ok(bytes) => write!(f, "PublicKey::{:?}({:02x?})", self.key_type(), bytes),
            Err(_) => write!(f, "PublicKey::{:?}", self.key_type()),
        }
    }
}

impl PrivateKey {
    pub fn generate_rsa(bits: u32) -> Result<Self, PveErrors> {
        Ok(PrivateKey::Rsa(Rsa::generate(bits)?))
    }

    /// P-256 key.
    pub fn generate_ecc() -> Result<Self, PveErrors> {
        let group = p256_group()?;
        Ok(PrivateKey::Ecc(EcKey::generate(&group)?))
    }

    pub fn key_type(&self) -> KeyType {
        match self {
            PrivateKey::Rsa(_) => KeyType::Rsa,
            PrivateKey::Ecc(_) => KeyType::Ecc,
        }
    }

    pub fn public_key(&self) -> Result<PublicKey, PveErrors> {
        match self {
            PrivateKey::Rsa(key) => Ok(PublicKey::Rsa(Rsa::from_public_components(
                key.n().to_owned()?,
                key.e().to_owned()?,
            )?)),
            PrivateKey::Ecc(key) => Ok(PublicKey::Ecc(EcKey::from_public_key(
                key.group(),
                key.public_key(),
            )?)),
        }
    }

    /// A ciphertext of the other key type is rejected before any decryption.
    pub fn decrypt(&self, ct: &UnifiedCiphertext, aad: &[u8]) -> Result<Vec<u8>, PveErrors> {
        match (self, ct) {
            (PrivateKey::Rsa(dk), UnifiedCiphertext::Rsa(ct)) => ct.open(&RsaOaep, dk, aad),
            (PrivateKey::Ecc(dk), UnifiedCiphertext::Ecc(ct)) => {
                ct.open(&EcdhP256::new()?, dk, aad)
            }
            _ => Err(PveErrors::BadArg("key and ciphertext types differ")),
        }
    }

    pub fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, PveErrors> {
        match self {
            PrivateKey::Rsa(key) => {
                let pkey = PKey::from_rsa(key.clone())?;
                let mut signer = Signer::new(MessageDigest::sha256(), &pkey)?;
                signer.update(msg)?;
                Ok(signer.sign_to_vec()?)
            }
            PrivateKey::Ecc(key) => {
                let sig = EcdsaSig::sign(&sha256_digest(msg), key)?;
                let mut out = sig.r().to_vec_padded(ECC_SCALAR_SIZE as i32)?;
                out.extend(sig.s().to_vec_padded(ECC_SCALAR_SIZE as i32)?);
                Ok(out)
            }
        }
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PrivateKey::{:?}(<hidden>)", self.key_type())
    }
}

impl UnifiedCiphertext {
    pub fn key_type(&self) -> KeyType {
        match self {
            UnifiedCiphertext::Rsa(_) => KeyType::Rsa,
            UnifiedCiphertext::Ecc(_) => KeyType::Ecc,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let inner = match self {
            UnifiedCiphertext::Rsa(ct) | UnifiedCiphertext::Ecc(ct) => ct.to_bytes(),
        };
        let mut out = vec![self.key_type() as u8];
        out.extend(inner);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PveErrors> {
        let key_type = KeyType::from_tag(Reader::new(bytes).get_raw(1)?[0])?;
        let inner = KemAeadCiphertext::from_bytes(&bytes[1..])?;
        match key_type {
            KeyType::Rsa => Ok(UnifiedCiphertext::Rsa(inner)),
            KeyType::Ecc => Ok(UnifiedCiphertext::Ecc(inner)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::errors::DECRYPTION_FAILED;

    fn _generate_credentials() -> (PrivateKey, PublicKey, PrivateKey, PublicKey) {
        let rsa = PrivateKey::generate_rsa(2048).unwrap();
        let ecc = PrivateKey::generate_ecc().unwrap();
        let rsa_pub = rsa.public_key().unwrap();
        let ecc_pub = ecc.public_key().unwrap();
        (rsa, rsa_pub, ecc, ecc_pub)
    }

    #[test]
    fn encrypt_decrypt_both_types() {
        let (rsa, rsa_pub, ecc, ecc_pub) = _generate_credentials();
        for (dk, ek) in [(&rsa, &rsa_pub), (&ecc, &ecc_pub)] {
            let ct = ek.encrypt(b"label", b"plaintext", None).unwrap();
            assert_eq!(ct.key_type(), ek.key_type());
            assert_eq!(dk.decrypt(&ct, b"label").unwrap(), b"plaintext");
            assert_eq!(dk.decrypt(&ct, b"lab").unwrap_err(), DECRYPTION_FAILED);

            let parsed = UnifiedCiphertext::from_bytes(&ct.to_bytes()).unwrap();
            assert_eq!(parsed, ct);
        }
    }

    #[test]
    fn type_mismatch_is_bad_arg() {
        let (rsa, rsa_pub, ecc, ecc_pub) = _generate_credentials();
        let rsa_ct = rsa_pub.encrypt(b"", b"x", None).unwrap();
        let ecc_ct = ecc_pub.encrypt(b"", b"x", None).unwrap();
        assert_eq!(
            ecc.decrypt(&rsa_ct, b"").unwrap_err(),
            PveErrors::BadArg("key and ciphertext types differ")
        );
        assert_eq!(
            rsa.decrypt(&ecc_ct, b"").unwrap_err(),
            PveErrors::BadArg("key and ciphertext types differ")
        );
    }

    #[test]
    fn public_key_wire_form() {
        let (_, rsa_pub, _, ecc_pub) = _generate_credentials();
        for ek in [&rsa_pub, &ecc_pub] {
            let bytes = ek.to_bytes().unwrap();
            assert_eq!(bytes[0], ek.key_type() as u8);
            assert_eq!(&PublicKey::from_bytes(&bytes).unwrap(), ek);
        }
        assert_eq!(ecc_pub.to_bytes().unwrap().len(), 66);

        let mut none = ecc_pub.to_bytes().unwrap();
        none[0] = 0;
        assert_eq!(
            PublicKey::from_bytes(&none).unwrap_err(),
            PveErrors::BadArg("unknown key type")
        );
        assert_eq!(PublicKey::from_bytes(&[]).unwrap_err(), PveErrors::InvalidBytes);
    }

    #[test]
    fn sign_verify() {
        let (rsa, rsa_pub, ecc, ecc_pub) = _generate_credentials();
        for (dk, ek) in [(&rsa, &rsa_pub), (&ecc, &ecc_pub)] {
            let sig = dk.sign(b"message").unwrap();
            ek.verify(b"message", &sig).unwrap();
            assert_eq!(
                ek.verify(b"massage", &sig).unwrap_err(),
                PveErrors::Crypto("invalid signature")
            );
        }
        let ecc_sig = ecc.sign(b"message").unwrap();
        assert!(rsa_pub.verify(b"message", &ecc_sig).is_err());
    }

    #[test]
    fn private_key_debug_hides_material() {
        let ecc = PrivateKey::generate_ecc().unwrap();
        assert_eq!(format!("{:?}", ecc), "PrivateKey::Ecc(<hidden>)");
    }
}
