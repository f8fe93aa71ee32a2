use crate::internal::curve::{CurveBN, CurvePoint, Params};
use crate::internal::drbg::{gen_or_random, Drbg};
use crate::internal::errors::{PveErrors, DECRYPTION_FAILED};
use crate::internal::schemes::{
    dem_decrypt, dem_encrypt, hkdf_expand_sha256, hkdf_extract_sha256, kdf, sha256,
    KEM_AEAD_INFO,
};
use crate::internal::utils::{random_bytes, Reader, Writer};

use std::sync::Arc;

use zeroize::Zeroizing;

use openssl::ec::EcKey;
use openssl::encrypt::{Decrypter, Encrypter};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{HasParams, PKey, Private, Public};
use openssl::rsa::{Padding, Rsa};

pub const KEM_AEAD_IV_SIZE: usize = 12;
pub const KEM_AEAD_TAG_SIZE: usize = 12;
const SHARED_SECRET_SIZE: usize = 32;

/// Key encapsulation strategy underneath the hybrid ciphertext.
///
/// When a generator is passed, encapsulation must draw all of its randomness
/// from it: the PVE verifier re-runs encryption and compares bytes.
pub trait KemPolicy {
    type Ek;
    type Dk;

    /// Returns `(kem_ct, kem_ss)`.
    fn encapsulate(
        &self,
        ek: &Self::Ek,
        drbg: Option<&mut Drbg>,
    ) -> Result<(Vec<u8>, Vec<u8>), PveErrors>;

    fn decapsulate(&self, dk: &Self::Dk, kem_ct: &[u8]) -> Result<Vec<u8>, PveErrors>;
}

/// RSA-OAEP with SHA-256 for both the label hash and MGF1.
#[derive(Clone, Copy, Debug, Default)]
pub struct RsaOaep;

const OAEP_HASH_LEN: usize = 32;

fn mgf1_sha256(seed: &[u8], len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len + OAEP_HASH_LEN);
    let mut counter: u32 = 0;
    while out.len() < len {
        let mut block = seed.to_vec();
        block.extend_from_slice(&counter.to_be_bytes());
        out.extend(sha256(&block));
        counter += 1;
    }
    out.truncate(len);
    out
}

/// EME-OAEP encoding (RFC 8017, 7.1.1) with an empty label and caller seed.
fn eme_oaep_encode(k: usize, msg: &[u8], seed: &[u8]) -> Result<Vec<u8>, PveErrors> {
    if seed.len() != OAEP_HASH_LEN || k < 2 * OAEP_HASH_LEN + 2 + msg.len() {
        return Err(PveErrors::BadArg("rsa key too small for oaep"));
    }
    let db_len = k - OAEP_HASH_LEN - 1;
    let mut db = sha256(b"");
    db.resize(db_len - msg.len() - 1, 0);
    db.push(0x01);
    db.extend_from_slice(msg);

    for (d, m) in db.iter_mut().zip(mgf1_sha256(seed, db_len)) {
        *d ^= m;
    }
    let mut masked_seed = seed.to_vec();
    for (s, m) in masked_seed.iter_mut().zip(mgf1_sha256(&db, OAEP_HASH_LEN)) {
        *s ^= m;
    }

    let mut em = Vec::with_capacity(k);
    em.push(0x00);
    em.extend(masked_seed);
    em.extend(db);
    Ok(em)
}

impl KemPolicy for RsaOaep {
    type Ek = Rsa<Public>;
    type Dk = Rsa<Private>;

    fn encapsulate(
        &self,
        ek: &Rsa<Public>,
        drbg: Option<&mut Drbg>,
    ) -> Result<(Vec<u8>, Vec<u8>), PveErrors> {
        let k = ek.size() as usize;
        let mut kem_ct = vec![0u8; k];
        let kem_ss;
        match drbg {
            Some(drbg) => {
                kem_ss = drbg.gen(SHARED_SECRET_SIZE)?;
                let seed = drbg.gen(OAEP_HASH_LEN)?;
                let em = eme_oaep_encode(k, &kem_ss, &seed)?;
                let n = ek.public_encrypt(&em, &mut kem_ct, Padding::NONE)?;
                kem_ct.truncate(n);
            }
            None => {
                kem_ss = random_bytes(SHARED_SECRET_SIZE)?;
                let pkey = PKey::from_rsa(ek.clone())?;
                let mut encrypter = Encrypter::new(&pkey)?;
                encrypter.set_rsa_padding(Padding::PKCS1_OAEP)?;
                encrypter.set_rsa_oaep_md(MessageDigest::sha256())?;
                encrypter.set_rsa_mgf1_md(MessageDigest::sha256())?;
                kem_ct.resize(encrypter.encrypt_len(&kem_ss)?, 0);
                let n = encrypter.encrypt(&kem_ss, &mut kem_ct)?;
                kem_ct.truncate(n);
            }
        }
        Ok((kem_ct, kem_ss))
    }

    fn decapsulate(&self, dk: &Rsa<Private>, kem_ct: &[u8]) -> Result<Vec<u8>, PveErrors> {
        if kem_ct.len() != dk.size() as usize {
            return Err(DECRYPTION_FAILED);
        }
        let pkey = PKey::from_rsa(dk.clone())?;
        let mut decrypter = Decrypter::new(&pkey)?;
        decrypter.set_rsa_padding(Padding::PKCS1_OAEP)?;
        decrypter.set_rsa_oaep_md(MessageDigest::sha256())?;
        decrypter.set_rsa_mgf1_md(MessageDigest::sha256())?;
        let mut kem_ss = vec![0u8; decrypter.decrypt_len(kem_ct)?];
        let n = decrypter
            .decrypt(kem_ct, &mut kem_ss)
            .map_err(|_| DECRYPTION_FAILED)?;
        kem_ss.truncate(n);
        if kem_ss.len() != SHARED_SECRET_SIZE {
            return Err(DECRYPTION_FAILED);
        }
        Ok(kem_ss)
    }
}

/// DHKEM(P-256, HKDF-SHA256) in the style of RFC 9180.
#[derive(Clone, Debug)]
pub struct EcdhP256 {
    params: Arc<Params>,
}

const HPKE_VERSION: &[u8] = b"HPKE-v1";
const DHKEM_P256_ID: u16 = 0x0010;

impl EcdhP256 {
    pub fn new() -> Result<Self, PveErrors> {
        Ok(EcdhP256 {
            params: Arc::new(Params::new(Nid::X9_62_PRIME256V1)?),
        })
    }

    pub fn params(&self) -> &Arc<Params> {
        &self.params
    }

    fn suite_id() -> Vec<u8> {
        let mut id = b"KEM".to_vec();
        id.extend_from_slice(&DHKEM_P256_ID.to_be_bytes());
        id
    }

    fn extract_and_expand(&self, dh: &[u8], kem_context: &[u8]) -> Result<Vec<u8>, PveErrors> {
        let suite_id = Self::suite_id();

        let mut labeled_ikm = HPKE_VERSION.to_vec();
        labeled_ikm.extend_from_slice(&suite_id);
        labeled_ikm.extend_from_slice(b"eae_prk");
        labeled_ikm.extend_from_slice(dh);
        let prk = hkdf_extract_sha256(None, &labeled_ikm);

        let mut labeled_info = (SHARED_SECRET_SIZE as u16).to_be_bytes().to_vec();
        labeled_info.extend_from_slice(HPKE_VERSION);
        labeled_info.extend_from_slice(&suite_id);
        labeled_info.extend_from_slice(b"shared_secret");
        labeled_info.extend_from_slice(kem_context);
        hkdf_expand_sha256(&prk, &labeled_info, SHARED_SECRET_SIZE)
    }

    fn check_curve<T: HasParams>(&self, key: &EcKey<T>) -> Result<(), PveErrors> {
        if key.group().curve_name() != Some(self.params.nid()) {
            return Err(PveErrors::BadArg("ecdh key is not on P-256"));
        }
        Ok(())
    }
}

impl KemPolicy for EcdhP256 {
    type Ek = EcKey<Public>;
    type Dk = EcKey<Private>;

    fn encapsulate(
        &self,
        ek: &EcKey<Public>,
        drbg: Option<&mut Drbg>,
    ) -> Result<(Vec<u8>, Vec<u8>), PveErrors> {
        self.check_curve(ek)?;
        let params = &self.params;
        let e = match drbg {
            Some(drbg) => {
                let mut e = drbg.gen_bn(params)?;
                while e.is_zero() {
                    e = drbg.gen_bn(params)?;
                }
                e
            }
            None => CurveBN::rand_curve_bn(params),
        };
        let pk = CurvePoint::from_ec_point(ek.public_key(), params);
        let enc = CurvePoint::mul_gen(&e, params).to_uncompressed_bytes();
        let dh = (&pk * &e).x_coordinate()?;

        let mut kem_context = enc.clone();
        kem_context.extend(pk.to_uncompressed_bytes());
        let kem_ss = self.extract_and_expand(&dh, &kem_context)?;
        Ok((enc, kem_ss))
    }

    fn decapsulate(&self, dk: &EcKey<Private>, kem_ct: &[u8]) -> Result<Vec<u8>, PveErrors> {
        self.check_curve(dk)?;
        let params = &self.params;
        let enc =
            CurvePoint::from_uncompressed_bytes(kem_ct, params).map_err(|_| DECRYPTION_FAILED)?;
        if !enc.is_valid() {
            return Err(DECRYPTION_FAILED);
        }
        let d = CurveBN::from_big_num(dk.private_key(), params);
        let dh = (&enc * &d).x_coordinate().map_err(|_| DECRYPTION_FAILED)?;

        let mut kem_context = kem_ct.to_vec();
        kem_context.extend(CurvePoint::from_ec_point(dk.public_key(), params).to_uncompressed_bytes());
        self.extract_and_expand(&dh, &kem_context)
    }
}

/// Hybrid ciphertext: KEM output, GCM nonce and the AES-256-GCM body.
#[derive(Clone, Debug, PartialEq)]
pub struct KemAeadCiphertext {
    kem_ct: Vec<u8>,
    iv: [u8; KEM_AEAD_IV_SIZE],
    aead_ciphertext: Vec<u8>,
}

impl KemAeadCiphertext {
    pub fn seal<P: KemPolicy>(
        policy: &P,
        ek: &P::Ek,
        aad: &[u8],
        plaintext: &[u8],
        mut drbg: Option<&mut Drbg>,
    ) -> Result<Self, PveErrors> {
        let (kem_ct, kem_ss) = policy.encapsulate(ek, drbg.as_deref_mut())?;
        let kem_ss = Zeroizing::new(kem_ss);
        let mut iv = [0u8; KEM_AEAD_IV_SIZE];
        iv.copy_from_slice(&gen_or_random(drbg, KEM_AEAD_IV_SIZE)?);
        let key = Zeroizing::new(kdf(&kem_ss, KEM_AEAD_INFO)?);
        let aead_ciphertext = dem_encrypt(&key, &iv, plaintext, aad)?;
        Ok(KemAeadCiphertext {
            kem_ct,
            iv,
            aead_ciphertext,
        })
    }

    /// Every failure except a missing environment collapses into one
    /// decryption error.
    pub fn open<P: KemPolicy>(
        &self,
        policy: &P,
        dk: &P::Dk,
        aad: &[u8],
    ) -> Result<Vec<u8>, PveErrors> {
        let kem_ss = policy.decapsulate(dk, &self.kem_ct).map_err(|err| match err {
            PveErrors::General(_) => err,
            _ => DECRYPTION_FAILED,
        })?;
        let kem_ss = Zeroizing::new(kem_ss);
        let key = Zeroizing::new(kdf(&kem_ss, KEM_AEAD_INFO)?);
        dem_decrypt(&key, &self.iv, &self.aead_ciphertext, aad)
    }

    pub fn kem_ct(&self) -> &[u8] {
        &self.kem_ct
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        Writer::new()
            .put_bytes(&self.kem_ct)
            .put_raw(&self.iv)
            .put_bytes(&self.aead_ciphertext)
            .finish()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PveErrors> {
        let mut reader = Reader::new(bytes);
        let kem_ct = reader.get_bytes()?.to_vec();
        let mut iv = [0u8; KEM_AEAD_IV_SIZE];
        iv.copy_from_slice(reader.get_raw(KEM_AEAD_IV_SIZE)?);
        let aead_ciphertext = reader.get_bytes()?.to_vec();
        reader.finish()?;
        if aead_ciphertext.len() < KEM_AEAD_TAG_SIZE {
            return Err(PveErrors::InvalidBytes);
        }
        Ok(KemAeadCiphertext {
            kem_ct,
            iv,
            aead_ciphertext,
        })
    }
}

/// Insecure policy whose ciphertext is the shared secret itself. Keeps PVE
/// structure tests fast.
#[cfg(test)]
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct ToyKem;

#[cfg(test)]
impl KemPolicy for ToyKem {
    type Ek = ();
    type Dk = ();

    fn encapsulate(
        &self,
        _ek: &(),
        drbg: Option<&mut Drbg>,
    ) -> Result<(Vec<u8>, Vec<u8>), PveErrors> {
        let ss = gen_or_random(drbg, SHARED_SECRET_SIZE)?;
        Ok((ss.clone(), ss))
    }

    fn decapsulate(&self, _dk: &(), kem_ct: &[u8]) -> Result<Vec<u8>, PveErrors> {
        if kem_ct.len() != SHARED_SECRET_SIZE {
            return Err(DECRYPTION_FAILED);
        }
        Ok(kem_ct.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _generate_rsa() -> (Rsa<Public>, Rsa<Private>) {
        let dk = Rsa::generate(2048).unwrap();
        let ek = Rsa::from_public_components(dk.n().to_owned().unwrap(), dk.e().to_owned().unwrap())
            .unwrap();
        (ek, dk)
    }

    fn _generate_ecc() -> (EcKey<Public>, EcKey<Private>) {
        let group = openssl::ec::EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let dk = EcKey::generate(&group).unwrap();
        let ek = EcKey::from_public_key(&group, dk.public_key()).unwrap();
        (ek, dk)
    }

    #[test]
    fn deterministic_oaep_is_standard_oaep() {
        let (ek, dk) = _generate_rsa();
        let mut drbg = Drbg::new(&[3u8; 32]).unwrap();
        let (ct, ss) = RsaOaep.encapsulate(&ek, Some(&mut drbg)).unwrap();
        assert_eq!(ct.len(), 256);
        assert_eq!(RsaOaep.decapsulate(&dk, &ct).unwrap(), ss);

        let mut again = Drbg::new(&[3u8; 32]).unwrap();
        assert_eq!(RsaOaep.encapsulate(&ek, Some(&mut again)).unwrap(), (ct, ss));
    }

    #[test]
    fn randomized_oaep() {
        let (ek, dk) = _generate_rsa();
        let (ct1, ss1) = RsaOaep.encapsulate(&ek, None).unwrap();
        let (ct2, ss2) = RsaOaep.encapsulate(&ek, None).unwrap();
        assert_ne!(ct1, ct2);
        assert_eq!(RsaOaep.decapsulate(&dk, &ct1).unwrap(), ss1);
        assert_eq!(RsaOaep.decapsulate(&dk, &ct2).unwrap(), ss2);

        let (_, other_dk) = _generate_rsa();
        assert_eq!(
            RsaOaep.decapsulate(&other_dk, &ct1).unwrap_err(),
            DECRYPTION_FAILED
        );
    }

    #[test]
    fn ecdh_roundtrip() {
        let kem = EcdhP256::new().unwrap();
        let (ek, dk) = _generate_ecc();
        let (ct, ss) = kem.encapsulate(&ek, None).unwrap();
        assert_eq!(ct.len(), 65);
        assert_eq!(ct[0], 0x04);
        assert_eq!(kem.decapsulate(&dk, &ct).unwrap(), ss);

        let mut drbg1 = Drbg::new(&[1u8; 16]).unwrap();
        let mut drbg2 = Drbg::new(&[1u8; 16]).unwrap();
        assert_eq!(
            kem.encapsulate(&ek, Some(&mut drbg1)).unwrap(),
            kem.encapsulate(&ek, Some(&mut drbg2)).unwrap()
        );
    }

    #[test]
    fn ecdh_rejects_bad_points() {
        let kem = EcdhP256::new().unwrap();
        let (ek, dk) = _generate_ecc();
        let (ct, _) = kem.encapsulate(&ek, None).unwrap();

        let mut off_curve = ct.clone();
        off_curve[64] ^= 1;
        assert_eq!(kem.decapsulate(&dk, &off_curve).unwrap_err(), DECRYPTION_FAILED);

        let params = kem.params();
        let compressed = CurvePoint::from_uncompressed_bytes(&ct, params)
            .unwrap()
            .to_bytes();
        assert_eq!(kem.decapsulate(&dk, &compressed).unwrap_err(), DECRYPTION_FAILED);
    }

    #[test]
    fn ecdh_wrong_curve_key() {
        let kem = EcdhP256::new().unwrap();
        let group = openssl::ec::EcGroup::from_curve_name(Nid::SECP256K1).unwrap();
        let k1 = EcKey::generate(&group).unwrap();
        let ek = EcKey::from_public_key(&group, k1.public_key()).unwrap();
        assert_eq!(
            kem.encapsulate(&ek, None).unwrap_err(),
            PveErrors::BadArg("ecdh key is not on P-256")
        );
    }

    #[test]
    fn seal_open() {
        let kem = EcdhP256::new().unwrap();
        let (ek, dk) = _generate_ecc();
        let ct = KemAeadCiphertext::seal(&kem, &ek, b"label", b"payload", None).unwrap();
        assert_eq!(ct.open(&kem, &dk, b"label").unwrap(), b"payload");
        assert_eq!(ct.open(&kem, &dk, b"other").unwrap_err(), DECRYPTION_FAILED);

        let (_, wrong) = _generate_ecc();
        assert_eq!(ct.open(&kem, &wrong, b"label").unwrap_err(), DECRYPTION_FAILED);

        let parsed = KemAeadCiphertext::from_bytes(&ct.to_bytes()).unwrap();
        assert_eq!(parsed, ct);
        assert_eq!(
            KemAeadCiphertext::from_bytes(&ct.to_bytes()[1..]).unwrap_err(),
            PveErrors::InvalidBytes
        );
    }

    #[test]
    fn seal_is_deterministic_under_drbg() {
        let seal = |seed: u8| {
            let mut drbg = Drbg::new(&[seed; 16]).unwrap();
            KemAeadCiphertext::seal(&ToyKem, &(), b"aad", b"data", Some(&mut drbg)).unwrap()
        };
        assert_eq!(seal(1), seal(1));
        assert_ne!(seal(1), seal(2));
        assert_eq!(seal(1).open(&ToyKem, &(), b"aad").unwrap(), b"data");
        let fresh = KemAeadCiphertext::seal(&ToyKem, &(), b"aad", b"data", None).unwrap();
        assert_ne!(fresh, KemAeadCiphertext::seal(&ToyKem, &(), b"aad", b"data", None).unwrap());
    }

    #[test]
    fn oaep_encoding_rejects_small_modulus() {
        assert!(eme_oaep_encode(60, &[0u8; 32], &[0u8; 32]).is_err());
        assert_eq!(eme_oaep_encode(256, &[0u8; 32], &[0u8; 32]).unwrap().len(), 256);
    }
}
