use crate::internal::drbg::Drbg;
use crate::internal::errors::{PveErrors, DECRYPTION_FAILED};
use crate::internal::ffi_kem::{ExternalKem, KemCallbacks};
use crate::internal::kem::{EcdhP256, KemAeadCiphertext, KemPolicy, RsaOaep};
use crate::internal::keys::{PrivateKey, PublicKey, UnifiedCiphertext};

pub const RHO_SIZE: usize = 32;

/// Labelled public-key encryption with caller-supplied randomness.
///
/// `encrypt` must be a pure function of its arguments: verification re-runs
/// it with the disclosed `rho` and compares ciphertext bytes.
pub trait BasePke {
    type Ek;
    type Dk;

    fn encrypt(
        &self,
        ek: &Self::Ek,
        label: &[u8],
        plaintext: &[u8],
        rho: &[u8],
    ) -> Result<Vec<u8>, PveErrors>;

    fn decrypt(&self, dk: &Self::Dk, label: &[u8], ct: &[u8]) -> Result<Vec<u8>, PveErrors>;
}

fn rho_drbg(rho: &[u8]) -> Result<Drbg, PveErrors> {
    if rho.len() != RHO_SIZE {
        return Err(PveErrors::BadArg("invalid rho size"));
    }
    Drbg::new(rho)
}

/// Hybrid encryption over a single KEM policy.
#[derive(Clone, Debug)]
pub struct KemPke<P> {
    policy: P,
}

pub type RsaPke = KemPke<RsaOaep>;
pub type EciesPke = KemPke<EcdhP256>;
pub type ExternalPke = KemPke<ExternalKem>;

impl<P: KemPolicy> KemPke<P> {
    pub fn new(policy: P) -> Self {
        KemPke { policy }
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }
}

impl RsaPke {
    pub fn rsa() -> Self {
        KemPke::new(RsaOaep)
    }
}

impl EciesPke {
    pub fn ecies() -> Result<Self, PveErrors> {
        Ok(KemPke::new(EcdhP256::new()?))
    }
}

impl ExternalPke {
    pub fn external(callbacks: KemCallbacks) -> Self {
        KemPke::new(ExternalKem::new(callbacks))
    }
}

impl<P: KemPolicy> BasePke for KemPke<P> {
    type Ek = P::Ek;
    type Dk = P::Dk;

    fn encrypt(
        &self,
        ek: &P::Ek,
        label: &[u8],
        plaintext: &[u8],
        rho: &[u8],
    ) -> Result<Vec<u8>, PveErrors> {
        let mut drbg = rho_drbg(rho)?;
        let ct = KemAeadCiphertext::seal(&self.policy, ek, label, plaintext, Some(&mut drbg))?;
        Ok(ct.to_bytes())
    }

    fn decrypt(&self, dk: &P::Dk, label: &[u8], ct: &[u8]) -> Result<Vec<u8>, PveErrors> {
        let ct = KemAeadCiphertext::from_bytes(ct).map_err(|_| DECRYPTION_FAILED)?;
        ct.open(&self.policy, dk, label)
    }
}

/// Dispatches on the RSA / ECC key union.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnifiedPke;

impl BasePke for UnifiedPke {
    type Ek = PublicKey;
    type Dk = PrivateKey;

    fn encrypt(
        &self,
        ek: &PublicKey,
        label: &[u8],
        plaintext: &[u8],
        rho: &[u8],
    ) -> Result<Vec<u8>, PveErrors> {
        let mut drbg = rho_drbg(rho)?;
        Ok(ek.encrypt(label, plaintext, Some(&mut drbg))?.to_bytes())
    }

    fn decrypt(&self, dk: &PrivateKey, label: &[u8], ct: &[u8]) -> Result<Vec<u8>, PveErrors> {
        let ct = UnifiedCiphertext::from_bytes(ct).map_err(|err| match err {
            PveErrors::BadArg(_) => err,
            _ => DECRYPTION_FAILED,
        })?;
        dk.decrypt(&ct, label)
    }
}
