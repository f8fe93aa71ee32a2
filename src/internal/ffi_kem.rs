use crate::internal::drbg::{gen_or_random, Drbg};
use crate::internal::errors::PveErrors;
use crate::internal::kem::KemPolicy;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

const RHO_SIZE: usize = 32;

/// `(public_key, rho) -> (kem_ct, kem_ss)`. Must be deterministic in `rho`.
pub type EncapsulateFn =
    dyn Fn(&[u8], &[u8]) -> Result<(Vec<u8>, Vec<u8>), PveErrors> + Send + Sync;
pub type DecapsulateFn = dyn Fn(&ExternalDk, &[u8]) -> Result<Vec<u8>, PveErrors> + Send + Sync;
pub type DerivePublicFn = dyn Fn(&ExternalDk) -> Result<Vec<u8>, PveErrors> + Send + Sync;

/// Callbacks for keys that live outside this process (HSM, enclave, ...).
/// Built once and shared; there is no global registration.
#[derive(Clone, Default)]
pub struct KemCallbacks {
    encapsulate: Option<Arc<EncapsulateFn>>,
    decapsulate: Option<Arc<DecapsulateFn>>,
    derive_public: Option<Arc<DerivePublicFn>>,
}

impl KemCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_encapsulate<F>(mut self, f: F) -> Self
    where
        F: Fn(&[u8], &[u8]) -> Result<(Vec<u8>, Vec<u8>), PveErrors> + Send + Sync + 'static,
    {
        self.encapsulate = Some(Arc::new(f));
        self
    }

    pub fn with_decapsulate<F>(mut self, f: F) -> Self
    where
        F: Fn(&ExternalDk, &[u8]) -> Result<Vec<u8>, PveErrors> + Send + Sync + 'static,
    {
        self.decapsulate = Some(Arc::new(f));
        self
    }

    pub fn with_derive_public<F>(mut self, f: F) -> Self
    where
        F: Fn(&ExternalDk) -> Result<Vec<u8>, PveErrors> + Send + Sync + 'static,
    {
        self.derive_public = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for KemCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "KemCallbacks {{ encapsulate: {}, decapsulate: {}, derive_public: {} }}",
            self.encapsulate.is_some(),
            self.decapsulate.is_some(),
            self.derive_public.is_some()
        )
    }
}

/// Private key handle owned by the caller. It is only ever handed back to
/// the registered callbacks and never serialized or hashed.
#[derive(Clone)]
pub struct ExternalDk {
    handle: Arc<dyn Any + Send + Sync>,
}

impl ExternalDk {
    pub fn new<T: Any + Send + Sync>(handle: T) -> Self {
        ExternalDk {
            handle: Arc::new(handle),
        }
    }

    pub fn handle<T: Any>(&self) -> Option<&T> {
        self.handle.downcast_ref::<T>()
    }

    pub fn public_key(&self, kem: &ExternalKem) -> Result<Vec<u8>, PveErrors> {
        match &kem.callbacks.derive_public {
            Some(f) => f(self),
            None => Err(PveErrors::General("external kem derive_public not registered")),
        }
    }
}

impl fmt::Debug for ExternalDk {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ExternalDk {{ <opaque> }}")
    }
}

#[derive(Clone, Debug)]
pub struct ExternalKem {
    callbacks: Arc<KemCallbacks>,
}

impl ExternalKem {
    pub fn new(callbacks: KemCallbacks) -> Self {
        ExternalKem {
            callbacks: Arc::new(callbacks),
        }
    }
}

impl KemPolicy for ExternalKem {
    /// Public key bytes in whatever form the callbacks understand.
    type Ek = Vec<u8>;
    type Dk = ExternalDk;

    fn encapsulate(
        &self,
        ek: &Vec<u8>,
        drbg: Option<&mut Drbg>,
    ) -> Result<(Vec<u8>, Vec<u8>), PveErrors> {
        let f = self
            .callbacks
            .encapsulate
            .as_ref()
            .ok_or(PveErrors::General("external kem encapsulate not registered"))?;
        let rho = gen_or_random(drbg, RHO_SIZE)?;
        f(ek, &rho)
    }

    fn decapsulate(&self, dk: &ExternalDk, kem_ct: &[u8]) -> Result<Vec<u8>, PveErrors> {
        let f = self
            .callbacks
            .decapsulate
            .as_ref()
            .ok_or(PveErrors::General("external kem decapsulate not registered"))?;
        f(dk, kem_ct)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::internal::errors::DECRYPTION_FAILED;
    use crate::internal::kem::{EcdhP256, KemAeadCiphertext};

    use openssl::ec::{EcGroup, EcKey};
    use openssl::nid::Nid;
    use openssl::pkey::Private;

    /// Stand-in for an HSM slot: ECDH-P256 keys held behind an opaque handle.
    pub(crate) fn _hsm_backed_kem() -> (ExternalKem, Vec<u8>, ExternalDk) {
        let ecdh = EcdhP256::new().unwrap();
        let enc_kem = ecdh.clone();
        let dec_kem = ecdh.clone();
        let callbacks = KemCallbacks::new()
            .with_encapsulate(move |ek, rho| {
                let group = enc_kem.params().group();
                let mut ctx = openssl::bn::BigNumContext::new()?;
                let point = openssl::ec::EcPoint::from_bytes(group, ek, &mut ctx)
                    .map_err(|_| PveErrors::BadArg("invalid external public key"))?;
                let key = EcKey::from_public_key(group, &point)?;
                let mut drbg = Drbg::new(rho)?;
                enc_kem.encapsulate(&key, Some(&mut drbg))
            })
            .with_decapsulate(move |dk, ct| {
                let key = dk
                    .handle::<EcKey<Private>>()
                    .ok_or(PveErrors::BadArg("foreign handle"))?;
                dec_kem.decapsulate(key, ct)
            })
            .with_derive_public(|dk| {
                let key = dk
                    .handle::<EcKey<Private>>()
                    .ok_or(PveErrors::BadArg("foreign handle"))?;
                let mut ctx = openssl::bn::BigNumContext::new()?;
                Ok(key.public_key().to_bytes(
                    key.group(),
                    openssl::ec::PointConversionForm::UNCOMPRESSED,
                    &mut ctx,
                )?)
            });
        let kem = ExternalKem::new(callbacks);

        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let dk = ExternalDk::new(EcKey::generate(&group).unwrap());
        let ek = dk.public_key(&kem).unwrap();
        (kem, ek, dk)
    }

    #[test]
    fn hsm_roundtrip() {
        let (kem, ek, dk) = _hsm_backed_kem();
        assert_eq!(ek.len(), 65);
        let ct = KemAeadCiphertext::seal(&kem, &ek, b"aad", b"secret", None).unwrap();
        assert_eq!(ct.open(&kem, &dk, b"aad").unwrap(), b"secret");

        let other = ExternalDk::new(7u64);
        assert_eq!(ct.open(&kem, &other, b"aad").unwrap_err(), DECRYPTION_FAILED);
    }

    #[test]
    fn deterministic_given_drbg() {
        let (kem, ek, _) = _hsm_backed_kem();
        let mut a = Drbg::new(&[5u8; 16]).unwrap();
        let mut b = Drbg::new(&[5u8; 16]).unwrap();
        assert_eq!(
            kem.encapsulate(&ek, Some(&mut a)).unwrap(),
            kem.encapsulate(&ek, Some(&mut b)).unwrap()
        );
    }

    #[test]
    fn missing_callbacks() {
        let kem = ExternalKem::new(KemCallbacks::new());
        let dk = ExternalDk::new(1u32);
        assert_eq!(
            kem.encapsulate(&vec![1, 2, 3], None).unwrap_err(),
            PveErrors::General("external kem encapsulate not registered")
        );
        assert_eq!(
            kem.decapsulate(&dk, &[0u8; 4]).unwrap_err(),
            PveErrors::General("external kem decapsulate not registered")
        );
        assert_eq!(
            dk.public_key(&kem).unwrap_err(),
            PveErrors::General("external kem derive_public not registered")
        );
        // missing environment is not reported as a decryption failure
        let ct = KemAeadCiphertext::seal(&crate::internal::kem::ToyKem, &(), b"", b"x", None)
            .unwrap();
        assert_eq!(
            ct.open(&kem, &dk, b"").unwrap_err(),
            PveErrors::General("external kem decapsulate not registered")
        );
    }

    #[test]
    fn handle_is_opaque() {
        let dk = ExternalDk::new(42u64);
        assert_eq!(format!("{:?}", dk), "ExternalDk { <opaque> }");
        assert_eq!(dk.handle::<u64>(), Some(&42));
        assert!(dk.handle::<u32>().is_none());
    }
}
