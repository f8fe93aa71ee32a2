pub use crate::internal::base_pke::{BasePke, UnifiedPke, RHO_SIZE};
pub use crate::internal::curve::{CurveBN, CurvePoint, Params};
pub use crate::internal::drbg::{Drbg, SEED_SIZE};
pub use crate::internal::errors::PveErrors;

use crate::internal::drbg::gen_or_random;
use crate::internal::schemes::{get_bit, RandomOracle, SHA256Hash};
use crate::internal::utils::{inner_label, Reader, Writer};

use std::sync::Arc;

use zeroize::Zeroizing;

use openssl::nid::Nid;

/// Number of cut-and-choose rows; a cheating encryptor passes with
/// probability `2^-KAPPA`.
pub const KAPPA: usize = 128;
pub const CHALLENGE_SIZE: usize = KAPPA / 8;

const RO_DOMAIN: &[u8] = b"ec-pve";

/// Creates the standard parameters needed to operate with this crate, i.e.
/// the P-256 curve.
pub fn new_standard_params() -> Arc<Params> {
    Arc::new(Params::new(Nid::X9_62_PRIME256V1).expect("P-256 is always supported"))
}

pub(crate) fn new_seed(drbg: Option<&mut Drbg>) -> Result<[u8; SEED_SIZE], PveErrors> {
    let mut seed = [0u8; SEED_SIZE];
    seed.copy_from_slice(&gen_or_random(drbg, SEED_SIZE)?);
    Ok(seed)
}

/// Publicly verifiable encryption of a discrete log `x` of `Q = x*G`.
///
/// Each of the `KAPPA` rows splits `x = x0 + x1` and encrypts both halves;
/// the challenge then opens one half per row (through its seed) and keeps
/// only the ciphertext of the other. Anyone holding the public key can
/// re-encrypt the opened halves and recompute the challenge.
pub struct EcPve<B: BasePke = UnifiedPke> {
    pke: B,
    q: CurvePoint,
    label: Vec<u8>,
    b: [u8; CHALLENGE_SIZE],
    x_rows: Vec<Option<CurveBN>>,
    r: Vec<[u8; SEED_SIZE]>,
    c: Vec<Vec<u8>>,
}

impl<B: BasePke + Clone> EcPve<B> {
    /// Encrypts `x` (reduced modulo the order of `params`) under `ek`.
    pub fn encrypt(
        pke: &B,
        ek: &B::Ek,
        label: &[u8],
        params: &Arc<Params>,
        x: &CurveBN,
    ) -> Result<Self, PveErrors> {
        Self::encrypt_inner(pke, ek, label, params, x, None)
    }

    /// Same as `encrypt`, drawing every row seed from `drbg`. Equal generator
    /// states and inputs give byte-identical bundles.
    pub fn encrypt_with_drbg(
        pke: &B,
        ek: &B::Ek,
        label: &[u8],
        params: &Arc<Params>,
        x: &CurveBN,
        drbg: &mut Drbg,
    ) -> Result<Self, PveErrors> {
        Self::encrypt_inner(pke, ek, label, params, x, Some(drbg))
    }

    fn encrypt_inner(
        pke: &B,
        ek: &B::Ek,
        label: &[u8],
        params: &Arc<Params>,
        x: &CurveBN,
        mut drbg: Option<&mut Drbg>,
    ) -> Result<Self, PveErrors> {
        let x = CurveBN::from_big_num(x.bn(), params);
        let q = CurvePoint::mul_gen(&x, params);
        let inner = inner_label(label, &q);

        let mut r0 = Vec::with_capacity(KAPPA);
        let mut r1 = Vec::with_capacity(KAPPA);
        let mut c0 = Vec::with_capacity(KAPPA);
        let mut c1 = Vec::with_capacity(KAPPA);
        let mut big_x0 = Vec::with_capacity(KAPPA);
        let mut big_x1 = Vec::with_capacity(KAPPA);
        let mut x_rows = Vec::with_capacity(KAPPA);

        for _ in 0..KAPPA {
            let seed0 = new_seed(drbg.as_deref_mut())?;
            let seed1 = new_seed(drbg.as_deref_mut())?;
            let mut drbg0 = Drbg::new(&seed0)?;
            let mut drbg1 = Drbg::new(&seed1)?;

            let x0 = drbg0.gen_bn(params)?;
            let rho0 = drbg0.gen(RHO_SIZE)?;
            let x1 = &x - &x0;
            let rho1 = drbg1.gen(RHO_SIZE)?;

            c0.push(pke.encrypt(ek, &inner, &x0.to_bytes(), &rho0)?);
            c1.push(pke.encrypt(ek, &inner, &x1.to_bytes(), &rho1)?);
            let x0_point = CurvePoint::mul_gen(&x0, params);
            big_x1.push(&q - &x0_point);
            big_x0.push(x0_point);

            r0.push(seed0);
            r1.push(seed1);
            x_rows.push(x1);
        }

        let b = challenge(&q, label, &c0, &c1, &big_x0, &big_x1);

        let mut r = Vec::with_capacity(KAPPA);
        let mut c = Vec::with_capacity(KAPPA);
        let mut kept = Vec::with_capacity(KAPPA);
        let rows = x_rows.into_iter().zip(c0.into_iter().zip(c1));
        for (i, (mut x1, (c0_i, c1_i))) in rows.enumerate() {
            if get_bit(&b, i) {
                r.push(r1[i]);
                c.push(c0_i);
                kept.push(Some(x1));
            } else {
                r.push(r0[i]);
                c.push(c1_i);
                x1.clear();
                kept.push(None);
            }
        }

        Ok(EcPve {
            pke: pke.clone(),
            q,
            label: label.to_vec(),
            b,
            x_rows: kept,
            r,
            c,
        })
    }

    pub fn verify(&self, ek: &B::Ek, q: &CurvePoint, label: &[u8]) -> Result<(), PveErrors> {
        if !q.is_valid() {
            return Err(PveErrors::Crypto("invalid Q"));
        }
        if q != &self.q {
            return Err(PveErrors::Crypto("Q mismatch"));
        }
        if label != self.label.as_slice() {
            return Err(PveErrors::Crypto("label mismatch"));
        }
        let params = q.params();
        let inner = inner_label(label, q);

        let mut c0 = Vec::with_capacity(KAPPA);
        let mut c1 = Vec::with_capacity(KAPPA);
        let mut big_x0 = Vec::with_capacity(KAPPA);
        let mut big_x1 = Vec::with_capacity(KAPPA);

        for i in 0..KAPPA {
            let bi = get_bit(&self.b, i);
            let mut drbg = Drbg::new(&self.r[i])?;
            let xi = if bi {
                self.disclosed_share(i)?.clone()
            } else {
                drbg.gen_bn(params)?
            };
            let rho = drbg.gen(RHO_SIZE)?;

            let mut x0_point = CurvePoint::mul_gen(&xi, params);
            let mut x1_point = q - &x0_point;
            let mut c0_i = self.pke.encrypt(ek, &inner, &xi.to_bytes(), &rho)?;
            let mut c1_i = self.c[i].clone();
            if bi {
                std::mem::swap(&mut x0_point, &mut x1_point);
                std::mem::swap(&mut c0_i, &mut c1_i);
            }
            c0.push(c0_i);
            c1.push(c1_i);
            big_x0.push(x0_point);
            big_x1.push(x1_point);
        }

        if challenge(q, label, &c0, &c1, &big_x0, &big_x1) != self.b {
            return Err(PveErrors::Crypto("challenge mismatch"));
        }
        Ok(())
    }

    /// Recovers `x`. Rows are tried in order and the first whose two halves
    /// add up to the discrete log of `Q` wins.
    pub fn decrypt(
        &self,
        dk: &B::Dk,
        ek: &B::Ek,
        label: &[u8],
        skip_verify: bool,
    ) -> Result<CurveBN, PveErrors> {
        if !skip_verify {
            self.verify(ek, &self.q, label)?;
        }
        let inner = inner_label(label, &self.q);

        for i in 0..KAPPA {
            let decrypted = Zeroizing::new(self.pke.decrypt(dk, &inner, &self.c[i])?);
            if let Ok(x) = self.restore_from_decrypted(i, &decrypted) {
                return Ok(x);
            }
        }
        Err(PveErrors::Crypto("no row restores Q"))
    }

    fn disclosed_share(&self, row: usize) -> Result<&CurveBN, PveErrors> {
        self.x_rows[row]
            .as_ref()
            .ok_or(PveErrors::Crypto("missing disclosed share"))
    }

    fn restore_from_decrypted(&self, row: usize, decrypted: &[u8]) -> Result<CurveBN, PveErrors> {
        let params = self.q.params();
        let mut hidden = CurveBN::from_bytes(decrypted, params)
            .map_err(|_| PveErrors::Crypto("malformed share"))?;
        let disclosed = if get_bit(&self.b, row) {
            self.disclosed_share(row)?.clone()
        } else {
            Drbg::new(&self.r[row])?.gen_bn(params)?
        };

        let mut x = &hidden + &disclosed;
        hidden.clear();
        if CurvePoint::mul_gen(&x, params) != self.q {
            x.clear();
            return Err(PveErrors::Crypto("row does not restore Q"));
        }
        Ok(x)
    }

    pub fn get_q(&self) -> &CurvePoint {
        &self.q
    }

    pub fn get_label(&self) -> &[u8] {
        &self.label
    }

    /// `Q || label || b || KAPPA x [x_row || r || c]`. Cleared rows carry an
    /// empty `x_row`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_raw(&self.q.to_bytes())
            .put_bytes(&self.label)
            .put_raw(&self.b);
        for i in 0..KAPPA {
            match &self.x_rows[i] {
                Some(x) => w.put_bytes(&x.to_bytes()),
                None => w.put_bytes(&[]),
            };
            w.put_raw(&self.r[i]).put_bytes(&self.c[i]);
        }
        w.finish()
    }

    pub fn from_bytes(pke: &B, params: &Arc<Params>, bytes: &[u8]) -> Result<Self, PveErrors> {
        let mut reader = Reader::new(bytes);
        let q = CurvePoint::from_bytes(
            reader.get_raw(CurvePoint::expected_bytes_length(params))?,
            params,
        )?;
        let label = reader.get_bytes()?.to_vec();
        let mut b = [0u8; CHALLENGE_SIZE];
        b.copy_from_slice(reader.get_raw(CHALLENGE_SIZE)?);

        let mut x_rows = Vec::with_capacity(KAPPA);
        let mut r = Vec::with_capacity(KAPPA);
        let mut c = Vec::with_capacity(KAPPA);
        for _ in 0..KAPPA {
            let x = reader.get_bytes()?;
            x_rows.push(if x.is_empty() {
                None
            } else {
                Some(CurveBN::from_bytes(x, params)?)
            });
            let mut seed = [0u8; SEED_SIZE];
            seed.copy_from_slice(reader.get_raw(SEED_SIZE)?);
            r.push(seed);
            c.push(reader.get_bytes()?.to_vec());
        }
        reader.finish()?;

        Ok(EcPve {
            pke: pke.clone(),
            q,
            label,
            b,
            x_rows,
            r,
            c,
        })
    }
}

fn challenge(
    q: &CurvePoint,
    label: &[u8],
    c0: &[Vec<u8>],
    c1: &[Vec<u8>],
    big_x0: &[CurvePoint],
    big_x1: &[CurvePoint],
) -> [u8; CHALLENGE_SIZE] {
    let mut ro = RandomOracle::<SHA256Hash>::new(RO_DOMAIN);
    ro.point(q)
        .bytes(label)
        .bytes_list(c0)
        .bytes_list(c1)
        .points(big_x0)
        .points(big_x1);
    let mut b = [0u8; CHALLENGE_SIZE];
    b.copy_from_slice(&ro.finalize_bits(KAPPA));
    b
}
