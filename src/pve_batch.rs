use crate::internal::base_pke::{BasePke, UnifiedPke, RHO_SIZE};
use crate::internal::curve::{CurveBN, CurvePoint, Params};
use crate::internal::drbg::{Drbg, SEED_SIZE};
use crate::internal::errors::PveErrors;
use crate::internal::schemes::{get_bit, RandomOracle, SHA256Hash};
use crate::internal::utils::{inner_label_batch, scalars_from_bin, scalars_to_bin, Reader, Writer};
use crate::pve::{new_seed, CHALLENGE_SIZE, KAPPA};

use std::sync::Arc;

use zeroize::Zeroizing;

const RO_DOMAIN: &[u8] = b"ec-pve-batch";

/// One cut-and-choose row shared by the batch and access-structure variants.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct BatchRow {
    /// `x1` vector when branch 1 is disclosed, empty otherwise.
    pub x_bin: Vec<u8>,
    /// `r1` (16 bytes) or `r0_1 || r0_2` (32 bytes).
    pub r: Vec<u8>,
    pub c: Vec<u8>,
}

impl BatchRow {
    pub fn write(&self, w: &mut Writer) {
        w.put_bytes(&self.x_bin).put_bytes(&self.r).put_bytes(&self.c);
    }

    pub fn read(reader: &mut Reader) -> Result<Self, PveErrors> {
        Ok(BatchRow {
            x_bin: reader.get_bytes()?.to_vec(),
            r: reader.get_bytes()?.to_vec(),
            c: reader.get_bytes()?.to_vec(),
        })
    }

    /// Seed of the `x0` vector when branch 0 is disclosed.
    pub fn r0_1(&self) -> Result<&[u8], PveErrors> {
        if self.r.len() != 2 * SEED_SIZE {
            return Err(PveErrors::Crypto("invalid row seed length"));
        }
        Ok(&self.r[..SEED_SIZE])
    }

    pub fn r0_2(&self) -> Result<&[u8], PveErrors> {
        self.r0_1()?;
        Ok(&self.r[SEED_SIZE..])
    }

    pub fn r1(&self) -> Result<&[u8], PveErrors> {
        if self.r.len() != SEED_SIZE {
            return Err(PveErrors::Crypto("invalid row seed length"));
        }
        Ok(&self.r)
    }
}

/// Reduces every `x_j` onto `params` and returns `(x, Q)`.
pub(crate) fn commit(params: &Arc<Params>, xs: &[CurveBN]) -> Result<(Vec<CurveBN>, Vec<CurvePoint>), PveErrors> {
    if xs.is_empty() {
        return Err(PveErrors::BadArg("empty batch"));
    }
    let xs: Vec<CurveBN> = xs
        .iter()
        .map(|x| CurveBN::from_big_num(x.bn(), params))
        .collect();
    let qs = xs.iter().map(|x| CurvePoint::mul_gen(x, params)).collect();
    Ok((xs, qs))
}

/// Length, curve membership and equality checks on a claimed `Q` vector.
pub(crate) fn check_q(claimed: &[CurvePoint], committed: &[CurvePoint]) -> Result<(), PveErrors> {
    if claimed.len() != committed.len() {
        return Err(PveErrors::BadArg("Q vector length mismatch"));
    }
    if claimed.iter().any(|q| !q.is_valid()) {
        return Err(PveErrors::Crypto("invalid Q"));
    }
    if claimed != committed {
        return Err(PveErrors::Crypto("Q mismatch"));
    }
    Ok(())
}

/// `X0_j = x_j * G`, `X1_j = Q_j - X0_j`.
pub(crate) fn branch_points(qs: &[CurvePoint], xs: &[CurveBN]) -> (Vec<CurvePoint>, Vec<CurvePoint>) {
    xs.iter()
        .zip(qs)
        .map(|(x, q)| {
            let x0 = CurvePoint::mul_gen(x, q.params());
            let x1 = q - &x0;
            (x0, x1)
        })
        .unzip()
}

/// Rebuilds `x = x0 + x1` for one row once its hidden branch is known and
/// checks it against every `Q_j`.
pub(crate) fn restore_row(
    qs: &[CurvePoint],
    bi: bool,
    row: &BatchRow,
    decrypted: &[u8],
) -> Result<Vec<CurveBN>, PveErrors> {
    let params = qs[0].params();
    let (r0_1, x1_bin) = if bi {
        (decrypted, row.x_bin.as_slice())
    } else {
        (row.r0_1()?, decrypted)
    };
    if r0_1.len() != SEED_SIZE {
        return Err(PveErrors::Crypto("malformed share"));
    }
    let mut x0 = Drbg::new(r0_1)?.gen_bns(qs.len(), params)?;
    let mut x1 = match scalars_from_bin(x1_bin, qs.len(), params) {
        Ok(x1) => x1,
        Err(_) => {
            clear_all(&mut x0);
            return Err(PveErrors::Crypto("malformed share"));
        }
    };

    let mut xs: Vec<CurveBN> = x0.iter().zip(&x1).map(|(x0_j, x1_j)| x0_j + x1_j).collect();
    clear_all(&mut x0);
    clear_all(&mut x1);
    let restores = xs
        .iter()
        .zip(qs)
        .all(|(x, q)| &CurvePoint::mul_gen(x, params) == q);
    if !restores {
        clear_all(&mut xs);
        return Err(PveErrors::Crypto("row does not restore Q"));
    }
    Ok(xs)
}

pub(crate) fn clear_all(xs: &mut [CurveBN]) {
    for x in xs.iter_mut() {
        x.clear();
    }
}

/// Batch variant: one challenge and one pair of ciphertexts per row for a
/// whole vector `x_0 .. x_{n-1}`.
///
/// Branch 0 is the `x0` vector, expanded from the 16-byte seed `r0_1` (so its
/// ciphertext only carries that seed). Branch 1 is `x1 = x - x0`.
pub struct EcPveBatch<B: BasePke = UnifiedPke> {
    pke: B,
    q: Vec<CurvePoint>,
    label: Vec<u8>,
    b: [u8; CHALLENGE_SIZE],
    rows: Vec<BatchRow>,
}

impl<B: BasePke + Clone> EcPveBatch<B> {
    pub fn encrypt(
        pke: &B,
        ek: &B::Ek,
        label: &[u8],
        params: &Arc<Params>,
        xs: &[CurveBN],
    ) -> Result<Self, PveErrors> {
        Self::encrypt_inner(pke, ek, label, params, xs, None)
    }

    pub fn encrypt_with_drbg(
        pke: &B,
        ek: &B::Ek,
        label: &[u8],
        params: &Arc<Params>,
        xs: &[CurveBN],
        drbg: &mut Drbg,
    ) -> Result<Self, PveErrors> {
        Self::encrypt_inner(pke, ek, label, params, xs, Some(drbg))
    }

    fn encrypt_inner(
        pke: &B,
        ek: &B::Ek,
        label: &[u8],
        params: &Arc<Params>,
        xs: &[CurveBN],
        mut drbg: Option<&mut Drbg>,
    ) -> Result<Self, PveErrors> {
        let (xs, qs) = commit(params, xs)?;
        let n = xs.len();
        let inner = inner_label_batch(label, &qs);

        let mut seeds = Vec::with_capacity(KAPPA);
        let mut c0 = Vec::with_capacity(KAPPA);
        let mut c1 = Vec::with_capacity(KAPPA);
        let mut big_x0 = Vec::with_capacity(KAPPA);
        let mut big_x1 = Vec::with_capacity(KAPPA);
        let mut x1_bins = Vec::with_capacity(KAPPA);

        for _ in 0..KAPPA {
            let r0_1 = new_seed(drbg.as_deref_mut())?;
            let r0_2 = new_seed(drbg.as_deref_mut())?;
            let r1 = new_seed(drbg.as_deref_mut())?;

            let x0 = Drbg::new(&r0_1)?.gen_bns(n, params)?;
            let rho0 = Drbg::new(&r0_2)?.gen(RHO_SIZE)?;
            let rho1 = Drbg::new(&r1)?.gen(RHO_SIZE)?;

            let x1: Vec<CurveBN> = xs.iter().zip(&x0).map(|(x, x0)| x - x0).collect();
            let x1_bin = scalars_to_bin(&x1);

            c0.push(pke.encrypt(ek, &inner, &r0_1, &rho0)?);
            c1.push(pke.encrypt(ek, &inner, &x1_bin, &rho1)?);
            let (x0_points, x1_points) = branch_points(&qs, &x0);
            big_x0.push(x0_points);
            big_x1.push(x1_points);

            seeds.push((r0_1, r0_2, r1));
            x1_bins.push(x1_bin);
        }

        let b = challenge(&qs, label, &c0, &c1, &big_x0, &big_x1);

        let rows = x1_bins
            .into_iter()
            .zip(c0.into_iter().zip(c1))
            .zip(seeds)
            .enumerate()
            .map(|(i, ((x1_bin, (c0_i, c1_i)), (r0_1, r0_2, r1)))| {
                if get_bit(&b, i) {
                    BatchRow {
                        x_bin: x1_bin,
                        r: r1.to_vec(),
                        c: c0_i,
                    }
                } else {
                    BatchRow {
                        x_bin: Vec::new(),
                        r: [r0_1, r0_2].concat(),
                        c: c1_i,
                    }
                }
            })
            .collect();

        Ok(EcPveBatch {
            pke: pke.clone(),
            q: qs,
            label: label.to_vec(),
            b,
            rows,
        })
    }

    pub fn verify(&self, ek: &B::Ek, qs: &[CurvePoint], label: &[u8]) -> Result<(), PveErrors> {
        check_q(qs, &self.q)?;
        if label != self.label.as_slice() {
            return Err(PveErrors::Crypto("label mismatch"));
        }
        let params = qs[0].params();
        let n = qs.len();
        let inner = inner_label_batch(label, qs);

        let mut c0 = Vec::with_capacity(KAPPA);
        let mut c1 = Vec::with_capacity(KAPPA);
        let mut big_x0 = Vec::with_capacity(KAPPA);
        let mut big_x1 = Vec::with_capacity(KAPPA);

        for (i, row) in self.rows.iter().enumerate() {
            let bi = get_bit(&self.b, i);
            let xi;
            if bi {
                xi = scalars_from_bin(&row.x_bin, n, params)
                    .map_err(|_| PveErrors::Crypto("malformed disclosed share"))?;
                let rho1 = Drbg::new(row.r1()?)?.gen(RHO_SIZE)?;
                c0.push(row.c.clone());
                c1.push(self.pke.encrypt(ek, &inner, &row.x_bin, &rho1)?);
            } else {
                let r0_1 = row.r0_1()?;
                xi = Drbg::new(r0_1)?.gen_bns(n, params)?;
                let rho0 = Drbg::new(row.r0_2()?)?.gen(RHO_SIZE)?;
                c0.push(self.pke.encrypt(ek, &inner, r0_1, &rho0)?);
                c1.push(row.c.clone());
            }

            let (mut x0_points, mut x1_points) = branch_points(qs, &xi);
            if bi {
                std::mem::swap(&mut x0_points, &mut x1_points);
            }
            big_x0.push(x0_points);
            big_x1.push(x1_points);
        }

        if challenge(qs, label, &c0, &c1, &big_x0, &big_x1) != self.b {
            return Err(PveErrors::Crypto("challenge mismatch"));
        }
        Ok(())
    }

    pub fn decrypt(
        &self,
        dk: &B::Dk,
        ek: &B::Ek,
        label: &[u8],
        skip_verify: bool,
    ) -> Result<Vec<CurveBN>, PveErrors> {
        if !skip_verify {
            self.verify(ek, &self.q, label)?;
        }
        if label != self.label.as_slice() {
            return Err(PveErrors::Crypto("label mismatch"));
        }
        let inner = inner_label_batch(label, &self.q);

        for (i, row) in self.rows.iter().enumerate() {
            let decrypted = Zeroizing::new(self.pke.decrypt(dk, &inner, &row.c)?);
            if let Ok(xs) = restore_row(&self.q, get_bit(&self.b, i), row, &decrypted) {
                return Ok(xs);
            }
        }
        Err(PveErrors::Crypto("no row restores Q"))
    }

    pub fn get_q(&self) -> &[CurvePoint] {
        &self.q
    }

    pub fn get_label(&self) -> &[u8] {
        &self.label
    }

    pub fn batch_size(&self) -> usize {
        self.q.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        write_header(&mut w, &self.q, &self.label, &self.b);
        for row in &self.rows {
            row.write(&mut w);
        }
        w.finish()
    }

    pub fn from_bytes(pke: &B, params: &Arc<Params>, bytes: &[u8]) -> Result<Self, PveErrors> {
        let mut reader = Reader::new(bytes);
        let (q, label, b) = read_header(&mut reader, params)?;
        let mut rows = Vec::with_capacity(KAPPA);
        for _ in 0..KAPPA {
            rows.push(BatchRow::read(&mut reader)?);
        }
        reader.finish()?;

        Ok(EcPveBatch {
            pke: pke.clone(),
            q,
            label,
            b,
            rows,
        })
    }
}

/// `count || Q_0 .. Q_{n-1} || label || b`.
pub(crate) fn write_header(w: &mut Writer, qs: &[CurvePoint], label: &[u8], b: &[u8]) {
    w.put_u32(qs.len());
    for q in qs {
        w.put_raw(&q.to_bytes());
    }
    w.put_bytes(label).put_raw(b);
}

pub(crate) fn read_header(
    reader: &mut Reader,
    params: &Arc<Params>,
) -> Result<(Vec<CurvePoint>, Vec<u8>, [u8; CHALLENGE_SIZE]), PveErrors> {
    let point_size = CurvePoint::expected_bytes_length(params);
    let n = reader.get_count(point_size)?;
    if n == 0 {
        return Err(PveErrors::InvalidBytes);
    }
    let mut qs = Vec::with_capacity(n);
    for _ in 0..n {
        qs.push(CurvePoint::from_bytes(reader.get_raw(point_size)?, params)?);
    }
    let label = reader.get_bytes()?.to_vec();
    let mut b = [0u8; CHALLENGE_SIZE];
    b.copy_from_slice(reader.get_raw(CHALLENGE_SIZE)?);
    Ok((qs, label, b))
}

fn challenge(
    qs: &[CurvePoint],
    label: &[u8],
    c0: &[Vec<u8>],
    c1: &[Vec<u8>],
    big_x0: &[Vec<CurvePoint>],
    big_x1: &[Vec<CurvePoint>],
) -> [u8; CHALLENGE_SIZE] {
    let mut ro = RandomOracle::<SHA256Hash>::new(RO_DOMAIN);
    ro.points(qs).bytes(label).bytes_list(c0).bytes_list(c1);
    for row in big_x0.iter().chain(big_x1) {
        ro.points(row);
    }
    let mut b = [0u8; CHALLENGE_SIZE];
    b.copy_from_slice(&ro.finalize_bits(KAPPA));
    b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::base_pke::{EciesPke, KemPke};
    use crate::internal::kem::ToyKem;
    use crate::internal::keys::PrivateKey;
    use crate::pve::new_standard_params;

    use rand::Rng;

    fn random_batch(params: &Arc<Params>, n: usize) -> Vec<CurveBN> {
        (0..n).map(|_| CurveBN::rand_curve_bn(params)).collect()
    }

    #[test]
    fn batch_sizes() {
        let params = new_standard_params();
        let pke = KemPke::new(ToyKem);
        for n in [1, 8, 20, 64] {
            let xs = random_batch(&params, n);
            let pve = EcPveBatch::encrypt(&pke, &(), b"batch", &params, &xs).unwrap();
            assert_eq!(pve.batch_size(), n);
            pve.verify(&(), pve.get_q(), b"batch").unwrap();
            assert_eq!(pve.decrypt(&(), &(), b"batch", false).unwrap(), xs);
        }
    }

    #[test]
    fn twenty_scalars_with_real_keys() {
        let params = new_standard_params();
        let xs = random_batch(&params, 20);

        let ecc = PrivateKey::generate_ecc().unwrap();
        let ecc_pub = ecc.public_key().unwrap();
        let pve = EcPveBatch::encrypt(&UnifiedPke, &ecc_pub, b"batch", &params, &xs).unwrap();
        assert_eq!(pve.decrypt(&ecc, &ecc_pub, b"batch", false).unwrap(), xs);

        let group = openssl::ec::EcGroup::from_curve_name(openssl::nid::Nid::X9_62_PRIME256V1).unwrap();
        let dk = openssl::ec::EcKey::generate(&group).unwrap();
        let ek = openssl::ec::EcKey::from_public_key(&group, dk.public_key()).unwrap();
        let ecies = EciesPke::ecies().unwrap();
        let pve = EcPveBatch::encrypt(&ecies, &ek, b"batch", &params, &xs).unwrap();
        assert_eq!(pve.decrypt(&dk, &ek, b"batch", false).unwrap(), xs);

        let wrong = PrivateKey::generate_ecc().unwrap();
        let pve = EcPveBatch::encrypt(&UnifiedPke, &ecc_pub, b"batch", &params, &xs).unwrap();
        assert!(pve.decrypt(&wrong, &ecc_pub, b"batch", false).unwrap_err().is_crypto());
    }

    #[test]
    fn disclosed_rows_layout() {
        let params = new_standard_params();
        let pke = KemPke::new(ToyKem);
        let pve = EcPveBatch::encrypt(&pke, &(), b"size", &params, &random_batch(&params, 64)).unwrap();
        for (i, row) in pve.rows.iter().enumerate() {
            if get_bit(&pve.b, i) {
                assert_eq!(row.x_bin.len(), 64 * 32);
                assert_eq!(row.r.len(), SEED_SIZE);
            } else {
                assert!(row.x_bin.is_empty());
                assert_eq!(row.r.len(), 2 * SEED_SIZE);
            }
        }
    }

    #[test]
    fn verify_checks_every_q() {
        let params = new_standard_params();
        let pke = KemPke::new(ToyKem);
        let xs = random_batch(&params, 5);
        let pve = EcPveBatch::encrypt(&pke, &(), b"qs", &params, &xs).unwrap();
        let qs = pve.get_q().to_vec();

        assert_eq!(
            pve.verify(&(), &qs[..4], b"qs").unwrap_err(),
            PveErrors::BadArg("Q vector length mismatch")
        );

        let j = rand::thread_rng().gen_range(0..5);
        let mut swapped = qs.clone();
        swapped[j] = CurvePoint::mul_gen(&CurveBN::rand_curve_bn(&params), &params);
        assert_eq!(
            pve.verify(&(), &swapped, b"qs").unwrap_err(),
            PveErrors::Crypto("Q mismatch")
        );

        let mut infinity = qs.clone();
        infinity[j] = &qs[j] - &qs[j];
        assert_eq!(
            pve.verify(&(), &infinity, b"qs").unwrap_err(),
            PveErrors::Crypto("invalid Q")
        );

        assert_eq!(
            pve.verify(&(), &qs, b"qt").unwrap_err(),
            PveErrors::Crypto("label mismatch")
        );
        assert_eq!(
            pve.decrypt(&(), &(), b"qt", true).unwrap_err(),
            PveErrors::Crypto("label mismatch")
        );
    }

    #[test]
    fn bad_shares_do_not_restore() {
        let params = new_standard_params();
        let pke = KemPke::new(ToyKem);
        let pve = EcPveBatch::encrypt(&pke, &(), b"shares", &params, &random_batch(&params, 3)).unwrap();
        let opened = pve.rows.iter().position(|row| !row.x_bin.is_empty()).unwrap();
        let hidden = pve.rows.iter().position(|row| row.x_bin.is_empty()).unwrap();

        let row = &pve.rows[opened];
        assert_eq!(
            restore_row(&pve.q, true, row, &[7u8; SEED_SIZE]).unwrap_err(),
            PveErrors::Crypto("row does not restore Q")
        );
        assert_eq!(
            restore_row(&pve.q, true, row, &[7u8; SEED_SIZE - 1]).unwrap_err(),
            PveErrors::Crypto("malformed share")
        );
        let row = &pve.rows[hidden];
        assert_eq!(
            restore_row(&pve.q, false, row, &[0u8; 3 * 32 - 1]).unwrap_err(),
            PveErrors::Crypto("malformed share")
        );

        let mut xs = random_batch(&params, 4);
        clear_all(&mut xs);
        assert!(xs.iter().all(CurveBN::is_zero));
    }

    #[test]
    fn tampered_rows() {
        let params = new_standard_params();
        let pke = KemPke::new(ToyKem);
        let xs = random_batch(&params, 3);
        let pve = EcPveBatch::encrypt(&pke, &(), b"rows", &params, &xs).unwrap();
        let bytes = pve.to_bytes();

        let mut short_r = EcPveBatch::from_bytes(&pke, &params, &bytes).unwrap();
        short_r.rows[3].r.pop();
        assert_eq!(
            short_r.verify(&(), &pve.q, b"rows").unwrap_err(),
            PveErrors::Crypto("invalid row seed length")
        );

        let mut bad_c = EcPveBatch::from_bytes(&pke, &params, &bytes).unwrap();
        bad_c.rows[9].c[0] ^= 0x40;
        assert_eq!(
            bad_c.verify(&(), &pve.q, b"rows").unwrap_err(),
            PveErrors::Crypto("challenge mismatch")
        );
    }

    #[test]
    fn empty_batch_rejected() {
        let params = new_standard_params();
        assert_eq!(
            EcPveBatch::encrypt(&KemPke::new(ToyKem), &(), b"", &params, &[]).err(),
            Some(PveErrors::BadArg("empty batch"))
        );
    }

    #[test]
    fn deterministic_and_serializable() {
        let params = new_standard_params();
        let pke = KemPke::new(ToyKem);
        let xs = random_batch(&params, 4);
        let run = || {
            let mut drbg = Drbg::new(b"batch determinism seed").unwrap();
            EcPveBatch::encrypt_with_drbg(&pke, &(), b"det", &params, &xs, &mut drbg).unwrap()
        };
        let bytes = run().to_bytes();
        assert_eq!(bytes, run().to_bytes());

        let parsed = EcPveBatch::from_bytes(&pke, &params, &bytes).unwrap();
        parsed.verify(&(), &run().q, b"det").unwrap();
        assert_eq!(parsed.decrypt(&(), &(), b"det", false).unwrap(), xs);
        assert_eq!(
            EcPveBatch::from_bytes(&pke, &params, &bytes[..bytes.len() - 2]).err(),
            Some(PveErrors::InvalidBytes)
        );
    }
}
