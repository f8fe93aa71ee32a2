use crate::internal::access::AccessStructure;
use crate::internal::base_pke::{BasePke, UnifiedPke, RHO_SIZE};
use crate::internal::curve::{CurveBN, CurvePoint, Params};
use crate::internal::drbg::{Drbg, SEED_SIZE};
use crate::internal::errors::{PveErrors, DECRYPTION_FAILED};
use crate::internal::schemes::{dem_decrypt, dem_encrypt, get_bit, kdf, RandomOracle, SHA256Hash, DEM_NONCE_SIZE};
use crate::internal::utils::{inner_label_batch, scalars_from_bin, scalars_to_bin, Reader, Writer};
use crate::pve::{new_seed, CHALLENGE_SIZE, KAPPA};
use crate::pve_batch::{branch_points, check_q, commit, read_header, restore_row, write_header, BatchRow};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use zeroize::Zeroizing;

const RO_DOMAIN: &[u8] = b"ec-pve-ac";
const ROW_KEY_INFO: &[u8] = b"ec-pve-ac|row-key";

#[derive(Clone, Debug, PartialEq)]
struct AcRow {
    row: BatchRow,
    /// One ciphertext per leaf, in sorted leaf-path order.
    quorum_c: Vec<Vec<u8>>,
}

/// Ciphertexts of one branch: `iv || AES-GCM(plain)` and the per-leaf shares
/// of its row key.
struct BranchCiphertext {
    c: Vec<u8>,
    quorum_c: Vec<Vec<u8>>,
}

/// Access-structure variant of the batch scheme.
///
/// Each row branch is sealed under a fresh row key `k`, and `k` is secret
/// shared over the access structure with one share per leaf, each encrypted
/// under that leaf's key. Any quorum of leaves can jointly open the hidden
/// branch of a row; a single party only ever learns its own share.
pub struct EcPveAc<B: BasePke = UnifiedPke> {
    pke: B,
    q: Vec<CurvePoint>,
    label: Vec<u8>,
    b: [u8; CHALLENGE_SIZE],
    rows: Vec<AcRow>,
}

impl<B: BasePke + Clone> EcPveAc<B> {
    pub fn encrypt(
        pke: &B,
        ac: &AccessStructure,
        pks: &BTreeMap<String, B::Ek>,
        label: &[u8],
        params: &Arc<Params>,
        xs: &[CurveBN],
    ) -> Result<Self, PveErrors> {
        Self::encrypt_inner(pke, ac, pks, label, params, xs, None)
    }

    pub fn encrypt_with_drbg(
        pke: &B,
        ac: &AccessStructure,
        pks: &BTreeMap<String, B::Ek>,
        label: &[u8],
        params: &Arc<Params>,
        xs: &[CurveBN],
        drbg: &mut Drbg,
    ) -> Result<Self, PveErrors> {
        Self::encrypt_inner(pke, ac, pks, label, params, xs, Some(drbg))
    }

    fn encrypt_inner(
        pke: &B,
        ac: &AccessStructure,
        pks: &BTreeMap<String, B::Ek>,
        label: &[u8],
        params: &Arc<Params>,
        xs: &[CurveBN],
        mut drbg: Option<&mut Drbg>,
    ) -> Result<Self, PveErrors> {
        let leaf_pks = leaf_keys(ac, pks)?;
        let (xs, qs) = commit(params, xs)?;
        let n = xs.len();
        let inner = inner_label_batch(label, &qs);

        let mut seeds = Vec::with_capacity(KAPPA);
        let mut x1_bins = Vec::with_capacity(KAPPA);
        let mut branch0 = Vec::with_capacity(KAPPA);
        let mut branch1 = Vec::with_capacity(KAPPA);
        let mut big_x0 = Vec::with_capacity(KAPPA);
        let mut big_x1 = Vec::with_capacity(KAPPA);

        for _ in 0..KAPPA {
            let r0_1 = new_seed(drbg.as_deref_mut())?;
            let r0_2 = new_seed(drbg.as_deref_mut())?;
            let r1 = new_seed(drbg.as_deref_mut())?;

            let x0 = Drbg::new(&r0_1)?.gen_bns(n, params)?;
            let x1: Vec<CurveBN> = xs.iter().zip(&x0).map(|(x, x0)| x - x0).collect();
            let x1_bin = scalars_to_bin(&x1);

            branch0.push(encrypt_branch(pke, ac, &leaf_pks, &inner, params, &r0_2, &r0_1)?);
            branch1.push(encrypt_branch(pke, ac, &leaf_pks, &inner, params, &r1, &x1_bin)?);
            let (x0_points, x1_points) = branch_points(&qs, &x0);
            big_x0.push(x0_points);
            big_x1.push(x1_points);

            seeds.push((r0_1, r0_2, r1));
            x1_bins.push(x1_bin);
        }

        let b = challenge(&qs, label, &branch0, &branch1, &big_x0, &big_x1);

        let mut rows = Vec::with_capacity(KAPPA);
        let branches = branch0.into_iter().zip(branch1);
        for (i, (((c0, c1), x1_bin), (r0_1, r0_2, r1))) in
            branches.zip(x1_bins).zip(seeds).enumerate()
        {
            rows.push(if get_bit(&b, i) {
                AcRow {
                    row: BatchRow {
                        x_bin: x1_bin,
                        r: r1.to_vec(),
                        c: c0.c,
                    },
                    quorum_c: c0.quorum_c,
                }
            } else {
                AcRow {
                    row: BatchRow {
                        x_bin: Vec::new(),
                        r: [r0_1, r0_2].concat(),
                        c: c1.c,
                    },
                    quorum_c: c1.quorum_c,
                }
            });
        }

        Ok(EcPveAc {
            pke: pke.clone(),
            q: qs,
            label: label.to_vec(),
            b,
            rows,
        })
    }

    pub fn verify(
        &self,
        ac: &AccessStructure,
        pks: &BTreeMap<String, B::Ek>,
        qs: &[CurvePoint],
        label: &[u8],
    ) -> Result<(), PveErrors> {
        let leaf_pks = leaf_keys(ac, pks)?;
        check_q(qs, &self.q)?;
        if label != self.label.as_slice() {
            return Err(PveErrors::Crypto("label mismatch"));
        }
        let params = qs[0].params();
        let n = qs.len();
        let inner = inner_label_batch(label, qs);

        let mut branch0 = Vec::with_capacity(KAPPA);
        let mut branch1 = Vec::with_capacity(KAPPA);
        let mut big_x0 = Vec::with_capacity(KAPPA);
        let mut big_x1 = Vec::with_capacity(KAPPA);

        for (i, ac_row) in self.rows.iter().enumerate() {
            if ac_row.quorum_c.len() != leaf_pks.len() {
                return Err(PveErrors::Crypto("access structure mismatch"));
            }
            let row = &ac_row.row;
            let stored = BranchCiphertext {
                c: row.c.clone(),
                quorum_c: ac_row.quorum_c.clone(),
            };
            let bi = get_bit(&self.b, i);
            let xi;
            if bi {
                xi = scalars_from_bin(&row.x_bin, n, params)
                    .map_err(|_| PveErrors::Crypto("malformed disclosed share"))?;
                let c1 = encrypt_branch(&self.pke, ac, &leaf_pks, &inner, params, row.r1()?, &row.x_bin)?;
                branch0.push(stored);
                branch1.push(c1);
            } else {
                let r0_1 = row.r0_1()?;
                xi = Drbg::new(r0_1)?.gen_bns(n, params)?;
                let c0 = encrypt_branch(&self.pke, ac, &leaf_pks, &inner, params, row.r0_2()?, r0_1)?;
                branch0.push(c0);
                branch1.push(stored);
            }

            let (mut x0_points, mut x1_points) = branch_points(qs, &xi);
            if bi {
                std::mem::swap(&mut x0_points, &mut x1_points);
            }
            big_x0.push(x0_points);
            big_x1.push(x1_points);
        }

        if challenge(qs, label, &branch0, &branch1, &big_x0, &big_x1) != self.b {
            return Err(PveErrors::Crypto("challenge mismatch"));
        }
        Ok(())
    }

    /// One leaf's share of the row key of row `row_index`. Needs nothing but
    /// that leaf's own decryption key.
    pub fn party_decrypt_row(
        &self,
        ac: &AccessStructure,
        row_index: usize,
        leaf_path: &str,
        dk: &B::Dk,
        label: &[u8],
    ) -> Result<CurveBN, PveErrors> {
        let ac_row = self
            .rows
            .get(row_index)
            .ok_or(PveErrors::BadArg("row index out of range"))?;
        let leaves = ac.list_leaf_names();
        if leaves.len() != ac_row.quorum_c.len() {
            return Err(PveErrors::Crypto("access structure mismatch"));
        }
        let pos = leaves
            .iter()
            .position(|leaf| leaf == leaf_path)
            .ok_or(PveErrors::BadArg("unknown leaf"))?;

        let inner = inner_label_batch(label, &self.q);
        let share = Zeroizing::new(self.pke.decrypt(dk, &inner, &ac_row.quorum_c[pos])?);
        CurveBN::from_bytes(&share, self.q[0].params()).map_err(|_| DECRYPTION_FAILED)
    }

    /// Combines the partial shares of a quorum into the row key, opens the
    /// hidden branch and restores `x`. `pks` is only needed when verifying.
    pub fn aggregate_to_restore_row(
        &self,
        ac: &AccessStructure,
        row_index: usize,
        label: &[u8],
        shares: &BTreeMap<String, CurveBN>,
        skip_verify: bool,
        pks: Option<&BTreeMap<String, B::Ek>>,
    ) -> Result<Vec<CurveBN>, PveErrors> {
        if !skip_verify {
            let pks = pks.ok_or(PveErrors::BadArg("public keys required for verification"))?;
            self.verify(ac, pks, &self.q, label)?;
        }
        if label != self.label.as_slice() {
            return Err(PveErrors::Crypto("label mismatch"));
        }
        let ac_row = self
            .rows
            .get(row_index)
            .ok_or(PveErrors::BadArg("row index out of range"))?;
        let params = self.q[0].params();

        let mut k = ac.reconstruct(params, shares)?;
        let key = Zeroizing::new(kdf(&Zeroizing::new(k.to_bytes()), ROW_KEY_INFO)?);
        k.clear();
        let c = &ac_row.row.c;
        if c.len() < DEM_NONCE_SIZE {
            return Err(DECRYPTION_FAILED);
        }
        let inner = inner_label_batch(label, &self.q);
        let (iv, ct) = c.split_at(DEM_NONCE_SIZE);
        let plain = Zeroizing::new(dem_decrypt(&key, iv, ct, &inner)?);

        restore_row(&self.q, get_bit(&self.b, row_index), &ac_row.row, &plain)
    }

    /// Runs `party_decrypt_row` for every supplied key and aggregates, trying
    /// rows in order until one restores `Q`. Keys that fail to open their
    /// share are left out as long as the rest still form a quorum.
    pub fn decrypt(
        &self,
        ac: &AccessStructure,
        dks: &BTreeMap<String, B::Dk>,
        label: &[u8],
        skip_verify: bool,
        pks: Option<&BTreeMap<String, B::Ek>>,
    ) -> Result<Vec<CurveBN>, PveErrors> {
        if !skip_verify {
            let pks = pks.ok_or(PveErrors::BadArg("public keys required for verification"))?;
            self.verify(ac, pks, &self.q, label)?;
        }
        let present: BTreeSet<String> = dks.keys().cloned().collect();
        if !ac.enough_for_quorum(&present) {
            return Err(PveErrors::BadArg("insufficient quorum"));
        }

        let mut last_err = PveErrors::Crypto("no row restores Q");
        for row_index in 0..self.rows.len() {
            let mut shares = BTreeMap::new();
            for (path, dk) in dks {
                match self.party_decrypt_row(ac, row_index, path, dk, label) {
                    Ok(share) => {
                        shares.insert(path.clone(), share);
                    }
                    Err(err) => last_err = err,
                }
            }
            let opened: BTreeSet<String> = shares.keys().cloned().collect();
            let restored = if ac.enough_for_quorum(&opened) {
                Some(self.aggregate_to_restore_row(ac, row_index, label, &shares, true, None))
            } else {
                None
            };
            for share in shares.values_mut() {
                share.clear();
            }
            match restored {
                Some(Ok(xs)) => return Ok(xs),
                Some(Err(err)) => last_err = err,
                None => {}
            }
        }
        Err(last_err)
    }

    pub fn get_q(&self) -> &[CurvePoint] {
        &self.q
    }

    pub fn get_label(&self) -> &[u8] {
        &self.label
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        write_header(&mut w, &self.q, &self.label, &self.b);
        for ac_row in &self.rows {
            ac_row.row.write(&mut w);
            w.put_u32(ac_row.quorum_c.len());
            for c in &ac_row.quorum_c {
                w.put_bytes(c);
            }
        }
        w.finish()
    }

    pub fn from_bytes(pke: &B, params: &Arc<Params>, bytes: &[u8]) -> Result<Self, PveErrors> {
        let mut reader = Reader::new(bytes);
        let (q, label, b) = read_header(&mut reader, params)?;
        let mut rows = Vec::with_capacity(KAPPA);
        for _ in 0..KAPPA {
            let row = BatchRow::read(&mut reader)?;
            let count = reader.get_count(4)?;
            let mut quorum_c = Vec::with_capacity(count);
            for _ in 0..count {
                quorum_c.push(reader.get_bytes()?.to_vec());
            }
            rows.push(AcRow { row, quorum_c });
        }
        reader.finish()?;

        Ok(EcPveAc {
            pke: pke.clone(),
            q,
            label,
            b,
            rows,
        })
    }
}

/// Public keys of every leaf, in sorted leaf-path order.
fn leaf_keys<'a, K>(
    ac: &AccessStructure,
    pks: &'a BTreeMap<String, K>,
) -> Result<Vec<&'a K>, PveErrors> {
    ac.list_leaf_names()
        .iter()
        .map(|leaf| pks.get(leaf).ok_or(PveErrors::BadArg("missing leaf public key")))
        .collect()
}

/// Seals `plain` under a row key drawn from `seed` and encrypts the access
/// structure shares of that key to the leaves. A pure function of its inputs.
fn encrypt_branch<B: BasePke>(
    pke: &B,
    ac: &AccessStructure,
    leaf_pks: &[&B::Ek],
    inner: &[u8],
    params: &Arc<Params>,
    seed: &[u8],
    plain: &[u8],
) -> Result<BranchCiphertext, PveErrors> {
    if seed.len() != SEED_SIZE {
        return Err(PveErrors::Crypto("invalid row seed length"));
    }
    let mut drbg = Drbg::new(seed)?;
    let mut k = drbg.gen_bn(params)?;
    let iv = drbg.gen(DEM_NONCE_SIZE)?;
    let shares = ac.share(params, &k, &mut drbg)?;

    let mut quorum_c = Vec::with_capacity(leaf_pks.len());
    for ((_, share), ek) in shares.iter().zip(leaf_pks) {
        let rho = drbg.gen(RHO_SIZE)?;
        quorum_c.push(pke.encrypt(ek, inner, &Zeroizing::new(share.to_bytes()), &rho)?);
    }

    let key = Zeroizing::new(kdf(&Zeroizing::new(k.to_bytes()), ROW_KEY_INFO)?);
    k.clear();
    let mut c = iv.clone();
    c.extend(dem_encrypt(&key, &iv, plain, inner)?);
    Ok(BranchCiphertext { c, quorum_c })
}

fn challenge(
    qs: &[CurvePoint],
    label: &[u8],
    branch0: &[BranchCiphertext],
    branch1: &[BranchCiphertext],
    big_x0: &[Vec<CurvePoint>],
    big_x1: &[Vec<CurvePoint>],
) -> [u8; CHALLENGE_SIZE] {
    let mut ro = RandomOracle::<SHA256Hash>::new(RO_DOMAIN);
    ro.points(qs).bytes(label);
    for branch in [branch0, branch1] {
        let cs: Vec<&[u8]> = branch.iter().map(|bc| bc.c.as_slice()).collect();
        ro.bytes_list(&cs);
    }
    for bc in branch0.iter().chain(branch1) {
        ro.bytes_list(&bc.quorum_c);
    }
    for row in big_x0.iter().chain(big_x1) {
        ro.points(row);
    }
    let mut b = [0u8; CHALLENGE_SIZE];
    b.copy_from_slice(&ro.finalize_bits(KAPPA));
    b
}
