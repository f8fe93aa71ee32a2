use crate::internal::curve::{CurveBN, Params};
use crate::internal::errors::PveErrors;
use crate::internal::schemes::sha256;
use crate::internal::utils::random_bytes;

use std::sync::Arc;

use openssl::bn::BigNum;
use openssl::symm::{Cipher, Crypter, Mode};

pub const SEED_SIZE: usize = 16;
const KEY_SIZE: usize = 16;
const FULL_SEED_SIZE: usize = 32;
/// Extra bits drawn before reducing mod q, keeping the bias below 2^-64.
const SEC_P_STAT: usize = 64;

/// Deterministic byte generator keyed by a seed: the AES-128-CTR keystream.
///
/// A 32-byte seed is used directly as key and counter block. Any other seed
/// (of at least 16 bytes) is mixed in as `sha256(gen(16) || seed)` over the
/// all-zero instance, so equal seeds always give equal output.
pub struct Drbg {
    crypter: Crypter,
}

impl Drbg {
    pub fn new(seed: &[u8]) -> Result<Self, PveErrors> {
        if seed.len() < SEED_SIZE {
            return Err(PveErrors::BadArg("drbg seed too short"));
        }
        if seed.len() == FULL_SEED_SIZE {
            return Ok(Drbg {
                crypter: Self::keyed(&seed[..KEY_SIZE], &seed[KEY_SIZE..])?,
            });
        }

        let zero = [0u8; KEY_SIZE];
        let mut drbg = Drbg {
            crypter: Self::keyed(&zero, &zero)?,
        };
        let mut material = drbg.gen(KEY_SIZE)?;
        material.extend_from_slice(seed);
        let h = sha256(&material);
        drbg.crypter = Self::keyed(&h[..KEY_SIZE], &h[KEY_SIZE..])?;
        Ok(drbg)
    }

    fn keyed(key: &[u8], iv: &[u8]) -> Result<Crypter, PveErrors> {
        Ok(Crypter::new(
            Cipher::aes_128_ctr(),
            Mode::Encrypt,
            key,
            Some(iv),
        )?)
    }

    pub fn gen(&mut self, n: usize) -> Result<Vec<u8>, PveErrors> {
        let zeros = vec![0u8; n];
        let mut out = vec![0u8; n + Cipher::aes_128_ctr().block_size()];
        let written = self.crypter.update(&zeros, &mut out)?;
        if written != n {
            return Err(PveErrors::General("drbg short output"));
        }
        out.truncate(n);
        Ok(out)
    }

    /// Uniform scalar mod q from `bits(q) + 64` keystream bits.
    pub fn gen_bn(&mut self, params: &Arc<Params>) -> Result<CurveBN, PveErrors> {
        let bits = params.order_bits() + SEC_P_STAT;
        let len = (bits + 7) / 8;
        let mut buf = self.gen(len)?;
        buf[0] &= 0xffu8 >> (len * 8 - bits);
        let n = BigNum::from_slice(&buf)?;
        Ok(CurveBN::from_big_num(&n, params))
    }

    /// `n` scalars, each reduced from `order_size + 8` keystream bytes.
    pub fn gen_bns(&mut self, n: usize, params: &Arc<Params>) -> Result<Vec<CurveBN>, PveErrors> {
        let chunk = params.group_order_size_in_bytes() + SEC_P_STAT / 8;
        let source = self.gen(n * chunk)?;
        source
            .chunks(chunk)
            .map(|bytes| -> Result<CurveBN, PveErrors> {
                let n = BigNum::from_slice(bytes)?;
                Ok(CurveBN::from_big_num(&n, params))
            })
            .collect()
    }
}

/// Draws from the generator when one is supplied, else from the OS.
pub fn gen_or_random(drbg: Option<&mut Drbg>, n: usize) -> Result<Vec<u8>, PveErrors> {
    match drbg {
        Some(drbg) => drbg.gen(n),
        None => random_bytes(n),
    }
}
