use crate::internal::curve::{CurveBN, CurvePoint, Params};
use crate::internal::errors::PveErrors;
use crate::internal::schemes::sha256;

use std::sync::Arc;

pub fn random_bytes(n: usize) -> Result<Vec<u8>, PveErrors> {
    let mut buf = vec![0u8; n];
    getrandom::getrandom(&mut buf).map_err(|_| PveErrors::General("system rng failure"))?;
    Ok(buf)
}

pub fn vec_to_hex(v: &[u8]) -> String {
    v.iter().map(|b| format!("{:02x}", b)).collect()
}

/// `label || "-" || hex(sha256(Q))`, binding every inner ciphertext to Q.
pub fn inner_label(label: &[u8], q: &CurvePoint) -> Vec<u8> {
    with_digest(label, &q.to_bytes())
}

pub fn inner_label_batch(label: &[u8], qs: &[CurvePoint]) -> Vec<u8> {
    let mut w = Writer::new();
    w.put_u32(qs.len());
    for q in qs {
        w.put_raw(&q.to_bytes());
    }
    with_digest(label, &w.finish())
}

fn with_digest(label: &[u8], data: &[u8]) -> Vec<u8> {
    let mut out = label.to_vec();
    out.push(b'-');
    out.extend_from_slice(vec_to_hex(&sha256(data)).as_bytes());
    out
}

/// Concatenation of fixed-size scalar encodings.
pub fn scalars_to_bin(xs: &[CurveBN]) -> Vec<u8> {
    xs.iter().flat_map(|x| x.to_bytes()).collect()
}

pub fn scalars_from_bin(bin: &[u8], n: usize, params: &Arc<Params>) -> Result<Vec<CurveBN>, PveErrors> {
    let size = CurveBN::expected_bytes_length(params);
    if bin.len() != n * size {
        return Err(PveErrors::InvalidBytes);
    }
    bin.chunks(size)
        .map(|chunk| CurveBN::from_bytes(chunk, params))
        .collect()
}

pub fn lambda_coeff(id_i: &CurveBN, selected_ids: &[CurveBN]) -> CurveBN {
    if selected_ids.len() < 2 {
        return CurveBN::from_u32(1, id_i.params());
    }

    let mut res = CurveBN::from_u32(1, id_i.params());
    for id_j in selected_ids {
        if id_j != id_i {
            res = &(&res * id_j) / &(id_j - id_i);
        }
    }

    res
}

/// Horner evaluation of `coeffs[0] + coeffs[1] x + ...`.
pub fn poly_eval(coeffs: &[CurveBN], x: &CurveBN) -> CurveBN {
    let mut iter = coeffs.iter().rev();
    let mut res = match iter.next() {
        Some(c) => c.clone(),
        None => return CurveBN::zero(x.params()),
    };
    for c in iter {
        res = &(&res * x) + c;
    }

    res
}

/// Builder for the big-endian, u32 length-prefixed wire format.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Writer { buf: Vec::new() }
    }

    pub fn put_u32(&mut self, n: usize) -> &mut Self {
        self.buf.extend_from_slice(&(n as u32).to_be_bytes());
        self
    }

    pub fn put_raw(&mut self, data: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(data);
        self
    }

    pub fn put_bytes(&mut self, data: &[u8]) -> &mut Self {
        self.put_u32(data.len());
        self.put_raw(data)
    }

    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

pub struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Reader { data }
    }

    pub fn get_u32(&mut self) -> Result<usize, PveErrors> {
        let raw = self.get_raw(4)?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize)
    }

    pub fn get_raw(&mut self, n: usize) -> Result<&'a [u8], PveErrors> {
        if self.data.len() < n {
            return Err(PveErrors::InvalidBytes);
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Ok(head)
    }

    pub fn get_bytes(&mut self) -> Result<&'a [u8], PveErrors> {
        let n = self.get_u32()?;
        self.get_raw(n)
    }

    /// Element count that cannot exceed what the remaining input could hold.
    pub fn get_count(&mut self, min_item_size: usize) -> Result<usize, PveErrors> {
        let n = self.get_u32()?;
        if n.saturating_mul(min_item_size.max(1)) > self.data.len() {
            return Err(PveErrors::InvalidBytes);
        }
        Ok(n)
    }

    pub fn finish(self) -> Result<(), PveErrors> {
        if self.data.is_empty() {
            Ok(())
        } else {
            Err(PveErrors::InvalidBytes)
        }
    }
}
