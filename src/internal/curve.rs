use crate::internal::errors::PveErrors;

use std::fmt;
use std::ops::{Add, Div, Mul, Sub};
use std::sync::Arc;

use openssl::bn::{BigNum, BigNumContext, BigNumRef};
use openssl::ec::{EcGroup, EcGroupRef, EcPoint, EcPointRef, PointConversionForm};
use openssl::nid::Nid;

const SUPPORTED_CURVES: [Nid; 4] = [
    Nid::SECP256K1,
    Nid::X9_62_PRIME256V1,
    Nid::SECP384R1,
    Nid::SECP521R1,
];

pub struct Params {
    group: EcGroup,
    g_point: EcPoint,
    order: BigNum,
    nid: Nid,
    field_order_size_in_bytes: usize,
    group_order_size_in_bytes: usize,
}

impl Params {
    pub fn new(curve_name: Nid) -> Result<Self, PveErrors> {
        if !SUPPORTED_CURVES.contains(&curve_name) {
            return Err(PveErrors::BadArg("unsupported curve"));
        }
        let mut ctx = BigNumContext::new()?;
        let group = EcGroup::from_curve_name(curve_name)?;
        let g_point = group
            .generator_opt()
            .ok_or(PveErrors::BadArg("curve without generator"))?
            .to_owned(&group)?;
        let mut order = BigNum::new()?;
        group.order(&mut order, &mut ctx)?;
        let field_order_size_in_bytes = ((group.degree() + 7) / 8) as usize;
        let group_order_size_in_bytes = order.num_bytes() as usize;
        Ok(Params {
            group,
            g_point,
            order,
            nid: curve_name,
            field_order_size_in_bytes,
            group_order_size_in_bytes,
        })
    }

    /// Curve codes are OpenSSL NIDs.
    pub fn from_code(code: i32) -> Result<Self, PveErrors> {
        Self::new(Nid::from_raw(code))
    }

    pub fn code(&self) -> i32 {
        self.nid.as_raw()
    }

    pub fn nid(&self) -> Nid {
        self.nid
    }

    pub fn group(&self) -> &EcGroupRef {
        &self.group
    }

    pub fn g_point(&self) -> &EcPointRef {
        &self.g_point
    }

    pub fn order(&self) -> &BigNumRef {
        &self.order
    }

    pub fn order_bits(&self) -> usize {
        self.order.num_bits() as usize
    }

    pub fn field_order_size_in_bytes(&self) -> usize {
        self.field_order_size_in_bytes
    }

    pub fn group_order_size_in_bytes(&self) -> usize {
        self.group_order_size_in_bytes
    }
}

impl PartialEq for Params {
    fn eq(&self, other: &Params) -> bool {
        self.nid == other.nid
    }
}

impl fmt::Debug for Params {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Params {{ curve: {:?} }}", self.nid.short_name())
    }
}

fn bn_ctx() -> BigNumContext {
    BigNumContext::new().expect("Error in BN context creation")
}

/// Scalar modulo the group order.
pub struct CurveBN {
    bn: BigNum,
    params: Arc<Params>,
}

impl CurveBN {
    pub fn zero(params: &Arc<Params>) -> Self {
        CurveBN {
            bn: BigNum::new().expect("Error in BN creation"),
            params: Arc::clone(params),
        }
    }

    pub fn from_u32(n: u32, params: &Arc<Params>) -> Self {
        CurveBN::from_big_num(
            &BigNum::from_u32(n).expect("Error in BN creation"),
            params,
        )
    }

    /// Takes any non-negative integer and reduces it modulo the group order.
    pub fn from_big_num(n: &BigNumRef, params: &Arc<Params>) -> Self {
        let mut res = BigNum::new().expect("Error in BN creation");
        res.nnmod(n, params.order(), &mut bn_ctx())
            .expect("Error in BN modulo");
        CurveBN {
            bn: res,
            params: Arc::clone(params),
        }
    }

    /// Parses the fixed-length big-endian encoding produced by `to_bytes`.
    /// Values outside `[0, q)` are rejected instead of being reduced.
    pub fn from_bytes(bytes: &[u8], params: &Arc<Params>) -> Result<Self, PveErrors> {
        if bytes.len() != Self::expected_bytes_length(params) {
            return Err(PveErrors::InvalidBytes);
        }
        let bn = BigNum::from_slice(bytes).map_err(|_| PveErrors::InvalidBytes)?;
        if &*bn >= params.order() {
            return Err(PveErrors::InvalidBytes);
        }
        Ok(CurveBN {
            bn,
            params: Arc::clone(params),
        })
    }

    pub fn rand_curve_bn(params: &Arc<Params>) -> Self {
        let mut rand = BigNum::new().expect("Error in BN creation");
        loop {
            params
                .order()
                .rand_range(&mut rand)
                .expect("Error in Randomization");
            if rand.num_bits() > 0 {
                break;
            }
        }

        CurveBN {
            bn: rand,
            params: Arc::clone(params),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.bn
            .to_vec_padded(self.params.group_order_size_in_bytes() as i32)
            .expect("Error: BN size too large")
    }

    pub fn expected_bytes_length(params: &Arc<Params>) -> usize {
        params.group_order_size_in_bytes()
    }

    pub fn is_zero(&self) -> bool {
        self.bn.num_bits() == 0
    }

    /// Wipes the value in place.
    pub fn clear(&mut self) {
        self.bn.clear();
    }

    pub fn invert(&self) -> Self {
        let mut res = BigNum::new().expect("Error in BN creation");
        res.mod_inverse(&self.bn, self.params.order(), &mut bn_ctx())
            .expect("Error in BN inversion");

        CurveBN {
            bn: res,
            params: Arc::clone(&self.params),
        }
    }

    pub fn bn(&self) -> &BigNumRef {
        &self.bn
    }

    pub fn params(&self) -> &Arc<Params> {
        &self.params
    }
}

impl PartialEq for CurveBN {
    fn eq(&self, other: &CurveBN) -> bool {
        self.params == other.params && self.bn == other.bn
    }
}

impl Clone for CurveBN {
    fn clone(&self) -> Self {
        CurveBN {
            bn: self.bn.to_owned().expect("Error in BN cloning"),
            params: Arc::clone(&self.params),
        }
    }
}

impl fmt::Debug for CurveBN {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CurveBN {{ bn: {:?}}}", self.bn)
    }
}

impl Add for &CurveBN {
    type Output = CurveBN;

    fn add(self, other: &CurveBN) -> CurveBN {
        let mut res = BigNum::new().expect("Error in BN creation");
        res.mod_add(&self.bn, &other.bn, self.params.order(), &mut bn_ctx())
            .expect("Error in BN addition");

        CurveBN {
            bn: res,
            params: Arc::clone(&self.params),
        }
    }
}

impl Sub for &CurveBN {
    type Output = CurveBN;

    fn sub(self, other: &CurveBN) -> CurveBN {
        let mut res = BigNum::new().expect("Error in BN creation");
        res.mod_sub(&self.bn, &other.bn, self.params.order(), &mut bn_ctx())
            .expect("Error in BN subtraction");

        CurveBN {
            bn: res,
            params: Arc::clone(&self.params),
        }
    }
}

impl Mul for &CurveBN {
    type Output = CurveBN;

    fn mul(self, other: &CurveBN) -> CurveBN {
        let mut res = BigNum::new().expect("Error in BN creation");
        res.mod_mul(&self.bn, &other.bn, self.params.order(), &mut bn_ctx())
            .expect("Error in BN multiplication");

        CurveBN {
            bn: res,
            params: Arc::clone(&self.params),
        }
    }
}

impl Div for &CurveBN {
    type Output = CurveBN;

    fn div(self, other: &CurveBN) -> CurveBN {
        self * &other.invert()
    }
}

pub struct CurvePoint {
    point: EcPoint,
    params: Arc<Params>,
}

impl CurvePoint {
    pub fn from_ec_point(p: &EcPointRef, params: &Arc<Params>) -> Self {
        CurvePoint {
            point: p.to_owned(params.group()).expect("Error in Point cloning"),
            params: Arc::clone(params),
        }
    }

    /// Accepts compressed or uncompressed SEC1 encodings. OpenSSL rejects
    /// encodings that do not lie on the curve.
    pub fn from_bytes(bytes: &[u8], params: &Arc<Params>) -> Result<Self, PveErrors> {
        if bytes.len() != Self::expected_bytes_length(params)
            && bytes.len() != Self::uncompressed_bytes_length(params)
        {
            return Err(PveErrors::InvalidBytes);
        }
        let mut ctx = BigNumContext::new()?;
        match EcPoint::from_bytes(params.group(), bytes, &mut ctx) {
            Ok(point) => Ok(CurvePoint {
                point,
                params: Arc::clone(params),
            }),
            Err(_) => Err(PveErrors::InvalidBytes),
        }
    }

    pub fn from_uncompressed_bytes(bytes: &[u8], params: &Arc<Params>) -> Result<Self, PveErrors> {
        if bytes.len() != Self::uncompressed_bytes_length(params) || bytes[0] != 0x04 {
            return Err(PveErrors::InvalidBytes);
        }
        Self::from_bytes(bytes, params)
    }

    pub fn mul_gen(other: &CurveBN, params: &Arc<Params>) -> Self {
        let mut res = EcPoint::new(params.group()).expect("Error in Point creation");
        res.mul_generator2(params.group(), &other.bn, &mut bn_ctx())
            .expect("Error in Point multiplication");

        CurvePoint {
            point: res,
            params: Arc::clone(params),
        }
    }

    pub fn expected_bytes_length(params: &Arc<Params>) -> usize {
        1 + params.field_order_size_in_bytes()
    }

    pub fn uncompressed_bytes_length(params: &Arc<Params>) -> usize {
        1 + 2 * params.field_order_size_in_bytes()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode(PointConversionForm::COMPRESSED)
    }

    pub fn to_uncompressed_bytes(&self) -> Vec<u8> {
        self.encode(PointConversionForm::UNCOMPRESSED)
    }

    fn encode(&self, form: PointConversionForm) -> Vec<u8> {
        self.point
            .to_bytes(self.params.group(), form, &mut bn_ctx())
            .expect("Error in Point to bytes")
    }

    /// Big-endian affine x coordinate, padded to the field size.
    pub fn x_coordinate(&self) -> Result<Vec<u8>, PveErrors> {
        if self.point.is_infinity(self.params.group()) {
            return Err(PveErrors::Crypto("point at infinity"));
        }
        let mut x = BigNum::new()?;
        let mut y = BigNum::new()?;
        let mut ctx = BigNumContext::new()?;
        self.point
            .affine_coordinates_gfp(self.params.group(), &mut x, &mut y, &mut ctx)?;
        Ok(x.to_vec_padded(self.params.field_order_size_in_bytes() as i32)?)
    }

    /// On the curve and not the point at infinity.
    pub fn is_valid(&self) -> bool {
        let group = self.params.group();
        !self.point.is_infinity(group)
            && self
                .point
                .is_on_curve(group, &mut bn_ctx())
                .unwrap_or(false)
    }

    pub fn point(&self) -> &EcPointRef {
        &self.point
    }

    pub fn params(&self) -> &Arc<Params> {
        &self.params
    }
}

impl PartialEq for CurvePoint {
    fn eq(&self, other: &CurvePoint) -> bool {
        self.params == other.params
            && self
                .point
                .eq(self.params.group(), &other.point, &mut bn_ctx())
                .expect("Error in Point comparison")
    }
}

impl Clone for CurvePoint {
    fn clone(&self) -> Self {
        CurvePoint::from_ec_point(&self.point, &self.params)
    }
}

impl fmt::Debug for CurvePoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CurvePoint {{ {:02x?} }}", self.to_bytes())
    }
}

impl Add for &CurvePoint {
    type Output = CurvePoint;

    fn add(self, other: &CurvePoint) -> CurvePoint {
        let mut res = EcPoint::new(self.params.group()).expect("Error in Point creation");
        res.add(self.params.group(), &self.point, &other.point, &mut bn_ctx())
            .expect("Error in Point addition");

        CurvePoint {
            point: res,
            params: Arc::clone(&self.params),
        }
    }
}

impl Sub for &CurvePoint {
    type Output = CurvePoint;

    fn sub(self, other: &CurvePoint) -> CurvePoint {
        let mut ctx = bn_ctx();
        let mut neg = other
            .point
            .to_owned(self.params.group())
            .expect("Error in Point cloning");
        neg.invert2(self.params.group(), &mut ctx)
            .expect("Error in Point negation");
        let mut res = EcPoint::new(self.params.group()).expect("Error in Point creation");
        res.add(self.params.group(), &self.point, &neg, &mut ctx)
            .expect("Error in Point subtraction");

        CurvePoint {
            point: res,
            params: Arc::clone(&self.params),
        }
    }
}

impl Mul<&CurveBN> for &CurvePoint {
    type Output = CurvePoint;

    fn mul(self, other: &CurveBN) -> CurvePoint {
        let mut res = EcPoint::new(self.params.group()).expect("Error in Point creation");
        res.mul2(self.params.group(), &self.point, &other.bn, &mut bn_ctx())
            .expect("Error in Point multiplication");

        CurvePoint {
            point: res,
            params: Arc::clone(&self.params),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p256() -> Arc<Params> {
        Arc::new(Params::new(Nid::X9_62_PRIME256V1).unwrap())
    }

    #[test]
    fn curve_bn() {
        let params = p256();
        let one = &CurveBN::from_u32(1, &params);
        let two = &CurveBN::from_u32(2, &params);
        let ten = &CurveBN::from_u32(10, &params);
        let three = one + two;
        assert_eq!(three.bn().to_vec(), vec![3; 1]);

        let nine = ten - one;
        assert_eq!(nine.bn().to_vec(), vec![9; 1]);

        let three_again = &nine / &three;
        assert_eq!(three_again.bn().to_vec(), vec![3; 1]);

        let eighteen = &nine * two;
        assert_eq!(eighteen.bn().to_vec(), vec![18; 1]);

        let minus_one = &CurveBN::zero(&params) - one;
        assert!((&minus_one + one).is_zero());
    }

    #[test]
    fn unsupported_curve() {
        assert_eq!(
            Params::new(Nid::SECT163K1).unwrap_err(),
            PveErrors::BadArg("unsupported curve")
        );
        assert!(Params::from_code(-1).is_err());
        let params = Params::from_code(Nid::SECP256K1.as_raw()).unwrap();
        assert_eq!(params.code(), Nid::SECP256K1.as_raw());
    }

    #[test]
    fn scalar_bytes_fixed_length() {
        let params = p256();
        let small = CurveBN::from_u32(7, &params);
        let bytes = small.to_bytes();
        assert_eq!(bytes.len(), 32);
        assert_eq!(CurveBN::from_bytes(&bytes, &params).unwrap(), small);

        assert_eq!(
            CurveBN::from_bytes(&bytes[1..], &params).unwrap_err(),
            PveErrors::InvalidBytes
        );
        let order = params.order().to_vec();
        assert_eq!(
            CurveBN::from_bytes(&order, &params).unwrap_err(),
            PveErrors::InvalidBytes
        );
    }

    #[test]
    fn point_encodings() {
        let params = p256();
        let x = CurveBN::rand_curve_bn(&params);
        let p = CurvePoint::mul_gen(&x, &params);
        assert!(p.is_valid());

        let compressed = p.to_bytes();
        let uncompressed = p.to_uncompressed_bytes();
        assert_eq!(compressed.len(), 33);
        assert_eq!(uncompressed.len(), 65);
        assert_eq!(uncompressed[0], 0x04);
        assert_eq!(CurvePoint::from_bytes(&compressed, &params).unwrap(), p);
        assert_eq!(
            CurvePoint::from_uncompressed_bytes(&uncompressed, &params).unwrap(),
            p
        );
        assert!(CurvePoint::from_uncompressed_bytes(&compressed, &params).is_err());

        let mut off_curve = uncompressed.clone();
        off_curve[64] ^= 1;
        assert_eq!(
            CurvePoint::from_bytes(&off_curve, &params).unwrap_err(),
            PveErrors::InvalidBytes
        );
    }

    #[test]
    fn point_arithmetic() {
        let params = p256();
        let a = CurveBN::rand_curve_bn(&params);
        let b = CurveBN::rand_curve_bn(&params);
        let a_g = CurvePoint::mul_gen(&a, &params);
        let b_g = CurvePoint::mul_gen(&b, &params);

        assert_eq!(&a_g + &b_g, CurvePoint::mul_gen(&(&a + &b), &params));
        assert_eq!(&a_g - &b_g, CurvePoint::mul_gen(&(&a - &b), &params));
        let g = CurvePoint::from_ec_point(params.g_point(), &params);
        assert_eq!(&g * &a, a_g);
        assert!(!(&a_g - &a_g).is_valid());
    }

    #[test]
    fn arithmetic_on_every_curve() {
        for nid in SUPPORTED_CURVES {
            let params = Arc::new(Params::new(nid).unwrap());
            let a = CurveBN::rand_curve_bn(&params);
            let b = CurveBN::rand_curve_bn(&params);
            let a_g = CurvePoint::mul_gen(&a, &params);
            let b_g = CurvePoint::mul_gen(&b, &params);
            let g = CurvePoint::from_ec_point(params.g_point(), &params);

            assert_eq!(&a_g * &b, &b_g * &a);
            assert_eq!(&(&g * &a) - &b_g, CurvePoint::mul_gen(&(&a - &b), &params));
            assert_eq!(
                CurvePoint::from_bytes(&a_g.to_bytes(), &params).unwrap(),
                a_g
            );
            assert_eq!(a.to_bytes().len(), params.group_order_size_in_bytes());
        }
    }

    #[test]
    fn points_on_different_curves_differ() {
        let p256 = p256();
        let k1 = Arc::new(Params::new(Nid::SECP256K1).unwrap());
        let one_p256 = CurvePoint::mul_gen(&CurveBN::from_u32(1, &p256), &p256);
        let one_k1 = CurvePoint::mul_gen(&CurveBN::from_u32(1, &k1), &k1);
        assert_ne!(one_p256, one_k1);
    }
}
