// EmberCL Numeric Tower
//
// Generic arithmetic over fixnum/bignum/ratio/float/complex. `Number` is the
// working representation: extracted from heap objects, computed on, and
// lowered back through normalizing constructors. Contagion order is
// Fixnum -> Bignum -> Ratio -> SingleFloat -> DoubleFloat -> Complex; results
// always renormalize down to the lowest sufficient generality.

use std::cmp::Ordering;

use num_bigint::BigInt;
use num_traits::{FromPrimitive, Signed, ToPrimitive, Zero};

use crate::conditions::LispError;
use crate::heap::Heap;
use crate::types::{NodeId, Object};

#[derive(Clone, Debug, PartialEq)]
pub enum Number {
    Fixnum(i64),
    Big(BigInt),
    /// Invariant: denominator > 1, gcd(num, den) == 1. Produced only by
    /// `Number::ratio`.
    Ratio(BigInt, BigInt),
    Single(f32),
    Double(f64),
    Complex(Box<Number>, Box<Number>),
}

fn gcd(a: &BigInt, b: &BigInt) -> BigInt {
    let mut a = a.abs();
    let mut b = b.abs();
    while !b.is_zero() {
        let t = &a % &b;
        a = b;
        b = t;
    }
    a
}

impl Number {
    // ------------------------------------------------------------------
    // Normalizing constructors
    // ------------------------------------------------------------------

    /// Integer constructor; demotes to Fixnum when the value fits a word.
    pub fn integer(v: BigInt) -> Number {
        match v.to_i64() {
            Some(n) => Number::Fixnum(n),
            None => Number::Big(v),
        }
    }

    /// Ratio constructor: positive denominator, lowest terms, denominator 1
    /// collapses to an integer. Zero denominator is a division error.
    pub fn ratio(num: BigInt, den: BigInt) -> Result<Number, LispError> {
        if den.is_zero() {
            return Err(LispError::DivisionByZero);
        }
        let (num, den) = if den.is_negative() {
            (-num, -den)
        } else {
            (num, den)
        };
        let g = gcd(&num, &den);
        let num = num / &g;
        let den = den / g;
        if den == BigInt::from(1) {
            Ok(Number::integer(num))
        } else {
            Ok(Number::Ratio(num, den))
        }
    }

    /// Complex constructor: parts are brought to matching exactness, and a
    /// complex with exact parts and zero imaginary part collapses to its
    /// real part. Float complexes never collapse.
    pub fn complex(re: Number, im: Number) -> Number {
        let fr = re.float_width().max(im.float_width());
        let (re, im) = match fr {
            2 => (Number::Double(re.to_f64()), Number::Double(im.to_f64())),
            1 => (Number::Single(re.to_f32()), Number::Single(im.to_f32())),
            _ => (re, im),
        };
        if fr == 0 && im.is_exact_zero() {
            return re;
        }
        Number::Complex(Box::new(re), Box::new(im))
    }

    // ------------------------------------------------------------------
    // Heap conversion
    // ------------------------------------------------------------------

    pub fn extract(heap: &Heap, node: NodeId) -> Option<Number> {
        match heap.get_unchecked(node) {
            Object::Fixnum(n) => Some(Number::Fixnum(*n)),
            Object::Bignum(b) => Some(Number::Big(b.clone())),
            Object::Ratio(n, d) => Some(Number::Ratio(n.clone(), d.clone())),
            Object::SingleFloat(f) => Some(Number::Single(*f)),
            Object::DoubleFloat(f) => Some(Number::Double(*f)),
            Object::Complex(re, im) => {
                let re = Number::extract(heap, *re)?;
                let im = Number::extract(heap, *im)?;
                Some(Number::Complex(Box::new(re), Box::new(im)))
            }
            _ => None,
        }
    }

    pub fn lower(self, heap: &mut Heap) -> NodeId {
        match self {
            Number::Fixnum(n) => heap.make_fixnum(n),
            Number::Big(b) => heap.make_integer(b),
            Number::Ratio(n, d) => heap.alloc(Object::Ratio(n, d)),
            Number::Single(f) => heap.make_single_float(f),
            Number::Double(f) => heap.make_double_float(f),
            Number::Complex(re, im) => {
                let re = re.lower(heap);
                let im = im.lower(heap);
                heap.alloc(Object::Complex(re, im))
            }
        }
    }

    // ------------------------------------------------------------------
    // Classification
    // ------------------------------------------------------------------

    pub fn is_integer(&self) -> bool {
        matches!(self, Number::Fixnum(_) | Number::Big(_))
    }

    pub fn is_rational(&self) -> bool {
        matches!(
            self,
            Number::Fixnum(_) | Number::Big(_) | Number::Ratio(_, _)
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Number::Single(_) | Number::Double(_))
    }

    pub fn is_real(&self) -> bool {
        !matches!(self, Number::Complex(_, _))
    }

    fn is_ratio(&self) -> bool {
        matches!(self, Number::Ratio(_, _))
    }

    /// 0 = exact, 1 = single float, 2 = double float.
    fn float_width(&self) -> u8 {
        match self {
            Number::Single(_) => 1,
            Number::Double(_) => 2,
            _ => 0,
        }
    }

    pub fn is_exact_zero(&self) -> bool {
        match self {
            Number::Fixnum(0) => true,
            Number::Big(b) => b.is_zero(),
            _ => false,
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Number::Fixnum(n) => *n == 0,
            Number::Big(b) => b.is_zero(),
            Number::Ratio(_, _) => false,
            Number::Single(f) => *f == 0.0,
            Number::Double(f) => *f == 0.0,
            Number::Complex(re, im) => re.is_zero() && im.is_zero(),
        }
    }

    pub fn to_f64(&self) -> f64 {
        match self {
            Number::Fixnum(n) => *n as f64,
            Number::Big(b) => b.to_f64().unwrap_or(f64::INFINITY),
            Number::Ratio(n, d) => {
                n.to_f64().unwrap_or(f64::INFINITY) / d.to_f64().unwrap_or(f64::INFINITY)
            }
            Number::Single(f) => *f as f64,
            Number::Double(f) => *f,
            Number::Complex(re, _) => re.to_f64(),
        }
    }

    pub fn to_f32(&self) -> f32 {
        self.to_f64() as f32
    }

    /// The value as a BigInt. Only valid on integers; callers reach this
    /// after ruling out every other variant.
    fn expect_int(&self) -> BigInt {
        match self {
            Number::Fixnum(n) => BigInt::from(*n),
            Number::Big(b) => b.clone(),
            _ => unreachable!("expect_int on non-integer"),
        }
    }

    /// A rational as a numerator/denominator pair (integers get denominator 1).
    fn to_pair(&self) -> (BigInt, BigInt) {
        match self {
            Number::Fixnum(n) => (BigInt::from(*n), BigInt::from(1)),
            Number::Big(b) => (b.clone(), BigInt::from(1)),
            Number::Ratio(n, d) => (n.clone(), d.clone()),
            _ => unreachable!("to_pair on non-rational"),
        }
    }

    /// realpart/imagpart; on reals the imaginary part is the zero of
    /// matching exactness.
    pub fn parts(&self) -> (Number, Number) {
        match self {
            Number::Complex(re, im) => ((**re).clone(), (**im).clone()),
            Number::Single(_) => (self.clone(), Number::Single(0.0)),
            Number::Double(_) => (self.clone(), Number::Double(0.0)),
            _ => (self.clone(), Number::Fixnum(0)),
        }
    }

    // ------------------------------------------------------------------
    // Arithmetic
    // ------------------------------------------------------------------

    pub fn add(&self, other: &Number) -> Result<Number, LispError> {
        use Number::*;
        match (self, other) {
            (Complex(_, _), _) | (_, Complex(_, _)) => {
                let (ar, ai) = self.parts();
                let (br, bi) = other.parts();
                Ok(Number::complex(ar.add(&br)?, ai.add(&bi)?))
            }
            (a, b) if a.float_width() == 2 || b.float_width() == 2 => {
                Ok(Double(a.to_f64() + b.to_f64()))
            }
            (a, b) if a.float_width() == 1 || b.float_width() == 1 => {
                Ok(Single(a.to_f32() + b.to_f32()))
            }
            (Fixnum(x), Fixnum(y)) => Ok(match x.checked_add(*y) {
                Some(r) => Fixnum(r),
                None => Big(BigInt::from(*x) + BigInt::from(*y)),
            }),
            (a, b) if a.is_ratio() || b.is_ratio() => {
                let (an, ad) = a.to_pair();
                let (bn, bd) = b.to_pair();
                Number::ratio(&an * &bd + &bn * &ad, ad * bd)
            }
            (a, b) => Ok(Number::integer(a.expect_int() + b.expect_int())),
        }
    }

    pub fn sub(&self, other: &Number) -> Result<Number, LispError> {
        use Number::*;
        match (self, other) {
            (Complex(_, _), _) | (_, Complex(_, _)) => {
                let (ar, ai) = self.parts();
                let (br, bi) = other.parts();
                Ok(Number::complex(ar.sub(&br)?, ai.sub(&bi)?))
            }
            (a, b) if a.float_width() == 2 || b.float_width() == 2 => {
                Ok(Double(a.to_f64() - b.to_f64()))
            }
            (a, b) if a.float_width() == 1 || b.float_width() == 1 => {
                Ok(Single(a.to_f32() - b.to_f32()))
            }
            (Fixnum(x), Fixnum(y)) => Ok(match x.checked_sub(*y) {
                Some(r) => Fixnum(r),
                None => Big(BigInt::from(*x) - BigInt::from(*y)),
            }),
            (a, b) if a.is_ratio() || b.is_ratio() => {
                let (an, ad) = a.to_pair();
                let (bn, bd) = b.to_pair();
                Number::ratio(&an * &bd - &bn * &ad, ad * bd)
            }
            (a, b) => Ok(Number::integer(a.expect_int() - b.expect_int())),
        }
    }

    pub fn mul(&self, other: &Number) -> Result<Number, LispError> {
        use Number::*;
        match (self, other) {
            (Complex(_, _), _) | (_, Complex(_, _)) => {
                let (a, b) = self.parts();
                let (c, d) = other.parts();
                let re = a.mul(&c)?.sub(&b.mul(&d)?)?;
                let im = a.mul(&d)?.add(&b.mul(&c)?)?;
                Ok(Number::complex(re, im))
            }
            (a, b) if a.float_width() == 2 || b.float_width() == 2 => {
                Ok(Double(a.to_f64() * b.to_f64()))
            }
            (a, b) if a.float_width() == 1 || b.float_width() == 1 => {
                Ok(Single(a.to_f32() * b.to_f32()))
            }
            (Fixnum(x), Fixnum(y)) => Ok(match x.checked_mul(*y) {
                Some(r) => Fixnum(r),
                None => Big(BigInt::from(*x) * BigInt::from(*y)),
            }),
            (a, b) if a.is_ratio() || b.is_ratio() => {
                let (an, ad) = a.to_pair();
                let (bn, bd) = b.to_pair();
                Number::ratio(an * bn, ad * bd)
            }
            (a, b) => Ok(Number::integer(a.expect_int() * b.expect_int())),
        }
    }

    pub fn div(&self, other: &Number) -> Result<Number, LispError> {
        use Number::*;
        if other.is_exact_zero() {
            return Err(LispError::DivisionByZero);
        }
        match (self, other) {
            (Complex(_, _), _) | (_, Complex(_, _)) => {
                let (a, b) = self.parts();
                let (c, d) = other.parts();
                let denom = c.mul(&c)?.add(&d.mul(&d)?)?;
                let re = a.mul(&c)?.add(&b.mul(&d)?)?.div(&denom)?;
                let im = b.mul(&c)?.sub(&a.mul(&d)?)?.div(&denom)?;
                Ok(Number::complex(re, im))
            }
            (a, b) if a.float_width() == 2 || b.float_width() == 2 => {
                Ok(Double(a.to_f64() / b.to_f64()))
            }
            (a, b) if a.float_width() == 1 || b.float_width() == 1 => {
                Ok(Single(a.to_f32() / b.to_f32()))
            }
            (a, b) => {
                // exact division always goes through the ratio constructor;
                // (/ 10 5) comes back out as the integer 2
                let (an, ad) = a.to_pair();
                let (bn, bd) = b.to_pair();
                Number::ratio(an * bd, ad * bn)
            }
        }
    }

    pub fn neg(&self) -> Number {
        match self {
            Number::Fixnum(n) => match n.checked_neg() {
                Some(r) => Number::Fixnum(r),
                None => Number::Big(-BigInt::from(*n)),
            },
            Number::Big(b) => Number::integer(-b.clone()),
            Number::Ratio(n, d) => Number::Ratio(-n.clone(), d.clone()),
            Number::Single(f) => Number::Single(-f),
            Number::Double(f) => Number::Double(-f),
            Number::Complex(re, im) => Number::complex(re.neg(), im.neg()),
        }
    }

    /// (/ x) = 1/x
    pub fn invert(&self) -> Result<Number, LispError> {
        Number::Fixnum(1).div(self)
    }

    pub fn abs(&self) -> Number {
        match self {
            Number::Fixnum(n) => match n.checked_abs() {
                Some(r) => Number::Fixnum(r),
                None => Number::Big(BigInt::from(*n).abs()),
            },
            Number::Big(b) => Number::integer(b.abs()),
            Number::Ratio(n, d) => Number::Ratio(n.abs(), d.clone()),
            Number::Single(f) => Number::Single(f.abs()),
            Number::Double(f) => Number::Double(f.abs()),
            Number::Complex(re, im) => {
                // magnitude
                let m = (re.to_f64().powi(2) + im.to_f64().powi(2)).sqrt();
                if re.float_width().max(im.float_width()) == 1 {
                    Number::Single(m as f32)
                } else {
                    Number::Double(m)
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Comparison
    // ------------------------------------------------------------------

    /// Numeric = : works across the whole tower including complex.
    pub fn num_eq(&self, other: &Number) -> bool {
        match (self, other) {
            (Number::Complex(_, _), _) | (_, Number::Complex(_, _)) => {
                let (ar, ai) = self.parts();
                let (br, bi) = other.parts();
                ar.num_eq(&br) && ai.num_eq(&bi)
            }
            _ => self.compare_reals(other) == Some(Ordering::Equal),
        }
    }

    /// Ordering over reals; None for complex operands or NaN.
    pub fn compare_reals(&self, other: &Number) -> Option<Ordering> {
        if !self.is_real() || !other.is_real() {
            return None;
        }
        if self.is_float() || other.is_float() {
            return self.to_f64().partial_cmp(&other.to_f64());
        }
        let (an, ad) = self.to_pair();
        let (bn, bd) = other.to_pair();
        Some((an * bd).cmp(&(bn * ad)))
    }

    // ------------------------------------------------------------------
    // Truncation family
    // ------------------------------------------------------------------

    /// TRUNCATE: quotient toward zero (always an integer) and a remainder
    /// satisfying q*divisor + r == dividend at operand precision. Huge float
    /// quotients synthesize bignums from the IEEE decomposition.
    pub fn truncate(&self, divisor: &Number) -> Result<(Number, Number), LispError> {
        if !self.is_real() || !divisor.is_real() {
            return Err(LispError::General(
                "TRUNCATE requires real arguments".to_string(),
            ));
        }
        if divisor.is_exact_zero() {
            return Err(LispError::DivisionByZero);
        }
        if self.is_float() || divisor.is_float() {
            let wide = self.float_width().max(divisor.float_width()) == 2;
            let a = self.to_f64();
            let b = divisor.to_f64();
            if b == 0.0 {
                return Err(LispError::DivisionByZero);
            }
            let q = (a / b).trunc();
            let quotient = float_to_integer(q)?;
            let rem = a - q * b;
            let remainder = if wide {
                Number::Double(rem)
            } else {
                Number::Single(rem as f32)
            };
            return Ok((quotient, remainder));
        }
        // exact path: trunc((an/ad) / (bn/bd)) = (an*bd) quo (ad*bn)
        let (an, ad) = self.to_pair();
        let (bn, bd) = divisor.to_pair();
        let q = (&an * &bd) / (&ad * &bn); // BigInt division truncates toward zero
        let quotient = Number::integer(q.clone());
        let remainder = self.sub(&Number::integer(q).mul(divisor)?)?;
        Ok((quotient, remainder))
    }

    /// MOD: remainder of floor division: sign follows the divisor.
    pub fn floor_mod(&self, divisor: &Number) -> Result<Number, LispError> {
        let (_, r) = self.truncate(divisor)?;
        if r.is_zero() {
            return Ok(r);
        }
        let r_neg = r.compare_reals(&Number::Fixnum(0)) == Some(Ordering::Less);
        let d_neg = divisor.compare_reals(&Number::Fixnum(0)) == Some(Ordering::Less);
        if r_neg != d_neg {
            r.add(divisor)
        } else {
            Ok(r)
        }
    }

    /// REM: remainder of truncating division: sign follows the dividend.
    pub fn trunc_rem(&self, divisor: &Number) -> Result<Number, LispError> {
        let (_, r) = self.truncate(divisor)?;
        Ok(r)
    }

    // ------------------------------------------------------------------
    // Integer predicates
    // ------------------------------------------------------------------

    pub fn is_even(&self) -> Option<bool> {
        match self {
            Number::Fixnum(n) => Some(n % 2 == 0),
            Number::Big(b) => Some((b % BigInt::from(2)).is_zero()),
            _ => None,
        }
    }

    pub fn gcd_with(&self, other: &Number) -> Option<Number> {
        if !self.is_integer() || !other.is_integer() {
            return None;
        }
        Some(Number::integer(gcd(
            &self.expect_int(),
            &other.expect_int(),
        )))
    }

    /// NUMERATOR/DENOMINATOR on rationals.
    pub fn numerator(&self) -> Option<Number> {
        match self {
            Number::Fixnum(_) | Number::Big(_) => Some(self.clone()),
            Number::Ratio(n, _) => Some(Number::integer(n.clone())),
            _ => None,
        }
    }

    pub fn denominator(&self) -> Option<Number> {
        match self {
            Number::Fixnum(_) | Number::Big(_) => Some(Number::Fixnum(1)),
            Number::Ratio(_, d) => Some(Number::integer(d.clone())),
            _ => None,
        }
    }
}

/// Convert an already-truncated float to an exact integer. Goes through the
/// IEEE mantissa/exponent decomposition, so quotients beyond fixnum range
/// come out as bignums.
pub fn float_to_integer(f: f64) -> Result<Number, LispError> {
    if !f.is_finite() {
        return Err(LispError::General(
            "cannot convert non-finite float to integer".to_string(),
        ));
    }
    match BigInt::from_f64(f) {
        Some(b) => Ok(Number::integer(b)),
        None => Err(LispError::General(
            "cannot convert float to integer".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(n: i64) -> Number {
        Number::Fixnum(n)
    }

    #[test]
    fn test_fixnum_overflow_promotes() {
        let r = int(i64::MAX).add(&int(1)).unwrap();
        assert!(matches!(r, Number::Big(_)));
        // and demotes back when a result fits
        let r2 = r.sub(&int(1)).unwrap();
        assert_eq!(r2, int(i64::MAX));
    }

    #[test]
    fn test_ratio_normalization() {
        let r = Number::ratio(BigInt::from(4), BigInt::from(8)).unwrap();
        assert_eq!(r, Number::Ratio(BigInt::from(1), BigInt::from(2)));

        // denominator 1 collapses to an integer
        let r = Number::ratio(BigInt::from(10), BigInt::from(5)).unwrap();
        assert_eq!(r, int(2));

        // sign moves to the numerator
        let r = Number::ratio(BigInt::from(1), BigInt::from(-2)).unwrap();
        assert_eq!(r, Number::Ratio(BigInt::from(-1), BigInt::from(2)));

        assert_eq!(
            Number::ratio(BigInt::from(1), BigInt::from(0)),
            Err(LispError::DivisionByZero)
        );
    }

    #[test]
    fn test_exact_division() {
        let r = int(1).div(&int(3)).unwrap();
        assert_eq!(r, Number::Ratio(BigInt::from(1), BigInt::from(3)));

        // 1/3 + 2/3 = 1
        let t = Number::ratio(BigInt::from(2), BigInt::from(3)).unwrap();
        assert_eq!(r.add(&t).unwrap(), int(1));
    }

    #[test]
    fn test_float_contagion() {
        let r = int(1).add(&Number::Single(0.5)).unwrap();
        assert_eq!(r, Number::Single(1.5));

        let r = Number::Single(1.0).add(&Number::Double(0.5)).unwrap();
        assert_eq!(r, Number::Double(1.5));

        // ratio * single stays single
        let third = Number::ratio(BigInt::from(1), BigInt::from(2)).unwrap();
        let r = third.mul(&Number::Single(2.0)).unwrap();
        assert_eq!(r, Number::Single(1.0));
    }

    #[test]
    fn test_complex_canonicalization() {
        // exact zero imaginary part collapses
        let c = Number::complex(int(3), int(0));
        assert_eq!(c, int(3));

        // float complex does not
        let c = Number::complex(Number::Double(3.0), Number::Double(0.0));
        assert!(matches!(c, Number::Complex(_, _)));

        // mixed parts float-contaminate each other
        let c = Number::complex(int(1), Number::Double(2.0));
        if let Number::Complex(re, _) = &c {
            assert_eq!(**re, Number::Double(1.0));
        } else {
            panic!("expected complex");
        }
    }

    #[test]
    fn test_complex_multiplication_sheds_zero() {
        // #C(0 1) * #C(0 1) = -1
        let i = Number::complex(int(0), int(1));
        let r = i.mul(&i).unwrap();
        assert_eq!(r, int(-1));
    }

    #[test]
    fn test_truncate_invariant() {
        for (a, b) in [(7i64, 2i64), (-7, 2), (7, -2), (-7, -2), (0, 5)] {
            let (q, r) = int(a).truncate(&int(b)).unwrap();
            let back = q.mul(&int(b)).unwrap().add(&r).unwrap();
            assert_eq!(back, int(a), "q*b + r == a for ({}, {})", a, b);
            // remainder sign matches dividend when nonzero
            if !r.is_zero() {
                assert_eq!(
                    r.compare_reals(&int(0)) == Some(Ordering::Less),
                    a < 0,
                    "sign(r) for ({}, {})",
                    a,
                    b
                );
            }
        }
    }

    #[test]
    fn test_truncate_float_remainder() {
        let (q, r) = Number::Double(7.5).truncate(&int(2)).unwrap();
        assert_eq!(q, int(3));
        assert_eq!(r, Number::Double(1.5));
    }

    #[test]
    fn test_huge_float_quotient() {
        let (q, _) = Number::Double(1.0e30).truncate(&int(1)).unwrap();
        assert!(matches!(q, Number::Big(_)));
    }

    #[test]
    fn test_mod_rem_signs() {
        let m = int(-7).floor_mod(&int(2)).unwrap();
        assert_eq!(m, int(1));
        let r = int(-7).trunc_rem(&int(2)).unwrap();
        assert_eq!(r, int(-1));
    }

    #[test]
    fn test_cross_type_equality() {
        assert!(int(1).num_eq(&Number::Double(1.0)));
        let half = Number::ratio(BigInt::from(1), BigInt::from(2)).unwrap();
        assert!(half.num_eq(&Number::Single(0.5)));
        assert!(!int(1).num_eq(&int(2)));
    }

    #[test]
    fn test_invert() {
        assert_eq!(
            int(4).invert().unwrap(),
            Number::Ratio(BigInt::from(1), BigInt::from(4))
        );
        assert_eq!(int(0).invert(), Err(LispError::DivisionByZero));
    }
}
