//! Bit-vector and boolean term algebra.
//!
//! `Expr` is an immutable, cheaply-clonable handle to a solver term. It is
//! the only type the rest of the crate uses to talk about formulas: the IR
//! lowers into it, the type system emits constraints as it, and the solver
//! facade consumes it. Terms are either booleans or fixed-width bit-vectors;
//! the two sorts never mix inside one operation.
//!
//! A malformed construction (mismatched widths, an operand of the wrong
//! sort) does not panic. It produces a poisoned handle and latches a
//! process-global flag that makes every subsequent solver check report
//! `Invalid` instead of silently proving nonsense.

use std::fmt;

use z3::ast::{forall_const, Ast, Bool, Dynamic, BV};

use crate::solver;

/// An immutable handle to a solver term: a boolean or a bit-vector.
///
/// Cloning is cheap (the underlying term is reference counted). A handle
/// produced by a malformed construction is poisoned; poisoned handles
/// propagate through every operation.
#[derive(Clone)]
pub struct Expr(Option<Dynamic>);

impl Expr {
    /// A fresh bit-vector variable with the given name and width.
    pub fn var(name: &str, bits: u32) -> Expr {
        if bits == 0 || name.is_empty() {
            return Expr::malformed();
        }
        Expr::from_bv(BV::new_const(name, bits))
    }

    /// An unsigned bit-vector constant of the given width.
    pub fn uint(value: u64, bits: u32) -> Expr {
        if bits == 0 {
            return Expr::malformed();
        }
        Expr::from_bv(BV::from_u64(value, bits))
    }

    /// A signed bit-vector constant of the given width (truncated mod 2^w).
    pub fn int(value: i64, bits: u32) -> Expr {
        if bits == 0 {
            return Expr::malformed();
        }
        Expr::from_bv(BV::from_i64(value, bits))
    }

    /// The most negative signed value of the given width (`1000...0`).
    pub fn int_min(bits: u32) -> Expr {
        if bits == 0 || bits > 64 {
            return Expr::malformed();
        }
        Expr::uint(1u64 << (bits - 1), bits)
    }

    /// A boolean constant.
    pub fn from_bool(b: bool) -> Expr {
        Expr(Some(Dynamic::from_ast(&Bool::from_bool(b))))
    }

    pub(crate) fn malformed() -> Expr {
        solver::latch_invalid();
        Expr(None)
    }

    fn from_bv(bv: BV) -> Expr {
        Expr(Some(Dynamic::from_ast(&bv)))
    }

    fn from_boolean(b: Bool) -> Expr {
        Expr(Some(Dynamic::from_ast(&b)))
    }

    pub(crate) fn from_dynamic(d: Dynamic) -> Expr {
        Expr(Some(d))
    }

    pub(crate) fn dynamic(&self) -> Option<&Dynamic> {
        self.0.as_ref()
    }

    fn bv(&self) -> Option<BV> {
        self.0.as_ref().and_then(|d| d.as_bv())
    }

    fn boolean(&self) -> Option<Bool> {
        self.0.as_ref().and_then(|d| d.as_bool())
    }

    /// True when the handle holds a term (no malformed construction fed it).
    pub fn is_valid(&self) -> bool {
        self.0.is_some()
    }

    /// True when the term is a boolean.
    pub fn is_boolean(&self) -> bool {
        self.boolean().is_some()
    }

    /// The width of a bit-vector term. Zero for booleans and poisoned
    /// handles; callers that reach that case have a programming error
    /// upstream, which the invalid latch reports at the next check.
    pub fn bits(&self) -> u32 {
        self.bv().map(|bv| bv.get_size()).unwrap_or(0)
    }

    fn literal(&self) -> Option<bool> {
        let b = self.boolean()?;
        b.as_bool().or_else(|| b.simplify().as_bool())
    }

    /// Cheap probe: does the term fold to the constant `true`?
    pub fn is_true(&self) -> bool {
        self.literal() == Some(true)
    }

    /// Cheap probe: does the term fold to the constant `false`?
    pub fn is_false(&self) -> bool {
        self.literal() == Some(false)
    }

    /// Probe a bit-vector literal for its unsigned value.
    pub fn as_u64(&self) -> Option<u64> {
        let bv = self.bv()?;
        bv.as_u64().or_else(|| bv.simplify().as_u64())
    }

    /// Probe a bit-vector literal for its signed value.
    pub fn as_i64(&self) -> Option<i64> {
        let bv = self.bv()?;
        bv.as_i64().or_else(|| bv.simplify().as_i64())
    }

    fn bool_op(&self, rhs: &Expr, f: impl FnOnce(&Bool, &Bool) -> Bool) -> Expr {
        match (self.boolean(), rhs.boolean()) {
            (Some(a), Some(b)) => Expr::from_boolean(f(&a, &b)),
            _ => Expr::malformed(),
        }
    }

    fn bv_op(&self, rhs: &Expr, f: impl FnOnce(&BV, &BV) -> BV) -> Expr {
        match (self.bv(), rhs.bv()) {
            (Some(a), Some(b)) if a.get_size() == b.get_size() => Expr::from_bv(f(&a, &b)),
            _ => Expr::malformed(),
        }
    }

    fn bv_pred(&self, rhs: &Expr, f: impl FnOnce(&BV, &BV) -> Bool) -> Expr {
        match (self.bv(), rhs.bv()) {
            (Some(a), Some(b)) if a.get_size() == b.get_size() => Expr::from_boolean(f(&a, &b)),
            _ => Expr::malformed(),
        }
    }

    /// Logical conjunction, folding constant operands away.
    pub fn and(&self, rhs: &Expr) -> Expr {
        match (self.literal(), rhs.literal()) {
            (Some(false), _) | (_, Some(false)) => Expr::from_bool(false),
            (Some(true), _) => rhs.clone(),
            (_, Some(true)) => self.clone(),
            _ => self.bool_op(rhs, |a, b| Bool::and(&[a.clone(), b.clone()])),
        }
    }

    /// Logical disjunction, folding constant operands away.
    pub fn or(&self, rhs: &Expr) -> Expr {
        match (self.literal(), rhs.literal()) {
            (Some(true), _) | (_, Some(true)) => Expr::from_bool(true),
            (Some(false), _) => rhs.clone(),
            (_, Some(false)) => self.clone(),
            _ => self.bool_op(rhs, |a, b| Bool::or(&[a.clone(), b.clone()])),
        }
    }

    /// Logical negation.
    pub fn not(&self) -> Expr {
        match self.literal() {
            Some(b) => Expr::from_bool(!b),
            None => match self.boolean() {
                Some(b) => Expr::from_boolean(b.not()),
                None => Expr::malformed(),
            },
        }
    }

    /// `self → rhs`.
    pub fn implies(&self, rhs: &Expr) -> Expr {
        match (self.literal(), rhs.literal()) {
            (Some(false), _) | (_, Some(true)) => Expr::from_bool(true),
            (Some(true), _) => rhs.clone(),
            (_, Some(false)) => self.not(),
            _ => self.bool_op(rhs, |a, b| a.implies(b)),
        }
    }

    /// `self ∧ ¬rhs`, the negation of an implication.
    pub fn not_implies(&self, rhs: &Expr) -> Expr {
        self.and(&rhs.not())
    }

    /// Term equality. Both sides must be bit-vectors of identical width, or
    /// both booleans.
    pub fn eq(&self, rhs: &Expr) -> Expr {
        if let (Some(a), Some(b)) = (self.bv(), rhs.bv()) {
            if a.get_size() == b.get_size() {
                return Expr::from_boolean(a.eq(&b));
            }
            return Expr::malformed();
        }
        match (self.boolean(), rhs.boolean()) {
            (Some(a), Some(b)) => Expr::from_boolean(a.iff(&b)),
            _ => Expr::malformed(),
        }
    }

    /// Term disequality.
    pub fn ne(&self, rhs: &Expr) -> Expr {
        self.eq(rhs).not()
    }

    /// Wrapping addition.
    pub fn add(&self, rhs: &Expr) -> Expr {
        self.bv_op(rhs, |a, b| a.bvadd(b))
    }

    /// Wrapping subtraction.
    pub fn sub(&self, rhs: &Expr) -> Expr {
        self.bv_op(rhs, |a, b| a.bvsub(b))
    }

    /// Wrapping multiplication.
    pub fn mul(&self, rhs: &Expr) -> Expr {
        self.bv_op(rhs, |a, b| a.bvmul(b))
    }

    /// Signed division. Total in the algebra; division-by-zero and
    /// `IntMin / -1` are undefined-behavior conditions the producer must
    /// track alongside the value.
    pub fn sdiv(&self, rhs: &Expr) -> Expr {
        self.bv_op(rhs, |a, b| a.bvsdiv(b))
    }

    /// Unsigned division. Total in the algebra, like [`Expr::sdiv`].
    pub fn udiv(&self, rhs: &Expr) -> Expr {
        self.bv_op(rhs, |a, b| a.bvudiv(b))
    }

    /// Shift left.
    pub fn shl(&self, rhs: &Expr) -> Expr {
        self.bv_op(rhs, |a, b| a.bvshl(b))
    }

    /// Logical shift right.
    pub fn lshr(&self, rhs: &Expr) -> Expr {
        self.bv_op(rhs, |a, b| a.bvlshr(b))
    }

    /// Arithmetic shift right.
    pub fn ashr(&self, rhs: &Expr) -> Expr {
        self.bv_op(rhs, |a, b| a.bvashr(b))
    }

    /// Two's-complement negation.
    pub fn neg(&self) -> Expr {
        match self.bv() {
            Some(a) => Expr::from_bv(a.bvneg()),
            None => Expr::malformed(),
        }
    }

    /// Unsigned less-than.
    pub fn ult(&self, rhs: &Expr) -> Expr {
        self.bv_pred(rhs, |a, b| a.bvult(b))
    }

    /// Unsigned less-or-equal.
    pub fn ule(&self, rhs: &Expr) -> Expr {
        self.bv_pred(rhs, |a, b| a.bvule(b))
    }

    /// Signed less-than.
    pub fn slt(&self, rhs: &Expr) -> Expr {
        self.bv_pred(rhs, |a, b| a.bvslt(b))
    }

    /// Signed less-or-equal.
    pub fn sle(&self, rhs: &Expr) -> Expr {
        self.bv_pred(rhs, |a, b| a.bvsle(b))
    }

    /// No-wrap predicate for addition: true when `self + rhs` neither
    /// overflows nor underflows in the chosen signedness.
    pub fn add_no_overflow(&self, rhs: &Expr, signed: bool) -> Expr {
        let over = self.bv_pred(rhs, |a, b| a.bvadd_no_overflow(b, signed));
        if signed {
            over.and(&self.bv_pred(rhs, |a, b| a.bvadd_no_underflow(b)))
        } else {
            over
        }
    }

    /// No-wrap predicate for subtraction.
    pub fn sub_no_overflow(&self, rhs: &Expr, signed: bool) -> Expr {
        let under = self.bv_pred(rhs, |a, b| a.bvsub_no_underflow(b, signed));
        if signed {
            under.and(&self.bv_pred(rhs, |a, b| a.bvsub_no_overflow(b)))
        } else {
            under
        }
    }

    /// No-wrap predicate for multiplication.
    pub fn mul_no_overflow(&self, rhs: &Expr, signed: bool) -> Expr {
        let over = self.bv_pred(rhs, |a, b| a.bvmul_no_overflow(b, signed));
        if signed {
            over.and(&self.bv_pred(rhs, |a, b| a.bvmul_no_underflow(b)))
        } else {
            over
        }
    }

    /// If-then-else over two terms of the same sort and width.
    pub fn ite(&self, then: &Expr, els: &Expr) -> Expr {
        let cond = match self.boolean() {
            Some(c) => c,
            None => return Expr::malformed(),
        };
        match (then.0.as_ref(), els.0.as_ref()) {
            (Some(a), Some(b)) => {
                let same_sort = match (a.as_bv(), b.as_bv()) {
                    (Some(x), Some(y)) => x.get_size() == y.get_size(),
                    (None, None) => a.as_bool().is_some() && b.as_bool().is_some(),
                    _ => false,
                };
                if same_sort {
                    Expr::from_dynamic(cond.ite(a, b))
                } else {
                    Expr::malformed()
                }
            }
            _ => Expr::malformed(),
        }
    }

    /// Zero-extend by `amount` extra bits.
    pub fn zext(&self, amount: u32) -> Expr {
        match self.bv() {
            Some(a) => Expr::from_bv(a.zero_ext(amount)),
            None => Expr::malformed(),
        }
    }

    /// Sign-extend by `amount` extra bits.
    pub fn sext(&self, amount: u32) -> Expr {
        match self.bv() {
            Some(a) => Expr::from_bv(a.sign_ext(amount)),
            None => Expr::malformed(),
        }
    }

    /// Truncate to the low `tobw` bits.
    pub fn trunc(&self, tobw: u32) -> Expr {
        match self.bv() {
            Some(a) if tobw >= 1 && tobw <= a.get_size() => {
                Expr::from_bv(a.extract(tobw - 1, 0))
            }
            _ => Expr::malformed(),
        }
    }

    /// Concatenate, `self` becoming the high bits.
    pub fn concat(&self, rhs: &Expr) -> Expr {
        match (self.bv(), rhs.bv()) {
            (Some(a), Some(b)) => Expr::from_bv(a.concat(&b)),
            _ => Expr::malformed(),
        }
    }

    /// Universal quantification of `body` over `vars`. Free variables of the
    /// body that are not in `vars` stay free. An empty set or a constant
    /// body folds to the body itself.
    pub fn forall(vars: &[Expr], body: &Expr) -> Expr {
        if body.literal().is_some() || vars.is_empty() {
            return body.clone();
        }
        let b = match body.boolean() {
            Some(b) => b,
            None => return Expr::malformed(),
        };
        let mut bounds: Vec<&dyn Ast> = Vec::with_capacity(vars.len());
        for v in vars {
            match v.0.as_ref() {
                Some(d) => bounds.push(d),
                None => return Expr::malformed(),
            }
        }
        Expr::from_boolean(forall_const(&bounds, &[], &b))
    }

    /// Rewrite free occurrences of each `(from, to)` variable pair. Widths
    /// of the two sides must agree.
    pub fn subst(&self, repls: &[(Expr, Expr)]) -> Expr {
        let d = match self.0.as_ref() {
            Some(d) => d,
            None => return Expr::malformed(),
        };
        let mut pairs: Vec<(&Dynamic, &Dynamic)> = Vec::with_capacity(repls.len());
        for (from, to) in repls {
            match (from.0.as_ref(), to.0.as_ref()) {
                (Some(f), Some(t)) if from.bits() == to.bits() => pairs.push((f, t)),
                _ => return Expr::malformed(),
            }
        }
        Expr::from_dynamic(d.substitute(&pairs))
    }

    /// Structural (term-graph) equality, not SMT equivalence.
    pub fn same_term(&self, rhs: &Expr) -> bool {
        match (self.0.as_ref(), rhs.0.as_ref()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => true,
            _ => false,
        }
    }
}

impl From<bool> for Expr {
    fn from(b: bool) -> Expr {
        Expr::from_bool(b)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(d) => write!(f, "{}", d),
            None => write!(f, "<invalid>"),
        }
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::Session;

    #[test]
    fn constant_folding_of_booleans() {
        let _s = Session::new();
        let t = Expr::from_bool(true);
        let f = Expr::from_bool(false);
        assert!(t.and(&f).is_false());
        assert!(t.or(&f).is_true());
        assert!(f.implies(&t).is_true());
        assert!(t.not_implies(&f).is_true());
        assert!(f.not().is_true());
    }

    #[test]
    fn folding_skips_the_untouched_operand() {
        let _s = Session::new();
        let x = Expr::var("fold_x", 8);
        let p = x.eq(&Expr::uint(1, 8));
        assert!(p.and(&Expr::from_bool(true)).same_term(&p));
        assert!(p.or(&Expr::from_bool(false)).same_term(&p));
    }

    #[test]
    fn bitvector_arithmetic_folds_to_literals() {
        let _s = Session::new();
        let a = Expr::uint(250, 8);
        let b = Expr::uint(10, 8);
        assert_eq!(a.add(&b).as_u64(), Some(4)); // wraps mod 2^8
        assert_eq!(b.mul(&b).as_u64(), Some(100));
        assert_eq!(a.sub(&b).as_u64(), Some(240));
        assert_eq!(Expr::int(-8, 8).ashr(&Expr::uint(1, 8)).as_i64(), Some(-4));
    }

    #[test]
    fn int_min_is_the_sign_bit_pattern() {
        let _s = Session::new();
        assert_eq!(Expr::int_min(8).as_u64(), Some(0x80));
        assert_eq!(Expr::int_min(8).as_i64(), Some(-128));
        assert_eq!(Expr::int_min(1).as_u64(), Some(1));
    }

    #[test]
    fn width_mismatch_poisons_the_result() {
        let _s = Session::new();
        let a = Expr::var("mm_a", 8);
        let b = Expr::var("mm_b", 16);
        assert!(!a.add(&b).is_valid());
        assert!(!a.eq(&b).is_valid());
        // and the session-level latch is now set
        assert!(crate::solver::invalid_latched());
    }

    #[test]
    fn forall_folds_constant_bodies() {
        let _s = Session::new();
        let x = Expr::var("q_x", 8);
        assert!(Expr::forall(&[x.clone()], &Expr::from_bool(true)).is_true());
        assert!(Expr::forall(&[x], &Expr::from_bool(false)).is_false());
    }

    #[test]
    fn substitution_is_by_name_identity() {
        let _s = Session::new();
        let x = Expr::var("subst_x", 8);
        let y = Expr::var("subst_y", 8);
        let sum = x.add(&Expr::uint(1, 8));
        let replaced = sum.subst(&[(x, y.clone())]);
        assert!(replaced.same_term(&y.add(&Expr::uint(1, 8))));
    }

    #[test]
    fn zext_trunc_concat_widths() {
        let _s = Session::new();
        let a = Expr::uint(0xAB, 8);
        assert_eq!(a.zext(8).bits(), 16);
        assert_eq!(a.zext(8).as_u64(), Some(0xAB));
        assert_eq!(a.trunc(4).bits(), 4);
        assert_eq!(a.trunc(4).as_u64(), Some(0xB));
        assert_eq!(a.concat(&Expr::uint(0xCD, 8)).as_u64(), Some(0xABCD));
    }
}
