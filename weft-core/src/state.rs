//! Symbolic execution of functions.
//!
//! Execution turns a typed [`Function`] into formulas: every value gets a
//! `(value, non_poison)` pair, the state accumulates one running
//! undefined-behavior predicate, and a `ret` captures the return domain
//! (path condition ∧ UB) together with the returned pair. The executor is
//! deterministic, walks blocks in layout order, and never calls the solver.
//!
//! Poison and UB stay separate on purpose: flag violations (`nsw`, `nuw`,
//! `exact`) taint the produced value, while division and shift preconditions
//! cut the execution's domain.

use crate::expr::Expr;
use crate::ir::{self, BinOpKind, Function, Instr, ValueId, ValueKind};

/// The observable semantics of one value: a bit-vector and a boolean
/// marking it poison-free.
#[derive(Clone, Debug)]
pub struct StateValue {
    /// The computed bits.
    pub value: Expr,
    /// True when the value is not poison.
    pub non_poison: Expr,
}

impl StateValue {
    /// Pair a value with its poison predicate.
    pub fn new(value: Expr, non_poison: Expr) -> StateValue {
        StateValue { value, non_poison }
    }

    /// Select between two state values.
    pub fn mk_if(cond: &Expr, then: &StateValue, els: &StateValue) -> StateValue {
        StateValue {
            value: cond.ite(&then.value, &els.value),
            non_poison: cond.ite(&then.non_poison, &els.non_poison),
        }
    }

    /// Width of the value bits.
    pub fn bits(&self) -> u32 {
        self.value.bits()
    }

    /// Zero-extend the value by `amount` bits.
    pub fn zext(&self, amount: u32) -> StateValue {
        StateValue {
            value: self.value.zext(amount),
            non_poison: self.non_poison.clone(),
        }
    }

    /// Truncate the value to `tobw` bits.
    pub fn trunc(&self, tobw: u32) -> StateValue {
        StateValue {
            value: self.value.trunc(tobw),
            non_poison: self.non_poison.clone(),
        }
    }

    /// Zero-extend or truncate to exactly `tobw` bits.
    pub fn zext_or_trunc(&self, tobw: u32) -> StateValue {
        let bits = self.bits();
        if tobw > bits {
            self.zext(tobw - bits)
        } else if tobw < bits {
            self.trunc(tobw)
        } else {
            self.clone()
        }
    }

    /// Concatenate, `self` becoming the high bits; poison joins.
    pub fn concat(&self, other: &StateValue) -> StateValue {
        StateValue {
            value: self.value.concat(&other.value),
            non_poison: self.non_poison.and(&other.non_poison),
        }
    }

    /// The value is defined and usable: its bits conjoined with poison
    /// freedom. Only meaningful for single-bit values.
    pub fn both(&self) -> Expr {
        self.value
            .eq(&Expr::uint(1, self.bits()))
            .and(&self.non_poison)
    }

    /// Structural equality of both components.
    pub fn eq(&self, other: &StateValue) -> bool {
        self.value.same_term(&other.value) && self.non_poison.same_term(&other.non_poison)
    }

    /// Apply a variable substitution to both components.
    pub fn subst(&self, repls: &[(Expr, Expr)]) -> StateValue {
        StateValue {
            value: self.value.subst(repls),
            non_poison: self.non_poison.subst(repls),
        }
    }
}

/// Per-function symbolic execution state.
///
/// Owns the identity-keyed value bindings and borrows the function for its
/// lifetime.
pub struct State<'f> {
    f: &'f Function,
    values: Vec<Option<StateValue>>,
    quant_vars: Vec<Expr>,
    ub: Expr,
    returned: bool,
    return_domain: Expr,
    return_val: Option<StateValue>,
}

impl<'f> State<'f> {
    /// Fresh pre-execution state for a function.
    pub fn new(f: &'f Function) -> State<'f> {
        State {
            f,
            values: vec![None; f.values().count()],
            quant_vars: Vec::new(),
            ub: Expr::from_bool(true),
            returned: false,
            return_domain: Expr::from_bool(false),
            return_val: None,
        }
    }

    /// The function being executed.
    pub fn function(&self) -> &'f Function {
        self.f
    }

    /// Binding of a value. Panics when execution never reached it; operands
    /// always resolve to earlier bindings in well-formed functions.
    pub fn get(&self, id: ValueId) -> &StateValue {
        self.values[id]
            .as_ref()
            .expect("operand executed before definition")
    }

    /// True when the value has a binding.
    pub fn is_bound(&self, id: ValueId) -> bool {
        self.values[id].is_some()
    }

    /// Conjoin a condition into the running UB predicate.
    pub fn add_ub(&mut self, cond: Expr) {
        self.ub = self.ub.and(&cond);
    }

    /// The accumulated UB predicate.
    pub fn ub(&self) -> &Expr {
        &self.ub
    }

    /// A fresh universally-quantified variable (used for `undef`).
    pub fn fresh_quant_var(&mut self, bits: u32) -> Expr {
        let v = Expr::var(&format!("undef!{}", ir::fresh_id()), bits);
        self.quant_vars.push(v.clone());
        v
    }

    /// Variables to quantify universally in refinement queries.
    pub fn quant_vars(&self) -> &[Expr] {
        &self.quant_vars
    }

    /// Whether execution reached a `ret`.
    pub fn fn_returned(&self) -> bool {
        self.returned
    }

    /// The domain under which the return value is meaningful.
    pub fn return_domain(&self) -> &Expr {
        &self.return_domain
    }

    /// The returned value pair.
    pub fn return_val(&self) -> &StateValue {
        self.return_val
            .as_ref()
            .expect("function did not return")
    }

    fn bind(&mut self, id: ValueId, val: StateValue) {
        self.values[id] = Some(val);
    }
}

fn binop_value(op: BinOpKind, a: &Expr, b: &Expr) -> Expr {
    match op {
        BinOpKind::Add => a.add(b),
        BinOpKind::Sub => a.sub(b),
        BinOpKind::Mul => a.mul(b),
        BinOpKind::SDiv => a.sdiv(b),
        BinOpKind::UDiv => a.udiv(b),
        BinOpKind::Shl => a.shl(b),
        BinOpKind::LShr => a.lshr(b),
        BinOpKind::AShr => a.ashr(b),
    }
}

fn exec_binop(st: &mut State<'_>, id: ValueId, instr: &Instr) {
    let (op, flags, lhs, rhs) = match instr {
        Instr::BinOp {
            op,
            flags,
            lhs,
            rhs,
        } => (*op, *flags, *lhs, *rhs),
        _ => unreachable!(),
    };
    let a = st.get(lhs).clone();
    let b = st.get(rhs).clone();
    let w = st.function().value(id).ty().bits();

    let value = binop_value(op, &a.value, &b.value);
    let mut non_poison = a.non_poison.and(&b.non_poison);

    match op {
        BinOpKind::Add => {
            if flags.nsw {
                non_poison = non_poison.and(&a.value.add_no_overflow(&b.value, true));
            }
            if flags.nuw {
                non_poison = non_poison.and(&a.value.add_no_overflow(&b.value, false));
            }
        }
        BinOpKind::Sub => {
            if flags.nsw {
                non_poison = non_poison.and(&a.value.sub_no_overflow(&b.value, true));
            }
            if flags.nuw {
                non_poison = non_poison.and(&a.value.sub_no_overflow(&b.value, false));
            }
        }
        BinOpKind::Mul => {
            if flags.nsw {
                non_poison = non_poison.and(&a.value.mul_no_overflow(&b.value, true));
            }
            if flags.nuw {
                non_poison = non_poison.and(&a.value.mul_no_overflow(&b.value, false));
            }
        }
        BinOpKind::Shl => {
            // shifted-out bits must be recoverable
            if flags.nsw {
                non_poison = non_poison.and(&value.ashr(&b.value).eq(&a.value));
            }
            if flags.nuw {
                non_poison = non_poison.and(&value.lshr(&b.value).eq(&a.value));
            }
        }
        BinOpKind::SDiv | BinOpKind::UDiv => {
            if flags.exact {
                non_poison = non_poison.and(&value.mul(&b.value).eq(&a.value));
            }
        }
        BinOpKind::LShr | BinOpKind::AShr => {
            if flags.exact {
                non_poison = non_poison.and(&value.shl(&b.value).eq(&a.value));
            }
        }
    }

    match op {
        BinOpKind::SDiv => {
            let zero = Expr::uint(0, w);
            let overflow = a
                .value
                .eq(&Expr::int_min(w))
                .and(&b.value.eq(&Expr::int(-1, w)));
            st.add_ub(b.value.ne(&zero).and(&overflow.not()));
        }
        BinOpKind::UDiv => {
            st.add_ub(b.value.ne(&Expr::uint(0, w)));
        }
        BinOpKind::Shl | BinOpKind::LShr | BinOpKind::AShr => {
            st.add_ub(b.value.ult(&Expr::uint(u64::from(w), w)));
        }
        _ => {}
    }

    st.bind(id, StateValue::new(value, non_poison));
}

/// Execute a function symbolically, in place.
///
/// Inputs, constants and `undef` values are bound first in arena order, then
/// each block's instructions run in program order. Instructions after an
/// `unreachable` in the same block are not bound.
pub fn sym_exec(st: &mut State<'_>) {
    let f = st.function();

    for (id, node) in f.values() {
        match node.kind() {
            ValueKind::Input => {
                let v = Expr::var(node.name(), node.ty().bits());
                st.bind(id, StateValue::new(v, Expr::from_bool(true)));
            }
            ValueKind::IntConst { val } => {
                let v = Expr::int(*val, node.ty().bits());
                st.bind(id, StateValue::new(v, Expr::from_bool(true)));
            }
            ValueKind::Undef => {
                let v = st.fresh_quant_var(node.ty().bits());
                st.bind(id, StateValue::new(v, Expr::from_bool(true)));
            }
            ValueKind::Instr(_) => {}
        }
    }

    for (bi, bb) in f.blocks().iter().enumerate() {
        // no branch instructions exist in the checked fragment, so only the
        // entry block is reachable
        let domain = Expr::from_bool(bi == 0);
        for &id in bb.instrs() {
            let instr = match f.value(id).kind() {
                ValueKind::Instr(i) => i.clone(),
                _ => unreachable!("blocks hold instructions only"),
            };
            match instr {
                Instr::BinOp { .. } => exec_binop(st, id, &instr),
                Instr::Return { val } => {
                    if !st.returned {
                        st.returned = true;
                        st.return_domain = domain.and(&st.ub);
                        st.return_val = Some(st.get(val).clone());
                    }
                }
                Instr::Unreachable => {
                    st.add_ub(domain.not());
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinOpFlags, BinOpKind, Instr};
    use crate::solver::{Session, Solver};
    use crate::types::Type;

    fn binop_fn(op: BinOpKind, flags: BinOpFlags, rhs_const: Option<i64>) -> Function {
        let mut f = Function::new("src");
        let a = f.add_input(Type::int(8), "%a");
        let b = match rhs_const {
            Some(c) => f.add_constant(Type::int(8), c),
            None => f.add_input(Type::int(8), "%b"),
        };
        let x = f.push_instr(
            Type::int(8),
            "%x",
            Instr::BinOp {
                op,
                flags,
                lhs: a,
                rhs: b,
            },
        );
        f.push_instr(Type::int(8), "", Instr::Return { val: x });
        f
    }

    #[test]
    fn constant_addition_folds_to_a_literal() {
        let _s = Session::new();
        let mut f = Function::new("c");
        let two = f.add_constant(Type::int(8), 2);
        let three = f.add_constant(Type::int(8), 3);
        let x = f.push_instr(
            Type::int(8),
            "%x",
            Instr::BinOp {
                op: BinOpKind::Add,
                flags: BinOpFlags::NONE,
                lhs: two,
                rhs: three,
            },
        );
        f.push_instr(Type::int(8), "", Instr::Return { val: x });
        let mut st = State::new(&f);
        sym_exec(&mut st);
        assert!(st.fn_returned());
        assert_eq!(st.return_val().value.as_u64(), Some(5));
        assert!(st.return_val().non_poison.is_true());
        assert!(st.return_domain().is_true());
    }

    #[test]
    fn division_by_constant_zero_empties_the_domain() {
        let _s = Session::new();
        let f = binop_fn(BinOpKind::UDiv, BinOpFlags::NONE, Some(0));
        let mut st = State::new(&f);
        sym_exec(&mut st);
        assert!(st.return_domain().is_false());
    }

    #[test]
    fn oversized_shift_amount_empties_the_domain() {
        let _s = Session::new();
        let f = binop_fn(BinOpKind::Shl, BinOpFlags::NONE, Some(9));
        let mut st = State::new(&f);
        sym_exec(&mut st);
        assert!(st.return_domain().is_false());
    }

    #[test]
    fn sdiv_is_undefined_exactly_at_zero_and_signed_overflow() {
        let _s = Session::new();
        let f = binop_fn(BinOpKind::SDiv, BinOpFlags::NONE, None);
        let mut st = State::new(&f);
        sym_exec(&mut st);
        let solver = Solver::new();
        let a = Expr::var("%a", 8);
        let b = Expr::var("%b", 8);
        // IntMin / -1 is outside the domain
        solver.add(&st.ub().clone());
        solver.add(&a.eq(&Expr::int_min(8)));
        solver.add(&b.eq(&Expr::int(-1, 8)));
        assert!(solver.check().is_unsat());
    }

    #[test]
    fn nsw_flag_taints_only_the_poison_side() {
        let _s = Session::new();
        let flags = BinOpFlags {
            nsw: true,
            ..BinOpFlags::NONE
        };
        let f = binop_fn(BinOpKind::Add, flags, None);
        let mut st = State::new(&f);
        sym_exec(&mut st);
        // UB untouched...
        assert!(st.return_domain().is_true());
        // ...but 127 + 1 overflows signed, so poison is reachable
        let solver = Solver::new();
        solver.add(&st.return_val().non_poison.not());
        solver.add(&Expr::var("%a", 8).eq(&Expr::int(127, 8)));
        solver.add(&Expr::var("%b", 8).eq(&Expr::int(1, 8)));
        assert!(solver.check().is_sat());
    }

    #[test]
    fn undef_introduces_one_quantified_variable_per_value() {
        let _s = Session::new();
        crate::ir::reset_fresh_ids();
        let mut f = Function::new("u");
        let a = f.add_input(Type::int(8), "%a");
        let u = f.add_undef(Type::int(8));
        let x = f.push_instr(
            Type::int(8),
            "%x",
            Instr::BinOp {
                op: BinOpKind::Add,
                flags: BinOpFlags::NONE,
                lhs: a,
                rhs: u,
            },
        );
        f.push_instr(Type::int(8), "", Instr::Return { val: x });
        let mut st = State::new(&f);
        sym_exec(&mut st);
        assert_eq!(st.quant_vars().len(), 1);
    }

    #[test]
    fn unreachable_cuts_ub_and_stops_the_block() {
        let _s = Session::new();
        let mut f = Function::new("dead");
        let a = f.add_input(Type::int(8), "%a");
        f.push_instr(Type::Void, "", Instr::Unreachable);
        f.push_instr(Type::int(8), "", Instr::Return { val: a });
        let mut st = State::new(&f);
        sym_exec(&mut st);
        assert!(st.ub().is_false());
        assert!(!st.fn_returned());
    }

    #[test]
    fn state_value_zext_or_trunc() {
        let _s = Session::new();
        let v = StateValue::new(Expr::uint(0xFF, 8), Expr::from_bool(true));
        assert_eq!(v.zext_or_trunc(16).bits(), 16);
        assert_eq!(v.zext_or_trunc(16).value.as_u64(), Some(0xFF));
        assert_eq!(v.zext_or_trunc(4).value.as_u64(), Some(0xF));
        assert!(v.zext_or_trunc(8).eq(&v));
    }
}
