//! SSA values, instructions, and functions.
//!
//! A [`Function`] owns every value it mentions in one arena: inputs,
//! integer constants, `undef` values, and instructions. Identity is the
//! arena index, not the textual name, so two `%x` nodes in different
//! functions stay distinct while still sharing typing through their name.
//!
//! The checked fragment is straight-line integer code: eight binary
//! operations with `nsw`/`nuw`/`exact` flags, `ret`, and `unreachable`.

use std::cell::Cell;
use std::fmt;
use std::fmt::Write;

use crate::expr::Expr;
use crate::solver::Model;
use crate::types::Type;

/// Identity of a value inside its owning [`Function`].
pub type ValueId = usize;

thread_local! {
    static FRESH_ID: Cell<u32> = const { Cell::new(0) };
}

/// Reset the fresh-name counter used for solver variables introduced during
/// execution. Called once per verification so runs are reproducible.
pub fn reset_fresh_ids() {
    FRESH_ID.with(|c| c.set(0));
}

pub(crate) fn fresh_id() -> u32 {
    FRESH_ID.with(|c| {
        let id = c.get();
        c.set(id + 1);
        id
    })
}

/// The eight checked binary operations.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinOpKind {
    /// Wrapping addition.
    Add,
    /// Wrapping subtraction.
    Sub,
    /// Wrapping multiplication.
    Mul,
    /// Signed division.
    SDiv,
    /// Unsigned division.
    UDiv,
    /// Shift left.
    Shl,
    /// Logical shift right.
    LShr,
    /// Arithmetic shift right.
    AShr,
}

impl BinOpKind {
    /// The assembly mnemonic.
    pub fn mnemonic(self) -> &'static str {
        match self {
            BinOpKind::Add => "add",
            BinOpKind::Sub => "sub",
            BinOpKind::Mul => "mul",
            BinOpKind::SDiv => "sdiv",
            BinOpKind::UDiv => "udiv",
            BinOpKind::Shl => "shl",
            BinOpKind::LShr => "lshr",
            BinOpKind::AShr => "ashr",
        }
    }

    /// True for ops that take `nsw`/`nuw`; the others take `exact`.
    pub fn takes_wrap_flags(self) -> bool {
        matches!(
            self,
            BinOpKind::Add | BinOpKind::Sub | BinOpKind::Mul | BinOpKind::Shl
        )
    }
}

/// Poison-producing flags on a binary operation.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct BinOpFlags {
    /// No signed wrap.
    pub nsw: bool,
    /// No unsigned wrap.
    pub nuw: bool,
    /// Division leaves no remainder / shift drops no bits.
    pub exact: bool,
}

impl BinOpFlags {
    /// No flags set.
    pub const NONE: BinOpFlags = BinOpFlags {
        nsw: false,
        nuw: false,
        exact: false,
    };
}

impl fmt::Display for BinOpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nsw {
            write!(f, " nsw")?;
        }
        if self.nuw {
            write!(f, " nuw")?;
        }
        if self.exact {
            write!(f, " exact")?;
        }
        Ok(())
    }
}

/// An instruction.
#[derive(Clone, Debug)]
pub enum Instr {
    /// `%x = op [flags] ty a, b`
    BinOp {
        /// The operation.
        op: BinOpKind,
        /// Poison flags.
        flags: BinOpFlags,
        /// Left operand.
        lhs: ValueId,
        /// Right operand.
        rhs: ValueId,
    },
    /// `ret ty v`
    Return {
        /// The returned value.
        val: ValueId,
    },
    /// `unreachable`
    Unreachable,
}

/// What a value is.
#[derive(Clone, Debug)]
pub enum ValueKind {
    /// A function argument.
    Input,
    /// An integer literal.
    IntConst {
        /// The literal, sign-extended; truncated to the type width when
        /// lowered.
        val: i64,
    },
    /// An unconstrained value, fresh per execution.
    Undef,
    /// An instruction result (or a terminator, which produces nothing).
    Instr(Instr),
}

/// One arena slot: a typed, named value.
#[derive(Clone, Debug)]
pub struct ValueNode {
    ty: Type,
    name: String,
    kind: ValueKind,
}

impl ValueNode {
    /// The value's type.
    pub fn ty(&self) -> &Type {
        &self.ty
    }

    /// The textual name (`%x`, a literal like `-1`, or `undef`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The value's case.
    pub fn kind(&self) -> &ValueKind {
        &self.kind
    }
}

/// A named sequence of instructions.
#[derive(Clone, Debug)]
pub struct BasicBlock {
    name: String,
    instrs: Vec<ValueId>,
}

impl BasicBlock {
    /// The block label; the entry block has the empty label.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Instruction ids in program order.
    pub fn instrs(&self) -> &[ValueId] {
        &self.instrs
    }
}

/// A function: an arena of values plus basic blocks of instructions.
#[derive(Clone, Debug)]
pub struct Function {
    name: String,
    ret_ty: Type,
    inputs: Vec<ValueId>,
    values: Vec<ValueNode>,
    blocks: Vec<BasicBlock>,
    next_anon: u32,
}

impl Function {
    /// An empty function with an entry block.
    pub fn new(name: impl Into<String>) -> Function {
        Function {
            name: name.into(),
            ret_ty: Type::Void,
            inputs: Vec::new(),
            values: Vec::new(),
            blocks: vec![BasicBlock {
                name: String::new(),
                instrs: Vec::new(),
            }],
            next_anon: 0,
        }
    }

    /// The function name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared return type (taken from the `ret` instruction).
    pub fn ret_ty(&self) -> &Type {
        &self.ret_ty
    }

    /// Input ids in declaration order.
    pub fn inputs(&self) -> &[ValueId] {
        &self.inputs
    }

    /// The basic blocks in layout order; the first is the entry.
    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    /// Look up a value by identity.
    pub fn value(&self, id: ValueId) -> &ValueNode {
        &self.values[id]
    }

    /// Iterate over every owned value in arena order.
    pub fn values(&self) -> impl Iterator<Item = (ValueId, &ValueNode)> {
        self.values.iter().enumerate()
    }

    /// Iterate over instruction ids of every block in program order.
    pub fn instrs(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.blocks.iter().flat_map(|b| b.instrs.iter().copied())
    }

    fn push_value(&mut self, ty: Type, name: String, kind: ValueKind) -> ValueId {
        let id = self.values.len();
        self.values.push(ValueNode { ty, name, kind });
        id
    }

    /// Register a function argument.
    pub fn add_input(&mut self, mut ty: Type, name: impl Into<String>) -> ValueId {
        let name = name.into();
        ty.set_name(&name);
        let id = self.push_value(ty, name, ValueKind::Input);
        self.inputs.push(id);
        id
    }

    /// Register an integer literal.
    pub fn add_constant(&mut self, mut ty: Type, val: i64) -> ValueId {
        // literals print as themselves; their typing variables get a
        // per-slot name so distinct uses may resolve to distinct widths
        ty.set_name(&format!("%c{}", self.values.len()));
        self.push_value(ty, val.to_string(), ValueKind::IntConst { val })
    }

    /// Register an `undef` value.
    pub fn add_undef(&mut self, mut ty: Type) -> ValueId {
        ty.set_name(&format!("%u{}", self.values.len()));
        self.push_value(ty, "undef".to_string(), ValueKind::Undef)
    }

    /// Open a new basic block and make it current.
    pub fn add_block(&mut self, name: impl Into<String>) -> &mut BasicBlock {
        self.blocks.push(BasicBlock {
            name: name.into(),
            instrs: Vec::new(),
        });
        self.blocks.last_mut().expect("just pushed")
    }

    /// Append an instruction to the current block. An empty name gets an
    /// auto-assigned `%N` temporary name.
    pub fn push_instr(&mut self, mut ty: Type, name: &str, instr: Instr) -> ValueId {
        let name = match (&instr, name) {
            (Instr::BinOp { .. }, "") => {
                let n = format!("%{}", self.next_anon);
                self.next_anon += 1;
                n
            }
            (Instr::Return { .. }, "") => format!("%r{}", self.values.len()),
            _ => name.to_string(),
        };
        if !name.is_empty() {
            ty.set_name(&name);
        }
        if let Instr::Return { .. } = instr {
            self.ret_ty = ty.clone();
        }
        let id = self.push_value(ty, name, ValueKind::Instr(instr));
        self.blocks
            .last_mut()
            .expect("functions always have a block")
            .instrs
            .push(id);
        id
    }

    /// The conjunction of every owned value's typing constraints.
    pub fn type_constraints(&self) -> Expr {
        let mut c = Expr::from_bool(true);
        for node in &self.values {
            c = c.and(&self.value_constraints(node));
        }
        c
    }

    fn value_constraints(&self, node: &ValueNode) -> Expr {
        let own = node.ty.type_constraints();
        match &node.kind {
            ValueKind::Input | ValueKind::Undef => own,
            ValueKind::IntConst { .. } => own.and(&node.ty.enforce_int()),
            ValueKind::Instr(Instr::BinOp { lhs, rhs, .. }) => own
                .and(&node.ty.enforce_int())
                .and(&node.ty.eq_expr(self.values[*lhs].ty()))
                .and(&node.ty.eq_expr(self.values[*rhs].ty())),
            ValueKind::Instr(Instr::Return { val }) => {
                own.and(&node.ty.eq_expr(self.values[*val].ty()))
            }
            ValueKind::Instr(Instr::Unreachable) => Expr::from_bool(true),
        }
    }

    /// Commit a typing model into every owned type.
    pub fn fixup_types(&mut self, m: &Model) {
        for node in &mut self.values {
            node.ty.fixup(m);
        }
        self.ret_ty.fixup(m);
    }

    fn type_prefix(ty: &Type) -> String {
        let t = ty.to_string();
        if t.is_empty() {
            t
        } else {
            format!("{} ", t)
        }
    }

    pub(crate) fn write_listing(&self, out: &mut String, header: bool) {
        if header {
            let args = self
                .inputs
                .iter()
                .map(|&id| {
                    let node = &self.values[id];
                    format!("{}{}", Self::type_prefix(node.ty()), node.name())
                })
                .collect::<Vec<_>>()
                .join(", ");
            let _ = writeln!(out, "define @{}({}) {{", self.name, args);
        }
        for bb in &self.blocks {
            if !bb.name.is_empty() {
                let _ = writeln!(out, "{}:", bb.name);
            }
            for &id in &bb.instrs {
                let node = &self.values[id];
                match &node.kind {
                    ValueKind::Instr(Instr::BinOp {
                        op,
                        flags,
                        lhs,
                        rhs,
                    }) => {
                        let _ = writeln!(
                            out,
                            "{} = {}{} {}{}, {}",
                            node.name(),
                            op.mnemonic(),
                            flags,
                            Self::type_prefix(node.ty()),
                            self.values[*lhs].name(),
                            self.values[*rhs].name()
                        );
                    }
                    ValueKind::Instr(Instr::Return { val }) => {
                        let _ = writeln!(
                            out,
                            "ret {}{}",
                            Self::type_prefix(node.ty()),
                            self.values[*val].name()
                        );
                    }
                    ValueKind::Instr(Instr::Unreachable) => {
                        let _ = writeln!(out, "unreachable");
                    }
                    _ => {}
                }
            }
        }
        if header {
            let _ = writeln!(out, "}}");
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.write_listing(&mut out, false);
        f.write_str(&out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::{Session, Solver, SolverResult};

    fn add_fn(width: Option<u32>) -> Function {
        let ty = || match width {
            Some(w) => Type::int(w),
            None => Type::symbolic(),
        };
        let mut f = Function::new("src");
        let a = f.add_input(ty(), "%a");
        let b = f.add_input(ty(), "%b");
        let x = f.push_instr(
            ty(),
            "%x",
            Instr::BinOp {
                op: BinOpKind::Add,
                flags: BinOpFlags::NONE,
                lhs: a,
                rhs: b,
            },
        );
        f.push_instr(ty(), "", Instr::Return { val: x });
        f
    }

    #[test]
    fn listing_round_trips_the_surface_syntax() {
        let _s = Session::new();
        let f = add_fn(Some(8));
        assert_eq!(f.to_string(), "%x = add i8 %a, %b\nret i8 %x\n");
    }

    #[test]
    fn symbolic_listing_omits_types() {
        let _s = Session::new();
        let f = add_fn(None);
        assert_eq!(f.to_string(), "%x = add %a, %b\nret %x\n");
    }

    #[test]
    fn operands_share_the_instruction_width_after_fixup() {
        let _s = Session::new();
        let mut f = add_fn(None);
        let solver = Solver::new();
        solver.add(&f.type_constraints());
        match solver.check() {
            SolverResult::Sat(m) => {
                f.fixup_types(&m);
                let widths: Vec<u32> = f
                    .values()
                    .filter(|(_, n)| !matches!(n.kind(), ValueKind::Instr(Instr::Unreachable)))
                    .map(|(_, n)| n.ty().bits())
                    .collect();
                assert!(widths.windows(2).all(|w| w[0] == w[1]), "{:?}", widths);
            }
            _ => panic!("expected a typing for a plain add"),
        }
    }

    #[test]
    fn anonymous_temporaries_are_numbered() {
        let _s = Session::new();
        let mut f = Function::new("t");
        let a = f.add_input(Type::int(8), "%a");
        let x = f.push_instr(
            Type::int(8),
            "",
            Instr::BinOp {
                op: BinOpKind::Mul,
                flags: BinOpFlags::NONE,
                lhs: a,
                rhs: a,
            },
        );
        assert_eq!(f.value(x).name(), "%0");
    }

    #[test]
    fn flags_render_in_canonical_order() {
        let _s = Session::new();
        let flags = BinOpFlags {
            nsw: true,
            nuw: true,
            exact: false,
        };
        assert_eq!(flags.to_string(), " nsw nuw");
    }
}
