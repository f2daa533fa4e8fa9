//! Transformation pairs and the refinement checker.
//!
//! A [`Transform`] pairs a source function with its candidate rewrite. The
//! checker enumerates every typing assignment satisfying both functions'
//! constraints and, per typing, symbolically executes both sides and
//! discharges three quantified obligations: the target must be defined
//! wherever the source is, no more poisonous, and equal in value. Any
//! satisfiable obligation yields a diagnostic; the first failing typing
//! wins, but every typing must pass for the transform to verify.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::fmt::Write;

use crate::errors::Errors;
use crate::expr::Expr;
use crate::ir::{self, Function, Instr, ValueId, ValueKind};
use crate::solver::{Model, Query, SmtQueries, Solver};
use crate::state::{sym_exec, State, StateValue};

/// Printing options for [`Transform::to_text`].
#[derive(Clone, Copy, Debug, Default)]
pub struct TransformPrintOpts {
    /// Render `define`-style function headers around each side.
    pub print_fn_header: bool,
}

/// Verification options.
#[derive(Clone, Copy, Debug, Default)]
pub struct VerifyOpts {
    /// Additionally compare every named source instruction against the
    /// same-named target instruction, under unconstrained domains.
    pub check_each_var: bool,
}

/// A source function and its candidate rewrite.
#[derive(Clone, Debug)]
pub struct Transform {
    /// Optional display name.
    pub name: String,
    /// The original function.
    pub src: Function,
    /// The rewritten function.
    pub tgt: Function,
    /// Reserved precondition text; parsed and printed, treated as `true`.
    pub precondition: Option<String>,
}

/// Enumerator over the typing assignments of a transform.
///
/// Holds its own solver with the combined constraints asserted; each
/// satisfying model is one assignment, and advancing blocks the previous
/// model so the walk visits every distinct typing exactly once.
pub struct TypingAssignments {
    s: Solver,
    r: crate::solver::SolverResult,
}

impl TypingAssignments {
    fn new(constraints: &Expr) -> TypingAssignments {
        let _on = SmtQueries::scoped(true);
        let s = Solver::new();
        s.add(constraints);
        let r = s.check();
        TypingAssignments { s, r }
    }

    /// True while an unvisited typing is available.
    pub fn has_current(&self) -> bool {
        self.r.is_sat()
    }

    /// True when the enumeration cannot decide the constraints at all.
    pub fn failed(&self) -> bool {
        self.r.is_unknown() || self.r.is_invalid()
    }

    /// The current typing's model.
    pub fn model(&self) -> &Model {
        self.r.model()
    }

    /// Exclude the current typing and look for the next one.
    pub fn advance(&mut self) {
        let _on = SmtQueries::scoped(true);
        self.s.block(self.r.model());
        self.r = self.s.check();
    }
}

impl Transform {
    /// Pair up a source and target.
    pub fn new(name: impl Into<String>, src: Function, tgt: Function) -> Transform {
        Transform {
            name: name.into(),
            src,
            tgt,
            precondition: None,
        }
    }

    /// Enumerate the typings satisfying both sides' constraints.
    pub fn typings(&self) -> TypingAssignments {
        TypingAssignments::new(
            &self
                .src
                .type_constraints()
                .and(&self.tgt.type_constraints()),
        )
    }

    /// Commit the current typing into both functions.
    pub fn fixup_types(&mut self, typings: &TypingAssignments) {
        self.src.fixup_types(typings.model());
        self.tgt.fixup_types(typings.model());
    }

    /// Decide whether the target refines the source.
    ///
    /// Every typing assignment must validate; the diagnostics of the first
    /// failing typing are returned as-is. No satisfiable typing at all means
    /// the transform is vacuously correct.
    pub fn verify(&mut self, opts: &VerifyOpts) -> Errors {
        let mut errs = Errors::default();
        let mut typings = self.typings();
        if typings.failed() {
            errs.add("Unable to solve type constraints");
            return errs;
        }
        while typings.has_current() {
            self.fixup_types(&typings);
            let e = check_transform(&self.src, &self.tgt, opts);
            if !e.is_empty() {
                return e;
            }
            typings.advance();
            if typings.failed() {
                errs.add("Unable to solve type constraints");
                return errs;
            }
        }
        errs
    }

    /// Render the transform in its surface syntax.
    pub fn to_text(&self, opts: &TransformPrintOpts) -> String {
        let mut out = String::new();
        if !self.name.is_empty() {
            let _ = writeln!(out, "Name: {}", self.name);
        }
        if let Some(pre) = &self.precondition {
            let _ = writeln!(out, "Pre: {}", pre);
        }
        self.src.write_listing(&mut out, opts.print_fn_header);
        out.push_str("=>\n");
        self.tgt.write_listing(&mut out, opts.print_fn_header);
        out
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text(&TransformPrintOpts::default()))
    }
}

fn check_transform(src: &Function, tgt: &Function, opts: &VerifyOpts) -> Errors {
    ir::reset_fresh_ids();
    let mut src_state = State::new(src);
    sym_exec(&mut src_state);
    let mut tgt_state = State::new(tgt);
    sym_exec(&mut tgt_state);

    let mut errs = Errors::default();

    let mut qvars: Vec<Expr> = Vec::new();
    qvars.extend_from_slice(src_state.quant_vars());
    qvars.extend_from_slice(tgt_state.quant_vars());

    if opts.check_each_var {
        let tgt_by_name: HashMap<&str, ValueId> = tgt
            .instrs()
            .filter_map(|id| {
                let node = tgt.value(id);
                match node.kind() {
                    ValueKind::Instr(Instr::BinOp { .. }) if node.name().starts_with('%') => {
                        Some((node.name(), id))
                    }
                    _ => None,
                }
            })
            .collect();

        let always = Expr::from_bool(true);
        for id in src.instrs() {
            let node = src.value(id);
            let named_temp = matches!(node.kind(), ValueKind::Instr(Instr::BinOp { .. }))
                && node.name().starts_with('%');
            if !named_temp || !src_state.is_bound(id) {
                continue;
            }
            if let Some(&tid) = tgt_by_name.get(node.name()) {
                if tgt_state.is_bound(tid) {
                    check_refinement(
                        &mut errs,
                        &qvars,
                        &always,
                        src_state.get(id),
                        &always,
                        tgt_state.get(tid),
                    );
                }
            }
        }
    }

    if src_state.fn_returned() != tgt_state.fn_returned() {
        if src_state.fn_returned() {
            errs.add("Source returns but target doesn't");
        } else {
            errs.add("Target returns but source doesn't");
        }
    } else if src_state.fn_returned() {
        check_refinement(
            &mut errs,
            &qvars,
            src_state.return_domain(),
            src_state.return_val(),
            tgt_state.return_domain(),
            tgt_state.return_val(),
        );
    }
    errs
}

/// Issue the three refinement obligations for one value pair, appending a
/// diagnostic per satisfiable obligation, in definedness/poison/value order.
fn check_refinement(
    errs: &mut Errors,
    qvars: &[Expr],
    dom_a: &Expr,
    a: &StateValue,
    dom_b: &Expr,
    b: &StateValue,
) {
    // the source and target widths only coincide when the typing ties them;
    // nothing forces that across two independently written functions
    let widths_agree = a.bits() == b.bits();

    {
        let sink = RefCell::new(&mut *errs);
        let mut queries = vec![
            Query {
                expr: Expr::forall(qvars, &dom_a.not_implies(dom_b)),
                on_sat: Box::new(|_: &Model| {
                    sink.borrow_mut().add("Source is more defined than target")
                }),
            },
            Query {
                expr: Expr::forall(qvars, &dom_a.and(&a.non_poison.not_implies(&b.non_poison))),
                on_sat: Box::new(|_: &Model| {
                    sink.borrow_mut().add("Target is more poisonous than source")
                }),
            },
        ];
        if widths_agree {
            queries.push(Query {
                expr: Expr::forall(qvars, &dom_a.and(&a.non_poison).and(&a.value.ne(&b.value))),
                on_sat: Box::new(|_: &Model| sink.borrow_mut().add("value mismatch")),
            });
        }
        Solver::check_all(queries);
    }

    if !widths_agree {
        errs.add("value mismatch");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinOpFlags, BinOpKind};
    use crate::solver::Session;
    use crate::types::Type;

    fn ret_input(width: u32) -> Function {
        let mut f = Function::new("f");
        let a = f.add_input(Type::int(width), "%a");
        f.push_instr(Type::int(width), "", Instr::Return { val: a });
        f
    }

    #[test]
    fn identity_transform_verifies() {
        let _s = Session::new();
        let mut t = Transform::new("id", ret_input(8), ret_input(8));
        let errs = t.verify(&VerifyOpts::default());
        assert!(errs.is_empty(), "unexpected: {}", errs);
    }

    #[test]
    fn return_asymmetry_is_reported_without_solving() {
        let _s = Session::new();
        let mut unreachable = Function::new("f");
        unreachable.push_instr(Type::Void, "", Instr::Unreachable);
        let mut t = Transform::new("asym", ret_input(8), unreachable);
        let errs = t.verify(&VerifyOpts::default());
        assert_eq!(
            errs.iter().collect::<Vec<_>>(),
            vec!["Source returns but target doesn't"]
        );
    }

    #[test]
    fn cross_width_returns_cannot_agree() {
        let _s = Session::new();
        let mut t = Transform::new("widths", ret_input(8), ret_input(16));
        let errs = t.verify(&VerifyOpts::default());
        assert!(errs.iter().any(|e| e == "value mismatch"), "{}", errs);
    }

    #[test]
    fn per_variable_mode_compares_named_temporaries() {
        let _s = Session::new();
        let build = |c: i64| {
            let mut f = Function::new("f");
            let a = f.add_input(Type::int(8), "%a");
            let k = f.add_constant(Type::int(8), c);
            let x = f.push_instr(
                Type::int(8),
                "%x",
                Instr::BinOp {
                    op: BinOpKind::Add,
                    flags: BinOpFlags::NONE,
                    lhs: a,
                    rhs: k,
                },
            );
            f.push_instr(Type::int(8), "", Instr::Return { val: x });
            f
        };
        let mut same = Transform::new("eq", build(1), build(1));
        assert!(same
            .verify(&VerifyOpts {
                check_each_var: true
            })
            .is_empty());

        let mut diff = Transform::new("neq", build(1), build(2));
        let errs = diff.verify(&VerifyOpts {
            check_each_var: true,
        });
        assert!(!errs.is_empty());
        assert_eq!(errs.iter().next(), Some("value mismatch"));
    }

    #[test]
    fn printer_round_trips_name_and_arrow() {
        let _s = Session::new();
        let t = Transform::new("demo", ret_input(8), ret_input(8));
        assert_eq!(
            t.to_text(&TransformPrintOpts::default()),
            "Name: demo\nret i8 %a\n=>\nret i8 %a\n"
        );
    }

    #[test]
    fn printer_headers_wrap_both_sides() {
        let _s = Session::new();
        let t = Transform::new("demo", ret_input(8), ret_input(8));
        let text = t.to_text(&TransformPrintOpts {
            print_fn_header: true,
        });
        assert!(text.contains("define @f(i8 %a) {"), "{}", text);
        assert!(text.contains("}\n=>\n"), "{}", text);
    }
}
