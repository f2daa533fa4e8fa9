//! WEFT Core Library
//!
//! Translation validation for peephole integer rewrites on a small SSA
//! intermediate language. Given a source function and a candidate rewrite,
//! the verifier proves (or refutes, with a counterexample typing) that the
//! rewrite *refines* the source: wherever the source is defined and
//! poison-free, the target is too and produces the same bits.
//!
//! The pipeline:
//! - the textual [`parser`] (or any frontend building [`ir::Function`]s
//!   directly) produces a [`Transform`],
//! - typing enumeration resolves every symbolic type through the solver,
//! - symbolic execution ([`state`]) turns each side into value/poison pairs
//!   plus an undefined-behavior predicate,
//! - three quantified refinement queries decide the verdict, collected as
//!   human-readable [`Errors`].
//!
//! # Example
//!
//! ```rust,ignore
//! use weft_core::{parse, Session, VerifyOpts};
//!
//! let _session = Session::new();
//! let mut ts = parse("Name: shift\n%x = shl i8 %a, 3\nret i8 %x\n=>\n%x = mul i8 %a, 8\nret i8 %x\n")?;
//! for t in &mut ts {
//!     let errs = t.verify(&VerifyOpts::default());
//!     assert!(errs.is_empty(), "rejected:\n{}", errs);
//! }
//! ```

#![warn(missing_docs)]

pub mod errors;
pub mod expr;
pub mod ir;
pub mod parser;
pub mod solver;
pub mod state;
pub mod transform;
pub mod types;

pub use errors::{Errors, ParseError};
pub use expr::Expr;
pub use parser::parse;
pub use solver::{
    solver_print_queries, solver_print_stats, solver_tactic_verbose, Session, Solver, SolverResult,
};
pub use state::{sym_exec, State, StateValue};
pub use transform::{Transform, TransformPrintOpts, TypingAssignments, VerifyOpts};
pub use types::Type;
