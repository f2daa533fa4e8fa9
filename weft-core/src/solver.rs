//! Scoped solver facade and process-wide session state.
//!
//! The rest of the crate never talks to Z3 directly: terms are built through
//! [`crate::expr::Expr`] and discharged here. The facade owns an assertion
//! stack with RAII frames, hands out detached [`Model`] snapshots, and keeps
//! the process-global knobs: the queries-enabled toggle, the malformed-term
//! latch, query printing, and aggregate statistics.

use std::cell::Cell;
use std::fmt;
use std::io::{self, Write};

use z3::SatResult;

use crate::expr::Expr;

// Session state lives alongside the engine context, which is thread-local in
// the z3 crate; the verifier is single-threaded by contract, and tests get
// isolated sessions for free.
thread_local! {
    static INVALID: Cell<bool> = const { Cell::new(false) };
    static QUERIES_ENABLED: Cell<bool> = const { Cell::new(true) };
    static PRINT_QUERIES: Cell<bool> = const { Cell::new(false) };
    static TACTIC_VERBOSE: Cell<bool> = const { Cell::new(false) };

    static NUM_QUERIES: Cell<u64> = const { Cell::new(0) };
    static NUM_SAT: Cell<u64> = const { Cell::new(0) };
    static NUM_UNSAT: Cell<u64> = const { Cell::new(0) };
    static NUM_UNKNOWN: Cell<u64> = const { Cell::new(0) };
    static NUM_TRIVIAL: Cell<u64> = const { Cell::new(0) };
}

fn bump(counter: &'static std::thread::LocalKey<Cell<u64>>) {
    counter.with(|c| c.set(c.get() + 1));
}

pub(crate) fn latch_invalid() {
    INVALID.with(|c| c.set(true));
}

/// True once any malformed term was constructed in this session.
pub fn invalid_latched() -> bool {
    INVALID.with(Cell::get)
}

/// Route every asserted formula and check verdict to stdout.
pub fn solver_print_queries(yes: bool) {
    PRINT_QUERIES.with(|c| c.set(yes));
}

/// Print per-check timing diagnostics to stderr.
pub fn solver_tactic_verbose(yes: bool) {
    TACTIC_VERBOSE.with(|c| c.set(yes));
}

/// Flush aggregate query counters to the given sink.
pub fn solver_print_stats(out: &mut dyn Write) -> io::Result<()> {
    writeln!(out, "SMT queries: {}", NUM_QUERIES.with(Cell::get))?;
    writeln!(out, "  sat:       {}", NUM_SAT.with(Cell::get))?;
    writeln!(out, "  unsat:     {}", NUM_UNSAT.with(Cell::get))?;
    writeln!(out, "  unknown:   {}", NUM_UNKNOWN.with(Cell::get))?;
    writeln!(out, "  trivial:   {}", NUM_TRIVIAL.with(Cell::get))
}

fn reset_stats() {
    for c in [&NUM_QUERIES, &NUM_SAT, &NUM_UNSAT, &NUM_UNKNOWN, &NUM_TRIVIAL] {
        c.with(|c| c.set(0));
    }
}

/// Process-wide verifier session.
///
/// Construct one before building any expression and keep it alive until the
/// last expression is dropped. Construction clears the malformed-term latch
/// and the query counters, so tests get isolated sessions.
pub struct Session(());

impl Session {
    /// Start a session with clean toggles and counters.
    pub fn new() -> Session {
        INVALID.with(|c| c.set(false));
        QUERIES_ENABLED.with(|c| c.set(true));
        reset_stats();
        Session(())
    }
}

impl Default for Session {
    fn default() -> Session {
        Session::new()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        INVALID.with(|c| c.set(false));
    }
}

/// Stack-restoring override for the queries-enabled toggle.
///
/// Construction saves the previous value and installs `enabled`; dropping
/// the guard restores what was saved. While queries are disabled every
/// [`Solver::check`] returns [`SolverResult::Unknown`] without calling the
/// underlying engine.
pub struct SmtQueries {
    old: bool,
}

impl SmtQueries {
    /// Install `enabled` until the guard drops.
    pub fn scoped(enabled: bool) -> SmtQueries {
        let old = QUERIES_ENABLED.with(|c| c.replace(enabled));
        SmtQueries { old }
    }
}

impl Drop for SmtQueries {
    fn drop(&mut self) {
        let old = self.old;
        QUERIES_ENABLED.with(|c| c.set(old));
    }
}

/// A detached model snapshot.
///
/// Variable/value pairs are copied out eagerly at construction, so the
/// snapshot stays usable after the producing solver frame is popped.
pub struct Model {
    z3: z3::Model,
    vars: Vec<(Expr, Expr)>,
}

impl Model {
    fn new(m: z3::Model) -> Model {
        let mut vars = Vec::new();
        for decl in m.iter() {
            if decl.arity() != 0 {
                continue;
            }
            let var = decl.apply(&[]);
            if let Some(val) = m.eval(&var, true) {
                vars.push((Expr::from_dynamic(var), Expr::from_dynamic(val)));
            }
        }
        Model { z3: m, vars }
    }

    /// Evaluate a term under the model. With `complete`, unconstrained
    /// variables take an arbitrary fixed value instead of staying symbolic.
    pub fn eval(&self, e: &Expr, complete: bool) -> Expr {
        match e.dynamic() {
            Some(d) => match self.z3.eval(d, complete) {
                Some(v) => Expr::from_dynamic(v),
                None => Expr::malformed(),
            },
            None => Expr::malformed(),
        }
    }

    /// The unsigned value of a bit-vector variable under the model.
    ///
    /// Panics if the term does not evaluate to a bit-vector literal that
    /// fits 64 bits; that is a programming error, not an input error.
    pub fn get_uint(&self, e: &Expr) -> u64 {
        self.eval(e, true)
            .as_u64()
            .expect("model value is not a 64-bit-representable bit-vector")
    }

    /// The signed value of a bit-vector variable under the model.
    pub fn get_int(&self, e: &Expr) -> i64 {
        self.eval(e, true)
            .as_i64()
            .expect("model value is not a 64-bit-representable bit-vector")
    }

    /// Iterate over the copied variable/value pairs.
    pub fn iter(&self) -> std::slice::Iter<'_, (Expr, Expr)> {
        self.vars.iter()
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (var, val) in &self.vars {
            writeln!(f, "{} = {}", var, val)?;
        }
        Ok(())
    }
}

/// Outcome of a check query.
pub enum SolverResult {
    /// Satisfiable, with a detached model.
    Sat(Model),
    /// No model exists.
    Unsat,
    /// A malformed term was constructed; the verdict is meaningless.
    Invalid,
    /// The engine gave up, was disabled, or produced no model.
    Unknown,
}

impl SolverResult {
    /// True for [`SolverResult::Sat`].
    pub fn is_sat(&self) -> bool {
        matches!(self, SolverResult::Sat(_))
    }

    /// True for [`SolverResult::Unsat`].
    pub fn is_unsat(&self) -> bool {
        matches!(self, SolverResult::Unsat)
    }

    /// True for [`SolverResult::Unknown`].
    pub fn is_unknown(&self) -> bool {
        matches!(self, SolverResult::Unknown)
    }

    /// True for [`SolverResult::Invalid`].
    pub fn is_invalid(&self) -> bool {
        matches!(self, SolverResult::Invalid)
    }

    /// The model of a satisfiable result. Panics otherwise.
    pub fn model(&self) -> &Model {
        match self {
            SolverResult::Sat(m) => m,
            _ => panic!("result holds no model"),
        }
    }
}

/// A batched query: a formula plus a callback to run on its model.
pub struct Query<'a> {
    /// The formula to check in its own frame.
    pub expr: Expr,
    /// Invoked with the model when the formula is satisfiable.
    pub on_sat: Box<dyn FnMut(&Model) + 'a>,
}

/// Incremental solver with stack-disciplined frames.
pub struct Solver {
    s: z3::Solver,
    depth: Cell<u32>,
}

impl Solver {
    /// A fresh solver with an empty assertion stack.
    pub fn new() -> Solver {
        Solver {
            s: z3::Solver::new(),
            depth: Cell::new(0),
        }
    }

    /// Assert a formula into the current frame.
    pub fn add(&self, e: &Expr) {
        if PRINT_QUERIES.with(Cell::get) {
            println!("(assert {})", e);
        }
        match e.dynamic().and_then(|d| d.as_bool()) {
            Some(b) => self.s.assert(&b),
            None => latch_invalid(),
        }
    }

    /// Open a frame. The returned guard pops it on drop; guards must drop in
    /// reverse order of acquisition.
    pub fn push(&self) -> Frame<'_> {
        self.s.push();
        self.depth.set(self.depth.get() + 1);
        Frame {
            solver: self,
            depth: self.depth.get(),
        }
    }

    /// Discard every assertion and frame.
    pub fn reset(&self) {
        self.s.reset();
        self.depth.set(0);
    }

    /// Check the current assertion stack.
    pub fn check(&self) -> SolverResult {
        if invalid_latched() {
            return SolverResult::Invalid;
        }
        if !QUERIES_ENABLED.with(Cell::get) {
            return SolverResult::Unknown;
        }
        bump(&NUM_QUERIES);
        let start = std::time::Instant::now();
        let res = self.s.check();
        if TACTIC_VERBOSE.with(Cell::get) {
            eprintln!("; check-sat took {:?}", start.elapsed());
        }
        let verdict = match res {
            SatResult::Sat => {
                bump(&NUM_SAT);
                match self.s.get_model() {
                    Some(m) => SolverResult::Sat(Model::new(m)),
                    None => SolverResult::Unknown,
                }
            }
            SatResult::Unsat => {
                bump(&NUM_UNSAT);
                SolverResult::Unsat
            }
            SatResult::Unknown => {
                bump(&NUM_UNKNOWN);
                SolverResult::Unknown
            }
        };
        if PRINT_QUERIES.with(Cell::get) {
            let text = match &verdict {
                SolverResult::Sat(_) => "sat",
                SolverResult::Unsat => "unsat",
                SolverResult::Unknown => "unknown",
                SolverResult::Invalid => "invalid",
            };
            println!("(check-sat) ; -> {}", text);
        }
        verdict
    }

    /// Run a batch of independent queries, each in a fresh frame of a fresh
    /// solver, invoking the callback of every satisfiable one. Formulas that
    /// fold to `false` skip the engine entirely.
    ///
    /// Panics when a malformed term reaches the batch; that means a
    /// constructor bug upstream, not bad user input.
    pub fn check_all(queries: Vec<Query<'_>>) {
        let solver = Solver::new();
        for mut q in queries {
            if q.expr.is_false() {
                bump(&NUM_TRIVIAL);
                continue;
            }
            let frame = solver.push();
            solver.add(&q.expr);
            match solver.check() {
                SolverResult::Sat(m) => (q.on_sat)(&m),
                SolverResult::Invalid => panic!("malformed SMT term reached the solver"),
                SolverResult::Unsat | SolverResult::Unknown => {}
            }
            drop(frame);
        }
    }

    /// Exclude the given model: assert that at least one of its variables
    /// takes a different value. Used to enumerate distinct models.
    pub fn block(&self, m: &Model) {
        let mut clause = Expr::from_bool(false);
        for (var, val) in m.iter() {
            clause = clause.or(&var.ne(val));
        }
        self.add(&clause);
    }
}

impl Default for Solver {
    fn default() -> Solver {
        Solver::new()
    }
}

/// RAII guard for one solver frame; pops on drop.
pub struct Frame<'s> {
    solver: &'s Solver,
    depth: u32,
}

impl Drop for Frame<'_> {
    fn drop(&mut self) {
        assert_eq!(
            self.solver.depth.get(),
            self.depth,
            "solver frames must be dropped in reverse order of acquisition"
        );
        self.solver.depth.set(self.depth - 1);
        self.solver.s.pop(1);
    }
}
