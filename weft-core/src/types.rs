//! Concrete and symbolic IL types.
//!
//! A type is either concrete (`void`, `iN`, and the reserved float, pointer,
//! array and vector cases) or symbolic. Symbolic types resolve through the
//! solver: each one owns a small tag variable choosing its case and, for
//! integers, a width variable. `type_constraints` describes the valid
//! concretizations as a formula and `fixup` commits one solver model into
//! the type. Fixup is re-runnable, so the same function can be re-typed for
//! every model the typing enumeration produces.
//!
//! Only `void` and integers are fully supported. The reserved cases
//! constrain to `false`, which makes any transformation that mentions them
//! unsatisfiable at typing time and therefore rejected.

use std::fmt;

use crate::expr::Expr;
use crate::solver::Model;

const VAR_TYPE_BITS: u32 = 3;
const VAR_BW_BITS: u32 = 10;

/// Case tag of a symbolic type, as encoded in its solver variable.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TypeTag {
    /// Fixed-width integer.
    Int = 0,
    /// Reserved.
    Float = 1,
    /// Reserved.
    Ptr = 2,
    /// Reserved.
    Array = 3,
    /// Reserved.
    Vector = 4,
}

const ALL_TAGS: [TypeTag; 5] = [
    TypeTag::Int,
    TypeTag::Float,
    TypeTag::Ptr,
    TypeTag::Array,
    TypeTag::Vector,
];

fn tag_bit(tag: TypeTag) -> u32 {
    1 << tag as u32
}

/// An IL type, possibly symbolic.
#[derive(Clone, Debug)]
pub enum Type {
    /// The empty type.
    Void,
    /// A fixed-width integer, width either committed or solver-chosen.
    Int(IntType),
    /// Reserved; constrains to `false`.
    Float(FloatType),
    /// Reserved; constrains to `false`.
    Ptr(PtrType),
    /// Reserved; constrains to `false`.
    Array(ArrayType),
    /// Reserved; constrains to `false`.
    Vector(VectorType),
    /// A solver-resolved choice between the concrete cases.
    Symbolic(Box<SymbolicType>),
}

impl Type {
    /// A concrete `iN`.
    pub fn int(bits: u32) -> Type {
        Type::Int(IntType::fixed(bits))
    }

    /// A fresh, fully unconstrained symbolic type.
    pub fn symbolic() -> Type {
        Type::Symbolic(Box::new(SymbolicType::new()))
    }

    /// Name this type's solver variables after the value that owns it.
    /// Values sharing a textual name share typing that way.
    pub fn set_name(&mut self, name: &str) {
        match self {
            Type::Int(i) => i.name = name.to_string(),
            Type::Symbolic(s) => s.set_name(name),
            _ => {}
        }
    }

    /// The formula every valid concretization must satisfy.
    pub fn type_constraints(&self) -> Expr {
        match self {
            Type::Void => Expr::from_bool(true),
            Type::Int(i) => i.type_constraints(),
            Type::Float(_) | Type::Ptr(_) | Type::Array(_) | Type::Vector(_) => {
                Expr::from_bool(false)
            }
            Type::Symbolic(s) => s.type_constraints(),
        }
    }

    /// Commit the widths and case choices of a typing model into the type.
    pub fn fixup(&mut self, m: &Model) {
        match self {
            Type::Int(i) => i.fixup(m),
            Type::Symbolic(s) => s.fixup(m),
            _ => {}
        }
    }

    /// Bit width of the committed type. Only meaningful after `fixup` (or
    /// for explicitly sized integers); anything else is a programming error.
    pub fn bits(&self) -> u32 {
        match self {
            Type::Int(i) => i.bits(),
            Type::Symbolic(s) => s.bits(),
            _ => unreachable!("width of a non-integer type"),
        }
    }

    /// Formula: this type equals `other` under the typing assignment.
    pub fn eq_expr(&self, other: &Type) -> Expr {
        match (self, other) {
            (Type::Void, Type::Void) => Expr::from_bool(true),
            (Type::Int(a), Type::Int(b)) => a.eq_expr(b),
            (Type::Symbolic(a), Type::Symbolic(b)) => a.eq_symbolic(b),
            (Type::Symbolic(s), concrete) => s.eq_concrete(concrete),
            (concrete, Type::Symbolic(s)) => s.eq_concrete(concrete),
            _ => Expr::from_bool(false),
        }
    }

    /// Formula: this type resolves to an integer.
    pub fn enforce_int(&self) -> Expr {
        match self {
            Type::Int(_) => Expr::from_bool(true),
            Type::Symbolic(s) => s.is_tag(TypeTag::Int),
            _ => Expr::from_bool(false),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Int(i) => fmt::Display::fmt(i, f),
            Type::Float(_) => write!(f, "float"),
            Type::Ptr(_) => write!(f, "ptr"),
            Type::Array(_) => write!(f, "array"),
            Type::Vector(_) => write!(f, "vector"),
            Type::Symbolic(s) => fmt::Display::fmt(s, f),
        }
    }
}

/// A fixed-width integer type. When `defined` is false the width is a
/// solver variable constrained to `1..=64`.
#[derive(Clone, Debug)]
pub struct IntType {
    name: String,
    bitwidth: u32,
    defined: bool,
}

impl IntType {
    /// An integer with a committed width.
    pub fn fixed(bits: u32) -> IntType {
        IntType {
            name: String::new(),
            bitwidth: bits,
            defined: true,
        }
    }

    fn undefined() -> IntType {
        IntType {
            name: String::new(),
            bitwidth: 0,
            defined: false,
        }
    }

    fn size_var(&self) -> Expr {
        if self.defined {
            Expr::uint(u64::from(self.bitwidth), VAR_BW_BITS)
        } else {
            Expr::var(&format!("{}_bw", self.name), VAR_BW_BITS)
        }
    }

    fn type_constraints(&self) -> Expr {
        // integers are limited to 1..=64 bits
        let bw = self.size_var();
        bw.ne(&Expr::uint(0, VAR_BW_BITS))
            .and(&bw.ule(&Expr::uint(64, VAR_BW_BITS)))
    }

    fn fixup(&mut self, m: &Model) {
        if !self.defined {
            self.bitwidth = m.get_uint(&self.size_var()) as u32;
        }
    }

    fn bits(&self) -> u32 {
        self.bitwidth
    }

    fn eq_expr(&self, other: &IntType) -> Expr {
        self.size_var().eq(&other.size_var())
    }
}

impl fmt::Display for IntType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.defined {
            write!(f, "i{}", self.bitwidth)?;
        }
        Ok(())
    }
}

/// Reserved floating-point case.
#[derive(Clone, Debug, Default)]
pub struct FloatType;

/// Reserved pointer case.
#[derive(Clone, Debug, Default)]
pub struct PtrType;

/// Reserved array case.
#[derive(Clone, Debug, Default)]
pub struct ArrayType;

/// Reserved vector case.
#[derive(Clone, Debug, Default)]
pub struct VectorType;

/// A type whose case and width the solver chooses.
///
/// Carries an `enabled` bitset restricting the candidate cases, a name that
/// prefixes its solver variables, and an embedded instance of each concrete
/// case so a committed choice has somewhere to land.
#[derive(Clone, Debug)]
pub struct SymbolicType {
    name: String,
    enabled: u32,
    resolved: Option<TypeTag>,
    int: IntType,
    float: FloatType,
    ptr: PtrType,
    array: ArrayType,
    vector: VectorType,
}

impl SymbolicType {
    fn new() -> SymbolicType {
        SymbolicType {
            name: String::new(),
            enabled: ALL_TAGS.iter().copied().map(tag_bit).sum(),
            resolved: None,
            int: IntType::undefined(),
            float: FloatType,
            ptr: PtrType,
            array: ArrayType,
            vector: VectorType,
        }
    }

    fn set_name(&mut self, name: &str) {
        if self.name.is_empty() {
            self.name = name.to_string();
        }
        self.int.name = self.name.clone();
    }

    fn type_var(&self) -> Expr {
        Expr::var(&format!("{}_type", self.name), VAR_TYPE_BITS)
    }

    /// Formula: this type resolves to the given case.
    pub fn is_tag(&self, tag: TypeTag) -> Expr {
        if self.enabled & tag_bit(tag) == 0 {
            return Expr::from_bool(false);
        }
        self.type_var()
            .eq(&Expr::uint(u64::from(tag as u32), VAR_TYPE_BITS))
    }

    fn case_constraints(&self, tag: TypeTag) -> Expr {
        match tag {
            TypeTag::Int => self.int.type_constraints(),
            // reserved cases cannot be concretized yet
            _ => Expr::from_bool(false),
        }
    }

    fn type_constraints(&self) -> Expr {
        let mut c = Expr::from_bool(false);
        for tag in ALL_TAGS {
            c = c.or(&self.is_tag(tag).and(&self.case_constraints(tag)));
        }
        c
    }

    fn fixup(&mut self, m: &Model) {
        let tag = match m.get_uint(&self.type_var()) {
            0 => TypeTag::Int,
            1 => TypeTag::Float,
            2 => TypeTag::Ptr,
            3 => TypeTag::Array,
            4 => TypeTag::Vector,
            other => unreachable!("typing model chose case {}", other),
        };
        debug_assert!(self.enabled & tag_bit(tag) != 0);
        self.resolved = Some(tag);
        if tag == TypeTag::Int {
            self.int.fixup(m);
        }
    }

    fn bits(&self) -> u32 {
        match self.resolved {
            Some(TypeTag::Int) => self.int.bits(),
            _ => unreachable!("width of an unresolved symbolic type"),
        }
    }

    fn eq_concrete(&self, other: &Type) -> Expr {
        match other {
            Type::Int(b) => self.is_tag(TypeTag::Int).and(&self.int.eq_expr(b)),
            _ => Expr::from_bool(false),
        }
    }

    fn eq_symbolic(&self, other: &SymbolicType) -> Expr {
        let cases = self
            .is_tag(TypeTag::Int)
            .and(&other.is_tag(TypeTag::Int))
            .and(&self.int.eq_expr(&other.int));
        cases.and(&self.type_var().eq(&other.type_var()))
    }

    /// Restrict the candidate cases to integers.
    pub fn enforce_int(&mut self) {
        self.enabled &= tag_bit(TypeTag::Int);
    }
}

impl fmt::Display for SymbolicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.resolved {
            Some(TypeTag::Int) => fmt::Display::fmt(&self.int, f),
            _ => Ok(()),
        }
    }
}
