//! Property-based verification tests.
//!
//! Randomized instances of algebraic facts the verifier must agree with.
//! Case counts stay low because every case runs real solver queries.

use proptest::prelude::*;
use weft_core::{parse, Session, VerifyOpts};

fn verify_text(text: &str) -> weft_core::Errors {
    let mut ts = parse(text).expect("generated input should parse");
    assert_eq!(ts.len(), 1);
    ts.remove(0).verify(&VerifyOpts::default())
}

/// Folding `(%a + c1) + c2` into `%a + (c1 + c2 mod 2^8)` is always sound.
#[test]
fn prop_chained_constant_adds_fold() {
    let config = ProptestConfig::with_cases(16);
    proptest!(config, |(c1: i8, c2: i8)| {
        let _s = Session::new();
        let folded = c1.wrapping_add(c2);
        let text = format!(
            "%x = add i8 %a, {}\n%y = add i8 %x, {}\nret i8 %y\n=>\n%y = add i8 %a, {}\nret i8 %y\n",
            c1, c2, folded
        );
        let errs = verify_text(&text);
        prop_assert!(errs.is_empty(), "rejected:\n{}", errs);
    });
}

/// Replacing an added constant by any other constant is caught.
#[test]
fn prop_wrong_constant_is_a_value_mismatch() {
    let config = ProptestConfig::with_cases(16);
    proptest!(config, |(c1: i8, c2: i8)| {
        prop_assume!(c1 != c2);
        let _s = Session::new();
        let text = format!(
            "%x = add i8 %a, {}\nret i8 %x\n=>\n%x = add i8 %a, {}\nret i8 %x\n",
            c1, c2
        );
        let errs = verify_text(&text);
        let msgs: Vec<&str> = errs.iter().collect();
        prop_assert_eq!(msgs, vec!["value mismatch"]);
    });
}

/// Every expressible single-op function refines itself, whatever the op,
/// width, flags, and operand shape.
#[test]
fn prop_single_op_functions_are_reflexive() {
    let ops = ["add", "sub", "mul", "sdiv", "udiv", "shl", "lshr", "ashr"];
    let config = ProptestConfig::with_cases(24);
    proptest!(config, |(
        op_idx in 0usize..8,
        width in 1u32..=16,
        flag_a: bool,
        flag_b: bool,
        use_const: bool,
        c: i8,
    )| {
        let _s = Session::new();
        let op = ops[op_idx];
        let wrap_op = matches!(op, "add" | "sub" | "mul" | "shl");
        let mut flags = String::new();
        if wrap_op {
            if flag_a {
                flags.push_str(" nsw");
            }
            if flag_b {
                flags.push_str(" nuw");
            }
        } else if flag_a {
            flags.push_str(" exact");
        }
        let rhs = if use_const {
            c.to_string()
        } else {
            "%b".to_string()
        };
        let body = format!(
            "%x = {}{} i{} %a, {}\nret i{} %x\n",
            op, flags, width, rhs, width
        );
        let text = format!("{}=>\n{}", body, body);
        let errs = verify_text(&text);
        prop_assert!(errs.is_empty(), "{} rejected itself:\n{}", body, errs);
    });
}
