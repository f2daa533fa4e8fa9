//! Benchmarks for the end-to-end verify pipeline.

use criterion::{criterion_group, criterion_main, Criterion};
use weft_core::{parse, Session, VerifyOpts};

fn bench_verify_shift(c: &mut Criterion) {
    let _session = Session::new();
    let text = "Name: shift\n%x = shl i8 %a, 3\nret i8 %x\n=>\n%x = mul i8 %a, 8\nret i8 %x\n";
    c.bench_function("verify shl to mul, i8", |b| {
        b.iter(|| {
            let mut ts = parse(text).expect("benchmark input parses");
            let errs = ts.remove(0).verify(&VerifyOpts::default());
            assert!(errs.is_empty());
        })
    });
}

fn bench_verify_wide_division(c: &mut Criterion) {
    let _session = Session::new();
    let text = "%x = udiv exact i64 %a, %b\nret i64 %x\n=>\n%x = udiv exact i64 %a, %b\nret i64 %x\n";
    c.bench_function("verify exact udiv, i64", |b| {
        b.iter(|| {
            let mut ts = parse(text).expect("benchmark input parses");
            let errs = ts.remove(0).verify(&VerifyOpts::default());
            assert!(errs.is_empty());
        })
    });
}

criterion_group!(benches, bench_verify_shift, bench_verify_wide_division);
criterion_main!(benches);
