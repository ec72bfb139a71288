//! End-to-end tests: translate a source program, push the image through its
//! serialized form, execute it, and check the observable results.

use tracing_test::traced_test;

use crate::isa::{Image, Opcode};
use crate::machine::{run_image, RunReport, StopReason};
use crate::translator::translate;

const HELLO: &str = include_str!("../programs/hello.fth");
const ECHO: &str = include_str!("../programs/echo.fth");
const PROB1: &str = include_str!("../programs/prob1.fth");
const SQ: &str = include_str!("../programs/sq.fth");
const INCR: &str = include_str!("../programs/incr.fth");

/// Translate and run, round-tripping the image through JSON on the way.
fn run_source(source: &str, input: &str, limit: u64) -> RunReport {
    let image = translate(source).expect("translation failed");
    let json = image.to_json().expect("serialization failed");
    let image = Image::from_json(&json).expect("deserialization failed");
    run_image(&image, input, limit).expect("machine fault")
}

#[traced_test]
#[test]
fn hello_world() {
    let report = run_source(HELLO, "", 1_000);
    assert_eq!(report.output, "Hello, World!");
    assert_eq!(report.stop, StopReason::Halted);
    assert_eq!(report.instr_count, 145);
    assert_eq!(report.ticks, 759);
}

#[test]
fn echo_prints_codes_until_eof() {
    let report = run_source(ECHO, "ab", 1_000);
    assert_eq!(report.output, "9798");
    assert_eq!(report.stop, StopReason::Halted);
    assert_eq!(report.instr_count, 37);
    assert_eq!(report.ticks, 151);
}

#[test]
fn multiples_of_three_or_five() {
    let report = run_source(PROB1, "", 1_000_000);
    assert_eq!(report.output, "233168");
    assert_eq!(report.stop, StopReason::Halted);
}

#[test]
fn squaring_through_a_defined_word() {
    let report = run_source(SQ, "", 10_000);
    assert_eq!(report.output, "25");
    assert_eq!(report.stop, StopReason::Halted);
}

#[test]
fn calls_target_word_entry_points() {
    let image = translate(SQ).unwrap();
    let calls: Vec<i64> = image
        .code
        .iter()
        .filter(|i| i.opcode == Opcode::Call)
        .map(|i| i.arg.expect("call without target"))
        .collect();
    assert_eq!(calls.len(), 2, "sq calls mul, the program calls sq");
    for target in calls {
        let entry = &image.code[target as usize];
        assert_eq!(
            entry.opcode,
            Opcode::Nop,
            "call target {target} is not a word entry"
        );
    }
}

#[test]
fn variable_increment() {
    let report = run_source(INCR, "", 10_000);
    assert_eq!(report.output, "7");
}

#[test]
fn runs_are_deterministic() {
    let first = run_source(HELLO, "", 1_000);
    let second = run_source(HELLO, "", 1_000);
    assert_eq!(first, second);

    let first = run_source(ECHO, "xyz", 1_000);
    let second = run_source(ECHO, "xyz", 1_000);
    assert_eq!(first, second);
}

#[test]
fn instruction_limit_ends_an_endless_loop() {
    let report = run_source("begin until", "", 500);
    assert_eq!(report.stop, StopReason::LimitExceeded);
    assert_eq!(report.instr_count, 500);
    assert_eq!(report.output, "");
}

#[test]
fn emit_writes_characters() {
    let report = run_source("72 emit 105 emit", "", 1_000);
    assert_eq!(report.output, "Hi");
}

#[test]
fn key_reads_the_input_port() {
    let report = run_source("key . key . key .", "xy", 1_000);
    assert_eq!(report.output, "1201210", "x, y, then the EOF sentinel");
}

#[test]
fn comparison_words() {
    assert_eq!(run_source("1 2 < .", "", 1_000).output, "-1");
    assert_eq!(run_source("2 1 < .", "", 1_000).output, "0");
    assert_eq!(run_source("2 1 > .", "", 1_000).output, "-1");
    assert_eq!(run_source("1 2 > .", "", 1_000).output, "0");
    assert_eq!(run_source("3 3 = .", "", 1_000).output, "-1");
    assert_eq!(run_source("3 4 = .", "", 1_000).output, "0");
}

#[test]
fn logic_words() {
    assert_eq!(run_source("-1 0 and .", "", 1_000).output, "0");
    assert_eq!(run_source("-1 -1 and .", "", 1_000).output, "-1");
    assert_eq!(run_source("0 -1 or .", "", 1_000).output, "-1");
    assert_eq!(run_source("0 0 or .", "", 1_000).output, "0");
    assert_eq!(run_source("0 invert .", "", 1_000).output, "-1");
    assert_eq!(run_source("7 invert .", "", 1_000).output, "0");
}

#[test]
fn conditional_skips_its_body_on_zero() {
    assert_eq!(run_source("0 if 65 emit then 66 emit", "", 1_000).output, "B");
    assert_eq!(
        run_source("1 if 65 emit then 66 emit", "", 1_000).output,
        "AB"
    );
}
