#![cfg(feature = "reader")]

use lispvm::reader::{parse_program, parse_sexpr};
use lispvm::value::{Env, Value, sym, val};
use lispvm::{Symbol, Thread, Vm};

/// Test result variants for data-driven engine tests
#[derive(Debug)]
enum TestResult {
    Success(&'static str),       // Run should produce the value this text reads as
    SpecificError(&'static str), // Run should fail with an error whose message contains this
    AnyError,                    // Run should fail (any error)
}
use TestResult::*;

fn run_text(vm: &mut Vm, program: &str) -> Result<Value, lispvm::Error> {
    let tree = parse_program(program)?;
    vm.run_expr(tree)
}

/// Run each program on a fresh engine and check the outcome
fn run_engine_tests(test_cases: Vec<(&str, TestResult)>) {
    for (i, (program, expected)) in test_cases.iter().enumerate() {
        let test_id = format!("Engine test #{}", i + 1);
        let result = run_text(&mut Vm::new(), program);

        match (result, expected) {
            (Ok(actual), Success(expected_text)) => {
                let expected_val = parse_sexpr(expected_text)
                    .unwrap_or_else(|e| panic!("{test_id}: bad expectation: {e}"));
                assert!(
                    actual.equal(&expected_val),
                    "{test_id}: '{program}' produced {actual}, expected {expected_val}"
                );
            }
            (Err(e), SpecificError(fragment)) => {
                let message = e.to_string();
                assert!(
                    message.contains(fragment),
                    "{test_id}: '{program}' failed with '{message}', expected '{fragment}'"
                );
            }
            (Err(_), AnyError) => {}
            (result, expected) => {
                panic!("{test_id}: '{program}' expected {expected:?}, got {result:?}")
            }
        }
    }
}

#[test]
fn test_scenarios() {
    run_engine_tests(vec![
        // A: native addition
        ("(get-global +) (push 5) (push 3) (call 2)", Success("8")),
        // the callable is taken from beneath the arguments
        ("(push 5) (push 3) (get-global +) (call 2)", SpecificError("non-function 5")),
        // B: identity closure
        ("(closure 1 #f ((access 0))) (push 42) (call 1)", Success("42")),
        // C: conditional branching
        ("(push #t) (if ((push 1)) ((push 2)))", Success("1")),
        ("(push #f) (if ((push 1)) ((push 2)))", Success("2")),
    ]);
}

#[test]
fn test_instructions() {
    run_engine_tests(vec![
        // push takes its operand verbatim
        ("(push (a b . c))", Success("(a b . c)")),
        ("(push ())", Success("()")),
        ("(push 1) (push 2) (pop)", Success("1")),
        // set-global peeks
        ("(push 7) (set-global x)", Success("7")),
        ("(push 7) (set-global x) (pop) (get-global x)", Success("7")),
        // if resumes the remaining instructions afterwards
        (
            "(get-global -) (push #f) (if ((push 1)) ((push 10))) (push 3) (call 2)",
            Success("7"),
        ),
        // nested branches
        (
            "(push #t) (if ((push #f) (if ((push 1)) ((push 2)))) ((push 3)))",
            Success("2"),
        ),
        ("(push ()) (if ((push yes)) ((push no)))", Success("yes")),
        ("(push 0) (if ((push yes)) ((push no)))", Success("yes")),
        // closures returning closures
        (
            "(closure 1 #f ((closure 1 #f ((get-global -) (access 1) (access 0) (call 2)))))
             (push 10) (call 1) (push 3) (call 1)",
            Success("7"),
        ),
    ]);
}

#[test]
fn test_builtins() {
    run_engine_tests(vec![
        ("(get-global cons) (push 1) (push 2) (call 2)", Success("(1 . 2)")),
        ("(get-global car) (push (1 2)) (call 1)", Success("1")),
        ("(get-global cdr) (push (1 2)) (call 1)", Success("(2)")),
        ("(get-global symbol?) (push a) (call 1)", Success("#t")),
        ("(get-global symbol?) (push (a)) (call 1)", Success("#f")),
        ("(get-global cons?) (push (a)) (call 1)", Success("#t")),
        ("(get-global atom?) (push (a)) (call 1)", Success("#f")),
        ("(get-global atom?) (push ()) (call 1)", Success("#t")),
        ("(get-global eq?) (push a) (push a) (call 2)", Success("#t")),
        ("(get-global eq?) (push 3) (push 3) (call 2)", Success("#t")),
        ("(get-global eq?) (push a) (push b) (call 2)", Success("#f")),
        // two separately read pairs are different objects
        ("(get-global eq?) (push (1)) (push (1)) (call 2)", Success("#f")),
        (
            "(push (1)) (set-global p) (pop)
             (get-global eq?) (get-global p) (get-global p) (call 2)",
            Success("#t"),
        ),
        ("(get-global -) (push 3) (push 10) (call 2)", Success("-7")),
        ("(get-global car) (push 5) (call 1)", SpecificError("not a cons pair")),
        ("(get-global cdr) (push ()) (call 1)", SpecificError("not a cons pair")),
        ("(get-global +) (push a) (push 1) (call 2)", SpecificError("expected number")),
        (
            "(get-global +) (push 9223372036854775807) (push 1) (call 2)",
            SpecificError("overflow"),
        ),
    ]);
}

#[test]
fn test_call_protocol() {
    run_engine_tests(vec![
        // apply unwraps to its first argument
        ("(get-global apply) (get-global +) (push 1) (push 2) (call 3)", Success("3")),
        (
            "(get-global apply) (get-global apply) (get-global -) (push 5) (push 2) (call 4)",
            Success("3"),
        ),
        (
            "(get-global apply) (closure 0 #t ((access 0))) (push 1) (push 2) (call 3)",
            Success("(1 2)"),
        ),
        ("(get-global apply) (call 0)", SpecificError("ArityError")),
        // arity
        ("(closure 2 #f ((access 0))) (push 1) (call 1)", SpecificError("too few arguments")),
        (
            "(closure 2 #f ((access 0))) (push 1) (push 2) (push 3) (call 3)",
            SpecificError("too many arguments"),
        ),
        (
            "(closure 2 #t ((access 2))) (push 1) (push 2) (push 3) (call 3)",
            Success("(3)"),
        ),
        ("(closure 2 #t ((access 2))) (push 1) (push 2) (call 2)", Success("()")),
        ("(closure 0 #t ((access 0))) (call 0)", Success("()")),
        // non-callables
        ("(push 5) (call 0)", SpecificError("cannot call non-function")),
        ("(push (1 2)) (push 1) (call 1)", SpecificError("cannot call non-function")),
        // other runtime errors
        ("(get-global nope)", SpecificError("Unbound global: nope")),
        ("(access 3)", SpecificError("Access out of range")),
        ("(pop)", SpecificError("Stack underflow")),
        ("(push 1) (frob 2)", SpecificError("Malformed instruction")),
        ("(push 1 2)", SpecificError("Malformed instruction")),
        ("5", SpecificError("Malformed instruction")),
        ("(push 1) (pop)", SpecificError("Contract violation")),
        ("(push 1", AnyError),
    ]);
}

/// Defines `sum-down`, a non-tail recursive closure computing n + (n-1) + ... + 0.
const SUM_DOWN: &str = "
    (closure 1 #f (
        (get-global eq?) (access 0) (push 0) (call 2)
        (if ((push 0))
            ((get-global +) (access 0)
             (get-global sum-down) (get-global -) (access 0) (push 1) (call 2) (call 1)
             (call 2)))))
    (set-global sum-down)
    (pop)
";

#[test]
fn test_recursion_through_globals() {
    let mut vm = Vm::new();
    vm.run_body(parse_program(SUM_DOWN).unwrap()).unwrap();

    for (n, expected) in [(0, 0), (1, 1), (10, 55), (1000, 500_500)] {
        let program = format!("(get-global sum-down) (push {n}) (call 1)");
        assert_eq!(run_text(&mut vm, &program).unwrap(), val(expected), "n = {n}");
    }
}

/// Defines `nest`, a tail-recursive closure that wraps its accumulator
/// `(cons acc 1)` n times, producing a list nested through car.
const NEST: &str = "
    (closure 2 #f (
        (get-global eq?) (access 0) (push 0) (call 2)
        (if ((access 1))
            ((get-global nest)
             (get-global -) (access 0) (push 1) (call 2)
             (get-global cons) (access 1) (push 1) (call 2)
             (call 2)))))
    (set-global nest)
    (pop)
";

#[test]
fn test_deeply_nested_results_are_printed_and_freed() {
    let mut vm = Vm::new();
    vm.run_body(parse_program(NEST).unwrap()).unwrap();

    let small = run_text(&mut vm, "(get-global nest) (push 2) (push ()) (call 2)").unwrap();
    assert_eq!(small.to_string(), "((() . 1) . 1)");

    let depth = 300_000;
    let program = format!("(get-global nest) (push {depth}) (push ()) (call 2)");
    let result = run_text(&mut vm, &program).unwrap();

    let mut level = 0;
    let mut current = result.clone();
    while current.is_pair() {
        current = current.car().unwrap();
        level += 1;
    }
    assert_eq!(level, depth);
    assert!(result.to_string().ends_with(" . 1) . 1)"));

    let again = run_text(&mut vm, &program).unwrap();
    assert!(result.equal(&again));

    drop(result);
    drop(again);
}

#[test]
fn test_global_round_trip_across_runs() {
    let mut vm = Vm::new();
    vm.run_body(parse_program("(push (hello world)) (set-global greeting)").unwrap())
        .unwrap();

    let greeting = vm.get_global(&Symbol::new("greeting")).unwrap();
    assert_eq!(greeting.to_string(), "(hello world)");
    assert_eq!(run_text(&mut vm, "(get-global greeting)").unwrap(), greeting);

    // Overwrite from the host, observe from a program
    vm.set_global(&Symbol::new("greeting"), sym("bye"));
    assert_eq!(run_text(&mut vm, "(get-global greeting)").unwrap(), sym("bye"));

    // Rebinding a builtin only affects this engine
    vm.run_body(parse_program("(get-global -) (set-global +)").unwrap())
        .unwrap();
    assert_eq!(
        run_text(&mut vm, "(get-global +) (push 5) (push 3) (call 2)").unwrap(),
        val(2)
    );
    assert_eq!(
        run_text(&mut Vm::new(), "(get-global +) (push 5) (push 3) (call 2)").unwrap(),
        val(8)
    );
}

#[test]
fn test_closure_snapshot_survives_later_runs() {
    let mut vm = Vm::new();
    let tree = parse_program("(closure 0 #f ((access 1))) (set-global k)").unwrap();
    vm.run_body_with(tree, Vec::new(), Env::from(vec![val(1), val(2)]))
        .unwrap();

    // A different environment at the call site does not leak in
    let tree = parse_program("(get-global k) (call 0)").unwrap();
    let result = vm
        .run_expr_with(tree, Vec::new(), Env::from(vec![val(8), val(9)]))
        .unwrap();
    assert_eq!(result, val(2));
}

#[test]
fn test_stepping_by_hand() {
    let mut vm = Vm::new();
    let text = "(get-global +) (push 1) (push #t) (if ((push 2)) ((push 3))) (call 2)";
    let tree = parse_program(text).unwrap();
    let mut thread = Thread::new(&mut vm, tree);

    let mut steps = 0;
    while !thread.is_done() {
        thread.step().unwrap();
        steps += 1;
        assert!(steps < 100, "runaway program");
    }
    // 5 instructions, 1 branch instruction, 1 continuation resume
    assert_eq!(steps, 7);
    assert_eq!(thread.result().unwrap(), val(3));
    assert!(thread.env().is_empty());
}

#[test]
fn test_improper_lists_are_rejected_where_a_list_is_required() {
    let mut vm = Vm::new();

    // Dotted instruction tree: the first instruction runs, then the tail is rejected
    let tree = parse_sexpr("((push 1) . 5)").unwrap();
    let err = vm.run_expr(tree).unwrap_err();
    assert!(err.to_string().starts_with("Malformed instruction"), "{err}");

    // Dotted operand list
    let tree = parse_sexpr("((push . 1))").unwrap();
    let err = vm.run_expr(tree).unwrap_err();
    assert!(err.to_string().starts_with("Malformed instruction"), "{err}");

    // A dotted list can still be data
    let tree = parse_sexpr("((push (1 2 . 3)))").unwrap();
    let result = vm.run_expr(tree).unwrap();
    assert_eq!(result.to_string(), "(1 2 . 3)");
    assert!(result.to_vec().is_err());
    let mut items = result.list_iter();
    assert_eq!(items.by_ref().count(), 2);
    assert_eq!(items.tail(), &val(3));
}

#[test]
fn test_determinism() {
    let program =
        "(get-global cons) (push a) (get-global cons) (push b) (push ()) (call 2) (call 2)";
    let first = run_text(&mut Vm::new(), program).unwrap();
    let second = run_text(&mut Vm::new(), program).unwrap();
    assert!(first.equal(&second));
    assert_eq!(first.to_string(), "(a b)");
}
