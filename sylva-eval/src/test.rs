use super::Evaluator;
use quickcheck_macros::quickcheck;
use std::ptr;
use sylva_core::Tree;
use typed_arena::Arena;

// ----- end-to-end scenarios -----

fn run_to_strings(source: &str) -> Result<Vec<String>, String> {
    let trees = Arena::new();
    let bytes = Arena::new();
    let mut stdout = Vec::new();
    let mut evaluator = Evaluator::new(&trees, &bytes, &mut stdout);
    match evaluator.run(source) {
        Ok(values) => Ok(values.iter().map(|value| value.to_string()).collect()),
        Err(error) => Err(error.message),
    }
}

#[test]
fn arithmetic_applies() {
    assert_eq!(run_to_strings("(add 2 3)").unwrap(), vec!["5"]);
    assert_eq!(run_to_strings("(mul 6 7)").unwrap(), vec!["42"]);
    assert_eq!(run_to_strings("(minus 1)").unwrap(), vec![u64::MAX.to_string()]);
}

#[test]
fn let_binds_sequentially() {
    assert_eq!(
        run_to_strings("(let ((x 10) (y 20)) (mul x y))").unwrap(),
        vec!["200"]
    );
    // Later bindings see earlier ones.
    assert_eq!(
        run_to_strings("(let ((x 2) (y (add x 1))) y)").unwrap(),
        vec!["3"]
    );
}

#[test]
fn letrec_supports_recursion() {
    let source = "(letrec ((f (lambda (n) (cond (eq n 0) 1 (mul n (f (sub n 1))))))) (f 5))";
    assert_eq!(run_to_strings(source).unwrap(), vec!["120"]);
}

#[test]
fn macros_rewrite_call_sites() {
    let source = "(define_macro swap (lambda (a b) (list (string_symbol \"list\") b a)))\n\
                  (swap 1 2)";
    assert_eq!(run_to_strings(source).unwrap(), vec!["#unit", "(2 1)"]);
}

#[test]
fn quasiquote_splices_unquotes() {
    assert_eq!(run_to_strings("`(a ,(add 1 2) c)").unwrap(), vec!["(a 3 c)"]);
    assert_eq!(run_to_strings("`(1 . 2)").unwrap(), vec!["(1 . 2)"]);
}

#[test]
fn match_form_destructures() {
    let source = "(match (cons 1 (cons 2 nil)) (((x . rest) x)))";
    assert_eq!(run_to_strings(source).unwrap(), vec!["1"]);
}

#[test]
fn match_form_tries_clauses_in_order() {
    // `3` and the one-element list pattern `((x . _))` both fail against
    // (1 2); the wildcard clause wins.
    let source = "(match (list 1 2) ((3 99) (((x . _)) x) (_ 0)))";
    assert_eq!(run_to_strings(source).unwrap(), vec!["0"]);
}

#[test]
fn match_form_reports_nonexhaustive() {
    let error = run_to_strings("(match 1 ((2 9)))").unwrap_err();
    assert!(error.contains("nonexhaustive patterns"), "{}", error);
}

#[test]
fn unbound_symbol_in_lambda_body_names_it() {
    let error = run_to_strings("((lambda (x) (add x y)) 1)").unwrap_err();
    assert!(error.contains("unbound symbol \"y\""), "{}", error);
}

#[test]
fn head_must_be_a_function() {
    let error = run_to_strings("(1 2)").unwrap_err();
    assert!(error.contains("is not a function"), "{}", error);
}

#[test]
fn define_extends_the_global_environment() {
    assert_eq!(
        run_to_strings("(define x 1) (begin (set x 5) x)").unwrap(),
        vec!["#unit", "5"]
    );
    let error = run_to_strings("(set missing 1)").unwrap_err();
    assert!(error.contains("unbound symbol \"missing\""), "{}", error);
}

#[test]
fn closures_capture_their_environment() {
    let source = "(define make_adder (lambda (n) (lambda (m) (add n m))))\n\
                  ((make_adder 3) 4)";
    assert_eq!(run_to_strings(source).unwrap(), vec!["#unit", "7"]);
}

#[test]
fn cond_without_alternative_yields_unit() {
    assert_eq!(run_to_strings("(cond (eq 1 2) 3)").unwrap(), vec!["#unit"]);
}

#[test]
fn eval_restarts_the_loop() {
    assert_eq!(
        run_to_strings("(eval (quote (add 1 2)))").unwrap(),
        vec!["3"]
    );
}

#[test]
fn env_reifies_the_environment() {
    assert_eq!(
        run_to_strings("((lambda (x) (env)) 42)").unwrap(),
        vec!["((x (42)))"]
    );
}

#[test]
fn global_environment_is_first_class() {
    let source = "(set_global_env\n\
                    (cons (cons (string_symbol \"z\") (cons 9 (nil))) (get_global_env)))\n\
                  z";
    assert_eq!(run_to_strings(source).unwrap(), vec!["#unit", "9"]);
}

#[test]
fn literals_self_evaluate() {
    assert_eq!(run_to_strings("42").unwrap(), vec!["42"]);
    assert_eq!(run_to_strings("0x1A").unwrap(), vec!["26"]);
    assert_eq!(run_to_strings("\"a\\nb\"").unwrap(), vec!["\"a\\nb\""]);
}

#[test]
fn comments_and_whitespace_are_ignored() {
    let source = "// leading comment\n(add 1 /* inline */ 2)";
    assert_eq!(run_to_strings(source).unwrap(), vec!["3"]);
}

#[test]
fn string_procedures() {
    assert_eq!(run_to_strings("(string_length \"abc\")").unwrap(), vec!["3"]);
    assert_eq!(run_to_strings("(string_char \"abc\" 1)").unwrap(), vec!["98"]);
    assert_eq!(run_to_strings("(char_string 65)").unwrap(), vec!["\"A\""]);
    assert_eq!(
        run_to_strings("(string_concat \"ab\" \"cd\")").unwrap(),
        vec!["\"abcd\""]
    );
    assert_eq!(
        run_to_strings("(string_substr \"hello\" 3 10)").unwrap(),
        vec!["\"lo\""]
    );
    assert_eq!(
        run_to_strings("(string_eq \"ab\" \"ab\")").unwrap(),
        vec!["#t"]
    );
    assert_eq!(
        run_to_strings("(string_symbol \"foo\")").unwrap(),
        vec!["foo"]
    );
    assert_eq!(
        run_to_strings("(string_escape \"a\\nb\")").unwrap(),
        // The escape of "a<newline>b" is the five bytes a \ n b.
        vec!["\"a\\\\nb\""]
    );
}

#[test]
fn string_procedure_failures() {
    let error = run_to_strings("(string_char \"abc\" 3)").unwrap_err();
    assert!(error.contains("out of range"), "{}", error);
    let error = run_to_strings("(char_string 256)").unwrap_err();
    assert!(error.contains("out of range"), "{}", error);
    let error = run_to_strings("(string_nat64 \"010\")").unwrap_err();
    assert!(error.contains("leading zero"), "{}", error);
}

#[test]
fn nat64_procedures() {
    assert_eq!(run_to_strings("(string_nat64 \"0x10\")").unwrap(), vec!["16"]);
    assert_eq!(run_to_strings("(div 7 2)").unwrap(), vec!["3"]);
    assert_eq!(run_to_strings("(mod 7 2)").unwrap(), vec!["1"]);
    assert_eq!(run_to_strings("(sub 0 1)").unwrap(), vec![u64::MAX.to_string()]);
    assert_eq!(run_to_strings("(le 1 2)").unwrap(), vec!["#t"]);
    assert_eq!(run_to_strings("(gt 1 2)").unwrap(), vec!["#f"]);
    let error = run_to_strings("(div 1 0)").unwrap_err();
    assert!(error.contains("division by zero"), "{}", error);
}

#[test]
fn bool_procedures() {
    assert_eq!(run_to_strings("(not (eq 1 2))").unwrap(), vec!["#t"]);
    assert_eq!(
        run_to_strings("(implies (eq 1 2) (eq 3 4))").unwrap(),
        vec!["#t"]
    );
    assert_eq!(
        run_to_strings("(iff (eq 1 1) (eq 3 3))").unwrap(),
        vec!["#t"]
    );
    assert_eq!(
        run_to_strings("(and (eq 1 1) (eq 3 4))").unwrap(),
        vec!["#f"]
    );
}

#[test]
fn print_renders_and_display_writes() {
    assert_eq!(
        run_to_strings("(print (list 1 2))").unwrap(),
        vec!["\"(1 2)\""]
    );

    let trees = Arena::new();
    let bytes = Arena::new();
    let mut stdout = Vec::new();
    {
        let mut evaluator = Evaluator::new(&trees, &bytes, &mut stdout);
        let results = evaluator.run("(display \"hi\")").unwrap();
        assert_eq!(results[0].to_string(), "#unit");
    }
    assert_eq!(String::from_utf8(stdout).unwrap(), "hi\n");
}

#[test]
fn syntax_is_first_class() {
    // Reinstalling the syntax read back from get_syntax is a no-op. The
    // stray "0" is the parser's lookahead token, which the reinstall
    // discards along with the old lexis.
    let source = "(match (get_syntax) ((p r) (set_syntax p r)))\n0 (add 1 2)";
    assert_eq!(run_to_strings(source).unwrap(), vec!["#unit", "3"]);
}

#[test]
fn ambiguous_grammar_fails_resolution() {
    // A grammar where expr -> expr expr makes any three tokens ambiguous.
    // The lookahead token buffered while parsing the set_syntax statement
    // is discarded with the old lexis, hence the extra leading "1".
    let source = "(set_syntax\n\
                    `((_ (_ 0) (star (char \" \")))\n\
                      (num' (term 0) (plus (range 48 57))))\n\
                    `((top' (_ 0) ((expr 0)))\n\
                      (leaf' (expr 0) ((term 0)))\n\
                      (pair' (expr 0) ((expr 0) (expr 0)))))\n\
                  1 1 1 1";
    let trees = Arena::new();
    let bytes = Arena::new();
    let mut stdout = Vec::new();
    let mut evaluator = Evaluator::new(&trees, &bytes, &mut stdout);
    evaluator.set_source(source);

    assert!(evaluator.parse_next_statement());
    assert_eq!(
        evaluator.eval_parsed_statement().unwrap().to_string(),
        "#unit"
    );

    assert!(evaluator.parse_next_statement());
    let error = evaluator.eval_parsed_statement().unwrap_err();
    assert!(error.message.starts_with("ambiguous parse"), "{}", error.message);
}

#[test]
fn tail_calls_run_in_constant_stack() {
    let source = "(letrec ((even (lambda (n) (cond (eq n 0) 1 (odd (sub n 1)))))\n\
                           (odd  (lambda (n) (cond (eq n 0) 0 (even (sub n 1))))))\n\
                    (even 100000))";
    assert_eq!(run_to_strings(source).unwrap(), vec!["1"]);
}

#[test]
fn parse_errors_are_collected_not_fatal() {
    let trees = Arena::new();
    let bytes = Arena::new();
    let mut stdout = Vec::new();
    let mut evaluator = Evaluator::new(&trees, &bytes, &mut stdout);

    // The stray ")" is dropped with an error; the statement after it runs.
    let results = evaluator.run(") (add 1 2)").unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].to_string(), "3");
    let errors = evaluator.pop_parsing_errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("expected one of"), "{}", errors[0].message);

    // Unlexable bytes are reported through the same channel.
    let results = evaluator.run("(add 1 2) @@").unwrap();
    assert_eq!(results.len(), 1);
    let errors = evaluator.pop_parsing_errors();
    assert!(!errors.is_empty());
    assert!(errors[0].message.contains("unexpected characters"), "{}", errors[0].message);
}

#[test]
fn eval_errors_carry_context() {
    let trees = Arena::new();
    let bytes = Arena::new();
    let mut stdout = Vec::new();
    let mut evaluator = Evaluator::new(&trees, &bytes, &mut stdout);
    evaluator.set_source("(add 1 (div 1 0))");
    assert!(evaluator.parse_next_statement());
    let error = evaluator.eval_parsed_statement().unwrap_err();
    assert_eq!(error.message, "division by zero");
    assert!(error.context.is_some());
}

// ----- unit properties -----

#[test]
fn lookup_shadows_head_first() {
    let trees = Arena::new();
    let bytes = Arena::new();
    let mut stdout = Vec::new();
    let evaluator = Evaluator::new(&trees, &bytes, &mut stdout);

    let one = evaluator.nat(1);
    let two = evaluator.nat(2);
    let env = evaluator.extend(evaluator.nil(), "x", one);
    let shadowed = evaluator.extend(env, "x", two);
    let unrelated = evaluator.extend(env, "y", two);

    assert!(ptr::eq(evaluator.lookup(env, "x").unwrap(), one));
    assert!(ptr::eq(evaluator.lookup(shadowed, "x").unwrap(), two));
    assert!(ptr::eq(evaluator.lookup(unrelated, "x").unwrap(), one));
    assert!(evaluator.lookup(env, "y").is_none());

    // A #unit placeholder reads as unbound.
    let declared = evaluator.extend(env, "z", evaluator.unit());
    assert!(evaluator.lookup(declared, "z").is_none());
}

#[test]
fn eval_list_preserves_identity() {
    let trees = Arena::new();
    let bytes = Arena::new();
    let mut stdout = Vec::new();
    let mut evaluator = Evaluator::new(&trees, &bytes, &mut stdout);

    let e = evaluator.list(&[evaluator.nat(1), evaluator.nat(2), evaluator.boolean(true)]);
    let env = evaluator.global_env();
    let evaluated = evaluator.eval_list(env, e).unwrap();
    assert!(ptr::eq(evaluated, e));

    let expanded = evaluator.expand_list(e).unwrap();
    assert!(ptr::eq(expanded, e));
}

#[test]
fn quasiquote_without_unquote_is_identity() {
    let trees = Arena::new();
    let bytes = Arena::new();
    let mut stdout = Vec::new();
    let mut evaluator = Evaluator::new(&trees, &bytes, &mut stdout);

    let t = evaluator.list(&[
        evaluator.sym("a"),
        evaluator.list(&[evaluator.nat(1), evaluator.string(b"s")]),
    ]);
    let env = evaluator.global_env();
    let result = evaluator.quasiquote(env, t).unwrap();
    assert!(ptr::eq(result, t));
}

#[test]
fn match_binds_and_respects_quote_mode() {
    let trees = Arena::new();
    let bytes = Arena::new();
    let mut stdout = Vec::new();
    let mut evaluator = Evaluator::new(&trees, &bytes, &mut stdout);

    let e = evaluator.list(&[evaluator.nat(1), evaluator.nat(2)]);

    // A bare symbol binds.
    let pat = evaluator.sym("x");
    let mut env = evaluator.nil();
    assert!(evaluator.match_pattern(e, pat, &mut env, false).unwrap());
    assert!(ptr::eq(evaluator.lookup(env, "x").unwrap(), e));

    // In quote mode the same symbol only matches another `x`.
    let mut env = evaluator.nil();
    let quoted = evaluator.list(&[evaluator.sym("quote"), evaluator.sym("x")]);
    assert!(!evaluator.match_pattern(e, quoted, &mut env, false).unwrap());

    // `...` matches any list, and nothing else.
    let dots = evaluator.list(&[evaluator.sym("...")]);
    let mut env = evaluator.nil();
    assert!(evaluator.match_pattern(e, dots, &mut env, false).unwrap());
    assert!(!evaluator
        .match_pattern(evaluator.nat(3), dots, &mut env, false)
        .unwrap());
}

#[quickcheck]
fn prop_quote_unquote_match_duality(xs: Vec<u8>, ys: Vec<u8>) -> bool {
    let trees: Arena<Tree> = Arena::new();
    let bytes = Arena::new();
    let mut stdout = Vec::new();
    let mut evaluator = Evaluator::new(&trees, &bytes, &mut stdout);

    let e = {
        let items: Vec<_> = xs.iter().map(|&x| evaluator.nat(x as u64)).collect();
        evaluator.list(&items)
    };
    let pat = {
        let items: Vec<_> = ys.iter().map(|&y| evaluator.nat(y as u64)).collect();
        evaluator.list(&items)
    };
    // (quote (unquote pat)) must behave exactly like pat.
    let wrapped = evaluator.list(&[
        evaluator.sym("quote"),
        evaluator.list(&[evaluator.sym("unquote"), pat]),
    ]);

    let mut env_direct = evaluator.nil();
    let mut env_wrapped = evaluator.nil();
    let direct = evaluator
        .match_pattern(e, pat, &mut env_direct, false)
        .unwrap();
    let through_quote = evaluator
        .match_pattern(e, wrapped, &mut env_wrapped, false)
        .unwrap();
    direct == through_quote && env_direct == env_wrapped
}

#[quickcheck]
fn prop_structural_equality_is_congruent(xs: Vec<u8>) -> bool {
    // Two separately allocated copies of the same list evaluate to the
    // same (self-evaluating) value.
    let trees: Arena<Tree> = Arena::new();
    let bytes = Arena::new();
    let mut stdout = Vec::new();
    let mut evaluator = Evaluator::new(&trees, &bytes, &mut stdout);

    let a = {
        let items: Vec<_> = xs.iter().map(|&x| evaluator.nat(x as u64)).collect();
        evaluator.list(&items)
    };
    let b = {
        let items: Vec<_> = xs.iter().map(|&x| evaluator.nat(x as u64)).collect();
        evaluator.list(&items)
    };
    let env = evaluator.global_env();
    a == b && evaluator.eval_list(env, a).unwrap() == evaluator.eval_list(env, b).unwrap()
}
