// Evaluator basics: self-evaluation, variable reference, binding forms,
// function definition and the uniform call protocol.

mod common;

use common::*;
use embercl::conditions::LispError;
use embercl::eval::ControlSignal;
use embercl::types::Object;

#[test]
fn self_evaluating_atoms() {
    let (globals, mut proc) = new_runtime();

    let n = int(&mut proc, 42);
    assert_eq!(eval_ok(&globals, &mut proc, n), n);

    let s = string(&mut proc, "hello");
    assert_eq!(eval_ok(&globals, &mut proc, s), s);

    let c = proc.make_char('x');
    assert_eq!(eval_ok(&globals, &mut proc, c), c);

    // keywords evaluate to themselves
    let k = kw(&globals, &mut proc, "FOO");
    assert_eq!(eval_ok(&globals, &mut proc, k), k);

    // NIL and T
    let nil = sym(&globals, &mut proc, "NIL");
    let r = eval_ok(&globals, &mut proc, nil);
    assert!(proc.is_nil(r));

    let t = sym(&globals, &mut proc, "T");
    let r = eval_ok(&globals, &mut proc, t);
    assert!(is_t(&proc, &globals, r));
}

#[test]
fn unbound_variable_signals() {
    let (globals, mut proc) = new_runtime();
    let v = sym(&globals, &mut proc, "NO-SUCH-VARIABLE");
    match eval(&globals, &mut proc, v) {
        Err(ControlSignal::Error(LispError::UnboundVariable(_))) => {}
        other => panic!("expected unbound-variable error, got {:?}", other),
    }
}

#[test]
fn undefined_function_signals() {
    let (globals, mut proc) = new_runtime();
    let f = sym(&globals, &mut proc, "NO-SUCH-FUNCTION");
    let one = int(&mut proc, 1);
    let form = list(&mut proc, &[f, one]);
    match eval(&globals, &mut proc, form) {
        Err(ControlSignal::Error(LispError::UndefinedFunction(_))) => {}
        other => panic!("expected undefined-function error, got {:?}", other),
    }
}

#[test]
fn wrong_argument_count_signals() {
    let (globals, mut proc) = new_runtime();
    let cons = sym(&globals, &mut proc, "CONS");
    let one = int(&mut proc, 1);
    let form = list(&mut proc, &[cons, one]);
    match eval(&globals, &mut proc, form) {
        Err(ControlSignal::Error(LispError::WrongNumberOfArguments { name, got })) => {
            assert_eq!(name, "CONS");
            assert_eq!(got, 1);
        }
        other => panic!("expected wrong-number-of-arguments, got {:?}", other),
    }
}

#[test]
fn if_evaluates_one_branch() {
    let (globals, mut proc) = new_runtime();
    let if_ = sym(&globals, &mut proc, "IF");
    let t = sym(&globals, &mut proc, "T");
    let one = int(&mut proc, 1);
    let two = int(&mut proc, 2);

    let form = list(&mut proc, &[if_, t, one, two]);
    let r = eval_ok(&globals, &mut proc, form);
    assert_eq!(as_fixnum(&proc, r), 1);

    let nil = sym(&globals, &mut proc, "NIL");
    let form = list(&mut proc, &[if_, nil, one, two]);
    let r = eval_ok(&globals, &mut proc, form);
    assert_eq!(as_fixnum(&proc, r), 2);

    // missing else-branch yields NIL
    let form = list(&mut proc, &[if_, nil, one]);
    let r = eval_ok(&globals, &mut proc, form);
    assert!(proc.is_nil(r));
}

#[test]
fn let_binds_in_parallel_let_star_sequentially() {
    let (globals, mut proc) = new_runtime();
    let let_ = sym(&globals, &mut proc, "LET");
    let let_star = sym(&globals, &mut proc, "LET*");
    let plus = sym(&globals, &mut proc, "+");
    let x = sym(&globals, &mut proc, "X");
    let y = sym(&globals, &mut proc, "Y");

    // (let ((x 1) (y 2)) (+ x y)) => 3
    let one = int(&mut proc, 1);
    let two = int(&mut proc, 2);
    let bx = list(&mut proc, &[x, one]);
    let by = list(&mut proc, &[y, two]);
    let bindings = list(&mut proc, &[bx, by]);
    let body = list(&mut proc, &[plus, x, y]);
    let form = list(&mut proc, &[let_, bindings, body]);
    let r = eval_ok(&globals, &mut proc, form);
    assert_eq!(as_fixnum(&proc, r), 3);

    // (let* ((x 1) (y (+ x 1))) (+ x y)) => 3
    let one = int(&mut proc, 1);
    let bx = list(&mut proc, &[x, one]);
    let one = int(&mut proc, 1);
    let y_init = list(&mut proc, &[plus, x, one]);
    let by = list(&mut proc, &[y, y_init]);
    let bindings = list(&mut proc, &[bx, by]);
    let body = list(&mut proc, &[plus, x, y]);
    let form = list(&mut proc, &[let_star, bindings, body]);
    let r = eval_ok(&globals, &mut proc, form);
    assert_eq!(as_fixnum(&proc, r), 3);
}

#[test]
fn setq_assigns_and_returns_value() {
    let (globals, mut proc) = new_runtime();
    let setq = sym(&globals, &mut proc, "SETQ");
    let x = sym(&globals, &mut proc, "X");
    let five = int(&mut proc, 5);

    let form = list(&mut proc, &[setq, x, five]);
    let r = eval_ok(&globals, &mut proc, form);
    assert_eq!(as_fixnum(&proc, r), 5);

    let r = eval_ok(&globals, &mut proc, x);
    assert_eq!(as_fixnum(&proc, r), 5);
}

#[test]
fn lambda_application_and_closure_capture() {
    let (globals, mut proc) = new_runtime();
    let lambda = sym(&globals, &mut proc, "LAMBDA");
    let let_ = sym(&globals, &mut proc, "LET");
    let funcall = sym(&globals, &mut proc, "FUNCALL");
    let plus = sym(&globals, &mut proc, "+");
    let x = sym(&globals, &mut proc, "X");
    let n = sym(&globals, &mut proc, "N");

    // ((lambda (n) (+ n 1)) 41) => 42
    let params = list(&mut proc, &[n]);
    let one = int(&mut proc, 1);
    let body = list(&mut proc, &[plus, n, one]);
    let lam = list(&mut proc, &[lambda, params, body]);
    let forty_one = int(&mut proc, 41);
    let form = list(&mut proc, &[lam, forty_one]);
    let r = eval_ok(&globals, &mut proc, form);
    assert_eq!(as_fixnum(&proc, r), 42);

    // (let ((x 10)) (funcall (lambda (n) (+ n x)) 1)) => 11
    let ten = int(&mut proc, 10);
    let bx = list(&mut proc, &[x, ten]);
    let bindings = list(&mut proc, &[bx]);
    let params = list(&mut proc, &[n]);
    let body = list(&mut proc, &[plus, n, x]);
    let lam = list(&mut proc, &[lambda, params, body]);
    let one = int(&mut proc, 1);
    let call = list(&mut proc, &[funcall, lam, one]);
    let form = list(&mut proc, &[let_, bindings, call]);
    let r = eval_ok(&globals, &mut proc, form);
    assert_eq!(as_fixnum(&proc, r), 11);
}

#[test]
fn defun_with_optional_and_rest() {
    let (globals, mut proc) = new_runtime();
    let defun = sym(&globals, &mut proc, "DEFUN");
    let f = sym(&globals, &mut proc, "ADD-MANY");
    let apply_sym = sym(&globals, &mut proc, "APPLY");
    let plus = sym(&globals, &mut proc, "+");
    let a = sym(&globals, &mut proc, "A");
    let b = sym(&globals, &mut proc, "B");
    let rest = sym(&globals, &mut proc, "REST");
    let amp_optional = sym(&globals, &mut proc, "&OPTIONAL");
    let amp_rest = sym(&globals, &mut proc, "&REST");
    let function = sym(&globals, &mut proc, "FUNCTION");

    // (defun add-many (a &optional (b 10) &rest rest)
    //   (apply #'+ a b rest))
    let ten = int(&mut proc, 10);
    let b_spec = list(&mut proc, &[b, ten]);
    let params = list(&mut proc, &[a, amp_optional, b_spec, amp_rest, rest]);
    let plus_fn = list(&mut proc, &[function, plus]);
    let body = list(&mut proc, &[apply_sym, plus_fn, a, b, rest]);
    let def = list(&mut proc, &[defun, f, params, body]);
    eval_ok(&globals, &mut proc, def);

    // (add-many 1) => 11
    let one = int(&mut proc, 1);
    let call = list(&mut proc, &[f, one]);
    let r = eval_ok(&globals, &mut proc, call);
    assert_eq!(as_fixnum(&proc, r), 11);

    // (add-many 1 2) => 3
    let one = int(&mut proc, 1);
    let two = int(&mut proc, 2);
    let call = list(&mut proc, &[f, one, two]);
    let r = eval_ok(&globals, &mut proc, call);
    assert_eq!(as_fixnum(&proc, r), 3);

    // (add-many 1 2 3 4) => 10
    let args: Vec<_> = (1..=4).map(|k| proc.make_fixnum(k)).collect();
    let mut items = vec![f];
    items.extend(args);
    let call = list(&mut proc, &items);
    let r = eval_ok(&globals, &mut proc, call);
    assert_eq!(as_fixnum(&proc, r), 10);
}

#[test]
fn defun_with_keyword_parameters() {
    let (globals, mut proc) = new_runtime();
    let defun = sym(&globals, &mut proc, "DEFUN");
    let f = sym(&globals, &mut proc, "SCALE");
    let minus = sym(&globals, &mut proc, "-");
    let x = sym(&globals, &mut proc, "X");
    let by = sym(&globals, &mut proc, "BY");
    let amp_key = sym(&globals, &mut proc, "&KEY");

    // (defun scale (x &key (by 1)) (- x by))
    let one = int(&mut proc, 1);
    let by_spec = list(&mut proc, &[by, one]);
    let params = list(&mut proc, &[x, amp_key, by_spec]);
    let body = list(&mut proc, &[minus, x, by]);
    let def = list(&mut proc, &[defun, f, params, body]);
    eval_ok(&globals, &mut proc, def);

    // (scale 10) => 9
    let ten = int(&mut proc, 10);
    let call = list(&mut proc, &[f, ten]);
    let r = eval_ok(&globals, &mut proc, call);
    assert_eq!(as_fixnum(&proc, r), 9);

    // (scale 10 :by 4) => 6
    let ten = int(&mut proc, 10);
    let by_kw = kw(&globals, &mut proc, "BY");
    let four = int(&mut proc, 4);
    let call = list(&mut proc, &[f, ten, by_kw, four]);
    let r = eval_ok(&globals, &mut proc, call);
    assert_eq!(as_fixnum(&proc, r), 6);
}

#[test]
fn defmacro_expands_before_evaluation() {
    let (globals, mut proc) = new_runtime();
    let defmacro = sym(&globals, &mut proc, "DEFMACRO");
    let name = sym(&globals, &mut proc, "MY-WHEN");
    let test = sym(&globals, &mut proc, "TEST");
    let body = sym(&globals, &mut proc, "BODY");
    let amp_rest = sym(&globals, &mut proc, "&REST");
    let list_fn = sym(&globals, &mut proc, "LIST");
    let cons_fn = sym(&globals, &mut proc, "CONS");
    let if_ = sym(&globals, &mut proc, "IF");
    let progn = sym(&globals, &mut proc, "PROGN");

    // (defmacro my-when (test &rest body)
    //   (list 'if test (cons 'progn body)))
    let params = list(&mut proc, &[test, amp_rest, body]);
    let q_if = quoted(&globals, &mut proc, if_);
    let q_progn = quoted(&globals, &mut proc, progn);
    let cons_form = list(&mut proc, &[cons_fn, q_progn, body]);
    let macro_body = list(&mut proc, &[list_fn, q_if, test, cons_form]);
    let def = list(&mut proc, &[defmacro, name, params, macro_body]);
    eval_ok(&globals, &mut proc, def);

    // (my-when t 1 2) => 2
    let t = sym(&globals, &mut proc, "T");
    let one = int(&mut proc, 1);
    let two = int(&mut proc, 2);
    let usage = list(&mut proc, &[name, t, one, two]);
    let r = eval_ok(&globals, &mut proc, usage);
    assert_eq!(as_fixnum(&proc, r), 2);

    // (my-when nil 1 2) => NIL
    let nil = sym(&globals, &mut proc, "NIL");
    let one = int(&mut proc, 1);
    let two = int(&mut proc, 2);
    let usage = list(&mut proc, &[name, nil, one, two]);
    let r = eval_ok(&globals, &mut proc, usage);
    assert!(proc.is_nil(r));

    // macroexpand-1 exposes the expansion
    let mex1 = sym(&globals, &mut proc, "MACROEXPAND-1");
    let t = sym(&globals, &mut proc, "T");
    let three = int(&mut proc, 3);
    let usage = list(&mut proc, &[name, t, three]);
    let q_usage = quoted(&globals, &mut proc, usage);
    let form = list(&mut proc, &[mex1, q_usage]);
    let expansion = eval_ok(&globals, &mut proc, form);
    let (head, _) = proc.as_cons(expansion).expect("expansion is a form");
    assert_eq!(
        proc.as_symbol(head),
        Some(globals.special_forms.r#if),
        "expansion should start with IF"
    );
}

#[test]
fn and_or_short_circuit() {
    let (globals, mut proc) = new_runtime();
    let and = sym(&globals, &mut proc, "AND");
    let or = sym(&globals, &mut proc, "OR");
    let setq = sym(&globals, &mut proc, "SETQ");
    let hit = sym(&globals, &mut proc, "HIT");
    let nil = sym(&globals, &mut proc, "NIL");

    // (and nil (setq hit 1)) must not assign
    let one = int(&mut proc, 1);
    let assign = list(&mut proc, &[setq, hit, one]);
    let form = list(&mut proc, &[and, nil, assign]);
    let r = eval_ok(&globals, &mut proc, form);
    assert!(proc.is_nil(r));
    let hit_id = intern(&globals, "HIT");
    assert!(!proc.symbol_boundp(hit_id), "AND must short-circuit");

    // (or 7 (setq hit 1)) => 7, no assignment
    let seven = int(&mut proc, 7);
    let one = int(&mut proc, 1);
    let assign = list(&mut proc, &[setq, hit, one]);
    let form = list(&mut proc, &[or, seven, assign]);
    let r = eval_ok(&globals, &mut proc, form);
    assert_eq!(as_fixnum(&proc, r), 7);
    assert!(!proc.symbol_boundp(hit_id), "OR must short-circuit");
}

#[test]
fn function_returns_callable_for_builtin() {
    let (globals, mut proc) = new_runtime();
    let function = sym(&globals, &mut proc, "FUNCTION");
    let car = sym(&globals, &mut proc, "CAR");
    let funcall = sym(&globals, &mut proc, "FUNCALL");

    // (funcall #'car '(1 2)) => 1
    let car_fn = list(&mut proc, &[function, car]);
    let one = int(&mut proc, 1);
    let two = int(&mut proc, 2);
    let l = list(&mut proc, &[one, two]);
    let ql = quoted(&globals, &mut proc, l);
    let form = list(&mut proc, &[funcall, car_fn, ql]);
    let r = eval_ok(&globals, &mut proc, form);
    assert_eq!(as_fixnum(&proc, r), 1);
}

#[test]
fn car_of_non_list_is_a_type_error() {
    let (globals, mut proc) = new_runtime();
    let car = sym(&globals, &mut proc, "CAR");
    let five = int(&mut proc, 5);
    let form = list(&mut proc, &[car, five]);
    match eval(&globals, &mut proc, form) {
        Err(ControlSignal::Error(LispError::Type { expected, .. })) => {
            assert_eq!(expected, embercl::types::TypeSpec::List);
        }
        other => panic!("expected type error, got {:?}", other),
    }
}

#[test]
fn eval_primitive_reenters_the_evaluator() {
    let (globals, mut proc) = new_runtime();
    let eval_sym = sym(&globals, &mut proc, "EVAL");
    let plus = sym(&globals, &mut proc, "+");

    // (eval '(+ 1 2)) => 3
    let one = int(&mut proc, 1);
    let two = int(&mut proc, 2);
    let inner = list(&mut proc, &[plus, one, two]);
    let q = quoted(&globals, &mut proc, inner);
    let form = list(&mut proc, &[eval_sym, q]);
    let r = eval_ok(&globals, &mut proc, form);
    assert_eq!(as_fixnum(&proc, r), 3);
}

#[test]
fn type_of_reports_symbolic_names() {
    let (globals, mut proc) = new_runtime();
    let type_of = sym(&globals, &mut proc, "TYPE-OF");

    let five = int(&mut proc, 5);
    let form = list(&mut proc, &[type_of, five]);
    let r = eval_ok(&globals, &mut proc, form);
    let name = proc.as_symbol(r).and_then(|s| {
        globals
            .symbols
            .read()
            .unwrap()
            .symbol_name(s)
            .map(str::to_string)
    });
    assert_eq!(name.as_deref(), Some("FIXNUM"));

    match proc.heap.get_unchecked(five) {
        Object::Fixnum(5) => {}
        other => panic!("heap corrupted: {:?}", other),
    }
}
