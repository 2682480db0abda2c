// Nonlocal exits and multiple values: block/return-from, tagbody/go,
// catch/throw, unwind-protect, the values slot, and dynamic bindings.

mod common;

use common::*;
use embercl::conditions::LispError;
use embercl::eval::ControlSignal;

#[test]
fn block_returns_last_form() {
    let (globals, mut proc) = new_runtime();
    let block = sym(&globals, &mut proc, "BLOCK");
    let b = sym(&globals, &mut proc, "B");
    let one = int(&mut proc, 1);
    let two = int(&mut proc, 2);
    let form = list(&mut proc, &[block, b, one, two]);
    let r = eval_ok(&globals, &mut proc, form);
    assert_eq!(as_fixnum(&proc, r), 2);

    // empty body => NIL
    let form = list(&mut proc, &[block, b]);
    let r = eval_ok(&globals, &mut proc, form);
    assert!(proc.is_nil(r));
}

#[test]
fn return_from_skips_rest_of_body() {
    let (globals, mut proc) = new_runtime();
    let block = sym(&globals, &mut proc, "BLOCK");
    let return_from = sym(&globals, &mut proc, "RETURN-FROM");
    let b = sym(&globals, &mut proc, "B");

    // (block b (return-from b 42) 99) => 42
    let forty_two = int(&mut proc, 42);
    let ret = list(&mut proc, &[return_from, b, forty_two]);
    let ninety_nine = int(&mut proc, 99);
    let form = list(&mut proc, &[block, b, ret, ninety_nine]);
    let r = eval_ok(&globals, &mut proc, form);
    assert_eq!(as_fixnum(&proc, r), 42);
}

#[test]
fn return_from_to_invisible_block_is_control_error() {
    let (globals, mut proc) = new_runtime();
    let return_from = sym(&globals, &mut proc, "RETURN-FROM");
    let nowhere = sym(&globals, &mut proc, "NOWHERE");
    let one = int(&mut proc, 1);
    let form = list(&mut proc, &[return_from, nowhere, one]);
    match eval(&globals, &mut proc, form) {
        Err(ControlSignal::Error(LispError::Control(_))) => {}
        other => panic!("expected control error, got {:?}", other),
    }
}

#[test]
fn nested_blocks_unwind_to_the_right_token() {
    let (globals, mut proc) = new_runtime();
    let block = sym(&globals, &mut proc, "BLOCK");
    let return_from = sym(&globals, &mut proc, "RETURN-FROM");
    let outer = sym(&globals, &mut proc, "OUTER");
    let inner = sym(&globals, &mut proc, "INNER");

    // (block outer (block inner (return-from outer 1)) 2) => 1
    let one = int(&mut proc, 1);
    let ret = list(&mut proc, &[return_from, outer, one]);
    let inner_block = list(&mut proc, &[block, inner, ret]);
    let two = int(&mut proc, 2);
    let form = list(&mut proc, &[block, outer, inner_block, two]);
    let r = eval_ok(&globals, &mut proc, form);
    assert_eq!(as_fixnum(&proc, r), 1);
}

#[test]
fn return_from_through_a_closure() {
    let (globals, mut proc) = new_runtime();
    let block = sym(&globals, &mut proc, "BLOCK");
    let return_from = sym(&globals, &mut proc, "RETURN-FROM");
    let funcall = sym(&globals, &mut proc, "FUNCALL");
    let lambda = sym(&globals, &mut proc, "LAMBDA");
    let b = sym(&globals, &mut proc, "B");

    // (block b (funcall (lambda () (return-from b 7))) 9) => 7
    let seven = int(&mut proc, 7);
    let ret = list(&mut proc, &[return_from, b, seven]);
    let nil_params = proc.make_nil();
    let lam = list(&mut proc, &[lambda, nil_params, ret]);
    let call = list(&mut proc, &[funcall, lam]);
    let nine = int(&mut proc, 9);
    let form = list(&mut proc, &[block, b, call, nine]);
    let r = eval_ok(&globals, &mut proc, form);
    assert_eq!(as_fixnum(&proc, r), 7);
}

#[test]
fn tagbody_go_skips_statements() {
    let (globals, mut proc) = new_runtime();
    let tagbody = sym(&globals, &mut proc, "TAGBODY");
    let go = sym(&globals, &mut proc, "GO");
    let setq = sym(&globals, &mut proc, "SETQ");
    let x = sym(&globals, &mut proc, "X");
    let end = sym(&globals, &mut proc, "END");

    // (tagbody (go end) (setq x 1) end): the setq never runs
    let jump = list(&mut proc, &[go, end]);
    let one = int(&mut proc, 1);
    let assign = list(&mut proc, &[setq, x, one]);
    let form = list(&mut proc, &[tagbody, jump, assign, end]);
    let r = eval_ok(&globals, &mut proc, form);
    assert!(proc.is_nil(r), "tagbody returns NIL");

    let x_id = intern(&globals, "X");
    assert!(!proc.symbol_boundp(x_id), "the skipped SETQ must not run");
}

#[test]
fn tagbody_go_loops_backward() {
    let (globals, mut proc) = new_runtime();
    let tagbody = sym(&globals, &mut proc, "TAGBODY");
    let go = sym(&globals, &mut proc, "GO");
    let setq = sym(&globals, &mut proc, "SETQ");
    let if_ = sym(&globals, &mut proc, "IF");
    let lt = sym(&globals, &mut proc, "<");
    let plus = sym(&globals, &mut proc, "+");
    let counter = sym(&globals, &mut proc, "COUNTER");
    let top = sym(&globals, &mut proc, "TOP");

    // (setq counter 0)
    let zero = int(&mut proc, 0);
    let init = list(&mut proc, &[setq, counter, zero]);
    eval_ok(&globals, &mut proc, init);

    // (tagbody top (setq counter (+ counter 1)) (if (< counter 5) (go top)))
    let one = int(&mut proc, 1);
    let bump_expr = list(&mut proc, &[plus, counter, one]);
    let bump = list(&mut proc, &[setq, counter, bump_expr]);
    let five = int(&mut proc, 5);
    let test = list(&mut proc, &[lt, counter, five]);
    let jump = list(&mut proc, &[go, top]);
    let maybe_jump = list(&mut proc, &[if_, test, jump]);
    let form = list(&mut proc, &[tagbody, top, bump, maybe_jump]);
    eval_ok(&globals, &mut proc, form);

    let counter_id = intern(&globals, "COUNTER");
    let value = proc.symbol_value(counter_id).expect("counter is set");
    assert_eq!(as_fixnum(&proc, value), 5);
}

#[test]
fn go_without_visible_tag_is_control_error() {
    let (globals, mut proc) = new_runtime();
    let go = sym(&globals, &mut proc, "GO");
    let nowhere = sym(&globals, &mut proc, "NOWHERE");
    let form = list(&mut proc, &[go, nowhere]);
    match eval(&globals, &mut proc, form) {
        Err(ControlSignal::Error(LispError::Control(_))) => {}
        other => panic!("expected control error, got {:?}", other),
    }
}

#[test]
fn catch_absorbs_matching_throw() {
    let (globals, mut proc) = new_runtime();
    let catch = sym(&globals, &mut proc, "CATCH");
    let throw = sym(&globals, &mut proc, "THROW");
    let x = sym(&globals, &mut proc, "X");

    // (catch 'x (throw 'x 7) 8) => 7
    let qx = quoted(&globals, &mut proc, x);
    let seven = int(&mut proc, 7);
    let thr = list(&mut proc, &[throw, qx, seven]);
    let qx2 = quoted(&globals, &mut proc, x);
    let eight = int(&mut proc, 8);
    let form = list(&mut proc, &[catch, qx2, thr, eight]);
    let r = eval_ok(&globals, &mut proc, form);
    assert_eq!(as_fixnum(&proc, r), 7);
}

#[test]
fn throw_unwinds_through_inner_catch() {
    let (globals, mut proc) = new_runtime();
    let catch = sym(&globals, &mut proc, "CATCH");
    let throw = sym(&globals, &mut proc, "THROW");
    let a = sym(&globals, &mut proc, "A");
    let b = sym(&globals, &mut proc, "B");

    // (catch 'a (catch 'b (throw 'a 1))) => 1
    let qa = quoted(&globals, &mut proc, a);
    let one = int(&mut proc, 1);
    let thr = list(&mut proc, &[throw, qa, one]);
    let qb = quoted(&globals, &mut proc, b);
    let inner = list(&mut proc, &[catch, qb, thr]);
    let qa2 = quoted(&globals, &mut proc, a);
    let form = list(&mut proc, &[catch, qa2, inner]);
    let r = eval_ok(&globals, &mut proc, form);
    assert_eq!(as_fixnum(&proc, r), 1);
}

#[test]
fn throw_without_catch_is_control_error() {
    let (globals, mut proc) = new_runtime();
    let throw = sym(&globals, &mut proc, "THROW");
    let x = sym(&globals, &mut proc, "X");
    let qx = quoted(&globals, &mut proc, x);
    let one = int(&mut proc, 1);
    let form = list(&mut proc, &[throw, qx, one]);
    match eval(&globals, &mut proc, form) {
        Err(ControlSignal::Error(LispError::Control(_))) => {}
        other => panic!("expected control error, got {:?}", other),
    }
}

#[test]
fn unwind_protect_runs_cleanup_on_every_path() {
    let (globals, mut proc) = new_runtime();
    let unwind_protect = sym(&globals, &mut proc, "UNWIND-PROTECT");
    let catch = sym(&globals, &mut proc, "CATCH");
    let throw = sym(&globals, &mut proc, "THROW");
    let setq = sym(&globals, &mut proc, "SETQ");
    let flag = sym(&globals, &mut proc, "FLAG");
    let tag = sym(&globals, &mut proc, "TAG");
    let flag_id = intern(&globals, "FLAG");

    // normal completion: (unwind-protect 1 (setq flag 10)) => 1, flag = 10
    let one = int(&mut proc, 1);
    let ten = int(&mut proc, 10);
    let cleanup = list(&mut proc, &[setq, flag, ten]);
    let form = list(&mut proc, &[unwind_protect, one, cleanup]);
    let r = eval_ok(&globals, &mut proc, form);
    assert_eq!(as_fixnum(&proc, r), 1);
    let v = proc.symbol_value(flag_id).expect("flag set");
    assert_eq!(as_fixnum(&proc, v), 10);

    // nonlocal exit: (catch 'tag (unwind-protect (throw 'tag 2) (setq flag 20)))
    let qtag = quoted(&globals, &mut proc, tag);
    let two = int(&mut proc, 2);
    let thr = list(&mut proc, &[throw, qtag, two]);
    let twenty = int(&mut proc, 20);
    let cleanup = list(&mut proc, &[setq, flag, twenty]);
    let protected = list(&mut proc, &[unwind_protect, thr, cleanup]);
    let qtag2 = quoted(&globals, &mut proc, tag);
    let form = list(&mut proc, &[catch, qtag2, protected]);
    let r = eval_ok(&globals, &mut proc, form);
    assert_eq!(as_fixnum(&proc, r), 2);
    let v = proc.symbol_value(flag_id).expect("flag set");
    assert_eq!(as_fixnum(&proc, v), 20, "cleanup must run during unwinding");
}

#[test]
fn unwind_protect_preserves_multiple_values() {
    let (globals, mut proc) = new_runtime();
    let unwind_protect = sym(&globals, &mut proc, "UNWIND-PROTECT");
    let values = sym(&globals, &mut proc, "VALUES");
    let mvl = sym(&globals, &mut proc, "MULTIPLE-VALUE-LIST");
    let setq = sym(&globals, &mut proc, "SETQ");
    let flag = sym(&globals, &mut proc, "FLAG");

    // (multiple-value-list (unwind-protect (values 1 2) (setq flag t)))
    // => (1 2), flag set
    let one = int(&mut proc, 1);
    let two = int(&mut proc, 2);
    let vals = list(&mut proc, &[values, one, two]);
    let t = sym(&globals, &mut proc, "T");
    let cleanup = list(&mut proc, &[setq, flag, t]);
    let protected = list(&mut proc, &[unwind_protect, vals, cleanup]);
    let form = list(&mut proc, &[mvl, protected]);
    let r = eval_ok(&globals, &mut proc, form);

    let items = proc.list_to_vec(r).expect("proper list");
    assert_eq!(items.len(), 2);
    assert_eq!(as_fixnum(&proc, items[0]), 1);
    assert_eq!(as_fixnum(&proc, items[1]), 2);

    let flag_id = intern(&globals, "FLAG");
    assert!(proc.symbol_boundp(flag_id), "cleanup ran");
}

#[test]
fn throw_carries_multiple_values() {
    let (globals, mut proc) = new_runtime();
    let catch = sym(&globals, &mut proc, "CATCH");
    let throw = sym(&globals, &mut proc, "THROW");
    let values = sym(&globals, &mut proc, "VALUES");
    let mvl = sym(&globals, &mut proc, "MULTIPLE-VALUE-LIST");
    let x = sym(&globals, &mut proc, "X");

    // (multiple-value-list (catch 'x (throw 'x (values 3 4)))) => (3 4)
    let three = int(&mut proc, 3);
    let four = int(&mut proc, 4);
    let vals = list(&mut proc, &[values, three, four]);
    let qx = quoted(&globals, &mut proc, x);
    let thr = list(&mut proc, &[throw, qx, vals]);
    let qx2 = quoted(&globals, &mut proc, x);
    let caught = list(&mut proc, &[catch, qx2, thr]);
    let form = list(&mut proc, &[mvl, caught]);
    let r = eval_ok(&globals, &mut proc, form);

    let items = proc.list_to_vec(r).expect("proper list");
    assert_eq!(items.len(), 2);
    assert_eq!(as_fixnum(&proc, items[0]), 3);
    assert_eq!(as_fixnum(&proc, items[1]), 4);
}

#[test]
fn multiple_value_bind_pads_with_nil() {
    let (globals, mut proc) = new_runtime();
    let mvb = sym(&globals, &mut proc, "MULTIPLE-VALUE-BIND");
    let values = sym(&globals, &mut proc, "VALUES");
    let list_fn = sym(&globals, &mut proc, "LIST");
    let a = sym(&globals, &mut proc, "A");
    let b = sym(&globals, &mut proc, "B");
    let c = sym(&globals, &mut proc, "C");

    // (multiple-value-bind (a b c) (values 1 2) (list a b c)) => (1 2 NIL)
    let vars = list(&mut proc, &[a, b, c]);
    let one = int(&mut proc, 1);
    let two = int(&mut proc, 2);
    let vals = list(&mut proc, &[values, one, two]);
    let body = list(&mut proc, &[list_fn, a, b, c]);
    let form = list(&mut proc, &[mvb, vars, vals, body]);
    let r = eval_ok(&globals, &mut proc, form);

    let items = proc.list_to_vec(r).expect("proper list");
    assert_eq!(items.len(), 3);
    assert_eq!(as_fixnum(&proc, items[0]), 1);
    assert_eq!(as_fixnum(&proc, items[1]), 2);
    assert!(proc.is_nil(items[2]));
}

#[test]
fn non_final_forms_clear_the_values_slot() {
    let (globals, mut proc) = new_runtime();
    let progn = sym(&globals, &mut proc, "PROGN");
    let values = sym(&globals, &mut proc, "VALUES");
    let mvl = sym(&globals, &mut proc, "MULTIPLE-VALUE-LIST");

    // (multiple-value-list (progn (values 1 2) 9)) => (9)
    let one = int(&mut proc, 1);
    let two = int(&mut proc, 2);
    let vals = list(&mut proc, &[values, one, two]);
    let nine = int(&mut proc, 9);
    let seq = list(&mut proc, &[progn, vals, nine]);
    let form = list(&mut proc, &[mvl, seq]);
    let r = eval_ok(&globals, &mut proc, form);

    let items = proc.list_to_vec(r).expect("proper list");
    assert_eq!(items.len(), 1);
    assert_eq!(as_fixnum(&proc, items[0]), 9);
}

#[test]
fn multiple_value_call_gathers_all_values() {
    let (globals, mut proc) = new_runtime();
    let mvc = sym(&globals, &mut proc, "MULTIPLE-VALUE-CALL");
    let values = sym(&globals, &mut proc, "VALUES");
    let function = sym(&globals, &mut proc, "FUNCTION");
    let plus = sym(&globals, &mut proc, "+");

    // (multiple-value-call #'+ (values 1 2) 3 (values 4 5)) => 15
    let plus_fn = list(&mut proc, &[function, plus]);
    let one = int(&mut proc, 1);
    let two = int(&mut proc, 2);
    let v12 = list(&mut proc, &[values, one, two]);
    let three = int(&mut proc, 3);
    let four = int(&mut proc, 4);
    let five = int(&mut proc, 5);
    let v45 = list(&mut proc, &[values, four, five]);
    let form = list(&mut proc, &[mvc, plus_fn, v12, three, v45]);
    let r = eval_ok(&globals, &mut proc, form);
    assert_eq!(as_fixnum(&proc, r), 15);
}

#[test]
fn nth_value_and_multiple_value_prog1() {
    let (globals, mut proc) = new_runtime();
    let nth_value = sym(&globals, &mut proc, "NTH-VALUE");
    let values = sym(&globals, &mut proc, "VALUES");
    let mvp1 = sym(&globals, &mut proc, "MULTIPLE-VALUE-PROG1");
    let mvl = sym(&globals, &mut proc, "MULTIPLE-VALUE-LIST");

    // (nth-value 1 (values 10 20 30)) => 20
    let one = int(&mut proc, 1);
    let ten = int(&mut proc, 10);
    let twenty = int(&mut proc, 20);
    let thirty = int(&mut proc, 30);
    let vals = list(&mut proc, &[values, ten, twenty, thirty]);
    let form = list(&mut proc, &[nth_value, one, vals]);
    let r = eval_ok(&globals, &mut proc, form);
    assert_eq!(as_fixnum(&proc, r), 20);

    // (multiple-value-list (multiple-value-prog1 (values 1 2) 99)) => (1 2)
    let one = int(&mut proc, 1);
    let two = int(&mut proc, 2);
    let vals = list(&mut proc, &[values, one, two]);
    let ninety_nine = int(&mut proc, 99);
    let prog1 = list(&mut proc, &[mvp1, vals, ninety_nine]);
    let form = list(&mut proc, &[mvl, prog1]);
    let r = eval_ok(&globals, &mut proc, form);
    let items = proc.list_to_vec(r).expect("proper list");
    assert_eq!(items.len(), 2);
    assert_eq!(as_fixnum(&proc, items[0]), 1);
    assert_eq!(as_fixnum(&proc, items[1]), 2);
}

#[test]
fn defvar_makes_dynamic_bindings_visible_through_calls() {
    let (globals, mut proc) = new_runtime();
    let defvar = sym(&globals, &mut proc, "DEFVAR");
    let defun = sym(&globals, &mut proc, "DEFUN");
    let let_ = sym(&globals, &mut proc, "LET");
    let star_x = sym(&globals, &mut proc, "*X*");
    let get_x = sym(&globals, &mut proc, "GET-X");

    // (defvar *x* 10)
    let ten = int(&mut proc, 10);
    let def = list(&mut proc, &[defvar, star_x, ten]);
    eval_ok(&globals, &mut proc, def);

    // (defun get-x () *x*)
    let nil_params = proc.make_nil();
    let def = list(&mut proc, &[defun, get_x, nil_params, star_x]);
    eval_ok(&globals, &mut proc, def);

    // (let ((*x* 20)) (get-x)) => 20: dynamic, not lexical
    let twenty = int(&mut proc, 20);
    let binding = list(&mut proc, &[star_x, twenty]);
    let bindings = list(&mut proc, &[binding]);
    let call = list(&mut proc, &[get_x]);
    let form = list(&mut proc, &[let_, bindings, call]);
    let r = eval_ok(&globals, &mut proc, form);
    assert_eq!(as_fixnum(&proc, r), 20);

    // after the LET, the global value is back
    let call = list(&mut proc, &[get_x]);
    let r = eval_ok(&globals, &mut proc, call);
    assert_eq!(as_fixnum(&proc, r), 10);
}

#[test]
fn progv_binds_and_can_leave_symbols_valueless() {
    let (globals, mut proc) = new_runtime();
    let progv = sym(&globals, &mut proc, "PROGV");
    let boundp = sym(&globals, &mut proc, "BOUNDP");
    let list_fn = sym(&globals, &mut proc, "LIST");
    let p = sym(&globals, &mut proc, "P");
    let q = sym(&globals, &mut proc, "Q");

    // (progv '(p q) '(1) (list (boundp 'p) (boundp 'q))) => (T NIL)
    let syms = list(&mut proc, &[p, q]);
    let qsyms = quoted(&globals, &mut proc, syms);
    let one = int(&mut proc, 1);
    let vals = list(&mut proc, &[one]);
    let qvals = quoted(&globals, &mut proc, vals);
    let qp = quoted(&globals, &mut proc, p);
    let qq = quoted(&globals, &mut proc, q);
    let bp = list(&mut proc, &[boundp, qp]);
    let bq = list(&mut proc, &[boundp, qq]);
    let body = list(&mut proc, &[list_fn, bp, bq]);
    let form = list(&mut proc, &[progv, qsyms, qvals, body]);
    let r = eval_ok(&globals, &mut proc, form);

    let items = proc.list_to_vec(r).expect("proper list");
    assert_eq!(items.len(), 2);
    assert!(is_t(&proc, &globals, items[0]), "P is bound");
    assert!(proc.is_nil(items[1]), "Q is rebound but valueless");

    // bindings are gone afterwards
    let p_id = intern(&globals, "P");
    assert!(!proc.symbol_boundp(p_id));
}

#[test]
fn unabsorbed_signal_reaches_the_top_as_is() {
    let (globals, mut proc) = new_runtime();
    let block = sym(&globals, &mut proc, "BLOCK");
    let lambda = sym(&globals, &mut proc, "LAMBDA");
    let return_from = sym(&globals, &mut proc, "RETURN-FROM");
    let funcall = sym(&globals, &mut proc, "FUNCALL");
    let b = sym(&globals, &mut proc, "B");

    // Capture a closure that returns from B, let the block exit, then call
    // the closure: the unwind signal has no live target left.
    // (block b (lambda () (return-from b 1)))
    let one = int(&mut proc, 1);
    let ret = list(&mut proc, &[return_from, b, one]);
    let nil_params = proc.make_nil();
    let lam = list(&mut proc, &[lambda, nil_params, ret]);
    let form = list(&mut proc, &[block, b, lam]);
    let closure = eval_ok(&globals, &mut proc, form);

    let call = list(&mut proc, &[funcall, closure]);
    match eval(&globals, &mut proc, call) {
        Err(ControlSignal::ReturnFrom { .. }) => {}
        other => panic!("expected a stale unwind signal, got {:?}", other),
    }
}
