// EmberCL Primitives - Built-in Functions
//
// Every builtin callable through the uniform call protocol. Arguments arrive
// evaluated; the argument slice is never mutated: list-surgery primitives
// (NCONC, NREVERSE, RPLACA...) mutate heap cells only.

use smallvec::SmallVec;

use crate::chars;
use crate::conditions::LispError;
use crate::context::GlobalContext;
use crate::eval::{ControlSignal, Environment, EvalResult, Interpreter};
use crate::numbers::Number;
use crate::printer::{self, PrintConfig};
use crate::process::Process;
use crate::streams::{Stream, StreamId};
use crate::symbol::{PackageId, SymbolId, CL_PACKAGE};
use crate::types::{NodeId, Object, TypeSpec};

// ---------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------

fn wrong_args(name: &str, got: usize) -> ControlSignal {
    LispError::WrongNumberOfArguments {
        name: name.to_string(),
        got,
    }
    .into()
}

fn check_arity(name: &str, args: &[NodeId], n: usize) -> Result<(), ControlSignal> {
    if args.len() != n {
        Err(wrong_args(name, args.len()))
    } else {
        Ok(())
    }
}

fn check_min_arity(name: &str, args: &[NodeId], n: usize) -> Result<(), ControlSignal> {
    if args.len() < n {
        Err(wrong_args(name, args.len()))
    } else {
        Ok(())
    }
}

fn number_arg(proc: &Process, node: NodeId) -> Result<Number, ControlSignal> {
    Number::extract(&proc.heap, node)
        .ok_or_else(|| LispError::wrong_type(node, TypeSpec::Number).into())
}

fn real_arg(proc: &Process, node: NodeId) -> Result<Number, ControlSignal> {
    let n = Number::extract(&proc.heap, node)
        .ok_or_else(|| ControlSignal::from(LispError::wrong_type(node, TypeSpec::Real)))?;
    if n.is_real() {
        Ok(n)
    } else {
        Err(LispError::wrong_type(node, TypeSpec::Real).into())
    }
}

fn integer_arg(proc: &Process, node: NodeId) -> Result<Number, ControlSignal> {
    let n = Number::extract(&proc.heap, node)
        .ok_or_else(|| ControlSignal::from(LispError::wrong_type(node, TypeSpec::Integer)))?;
    if n.is_integer() {
        Ok(n)
    } else {
        Err(LispError::wrong_type(node, TypeSpec::Integer).into())
    }
}

fn index_arg(proc: &Process, node: NodeId) -> Result<usize, ControlSignal> {
    match proc.heap.get_unchecked(node) {
        Object::Fixnum(n) if *n >= 0 => Ok(*n as usize),
        _ => Err(LispError::wrong_type(node, TypeSpec::Integer).into()),
    }
}

/// Symbol designator: NIL names the symbol NIL.
fn symbol_arg(
    proc: &Process,
    ctx: &GlobalContext,
    node: NodeId,
) -> Result<SymbolId, ControlSignal> {
    match proc.heap.get_unchecked(node) {
        Object::Symbol(sym) => Ok(*sym),
        Object::Nil => Ok(ctx.nil_sym),
        _ => Err(LispError::wrong_type(node, TypeSpec::Symbol).into()),
    }
}

fn char_arg(proc: &Process, node: NodeId) -> Result<char, ControlSignal> {
    match proc.heap.get_unchecked(node) {
        Object::Character(c) => Ok(*c),
        _ => Err(LispError::wrong_type(node, TypeSpec::Character).into()),
    }
}

/// String designator: strings, symbols (their names) and characters.
fn string_arg(
    proc: &Process,
    ctx: &GlobalContext,
    node: NodeId,
) -> Result<String, ControlSignal> {
    match proc.heap.get_unchecked(node) {
        Object::Str(s) => Ok(s.clone()),
        Object::Character(c) => Ok(c.to_string()),
        Object::Symbol(sym) => Ok(ctx.symbol_name(*sym)),
        Object::Nil => Ok("NIL".to_string()),
        _ => Err(LispError::wrong_type(node, TypeSpec::String).into()),
    }
}

fn vector_arg(proc: &Process, node: NodeId) -> Result<crate::arrays::VectorId, ControlSignal> {
    match proc.heap.get_unchecked(node) {
        Object::Vector(id) => Ok(*id),
        _ => Err(LispError::wrong_type(node, TypeSpec::Vector).into()),
    }
}

/// Output stream designator: a stream object, or NIL/T for standard output.
fn stream_arg(
    proc: &Process,
    ctx: &GlobalContext,
    node: Option<NodeId>,
) -> Result<StreamId, ControlSignal> {
    let node = match node {
        None => return Ok(proc.streams.stdout_id()),
        Some(n) => n,
    };
    match proc.heap.get_unchecked(node) {
        Object::Stream(id) => Ok(*id),
        Object::Nil => Ok(proc.streams.stdout_id()),
        Object::Symbol(sym) if *sym == ctx.t_sym => Ok(proc.streams.stdout_id()),
        _ => Err(LispError::wrong_type(node, TypeSpec::Stream).into()),
    }
}

/// Package designator: package objects, names (strings/symbols), defaulting
/// to the current package.
fn package_arg(
    proc: &Process,
    ctx: &GlobalContext,
    node: Option<NodeId>,
) -> Result<PackageId, ControlSignal> {
    let symbols = ctx.symbols.read().unwrap();
    let node = match node {
        None => return Ok(symbols.current_package()),
        Some(n) => n,
    };
    match proc.heap.get_unchecked(node) {
        Object::Package(id) => Ok(*id),
        Object::Str(name) => symbols
            .find_package(name)
            .ok_or_else(|| LispError::Package(format!("no package named {}", name)).into()),
        Object::Symbol(sym) => {
            let name = symbols.symbol_name(*sym).unwrap_or("").to_string();
            symbols
                .find_package(&name)
                .ok_or_else(|| LispError::Package(format!("no package named {}", name)).into())
        }
        _ => Err(LispError::wrong_type(node, TypeSpec::Package).into()),
    }
}

fn keyword_named(proc: &Process, ctx: &GlobalContext, node: NodeId, name: &str) -> bool {
    match proc.heap.get_unchecked(node) {
        Object::Symbol(sym) => {
            let symbols = ctx.symbols.read().unwrap();
            symbols.is_keyword(*sym) && symbols.symbol_name(*sym) == Some(name)
        }
        _ => false,
    }
}

// ---------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------

/// Register all standard primitives.
pub fn register_primitives(globals: &mut GlobalContext) {
    let cl = CL_PACKAGE;

    // Arithmetic
    globals.register_primitive("+", cl, prim_add);
    globals.register_primitive("-", cl, prim_sub);
    globals.register_primitive("*", cl, prim_mul);
    globals.register_primitive("/", cl, prim_div);
    globals.register_primitive("1+", cl, prim_one_plus);
    globals.register_primitive("1-", cl, prim_one_minus);
    globals.register_primitive("ABS", cl, prim_abs);
    globals.register_primitive("MOD", cl, prim_mod);
    globals.register_primitive("REM", cl, prim_rem);
    globals.register_primitive("GCD", cl, prim_gcd);
    globals.register_primitive("TRUNCATE", cl, prim_truncate);
    globals.register_primitive("MIN", cl, prim_min);
    globals.register_primitive("MAX", cl, prim_max);
    globals.register_primitive("FLOAT", cl, prim_float);
    globals.register_primitive("NUMERATOR", cl, prim_numerator);
    globals.register_primitive("DENOMINATOR", cl, prim_denominator);
    globals.register_primitive("REALPART", cl, prim_realpart);
    globals.register_primitive("IMAGPART", cl, prim_imagpart);
    globals.register_primitive("COMPLEX", cl, prim_complex);

    // Numeric comparison and predicates
    globals.register_primitive("=", cl, prim_num_eq);
    globals.register_primitive("/=", cl, prim_num_ne);
    globals.register_primitive("<", cl, prim_lt);
    globals.register_primitive(">", cl, prim_gt);
    globals.register_primitive("<=", cl, prim_le);
    globals.register_primitive(">=", cl, prim_ge);
    globals.register_primitive("ZEROP", cl, prim_zerop);
    globals.register_primitive("PLUSP", cl, prim_plusp);
    globals.register_primitive("MINUSP", cl, prim_minusp);
    globals.register_primitive("EVENP", cl, prim_evenp);
    globals.register_primitive("ODDP", cl, prim_oddp);

    // Type predicates
    globals.register_primitive("NULL", cl, prim_null);
    globals.register_primitive("NOT", cl, prim_null);
    globals.register_primitive("ATOM", cl, prim_atom);
    globals.register_primitive("CONSP", cl, prim_consp);
    globals.register_primitive("LISTP", cl, prim_listp);
    globals.register_primitive("SYMBOLP", cl, prim_symbolp);
    globals.register_primitive("KEYWORDP", cl, prim_keywordp);
    globals.register_primitive("NUMBERP", cl, prim_numberp);
    globals.register_primitive("REALP", cl, prim_realp);
    globals.register_primitive("RATIONALP", cl, prim_rationalp);
    globals.register_primitive("INTEGERP", cl, prim_integerp);
    globals.register_primitive("FLOATP", cl, prim_floatp);
    globals.register_primitive("COMPLEXP", cl, prim_complexp);
    globals.register_primitive("CHARACTERP", cl, prim_characterp);
    globals.register_primitive("STRINGP", cl, prim_stringp);
    globals.register_primitive("VECTORP", cl, prim_vectorp);
    globals.register_primitive("FUNCTIONP", cl, prim_functionp);
    globals.register_primitive("PACKAGEP", cl, prim_packagep);
    globals.register_primitive("TYPE-OF", cl, prim_type_of);

    // Identity and equality
    globals.register_primitive("EQ", cl, prim_eq);
    globals.register_primitive("EQL", cl, prim_eql);
    globals.register_primitive("EQUAL", cl, prim_equal);
    globals.register_primitive("EQUALP", cl, prim_equalp);

    // Conses and lists
    globals.register_primitive("CONS", cl, prim_cons);
    globals.register_primitive("CAR", cl, prim_car);
    globals.register_primitive("CDR", cl, prim_cdr);
    globals.register_primitive("CAAR", cl, prim_caar);
    globals.register_primitive("CADR", cl, prim_cadr);
    globals.register_primitive("CDDR", cl, prim_cddr);
    globals.register_primitive("RPLACA", cl, prim_rplaca);
    globals.register_primitive("RPLACD", cl, prim_rplacd);
    globals.register_primitive("LIST", cl, prim_list);
    globals.register_primitive("LIST*", cl, prim_list_star);
    globals.register_primitive("LENGTH", cl, prim_length);
    globals.register_primitive("APPEND", cl, prim_append);
    globals.register_primitive("NCONC", cl, prim_nconc);
    globals.register_primitive("REVERSE", cl, prim_reverse);
    globals.register_primitive("NREVERSE", cl, prim_nreverse);
    globals.register_primitive("NTH", cl, prim_nth);
    globals.register_primitive("NTHCDR", cl, prim_nthcdr);
    globals.register_primitive("LAST", cl, prim_last);
    globals.register_primitive("COPY-LIST", cl, prim_copy_list);
    globals.register_primitive("MEMBER", cl, prim_member);
    globals.register_primitive("ASSOC", cl, prim_assoc);

    // Symbols
    globals.register_primitive("SYMBOL-NAME", cl, prim_symbol_name);
    globals.register_primitive("SYMBOL-VALUE", cl, prim_symbol_value);
    globals.register_primitive("SYMBOL-FUNCTION", cl, prim_symbol_function);
    globals.register_primitive("SYMBOL-PACKAGE", cl, prim_symbol_package);
    globals.register_primitive("SYMBOL-PLIST", cl, prim_symbol_plist);
    globals.register_primitive("GET", cl, prim_get);
    globals.register_primitive("%PUT", cl, prim_put);
    globals.register_primitive("SET", cl, prim_set);
    globals.register_primitive("BOUNDP", cl, prim_boundp);
    globals.register_primitive("FBOUNDP", cl, prim_fboundp);
    globals.register_primitive("MAKUNBOUND", cl, prim_makunbound);
    globals.register_primitive("FMAKUNBOUND", cl, prim_fmakunbound);
    globals.register_primitive("GENSYM", cl, prim_gensym);
    globals.register_primitive("MAKE-SYMBOL", cl, prim_make_symbol);

    // Packages
    globals.register_primitive("INTERN", cl, prim_intern);
    globals.register_primitive("FIND-SYMBOL", cl, prim_find_symbol);
    globals.register_primitive("FIND-PACKAGE", cl, prim_find_package);
    globals.register_primitive("MAKE-PACKAGE", cl, prim_make_package);
    globals.register_primitive("USE-PACKAGE", cl, prim_use_package);
    globals.register_primitive("EXPORT", cl, prim_export);
    globals.register_primitive("UNINTERN", cl, prim_unintern);
    globals.register_primitive("PACKAGE-NAME", cl, prim_package_name);

    // Vectors
    globals.register_primitive("MAKE-ARRAY", cl, prim_make_array);
    globals.register_primitive("VECTOR", cl, prim_vector);
    globals.register_primitive("AREF", cl, prim_aref);
    globals.register_primitive("%ASET", cl, prim_aset);
    globals.register_primitive("VECTOR-PUSH", cl, prim_vector_push);
    globals.register_primitive("VECTOR-PUSH-EXTEND", cl, prim_vector_push_extend);
    globals.register_primitive("VECTOR-POP", cl, prim_vector_pop);
    globals.register_primitive("FILL-POINTER", cl, prim_fill_pointer);
    globals.register_primitive("ARRAY-TOTAL-SIZE", cl, prim_array_total_size);

    // Characters and strings
    globals.register_primitive("CHAR-CODE", cl, prim_char_code);
    globals.register_primitive("CODE-CHAR", cl, prim_code_char);
    globals.register_primitive("CHAR-NAME", cl, prim_char_name);
    globals.register_primitive("NAME-CHAR", cl, prim_name_char);
    globals.register_primitive("CHAR-UPCASE", cl, prim_char_upcase);
    globals.register_primitive("CHAR-DOWNCASE", cl, prim_char_downcase);
    globals.register_primitive("CHAR=", cl, prim_char_eq);
    globals.register_primitive("CHAR-EQUAL", cl, prim_char_equal);
    globals.register_primitive("STRING", cl, prim_string);
    globals.register_primitive("STRING=", cl, prim_string_eq);
    globals.register_primitive("STRING-EQUAL", cl, prim_string_equal);
    globals.register_primitive("STRING-UPCASE", cl, prim_string_upcase);
    globals.register_primitive("STRING-DOWNCASE", cl, prim_string_downcase);

    // Calling and evaluation
    globals.register_primitive("FUNCALL", cl, prim_funcall);
    globals.register_primitive("APPLY", cl, prim_apply);
    globals.register_primitive("VALUES", cl, prim_values);
    globals.register_primitive("VALUES-LIST", cl, prim_values_list);
    globals.register_primitive("EVAL", cl, prim_eval);
    globals.register_primitive("MACROEXPAND", cl, prim_macroexpand);
    globals.register_primitive("MACROEXPAND-1", cl, prim_macroexpand_1);

    // Printing and streams
    globals.register_primitive("WRITE-TO-STRING", cl, prim_write_to_string);
    globals.register_primitive("PRIN1-TO-STRING", cl, prim_write_to_string);
    globals.register_primitive("PRINC-TO-STRING", cl, prim_princ_to_string);
    globals.register_primitive("%OUTPUT-OBJECT", cl, prim_output_object);
    globals.register_primitive("%WRITE-STRING", cl, prim_write_string);
    globals.register_primitive("%TERPRI", cl, prim_terpri);
    globals.register_primitive("%FRESH-LINE", cl, prim_fresh_line);
    globals.register_primitive("%FORMAT", cl, prim_format);
    globals.register_primitive("MAKE-STRING-OUTPUT-STREAM", cl, prim_make_string_output_stream);
    globals.register_primitive("GET-OUTPUT-STREAM-STRING", cl, prim_get_output_stream_string);

    // Error signaling (bootstrap contract: raise as a catchable typed
    // error; the full condition system replaces these from outside)
    globals.register_primitive("ERROR", cl, prim_error);
    globals.register_primitive("SIGNAL", cl, prim_error);
}

// ---------------------------------------------------------------------
// Arithmetic
// ---------------------------------------------------------------------

fn prim_add(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    let mut sum = Number::Fixnum(0);
    for &arg in args {
        let n = number_arg(proc, arg)?;
        sum = sum.add(&n)?;
    }
    Ok(proc.lower_number(sum))
}

fn prim_sub(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_min_arity("-", args, 1)?;
    let first = number_arg(proc, args[0])?;
    if args.len() == 1 {
        return Ok(proc.lower_number(first.neg()));
    }
    let mut result = first;
    for &arg in &args[1..] {
        let n = number_arg(proc, arg)?;
        result = result.sub(&n)?;
    }
    Ok(proc.lower_number(result))
}

fn prim_mul(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    let mut product = Number::Fixnum(1);
    for &arg in args {
        let n = number_arg(proc, arg)?;
        product = product.mul(&n)?;
    }
    Ok(proc.lower_number(product))
}

fn prim_div(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_min_arity("/", args, 1)?;
    let first = number_arg(proc, args[0])?;
    if args.len() == 1 {
        return Ok(proc.lower_number(first.invert()?));
    }
    let mut result = first;
    for &arg in &args[1..] {
        let n = number_arg(proc, arg)?;
        result = result.div(&n)?;
    }
    Ok(proc.lower_number(result))
}

fn prim_one_plus(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("1+", args, 1)?;
    let n = number_arg(proc, args[0])?;
    let r = n.add(&Number::Fixnum(1))?;
    Ok(proc.lower_number(r))
}

fn prim_one_minus(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("1-", args, 1)?;
    let n = number_arg(proc, args[0])?;
    let r = n.sub(&Number::Fixnum(1))?;
    Ok(proc.lower_number(r))
}

fn prim_abs(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("ABS", args, 1)?;
    let n = number_arg(proc, args[0])?;
    Ok(proc.lower_number(n.abs()))
}

fn prim_mod(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("MOD", args, 2)?;
    let a = real_arg(proc, args[0])?;
    let b = real_arg(proc, args[1])?;
    Ok(proc.lower_number(a.floor_mod(&b)?))
}

fn prim_rem(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("REM", args, 2)?;
    let a = real_arg(proc, args[0])?;
    let b = real_arg(proc, args[1])?;
    Ok(proc.lower_number(a.trunc_rem(&b)?))
}

fn prim_gcd(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    let mut acc = Number::Fixnum(0);
    for &arg in args {
        let n = integer_arg(proc, arg)?;
        acc = match acc.gcd_with(&n) {
            Some(g) => g,
            None => return Err(LispError::wrong_type(arg, TypeSpec::Integer).into()),
        };
    }
    Ok(proc.lower_number(acc))
}

/// TRUNCATE returns (quotient remainder) through the values slot.
fn prim_truncate(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    if args.is_empty() || args.len() > 2 {
        return Err(wrong_args("TRUNCATE", args.len()));
    }
    let a = real_arg(proc, args[0])?;
    let b = match args.get(1) {
        Some(&d) => real_arg(proc, d)?,
        None => Number::Fixnum(1),
    };
    let (q, r) = a.truncate(&b)?;
    let q_node = proc.lower_number(q);
    let r_node = proc.lower_number(r);
    proc.set_values(vec![q_node, r_node]);
    Ok(q_node)
}

/// Single-pass left fold; the earlier operand wins ties (numeric equality
/// decides, not representation).
fn fold_extremum(
    proc: &mut Process,
    name: &str,
    args: &[NodeId],
    want_greater: bool,
) -> EvalResult {
    check_min_arity(name, args, 1)?;
    let mut best_node = args[0];
    let mut best = real_arg(proc, args[0])?;
    for &arg in &args[1..] {
        let n = real_arg(proc, arg)?;
        let replace = match n.compare_reals(&best) {
            Some(std::cmp::Ordering::Greater) => want_greater,
            Some(std::cmp::Ordering::Less) => !want_greater,
            _ => false,
        };
        if replace {
            best = n;
            best_node = arg;
        }
    }
    Ok(best_node)
}

fn prim_min(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    fold_extremum(proc, "MIN", args, false)
}

fn prim_max(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    fold_extremum(proc, "MAX", args, true)
}

fn prim_float(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    if args.is_empty() || args.len() > 2 {
        return Err(wrong_args("FLOAT", args.len()));
    }
    let n = real_arg(proc, args[0])?;
    let wide = match args.get(1) {
        Some(&proto) => match proc.heap.get_unchecked(proto) {
            Object::SingleFloat(_) => false,
            Object::DoubleFloat(_) => true,
            _ => return Err(LispError::wrong_type(proto, TypeSpec::Float).into()),
        },
        // no prototype: floats pass through, rationals become single
        None => match n {
            Number::Double(_) => true,
            Number::Single(_) => false,
            _ => false,
        },
    };
    if wide {
        let v = n.to_f64();
        Ok(proc.make_double_float(v))
    } else {
        let v = n.to_f32();
        Ok(proc.make_single_float(v))
    }
}

fn prim_numerator(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("NUMERATOR", args, 1)?;
    let n = number_arg(proc, args[0])?;
    match n.numerator() {
        Some(r) => Ok(proc.lower_number(r)),
        None => Err(LispError::wrong_type(args[0], TypeSpec::Rational).into()),
    }
}

fn prim_denominator(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("DENOMINATOR", args, 1)?;
    let n = number_arg(proc, args[0])?;
    match n.denominator() {
        Some(r) => Ok(proc.lower_number(r)),
        None => Err(LispError::wrong_type(args[0], TypeSpec::Rational).into()),
    }
}

fn prim_realpart(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("REALPART", args, 1)?;
    let n = number_arg(proc, args[0])?;
    let (re, _) = n.parts();
    Ok(proc.lower_number(re))
}

/// IMAGPART on a real synthesizes the zero of matching exactness.
fn prim_imagpart(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("IMAGPART", args, 1)?;
    let n = number_arg(proc, args[0])?;
    let (_, im) = n.parts();
    Ok(proc.lower_number(im))
}

fn prim_complex(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    if args.is_empty() || args.len() > 2 {
        return Err(wrong_args("COMPLEX", args.len()));
    }
    let re = real_arg(proc, args[0])?;
    let im = match args.get(1) {
        Some(&i) => real_arg(proc, i)?,
        None => Number::Fixnum(0),
    };
    Ok(proc.lower_number(Number::complex(re, im)))
}

// ---------------------------------------------------------------------
// Numeric comparison
// ---------------------------------------------------------------------

fn prim_num_eq(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_min_arity("=", args, 1)?;
    let first = number_arg(proc, args[0])?;
    for &arg in &args[1..] {
        let n = number_arg(proc, arg)?;
        if !first.num_eq(&n) {
            return Ok(proc.make_bool(false, ctx.t_sym));
        }
    }
    Ok(proc.make_bool(true, ctx.t_sym))
}

fn prim_num_ne(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_min_arity("/=", args, 1)?;
    let mut nums = Vec::with_capacity(args.len());
    for &arg in args {
        nums.push(number_arg(proc, arg)?);
    }
    for i in 0..nums.len() {
        for j in (i + 1)..nums.len() {
            if nums[i].num_eq(&nums[j]) {
                return Ok(proc.make_bool(false, ctx.t_sym));
            }
        }
    }
    Ok(proc.make_bool(true, ctx.t_sym))
}

fn chain_compare(
    proc: &mut Process,
    ctx: &GlobalContext,
    name: &str,
    args: &[NodeId],
    accept: fn(std::cmp::Ordering) -> bool,
) -> EvalResult {
    check_min_arity(name, args, 1)?;
    let mut prev = real_arg(proc, args[0])?;
    for &arg in &args[1..] {
        let n = real_arg(proc, arg)?;
        let holds = match prev.compare_reals(&n) {
            Some(ord) => accept(ord),
            None => false, // NaN never orders
        };
        if !holds {
            return Ok(proc.make_bool(false, ctx.t_sym));
        }
        prev = n;
    }
    Ok(proc.make_bool(true, ctx.t_sym))
}

fn prim_lt(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    chain_compare(proc, ctx, "<", args, |o| o == std::cmp::Ordering::Less)
}

fn prim_gt(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    chain_compare(proc, ctx, ">", args, |o| o == std::cmp::Ordering::Greater)
}

fn prim_le(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    chain_compare(proc, ctx, "<=", args, |o| o != std::cmp::Ordering::Greater)
}

fn prim_ge(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    chain_compare(proc, ctx, ">=", args, |o| o != std::cmp::Ordering::Less)
}

fn prim_zerop(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("ZEROP", args, 1)?;
    let n = number_arg(proc, args[0])?;
    Ok(proc.make_bool(n.is_zero(), ctx.t_sym))
}

fn prim_plusp(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("PLUSP", args, 1)?;
    let n = real_arg(proc, args[0])?;
    let plus = n.compare_reals(&Number::Fixnum(0)) == Some(std::cmp::Ordering::Greater);
    Ok(proc.make_bool(plus, ctx.t_sym))
}

fn prim_minusp(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("MINUSP", args, 1)?;
    let n = real_arg(proc, args[0])?;
    let minus = n.compare_reals(&Number::Fixnum(0)) == Some(std::cmp::Ordering::Less);
    Ok(proc.make_bool(minus, ctx.t_sym))
}

fn prim_evenp(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("EVENP", args, 1)?;
    let n = integer_arg(proc, args[0])?;
    let even = n
        .is_even()
        .ok_or_else(|| ControlSignal::from(LispError::wrong_type(args[0], TypeSpec::Integer)))?;
    Ok(proc.make_bool(even, ctx.t_sym))
}

fn prim_oddp(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("ODDP", args, 1)?;
    let n = integer_arg(proc, args[0])?;
    let even = n
        .is_even()
        .ok_or_else(|| ControlSignal::from(LispError::wrong_type(args[0], TypeSpec::Integer)))?;
    Ok(proc.make_bool(!even, ctx.t_sym))
}

// ---------------------------------------------------------------------
// Type predicates
// ---------------------------------------------------------------------

fn prim_null(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("NULL", args, 1)?;
    let b = proc.is_nil(args[0]);
    Ok(proc.make_bool(b, ctx.t_sym))
}

fn prim_atom(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("ATOM", args, 1)?;
    let b = !matches!(proc.heap.get_unchecked(args[0]), Object::Cons(_, _));
    Ok(proc.make_bool(b, ctx.t_sym))
}

fn prim_consp(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("CONSP", args, 1)?;
    let b = matches!(proc.heap.get_unchecked(args[0]), Object::Cons(_, _));
    Ok(proc.make_bool(b, ctx.t_sym))
}

fn prim_listp(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("LISTP", args, 1)?;
    let b = matches!(
        proc.heap.get_unchecked(args[0]),
        Object::Cons(_, _) | Object::Nil
    );
    Ok(proc.make_bool(b, ctx.t_sym))
}

fn prim_symbolp(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("SYMBOLP", args, 1)?;
    let b = matches!(
        proc.heap.get_unchecked(args[0]),
        Object::Symbol(_) | Object::Nil
    );
    Ok(proc.make_bool(b, ctx.t_sym))
}

fn prim_keywordp(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("KEYWORDP", args, 1)?;
    let b = match proc.heap.get_unchecked(args[0]) {
        Object::Symbol(sym) => ctx.symbols.read().unwrap().is_keyword(*sym),
        _ => false,
    };
    Ok(proc.make_bool(b, ctx.t_sym))
}

fn prim_numberp(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("NUMBERP", args, 1)?;
    let b = proc.heap.get_unchecked(args[0]).is_number();
    Ok(proc.make_bool(b, ctx.t_sym))
}

fn prim_realp(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("REALP", args, 1)?;
    let b = proc.heap.get_unchecked(args[0]).is_real();
    Ok(proc.make_bool(b, ctx.t_sym))
}

fn prim_rationalp(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("RATIONALP", args, 1)?;
    let b = matches!(
        proc.heap.get_unchecked(args[0]),
        Object::Fixnum(_) | Object::Bignum(_) | Object::Ratio(_, _)
    );
    Ok(proc.make_bool(b, ctx.t_sym))
}

fn prim_integerp(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("INTEGERP", args, 1)?;
    let b = proc.heap.get_unchecked(args[0]).is_integer();
    Ok(proc.make_bool(b, ctx.t_sym))
}

fn prim_floatp(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("FLOATP", args, 1)?;
    let b = matches!(
        proc.heap.get_unchecked(args[0]),
        Object::SingleFloat(_) | Object::DoubleFloat(_)
    );
    Ok(proc.make_bool(b, ctx.t_sym))
}

fn prim_complexp(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("COMPLEXP", args, 1)?;
    let b = matches!(proc.heap.get_unchecked(args[0]), Object::Complex(_, _));
    Ok(proc.make_bool(b, ctx.t_sym))
}

fn prim_characterp(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("CHARACTERP", args, 1)?;
    let b = matches!(proc.heap.get_unchecked(args[0]), Object::Character(_));
    Ok(proc.make_bool(b, ctx.t_sym))
}

fn prim_stringp(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("STRINGP", args, 1)?;
    let b = matches!(proc.heap.get_unchecked(args[0]), Object::Str(_));
    Ok(proc.make_bool(b, ctx.t_sym))
}

fn prim_vectorp(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("VECTORP", args, 1)?;
    let b = matches!(
        proc.heap.get_unchecked(args[0]),
        Object::Vector(_) | Object::Str(_)
    );
    Ok(proc.make_bool(b, ctx.t_sym))
}

fn prim_functionp(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("FUNCTIONP", args, 1)?;
    let b = matches!(
        proc.heap.get_unchecked(args[0]),
        Object::Closure(_) | Object::Primitive(_)
    );
    Ok(proc.make_bool(b, ctx.t_sym))
}

fn prim_packagep(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("PACKAGEP", args, 1)?;
    let b = matches!(proc.heap.get_unchecked(args[0]), Object::Package(_));
    Ok(proc.make_bool(b, ctx.t_sym))
}

fn prim_type_of(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("TYPE-OF", args, 1)?;
    let name = proc.heap.get_unchecked(args[0]).type_name();
    let sym = ctx.symbols.write().unwrap().intern_in(name, CL_PACKAGE);
    Ok(proc.make_symbol_node(sym))
}

// ---------------------------------------------------------------------
// Identity and equality
// ---------------------------------------------------------------------

fn prim_eq(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("EQ", args, 2)?;
    let b = proc.eq(args[0], args[1]);
    Ok(proc.make_bool(b, ctx.t_sym))
}

fn prim_eql(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("EQL", args, 2)?;
    let b = proc.eql(args[0], args[1]);
    Ok(proc.make_bool(b, ctx.t_sym))
}

fn prim_equal(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("EQUAL", args, 2)?;
    let b = proc.equal(args[0], args[1]);
    Ok(proc.make_bool(b, ctx.t_sym))
}

fn prim_equalp(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("EQUALP", args, 2)?;
    let b = proc.equalp(args[0], args[1]);
    Ok(proc.make_bool(b, ctx.t_sym))
}

// ---------------------------------------------------------------------
// Conses and lists
// ---------------------------------------------------------------------

fn prim_cons(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("CONS", args, 2)?;
    Ok(proc.make_cons(args[0], args[1]))
}

fn prim_car(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("CAR", args, 1)?;
    Ok(proc.car(args[0])?)
}

fn prim_cdr(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("CDR", args, 1)?;
    Ok(proc.cdr(args[0])?)
}

fn prim_caar(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("CAAR", args, 1)?;
    let car = proc.car(args[0])?;
    Ok(proc.car(car)?)
}

fn prim_cadr(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("CADR", args, 1)?;
    let cdr = proc.cdr(args[0])?;
    Ok(proc.car(cdr)?)
}

fn prim_cddr(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("CDDR", args, 1)?;
    let cdr = proc.cdr(args[0])?;
    Ok(proc.cdr(cdr)?)
}

fn prim_rplaca(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("RPLACA", args, 2)?;
    match proc.heap.get_unchecked(args[0]) {
        Object::Cons(_, cdr) => {
            let cdr = *cdr;
            proc.heap.overwrite(args[0], Object::Cons(args[1], cdr));
            Ok(args[0])
        }
        _ => Err(LispError::wrong_type(args[0], TypeSpec::Cons).into()),
    }
}

fn prim_rplacd(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("RPLACD", args, 2)?;
    match proc.heap.get_unchecked(args[0]) {
        Object::Cons(car, _) => {
            let car = *car;
            proc.heap.overwrite(args[0], Object::Cons(car, args[1]));
            Ok(args[0])
        }
        _ => Err(LispError::wrong_type(args[0], TypeSpec::Cons).into()),
    }
}

fn prim_list(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    Ok(proc.make_list(args))
}

fn prim_list_star(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_min_arity("LIST*", args, 1)?;
    let mut result = args[args.len() - 1];
    for &arg in args[..args.len() - 1].iter().rev() {
        result = proc.make_cons(arg, result);
    }
    Ok(result)
}

fn prim_length(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("LENGTH", args, 1)?;
    let len = match proc.heap.get_unchecked(args[0]) {
        Object::Nil | Object::Cons(_, _) => proc.list_to_vec(args[0])?.len(),
        Object::Str(s) => s.chars().count(),
        Object::Vector(id) => {
            let id = *id;
            proc.arrays
                .length(id)
                .ok_or_else(|| LispError::General("invalid vector handle".to_string()))?
        }
        _ => return Err(LispError::wrong_type(args[0], TypeSpec::Sequence).into()),
    };
    Ok(proc.make_fixnum(len as i64))
}

/// APPEND copies every argument except the last, which becomes the shared
/// tail of the result.
fn prim_append(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    if args.is_empty() {
        return Ok(proc.make_nil());
    }
    let tail = args[args.len() - 1];
    let mut elements = Vec::new();
    for &arg in &args[..args.len() - 1] {
        elements.extend(proc.list_to_vec(arg)?);
    }
    let mut result = tail;
    for &elem in elements.iter().rev() {
        result = proc.make_cons(elem, result);
    }
    Ok(result)
}

/// NCONC destructively splices: each list's last cons gets its cdr smashed
/// to the next argument. The first cons of the first non-empty list keeps
/// its identity.
fn prim_nconc(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    let mut head = proc.make_nil();
    let mut tail: Option<NodeId> = None;

    for (i, &arg) in args.iter().enumerate() {
        let is_last = i + 1 == args.len();
        if proc.is_nil(arg) {
            continue;
        }
        if proc.as_cons(arg).is_none() {
            // an atom is only legal in final position (dotted result)
            if !is_last {
                return Err(LispError::wrong_type(arg, TypeSpec::List).into());
            }
            match tail {
                Some(t) => {
                    let (car, _) = proc.as_cons(t).expect("tail is a cons");
                    proc.heap.overwrite(t, Object::Cons(car, arg));
                }
                None => head = arg,
            }
            break;
        }

        match tail {
            None => head = arg,
            Some(t) => {
                let (car, _) = proc.as_cons(t).expect("tail is a cons");
                proc.heap.overwrite(t, Object::Cons(car, arg));
            }
        }
        // advance to this chain's last cons
        let mut current = arg;
        while let Some((_, cdr)) = proc.as_cons(current) {
            if proc.as_cons(cdr).is_some() {
                current = cdr;
            } else {
                break;
            }
        }
        tail = Some(current);
    }
    Ok(head)
}

fn prim_reverse(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("REVERSE", args, 1)?;
    let mut elements = proc.list_to_vec(args[0])?;
    elements.reverse();
    Ok(proc.make_list(&elements))
}

/// NREVERSE reverses in place by smashing cdrs.
fn prim_nreverse(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("NREVERSE", args, 1)?;
    let mut prev = proc.make_nil();
    let mut current = args[0];
    loop {
        match proc.as_cons(current) {
            Some((car, cdr)) => {
                proc.heap.overwrite(current, Object::Cons(car, prev));
                prev = current;
                current = cdr;
            }
            None => {
                if !proc.is_nil(current) {
                    return Err(LispError::wrong_type(args[0], TypeSpec::List).into());
                }
                return Ok(prev);
            }
        }
    }
}

fn prim_nth(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("NTH", args, 2)?;
    let n = index_arg(proc, args[0])?;
    let mut current = args[1];
    for _ in 0..n {
        current = proc.cdr(current)?;
    }
    Ok(proc.car(current)?)
}

fn prim_nthcdr(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("NTHCDR", args, 2)?;
    let n = index_arg(proc, args[0])?;
    let mut current = args[1];
    for _ in 0..n {
        current = proc.cdr(current)?;
    }
    Ok(current)
}

fn prim_last(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("LAST", args, 1)?;
    if proc.is_nil(args[0]) {
        return Ok(proc.make_nil());
    }
    let mut current = args[0];
    loop {
        match proc.as_cons(current) {
            Some((_, cdr)) if proc.as_cons(cdr).is_some() => current = cdr,
            Some(_) => return Ok(current),
            None => return Err(LispError::wrong_type(args[0], TypeSpec::List).into()),
        }
    }
}

fn prim_copy_list(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("COPY-LIST", args, 1)?;
    let elements = proc.list_to_vec(args[0])?;
    Ok(proc.make_list(&elements))
}

fn prim_member(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("MEMBER", args, 2)?;
    let mut current = args[1];
    loop {
        match proc.as_cons(current) {
            Some((car, cdr)) => {
                if proc.eql(args[0], car) {
                    return Ok(current);
                }
                current = cdr;
            }
            None => return Ok(proc.make_nil()),
        }
    }
}

fn prim_assoc(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("ASSOC", args, 2)?;
    for entry in proc.list_to_vec(args[1])? {
        if let Some((key, _)) = proc.as_cons(entry) {
            if proc.eql(args[0], key) {
                return Ok(entry);
            }
        }
    }
    Ok(proc.make_nil())
}

// ---------------------------------------------------------------------
// Symbols
// ---------------------------------------------------------------------

fn prim_symbol_name(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("SYMBOL-NAME", args, 1)?;
    let sym = symbol_arg(proc, ctx, args[0])?;
    let name = ctx.symbol_name(sym);
    Ok(proc.make_string(&name))
}

fn prim_symbol_value(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("SYMBOL-VALUE", args, 1)?;
    let sym = symbol_arg(proc, ctx, args[0])?;
    if sym == ctx.nil_sym {
        return Ok(proc.make_nil());
    }
    if sym == ctx.t_sym || ctx.symbols.read().unwrap().is_keyword(sym) {
        return Ok(args[0]);
    }
    proc.symbol_value(sym)
        .ok_or_else(|| LispError::UnboundVariable(sym).into())
}

fn prim_symbol_function(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("SYMBOL-FUNCTION", args, 1)?;
    let sym = symbol_arg(proc, ctx, args[0])?;
    let mut interp = Interpreter::new(proc, ctx);
    interp.resolve_function(sym)
}

fn prim_symbol_package(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("SYMBOL-PACKAGE", args, 1)?;
    let sym = symbol_arg(proc, ctx, args[0])?;
    match ctx.symbols.read().unwrap().symbol_package(sym) {
        Some(pkg) => Ok(proc.heap.alloc(Object::Package(pkg))),
        None => Ok(proc.make_nil()),
    }
}

fn prim_symbol_plist(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("SYMBOL-PLIST", args, 1)?;
    let sym = symbol_arg(proc, ctx, args[0])?;
    Ok(proc.get_plist(sym).unwrap_or_else(|| proc.make_nil()))
}

/// GET walks the plist two cells at a time; the indicator compares by EQL.
fn prim_get(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    if args.len() < 2 || args.len() > 3 {
        return Err(wrong_args("GET", args.len()));
    }
    let sym = symbol_arg(proc, ctx, args[0])?;
    let default = args.get(2).copied();
    let mut current = match proc.get_plist(sym) {
        Some(plist) => plist,
        None => return Ok(default.unwrap_or_else(|| proc.make_nil())),
    };
    loop {
        match proc.as_cons(current) {
            Some((indicator, rest)) => {
                let (value, next) = match proc.as_cons(rest) {
                    Some(pair) => pair,
                    None => {
                        return Err(LispError::Program("malformed property list".to_string())
                            .into())
                    }
                };
                if proc.eql(indicator, args[1]) {
                    return Ok(value);
                }
                current = next;
            }
            None => return Ok(default.unwrap_or_else(|| proc.make_nil())),
        }
    }
}

/// %PUT updates an existing property in place or pushes a new pair.
fn prim_put(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("%PUT", args, 3)?;
    let sym = symbol_arg(proc, ctx, args[0])?;
    let mut current = proc.get_plist(sym).unwrap_or_else(|| proc.make_nil());
    let plist_head = current;
    loop {
        match proc.as_cons(current) {
            Some((indicator, rest)) => {
                let (_, next) = match proc.as_cons(rest) {
                    Some(pair) => pair,
                    None => {
                        return Err(LispError::Program("malformed property list".to_string())
                            .into())
                    }
                };
                if proc.eql(indicator, args[1]) {
                    proc.heap.overwrite(rest, Object::Cons(args[2], next));
                    return Ok(args[2]);
                }
                current = next;
            }
            None => break,
        }
    }
    let tail = proc.make_cons(args[2], plist_head);
    let new_plist = proc.make_cons(args[1], tail);
    proc.set_plist(sym, new_plist);
    Ok(args[2])
}

fn prim_set(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("SET", args, 2)?;
    let sym = symbol_arg(proc, ctx, args[0])?;
    if sym == ctx.nil_sym || sym == ctx.t_sym || ctx.symbols.read().unwrap().is_keyword(sym) {
        return Err(LispError::Program("cannot assign a constant".to_string()).into());
    }
    proc.set_special(sym, args[1]);
    Ok(args[1])
}

fn prim_boundp(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("BOUNDP", args, 1)?;
    let sym = symbol_arg(proc, ctx, args[0])?;
    if sym == ctx.nil_sym || sym == ctx.t_sym || ctx.symbols.read().unwrap().is_keyword(sym) {
        return Ok(proc.make_bool(true, ctx.t_sym));
    }
    let b = proc.symbol_boundp(sym);
    Ok(proc.make_bool(b, ctx.t_sym))
}

fn prim_fboundp(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("FBOUNDP", args, 1)?;
    let sym = symbol_arg(proc, ctx, args[0])?;
    let b = proc.get_function(sym).is_some() || ctx.primitives.contains_key(&sym);
    Ok(proc.make_bool(b, ctx.t_sym))
}

fn prim_makunbound(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("MAKUNBOUND", args, 1)?;
    let sym = symbol_arg(proc, ctx, args[0])?;
    proc.makunbound(sym);
    Ok(args[0])
}

fn prim_fmakunbound(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("FMAKUNBOUND", args, 1)?;
    let sym = symbol_arg(proc, ctx, args[0])?;
    proc.unset_function(sym);
    Ok(args[0])
}

fn prim_gensym(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    if args.len() > 1 {
        return Err(wrong_args("GENSYM", args.len()));
    }
    let prefix = match args.first() {
        Some(&node) => string_arg(proc, ctx, node)?,
        None => "G".to_string(),
    };
    proc.gensym_counter += 1;
    let name = format!("{}{}", prefix, proc.gensym_counter);
    let sym = ctx.symbols.write().unwrap().make_symbol(&name);
    Ok(proc.make_symbol_node(sym))
}

fn prim_make_symbol(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("MAKE-SYMBOL", args, 1)?;
    let name = match proc.heap.get_unchecked(args[0]) {
        Object::Str(s) => s.clone(),
        _ => return Err(LispError::wrong_type(args[0], TypeSpec::String).into()),
    };
    let sym = ctx.symbols.write().unwrap().make_symbol(&name);
    Ok(proc.make_symbol_node(sym))
}

// ---------------------------------------------------------------------
// Packages
// ---------------------------------------------------------------------

/// INTERN returns the symbol and, as a second value, its status keyword
/// (or NIL when freshly created).
fn prim_intern(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    if args.is_empty() || args.len() > 2 {
        return Err(wrong_args("INTERN", args.len()));
    }
    let name = match proc.heap.get_unchecked(args[0]) {
        Object::Str(s) => s.clone(),
        _ => return Err(LispError::wrong_type(args[0], TypeSpec::String).into()),
    };
    let pkg = package_arg(proc, ctx, args.get(1).copied())?;

    let (sym, status) = {
        let mut symbols = ctx.symbols.write().unwrap();
        match symbols.find_symbol(&name, pkg) {
            Some((sym, status)) => (sym, Some(status)),
            None => (symbols.intern_in(&name, pkg), None),
        }
    };
    let sym_node = proc.make_symbol_node(sym);
    let status_node = status_keyword(proc, ctx, status);
    proc.set_values(vec![sym_node, status_node]);
    Ok(sym_node)
}

fn status_keyword(
    proc: &mut Process,
    ctx: &GlobalContext,
    status: Option<crate::symbol::SymbolStatus>,
) -> NodeId {
    use crate::symbol::SymbolStatus;
    let name = match status {
        Some(SymbolStatus::Internal) => "INTERNAL",
        Some(SymbolStatus::External) => "EXTERNAL",
        Some(SymbolStatus::Inherited) => "INHERITED",
        None => return proc.make_nil(),
    };
    let kw = ctx.symbols.write().unwrap().intern_keyword(name);
    proc.make_symbol_node(kw)
}

fn prim_find_symbol(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    if args.is_empty() || args.len() > 2 {
        return Err(wrong_args("FIND-SYMBOL", args.len()));
    }
    let name = match proc.heap.get_unchecked(args[0]) {
        Object::Str(s) => s.clone(),
        _ => return Err(LispError::wrong_type(args[0], TypeSpec::String).into()),
    };
    let pkg = package_arg(proc, ctx, args.get(1).copied())?;
    let found = ctx.symbols.read().unwrap().find_symbol(&name, pkg);
    match found {
        Some((sym, status)) => {
            let sym_node = proc.make_symbol_node(sym);
            let status_node = status_keyword(proc, ctx, Some(status));
            proc.set_values(vec![sym_node, status_node]);
            Ok(sym_node)
        }
        None => {
            let nil = proc.make_nil();
            proc.set_values(vec![nil, nil]);
            Ok(nil)
        }
    }
}

fn prim_find_package(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("FIND-PACKAGE", args, 1)?;
    match package_arg(proc, ctx, Some(args[0])) {
        Ok(pkg) => Ok(proc.heap.alloc(Object::Package(pkg))),
        Err(_) => Ok(proc.make_nil()),
    }
}

fn prim_make_package(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("MAKE-PACKAGE", args, 1)?;
    let name = string_arg(proc, ctx, args[0])?;
    let mut symbols = ctx.symbols.write().unwrap();
    if symbols.find_package(&name).is_some() {
        return Err(LispError::Package(format!("package {} already exists", name)).into());
    }
    let pkg = symbols.make_package(&name);
    drop(symbols);
    Ok(proc.heap.alloc(Object::Package(pkg)))
}

fn prim_use_package(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    if args.is_empty() || args.len() > 2 {
        return Err(wrong_args("USE-PACKAGE", args.len()));
    }
    let used = package_arg(proc, ctx, Some(args[0]))?;
    let user = package_arg(proc, ctx, args.get(1).copied())?;
    if !ctx.symbols.write().unwrap().use_package(used, user) {
        return Err(LispError::Package("USE-PACKAGE failed".to_string()).into());
    }
    Ok(proc.make_bool(true, ctx.t_sym))
}

fn prim_export(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    if args.is_empty() || args.len() > 2 {
        return Err(wrong_args("EXPORT", args.len()));
    }
    let sym = symbol_arg(proc, ctx, args[0])?;
    ctx.symbols.write().unwrap().export_symbol(sym);
    Ok(proc.make_bool(true, ctx.t_sym))
}

fn prim_unintern(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    if args.is_empty() || args.len() > 2 {
        return Err(wrong_args("UNINTERN", args.len()));
    }
    let sym = symbol_arg(proc, ctx, args[0])?;
    let pkg = package_arg(proc, ctx, args.get(1).copied())?;
    let removed = ctx.symbols.write().unwrap().unintern(sym, pkg);
    Ok(proc.make_bool(removed, ctx.t_sym))
}

fn prim_package_name(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("PACKAGE-NAME", args, 1)?;
    let pkg = package_arg(proc, ctx, Some(args[0]))?;
    let name = ctx
        .symbols
        .read()
        .unwrap()
        .package_name(pkg)
        .unwrap_or("")
        .to_string();
    Ok(proc.make_string(&name))
}

// ---------------------------------------------------------------------
// Vectors
// ---------------------------------------------------------------------

/// (make-array size &key initial-element fill-pointer adjustable
///  displaced-to displaced-index-offset)
fn prim_make_array(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_min_arity("MAKE-ARRAY", args, 1)?;
    let size = index_arg(proc, args[0])?;

    let mut initial_element = proc.make_nil();
    let mut fill_pointer = None;
    let mut adjustable = false;
    let mut displaced_to = None;
    let mut displaced_offset = 0;

    let keyargs = &args[1..];
    if keyargs.len() % 2 != 0 {
        return Err(LispError::Program("odd number of keyword arguments".to_string()).into());
    }
    let mut i = 0;
    while i < keyargs.len() {
        let key = keyargs[i];
        let val = keyargs[i + 1];
        if keyword_named(proc, ctx, key, "INITIAL-ELEMENT") {
            initial_element = val;
        } else if keyword_named(proc, ctx, key, "FILL-POINTER") {
            fill_pointer = match proc.heap.get_unchecked(val) {
                Object::Nil => None,
                Object::Symbol(sym) if *sym == ctx.t_sym => Some(size),
                Object::Fixnum(n) if *n >= 0 && (*n as usize) <= size => Some(*n as usize),
                _ => return Err(LispError::wrong_type(val, TypeSpec::Integer).into()),
            };
        } else if keyword_named(proc, ctx, key, "ADJUSTABLE") {
            adjustable = !proc.is_nil(val);
        } else if keyword_named(proc, ctx, key, "DISPLACED-TO") {
            if !proc.is_nil(val) {
                displaced_to = Some(vector_arg(proc, val)?);
            }
        } else if keyword_named(proc, ctx, key, "DISPLACED-INDEX-OFFSET") {
            displaced_offset = index_arg(proc, val)?;
        } else {
            return Err(LispError::Program("unknown MAKE-ARRAY keyword".to_string()).into());
        }
        i += 2;
    }

    let id = match displaced_to {
        Some(target) => proc
            .arrays
            .alloc_displaced(size, target, displaced_offset, fill_pointer),
        None => proc.arrays.alloc(size, initial_element, fill_pointer, adjustable),
    };
    Ok(proc.heap.alloc(Object::Vector(id)))
}

fn prim_vector(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    let id = proc.arrays.alloc_from_vec(args.to_vec());
    Ok(proc.heap.alloc(Object::Vector(id)))
}

fn prim_aref(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("AREF", args, 2)?;
    let index = index_arg(proc, args[1])?;
    enum Elem {
        Node(NodeId),
        Char(Option<char>, usize),
    }
    let elem = match proc.heap.get_unchecked(args[0]) {
        Object::Vector(id) => Elem::Node(proc.arrays.aref(*id, index)?),
        Object::Str(s) => Elem::Char(s.chars().nth(index), s.chars().count()),
        _ => return Err(LispError::wrong_type(args[0], TypeSpec::Vector).into()),
    };
    match elem {
        Elem::Node(node) => Ok(node),
        Elem::Char(Some(c), _) => Ok(proc.make_char(c)),
        Elem::Char(None, len) => Err(LispError::General(format!(
            "index {} out of bounds for string of length {}",
            index, len
        ))
        .into()),
    }
}

fn prim_aset(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("%ASET", args, 3)?;
    let id = vector_arg(proc, args[0])?;
    let index = index_arg(proc, args[1])?;
    proc.arrays.aset(id, index, args[2])?;
    Ok(args[2])
}

/// VECTOR-PUSH returns the new element's index, or NIL when full.
fn prim_vector_push(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("VECTOR-PUSH", args, 2)?;
    let id = vector_arg(proc, args[1])?;
    match proc.arrays.vector_push(id, args[0])? {
        Some(index) => Ok(proc.make_fixnum(index as i64)),
        None => Ok(proc.make_nil()),
    }
}

fn prim_vector_push_extend(
    proc: &mut Process,
    _ctx: &GlobalContext,
    args: &[NodeId],
) -> EvalResult {
    check_arity("VECTOR-PUSH-EXTEND", args, 2)?;
    let id = vector_arg(proc, args[1])?;
    let index = proc.arrays.vector_push_extend(id, args[0])?;
    Ok(proc.make_fixnum(index as i64))
}

fn prim_vector_pop(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("VECTOR-POP", args, 1)?;
    let id = vector_arg(proc, args[0])?;
    Ok(proc.arrays.vector_pop(id)?)
}

fn prim_fill_pointer(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("FILL-POINTER", args, 1)?;
    let id = vector_arg(proc, args[0])?;
    match proc.arrays.fill_pointer(id) {
        Some(fp) => Ok(proc.make_fixnum(fp as i64)),
        None => Err(LispError::wrong_type(args[0], TypeSpec::Vector).into()),
    }
}

fn prim_array_total_size(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("ARRAY-TOTAL-SIZE", args, 1)?;
    let id = vector_arg(proc, args[0])?;
    match proc.arrays.get(id) {
        Some(vec) => Ok(proc.make_fixnum(vec.size as i64)),
        None => Err(LispError::General("invalid vector handle".to_string()).into()),
    }
}

// ---------------------------------------------------------------------
// Characters and strings
// ---------------------------------------------------------------------

fn prim_char_code(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("CHAR-CODE", args, 1)?;
    let c = char_arg(proc, args[0])?;
    Ok(proc.make_fixnum(c as i64))
}

fn prim_code_char(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("CODE-CHAR", args, 1)?;
    let code = index_arg(proc, args[0])?;
    match u32::try_from(code).ok().and_then(char::from_u32) {
        Some(c) => Ok(proc.make_char(c)),
        None => Ok(proc.make_nil()),
    }
}

fn prim_char_name(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("CHAR-NAME", args, 1)?;
    let c = char_arg(proc, args[0])?;
    match chars::char_name(c) {
        Some(name) => Ok(proc.make_string(name)),
        None => Ok(proc.make_nil()),
    }
}

fn prim_name_char(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("NAME-CHAR", args, 1)?;
    let name = string_arg(proc, ctx, args[0])?;
    match chars::name_char(&name) {
        Some(c) => Ok(proc.make_char(c)),
        None => Ok(proc.make_nil()),
    }
}

fn prim_char_upcase(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("CHAR-UPCASE", args, 1)?;
    let c = char_arg(proc, args[0])?;
    Ok(proc.make_char(chars::upcase(c)))
}

fn prim_char_downcase(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("CHAR-DOWNCASE", args, 1)?;
    let c = char_arg(proc, args[0])?;
    Ok(proc.make_char(chars::downcase(c)))
}

fn prim_char_eq(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_min_arity("CHAR=", args, 1)?;
    let first = char_arg(proc, args[0])?;
    for &arg in &args[1..] {
        if char_arg(proc, arg)? != first {
            return Ok(proc.make_bool(false, ctx.t_sym));
        }
    }
    Ok(proc.make_bool(true, ctx.t_sym))
}

fn prim_char_equal(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_min_arity("CHAR-EQUAL", args, 1)?;
    let first = char_arg(proc, args[0])?;
    for &arg in &args[1..] {
        if !chars::char_equal_ci(char_arg(proc, arg)?, first) {
            return Ok(proc.make_bool(false, ctx.t_sym));
        }
    }
    Ok(proc.make_bool(true, ctx.t_sym))
}

fn prim_string(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("STRING", args, 1)?;
    let s = string_arg(proc, ctx, args[0])?;
    Ok(proc.make_string(&s))
}

fn prim_string_eq(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("STRING=", args, 2)?;
    let a = string_arg(proc, ctx, args[0])?;
    let b = string_arg(proc, ctx, args[1])?;
    Ok(proc.make_bool(a == b, ctx.t_sym))
}

fn prim_string_equal(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("STRING-EQUAL", args, 2)?;
    let a = string_arg(proc, ctx, args[0])?;
    let b = string_arg(proc, ctx, args[1])?;
    let equal = a.len() == b.len()
        && a.chars()
            .zip(b.chars())
            .all(|(x, y)| chars::char_equal_ci(x, y));
    Ok(proc.make_bool(equal, ctx.t_sym))
}

fn prim_string_upcase(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("STRING-UPCASE", args, 1)?;
    let s = string_arg(proc, ctx, args[0])?;
    Ok(proc.make_string(&s.to_uppercase()))
}

fn prim_string_downcase(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("STRING-DOWNCASE", args, 1)?;
    let s = string_arg(proc, ctx, args[0])?;
    Ok(proc.make_string(&s.to_lowercase()))
}

// ---------------------------------------------------------------------
// Calling and evaluation
// ---------------------------------------------------------------------

fn prim_funcall(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_min_arity("FUNCALL", args, 1)?;
    let mut interp = Interpreter::new(proc, ctx);
    interp.apply(args[0], &args[1..])
}

/// APPLY spreads its final list argument onto the call.
fn prim_apply(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_min_arity("APPLY", args, 2)?;
    let mut spread: SmallVec<[NodeId; 8]> = SmallVec::new();
    spread.extend_from_slice(&args[1..args.len() - 1]);
    spread.extend(proc.list_to_vec(args[args.len() - 1])?);
    let mut interp = Interpreter::new(proc, ctx);
    interp.apply(args[0], &spread)
}

/// VALUES: a single argument stays a single value; anything else loads the
/// values slot (including the zero-values case).
fn prim_values(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    if args.len() == 1 {
        proc.clear_values();
        return Ok(args[0]);
    }
    proc.set_values(args.to_vec());
    Ok(args.first().copied().unwrap_or_else(|| proc.make_nil()))
}

fn prim_values_list(proc: &mut Process, _ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("VALUES-LIST", args, 1)?;
    let vals = proc.list_to_vec(args[0])?;
    if vals.len() == 1 {
        proc.clear_values();
        return Ok(vals[0]);
    }
    let first = vals.first().copied().unwrap_or_else(|| proc.make_nil());
    proc.set_values(vals);
    Ok(first)
}

fn prim_eval(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("EVAL", args, 1)?;
    let mut interp = Interpreter::new(proc, ctx);
    interp.eval(args[0], &Environment::new())
}

fn prim_macroexpand(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_min_arity("MACROEXPAND", args, 1)?;
    let mut interp = Interpreter::new(proc, ctx);
    let (expansion, expanded) = interp.macroexpand(args[0])?;
    let flag = proc.make_bool(expanded, ctx.t_sym);
    proc.set_values(vec![expansion, flag]);
    Ok(expansion)
}

fn prim_macroexpand_1(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_min_arity("MACROEXPAND-1", args, 1)?;
    let mut interp = Interpreter::new(proc, ctx);
    let (expansion, expanded) = interp.macroexpand_1(args[0])?;
    let flag = proc.make_bool(expanded, ctx.t_sym);
    proc.set_values(vec![expansion, flag]);
    Ok(expansion)
}

// ---------------------------------------------------------------------
// Printing and streams
// ---------------------------------------------------------------------

fn prim_write_to_string(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("WRITE-TO-STRING", args, 1)?;
    let symbols = ctx.symbols.read().unwrap();
    let s = printer::write_to_string(proc, &symbols, args[0], &PrintConfig::prin1());
    drop(symbols);
    Ok(proc.make_string(&s))
}

fn prim_princ_to_string(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_arity("PRINC-TO-STRING", args, 1)?;
    let symbols = ctx.symbols.read().unwrap();
    let s = printer::write_to_string(proc, &symbols, args[0], &PrintConfig::princ());
    drop(symbols);
    Ok(proc.make_string(&s))
}

/// %OUTPUT-OBJECT writes an object's printed representation to a stream.
fn prim_output_object(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    if args.is_empty() || args.len() > 2 {
        return Err(wrong_args("%OUTPUT-OBJECT", args.len()));
    }
    let stream = stream_arg(proc, ctx, args.get(1).copied())?;
    let s = {
        let symbols = ctx.symbols.read().unwrap();
        printer::write_to_string(proc, &symbols, args[0], &PrintConfig::prin1())
    };
    proc.streams
        .write_string(stream, &s)
        .map_err(|e| ControlSignal::from(LispError::General(e.to_string())))?;
    Ok(args[0])
}

fn prim_write_string(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    if args.is_empty() || args.len() > 2 {
        return Err(wrong_args("%WRITE-STRING", args.len()));
    }
    let s = match proc.heap.get_unchecked(args[0]) {
        Object::Str(s) => s.clone(),
        _ => return Err(LispError::wrong_type(args[0], TypeSpec::String).into()),
    };
    let stream = stream_arg(proc, ctx, args.get(1).copied())?;
    proc.streams
        .write_string(stream, &s)
        .map_err(|e| ControlSignal::from(LispError::General(e.to_string())))?;
    Ok(args[0])
}

fn prim_terpri(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    if args.len() > 1 {
        return Err(wrong_args("%TERPRI", args.len()));
    }
    let stream = stream_arg(proc, ctx, args.first().copied())?;
    proc.streams
        .terpri(stream)
        .map_err(|e| ControlSignal::from(LispError::General(e.to_string())))?;
    Ok(proc.make_nil())
}

fn prim_fresh_line(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    if args.len() > 1 {
        return Err(wrong_args("%FRESH-LINE", args.len()));
    }
    let stream = stream_arg(proc, ctx, args.first().copied())?;
    let wrote = proc
        .streams
        .fresh_line(stream)
        .map_err(|e| ControlSignal::from(LispError::General(e.to_string())))?;
    Ok(proc.make_bool(wrote, ctx.t_sym))
}

/// Minimal %FORMAT: ~A ~S ~D ~% ~& ~~. The full directive engine is the
/// external formatter's business.
fn prim_format(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_min_arity("%FORMAT", args, 2)?;
    let control = match proc.heap.get_unchecked(args[1]) {
        Object::Str(s) => s.clone(),
        _ => return Err(LispError::wrong_type(args[1], TypeSpec::String).into()),
    };

    let mut out = String::new();
    let mut arg_index = 2;
    let mut chars_iter = control.chars().peekable();
    while let Some(c) = chars_iter.next() {
        if c != '~' {
            out.push(c);
            continue;
        }
        match chars_iter.next() {
            Some(d @ ('a' | 'A' | 's' | 'S' | 'd' | 'D')) => {
                let arg = match args.get(arg_index) {
                    Some(&a) => a,
                    None => {
                        return Err(LispError::Program(
                            "not enough arguments for format control".to_string(),
                        )
                        .into())
                    }
                };
                arg_index += 1;
                let config = if d == 's' || d == 'S' {
                    PrintConfig::prin1()
                } else {
                    PrintConfig::princ()
                };
                let symbols = ctx.symbols.read().unwrap();
                let rendered = printer::write_to_string(proc, &symbols, arg, &config);
                out.push_str(&rendered);
            }
            Some('%') => out.push('\n'),
            Some('&') => {
                if !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Some('~') => out.push('~'),
            Some(other) => {
                return Err(LispError::Program(format!(
                    "unsupported format directive ~{}",
                    other
                ))
                .into())
            }
            None => {
                return Err(
                    LispError::Program("format control ends with ~".to_string()).into()
                )
            }
        }
    }

    // destination: NIL returns the string, T / a stream writes it
    if proc.is_nil(args[0]) {
        return Ok(proc.make_string(&out));
    }
    let stream = stream_arg(proc, ctx, Some(args[0]))?;
    proc.streams
        .write_string(stream, &out)
        .map_err(|e| ControlSignal::from(LispError::General(e.to_string())))?;
    Ok(proc.make_nil())
}

fn prim_make_string_output_stream(
    proc: &mut Process,
    _ctx: &GlobalContext,
    args: &[NodeId],
) -> EvalResult {
    if !args.is_empty() {
        return Err(wrong_args("MAKE-STRING-OUTPUT-STREAM", args.len()));
    }
    let id = proc.streams.alloc(Stream::StringOutput {
        buffer: String::new(),
    });
    Ok(proc.make_stream(id))
}

fn prim_get_output_stream_string(
    proc: &mut Process,
    ctx: &GlobalContext,
    args: &[NodeId],
) -> EvalResult {
    check_arity("GET-OUTPUT-STREAM-STRING", args, 1)?;
    let stream = stream_arg(proc, ctx, Some(args[0]))?;
    match proc.streams.get_output_stream_string(stream) {
        Some(s) => Ok(proc.make_string(&s)),
        None => Err(LispError::wrong_type(args[0], TypeSpec::Stream).into()),
    }
}

// ---------------------------------------------------------------------
// Error signaling
// ---------------------------------------------------------------------

/// Bootstrap ERROR/SIGNAL: raise the payload as a catchable typed error.
/// The external condition system replaces this contract wholesale.
fn prim_error(proc: &mut Process, ctx: &GlobalContext, args: &[NodeId]) -> EvalResult {
    check_min_arity("ERROR", args, 1)?;
    let control = match proc.heap.get_unchecked(args[0]) {
        Object::Str(s) => s.clone(),
        Object::Symbol(sym) => ctx.symbol_name(*sym),
        _ => {
            let symbols = ctx.symbols.read().unwrap();
            printer::write_to_string(proc, &symbols, args[0], &PrintConfig::princ())
        }
    };
    Err(LispError::Simple {
        control,
        args: args[1..].to_vec(),
    }
    .into())
}
