//! Variadic call expansion.
//!
//! Calls to ellipsis-bearing signatures (`printf` and friends) carry too
//! few declared parameters; the format string tells us the rest. The
//! format argument is located (by name for the usual suspects, otherwise
//! the last argument), resolved through SSA links to a string constant,
//! and parsed against the specifier grammar
//! `% [flags] [width] [.prec] [size] spec` (plus the scanf-only `%[...]`
//! list class). Each specifier appends one parameter; scanf-style
//! conversions produce pointers. Afterwards the ellipsis flag is cleared
//! so the call is never expanded twice.

use tracing::{debug, warn};

use unlift_core::{Assign, CallStmt, ExpArena, ExpId, Procedure, Program, StmtId, StmtKind, Ty};

use crate::arguments::{localise_components, localise_exp};
use crate::error::PassError;

/// Expands a variadic call in place. Returns true when the call was
/// expanded.
pub fn process_ellipsis(
    proc: &mut Procedure,
    prog: &Program,
    exps: &mut ExpArena,
    call_id: StmtId,
) -> Result<bool, PassError> {
    let call = proc
        .stmt(call_id)?
        .as_call()
        .ok_or(PassError::NotACall { id: call_id })?
        .clone();

    let Some(callee) = call.callee.and_then(|id| prog.function(id)) else {
        return Ok(false);
    };
    let Some(sig) = &call.signature else {
        return Ok(false);
    };
    if !sig.has_ellipsis {
        return Ok(false);
    }

    // Position of the format argument.
    let name = callee.name.as_str();
    let format = match name {
        "printf" | "scanf" => 0,
        "sprintf" | "fprintf" | "sscanf" => 1,
        _ => {
            let n = call.args.len();
            if n > 0 && exps.is_str_const(call.args[n - 1].rhs) {
                n - 1
            } else {
                return Ok(false);
            }
        }
    };
    if format >= call.args.len() {
        return Ok(false);
    }

    debug!(callee = name, "ellipsis processing");

    let Some(format_str) = resolve_format_string(proc, exps, call.args[format].rhs) else {
        return Ok(false);
    };

    let is_scanf = name.contains("scanf");
    let mut updated = call;
    let n = parse_format(&mut updated, exps, &format_str, is_scanf);

    set_num_arguments(&mut updated, exps, format + n);
    if let Some(sig) = &mut updated.signature {
        sig.has_ellipsis = false; // so we don't do this again
    }

    *proc
        .stmt_mut(call_id)?
        .as_call_mut()
        .ok_or(PassError::NotACall { id: call_id })? = updated;
    Ok(true)
}

/// Chases the format argument to a string constant: directly, through
/// `a[m[...]]` peeling, through a defining assignment, or through any
/// φ operand that resolves to one.
fn resolve_format_string(
    proc: &Procedure,
    exps: &ExpArena,
    format_exp: ExpId,
) -> Option<String> {
    let mut e = format_exp;

    // We sometimes see a[m[blah{...}]].
    if exps.is_addr_of(e) {
        e = exps.arg(e, 0);
        if exps.is_subscript(e) {
            e = exps.arg(e, 0);
        }
        if exps.is_mem_of(e) {
            e = exps.arg(e, 0);
        }
    }

    if exps.is_str_const(e) {
        return Some(exps.str_value(e)?.to_owned());
    }

    if !exps.is_subscript(e) {
        return None;
    }
    // Not all null refs get converted to implicits.
    let def = exps.def_of(e).flatten()?;
    let def_stmt = proc.stmt(def).ok()?;
    match &def_stmt.kind {
        StmtKind::Assign(a) if exps.is_str_const(a.rhs) => {
            Some(exps.str_value(a.rhs)?.to_owned())
        }
        StmtKind::Phi(phi) => {
            // Only one candidate format string is needed.
            for operand in phi.operands.values() {
                let Some(opdef) = operand.def else {
                    continue;
                };
                let Ok(stmt) = proc.stmt(opdef) else {
                    continue;
                };
                if let StmtKind::Assign(a) = &stmt.kind {
                    if exps.is_str_const(a.rhs) {
                        return Some(exps.str_value(a.rhs)?.to_owned());
                    }
                }
            }
            None
        }
        _ => None,
    }
}

/// Parses the format string, appending a parameter per specifier.
/// Returns the number of arguments the format accounts for, including
/// the format string itself.
fn parse_format(call: &mut CallStmt, exps: &mut ExpArena, format_str: &str, is_scanf: bool) -> usize {
    let chars: Vec<char> = format_str.chars().collect();
    let mut n = 1; // the format string itself
    let mut p = 0;

    'outer: while p < chars.len() {
        if chars[p] != '%' {
            p += 1;
            continue;
        }
        p += 1; // point past the %

        let mut very_long = false; // %lld or %L
        let spec: char;
        loop {
            let Some(&ch) = chars.get(p) else {
                warn!("format string ends inside a specifier");
                break 'outer;
            };
            p += 1;

            match ch {
                '*' => {
                    // An extra integer parameter for the width or
                    // precision; never a pointer, even for scanf.
                    n += 1;
                    add_sig_param(call, exps, Ty::int(32), false);
                    continue;
                }
                '-' | '+' | '#' | ' ' => continue, // flag
                '.' => continue,                   // separates width and precision
                'h' | 'l' => {
                    // Size of half or long; the argument is usually still
                    // one word, except %ll.
                    if chars.get(p) == Some(&'l') {
                        p += 1;
                        very_long = true;
                    }
                    continue;
                }
                'L' => {
                    very_long = true;
                    continue;
                }
                '0'..='9' => continue, // width or precision
                other => {
                    spec = other;
                    break;
                }
            }
        }

        if spec != '%' {
            n += 1; // don't count %%
        }

        match spec {
            'd' | 'i' => add_sig_param(call, exps, Ty::int(if very_long { 64 } else { 32 }), is_scanf),
            'u' | 'x' | 'X' | 'o' => add_sig_param(call, exps, Ty::uint(32), is_scanf),
            // For scanf %f means float and %lf double; for printf both
            // mean double.
            'f' | 'g' | 'G' | 'e' | 'E' => add_sig_param(
                call,
                exps,
                Ty::float(if very_long {
                    128
                } else if is_scanf {
                    32
                } else {
                    64
                }),
                is_scanf,
            ),
            's' => add_sig_param(call, exps, Ty::ptr(Ty::array(Ty::Char)), is_scanf),
            'c' => add_sig_param(call, exps, Ty::Char, is_scanf),
            'p' => add_sig_param(call, exps, Ty::ptr(Ty::Void), is_scanf),
            '[' if is_scanf => {
                // List class: %[chars] or %[^chars]; an initial ] is
                // literal.
                if chars.get(p) == Some(&'^') {
                    p += 1;
                }
                if chars.get(p) == Some(&']') {
                    p += 1;
                }
                while p < chars.len() && chars[p] != ']' {
                    p += 1;
                }
                if p < chars.len() {
                    p += 1;
                }
                add_sig_param(call, exps, Ty::ptr(Ty::array(Ty::Char)), is_scanf);
            }
            '%' => {} // emits one percent char
            other => warn!(spec = %other, "unhandled format character"),
        }
    }

    n
}

/// Appends one parameter to the call's signature and, when the argument
/// list is short, a matching argument assignment.
fn add_sig_param(call: &mut CallStmt, exps: &mut ExpArena, ty: Ty, is_scanf: bool) {
    let ty = if is_scanf { Ty::ptr(ty) } else { ty };
    let Some(sig) = call.signature.as_mut() else {
        return;
    };
    let param_exp = sig.add_parameter(ty.clone(), exps);
    debug!(ty = %ty, "adding variadic parameter");

    if call.args.len() < sig.num_params() {
        let lhs = localise_components(exps, &call.def_col, param_exp);
        let rhs = localise_exp(exps, &call.def_col, param_exp);
        call.args.push(Assign { ty, lhs, rhs });
    }
}

/// Resizes the argument list to exactly `n`, extending from the pinned
/// signature when short.
fn set_num_arguments(call: &mut CallStmt, exps: &mut ExpArena, n: usize) {
    if call.args.len() > n {
        call.args.truncate(n);
        return;
    }
    let Some(sig) = call.signature.as_ref() else {
        return;
    };
    for i in call.args.len()..n {
        let Some(exp) = sig.param_exp(i) else {
            debug!(index = i, "signature too short while extending arguments");
            break;
        };
        let ty = sig.param_ty(i).cloned().unwrap_or(Ty::Void);
        let lhs = localise_components(exps, &call.def_col, exp);
        let rhs = localise_exp(exps, &call.def_col, exp);
        call.args.push(Assign { ty, lhs, rhs });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unlift_core::{BlockKind, Function, FuncId, Signature};

    fn printf_prog(exps: &mut ExpArena, name: &str) -> (Program, FuncId) {
        let mut prog = Program::new(0x1000, 0x8000);
        let mut sig = Signature::new();
        let fmt = exps.param("fmt");
        sig.push_param("fmt", fmt, Ty::ptr(Ty::Char));
        sig.has_ellipsis = true;
        let id = prog.add_function(Function::library(name, 0x7000, sig));
        (prog, id)
    }

    fn make_call(
        proc: &mut Procedure,
        exps: &mut ExpArena,
        prog: &Program,
        callee: FuncId,
        fmt_rhs: ExpId,
    ) -> StmtId {
        let bb = proc.cfg.add_block(BlockKind::Call, 0x1000);
        let dest = exps.int_const(0x7000);
        let mut call = CallStmt::direct(dest, callee);
        let sig = prog.function(callee).unwrap().signature.clone();
        let fmt_lhs = sig.param_exp(0).unwrap();
        call.args.push(Assign {
            ty: Ty::ptr(Ty::Char),
            lhs: fmt_lhs,
            rhs: fmt_rhs,
        });
        call.signature = Some(sig);
        proc.append_stmt(bb, StmtKind::Call(Box::new(call))).unwrap()
    }

    fn arg_types(proc: &Procedure, id: StmtId) -> Vec<Ty> {
        proc.stmt(id)
            .unwrap()
            .as_call()
            .unwrap()
            .args
            .iter()
            .map(|a| a.ty.clone())
            .collect()
    }

    #[test]
    fn printf_int_and_string() {
        let mut exps = ExpArena::new();
        let (prog, callee) = printf_prog(&mut exps, "printf");
        let mut proc = Procedure::new("caller");
        let fmt = exps.str_const("x=%d s=%s\n");
        let id = make_call(&mut proc, &mut exps, &prog, callee, fmt);

        assert!(process_ellipsis(&mut proc, &prog, &mut exps, id).unwrap());
        assert_eq!(
            arg_types(&proc, id),
            vec![
                Ty::ptr(Ty::Char),
                Ty::int(32),
                Ty::ptr(Ty::array(Ty::Char))
            ]
        );

        let call = proc.stmt(id).unwrap().as_call().unwrap();
        assert!(!call.signature.as_ref().unwrap().has_ellipsis);
    }

    #[test]
    fn expansion_happens_once() {
        let mut exps = ExpArena::new();
        let (prog, callee) = printf_prog(&mut exps, "printf");
        let mut proc = Procedure::new("caller");
        let fmt = exps.str_const("%d");
        let id = make_call(&mut proc, &mut exps, &prog, callee, fmt);

        assert!(process_ellipsis(&mut proc, &prog, &mut exps, id).unwrap());
        let after_first = arg_types(&proc, id);
        assert!(!process_ellipsis(&mut proc, &prog, &mut exps, id).unwrap());
        assert_eq!(arg_types(&proc, id), after_first);
    }

    #[test]
    fn scanf_outputs_become_pointers() {
        let mut exps = ExpArena::new();
        let (prog, callee) = printf_prog(&mut exps, "scanf");
        let mut proc = Procedure::new("caller");
        let fmt = exps.str_const("%d %f");
        let id = make_call(&mut proc, &mut exps, &prog, callee, fmt);

        assert!(process_ellipsis(&mut proc, &prog, &mut exps, id).unwrap());
        assert_eq!(
            arg_types(&proc, id),
            vec![
                Ty::ptr(Ty::Char),
                Ty::ptr(Ty::int(32)),
                // scanf %f reads a float, not a double
                Ty::ptr(Ty::float(32)),
            ]
        );
    }

    #[test]
    fn scanf_list_class() {
        let mut exps = ExpArena::new();
        let (prog, callee) = printf_prog(&mut exps, "scanf");
        let mut proc = Procedure::new("caller");
        let fmt = exps.str_const("%[^\n]");
        let id = make_call(&mut proc, &mut exps, &prog, callee, fmt);

        assert!(process_ellipsis(&mut proc, &prog, &mut exps, id).unwrap());
        assert_eq!(
            arg_types(&proc, id),
            vec![
                Ty::ptr(Ty::Char),
                Ty::ptr(Ty::ptr(Ty::array(Ty::Char))),
            ]
        );
    }

    #[test]
    fn width_star_adds_plain_int() {
        let mut exps = ExpArena::new();
        let (prog, callee) = printf_prog(&mut exps, "printf");
        let mut proc = Procedure::new("caller");
        let fmt = exps.str_const("%*.*f");
        let id = make_call(&mut proc, &mut exps, &prog, callee, fmt);

        assert!(process_ellipsis(&mut proc, &prog, &mut exps, id).unwrap());
        assert_eq!(
            arg_types(&proc, id),
            vec![
                Ty::ptr(Ty::Char),
                Ty::int(32),
                Ty::int(32),
                Ty::float(64),
            ]
        );
    }

    #[test]
    fn long_long_widens_ints() {
        let mut exps = ExpArena::new();
        let (prog, callee) = printf_prog(&mut exps, "printf");
        let mut proc = Procedure::new("caller");
        let fmt = exps.str_const("%lld %llx");
        let id = make_call(&mut proc, &mut exps, &prog, callee, fmt);

        assert!(process_ellipsis(&mut proc, &prog, &mut exps, id).unwrap());
        // %llx stays unsigned 32: the size modifier is ignored for
        // unsigned conversions.
        assert_eq!(
            arg_types(&proc, id),
            vec![Ty::ptr(Ty::Char), Ty::int(64), Ty::uint(32)]
        );
    }

    #[test]
    fn percent_escape_adds_nothing() {
        let mut exps = ExpArena::new();
        let (prog, callee) = printf_prog(&mut exps, "printf");
        let mut proc = Procedure::new("caller");
        let fmt = exps.str_const("100%% done\n");
        let id = make_call(&mut proc, &mut exps, &prog, callee, fmt);

        assert!(process_ellipsis(&mut proc, &prog, &mut exps, id).unwrap());
        assert_eq!(arg_types(&proc, id), vec![Ty::ptr(Ty::Char)]);
    }

    #[test]
    fn format_resolved_through_ssa_definition() {
        let mut exps = ExpArena::new();
        let (prog, callee) = printf_prog(&mut exps, "printf");
        let mut proc = Procedure::new("caller");

        // s0: r24 := "%d", call printf(fmt := r24{s0})
        let bb0 = proc.cfg.add_block(BlockKind::Fall, 0x0ff0);
        let r24 = exps.reg(24);
        let fmt_const = exps.str_const("%d");
        let s0 = proc
            .append_stmt(
                bb0,
                StmtKind::Assign(Assign {
                    ty: Ty::ptr(Ty::Char),
                    lhs: r24,
                    rhs: fmt_const,
                }),
            )
            .unwrap();
        let fmt_ref = exps.subscript(r24, Some(s0));
        let id = make_call(&mut proc, &mut exps, &prog, callee, fmt_ref);

        assert!(process_ellipsis(&mut proc, &prog, &mut exps, id).unwrap());
        assert_eq!(arg_types(&proc, id), vec![Ty::ptr(Ty::Char), Ty::int(32)]);
    }

    #[test]
    fn unresolvable_format_is_left_alone() {
        let mut exps = ExpArena::new();
        let (prog, callee) = printf_prog(&mut exps, "printf");
        let mut proc = Procedure::new("caller");
        let r24 = exps.reg(24);
        let fmt = exps.subscript(r24, None);
        let id = make_call(&mut proc, &mut exps, &prog, callee, fmt);

        assert!(!process_ellipsis(&mut proc, &prog, &mut exps, id).unwrap());
        let call = proc.stmt(id).unwrap().as_call().unwrap();
        assert!(call.signature.as_ref().unwrap().has_ellipsis);
    }

    #[test]
    fn truncated_specifier_does_not_panic() {
        let mut exps = ExpArena::new();
        let (prog, callee) = printf_prog(&mut exps, "printf");
        let mut proc = Procedure::new("caller");
        let fmt = exps.str_const("trailing %l");
        let id = make_call(&mut proc, &mut exps, &prog, callee, fmt);

        assert!(process_ellipsis(&mut proc, &prog, &mut exps, id).unwrap());
        assert_eq!(arg_types(&proc, id), vec![Ty::ptr(Ty::Char)]);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // Format strings come straight out of untrusted binaries; the
            // parser must survive anything.
            #[test]
            fn arbitrary_format_strings_never_panic(fmt in ".{0,64}") {
                let mut exps = ExpArena::new();
                let (prog, callee) = printf_prog(&mut exps, "printf");
                let mut proc = Procedure::new("caller");
                let fmt_exp = exps.str_const(&fmt);
                let id = make_call(&mut proc, &mut exps, &prog, callee, fmt_exp);

                let _ = process_ellipsis(&mut proc, &prog, &mut exps, id).unwrap();

                // However mangled the string, the argument list stays in
                // sync with the expanded signature.
                let call = proc.stmt(id).unwrap().as_call().unwrap();
                let sig = call.signature.as_ref().unwrap();
                prop_assert!(call.args.len() <= sig.num_params());
            }
        }
    }
}
