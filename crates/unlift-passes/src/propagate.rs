//! Statement (copy) propagation.
//!
//! A use `x{d}` where `d` is an assignment `x := rhs` with a trivially
//! copyable right-hand side (a constant or another SSA reference) is
//! replaced by that right-hand side. This is the propagation the
//! φ-simplifier schedules after collapsing a φ; it deliberately does not
//! chase arbitrary expressions.

use std::collections::HashMap;

use unlift_core::{ExpArena, ExpId, Procedure, StmtId, StmtKind};

/// Chase limit through chains of copies.
const CHASE_FUEL: u32 = 8;

/// Propagates trivial copies through the procedure. Returns the number of
/// rewritten expression sites.
pub fn propagate_statements(proc: &mut Procedure, exps: &mut ExpArena) -> usize {
    // Definition sites eligible for propagation.
    let mut copies: HashMap<StmtId, (ExpId, ExpId)> = HashMap::new();
    for (id, stmt) in proc.statements() {
        if let StmtKind::Assign(a) = &stmt.kind {
            if exps.is_subscript(a.rhs) || exps.is_const(a.rhs) {
                copies.insert(id, (a.lhs, a.rhs));
            }
        }
    }
    if copies.is_empty() {
        return 0;
    }

    let mut rewrites = 0;
    let ids: Vec<StmtId> = proc.stmt_ids().collect();
    for id in ids {
        let Ok(stmt) = proc.stmt(id) else {
            continue;
        };
        let mut kind = stmt.kind.clone();
        let mut changed = false;

        {
            let mut visit = |e: &mut ExpId| {
                let (new, n) = rewrite(exps, &copies, *e, CHASE_FUEL);
                if n > 0 {
                    *e = new;
                    rewrites += n;
                    changed = true;
                }
            };

            match &mut kind {
                StmtKind::Assign(a) => visit(&mut a.rhs),
                StmtKind::Branch(b) => visit(&mut b.cond),
                StmtKind::Call(c) => {
                    if let Some(dest) = &mut c.dest {
                        visit(dest);
                    }
                    for arg in &mut c.args {
                        visit(&mut arg.rhs);
                    }
                }
                StmtKind::Case(c) => {
                    if let Some(info) = &mut c.switch_info {
                        visit(&mut info.switch_exp);
                    }
                }
                StmtKind::Return(r) => {
                    for ret in &mut r.returns {
                        visit(&mut ret.rhs);
                    }
                }
                StmtKind::Goto(g) => {
                    if let Some(dest) = &mut g.dest {
                        visit(dest);
                    }
                }
                // φ operands are references by definition, not expression
                // uses; implicit assigns have no right-hand side.
                StmtKind::Phi(_) | StmtKind::Implicit(_) => {}
            }
        }

        if changed {
            let _ = proc.replace_stmt_kind(id, kind);
        }
    }

    rewrites
}

fn rewrite(
    exps: &mut ExpArena,
    copies: &HashMap<StmtId, (ExpId, ExpId)>,
    e: ExpId,
    fuel: u32,
) -> (ExpId, usize) {
    if fuel == 0 {
        return (e, 0);
    }

    if exps.is_subscript(e) {
        let base = exps.arg(e, 0);
        if let Some(Some(def)) = exps.def_of(e) {
            if let Some(&(lhs, rhs)) = copies.get(&def) {
                if lhs == base {
                    // Chase chains of copies.
                    let (chased, n) = rewrite(exps, copies, rhs, fuel - 1);
                    return (chased, n + 1);
                }
            }
        }
        return (e, 0);
    }

    let args: Vec<ExpId> = exps.args(e).to_vec();
    if args.is_empty() {
        return (e, 0);
    }

    let mut total = 0;
    let mut new_args = args.clone();
    for slot in new_args.iter_mut() {
        let (new, n) = rewrite(exps, copies, *slot, fuel);
        *slot = new;
        total += n;
    }
    if total == 0 {
        return (e, 0);
    }

    // The rewrite is deterministic per expression id, so replacing every
    // occurrence of a changed child is consistent across positions.
    let mut rebuilt = e;
    for (&old, &new) in args.iter().zip(new_args.iter()) {
        if old != new {
            let (r, _) = exps.replace(rebuilt, old, new);
            rebuilt = r;
        }
    }
    (rebuilt, total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use unlift_core::{Assign, BlockKind, Branch, Oper, ReturnStmt, Ty};

    #[test]
    fn propagates_copy_into_branch_condition() {
        let mut exps = ExpArena::new();
        let mut proc = Procedure::new("test");
        let bb = proc.cfg.add_block(BlockKind::Twoway, 0x1000);

        let x = exps.reg(24);
        let x_init = exps.subscript(x, None);
        // s0: x := x{-} (a collapsed φ)
        let s0 = proc
            .append_stmt(
                bb,
                StmtKind::Assign(Assign {
                    ty: Ty::int(32),
                    lhs: x,
                    rhs: x_init,
                }),
            )
            .unwrap();

        // branch if x{s0} = 0
        let x_s0 = exps.subscript(x, Some(s0));
        let zero = exps.int_const(0);
        let cond = exps.binary(Oper::Equals, x_s0, zero);
        let br = proc
            .append_stmt(bb, StmtKind::Branch(Branch { cond }))
            .unwrap();

        let n = propagate_statements(&mut proc, &mut exps);
        assert_eq!(n, 1);

        let expected = exps.binary(Oper::Equals, x_init, zero);
        assert_eq!(proc.stmt(br).unwrap().branch_cond(), Some(expected));
    }

    #[test]
    fn chases_copy_chains() {
        let mut exps = ExpArena::new();
        let mut proc = Procedure::new("test");
        let bb = proc.cfg.add_block(BlockKind::Ret, 0x1000);

        let x = exps.reg(24);
        let y = exps.reg(25);
        let seven = exps.int_const(7);

        // s0: x := 7, s1: y := x{s0}, ret y{s1}
        let s0 = proc
            .append_stmt(
                bb,
                StmtKind::Assign(Assign {
                    ty: Ty::int(32),
                    lhs: x,
                    rhs: seven,
                }),
            )
            .unwrap();
        let x_s0 = exps.subscript(x, Some(s0));
        let s1 = proc
            .append_stmt(
                bb,
                StmtKind::Assign(Assign {
                    ty: Ty::int(32),
                    lhs: y,
                    rhs: x_s0,
                }),
            )
            .unwrap();
        let y_s1 = exps.subscript(y, Some(s1));
        let ret = proc
            .append_stmt(
                bb,
                StmtKind::Return(ReturnStmt {
                    returns: vec![Assign {
                        ty: Ty::int(32),
                        lhs: y,
                        rhs: y_s1,
                    }],
                }),
            )
            .unwrap();

        propagate_statements(&mut proc, &mut exps);

        let StmtKind::Return(r) = &proc.stmt(ret).unwrap().kind else {
            panic!("expected return");
        };
        assert_eq!(r.returns[0].rhs, seven);
    }

    #[test]
    fn second_run_is_a_no_op() {
        let mut exps = ExpArena::new();
        let mut proc = Procedure::new("test");
        let bb = proc.cfg.add_block(BlockKind::Ret, 0x1000);

        let x = exps.reg(24);
        let seven = exps.int_const(7);
        let s0 = proc
            .append_stmt(
                bb,
                StmtKind::Assign(Assign {
                    ty: Ty::int(32),
                    lhs: x,
                    rhs: seven,
                }),
            )
            .unwrap();
        let x_s0 = exps.subscript(x, Some(s0));
        proc.append_stmt(
            bb,
            StmtKind::Return(ReturnStmt {
                returns: vec![Assign {
                    ty: Ty::int(32),
                    lhs: x,
                    rhs: x_s0,
                }],
            }),
        )
        .unwrap();

        assert!(propagate_statements(&mut proc, &mut exps) > 0);
        assert_eq!(propagate_statements(&mut proc, &mut exps), 0);
    }

    #[test]
    fn unrelated_defs_not_propagated() {
        let mut exps = ExpArena::new();
        let mut proc = Procedure::new("test");
        let bb = proc.cfg.add_block(BlockKind::Ret, 0x1000);

        let x = exps.reg(24);
        let y = exps.reg(25);
        let seven = exps.int_const(7);

        // s0 defines x, but the use below subscripts y with s0 (stale
        // reference); the lhs check must reject it.
        let s0 = proc
            .append_stmt(
                bb,
                StmtKind::Assign(Assign {
                    ty: Ty::int(32),
                    lhs: x,
                    rhs: seven,
                }),
            )
            .unwrap();
        let y_s0 = exps.subscript(y, Some(s0));
        let ret = proc
            .append_stmt(
                bb,
                StmtKind::Return(ReturnStmt {
                    returns: vec![Assign {
                        ty: Ty::int(32),
                        lhs: y,
                        rhs: y_s0,
                    }],
                }),
            )
            .unwrap();

        assert_eq!(propagate_statements(&mut proc, &mut exps), 0);
        let StmtKind::Return(r) = &proc.stmt(ret).unwrap().kind else {
            panic!("expected return");
        };
        assert_eq!(r.returns[0].rhs, y_s0);
    }
}
