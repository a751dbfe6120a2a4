//! φ-simplification.
//!
//! Two degenerate φ shapes collapse to plain assignments:
//!
//! - `x := φ(x{d}, x{d})` -- every operand resolves to the same defining
//!   statement `d` -- becomes `x := x{d}`.
//! - `x := φ(x{self}, x{d})` -- every operand but one is a self-reference
//!   through a back edge -- becomes `x := x{d}`.
//!
//! Either rewrite schedules a statement-propagation pass. The pass is
//! idempotent: converted φs are ordinary assignments on the next run.

use tracing::debug;

use unlift_core::{Assign, ExpArena, Procedure, StmtId, StmtKind};

use crate::propagate::propagate_statements;

/// What a φ-simplification run did.
#[derive(Debug, Default)]
pub struct PhiSimplifyReport {
    /// φ statements rewritten to plain assignments.
    pub converted: Vec<StmtId>,
    /// True when a statement-propagation pass should follow.
    pub needs_propagation: bool,
}

/// Collapses degenerate φ-assignments in `proc`.
pub fn simplify_phis(proc: &mut Procedure, exps: &mut ExpArena) -> PhiSimplifyReport {
    let mut report = PhiSimplifyReport::default();

    for id in proc.phi_ids() {
        let Ok(stmt) = proc.stmt(id) else {
            continue;
        };
        let StmtKind::Phi(phi) = &stmt.kind else {
            continue;
        };
        if phi.operands.is_empty() {
            continue;
        }

        let lhs = phi.lhs;
        let ty = phi.ty.clone();
        let defs: Vec<Option<StmtId>> = phi.operands.values().map(|op| op.def).collect();

        let first_def = defs[0];
        let all_same = defs.iter().all(|&d| d == first_def);

        let replacement = if all_same {
            debug!(stmt = %id, "all operands the same");
            Some(first_def)
        } else {
            // All but one operand refers back to this φ itself.
            let mut not_self: Option<Option<StmtId>> = None;
            let mut only_one = true;
            for &def in &defs {
                if def == Some(id) {
                    continue;
                }
                if not_self.is_none() {
                    not_self = Some(def);
                } else {
                    only_one = false;
                    break;
                }
            }
            if only_one && not_self.is_some() {
                debug!(stmt = %id, "all but one operand is a self-reference");
                not_self
            } else {
                None
            }
        };

        if let Some(def) = replacement {
            let rhs = exps.subscript(lhs, def);
            let _ = proc.replace_stmt_kind(id, StmtKind::Assign(Assign { ty, lhs, rhs }));
            report.converted.push(id);
        }
    }

    report.needs_propagation = !report.converted.is_empty();
    report
}

/// Runs φ-simplification and, when anything collapsed, the scheduled
/// statement propagation.
pub fn run_phi_simplification(proc: &mut Procedure, exps: &mut ExpArena) -> PhiSimplifyReport {
    let report = simplify_phis(proc, exps);
    if report.needs_propagation {
        propagate_statements(proc, exps);
    }
    report
}
