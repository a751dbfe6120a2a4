//! Call-site argument reconciliation.
//!
//! Keeps a call's argument list in sync with the best available source of
//! truth, in precedence order: the library signature, the callee's
//! decompiled parameters, a forced signature, or the call's own
//! reaching-definition collector. Locations the source provides but the
//! call lacks are appended; arguments the source no longer mentions (or
//! that the procedure's parameter predicate filters) are swept.

use unlift_core::{
    Assign, CallStmt, DefCollector, ExpArena, ExpId, Procedure, Program, StmtId, Ty,
};

use crate::error::PassError;

/// Where the argument locations come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKind {
    /// A pinned (library or forced) signature.
    Signature,
    /// The callee's decompiled parameter list.
    Callee,
    /// The call's reaching-definition collector.
    Collector,
}

/// One location the source dishes out.
#[derive(Debug, Clone)]
struct SrcLoc {
    loc: ExpId,
    ty: Ty,
    /// For collector entries, the reaching definition to use as the RHS.
    collector_rhs: Option<ExpId>,
}

#[derive(Debug)]
struct ArgSource {
    kind: SourceKind,
    locs: Vec<SrcLoc>,
    /// Signature sources with an unexpanded ellipsis accept everything.
    accepts_all: bool,
}

impl ArgSource {
    fn exists(&self, loc: ExpId) -> bool {
        self.accepts_all || self.locs.iter().any(|s| s.loc == loc)
    }
}

/// Substitutes the call's reaching definitions into `e`. A location the
/// collector knows nothing about gets the implicit-initial subscript;
/// non-location subexpressions are left alone and only rebuilt around
/// their localised children.
pub fn localise_exp(exps: &mut ExpArena, def_col: &DefCollector, e: ExpId) -> ExpId {
    if let Some(reaching) = def_col.find_def_for(e) {
        return reaching;
    }
    if exps.is_mem_of(e) {
        let addr = localise_exp(exps, def_col, exps.arg(e, 0));
        let rebuilt = exps.mem(addr);
        if let Some(reaching) = def_col.find_def_for(rebuilt) {
            return reaching;
        }
        return exps.subscript(rebuilt, None);
    }
    if exps.is_location(e) {
        return exps.subscript(e, None);
    }

    let args: Vec<ExpId> = exps.args(e).to_vec();
    let mut rebuilt = e;
    for &arg in &args {
        let new = localise_exp(exps, def_col, arg);
        if new != arg {
            let (r, _) = exps.replace(rebuilt, arg, new);
            rebuilt = r;
        }
    }
    rebuilt
}

/// Localises only the components of a memory location (its address), not
/// the location itself.
pub fn localise_components(exps: &mut ExpArena, def_col: &DefCollector, e: ExpId) -> ExpId {
    if exps.is_mem_of(e) {
        let addr = localise_exp(exps, def_col, exps.arg(e, 0));
        return exps.mem(addr);
    }
    e
}

fn arg_source(prog: &Program, exps: &mut ExpArena, call: &CallStmt) -> ArgSource {
    let callee = call.callee.and_then(|id| prog.function(id));

    // Library callee: the call's pinned signature is the source.
    if callee.is_some_and(|f| f.is_library()) {
        return signature_source(exps, call, call.signature.as_ref());
    }

    // A decompiled callee return means the callee's parameters are
    // trustworthy.
    if call.callee_return.is_some() {
        let mut locs = Vec::new();
        if let Some(func) = callee {
            for param in &func.params {
                let (stripped, _) = exps.strip_subscripts(param.lhs);
                let loc = localise_components(exps, &call.def_col, stripped);
                locs.push(SrcLoc {
                    loc,
                    ty: param.ty.clone(),
                    collector_rhs: None,
                });
            }
        }
        return ArgSource {
            kind: SourceKind::Callee,
            locs,
            accepts_all: false,
        };
    }

    // A forced signature on the callee wins over the collector.
    if let Some(func) = callee {
        if func.signature.forced {
            return signature_source(exps, call, Some(&func.signature));
        }
    }

    // Fall back to the reaching definitions collected in the call.
    let locs = call
        .def_col
        .iter()
        .map(|(loc, reaching)| SrcLoc {
            loc,
            ty: Ty::Void,
            collector_rhs: Some(reaching),
        })
        .collect();
    ArgSource {
        kind: SourceKind::Collector,
        locs,
        accepts_all: false,
    }
}

fn signature_source(
    exps: &mut ExpArena,
    call: &CallStmt,
    sig: Option<&unlift_core::Signature>,
) -> ArgSource {
    let mut locs = Vec::new();
    let mut accepts_all = false;
    if let Some(sig) = sig {
        accepts_all = sig.has_ellipsis;
        for param in sig.params() {
            let (stripped, _) = exps.strip_subscripts(param.exp);
            let loc = localise_components(exps, &call.def_col, stripped);
            locs.push(SrcLoc {
                loc,
                ty: param.ty.clone(),
                collector_rhs: None,
            });
        }
    }
    ArgSource {
        kind: SourceKind::Signature,
        locs,
        accepts_all,
    }
}

/// Reconciles the argument list of the call at `call_id` against its
/// current source of truth.
pub fn update_arguments(
    proc: &mut Procedure,
    prog: &Program,
    exps: &mut ExpArena,
    call_id: StmtId,
) -> Result<(), PassError> {
    let call = proc
        .stmt(call_id)?
        .as_call()
        .ok_or(PassError::NotACall { id: call_id })?
        .clone();

    let src = arg_source(prog, exps, &call);
    let mut old_args = call.args.clone();

    // Everything the source provides exists in the argument list.
    for s in &src.locs {
        if proc.filter_params(exps, s.loc) {
            continue;
        }
        if old_args.iter().any(|a| a.lhs == s.loc) {
            continue;
        }
        // Localising relies on collected definitions; for locations that
        // don't rename it would only produce `{-}` noise.
        let rhs = if proc.can_rename(exps, s.loc) {
            match (src.kind, s.collector_rhs) {
                (SourceKind::Collector, Some(reaching)) => reaching,
                _ => localise_exp(exps, &call.def_col, s.loc),
            }
        } else {
            s.loc
        };
        old_args.push(Assign {
            ty: s.ty.clone(),
            lhs: s.loc,
            rhs,
        });
    }

    // Sweep arguments the source no longer mentions.
    let new_args: Vec<Assign> = old_args
        .into_iter()
        .filter(|a| src.exists(a.lhs) && !proc.filter_params(exps, a.lhs))
        .collect();

    proc.stmt_mut(call_id)?
        .as_call_mut()
        .ok_or(PassError::NotACall { id: call_id })?
        .args = new_args;
    Ok(())
}

/// Initializes a direct library call's arguments from its callee's
/// signature, pinning a copy of that signature on the call. Does nothing
/// for calls that already carry one, or for user callees (their arguments
/// come from data flow). Returns whether anything changed.
pub fn set_sig_arguments(
    proc: &mut Procedure,
    prog: &Program,
    call_id: StmtId,
) -> Result<bool, PassError> {
    let call = proc
        .stmt(call_id)?
        .as_call()
        .ok_or(PassError::NotACall { id: call_id })?
        .clone();

    if call.signature.is_some() {
        return Ok(false);
    }
    let Some(callee) = call.callee.and_then(|id| prog.function(id)) else {
        return Ok(false);
    };

    let sig = callee.signature.clone();
    let mut updated = call;
    if callee.is_library() {
        updated.args = sig
            .params()
            .iter()
            .map(|p| Assign {
                ty: p.ty.clone(),
                lhs: p.exp,
                rhs: p.exp,
            })
            .collect();
    }
    updated.signature = Some(sig);

    *proc
        .stmt_mut(call_id)?
        .as_call_mut()
        .ok_or(PassError::NotACall { id: call_id })? = updated;
    Ok(true)
}
