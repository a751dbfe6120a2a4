//! Indirect-to-direct call promotion.
//!
//! A computed call whose destination expression resolves to a constant
//! address inside the text segment is really a direct call: resolve the
//! callee, rebuild the arguments from its signature, and downgrade the
//! enclosing block from computed-call to call. The caller is responsible
//! for scheduling a whole-procedure call-and-φ fix-up afterwards (the
//! promoted call invalidates collected bypass information).

use tracing::{debug, warn};

use unlift_core::{
    Assign, BinaryImage, BlockKind, ExpArena, Procedure, Program, StmtId, Ty,
};

use crate::error::PassError;

/// Attempts to promote the computed call at `call_id` to a direct call.
/// Returns true when the call was promoted.
pub fn try_convert_to_direct(
    proc: &mut Procedure,
    prog: &mut Program,
    exps: &mut ExpArena,
    image: &dyn BinaryImage,
    call_id: StmtId,
) -> Result<bool, PassError> {
    let call = proc
        .stmt(call_id)?
        .as_call()
        .ok_or(PassError::NotACall { id: call_id })?
        .clone();

    if !call.computed {
        return Ok(false);
    }
    let Some(dest) = call.dest else {
        return Ok(false);
    };

    // Peel the destination down to the thing that actually varies:
    // subscripts (only when undefined or implicitly defined), a zero
    // array index, and one more subscript. Shapes like name{0}[0]{0}
    // really occur.
    let mut e = dest;
    if exps.is_subscript(e) {
        if let Some(Some(def)) = exps.def_of(e) {
            if !proc.stmt(def)?.is_implicit() {
                // An already-defined global; don't convert.
                return Ok(false);
            }
        }
        e = exps.arg(e, 0);
    }
    if exps.is_array_index(e) && exps.int_value(exps.arg(e, 1)) == Some(0) {
        e = exps.arg(e, 0);
    }
    if exps.is_subscript(e) {
        e = exps.arg(e, 0);
    }

    let mut call_dest: Option<u64> = None;

    if exps.is_int_const(e) {
        // Just convert it to a direct call.
        call_dest = exps.int_value(e).map(|v| v as u64);
    } else if exps.is_mem_of(e) {
        // m[K]: a global that has not been processed yet.
        let sub = exps.arg(e, 0);
        if let Some(addr) = exps.int_value(sub).filter(|_| exps.is_int_const(sub)) {
            let name = prog.name_global(addr as u64);
            e = exps.global(&name);
        }
    }

    let mut callee_name: Option<String> = None;
    if exps.is_global(e) {
        let name = exps.location_name(e).unwrap_or_default().to_owned();
        if let Some(glo_addr) = prog.global_addr_by_name(&name) {
            // The global's content is the function pointer. A slot in BSS
            // reads as absent and stays unresolved.
            call_dest = image.read_word(glo_addr).map(|w| w as u32 as u64);
        }
        callee_name = Some(name);
    }

    let Some(call_dest) = call_dest else {
        return Ok(false);
    };
    if !prog.in_text_limits(call_dest) {
        // Not a valid proc pointer.
        return Ok(false);
    }

    let known = callee_name
        .as_deref()
        .and_then(|name| prog.function_by_name(name));
    let is_new = known.is_none();
    let callee = known.unwrap_or_else(|| prog.get_or_create_function(call_dest));

    debug!(
        callee = %prog.function(callee).map(|f| f.name.as_str()).unwrap_or("?"),
        new = is_new,
        "converting indirect call to direct call"
    );

    let sig = prog
        .function(callee)
        .map(|f| f.signature.clone())
        .unwrap_or_default();

    let mut promoted = call;
    promoted.callee = Some(callee);
    // The destination may as well become a constant now; that is how it
    // will be treated from here on.
    promoted.dest = Some(exps.int_const_of(call_dest as i64, Ty::ptr(Ty::Func)));
    promoted.args = sig
        .params()
        .iter()
        .map(|p| Assign {
            ty: Ty::Void,
            lhs: p.exp,
            rhs: p.exp,
        })
        .collect();
    promoted.signature = Some(sig);
    promoted.computed = false;

    let block = proc.stmt(call_id)?.block;
    match proc.cfg.block(block)?.kind {
        BlockKind::CompCall => proc.cfg.set_block_kind(block, BlockKind::Call)?,
        other => warn!(?other, "promoted call in a non-computed-call block"),
    }

    proc.add_callee(callee);
    *proc
        .stmt_mut(call_id)?
        .as_call_mut()
        .ok_or(PassError::NotACall { id: call_id })? = promoted;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use unlift_core::{CallStmt, Function, MemImage, Signature, StmtKind};

    fn computed_call_proc(
        exps: &mut ExpArena,
        dest: unlift_core::ExpId,
    ) -> (Procedure, StmtId) {
        let mut proc = Procedure::new("caller");
        let bb = proc.cfg.add_block(BlockKind::CompCall, 0x1000);
        let id = proc
            .append_stmt(bb, StmtKind::Call(Box::new(CallStmt::computed(dest))))
            .unwrap();
        (proc, id)
    }

    #[test]
    fn constant_destination_promotes() {
        let mut exps = ExpArena::new();
        let mut prog = Program::new(0x1000, 0x8000);
        let mut sig = Signature::new();
        let a0 = exps.param("a0");
        sig.push_param("a0", a0, Ty::int(32));
        let target = prog.add_function(Function::library("helper", 0x2000, sig));

        let dest = exps.int_const(0x2000);
        let (mut proc, id) = computed_call_proc(&mut exps, dest);
        let image = MemImage::new();

        assert!(try_convert_to_direct(&mut proc, &mut prog, &mut exps, &image, id).unwrap());

        let call = proc.stmt(id).unwrap().as_call().unwrap();
        assert_eq!(call.callee, Some(target));
        assert!(!call.computed);
        assert_eq!(call.args.len(), 1);
        assert_eq!(call.args[0].lhs, a0);
        assert_eq!(proc.callees, vec![target]);

        let block = proc.stmt(id).unwrap().block;
        assert_eq!(proc.cfg.block(block).unwrap().kind, BlockKind::Call);
    }

    #[test]
    fn memory_slot_promotes_through_global() {
        let mut exps = ExpArena::new();
        let mut prog = Program::new(0x1000, 0x8000);
        // The slot at 0x9000 holds a pointer to code at 0x2000.
        let image = MemImage::new().with_word(0x9000, 0x2000);

        let k = exps.int_const(0x9000);
        let slot = exps.mem(k);
        let (mut proc, id) = computed_call_proc(&mut exps, slot);

        assert!(try_convert_to_direct(&mut proc, &mut prog, &mut exps, &image, id).unwrap());

        let call = proc.stmt(id).unwrap().as_call().unwrap();
        let callee = call.callee.unwrap();
        assert_eq!(prog.function(callee).unwrap().addr, 0x2000);
        assert_eq!(prog.function(callee).unwrap().name, "fn_2000");
        // The global slot got a name along the way.
        assert!(prog.global_addr_by_name("global0").is_some());
    }

    #[test]
    fn out_of_text_destination_stays_computed() {
        let mut exps = ExpArena::new();
        let mut prog = Program::new(0x1000, 0x8000);
        let dest = exps.int_const(0x9999);
        let (mut proc, id) = computed_call_proc(&mut exps, dest);
        let image = MemImage::new();

        assert!(!try_convert_to_direct(&mut proc, &mut prog, &mut exps, &image, id).unwrap());
        let call = proc.stmt(id).unwrap().as_call().unwrap();
        assert!(call.computed);
        assert_eq!(call.callee, None);
    }

    #[test]
    fn defined_subscript_blocks_promotion() {
        let mut exps = ExpArena::new();
        let mut prog = Program::new(0x1000, 0x8000);
        let image = MemImage::new();

        let mut proc = Procedure::new("caller");
        let bb = proc.cfg.add_block(BlockKind::CompCall, 0x1000);

        // s0: r24 := 0x2000 (a real definition, not implicit)
        let r24 = exps.reg(24);
        let k = exps.int_const(0x2000);
        let s0 = proc
            .append_stmt(
                bb,
                StmtKind::Assign(Assign {
                    ty: Ty::int(32),
                    lhs: r24,
                    rhs: k,
                }),
            )
            .unwrap();
        let dest = exps.subscript(r24, Some(s0));
        let id = proc
            .append_stmt(bb, StmtKind::Call(Box::new(CallStmt::computed(dest))))
            .unwrap();

        assert!(!try_convert_to_direct(&mut proc, &mut prog, &mut exps, &image, id).unwrap());
    }

    #[test]
    fn subscripted_zero_index_peels() {
        let mut exps = ExpArena::new();
        let mut prog = Program::new(0x1000, 0x8000);
        let image = MemImage::new();
        prog.add_function(Function::user("target", 0x3000));

        // dest = (0x3000{-}[0]){-}
        let k = exps.int_const(0x3000);
        let k_ref = exps.subscript(k, None);
        let zero = exps.int_const(0);
        let indexed = exps.array_index(k_ref, zero);
        let dest = exps.subscript(indexed, None);

        let (mut proc, id) = computed_call_proc(&mut exps, dest);
        assert!(try_convert_to_direct(&mut proc, &mut prog, &mut exps, &image, id).unwrap());
        let call = proc.stmt(id).unwrap().as_call().unwrap();
        assert_eq!(
            prog.function(call.callee.unwrap()).unwrap().name,
            "target"
        );
    }
}
