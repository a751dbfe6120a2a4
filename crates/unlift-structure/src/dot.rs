//! Graphviz rendering of the statement CFG.
//!
//! Two-way nodes color their THEN edge green and their ELSE edge red;
//! case arms are labeled with their switch key -- computed as
//! `lower_bound + arm_index`, or read out of the jump table through the
//! [`BinaryImage`] interface for Fortran-style switches.

use std::fmt::Write;

use unlift_core::{BinaryImage, ExpArena, Procedure, Program, SwitchStyle};

use crate::forest::StmtForest;

/// Renders the statement CFG of `proc` as a Graphviz `digraph`.
pub fn write_stmt_cfg_dot(
    proc: &Procedure,
    forest: &StmtForest,
    exps: &ExpArena,
    prog: Option<&Program>,
    image: Option<&dyn BinaryImage>,
) -> String {
    let mut out = String::new();
    out.push_str("digraph StmtCFG {\n\n");

    for node in forest.node_ids() {
        let Ok(stmt) = proc.stmt(forest.stmt_of(node)) else {
            continue;
        };
        let label = escape(&stmt.display(exps, prog).to_string());
        let _ = writeln!(out, "stmt{}[label=\"{}\"];", stmt.number, label);
    }

    out.push('\n');

    for node in forest.node_ids() {
        let Ok(stmt) = proc.stmt(forest.stmt_of(node)) else {
            continue;
        };
        let number = stmt.number;

        if stmt.is_branch() && forest.num_succs(node) == 2 {
            let then_num = succ_number(proc, forest, node, 0);
            let else_num = succ_number(proc, forest, node, 1);
            let _ = writeln!(out, "stmt{} -> stmt{}[color=green];", number, then_num);
            let _ = writeln!(out, "stmt{} -> stmt{}[color=red];", number, else_num);
        } else if stmt.is_case() {
            let info = stmt.switch_info();
            for i in 0..forest.num_succs(node) {
                let succ_num = succ_number(proc, forest, node, i);
                let _ = write!(out, "stmt{} -> stmt{}[label=\"", number, succ_num);
                match info {
                    Some(si) if si.style == SwitchStyle::F => {
                        // Fortran style: the key is the table value itself.
                        let slot = si.table_addr + 4 * i as u64;
                        match image.and_then(|img| img.read_word(slot)) {
                            Some(key) => {
                                let _ = write!(out, "{}", key);
                            }
                            None => out.push('?'),
                        }
                    }
                    Some(si) => {
                        let _ = write!(out, "{}", si.lower_bound + i as i64);
                    }
                    None => out.push('?'),
                }
                out.push_str("\"]\n");
            }
        } else {
            for i in 0..forest.num_succs(node) {
                let succ_num = succ_number(proc, forest, node, i);
                let _ = writeln!(out, "stmt{} -> stmt{};", number, succ_num);
            }
        }
    }

    out.push('}');
    out
}

fn succ_number(
    proc: &Procedure,
    forest: &StmtForest,
    node: crate::forest::StmtNodeId,
    i: usize,
) -> i32 {
    proc.stmt(forest.stmt_of(forest.succ(node, i)))
        .map(|s| s.number)
        .unwrap_or(-1)
}

fn escape(label: &str) -> String {
    label.replace('\n', " ").replace('"', "'")
}
