//! Interned expression arena.
//!
//! Expressions are tagged trees stored in a single arena and interned by
//! `(operator, children, payload, type)`. Interning makes [`ExpId`]
//! equality structural equality and gives expressions a total order for
//! free. Nodes are immutable once created; "mutation" rebuilds the
//! affected spine and re-interns.
//!
//! Constant folding and light canonicalization live here ([`ExpArena::simplify`])
//! and are treated as a black box by the structuring layer.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::id::{ExpId, FuncId, StmtId};
use crate::oper::Oper;
use crate::ty::Ty;

/// Payload attached to an expression node.
///
/// Floats are stored as raw bits so the node stays `Eq + Hash`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExpValue {
    None,
    Int(i64),
    Float(u64),
    Str(String),
    Func(FuncId),
    /// Defining statement of an SSA subscript; `None` is the implicit
    /// initial definition (printed `{-}`).
    Def(Option<StmtId>),
}

/// One interned expression node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExpNode {
    pub oper: Oper,
    pub args: SmallVec<[ExpId; 3]>,
    pub value: ExpValue,
    /// Constants and typed expressions carry a type.
    pub ty: Option<Ty>,
}

/// The interned expression arena.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<ExpNode>", into = "Vec<ExpNode>")]
pub struct ExpArena {
    nodes: Vec<ExpNode>,
    index: HashMap<ExpNode, ExpId>,
}

impl From<Vec<ExpNode>> for ExpArena {
    fn from(nodes: Vec<ExpNode>) -> Self {
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), ExpId(i as u32)))
            .collect();
        ExpArena { nodes, index }
    }
}

impl From<ExpArena> for Vec<ExpNode> {
    fn from(arena: ExpArena) -> Self {
        arena.nodes
    }
}

impl ExpArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn intern(&mut self, node: ExpNode) -> ExpId {
        debug_assert_eq!(node.oper.arity(), node.args.len(), "{:?}", node.oper);
        if let Some(&id) = self.index.get(&node) {
            return id;
        }
        let id = ExpId(self.nodes.len() as u32);
        self.nodes.push(node.clone());
        self.index.insert(node, id);
        id
    }

    fn node(&self, id: ExpId) -> &ExpNode {
        &self.nodes[id.0 as usize]
    }

    // -- Constructors -------------------------------------------------------

    /// Zero-arity operator with no payload (terminals, wildcards).
    pub fn terminal(&mut self, oper: Oper) -> ExpId {
        self.intern(ExpNode {
            oper,
            args: SmallVec::new(),
            value: ExpValue::None,
            ty: None,
        })
    }

    pub fn unary(&mut self, oper: Oper, a: ExpId) -> ExpId {
        self.intern(ExpNode {
            oper,
            args: SmallVec::from_slice(&[a]),
            value: ExpValue::None,
            ty: None,
        })
    }

    pub fn binary(&mut self, oper: Oper, a: ExpId, b: ExpId) -> ExpId {
        self.intern(ExpNode {
            oper,
            args: SmallVec::from_slice(&[a, b]),
            value: ExpValue::None,
            ty: None,
        })
    }

    pub fn ternary(&mut self, oper: Oper, a: ExpId, b: ExpId, c: ExpId) -> ExpId {
        self.intern(ExpNode {
            oper,
            args: SmallVec::from_slice(&[a, b, c]),
            value: ExpValue::None,
            ty: None,
        })
    }

    /// 32-bit signed integer constant.
    pub fn int_const(&mut self, v: i64) -> ExpId {
        self.int_const_of(v, Ty::int(32))
    }

    pub fn int_const_of(&mut self, v: i64, ty: Ty) -> ExpId {
        self.intern(ExpNode {
            oper: Oper::IntConst,
            args: SmallVec::new(),
            value: ExpValue::Int(v),
            ty: Some(ty),
        })
    }

    /// 64-bit integer constant.
    pub fn long_const(&mut self, v: i64) -> ExpId {
        self.intern(ExpNode {
            oper: Oper::LongConst,
            args: SmallVec::new(),
            value: ExpValue::Int(v),
            ty: Some(Ty::int(64)),
        })
    }

    pub fn flt_const(&mut self, v: f64) -> ExpId {
        self.intern(ExpNode {
            oper: Oper::FltConst,
            args: SmallVec::new(),
            value: ExpValue::Float(v.to_bits()),
            ty: Some(Ty::float(64)),
        })
    }

    pub fn str_const(&mut self, s: &str) -> ExpId {
        self.intern(ExpNode {
            oper: Oper::StrConst,
            args: SmallVec::new(),
            value: ExpValue::Str(s.to_owned()),
            ty: Some(Ty::ptr(Ty::array(Ty::Char))),
        })
    }

    pub fn func_const(&mut self, func: FuncId) -> ExpId {
        self.intern(ExpNode {
            oper: Oper::FuncConst,
            args: SmallVec::new(),
            value: ExpValue::Func(func),
            ty: Some(Ty::ptr(Ty::Func)),
        })
    }

    /// `r{n}`.
    pub fn reg(&mut self, n: i64) -> ExpId {
        let k = self.int_const(n);
        self.unary(Oper::RegOf, k)
    }

    /// `m[addr]`.
    pub fn mem(&mut self, addr: ExpId) -> ExpId {
        self.unary(Oper::MemOf, addr)
    }

    pub fn addr_of(&mut self, e: ExpId) -> ExpId {
        self.unary(Oper::AddrOf, e)
    }

    pub fn array_index(&mut self, base: ExpId, index: ExpId) -> ExpId {
        self.binary(Oper::ArrayIndex, base, index)
    }

    fn named(&mut self, oper: Oper, name: &str) -> ExpId {
        let n = self.str_const(name);
        self.unary(oper, n)
    }

    pub fn global(&mut self, name: &str) -> ExpId {
        self.named(Oper::Global, name)
    }

    pub fn local(&mut self, name: &str) -> ExpId {
        self.named(Oper::Local, name)
    }

    pub fn param(&mut self, name: &str) -> ExpId {
        self.named(Oper::Param, name)
    }

    pub fn temp(&mut self, name: &str) -> ExpId {
        self.named(Oper::Temp, name)
    }

    /// `base{def}` SSA reference. `def = None` is the implicit initial
    /// definition.
    pub fn subscript(&mut self, base: ExpId, def: Option<StmtId>) -> ExpId {
        self.intern(ExpNode {
            oper: Oper::Subscript,
            args: SmallVec::from_slice(&[base]),
            value: ExpValue::Def(def),
            ty: None,
        })
    }

    /// `*ty* e`.
    pub fn typed(&mut self, ty: Ty, e: ExpId) -> ExpId {
        self.intern(ExpNode {
            oper: Oper::TypedExp,
            args: SmallVec::from_slice(&[e]),
            value: ExpValue::None,
            ty: Some(ty),
        })
    }

    pub fn nil(&mut self) -> ExpId {
        self.terminal(Oper::Nil)
    }

    /// Cons-list of expressions, `Nil`-terminated.
    pub fn list(&mut self, items: &[ExpId]) -> ExpId {
        let mut tail = self.nil();
        for &item in items.iter().rev() {
            tail = self.binary(Oper::List, item, tail);
        }
        tail
    }

    // -- Accessors ----------------------------------------------------------

    pub fn oper(&self, id: ExpId) -> Oper {
        self.node(id).oper
    }

    pub fn args(&self, id: ExpId) -> &[ExpId] {
        &self.node(id).args
    }

    pub fn arg(&self, id: ExpId, i: usize) -> ExpId {
        self.node(id).args[i]
    }

    pub fn value(&self, id: ExpId) -> &ExpValue {
        &self.node(id).value
    }

    pub fn const_ty(&self, id: ExpId) -> Option<&Ty> {
        self.node(id).ty.as_ref()
    }

    pub fn int_value(&self, id: ExpId) -> Option<i64> {
        match self.node(id).value {
            ExpValue::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn flt_value(&self, id: ExpId) -> Option<f64> {
        match self.node(id).value {
            ExpValue::Float(bits) => Some(f64::from_bits(bits)),
            _ => None,
        }
    }

    pub fn str_value(&self, id: ExpId) -> Option<&str> {
        match &self.node(id).value {
            ExpValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn func_value(&self, id: ExpId) -> Option<FuncId> {
        match self.node(id).value {
            ExpValue::Func(fid) => Some(fid),
            _ => None,
        }
    }

    /// The defining statement of a subscript: `Some(def)` for `e{def}`,
    /// `None` when `id` is not a subscript.
    pub fn def_of(&self, id: ExpId) -> Option<Option<StmtId>> {
        if self.oper(id) != Oper::Subscript {
            return None;
        }
        match self.node(id).value {
            ExpValue::Def(d) => Some(d),
            _ => None,
        }
    }

    /// Name payload of a `Global`/`Local`/`Param`/`Temp` location.
    pub fn location_name(&self, id: ExpId) -> Option<&str> {
        match self.oper(id) {
            Oper::Global | Oper::Local | Oper::Param | Oper::Temp => {
                self.str_value(self.arg(id, 0))
            }
            _ => None,
        }
    }

    // -- Predicates ---------------------------------------------------------

    pub fn is_int_const(&self, id: ExpId) -> bool {
        matches!(self.oper(id), Oper::IntConst | Oper::LongConst)
    }

    pub fn is_str_const(&self, id: ExpId) -> bool {
        self.oper(id) == Oper::StrConst
    }

    pub fn is_flt_const(&self, id: ExpId) -> bool {
        self.oper(id) == Oper::FltConst
    }

    pub fn is_const(&self, id: ExpId) -> bool {
        self.oper(id).is_const()
    }

    pub fn is_subscript(&self, id: ExpId) -> bool {
        self.oper(id) == Oper::Subscript
    }

    pub fn is_mem_of(&self, id: ExpId) -> bool {
        self.oper(id) == Oper::MemOf
    }

    pub fn is_addr_of(&self, id: ExpId) -> bool {
        self.oper(id) == Oper::AddrOf
    }

    pub fn is_array_index(&self, id: ExpId) -> bool {
        self.oper(id) == Oper::ArrayIndex
    }

    pub fn is_reg_of(&self, id: ExpId) -> bool {
        self.oper(id) == Oper::RegOf
    }

    pub fn is_global(&self, id: ExpId) -> bool {
        self.oper(id) == Oper::Global
    }

    pub fn is_local(&self, id: ExpId) -> bool {
        self.oper(id) == Oper::Local
    }

    pub fn is_param(&self, id: ExpId) -> bool {
        self.oper(id) == Oper::Param
    }

    pub fn is_pc(&self, id: ExpId) -> bool {
        self.oper(id) == Oper::Pc
    }

    pub fn is_flags(&self, id: ExpId) -> bool {
        matches!(self.oper(id), Oper::Flags | Oper::FFlags)
    }

    pub fn is_location(&self, id: ExpId) -> bool {
        self.oper(id).is_location()
    }

    // -- Structural services ------------------------------------------------

    /// True if `needle` occurs anywhere within `haystack`.
    pub fn contains(&self, haystack: ExpId, needle: ExpId) -> bool {
        if haystack == needle {
            return true;
        }
        self.args(haystack)
            .iter()
            .any(|&a| self.contains(a, needle))
    }

    /// Replaces every occurrence of `pattern` inside `target` with
    /// `replacement`. Returns the rebuilt expression and whether anything
    /// changed.
    pub fn replace(&mut self, target: ExpId, pattern: ExpId, replacement: ExpId) -> (ExpId, bool) {
        if target == pattern {
            return (replacement, true);
        }
        let node = self.node(target).clone();
        if node.args.is_empty() {
            return (target, false);
        }
        let mut changed = false;
        let mut args = node.args.clone();
        for slot in args.iter_mut() {
            let (new, ch) = self.replace(*slot, pattern, replacement);
            *slot = new;
            changed |= ch;
        }
        if !changed {
            return (target, false);
        }
        let id = self.intern(ExpNode { args, ..node });
        (id, true)
    }

    /// Removes every SSA subscript within `e`. The second return is true
    /// when all removed subscripts referenced the implicit initial
    /// definition.
    pub fn strip_subscripts(&mut self, e: ExpId) -> (ExpId, bool) {
        let node = self.node(e).clone();
        if node.oper == Oper::Subscript {
            let implicit = matches!(node.value, ExpValue::Def(None));
            let (base, inner_implicit) = self.strip_subscripts(node.args[0]);
            return (base, implicit && inner_implicit);
        }
        if node.args.is_empty() {
            return (e, true);
        }
        let mut all_implicit = true;
        let mut changed = false;
        let mut args = node.args.clone();
        for slot in args.iter_mut() {
            let (new, implicit) = self.strip_subscripts(*slot);
            changed |= new != *slot;
            all_implicit &= implicit;
            *slot = new;
        }
        if !changed {
            return (e, all_implicit);
        }
        (self.intern(ExpNode { args, ..node }), all_implicit)
    }

    /// Constant folding and light canonicalization.
    pub fn simplify(&mut self, e: ExpId) -> ExpId {
        let node = self.node(e).clone();
        if node.args.is_empty() {
            return e;
        }

        let mut args = node.args.clone();
        for slot in args.iter_mut() {
            *slot = self.simplify(*slot);
        }
        let rebuilt = if args == node.args {
            e
        } else {
            self.intern(ExpNode {
                args: args.clone(),
                ..node.clone()
            })
        };

        match node.oper {
            Oper::Neg => {
                if let Some(v) = self.int_value(args[0]).filter(|_| self.is_int_const(args[0])) {
                    return self.int_const(v.wrapping_neg());
                }
                // --x => x
                if self.oper(args[0]) == Oper::Neg {
                    return self.arg(args[0], 0);
                }
                rebuilt
            }
            Oper::BitNot => {
                if let Some(v) = self.int_value(args[0]).filter(|_| self.is_int_const(args[0])) {
                    return self.int_const(!v);
                }
                rebuilt
            }
            Oper::LogNot => match self.oper(args[0]) {
                Oper::True => self.terminal(Oper::False),
                Oper::False => self.terminal(Oper::True),
                _ => rebuilt,
            },
            oper if oper.arity() == 2 => self.fold_binary(oper, args[0], args[1], rebuilt),
            _ => rebuilt,
        }
    }

    fn fold_binary(&mut self, oper: Oper, a: ExpId, b: ExpId, orig: ExpId) -> ExpId {
        let ca = self.is_int_const(a).then(|| self.int_value(a)).flatten();
        let cb = self.is_int_const(b).then(|| self.int_value(b)).flatten();

        if let (Some(x), Some(y)) = (ca, cb) {
            let folded = match oper {
                Oper::Plus => Some(x.wrapping_add(y)),
                Oper::Minus => Some(x.wrapping_sub(y)),
                Oper::Mult | Oper::MultS => Some(x.wrapping_mul(y)),
                Oper::DivS if y != 0 => Some(x.wrapping_div(y)),
                Oper::Div if y != 0 => Some(((x as u64) / (y as u64)) as i64),
                Oper::ModS if y != 0 => Some(x.wrapping_rem(y)),
                Oper::Mod if y != 0 => Some(((x as u64) % (y as u64)) as i64),
                Oper::BitAnd => Some(x & y),
                Oper::BitOr => Some(x | y),
                Oper::BitXor => Some(x ^ y),
                Oper::Shl if (0..64).contains(&y) => Some(x.wrapping_shl(y as u32)),
                Oper::Shr if (0..64).contains(&y) => Some(((x as u64) >> y) as i64),
                Oper::Sar if (0..64).contains(&y) => Some(x >> y),
                _ => None,
            };
            if let Some(v) = folded {
                return self.int_const(v);
            }
            let cmp = match oper {
                Oper::Equals => Some(x == y),
                Oper::NotEqual => Some(x != y),
                Oper::Less => Some(x < y),
                Oper::Greater => Some(x > y),
                Oper::LessEq => Some(x <= y),
                Oper::GreaterEq => Some(x >= y),
                Oper::LessUns => Some((x as u64) < (y as u64)),
                Oper::GreaterUns => Some((x as u64) > (y as u64)),
                Oper::LessEqUns => Some((x as u64) <= (y as u64)),
                Oper::GreaterEqUns => Some((x as u64) >= (y as u64)),
                _ => None,
            };
            if let Some(t) = cmp {
                return self.terminal(if t { Oper::True } else { Oper::False });
            }
        }

        // Identity elements.
        match oper {
            Oper::Plus if cb == Some(0) => a,
            Oper::Plus if ca == Some(0) => b,
            Oper::Minus if cb == Some(0) => a,
            Oper::Mult | Oper::MultS if cb == Some(1) => a,
            Oper::Mult | Oper::MultS if ca == Some(1) => b,
            Oper::Mult | Oper::MultS if cb == Some(0) || ca == Some(0) => self.int_const(0),
            Oper::BitOr if cb == Some(0) => a,
            Oper::BitOr if ca == Some(0) => b,
            Oper::BitAnd if cb == Some(0) || ca == Some(0) => self.int_const(0),
            _ => orig,
        }
    }

    /// Renders `id` for diagnostics and the dot dump.
    pub fn display(&self, id: ExpId) -> ExpDisplay<'_> {
        ExpDisplay {
            arena: self,
            id,
            nested: false,
        }
    }
}

/// Compact expression rendering (`r24`, `m[r28 + 4]`, `r24{5}`, ...).
pub struct ExpDisplay<'a> {
    arena: &'a ExpArena,
    id: ExpId,
    nested: bool,
}

impl<'a> ExpDisplay<'a> {
    fn child(&self, id: ExpId) -> ExpDisplay<'a> {
        ExpDisplay {
            arena: self.arena,
            id,
            nested: true,
        }
    }

    fn child_flat(&self, id: ExpId) -> ExpDisplay<'a> {
        ExpDisplay {
            arena: self.arena,
            id,
            nested: false,
        }
    }
}

impl fmt::Display for ExpDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = self.arena;
        let id = self.id;
        let oper = a.oper(id);

        if let Some(sym) = oper.symbol() {
            let lhs = self.child(a.arg(id, 0));
            let rhs = self.child(a.arg(id, 1));
            if self.nested {
                return write!(f, "({} {} {})", lhs, sym, rhs);
            }
            return write!(f, "{} {} {}", lhs, sym, rhs);
        }

        match oper {
            Oper::IntConst | Oper::LongConst => write!(f, "{}", a.int_value(id).unwrap_or(0)),
            Oper::FltConst => write!(f, "{}", a.flt_value(id).unwrap_or(0.0)),
            Oper::StrConst => write!(f, "\"{}\"", a.str_value(id).unwrap_or("")),
            Oper::FuncConst => match a.func_value(id) {
                Some(fid) => write!(f, "fn#{}", fid.0),
                None => write!(f, "fn#?"),
            },
            Oper::Neg => write!(f, "-{}", self.child(a.arg(id, 0))),
            Oper::LogNot => write!(f, "!{}", self.child(a.arg(id, 0))),
            Oper::BitNot => write!(f, "~{}", self.child(a.arg(id, 0))),
            Oper::RegOf => {
                let k = a.arg(id, 0);
                if a.is_int_const(k) {
                    write!(f, "r{}", a.int_value(k).unwrap_or(0))
                } else {
                    write!(f, "r[{}]", self.child_flat(k))
                }
            }
            Oper::MemOf => write!(f, "m[{}]", self.child_flat(a.arg(id, 0))),
            Oper::AddrOf => write!(f, "a[{}]", self.child_flat(a.arg(id, 0))),
            Oper::ArrayIndex => write!(
                f,
                "{}[{}]",
                self.child(a.arg(id, 0)),
                self.child_flat(a.arg(id, 1))
            ),
            Oper::MemberAccess => write!(
                f,
                "{}.{}",
                self.child(a.arg(id, 0)),
                self.child(a.arg(id, 1))
            ),
            Oper::Global | Oper::Local | Oper::Param | Oper::Temp => {
                write!(f, "{}", a.location_name(id).unwrap_or("?"))
            }
            Oper::Subscript => {
                write!(f, "{}", self.child(a.arg(id, 0)))?;
                match a.def_of(id).flatten() {
                    Some(def) => write!(f, "{{{}}}", def.0),
                    None => write!(f, "{{-}}"),
                }
            }
            Oper::TypedExp => {
                let ty = a.const_ty(id).cloned().unwrap_or(Ty::Void);
                write!(f, "*{}* {}", ty, self.child(a.arg(id, 0)))
            }
            Oper::Pc => write!(f, "%pc"),
            Oper::Flags => write!(f, "%flags"),
            Oper::FFlags => write!(f, "%fflags"),
            Oper::ZF => write!(f, "%ZF"),
            Oper::CF => write!(f, "%CF"),
            Oper::NF => write!(f, "%NF"),
            Oper::OF => write!(f, "%OF"),
            Oper::Nil => Ok(()),
            Oper::True => write!(f, "true"),
            Oper::False => write!(f, "false"),
            Oper::DefineAll => write!(f, "<all>"),
            Oper::Wild => write!(f, "WILD"),
            Oper::WildIntConst => write!(f, "WILDINT"),
            Oper::WildStrConst => write!(f, "WILDSTR"),
            Oper::WildMemOf => write!(f, "WILDMEM"),
            Oper::WildRegOf => write!(f, "WILDREG"),
            Oper::List => {
                // Walk the cons spine.
                let mut cur = id;
                let mut first = true;
                while a.oper(cur) == Oper::List {
                    if !first {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", self.child_flat(a.arg(cur, 0)))?;
                    first = false;
                    cur = a.arg(cur, 1);
                }
                Ok(())
            }
            Oper::FlagCall => write!(
                f,
                "{}({})",
                a.str_value(a.arg(id, 0)).unwrap_or("?"),
                self.child_flat(a.arg(id, 1))
            ),
            Oper::SizeCast => write!(
                f,
                "size({}, {})",
                self.child_flat(a.arg(id, 0)),
                self.child_flat(a.arg(id, 1))
            ),
            Oper::SgnEx => write!(
                f,
                "sgnex({}, {})",
                self.child_flat(a.arg(id, 0)),
                self.child_flat(a.arg(id, 1))
            ),
            Oper::ZfillEx => write!(
                f,
                "zfill({}, {})",
                self.child_flat(a.arg(id, 0)),
                self.child_flat(a.arg(id, 1))
            ),
            Oper::Truncate => write!(
                f,
                "trunc({}, {})",
                self.child_flat(a.arg(id, 0)),
                self.child_flat(a.arg(id, 1))
            ),
            Oper::FSize => write!(
                f,
                "fsize({}, {})",
                self.child_flat(a.arg(id, 0)),
                self.child_flat(a.arg(id, 1))
            ),
            Oper::ItoF => write!(
                f,
                "itof({}, {})",
                self.child_flat(a.arg(id, 0)),
                self.child_flat(a.arg(id, 1))
            ),
            Oper::FtoI => write!(
                f,
                "ftoi({}, {})",
                self.child_flat(a.arg(id, 0)),
                self.child_flat(a.arg(id, 1))
            ),
            Oper::FRound => write!(
                f,
                "fround({}, {})",
                self.child_flat(a.arg(id, 0)),
                self.child_flat(a.arg(id, 1))
            ),
            Oper::Sqrt => write!(f, "sqrt({})", self.child_flat(a.arg(id, 0))),
            Oper::At => write!(
                f,
                "{}@[{}:{}]",
                self.child(a.arg(id, 0)),
                self.child_flat(a.arg(id, 1)),
                self.child_flat(a.arg(id, 2))
            ),
            // Binary operators with symbols are handled above.
            _ => write!(f, "<{:?}>", oper),
        }
    }
}
