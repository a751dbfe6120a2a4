//! Program-level context: the function and global registries, text-segment
//! limits, and the binary-image access trait.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::exp::ExpArena;
use crate::id::{ExpId, FuncId, GlobalId};
use crate::stmt::ImplicitDef;
use crate::ty::Ty;

/// Read-only access to the program image. The dot dump reads Fortran-style
/// switch tables through this, and call promotion reads function-pointer
/// slots; neither ever touches raw memory directly.
pub trait BinaryImage {
    /// Reads a 32-bit word at `addr`.
    fn read_word(&self, addr: u64) -> Option<i32>;
}

/// A sparse word-addressed image, sufficient for jump tables and global
/// function-pointer slots.
#[derive(Debug, Clone, Default)]
pub struct MemImage {
    words: HashMap<u64, i32>,
}

impl MemImage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_word(mut self, addr: u64, value: i32) -> Self {
        self.words.insert(addr, value);
        self
    }

    pub fn set_word(&mut self, addr: u64, value: i32) {
        self.words.insert(addr, value);
    }
}

impl BinaryImage for MemImage {
    fn read_word(&self, addr: u64) -> Option<i32> {
        self.words.get(&addr).copied()
    }
}

/// One signature parameter: conventional name, location expression, type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigParam {
    pub name: String,
    pub exp: ExpId,
    pub ty: Ty,
}

/// A callee signature. `forced` marks signatures pinned by the user or a
/// header file; `has_ellipsis` marks variadic callees awaiting expansion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    params: Vec<SigParam>,
    pub has_ellipsis: bool,
    pub forced: bool,
}

impl Signature {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_params(&self) -> usize {
        self.params.len()
    }

    pub fn params(&self) -> &[SigParam] {
        &self.params
    }

    pub fn param_exp(&self, i: usize) -> Option<ExpId> {
        self.params.get(i).map(|p| p.exp)
    }

    pub fn param_ty(&self, i: usize) -> Option<&Ty> {
        self.params.get(i).map(|p| &p.ty)
    }

    pub fn push_param(&mut self, name: &str, exp: ExpId, ty: Ty) {
        self.params.push(SigParam {
            name: name.to_owned(),
            exp,
            ty,
        });
    }

    /// Appends a parameter with the conventional location `arg<n>` and
    /// returns its expression. Used by ellipsis expansion.
    pub fn add_parameter(&mut self, ty: Ty, exps: &mut ExpArena) -> ExpId {
        let name = format!("arg{}", self.params.len());
        let exp = exps.param(&name);
        self.push_param(&name, exp, ty);
        exp
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionKind {
    /// Known library function with a trusted signature.
    Library,
    /// User procedure recovered from the binary.
    User,
}

/// An entry in the program's function registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub addr: u64,
    pub kind: FunctionKind,
    pub signature: Signature,
    /// Decompiled parameter locations (for user procedures whose callers
    /// reconcile against them).
    pub params: Vec<ImplicitDef>,
    /// Still inside its own recursion group; callers treat calls to it as
    /// childless.
    pub early_recursive: bool,
}

impl Function {
    pub fn library(name: &str, addr: u64, signature: Signature) -> Self {
        Function {
            name: name.to_owned(),
            addr,
            kind: FunctionKind::Library,
            signature,
            params: Vec::new(),
            early_recursive: false,
        }
    }

    pub fn user(name: &str, addr: u64) -> Self {
        Function {
            name: name.to_owned(),
            addr,
            kind: FunctionKind::User,
            signature: Signature::new(),
            params: Vec::new(),
            early_recursive: false,
        }
    }

    pub fn is_library(&self) -> bool {
        self.kind == FunctionKind::Library
    }
}

/// A named global variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Global {
    pub name: String,
    pub addr: u64,
}

/// The program context shared by all procedures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    functions: Vec<Function>,
    globals: Vec<Global>,
    text_low: u64,
    text_high: u64,
}

impl Program {
    pub fn new(text_low: u64, text_high: u64) -> Self {
        Program {
            functions: Vec::new(),
            globals: Vec::new(),
            text_low,
            text_high,
        }
    }

    pub fn add_function(&mut self, func: Function) -> FuncId {
        let id = FuncId(self.functions.len() as u32);
        self.functions.push(func);
        id
    }

    pub fn function(&self, id: FuncId) -> Option<&Function> {
        self.functions.get(id.0 as usize)
    }

    pub fn function_mut(&mut self, id: FuncId) -> Option<&mut Function> {
        self.functions.get_mut(id.0 as usize)
    }

    pub fn function_by_addr(&self, addr: u64) -> Option<FuncId> {
        self.functions
            .iter()
            .position(|f| f.addr == addr)
            .map(|i| FuncId(i as u32))
    }

    pub fn function_by_name(&self, name: &str) -> Option<FuncId> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(|i| FuncId(i as u32))
    }

    /// Looks up the function at `addr`, creating a fresh user procedure
    /// entry when none exists yet.
    pub fn get_or_create_function(&mut self, addr: u64) -> FuncId {
        if let Some(id) = self.function_by_addr(addr) {
            return id;
        }
        let name = format!("fn_{:x}", addr);
        self.add_function(Function::user(&name, addr))
    }

    /// True when `addr` lies within the program's text segment.
    pub fn in_text_limits(&self, addr: u64) -> bool {
        addr >= self.text_low && addr < self.text_high
    }

    pub fn global(&self, id: GlobalId) -> Option<&Global> {
        self.globals.get(id.0 as usize)
    }

    pub fn global_by_addr(&self, addr: u64) -> Option<GlobalId> {
        self.globals
            .iter()
            .position(|g| g.addr == addr)
            .map(|i| GlobalId(i as u32))
    }

    pub fn global_addr_by_name(&self, name: &str) -> Option<u64> {
        self.globals.iter().find(|g| g.name == name).map(|g| g.addr)
    }

    /// Marks the global at `addr` as used and returns its name, inventing
    /// `global<n>` when it was not known before.
    pub fn name_global(&mut self, addr: u64) -> String {
        if let Some(id) = self.global_by_addr(addr) {
            return self.globals[id.0 as usize].name.clone();
        }
        let name = format!("global{}", self.globals.len());
        self.globals.push(Global {
            name: name.clone(),
            addr,
        });
        name
    }

    pub fn add_global(&mut self, name: &str, addr: u64) -> GlobalId {
        let id = GlobalId(self.globals.len() as u32);
        self.globals.push(Global {
            name: name.to_owned(),
            addr,
        });
        id
    }
}
