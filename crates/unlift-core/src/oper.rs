//! The closed operator vocabulary for register-transfer expressions.
//!
//! Operators are grouped the way the lifted semantics use them: arithmetic,
//! logical, comparison, bitwise, location accessors, SSA plumbing,
//! constants, machine terminals, wildcards, and a handful of
//! representational operators (lists, flag calls, size/sign conversions).
//!
//! Arity is implied by the operator (see [`Oper::arity`]) and enforced by
//! the expression arena at construction time.

use serde::{Deserialize, Serialize};

/// Expression operator discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Oper {
    // -- Arithmetic --
    Plus,
    Minus,
    /// Unsigned multiply.
    Mult,
    /// Signed multiply.
    MultS,
    /// Unsigned divide.
    Div,
    /// Signed divide.
    DivS,
    /// Unsigned remainder.
    Mod,
    /// Signed remainder.
    ModS,
    Neg,

    // -- Logical --
    LogAnd,
    LogOr,
    LogNot,

    // -- Comparison (signed then unsigned orderings) --
    Equals,
    NotEqual,
    Less,
    Greater,
    LessEq,
    GreaterEq,
    LessUns,
    GreaterUns,
    LessEqUns,
    GreaterEqUns,

    // -- Bitwise --
    BitAnd,
    BitOr,
    BitXor,
    BitNot,
    Shl,
    Shr,
    Sar,

    // -- Location accessors --
    /// `r[K]`: register K.
    RegOf,
    /// `m[e]`: memory at address e.
    MemOf,
    /// `a[e]`: address of e.
    AddrOf,
    /// `e1[e2]`: array indexing.
    ArrayIndex,
    /// `e1.e2`: member access.
    MemberAccess,
    /// Named global variable (child is a string constant).
    Global,
    /// Named local variable (child is a string constant).
    Local,
    /// Named parameter (child is a string constant).
    Param,
    /// Named temporary (child is a string constant).
    Temp,

    // -- SSA and typing --
    /// `e{def}`: SSA reference to the defining statement (payload; absent
    /// payload means the implicit initial definition).
    Subscript,
    /// `*ty* e`: expression with an explicit type annotation.
    TypedExp,

    // -- Constants (payload-carrying, type-carrying) --
    IntConst,
    LongConst,
    FltConst,
    StrConst,
    /// Function-pointer constant (payload is the function id).
    FuncConst,

    // -- Terminals --
    Pc,
    Flags,
    FFlags,
    ZF,
    CF,
    NF,
    OF,
    Nil,
    True,
    False,
    /// The "defines everything" terminal used by childless calls.
    DefineAll,

    // -- Wildcards --
    Wild,
    WildIntConst,
    WildStrConst,
    WildMemOf,
    WildRegOf,

    // -- Representational --
    /// Cons cell of an expression list (`Nil`-terminated).
    List,
    /// Call to a flag function: name constant and an argument list.
    FlagCall,
    /// Reinterpret at a given bit size: `(size-const, e)`.
    SizeCast,
    /// Sign-extend to a bit size.
    SgnEx,
    /// Zero-extend to a bit size.
    ZfillEx,
    /// Truncate to a bit size.
    Truncate,
    /// Change float size.
    FSize,
    /// Integer to float at a bit size.
    ItoF,
    /// Float to integer at a bit size.
    FtoI,
    /// Round to nearest at a bit size.
    FRound,
    /// Square root.
    Sqrt,
    /// `e1@[e2:e3]`: bit-range extraction.
    At,
}

impl Oper {
    /// Number of child expressions this operator takes.
    pub fn arity(self) -> usize {
        use Oper::*;
        match self {
            IntConst | LongConst | FltConst | StrConst | FuncConst | Pc | Flags | FFlags | ZF
            | CF | NF | OF | Nil | True | False | DefineAll | Wild | WildIntConst
            | WildStrConst | WildMemOf | WildRegOf => 0,

            Neg | LogNot | BitNot | RegOf | MemOf | AddrOf | Global | Local | Param | Temp
            | Subscript | TypedExp | Sqrt => 1,

            Plus | Minus | Mult | MultS | Div | DivS | Mod | ModS | LogAnd | LogOr | Equals
            | NotEqual | Less | Greater | LessEq | GreaterEq | LessUns | GreaterUns
            | LessEqUns | GreaterEqUns | BitAnd | BitOr | BitXor | Shl | Shr | Sar
            | ArrayIndex | MemberAccess | List | FlagCall | SizeCast | SgnEx | ZfillEx
            | Truncate | FSize | ItoF | FtoI | FRound => 2,

            At => 3,
        }
    }

    /// True for any of the comparison operators.
    pub fn is_comparison(self) -> bool {
        use Oper::*;
        matches!(
            self,
            Equals
                | NotEqual
                | Less
                | Greater
                | LessEq
                | GreaterEq
                | LessUns
                | GreaterUns
                | LessEqUns
                | GreaterEqUns
        )
    }

    /// True for any constant operator.
    pub fn is_const(self) -> bool {
        use Oper::*;
        matches!(self, IntConst | LongConst | FltConst | StrConst | FuncConst)
    }

    /// True for the terminal (zero-arity, non-constant, non-wildcard)
    /// operators.
    pub fn is_terminal(self) -> bool {
        use Oper::*;
        matches!(
            self,
            Pc | Flags | FFlags | ZF | CF | NF | OF | Nil | True | False | DefineAll
        )
    }

    /// True for one of the four main machine flags.
    pub fn is_main_flag(self) -> bool {
        use Oper::*;
        matches!(self, ZF | CF | NF | OF)
    }

    /// True for the location-forming operators an assignment may define.
    pub fn is_location(self) -> bool {
        use Oper::*;
        matches!(self, RegOf | MemOf | Global | Local | Param | Temp)
    }

    /// Infix rendering for binary operators, where one exists.
    pub(crate) fn symbol(self) -> Option<&'static str> {
        use Oper::*;
        Some(match self {
            Plus => "+",
            Minus => "-",
            Mult => "*",
            MultS => "*!",
            Div => "/",
            DivS => "/!",
            Mod => "%",
            ModS => "%!",
            LogAnd => "and",
            LogOr => "or",
            Equals => "=",
            NotEqual => "~=",
            Less => "<",
            Greater => ">",
            LessEq => "<=",
            GreaterEq => ">=",
            LessUns => "<u",
            GreaterUns => ">u",
            LessEqUns => "<=u",
            GreaterEqUns => ">=u",
            BitAnd => "&",
            BitOr => "|",
            BitXor => "^",
            Shl => "<<",
            Shr => ">>",
            Sar => ">>A",
            _ => return None,
        })
    }
}
