//! AST node repertoire consumed by the bytecode compiler.
//!
//! The compiler does not parse source text. A front end hands it a tree
//! built from these types together with a symbol table per lexical scope;
//! scope-defining nodes ([`Module`], [`FunctionDef`]) carry the
//! [`ScopeId`] of their table. Variable references and assignment targets
//! carry an explicit context tag instead of being distinguished by position
//! in the tree.

use crate::symtable::ScopeId;

/// A whole source file: the root scope and its statements.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Module {
    pub body: Vec<Stmt>,
    pub scope: ScopeId,
}

/// A statement.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Stmt {
    FunctionDef(FunctionDef),
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
        /// Runs only when the test falsifies normally, not on `break`.
        orelse: Vec<Stmt>,
    },
    For {
        /// Store-context target bound on each iteration.
        target: Expr,
        iter: Expr,
        body: Vec<Stmt>,
        /// Suite emitted at the loop exit.
        orelse: Vec<Stmt>,
    },
    Break,
    Continue,
    Return(Option<Expr>),
    /// `a = b = ... = value`; every target is a store-context expression.
    Assign {
        targets: Vec<Expr>,
        value: Expr,
    },
    /// `target op= value`.
    AugAssign {
        target: Expr,
        op: Operator,
        value: Expr,
    },
    /// An expression evaluated for its side effects.
    Expr(Expr),
    Pass,
    /// `import a.b.c [as x]`, one alias per clause.
    Import {
        names: Vec<ImportAlias>,
    },
    /// `from [.]*module import n1, n2 as m, ...` or `from module import *`.
    ImportFrom {
        module: Option<String>,
        names: Vec<ImportAlias>,
        /// Number of leading dots (relative-import level).
        level: u32,
    },
}

/// A function definition statement.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub params: Parameters,
    pub body: Vec<Stmt>,
    /// The function's own scope; the compiler finalizes its table before
    /// emitting the body.
    pub scope: ScopeId,
}

/// Parameter list of a function definition.
///
/// Only plain positional parameters compile; the remaining categories exist
/// so front ends can hand over any signature and get a precise rejection.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Parameters {
    pub args: Vec<String>,
    pub vararg: Option<String>,
    pub kwonlyargs: Vec<String>,
    pub kw_defaults: Vec<Expr>,
    pub kwarg: Option<String>,
    pub defaults: Vec<Expr>,
}

impl Parameters {
    /// Parameters holding only plain positional names.
    #[must_use]
    pub fn positional(args: Vec<String>) -> Self {
        Self {
            args,
            ..Self::default()
        }
    }
}

/// One `name [as alias]` clause of an import statement.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ImportAlias {
    pub name: String,
    pub asname: Option<String>,
}

/// How a name or attribute node is being used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ExprContext {
    Load,
    Store,
    /// Definitional store: the VM may record the binding as an immutable
    /// module constant. The compiler uses this for function-definition and
    /// import bindings; strict-mode front ends also tag module-level
    /// assignment targets with it.
    StoreConst,
}

/// An expression.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Expr {
    Name {
        id: String,
        ctx: ExprContext,
    },
    Attribute {
        value: Box<Expr>,
        attr: String,
        ctx: ExprContext,
    },
    Literal(Literal),
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
    Set(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        /// Present so calls using keywords can be rejected; never compiled.
        keywords: Vec<Keyword>,
    },
    BinOp {
        left: Box<Expr>,
        op: Operator,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOperator,
        operand: Box<Expr>,
    },
    /// Short-circuit `and`/`or` over two or more values.
    BoolOp {
        op: BoolOperator,
        values: Vec<Expr>,
    },
    /// Comparison; only a single operator is compilable.
    Compare {
        left: Box<Expr>,
        ops: Vec<CmpOperator>,
        comparators: Vec<Expr>,
    },
}

/// A literal value.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Literal {
    None,
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
}

/// A keyword argument in a call.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Keyword {
    pub arg: String,
    pub value: Expr,
}

/// A binary (and augmented-assignment) operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Operator {
    Add,
    Sub,
    Mult,
    MatMult,
    Div,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
}

/// A unary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum UnaryOperator {
    UAdd,
    USub,
    Invert,
    Not,
}

/// A short-circuit boolean operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BoolOperator {
    And,
    Or,
}

/// A comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CmpOperator {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}
