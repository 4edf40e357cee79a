// Abstract syntax tree: closed sum types, every node carries its source line.
// Ownership is strictly tree-shaped.

use smol_str::SmolStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn new(line: u32, column: u32) -> Self {
        Span { line, column }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    Len,
    BNot,
}

/// Attribute on a local declaration: `<const>` or `<close>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocalAttrib {
    #[default]
    None,
    Const,
    Close,
}

#[derive(Debug)]
pub enum Expr {
    Nil(Span),
    True(Span),
    False(Span),
    Int(i64, Span),
    Float(f64, Span),
    Str(String, Span),
    Vararg(Span),
    Name(SmolStr, Span),
    /// `(expr)` - truncates multi-value expressions to one value
    Paren(Box<Expr>, Span),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        span: Span,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
        span: Span,
    },
    /// `obj.name` or `obj[expr]`
    Index {
        object: Box<Expr>,
        key: Box<Expr>,
        span: Span,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        span: Span,
    },
    /// `obj:name(args)` - receiver is passed as the implicit first argument
    MethodCall {
        object: Box<Expr>,
        method: SmolStr,
        args: Vec<Expr>,
        span: Span,
    },
    Function(Box<FunctionBody>),
    Table {
        entries: Vec<TableEntry>,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Nil(s)
            | Expr::True(s)
            | Expr::False(s)
            | Expr::Int(_, s)
            | Expr::Float(_, s)
            | Expr::Str(_, s)
            | Expr::Vararg(s)
            | Expr::Name(_, s)
            | Expr::Paren(_, s) => *s,
            Expr::Binary { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Index { span, .. }
            | Expr::Call { span, .. }
            | Expr::MethodCall { span, .. }
            | Expr::Table { span, .. } => *span,
            Expr::Function(body) => body.span,
        }
    }

    /// Calls and `...` expand to multiple values in tail position.
    pub fn is_multi_value(&self) -> bool {
        matches!(
            self,
            Expr::Call { .. } | Expr::MethodCall { .. } | Expr::Vararg(_)
        )
    }
}

#[derive(Debug)]
pub enum TableEntry {
    /// Positional `value`
    Item(Expr),
    /// `name = value`
    Named(SmolStr, Expr),
    /// `[key] = value`
    Keyed(Expr, Expr),
}

#[derive(Debug)]
pub struct FunctionBody {
    pub params: Vec<SmolStr>,
    pub is_vararg: bool,
    pub block: Block,
    pub span: Span,
    /// Display name for diagnostics, filled for named declarations
    pub name: Option<SmolStr>,
}

#[derive(Debug, Default)]
pub struct Block {
    pub stats: Vec<Stat>,
}

#[derive(Debug)]
pub struct LocalName {
    pub name: SmolStr,
    pub attrib: LocalAttrib,
    pub span: Span,
}

#[derive(Debug)]
pub enum Stat {
    /// Expression statement; the parser guarantees this is a call
    ExprStat(Expr),
    Assign {
        targets: Vec<Expr>,
        values: Vec<Expr>,
        span: Span,
    },
    Local {
        names: Vec<LocalName>,
        values: Vec<Expr>,
        span: Span,
    },
    /// `function name.path[:method]() ... end`
    FunctionDecl {
        target: Expr,
        is_method: bool,
        body: Box<FunctionBody>,
        span: Span,
    },
    LocalFunction {
        name: SmolStr,
        body: Box<FunctionBody>,
        span: Span,
    },
    Do(Block, Span),
    While {
        condition: Expr,
        body: Block,
        span: Span,
    },
    Repeat {
        body: Block,
        condition: Expr,
        span: Span,
    },
    If {
        /// Condition/block pairs: `if`/`elseif` arms in order
        arms: Vec<(Expr, Block)>,
        else_block: Option<Block>,
        span: Span,
    },
    NumericFor {
        var: SmolStr,
        start: Expr,
        limit: Expr,
        step: Option<Expr>,
        body: Block,
        span: Span,
    },
    GenericFor {
        names: Vec<SmolStr>,
        exprs: Vec<Expr>,
        body: Block,
        span: Span,
    },
    Return {
        values: Vec<Expr>,
        span: Span,
    },
    Break(Span),
    Goto(SmolStr, Span),
    Label(SmolStr, Span),
}

impl Stat {
    pub fn span(&self) -> Span {
        match self {
            Stat::ExprStat(e) => e.span(),
            Stat::Assign { span, .. }
            | Stat::Local { span, .. }
            | Stat::FunctionDecl { span, .. }
            | Stat::LocalFunction { span, .. }
            | Stat::Do(_, span)
            | Stat::While { span, .. }
            | Stat::Repeat { span, .. }
            | Stat::If { span, .. }
            | Stat::NumericFor { span, .. }
            | Stat::GenericFor { span, .. }
            | Stat::Return { span, .. }
            | Stat::Break(span)
            | Stat::Goto(_, span)
            | Stat::Label(_, span) => *span,
        }
    }
}

/// Root node: the whole chunk plus any syntax errors recorded on the way.
#[derive(Debug)]
pub struct Program {
    pub block: Block,
    pub errors: Vec<crate::lua_vm::LuaError>,
}

impl Program {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}
