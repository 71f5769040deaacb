//! Thin wrapper structures around the sqlparser AST.
//! Only the shapes API-backed tables understand survive the conversion; the
//! rest is kept as `Raw` so later stages can name it in their errors.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum StatementAst {
    Select(SelectAst),
    Insert(InsertAst),
    Update(UpdateAst),
    Delete(DeleteAst),
}

impl StatementAst {
    pub fn table(&self) -> Option<&str> {
        match self {
            StatementAst::Select(s) => s.from.as_ref().map(|t| t.name.as_str()),
            StatementAst::Insert(i) => Some(&i.table.name),
            StatementAst::Update(u) => Some(&u.table.name),
            StatementAst::Delete(d) => Some(&d.table.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectAst {
    pub projection: Vec<SelectItemAst>,
    pub from: Option<TableRefAst>,
    pub selection: Option<ExprAst>,
    pub order_by: Vec<OrderByExprAst>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertAst {
    pub table: TableRefAst,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<ExprAst>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateAst {
    pub table: TableRefAst,
    pub assignments: Vec<(String, ExprAst)>,
    pub selection: Option<ExprAst>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteAst {
    pub table: TableRefAst,
    pub selection: Option<ExprAst>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectItemAst {
    Expr { expr: ExprAst, alias: Option<String> },
    Wildcard,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableRefAst {
    pub name: String,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByExprAst {
    pub expr: ExprAst,
    pub asc: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOpAst {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl BinaryOpAst {
    pub fn as_sql(&self) -> &'static str {
        match self {
            BinaryOpAst::Eq => "=",
            BinaryOpAst::NotEq => "!=",
            BinaryOpAst::Lt => "<",
            BinaryOpAst::LtEq => "<=",
            BinaryOpAst::Gt => ">",
            BinaryOpAst::GtEq => ">=",
            BinaryOpAst::And => "AND",
            BinaryOpAst::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprAst {
    /// Dotted path with any table qualifier already stripped.
    Column(String),
    Literal(Value),
    BinaryOp { left: Box<ExprAst>, op: BinaryOpAst, right: Box<ExprAst> },
    InList { expr: Box<ExprAst>, list: Vec<ExprAst>, negated: bool },
    Like { expr: Box<ExprAst>, pattern: Box<ExprAst>, negated: bool },
    Not(Box<ExprAst>),
    FuncCall { name: String, args: Vec<ExprAst> },
    // Fallback for unsupported/complex expressions; stored as raw string for error messages.
    Raw(String),
}

impl ExprAst {
    pub fn column(name: impl Into<String>) -> Self {
        ExprAst::Column(name.into())
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        ExprAst::Literal(value.into())
    }

    pub fn binary(left: ExprAst, op: BinaryOpAst, right: ExprAst) -> Self {
        ExprAst::BinaryOp { left: Box::new(left), op, right: Box::new(right) }
    }

    pub fn and(left: ExprAst, right: ExprAst) -> Self {
        Self::binary(left, BinaryOpAst::And, right)
    }

    pub fn or(left: ExprAst, right: ExprAst) -> Self {
        Self::binary(left, BinaryOpAst::Or, right)
    }

    /// Short label used when an expression is rejected.
    pub fn describe(&self) -> String {
        match self {
            ExprAst::Column(c) => format!("column {c}"),
            ExprAst::Literal(v) => format!("literal {v}"),
            ExprAst::BinaryOp { op, .. } => format!("{} expression", op.as_sql()),
            ExprAst::InList { negated, .. } => if *negated { "NOT IN list" } else { "IN list" }.to_string(),
            ExprAst::Like { negated, .. } => if *negated { "NOT LIKE" } else { "LIKE" }.to_string(),
            ExprAst::Not(_) => "NOT expression".to_string(),
            ExprAst::FuncCall { name, .. } => format!("function call {name}()"),
            ExprAst::Raw(raw) => format!("expression `{raw}`"),
        }
    }
}
