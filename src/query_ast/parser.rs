use serde_json::Value;
use sqlparser::ast as sq;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use super::ast::{
    BinaryOpAst, DeleteAst, ExprAst, InsertAst, OrderByExprAst, SelectAst, SelectItemAst, StatementAst, TableRefAst,
    UpdateAst,
};
use super::errors::{QueryError, QueryResult};

/// Parse exactly one SELECT / INSERT / UPDATE / DELETE statement.
pub fn parse_statement(sql: &str) -> QueryResult<StatementAst> {
    let dialect = GenericDialect {};
    let ast = Parser::parse_sql(&dialect, sql)?;
    if ast.len() != 1 {
        return Err(QueryError::UnsupportedStatement(format!("expected one statement, got {}", ast.len())));
    }
    match &ast[0] {
        sq::Statement::Query(q) => convert_query(q).map(StatementAst::Select),
        sq::Statement::Insert(insert) => convert_insert(insert).map(StatementAst::Insert),
        sq::Statement::Update { table, assignments, selection, .. } => {
            convert_update(table, assignments, selection.as_ref()).map(StatementAst::Update)
        }
        sq::Statement::Delete(delete) => convert_delete(delete).map(StatementAst::Delete),
        other => Err(QueryError::UnsupportedStatement(first_keyword(&other.to_string()))),
    }
}

/// Convenience for callers that only accept SELECT.
pub fn parse_select(sql: &str) -> QueryResult<SelectAst> {
    match parse_statement(sql)? {
        StatementAst::Select(select) => Ok(select),
        _ => Err(QueryError::UnsupportedStatement("expected SELECT".into())),
    }
}

fn first_keyword(sql: &str) -> String {
    sql.split_whitespace().next().unwrap_or_default().to_ascii_uppercase()
}

/// Identifier scope: qualifiers naming the statement's own table are dropped.
struct Scope {
    qualifiers: Vec<String>,
}

impl Scope {
    fn for_table(table: &TableRefAst) -> Self {
        let mut qualifiers = vec![table.name.to_ascii_lowercase()];
        if let Some(alias) = &table.alias {
            qualifiers.push(alias.to_ascii_lowercase());
        }
        Self { qualifiers }
    }

    fn empty() -> Self {
        Self { qualifiers: Vec::new() }
    }

    fn column_path(&self, parts: &[sq::Ident]) -> String {
        let mut names: Vec<&str> = parts.iter().map(|p| p.value.as_str()).collect();
        if names.len() > 1 && self.qualifiers.iter().any(|q| q.eq_ignore_ascii_case(names[0])) {
            names.remove(0);
        }
        names.join(".")
    }
}

fn convert_query(q: &sq::Query) -> QueryResult<SelectAst> {
    if q.with.is_some() {
        return Err(QueryError::UnsupportedStatement("WITH".into()));
    }
    let sel = match q.body.as_ref() {
        sq::SetExpr::Select(sel) => sel,
        _ => return Err(QueryError::UnsupportedStatement("set operation".into())),
    };
    if sel.from.len() > 1 || sel.from.first().is_some_and(|t| !t.joins.is_empty()) {
        return Err(QueryError::UnsupportedStatement("JOIN".into()));
    }
    if sel.distinct.is_some() {
        return Err(QueryError::UnsupportedStatement("DISTINCT".into()));
    }
    if sel.having.is_some() {
        return Err(QueryError::UnsupportedStatement("HAVING".into()));
    }
    if let sq::GroupByExpr::Expressions(a, b) = &sel.group_by {
        if !a.is_empty() || !b.is_empty() {
            return Err(QueryError::UnsupportedStatement("GROUP BY".into()));
        }
    } else {
        return Err(QueryError::UnsupportedStatement("GROUP BY".into()));
    }

    let from = sel.from.first().map(|t| convert_table_factor(&t.relation)).transpose()?;
    let scope = from.as_ref().map(Scope::for_table).unwrap_or_else(Scope::empty);

    let mut projection = Vec::new();
    for item in &sel.projection {
        match item {
            sq::SelectItem::Wildcard(_) | sq::SelectItem::QualifiedWildcard(..) => projection.push(SelectItemAst::Wildcard),
            sq::SelectItem::UnnamedExpr(e) => projection.push(SelectItemAst::Expr { expr: convert_expr(e, &scope), alias: None }),
            sq::SelectItem::ExprWithAlias { expr, alias } => projection.push(SelectItemAst::Expr {
                expr: convert_expr(expr, &scope),
                alias: Some(alias.value.clone()),
            }),
        }
    }

    let selection = sel.selection.as_ref().map(|e| convert_expr(e, &scope));

    let mut order_by = Vec::new();
    if let Some(ob) = &q.order_by {
        for obe in &ob.exprs {
            order_by.push(OrderByExprAst { expr: convert_expr(&obe.expr, &scope), asc: obe.asc.unwrap_or(true) });
        }
    }

    let limit = q.limit.as_ref().map(|l| literal_u64(l, "LIMIT")).transpose()?;
    let offset = q.offset.as_ref().map(|o| literal_u64(&o.value, "OFFSET")).transpose()?;

    Ok(SelectAst { projection, from, selection, order_by, limit, offset })
}

fn convert_table_factor(relation: &sq::TableFactor) -> QueryResult<TableRefAst> {
    match relation {
        sq::TableFactor::Table { name, alias, .. } => Ok(TableRefAst {
            name: object_name(name),
            alias: alias.as_ref().map(|a| a.name.value.clone()),
        }),
        _ => Err(QueryError::UnsupportedStatement("complex table ref".into())),
    }
}

fn object_name(name: &sq::ObjectName) -> String {
    name.0.last().map(|i| i.value.clone()).unwrap_or_default()
}

fn literal_u64(e: &sq::Expr, clause: &str) -> QueryResult<u64> {
    match e {
        sq::Expr::Value(sq::Value::Number(n, _)) => n
            .parse()
            .map_err(|_| QueryError::Invalid(format!("{clause} must be a non-negative integer, got {n}"))),
        other => Err(QueryError::Invalid(format!("{clause} must be a non-negative integer, got {other}"))),
    }
}

fn convert_insert(insert: &sq::Insert) -> QueryResult<InsertAst> {
    let table = TableRefAst { name: object_name(&insert.table_name), alias: None };
    let scope = Scope::for_table(&table);
    let columns: Vec<String> = insert.columns.iter().map(|c| c.value.clone()).collect();
    let source = insert
        .source
        .as_ref()
        .ok_or_else(|| QueryError::UnsupportedStatement("INSERT without VALUES".into()))?;
    let rows = match source.body.as_ref() {
        sq::SetExpr::Values(values) => values
            .rows
            .iter()
            .map(|row| row.iter().map(|e| convert_expr(e, &scope)).collect::<Vec<_>>())
            .collect::<Vec<_>>(),
        _ => return Err(QueryError::UnsupportedStatement("INSERT ... SELECT".into())),
    };
    if let Some(bad) = rows.iter().find(|r| !columns.is_empty() && r.len() != columns.len()) {
        return Err(QueryError::Invalid(format!(
            "INSERT row has {} values for {} columns",
            bad.len(),
            columns.len()
        )));
    }
    Ok(InsertAst { table, columns, rows })
}

fn convert_update(
    table: &sq::TableWithJoins,
    assignments: &[sq::Assignment],
    selection: Option<&sq::Expr>,
) -> QueryResult<UpdateAst> {
    let table = convert_table_factor(&table.relation)?;
    let scope = Scope::for_table(&table);
    let mut out = Vec::with_capacity(assignments.len());
    for a in assignments {
        let column = match &a.target {
            sq::AssignmentTarget::ColumnName(name) => scope.column_path(&name.0),
            sq::AssignmentTarget::Tuple(_) => return Err(QueryError::UnsupportedStatement("tuple assignment".into())),
        };
        out.push((column, convert_expr(&a.value, &scope)));
    }
    let selection = selection.map(|e| convert_expr(e, &scope));
    Ok(UpdateAst { table, assignments: out, selection })
}

fn convert_delete(delete: &sq::Delete) -> QueryResult<DeleteAst> {
    let tables = match &delete.from {
        sq::FromTable::WithFromKeyword(t) | sq::FromTable::WithoutKeyword(t) => t,
    };
    if tables.len() != 1 || !tables[0].joins.is_empty() {
        return Err(QueryError::UnsupportedStatement("multi-table DELETE".into()));
    }
    let table = convert_table_factor(&tables[0].relation)?;
    let scope = Scope::for_table(&table);
    let selection = delete.selection.as_ref().map(|e| convert_expr(e, &scope));
    Ok(DeleteAst { table, selection })
}

fn convert_value(v: &sq::Value) -> Option<Value> {
    match v {
        sq::Value::Number(n, _) => Some(number_literal(n, false)),
        sq::Value::SingleQuotedString(s) | sq::Value::DoubleQuotedString(s) => Some(Value::String(s.clone())),
        sq::Value::Boolean(b) => Some(Value::Bool(*b)),
        sq::Value::Null => Some(Value::Null),
        _ => None,
    }
}

fn number_literal(raw: &str, negate: bool) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        return Value::from(if negate { -i } else { i });
    }
    match raw.parse::<f64>() {
        Ok(f) => serde_json::Number::from_f64(if negate { -f } else { f })
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Err(_) => Value::String(if negate { format!("-{raw}") } else { raw.to_string() }),
    }
}

fn convert_binary_op(op: &sq::BinaryOperator) -> Option<BinaryOpAst> {
    Some(match op {
        sq::BinaryOperator::Eq => BinaryOpAst::Eq,
        sq::BinaryOperator::NotEq => BinaryOpAst::NotEq,
        sq::BinaryOperator::Lt => BinaryOpAst::Lt,
        sq::BinaryOperator::LtEq => BinaryOpAst::LtEq,
        sq::BinaryOperator::Gt => BinaryOpAst::Gt,
        sq::BinaryOperator::GtEq => BinaryOpAst::GtEq,
        sq::BinaryOperator::And => BinaryOpAst::And,
        sq::BinaryOperator::Or => BinaryOpAst::Or,
        _ => return None,
    })
}

fn convert_expr(e: &sq::Expr, scope: &Scope) -> ExprAst {
    match e {
        sq::Expr::Identifier(id) => ExprAst::Column(id.value.clone()),
        sq::Expr::CompoundIdentifier(parts) => ExprAst::Column(scope.column_path(parts)),
        sq::Expr::Value(v) => convert_value(v).map(ExprAst::Literal).unwrap_or_else(|| ExprAst::Raw(e.to_string())),
        sq::Expr::UnaryOp { op: sq::UnaryOperator::Minus, expr } => match expr.as_ref() {
            sq::Expr::Value(sq::Value::Number(n, _)) => ExprAst::Literal(number_literal(n, true)),
            _ => ExprAst::Raw(e.to_string()),
        },
        sq::Expr::UnaryOp { op: sq::UnaryOperator::Not, expr } => ExprAst::Not(Box::new(convert_expr(expr, scope))),
        sq::Expr::Nested(inner) => convert_expr(inner, scope),
        sq::Expr::BinaryOp { left, op, right } => match convert_binary_op(op) {
            Some(op) => ExprAst::binary(convert_expr(left, scope), op, convert_expr(right, scope)),
            None => ExprAst::Raw(e.to_string()),
        },
        sq::Expr::InList { expr, list, negated } => ExprAst::InList {
            expr: Box::new(convert_expr(expr, scope)),
            list: list.iter().map(|x| convert_expr(x, scope)).collect(),
            negated: *negated,
        },
        // ESCAPE changes which characters are wildcards; not supported.
        sq::Expr::Like { escape_char: Some(_), .. } => ExprAst::Raw(e.to_string()),
        sq::Expr::Like { negated, expr, pattern, .. } => ExprAst::Like {
            expr: Box::new(convert_expr(expr, scope)),
            pattern: Box::new(convert_expr(pattern, scope)),
            negated: *negated,
        },
        sq::Expr::Array(array) => {
            let items: Vec<ExprAst> = array.elem.iter().map(|x| convert_expr(x, scope)).collect();
            let values: Option<Vec<Value>> = items
                .iter()
                .map(|i| match i {
                    ExprAst::Literal(v) => Some(v.clone()),
                    _ => None,
                })
                .collect();
            match values {
                Some(values) => ExprAst::Literal(Value::Array(values)),
                None => ExprAst::Raw(e.to_string()),
            }
        }
        sq::Expr::Function(func) => {
            let name = func.name.to_string();
            let mut args = Vec::new();
            if let sq::FunctionArguments::List(list) = &func.args {
                for a in &list.args {
                    match a {
                        sq::FunctionArg::Unnamed(sq::FunctionArgExpr::Expr(ex)) => args.push(convert_expr(ex, scope)),
                        _ => return ExprAst::Raw(e.to_string()),
                    }
                }
            }
            ExprAst::FuncCall { name, args }
        }
        _ => ExprAst::Raw(e.to_string()),
    }
}
