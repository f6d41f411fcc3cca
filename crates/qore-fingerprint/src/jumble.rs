// SPDX-License-Identifier: Apache-2.0

//! Query jumbling.
//!
//! The tree is serialized into a bounded rolling buffer: every node appends a
//! tag and its literal-free attributes. When the buffer fills up it is
//! replaced by the digest of its contents and appending resumes, so the whole
//! traversal contributes to the final hash in constant memory.

use xxhash_rust::xxh32::xxh32;

use crate::error::FingerprintError;
use crate::fingerprint::Fingerprint;
use crate::tree::*;

/// Size of the rolling jumble buffer in bytes.
pub const JUMBLE_SIZE: usize = 1024;

/// Deepest tree the jumbler walks before giving up.
pub const MAX_DEPTH: usize = 512;

const TREE_SEED: u32 = 0;
const TEXT_SEED: u32 = 0x5346_5754;

/// Location of one literal in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstLocation {
    pub offset: usize,
    /// Unknown until the normalizer lexes the literal.
    pub length: Option<usize>,
}

/// Result of jumbling one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Jumbled {
    pub fingerprint: Fingerprint,
    pub constants: Vec<ConstLocation>,
}

/// Fingerprints a statement tree.
pub fn fingerprint(statement: &Statement) -> Result<Jumbled, FingerprintError> {
    let mut jumbler = Jumbler::new();
    jumbler.statement(statement)?;
    Ok(jumbler.finish())
}

/// Fingerprints a statement that has no tree form, from its raw text.
/// Surrounding whitespace and trailing semicolons are not part of the text.
pub fn fingerprint_text(text: &str) -> Fingerprint {
    let text = text.trim().trim_end_matches(';').trim_end();
    Fingerprint::new(xxh32(text.as_bytes(), TEXT_SEED))
}

#[repr(u16)]
#[derive(Clone, Copy)]
enum Tag {
    Select = 1,
    Insert,
    Update,
    Delete,
    Query,
    Cte,
    SetSelect,
    SetQuery,
    SetOperation,
    Values,
    SelectNode,
    SelectExpr,
    SelectWildcard,
    TableWithJoins,
    Table,
    Derived,
    NestedJoin,
    Join,
    OrderItem,
    Assignment,
    Column,
    Const,
    Param,
    BinaryOp,
    UnaryOp,
    Function,
    NamedArg,
    SubqueryArg,
    Window,
    Cast,
    IsNull,
    IsBool,
    InList,
    InSubquery,
    Between,
    Like,
    Case,
    Exists,
    Subquery,
    Tuple,
    Wildcard,
    Lock,
    Into,
    NamedWindow,
    Qualify,
    OnDuplicateKey,
    OnConflict,
    Modifier,
    UpdateFrom,
    Special,
}

struct Jumbler {
    buf: Vec<u8>,
    constants: Vec<ConstLocation>,
    depth: usize,
}

impl Jumbler {
    fn new() -> Self {
        Self {
            buf: Vec::with_capacity(JUMBLE_SIZE),
            constants: Vec::new(),
            depth: 0,
        }
    }

    fn finish(self) -> Jumbled {
        Jumbled {
            fingerprint: Fingerprint::new(xxh32(&self.buf, TREE_SEED)),
            constants: self.constants,
        }
    }

    fn append(&mut self, mut item: &[u8]) {
        while !item.is_empty() {
            if self.buf.len() >= JUMBLE_SIZE {
                let digest = xxh32(&self.buf, TREE_SEED);
                self.buf.clear();
                self.buf.extend_from_slice(&digest.to_le_bytes());
            }
            let room = JUMBLE_SIZE - self.buf.len();
            let take = room.min(item.len());
            self.buf.extend_from_slice(&item[..take]);
            item = &item[take..];
        }
    }

    fn tag(&mut self, tag: Tag) {
        self.append(&(tag as u16).to_le_bytes());
    }

    fn flag(&mut self, value: bool) {
        self.append(&[value as u8]);
    }

    fn count(&mut self, len: usize) {
        self.append(&(len as u32).to_le_bytes());
    }

    fn text(&mut self, value: &str) {
        self.append(value.as_bytes());
        self.append(&[0]);
    }

    fn enter(&mut self) -> Result<(), FingerprintError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(FingerprintError::TooDeep { depth: MAX_DEPTH });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn optional_expr(&mut self, expr: Option<&Expr>) -> Result<(), FingerprintError> {
        self.flag(expr.is_some());
        match expr {
            Some(expr) => self.expr(expr),
            None => Ok(()),
        }
    }

    fn exprs(&mut self, exprs: &[Expr]) -> Result<(), FingerprintError> {
        self.count(exprs.len());
        exprs.iter().try_for_each(|e| self.expr(e))
    }

    fn statement(&mut self, statement: &Statement) -> Result<(), FingerprintError> {
        match statement {
            Statement::Query(query) => {
                self.tag(Tag::Select);
                self.query(query)
            }
            Statement::Insert(insert) => {
                self.tag(Tag::Insert);
                self.text(&insert.table);
                self.count(insert.columns.len());
                for column in &insert.columns {
                    self.text(column);
                }
                self.flag(insert.source.is_some());
                if let Some(source) = &insert.source {
                    self.query(source)?;
                }
                self.on_insert(insert.on.as_ref())?;
                self.count(insert.modifiers.len());
                for modifier in &insert.modifiers {
                    self.tag(Tag::Modifier);
                    self.text(modifier);
                }
                self.select_items(&insert.returning)
            }
            Statement::Update(update) => {
                self.tag(Tag::Update);
                self.table_with_joins(&update.table)?;
                self.assignments(&update.assignments)?;
                self.tag(Tag::UpdateFrom);
                self.tables(&update.from)?;
                self.optional_expr(update.selection.as_ref())?;
                self.select_items(&update.returning)
            }
            Statement::Delete(delete) => {
                self.tag(Tag::Delete);
                self.tables(&delete.from)?;
                self.tables(&delete.using)?;
                self.optional_expr(delete.selection.as_ref())?;
                self.select_items(&delete.returning)
            }
            Statement::Unrecognized(kind) => Err(FingerprintError::unrecognized(kind.clone())),
        }
    }

    fn assignments(&mut self, assignments: &[Assignment]) -> Result<(), FingerprintError> {
        self.count(assignments.len());
        for assignment in assignments {
            self.tag(Tag::Assignment);
            self.text(&assignment.target);
            self.expr(&assignment.value)?;
        }
        Ok(())
    }

    fn on_insert(&mut self, on: Option<&OnInsert>) -> Result<(), FingerprintError> {
        match on {
            None => self.append(&[0]),
            Some(OnInsert::DuplicateKeyUpdate(assignments)) => {
                self.tag(Tag::OnDuplicateKey);
                self.assignments(assignments)?;
            }
            Some(OnInsert::Conflict { target, action }) => {
                self.tag(Tag::OnConflict);
                self.text(target.as_deref().unwrap_or(""));
                match action {
                    ConflictAction::Nothing => self.append(&[0]),
                    ConflictAction::Update {
                        assignments,
                        selection,
                    } => {
                        self.append(&[1]);
                        self.assignments(assignments)?;
                        self.optional_expr(selection.as_ref())?;
                    }
                }
            }
        }
        Ok(())
    }

    fn query(&mut self, query: &Query) -> Result<(), FingerprintError> {
        self.enter()?;
        self.tag(Tag::Query);
        self.flag(query.recursive);
        self.count(query.ctes.len());
        for cte in &query.ctes {
            self.tag(Tag::Cte);
            self.text(&cte.name);
            self.query(&cte.query)?;
        }
        self.set_expr(&query.body)?;
        self.order_items(&query.order_by)?;
        self.optional_expr(query.limit.as_ref())?;
        self.optional_expr(query.offset.as_ref())?;
        self.count(query.locks.len());
        for lock in &query.locks {
            self.tag(Tag::Lock);
            self.text(lock);
        }
        self.leave();
        Ok(())
    }

    fn set_expr(&mut self, body: &SetExpr) -> Result<(), FingerprintError> {
        self.enter()?;
        match body {
            SetExpr::Select(select) => {
                self.tag(Tag::SetSelect);
                self.select(select)?;
            }
            SetExpr::Query(query) => {
                self.tag(Tag::SetQuery);
                self.query(query)?;
            }
            SetExpr::SetOperation {
                op,
                quantifier,
                left,
                right,
            } => {
                self.tag(Tag::SetOperation);
                self.text(op);
                self.text(quantifier);
                self.set_expr(left)?;
                self.set_expr(right)?;
            }
            SetExpr::Values(rows) => {
                self.tag(Tag::Values);
                self.count(rows.len());
                for row in rows {
                    self.exprs(row)?;
                }
            }
            SetExpr::Unrecognized(kind) => return Err(FingerprintError::unrecognized(kind.clone())),
        }
        self.leave();
        Ok(())
    }

    fn select(&mut self, select: &Select) -> Result<(), FingerprintError> {
        self.tag(Tag::SelectNode);
        match &select.distinct {
            Distinct::None => self.append(&[0]),
            Distinct::All => self.append(&[1]),
            Distinct::On(exprs) => {
                self.append(&[2]);
                self.exprs(exprs)?;
            }
        }
        self.select_items(&select.projection)?;
        self.tag(Tag::Into);
        self.text(select.into.as_deref().unwrap_or(""));
        self.tables(&select.from)?;
        self.optional_expr(select.selection.as_ref())?;
        self.exprs(&select.group_by)?;
        self.optional_expr(select.having.as_ref())?;
        self.count(select.named_windows.len());
        for window in &select.named_windows {
            self.tag(Tag::NamedWindow);
            self.text(&window.name);
            self.window(&window.spec)?;
        }
        self.tag(Tag::Qualify);
        self.optional_expr(select.qualify.as_ref())
    }

    fn select_items(&mut self, items: &[SelectItem]) -> Result<(), FingerprintError> {
        self.count(items.len());
        for item in items {
            match item {
                SelectItem::Expr(expr) => {
                    self.tag(Tag::SelectExpr);
                    self.expr(expr)?;
                }
                SelectItem::Wildcard(text) => {
                    self.tag(Tag::SelectWildcard);
                    self.text(text);
                }
            }
        }
        Ok(())
    }

    fn tables(&mut self, tables: &[TableWithJoins]) -> Result<(), FingerprintError> {
        self.count(tables.len());
        tables.iter().try_for_each(|t| self.table_with_joins(t))
    }

    fn table_with_joins(&mut self, table: &TableWithJoins) -> Result<(), FingerprintError> {
        self.tag(Tag::TableWithJoins);
        self.table_ref(&table.relation)?;
        self.count(table.joins.len());
        for join in &table.joins {
            self.tag(Tag::Join);
            self.append(&[join.kind as u8]);
            self.table_ref(&join.relation)?;
            match &join.constraint {
                JoinConstraint::None => self.append(&[0]),
                JoinConstraint::On(expr) => {
                    self.append(&[1]);
                    self.expr(expr)?;
                }
                JoinConstraint::Using(columns) => {
                    self.append(&[2]);
                    self.count(columns.len());
                    for column in columns {
                        self.text(column);
                    }
                }
                JoinConstraint::Natural => self.append(&[3]),
            }
        }
        Ok(())
    }

    fn table_ref(&mut self, table: &TableRef) -> Result<(), FingerprintError> {
        self.enter()?;
        match table {
            TableRef::Table { name } => {
                self.tag(Tag::Table);
                self.text(name);
            }
            TableRef::Derived { lateral, query } => {
                self.tag(Tag::Derived);
                self.flag(*lateral);
                self.query(query)?;
            }
            TableRef::Nested(inner) => {
                self.tag(Tag::NestedJoin);
                self.table_with_joins(inner)?;
            }
            TableRef::Unrecognized(kind) => return Err(FingerprintError::unrecognized(kind.clone())),
        }
        self.leave();
        Ok(())
    }

    fn order_items(&mut self, items: &[OrderItem]) -> Result<(), FingerprintError> {
        self.count(items.len());
        for item in items {
            self.tag(Tag::OrderItem);
            self.expr(&item.expr)?;
            self.append(&[tristate(item.asc), tristate(item.nulls_first)]);
        }
        Ok(())
    }

    fn expr(&mut self, expr: &Expr) -> Result<(), FingerprintError> {
        self.enter()?;
        match expr {
            Expr::Column(parts) => {
                self.tag(Tag::Column);
                self.count(parts.len());
                for part in parts {
                    self.text(part);
                }
            }
            Expr::Const(constant) => {
                self.tag(Tag::Const);
                self.const_kind(&constant.kind);
                if let Some(offset) = constant.location {
                    self.constants.push(ConstLocation {
                        offset,
                        length: None,
                    });
                }
            }
            Expr::Param(name) => {
                self.tag(Tag::Param);
                self.text(name);
            }
            Expr::BinaryOp { op, left, right } => {
                self.tag(Tag::BinaryOp);
                self.text(op);
                self.expr(left)?;
                self.expr(right)?;
            }
            Expr::UnaryOp { op, expr } => {
                self.tag(Tag::UnaryOp);
                self.text(op);
                self.expr(expr)?;
            }
            Expr::Function(function) => self.function(function)?,
            Expr::Cast {
                kind,
                expr,
                data_type,
            } => {
                self.tag(Tag::Cast);
                self.text(kind);
                self.text(data_type);
                self.expr(expr)?;
            }
            Expr::IsNull { expr, negated } => {
                self.tag(Tag::IsNull);
                self.flag(*negated);
                self.expr(expr)?;
            }
            Expr::IsBool {
                expr,
                value,
                negated,
            } => {
                self.tag(Tag::IsBool);
                self.flag(*value);
                self.flag(*negated);
                self.expr(expr)?;
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                self.tag(Tag::InList);
                self.flag(*negated);
                self.expr(expr)?;
                self.exprs(list)?;
            }
            Expr::InSubquery {
                expr,
                subquery,
                negated,
            } => {
                self.tag(Tag::InSubquery);
                self.flag(*negated);
                self.expr(expr)?;
                self.query(subquery)?;
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                self.tag(Tag::Between);
                self.flag(*negated);
                self.expr(expr)?;
                self.expr(low)?;
                self.expr(high)?;
            }
            Expr::Like {
                op,
                expr,
                pattern,
                negated,
                any,
                escape,
            } => {
                self.tag(Tag::Like);
                self.text(op);
                self.flag(*negated);
                self.flag(*any);
                self.flag(escape.is_some());
                if let Some(escape) = escape {
                    self.text(escape);
                }
                self.expr(expr)?;
                self.expr(pattern)?;
            }
            Expr::Case {
                operand,
                branches,
                else_result,
            } => {
                self.tag(Tag::Case);
                self.optional_expr(operand.as_deref())?;
                self.count(branches.len());
                for (condition, result) in branches {
                    self.expr(condition)?;
                    self.expr(result)?;
                }
                self.optional_expr(else_result.as_deref())?;
            }
            Expr::Exists { subquery, negated } => {
                self.tag(Tag::Exists);
                self.flag(*negated);
                self.query(subquery)?;
            }
            Expr::Subquery(query) => {
                self.tag(Tag::Subquery);
                self.query(query)?;
            }
            Expr::Tuple(items) => {
                self.tag(Tag::Tuple);
                self.exprs(items)?;
            }
            Expr::Special { name, args } => {
                self.tag(Tag::Special);
                self.text(name);
                self.exprs(args)?;
            }
            Expr::Wildcard(text) => {
                self.tag(Tag::Wildcard);
                self.text(text);
            }
            Expr::Unrecognized(kind) => return Err(FingerprintError::unrecognized(kind.clone())),
        }
        self.leave();
        Ok(())
    }

    fn function(&mut self, function: &Function) -> Result<(), FingerprintError> {
        self.tag(Tag::Function);
        self.text(&function.name);
        self.flag(function.distinct);
        self.count(function.args.len());
        for arg in &function.args {
            match arg {
                FunctionArg::Positional(expr) => self.expr(expr)?,
                FunctionArg::Named { name, value } => {
                    self.tag(Tag::NamedArg);
                    self.text(name);
                    self.expr(value)?;
                }
                FunctionArg::Subquery(query) => {
                    self.tag(Tag::SubqueryArg);
                    self.query(query)?;
                }
            }
        }
        self.order_items(&function.order_by)?;
        self.order_items(&function.within_group)?;
        self.optional_expr(function.filter.as_deref())?;
        self.flag(function.over.is_some());
        match &function.over {
            Some(window) => self.window(window),
            None => Ok(()),
        }
    }

    fn window(&mut self, window: &WindowSpec) -> Result<(), FingerprintError> {
        self.tag(Tag::Window);
        self.text(window.name.as_deref().unwrap_or(""));
        self.exprs(&window.partition_by)?;
        self.order_items(&window.order_by)
    }

    fn const_kind(&mut self, kind: &ConstKind) {
        match kind {
            ConstKind::Number => self.append(&[1]),
            ConstKind::String => self.append(&[2]),
            ConstKind::Boolean => self.append(&[3]),
            ConstKind::Null => self.append(&[4]),
            ConstKind::Typed(type_name) => {
                self.append(&[5]);
                self.text(type_name);
            }
            ConstKind::Other(name) => {
                self.append(&[6]);
                self.text(name);
            }
        }
    }
}

fn tristate(value: Option<bool>) -> u8 {
    match value {
        None => 0,
        Some(false) => 1,
        Some(true) => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select_from(table: &str, filter: Option<Expr>) -> Statement {
        Statement::Query(Query {
            recursive: false,
            ctes: Vec::new(),
            body: SetExpr::Select(Box::new(Select {
                distinct: Distinct::None,
                projection: vec![SelectItem::Wildcard("*".into())],
                from: vec![TableWithJoins {
                    relation: TableRef::Table { name: table.into() },
                    joins: Vec::new(),
                }],
                into: None,
                selection: filter,
                group_by: Vec::new(),
                having: None,
                named_windows: Vec::new(),
                qualify: None,
            })),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            locks: Vec::new(),
        })
    }

    fn id_equals(location: usize) -> Expr {
        Expr::BinaryOp {
            op: "=".into(),
            left: Box::new(Expr::Column(vec!["id".into()])),
            right: Box::new(Expr::constant(ConstKind::Number, Some(location))),
        }
    }

    #[test]
    fn constant_position_does_not_change_fingerprint() {
        let a = fingerprint(&select_from("t", Some(id_equals(10)))).unwrap();
        let b = fingerprint(&select_from("t", Some(id_equals(99)))).unwrap();
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.constants, vec![ConstLocation { offset: 10, length: None }]);
    }

    #[test]
    fn structure_changes_fingerprint() {
        let base = fingerprint(&select_from("t", Some(id_equals(10)))).unwrap();
        let other_table = fingerprint(&select_from("u", Some(id_equals(10)))).unwrap();
        let no_filter = fingerprint(&select_from("t", None)).unwrap();
        assert_ne!(base.fingerprint, other_table.fingerprint);
        assert_ne!(base.fingerprint, no_filter.fingerprint);
    }

    #[test]
    fn unrecognized_node_is_an_error() {
        let stmt = select_from("t", Some(Expr::Unrecognized("Interval".into())));
        assert_eq!(
            fingerprint(&stmt),
            Err(FingerprintError::UnrecognizedNode {
                kind: "Interval".into()
            })
        );
    }

    #[test]
    fn long_statements_roll_the_buffer() {
        let list = (0..2000)
            .map(|i| Expr::constant(ConstKind::Number, Some(i)))
            .collect::<Vec<_>>();
        let wide = Expr::InList {
            expr: Box::new(Expr::Column(vec!["id".into()])),
            list,
            negated: false,
        };
        let jumbled = fingerprint(&select_from("t", Some(wide))).unwrap();
        assert!(!jumbled.fingerprint.is_none());
        assert_eq!(jumbled.constants.len(), 2000);
    }

    #[test]
    fn excessive_nesting_is_rejected() {
        let mut expr = Expr::Column(vec!["x".into()]);
        for _ in 0..(MAX_DEPTH + 1) {
            expr = Expr::UnaryOp {
                op: "NOT".into(),
                expr: Box::new(expr),
            };
        }
        assert!(matches!(
            fingerprint(&select_from("t", Some(expr))),
            Err(FingerprintError::TooDeep { .. })
        ));
    }

    #[test]
    fn text_fingerprint_is_stable_and_nonzero() {
        let a = fingerprint_text("VACUUM t");
        assert_eq!(a, fingerprint_text("VACUUM t"));
        assert_ne!(a, fingerprint_text("VACUUM u"));
        assert!(!a.is_none());
    }
}
