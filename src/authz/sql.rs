//! SQL predicate adapter on top of `sea_query` (re-exported by sea-orm).
//!
//! Fragments are [`Condition`]s meant to be attached to the caller's own
//! `SELECT` with `cond_where`. Relation hops render as correlated
//! `EXISTS (SELECT 1 ...)` subqueries, and every leaf is written so that a
//! NULL column yields a definite true or false instead of SQL's unknown.
//!
//! Stored values are compared as they are; the adapter agrees with the
//! instance evaluator when each column holds values of the type the
//! condition declares. List-valued fields have no SQL rendering.
//!
//! Dates on sqlite are text. Both sides of a date comparison are normalized
//! to `YYYY-MM-DDTHH:MM:SS.sssZ` in UTC (sqlite's `strftime` with `%f` on the
//! column, the same layout for the bound operand), so stored values may use
//! any precision or offset that sqlite's date functions accept. Comparison is
//! exact to the millisecond.

use std::collections::HashMap;

use sea_orm::sea_query::{
    Alias, Condition, Expr, Func, Query, SelectStatement, SimpleExpr, Value as SqlValue,
};

use crate::authz::condition::Operator;
use crate::authz::errors::AuthzError;
use crate::authz::evaluate::declared_type;
use crate::authz::predicate::QueryBuilder;
use crate::authz::types::{ResourceType, Value, ValueType};

/// `strftime` layout for sqlite dates; `%f` is seconds with milliseconds.
const SQLITE_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%fZ";
/// The same layout in chrono's vocabulary.
const CHRONO_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SqlDialect {
    #[default]
    Sqlite,
    Postgres,
}

/// How a relation maps onto columns: rows of `target` whose `remote_column`
/// equals this row's `local_column`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    pub target: ResourceType,
    pub local_column: String,
    pub remote_column: String,
}

impl Join {
    pub fn new(
        target: impl Into<ResourceType>,
        local_column: impl Into<String>,
        remote_column: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            local_column: local_column.into(),
            remote_column: remote_column.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMapping {
    pub table: String,
    /// field -> column; unmapped fields use their own name
    columns: HashMap<String, String>,
    joins: HashMap<String, Join>,
}

impl TableMapping {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: HashMap::new(),
            joins: HashMap::new(),
        }
    }

    pub fn column(mut self, field: impl Into<String>, column: impl Into<String>) -> Self {
        self.columns.insert(field.into(), column.into());
        self
    }

    pub fn join(mut self, relation: impl Into<String>, join: Join) -> Self {
        self.joins.insert(relation.into(), join);
        self
    }

    pub fn column_for<'a>(&'a self, field: &'a str) -> &'a str {
        self.columns.get(field).map(String::as_str).unwrap_or(field)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SqlSchema {
    dialect: SqlDialect,
    tables: HashMap<ResourceType, TableMapping>,
}

impl SqlSchema {
    pub fn new(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            tables: HashMap::new(),
        }
    }

    pub fn with_table(
        mut self,
        resource_type: impl Into<ResourceType>,
        mapping: TableMapping,
    ) -> Self {
        self.tables.insert(resource_type.into(), mapping);
        self
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    pub fn table(&self, resource_type: &ResourceType) -> Result<&TableMapping, AuthzError> {
        self.tables
            .get(resource_type)
            .ok_or_else(|| AuthzError::UnknownResourceType(resource_type.to_string()))
    }

    /// Builder for predicates over `resource_type`'s table.
    pub fn builder(
        &self,
        resource_type: impl Into<ResourceType>,
    ) -> Result<SqlQueryBuilder<'_>, AuthzError> {
        let resource_type = resource_type.into();
        let alias = self.table(&resource_type)?.table.clone();
        Ok(SqlQueryBuilder {
            schema: self,
            resource_type,
            alias,
            hops: Vec::new(),
        })
    }

    /// `SELECT <table>.<column> FROM <table> WHERE <predicate>`.
    pub fn select_column(
        &self,
        resource_type: &ResourceType,
        column: &str,
        predicate: Condition,
    ) -> Result<SelectStatement, AuthzError> {
        let table = &self.table(resource_type)?.table;
        Ok(Query::select()
            .column((Alias::new(table.as_str()), Alias::new(column)))
            .from(Alias::new(table.as_str()))
            .cond_where(predicate)
            .to_owned())
    }
}

#[derive(Debug, Clone)]
struct Hop {
    table: String,
    alias: String,
    outer_alias: String,
    local_column: String,
    remote_column: String,
}

/// [`QueryBuilder`] producing `sea_query` conditions. `alias` names the
/// table the builder is currently scoped to.
#[derive(Debug, Clone)]
pub struct SqlQueryBuilder<'a> {
    schema: &'a SqlSchema,
    resource_type: ResourceType,
    alias: String,
    hops: Vec<Hop>,
}

impl SqlQueryBuilder<'_> {
    fn bind(&self, value: &Value) -> SqlValue {
        match value {
            Value::String(s) => s.clone().into(),
            Value::Number(n) => (*n).into(),
            Value::Boolean(b) => (*b).into(),
            Value::Date(d) => match self.schema.dialect {
                SqlDialect::Postgres => (*d).into(),
                SqlDialect::Sqlite => d.format(CHRONO_DATE_FORMAT).to_string().into(),
            },
            Value::Null | Value::List(_) => SqlValue::String(None),
        }
    }

    fn leaf(
        &self,
        field: &str,
        operator: Operator,
        value: &Value,
    ) -> Result<SimpleExpr, AuthzError> {
        let mapping = self.schema.table(&self.resource_type)?;
        let column = || {
            Expr::col((
                Alias::new(self.alias.as_str()),
                Alias::new(mapping.column_for(field)),
            ))
        };
        let normalize_date = self.schema.dialect == SqlDialect::Sqlite
            && declared_type(value) == Some(ValueType::Date);
        let operand = || {
            if normalize_date {
                Expr::expr(
                    Func::cust(Alias::new("strftime"))
                        .arg(SQLITE_DATE_FORMAT)
                        .arg(column()),
                )
            } else {
                column()
            }
        };
        let present = column().is_not_null();

        let test = match (operator, value) {
            (Operator::NotEquals, v) => {
                return Ok(column().is_null().or(operand().ne(self.bind(v))))
            }
            (Operator::Equals, v) => operand().eq(self.bind(v)),
            (Operator::In, Value::List(items)) => {
                operand().is_in(items.iter().map(|v| self.bind(v)).collect::<Vec<_>>())
            }
            (Operator::In, v) => operand().eq(self.bind(v)),
            (Operator::GreaterThan, v) => operand().gt(self.bind(v)),
            (Operator::LessThan, v) => operand().lt(self.bind(v)),
            (Operator::Contains, Value::String(needle)) => {
                let position = match self.schema.dialect {
                    SqlDialect::Sqlite => Func::cust(Alias::new("INSTR"))
                        .arg(column())
                        .arg(needle.clone()),
                    SqlDialect::Postgres => Func::cust(Alias::new("STRPOS"))
                        .arg(column())
                        .arg(needle.clone()),
                };
                Expr::expr(position).gt(0)
            }
            (Operator::Contains, other) => {
                return Err(AuthzError::UnsupportedOperator {
                    field: field.to_string(),
                    operator: operator.to_string(),
                    value_type: other.kind().to_string(),
                })
            }
        };
        Ok(present.and(test))
    }
}

impl QueryBuilder for SqlQueryBuilder<'_> {
    type Fragment = Condition;

    fn compare_field(
        &self,
        field: &str,
        operator: Operator,
        value: &Value,
    ) -> Result<Condition, AuthzError> {
        let leaf = Condition::all().add(self.leaf(field, operator, value)?);
        Ok(self.hops.iter().rev().fold(leaf, |inner, hop| {
            let correlated = Condition::all()
                .add(
                    Expr::col((
                        Alias::new(hop.alias.as_str()),
                        Alias::new(hop.remote_column.as_str()),
                    ))
                    .equals((
                        Alias::new(hop.outer_alias.as_str()),
                        Alias::new(hop.local_column.as_str()),
                    )),
                )
                .add(inner);
            let subquery = Query::select()
                .expr(Expr::val(1))
                .from_as(Alias::new(hop.table.as_str()), Alias::new(hop.alias.as_str()))
                .cond_where(correlated)
                .to_owned();
            Condition::all().add(Expr::exists(subquery))
        }))
    }

    fn traverse_relation(&self, relation: &str) -> Result<Self, AuthzError> {
        let mapping = self.schema.table(&self.resource_type)?;
        let join = mapping
            .joins
            .get(relation)
            .ok_or_else(|| AuthzError::unknown_relation(self.resource_type.as_str(), relation))?;
        let target = self.schema.table(&join.target)?;

        let alias = format!("h{}_{}", self.hops.len() + 1, target.table);
        let mut hops = self.hops.clone();
        hops.push(Hop {
            table: target.table.clone(),
            alias: alias.clone(),
            outer_alias: self.alias.clone(),
            local_column: join.local_column.clone(),
            remote_column: join.remote_column.clone(),
        });
        Ok(Self {
            schema: self.schema,
            resource_type: join.target.clone(),
            alias,
            hops,
        })
    }

    fn and(&self, fragments: Vec<Condition>) -> Condition {
        if fragments.is_empty() {
            return self.always();
        }
        fragments.into_iter().fold(Condition::all(), Condition::add)
    }

    fn or(&self, fragments: Vec<Condition>) -> Condition {
        if fragments.is_empty() {
            return Condition::all().add(Expr::cust("1 = 0"));
        }
        fragments.into_iter().fold(Condition::any(), Condition::add)
    }

    fn not(&self, fragment: Condition) -> Condition {
        fragment.not()
    }

    fn always(&self) -> Condition {
        Condition::all().add(Expr::cust("1 = 1"))
    }
}
