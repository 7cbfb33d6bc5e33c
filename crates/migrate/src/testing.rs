//! In-memory backend for exercising migrations without a database
//!
//! [`MemoryBackend`] understands the statements this crate generates (DDL,
//! ledger queries and introspection queries) and keeps a small model of the
//! schema. Transactions work on a copy that replaces the committed schema on
//! commit. Statements it does not recognise are accepted and only logged.
//! Errors carry the SQLSTATE codes PostgreSQL would report.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::backends::{
    DatabaseExecutor, DatabasePool, DatabaseRow, DatabaseTransaction, DatabaseValue, DbError, DbResult,
};

const IDENT: &str = r#""((?:[^"]|"")+)""#;

fn pattern(template: &str) -> Regex {
    // `{}` marks a quoted identifier
    let source = template.replace("{}", IDENT);
    Regex::new(&source).unwrap_or_else(|e| panic!("invalid statement pattern {}: {}", source, e))
}

static CREATE_LEDGER: Lazy<Regex> = Lazy::new(|| pattern(r"^CREATE TABLE IF NOT EXISTS {} \("));
static CREATE_TABLE: Lazy<Regex> = Lazy::new(|| pattern(r"(?s)^CREATE TABLE {} \(\n(.*)\n\)$"));
static DROP_TABLE: Lazy<Regex> = Lazy::new(|| pattern(r"^DROP TABLE {}$"));
static ADD_COLUMN: Lazy<Regex> = Lazy::new(|| pattern(r"^ALTER TABLE {} ADD COLUMN (.+)$"));
static DROP_COLUMN: Lazy<Regex> = Lazy::new(|| pattern(r"^ALTER TABLE {} DROP COLUMN {}$"));
static NULLABILITY: Lazy<Regex> = Lazy::new(|| pattern(r"^ALTER TABLE {} ALTER COLUMN {} (DROP|SET) NOT NULL$"));
static COLUMN_TYPE: Lazy<Regex> = Lazy::new(|| pattern(r"^ALTER TABLE {} ALTER COLUMN {} TYPE (.+)$"));
static ADD_CONSTRAINT: Lazy<Regex> = Lazy::new(|| pattern(r"^ALTER TABLE {} ADD (CONSTRAINT .+)$"));
static CREATE_INDEX: Lazy<Regex> = Lazy::new(|| pattern(r"^CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} \("));
static DROP_INDEX: Lazy<Regex> = Lazy::new(|| pattern(r"^DROP INDEX IF EXISTS {}$"));
static LEDGER_INSERT: Lazy<Regex> = Lazy::new(|| pattern(r#"^INSERT INTO {} \("version", "name"\) VALUES"#));
static LEDGER_DELETE: Lazy<Regex> = Lazy::new(|| pattern(r#"^DELETE FROM {} WHERE "version" = \$1$"#));
static LEDGER_EXISTS: Lazy<Regex> = Lazy::new(|| pattern(r#"^SELECT EXISTS \(SELECT 1 FROM {} WHERE "version" = \$1\)"#));
static LEDGER_SELECT: Lazy<Regex> = Lazy::new(|| {
    pattern(r#"^SELECT "version", "name", "applied_at" FROM {} ORDER BY "id" (ASC|DESC)( LIMIT \$1)?$"#)
});
static COLUMN_CLAUSE: Lazy<Regex> = Lazy::new(|| pattern(r"^{} (.+)$"));
static CONSTRAINT_CLAUSE: Lazy<Regex> = Lazy::new(|| pattern(r"^CONSTRAINT {} "));
static REFERENCES: Lazy<Regex> = Lazy::new(|| pattern(r"REFERENCES {}"));

/// A column in the modelled schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryColumn {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct MemoryTable {
    columns: Vec<MemoryColumn>,
    constraints: BTreeSet<String>,
}

impl MemoryTable {
    fn column(&self, name: &str) -> Option<&MemoryColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    fn column_mut(&mut self, table: &str, name: &str) -> DbResult<&mut MemoryColumn> {
        self.columns
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| undefined_column(table, name))
    }
}

#[derive(Debug, Clone)]
struct LedgerRow {
    id: i64,
    version: i64,
    name: String,
    applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
struct MemorySchema {
    tables: BTreeMap<String, MemoryTable>,
    /// index name -> table
    indexes: BTreeMap<String, String>,
    ledgers: BTreeMap<String, Vec<LedgerRow>>,
    next_row_id: i64,
}

/// Everything the introspector could observe, for before/after comparisons
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaFacts {
    pub tables: BTreeMap<String, Vec<MemoryColumn>>,
    pub constraints: BTreeSet<(String, String)>,
    pub indexes: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct Shared {
    committed: MemorySchema,
    statements: Vec<String>,
    failures: Vec<String>,
    unavailable: bool,
}

/// An in-memory stand-in for a PostgreSQL pool
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        lock(&self.shared)
    }

    /// Create a table directly in the committed schema
    pub fn create_table(&self, name: &str, columns: &[(&str, &str, bool)]) {
        let table = MemoryTable {
            columns: columns
                .iter()
                .map(|(name, data_type, nullable)| MemoryColumn {
                    name: name.to_string(),
                    data_type: data_type.to_string(),
                    nullable: *nullable,
                })
                .collect(),
            constraints: BTreeSet::new(),
        };
        self.lock().committed.tables.insert(name.to_string(), table);
    }

    /// Fail every later statement whose SQL contains `fragment`
    pub fn fail_on(&self, fragment: &str) {
        self.lock().failures.push(fragment.to_string());
    }

    /// Refuse new connections and transactions
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Every statement attempted so far, in order
    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    pub fn table_exists(&self, table: &str) -> bool {
        self.lock().committed.tables.contains_key(table)
    }

    pub fn column(&self, table: &str, column: &str) -> Option<MemoryColumn> {
        self.lock()
            .committed
            .tables
            .get(table)
            .and_then(|t| t.column(column).cloned())
    }

    pub fn has_constraint(&self, table: &str, constraint: &str) -> bool {
        self.lock()
            .committed
            .tables
            .get(table)
            .map_or(false, |t| t.constraints.contains(constraint))
    }

    pub fn has_index(&self, index: &str) -> bool {
        self.lock().committed.indexes.contains_key(index)
    }

    /// Versions in the ledger table, in insertion order
    pub fn ledger_versions(&self, table: &str) -> Vec<i64> {
        self.lock()
            .committed
            .ledgers
            .get(table)
            .map(|rows| rows.iter().map(|r| r.version).collect())
            .unwrap_or_default()
    }

    pub fn schema_facts(&self) -> SchemaFacts {
        let shared = self.lock();
        let schema = &shared.committed;
        SchemaFacts {
            tables: schema
                .tables
                .iter()
                .map(|(name, table)| (name.clone(), table.columns.clone()))
                .collect(),
            constraints: schema
                .tables
                .iter()
                .flat_map(|(name, table)| table.constraints.iter().map(move |c| (name.clone(), c.clone())))
                .collect(),
            indexes: schema.indexes.keys().cloned().collect(),
        }
    }

    fn check_available(&self) -> DbResult<()> {
        if self.lock().unavailable {
            return Err(DbError::with_code("08006", "connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl DatabasePool for MemoryBackend {
    async fn acquire(&self) -> DbResult<Box<dyn DatabaseExecutor>> {
        self.check_available()?;
        Ok(Box::new(MemoryConnection {
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn begin_transaction(&self) -> DbResult<Box<dyn DatabaseTransaction>> {
        self.check_available()?;
        let working = self.lock().committed.clone();
        Ok(Box::new(MemoryTransaction {
            shared: Arc::clone(&self.shared),
            working,
        }))
    }

    async fn close(&self) {}
}

/// Autocommit connection working directly on the committed schema
struct MemoryConnection {
    shared: Arc<Mutex<Shared>>,
}

#[async_trait]
impl DatabaseExecutor for MemoryConnection {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DbResult<u64> {
        let mut shared = lock(&self.shared);
        let shared = &mut *shared;
        record(&mut shared.statements, &shared.failures, sql)?;
        run(&mut shared.committed, sql, params).map(Outcome::affected)
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> DbResult<Vec<DatabaseRow>> {
        let mut shared = lock(&self.shared);
        let shared = &mut *shared;
        record(&mut shared.statements, &shared.failures, sql)?;
        run(&mut shared.committed, sql, params).map(Outcome::rows)
    }
}

struct MemoryTransaction {
    shared: Arc<Mutex<Shared>>,
    working: MemorySchema,
}

#[async_trait]
impl DatabaseExecutor for MemoryTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DbResult<u64> {
        {
            let mut shared = lock(&self.shared);
            let shared = &mut *shared;
            record(&mut shared.statements, &shared.failures, sql)?;
        }
        run(&mut self.working, sql, params).map(Outcome::affected)
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> DbResult<Vec<DatabaseRow>> {
        {
            let mut shared = lock(&self.shared);
            let shared = &mut *shared;
            record(&mut shared.statements, &shared.failures, sql)?;
        }
        run(&mut self.working, sql, params).map(Outcome::rows)
    }
}

#[async_trait]
impl DatabaseTransaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> DbResult<()> {
        let MemoryTransaction { shared, working } = *self;
        lock(&shared).committed = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DbResult<()> {
        Ok(())
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn record(statements: &mut Vec<String>, failures: &[String], sql: &str) -> DbResult<()> {
    statements.push(sql.to_string());
    match failures.iter().find(|fragment| sql.contains(fragment.as_str())) {
        Some(fragment) => Err(DbError::with_code(
            "XX000",
            format!("injected failure on statement matching '{}'", fragment),
        )),
        None => Ok(()),
    }
}

enum Outcome {
    Affected(u64),
    Rows(Vec<DatabaseRow>),
}

impl Outcome {
    fn affected(self) -> u64 {
        match self {
            Outcome::Affected(n) => n,
            Outcome::Rows(rows) => rows.len() as u64,
        }
    }

    fn rows(self) -> Vec<DatabaseRow> {
        match self {
            Outcome::Affected(_) => Vec::new(),
            Outcome::Rows(rows) => rows,
        }
    }
}

fn ident(caps: &Captures<'_>, index: usize) -> String {
    caps.get(index)
        .map(|m| m.as_str().replace("\"\"", "\""))
        .unwrap_or_default()
}

fn text_param(params: &[DatabaseValue], index: usize) -> DbResult<String> {
    match params.get(index) {
        Some(DatabaseValue::String(s)) => Ok(s.clone()),
        other => Err(DbError::with_code("22023", format!("expected text parameter ${}, got {:?}", index + 1, other))),
    }
}

fn int_param(params: &[DatabaseValue], index: usize) -> DbResult<i64> {
    match params.get(index) {
        Some(DatabaseValue::Int64(i)) => Ok(*i),
        Some(DatabaseValue::Int32(i)) => Ok(i64::from(*i)),
        other => Err(DbError::with_code("22023", format!("expected integer parameter ${}, got {:?}", index + 1, other))),
    }
}

fn flag_row(column: &str, value: bool) -> Outcome {
    Outcome::Rows(vec![DatabaseRow::new(vec![column.to_string()], vec![DatabaseValue::Bool(value)])])
}

fn undefined_table(table: &str) -> DbError {
    DbError::with_code("42P01", format!("relation \"{}\" does not exist", table))
}

fn undefined_column(table: &str, column: &str) -> DbError {
    DbError::with_code(
        "42703",
        format!("column \"{}\" of relation \"{}\" does not exist", column, table),
    )
}

fn parse_column(clause: &str) -> DbResult<MemoryColumn> {
    let caps = COLUMN_CLAUSE
        .captures(clause)
        .ok_or_else(|| DbError::with_code("42601", format!("syntax error in column definition: {}", clause)))?;
    let rest = caps.get(2).map_or("", |m| m.as_str());

    let type_end = [" PRIMARY KEY", " NOT NULL", " DEFAULT"]
        .iter()
        .filter_map(|marker| rest.find(marker))
        .min()
        .unwrap_or(rest.len());

    Ok(MemoryColumn {
        name: ident(&caps, 1),
        data_type: rest[..type_end].to_string(),
        nullable: !(rest.contains(" NOT NULL") || rest.contains(" PRIMARY KEY")),
    })
}

fn check_references(schema: &MemorySchema, own_table: &str, clause: &str) -> DbResult<()> {
    if let Some(caps) = REFERENCES.captures(clause) {
        let target = ident(&caps, 1);
        if target != own_table && !schema.tables.contains_key(&target) {
            return Err(undefined_table(&target));
        }
    }
    Ok(())
}

fn ledger_rows<'a>(schema: &'a mut MemorySchema, table: &str) -> DbResult<&'a mut Vec<LedgerRow>> {
    schema.ledgers.get_mut(table).ok_or_else(|| undefined_table(table))
}

fn table_mut<'a>(schema: &'a mut MemorySchema, table: &str) -> DbResult<&'a mut MemoryTable> {
    schema.tables.get_mut(table).ok_or_else(|| undefined_table(table))
}

fn run(schema: &mut MemorySchema, sql: &str, params: &[DatabaseValue]) -> DbResult<Outcome> {
    if sql.contains("information_schema.tables") {
        let table = text_param(params, 1)?;
        return Ok(flag_row("exists", schema.tables.contains_key(&table)));
    }

    if sql.contains("is_nullable") {
        let table = text_param(params, 1)?;
        let column = text_param(params, 2)?;
        return Ok(match schema.tables.get(&table).and_then(|t| t.column(&column)) {
            Some(col) => flag_row("nullable", col.nullable),
            None => Outcome::Rows(Vec::new()),
        });
    }

    if sql.contains("information_schema.columns") {
        let table = text_param(params, 1)?;
        let column = text_param(params, 2)?;
        let exists = schema
            .tables
            .get(&table)
            .map_or(false, |t| t.column(&column).is_some());
        return Ok(flag_row("exists", exists));
    }

    if let Some(caps) = CREATE_LEDGER.captures(sql) {
        schema.ledgers.entry(ident(&caps, 1)).or_default();
        return Ok(Outcome::Affected(0));
    }

    if let Some(caps) = CREATE_TABLE.captures(sql) {
        let name = ident(&caps, 1);
        if schema.tables.contains_key(&name) {
            return Err(DbError::with_code("42P07", format!("relation \"{}\" already exists", name)));
        }

        let mut table = MemoryTable::default();
        let body = caps.get(2).map_or("", |m| m.as_str());
        for item in body.split(",\n").map(str::trim) {
            if let Some(constraint) = CONSTRAINT_CLAUSE.captures(item) {
                check_references(schema, &name, item)?;
                table.constraints.insert(ident(&constraint, 1));
            } else if !item.starts_with("PRIMARY KEY") {
                let column = parse_column(item)?;
                if table.column(&column.name).is_some() {
                    return Err(DbError::with_code(
                        "42701",
                        format!("column \"{}\" specified more than once", column.name),
                    ));
                }
                table.columns.push(column);
            }
        }
        schema.tables.insert(name, table);
        return Ok(Outcome::Affected(0));
    }

    if let Some(caps) = DROP_TABLE.captures(sql) {
        let name = ident(&caps, 1);
        if schema.tables.remove(&name).is_none() {
            return Err(undefined_table(&name));
        }
        schema.indexes.retain(|_, table| *table != name);
        return Ok(Outcome::Affected(0));
    }

    if let Some(caps) = ADD_COLUMN.captures(sql) {
        let name = ident(&caps, 1);
        let column = parse_column(caps.get(2).map_or("", |m| m.as_str()))?;
        let table = table_mut(schema, &name)?;
        if table.column(&column.name).is_some() {
            return Err(DbError::with_code(
                "42701",
                format!("column \"{}\" of relation \"{}\" already exists", column.name, name),
            ));
        }
        table.columns.push(column);
        return Ok(Outcome::Affected(0));
    }

    if let Some(caps) = DROP_COLUMN.captures(sql) {
        let name = ident(&caps, 1);
        let column = ident(&caps, 2);
        let table = table_mut(schema, &name)?;
        if table.column(&column).is_none() {
            return Err(undefined_column(&name, &column));
        }
        table.columns.retain(|c| c.name != column);
        return Ok(Outcome::Affected(0));
    }

    if let Some(caps) = NULLABILITY.captures(sql) {
        let name = ident(&caps, 1);
        let column = ident(&caps, 2);
        let nullable = caps.get(3).map_or(false, |m| m.as_str() == "DROP");
        table_mut(schema, &name)?.column_mut(&name, &column)?.nullable = nullable;
        return Ok(Outcome::Affected(0));
    }

    if let Some(caps) = COLUMN_TYPE.captures(sql) {
        let name = ident(&caps, 1);
        let column = ident(&caps, 2);
        let data_type = caps.get(3).map_or("", |m| m.as_str()).to_string();
        table_mut(schema, &name)?.column_mut(&name, &column)?.data_type = data_type;
        return Ok(Outcome::Affected(0));
    }

    if let Some(caps) = ADD_CONSTRAINT.captures(sql) {
        let name = ident(&caps, 1);
        let clause = caps.get(2).map_or("", |m| m.as_str());
        let constraint = CONSTRAINT_CLAUSE
            .captures(clause)
            .map(|c| ident(&c, 1))
            .ok_or_else(|| DbError::with_code("42601", format!("syntax error: {}", clause)))?;
        check_references(schema, &name, clause)?;
        let table = table_mut(schema, &name)?;
        if !table.constraints.insert(constraint.clone()) {
            return Err(DbError::with_code(
                "42710",
                format!("constraint \"{}\" for relation \"{}\" already exists", constraint, name),
            ));
        }
        return Ok(Outcome::Affected(0));
    }

    if let Some(caps) = CREATE_INDEX.captures(sql) {
        let index = ident(&caps, 1);
        let table = ident(&caps, 2);
        if !schema.tables.contains_key(&table) {
            return Err(undefined_table(&table));
        }
        schema.indexes.entry(index).or_insert(table);
        return Ok(Outcome::Affected(0));
    }

    if let Some(caps) = DROP_INDEX.captures(sql) {
        schema.indexes.remove(&ident(&caps, 1));
        return Ok(Outcome::Affected(0));
    }

    if let Some(caps) = LEDGER_INSERT.captures(sql) {
        let version = int_param(params, 0)?;
        let name = text_param(params, 1)?;
        schema.next_row_id += 1;
        let id = schema.next_row_id;
        let table = ident(&caps, 1);
        let rows = ledger_rows(schema, &table)?;
        if rows.iter().any(|r| r.version == version) {
            return Err(DbError::with_code(
                "23505",
                format!("duplicate key value violates unique constraint \"{}_version_key\"", table),
            ));
        }
        rows.push(LedgerRow {
            id,
            version,
            name,
            applied_at: Utc::now(),
        });
        return Ok(Outcome::Affected(1));
    }

    if let Some(caps) = LEDGER_DELETE.captures(sql) {
        let version = int_param(params, 0)?;
        let rows = ledger_rows(schema, &ident(&caps, 1))?;
        let before = rows.len();
        rows.retain(|r| r.version != version);
        return Ok(Outcome::Affected((before - rows.len()) as u64));
    }

    if let Some(caps) = LEDGER_EXISTS.captures(sql) {
        let version = int_param(params, 0)?;
        let rows = ledger_rows(schema, &ident(&caps, 1))?;
        return Ok(flag_row("applied", rows.iter().any(|r| r.version == version)));
    }

    if let Some(caps) = LEDGER_SELECT.captures(sql) {
        let descending = caps.get(2).map_or(false, |m| m.as_str() == "DESC");
        let limit = match caps.get(3) {
            Some(_) => usize::try_from(int_param(params, 0)?).unwrap_or(usize::MAX),
            None => usize::MAX,
        };

        let mut rows = ledger_rows(schema, &ident(&caps, 1))?.clone();
        rows.sort_by_key(|r| r.id);
        if descending {
            rows.reverse();
        }

        let columns = vec!["version".to_string(), "name".to_string(), "applied_at".to_string()];
        return Ok(Outcome::Rows(
            rows.into_iter()
                .take(limit)
                .map(|r| {
                    DatabaseRow::new(
                        columns.clone(),
                        vec![
                            DatabaseValue::Int64(r.version),
                            DatabaseValue::String(r.name),
                            DatabaseValue::DateTime(r.applied_at),
                        ],
                    )
                })
                .collect(),
        ));
    }

    Ok(Outcome::Affected(0))
}
