//! Schema Builder - descriptors for tables, columns, keys and indexes
//!
//! Every identifier is double-quoted when rendered, so mixed-case names such
//! as `"userId"` keep their case.

/// Quote an identifier for PostgreSQL
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn quote_list(idents: &[String]) -> String {
    idents
        .iter()
        .map(|i| quote_ident(i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A column definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    /// SQL type, e.g. `VARCHAR(20)` or `UUID`
    pub data_type: String,
    pub nullable: bool,
    /// Raw SQL default expression, e.g. `'branco'` or `NOW()`
    pub default: Option<String>,
}

impl ColumnDef {
    /// A nullable column without default
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default(mut self, expression: impl Into<String>) -> Self {
        self.default = Some(expression.into());
        self
    }

    /// Column clause as used in `CREATE TABLE` and `ADD COLUMN`
    pub fn to_sql(&self) -> String {
        let mut sql = format!("{} {}", quote_ident(&self.name), self.data_type);
        if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        sql
    }
}

/// Referential action for foreign keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }
}

/// A named foreign key constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub name: String,
    pub column: String,
    pub references_table: String,
    pub references_column: String,
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
}

impl ForeignKey {
    /// Foreign key named `fk_{table}_{column}`
    pub fn new(
        table: &str,
        column: impl Into<String>,
        references_table: impl Into<String>,
        references_column: impl Into<String>,
    ) -> Self {
        let column = column.into();
        Self {
            name: format!("fk_{}_{}", table, column),
            column,
            references_table: references_table.into(),
            references_column: references_column.into(),
            on_delete: ReferentialAction::NoAction,
            on_update: ReferentialAction::NoAction,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = action;
        self
    }

    pub fn on_update(mut self, action: ReferentialAction) -> Self {
        self.on_update = action;
        self
    }

    /// `CONSTRAINT ... FOREIGN KEY ...` clause
    pub fn constraint_sql(&self) -> String {
        format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {}",
            quote_ident(&self.name),
            quote_ident(&self.column),
            quote_ident(&self.references_table),
            quote_ident(&self.references_column),
            self.on_delete.as_sql(),
            self.on_update.as_sql()
        )
    }
}

/// Primary key strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimaryKey {
    /// `UUID` column filled by `gen_random_uuid()`
    GeneratedUuid(String),
    /// Existing columns declared in the table
    Columns(Vec<String>),
    None,
}

/// A table definition for `CREATE TABLE`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    pub primary_key: PrimaryKey,
    pub columns: Vec<ColumnDef>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableDef {
    /// A table keyed by a generated UUID column named `id`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: PrimaryKey::GeneratedUuid("id".to_string()),
            columns: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn primary_key(mut self, primary_key: PrimaryKey) -> Self {
        self.primary_key = primary_key;
        self
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Add `created_at` / `updated_at` columns
    pub fn timestamps(self) -> Self {
        self.column(ColumnDef::new("created_at", "TIMESTAMPTZ").not_null().default("NOW()"))
            .column(ColumnDef::new("updated_at", "TIMESTAMPTZ").not_null().default("NOW()"))
    }

    /// Add a foreign key on `column` referencing `references_table(references_column)`
    pub fn foreign_key(
        mut self,
        column: impl Into<String>,
        references_table: impl Into<String>,
        references_column: impl Into<String>,
        on_delete: ReferentialAction,
    ) -> Self {
        let fk = ForeignKey::new(&self.name, column, references_table, references_column)
            .on_delete(on_delete);
        self.foreign_keys.push(fk);
        self
    }

    /// Build the CREATE TABLE SQL
    pub fn create_sql(&self) -> String {
        let mut parts = Vec::new();

        if let PrimaryKey::GeneratedUuid(column) = &self.primary_key {
            parts.push(format!(
                "{} UUID PRIMARY KEY DEFAULT gen_random_uuid()",
                quote_ident(column)
            ));
        }
        parts.extend(self.columns.iter().map(ColumnDef::to_sql));
        if let PrimaryKey::Columns(columns) = &self.primary_key {
            parts.push(format!("PRIMARY KEY ({})", quote_list(columns)));
        }
        parts.extend(self.foreign_keys.iter().map(ForeignKey::constraint_sql));

        format!(
            "CREATE TABLE {} (\n    {}\n)",
            quote_ident(&self.name),
            parts.join(",\n    ")
        )
    }

    pub fn drop_sql(&self) -> String {
        drop_table_sql(&self.name)
    }
}

/// A unique index definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
}

impl IndexDef {
    pub fn new(name: impl Into<String>, table: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn create_sql(&self) -> String {
        format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({})",
            quote_ident(&self.name),
            quote_ident(&self.table),
            quote_list(&self.columns)
        )
    }

    pub fn drop_sql(&self) -> String {
        format!("DROP INDEX IF EXISTS {}", quote_ident(&self.name))
    }
}

pub fn add_column_sql(table: &str, column: &ColumnDef) -> String {
    format!("ALTER TABLE {} ADD COLUMN {}", quote_ident(table), column.to_sql())
}

pub fn drop_column_sql(table: &str, column: &str) -> String {
    format!(
        "ALTER TABLE {} DROP COLUMN {}",
        quote_ident(table),
        quote_ident(column)
    )
}

pub fn set_nullability_sql(table: &str, column: &str, nullable: bool) -> String {
    format!(
        "ALTER TABLE {} ALTER COLUMN {} {}",
        quote_ident(table),
        quote_ident(column),
        if nullable { "DROP NOT NULL" } else { "SET NOT NULL" }
    )
}

pub fn alter_column_type_sql(table: &str, column: &str, data_type: &str) -> String {
    format!(
        "ALTER TABLE {} ALTER COLUMN {} TYPE {}",
        quote_ident(table),
        quote_ident(column),
        data_type
    )
}

pub fn add_foreign_key_sql(table: &str, fk: &ForeignKey) -> String {
    format!("ALTER TABLE {} ADD {}", quote_ident(table), fk.constraint_sql())
}

pub fn drop_table_sql(table: &str) -> String {
    format!("DROP TABLE {}", quote_ident(table))
}
