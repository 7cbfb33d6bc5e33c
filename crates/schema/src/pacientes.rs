use tern_migrate::{ColumnDef, Migration, TableDef};

pub fn create_pacientes() -> Migration {
    Migration::new(1712000000000, "create_pacientes").create_table(
        TableDef::new("pacientes")
            .column(ColumnDef::new("nome", "TEXT").not_null())
            .column(ColumnDef::new("telefone", "VARCHAR(15)"))
            .column(ColumnDef::new("nascimento", "DATE"))
            .timestamps(),
    )
}

pub fn add_cor_to_pacientes() -> Migration {
    Migration::new(1712000200000, "add_cor_to_pacientes")
        .add_column("pacientes", ColumnDef::new("cor", "VARCHAR(20)"))
}

/// Narrowing back to 15 on revert fails if longer numbers were stored
pub fn widen_telefone_on_pacientes() -> Migration {
    Migration::new(1712000400000, "widen_telefone_on_pacientes").change_column_type(
        "pacientes",
        "telefone",
        "VARCHAR(15)",
        "VARCHAR(20)",
    )
}
