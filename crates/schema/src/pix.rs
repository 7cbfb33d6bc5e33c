use tern_migrate::{ColumnDef, IndexDef, Migration, ReferentialAction, TableDef};

pub fn create_pix_transactions() -> Migration {
    Migration::new(1712000100000, "create_pix_transactions").create_table(
        TableDef::new("pix_transactions")
            .column(ColumnDef::new("userId", "UUID").not_null())
            .column(ColumnDef::new("pacienteId", "UUID").not_null())
            .column(ColumnDef::new("txid", "VARCHAR(35)"))
            .column(ColumnDef::new("valor", "NUMERIC(10,2)").not_null())
            .column(
                ColumnDef::new("status", "VARCHAR(20)")
                    .not_null()
                    .default("'pendente'"),
            )
            .timestamps()
            .foreign_key("pacienteId", "pacientes", "id", ReferentialAction::Cascade),
    )
}

/// Transactions created by the webhook have no user yet
pub fn allow_null_user_id_on_pix_transactions() -> Migration {
    Migration::new(1712000300000, "allow_null_user_id_on_pix_transactions")
        .set_nullability("pix_transactions", "userId", true)
}

pub fn unique_txid_on_pix_transactions() -> Migration {
    Migration::new(1712000500000, "unique_txid_on_pix_transactions").create_unique_index(IndexDef::new(
        "uq_pix_transactions_txid",
        "pix_transactions",
        &["txid"],
    ))
}
