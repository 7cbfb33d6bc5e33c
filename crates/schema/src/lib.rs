//! # tern-schema
//!
//! Every migration the clinic database has ever shipped. Versions are
//! millisecond timestamps taken when a unit was written; never edit or
//! renumber a unit once it has been deployed, add a new one instead.

mod pacientes;
mod pix;

use tern_migrate::{MigrationRegistry, MigrationResult, MigrationUnit};

/// All units, in no particular order; the registry sorts them
pub fn units() -> Vec<Box<dyn MigrationUnit>> {
    vec![
        Box::new(pacientes::create_pacientes()),
        Box::new(pix::create_pix_transactions()),
        Box::new(pacientes::add_cor_to_pacientes()),
        Box::new(pix::allow_null_user_id_on_pix_transactions()),
        Box::new(pacientes::widen_telefone_on_pacientes()),
        Box::new(pix::unique_txid_on_pix_transactions()),
    ]
}

/// The application's migration registry
pub fn registry() -> MigrationResult<MigrationRegistry> {
    MigrationRegistry::new(units())
}
