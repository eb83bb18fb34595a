//! Crate `helix-workflow` — operaciones por lotes del inventario
//!
//! Compone el dominio y el repositorio en las dos operaciones multi-fila
//! del sistema:
//! - importación CSV con reconciliación (mapeo de columnas, validación por
//!   fila, auto-creación idempotente de entidades de consulta, conteo de
//!   creadas/saltadas);
//! - exportación/restauración de snapshots de organización (documento JSON
//!   versionado dentro de un zip, restauración transaccional con remapeo
//!   de ids y resolución de usuarios por id/username/email).
pub mod errors;
pub mod import;
pub mod snapshot;

pub use errors::{Result, WorkflowError};
pub use import::{build_mapped_rows, import_rows, parse_csv, parse_custom_field_value, parse_location_value,
                 resolve_or_create_organism, resolve_or_create_plasmid, ImportOutcome, CUSTOM_FIELD_PREFIX,
                 REQUIRED_IMPORT_FIELDS, STANDARD_IMPORT_FIELDS};
pub use snapshot::{export_organization, make_snapshot_zip, read_snapshot_zip, restore_organization, SnapshotDocument,
                   SNAPSHOT_MEMBER, SNAPSHOT_VERSION};
