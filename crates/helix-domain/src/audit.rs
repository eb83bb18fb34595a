// Archivo: audit.rs
// Propósito: bitácora append-only. Cada ruta de mutación registra una
// entrada con actor explícito; no existe estado ambiente de "usuario
// actual".
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Acciones registradas por las rutas de mutación del núcleo.
pub mod actions {
  pub const STRAIN_CREATE: &str = "STRAIN_CREATE";
  pub const STRAIN_UPDATE: &str = "STRAIN_UPDATE";
  pub const STRAIN_DELETE: &str = "STRAIN_DELETE";
  pub const IMPORT_STRAIN: &str = "IMPORT_STRAIN";
  pub const AUTO_CREATE_ORGANISM: &str = "AUTO_CREATE_ORGANISM";
  pub const AUTO_CREATE_PLASMID: &str = "AUTO_CREATE_PLASMID";
  pub const ORGANIZATION_SNAPSHOT_RESTORE: &str = "organization_snapshot_restore";
}

/// Entrada de auditoría persistida. Inmutable tras su creación.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLog {
  pub id: i64,
  /// `None` para entradas de nivel organización (p. ej. una restauración).
  pub database_id: Option<i64>,
  pub user_id: Option<i64>,
  pub action: String,
  pub object_type: String,
  pub object_id: Option<String>,
  pub metadata: JsonValue,
  pub timestamp: DateTime<Utc>,
}

/// Datos para registrar una entrada. El timestamp lo asigna el repositorio
/// salvo que una restauración reponga el original.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
  pub database_id: Option<i64>,
  pub user_id: Option<i64>,
  pub action: String,
  pub object_type: String,
  pub object_id: Option<String>,
  pub metadata: JsonValue,
  pub timestamp: Option<DateTime<Utc>>,
}

impl NewAuditEntry {
  pub fn new(database_id: Option<i64>, user_id: Option<i64>, action: impl Into<String>) -> Self {
    Self { database_id,
           user_id,
           action: action.into(),
           object_type: String::new(),
           object_id: None,
           metadata: JsonValue::Null,
           timestamp: None }
  }

  pub fn about(mut self, object_type: impl Into<String>, object_id: impl Into<String>) -> Self {
    self.object_type = object_type.into();
    self.object_id = Some(object_id.into());
    self
  }

  pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
    self.metadata = metadata;
    self
  }
}
