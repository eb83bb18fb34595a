use thiserror::Error;

// Errores comunes de las operaciones por lotes.
//
// Este enum centraliza los errores que pueden ocurrir durante una
// importación CSV o una exportación/restauración de snapshot: errores del
// dominio, de parseo CSV, del archivo zip y de serialización JSON.
#[derive(Error, Debug)]
pub enum WorkflowError {
  /// Errores originados por el dominio o la persistencia.
  #[error("Error de dominio: {0}")]
  Domain(#[from] helix_domain::DomainError),

  /// Errores del formulario dinámico (guardado de valores).
  #[error("Error de formulario: {0}")]
  Form(#[from] helix_forms::FormError),

  /// Errores de parseo del fichero CSV.
  #[error("Error de CSV: {0}")]
  Csv(#[from] csv::Error),

  /// Errores del archivo zip del snapshot.
  #[error("Error de zip: {0}")]
  Zip(#[from] zip::result::ZipError),

  /// Errores de serialización/deserialización JSON.
  #[error("Error de serialización: {0}")]
  Serialization(#[from] serde_json::Error),

  /// Errores de E/S al leer o escribir el archivo.
  #[error("Error de E/S: {0}")]
  Io(#[from] std::io::Error),

  /// Errores de validación locales del flujo (cabecera ausente, documento
  /// malformado).
  #[error("Error de validación: {0}")]
  Validation(String),
}

/// Alias de resultado usado por las APIs del crate.
pub type Result<T> = std::result::Result<T, WorkflowError>;
