// Archivo: errors.rs
// Propósito: definir los errores del dominio y el alias Result<T> usado por
// las APIs del crate.
use thiserror::Error;

/// Errores comunes del dominio de inventario.
///
/// - `Validation`: entrada corregible por el usuario, atribuida a un campo
///   cuando es posible.
/// - `Permission`: el rol del usuario no permite la operación.
/// - `Conflict`: colisión de unicidad en el almacén, o snapshot con versión
///   u organización incompatible (se lanza antes de mutar nada).
/// - `NotFound`: entidad no encontrada.
/// - `Storage`: error al acceder al almacenamiento externo.
#[derive(Error, Debug, Clone)]
pub enum DomainError {
  /// Problema de entrada corregible; `field` es la clave del campo afectado
  /// cuando se conoce.
  #[error("Error de validación: {message}")]
  Validation { field: Option<String>, message: String },
  /// El rol efectivo no permite la operación.
  #[error("Permiso denegado: {0}")]
  Permission(String),
  /// Colisión de unicidad o incompatibilidad de snapshot.
  #[error("Conflicto: {0}")]
  Conflict(String),
  /// Entidad no encontrada (base de datos, cepa, definición, etc.).
  #[error("No encontrado: {0}")]
  NotFound(String),
  /// Error genérico de almacenamiento (BD, pool, etc.).
  #[error("Error de almacenamiento: {0}")]
  Storage(String),
}

impl DomainError {
  /// Error de validación sin campo asociado.
  pub fn validation(message: impl Into<String>) -> Self {
    Self::Validation { field: None, message: message.into() }
  }

  /// Error de validación atribuido a un campo concreto.
  pub fn field_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
    Self::Validation { field: Some(field.into()), message: message.into() }
  }
}

impl From<serde_json::Error> for DomainError {
  fn from(e: serde_json::Error) -> Self {
    Self::validation(format!("JSON inválido: {}", e))
  }
}

/// Alias de resultado usado por las APIs del crate.
pub type Result<T> = std::result::Result<T, DomainError>;
