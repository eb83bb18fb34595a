// Archivo: errors.rs
// Propósito: errores del constructor de formularios. Las validaciones se
// acumulan por campo para que el llamador pueda pintarlas junto al control
// correspondiente; nada se escribe cuando hay al menos una.
use helix_domain::DomainError;
use thiserror::Error;

/// Error de validación atribuido a un campo concreto (o general cuando
/// `field` es `None`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
  pub field: Option<String>,
  pub message: String,
}

impl From<DomainError> for FieldError {
  fn from(e: DomainError) -> Self {
    match e {
      DomainError::Validation { field, message } => Self { field, message },
      other => Self { field: None, message: other.to_string() },
    }
  }
}

/// Errores del guardado dinámico de valores.
#[derive(Error, Debug)]
pub enum FormError {
  /// Una o más validaciones fallaron; el registro no se guardó.
  #[error("El formulario tiene {} error(es) de validación", .0.len())]
  Invalid(Vec<FieldError>),
  /// Error propagado del dominio o del almacenamiento.
  #[error(transparent)]
  Domain(#[from] DomainError),
}

impl FormError {
  /// Errores de campo, vacío para la variante `Domain`.
  pub fn field_errors(&self) -> &[FieldError] {
    match self {
      Self::Invalid(errors) => errors,
      Self::Domain(_) => &[],
    }
  }
}

pub type Result<T> = std::result::Result<T, FormError>;
