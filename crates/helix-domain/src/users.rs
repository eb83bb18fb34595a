// Archivo: users.rs
// Propósito: registro mínimo del directorio de usuarios. El núcleo trata la
// autenticación como un colaborador externo; aquí sólo viven los datos que
// las resoluciones de rol y de snapshot necesitan.
use serde::{Deserialize, Serialize};

/// Usuario del directorio externo.
///
/// `is_superuser` activa el override global del resolver de roles: un
/// superusuario recibe siempre el rol máximo del ámbito consultado.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
  pub id: i64,
  pub username: String,
  pub email: String,
  pub is_superuser: bool,
}

/// Datos para registrar un usuario en el directorio.
#[derive(Debug, Clone)]
pub struct NewUser {
  pub username: String,
  pub email: String,
  pub is_superuser: bool,
}

impl NewUser {
  pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
    Self { username: username.into(), email: email.into(), is_superuser: false }
  }

  pub fn superuser(username: impl Into<String>, email: impl Into<String>) -> Self {
    Self { username: username.into(), email: email.into(), is_superuser: true }
  }
}
