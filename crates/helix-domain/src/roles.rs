// Archivo: roles.rs
// Propósito: modelo de roles y resolución de rol efectivo. El resolver
// falla cerrado: ausencia de membresía, ámbito desconocido o error del
// repositorio devuelven `None`, nunca propagan.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, Result};
use crate::repository::HelixRepository;
use crate::users::User;

/// Rol por base de datos, ordenado por privilegio ascendente
/// (`Viewer < Editor < Admin < Owner`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseRole {
  Viewer,
  Editor,
  Admin,
  Owner,
}

impl DatabaseRole {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Viewer => "viewer",
      Self::Editor => "editor",
      Self::Admin => "admin",
      Self::Owner => "owner",
    }
  }

  pub fn parse(raw: &str) -> Option<Self> {
    match raw {
      "viewer" => Some(Self::Viewer),
      "editor" => Some(Self::Editor),
      "admin" => Some(Self::Admin),
      "owner" => Some(Self::Owner),
      _ => None,
    }
  }

  /// Roles que pueden modificar registros.
  pub fn can_edit(&self) -> bool {
    *self >= Self::Editor
  }

  /// Roles que pueden administrar membresías y esquemas de campos.
  pub fn can_manage(&self) -> bool {
    *self >= Self::Admin
  }
}

/// Rol por organización (`Member < Admin`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrganizationRole {
  Member,
  Admin,
}

impl OrganizationRole {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Member => "member",
      Self::Admin => "admin",
    }
  }

  pub fn parse(raw: &str) -> Option<Self> {
    match raw {
      "member" => Some(Self::Member),
      "admin" => Some(Self::Admin),
      _ => None,
    }
  }
}

/// Membresía (usuario, base de datos) → rol. Única por par.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseMembership {
  pub id: i64,
  pub research_database_id: i64,
  pub user_id: i64,
  pub role: DatabaseRole,
  pub created_at: DateTime<Utc>,
}

/// Membresía (usuario, organización) → rol. Única por par.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationMembership {
  pub id: i64,
  pub organization_id: i64,
  pub user_id: i64,
  pub role: OrganizationRole,
  pub joined_at: DateTime<Utc>,
}

/// Resuelve el rol efectivo de `user` sobre una base de datos.
///
/// Un superusuario global recibe `Owner` sin consultar membresías. En
/// cualquier otro caso decide la fila única de membresía; su ausencia, una
/// base de datos inexistente o un fallo del repositorio devuelven `None`.
pub fn resolve_database_role(repo: &dyn HelixRepository, user: &User, database_id: i64) -> Option<DatabaseRole> {
  if user.is_superuser {
    return Some(DatabaseRole::Owner);
  }
  match repo.find_database_membership(database_id, user.id) {
    Ok(membership) => membership.map(|m| m.role),
    Err(_) => None,
  }
}

/// Resuelve el rol efectivo de `user` sobre una organización. Mismas
/// reglas de cierre que [`resolve_database_role`].
pub fn resolve_organization_role(repo: &dyn HelixRepository, user: &User, organization_id: i64) -> Option<OrganizationRole> {
  if user.is_superuser {
    return Some(OrganizationRole::Admin);
  }
  match repo.find_organization_membership(organization_id, user.id) {
    Ok(membership) => membership.map(|m| m.role),
    Err(_) => None,
  }
}

/// `true` si el rol efectivo del usuario está dentro de `allowed`.
pub fn user_has_role(repo: &dyn HelixRepository, user: &User, database_id: i64, allowed: &[DatabaseRole]) -> bool {
  match resolve_database_role(repo, user, database_id) {
    Some(role) => allowed.contains(&role),
    None => false,
  }
}

/// Variante de umbral: `true` si el rol efectivo es al menos `minimum`.
pub fn role_at_least(repo: &dyn HelixRepository, user: &User, database_id: i64, minimum: DatabaseRole) -> bool {
  matches!(resolve_database_role(repo, user, database_id), Some(role) if role >= minimum)
}

/// Exige uno de los roles permitidos y devuelve el rol efectivo; en caso
/// contrario `DomainError::Permission`, distinguible de una validación.
pub fn require_database_role(repo: &dyn HelixRepository,
                             user: &User,
                             database_id: i64,
                             allowed: &[DatabaseRole])
                             -> Result<DatabaseRole> {
  match resolve_database_role(repo, user, database_id) {
    Some(role) if allowed.contains(&role) => Ok(role),
    _ => Err(DomainError::Permission("No tienes permiso para esta operación.".to_string())),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn database_role_privilege_ordering() {
    assert!(DatabaseRole::Owner > DatabaseRole::Admin);
    assert!(DatabaseRole::Admin > DatabaseRole::Editor);
    assert!(DatabaseRole::Editor > DatabaseRole::Viewer);
    assert!(!DatabaseRole::Viewer.can_edit());
    assert!(DatabaseRole::Editor.can_edit());
    assert!(!DatabaseRole::Editor.can_manage());
    assert!(DatabaseRole::Owner.can_manage());
  }

  #[test]
  fn role_round_trips_through_str() {
    for role in [DatabaseRole::Viewer, DatabaseRole::Editor, DatabaseRole::Admin, DatabaseRole::Owner] {
      assert_eq!(DatabaseRole::parse(role.as_str()), Some(role));
    }
    assert_eq!(DatabaseRole::parse("root"), None);
    for role in [OrganizationRole::Member, OrganizationRole::Admin] {
      assert_eq!(OrganizationRole::parse(role.as_str()), Some(role));
    }
  }
}
