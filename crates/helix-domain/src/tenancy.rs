// Archivo: tenancy.rs
// Propósito: frontera de tenancy. Una organización agrupa bases de datos de
// investigación; cada base de datos es la unidad de aislamiento para roles,
// catálogos, cepas y esquemas de campos.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Organización propietaria de una o más bases de datos.
///
/// `uuid` es el token de identidad que los snapshots llevan embebido: una
/// restauración se rechaza cuando el uuid del documento no coincide con el
/// de la organización destino.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
  pub id: i64,
  pub uuid: Uuid,
  pub name: String,
  pub slug: String,
  pub created_by: Option<i64>,
  pub created_at: DateTime<Utc>,
}

/// Datos para crear una organización. El `uuid` lo genera el repositorio.
#[derive(Debug, Clone)]
pub struct NewOrganization {
  pub name: String,
  pub slug: String,
  pub created_by: Option<i64>,
}

/// Base de datos de investigación: el tenant efectivo de casi todo el
/// modelo (membresías, catálogos, cepas, definiciones de campos).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchDatabase {
  pub id: i64,
  pub organization_id: i64,
  pub name: String,
  pub description: String,
  pub created_by: Option<i64>,
  pub created_at: DateTime<Utc>,
}

/// Datos para crear una base de datos dentro de una organización.
#[derive(Debug, Clone)]
pub struct NewResearchDatabase {
  pub organization_id: i64,
  pub name: String,
  pub description: String,
  pub created_by: Option<i64>,
}

/// Toda entidad con ámbito de tenant expone la base de datos a la que
/// pertenece; los helpers de auditoría y permisos piden el tenant por este
/// trait en lugar de inspeccionar campos concretos.
pub trait TenantScoped {
  /// Id de la `ResearchDatabase` propietaria.
  fn tenant(&self) -> i64;
}

impl TenantScoped for ResearchDatabase {
  fn tenant(&self) -> i64 {
    self.id
  }
}
