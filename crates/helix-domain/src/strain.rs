// Archivo: strain.rs
// Propósito: la cepa es el único registro que lleva valores de campos
// personalizados en esta versión. Sus valores se borran en cascada con el
// registro.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tenancy::TenantScoped;

/// Estado de ciclo de vida de una cepa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrainStatus {
  Active,
  Archived,
  Disposed,
}

impl StrainStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Active => "active",
      Self::Archived => "archived",
      Self::Disposed => "disposed",
    }
  }

  pub fn parse(raw: &str) -> Option<Self> {
    match raw {
      "active" => Some(Self::Active),
      "archived" => Some(Self::Archived),
      "disposed" => Some(Self::Disposed),
      _ => None,
    }
  }
}

/// Cepa de laboratorio. `strain_id` es la clave natural, única por base de
/// datos sin distinguir mayúsculas; la unicidad cubre también filas
/// archivadas, por eso el importador consulta sin filtrar `is_active`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strain {
  pub id: i64,
  pub research_database_id: i64,
  pub strain_id: String,
  pub name: String,
  pub organism_id: i64,
  pub genotype: String,
  pub selective_marker: String,
  pub comments: String,
  pub location_id: i64,
  pub status: StrainStatus,
  pub created_by: Option<i64>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub is_active: bool,
  pub is_archived: bool,
  pub archived_at: Option<DateTime<Utc>>,
  pub archived_by: Option<i64>,
}

impl TenantScoped for Strain {
  fn tenant(&self) -> i64 {
    self.research_database_id
  }
}

/// Datos para crear una cepa. Los timestamps y flags de archivo los
/// completa el repositorio salvo que una restauración los imponga.
#[derive(Debug, Clone)]
pub struct NewStrain {
  pub research_database_id: i64,
  pub strain_id: String,
  pub name: String,
  pub organism_id: i64,
  pub genotype: String,
  pub selective_marker: String,
  pub comments: String,
  pub location_id: i64,
  pub status: StrainStatus,
  pub created_by: Option<i64>,
  pub is_active: bool,
  pub is_archived: bool,
  pub archived_at: Option<DateTime<Utc>>,
  pub archived_by: Option<i64>,
}

impl NewStrain {
  /// Cepa activa con los campos de archivo en su valor por defecto.
  pub fn active(research_database_id: i64,
                strain_id: impl Into<String>,
                name: impl Into<String>,
                organism_id: i64,
                location_id: i64,
                created_by: Option<i64>)
                -> Self {
    Self { research_database_id,
           strain_id: strain_id.into(),
           name: name.into(),
           organism_id,
           genotype: String::new(),
           selective_marker: String::new(),
           comments: String::new(),
           location_id,
           status: StrainStatus::Active,
           created_by,
           is_active: true,
           is_archived: false,
           archived_at: None,
           archived_by: None }
  }
}

/// Vínculo muchos-a-muchos cepa ↔ plásmido. Único por par.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrainPlasmid {
  pub id: i64,
  pub strain_id: i64,
  pub plasmid_id: i64,
}
