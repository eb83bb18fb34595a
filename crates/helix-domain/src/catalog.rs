// Archivo: catalog.rs
// Propósito: entidades de catálogo con ámbito de base de datos (organismos,
// ubicaciones, plásmidos). El importador las resuelve-o-crea por nombre con
// comparación case-insensitive.
use serde::{Deserialize, Serialize};

use crate::tenancy::TenantScoped;

/// Organismo de referencia. `(base de datos, nombre)` es único sin
/// distinguir mayúsculas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organism {
  pub id: i64,
  pub research_database_id: i64,
  pub name: String,
}

impl TenantScoped for Organism {
  fn tenant(&self) -> i64 {
    self.research_database_id
  }
}

/// Ubicación física de almacenamiento. La tupla completa
/// `(building, room, freezer, box, position)` es única por base de datos.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
  pub id: i64,
  pub research_database_id: i64,
  pub building: String,
  pub room: String,
  pub freezer: String,
  #[serde(rename = "box")]
  pub box_label: String,
  pub position: String,
}

impl Location {
  /// Etiqueta legible, en el mismo orden que la tupla de unicidad.
  pub fn display(&self) -> String {
    [&self.building, &self.room, &self.freezer, &self.box_label, &self.position].iter()
                                                                                .filter(|part| !part.is_empty())
                                                                                .map(|part| part.as_str())
                                                                                .collect::<Vec<_>>()
                                                                                .join(" / ")
  }
}

impl TenantScoped for Location {
  fn tenant(&self) -> i64 {
    self.research_database_id
  }
}

/// Datos para crear una ubicación.
#[derive(Debug, Clone)]
pub struct NewLocation {
  pub research_database_id: i64,
  pub building: String,
  pub room: String,
  pub freezer: String,
  pub box_label: String,
  pub position: String,
}

/// Plásmido del catálogo. `(base de datos, nombre)` único sin distinguir
/// mayúsculas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plasmid {
  pub id: i64,
  pub research_database_id: i64,
  pub name: String,
  pub resistance_marker: String,
  pub notes: String,
}

impl TenantScoped for Plasmid {
  fn tenant(&self) -> i64 {
    self.research_database_id
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn location_display_skips_blank_parts() {
    let loc = Location { id: 1,
                         research_database_id: 1,
                         building: String::new(),
                         room: String::new(),
                         freezer: String::new(),
                         box_label: "Box 3".into(),
                         position: "A1".into() };
    assert_eq!(loc.display(), "Box 3 / A1");
  }
}
