// Archivo: spec.rs
// Propósito: construir el conjunto de campos editables para un rol dado.
// Un campo invisible para el rol no se emite en absoluto (no llega al
// cliente); uno no editable se emite marcado de sólo lectura.
use serde::Serialize;
use serde_json::Value as JsonValue;

use helix_domain::{ConditionalLogic, DatabaseRole, FieldType, HelixRepository, RelatedEntityKind, ResearchDatabase,
                   Strain};

use crate::errors::Result;

/// Opción de una referencia FOREIGN_KEY: id y etiqueta legible.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelatedOption {
  pub id: i64,
  pub label: String,
}

/// Campo listo para renderizar. Lleva todo lo que una capa de presentación
/// necesita para elegir el control adecuado sin volver a consultar el
/// esquema.
#[derive(Debug, Clone, Serialize)]
pub struct FieldSpec {
  pub definition_id: i64,
  pub key: String,
  pub label: String,
  pub field_type: FieldType,
  pub required: bool,
  pub read_only: bool,
  pub is_unique: bool,
  pub help_text: String,
  /// Sólo para tipos select.
  pub choices: Vec<String>,
  /// Sólo para FOREIGN_KEY.
  pub related_model: Option<RelatedEntityKind>,
  /// Opciones de la entidad relacionada, acotadas a la base de datos.
  pub related_options: Vec<RelatedOption>,
  pub conditional_logic: Option<ConditionalLogic>,
  pub group_name: Option<String>,
  pub order: i32,
  /// Valor inicial en forma de cable: el valor existente, o el valor por
  /// defecto de la definición cuando el registro es nuevo.
  pub initial: Option<JsonValue>,
}

/// Construye los campos editables para `acting_role` en orden de esquema.
///
/// El valor existente (si lo hay) viaja como inicial; si el registro es
/// nuevo y la definición declara `default_value`, ese es el inicial.
pub fn build_editable_fields(repo: &dyn HelixRepository,
                             database: &ResearchDatabase,
                             acting_role: Option<DatabaseRole>,
                             existing: Option<&Strain>)
                             -> Result<Vec<FieldSpec>> {
  let definitions = repo.list_field_definitions(database.id).map_err(crate::errors::FormError::Domain)?;
  let existing_values = match existing {
    Some(strain) => repo.field_values_for_strain(strain.id).map_err(crate::errors::FormError::Domain)?,
    None => Vec::new(),
  };

  let mut specs = Vec::new();
  for definition in definitions {
    if !definition.is_visible_to(acting_role) {
      continue;
    }
    let read_only = !definition.is_editable_by(acting_role);
    let stored = existing_values.iter().find(|v| v.field_definition_id == definition.id);
    let initial = match stored {
      Some(row) => Some(row.value.to_wire()),
      None if existing.is_none() && !definition.default_value.is_null() => Some(definition.default_value.clone()),
      None => None,
    };
    let related_options = match definition.related_model {
      Some(kind) => related_options(repo, database.id, kind)?,
      None => Vec::new(),
    };
    specs.push(FieldSpec { definition_id: definition.id,
                           key: definition.key.clone(),
                           label: definition.name.clone(),
                           field_type: definition.field_type,
                           required: definition.required(),
                           read_only,
                           is_unique: definition.is_unique,
                           help_text: definition.help_text.clone(),
                           choices: definition.parsed_choices(),
                           related_model: definition.related_model,
                           related_options,
                           conditional_logic: definition.conditional_logic.clone(),
                           group_name: definition.group_name.clone(),
                           order: definition.order,
                           initial });
  }
  Ok(specs)
}

fn related_options(repo: &dyn HelixRepository, database_id: i64, kind: RelatedEntityKind) -> Result<Vec<RelatedOption>> {
  let map_err = crate::errors::FormError::Domain;
  let options = match kind {
    RelatedEntityKind::Organism => repo.list_organisms(database_id)
                                       .map_err(map_err)?
                                       .into_iter()
                                       .map(|o| RelatedOption { id: o.id, label: o.name })
                                       .collect(),
    RelatedEntityKind::Plasmid => repo.list_plasmids(database_id)
                                      .map_err(map_err)?
                                      .into_iter()
                                      .map(|p| RelatedOption { id: p.id, label: p.name })
                                      .collect(),
    RelatedEntityKind::Location => repo.list_locations(database_id)
                                       .map_err(map_err)?
                                       .into_iter()
                                       .map(|l| RelatedOption { id: l.id, label: l.display() })
                                       .collect(),
  };
  Ok(options)
}
