// Archivo: import.rs
// Propósito: reconciliación de importaciones CSV. Cada fila se procesa de
// forma independiente dentro de la transacción del lote: el fallo de una
// fila la salta (se cuenta) sin abortar el resto. Las entidades de consulta
// ausentes (organismo, plásmido, ubicación) se crean automáticamente de
// forma idempotente frente a importadores concurrentes.
use std::collections::HashMap;

use log::{debug, info};
use serde_json::{json, Value as JsonValue};

use helix_domain::{actions, DomainError, FieldDefinition, FieldType, FieldValue, FieldValueWrite, HelixRepository,
                   Location, NewAuditEntry, NewLocation, NewStrain, Organism, Plasmid, ResearchDatabase, User};

use crate::errors::{Result, WorkflowError};

/// Campos estándar mapeables desde columnas CSV: `(clave, etiqueta)`.
pub const STANDARD_IMPORT_FIELDS: &[(&str, &str)] = &[("strain_id", "Strain ID"),
                                                      ("location", "Location"),
                                                      ("organism", "Organism"),
                                                      ("genotype", "Genotype"),
                                                      ("plasmids", "Plasmids"),
                                                      ("selective_marker", "Selective marker"),
                                                      ("comments", "Comments")];

/// Campos sin los cuales una fila se salta.
pub const REQUIRED_IMPORT_FIELDS: &[&str] = &["strain_id", "organism", "genotype", "location"];

/// Prefijo de mapeo hacia definiciones de campos personalizados.
pub const CUSTOM_FIELD_PREFIX: &str = "custom:";

/// Resultado de un lote de importación.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImportOutcome {
  pub created: usize,
  pub skipped: usize,
}

/// Parsea el fichero subido: UTF-8 (tolerante a BOM), separado por comas,
/// con fila de cabecera obligatoria. Cabeceras y celdas llegan recortadas.
pub fn parse_csv(content: &[u8]) -> Result<(Vec<String>, Vec<HashMap<String, String>>)> {
  let text = std::str::from_utf8(content).map_err(|_| WorkflowError::Validation("El CSV debe ser UTF-8.".into()))?;
  let text = text.strip_prefix('\u{feff}').unwrap_or(text);

  let mut reader = csv::ReaderBuilder::new().has_headers(true).flexible(true).from_reader(text.as_bytes());
  let headers: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
  if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
    return Err(WorkflowError::Validation("El fichero CSV debe incluir una fila de cabecera.".into()));
  }

  let mut rows = Vec::new();
  for record in reader.records() {
    let record = record?;
    let mut row = HashMap::new();
    for (i, header) in headers.iter().enumerate() {
      let value = record.get(i).unwrap_or("").trim().to_string();
      row.insert(header.clone(), value);
    }
    rows.push(row);
  }
  Ok((headers, rows))
}

/// Aplica el mapeo columna CSV → campo destino elegido por el usuario.
/// Las columnas sin mapear se descartan; los valores llegan recortados.
pub fn build_mapped_rows(rows: &[HashMap<String, String>],
                         column_mapping: &HashMap<String, String>)
                         -> Vec<HashMap<String, String>> {
  rows.iter()
      .map(|row| {
        let mut mapped = HashMap::new();
        for (csv_column, mapped_field) in column_mapping {
          if mapped_field.is_empty() {
            continue;
          }
          let value = row.get(csv_column).map(|v| v.trim()).unwrap_or("");
          mapped.insert(mapped_field.clone(), value.to_string());
        }
        mapped
      })
      .collect()
}

/// Una celda de ubicación sólo se acepta con el formato textual
/// `"Box <n> ..."`; devuelve el valor recortado o `None`.
pub fn parse_location_value(raw: &str) -> Option<&str> {
  let value = raw.trim();
  if value.starts_with("Box ") {
    Some(value)
  } else {
    None
  }
}

// Divide `"Box <n> <pos>"` en etiqueta de caja y posición.
fn split_location(value: &str) -> (String, String) {
  let rest = value.trim_start_matches("Box ").trim();
  match rest.split_once(' ') {
    Some((number, position)) => (format!("Box {}", number.trim()), position.trim().to_string()),
    None => (format!("Box {}", rest), String::new()),
  }
}

/// Parsea una celda contra el tipo de la definición. `Ok(None)` cuando la
/// celda está en blanco o el tipo no tiene representación CSV
/// (foreign_key, file); `Err` con el mensaje de validación en el resto de
/// fallos.
pub fn parse_custom_field_value(definition: &FieldDefinition,
                                raw: &str)
                                -> std::result::Result<Option<FieldValue>, String> {
  let value = raw.trim();
  if value.is_empty() {
    return Ok(None);
  }
  let wire: JsonValue = match definition.field_type {
    FieldType::ForeignKey | FieldType::File => return Ok(None),
    FieldType::Boolean => {
      let lowered = value.to_lowercase();
      if ["true", "1", "yes", "y"].contains(&lowered.as_str()) {
        json!(true)
      } else if ["false", "0", "no", "n"].contains(&lowered.as_str()) {
        json!(false)
      } else {
        return Err(format!("Booleano inválido para el campo \"{}\".", definition.name));
      }
    }
    FieldType::MultiSelect => {
      let items: Vec<&str> = value.split(';').map(|s| s.trim()).filter(|s| !s.is_empty()).collect();
      json!(items)
    }
    _ => json!(value),
  };
  match FieldValue::from_submission(definition, &wire) {
    Ok(parsed) => Ok(parsed),
    Err(DomainError::Validation { message, .. }) => {
      Err(format!("{} (campo \"{}\")", message, definition.name))
    }
    Err(other) => Err(other.to_string()),
  }
}

/// Valida una fila mapeada: campos obligatorios, formato de ubicación y
/// celdas de campos personalizados. Devuelve la lista de problemas.
pub fn validate_import_row(mapped_row: &HashMap<String, String>,
                           definitions_by_name: &HashMap<String, FieldDefinition>)
                           -> Vec<String> {
  let mut errors = Vec::new();

  for required in REQUIRED_IMPORT_FIELDS {
    if mapped_row.get(*required).map(|v| v.is_empty()).unwrap_or(true) {
      errors.push(format!("Falta el campo obligatorio: {}.", required));
    }
  }

  if let Some(location) = mapped_row.get("location") {
    if !location.is_empty() && parse_location_value(location).is_none() {
      errors.push("La ubicación debe tener el formato \"Box <número> <fila><columna>\".".to_string());
    }
  }

  for (field_name, raw_value) in mapped_row {
    if let Some(definition_name) = field_name.strip_prefix(CUSTOM_FIELD_PREFIX) {
      match definitions_by_name.get(definition_name) {
        None => errors.push(format!("Mapeo de campo personalizado desconocido: {}.", definition_name)),
        Some(definition) => {
          if let Err(message) = parse_custom_field_value(definition, raw_value) {
            errors.push(message);
          }
        }
      }
    }
  }

  errors
}

/// Resuelve un organismo por nombre (ci) acotado a la base de datos,
/// creándolo si falta. Una colisión de unicidad levantada por un creador
/// concurrente se trata como éxito re-consultando la fila ya existente.
/// Devuelve `(organismo, creado_aquí)`.
pub fn resolve_or_create_organism(repo: &dyn HelixRepository,
                                  database_id: i64,
                                  name: &str)
                                  -> std::result::Result<Option<(Organism, bool)>, DomainError> {
  let normalized = name.trim();
  if normalized.is_empty() {
    return Ok(None);
  }
  if let Some(existing) = repo.find_organism_ci(database_id, normalized)? {
    return Ok(Some((existing, false)));
  }
  match repo.create_organism(database_id, normalized) {
    Ok(created) => Ok(Some((created, true))),
    Err(DomainError::Conflict(_)) => Ok(repo.find_organism_ci(database_id, normalized)?.map(|o| (o, false))),
    Err(e) => Err(e),
  }
}

/// Igual que [`resolve_or_create_organism`] para plásmidos.
pub fn resolve_or_create_plasmid(repo: &dyn HelixRepository,
                                 database_id: i64,
                                 name: &str)
                                 -> std::result::Result<Option<(Plasmid, bool)>, DomainError> {
  let normalized = name.trim();
  if normalized.is_empty() {
    return Ok(None);
  }
  if let Some(existing) = repo.find_plasmid_ci(database_id, normalized)? {
    return Ok(Some((existing, false)));
  }
  match repo.create_plasmid(database_id, normalized, "", "") {
    Ok(created) => Ok(Some((created, true))),
    Err(DomainError::Conflict(_)) => Ok(repo.find_plasmid_ci(database_id, normalized)?.map(|p| (p, false))),
    Err(e) => Err(e),
  }
}

// Resuelve la ubicación textual `"Box <n> <pos>"` contra la tabla de
// ubicaciones, creando la fila con edificio/sala/congelador en blanco si
// falta. Mismo tratamiento de carreras que los catálogos.
fn resolve_or_create_location(repo: &dyn HelixRepository,
                              database_id: i64,
                              value: &str)
                              -> std::result::Result<Option<Location>, DomainError> {
  let (box_label, position) = split_location(value);
  if let Some(existing) = repo.find_location_ci(database_id, &box_label, &position)? {
    return Ok(Some(existing));
  }
  let new_location = NewLocation { research_database_id: database_id,
                                   building: String::new(),
                                   room: String::new(),
                                   freezer: String::new(),
                                   box_label: box_label.clone(),
                                   position: position.clone() };
  match repo.create_location(new_location) {
    Ok(created) => Ok(Some(created)),
    Err(DomainError::Conflict(_)) => repo.find_location_ci(database_id, &box_label, &position),
    Err(e) => Err(e),
  }
}

/// Importa las filas mapeadas. Todo el lote corre en una transacción
/// exterior; cada fila en su propio savepoint, de modo que el fallo de una
/// fila (duplicado, validación, error inesperado) sólo salta esa fila.
pub fn import_rows(repo: &dyn HelixRepository,
                   database: &ResearchDatabase,
                   user: &User,
                   mapped_rows: &[HashMap<String, String>],
                   definitions_by_name: &HashMap<String, FieldDefinition>)
                   -> Result<ImportOutcome> {
  let mut outcome = ImportOutcome::default();

  repo.atomically(&mut || {
        for mapped_row in mapped_rows {
          let strain_id = mapped_row.get("strain_id").map(|v| v.trim()).unwrap_or("");
          if strain_id.is_empty() {
            outcome.skipped += 1;
            continue;
          }
          // la comparación incluye cepas archivadas o inactivas
          if repo.find_strain_ci(database.id, strain_id)?.is_some() {
            debug!("fila saltada: strain_id duplicado {}", strain_id);
            outcome.skipped += 1;
            continue;
          }
          let validation_errors = validate_import_row(mapped_row, definitions_by_name);
          if !validation_errors.is_empty() {
            debug!("fila saltada ({}): {}", strain_id, validation_errors.join(" "));
            outcome.skipped += 1;
            continue;
          }
          let location_value = match mapped_row.get("location").and_then(|v| parse_location_value(v)) {
            Some(value) => value.to_string(),
            None => {
              outcome.skipped += 1;
              continue;
            }
          };

          let row_result = repo.atomically(&mut || {
                                 import_single_row(repo, database, user, mapped_row, strain_id, &location_value,
                                                   definitions_by_name)
                               });
          match row_result {
            Ok(()) => outcome.created += 1,
            Err(e) => {
              debug!("fila saltada ({}): {}", strain_id, e);
              outcome.skipped += 1;
            }
          }
        }
        Ok(())
      })
      .map_err(WorkflowError::Domain)?;

  info!("importación en base {}: {} creadas, {} saltadas", database.id, outcome.created, outcome.skipped);
  Ok(outcome)
}

// Fase de escritura de una fila ya validada. Cualquier `Err` revierte el
// savepoint de la fila.
fn import_single_row(repo: &dyn HelixRepository,
                     database: &ResearchDatabase,
                     user: &User,
                     mapped_row: &HashMap<String, String>,
                     strain_id: &str,
                     location_value: &str,
                     definitions_by_name: &HashMap<String, FieldDefinition>)
                     -> std::result::Result<(), DomainError> {
  let organism_name = mapped_row.get("organism").map(|v| v.trim()).unwrap_or("");
  let (organism, organism_created) = resolve_or_create_organism(repo, database.id, organism_name)?
    .ok_or_else(|| DomainError::validation("No se pudo resolver el organismo."))?;
  if organism_created {
    repo.record_audit(NewAuditEntry::new(Some(database.id), Some(user.id), actions::AUTO_CREATE_ORGANISM)
                        .about("Organism", organism.id.to_string())
                        .with_metadata(json!({ "organism": organism.name })))?;
  }

  let location = resolve_or_create_location(repo, database.id, location_value)?
    .ok_or_else(|| DomainError::validation("No se pudo resolver la ubicación."))?;

  let strain = repo.create_strain(NewStrain { research_database_id: database.id,
                                              strain_id: strain_id.to_string(),
                                              name: strain_id.to_string(),
                                              organism_id: organism.id,
                                              genotype: mapped_row.get("genotype").cloned().unwrap_or_default(),
                                              selective_marker: mapped_row.get("selective_marker")
                                                                          .cloned()
                                                                          .unwrap_or_default(),
                                              comments: mapped_row.get("comments").cloned().unwrap_or_default(),
                                              location_id: location.id,
                                              status: helix_domain::StrainStatus::Active,
                                              created_by: Some(user.id),
                                              is_active: true,
                                              is_archived: false,
                                              archived_at: None,
                                              archived_by: None })?;

  if let Some(plasmids_value) = mapped_row.get("plasmids") {
    for plasmid_name in plasmids_value.split(',').map(|p| p.trim()).filter(|p| !p.is_empty()) {
      if let Some((plasmid, created)) = resolve_or_create_plasmid(repo, database.id, plasmid_name)? {
        if created {
          repo.record_audit(NewAuditEntry::new(Some(database.id), Some(user.id), actions::AUTO_CREATE_PLASMID)
                              .about("Plasmid", plasmid.id.to_string())
                              .with_metadata(json!({ "plasmid": plasmid.name })))?;
        }
        repo.link_strain_plasmid(strain.id, plasmid.id)?;
      }
    }
  }

  let mut writes: Vec<FieldValueWrite> = Vec::new();
  for (field_name, raw_value) in mapped_row {
    let definition_name = match field_name.strip_prefix(CUSTOM_FIELD_PREFIX) {
      Some(name) => name,
      None => continue,
    };
    let definition = match definitions_by_name.get(definition_name) {
      Some(d) => d,
      None => continue,
    };
    // validado antes; un error aquí sería una carrera de esquema
    let parsed = parse_custom_field_value(definition, raw_value).map_err(DomainError::validation)?;
    if let Some(value) = parsed {
      writes.push(FieldValueWrite::Upsert { field_definition_id: definition.id, value });
    }
  }
  if !writes.is_empty() {
    repo.apply_field_value_writes(strain.id, &writes)?;
  }

  repo.record_audit(NewAuditEntry::new(Some(database.id), Some(user.id), actions::IMPORT_STRAIN)
                      .about("Strain", strain.id.to_string())
                      .with_metadata(json!({ "strain_id": strain.strain_id })))?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn location_value_requires_box_prefix() {
    assert_eq!(parse_location_value("  Box 3 A1 "), Some("Box 3 A1"));
    assert_eq!(parse_location_value("Shelf 3 A1"), None);
    assert_eq!(parse_location_value(""), None);
  }

  #[test]
  fn split_location_separates_box_and_position() {
    assert_eq!(split_location("Box 3 A1"), ("Box 3".to_string(), "A1".to_string()));
    assert_eq!(split_location("Box 12"), ("Box 12".to_string(), String::new()));
  }

  #[test]
  fn csv_parser_strips_bom_and_trims() {
    let content = "\u{feff}Strain,Organismo\n HM-1 , E. coli \n".as_bytes();
    let (headers, rows) = parse_csv(content).unwrap();
    assert_eq!(headers, vec!["Strain", "Organismo"]);
    assert_eq!(rows[0].get("Strain").unwrap(), "HM-1");
    assert_eq!(rows[0].get("Organismo").unwrap(), "E. coli");
  }

  #[test]
  fn mapped_rows_drop_unmapped_columns() {
    let rows = vec![HashMap::from([("Col A".to_string(), " x ".to_string()),
                                   ("Col B".to_string(), "y".to_string())])];
    let mapping = HashMap::from([("Col A".to_string(), "strain_id".to_string()),
                                 ("Col B".to_string(), String::new())]);
    let mapped = build_mapped_rows(&rows, &mapping);
    assert_eq!(mapped[0].get("strain_id").unwrap(), "x");
    assert!(!mapped[0].contains_key("Col B"));
  }
}
