// Archivo: save.rs
// Propósito: validar y persistir los valores enviados para una cepa. El
// guardado es todo-o-nada: primero se calcula el conjunto completo de
// escrituras acumulando cada error de validación; sólo si no hay ninguno
// se aplica en una única transacción del repositorio.
use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use helix_domain::{evaluate, is_blank, DatabaseRole, DomainError, FieldDefinition, FieldType, FieldValue,
                   FieldValueWrite, HelixRepository, RelatedEntityKind, Strain, TenantScoped};

use crate::errors::{FieldError, FormError, Result};

/// Valores enviados: clave de campo (con o sin prefijo `custom_`) → valor
/// en forma de cable. El orden de inserción se conserva para que los
/// errores salgan en el orden del formulario.
pub type Submissions = IndexMap<String, JsonValue>;

/// Valida y guarda los valores enviados para `strain`.
///
/// Reglas:
/// - un campo invisible o no editable para `acting_role` se deja intacto;
/// - un campo cuya lógica condicional evalúa falso no se guarda ni se
///   limpia: su valor anterior persiste; los datos ocultos se conservan
///   en lugar de borrarse en silencio;
/// - envío en blanco o ausente borra la fila del valor, salvo BOOLEAN,
///   donde la ausencia y el blanco significan `false` y se almacenan;
/// - claves desconocidas en el envío se ignoran (clientes desfasados);
/// - con `is_unique`, una colisión contra otra cepa de la misma base de
///   datos es un error de validación; la cepa en edición se excluye.
pub fn save_values(repo: &dyn HelixRepository,
                   acting_role: Option<DatabaseRole>,
                   strain: &Strain,
                   submissions: &Submissions)
                   -> Result<()> {
  let definitions = repo.list_field_definitions(strain.tenant()).map_err(FormError::Domain)?;

  // Vista combinada para el evaluador de lógica condicional.
  let mut eval_view = serde_json::Map::new();
  for (key, value) in submissions {
    eval_view.insert(key.clone(), value.clone());
  }

  let mut errors: Vec<FieldError> = Vec::new();
  let mut writes: Vec<FieldValueWrite> = Vec::new();

  for definition in &definitions {
    if !definition.is_visible_to(acting_role) || !definition.is_editable_by(acting_role) {
      continue;
    }
    if !evaluate(definition.conditional_logic.as_ref(), &eval_view) {
      continue;
    }
    let submitted = submitted_value(submissions, &definition.key);

    if definition.field_type == FieldType::Boolean {
      // Un checkbox ausente o en blanco es una respuesta: false.
      let value = match submitted {
        Some(raw) if !is_blank(raw) => match FieldValue::from_submission(definition, raw) {
          Ok(Some(v)) => v,
          Ok(None) => FieldValue::Boolean(false),
          Err(e) => {
            errors.push(e.into());
            continue;
          }
        },
        _ => FieldValue::Boolean(false),
      };
      writes.push(FieldValueWrite::Upsert { field_definition_id: definition.id, value });
      continue;
    }

    let raw = match submitted {
      Some(raw) => raw,
      None => {
        if definition.required() {
          errors.push(FieldError { field: Some(definition.key.clone()),
                                   message: "Este campo es obligatorio.".to_string() });
        } else {
          writes.push(FieldValueWrite::Delete { field_definition_id: definition.id });
        }
        continue;
      }
    };

    match FieldValue::from_submission(definition, raw) {
      Ok(None) => {
        if definition.required() {
          errors.push(FieldError { field: Some(definition.key.clone()),
                                   message: "Este campo es obligatorio.".to_string() });
        } else {
          writes.push(FieldValueWrite::Delete { field_definition_id: definition.id });
        }
      }
      Ok(Some(value)) => {
        if let Err(e) = check_reference(repo, definition, &value) {
          errors.push(e.into());
          continue;
        }
        if definition.is_unique {
          match repo.unique_value_exists(definition.id, &value, Some(strain.id)) {
            Ok(true) => {
              errors.push(FieldError { field: Some(definition.key.clone()),
                                       message: "Ya existe otro registro con este valor.".to_string() });
              continue;
            }
            Ok(false) => {}
            Err(e) => return Err(FormError::Domain(e)),
          }
        }
        writes.push(FieldValueWrite::Upsert { field_definition_id: definition.id, value });
      }
      Err(e) => errors.push(e.into()),
    }
  }

  if !errors.is_empty() {
    return Err(FormError::Invalid(errors));
  }
  repo.apply_field_value_writes(strain.id, &writes).map_err(FormError::Domain)
}

// El envío puede llegar con la clave a secas o con el prefijo del
// formulario.
fn submitted_value<'a>(submissions: &'a Submissions, key: &str) -> Option<&'a JsonValue> {
  submissions.get(key).or_else(|| submissions.get(&format!("custom_{}", key)))
}

// Una referencia FOREIGN_KEY debe apuntar a una entidad existente del tipo
// declarado y dentro de la misma base de datos.
fn check_reference(repo: &dyn HelixRepository,
                   definition: &FieldDefinition,
                   value: &FieldValue)
                   -> std::result::Result<(), DomainError> {
  let (kind, id) = match value {
    FieldValue::ForeignKey { kind, id } => (*kind, *id),
    _ => return Ok(()),
  };
  let tenant = match kind {
    RelatedEntityKind::Organism => repo.get_organism(id)?.map(|o| o.tenant()),
    RelatedEntityKind::Plasmid => repo.get_plasmid(id)?.map(|p| p.tenant()),
    RelatedEntityKind::Location => repo.get_location(id)?.map(|l| l.tenant()),
  };
  match tenant {
    Some(t) if t == definition.research_database_id => Ok(()),
    Some(_) => Err(DomainError::field_validation(definition.key.clone(),
                                                 "La entidad referenciada pertenece a otra base de datos.")),
    None => Err(DomainError::field_validation(definition.key.clone(), "La entidad referenciada no existe.")),
  }
}
