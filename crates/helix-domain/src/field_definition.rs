// Archivo: field_definition.rs
// Propósito: esquema de campos personalizados. Cada definición pertenece a
// una base de datos, declara uno de doce tipos de valor y lleva las reglas
// de visibilidad, edición, unicidad y lógica condicional que el constructor
// de formularios consulta.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::conditions::ConditionalLogic;
use crate::errors::{DomainError, Result};
use crate::roles::DatabaseRole;
use crate::tenancy::TenantScoped;

/// Los doce tipos de valor que una definición puede declarar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
  Text,
  LongText,
  Integer,
  Decimal,
  Date,
  Boolean,
  SingleSelect,
  MultiSelect,
  ForeignKey,
  File,
  Url,
  Email,
}

impl FieldType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Text => "text",
      Self::LongText => "long_text",
      Self::Integer => "integer",
      Self::Decimal => "decimal",
      Self::Date => "date",
      Self::Boolean => "boolean",
      Self::SingleSelect => "single_select",
      Self::MultiSelect => "multi_select",
      Self::ForeignKey => "foreign_key",
      Self::File => "file",
      Self::Url => "url",
      Self::Email => "email",
    }
  }

  pub fn parse(raw: &str) -> Option<Self> {
    match raw {
      "text" => Some(Self::Text),
      "long_text" => Some(Self::LongText),
      "integer" => Some(Self::Integer),
      "decimal" => Some(Self::Decimal),
      "date" => Some(Self::Date),
      "boolean" => Some(Self::Boolean),
      "single_select" => Some(Self::SingleSelect),
      "multi_select" => Some(Self::MultiSelect),
      "foreign_key" => Some(Self::ForeignKey),
      "file" => Some(Self::File),
      "url" => Some(Self::Url),
      "email" => Some(Self::Email),
      _ => None,
    }
  }

  /// `true` para los tipos cuyos `choices` tienen significado.
  pub fn is_select(&self) -> bool {
    matches!(self, Self::SingleSelect | Self::MultiSelect)
  }
}

/// Entidades referenciables por un campo FOREIGN_KEY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelatedEntityKind {
  Organism,
  Plasmid,
  Location,
}

impl RelatedEntityKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Organism => "organism",
      Self::Plasmid => "plasmid",
      Self::Location => "location",
    }
  }

  pub fn parse(raw: &str) -> Option<Self> {
    match raw {
      "organism" => Some(Self::Organism),
      "plasmid" => Some(Self::Plasmid),
      "location" => Some(Self::Location),
      _ => None,
    }
  }
}

/// Reglas de validación de la definición. Hoy sólo `required`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationRules {
  #[serde(default)]
  pub required: bool,
}

/// Definición de un campo personalizado.
///
/// `key` es estable: se deriva del nombre por slugificación al crear la
/// definición (si no se proporciona) y no se regenera nunca después.
/// `(base de datos, name)` y `(base de datos, key)` son únicos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
  pub id: i64,
  pub research_database_id: i64,
  pub organization_id: i64,
  pub name: String,
  pub key: String,
  pub field_type: FieldType,
  /// Fuente separada por comas; sólo significativa para tipos select.
  pub choices: String,
  /// Valor inicial para registros nuevos; `null` si no hay.
  pub default_value: JsonValue,
  pub help_text: String,
  pub validation_rules: ValidationRules,
  pub is_unique: bool,
  pub conditional_logic: Option<ConditionalLogic>,
  pub order: i32,
  pub group_name: Option<String>,
  pub group_order: i32,
  /// Vacío = visible para todos los roles.
  pub visible_to_roles: Vec<DatabaseRole>,
  /// Vacío = editable por todos los roles.
  pub editable_to_roles: Vec<DatabaseRole>,
  pub related_model: Option<RelatedEntityKind>,
  pub created_by: Option<i64>,
  pub created_at: DateTime<Utc>,
}

impl FieldDefinition {
  /// Choices normalizados: separa por comas, recorta y descarta blancos,
  /// conservando el orden original (sin deduplicar). `[]` para tipos no
  /// select.
  pub fn parsed_choices(&self) -> Vec<String> {
    if !self.field_type.is_select() {
      return Vec::new();
    }
    self.choices.split(',').map(|c| c.trim()).filter(|c| !c.is_empty()).map(|c| c.to_string()).collect()
  }

  pub fn required(&self) -> bool {
    self.validation_rules.required
  }

  /// Un campo con lista de visibilidad no vacía sólo existe para los roles
  /// listados; no se envía al cliente para el resto.
  pub fn is_visible_to(&self, role: Option<DatabaseRole>) -> bool {
    if self.visible_to_roles.is_empty() {
      return true;
    }
    matches!(role, Some(r) if self.visible_to_roles.contains(&r))
  }

  pub fn is_editable_by(&self, role: Option<DatabaseRole>) -> bool {
    if self.editable_to_roles.is_empty() {
      return true;
    }
    matches!(role, Some(r) if self.editable_to_roles.contains(&r))
  }
}

impl TenantScoped for FieldDefinition {
  fn tenant(&self) -> i64 {
    self.research_database_id
  }
}

/// Datos para crear una definición. `key` vacío o ausente se deriva de
/// `name`; `conditional_logic` llega como JSON crudo y se valida aquí de
/// forma estricta (la detección de lógica malformada ocurre al guardar la
/// definición, no al evaluarla).
#[derive(Debug, Clone)]
pub struct NewFieldDefinition {
  pub research_database_id: i64,
  pub organization_id: i64,
  pub name: String,
  pub key: Option<String>,
  pub field_type: FieldType,
  pub choices: String,
  pub default_value: JsonValue,
  pub help_text: String,
  pub validation_rules: ValidationRules,
  pub is_unique: bool,
  pub conditional_logic: JsonValue,
  pub order: i32,
  pub group_name: Option<String>,
  pub group_order: i32,
  pub visible_to_roles: Vec<DatabaseRole>,
  pub editable_to_roles: Vec<DatabaseRole>,
  pub related_model: Option<RelatedEntityKind>,
  pub created_by: Option<i64>,
}

impl NewFieldDefinition {
  /// Definición mínima con los extras en valores por defecto.
  pub fn basic(research_database_id: i64, organization_id: i64, name: impl Into<String>, field_type: FieldType) -> Self {
    Self { research_database_id,
           organization_id,
           name: name.into(),
           key: None,
           field_type,
           choices: String::new(),
           default_value: JsonValue::Null,
           help_text: String::new(),
           validation_rules: ValidationRules::default(),
           is_unique: false,
           conditional_logic: JsonValue::Null,
           order: 0,
           group_name: None,
           group_order: 0,
           visible_to_roles: Vec::new(),
           editable_to_roles: Vec::new(),
           related_model: None,
           created_by: None }
  }

  /// Normaliza y valida la entrada: nombre obligatorio, key derivada y
  /// estable, choices presentes para selects, `related_model` presente
  /// para FOREIGN_KEY, lógica condicional parseada estrictamente.
  pub fn validated(self) -> Result<ValidatedFieldDefinition> {
    let name = self.name.trim().to_string();
    if name.is_empty() {
      return Err(DomainError::field_validation("name", "El nombre de la definición no puede estar vacío."));
    }
    let key = match self.key.as_deref().map(str::trim) {
      Some(k) if !k.is_empty() => slugify(k),
      _ => slugify(&name),
    };
    if key.is_empty() {
      return Err(DomainError::field_validation("key", "La clave derivada del nombre quedó vacía."));
    }
    if self.field_type.is_select() {
      let has_choice = self.choices.split(',').any(|c| !c.trim().is_empty());
      if !has_choice {
        return Err(DomainError::field_validation("choices", "Un campo select necesita al menos una opción."));
      }
    }
    if self.field_type == FieldType::ForeignKey && self.related_model.is_none() {
      return Err(DomainError::field_validation("related_model",
                                               "Un campo foreign_key debe declarar la entidad relacionada."));
    }
    let conditional_logic = ConditionalLogic::parse_strict(&self.conditional_logic)?;
    Ok(ValidatedFieldDefinition { research_database_id: self.research_database_id,
                                  organization_id: self.organization_id,
                                  name,
                                  key,
                                  field_type: self.field_type,
                                  choices: self.choices,
                                  default_value: self.default_value,
                                  help_text: self.help_text,
                                  validation_rules: self.validation_rules,
                                  is_unique: self.is_unique,
                                  conditional_logic,
                                  order: self.order,
                                  group_name: self.group_name,
                                  group_order: self.group_order,
                                  visible_to_roles: self.visible_to_roles,
                                  editable_to_roles: self.editable_to_roles,
                                  related_model: self.related_model,
                                  created_by: self.created_by })
  }
}

/// Resultado de [`NewFieldDefinition::validated`]: entrada lista para que
/// el repositorio la persista tal cual.
#[derive(Debug, Clone)]
pub struct ValidatedFieldDefinition {
  pub research_database_id: i64,
  pub organization_id: i64,
  pub name: String,
  pub key: String,
  pub field_type: FieldType,
  pub choices: String,
  pub default_value: JsonValue,
  pub help_text: String,
  pub validation_rules: ValidationRules,
  pub is_unique: bool,
  pub conditional_logic: Option<ConditionalLogic>,
  pub order: i32,
  pub group_name: Option<String>,
  pub group_order: i32,
  pub visible_to_roles: Vec<DatabaseRole>,
  pub editable_to_roles: Vec<DatabaseRole>,
  pub related_model: Option<RelatedEntityKind>,
  pub created_by: Option<i64>,
}

/// Slug estable: minúsculas, alfanuméricos conservados, separadores
/// colapsados a `_`.
pub fn slugify(input: &str) -> String {
  let mut out = String::with_capacity(input.len());
  let mut pending_sep = false;
  for ch in input.trim().chars() {
    if ch.is_alphanumeric() {
      if pending_sep && !out.is_empty() {
        out.push('_');
      }
      pending_sep = false;
      for lower in ch.to_lowercase() {
        out.push(lower);
      }
    } else {
      pending_sep = true;
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Utc;
  use serde_json::json;

  fn definition(field_type: FieldType, choices: &str) -> FieldDefinition {
    FieldDefinition { id: 1,
                      research_database_id: 1,
                      organization_id: 1,
                      name: "Prueba".into(),
                      key: "prueba".into(),
                      field_type,
                      choices: choices.into(),
                      default_value: JsonValue::Null,
                      help_text: String::new(),
                      validation_rules: ValidationRules::default(),
                      is_unique: false,
                      conditional_logic: None,
                      order: 0,
                      group_name: None,
                      group_order: 0,
                      visible_to_roles: Vec::new(),
                      editable_to_roles: Vec::new(),
                      related_model: None,
                      created_by: None,
                      created_at: Utc::now() }
  }

  #[test]
  fn parsed_choices_trims_and_keeps_order() {
    let def = definition(FieldType::SingleSelect, "  30C , 37C ,, 42C ,");
    assert_eq!(def.parsed_choices(), vec!["30C", "37C", "42C"]);
  }

  #[test]
  fn parsed_choices_empty_for_non_select() {
    let def = definition(FieldType::Text, "a,b,c");
    assert!(def.parsed_choices().is_empty());
  }

  #[test]
  fn parsed_choices_does_not_dedupe() {
    let def = definition(FieldType::MultiSelect, "a, b, a");
    assert_eq!(def.parsed_choices(), vec!["a", "b", "a"]);
  }

  #[test]
  fn key_is_derived_by_slugification() {
    let new = NewFieldDefinition::basic(1, 1, "Growth Témp (°C)", FieldType::Integer);
    let validated = new.validated().unwrap();
    assert_eq!(validated.key, "growth_témp_c");
  }

  #[test]
  fn explicit_key_wins_over_name() {
    let mut new = NewFieldDefinition::basic(1, 1, "Growth Temp", FieldType::Integer);
    new.key = Some("temp".into());
    assert_eq!(new.validated().unwrap().key, "temp");
  }

  #[test]
  fn select_without_choices_is_rejected() {
    let new = NewFieldDefinition::basic(1, 1, "Medio", FieldType::SingleSelect);
    assert!(new.validated().is_err());
  }

  #[test]
  fn foreign_key_needs_related_model() {
    let new = NewFieldDefinition::basic(1, 1, "Host", FieldType::ForeignKey);
    assert!(new.validated().is_err());
    let mut new = NewFieldDefinition::basic(1, 1, "Host", FieldType::ForeignKey);
    new.related_model = Some(RelatedEntityKind::Organism);
    assert!(new.validated().is_ok());
  }

  #[test]
  fn malformed_logic_is_rejected_at_save_time() {
    let mut new = NewFieldDefinition::basic(1, 1, "Nota", FieldType::Text);
    new.conditional_logic = json!({"conditions": [{"field": "x", "operator": "between", "value": 2}]});
    assert!(new.validated().is_err());
  }

  #[test]
  fn visibility_rules() {
    let mut def = definition(FieldType::Text, "");
    assert!(def.is_visible_to(None));
    assert!(def.is_visible_to(Some(DatabaseRole::Viewer)));
    def.visible_to_roles = vec![DatabaseRole::Admin, DatabaseRole::Owner];
    assert!(!def.is_visible_to(Some(DatabaseRole::Viewer)));
    assert!(def.is_visible_to(Some(DatabaseRole::Owner)));
    assert!(!def.is_visible_to(None));
  }
}
