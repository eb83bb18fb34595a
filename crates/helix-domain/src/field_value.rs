// Archivo: field_value.rs
// Propósito: valor polimórfico de un campo personalizado como unión
// etiquetada. El almacén relacional lo aplana a doce columnas anulables con
// exactamente una poblada; aquí el tipo del valor es imposible de
// desalinear del tipo de la definición.
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::errors::{DomainError, Result};
use crate::field_definition::{FieldDefinition, FieldType, RelatedEntityKind};

/// Valor tipado de un campo. Una variante por cada [`FieldType`].
///
/// `Decimal` conserva el literal decimal normalizado como cadena: el
/// redondeo binario de un `f64` rompería la reproducción exacta del valor
/// enviado.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
  Text(String),
  LongText(String),
  Integer(i64),
  Decimal(String),
  Date(NaiveDate),
  Boolean(bool),
  SingleSelect(String),
  MultiSelect(Vec<String>),
  ForeignKey { kind: RelatedEntityKind, id: i64 },
  File(String),
  Url(String),
  Email(String),
}

impl FieldValue {
  /// Tipo de campo al que corresponde la variante.
  pub fn kind(&self) -> FieldType {
    match self {
      Self::Text(_) => FieldType::Text,
      Self::LongText(_) => FieldType::LongText,
      Self::Integer(_) => FieldType::Integer,
      Self::Decimal(_) => FieldType::Decimal,
      Self::Date(_) => FieldType::Date,
      Self::Boolean(_) => FieldType::Boolean,
      Self::SingleSelect(_) => FieldType::SingleSelect,
      Self::MultiSelect(_) => FieldType::MultiSelect,
      Self::ForeignKey { .. } => FieldType::ForeignKey,
      Self::File(_) => FieldType::File,
      Self::Url(_) => FieldType::Url,
      Self::Email(_) => FieldType::Email,
    }
  }

  /// Forma de cable del valor: escalares JSON, array de cadenas para
  /// multi-select y `{related_model, id}` para foreign key.
  pub fn to_wire(&self) -> JsonValue {
    match self {
      Self::Text(s) | Self::LongText(s) | Self::SingleSelect(s) | Self::File(s) | Self::Url(s) | Self::Email(s) => {
        JsonValue::String(s.clone())
      }
      Self::Integer(n) => JsonValue::from(*n),
      Self::Decimal(d) => JsonValue::String(d.clone()),
      Self::Date(d) => JsonValue::String(d.format("%Y-%m-%d").to_string()),
      Self::Boolean(b) => JsonValue::Bool(*b),
      Self::MultiSelect(items) => JsonValue::from(items.clone()),
      Self::ForeignKey { kind, id } => {
        serde_json::json!({ "related_model": kind.as_str(), "id": id })
      }
    }
  }

  /// Coerciona un valor enviado (forma de cable) al tipo de la definición.
  ///
  /// `Ok(None)` significa envío en blanco: el guardado borra la fila, salvo
  /// BOOLEAN, donde `false` es una respuesta con significado y se conserva.
  /// Un fallo de coerción es un error de validación atribuido a la clave de
  /// la definición.
  pub fn from_submission(definition: &FieldDefinition, raw: &JsonValue) -> Result<Option<Self>> {
    if is_blank(raw) {
      return Ok(None);
    }
    let key = definition.key.as_str();
    match definition.field_type {
      FieldType::Text => Ok(Some(Self::Text(coerce_string(key, raw)?.trim().to_string()))),
      FieldType::LongText => Ok(Some(Self::LongText(coerce_string(key, raw)?.trim().to_string()))),
      FieldType::Integer => coerce_integer(key, raw).map(|n| Some(Self::Integer(n))),
      FieldType::Decimal => coerce_decimal(key, raw).map(|d| Some(Self::Decimal(d))),
      FieldType::Date => coerce_date(key, raw).map(|d| Some(Self::Date(d))),
      FieldType::Boolean => match raw {
        JsonValue::Bool(b) => Ok(Some(Self::Boolean(*b))),
        _ => Err(DomainError::field_validation(key, "Se esperaba un booleano.")),
      },
      FieldType::SingleSelect => {
        let value = coerce_string(key, raw)?;
        let value = value.trim().to_string();
        if !definition.parsed_choices().contains(&value) {
          return Err(DomainError::field_validation(key, format!("Opción desconocida: {}", value)));
        }
        Ok(Some(Self::SingleSelect(value)))
      }
      FieldType::MultiSelect => {
        let items = raw.as_array()
                       .ok_or_else(|| DomainError::field_validation(key, "Se esperaba una lista de opciones."))?;
        let choices = definition.parsed_choices();
        let mut values = Vec::with_capacity(items.len());
        for item in items {
          let value = item.as_str()
                          .ok_or_else(|| DomainError::field_validation(key, "Cada opción debe ser una cadena."))?
                          .trim()
                          .to_string();
          if !choices.contains(&value) {
            return Err(DomainError::field_validation(key, format!("Opción desconocida: {}", value)));
          }
          values.push(value);
        }
        Ok(Some(Self::MultiSelect(values)))
      }
      FieldType::ForeignKey => {
        let kind = definition.related_model.ok_or_else(|| {
                                             DomainError::field_validation(key,
                                                                           "La definición no declara entidad relacionada.")
                                           })?;
        let id = match raw {
          JsonValue::Number(n) => n.as_i64(),
          JsonValue::Object(map) => {
            if let Some(model) = map.get("related_model").and_then(|m| m.as_str()) {
              if RelatedEntityKind::parse(model) != Some(kind) {
                return Err(DomainError::field_validation(key, format!("Entidad relacionada inesperada: {}", model)));
              }
            }
            map.get("id").and_then(|i| i.as_i64())
          }
          _ => None,
        };
        let id = id.ok_or_else(|| DomainError::field_validation(key, "Referencia foreign_key sin id."))?;
        Ok(Some(Self::ForeignKey { kind, id }))
      }
      FieldType::File => Ok(Some(Self::File(coerce_string(key, raw)?.trim().to_string()))),
      FieldType::Url => {
        let value = coerce_string(key, raw)?.trim().to_string();
        if !(value.starts_with("http://") || value.starts_with("https://")) {
          return Err(DomainError::field_validation(key, "URL inválida."));
        }
        Ok(Some(Self::Url(value)))
      }
      FieldType::Email => {
        let value = coerce_string(key, raw)?.trim().to_string();
        let valid = value.split_once('@')
                         .map(|(local, domain)| !local.is_empty() && domain.contains('.'))
                         .unwrap_or(false);
        if !valid {
          return Err(DomainError::field_validation(key, "Email inválido."));
        }
        Ok(Some(Self::Email(value)))
      }
    }
  }
}

/// Envío en blanco: `null`, cadena vacía (tras recortar) o lista vacía.
/// `false` NO es blanco.
pub fn is_blank(raw: &JsonValue) -> bool {
  match raw {
    JsonValue::Null => true,
    JsonValue::String(s) => s.trim().is_empty(),
    JsonValue::Array(items) => items.is_empty(),
    _ => false,
  }
}

fn coerce_string(key: &str, raw: &JsonValue) -> Result<String> {
  match raw {
    JsonValue::String(s) => Ok(s.clone()),
    JsonValue::Number(n) => Ok(n.to_string()),
    JsonValue::Bool(b) => Ok(b.to_string()),
    _ => Err(DomainError::field_validation(key, "Se esperaba una cadena.")),
  }
}

fn coerce_integer(key: &str, raw: &JsonValue) -> Result<i64> {
  match raw {
    JsonValue::Number(n) => {
      if let Some(i) = n.as_i64() {
        return Ok(i);
      }
      // Un flotante entero (12.0) se acepta; 12.5 no.
      if let Some(f) = n.as_f64() {
        if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
          return Ok(f as i64);
        }
      }
      Err(DomainError::field_validation(key, "Se esperaba un entero."))
    }
    JsonValue::String(s) => {
      s.trim().parse::<i64>().map_err(|_| DomainError::field_validation(key, "Se esperaba un entero."))
    }
    _ => Err(DomainError::field_validation(key, "Se esperaba un entero.")),
  }
}

fn coerce_decimal(key: &str, raw: &JsonValue) -> Result<String> {
  let text = match raw {
    JsonValue::Number(n) => n.to_string(),
    JsonValue::String(s) => s.trim().to_string(),
    _ => return Err(DomainError::field_validation(key, "Se esperaba un decimal.")),
  };
  if !is_decimal_literal(&text) {
    return Err(DomainError::field_validation(key, "Se esperaba un decimal."));
  }
  Ok(text)
}

// Literal decimal: signo opcional, dígitos, punto y fracción opcionales.
fn is_decimal_literal(text: &str) -> bool {
  let rest = text.strip_prefix('-').or_else(|| text.strip_prefix('+')).unwrap_or(text);
  if rest.is_empty() {
    return false;
  }
  let mut parts = rest.splitn(2, '.');
  let whole = parts.next().unwrap_or("");
  let frac = parts.next();
  let whole_ok = !whole.is_empty() && whole.chars().all(|c| c.is_ascii_digit());
  match frac {
    Some(f) => whole_ok && !f.is_empty() && f.chars().all(|c| c.is_ascii_digit()),
    None => whole_ok,
  }
}

fn coerce_date(key: &str, raw: &JsonValue) -> Result<NaiveDate> {
  let text = raw.as_str().ok_or_else(|| DomainError::field_validation(key, "Se esperaba una fecha YYYY-MM-DD."))?;
  NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").map_err(|_| {
                                                      DomainError::field_validation(key,
                                                                                    "Se esperaba una fecha YYYY-MM-DD.")
                                                    })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::field_definition::{NewFieldDefinition, ValidationRules};
  use chrono::Utc;
  use serde_json::json;

  fn definition(field_type: FieldType, choices: &str) -> FieldDefinition {
    FieldDefinition { id: 9,
                      research_database_id: 1,
                      organization_id: 1,
                      name: "Campo".into(),
                      key: "campo".into(),
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
                      related_model: if field_type == FieldType::ForeignKey {
                        Some(RelatedEntityKind::Organism)
                      } else {
                        None
                      },
                      created_by: None,
                      created_at: Utc::now() }
  }

  #[test]
  fn integer_round_trips_as_integer() {
    let def = definition(FieldType::Integer, "");
    let value = FieldValue::from_submission(&def, &json!(12)).unwrap().unwrap();
    assert_eq!(value, FieldValue::Integer(12));
    assert_eq!(value.to_wire(), json!(12));
  }

  #[test]
  fn integer_rejects_fractional() {
    let def = definition(FieldType::Integer, "");
    assert!(FieldValue::from_submission(&def, &json!(12.5)).is_err());
    assert_eq!(FieldValue::from_submission(&def, &json!(12.0)).unwrap(), Some(FieldValue::Integer(12)));
    assert_eq!(FieldValue::from_submission(&def, &json!("12")).unwrap(), Some(FieldValue::Integer(12)));
    assert!(FieldValue::from_submission(&def, &json!("doce")).is_err());
  }

  #[test]
  fn decimal_preserves_literal() {
    let def = definition(FieldType::Decimal, "");
    let value = FieldValue::from_submission(&def, &json!("12.10")).unwrap().unwrap();
    assert_eq!(value, FieldValue::Decimal("12.10".into()));
    assert!(FieldValue::from_submission(&def, &json!("12.")).is_err());
    assert!(FieldValue::from_submission(&def, &json!("1,2")).is_err());
  }

  #[test]
  fn blank_submissions_clear_except_false() {
    let def = definition(FieldType::Text, "");
    assert_eq!(FieldValue::from_submission(&def, &json!(null)).unwrap(), None);
    assert_eq!(FieldValue::from_submission(&def, &json!("   ")).unwrap(), None);
    let def = definition(FieldType::MultiSelect, "a,b");
    assert_eq!(FieldValue::from_submission(&def, &json!([])).unwrap(), None);
    let def = definition(FieldType::Boolean, "");
    assert_eq!(FieldValue::from_submission(&def, &json!(false)).unwrap(), Some(FieldValue::Boolean(false)));
  }

  #[test]
  fn select_values_must_be_choices() {
    let def = definition(FieldType::SingleSelect, "30C, 37C");
    assert!(FieldValue::from_submission(&def, &json!("37C")).is_ok());
    assert!(FieldValue::from_submission(&def, &json!("42C")).is_err());
    let def = definition(FieldType::MultiSelect, "a, b, c");
    assert_eq!(FieldValue::from_submission(&def, &json!(["a", "c"])).unwrap(),
               Some(FieldValue::MultiSelect(vec!["a".into(), "c".into()])));
    assert!(FieldValue::from_submission(&def, &json!(["a", "z"])).is_err());
  }

  #[test]
  fn foreign_key_accepts_wire_object_and_bare_id() {
    let def = definition(FieldType::ForeignKey, "");
    let expected = FieldValue::ForeignKey { kind: RelatedEntityKind::Organism, id: 4 };
    assert_eq!(FieldValue::from_submission(&def, &json!({"related_model": "organism", "id": 4})).unwrap(),
               Some(expected.clone()));
    assert_eq!(FieldValue::from_submission(&def, &json!(4)).unwrap(), Some(expected));
    assert!(FieldValue::from_submission(&def, &json!({"related_model": "plasmid", "id": 4})).is_err());
  }

  #[test]
  fn date_round_trip() {
    let def = definition(FieldType::Date, "");
    let value = FieldValue::from_submission(&def, &json!("2026-03-01")).unwrap().unwrap();
    assert_eq!(value.to_wire(), json!("2026-03-01"));
    assert!(FieldValue::from_submission(&def, &json!("01/03/2026")).is_err());
  }

  #[test]
  fn url_and_email_basic_validation() {
    let def = definition(FieldType::Url, "");
    assert!(FieldValue::from_submission(&def, &json!("https://example.org/x")).is_ok());
    assert!(FieldValue::from_submission(&def, &json!("example.org")).is_err());
    let def = definition(FieldType::Email, "");
    assert!(FieldValue::from_submission(&def, &json!("lab@example.org")).is_ok());
    assert!(FieldValue::from_submission(&def, &json!("lab@localhost")).is_err());
    assert!(FieldValue::from_submission(&def, &json!("example.org")).is_err());
  }

  #[test]
  fn snapshot_serde_is_tagged() {
    let value = FieldValue::ForeignKey { kind: RelatedEntityKind::Plasmid, id: 11 };
    let encoded = serde_json::to_value(&value).unwrap();
    assert_eq!(encoded, json!({"type": "foreign_key", "value": {"kind": "plasmid", "id": 11}}));
    let decoded: FieldValue = serde_json::from_value(encoded).unwrap();
    assert_eq!(decoded, value);
    let value = FieldValue::Integer(12);
    let decoded: FieldValue = serde_json::from_value(serde_json::to_value(&value).unwrap()).unwrap();
    assert_eq!(decoded, FieldValue::Integer(12));
  }

  #[test]
  fn derived_key_matches_submission_key() {
    let validated = NewFieldDefinition::basic(1, 1, "Campo", FieldType::Text).validated().unwrap();
    assert_eq!(validated.key, "campo");
  }
}
