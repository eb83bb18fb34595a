// Archivo: conditions.rs
// Propósito: AST cerrado de lógica condicional y su evaluador. La lógica
// gobierna la visibilidad/aplicabilidad de un campo en el momento de
// guardar. Evalúa fail-open: un árbol ausente o ilegible muestra y guarda
// el campo en lugar de ocultarlo, para que un error de configuración nunca
// descarte datos.
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::errors::{DomainError, Result};

/// Operador de combinación del árbol. Cualquier valor distinto de `OR`
/// (sin distinguir mayúsculas) se normaliza a `AND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicOperator {
  And,
  Or,
}

/// Comparador de una condición hoja.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOp {
  Equals,
  NotEquals,
  Contains,
  Gt,
  Lt,
}

impl ConditionOp {
  fn parse(raw: &str) -> Option<Self> {
    match raw.to_lowercase().as_str() {
      "equals" => Some(Self::Equals),
      "not_equals" => Some(Self::NotEquals),
      "contains" => Some(Self::Contains),
      "gt" => Some(Self::Gt),
      "lt" => Some(Self::Lt),
      _ => None,
    }
  }
}

/// Condición hoja: compara el valor enviado para `field` contra `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
  pub field: String,
  pub op: ConditionOp,
  pub value: JsonValue,
}

/// Árbol de lógica condicional: un operador y una lista plana de
/// condiciones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalLogic {
  pub operator: LogicOperator,
  pub conditions: Vec<Condition>,
}

impl ConditionalLogic {
  /// Parseo estricto, usado al guardar una definición: una forma inválida o
  /// un operador desconocido se rechazan aquí, no en evaluación.
  ///
  /// `None`, `null` y `{}` son árboles válidos que significan "sin lógica".
  pub fn parse_strict(raw: &JsonValue) -> Result<Option<Self>> {
    if raw.is_null() {
      return Ok(None);
    }
    let obj = raw.as_object()
                 .ok_or_else(|| DomainError::validation("La lógica condicional debe ser un objeto JSON."))?;
    if obj.is_empty() {
      return Ok(None);
    }
    let operator = parse_operator(obj.get("operator"));
    let raw_conditions = match obj.get("conditions") {
      None | Some(JsonValue::Null) => &[] as &[JsonValue],
      Some(JsonValue::Array(items)) => items.as_slice(),
      Some(_) => return Err(DomainError::validation("`conditions` debe ser una lista.")),
    };
    let mut conditions = Vec::with_capacity(raw_conditions.len());
    for item in raw_conditions {
      let cond = item.as_object()
                     .ok_or_else(|| DomainError::validation("Cada condición debe ser un objeto JSON."))?;
      let field = cond.get("field")
                      .and_then(|f| f.as_str())
                      .ok_or_else(|| DomainError::validation("Cada condición necesita un `field`."))?;
      let op_raw = cond.get("operator").and_then(|o| o.as_str()).unwrap_or("equals");
      let op = ConditionOp::parse(op_raw)
                 .ok_or_else(|| DomainError::validation(format!("Operador de condición desconocido: {}", op_raw)))?;
      conditions.push(Condition { field: field.to_string(),
                                  op,
                                  value: cond.get("value").cloned().unwrap_or(JsonValue::Null) });
    }
    Ok(Some(Self { operator, conditions }))
  }

  /// Parseo tolerante, usado al cargar filas ya persistidas: cualquier
  /// malformación (incluido un operador de condición desconocido) produce
  /// `None`, que evalúa a `true`.
  pub fn parse_lenient(raw: &JsonValue) -> Option<Self> {
    Self::parse_strict(raw).ok().flatten()
  }
}

fn parse_operator(raw: Option<&JsonValue>) -> LogicOperator {
  match raw.and_then(|v| v.as_str()) {
    Some(s) if s.eq_ignore_ascii_case("or") => LogicOperator::Or,
    _ => LogicOperator::And,
  }
}

/// Evalúa la lógica contra el conjunto completo de valores enviados.
///
/// La búsqueda del valor actual prueba la clave tal cual y con el prefijo
/// `custom_`; una referencia a entidad (objeto con `id`) se sustituye por
/// su identificador antes de comparar. `None` evalúa a `true`.
pub fn evaluate(logic: Option<&ConditionalLogic>, values: &serde_json::Map<String, JsonValue>) -> bool {
  let logic = match logic {
    Some(l) => l,
    None => return true,
  };
  let mut results = Vec::with_capacity(logic.conditions.len());
  for condition in &logic.conditions {
    let actual = values.get(&condition.field)
                       .or_else(|| values.get(&format!("custom_{}", condition.field)))
                       .cloned()
                       .unwrap_or(JsonValue::Null);
    let actual = substitute_entity_id(actual);
    results.push(check(condition.op, &actual, &condition.value));
  }
  match logic.operator {
    LogicOperator::And => results.iter().all(|r| *r),
    LogicOperator::Or => results.iter().any(|r| *r),
  }
}

// Una referencia a entidad llega como objeto `{.., "id": n}` (forma de
// cable de FOREIGN_KEY); la comparación usa el id.
fn substitute_entity_id(actual: JsonValue) -> JsonValue {
  if let JsonValue::Object(map) = &actual {
    if let Some(id) = map.get("id") {
      return id.clone();
    }
  }
  actual
}

fn check(op: ConditionOp, actual: &JsonValue, expected: &JsonValue) -> bool {
  match op {
    ConditionOp::Equals => json_eq(actual, expected),
    ConditionOp::NotEquals => !json_eq(actual, expected),
    ConditionOp::Contains => match actual {
      JsonValue::Array(items) => items.iter().any(|item| json_eq(item, expected)),
      _ => stringify(actual).contains(&stringify(expected)),
    },
    ConditionOp::Gt => compare(actual, expected).map(|o| o == std::cmp::Ordering::Greater).unwrap_or(false),
    ConditionOp::Lt => compare(actual, expected).map(|o| o == std::cmp::Ordering::Less).unwrap_or(false),
  }
}

// Igualdad JSON con coerción numérica cruzada (1 == 1.0).
fn json_eq(a: &JsonValue, b: &JsonValue) -> bool {
  match (a.as_f64(), b.as_f64()) {
    (Some(x), Some(y)) => x == y,
    _ => a == b,
  }
}

// Orden sólo entre números o entre cadenas; `null` nunca ordena.
fn compare(actual: &JsonValue, expected: &JsonValue) -> Option<std::cmp::Ordering> {
  if actual.is_null() {
    return None;
  }
  if let (Some(x), Some(y)) = (actual.as_f64(), expected.as_f64()) {
    return x.partial_cmp(&y);
  }
  if let (Some(x), Some(y)) = (actual.as_str(), expected.as_str()) {
    return Some(x.cmp(y));
  }
  None
}

// Forma de cadena para el test de subcadena de `contains`; null cuenta
// como cadena vacía.
fn stringify(value: &JsonValue) -> String {
  match value {
    JsonValue::Null => String::new(),
    JsonValue::String(s) => s.clone(),
    other => other.to_string(),
  }
}
