// Archivo: repository.rs
// Propósito: definir el trait `HelixRepository`, el contrato que deben
// implementar las persistencias (Diesel, in-memory, etc.). Las operaciones
// de creación devuelven la fila completa con su id asignado; las
// colisiones de unicidad se reportan como `DomainError::Conflict` para que
// los llamadores puedan re-consultar tras una carrera.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::{AuditLog, NewAuditEntry};
use crate::catalog::{Location, NewLocation, Organism, Plasmid};
use crate::errors::Result;
use crate::field_definition::{FieldDefinition, ValidatedFieldDefinition};
use crate::field_value::FieldValue;
use crate::roles::{DatabaseMembership, DatabaseRole, OrganizationMembership, OrganizationRole};
use crate::strain::{NewStrain, Strain};
use crate::tenancy::{NewOrganization, NewResearchDatabase, Organization, ResearchDatabase};
use crate::users::{NewUser, User};

/// Fila persistida de un valor de campo: una por `(cepa, definición)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFieldValue {
  pub id: i64,
  pub strain_id: i64,
  pub field_definition_id: i64,
  pub value: FieldValue,
}

/// Escritura atómica sobre los valores de una cepa. El constructor de
/// formularios calcula el conjunto completo y el repositorio lo aplica
/// todo-o-nada.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValueWrite {
  /// Crea o reemplaza la fila `(cepa, definición)` con el valor dado.
  Upsert { field_definition_id: i64, value: FieldValue },
  /// Elimina la fila `(cepa, definición)` si existe.
  Delete { field_definition_id: i64 },
}

/// Contrato de persistencia del inventario.
///
/// Las implementaciones deben garantizar:
/// - unicidad case-insensitive donde se indica, señalada con `Conflict`;
/// - `apply_field_value_writes` atómico (una transacción);
/// - `atomically` como frontera transaccional anidable (savepoints en los
///   backends SQL, copia-y-restauración en memoria).
pub trait HelixRepository: Send + Sync {
  // --- directorio de usuarios -------------------------------------------
  fn create_user(&self, user: NewUser) -> Result<User>;
  fn get_user(&self, id: i64) -> Result<Option<User>>;
  fn find_user_by_username(&self, username: &str) -> Result<Option<User>>;
  fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;
  fn list_users(&self) -> Result<Vec<User>>;

  // --- organizaciones y bases de datos ----------------------------------
  fn create_organization(&self, org: NewOrganization) -> Result<Organization>;
  fn get_organization(&self, id: i64) -> Result<Option<Organization>>;
  /// Actualiza nombre y slug (una restauración repone la identidad del
  /// documento). El `uuid` nunca cambia.
  fn set_organization_identity(&self, id: i64, name: &str, slug: &str) -> Result<()>;
  fn create_database(&self, database: NewResearchDatabase) -> Result<ResearchDatabase>;
  fn get_database(&self, id: i64) -> Result<Option<ResearchDatabase>>;
  fn list_databases(&self, organization_id: i64) -> Result<Vec<ResearchDatabase>>;

  // --- membresías --------------------------------------------------------
  fn upsert_organization_membership(&self,
                                    organization_id: i64,
                                    user_id: i64,
                                    role: OrganizationRole)
                                    -> Result<OrganizationMembership>;
  fn find_organization_membership(&self, organization_id: i64, user_id: i64) -> Result<Option<OrganizationMembership>>;
  fn list_organization_memberships(&self, organization_id: i64) -> Result<Vec<OrganizationMembership>>;
  fn upsert_database_membership(&self, database_id: i64, user_id: i64, role: DatabaseRole) -> Result<DatabaseMembership>;
  fn find_database_membership(&self, database_id: i64, user_id: i64) -> Result<Option<DatabaseMembership>>;
  fn list_database_memberships(&self, database_id: i64) -> Result<Vec<DatabaseMembership>>;

  // --- catálogos ---------------------------------------------------------
  /// `Conflict` si ya existe un organismo con ese nombre (sin distinguir
  /// mayúsculas) en la base de datos.
  fn create_organism(&self, database_id: i64, name: &str) -> Result<Organism>;
  fn find_organism_ci(&self, database_id: i64, name: &str) -> Result<Option<Organism>>;
  fn get_organism(&self, id: i64) -> Result<Option<Organism>>;
  fn list_organisms(&self, database_id: i64) -> Result<Vec<Organism>>;

  /// `Conflict` si la tupla completa ya existe en la base de datos.
  fn create_location(&self, location: NewLocation) -> Result<Location>;
  fn find_location_ci(&self, database_id: i64, box_label: &str, position: &str) -> Result<Option<Location>>;
  fn get_location(&self, id: i64) -> Result<Option<Location>>;
  fn list_locations(&self, database_id: i64) -> Result<Vec<Location>>;

  /// `Conflict` si ya existe un plásmido con ese nombre (ci).
  fn create_plasmid(&self, database_id: i64, name: &str, resistance_marker: &str, notes: &str) -> Result<Plasmid>;
  fn find_plasmid_ci(&self, database_id: i64, name: &str) -> Result<Option<Plasmid>>;
  fn get_plasmid(&self, id: i64) -> Result<Option<Plasmid>>;
  fn list_plasmids(&self, database_id: i64) -> Result<Vec<Plasmid>>;

  // --- cepas -------------------------------------------------------------
  /// `Conflict` si `strain_id` ya existe (ci) en la base de datos,
  /// incluidas filas archivadas.
  fn create_strain(&self, strain: NewStrain) -> Result<Strain>;
  fn get_strain(&self, id: i64) -> Result<Option<Strain>>;
  /// Búsqueda por clave natural sin distinguir mayúsculas; incluye filas
  /// archivadas e inactivas.
  fn find_strain_ci(&self, database_id: i64, strain_id: &str) -> Result<Option<Strain>>;
  fn list_strains(&self, database_id: i64) -> Result<Vec<Strain>>;
  fn delete_strain(&self, id: i64) -> Result<()>;
  /// Idempotente: el par ya vinculado no es un error.
  fn link_strain_plasmid(&self, strain_id: i64, plasmid_id: i64) -> Result<()>;
  fn plasmid_ids_for_strain(&self, strain_id: i64) -> Result<Vec<i64>>;

  // --- esquema de campos -------------------------------------------------
  /// `Conflict` si `(base, name)` o `(base, key)` ya existen.
  fn create_field_definition(&self, definition: ValidatedFieldDefinition) -> Result<FieldDefinition>;
  /// Rechaza con `Validation` un cambio de `field_type` cuando ya existen
  /// valores bajo la definición.
  fn update_field_definition(&self, definition: &FieldDefinition) -> Result<()>;
  fn get_field_definition(&self, id: i64) -> Result<Option<FieldDefinition>>;
  /// Ordenadas por `(group_order, order, id)`; el id como desempate hace
  /// el orden estable entre lecturas.
  fn list_field_definitions(&self, database_id: i64) -> Result<Vec<FieldDefinition>>;

  // --- valores de campos -------------------------------------------------
  fn field_values_for_strain(&self, strain_id: i64) -> Result<Vec<StoredFieldValue>>;
  fn has_field_values(&self, field_definition_id: i64) -> Result<bool>;
  /// `true` si otra cepa de la misma base ya tiene un valor igual para la
  /// definición; `exclude_strain` excluye la cepa en edición.
  fn unique_value_exists(&self, field_definition_id: i64, value: &FieldValue, exclude_strain: Option<i64>) -> Result<bool>;
  /// Aplica el conjunto de escrituras en una sola transacción.
  fn apply_field_value_writes(&self, strain_id: i64, writes: &[FieldValueWrite]) -> Result<()>;

  // --- auditoría ---------------------------------------------------------
  fn record_audit(&self, entry: NewAuditEntry) -> Result<AuditLog>;
  fn list_audit_for_database(&self, database_id: i64) -> Result<Vec<AuditLog>>;

  // --- restauración ------------------------------------------------------
  /// Borra todo el dataset de la organización en orden de dependencia
  /// (hijos antes que padres). La organización misma sobrevive.
  fn delete_organization_data(&self, organization_id: i64) -> Result<()>;

  // --- transacciones -----------------------------------------------------
  /// Ejecuta `work` dentro de una frontera transaccional. Anidable: los
  /// backends SQL usan savepoints, la memoria una copia de respaldo. Si
  /// `work` devuelve `Err`, todo lo escrito dentro se revierte y el error
  /// se propaga.
  fn atomically(&self, work: &mut dyn FnMut() -> Result<()>) -> Result<()>;
}

/// Timestamp "ahora" compartido por las implementaciones.
pub fn now() -> DateTime<Utc> {
  Utc::now()
}
