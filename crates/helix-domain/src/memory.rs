// Archivo: memory.rs
// Propósito: implementación en memoria de `HelixRepository` para pruebas y
// wiring rápido. No es durable. Todo el estado vive bajo un único mutex
// para que `atomically` pueda respaldar y restaurar el conjunto completo.
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use uuid::Uuid;

use crate::audit::{AuditLog, NewAuditEntry};
use crate::catalog::{Location, NewLocation, Organism, Plasmid};
use crate::errors::{DomainError, Result};
use crate::field_definition::{FieldDefinition, ValidatedFieldDefinition};
use crate::field_value::FieldValue;
use crate::repository::{now, FieldValueWrite, HelixRepository, StoredFieldValue};
use crate::roles::{DatabaseMembership, DatabaseRole, OrganizationMembership, OrganizationRole};
use crate::strain::{NewStrain, Strain, StrainPlasmid};
use crate::tenancy::{NewOrganization, NewResearchDatabase, Organization, ResearchDatabase};
use crate::users::{NewUser, User};

#[derive(Debug, Clone, Default)]
struct MemState {
  next_id: i64,
  users: HashMap<i64, User>,
  organizations: HashMap<i64, Organization>,
  databases: HashMap<i64, ResearchDatabase>,
  organization_memberships: HashMap<i64, OrganizationMembership>,
  database_memberships: HashMap<i64, DatabaseMembership>,
  organisms: HashMap<i64, Organism>,
  locations: HashMap<i64, Location>,
  plasmids: HashMap<i64, Plasmid>,
  strains: HashMap<i64, Strain>,
  strain_plasmids: HashMap<i64, StrainPlasmid>,
  field_definitions: HashMap<i64, FieldDefinition>,
  field_values: HashMap<i64, StoredFieldValue>,
  audit_logs: HashMap<i64, AuditLog>,
}

impl MemState {
  fn next(&mut self) -> i64 {
    self.next_id += 1;
    self.next_id
  }
}

/// Repositorio en memoria. Pensado para pruebas locales; las garantías
/// transaccionales se simulan con copia-y-restauración del estado.
pub struct InMemoryHelixRepository {
  state: Mutex<MemState>,
}

impl InMemoryHelixRepository {
  pub fn new() -> Self {
    Self { state: Mutex::new(MemState::default()) }
  }

  fn lock(&self) -> Result<MutexGuard<'_, MemState>> {
    self.state.lock().map_err(|e| DomainError::Storage(format!("Mutex poisoned: {}", e)))
  }
}

impl Default for InMemoryHelixRepository {
  fn default() -> Self {
    Self::new()
  }
}

fn ci_eq(a: &str, b: &str) -> bool {
  a.to_lowercase() == b.to_lowercase()
}

impl HelixRepository for InMemoryHelixRepository {
  fn create_user(&self, user: NewUser) -> Result<User> {
    let mut state = self.lock()?;
    if state.users.values().any(|u| ci_eq(&u.username, &user.username)) {
      return Err(DomainError::Conflict(format!("Usuario duplicado: {}", user.username)));
    }
    let id = state.next();
    let row = User { id, username: user.username, email: user.email, is_superuser: user.is_superuser };
    state.users.insert(id, row.clone());
    Ok(row)
  }

  fn get_user(&self, id: i64) -> Result<Option<User>> {
    Ok(self.lock()?.users.get(&id).cloned())
  }

  fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
    Ok(self.lock()?.users.values().find(|u| u.username == username).cloned())
  }

  fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
    if email.is_empty() {
      return Ok(None);
    }
    Ok(self.lock()?.users.values().find(|u| u.email == email).cloned())
  }

  fn list_users(&self) -> Result<Vec<User>> {
    let state = self.lock()?;
    let mut users: Vec<User> = state.users.values().cloned().collect();
    users.sort_by_key(|u| u.id);
    Ok(users)
  }

  fn create_organization(&self, org: NewOrganization) -> Result<Organization> {
    let mut state = self.lock()?;
    let id = state.next();
    let row = Organization { id,
                             uuid: Uuid::new_v4(),
                             name: org.name,
                             slug: org.slug,
                             created_by: org.created_by,
                             created_at: now() };
    state.organizations.insert(id, row.clone());
    Ok(row)
  }

  fn get_organization(&self, id: i64) -> Result<Option<Organization>> {
    Ok(self.lock()?.organizations.get(&id).cloned())
  }

  fn set_organization_identity(&self, id: i64, name: &str, slug: &str) -> Result<()> {
    let mut state = self.lock()?;
    let org = state.organizations
                   .get_mut(&id)
                   .ok_or_else(|| DomainError::NotFound(format!("Organización {}", id)))?;
    org.name = name.to_string();
    org.slug = slug.to_string();
    Ok(())
  }

  fn create_database(&self, database: NewResearchDatabase) -> Result<ResearchDatabase> {
    let mut state = self.lock()?;
    if !state.organizations.contains_key(&database.organization_id) {
      return Err(DomainError::NotFound(format!("Organización {}", database.organization_id)));
    }
    let id = state.next();
    let row = ResearchDatabase { id,
                                 organization_id: database.organization_id,
                                 name: database.name,
                                 description: database.description,
                                 created_by: database.created_by,
                                 created_at: now() };
    state.databases.insert(id, row.clone());
    Ok(row)
  }

  fn get_database(&self, id: i64) -> Result<Option<ResearchDatabase>> {
    Ok(self.lock()?.databases.get(&id).cloned())
  }

  fn list_databases(&self, organization_id: i64) -> Result<Vec<ResearchDatabase>> {
    let state = self.lock()?;
    let mut rows: Vec<_> = state.databases.values().filter(|d| d.organization_id == organization_id).cloned().collect();
    rows.sort_by_key(|d| d.id);
    Ok(rows)
  }

  fn upsert_organization_membership(&self,
                                    organization_id: i64,
                                    user_id: i64,
                                    role: OrganizationRole)
                                    -> Result<OrganizationMembership> {
    let mut state = self.lock()?;
    if let Some(existing) =
      state.organization_memberships.values_mut().find(|m| m.organization_id == organization_id && m.user_id == user_id)
    {
      existing.role = role;
      return Ok(existing.clone());
    }
    let id = state.next();
    let row = OrganizationMembership { id, organization_id, user_id, role, joined_at: now() };
    state.organization_memberships.insert(id, row.clone());
    Ok(row)
  }

  fn find_organization_membership(&self, organization_id: i64, user_id: i64) -> Result<Option<OrganizationMembership>> {
    Ok(self.lock()?
           .organization_memberships
           .values()
           .find(|m| m.organization_id == organization_id && m.user_id == user_id)
           .cloned())
  }

  fn list_organization_memberships(&self, organization_id: i64) -> Result<Vec<OrganizationMembership>> {
    let state = self.lock()?;
    let mut rows: Vec<_> =
      state.organization_memberships.values().filter(|m| m.organization_id == organization_id).cloned().collect();
    rows.sort_by_key(|m| m.id);
    Ok(rows)
  }

  fn upsert_database_membership(&self, database_id: i64, user_id: i64, role: DatabaseRole) -> Result<DatabaseMembership> {
    let mut state = self.lock()?;
    if !state.databases.contains_key(&database_id) {
      return Err(DomainError::NotFound(format!("Base de datos {}", database_id)));
    }
    if let Some(existing) =
      state.database_memberships.values_mut().find(|m| m.research_database_id == database_id && m.user_id == user_id)
    {
      existing.role = role;
      return Ok(existing.clone());
    }
    let id = state.next();
    let row = DatabaseMembership { id, research_database_id: database_id, user_id, role, created_at: now() };
    state.database_memberships.insert(id, row.clone());
    Ok(row)
  }

  fn find_database_membership(&self, database_id: i64, user_id: i64) -> Result<Option<DatabaseMembership>> {
    Ok(self.lock()?
           .database_memberships
           .values()
           .find(|m| m.research_database_id == database_id && m.user_id == user_id)
           .cloned())
  }

  fn list_database_memberships(&self, database_id: i64) -> Result<Vec<DatabaseMembership>> {
    let state = self.lock()?;
    let mut rows: Vec<_> =
      state.database_memberships.values().filter(|m| m.research_database_id == database_id).cloned().collect();
    rows.sort_by_key(|m| m.id);
    Ok(rows)
  }

  fn create_organism(&self, database_id: i64, name: &str) -> Result<Organism> {
    let mut state = self.lock()?;
    if state.organisms.values().any(|o| o.research_database_id == database_id && ci_eq(&o.name, name)) {
      return Err(DomainError::Conflict(format!("Organismo duplicado: {}", name)));
    }
    let id = state.next();
    let row = Organism { id, research_database_id: database_id, name: name.to_string() };
    state.organisms.insert(id, row.clone());
    Ok(row)
  }

  fn find_organism_ci(&self, database_id: i64, name: &str) -> Result<Option<Organism>> {
    Ok(self.lock()?
           .organisms
           .values()
           .find(|o| o.research_database_id == database_id && ci_eq(&o.name, name))
           .cloned())
  }

  fn get_organism(&self, id: i64) -> Result<Option<Organism>> {
    Ok(self.lock()?.organisms.get(&id).cloned())
  }

  fn list_organisms(&self, database_id: i64) -> Result<Vec<Organism>> {
    let state = self.lock()?;
    let mut rows: Vec<_> = state.organisms.values().filter(|o| o.research_database_id == database_id).cloned().collect();
    rows.sort_by_key(|o| o.id);
    Ok(rows)
  }

  fn create_location(&self, location: NewLocation) -> Result<Location> {
    let mut state = self.lock()?;
    let duplicate = state.locations.values().any(|l| {
                                               l.research_database_id == location.research_database_id
                                               && l.building == location.building
                                               && l.room == location.room
                                               && l.freezer == location.freezer
                                               && l.box_label == location.box_label
                                               && l.position == location.position
                                             });
    if duplicate {
      return Err(DomainError::Conflict("Ubicación duplicada".to_string()));
    }
    let id = state.next();
    let row = Location { id,
                         research_database_id: location.research_database_id,
                         building: location.building,
                         room: location.room,
                         freezer: location.freezer,
                         box_label: location.box_label,
                         position: location.position };
    state.locations.insert(id, row.clone());
    Ok(row)
  }

  fn find_location_ci(&self, database_id: i64, box_label: &str, position: &str) -> Result<Option<Location>> {
    Ok(self.lock()?
           .locations
           .values()
           .find(|l| {
             l.research_database_id == database_id && ci_eq(&l.box_label, box_label) && ci_eq(&l.position, position)
           })
           .cloned())
  }

  fn get_location(&self, id: i64) -> Result<Option<Location>> {
    Ok(self.lock()?.locations.get(&id).cloned())
  }

  fn list_locations(&self, database_id: i64) -> Result<Vec<Location>> {
    let state = self.lock()?;
    let mut rows: Vec<_> = state.locations.values().filter(|l| l.research_database_id == database_id).cloned().collect();
    rows.sort_by_key(|l| l.id);
    Ok(rows)
  }

  fn create_plasmid(&self, database_id: i64, name: &str, resistance_marker: &str, notes: &str) -> Result<Plasmid> {
    let mut state = self.lock()?;
    if state.plasmids.values().any(|p| p.research_database_id == database_id && ci_eq(&p.name, name)) {
      return Err(DomainError::Conflict(format!("Plásmido duplicado: {}", name)));
    }
    let id = state.next();
    let row = Plasmid { id,
                        research_database_id: database_id,
                        name: name.to_string(),
                        resistance_marker: resistance_marker.to_string(),
                        notes: notes.to_string() };
    state.plasmids.insert(id, row.clone());
    Ok(row)
  }

  fn find_plasmid_ci(&self, database_id: i64, name: &str) -> Result<Option<Plasmid>> {
    Ok(self.lock()?
           .plasmids
           .values()
           .find(|p| p.research_database_id == database_id && ci_eq(&p.name, name))
           .cloned())
  }

  fn get_plasmid(&self, id: i64) -> Result<Option<Plasmid>> {
    Ok(self.lock()?.plasmids.get(&id).cloned())
  }

  fn list_plasmids(&self, database_id: i64) -> Result<Vec<Plasmid>> {
    let state = self.lock()?;
    let mut rows: Vec<_> = state.plasmids.values().filter(|p| p.research_database_id == database_id).cloned().collect();
    rows.sort_by_key(|p| p.id);
    Ok(rows)
  }

  fn create_strain(&self, strain: NewStrain) -> Result<Strain> {
    let mut state = self.lock()?;
    let duplicate = state.strains
                         .values()
                         .any(|s| {
                           s.research_database_id == strain.research_database_id && ci_eq(&s.strain_id, &strain.strain_id)
                         });
    if duplicate {
      return Err(DomainError::Conflict(format!("Cepa duplicada: {}", strain.strain_id)));
    }
    let id = state.next();
    let ts = now();
    let row = Strain { id,
                       research_database_id: strain.research_database_id,
                       strain_id: strain.strain_id,
                       name: strain.name,
                       organism_id: strain.organism_id,
                       genotype: strain.genotype,
                       selective_marker: strain.selective_marker,
                       comments: strain.comments,
                       location_id: strain.location_id,
                       status: strain.status,
                       created_by: strain.created_by,
                       created_at: ts,
                       updated_at: ts,
                       is_active: strain.is_active,
                       is_archived: strain.is_archived,
                       archived_at: strain.archived_at,
                       archived_by: strain.archived_by };
    state.strains.insert(id, row.clone());
    Ok(row)
  }

  fn get_strain(&self, id: i64) -> Result<Option<Strain>> {
    Ok(self.lock()?.strains.get(&id).cloned())
  }

  fn find_strain_ci(&self, database_id: i64, strain_id: &str) -> Result<Option<Strain>> {
    Ok(self.lock()?
           .strains
           .values()
           .find(|s| s.research_database_id == database_id && ci_eq(&s.strain_id, strain_id))
           .cloned())
  }

  fn list_strains(&self, database_id: i64) -> Result<Vec<Strain>> {
    let state = self.lock()?;
    let mut rows: Vec<_> = state.strains.values().filter(|s| s.research_database_id == database_id).cloned().collect();
    rows.sort_by_key(|s| s.id);
    Ok(rows)
  }

  fn delete_strain(&self, id: i64) -> Result<()> {
    let mut state = self.lock()?;
    state.strains.remove(&id);
    state.field_values.retain(|_, v| v.strain_id != id);
    state.strain_plasmids.retain(|_, sp| sp.strain_id != id);
    Ok(())
  }

  fn link_strain_plasmid(&self, strain_id: i64, plasmid_id: i64) -> Result<()> {
    let mut state = self.lock()?;
    if state.strain_plasmids.values().any(|sp| sp.strain_id == strain_id && sp.plasmid_id == plasmid_id) {
      return Ok(());
    }
    let id = state.next();
    state.strain_plasmids.insert(id, StrainPlasmid { id, strain_id, plasmid_id });
    Ok(())
  }

  fn plasmid_ids_for_strain(&self, strain_id: i64) -> Result<Vec<i64>> {
    let state = self.lock()?;
    let mut ids: Vec<i64> =
      state.strain_plasmids.values().filter(|sp| sp.strain_id == strain_id).map(|sp| sp.plasmid_id).collect();
    ids.sort();
    Ok(ids)
  }

  fn create_field_definition(&self, definition: ValidatedFieldDefinition) -> Result<FieldDefinition> {
    let mut state = self.lock()?;
    let clash = state.field_definitions.values().any(|d| {
                                                  d.research_database_id == definition.research_database_id
                                                  && (d.name == definition.name || d.key == definition.key)
                                                });
    if clash {
      return Err(DomainError::Conflict(format!("Definición duplicada: {}", definition.name)));
    }
    let id = state.next();
    let row = FieldDefinition { id,
                                research_database_id: definition.research_database_id,
                                organization_id: definition.organization_id,
                                name: definition.name,
                                key: definition.key,
                                field_type: definition.field_type,
                                choices: definition.choices,
                                default_value: definition.default_value,
                                help_text: definition.help_text,
                                validation_rules: definition.validation_rules,
                                is_unique: definition.is_unique,
                                conditional_logic: definition.conditional_logic,
                                order: definition.order,
                                group_name: definition.group_name,
                                group_order: definition.group_order,
                                visible_to_roles: definition.visible_to_roles,
                                editable_to_roles: definition.editable_to_roles,
                                related_model: definition.related_model,
                                created_by: definition.created_by,
                                created_at: now() };
    state.field_definitions.insert(id, row.clone());
    Ok(row)
  }

  fn update_field_definition(&self, definition: &FieldDefinition) -> Result<()> {
    let mut state = self.lock()?;
    let current = state.field_definitions
                       .get(&definition.id)
                       .cloned()
                       .ok_or_else(|| DomainError::NotFound(format!("Definición {}", definition.id)))?;
    if current.field_type != definition.field_type
       && state.field_values.values().any(|v| v.field_definition_id == definition.id)
    {
      return Err(DomainError::field_validation(current.key.clone(),
                                               "No se puede cambiar el tipo de un campo con valores existentes."));
    }
    let clash = state.field_definitions.values().any(|d| {
                                                  d.id != definition.id
                                                  && d.research_database_id == definition.research_database_id
                                                  && (d.name == definition.name || d.key == definition.key)
                                                });
    if clash {
      return Err(DomainError::Conflict(format!("Definición duplicada: {}", definition.name)));
    }
    state.field_definitions.insert(definition.id, definition.clone());
    Ok(())
  }

  fn get_field_definition(&self, id: i64) -> Result<Option<FieldDefinition>> {
    Ok(self.lock()?.field_definitions.get(&id).cloned())
  }

  fn list_field_definitions(&self, database_id: i64) -> Result<Vec<FieldDefinition>> {
    let state = self.lock()?;
    let mut rows: Vec<_> =
      state.field_definitions.values().filter(|d| d.research_database_id == database_id).cloned().collect();
    rows.sort_by(|a, b| {
          (a.group_order, a.order, a.id).cmp(&(b.group_order, b.order, b.id))
        });
    Ok(rows)
  }

  fn field_values_for_strain(&self, strain_id: i64) -> Result<Vec<StoredFieldValue>> {
    let state = self.lock()?;
    let mut rows: Vec<_> = state.field_values.values().filter(|v| v.strain_id == strain_id).cloned().collect();
    rows.sort_by_key(|v| v.field_definition_id);
    Ok(rows)
  }

  fn has_field_values(&self, field_definition_id: i64) -> Result<bool> {
    Ok(self.lock()?.field_values.values().any(|v| v.field_definition_id == field_definition_id))
  }

  fn unique_value_exists(&self, field_definition_id: i64, value: &FieldValue, exclude_strain: Option<i64>) -> Result<bool> {
    let state = self.lock()?;
    Ok(state.field_values.values().any(|v| {
                                   v.field_definition_id == field_definition_id
                                   && Some(v.strain_id) != exclude_strain
                                   && &v.value == value
                                 }))
  }

  fn apply_field_value_writes(&self, strain_id: i64, writes: &[FieldValueWrite]) -> Result<()> {
    let mut state = self.lock()?;
    if !state.strains.contains_key(&strain_id) {
      return Err(DomainError::NotFound(format!("Cepa {}", strain_id)));
    }
    for write in writes {
      match write {
        FieldValueWrite::Delete { field_definition_id } => {
          state.field_values
               .retain(|_, v| !(v.strain_id == strain_id && v.field_definition_id == *field_definition_id));
        }
        FieldValueWrite::Upsert { field_definition_id, value } => {
          let existing_id = state.field_values
                                 .values()
                                 .find(|v| v.strain_id == strain_id && v.field_definition_id == *field_definition_id)
                                 .map(|v| v.id);
          match existing_id {
            Some(id) => {
              if let Some(row) = state.field_values.get_mut(&id) {
                row.value = value.clone();
              }
            }
            None => {
              let id = state.next();
              state.field_values.insert(id,
                                        StoredFieldValue { id,
                                                           strain_id,
                                                           field_definition_id: *field_definition_id,
                                                           value: value.clone() });
            }
          }
        }
      }
    }
    Ok(())
  }

  fn record_audit(&self, entry: NewAuditEntry) -> Result<AuditLog> {
    let mut state = self.lock()?;
    let id = state.next();
    let row = AuditLog { id,
                         database_id: entry.database_id,
                         user_id: entry.user_id,
                         action: entry.action,
                         object_type: entry.object_type,
                         object_id: entry.object_id,
                         metadata: entry.metadata,
                         timestamp: entry.timestamp.unwrap_or_else(now) };
    state.audit_logs.insert(id, row.clone());
    Ok(row)
  }

  fn list_audit_for_database(&self, database_id: i64) -> Result<Vec<AuditLog>> {
    let state = self.lock()?;
    let mut rows: Vec<_> =
      state.audit_logs.values().filter(|l| l.database_id == Some(database_id)).cloned().collect();
    rows.sort_by_key(|l| l.id);
    Ok(rows)
  }

  fn delete_organization_data(&self, organization_id: i64) -> Result<()> {
    let mut state = self.lock()?;
    let database_ids: Vec<i64> =
      state.databases.values().filter(|d| d.organization_id == organization_id).map(|d| d.id).collect();
    let strain_ids: Vec<i64> =
      state.strains.values().filter(|s| database_ids.contains(&s.research_database_id)).map(|s| s.id).collect();
    // hijos antes que padres
    state.field_values.retain(|_, v| !strain_ids.contains(&v.strain_id));
    state.strain_plasmids.retain(|_, sp| !strain_ids.contains(&sp.strain_id));
    state.strains.retain(|_, s| !database_ids.contains(&s.research_database_id));
    state.field_definitions.retain(|_, d| !database_ids.contains(&d.research_database_id));
    state.audit_logs.retain(|_, l| !matches!(l.database_id, Some(db) if database_ids.contains(&db)));
    state.database_memberships.retain(|_, m| !database_ids.contains(&m.research_database_id));
    state.organisms.retain(|_, o| !database_ids.contains(&o.research_database_id));
    state.locations.retain(|_, l| !database_ids.contains(&l.research_database_id));
    state.plasmids.retain(|_, p| !database_ids.contains(&p.research_database_id));
    state.databases.retain(|_, d| d.organization_id != organization_id);
    Ok(())
  }

  fn atomically(&self, work: &mut dyn FnMut() -> Result<()>) -> Result<()> {
    let backup = self.lock()?.clone();
    match work() {
      Ok(()) => Ok(()),
      Err(e) => {
        *self.lock()? = backup;
        Err(e)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::field_definition::{FieldType, NewFieldDefinition};

  fn seed(repo: &InMemoryHelixRepository) -> (Organization, ResearchDatabase) {
    let org = repo.create_organization(NewOrganization { name: "Lab".into(), slug: "lab".into(), created_by: None })
                  .unwrap();
    let db = repo.create_database(NewResearchDatabase { organization_id: org.id,
                                                        name: "Cepario".into(),
                                                        description: String::new(),
                                                        created_by: None })
                 .unwrap();
    (org, db)
  }

  #[test]
  fn duplicate_organism_name_is_conflict_case_insensitive() {
    let repo = InMemoryHelixRepository::new();
    let (_org, db) = seed(&repo);
    repo.create_organism(db.id, "E. coli").unwrap();
    let err = repo.create_organism(db.id, "e. COLI").unwrap_err();
    assert!(matches!(err, DomainError::Conflict(_)));
    assert!(repo.find_organism_ci(db.id, "E. COLI").unwrap().is_some());
  }

  #[test]
  fn field_definitions_keep_stable_order() {
    let repo = InMemoryHelixRepository::new();
    let (org, db) = seed(&repo);
    let mut a = NewFieldDefinition::basic(db.id, org.id, "Zeta", FieldType::Text);
    a.order = 2;
    let mut b = NewFieldDefinition::basic(db.id, org.id, "Alfa", FieldType::Text);
    b.order = 2;
    let mut c = NewFieldDefinition::basic(db.id, org.id, "Beta", FieldType::Text);
    c.order = 1;
    let a = repo.create_field_definition(a.validated().unwrap()).unwrap();
    let b = repo.create_field_definition(b.validated().unwrap()).unwrap();
    let c = repo.create_field_definition(c.validated().unwrap()).unwrap();
    let listed: Vec<i64> = repo.list_field_definitions(db.id).unwrap().iter().map(|d| d.id).collect();
    // orden 1 primero; empate en orden 2 resuelto por id de creación
    assert_eq!(listed, vec![c.id, a.id, b.id]);
    let again: Vec<i64> = repo.list_field_definitions(db.id).unwrap().iter().map(|d| d.id).collect();
    assert_eq!(listed, again);
  }

  #[test]
  fn field_type_change_with_values_is_rejected() {
    let repo = InMemoryHelixRepository::new();
    let (org, db) = seed(&repo);
    let organism = repo.create_organism(db.id, "E. coli").unwrap();
    let location = repo.create_location(NewLocation { research_database_id: db.id,
                                                      building: String::new(),
                                                      room: String::new(),
                                                      freezer: String::new(),
                                                      box_label: "Box 1".into(),
                                                      position: "A1".into() })
                       .unwrap();
    let strain =
      repo.create_strain(NewStrain::active(db.id, "HM-001", "HM-001", organism.id, location.id, None)).unwrap();
    let def = repo.create_field_definition(NewFieldDefinition::basic(db.id, org.id, "Nota", FieldType::Text).validated()
                                                                                                            .unwrap())
                  .unwrap();
    repo.apply_field_value_writes(strain.id,
                                  &[FieldValueWrite::Upsert { field_definition_id: def.id,
                                                              value: FieldValue::Text("x".into()) }])
        .unwrap();
    let mut changed = def.clone();
    changed.field_type = FieldType::Integer;
    let err = repo.update_field_definition(&changed).unwrap_err();
    assert!(matches!(err, DomainError::Validation { .. }));
    // sin valores el cambio sí se permite
    let def2 = repo.create_field_definition(NewFieldDefinition::basic(db.id, org.id, "Libre", FieldType::Text).validated()
                                                                                                              .unwrap())
                   .unwrap();
    let mut changed2 = def2.clone();
    changed2.field_type = FieldType::Integer;
    assert!(repo.update_field_definition(&changed2).is_ok());
  }

  #[test]
  fn atomically_rolls_back_on_error() {
    let repo = InMemoryHelixRepository::new();
    let (_org, db) = seed(&repo);
    let result = repo.atomically(&mut || {
                       repo.create_organism(db.id, "Levadura")?;
                       Err(DomainError::validation("abortar"))
                     });
    assert!(result.is_err());
    assert!(repo.find_organism_ci(db.id, "Levadura").unwrap().is_none());
  }

  #[test]
  fn atomically_nested_inner_failure_keeps_outer_writes() {
    let repo = InMemoryHelixRepository::new();
    let (_org, db) = seed(&repo);
    repo.atomically(&mut || {
          repo.create_organism(db.id, "Exterior")?;
          let inner = repo.atomically(&mut || {
                            repo.create_organism(db.id, "Interior")?;
                            Err(DomainError::validation("fila mala"))
                          });
          assert!(inner.is_err());
          Ok(())
        })
        .unwrap();
    assert!(repo.find_organism_ci(db.id, "Exterior").unwrap().is_some());
    assert!(repo.find_organism_ci(db.id, "Interior").unwrap().is_none());
  }
}
