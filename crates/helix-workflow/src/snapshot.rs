// Archivo: snapshot.rs
// Propósito: exportación y restauración del grafo relacional completo de
// una organización como documento JSON versionado. La restauración es
// todo-o-nada: valida versión e identidad antes de mutar, borra el dataset
// actual en orden de dependencia y recrea cada fila remapeando ids.
use std::collections::HashMap;
use std::io::{Cursor, Read, Write};

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use helix_domain::{actions, ConditionalLogic, DatabaseRole, DomainError, FieldType, FieldValue, FieldValueWrite,
                   HelixRepository, NewAuditEntry, NewLocation, NewResearchDatabase, NewStrain, Organization,
                   OrganizationRole, RelatedEntityKind, StrainStatus, User, ValidatedFieldDefinition, ValidationRules};

use crate::errors::{Result, WorkflowError};

/// Versión de formato soportada; un documento con otra versión se rechaza.
pub const SNAPSHOT_VERSION: &str = "1.0";

/// Nombre del único miembro del archivo zip.
pub const SNAPSHOT_MEMBER: &str = "snapshot.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationSection {
  pub id: i64,
  pub uuid: Uuid,
  pub name: String,
  pub slug: String,
  pub created_by_id: Option<i64>,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberSection {
  pub user_id: i64,
  pub username: String,
  pub email: String,
  pub role: OrganizationRole,
  pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
  pub id: i64,
  pub name: String,
  pub description: String,
  pub created_by_id: Option<i64>,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseMembershipSection {
  pub research_database_id: i64,
  pub user_id: i64,
  pub username: String,
  pub email: String,
  pub role: DatabaseRole,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganismSection {
  pub id: i64,
  pub research_database_id: i64,
  pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationSection {
  pub id: i64,
  pub research_database_id: i64,
  pub building: String,
  pub room: String,
  pub freezer: String,
  #[serde(rename = "box")]
  pub box_label: String,
  pub position: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlasmidSection {
  pub id: i64,
  pub research_database_id: i64,
  pub name: String,
  pub resistance_marker: String,
  pub notes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrainSection {
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
  pub created_by_id: Option<i64>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub is_active: bool,
  pub is_archived: bool,
  pub archived_at: Option<DateTime<Utc>>,
  pub archived_by_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrainPlasmidSection {
  pub strain_id: i64,
  pub plasmid_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomFieldSection {
  pub id: i64,
  pub research_database_id: i64,
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
  pub created_by_id: Option<i64>,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldValueSection {
  pub strain_id: i64,
  pub field_definition_id: i64,
  pub value: FieldValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogSection {
  pub database_id: Option<i64>,
  pub user_id: Option<i64>,
  pub action: String,
  pub object_type: String,
  pub object_id: Option<String>,
  pub metadata: JsonValue,
  pub timestamp: DateTime<Utc>,
}

/// Documento de snapshot: el subárbol relacional completo de una
/// organización, plano y versionado, con las claves foráneas expresadas
/// como ids de origen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotDocument {
  pub organization: OrganizationSection,
  pub members: Vec<MemberSection>,
  pub databases: Vec<DatabaseSection>,
  pub database_memberships: Vec<DatabaseMembershipSection>,
  pub organisms: Vec<OrganismSection>,
  pub locations: Vec<LocationSection>,
  pub plasmids: Vec<PlasmidSection>,
  pub strains: Vec<StrainSection>,
  pub strain_plasmids: Vec<StrainPlasmidSection>,
  pub custom_fields: Vec<CustomFieldSection>,
  pub field_values: Vec<FieldValueSection>,
  pub audit_logs: Vec<AuditLogSection>,
  pub exported_at: DateTime<Utc>,
  pub version: String,
}

/// Recorre el subárbol completo de la organización y lo serializa.
pub fn export_organization(repo: &dyn HelixRepository, organization: &Organization) -> Result<SnapshotDocument> {
  let databases = repo.list_databases(organization.id)?;

  let mut members = Vec::new();
  for membership in repo.list_organization_memberships(organization.id)? {
    let user = repo.get_user(membership.user_id)?;
    members.push(MemberSection { user_id: membership.user_id,
                                 username: user.as_ref().map(|u| u.username.clone()).unwrap_or_default(),
                                 email: user.map(|u| u.email).unwrap_or_default(),
                                 role: membership.role,
                                 joined_at: membership.joined_at });
  }

  let mut database_sections = Vec::new();
  let mut database_memberships = Vec::new();
  let mut organisms = Vec::new();
  let mut locations = Vec::new();
  let mut plasmids = Vec::new();
  let mut strains = Vec::new();
  let mut strain_plasmids = Vec::new();
  let mut custom_fields = Vec::new();
  let mut field_values = Vec::new();
  let mut audit_logs = Vec::new();

  for database in &databases {
    database_sections.push(DatabaseSection { id: database.id,
                                             name: database.name.clone(),
                                             description: database.description.clone(),
                                             created_by_id: database.created_by,
                                             created_at: database.created_at });

    for membership in repo.list_database_memberships(database.id)? {
      let user = repo.get_user(membership.user_id)?;
      database_memberships.push(DatabaseMembershipSection { research_database_id: database.id,
                                                            user_id: membership.user_id,
                                                            username: user.as_ref()
                                                                          .map(|u| u.username.clone())
                                                                          .unwrap_or_default(),
                                                            email: user.map(|u| u.email).unwrap_or_default(),
                                                            role: membership.role,
                                                            created_at: membership.created_at });
    }

    for organism in repo.list_organisms(database.id)? {
      organisms.push(OrganismSection { id: organism.id,
                                       research_database_id: database.id,
                                       name: organism.name });
    }
    for location in repo.list_locations(database.id)? {
      locations.push(LocationSection { id: location.id,
                                       research_database_id: database.id,
                                       building: location.building,
                                       room: location.room,
                                       freezer: location.freezer,
                                       box_label: location.box_label,
                                       position: location.position });
    }
    for plasmid in repo.list_plasmids(database.id)? {
      plasmids.push(PlasmidSection { id: plasmid.id,
                                     research_database_id: database.id,
                                     name: plasmid.name,
                                     resistance_marker: plasmid.resistance_marker,
                                     notes: plasmid.notes });
    }

    for strain in repo.list_strains(database.id)? {
      for plasmid_id in repo.plasmid_ids_for_strain(strain.id)? {
        strain_plasmids.push(StrainPlasmidSection { strain_id: strain.id, plasmid_id });
      }
      for stored in repo.field_values_for_strain(strain.id)? {
        field_values.push(FieldValueSection { strain_id: stored.strain_id,
                                              field_definition_id: stored.field_definition_id,
                                              value: stored.value });
      }
      strains.push(StrainSection { id: strain.id,
                                   research_database_id: database.id,
                                   strain_id: strain.strain_id,
                                   name: strain.name,
                                   organism_id: strain.organism_id,
                                   genotype: strain.genotype,
                                   selective_marker: strain.selective_marker,
                                   comments: strain.comments,
                                   location_id: strain.location_id,
                                   status: strain.status,
                                   created_by_id: strain.created_by,
                                   created_at: strain.created_at,
                                   updated_at: strain.updated_at,
                                   is_active: strain.is_active,
                                   is_archived: strain.is_archived,
                                   archived_at: strain.archived_at,
                                   archived_by_id: strain.archived_by });
    }

    for definition in repo.list_field_definitions(database.id)? {
      custom_fields.push(CustomFieldSection { id: definition.id,
                                              research_database_id: database.id,
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
                                              created_by_id: definition.created_by,
                                              created_at: definition.created_at });
    }

    for log in repo.list_audit_for_database(database.id)? {
      audit_logs.push(AuditLogSection { database_id: Some(database.id),
                                        user_id: log.user_id,
                                        action: log.action,
                                        object_type: log.object_type,
                                        object_id: log.object_id,
                                        metadata: log.metadata,
                                        timestamp: log.timestamp });
    }
  }

  info!("exportada organización {} ({} bases de datos, {} cepas)",
        organization.id,
        database_sections.len(),
        strains.len());
  Ok(SnapshotDocument { organization: OrganizationSection { id: organization.id,
                                                            uuid: organization.uuid,
                                                            name: organization.name.clone(),
                                                            slug: organization.slug.clone(),
                                                            created_by_id: organization.created_by,
                                                            created_at: organization.created_at },
                        members,
                        databases: database_sections,
                        database_memberships,
                        organisms,
                        locations,
                        plasmids,
                        strains,
                        strain_plasmids,
                        custom_fields,
                        field_values,
                        audit_logs,
                        exported_at: Utc::now(),
                        version: SNAPSHOT_VERSION.to_string() })
}

/// Comprime el documento como zip con un único miembro `snapshot.json`.
pub fn make_snapshot_zip(document: &SnapshotDocument) -> Result<Vec<u8>> {
  let mut buffer = Cursor::new(Vec::new());
  {
    let mut writer = zip::ZipWriter::new(&mut buffer);
    let options =
      zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    writer.start_file(SNAPSHOT_MEMBER, options)?;
    writer.write_all(&serde_json::to_vec_pretty(document)?)?;
    writer.finish()?;
  }
  Ok(buffer.into_inner())
}

/// Lee y valida el archivo zip de un snapshot.
pub fn read_snapshot_zip(content: &[u8]) -> Result<SnapshotDocument> {
  let mut archive = zip::ZipArchive::new(Cursor::new(content))?;
  let mut member = archive.by_name(SNAPSHOT_MEMBER)
                          .map_err(|_| WorkflowError::Validation(format!("El archivo no contiene {}.", SNAPSHOT_MEMBER)))?;
  let mut text = String::new();
  member.read_to_string(&mut text)?;
  Ok(serde_json::from_str(&text)?)
}

// Resolución de usuarios del documento contra el directorio vivo:
// id → username → email → fallback.
struct UserDirectory {
  by_id: HashMap<i64, User>,
  by_username: HashMap<String, User>,
  by_email: HashMap<String, User>,
}

impl UserDirectory {
  fn load(repo: &dyn HelixRepository) -> std::result::Result<Self, DomainError> {
    let users = repo.list_users()?;
    let mut by_id = HashMap::new();
    let mut by_username = HashMap::new();
    let mut by_email = HashMap::new();
    for user in users {
      by_username.insert(user.username.clone(), user.clone());
      if !user.email.is_empty() {
        by_email.insert(user.email.clone(), user.clone());
      }
      by_id.insert(user.id, user);
    }
    Ok(Self { by_id, by_username, by_email })
  }

  fn resolve(&self,
             user_id: Option<i64>,
             username: Option<&str>,
             email: Option<&str>,
             fallback: Option<&User>)
             -> Option<User> {
    user_id.and_then(|id| self.by_id.get(&id))
           .or_else(|| username.and_then(|u| self.by_username.get(u)))
           .or_else(|| email.and_then(|e| self.by_email.get(e)))
           .cloned()
           .or_else(|| fallback.cloned())
  }
}

/// Restaura el snapshot sobre la organización destino.
///
/// Rechaza con `Conflict` (antes de cualquier mutación) un documento con
/// versión no soportada o cuyo uuid de organización no coincide con el
/// destino. Después, dentro de una única transacción: borra el dataset
/// actual (hijos antes que padres), repone nombre/slug y recrea cada
/// sección en orden de dependencia manteniendo mapas id-viejo → id-nuevo.
/// Las referencias a usuarios se resuelven por id, username y email, con
/// `acting_user` como último recurso, de modo que una restauración nunca
/// falla sólo porque un usuario ya no exista.
pub fn restore_organization(repo: &dyn HelixRepository,
                            organization: &Organization,
                            document: &SnapshotDocument,
                            acting_user: &User)
                            -> Result<()> {
  if document.version != SNAPSHOT_VERSION {
    return Err(WorkflowError::Domain(DomainError::Conflict("Versión de snapshot no soportada.".into())));
  }
  if document.organization.uuid != organization.uuid {
    return Err(WorkflowError::Domain(DomainError::Conflict(
      "El snapshot pertenece a otra organización.".into(),
    )));
  }

  let directory = UserDirectory::load(repo).map_err(WorkflowError::Domain)?;

  repo.atomically(&mut || {
        repo.delete_organization_data(organization.id)?;
        repo.set_organization_identity(organization.id, &document.organization.name, &document.organization.slug)?;

        for member in &document.members {
          let user = directory.resolve(Some(member.user_id),
                                       Some(member.username.as_str()),
                                       Some(member.email.as_str()),
                                       Some(acting_user));
          if let Some(user) = user {
            repo.upsert_organization_membership(organization.id, user.id, member.role)?;
          }
        }

        let mut database_map: HashMap<i64, i64> = HashMap::new();
        for section in &document.databases {
          let created_by = directory.resolve(section.created_by_id, None, None, Some(acting_user)).map(|u| u.id);
          let database = repo.create_database(NewResearchDatabase { organization_id: organization.id,
                                                                    name: section.name.clone(),
                                                                    description: section.description.clone(),
                                                                    created_by })?;
          database_map.insert(section.id, database.id);
        }

        for membership in &document.database_memberships {
          let database_id = match database_map.get(&membership.research_database_id) {
            Some(id) => *id,
            None => continue,
          };
          let user = directory.resolve(Some(membership.user_id),
                                       Some(membership.username.as_str()),
                                       Some(membership.email.as_str()),
                                       Some(acting_user));
          if let Some(user) = user {
            repo.upsert_database_membership(database_id, user.id, membership.role)?;
          }
        }

        let mut organism_map: HashMap<i64, i64> = HashMap::new();
        for section in &document.organisms {
          let database_id = match database_map.get(&section.research_database_id) {
            Some(id) => *id,
            None => continue,
          };
          let organism = repo.create_organism(database_id, &section.name)?;
          organism_map.insert(section.id, organism.id);
        }

        let mut location_map: HashMap<i64, i64> = HashMap::new();
        for section in &document.locations {
          let database_id = match database_map.get(&section.research_database_id) {
            Some(id) => *id,
            None => continue,
          };
          let location = repo.create_location(NewLocation { research_database_id: database_id,
                                                            building: section.building.clone(),
                                                            room: section.room.clone(),
                                                            freezer: section.freezer.clone(),
                                                            box_label: section.box_label.clone(),
                                                            position: section.position.clone() })?;
          location_map.insert(section.id, location.id);
        }

        let mut plasmid_map: HashMap<i64, i64> = HashMap::new();
        for section in &document.plasmids {
          let database_id = match database_map.get(&section.research_database_id) {
            Some(id) => *id,
            None => continue,
          };
          let plasmid = repo.create_plasmid(database_id, &section.name, &section.resistance_marker, &section.notes)?;
          plasmid_map.insert(section.id, plasmid.id);
        }

        let mut strain_map: HashMap<i64, i64> = HashMap::new();
        for section in &document.strains {
          let database_id = database_map.get(&section.research_database_id);
          let organism_id = organism_map.get(&section.organism_id);
          let location_id = location_map.get(&section.location_id);
          let (database_id, organism_id, location_id) = match (database_id, organism_id, location_id) {
            (Some(d), Some(o), Some(l)) => (*d, *o, *l),
            _ => continue,
          };
          let created_by = directory.resolve(section.created_by_id, None, None, Some(acting_user)).map(|u| u.id);
          let archived_by = directory.resolve(section.archived_by_id, None, None, None).map(|u| u.id);
          let strain = repo.create_strain(NewStrain { research_database_id: database_id,
                                                      strain_id: section.strain_id.clone(),
                                                      name: section.name.clone(),
                                                      organism_id,
                                                      genotype: section.genotype.clone(),
                                                      selective_marker: section.selective_marker.clone(),
                                                      comments: section.comments.clone(),
                                                      location_id,
                                                      status: section.status,
                                                      created_by,
                                                      is_active: section.is_active,
                                                      is_archived: section.is_archived,
                                                      archived_at: section.archived_at,
                                                      archived_by })?;
          strain_map.insert(section.id, strain.id);
        }

        for relation in &document.strain_plasmids {
          if let (Some(strain_id), Some(plasmid_id)) =
            (strain_map.get(&relation.strain_id), plasmid_map.get(&relation.plasmid_id))
          {
            repo.link_strain_plasmid(*strain_id, *plasmid_id)?;
          }
        }

        let mut field_map: HashMap<i64, i64> = HashMap::new();
        for section in &document.custom_fields {
          let database_id = match database_map.get(&section.research_database_id) {
            Some(id) => *id,
            None => continue,
          };
          let created_by = directory.resolve(section.created_by_id, None, None, Some(acting_user)).map(|u| u.id);
          let definition =
            repo.create_field_definition(ValidatedFieldDefinition { research_database_id: database_id,
                                                                    organization_id: organization.id,
                                                                    name: section.name.clone(),
                                                                    key: section.key.clone(),
                                                                    field_type: section.field_type,
                                                                    choices: section.choices.clone(),
                                                                    default_value: section.default_value.clone(),
                                                                    help_text: section.help_text.clone(),
                                                                    validation_rules: section.validation_rules,
                                                                    is_unique: section.is_unique,
                                                                    conditional_logic: section.conditional_logic
                                                                                              .clone(),
                                                                    order: section.order,
                                                                    group_name: section.group_name.clone(),
                                                                    group_order: section.group_order,
                                                                    visible_to_roles: section.visible_to_roles
                                                                                             .clone(),
                                                                    editable_to_roles: section.editable_to_roles
                                                                                              .clone(),
                                                                    related_model: section.related_model,
                                                                    created_by })?;
          field_map.insert(section.id, definition.id);
        }

        for section in &document.field_values {
          let (strain_id, field_definition_id) =
            match (strain_map.get(&section.strain_id), field_map.get(&section.field_definition_id)) {
              (Some(s), Some(f)) => (*s, *f),
              _ => continue,
            };
          repo.apply_field_value_writes(strain_id,
                                        &[FieldValueWrite::Upsert { field_definition_id,
                                                                    value: section.value.clone() }])?;
        }

        for section in &document.audit_logs {
          let database_id = section.database_id.and_then(|id| database_map.get(&id)).copied();
          let user_id = directory.resolve(section.user_id, None, None, None).map(|u| u.id);
          repo.record_audit(NewAuditEntry { database_id,
                                            user_id,
                                            action: section.action.clone(),
                                            object_type: section.object_type.clone(),
                                            object_id: section.object_id.clone(),
                                            metadata: section.metadata.clone(),
                                            timestamp: Some(section.timestamp) })?;
        }

        repo.record_audit(NewAuditEntry::new(None, Some(acting_user.id), actions::ORGANIZATION_SNAPSHOT_RESTORE)
                            .about("Organization", organization.id.to_string())
                            .with_metadata(serde_json::json!({
                              "organization_uuid": organization.uuid.to_string(),
                              "restored_at": Utc::now().to_rfc3339(),
                              "version": document.version,
                            })))?;
        Ok(())
      })
      .map_err(WorkflowError::Domain)?;

  info!("restaurada organización {} desde snapshot v{}", organization.id, document.version);
  Ok(())
}
