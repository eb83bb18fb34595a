// Structs de fila Diesel y conversiones fila ↔ dominio. Los timestamps se
// guardan como epoch millis; los roles y tipos como texto; las listas de
// roles y la lógica condicional como JSON en Text.
use chrono::{DateTime, TimeZone, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use helix_domain::{AuditLog, ConditionalLogic, DatabaseMembership, DatabaseRole, DomainError, FieldDefinition,
                   FieldType, FieldValue, Location, Organism, Organization, OrganizationMembership, OrganizationRole,
                   Plasmid, RelatedEntityKind, ResearchDatabase, Result, StoredFieldValue, Strain, StrainStatus, User,
                   ValidationRules};

use crate::schema;

pub fn ts_to_datetime(ms: i64) -> DateTime<Utc> {
  Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

pub fn datetime_to_ts(dt: DateTime<Utc>) -> i64 {
  dt.timestamp_millis()
}

fn bad_row(what: &str, detail: impl std::fmt::Display) -> DomainError {
  DomainError::Storage(format!("fila corrupta ({}): {}", what, detail))
}

// ---------------------------------------------------------------- usuarios
#[derive(Debug, Queryable)]
pub struct UserRow {
  pub id: i64,
  pub username: String,
  pub email: String,
  pub is_superuser: bool,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = schema::users)]
pub struct NewUserRow {
  pub username: String,
  pub email: String,
  pub is_superuser: bool,
}

impl From<UserRow> for User {
  fn from(r: UserRow) -> Self {
    User { id: r.id, username: r.username, email: r.email, is_superuser: r.is_superuser }
  }
}

// ----------------------------------------------------------- organizaciones
#[derive(Debug, Queryable)]
pub struct OrganizationRow {
  pub id: i64,
  pub uuid: String,
  pub name: String,
  pub slug: String,
  pub created_by: Option<i64>,
  pub created_at_ts: i64,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = schema::organizations)]
pub struct NewOrganizationRow {
  pub uuid: String,
  pub name: String,
  pub slug: String,
  pub created_by: Option<i64>,
  pub created_at_ts: i64,
}

impl TryFrom<OrganizationRow> for Organization {
  type Error = DomainError;

  fn try_from(r: OrganizationRow) -> Result<Self> {
    Ok(Organization { id: r.id,
                      uuid: Uuid::parse_str(&r.uuid).map_err(|e| bad_row("organizations.uuid", e))?,
                      name: r.name,
                      slug: r.slug,
                      created_by: r.created_by,
                      created_at: ts_to_datetime(r.created_at_ts) })
  }
}

#[derive(Debug, Queryable)]
pub struct DatabaseRow {
  pub id: i64,
  pub organization_id: i64,
  pub name: String,
  pub description: String,
  pub created_by: Option<i64>,
  pub created_at_ts: i64,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = schema::research_databases)]
pub struct NewDatabaseRow {
  pub organization_id: i64,
  pub name: String,
  pub description: String,
  pub created_by: Option<i64>,
  pub created_at_ts: i64,
}

impl From<DatabaseRow> for ResearchDatabase {
  fn from(r: DatabaseRow) -> Self {
    ResearchDatabase { id: r.id,
                       organization_id: r.organization_id,
                       name: r.name,
                       description: r.description,
                       created_by: r.created_by,
                       created_at: ts_to_datetime(r.created_at_ts) }
  }
}

// --------------------------------------------------------------- membresías
#[derive(Debug, Queryable)]
pub struct OrgMembershipRow {
  pub id: i64,
  pub organization_id: i64,
  pub user_id: i64,
  pub role: String,
  pub joined_at_ts: i64,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = schema::organization_memberships)]
pub struct NewOrgMembershipRow {
  pub organization_id: i64,
  pub user_id: i64,
  pub role: String,
  pub joined_at_ts: i64,
}

impl TryFrom<OrgMembershipRow> for OrganizationMembership {
  type Error = DomainError;

  fn try_from(r: OrgMembershipRow) -> Result<Self> {
    let role = OrganizationRole::parse(&r.role).ok_or_else(|| bad_row("organization_memberships.role", &r.role))?;
    Ok(OrganizationMembership { id: r.id,
                                organization_id: r.organization_id,
                                user_id: r.user_id,
                                role,
                                joined_at: ts_to_datetime(r.joined_at_ts) })
  }
}

#[derive(Debug, Queryable)]
pub struct DbMembershipRow {
  pub id: i64,
  pub research_database_id: i64,
  pub user_id: i64,
  pub role: String,
  pub created_at_ts: i64,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = schema::database_memberships)]
pub struct NewDbMembershipRow {
  pub research_database_id: i64,
  pub user_id: i64,
  pub role: String,
  pub created_at_ts: i64,
}

impl TryFrom<DbMembershipRow> for DatabaseMembership {
  type Error = DomainError;

  fn try_from(r: DbMembershipRow) -> Result<Self> {
    let role = DatabaseRole::parse(&r.role).ok_or_else(|| bad_row("database_memberships.role", &r.role))?;
    Ok(DatabaseMembership { id: r.id,
                            research_database_id: r.research_database_id,
                            user_id: r.user_id,
                            role,
                            created_at: ts_to_datetime(r.created_at_ts) })
  }
}

// ---------------------------------------------------------------- catálogos
#[derive(Debug, Queryable)]
pub struct OrganismRow {
  pub id: i64,
  pub research_database_id: i64,
  pub name: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = schema::organisms)]
pub struct NewOrganismRow {
  pub research_database_id: i64,
  pub name: String,
}

impl From<OrganismRow> for Organism {
  fn from(r: OrganismRow) -> Self {
    Organism { id: r.id, research_database_id: r.research_database_id, name: r.name }
  }
}

#[derive(Debug, Queryable)]
pub struct LocationRow {
  pub id: i64,
  pub research_database_id: i64,
  pub building: String,
  pub room: String,
  pub freezer: String,
  pub box_label: String,
  pub position: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = schema::locations)]
pub struct NewLocationRow {
  pub research_database_id: i64,
  pub building: String,
  pub room: String,
  pub freezer: String,
  pub box_label: String,
  pub position: String,
}

impl From<LocationRow> for Location {
  fn from(r: LocationRow) -> Self {
    Location { id: r.id,
               research_database_id: r.research_database_id,
               building: r.building,
               room: r.room,
               freezer: r.freezer,
               box_label: r.box_label,
               position: r.position }
  }
}

#[derive(Debug, Queryable)]
pub struct PlasmidRow {
  pub id: i64,
  pub research_database_id: i64,
  pub name: String,
  pub resistance_marker: String,
  pub notes: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = schema::plasmids)]
pub struct NewPlasmidRow {
  pub research_database_id: i64,
  pub name: String,
  pub resistance_marker: String,
  pub notes: String,
}

impl From<PlasmidRow> for Plasmid {
  fn from(r: PlasmidRow) -> Self {
    Plasmid { id: r.id,
              research_database_id: r.research_database_id,
              name: r.name,
              resistance_marker: r.resistance_marker,
              notes: r.notes }
  }
}

// -------------------------------------------------------------------- cepas
#[derive(Debug, Queryable)]
pub struct StrainRow {
  pub id: i64,
  pub research_database_id: i64,
  pub strain_id: String,
  pub name: String,
  pub organism_id: i64,
  pub genotype: String,
  pub selective_marker: String,
  pub comments: String,
  pub location_id: i64,
  pub status: String,
  pub created_by: Option<i64>,
  pub created_at_ts: i64,
  pub updated_at_ts: i64,
  pub is_active: bool,
  pub is_archived: bool,
  pub archived_at_ts: Option<i64>,
  pub archived_by: Option<i64>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = schema::strains)]
pub struct NewStrainRow {
  pub research_database_id: i64,
  pub strain_id: String,
  pub name: String,
  pub organism_id: i64,
  pub genotype: String,
  pub selective_marker: String,
  pub comments: String,
  pub location_id: i64,
  pub status: String,
  pub created_by: Option<i64>,
  pub created_at_ts: i64,
  pub updated_at_ts: i64,
  pub is_active: bool,
  pub is_archived: bool,
  pub archived_at_ts: Option<i64>,
  pub archived_by: Option<i64>,
}

impl TryFrom<StrainRow> for Strain {
  type Error = DomainError;

  fn try_from(r: StrainRow) -> Result<Self> {
    let status = StrainStatus::parse(&r.status).ok_or_else(|| bad_row("strains.status", &r.status))?;
    Ok(Strain { id: r.id,
                research_database_id: r.research_database_id,
                strain_id: r.strain_id,
                name: r.name,
                organism_id: r.organism_id,
                genotype: r.genotype,
                selective_marker: r.selective_marker,
                comments: r.comments,
                location_id: r.location_id,
                status,
                created_by: r.created_by,
                created_at: ts_to_datetime(r.created_at_ts),
                updated_at: ts_to_datetime(r.updated_at_ts),
                is_active: r.is_active,
                is_archived: r.is_archived,
                archived_at: r.archived_at_ts.map(ts_to_datetime),
                archived_by: r.archived_by })
  }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = schema::strain_plasmids)]
pub struct NewStrainPlasmidRow {
  pub strain_id: i64,
  pub plasmid_id: i64,
}

// --------------------------------------------------------------- esquema CF
#[derive(Debug, Queryable)]
pub struct FieldDefinitionRow {
  pub id: i64,
  pub research_database_id: i64,
  pub organization_id: i64,
  pub name: String,
  pub key: String,
  pub field_type: String,
  pub choices: String,
  pub default_value: String,
  pub help_text: String,
  pub validation_rules: String,
  pub is_unique: bool,
  pub conditional_logic: Option<String>,
  pub field_order: i32,
  pub group_name: Option<String>,
  pub group_order: i32,
  pub visible_to_roles: String,
  pub editable_to_roles: String,
  pub related_model: Option<String>,
  pub created_by: Option<i64>,
  pub created_at_ts: i64,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = schema::field_definitions)]
pub struct NewFieldDefinitionRow {
  pub research_database_id: i64,
  pub organization_id: i64,
  pub name: String,
  pub key: String,
  pub field_type: String,
  pub choices: String,
  pub default_value: String,
  pub help_text: String,
  pub validation_rules: String,
  pub is_unique: bool,
  pub conditional_logic: Option<String>,
  pub field_order: i32,
  pub group_name: Option<String>,
  pub group_order: i32,
  pub visible_to_roles: String,
  pub editable_to_roles: String,
  pub related_model: Option<String>,
  pub created_by: Option<i64>,
  pub created_at_ts: i64,
}

fn roles_from_json(raw: &str) -> Vec<DatabaseRole> {
  serde_json::from_str(raw).unwrap_or_default()
}

pub fn roles_to_json(roles: &[DatabaseRole]) -> String {
  serde_json::to_string(roles).unwrap_or_else(|_| "[]".to_string())
}

impl TryFrom<FieldDefinitionRow> for FieldDefinition {
  type Error = DomainError;

  fn try_from(r: FieldDefinitionRow) -> Result<Self> {
    let field_type = FieldType::parse(&r.field_type).ok_or_else(|| bad_row("field_definitions.field_type",
                                                                           &r.field_type))?;
    // lógica ilegible en disco => sin lógica (fail-open)
    let conditional_logic =
      r.conditional_logic.as_deref().and_then(|raw| serde_json::from_str::<ConditionalLogic>(raw).ok());
    Ok(FieldDefinition { id: r.id,
                         research_database_id: r.research_database_id,
                         organization_id: r.organization_id,
                         name: r.name,
                         key: r.key,
                         field_type,
                         choices: r.choices,
                         default_value: serde_json::from_str(&r.default_value)
                                          .unwrap_or(serde_json::Value::Null),
                         help_text: r.help_text,
                         validation_rules: serde_json::from_str::<ValidationRules>(&r.validation_rules)
                                             .unwrap_or_default(),
                         is_unique: r.is_unique,
                         conditional_logic,
                         order: r.field_order,
                         group_name: r.group_name,
                         group_order: r.group_order,
                         visible_to_roles: roles_from_json(&r.visible_to_roles),
                         editable_to_roles: roles_from_json(&r.editable_to_roles),
                         related_model: r.related_model.as_deref().and_then(RelatedEntityKind::parse),
                         created_by: r.created_by,
                         created_at: ts_to_datetime(r.created_at_ts) })
  }
}

// ------------------------------------------------------------------ valores
#[derive(Debug, Queryable)]
pub struct FieldValueRow {
  pub id: i64,
  pub strain_id: i64,
  pub field_definition_id: i64,
  pub value_text: Option<String>,
  pub value_long_text: Option<String>,
  pub value_integer: Option<i64>,
  pub value_decimal: Option<String>,
  pub value_date: Option<String>,
  pub value_boolean: Option<bool>,
  pub value_single_select: Option<String>,
  pub value_multi_select: Option<String>,
  pub value_fk_kind: Option<String>,
  pub value_fk_id: Option<i64>,
  pub value_file: Option<String>,
  pub value_url: Option<String>,
  pub value_email: Option<String>,
}

#[derive(Debug, Default, Insertable, AsChangeset)]
#[diesel(table_name = schema::field_values)]
#[diesel(treat_none_as_null = true)]
pub struct FieldValueColumns {
  pub value_text: Option<String>,
  pub value_long_text: Option<String>,
  pub value_integer: Option<i64>,
  pub value_decimal: Option<String>,
  pub value_date: Option<String>,
  pub value_boolean: Option<bool>,
  pub value_single_select: Option<String>,
  pub value_multi_select: Option<String>,
  pub value_fk_kind: Option<String>,
  pub value_fk_id: Option<i64>,
  pub value_file: Option<String>,
  pub value_url: Option<String>,
  pub value_email: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = schema::field_values)]
pub struct NewFieldValueRow {
  pub strain_id: i64,
  pub field_definition_id: i64,
  #[diesel(embed)]
  pub columns: FieldValueColumns,
}

/// Aplana la unión etiquetada a las doce columnas: exactamente una poblada
/// (dos físicas para foreign key: etiqueta de tipo + id).
pub fn value_to_columns(value: &FieldValue) -> FieldValueColumns {
  let mut columns = FieldValueColumns::default();
  match value {
    FieldValue::Text(s) => columns.value_text = Some(s.clone()),
    FieldValue::LongText(s) => columns.value_long_text = Some(s.clone()),
    FieldValue::Integer(n) => columns.value_integer = Some(*n),
    FieldValue::Decimal(d) => columns.value_decimal = Some(d.clone()),
    FieldValue::Date(d) => columns.value_date = Some(d.format("%Y-%m-%d").to_string()),
    FieldValue::Boolean(b) => columns.value_boolean = Some(*b),
    FieldValue::SingleSelect(s) => columns.value_single_select = Some(s.clone()),
    FieldValue::MultiSelect(items) => {
      columns.value_multi_select = Some(serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string()));
    }
    FieldValue::ForeignKey { kind, id } => {
      columns.value_fk_kind = Some(kind.as_str().to_string());
      columns.value_fk_id = Some(*id);
    }
    FieldValue::File(s) => columns.value_file = Some(s.clone()),
    FieldValue::Url(s) => columns.value_url = Some(s.clone()),
    FieldValue::Email(s) => columns.value_email = Some(s.clone()),
  }
  columns
}

impl TryFrom<FieldValueRow> for StoredFieldValue {
  type Error = DomainError;

  fn try_from(r: FieldValueRow) -> Result<Self> {
    let value = if let Some(s) = r.value_text {
      FieldValue::Text(s)
    } else if let Some(s) = r.value_long_text {
      FieldValue::LongText(s)
    } else if let Some(n) = r.value_integer {
      FieldValue::Integer(n)
    } else if let Some(d) = r.value_decimal {
      FieldValue::Decimal(d)
    } else if let Some(d) = r.value_date {
      let date = chrono::NaiveDate::parse_from_str(&d, "%Y-%m-%d").map_err(|e| bad_row("field_values.value_date", e))?;
      FieldValue::Date(date)
    } else if let Some(b) = r.value_boolean {
      FieldValue::Boolean(b)
    } else if let Some(s) = r.value_single_select {
      FieldValue::SingleSelect(s)
    } else if let Some(items) = r.value_multi_select {
      let parsed: Vec<String> =
        serde_json::from_str(&items).map_err(|e| bad_row("field_values.value_multi_select", e))?;
      FieldValue::MultiSelect(parsed)
    } else if let (Some(kind), Some(fk_id)) = (r.value_fk_kind.as_deref(), r.value_fk_id) {
      let kind = RelatedEntityKind::parse(kind).ok_or_else(|| bad_row("field_values.value_fk_kind", kind))?;
      FieldValue::ForeignKey { kind, id: fk_id }
    } else if let Some(s) = r.value_file {
      FieldValue::File(s)
    } else if let Some(s) = r.value_url {
      FieldValue::Url(s)
    } else if let Some(s) = r.value_email {
      FieldValue::Email(s)
    } else {
      return Err(bad_row("field_values", "ninguna columna tipada poblada"));
    };
    Ok(StoredFieldValue { id: r.id, strain_id: r.strain_id, field_definition_id: r.field_definition_id, value })
  }
}

// ---------------------------------------------------------------- auditoría
#[derive(Debug, Queryable)]
pub struct AuditLogRow {
  pub id: i64,
  pub database_id: Option<i64>,
  pub user_id: Option<i64>,
  pub action: String,
  pub object_type: String,
  pub object_id: Option<String>,
  pub metadata: String,
  pub timestamp_ts: i64,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = schema::audit_logs)]
pub struct NewAuditLogRow {
  pub database_id: Option<i64>,
  pub user_id: Option<i64>,
  pub action: String,
  pub object_type: String,
  pub object_id: Option<String>,
  pub metadata: String,
  pub timestamp_ts: i64,
}

impl From<AuditLogRow> for AuditLog {
  fn from(r: AuditLogRow) -> Self {
    AuditLog { id: r.id,
               database_id: r.database_id,
               user_id: r.user_id,
               action: r.action,
               object_type: r.object_type,
               object_id: r.object_id,
               metadata: serde_json::from_str(&r.metadata).unwrap_or(serde_json::Value::Null),
               timestamp: ts_to_datetime(r.timestamp_ts) }
  }
}
