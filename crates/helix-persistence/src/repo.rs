// Repositorio Diesel que implementa `HelixRepository`.
//
// Transaccionalidad: `atomically` abre una conexión dedicada y la deja en
// un thread-local; mientras la frontera está abierta, todas las operaciones
// del repositorio en el mismo hilo reutilizan esa conexión. Los niveles
// anidados usan SAVEPOINT, de modo que una fila de importación puede
// revertirse sin abortar el lote. Las unicidades case-insensitive viven en
// índices sobre lower(...) y las violaciones se reportan como `Conflict`
// para que el llamador re-consulte tras una carrera.
use std::cell::RefCell;
use std::sync::Arc;

use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::{debug, warn};
use uuid::Uuid;

use helix_domain::{now, AuditLog, DatabaseMembership, DatabaseRole, DomainError, FieldDefinition, FieldValue,
                   FieldValueWrite, HelixRepository, Location, NewAuditEntry, NewLocation, NewOrganization,
                   NewResearchDatabase, NewStrain, NewUser, Organism, Organization, OrganizationMembership,
                   OrganizationRole, Plasmid, ResearchDatabase, Result, StoredFieldValue, Strain, User,
                   ValidatedFieldDefinition};

use crate::rows::{self, datetime_to_ts, roles_to_json};
use crate::schema;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

#[cfg(all(feature = "pg", not(test)))]
type DbConn = PgConnection;
#[cfg(any(test, not(feature = "pg")))]
type DbConn = SqliteConnection;
type DbPool = Pool<ConnectionManager<DbConn>>;
type DbPooled = PooledConnection<ConnectionManager<DbConn>>;

diesel::define_sql_function! {
  fn lower(x: diesel::sql_types::Text) -> diesel::sql_types::Text;
}

struct TxState {
  conn: Option<DbPooled>,
  depth: u32,
}

thread_local! {
  static TX: RefCell<TxState> = RefCell::new(TxState { conn: None, depth: 0 });
}

/// Repo Diesel que implementa `HelixRepository`.
pub struct DieselHelixRepository {
  pool: Arc<DbPool>,
}

impl DieselHelixRepository {
  pub fn new(database_url: &str) -> Self {
    let manager = ConnectionManager::<DbConn>::new(database_url);
    let pool = Pool::builder().max_size(4).build(manager).expect("no se pudo crear el pool de conexiones");
    let repo = DieselHelixRepository { pool: Arc::new(pool) };
    if let Ok(mut c) = repo.conn_raw() {
      #[cfg(any(test, not(feature = "pg")))]
      {
        let _ = diesel::sql_query("PRAGMA journal_mode = WAL;").execute(&mut c);
        let _ = diesel::sql_query("PRAGMA busy_timeout = 5000;").execute(&mut c);
      }
      if let Err(e) = c.run_pending_migrations(MIGRATIONS) {
        warn!("migraciones pendientes fallidas: {}", e);
      }
    }
    repo
  }

  fn conn_raw(&self) -> std::result::Result<DbPooled, r2d2::Error> {
    self.pool.get()
  }

  fn conn(&self) -> Result<DbPooled> {
    self.conn_raw().map_err(|e| DomainError::Storage(format!("pool: {}", e)))
  }

  // Usa la conexión de la transacción abierta en este hilo, si existe; si
  // no, toma una del pool.
  fn with_conn<T>(&self, f: impl FnOnce(&mut DbConn) -> Result<T>) -> Result<T> {
    let in_tx = TX.with(|tx| tx.borrow().conn.is_some());
    if in_tx {
      TX.with(|tx| {
          let mut tx = tx.borrow_mut();
          let conn = tx.conn.as_mut().ok_or_else(|| DomainError::Storage("transacción perdida".into()))?;
          f(&mut **conn)
        })
    } else {
      let mut conn = self.conn()?;
      f(&mut conn)
    }
  }

  fn exec_tx_sql(&self, sql: &str) -> Result<()> {
    self.with_conn(|conn| diesel::sql_query(sql).execute(conn).map(|_| ()).map_err(map_diesel))
  }
}

fn map_diesel(e: DieselError) -> DomainError {
  match e {
    DieselError::NotFound => DomainError::NotFound("fila no encontrada".into()),
    DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
      DomainError::Conflict(info.message().to_string())
    }
    other => DomainError::Storage(format!("db: {}", other)),
  }
}

impl HelixRepository for DieselHelixRepository {
  fn create_user(&self, user: NewUser) -> Result<User> {
    self.with_conn(|conn| {
          let row = rows::NewUserRow { username: user.username.clone(),
                                       email: user.email.clone(),
                                       is_superuser: user.is_superuser };
          let id = diesel::insert_into(schema::users::table).values(&row)
                                                            .returning(schema::users::id)
                                                            .get_result::<i64>(conn)
                                                            .map_err(map_diesel)?;
          Ok(User { id, username: user.username, email: user.email, is_superuser: user.is_superuser })
        })
  }

  fn get_user(&self, id: i64) -> Result<Option<User>> {
    self.with_conn(|conn| {
          let row = schema::users::table.find(id).first::<rows::UserRow>(conn).optional().map_err(map_diesel)?;
          Ok(row.map(User::from))
        })
  }

  fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
    self.with_conn(|conn| {
          let row = schema::users::table.filter(schema::users::username.eq(username))
                                        .first::<rows::UserRow>(conn)
                                        .optional()
                                        .map_err(map_diesel)?;
          Ok(row.map(User::from))
        })
  }

  fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
    if email.is_empty() {
      return Ok(None);
    }
    self.with_conn(|conn| {
          let row = schema::users::table.filter(schema::users::email.eq(email))
                                        .first::<rows::UserRow>(conn)
                                        .optional()
                                        .map_err(map_diesel)?;
          Ok(row.map(User::from))
        })
  }

  fn list_users(&self) -> Result<Vec<User>> {
    self.with_conn(|conn| {
          let rows = schema::users::table.order(schema::users::id.asc())
                                         .load::<rows::UserRow>(conn)
                                         .map_err(map_diesel)?;
          Ok(rows.into_iter().map(User::from).collect())
        })
  }

  fn create_organization(&self, org: NewOrganization) -> Result<Organization> {
    self.with_conn(|conn| {
          let uuid = Uuid::new_v4();
          let created_at = now();
          let row = rows::NewOrganizationRow { uuid: uuid.to_string(),
                                               name: org.name.clone(),
                                               slug: org.slug.clone(),
                                               created_by: org.created_by,
                                               created_at_ts: datetime_to_ts(created_at) };
          let id = diesel::insert_into(schema::organizations::table).values(&row)
                                                                    .returning(schema::organizations::id)
                                                                    .get_result::<i64>(conn)
                                                                    .map_err(map_diesel)?;
          Ok(Organization { id, uuid, name: org.name, slug: org.slug, created_by: org.created_by, created_at })
        })
  }

  fn get_organization(&self, id: i64) -> Result<Option<Organization>> {
    self.with_conn(|conn| {
          let row = schema::organizations::table.find(id)
                                                .first::<rows::OrganizationRow>(conn)
                                                .optional()
                                                .map_err(map_diesel)?;
          row.map(Organization::try_from).transpose()
        })
  }

  fn set_organization_identity(&self, id: i64, name: &str, slug: &str) -> Result<()> {
    self.with_conn(|conn| {
          let updated =
            diesel::update(schema::organizations::table.find(id))
              .set((schema::organizations::name.eq(name), schema::organizations::slug.eq(slug)))
              .execute(conn)
              .map_err(map_diesel)?;
          if updated == 0 {
            return Err(DomainError::NotFound(format!("Organización {}", id)));
          }
          Ok(())
        })
  }

  fn create_database(&self, database: NewResearchDatabase) -> Result<ResearchDatabase> {
    self.with_conn(|conn| {
          let created_at = now();
          let row = rows::NewDatabaseRow { organization_id: database.organization_id,
                                           name: database.name.clone(),
                                           description: database.description.clone(),
                                           created_by: database.created_by,
                                           created_at_ts: datetime_to_ts(created_at) };
          let id = diesel::insert_into(schema::research_databases::table)
                     .values(&row)
                     .returning(schema::research_databases::id)
                     .get_result::<i64>(conn)
                     .map_err(map_diesel)?;
          Ok(ResearchDatabase { id,
                                organization_id: database.organization_id,
                                name: database.name,
                                description: database.description,
                                created_by: database.created_by,
                                created_at })
        })
  }

  fn get_database(&self, id: i64) -> Result<Option<ResearchDatabase>> {
    self.with_conn(|conn| {
          let row = schema::research_databases::table.find(id)
                                                     .first::<rows::DatabaseRow>(conn)
                                                     .optional()
                                                     .map_err(map_diesel)?;
          Ok(row.map(ResearchDatabase::from))
        })
  }

  fn list_databases(&self, organization_id: i64) -> Result<Vec<ResearchDatabase>> {
    self.with_conn(|conn| {
          let rows = schema::research_databases::table
                       .filter(schema::research_databases::organization_id.eq(organization_id))
                       .order(schema::research_databases::id.asc())
                       .load::<rows::DatabaseRow>(conn)
                       .map_err(map_diesel)?;
          Ok(rows.into_iter().map(ResearchDatabase::from).collect())
        })
  }

  fn upsert_organization_membership(&self,
                                    organization_id: i64,
                                    user_id: i64,
                                    role: OrganizationRole)
                                    -> Result<OrganizationMembership> {
    use schema::organization_memberships::dsl;
    self.with_conn(|conn| {
          let existing = dsl::organization_memberships.filter(dsl::organization_id.eq(organization_id))
                                                      .filter(dsl::user_id.eq(user_id))
                                                      .first::<rows::OrgMembershipRow>(conn)
                                                      .optional()
                                                      .map_err(map_diesel)?;
          if let Some(row) = existing {
            diesel::update(dsl::organization_memberships.find(row.id)).set(dsl::role.eq(role.as_str()))
                                                                      .execute(conn)
                                                                      .map_err(map_diesel)?;
            return Ok(OrganizationMembership { id: row.id,
                                               organization_id,
                                               user_id,
                                               role,
                                               joined_at: rows::ts_to_datetime(row.joined_at_ts) });
          }
          let joined_at = now();
          let row = rows::NewOrgMembershipRow { organization_id,
                                                user_id,
                                                role: role.as_str().to_string(),
                                                joined_at_ts: datetime_to_ts(joined_at) };
          let id = diesel::insert_into(dsl::organization_memberships).values(&row)
                                                                     .returning(dsl::id)
                                                                     .get_result::<i64>(conn)
                                                                     .map_err(map_diesel)?;
          Ok(OrganizationMembership { id, organization_id, user_id, role, joined_at })
        })
  }

  fn find_organization_membership(&self, organization_id: i64, user_id: i64) -> Result<Option<OrganizationMembership>> {
    use schema::organization_memberships::dsl;
    self.with_conn(|conn| {
          let row = dsl::organization_memberships.filter(dsl::organization_id.eq(organization_id))
                                                 .filter(dsl::user_id.eq(user_id))
                                                 .first::<rows::OrgMembershipRow>(conn)
                                                 .optional()
                                                 .map_err(map_diesel)?;
          row.map(OrganizationMembership::try_from).transpose()
        })
  }

  fn list_organization_memberships(&self, organization_id: i64) -> Result<Vec<OrganizationMembership>> {
    use schema::organization_memberships::dsl;
    self.with_conn(|conn| {
          let rows = dsl::organization_memberships.filter(dsl::organization_id.eq(organization_id))
                                                  .order(dsl::id.asc())
                                                  .load::<rows::OrgMembershipRow>(conn)
                                                  .map_err(map_diesel)?;
          rows.into_iter().map(OrganizationMembership::try_from).collect()
        })
  }

  fn upsert_database_membership(&self, database_id: i64, user_id: i64, role: DatabaseRole) -> Result<DatabaseMembership> {
    use schema::database_memberships::dsl;
    self.with_conn(|conn| {
          let existing = dsl::database_memberships.filter(dsl::research_database_id.eq(database_id))
                                                  .filter(dsl::user_id.eq(user_id))
                                                  .first::<rows::DbMembershipRow>(conn)
                                                  .optional()
                                                  .map_err(map_diesel)?;
          if let Some(row) = existing {
            diesel::update(dsl::database_memberships.find(row.id)).set(dsl::role.eq(role.as_str()))
                                                                  .execute(conn)
                                                                  .map_err(map_diesel)?;
            return Ok(DatabaseMembership { id: row.id,
                                           research_database_id: database_id,
                                           user_id,
                                           role,
                                           created_at: rows::ts_to_datetime(row.created_at_ts) });
          }
          let created_at = now();
          let row = rows::NewDbMembershipRow { research_database_id: database_id,
                                               user_id,
                                               role: role.as_str().to_string(),
                                               created_at_ts: datetime_to_ts(created_at) };
          let id = diesel::insert_into(dsl::database_memberships).values(&row)
                                                                 .returning(dsl::id)
                                                                 .get_result::<i64>(conn)
                                                                 .map_err(map_diesel)?;
          Ok(DatabaseMembership { id, research_database_id: database_id, user_id, role, created_at })
        })
  }

  fn find_database_membership(&self, database_id: i64, user_id: i64) -> Result<Option<DatabaseMembership>> {
    use schema::database_memberships::dsl;
    self.with_conn(|conn| {
          let row = dsl::database_memberships.filter(dsl::research_database_id.eq(database_id))
                                             .filter(dsl::user_id.eq(user_id))
                                             .first::<rows::DbMembershipRow>(conn)
                                             .optional()
                                             .map_err(map_diesel)?;
          row.map(DatabaseMembership::try_from).transpose()
        })
  }

  fn list_database_memberships(&self, database_id: i64) -> Result<Vec<DatabaseMembership>> {
    use schema::database_memberships::dsl;
    self.with_conn(|conn| {
          let rows = dsl::database_memberships.filter(dsl::research_database_id.eq(database_id))
                                              .order(dsl::id.asc())
                                              .load::<rows::DbMembershipRow>(conn)
                                              .map_err(map_diesel)?;
          rows.into_iter().map(DatabaseMembership::try_from).collect()
        })
  }

  fn create_organism(&self, database_id: i64, name: &str) -> Result<Organism> {
    self.with_conn(|conn| {
          let row = rows::NewOrganismRow { research_database_id: database_id, name: name.to_string() };
          let id = diesel::insert_into(schema::organisms::table).values(&row)
                                                                .returning(schema::organisms::id)
                                                                .get_result::<i64>(conn)
                                                                .map_err(map_diesel)?;
          Ok(Organism { id, research_database_id: database_id, name: name.to_string() })
        })
  }

  fn find_organism_ci(&self, database_id: i64, name: &str) -> Result<Option<Organism>> {
    use schema::organisms::dsl;
    self.with_conn(|conn| {
          let row = dsl::organisms.filter(dsl::research_database_id.eq(database_id))
                                  .filter(lower(dsl::name).eq(name.to_lowercase()))
                                  .first::<rows::OrganismRow>(conn)
                                  .optional()
                                  .map_err(map_diesel)?;
          Ok(row.map(Organism::from))
        })
  }

  fn get_organism(&self, id: i64) -> Result<Option<Organism>> {
    self.with_conn(|conn| {
          let row =
            schema::organisms::table.find(id).first::<rows::OrganismRow>(conn).optional().map_err(map_diesel)?;
          Ok(row.map(Organism::from))
        })
  }

  fn list_organisms(&self, database_id: i64) -> Result<Vec<Organism>> {
    use schema::organisms::dsl;
    self.with_conn(|conn| {
          let rows = dsl::organisms.filter(dsl::research_database_id.eq(database_id))
                                   .order(dsl::id.asc())
                                   .load::<rows::OrganismRow>(conn)
                                   .map_err(map_diesel)?;
          Ok(rows.into_iter().map(Organism::from).collect())
        })
  }

  fn create_location(&self, location: NewLocation) -> Result<Location> {
    self.with_conn(|conn| {
          let row = rows::NewLocationRow { research_database_id: location.research_database_id,
                                           building: location.building.clone(),
                                           room: location.room.clone(),
                                           freezer: location.freezer.clone(),
                                           box_label: location.box_label.clone(),
                                           position: location.position.clone() };
          let id = diesel::insert_into(schema::locations::table).values(&row)
                                                                .returning(schema::locations::id)
                                                                .get_result::<i64>(conn)
                                                                .map_err(map_diesel)?;
          Ok(Location { id,
                        research_database_id: location.research_database_id,
                        building: location.building,
                        room: location.room,
                        freezer: location.freezer,
                        box_label: location.box_label,
                        position: location.position })
        })
  }

  fn find_location_ci(&self, database_id: i64, box_label: &str, position: &str) -> Result<Option<Location>> {
    use schema::locations::dsl;
    self.with_conn(|conn| {
          let row = dsl::locations.filter(dsl::research_database_id.eq(database_id))
                                  .filter(lower(dsl::box_label).eq(box_label.to_lowercase()))
                                  .filter(lower(dsl::position).eq(position.to_lowercase()))
                                  .first::<rows::LocationRow>(conn)
                                  .optional()
                                  .map_err(map_diesel)?;
          Ok(row.map(Location::from))
        })
  }

  fn get_location(&self, id: i64) -> Result<Option<Location>> {
    self.with_conn(|conn| {
          let row =
            schema::locations::table.find(id).first::<rows::LocationRow>(conn).optional().map_err(map_diesel)?;
          Ok(row.map(Location::from))
        })
  }

  fn list_locations(&self, database_id: i64) -> Result<Vec<Location>> {
    use schema::locations::dsl;
    self.with_conn(|conn| {
          let rows = dsl::locations.filter(dsl::research_database_id.eq(database_id))
                                   .order(dsl::id.asc())
                                   .load::<rows::LocationRow>(conn)
                                   .map_err(map_diesel)?;
          Ok(rows.into_iter().map(Location::from).collect())
        })
  }

  fn create_plasmid(&self, database_id: i64, name: &str, resistance_marker: &str, notes: &str) -> Result<Plasmid> {
    self.with_conn(|conn| {
          let row = rows::NewPlasmidRow { research_database_id: database_id,
                                          name: name.to_string(),
                                          resistance_marker: resistance_marker.to_string(),
                                          notes: notes.to_string() };
          let id = diesel::insert_into(schema::plasmids::table).values(&row)
                                                               .returning(schema::plasmids::id)
                                                               .get_result::<i64>(conn)
                                                               .map_err(map_diesel)?;
          Ok(Plasmid { id,
                       research_database_id: database_id,
                       name: name.to_string(),
                       resistance_marker: resistance_marker.to_string(),
                       notes: notes.to_string() })
        })
  }

  fn find_plasmid_ci(&self, database_id: i64, name: &str) -> Result<Option<Plasmid>> {
    use schema::plasmids::dsl;
    self.with_conn(|conn| {
          let row = dsl::plasmids.filter(dsl::research_database_id.eq(database_id))
                                 .filter(lower(dsl::name).eq(name.to_lowercase()))
                                 .first::<rows::PlasmidRow>(conn)
                                 .optional()
                                 .map_err(map_diesel)?;
          Ok(row.map(Plasmid::from))
        })
  }

  fn get_plasmid(&self, id: i64) -> Result<Option<Plasmid>> {
    self.with_conn(|conn| {
          let row = schema::plasmids::table.find(id).first::<rows::PlasmidRow>(conn).optional().map_err(map_diesel)?;
          Ok(row.map(Plasmid::from))
        })
  }

  fn list_plasmids(&self, database_id: i64) -> Result<Vec<Plasmid>> {
    use schema::plasmids::dsl;
    self.with_conn(|conn| {
          let rows = dsl::plasmids.filter(dsl::research_database_id.eq(database_id))
                                  .order(dsl::id.asc())
                                  .load::<rows::PlasmidRow>(conn)
                                  .map_err(map_diesel)?;
          Ok(rows.into_iter().map(Plasmid::from).collect())
        })
  }

  fn create_strain(&self, strain: NewStrain) -> Result<Strain> {
    self.with_conn(|conn| {
          let created_at = now();
          let row = rows::NewStrainRow { research_database_id: strain.research_database_id,
                                         strain_id: strain.strain_id.clone(),
                                         name: strain.name.clone(),
                                         organism_id: strain.organism_id,
                                         genotype: strain.genotype.clone(),
                                         selective_marker: strain.selective_marker.clone(),
                                         comments: strain.comments.clone(),
                                         location_id: strain.location_id,
                                         status: strain.status.as_str().to_string(),
                                         created_by: strain.created_by,
                                         created_at_ts: datetime_to_ts(created_at),
                                         updated_at_ts: datetime_to_ts(created_at),
                                         is_active: strain.is_active,
                                         is_archived: strain.is_archived,
                                         archived_at_ts: strain.archived_at.map(datetime_to_ts),
                                         archived_by: strain.archived_by };
          let id = diesel::insert_into(schema::strains::table).values(&row)
                                                              .returning(schema::strains::id)
                                                              .get_result::<i64>(conn)
                                                              .map_err(map_diesel)?;
          Ok(Strain { id,
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
                      created_at,
                      updated_at: created_at,
                      is_active: strain.is_active,
                      is_archived: strain.is_archived,
                      archived_at: strain.archived_at,
                      archived_by: strain.archived_by })
        })
  }

  fn get_strain(&self, id: i64) -> Result<Option<Strain>> {
    self.with_conn(|conn| {
          let row = schema::strains::table.find(id).first::<rows::StrainRow>(conn).optional().map_err(map_diesel)?;
          row.map(Strain::try_from).transpose()
        })
  }

  fn find_strain_ci(&self, database_id: i64, strain_id: &str) -> Result<Option<Strain>> {
    use schema::strains::dsl;
    self.with_conn(|conn| {
          let row = dsl::strains.filter(dsl::research_database_id.eq(database_id))
                                .filter(lower(dsl::strain_id).eq(strain_id.to_lowercase()))
                                .first::<rows::StrainRow>(conn)
                                .optional()
                                .map_err(map_diesel)?;
          row.map(Strain::try_from).transpose()
        })
  }

  fn list_strains(&self, database_id: i64) -> Result<Vec<Strain>> {
    use schema::strains::dsl;
    self.with_conn(|conn| {
          let rows = dsl::strains.filter(dsl::research_database_id.eq(database_id))
                                 .order(dsl::id.asc())
                                 .load::<rows::StrainRow>(conn)
                                 .map_err(map_diesel)?;
          rows.into_iter().map(Strain::try_from).collect()
        })
  }

  fn delete_strain(&self, id: i64) -> Result<()> {
    self.with_conn(|conn| {
          diesel::delete(schema::field_values::table.filter(schema::field_values::strain_id.eq(id))).execute(conn)
                                                                                                    .map_err(map_diesel)?;
          diesel::delete(schema::strain_plasmids::table.filter(schema::strain_plasmids::strain_id.eq(id)))
            .execute(conn)
            .map_err(map_diesel)?;
          diesel::delete(schema::strains::table.find(id)).execute(conn).map_err(map_diesel)?;
          Ok(())
        })
  }

  fn link_strain_plasmid(&self, strain_id: i64, plasmid_id: i64) -> Result<()> {
    self.with_conn(|conn| {
          let row = rows::NewStrainPlasmidRow { strain_id, plasmid_id };
          match diesel::insert_into(schema::strain_plasmids::table).values(&row).execute(conn) {
            Ok(_) => Ok(()),
            // el par ya existe: idempotente
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => Ok(()),
            Err(e) => Err(map_diesel(e)),
          }
        })
  }

  fn plasmid_ids_for_strain(&self, strain_id: i64) -> Result<Vec<i64>> {
    use schema::strain_plasmids::dsl;
    self.with_conn(|conn| {
          dsl::strain_plasmids.filter(dsl::strain_id.eq(strain_id))
                              .order(dsl::plasmid_id.asc())
                              .select(dsl::plasmid_id)
                              .load::<i64>(conn)
                              .map_err(map_diesel)
        })
  }

  fn create_field_definition(&self, definition: ValidatedFieldDefinition) -> Result<FieldDefinition> {
    self.with_conn(|conn| {
          let created_at = now();
          let conditional_logic = match &definition.conditional_logic {
            Some(logic) => Some(serde_json::to_string(logic).map_err(DomainError::from)?),
            None => None,
          };
          let row = rows::NewFieldDefinitionRow { research_database_id: definition.research_database_id,
                                                  organization_id: definition.organization_id,
                                                  name: definition.name.clone(),
                                                  key: definition.key.clone(),
                                                  field_type: definition.field_type.as_str().to_string(),
                                                  choices: definition.choices.clone(),
                                                  default_value: definition.default_value.to_string(),
                                                  help_text: definition.help_text.clone(),
                                                  validation_rules:
                                                    serde_json::to_string(&definition.validation_rules)
                                                      .map_err(DomainError::from)?,
                                                  is_unique: definition.is_unique,
                                                  conditional_logic,
                                                  field_order: definition.order,
                                                  group_name: definition.group_name.clone(),
                                                  group_order: definition.group_order,
                                                  visible_to_roles: roles_to_json(&definition.visible_to_roles),
                                                  editable_to_roles: roles_to_json(&definition.editable_to_roles),
                                                  related_model: definition.related_model
                                                                           .map(|m| m.as_str().to_string()),
                                                  created_by: definition.created_by,
                                                  created_at_ts: datetime_to_ts(created_at) };
          let id = diesel::insert_into(schema::field_definitions::table)
                     .values(&row)
                     .returning(schema::field_definitions::id)
                     .get_result::<i64>(conn)
                     .map_err(map_diesel)?;
          Ok(FieldDefinition { id,
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
                               created_at })
        })
  }

  fn update_field_definition(&self, definition: &FieldDefinition) -> Result<()> {
    let current = self.get_field_definition(definition.id)?
                      .ok_or_else(|| DomainError::NotFound(format!("Definición {}", definition.id)))?;
    if current.field_type != definition.field_type && self.has_field_values(definition.id)? {
      return Err(DomainError::field_validation(current.key.clone(),
                                               "No se puede cambiar el tipo de un campo con valores existentes."));
    }
    self.with_conn(|conn| {
          use schema::field_definitions::dsl;
          let conditional_logic = match &definition.conditional_logic {
            Some(logic) => Some(serde_json::to_string(logic).map_err(DomainError::from)?),
            None => None,
          };
          diesel::update(dsl::field_definitions.find(definition.id))
            .set((dsl::name.eq(&definition.name),
                  dsl::key.eq(&definition.key),
                  dsl::field_type.eq(definition.field_type.as_str()),
                  dsl::choices.eq(&definition.choices),
                  dsl::default_value.eq(definition.default_value.to_string()),
                  dsl::help_text.eq(&definition.help_text),
                  dsl::validation_rules.eq(serde_json::to_string(&definition.validation_rules)
                                             .map_err(DomainError::from)?),
                  dsl::is_unique.eq(definition.is_unique),
                  dsl::conditional_logic.eq(conditional_logic),
                  dsl::field_order.eq(definition.order),
                  dsl::group_name.eq(definition.group_name.clone()),
                  dsl::group_order.eq(definition.group_order),
                  dsl::visible_to_roles.eq(roles_to_json(&definition.visible_to_roles)),
                  dsl::editable_to_roles.eq(roles_to_json(&definition.editable_to_roles)),
                  dsl::related_model.eq(definition.related_model.map(|m| m.as_str().to_string()))))
            .execute(conn)
            .map_err(map_diesel)?;
          Ok(())
        })
  }

  fn get_field_definition(&self, id: i64) -> Result<Option<FieldDefinition>> {
    self.with_conn(|conn| {
          let row = schema::field_definitions::table.find(id)
                                                    .first::<rows::FieldDefinitionRow>(conn)
                                                    .optional()
                                                    .map_err(map_diesel)?;
          row.map(FieldDefinition::try_from).transpose()
        })
  }

  fn list_field_definitions(&self, database_id: i64) -> Result<Vec<FieldDefinition>> {
    use schema::field_definitions::dsl;
    self.with_conn(|conn| {
          let rows = dsl::field_definitions.filter(dsl::research_database_id.eq(database_id))
                                           .order((dsl::group_order.asc(), dsl::field_order.asc(), dsl::id.asc()))
                                           .load::<rows::FieldDefinitionRow>(conn)
                                           .map_err(map_diesel)?;
          rows.into_iter().map(FieldDefinition::try_from).collect()
        })
  }

  fn field_values_for_strain(&self, strain_id: i64) -> Result<Vec<StoredFieldValue>> {
    use schema::field_values::dsl;
    self.with_conn(|conn| {
          let rows = dsl::field_values.filter(dsl::strain_id.eq(strain_id))
                                      .order(dsl::field_definition_id.asc())
                                      .load::<rows::FieldValueRow>(conn)
                                      .map_err(map_diesel)?;
          rows.into_iter().map(StoredFieldValue::try_from).collect()
        })
  }

  fn has_field_values(&self, field_definition_id: i64) -> Result<bool> {
    use schema::field_values::dsl;
    self.with_conn(|conn| {
          let count: i64 = dsl::field_values.filter(dsl::field_definition_id.eq(field_definition_id))
                                            .count()
                                            .get_result(conn)
                                            .map_err(map_diesel)?;
          Ok(count > 0)
        })
  }

  fn unique_value_exists(&self, field_definition_id: i64, value: &FieldValue, exclude_strain: Option<i64>) -> Result<bool> {
    use schema::field_values::dsl;
    // la comparación de igualdad se hace sobre el valor decodificado para
    // cubrir las doce variantes con una sola consulta
    let rows: Vec<StoredFieldValue> = self.with_conn(|conn| {
                                            let rows =
                                              dsl::field_values.filter(dsl::field_definition_id.eq(field_definition_id))
                                                               .load::<rows::FieldValueRow>(conn)
                                                               .map_err(map_diesel)?;
                                            rows.into_iter().map(StoredFieldValue::try_from).collect()
                                          })?;
    Ok(rows.iter().any(|row| Some(row.strain_id) != exclude_strain && &row.value == value))
  }

  fn apply_field_value_writes(&self, strain_id: i64, writes: &[FieldValueWrite]) -> Result<()> {
    self.atomically(&mut || {
          self.with_conn(|conn| {
                use schema::field_values::dsl;
                for write in writes {
                  match write {
                    FieldValueWrite::Delete { field_definition_id } => {
                      diesel::delete(dsl::field_values.filter(dsl::strain_id.eq(strain_id))
                                                      .filter(dsl::field_definition_id.eq(*field_definition_id)))
                        .execute(conn)
                        .map_err(map_diesel)?;
                    }
                    FieldValueWrite::Upsert { field_definition_id, value } => {
                      let columns = rows::value_to_columns(value);
                      let existing = dsl::field_values.filter(dsl::strain_id.eq(strain_id))
                                                      .filter(dsl::field_definition_id.eq(*field_definition_id))
                                                      .select(dsl::id)
                                                      .first::<i64>(conn)
                                                      .optional()
                                                      .map_err(map_diesel)?;
                      match existing {
                        Some(id) => {
                          diesel::update(dsl::field_values.find(id)).set(&columns).execute(conn).map_err(map_diesel)?;
                        }
                        None => {
                          let row = rows::NewFieldValueRow { strain_id,
                                                             field_definition_id: *field_definition_id,
                                                             columns };
                          match diesel::insert_into(dsl::field_values).values(&row).execute(conn) {
                            Ok(_) => {}
                            // carrera con otro escritor: la fila ya existe,
                            // re-consultar y actualizar
                            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                              let id = dsl::field_values.filter(dsl::strain_id.eq(strain_id))
                                                        .filter(dsl::field_definition_id.eq(*field_definition_id))
                                                        .select(dsl::id)
                                                        .first::<i64>(conn)
                                                        .map_err(map_diesel)?;
                              diesel::update(dsl::field_values.find(id)).set(&row.columns)
                                                                        .execute(conn)
                                                                        .map_err(map_diesel)?;
                            }
                            Err(e) => return Err(map_diesel(e)),
                          }
                        }
                      }
                    }
                  }
                }
                Ok(())
              })
        })
  }

  fn record_audit(&self, entry: NewAuditEntry) -> Result<AuditLog> {
    self.with_conn(|conn| {
          let timestamp = entry.timestamp.unwrap_or_else(now);
          let row = rows::NewAuditLogRow { database_id: entry.database_id,
                                           user_id: entry.user_id,
                                           action: entry.action.clone(),
                                           object_type: entry.object_type.clone(),
                                           object_id: entry.object_id.clone(),
                                           metadata: entry.metadata.to_string(),
                                           timestamp_ts: datetime_to_ts(timestamp) };
          let id = diesel::insert_into(schema::audit_logs::table).values(&row)
                                                                 .returning(schema::audit_logs::id)
                                                                 .get_result::<i64>(conn)
                                                                 .map_err(map_diesel)?;
          Ok(AuditLog { id,
                        database_id: entry.database_id,
                        user_id: entry.user_id,
                        action: entry.action,
                        object_type: entry.object_type,
                        object_id: entry.object_id,
                        metadata: entry.metadata,
                        timestamp })
        })
  }

  fn list_audit_for_database(&self, database_id: i64) -> Result<Vec<AuditLog>> {
    use schema::audit_logs::dsl;
    self.with_conn(|conn| {
          let rows = dsl::audit_logs.filter(dsl::database_id.eq(database_id))
                                    .order(dsl::id.asc())
                                    .load::<rows::AuditLogRow>(conn)
                                    .map_err(map_diesel)?;
          Ok(rows.into_iter().map(AuditLog::from).collect())
        })
  }

  fn delete_organization_data(&self, organization_id: i64) -> Result<()> {
    self.with_conn(|conn| {
          use schema::research_databases::dsl as rdb;
          let database_ids: Vec<i64> = rdb::research_databases.filter(rdb::organization_id.eq(organization_id))
                                                              .select(rdb::id)
                                                              .load::<i64>(conn)
                                                              .map_err(map_diesel)?;
          let strain_ids: Vec<i64> = schema::strains::table
                                       .filter(schema::strains::research_database_id.eq_any(&database_ids))
                                       .select(schema::strains::id)
                                       .load::<i64>(conn)
                                       .map_err(map_diesel)?;
          // hijos antes que padres
          diesel::delete(schema::field_values::table.filter(schema::field_values::strain_id.eq_any(&strain_ids)))
            .execute(conn)
            .map_err(map_diesel)?;
          diesel::delete(schema::strain_plasmids::table.filter(schema::strain_plasmids::strain_id.eq_any(&strain_ids)))
            .execute(conn)
            .map_err(map_diesel)?;
          diesel::delete(schema::strains::table.filter(schema::strains::research_database_id.eq_any(&database_ids)))
            .execute(conn)
            .map_err(map_diesel)?;
          diesel::delete(schema::field_definitions::table
            .filter(schema::field_definitions::research_database_id.eq_any(&database_ids)))
            .execute(conn)
            .map_err(map_diesel)?;
          diesel::delete(schema::audit_logs::table.filter(schema::audit_logs::database_id.eq_any(&database_ids)))
            .execute(conn)
            .map_err(map_diesel)?;
          diesel::delete(schema::database_memberships::table
            .filter(schema::database_memberships::research_database_id.eq_any(&database_ids)))
            .execute(conn)
            .map_err(map_diesel)?;
          diesel::delete(schema::organisms::table.filter(schema::organisms::research_database_id.eq_any(&database_ids)))
            .execute(conn)
            .map_err(map_diesel)?;
          diesel::delete(schema::locations::table.filter(schema::locations::research_database_id.eq_any(&database_ids)))
            .execute(conn)
            .map_err(map_diesel)?;
          diesel::delete(schema::plasmids::table.filter(schema::plasmids::research_database_id.eq_any(&database_ids)))
            .execute(conn)
            .map_err(map_diesel)?;
          diesel::delete(schema::research_databases::table
            .filter(schema::research_databases::organization_id.eq(organization_id)))
            .execute(conn)
            .map_err(map_diesel)?;
          Ok(())
        })
  }

  fn atomically(&self, work: &mut dyn FnMut() -> Result<()>) -> Result<()> {
    let depth = TX.with(|tx| tx.borrow().depth);
    if depth == 0 {
      let conn = self.conn()?;
      TX.with(|tx| tx.borrow_mut().conn = Some(conn));
      if let Err(e) = self.exec_tx_sql("BEGIN") {
        TX.with(|tx| tx.borrow_mut().conn = None);
        return Err(e);
      }
    } else {
      self.exec_tx_sql(&format!("SAVEPOINT sp_{}", depth))?;
    }
    TX.with(|tx| tx.borrow_mut().depth = depth + 1);
    let result = work();
    TX.with(|tx| tx.borrow_mut().depth = depth);

    match (result, depth) {
      (Ok(()), 0) => {
        let commit = self.exec_tx_sql("COMMIT");
        TX.with(|tx| tx.borrow_mut().conn = None);
        commit
      }
      (Ok(()), d) => self.exec_tx_sql(&format!("RELEASE SAVEPOINT sp_{}", d)),
      (Err(e), 0) => {
        if let Err(rollback) = self.exec_tx_sql("ROLLBACK") {
          debug!("rollback fallido tras error: {}", rollback);
        }
        TX.with(|tx| tx.borrow_mut().conn = None);
        Err(e)
      }
      (Err(e), d) => {
        let _ = self.exec_tx_sql(&format!("ROLLBACK TO SAVEPOINT sp_{}", d));
        let _ = self.exec_tx_sql(&format!("RELEASE SAVEPOINT sp_{}", d));
        Err(e)
      }
    }
  }
}

/// Crear repo desde las variables de entorno (o default sqlite in-memory en
/// tests).
pub fn new_repo_from_env() -> Result<DieselHelixRepository> {
  dotenvy::dotenv().ok();
  if cfg!(all(feature = "pg", not(test))) {
    let url = std::env::var("HELIX_DB_URL").or_else(|_| std::env::var("DATABASE_URL"))
                                           .map_err(|_| DomainError::Storage("HELIX_DB_URL / DATABASE_URL not set".into()))?;
    let l = url.to_lowercase();
    if !(l.starts_with("postgres") || l.starts_with("postgresql://") || url.contains('@')) {
      return Err(DomainError::Storage("HELIX_DB_URL / DATABASE_URL does not look like Postgres URL".into()));
    }
    Ok(DieselHelixRepository::new(&url))
  } else {
    let url = std::env::var("HELIX_DB_URL").or_else(|_| std::env::var("DATABASE_URL"))
                                           .unwrap_or_else(|_| "file:helixdb?mode=memory&cache=shared".into());
    Ok(DieselHelixRepository::new(&url))
  }
}

// Helper de pruebas: repo respaldado por un fichero SQLite explícito. Evita
// depender del parseo de entorno en los tests de integración.
#[cfg(not(feature = "pg"))]
pub fn new_sqlite_for_test(database_url: &str) -> DieselHelixRepository {
  DieselHelixRepository::new(database_url)
}
