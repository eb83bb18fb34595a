use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use serde_json::json;

use helix_domain::{DatabaseRole, FieldType, HelixRepository, InMemoryHelixRepository, NewFieldDefinition, NewLocation,
                   NewOrganization, NewResearchDatabase, NewStrain, NewUser, Organization, OrganizationRole, User};
use helix_forms::save_values;
use helix_workflow::{export_organization, make_snapshot_zip, read_snapshot_zip, restore_organization,
                     SnapshotDocument, WorkflowError, SNAPSHOT_VERSION};

struct Fixture {
  repo: InMemoryHelixRepository,
  org: Organization,
  owner: User,
}

// Siembra una organización con dos bases de datos, catálogo, cepas con
// plásmidos y valores de campos personalizados de varios tipos.
fn seeded() -> Fixture {
  let repo = InMemoryHelixRepository::new();
  let owner = repo.create_user(NewUser::new("dueña", "owner@example.org")).unwrap();
  let editor = repo.create_user(NewUser::new("editora", "editor@example.org")).unwrap();
  let org = repo.create_organization(NewOrganization { name: "Helix Labs".into(),
                                                       slug: "helix-labs".into(),
                                                       created_by: Some(owner.id) })
                .unwrap();
  repo.upsert_organization_membership(org.id, owner.id, OrganizationRole::Admin).unwrap();
  repo.upsert_organization_membership(org.id, editor.id, OrganizationRole::Member).unwrap();

  let db = repo.create_database(NewResearchDatabase { organization_id: org.id,
                                                      name: "Cepario".into(),
                                                      description: "colección principal".into(),
                                                      created_by: Some(owner.id) })
               .unwrap();
  repo.upsert_database_membership(db.id, owner.id, DatabaseRole::Owner).unwrap();
  repo.upsert_database_membership(db.id, editor.id, DatabaseRole::Editor).unwrap();

  let organism = repo.create_organism(db.id, "E. coli").unwrap();
  let location = repo.create_location(NewLocation { research_database_id: db.id,
                                                    building: "B1".into(),
                                                    room: "R2".into(),
                                                    freezer: "F-80".into(),
                                                    box_label: "Box 4".into(),
                                                    position: "C3".into() })
                     .unwrap();
  let plasmid = repo.create_plasmid(db.id, "pUC19", "AmpR", "").unwrap();

  let strain = repo.create_strain(NewStrain { research_database_id: db.id,
                                              strain_id: "HM-100".into(),
                                              name: "HM-100".into(),
                                              organism_id: organism.id,
                                              genotype: "ΔlacZ".into(),
                                              selective_marker: "AmpR".into(),
                                              comments: "cepa de referencia".into(),
                                              location_id: location.id,
                                              status: helix_domain::StrainStatus::Active,
                                              created_by: Some(owner.id),
                                              is_active: true,
                                              is_archived: false,
                                              archived_at: None,
                                              archived_by: None })
                   .unwrap();
  repo.link_strain_plasmid(strain.id, plasmid.id).unwrap();

  let mut temp = NewFieldDefinition::basic(db.id, org.id, "Growth Temp", FieldType::Integer);
  temp.is_unique = true;
  repo.create_field_definition(temp.validated().unwrap()).unwrap();
  let mut medio = NewFieldDefinition::basic(db.id, org.id, "Medio", FieldType::SingleSelect);
  medio.choices = "LB, M9".into();
  medio.conditional_logic = json!({
    "operator": "AND",
    "conditions": [{"field": "growth_temp", "operator": "gt", "value": 20}]
  });
  repo.create_field_definition(medio.validated().unwrap()).unwrap();

  let mut subs = IndexMap::new();
  subs.insert("growth_temp".to_string(), json!(37));
  subs.insert("medio".to_string(), json!("LB"));
  save_values(&repo, Some(DatabaseRole::Owner), &strain, &subs).unwrap();

  // segunda base de datos para comprobar el recorrido multi-base
  let db2 = repo.create_database(NewResearchDatabase { organization_id: org.id,
                                                       name: "Plásmidos".into(),
                                                       description: String::new(),
                                                       created_by: Some(owner.id) })
                .unwrap();
  repo.create_plasmid(db2.id, "pET28a", "KanR", "expresión").unwrap();

  Fixture { repo, org, owner }
}

// Proyección estable del documento para compararlo entre exportaciones:
// los ids y timestamps cambian al restaurar, el contenido no debe.
fn projection(doc: &SnapshotDocument) -> serde_json::Value {
  let db_names: BTreeMap<i64, String> = doc.databases.iter().map(|d| (d.id, d.name.clone())).collect();
  let strain_names: BTreeMap<i64, String> = doc.strains.iter().map(|s| (s.id, s.strain_id.clone())).collect();
  let plasmid_names: BTreeMap<i64, String> = doc.plasmids.iter().map(|p| (p.id, p.name.clone())).collect();
  let field_keys: BTreeMap<i64, String> = doc.custom_fields.iter().map(|f| (f.id, f.key.clone())).collect();

  let members: BTreeSet<String> =
    doc.members.iter().map(|m| format!("{}:{}", m.username, m.role.as_str())).collect();
  let memberships: BTreeSet<String> = doc.database_memberships
                                         .iter()
                                         .map(|m| {
                                           format!("{}:{}:{}",
                                                   db_names.get(&m.research_database_id).cloned().unwrap_or_default(),
                                                   m.username,
                                                   m.role.as_str())
                                         })
                                         .collect();
  let organisms: BTreeSet<String> = doc.organisms
                                       .iter()
                                       .map(|o| {
                                         format!("{}:{}",
                                                 db_names.get(&o.research_database_id).cloned().unwrap_or_default(),
                                                 o.name)
                                       })
                                       .collect();
  let locations: BTreeSet<String> = doc.locations
                                       .iter()
                                       .map(|l| {
                                         format!("{}:{}/{}/{}/{}/{}",
                                                 db_names.get(&l.research_database_id).cloned().unwrap_or_default(),
                                                 l.building,
                                                 l.room,
                                                 l.freezer,
                                                 l.box_label,
                                                 l.position)
                                       })
                                       .collect();
  let plasmids: BTreeSet<String> = doc.plasmids
                                      .iter()
                                      .map(|p| {
                                        format!("{}:{}:{}",
                                                db_names.get(&p.research_database_id).cloned().unwrap_or_default(),
                                                p.name,
                                                p.resistance_marker)
                                      })
                                      .collect();
  let strains: BTreeMap<String, serde_json::Value> =
    doc.strains
       .iter()
       .map(|s| {
         (s.strain_id.clone(),
          json!({
            "db": db_names.get(&s.research_database_id),
            "genotype": s.genotype,
            "marker": s.selective_marker,
            "comments": s.comments,
            "status": s.status.as_str(),
            "archived": s.is_archived,
          }))
       })
       .collect();
  let links: BTreeSet<String> = doc.strain_plasmids
                                   .iter()
                                   .map(|l| {
                                     format!("{}:{}",
                                             strain_names.get(&l.strain_id).cloned().unwrap_or_default(),
                                             plasmid_names.get(&l.plasmid_id).cloned().unwrap_or_default())
                                   })
                                   .collect();
  let fields: BTreeMap<String, serde_json::Value> =
    doc.custom_fields
       .iter()
       .map(|f| {
         (f.key.clone(),
          json!({
            "db": db_names.get(&f.research_database_id),
            "name": f.name,
            "type": f.field_type.as_str(),
            "choices": f.choices,
            "unique": f.is_unique,
            "logic": f.conditional_logic,
          }))
       })
       .collect();
  let values: BTreeMap<String, serde_json::Value> =
    doc.field_values
       .iter()
       .map(|v| {
         (format!("{}:{}",
                  strain_names.get(&v.strain_id).cloned().unwrap_or_default(),
                  field_keys.get(&v.field_definition_id).cloned().unwrap_or_default()),
          serde_json::to_value(&v.value).unwrap())
       })
       .collect();
  let mut audit_actions: Vec<String> = doc.audit_logs.iter().map(|a| a.action.clone()).collect();
  audit_actions.sort();

  json!({
    "organization": { "uuid": doc.organization.uuid, "name": doc.organization.name, "slug": doc.organization.slug },
    "members": members,
    "memberships": memberships,
    "organisms": organisms,
    "locations": locations,
    "plasmids": plasmids,
    "strains": strains,
    "links": links,
    "fields": fields,
    "values": values,
    "audit_actions": audit_actions,
  })
}

#[test]
fn zip_round_trip_preserves_the_document() {
  let fx = seeded();
  let doc = export_organization(&fx.repo, &fx.org).unwrap();
  let bytes = make_snapshot_zip(&doc).unwrap();
  let reread = read_snapshot_zip(&bytes).unwrap();
  assert_eq!(serde_json::to_value(&doc).unwrap(), serde_json::to_value(&reread).unwrap());
}

#[test]
fn zip_without_member_is_rejected() {
  // un zip válido pero sin snapshot.json
  let mut buffer = std::io::Cursor::new(Vec::new());
  {
    use std::io::Write;
    let mut writer = zip::ZipWriter::new(&mut buffer);
    let options = zip::write::SimpleFileOptions::default();
    writer.start_file("otro.txt", options).unwrap();
    writer.write_all(b"nada").unwrap();
    writer.finish().unwrap();
  }
  let err = read_snapshot_zip(&buffer.into_inner()).unwrap_err();
  assert!(matches!(err, WorkflowError::Validation(_)));
}

#[test]
fn restore_then_export_is_stable() {
  let fx = seeded();
  let before = export_organization(&fx.repo, &fx.org).unwrap();
  restore_organization(&fx.repo, &fx.org, &before, &fx.owner).unwrap();
  let after = export_organization(&fx.repo, &fx.org).unwrap();
  assert_eq!(projection(&before), projection(&after));
  assert_eq!(after.version, SNAPSHOT_VERSION);
}

#[test]
fn cross_organization_restore_is_rejected_without_writes() {
  let fx = seeded();
  let doc = export_organization(&fx.repo, &fx.org).unwrap();

  let other = fx.repo
                .create_organization(NewOrganization { name: "Ajena".into(), slug: "ajena".into(), created_by: None })
                .unwrap();
  let other_db = fx.repo
                   .create_database(NewResearchDatabase { organization_id: other.id,
                                                          name: "Intacta".into(),
                                                          description: String::new(),
                                                          created_by: None })
                   .unwrap();
  fx.repo.create_organism(other_db.id, "B. subtilis").unwrap();

  let err = restore_organization(&fx.repo, &other, &doc, &fx.owner).unwrap_err();
  assert!(matches!(err, WorkflowError::Domain(helix_domain::DomainError::Conflict(_))));

  // cero escrituras sobre la organización destino
  let databases = fx.repo.list_databases(other.id).unwrap();
  assert_eq!(databases.len(), 1);
  assert_eq!(databases[0].name, "Intacta");
  assert_eq!(fx.repo.list_organisms(other_db.id).unwrap().len(), 1);
}

#[test]
fn unsupported_version_is_rejected() {
  let fx = seeded();
  let mut doc = export_organization(&fx.repo, &fx.org).unwrap();
  doc.version = "0.9".into();
  let err = restore_organization(&fx.repo, &fx.org, &doc, &fx.owner).unwrap_err();
  assert!(matches!(err, WorkflowError::Domain(helix_domain::DomainError::Conflict(_))));
}

#[test]
fn missing_users_fall_back_to_the_acting_user() {
  let fx = seeded();
  let mut doc = export_organization(&fx.repo, &fx.org).unwrap();
  // un miembro que ya no existe en el directorio
  for member in &mut doc.members {
    if member.username == "editora" {
      member.user_id = 9999;
      member.username = "desaparecida".into();
      member.email = "gone@example.org".into();
    }
  }
  restore_organization(&fx.repo, &fx.org, &doc, &fx.owner).unwrap();
  let memberships = fx.repo.list_organization_memberships(fx.org.id).unwrap();
  // la membresía huérfana colapsa sobre la usuaria que restaura
  assert!(memberships.iter().all(|m| m.user_id == fx.owner.id));
}

#[test]
fn restore_writes_a_synthetic_audit_entry() {
  let fx = seeded();
  let doc = export_organization(&fx.repo, &fx.org).unwrap();
  restore_organization(&fx.repo, &fx.org, &doc, &fx.owner).unwrap();
  // la entrada sintética es de nivel organización (sin base de datos), por
  // eso no aparece en los listados por base; una segunda restauración debe
  // seguir validando la identidad de la organización
  let second = export_organization(&fx.repo, &fx.org).unwrap();
  restore_organization(&fx.repo, &fx.org, &second, &fx.owner).unwrap();
}
