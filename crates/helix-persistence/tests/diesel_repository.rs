use helix_domain::{DatabaseRole, DomainError, FieldType, FieldValue, FieldValueWrite, HelixRepository,
                   NewFieldDefinition, NewLocation, NewOrganization, NewResearchDatabase, NewStrain, NewUser};
use helix_persistence::DieselHelixRepository;
use tempfile::TempDir;

fn repo_in(dir: &TempDir) -> DieselHelixRepository {
  let path = dir.path().join("helix.sqlite3");
  DieselHelixRepository::new(path.to_str().unwrap())
}

fn seed(repo: &DieselHelixRepository) -> (helix_domain::Organization, helix_domain::ResearchDatabase) {
  let org =
    repo.create_organization(NewOrganization { name: "Lab".into(), slug: "lab".into(), created_by: None }).unwrap();
  let db = repo.create_database(NewResearchDatabase { organization_id: org.id,
                                                      name: "Cepario".into(),
                                                      description: String::new(),
                                                      created_by: None })
               .unwrap();
  (org, db)
}

#[test]
fn unique_indexes_surface_as_conflicts() {
  let dir = TempDir::new().unwrap();
  let repo = repo_in(&dir);
  let (_org, db) = seed(&repo);

  repo.create_organism(db.id, "E. coli").unwrap();
  let err = repo.create_organism(db.id, "e. COLI").unwrap_err();
  assert!(matches!(err, DomainError::Conflict(_)));
  // la re-consulta tras el conflicto encuentra la fila del otro escritor
  assert!(repo.find_organism_ci(db.id, "E. COLI").unwrap().is_some());
}

#[test]
fn strain_natural_key_is_case_insensitive() {
  let dir = TempDir::new().unwrap();
  let repo = repo_in(&dir);
  let (_org, db) = seed(&repo);
  let organism = repo.create_organism(db.id, "E. coli").unwrap();
  let location = repo.create_location(NewLocation { research_database_id: db.id,
                                                    building: String::new(),
                                                    room: String::new(),
                                                    freezer: String::new(),
                                                    box_label: "Box 1".into(),
                                                    position: "A1".into() })
                     .unwrap();
  repo.create_strain(NewStrain::active(db.id, "HM-001", "HM-001", organism.id, location.id, None)).unwrap();
  let err =
    repo.create_strain(NewStrain::active(db.id, "hm-001", "hm-001", organism.id, location.id, None)).unwrap_err();
  assert!(matches!(err, DomainError::Conflict(_)));
  assert!(repo.find_strain_ci(db.id, "HM-001").unwrap().is_some());
}

#[test]
fn field_values_flatten_and_decode_through_sql() {
  let dir = TempDir::new().unwrap();
  let repo = repo_in(&dir);
  let (org, db) = seed(&repo);
  let organism = repo.create_organism(db.id, "E. coli").unwrap();
  let location = repo.create_location(NewLocation { research_database_id: db.id,
                                                    building: String::new(),
                                                    room: String::new(),
                                                    freezer: String::new(),
                                                    box_label: "Box 1".into(),
                                                    position: "A1".into() })
                     .unwrap();
  let strain = repo.create_strain(NewStrain::active(db.id, "HM-010", "HM-010", organism.id, location.id, None)).unwrap();

  let mut multi = NewFieldDefinition::basic(db.id, org.id, "Etiquetas", FieldType::MultiSelect);
  multi.choices = "gfp, rfp, his".into();
  let multi = repo.create_field_definition(multi.validated().unwrap()).unwrap();
  let number = repo.create_field_definition(NewFieldDefinition::basic(db.id, org.id, "Pases", FieldType::Integer)
                                              .validated()
                                              .unwrap())
                   .unwrap();
  let mut fk = NewFieldDefinition::basic(db.id, org.id, "Huésped", FieldType::ForeignKey);
  fk.related_model = Some(helix_domain::RelatedEntityKind::Organism);
  let fk = repo.create_field_definition(fk.validated().unwrap()).unwrap();

  repo.apply_field_value_writes(strain.id,
                                &[FieldValueWrite::Upsert { field_definition_id: multi.id,
                                                            value: FieldValue::MultiSelect(vec!["gfp".into(),
                                                                                                "his".into()]) },
                                  FieldValueWrite::Upsert { field_definition_id: number.id,
                                                            value: FieldValue::Integer(12) },
                                  FieldValueWrite::Upsert { field_definition_id: fk.id,
                                                            value: FieldValue::ForeignKey { kind:
                                                                                              helix_domain::RelatedEntityKind::Organism,
                                                                                            id: organism.id } }])
      .unwrap();

  let values = repo.field_values_for_strain(strain.id).unwrap();
  assert_eq!(values.len(), 3);
  assert!(values.iter().any(|v| v.value == FieldValue::Integer(12)));
  assert!(values.iter().any(|v| v.value == FieldValue::MultiSelect(vec!["gfp".into(), "his".into()])));

  // reemplazo: la columna anterior se limpia, queda exactamente una poblada
  repo.apply_field_value_writes(strain.id,
                                &[FieldValueWrite::Upsert { field_definition_id: number.id,
                                                            value: FieldValue::Integer(13) },
                                  FieldValueWrite::Delete { field_definition_id: multi.id }])
      .unwrap();
  let values = repo.field_values_for_strain(strain.id).unwrap();
  assert_eq!(values.len(), 2);
  assert!(values.iter().any(|v| v.value == FieldValue::Integer(13)));
}

#[test]
fn definition_ordering_is_stable() {
  let dir = TempDir::new().unwrap();
  let repo = repo_in(&dir);
  let (org, db) = seed(&repo);
  let mut b = NewFieldDefinition::basic(db.id, org.id, "B", FieldType::Text);
  b.order = 5;
  let mut a = NewFieldDefinition::basic(db.id, org.id, "A", FieldType::Text);
  a.order = 5;
  let mut grouped = NewFieldDefinition::basic(db.id, org.id, "Agrupado", FieldType::Text);
  grouped.group_name = Some("Extra".into());
  grouped.group_order = 1;
  let b = repo.create_field_definition(b.validated().unwrap()).unwrap();
  let a = repo.create_field_definition(a.validated().unwrap()).unwrap();
  let grouped = repo.create_field_definition(grouped.validated().unwrap()).unwrap();

  let listed: Vec<i64> = repo.list_field_definitions(db.id).unwrap().iter().map(|d| d.id).collect();
  assert_eq!(listed, vec![b.id, a.id, grouped.id]);
}

#[test]
fn atomically_rolls_back_and_savepoints_nest() {
  let dir = TempDir::new().unwrap();
  let repo = repo_in(&dir);
  let (_org, db) = seed(&repo);

  let result = repo.atomically(&mut || {
                     repo.create_organism(db.id, "Exterior")?;
                     let inner = repo.atomically(&mut || {
                                       repo.create_organism(db.id, "Interior")?;
                                       Err(DomainError::validation("fila mala"))
                                     });
                     assert!(inner.is_err());
                     Ok(())
                   });
  assert!(result.is_ok());
  assert!(repo.find_organism_ci(db.id, "Exterior").unwrap().is_some());
  assert!(repo.find_organism_ci(db.id, "Interior").unwrap().is_none());

  let result = repo.atomically(&mut || {
                     repo.create_organism(db.id, "Fantasma")?;
                     Err(DomainError::validation("abortar todo"))
                   });
  assert!(result.is_err());
  assert!(repo.find_organism_ci(db.id, "Fantasma").unwrap().is_none());
}

#[test]
fn conditional_logic_survives_storage() {
  let dir = TempDir::new().unwrap();
  let repo = repo_in(&dir);
  let (org, db) = seed(&repo);
  let mut def = NewFieldDefinition::basic(db.id, org.id, "Detalle", FieldType::Text);
  def.conditional_logic = serde_json::json!({
    "operator": "OR",
    "conditions": [{"field": "a", "operator": "equals", "value": 1}]
  });
  let created = repo.create_field_definition(def.validated().unwrap()).unwrap();
  let loaded = repo.get_field_definition(created.id).unwrap().unwrap();
  let logic = loaded.conditional_logic.expect("la lógica debe sobrevivir el guardado");
  assert_eq!(logic.operator, helix_domain::LogicOperator::Or);
  assert_eq!(logic.conditions.len(), 1);
}

#[test]
fn membership_upsert_updates_role_in_place() {
  let dir = TempDir::new().unwrap();
  let repo = repo_in(&dir);
  let (_org, db) = seed(&repo);
  let user = repo.create_user(NewUser::new("ana", "ana@example.org")).unwrap();
  let first = repo.upsert_database_membership(db.id, user.id, DatabaseRole::Viewer).unwrap();
  let second = repo.upsert_database_membership(db.id, user.id, DatabaseRole::Admin).unwrap();
  assert_eq!(first.id, second.id);
  assert_eq!(repo.find_database_membership(db.id, user.id).unwrap().unwrap().role, DatabaseRole::Admin);
}
