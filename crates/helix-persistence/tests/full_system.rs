// Recorrido completo sobre el backend SQLite: roles, formulario dinámico,
// importación CSV y snapshot, todo a través del trait `HelixRepository`.
use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::json;

use helix_domain::{resolve_database_role, DatabaseRole, FieldType, FieldValue, HelixRepository, NewFieldDefinition,
                   NewOrganization, NewResearchDatabase, NewUser, OrganizationRole};
use helix_forms::{build_editable_fields, save_values};
use helix_persistence::DieselHelixRepository;
use helix_workflow::{export_organization, import_rows, restore_organization};
use tempfile::TempDir;

#[test]
fn import_form_and_snapshot_against_sqlite() {
  let dir = TempDir::new().unwrap();
  let path = dir.path().join("full.sqlite3");
  let repo = DieselHelixRepository::new(path.to_str().unwrap());

  let owner = repo.create_user(NewUser::new("dueña", "owner@example.org")).unwrap();
  let org = repo.create_organization(NewOrganization { name: "Helix Labs".into(),
                                                       slug: "helix-labs".into(),
                                                       created_by: Some(owner.id) })
                .unwrap();
  repo.upsert_organization_membership(org.id, owner.id, OrganizationRole::Admin).unwrap();
  let db = repo.create_database(NewResearchDatabase { organization_id: org.id,
                                                      name: "Cepario".into(),
                                                      description: String::new(),
                                                      created_by: Some(owner.id) })
               .unwrap();
  repo.upsert_database_membership(db.id, owner.id, DatabaseRole::Owner).unwrap();
  assert_eq!(resolve_database_role(&repo, &owner, db.id), Some(DatabaseRole::Owner));

  // esquema: un entero único y un select condicionado
  let temp = repo.create_field_definition(NewFieldDefinition::basic(db.id, org.id, "Growth Temp", FieldType::Integer)
                                            .validated()
                                            .unwrap())
                 .unwrap();
  let mut medio = NewFieldDefinition::basic(db.id, org.id, "Medio", FieldType::SingleSelect);
  medio.choices = "LB, M9".into();
  medio.conditional_logic = json!({
    "operator": "AND",
    "conditions": [{"field": "growth_temp", "operator": "gt", "value": 20}]
  });
  repo.create_field_definition(medio.validated().unwrap()).unwrap();

  // importación CSV con celda personalizada
  let definitions = HashMap::from([("Growth Temp".to_string(), temp.clone())]);
  let rows = vec![HashMap::from([("strain_id".to_string(), "HM-001".to_string()),
                                 ("organism".to_string(), "E. coli".to_string()),
                                 ("genotype".to_string(), "WT".to_string()),
                                 ("location".to_string(), "Box 1 A1".to_string()),
                                 ("plasmids".to_string(), "pUC19".to_string()),
                                 ("custom:Growth Temp".to_string(), "37".to_string())]),
                  HashMap::from([("strain_id".to_string(), "hm-001".to_string()),
                                 ("organism".to_string(), "E. coli".to_string()),
                                 ("genotype".to_string(), "WT".to_string()),
                                 ("location".to_string(), "Box 1 A2".to_string())])];
  let outcome = import_rows(&repo, &db, &owner, &rows, &definitions).unwrap();
  assert_eq!(outcome.created, 1);
  assert_eq!(outcome.skipped, 1);

  let strain = repo.find_strain_ci(db.id, "HM-001").unwrap().unwrap();
  let values = repo.field_values_for_strain(strain.id).unwrap();
  assert_eq!(values.len(), 1);
  assert_eq!(values[0].value, FieldValue::Integer(37));

  // el formulario ve el valor importado y guarda el select condicionado
  let fields = build_editable_fields(&repo, &db, Some(DatabaseRole::Owner), Some(&strain)).unwrap();
  let temp_spec = fields.iter().find(|f| f.key == "growth_temp").unwrap();
  assert_eq!(temp_spec.initial, Some(json!(37)));

  let mut subs = IndexMap::new();
  subs.insert("growth_temp".to_string(), json!(37));
  subs.insert("medio".to_string(), json!("LB"));
  save_values(&repo, Some(DatabaseRole::Owner), &strain, &subs).unwrap();
  assert_eq!(repo.field_values_for_strain(strain.id).unwrap().len(), 2);

  // snapshot: exportar, restaurar y verificar que el contenido sobrevive
  let doc = export_organization(&repo, &org).unwrap();
  restore_organization(&repo, &org, &doc, &owner).unwrap();

  let databases = repo.list_databases(org.id).unwrap();
  let restored = repo.find_strain_ci(databases[0].id, "HM-001").unwrap().unwrap();
  assert_ne!(restored.id, strain.id, "la restauración reasigna ids");
  let restored_values = repo.field_values_for_strain(restored.id).unwrap();
  assert_eq!(restored_values.len(), 2);
  assert!(restored_values.iter().any(|v| v.value == FieldValue::Integer(37)));
  assert_eq!(repo.plasmid_ids_for_strain(restored.id).unwrap().len(), 1);
}
