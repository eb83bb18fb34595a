use std::collections::HashMap;

use helix_domain::{actions, DatabaseRole, FieldType, FieldValue, HelixRepository, InMemoryHelixRepository,
                   NewFieldDefinition, NewOrganization, NewResearchDatabase, NewUser, Organization, ResearchDatabase,
                   User};
use helix_workflow::{build_mapped_rows, import_rows, parse_csv, resolve_or_create_organism};

struct Fixture {
  repo: InMemoryHelixRepository,
  org: Organization,
  db: ResearchDatabase,
  user: User,
}

fn fixture() -> Fixture {
  let repo = InMemoryHelixRepository::new();
  let org =
    repo.create_organization(NewOrganization { name: "Lab".into(), slug: "lab".into(), created_by: None }).unwrap();
  let db = repo.create_database(NewResearchDatabase { organization_id: org.id,
                                                      name: "Cepario".into(),
                                                      description: String::new(),
                                                      created_by: None })
               .unwrap();
  let user = repo.create_user(NewUser::new("importador", "import@example.org")).unwrap();
  repo.upsert_database_membership(db.id, user.id, DatabaseRole::Editor).unwrap();
  Fixture { repo, org, db, user }
}

fn row(pairs: &[(&str, &str)]) -> HashMap<String, String> {
  pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn base_row(strain_id: &str) -> HashMap<String, String> {
  row(&[("strain_id", strain_id),
        ("organism", "E. coli"),
        ("genotype", "WT"),
        ("location", "Box 1 A1")])
}

#[test]
fn duplicate_strain_id_in_batch_is_skipped_case_insensitive() {
  let fx = fixture();
  let rows = vec![base_row("HM-001"), base_row("hm-001")];
  let outcome = import_rows(&fx.repo, &fx.db, &fx.user, &rows, &HashMap::new()).unwrap();
  assert_eq!(outcome.created, 1);
  assert_eq!(outcome.skipped, 1);
  assert!(fx.repo.find_strain_ci(fx.db.id, "HM-001").unwrap().is_some());
}

#[test]
fn existing_strain_in_database_is_skipped() {
  let fx = fixture();
  let rows = vec![base_row("HM-002")];
  import_rows(&fx.repo, &fx.db, &fx.user, &rows, &HashMap::new()).unwrap();
  // segundo lote con el mismo identificador en otra caja
  let outcome = import_rows(&fx.repo, &fx.db, &fx.user, &vec![base_row("HM-002")], &HashMap::new()).unwrap();
  assert_eq!(outcome.created, 0);
  assert_eq!(outcome.skipped, 1);
}

#[test]
fn organism_is_auto_created_once_and_audited() {
  let fx = fixture();
  let rows = vec![base_row("HM-010"), base_row("HM-011"), base_row("HM-012")];
  let outcome = import_rows(&fx.repo, &fx.db, &fx.user, &rows, &HashMap::new()).unwrap();
  assert_eq!(outcome.created, 3);
  assert_eq!(fx.repo.list_organisms(fx.db.id).unwrap().len(), 1);

  let audits = fx.repo.list_audit_for_database(fx.db.id).unwrap();
  let auto_creates: Vec<_> = audits.iter().filter(|a| a.action == actions::AUTO_CREATE_ORGANISM).collect();
  assert_eq!(auto_creates.len(), 1);
  let imports: Vec<_> = audits.iter().filter(|a| a.action == actions::IMPORT_STRAIN).collect();
  assert_eq!(imports.len(), 3);
}

#[test]
fn preexisting_organism_is_not_audited_as_auto_created() {
  let fx = fixture();
  fx.repo.create_organism(fx.db.id, "E. coli").unwrap();
  import_rows(&fx.repo, &fx.db, &fx.user, &vec![base_row("HM-020")], &HashMap::new()).unwrap();
  let audits = fx.repo.list_audit_for_database(fx.db.id).unwrap();
  assert!(audits.iter().all(|a| a.action != actions::AUTO_CREATE_ORGANISM));
}

#[test]
fn resolve_or_create_reports_whether_it_created() {
  let fx = fixture();
  let (organism, created) = resolve_or_create_organism(&fx.repo, fx.db.id, "S. cerevisiae").unwrap().unwrap();
  assert!(created);
  let (again, created) = resolve_or_create_organism(&fx.repo, fx.db.id, "s. CEREVISIAE").unwrap().unwrap();
  assert!(!created);
  assert_eq!(organism.id, again.id);
}

#[test]
fn invalid_rows_are_counted_not_fatal() {
  let fx = fixture();
  let rows = vec![base_row("HM-030"),
                  row(&[("strain_id", ""), ("organism", "E. coli"), ("genotype", "WT"), ("location", "Box 1 A1")]),
                  row(&[("strain_id", "HM-031"), ("organism", "E. coli"), ("genotype", "WT"),
                        ("location", "Shelf 9")]),
                  row(&[("strain_id", "HM-032"), ("organism", ""), ("genotype", "WT"), ("location", "Box 1 A2")])];
  let outcome = import_rows(&fx.repo, &fx.db, &fx.user, &rows, &HashMap::new()).unwrap();
  assert_eq!(outcome.created, 1);
  assert_eq!(outcome.skipped, 3);
}

#[test]
fn plasmids_are_resolved_and_linked() {
  let fx = fixture();
  let mut r = base_row("HM-040");
  r.insert("plasmids".into(), "pUC19, pBR322".into());
  import_rows(&fx.repo, &fx.db, &fx.user, &vec![r], &HashMap::new()).unwrap();
  let strain = fx.repo.find_strain_ci(fx.db.id, "HM-040").unwrap().unwrap();
  assert_eq!(fx.repo.plasmid_ids_for_strain(strain.id).unwrap().len(), 2);
  assert!(fx.repo.find_plasmid_ci(fx.db.id, "puc19").unwrap().is_some());
}

#[test]
fn custom_field_cells_are_parsed_and_saved() {
  let fx = fixture();
  let def = fx.repo
              .create_field_definition(NewFieldDefinition::basic(fx.db.id, fx.org.id, "Growth Temp", FieldType::Integer)
                                         .validated()
                                         .unwrap())
              .unwrap();
  let definitions = HashMap::from([("Growth Temp".to_string(), def.clone())]);

  let mut good = base_row("HM-050");
  good.insert("custom:Growth Temp".into(), "37".into());
  let mut bad = base_row("HM-051");
  bad.insert("custom:Growth Temp".into(), "tibio".into());

  let outcome = import_rows(&fx.repo, &fx.db, &fx.user, &vec![good, bad], &definitions).unwrap();
  assert_eq!(outcome.created, 1);
  assert_eq!(outcome.skipped, 1);

  let strain = fx.repo.find_strain_ci(fx.db.id, "HM-050").unwrap().unwrap();
  let values = fx.repo.field_values_for_strain(strain.id).unwrap();
  assert_eq!(values.len(), 1);
  assert_eq!(values[0].value, FieldValue::Integer(37));
}

#[test]
fn unknown_custom_mapping_skips_the_row() {
  let fx = fixture();
  let mut r = base_row("HM-060");
  r.insert("custom:No Existe".into(), "x".into());
  let outcome = import_rows(&fx.repo, &fx.db, &fx.user, &vec![r], &HashMap::new()).unwrap();
  assert_eq!(outcome.created, 0);
  assert_eq!(outcome.skipped, 1);
}

#[test]
fn csv_to_import_end_to_end() {
  let fx = fixture();
  let content = "\u{feff}ID,Bicho,Geno,Sitio\nHM-070,E. coli,WT,Box 2 B1\nHM-071,E. coli,ΔlacZ,Box 2 B2\n";
  let (headers, rows) = parse_csv(content.as_bytes()).unwrap();
  assert_eq!(headers.len(), 4);
  let mapping = HashMap::from([("ID".to_string(), "strain_id".to_string()),
                               ("Bicho".to_string(), "organism".to_string()),
                               ("Geno".to_string(), "genotype".to_string()),
                               ("Sitio".to_string(), "location".to_string())]);
  let mapped = build_mapped_rows(&rows, &mapping);
  let outcome = import_rows(&fx.repo, &fx.db, &fx.user, &mapped, &HashMap::new()).unwrap();
  assert_eq!(outcome.created, 2);
  assert_eq!(outcome.skipped, 0);
  let strain = fx.repo.find_strain_ci(fx.db.id, "HM-071").unwrap().unwrap();
  assert_eq!(strain.genotype, "ΔlacZ");
}

#[test]
fn header_row_is_mandatory() {
  assert!(parse_csv(b"").is_err());
}
