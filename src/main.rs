use std::collections::HashMap;
use std::error::Error;
use std::io::{self, Write};

use helix_domain::{resolve_database_role, DatabaseRole, HelixRepository, NewOrganization, NewResearchDatabase, NewUser,
                   OrganizationRole};
use helix_workflow::{build_mapped_rows, export_organization, import_rows, make_snapshot_zip, parse_csv};

/// Pequeño menú interactivo para administrar el inventario usando el
/// repositorio proporcionado por `helix-persistence`.
///
/// Opciones soportadas:
/// 1) Ver bases de datos de una organización
/// 2) Crear organización con base de datos
/// 3) Importar cepas desde un CSV
/// 4) Exportar snapshot de una organización a un zip
/// 5) Salir
fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    // Inicializar repo (aplica migraciones embebidas si procede)
    let repo = helix_persistence::new_repo_from_env().map_err(|e| Box::new(e) as Box<dyn Error>)?;
    let operator = ensure_operator(&repo)?;

    loop {
        println!("\n== HelixMapr menu ==");
        println!("1) Ver bases de datos de una organización");
        println!("2) Crear organización con base de datos");
        println!("3) Importar cepas desde un CSV");
        println!("4) Exportar snapshot de una organización");
        println!("5) Salir");
        print!("Elige una opción: ");
        io::stdout().flush().ok();

        let mut choice = String::new();
        io::stdin().read_line(&mut choice)?;
        match choice.trim() {
            "1" => {
                let org_id = match prompt_id("Id de la organización: ")? {
                    Some(id) => id,
                    None => continue,
                };
                match repo.list_databases(org_id) {
                    Ok(databases) => {
                        println!("\nID   | NOMBRE               | ROL");
                        println!("---------------------------------------");
                        for db in databases {
                            let role = resolve_database_role(&repo, &operator, db.id)
                                .map(|r| r.as_str().to_string())
                                .unwrap_or_else(|| "-".into());
                            println!("{:<4} | {:<20} | {}", db.id, db.name, role);
                        }
                    }
                    Err(e) => eprintln!("Error listando bases de datos: {}", e),
                }
            }
            "2" => {
                let name = prompt("Nombre de la organización: ")?;
                let db_name = prompt("Nombre de la base de datos: ")?;
                let result = repo
                    .create_organization(NewOrganization {
                        name: name.trim().to_string(),
                        slug: helix_domain::slugify(name.trim()),
                        created_by: Some(operator.id),
                    })
                    .and_then(|org| {
                        repo.upsert_organization_membership(org.id, operator.id, OrganizationRole::Admin)?;
                        let db = repo.create_database(NewResearchDatabase {
                            organization_id: org.id,
                            name: db_name.trim().to_string(),
                            description: String::new(),
                            created_by: Some(operator.id),
                        })?;
                        repo.upsert_database_membership(db.id, operator.id, DatabaseRole::Owner)?;
                        Ok((org, db))
                    });
                match result {
                    Ok((org, db)) => println!("Organización {} creada con base de datos {}", org.id, db.id),
                    Err(e) => eprintln!("Error creando organización: {}", e),
                }
            }
            "3" => {
                let db_id = match prompt_id("Id de la base de datos destino: ")? {
                    Some(id) => id,
                    None => continue,
                };
                let database = match repo.get_database(db_id) {
                    Ok(Some(db)) => db,
                    Ok(None) => { eprintln!("Base de datos inexistente"); continue; }
                    Err(e) => { eprintln!("Error: {}", e); continue; }
                };
                let path = prompt("Ruta del fichero CSV: ")?;
                let content = match std::fs::read(path.trim()) {
                    Ok(c) => c,
                    Err(e) => { eprintln!("No se pudo leer el fichero: {}", e); continue; }
                };
                // mapeo identidad: las cabeceras ya usan las claves estándar
                let outcome = parse_csv(&content).and_then(|(headers, rows)| {
                    let mapping: HashMap<String, String> =
                        headers.iter().map(|h| (h.clone(), h.clone())).collect();
                    let mapped = build_mapped_rows(&rows, &mapping);
                    import_rows(&repo, &database, &operator, &mapped, &HashMap::new())
                });
                match outcome {
                    Ok(o) => println!("Importación completada: {} creadas, {} saltadas", o.created, o.skipped),
                    Err(e) => eprintln!("Error importando: {}", e),
                }
            }
            "4" => {
                let org_id = match prompt_id("Id de la organización: ")? {
                    Some(id) => id,
                    None => continue,
                };
                let organization = match repo.get_organization(org_id) {
                    Ok(Some(org)) => org,
                    Ok(None) => { eprintln!("Organización inexistente"); continue; }
                    Err(e) => { eprintln!("Error: {}", e); continue; }
                };
                let result = export_organization(&repo, &organization)
                    .and_then(|doc| make_snapshot_zip(&doc))
                    .and_then(|bytes| {
                        let file = format!("snapshot-{}.zip", organization.slug);
                        std::fs::write(&file, bytes)?;
                        Ok(file)
                    });
                match result {
                    Ok(file) => println!("Snapshot escrito en {}", file),
                    Err(e) => eprintln!("Error exportando: {}", e),
                }
            }
            "5" => {
                println!("Saliendo...");
                break;
            }
            other => {
                println!("Opción inválida: {}", other);
            }
        }
    }

    Ok(())
}

// El binario de demostración opera con un usuario local fijo.
fn ensure_operator(repo: &helix_persistence::DieselHelixRepository) -> Result<helix_domain::User, Box<dyn Error>> {
    if let Some(user) = repo.find_user_by_username("operador").map_err(boxed)? {
        return Ok(user);
    }
    repo.create_user(NewUser::superuser("operador", "operador@helixmapr.local")).map_err(boxed)
}

fn boxed(e: helix_domain::DomainError) -> Box<dyn Error> {
    Box::new(e) as Box<dyn Error>
}

fn prompt(msg: &str) -> io::Result<String> {
    print!("{}", msg);
    io::stdout().flush()?;
    let mut s = String::new();
    io::stdin().read_line(&mut s)?;
    Ok(s)
}

fn prompt_id(msg: &str) -> Result<Option<i64>, Box<dyn Error>> {
    let raw = prompt(msg)?;
    match raw.trim().parse::<i64>() {
        Ok(id) => Ok(Some(id)),
        Err(_) => {
            eprintln!("Id inválido");
            Ok(None)
        }
    }
}
