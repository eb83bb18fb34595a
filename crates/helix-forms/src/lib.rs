//! Crate `helix-forms` — constructor dinámico de formularios
//!
//! Dado el esquema de campos de una base de datos, el rol del usuario que
//! actúa y (opcionalmente) un registro existente, produce los `FieldSpec`
//! que una capa de presentación puede renderizar sin volver a consultar el
//! esquema, y valida/persiste los valores enviados contra las restricciones
//! de tipo, unicidad y lógica condicional.
//!
//! Ejemplo rápido:
//! ```rust
//! use helix_domain::{InMemoryHelixRepository, HelixRepository, NewOrganization, NewResearchDatabase, DatabaseRole};
//! use helix_forms::build_editable_fields;
//! let repo = InMemoryHelixRepository::new();
//! let org = repo.create_organization(NewOrganization { name: "Lab".into(), slug: "lab".into(), created_by: None }).unwrap();
//! let db = repo.create_database(NewResearchDatabase { organization_id: org.id, name: "Cepario".into(), description: String::new(), created_by: None }).unwrap();
//! let fields = build_editable_fields(&repo, &db, Some(DatabaseRole::Editor), None).unwrap();
//! assert!(fields.is_empty());
//! ```
mod errors;
mod save;
mod spec;

pub use errors::{FieldError, FormError, Result};
pub use save::{save_values, Submissions};
pub use spec::{build_editable_fields, FieldSpec, RelatedOption};
