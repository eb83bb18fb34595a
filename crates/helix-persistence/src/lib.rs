//! Crate `helix-persistence` — persistencia Diesel del inventario
//!
//! Implementa `HelixRepository` sobre Diesel con SQLite como backend por
//! defecto (pruebas y demos) y Postgres tras la feature `pg`. Las
//! migraciones van embebidas y se aplican al construir el repositorio; los
//! constructores `new_repo_from_env` leen `HELIX_DB_URL` / `DATABASE_URL`
//! vía dotenvy.
mod repo;
mod rows;
mod schema;

pub use repo::{new_repo_from_env, DieselHelixRepository, MIGRATIONS};
#[cfg(not(feature = "pg"))]
pub use repo::new_sqlite_for_test;
