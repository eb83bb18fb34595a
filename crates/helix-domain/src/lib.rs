//! Crate `helix-domain` — modelo de dominio del inventario de laboratorio
//!
//! Este crate define las entidades multi-tenant (organizaciones, bases de
//! datos, cepas, catálogos), el modelo de roles, el esquema de campos
//! personalizados con su valor polimórfico como unión etiquetada, el AST de
//! lógica condicional con su evaluador, el contrato de persistencia
//! `HelixRepository` y una implementación en memoria útil para pruebas
//! (`InMemoryHelixRepository`).
//!
//! Diseño resumido:
//! - Cada valor de campo es una variante de [`FieldValue`]; el tipo de la
//!   definición decide la variante válida y la persistencia lo aplana a
//!   columnas tipadas.
//! - Los roles resuelven fail-closed; la lógica condicional evalúa
//!   fail-open.
//! - Las colisiones de unicidad se reportan como `Conflict` para permitir
//!   re-consultar tras una carrera de escritores concurrentes.
mod audit;
mod catalog;
mod conditions;
mod errors;
mod field_definition;
mod field_value;
mod memory;
mod repository;
mod roles;
mod strain;
mod tenancy;
mod users;

pub use audit::{actions, AuditLog, NewAuditEntry};
pub use catalog::{Location, NewLocation, Organism, Plasmid};
pub use conditions::{evaluate, Condition, ConditionOp, ConditionalLogic, LogicOperator};
pub use errors::{DomainError, Result};
pub use field_definition::{slugify, FieldDefinition, FieldType, NewFieldDefinition, RelatedEntityKind,
                           ValidatedFieldDefinition, ValidationRules};
pub use field_value::{is_blank, FieldValue};
pub use memory::InMemoryHelixRepository;
pub use repository::{now, FieldValueWrite, HelixRepository, StoredFieldValue};
pub use roles::{require_database_role, resolve_database_role, resolve_organization_role, role_at_least, user_has_role,
                DatabaseMembership, DatabaseRole, OrganizationMembership, OrganizationRole};
pub use strain::{NewStrain, Strain, StrainPlasmid, StrainStatus};
pub use tenancy::{NewOrganization, NewResearchDatabase, Organization, ResearchDatabase, TenantScoped};
pub use users::{NewUser, User};
