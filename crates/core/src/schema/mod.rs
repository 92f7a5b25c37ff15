//! Entity schema compiler.
//!
//! The declarative entity schema is a GraphQL SDL document of plain object
//! types. It is parsed and validated exactly once at startup into
//! [`EntitySchema`], the typed representation both generators consume: the
//! DDL emitter in [`ddl`] and the query surface built by the GraphQL crate.
//! Neither generator ever re-reads the SDL.

pub mod ddl;

use async_graphql::parser::parse_schema;
use async_graphql::parser::types::{BaseType, TypeKind, TypeSystemDefinition};

use crate::error::{SchemaError, SchemaResult};

/// Scalar types entities may declare.
///
/// This is the whole column rule table: every scalar maps to exactly one
/// SQL column type, and anything else is rejected at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Int,
    Float,
    String,
    Id,
    /// Long-form string. Stored as `TEXT`, never indexed, never filterable.
    Text,
    Boolean,
}

impl ScalarType {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "Int" => Some(Self::Int),
            "Float" => Some(Self::Float),
            "String" => Some(Self::String),
            "ID" => Some(Self::Id),
            "Text" => Some(Self::Text),
            "Boolean" => Some(Self::Boolean),
            _ => None,
        }
    }

    /// SQL column type this scalar maps to.
    pub fn sql_type(self) -> &'static str {
        match self {
            Self::Int => "BIGINT",
            Self::Float => "DOUBLE PRECISION",
            Self::String | Self::Id => "VARCHAR(128)",
            Self::Text => "TEXT",
            Self::Boolean => "BOOLEAN",
        }
    }

    /// Numeric scalars additionally get range filters (`_gt` etc).
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Int | Self::Float)
    }

    /// Text columns are excluded from indexes and filters.
    pub fn is_text(self) -> bool {
        matches!(self, Self::Text)
    }
}

/// A compiled entity field.
#[derive(Debug, Clone)]
pub struct FieldIr {
    pub name: String,
    pub scalar: ScalarType,
    pub nullable: bool,
}

/// A compiled entity type.
#[derive(Debug, Clone)]
pub struct EntityIr {
    /// Type name as declared (`Proposal`).
    pub name: String,
    /// Backing table name (`proposals`).
    pub table: String,
    pub fields: Vec<FieldIr>,
}

impl EntityIr {
    pub fn field(&self, name: &str) -> Option<&FieldIr> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Column multi-row lookups order by: `created` descending when the
    /// entity declares it, `id` otherwise.
    pub fn order_column(&self) -> (&str, bool) {
        if self.field("created").is_some() {
            ("created", true)
        } else {
            ("id", false)
        }
    }
}

/// The compiled schema, consumed by the DDL and query-surface generators.
#[derive(Debug, Clone, Default)]
pub struct EntitySchema {
    pub entities: Vec<EntityIr>,
}

impl EntitySchema {
    pub fn entity(&self, name: &str) -> Option<&EntityIr> {
        self.entities.iter().find(|e| e.name == name)
    }
}

/// Compiles an SDL document into the typed schema.
///
/// Every object type becomes an entity. Each entity must declare a scalar
/// `id` field; fields must use types from the scalar rule table.
pub fn compile(sdl: &str) -> SchemaResult<EntitySchema> {
    let doc = parse_schema(sdl).map_err(|e| SchemaError::Invalid(e.to_string()))?;

    let mut entities = Vec::new();
    for definition in doc.definitions {
        let TypeSystemDefinition::Type(ty) = definition else {
            continue;
        };
        let ty = ty.node;
        let TypeKind::Object(object) = ty.kind else {
            continue;
        };
        let entity_name = ty.name.node.to_string();

        let mut fields = Vec::new();
        for field in object.fields {
            let field = field.node;
            let field_name = field.name.node.to_string();
            let field_ty = &field.ty.node;
            let scalar = match &field_ty.base {
                BaseType::Named(name) => ScalarType::parse(name.as_str()),
                BaseType::List(_) => None,
            };
            let type_label = field_ty.to_string();

            if field_name == "id" {
                let Some(scalar) = scalar else {
                    return Err(SchemaError::NonScalarId {
                        entity: entity_name,
                        ty: type_label,
                    });
                };
                fields.push(FieldIr {
                    name: field_name,
                    scalar,
                    nullable: false,
                });
                continue;
            }

            let Some(scalar) = scalar else {
                return Err(SchemaError::UnknownFieldType {
                    entity: entity_name,
                    field: field_name,
                    ty: type_label,
                });
            };
            fields.push(FieldIr {
                name: field_name,
                scalar,
                nullable: field_ty.nullable,
            });
        }

        if !fields.iter().any(|f| f.name == "id") {
            return Err(SchemaError::MissingIdField(entity_name));
        }

        entities.push(EntityIr {
            table: format!("{}s", entity_name.to_lowercase()),
            name: entity_name,
            fields,
        });
    }

    Ok(EntitySchema { entities })
}
