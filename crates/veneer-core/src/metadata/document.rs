//! Table shapes for document backends.
//!
//! Cosmos containers are not introspected; the operator supplies a GraphQL
//! schema file (`data-source.options.schema`) and the shapes are derived
//! from its object types. The field named `id` is the key, matching the
//! item id of the document APIs.

use std::collections::HashMap;

use graphql_parser::schema::{Definition, Type, TypeDefinition};
use veneer_error::{Result, VeneerError};

use super::{ColumnShape, DbType, SchemaIntrospector, TableShape};

/// Introspector substitute backed by a parsed GraphQL schema document.
///
/// `describe` resolves objects by GraphQL type name.
#[derive(Debug, Clone)]
pub struct SdlIntrospector {
    shapes: HashMap<String, TableShape>,
}

impl SdlIntrospector {
    /// Parse a schema document and derive one shape per object type.
    ///
    /// # Errors
    ///
    /// `ErrorInInitialization` when the document does not parse.
    pub fn from_sdl(sdl: &str) -> Result<Self> {
        let document = graphql_parser::parse_schema::<String>(sdl)
            .map_err(|e| VeneerError::init(format!("Document schema file is invalid: {e}")))?;

        let mut shapes = HashMap::new();
        for definition in document.definitions {
            if let Definition::TypeDefinition(TypeDefinition::Object(object)) = definition {
                let mut shape = TableShape::default();
                for field in &object.fields {
                    let Some((db_type, nullable)) = scalar_of(&field.field_type) else {
                        // Object and list fields are relationships, not columns.
                        continue;
                    };
                    shape.columns.push(ColumnShape {
                        name: field.name.clone(),
                        db_type,
                        nullable,
                        default: None,
                        auto_generated: false,
                    });
                }
                if shape.column("id").is_some() {
                    shape.primary_key = vec!["id".to_string()];
                }
                shapes.insert(object.name.clone(), shape);
            }
        }

        Ok(Self { shapes })
    }

}

#[async_trait::async_trait]
impl SchemaIntrospector for SdlIntrospector {
    async fn describe(&self, object: &str) -> Result<TableShape> {
        self.shapes
            .get(object)
            .cloned()
            .ok_or_else(|| {
                VeneerError::init(format!(
                    "Document schema file defines no type named '{object}'"
                ))
            })
    }
}

fn scalar_of(field_type: &Type<'_, String>) -> Option<(DbType, bool)> {
    match field_type {
        Type::NamedType(name) => scalar_name(name).map(|t| (t, true)),
        Type::NonNullType(inner) => match inner.as_ref() {
            Type::NamedType(name) => scalar_name(name).map(|t| (t, false)),
            _ => None,
        },
        Type::ListType(_) => None,
    }
}

fn scalar_name(name: &str) -> Option<DbType> {
    match name {
        "Int" => Some(DbType::Int),
        "Long" => Some(DbType::Bigint),
        "String" => Some(DbType::String),
        "ID" => Some(DbType::Uuid),
        "Boolean" => Some(DbType::Boolean),
        "DateTime" => Some(DbType::DateTime),
        "Float" => Some(DbType::Float),
        "ByteArray" => Some(DbType::Bytes),
        _ => None,
    }
}
