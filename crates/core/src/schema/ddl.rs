//! DDL generation from the compiled entity schema.
//!
//! One table per entity, `id` as primary key, a secondary index on every
//! non-`Text` field (the primary key already covers `id`). All statements
//! are `IF EXISTS`/`IF NOT EXISTS` so startup is idempotent.

use super::{EntityIr, EntitySchema};

/// Statements creating the backing table and indexes for one entity.
pub fn create_entity_statements(entity: &EntityIr) -> Vec<String> {
    let columns: Vec<String> = entity
        .fields
        .iter()
        .map(|f| {
            let nullability = if f.nullable { "" } else { " NOT NULL" };
            format!("{} {}{}", f.name, f.scalar.sql_type(), nullability)
        })
        .collect();

    let mut statements = vec![format!(
        "CREATE TABLE IF NOT EXISTS {} ({}, PRIMARY KEY (id))",
        entity.table,
        columns.join(", ")
    )];

    for field in &entity.fields {
        if field.name == "id" || field.scalar.is_text() {
            continue;
        }
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_{field} ON {table} ({field})",
            table = entity.table,
            field = field.name
        ));
    }

    statements
}

/// Statements creating every entity table in the schema.
pub fn create_schema_statements(schema: &EntitySchema) -> Vec<String> {
    schema
        .entities
        .iter()
        .flat_map(create_entity_statements)
        .collect()
}

/// Statements dropping every entity table, used by the reset path.
pub fn drop_schema_statements(schema: &EntitySchema) -> Vec<String> {
    schema
        .entities
        .iter()
        .map(|e| format!("DROP TABLE IF EXISTS {} CASCADE", e.table))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::compile;

    const SCHEMA: &str = r#"
        type Proposal {
            id: String!
            author: String!
            metadata_uri: Text
            vote_count: Int!
            active: Boolean!
        }
    "#;

    #[test]
    fn test_table_statement_maps_scalar_rules() {
        let schema = compile(SCHEMA).unwrap();
        let statements = create_entity_statements(schema.entity("Proposal").unwrap());

        let table = &statements[0];
        assert!(table.starts_with("CREATE TABLE IF NOT EXISTS proposals ("));
        assert!(table.contains("id VARCHAR(128) NOT NULL"));
        assert!(table.contains("metadata_uri TEXT"));
        assert!(!table.contains("metadata_uri TEXT NOT NULL"));
        assert!(table.contains("vote_count BIGINT NOT NULL"));
        assert!(table.contains("active BOOLEAN NOT NULL"));
        assert!(table.ends_with("PRIMARY KEY (id))"));
    }

    // Test critique: index sur chaque champ non-Text, et uniquement ceux-là
    #[test]
    fn test_indexes_cover_non_text_fields_only() {
        let schema = compile(SCHEMA).unwrap();
        let statements = create_entity_statements(schema.entity("Proposal").unwrap());
        let indexes: Vec<&String> = statements[1..].iter().collect();

        assert_eq!(indexes.len(), 3);
        assert!(indexes.iter().any(|s| s.contains("idx_proposals_author")));
        assert!(indexes.iter().any(|s| s.contains("idx_proposals_vote_count")));
        assert!(indexes.iter().any(|s| s.contains("idx_proposals_active")));
        assert!(!indexes.iter().any(|s| s.contains("metadata_uri")));
    }

    #[test]
    fn test_drop_statements_cover_all_entities() {
        let schema = compile("type Space { id: ID! } type Vote { id: ID! }").unwrap();
        let drops = drop_schema_statements(&schema);
        assert_eq!(
            drops,
            vec![
                "DROP TABLE IF EXISTS spaces CASCADE".to_string(),
                "DROP TABLE IF EXISTS votes CASCADE".to_string(),
            ]
        );
    }
}
