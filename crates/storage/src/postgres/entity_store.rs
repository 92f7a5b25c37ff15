//! Entity store implementation for PostgreSQL.
//!
//! Rows cross this boundary as JSON objects; the compiled schema decides
//! which table and which column types they map to. All identifiers in the
//! generated SQL come from the compiled schema, never from request input,
//! and every value is bound as a parameter.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Number, Value};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};

use scribe_core::error::{StorageError, StorageResult};
use scribe_core::ports::{EntityFilter, EntityQuery, EntityStore, FilterOp};
use scribe_core::schema::{EntityIr, EntitySchema, ScalarType};

use super::database::Database;

/// PostgreSQL implementation of [`EntityStore`].
pub struct PgEntityStore {
    pool: PgPool,
    schema: Arc<EntitySchema>,
}

impl PgEntityStore {
    pub fn new(db: &Database, schema: Arc<EntitySchema>) -> Self {
        Self {
            pool: db.pool().clone(),
            schema,
        }
    }

    fn entity(&self, name: &str) -> StorageResult<&EntityIr> {
        expect_entity(&self.schema, name)
    }
}

#[async_trait]
impl EntityStore for PgEntityStore {
    async fn get(&self, entity: &str, id: &str) -> StorageResult<Option<Value>> {
        let entity = self.entity(entity)?;
        let sql = format!(
            "SELECT {} FROM {} WHERE id = $1",
            column_list(entity),
            entity.table
        );

        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.map(|r| row_to_json(entity, &r)).transpose()
    }

    async fn upsert(&self, entity: &str, row: &Value) -> StorageResult<()> {
        let entity = self.entity(entity)?;
        let (sql, binds) = build_insert(entity, row, ConflictMode::Replace)?;
        apply_binds(sqlx::query(&sql), binds)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;
        Ok(())
    }

    async fn insert_ignore(&self, entity: &str, row: &Value) -> StorageResult<()> {
        let entity = self.entity(entity)?;
        let (sql, binds) = build_insert(entity, row, ConflictMode::Ignore)?;
        apply_binds(sqlx::query(&sql), binds)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;
        Ok(())
    }

    async fn update_fields(&self, entity: &str, id: &str, fields: &Value) -> StorageResult<()> {
        let entity = self.entity(entity)?;
        let (sql, binds) = build_update(entity, fields)?;
        apply_binds(sqlx::query(&sql), binds)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;
        Ok(())
    }

    async fn query(&self, entity: &str, query: &EntityQuery) -> StorageResult<Vec<Value>> {
        let entity = self.entity(entity)?;
        let (sql, binds) = build_select(entity, query)?;
        let rows = apply_binds(sqlx::query(&sql), binds)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;
        rows.iter().map(|r| row_to_json(entity, r)).collect()
    }
}

// =============================================================================
// SQL building (pure, unit-tested without a database)
// =============================================================================

/// What to do when the id already exists.
#[derive(Clone, Copy, PartialEq, Eq)]
enum ConflictMode {
    Ignore,
    Replace,
}

/// A value ready to be bound, typed by the column it targets.
#[derive(Debug, Clone, PartialEq)]
enum BindValue {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    Null(ScalarType),
    IntList(Vec<i64>),
    FloatList(Vec<f64>),
    TextList(Vec<String>),
    BoolList(Vec<bool>),
}

fn expect_entity<'a>(schema: &'a EntitySchema, name: &str) -> StorageResult<&'a EntityIr> {
    schema
        .entity(name)
        .ok_or_else(|| StorageError::UnknownEntity(name.to_string()))
}

fn column_list(entity: &EntityIr) -> String {
    entity
        .fields
        .iter()
        .map(|f| f.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn expect_object<'a>(
    entity: &EntityIr,
    value: &'a Value,
) -> StorageResult<&'a Map<String, Value>> {
    value.as_object().ok_or_else(|| {
        StorageError::SerializationError(format!("{} row must be a JSON object", entity.name))
    })
}

/// Resolves the object's keys against the entity's fields, preserving
/// schema field order. Unknown keys are rejected.
fn present_columns<'a>(
    entity: &'a EntityIr,
    object: &Map<String, Value>,
) -> StorageResult<Vec<&'a str>> {
    for key in object.keys() {
        if entity.field(key).is_none() {
            return Err(StorageError::UnknownEntity(format!(
                "{}.{}",
                entity.name, key
            )));
        }
    }
    Ok(entity
        .fields
        .iter()
        .filter(|f| object.contains_key(&f.name))
        .map(|f| f.name.as_str())
        .collect())
}

fn to_bind(entity: &EntityIr, field: &str, value: &Value) -> StorageResult<BindValue> {
    let scalar = entity
        .field(field)
        .ok_or_else(|| StorageError::UnknownEntity(format!("{}.{}", entity.name, field)))?
        .scalar;
    if value.is_null() {
        return Ok(BindValue::Null(scalar));
    }
    let mismatch = || {
        StorageError::SerializationError(format!(
            "{}.{}: value {} does not fit column type",
            entity.name, field, value
        ))
    };
    match scalar {
        ScalarType::Int => value.as_i64().map(BindValue::Int).ok_or_else(mismatch),
        ScalarType::Float => value.as_f64().map(BindValue::Float).ok_or_else(mismatch),
        ScalarType::String | ScalarType::Id | ScalarType::Text => value
            .as_str()
            .map(|s| BindValue::Text(s.to_string()))
            .ok_or_else(mismatch),
        ScalarType::Boolean => value.as_bool().map(BindValue::Bool).ok_or_else(mismatch),
    }
}

/// List variant of [`to_bind`], for `_in` filters.
fn to_bind_list(entity: &EntityIr, field: &str, value: &Value) -> StorageResult<BindValue> {
    let items = value.as_array().ok_or_else(|| {
        StorageError::SerializationError(format!(
            "{}.{}: list filter requires a JSON array",
            entity.name, field
        ))
    })?;
    let mut binds = Vec::with_capacity(items.len());
    for item in items {
        binds.push(to_bind(entity, field, item)?);
    }

    let scalar = entity
        .field(field)
        .ok_or_else(|| StorageError::UnknownEntity(format!("{}.{}", entity.name, field)))?
        .scalar;
    let mismatch = || {
        StorageError::SerializationError(format!(
            "{}.{}: mixed or null values in list filter",
            entity.name, field
        ))
    };
    match scalar {
        ScalarType::Int => binds
            .into_iter()
            .map(|b| match b {
                BindValue::Int(n) => Ok(n),
                _ => Err(mismatch()),
            })
            .collect::<StorageResult<Vec<_>>>()
            .map(BindValue::IntList),
        ScalarType::Float => binds
            .into_iter()
            .map(|b| match b {
                BindValue::Float(n) => Ok(n),
                _ => Err(mismatch()),
            })
            .collect::<StorageResult<Vec<_>>>()
            .map(BindValue::FloatList),
        ScalarType::String | ScalarType::Id | ScalarType::Text => binds
            .into_iter()
            .map(|b| match b {
                BindValue::Text(s) => Ok(s),
                _ => Err(mismatch()),
            })
            .collect::<StorageResult<Vec<_>>>()
            .map(BindValue::TextList),
        ScalarType::Boolean => binds
            .into_iter()
            .map(|b| match b {
                BindValue::Bool(v) => Ok(v),
                _ => Err(mismatch()),
            })
            .collect::<StorageResult<Vec<_>>>()
            .map(BindValue::BoolList),
    }
}

fn build_insert(
    entity: &EntityIr,
    row: &Value,
    mode: ConflictMode,
) -> StorageResult<(String, Vec<BindValue>)> {
    let object = expect_object(entity, row)?;
    let columns = present_columns(entity, object)?;
    if columns.is_empty() {
        return Err(StorageError::SerializationError(format!(
            "{} row is empty",
            entity.name
        )));
    }

    let placeholders: Vec<String> = (1..=columns.len()).map(|n| format!("${n}")).collect();
    let conflict = match mode {
        ConflictMode::Ignore => "DO NOTHING".to_string(),
        ConflictMode::Replace => {
            let assignments: Vec<String> = columns
                .iter()
                .filter(|c| **c != "id")
                .map(|c| format!("{c} = EXCLUDED.{c}"))
                .collect();
            if assignments.is_empty() {
                "DO NOTHING".to_string()
            } else {
                format!("DO UPDATE SET {}", assignments.join(", "))
            }
        }
    };
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT (id) {}",
        entity.table,
        columns.join(", "),
        placeholders.join(", "),
        conflict
    );

    let binds = columns
        .iter()
        .map(|c| to_bind(entity, c, &object[*c]))
        .collect::<StorageResult<Vec<_>>>()?;
    Ok((sql, binds))
}

/// Builds `UPDATE .. SET .. WHERE id = $n`; the id is bound by the
/// caller as the last parameter.
fn build_update(entity: &EntityIr, fields: &Value) -> StorageResult<(String, Vec<BindValue>)> {
    let object = expect_object(entity, fields)?;
    let columns = present_columns(entity, object)?;
    if columns.is_empty() || columns.contains(&"id") {
        return Err(StorageError::SerializationError(format!(
            "{} update must patch at least one non-id field",
            entity.name
        )));
    }

    let assignments: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{c} = ${}", i + 1))
        .collect();
    let sql = format!(
        "UPDATE {} SET {} WHERE id = ${}",
        entity.table,
        assignments.join(", "),
        columns.len() + 1
    );

    let binds = columns
        .iter()
        .map(|c| to_bind(entity, c, &object[*c]))
        .collect::<StorageResult<Vec<_>>>()?;
    Ok((sql, binds))
}

fn build_select(entity: &EntityIr, query: &EntityQuery) -> StorageResult<(String, Vec<BindValue>)> {
    let mut clauses = Vec::new();
    let mut binds = Vec::new();

    for filter in &query.filters {
        let (clause, bind) = build_filter(entity, filter, binds.len() + 1)?;
        clauses.push(clause);
        binds.push(bind);
    }

    let order_field = entity.field(&query.order_by).ok_or_else(|| {
        StorageError::UnknownEntity(format!("{}.{}", entity.name, query.order_by))
    })?;
    let direction = if query.descending { "DESC" } else { "ASC" };

    let mut sql = format!("SELECT {} FROM {}", column_list(entity), entity.table);
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(&format!(
        " ORDER BY {} {} LIMIT ${} OFFSET ${}",
        order_field.name,
        direction,
        binds.len() + 1,
        binds.len() + 2
    ));
    binds.push(BindValue::Int(query.first as i64));
    binds.push(BindValue::Int(query.skip as i64));

    Ok((sql, binds))
}

fn build_filter(
    entity: &EntityIr,
    filter: &EntityFilter,
    placeholder: usize,
) -> StorageResult<(String, BindValue)> {
    let field = entity.field(&filter.field).ok_or_else(|| {
        StorageError::UnknownEntity(format!("{}.{}", entity.name, filter.field))
    })?;
    if field.scalar.is_text() {
        return Err(StorageError::UnknownEntity(format!(
            "{}.{}: Text columns are not filterable",
            entity.name, filter.field
        )));
    }

    match filter.op {
        FilterOp::Eq => Ok((
            format!("{} = ${placeholder}", field.name),
            to_bind(entity, &field.name, &filter.value)?,
        )),
        FilterOp::In => Ok((
            format!("{} = ANY(${placeholder})", field.name),
            to_bind_list(entity, &field.name, &filter.value)?,
        )),
        FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte => {
            if !field.scalar.is_numeric() {
                return Err(StorageError::UnknownEntity(format!(
                    "{}.{}: range filters require a numeric column",
                    entity.name, filter.field
                )));
            }
            let op = match filter.op {
                FilterOp::Gt => ">",
                FilterOp::Gte => ">=",
                FilterOp::Lt => "<",
                FilterOp::Lte => "<=",
                _ => unreachable!(),
            };
            Ok((
                format!("{} {op} ${placeholder}", field.name),
                to_bind(entity, &field.name, &filter.value)?,
            ))
        }
    }
}

// =============================================================================
// Binding and decoding
// =============================================================================

fn apply_binds(
    query: Query<'_, Postgres, PgArguments>,
    binds: Vec<BindValue>,
) -> Query<'_, Postgres, PgArguments> {
    binds.into_iter().fold(query, |q, bind| match bind {
        BindValue::Int(v) => q.bind(v),
        BindValue::Float(v) => q.bind(v),
        BindValue::Text(v) => q.bind(v),
        BindValue::Bool(v) => q.bind(v),
        BindValue::Null(scalar) => match scalar {
            ScalarType::Int => q.bind(None::<i64>),
            ScalarType::Float => q.bind(None::<f64>),
            ScalarType::String | ScalarType::Id | ScalarType::Text => q.bind(None::<String>),
            ScalarType::Boolean => q.bind(None::<bool>),
        },
        BindValue::IntList(v) => q.bind(v),
        BindValue::FloatList(v) => q.bind(v),
        BindValue::TextList(v) => q.bind(v),
        BindValue::BoolList(v) => q.bind(v),
    })
}

fn row_to_json(entity: &EntityIr, row: &PgRow) -> StorageResult<Value> {
    let mut object = Map::with_capacity(entity.fields.len());
    for field in &entity.fields {
        let name = field.name.as_str();
        let value = match field.scalar {
            ScalarType::Int => row
                .try_get::<Option<i64>, _>(name)
                .map(|v| v.map_or(Value::Null, Value::from)),
            ScalarType::Float => row.try_get::<Option<f64>, _>(name).map(|v| {
                v.and_then(Number::from_f64)
                    .map_or(Value::Null, Value::Number)
            }),
            ScalarType::String | ScalarType::Id | ScalarType::Text => row
                .try_get::<Option<String>, _>(name)
                .map(|v| v.map_or(Value::Null, Value::from)),
            ScalarType::Boolean => row
                .try_get::<Option<bool>, _>(name)
                .map(|v| v.map_or(Value::Null, Value::from)),
        }
        .map_err(|e| StorageError::QueryError(e.to_string()))?;
        object.insert(field.name.clone(), value);
    }
    Ok(Value::Object(object))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use scribe_core::schema::compile;

    fn proposal_entity() -> EntitySchema {
        compile(
            r#"
            type Proposal {
                id: String!
                author: String!
                body: Text
                vote_count: Int!
                created: Int!
            }
            "#,
        )
        .unwrap()
    }

    fn entity(schema: &EntitySchema) -> &EntityIr {
        schema.entity("Proposal").unwrap()
    }

    #[test]
    fn test_insert_ignore_sql() {
        let schema = proposal_entity();
        let row = json!({ "id": "p-1", "author": "0xaa", "vote_count": 0, "created": 99 });
        let (sql, binds) = build_insert(entity(&schema), &row, ConflictMode::Ignore).unwrap();

        assert_eq!(
            sql,
            "INSERT INTO proposals (id, author, vote_count, created) \
             VALUES ($1, $2, $3, $4) ON CONFLICT (id) DO NOTHING"
        );
        assert_eq!(
            binds,
            vec![
                BindValue::Text("p-1".into()),
                BindValue::Text("0xaa".into()),
                BindValue::Int(0),
                BindValue::Int(99),
            ]
        );
    }

    #[test]
    fn test_upsert_sql_excludes_id_from_update() {
        let schema = proposal_entity();
        let row = json!({ "id": "p-1", "vote_count": 3 });
        let (sql, _) = build_insert(entity(&schema), &row, ConflictMode::Replace).unwrap();
        assert!(sql.ends_with("ON CONFLICT (id) DO UPDATE SET vote_count = EXCLUDED.vote_count"));
    }

    // Test critique: colonne inconnue => refus, la requête n'est jamais émise
    #[test]
    fn test_unknown_column_is_rejected() {
        let schema = proposal_entity();
        let row = json!({ "id": "p-1", "bogus": 1 });
        let err = build_insert(entity(&schema), &row, ConflictMode::Ignore).unwrap_err();
        assert!(matches!(err, StorageError::UnknownEntity(col) if col == "Proposal.bogus"));
    }

    #[test]
    fn test_update_sql_binds_id_last() {
        let schema = proposal_entity();
        let fields = json!({ "vote_count": 7 });
        let (sql, binds) = build_update(entity(&schema), &fields).unwrap();
        assert_eq!(sql, "UPDATE proposals SET vote_count = $1 WHERE id = $2");
        assert_eq!(binds, vec![BindValue::Int(7)]);
    }

    #[test]
    fn test_update_refuses_id_patch() {
        let schema = proposal_entity();
        let err = build_update(entity(&schema), &json!({ "id": "p-2" })).unwrap_err();
        assert!(matches!(err, StorageError::SerializationError(_)));
    }

    #[test]
    fn test_select_with_filters_and_paging() {
        let schema = proposal_entity();
        let query = EntityQuery {
            filters: vec![
                EntityFilter {
                    field: "author".into(),
                    op: FilterOp::Eq,
                    value: json!("0xaa"),
                },
                EntityFilter {
                    field: "vote_count".into(),
                    op: FilterOp::Gte,
                    value: json!(10),
                },
            ],
            first: 25,
            skip: 50,
            order_by: "created".into(),
            descending: true,
        };
        let (sql, binds) = build_select(entity(&schema), &query).unwrap();

        assert_eq!(
            sql,
            "SELECT id, author, body, vote_count, created FROM proposals \
             WHERE author = $1 AND vote_count >= $2 \
             ORDER BY created DESC LIMIT $3 OFFSET $4"
        );
        assert_eq!(
            binds,
            vec![
                BindValue::Text("0xaa".into()),
                BindValue::Int(10),
                BindValue::Int(25),
                BindValue::Int(50),
            ]
        );
    }

    #[test]
    fn test_in_filter_builds_any_clause() {
        let schema = proposal_entity();
        let query = EntityQuery {
            filters: vec![EntityFilter {
                field: "author".into(),
                op: FilterOp::In,
                value: json!(["0xaa", "0xbb"]),
            }],
            first: 1000,
            skip: 0,
            order_by: "id".into(),
            descending: false,
        };
        let (sql, binds) = build_select(entity(&schema), &query).unwrap();
        assert!(sql.contains("WHERE author = ANY($1)"));
        assert_eq!(
            binds[0],
            BindValue::TextList(vec!["0xaa".into(), "0xbb".into()])
        );
    }

    // Test critique: les colonnes Text ne sont ni filtrables ni triables
    // par plage
    #[test]
    fn test_text_column_is_not_filterable() {
        let schema = proposal_entity();
        let query = EntityQuery {
            filters: vec![EntityFilter {
                field: "body".into(),
                op: FilterOp::Eq,
                value: json!("x"),
            }],
            first: 10,
            skip: 0,
            order_by: "id".into(),
            descending: false,
        };
        assert!(build_select(entity(&schema), &query).is_err());
    }

    #[test]
    fn test_range_filter_requires_numeric_column() {
        let schema = proposal_entity();
        let query = EntityQuery {
            filters: vec![EntityFilter {
                field: "author".into(),
                op: FilterOp::Gt,
                value: json!("0xaa"),
            }],
            first: 10,
            skip: 0,
            order_by: "id".into(),
            descending: false,
        };
        assert!(build_select(entity(&schema), &query).is_err());
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let schema = proposal_entity();
        let row = json!({ "id": "p-1", "vote_count": "not a number" });
        let err = build_insert(entity(&schema), &row, ConflictMode::Ignore).unwrap_err();
        assert!(matches!(err, StorageError::SerializationError(_)));
    }

    #[test]
    fn test_nullable_field_binds_null() {
        let schema = proposal_entity();
        let row = json!({ "id": "p-1", "body": null });
        let (_, binds) = build_insert(entity(&schema), &row, ConflictMode::Ignore).unwrap();
        assert_eq!(
            binds,
            vec![
                BindValue::Text("p-1".into()),
                BindValue::Null(ScalarType::Text)
            ]
        );
    }
}
