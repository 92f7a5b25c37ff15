//! Dynamic GraphQL query surface.
//!
//! Built at startup from the compiled entity schema: one output type,
//! one single lookup and one multi lookup per entity, plus the
//! operational fields (`_metadata`, `_lastIndexedBlock`, `_latestBlock`,
//! `_checkpoints`). Read-only by construction: no mutation type is ever
//! registered.

use std::sync::Arc;

use async_graphql::dynamic::{
    Field, FieldFuture, FieldValue, InputObject, InputValue, Object, Schema, SchemaError, TypeRef,
};
use async_graphql::{Error, Value as GqlValue};
use serde_json::Value as JsonValue;
use tracing::debug;

use scribe_core::models::{Address, METADATA_LAST_INDEXED_BLOCK};
use scribe_core::ports::{
    validate_checkpoint_limit, ChainClient, CheckpointStore, EntityFilter, EntityQuery,
    EntityStore, FilterOp, DEFAULT_CHECKPOINT_FETCH_LIMIT,
};
use scribe_core::registry::RegistryHandle;
use scribe_core::schema::{EntityIr, EntitySchema, ScalarType};

/// Default page size for entity multi lookups.
const DEFAULT_PAGE_SIZE: u64 = 1000;

/// Builds the executable schema over the given adapters.
pub fn build_schema(
    entities: Arc<EntitySchema>,
    store: Arc<dyn EntityStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    chain: Arc<dyn ChainClient>,
    registry: RegistryHandle,
) -> Result<Schema, SchemaError> {
    let mut builder = Schema::build("Query", None, None)
        .data(store)
        .data(checkpoints)
        .data(chain)
        .data(registry);

    let mut query = Object::new("Query");
    for entity in &entities.entities {
        builder = builder
            .register(entity_object(entity))
            .register(where_input(entity));
        query = query
            .field(single_field(entity))
            .field(multi_field(entity));
    }

    query = query
        .field(metadata_field())
        .field(last_indexed_block_field())
        .field(latest_block_field())
        .field(checkpoints_field());

    debug!(entities = entities.entities.len(), "Query surface generated");
    builder.register(query).finish()
}

fn scalar_type_name(scalar: ScalarType) -> &'static str {
    match scalar {
        ScalarType::Int => TypeRef::INT,
        ScalarType::Float => TypeRef::FLOAT,
        ScalarType::String | ScalarType::Text => TypeRef::STRING,
        ScalarType::Id => TypeRef::ID,
        ScalarType::Boolean => TypeRef::BOOLEAN,
    }
}

fn where_input_name(entity: &EntityIr) -> String {
    format!("Where{}", entity.name)
}

/// Output type: one field per schema field, resolved out of the JSON row.
fn entity_object(entity: &EntityIr) -> Object {
    let mut object = Object::new(entity.name.clone());
    for field in &entity.fields {
        let type_ref = if field.nullable {
            TypeRef::named(scalar_type_name(field.scalar))
        } else {
            TypeRef::named_nn(scalar_type_name(field.scalar))
        };
        let field_name = field.name.clone();
        object = object.field(Field::new(field.name.clone(), type_ref, move |ctx| {
            let field_name = field_name.clone();
            FieldFuture::new(async move {
                let row = ctx.parent_value.try_downcast_ref::<JsonValue>()?;
                let value = row.get(&field_name).cloned().unwrap_or(JsonValue::Null);
                if value.is_null() {
                    return Ok(None);
                }
                Ok(Some(GqlValue::from_json(value)?))
            })
        }));
    }
    object
}

/// Filter input: equality and `_in` on every non-Text field, range
/// operators on numeric fields. Clauses combine with AND.
fn where_input(entity: &EntityIr) -> InputObject {
    let mut input = InputObject::new(where_input_name(entity));
    for field in &entity.fields {
        if field.scalar.is_text() {
            continue;
        }
        let scalar = scalar_type_name(field.scalar);
        input = input
            .field(InputValue::new(field.name.clone(), TypeRef::named(scalar)))
            .field(InputValue::new(
                format!("{}_in", field.name),
                TypeRef::named_nn_list(scalar),
            ));
        if field.scalar.is_numeric() {
            for op in ["gt", "gte", "lt", "lte"] {
                input = input.field(InputValue::new(
                    format!("{}_{op}", field.name),
                    TypeRef::named(scalar),
                ));
            }
        }
    }
    input
}

/// `proposal(id: "p-1")` - single row by id.
fn single_field(entity: &EntityIr) -> Field {
    let entity_name = entity.name.clone();
    Field::new(
        entity.name.to_lowercase(),
        TypeRef::named(entity.name.clone()),
        move |ctx| {
            let entity_name = entity_name.clone();
            FieldFuture::new(async move {
                let id = ctx.args.try_get("id")?.string()?.to_string();
                let store = ctx.data::<Arc<dyn EntityStore>>()?;
                let row = store
                    .get(&entity_name, &id)
                    .await
                    .map_err(|e| Error::new(e.to_string()))?;
                Ok(row.map(FieldValue::owned_any))
            })
        },
    )
    .argument(InputValue::new("id", TypeRef::named_nn(TypeRef::STRING)))
}

/// `proposals(where: .., first: .., skip: ..)` - filtered multi lookup.
fn multi_field(entity: &EntityIr) -> Field {
    let entity_ir = entity.clone();
    Field::new(
        format!("{}s", entity.name.to_lowercase()),
        TypeRef::named_nn_list_nn(entity.name.clone()),
        move |ctx| {
            let entity_ir = entity_ir.clone();
            FieldFuture::new(async move {
                let first = ctx
                    .args
                    .get("first")
                    .map(|v| v.u64())
                    .transpose()?
                    .unwrap_or(DEFAULT_PAGE_SIZE);
                let skip = ctx
                    .args
                    .get("skip")
                    .map(|v| v.u64())
                    .transpose()?
                    .unwrap_or(0);

                let mut filters = Vec::new();
                if let Some(where_arg) = ctx.args.get("where") {
                    let object = where_arg.object()?;
                    for (key, accessor) in object.iter() {
                        let value = accessor.as_value().clone().into_json()?;
                        filters.push(parse_filter(&entity_ir, key.as_str(), value)?);
                    }
                }

                let (order_by, descending) = entity_ir.order_column();
                let query = EntityQuery {
                    filters,
                    first,
                    skip,
                    order_by: order_by.to_string(),
                    descending,
                };

                let store = ctx.data::<Arc<dyn EntityStore>>()?;
                let rows = store
                    .query(&entity_ir.name, &query)
                    .await
                    .map_err(|e| Error::new(e.to_string()))?;
                Ok(Some(FieldValue::list(
                    rows.into_iter().map(FieldValue::owned_any),
                )))
            })
        },
    )
    .argument(InputValue::new("first", TypeRef::named(TypeRef::INT)))
    .argument(InputValue::new("skip", TypeRef::named(TypeRef::INT)))
    .argument(InputValue::new("where", TypeRef::named(where_input_name(entity))))
}

/// Maps a where-input key (`vote_count_gte`) onto a typed filter clause.
fn parse_filter(entity: &EntityIr, key: &str, value: JsonValue) -> Result<EntityFilter, Error> {
    const SUFFIXES: [(&str, FilterOp); 5] = [
        ("_gte", FilterOp::Gte),
        ("_lte", FilterOp::Lte),
        ("_gt", FilterOp::Gt),
        ("_lt", FilterOp::Lt),
        ("_in", FilterOp::In),
    ];

    for (suffix, op) in SUFFIXES {
        if let Some(field) = key.strip_suffix(suffix) {
            if entity.field(field).is_some() {
                return Ok(EntityFilter {
                    field: field.to_string(),
                    op,
                    value,
                });
            }
        }
    }
    if entity.field(key).is_some() {
        return Ok(EntityFilter {
            field: key.to_string(),
            op: FilterOp::Eq,
            value,
        });
    }
    Err(Error::new(format!(
        "unknown filter '{key}' on {}",
        entity.name
    )))
}

/// `_metadata(id: "..")` - raw metadata value.
fn metadata_field() -> Field {
    Field::new("_metadata", TypeRef::named(TypeRef::STRING), |ctx| {
        FieldFuture::new(async move {
            let id = ctx.args.try_get("id")?.string()?.to_string();
            let checkpoints = ctx.data::<Arc<dyn CheckpointStore>>()?;
            let value = checkpoints
                .get_metadata(&id)
                .await
                .map_err(|e| Error::new(e.to_string()))?;
            Ok(value.map(GqlValue::from))
        })
    })
    .argument(InputValue::new("id", TypeRef::named_nn(TypeRef::STRING)))
}

/// `_lastIndexedBlock` - the committed cursor, null before the first
/// block commits.
fn last_indexed_block_field() -> Field {
    Field::new("_lastIndexedBlock", TypeRef::named(TypeRef::INT), |ctx| {
        FieldFuture::new(async move {
            let checkpoints = ctx.data::<Arc<dyn CheckpointStore>>()?;
            let block = checkpoints
                .get_metadata_u64(METADATA_LAST_INDEXED_BLOCK)
                .await
                .map_err(|e| Error::new(e.to_string()))?;
            Ok(block.map(GqlValue::from))
        })
    })
}

/// `_latestBlock` - the node's current head, proxied live.
fn latest_block_field() -> Field {
    Field::new("_latestBlock", TypeRef::named_nn(TypeRef::INT), |ctx| {
        FieldFuture::new(async move {
            let chain = ctx.data::<Arc<dyn ChainClient>>()?;
            let head = chain
                .latest_block()
                .await
                .map_err(|e| Error::new(e.to_string()))?;
            Ok(Some(GqlValue::from(head)))
        })
    })
}

/// `_checkpoints(fromBlock: .., contracts: .., limit: ..)` - recorded
/// activity blocks. The limit is validated before the store is queried.
fn checkpoints_field() -> Field {
    Field::new(
        "_checkpoints",
        TypeRef::named_nn_list_nn(TypeRef::INT),
        |ctx| {
            FieldFuture::new(async move {
                let from_block = ctx
                    .args
                    .get("fromBlock")
                    .map(|v| v.u64())
                    .transpose()?
                    .unwrap_or(0);
                let limit = ctx
                    .args
                    .get("limit")
                    .map(|v| v.u64())
                    .transpose()?
                    .unwrap_or(DEFAULT_CHECKPOINT_FETCH_LIMIT);
                validate_checkpoint_limit(limit).map_err(|e| Error::new(e.to_string()))?;

                let contracts = match ctx.args.get("contracts") {
                    Some(arg) => {
                        let mut contracts = Vec::new();
                        for item in arg.list()?.iter() {
                            let address = Address::parse(item.string()?)
                                .map_err(|e| Error::new(e.to_string()))?;
                            contracts.push(address);
                        }
                        contracts
                    }
                    None => {
                        let registry = ctx.data::<RegistryHandle>()?;
                        let mut contracts: Vec<Address> = registry
                            .sources()
                            .iter()
                            .map(|s| s.address.clone())
                            .collect();
                        contracts.dedup();
                        contracts
                    }
                };

                let checkpoints = ctx.data::<Arc<dyn CheckpointStore>>()?;
                let blocks = checkpoints
                    .next_checkpoint_blocks(from_block, &contracts, limit)
                    .await
                    .map_err(|e| Error::new(e.to_string()))?;
                Ok(Some(GqlValue::from_json(serde_json::json!(blocks))?))
            })
        },
    )
    .argument(InputValue::new("fromBlock", TypeRef::named(TypeRef::INT)))
    .argument(InputValue::new(
        "contracts",
        TypeRef::named_nn_list(TypeRef::STRING),
    ))
    .argument(InputValue::new("limit", TypeRef::named(TypeRef::INT)))
}
