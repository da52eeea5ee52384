//! `datadog_logs_custom_pipeline`: custom log processing pipelines through
//! the v1 Logs Pipelines API.
//!
//! Each `processor` element holds exactly one processor block named after
//! its type. Top-level pipelines may nest one level of `pipeline`
//! processors; nested pipelines cannot nest further. The API answers 400
//! for a pipeline id that does not exist, so 400 reads as gone.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{translate_client_error, ApiError, ProviderError, Result};
use crate::provider::{ProviderConfiguration, Resource};
use crate::schema::{Attribute, AttributeType, NestedBlock, ResourceData, Schema};
use crate::utils::json::remove_empty_values_in_map;

const PIPELINES_PATH: &str = "/api/v1/logs/config/pipelines";

/// Processor block names and their API `type` values.
const PROCESSOR_TYPES: &[(&str, &str)] = &[
    ("arithmetic_processor", "arithmetic-processor"),
    ("attribute_remapper", "attribute-remapper"),
    ("category_processor", "category-processor"),
    ("date_remapper", "date-remapper"),
    ("geo_ip_parser", "geo-ip-parser"),
    ("grok_parser", "grok-parser"),
    ("lookup_processor", "lookup-processor"),
    ("message_remapper", "message-remapper"),
    ("pipeline", "pipeline"),
    ("service_remapper", "service-remapper"),
    ("status_remapper", "status-remapper"),
    ("string_builder_processor", "string-builder-processor"),
    ("trace_id_remapper", "trace-id-remapper"),
    ("url_parser", "url-parser"),
    ("user_agent_parser", "user-agent-parser"),
];

/// Custom logs pipeline.
#[derive(Debug, Default)]
pub struct LogsCustomPipelineResource {
    /// Pipeline order is account-wide; writes must not interleave.
    lock: Mutex<()>,
}

fn pipeline_path(id: &str) -> String {
    format!("{PIPELINES_PATH}/{id}")
}

fn block(schema: Schema) -> AttributeType {
    AttributeType::Block(Box::new(NestedBlock::list(schema)))
}

fn single(schema: Schema) -> AttributeType {
    AttributeType::Block(Box::new(NestedBlock::single(schema)))
}

fn processor_base() -> Schema {
    Schema::v0()
        .with_attribute("name", Attribute::optional_string().describe("Name of the processor."))
        .with_attribute(
            "is_enabled",
            Attribute::optional_bool().describe("If the processor is enabled or not."),
        )
}

fn sources_schema() -> Schema {
    processor_base().with_attribute(
        "sources",
        Attribute::required(AttributeType::string_list()).describe("List of source attributes."),
    )
}

fn sources_and_target_schema() -> Schema {
    sources_schema().with_attribute(
        "target",
        Attribute::required_string()
            .describe("Name of the parent attribute that contains all the extracted details from the sources."),
    )
}

fn filter_schema() -> Schema {
    Schema::v0().with_attribute(
        "query",
        Attribute::required_string().describe("Filter criteria of the category."),
    )
}

fn processor_schema(top_level: bool) -> Schema {
    let arithmetic = processor_base()
        .with_attribute(
            "expression",
            Attribute::required_string().describe("Arithmetic operation between one or more log attributes."),
        )
        .with_attribute(
            "target",
            Attribute::required_string().describe("Name of the attribute that contains the result of the arithmetic operation."),
        )
        .with_attribute(
            "is_replace_missing",
            Attribute::optional_bool()
                .describe("Replace missing attribute of expression by 0; otherwise skip the operation."),
        );

    let attribute_remapper = processor_base()
        .with_attribute(
            "sources",
            Attribute::required(AttributeType::string_list()).describe("List of source attributes or tags."),
        )
        .with_attribute(
            "source_type",
            Attribute::required_string().describe("Defines where the sources are from (log `attribute` or `tag`)."),
        )
        .with_attribute(
            "target",
            Attribute::required_string().describe("Final attribute or tag name to remap the sources."),
        )
        .with_attribute(
            "target_type",
            Attribute::required_string().describe("Defines if the target is a log `attribute` or `tag`."),
        )
        .with_attribute(
            "target_format",
            Attribute::optional_string().describe(
                "If the `target_type` of the remapper is `attribute`, try to cast the value to a new specific type.",
            ),
        )
        .with_attribute(
            "preserve_source",
            Attribute::optional_bool().describe("Remove or preserve the remapped source element."),
        )
        .with_attribute(
            "override_on_conflict",
            Attribute::optional_bool().describe("Override the target element if already set."),
        );

    let category = Schema::v0()
        .with_attribute(
            "filter",
            Attribute::required(AttributeType::Block(Box::new(NestedBlock {
                min_items: 1,
                ..NestedBlock::single(filter_schema())
            }))),
        )
        .with_attribute("name", Attribute::required_string());
    let category_processor = processor_base()
        .with_attribute(
            "target",
            Attribute::required_string()
                .describe("Name of the target attribute whose value is defined by the matching category."),
        )
        .with_attribute(
            "category",
            Attribute::required(block(category)).describe(
                "List of filters to match or exclude a log with their corresponding name to assign a custom value to the log.",
            ),
        );

    let grok = Schema::v0()
        .with_attribute(
            "support_rules",
            Attribute::required_string().describe("Support rules for your grok parser."),
        )
        .with_attribute(
            "match_rules",
            Attribute::required_string().describe("Match rules for your grok parser."),
        );
    let grok_parser = processor_base()
        .with_attribute(
            "source",
            Attribute::required_string().describe("Name of the log attribute to parse."),
        )
        .with_attribute(
            "samples",
            Attribute::optional(AttributeType::string_list())
                .describe("List of sample logs for this parser. It can save up to 5 samples."),
        )
        .with_attribute(
            "grok",
            Attribute::required(AttributeType::Block(Box::new(NestedBlock {
                min_items: 1,
                ..NestedBlock::single(grok)
            }))),
        );

    let lookup_processor = processor_base()
        .with_attribute(
            "source",
            Attribute::required_string().describe("Name of the source attribute used to do the lookup."),
        )
        .with_attribute(
            "target",
            Attribute::required_string().describe("Name of the attribute that contains the result of the lookup."),
        )
        .with_attribute(
            "lookup_table",
            Attribute::required(AttributeType::string_list()).describe(
                "List of entries of the lookup table using `key,value` format.",
            ),
        )
        .with_attribute(
            "default_lookup",
            Attribute::optional_string().describe(
                "Default lookup value to use if there is no entry in the lookup table for the value of the source attribute.",
            ),
        );

    let string_builder = processor_base()
        .with_attribute(
            "template",
            Attribute::required_string().describe("The formula with one or more attributes and raw text."),
        )
        .with_attribute(
            "target",
            Attribute::required_string().describe("The name of the attribute that contains the result of the template."),
        )
        .with_attribute(
            "is_replace_missing",
            Attribute::optional_bool()
                .describe("If it replaces all missing attributes of template by an empty string."),
        );

    let url_parser = sources_and_target_schema().with_attribute(
        "normalize_ending_slashes",
        Attribute::optional_bool().describe("Normalize the ending slashes or not."),
    );
    let user_agent_parser = sources_and_target_schema().with_attribute(
        "is_encoded",
        Attribute::optional_bool().describe("If the source attribute is URL encoded or not."),
    );

    let mut schema = Schema::v0()
        .with_attribute(
            "arithmetic_processor",
            Attribute::optional(single(arithmetic)).describe("Arithmetic Processor."),
        )
        .with_attribute(
            "attribute_remapper",
            Attribute::optional(single(attribute_remapper)).describe("Attribute Remapper Processor."),
        )
        .with_attribute(
            "category_processor",
            Attribute::optional(single(category_processor)).describe("Category Processor."),
        )
        .with_attribute(
            "date_remapper",
            Attribute::optional(single(sources_schema())).describe("Date Remapper Processor."),
        )
        .with_attribute(
            "geo_ip_parser",
            Attribute::optional(single(sources_and_target_schema())).describe("GeoIP Parser Processor."),
        )
        .with_attribute(
            "grok_parser",
            Attribute::optional(single(grok_parser)).describe("Grok Processor."),
        )
        .with_attribute(
            "lookup_processor",
            Attribute::optional(single(lookup_processor)).describe("Lookup Processor."),
        )
        .with_attribute(
            "message_remapper",
            Attribute::optional(single(sources_schema())).describe("Message Remapper Processor."),
        )
        .with_attribute(
            "service_remapper",
            Attribute::optional(single(sources_schema())).describe("Service Remapper Processor."),
        )
        .with_attribute(
            "status_remapper",
            Attribute::optional(single(sources_schema())).describe("Status Remapper Processor."),
        )
        .with_attribute(
            "string_builder_processor",
            Attribute::optional(single(string_builder)).describe("String Builder Processor."),
        )
        .with_attribute(
            "trace_id_remapper",
            Attribute::optional(single(sources_schema())).describe("Trace ID Remapper Processor."),
        )
        .with_attribute(
            "url_parser",
            Attribute::optional(single(url_parser)).describe("URL Parser Processor."),
        )
        .with_attribute(
            "user_agent_parser",
            Attribute::optional(single(user_agent_parser)).describe("User-Agent Parser Processor."),
        );
    if top_level {
        schema = schema.with_attribute(
            "pipeline",
            Attribute::optional(single(pipeline_schema(false))).describe("Nested Pipeline Processor."),
        );
    }
    schema
}

fn pipeline_schema(top_level: bool) -> Schema {
    Schema::v0()
        .with_attribute("name", Attribute::required_string())
        .with_attribute("is_enabled", Attribute::optional_bool())
        .with_attribute("filter", Attribute::required(block(filter_schema())))
        .with_attribute("processor", Attribute::optional(block(processor_schema(top_level))))
}

fn api_type(block_name: &str) -> Option<&'static str> {
    PROCESSOR_TYPES
        .iter()
        .find(|(name, _)| *name == block_name)
        .map(|(_, api)| *api)
}

fn block_name(api_type: &str) -> Option<&'static str> {
    PROCESSOR_TYPES
        .iter()
        .find(|(_, api)| *api == api_type)
        .map(|(name, _)| *name)
}

/// First element of a single block, as an object.
fn first_object(value: &Value) -> Option<&Map<String, Value>> {
    value.as_array()?.first()?.as_object()
}

fn expand_filter(value: &Value) -> Value {
    first_object(value).map_or_else(|| json!({}), |filter| json!({"query": filter.get("query")}))
}

fn expand_processors(items: &[Value]) -> Vec<Value> {
    items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(expand_processor)
        .collect()
}

/// Turns one `processor` element into an API processor.
fn expand_processor(element: &Map<String, Value>) -> Option<Value> {
    let (name, fields) = element
        .iter()
        .find_map(|(name, value)| first_object(value).map(|fields| (name.as_str(), fields)))?;
    let processor_type = api_type(name)?;

    let mut processor = Map::new();
    processor.insert("type".into(), json!(processor_type));
    for (key, value) in fields {
        match key.as_str() {
            "grok" => {
                if let Some(grok) = first_object(value) {
                    processor.insert("grok".into(), Value::Object(grok.clone()));
                }
            }
            "category" => {
                let categories: Vec<Value> = value
                    .as_array()
                    .map(Vec::as_slice)
                    .unwrap_or_default()
                    .iter()
                    .map(|category| {
                        json!({
                            "name": category.get("name"),
                            "filter": expand_filter(category.get("filter").unwrap_or(&Value::Null)),
                        })
                    })
                    .collect();
                processor.insert("categories".into(), Value::Array(categories));
            }
            "filter" => {
                processor.insert("filter".into(), expand_filter(value));
            }
            "processor" => {
                let nested = expand_processors(value.as_array().map(Vec::as_slice).unwrap_or_default());
                processor.insert("processors".into(), Value::Array(nested));
            }
            _ if value.as_str() == Some("") => {}
            _ => {
                processor.insert(key.clone(), value.clone());
            }
        }
    }
    Some(Value::Object(processor))
}

/// Builds the create or update body.
fn build_pipeline_body(data: &ResourceData) -> Value {
    let mut body = Map::new();
    body.insert("name".into(), json!(data.get_string("name")));
    body.insert(
        "is_enabled".into(),
        json!(data.get_bool("is_enabled").unwrap_or(false)),
    );
    body.insert(
        "filter".into(),
        expand_filter(data.get("filter").unwrap_or(&Value::Null)),
    );
    body.insert(
        "processors".into(),
        Value::Array(expand_processors(data.get_list("processor"))),
    );
    remove_empty_values_in_map(&mut body);
    Value::Object(body)
}

fn flatten_filter(filter: &Value) -> Value {
    json!([{"query": filter.get("query").cloned().unwrap_or_else(|| json!(""))}])
}

fn flatten_processors(processors: &Value) -> Vec<Value> {
    processors
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .filter_map(Value::as_object)
        .filter_map(flatten_processor)
        .collect()
}

/// Turns one API processor into a `processor` element.
fn flatten_processor(processor: &Map<String, Value>) -> Option<Value> {
    let processor_type = processor.get("type").and_then(Value::as_str).unwrap_or_default();
    let Some(name) = block_name(processor_type) else {
        warn!("Skipping unsupported logs processor type {processor_type:?}");
        return None;
    };

    let mut fields = Map::new();
    for (key, value) in processor {
        match key.as_str() {
            "type" => {}
            _ if value.is_null() => {}
            "grok" => {
                fields.insert("grok".into(), json!([value]));
            }
            "categories" => {
                let categories: Vec<Value> = value
                    .as_array()
                    .map(Vec::as_slice)
                    .unwrap_or_default()
                    .iter()
                    .map(|category| {
                        json!({
                            "name": category.get("name"),
                            "filter": flatten_filter(&category["filter"]),
                        })
                    })
                    .collect();
                fields.insert("category".into(), Value::Array(categories));
            }
            "filter" => {
                fields.insert("filter".into(), flatten_filter(value));
            }
            "processors" => {
                fields.insert("processor".into(), Value::Array(flatten_processors(value)));
            }
            _ => {
                fields.insert(key.clone(), value.clone());
            }
        }
    }
    let mut element = Map::new();
    element.insert(name.to_string(), json!([fields]));
    Some(Value::Object(element))
}

/// Copies a pipeline response into `data`.
fn update_pipeline_state(data: &mut ResourceData, pipeline: &Value) -> Result<()> {
    let id = pipeline
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::invalid_response("pipeline response has no id"))?;
    data.set_id(id);
    if let Some(name) = pipeline.get("name") {
        data.set("name", name.clone());
    }
    data.set(
        "is_enabled",
        pipeline.get("is_enabled").cloned().unwrap_or(json!(false)),
    );
    data.set("filter", flatten_filter(&pipeline["filter"]));
    data.set("processor", Value::Array(flatten_processors(&pipeline["processors"])));
    Ok(())
}

fn is_missing_pipeline(err: &ProviderError) -> bool {
    err.is_not_found() || err.status() == Some(400)
}

#[async_trait]
impl Resource for LogsCustomPipelineResource {
    fn type_name(&self) -> &'static str {
        "datadog_logs_custom_pipeline"
    }

    fn schema(&self) -> Schema {
        pipeline_schema(true).describe(
            "Provides a Datadog Logs Pipeline API resource, which is used to create and manage Datadog logs custom pipelines. Each `datadog_logs_custom_pipeline` resource defines a complete pipeline. The order of the pipelines is maintained in a different resource.",
        )
    }

    async fn create(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        let _guard = self.lock.lock().await;
        let body = build_pipeline_body(data);
        let created: Value = meta
            .client
            .post_json(PIPELINES_PATH, &body)
            .await
            .map_err(|e| translate_client_error(e, "failed to create logs pipeline using Datadog API"))?;
        update_pipeline_state(data, &created)?;
        info!("Created logs pipeline {}", data.id());
        Ok(())
    }

    async fn read(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        match meta.client.get_json::<Value>(&pipeline_path(data.id())).await {
            Ok(pipeline) => update_pipeline_state(data, &pipeline),
            Err(e) if is_missing_pipeline(&e) => {
                debug!("Logs pipeline {} is gone", data.id());
                data.clear_id();
                Ok(())
            }
            Err(e) => Err(translate_client_error(e, "error getting logs pipeline")),
        }
    }

    async fn update(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        let _guard = self.lock.lock().await;
        let body = build_pipeline_body(data);
        let updated: Value = meta
            .client
            .put_json(&pipeline_path(data.id()), &body)
            .await
            .map_err(|e| translate_client_error(e, "error updating logs pipeline"))?;
        update_pipeline_state(data, &updated)
    }

    async fn delete(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        let _guard = self.lock.lock().await;
        match meta.client.delete(&pipeline_path(data.id())).await {
            Ok(()) => Ok(()),
            Err(e) if e.status() == Some(400) => {
                debug!("Logs pipeline {} was already deleted", data.id());
                Ok(())
            }
            Err(e) => Err(translate_client_error(e, "error deleting logs pipeline")),
        }
    }

    fn destroy_check_path(&self, id: &str) -> Option<String> {
        Some(pipeline_path(id))
    }

    fn is_gone_error(&self, err: &ProviderError) -> bool {
        is_missing_pipeline(err)
    }
}
