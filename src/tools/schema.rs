//! 工具参数 Schema
//!
//! 参数结构体用 schemars 派生 JsonSchema，生成供模型网关使用的精简 JSON Schema
//! （type/properties/required，内联子 schema，可选字段不加 null 类型）；
//! 执行时用 serde 反序列化同一结构体，缺字段或类型错误统一转为 InvalidArguments。

use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::core::ToolError;

/// 清单中的一项：{name, description, parameters}
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 由参数结构体生成 parameters schema
pub fn parameters_for<T: JsonSchema>() -> Value {
    let settings = SchemaSettings::draft07().with(|s| {
        s.option_nullable = false;
        s.option_add_null_type = false;
        s.inline_subschemas = true;
    });
    let root = settings.into_generator().into_root_schema_for::<T>();
    let mut value = serde_json::to_value(root).unwrap_or_else(|_| empty_parameters());
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
        obj.remove("description");
        obj.remove("definitions");
        obj.entry("required").or_insert_with(|| Value::Array(vec![]));
    }
    value
}

/// 无参数工具的 schema
pub fn empty_parameters() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {},
        "required": []
    })
}

/// 将模型给出的参数反序列化为类型化结构体
pub fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    let args = match args {
        Value::Null => Value::Object(Default::default()),
        Value::Object(_) => args,
        other => {
            return Err(ToolError::InvalidArguments(format!(
                "arguments must be a JSON object, got: {}",
                preview(&other.to_string(), 120)
            )))
        }
    };
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

/// 检查 schema 是否符合网关可理解的结构
pub fn validate_parameters(schema: &Value) -> Result<(), String> {
    let obj = schema
        .as_object()
        .ok_or_else(|| "schema must be a JSON object".to_string())?;
    if obj.get("type").and_then(Value::as_str) != Some("object") {
        return Err("schema type must be \"object\"".to_string());
    }
    let properties = obj
        .get("properties")
        .and_then(Value::as_object)
        .ok_or_else(|| "schema must have an object-valued \"properties\"".to_string())?;
    if let Some(required) = obj.get("required") {
        let required = required
            .as_array()
            .ok_or_else(|| "\"required\" must be an array".to_string())?;
        for field in required {
            let name = field
                .as_str()
                .ok_or_else(|| "\"required\" entries must be strings".to_string())?;
            if !properties.contains_key(name) {
                return Err(format!("required field '{name}' is not declared in properties"));
            }
        }
    }
    Ok(())
}

pub(crate) fn preview(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        format!("{}...", s.chars().take(max_chars).collect::<String>())
    } else {
        s.to_string()
    }
}
