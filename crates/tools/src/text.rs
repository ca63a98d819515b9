//! Character-code tools: `ascii_values` and `exponential_sum`.
//!
//! Together they answer requests like "sum the exponentials of the ASCII
//! values of INDIA" in two hops.

use async_trait::async_trait;
use cortex_core::error::ToolError;
use cortex_core::tool::Tool;
use serde_json::{Value, json};

pub struct AsciiValuesTool;

#[async_trait]
impl Tool for AsciiValuesTool {
    fn name(&self) -> &str {
        "ascii_values"
    }

    fn description(&self) -> &str {
        "Return the character code of every character in a string."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "The string to convert" }
            },
            "required": ["text"]
        })
    }

    fn output_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "values": { "type": "array", "items": { "type": "integer" } }
            }
        }))
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let text = arguments["text"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'text' argument".into()))?;

        let values: Vec<u32> = text.chars().map(u32::from).collect();
        Ok(json!({ "values": values }))
    }
}

pub struct ExponentialSumTool;

#[async_trait]
impl Tool for ExponentialSumTool {
    fn name(&self) -> &str {
        "exponential_sum"
    }

    fn description(&self) -> &str {
        "Return the sum of e^x over a list of numbers."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "values": {
                    "type": "array",
                    "items": { "type": "number" },
                    "description": "The exponents"
                }
            },
            "required": ["values"]
        })
    }

    fn output_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": { "result": { "type": "number" } }
        }))
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let values = arguments["values"]
            .as_array()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'values' array".into()))?;

        let mut sum = 0.0_f64;
        for value in values {
            let x = value.as_f64().ok_or_else(|| {
                ToolError::InvalidArguments(format!("'{value}' is not a number"))
            })?;
            sum += x.exp();
        }

        if !sum.is_finite() {
            return Err(ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: "sum overflows a 64-bit float".into(),
            });
        }
        Ok(json!({ "result": sum }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ascii_values_of_india() {
        let value = AsciiValuesTool
            .execute(json!({"text": "INDIA"}))
            .await
            .unwrap();
        assert_eq!(value["values"], json!([73, 78, 68, 73, 65]));
    }

    #[tokio::test]
    async fn exponential_sum_small_values() {
        let value = ExponentialSumTool
            .execute(json!({"values": [0, 1]}))
            .await
            .unwrap();
        let expected = 1.0 + std::f64::consts::E;
        assert!((value["result"].as_f64().unwrap() - expected).abs() < 1e-12);
    }

    #[tokio::test]
    async fn exponential_sum_rejects_non_numbers() {
        let err = ExponentialSumTool
            .execute(json!({"values": [1, "two"]}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn exponential_sum_overflow_is_a_failure() {
        let err = ExponentialSumTool
            .execute(json!({"values": [1000]}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
    }
}
