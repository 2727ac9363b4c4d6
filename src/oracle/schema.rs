//! oracle 回复的 JSON Schema 生成与解析
//!
//! Schema 由 schemars 从回复类型生成并拼进 prompt；解析时兼容 ```json 代码块与裸 JSON。

use schemars::JsonSchema;
use serde::de::DeserializeOwned;

use crate::core::OracleError;

/// 回复类型 T 的 JSON Schema（美化后的字符串）
pub fn schema_json<T: JsonSchema>() -> String {
    let schema = schemars::schema_for!(T);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}

/// 从模型输出中截取 JSON：优先 ```json 代码块，其次第一个 '{' 到最后一个 '}'
pub fn extract_json(output: &str) -> Option<&str> {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

pub fn parse_reply<T: DeserializeOwned>(output: &str) -> Result<T, OracleError> {
    let json = extract_json(output)
        .ok_or_else(|| OracleError::InvalidResponse(format!("no JSON object in reply: {}", preview(output))))?;
    serde_json::from_str(json).map_err(|e| OracleError::InvalidResponse(format!("{}: {}", e, preview(json))))
}

fn preview(s: &str) -> String {
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{QualityAssessment, RouteProposal};

    #[test]
    fn test_parse_fenced_block() {
        let reply = "Here you go:\n```json\n{\"score\": 0.7, \"critique\": \"ok\"}\n```\nDone.";
        let a: QualityAssessment = parse_reply(reply).unwrap();
        assert!((a.score - 0.7).abs() < 1e-9);
        assert!(a.missing_elements.is_empty());
    }

    #[test]
    fn test_parse_bare_json() {
        let reply = "{\"agents\":[{\"name\":\"Coder\"}],\"strategy\":\"delegated\"}";
        let p: RouteProposal = parse_reply(reply).unwrap();
        assert_eq!(p.agents[0].name, "Coder");
        assert_eq!(p.strategy, "delegated");
    }

    #[test]
    fn test_parse_without_json_fails() {
        let err = parse_reply::<QualityAssessment>("I cannot answer").unwrap_err();
        assert!(matches!(err, OracleError::InvalidResponse(_)));
    }

    #[test]
    fn test_schema_mentions_fields() {
        let schema = schema_json::<RouteProposal>();
        assert!(schema.contains("agents"));
        assert!(schema.contains("depends_on"));
    }
}
