use crate::input::ParamType;
use serde_json::{Value, json};

/// Length of the "long repeated string" boundary value.
const LONG_STRING_LEN: usize = 256;

/// Boundary values for a parameter kind, used to seed the fuzz queue when a
/// target has no corpus yet.
pub fn boundary_values(param: ParamType) -> Vec<Value> {
    match param {
        ParamType::String => vec![
            json!(""),
            json!("a"),
            Value::String("A".repeat(LONG_STRING_LEN)),
        ],
        ParamType::Number => vec![
            json!(0),
            json!(1),
            json!(-1),
            json!(i64::MAX),
            json!(i64::MIN),
            json!(0.5),
        ],
        ParamType::Boolean => vec![json!(true), json!(false)],
        ParamType::Object => vec![json!({}), json!({"key": "value", "count": 1})],
        ParamType::Array => vec![json!([]), json!([1, "two", true])],
    }
}

/// Structured input formats the grammar-aware generators understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedFormat {
    Json,
    GraphQl,
    Xml,
    Protobuf,
    Http,
}

/// Well-formed string seeds for a structured format.
///
/// These are starting points for the mutation engine, not a grammar fuzzer:
/// a corpus seeded with syntactically valid documents lets single-step
/// mutations probe the boundary between accepted and rejected input.
pub fn grammar_seeds(format: SeedFormat) -> Vec<Value> {
    let seeds: Vec<String> = match format {
        SeedFormat::Json => vec![
            "{}".to_string(),
            "[]".to_string(),
            r#"{"id":1,"name":"test","active":true}"#.to_string(),
            r#"{"nested":{"list":[1,2,3],"flag":null}}"#.to_string(),
            r#"[{"a":1},{"a":2}]"#.to_string(),
        ],
        SeedFormat::GraphQl => vec![
            "query { user { id name } }".to_string(),
            "query GetUser($id: ID!) { user(id: $id) { id email } }".to_string(),
            "mutation { createUser(name: \"x\") { id } }".to_string(),
            "{ __schema { types { name } } }".to_string(),
        ],
        SeedFormat::Xml => vec![
            "<?xml version=\"1.0\"?><root/>".to_string(),
            "<root><item id=\"1\">text</item></root>".to_string(),
            "<a><b><c>deep</c></b></a>".to_string(),
            "<doc attr=\"&lt;escaped&gt;\"><![CDATA[raw]]></doc>".to_string(),
        ],
        SeedFormat::Protobuf => {
            // Text-safe rendering of varint-tagged wire bytes: field 1 as
            // varint 150, field 2 as the length-delimited string "hi".
            vec![
                "\\x08\\x96\\x01".to_string(),
                "\\x12\\x02hi".to_string(),
                "\\x08\\x01\\x12\\x04test".to_string(),
            ]
        }
        SeedFormat::Http => vec![
            "GET / HTTP/1.1\r\nHost: example.com\r\n\r\n".to_string(),
            "POST /api/v1/users HTTP/1.1\r\nHost: example.com\r\nContent-Type: application/json\r\nContent-Length: 13\r\n\r\n{\"name\":\"x\"}\n".to_string(),
            "GET /search?q=term&page=1 HTTP/1.1\r\nHost: example.com\r\nAccept: */*\r\n\r\n".to_string(),
            "DELETE /items/42 HTTP/1.1\r\nHost: example.com\r\nAuthorization: Bearer token\r\n\r\n".to_string(),
        ],
    };
    seeds.into_iter().map(Value::String).collect()
}

/// Candidate inputs for a parameter list: one neutral candidate, then one
/// candidate per boundary value per position, with the other positions held
/// at their defaults. A single-parameter target gets plain values rather
/// than one-element arrays.
pub fn initial_candidates(param_types: &[ParamType]) -> Vec<Value> {
    if param_types.is_empty() {
        return Vec::new();
    }
    if let [only] = param_types {
        return boundary_values(*only);
    }

    let defaults: Vec<Value> = param_types.iter().map(|p| p.default_value()).collect();
    let mut candidates = vec![Value::Array(defaults.clone())];
    for (position, param) in param_types.iter().enumerate() {
        for boundary in boundary_values(*param) {
            let mut row = defaults.clone();
            row[position] = boundary;
            candidates.push(Value::Array(row));
        }
    }
    candidates
}
