//! Code-envelope extraction from model responses.
//!
//! The recognized envelopes form a fixed, ordered table; the first kind that
//! matches wins, and all of its blocks are concatenated with blank-line
//! separators. Prose before the first block becomes the step's reasoning.
//! Angle-bracket and structured tool-call forms are rewritten into
//! `llm_query` / `rlm_query` calls so everything executes through the same
//! interpreter path.

use std::sync::LazyLock;

use regex::Regex;

/// Extraction result for one model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    pub reasoning: String,
    pub code: String,
}

struct ExtractedBlock {
    start: usize,
    code: String,
}

type Extractor = fn(&str) -> Vec<ExtractedBlock>;

/// Ordered envelope table: fenced forms first, then angle-bracket tags, then
/// structured tool-call forms.
static ENVELOPES: &[(&str, Extractor)] = &[
    ("fenced_repl", extract_fenced_repl),
    ("fenced_python", extract_fenced_python),
    ("tag_repl", extract_tag_repl),
    ("tag_rlm_query", extract_tag_rlm_query),
    ("tag_llm_query", extract_tag_llm_query),
    ("tool_call", extract_tool_call),
    ("invoke", extract_invoke),
];

/// Parse a response into reasoning and executable code.
pub fn parse_response(text: &str) -> ParsedResponse {
    for (_name, extractor) in ENVELOPES {
        let blocks = extractor(text);
        if blocks.is_empty() {
            continue;
        }
        let first_start = blocks.iter().map(|b| b.start).min().unwrap_or(0);
        let reasoning = text[..first_start].trim().to_string();
        let code = blocks
            .iter()
            .map(|b| b.code.trim())
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        if code.is_empty() {
            continue;
        }
        return ParsedResponse { reasoning, code };
    }
    ParsedResponse {
        reasoning: text.trim().to_string(),
        code: String::new(),
    }
}

static FENCED_REPL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```repl[ \t]*\n(.*?)```").expect("fenced repl regex"));
static FENCED_PYTHON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:python|py)[ \t]*\n(.*?)```").expect("fenced python regex")
});
static TAG_REPL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<repl>(.*?)</repl>").expect("repl tag regex"));
static TAG_RLM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<rlm_query>(.*?)</rlm_query>").expect("rlm tag regex"));
static TAG_LLM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<llm_query>(.*?)</llm_query>").expect("llm tag regex"));
static TOOL_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<tool_call>(.*?)</tool_call>").expect("tool call regex"));
static INVOKE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<invoke\s+name="([a-z_]+)"\s*>(.*?)</invoke>"#).expect("invoke regex")
});
static INVOKE_PARAM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<parameter\s+name="([a-z_]+)"\s*>(.*?)</parameter>"#).expect("param regex")
});

fn capture_blocks(regex: &Regex, text: &str) -> Vec<ExtractedBlock> {
    regex
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let inner = caps.get(1)?;
            Some(ExtractedBlock {
                start: whole.start(),
                code: inner.as_str().to_string(),
            })
        })
        .collect()
}

fn extract_fenced_repl(text: &str) -> Vec<ExtractedBlock> {
    capture_blocks(&FENCED_REPL, text)
}

fn extract_fenced_python(text: &str) -> Vec<ExtractedBlock> {
    capture_blocks(&FENCED_PYTHON, text)
}

fn extract_tag_repl(text: &str) -> Vec<ExtractedBlock> {
    capture_blocks(&TAG_REPL, text)
}

fn extract_tag_rlm_query(text: &str) -> Vec<ExtractedBlock> {
    rewrite_tag_blocks(&TAG_RLM, text, "rlm_query")
}

fn extract_tag_llm_query(text: &str) -> Vec<ExtractedBlock> {
    rewrite_tag_blocks(&TAG_LLM, text, "llm_query")
}

/// `<llm_query>prompt</llm_query>` becomes `print(llm_query("prompt"))`.
fn rewrite_tag_blocks(regex: &Regex, text: &str, function: &str) -> Vec<ExtractedBlock> {
    regex
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let prompt = caps.get(1)?.as_str().trim();
            if prompt.is_empty() {
                return None;
            }
            Some(ExtractedBlock {
                start: whole.start(),
                code: format!("print({function}({}))", python_string(prompt)),
            })
        })
        .collect()
}

/// `<tool_call>{"name": ..., "arguments": {"prompt": ...}}</tool_call>`
fn extract_tool_call(text: &str) -> Vec<ExtractedBlock> {
    TOOL_CALL
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let payload: serde_json::Value = serde_json::from_str(caps.get(1)?.as_str().trim()).ok()?;
            let name = payload["name"].as_str().unwrap_or("llm_query");
            let arguments = if payload["arguments"].is_object() {
                &payload["arguments"]
            } else {
                &payload
            };
            let code = rewrite_structured_call(name, arguments)?;
            Some(ExtractedBlock {
                start: whole.start(),
                code,
            })
        })
        .collect()
}

/// `<invoke name="llm_query"><parameter name="prompt">…</parameter></invoke>`
fn extract_invoke(text: &str) -> Vec<ExtractedBlock> {
    INVOKE
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let name = caps.get(1)?.as_str();
            let body = caps.get(2)?.as_str();
            let mut arguments = serde_json::Map::new();
            for param in INVOKE_PARAM.captures_iter(body) {
                let key = param.get(1)?.as_str().to_string();
                let value = param.get(2)?.as_str().trim().to_string();
                arguments.insert(key, serde_json::Value::String(value));
            }
            let code = rewrite_structured_call(name, &serde_json::Value::Object(arguments))?;
            Some(ExtractedBlock {
                start: whole.start(),
                code,
            })
        })
        .collect()
}

/// Rewrite a structured call carrying `prompt` or `prompts` into the
/// equivalent helper invocation. Unknown names degrade to `llm_query`.
fn rewrite_structured_call(name: &str, arguments: &serde_json::Value) -> Option<String> {
    let function = if name.starts_with("rlm") {
        "rlm_query"
    } else {
        "llm_query"
    };
    if let Some(prompt) = arguments["prompt"].as_str() {
        return Some(format!("print({function}({}))", python_string(prompt)));
    }
    if let Some(prompts) = arguments["prompts"].as_array() {
        let rendered: Vec<String> = prompts
            .iter()
            .filter_map(|p| p.as_str())
            .map(python_string)
            .collect();
        if rendered.is_empty() {
            return None;
        }
        return Some(format!(
            "for _result in {function}_batched([{}]):\n    print(_result)",
            rendered.join(", ")
        ));
    }
    None
}

/// A JSON string literal is also a valid Python string literal.
fn python_string(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| format!("{text:?}"))
}
