use std::collections::HashMap;

use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;

use crate::errors::{AppError, AppResult};
use crate::models::domain::{DialogueEvaluation, ItemResult, ReadingEvaluation, WordDetail};

/// Feedback attached to questions the model produced no item for.
pub const UNRECOGNIZED_FEEDBACK: &str = "Answer not recognized in the recording.";

static OUTER_OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"));
static TRAILING_COMMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*([}\]])").expect("valid regex"));

/// Result payload classified by shape. The reading engine returns XML or
/// JSON depending on account configuration; the grading model is asked for
/// JSON but may wrap it in prose or fences.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultPayload {
    Xml(String),
    Json(String),
    Unparseable(String),
}

/// Classify a raw payload by its first non-whitespace character.
pub fn sniff(raw: &str) -> ResultPayload {
    match raw.trim_start().chars().next() {
        Some('<') => ResultPayload::Xml(raw.to_string()),
        Some('{') | Some('[') => ResultPayload::Json(raw.to_string()),
        _ => ResultPayload::Unparseable(raw.to_string()),
    }
}

/// Parse a Gateway-A result payload into a normalized evaluation.
pub fn parse_reading_payload(raw: &str) -> AppResult<ReadingEvaluation> {
    match sniff(raw) {
        ResultPayload::Xml(xml) => parse_reading_xml(&xml),
        ResultPayload::Json(json) => parse_reading_json(&json),
        ResultPayload::Unparseable(_) => Err(AppError::ParseError(
            "reading result is neither XML nor JSON".to_string(),
        )),
    }
}

/// Pick the score-bearing element out of the engine's XML. The document
/// nests several elements of the same name; the one we want carries the
/// chapter-level score attributes, so we keep the element whose attribute
/// set has the highest affinity with those keys.
fn parse_reading_xml(xml: &str) -> AppResult<ReadingEvaluation> {
    const SCORE_KEYS: [&str; 6] = [
        "total_score",
        "accuracy_score",
        "fluency_score",
        "integrity_score",
        "phone_score",
        "is_rejected",
    ];

    let mut reader = Reader::from_str(xml);

    let mut best: Option<(usize, HashMap<String, String>)> = None;
    let mut words: Vec<WordDetail> = Vec::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| AppError::ParseError(format!("malformed reading XML: {}", e)))?;
        let element = match &event {
            Event::Start(e) | Event::Empty(e) => e,
            Event::Eof => break,
            _ => continue,
        };

        let mut attrs: HashMap<String, String> = HashMap::new();
        for attr in element.attributes().flatten() {
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| AppError::ParseError(format!("malformed reading XML: {}", e)))?
                .into_owned();
            attrs.insert(key, value);
        }

        if element.name().as_ref() == b"word" {
            if let Some(content) = attrs.get("content") {
                words.push(WordDetail {
                    content: content.clone(),
                    score: attr_f64(&attrs, "total_score"),
                    dp_message: attrs.get("dp_message").cloned(),
                });
            }
            continue;
        }

        let mut affinity = SCORE_KEYS
            .iter()
            .filter(|k| attrs.contains_key(**k))
            .count();
        if attrs.contains_key("total_score") {
            affinity += 2;
        }
        if affinity > 0 && best.as_ref().map_or(true, |(a, _)| affinity > *a) {
            best = Some((affinity, attrs));
        }
    }

    let (_, attrs) = best.ok_or_else(|| {
        AppError::ParseError("reading XML carries no score element".to_string())
    })?;

    Ok(ReadingEvaluation {
        total_score: attr_f64(&attrs, "total_score"),
        accuracy_score: attr_f64(&attrs, "accuracy_score"),
        fluency_score: attr_f64(&attrs, "fluency_score"),
        integrity_score: attr_f64(&attrs, "integrity_score"),
        pronunciation_score: attr_f64(&attrs, "phone_score"),
        rec_text: attrs.get("content").cloned().unwrap_or_default(),
        is_rejected: attrs
            .get("is_rejected")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false),
        reject_type: attrs.get("reject_type").cloned().unwrap_or_default(),
        except_info: attrs.get("except_info").cloned().unwrap_or_default(),
        words,
    })
}

fn attr_f64(attrs: &HashMap<String, String>, key: &str) -> f64 {
    attrs
        .get(key)
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// JSON variant of the reading result: the score object sits at the root or
/// under a `read_chapter` / `data` wrapper.
fn parse_reading_json(json: &str) -> AppResult<ReadingEvaluation> {
    let root: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| AppError::ParseError(format!("malformed reading JSON: {}", e)))?;

    let node = [&root, &root["read_chapter"], &root["data"]["read_chapter"]]
        .into_iter()
        .find(|n| n.get("total_score").is_some())
        .ok_or_else(|| {
            AppError::ParseError("reading JSON carries no total_score".to_string())
        })?;

    Ok(ReadingEvaluation {
        total_score: json_f64(node, "total_score"),
        accuracy_score: json_f64(node, "accuracy_score"),
        fluency_score: json_f64(node, "fluency_score"),
        integrity_score: json_f64(node, "integrity_score"),
        pronunciation_score: json_f64(node, "phone_score"),
        rec_text: json_str(node, "content"),
        is_rejected: node["is_rejected"].as_bool().unwrap_or(false),
        reject_type: json_str(node, "reject_type"),
        except_info: json_str(node, "except_info"),
        words: Vec::new(),
    })
}

/// Parse a Gateway-B response into a normalized evaluation. The model is
/// prompted for bare JSON, but replies wrapped in markdown fences, prefixed
/// with prose, or containing trailing commas are repaired before giving up.
/// Items are padded so every expected question is represented.
pub fn parse_dialogue_payload(
    raw: &str,
    expected_questions: usize,
) -> AppResult<DialogueEvaluation> {
    let value = match serde_json::from_str::<serde_json::Value>(raw.trim()) {
        Ok(v) if v.is_object() => v,
        _ => {
            let repaired = repair_json(raw).ok_or_else(|| {
                AppError::ParseError("dialogue result contains no JSON object".to_string())
            })?;
            serde_json::from_str(&repaired).map_err(|e| {
                AppError::ParseError(format!("dialogue result unrepairable: {}", e))
            })?
        }
    };

    let mut eval = DialogueEvaluation {
        total_score: json_f64(&value, "total_score"),
        fluency_score: json_f64(&value, "fluency_score"),
        pronunciation_score: json_f64(&value, "pronunciation_score"),
        confidence_score: json_f64(&value, "confidence_score"),
        vocabulary_score: json_f64(&value, "vocabulary_score"),
        sentence_score: json_f64(&value, "sentence_score"),
        transcript: first_str(&value, &["transcript", "transcript_full"]),
        items: Vec::new(),
        suggestions: parse_suggestions(&value),
    };

    // Models occasionally leave the overall score out or at zero while the
    // dimension scores are populated; fall back to their mean.
    if eval.total_score == 0.0 {
        let mean = (eval.fluency_score
            + eval.pronunciation_score
            + eval.confidence_score
            + eval.vocabulary_score
            + eval.sentence_score)
            / 5.0;
        eval.total_score = mean;
    }

    if let Some(items) = value["items"].as_array() {
        for item in items {
            let Some(no) = item["no"].as_i64() else { continue };
            eval.items.push(ItemResult {
                no: no as i32,
                score: item["score"].as_i64().unwrap_or(0) as i32,
                feedback: json_str(item, "feedback"),
                evidence: json_str(item, "evidence"),
            });
        }
    }
    pad_items(&mut eval.items, expected_questions);

    Ok(eval)
}

/// Ensure one item per expected question number, zero-scored where missing.
fn pad_items(items: &mut Vec<ItemResult>, expected: usize) {
    for no in 1..=expected as i32 {
        if !items.iter().any(|i| i.no == no) {
            items.push(ItemResult {
                no,
                score: 0,
                feedback: UNRECOGNIZED_FEEDBACK.to_string(),
                evidence: String::new(),
            });
        }
    }
    items.sort_by_key(|i| i.no);
}

/// Best-effort recovery of a JSON object from a noisy model reply.
fn repair_json(raw: &str) -> Option<String> {
    // Drop markdown fence lines, keep their contents.
    let without_fences: String = raw
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n");

    // Keep only the outermost object, shedding surrounding prose.
    let object = OUTER_OBJECT.find(&without_fences)?.as_str();

    Some(TRAILING_COMMA.replace_all(object, "$1").into_owned())
}

fn json_f64(value: &serde_json::Value, key: &str) -> f64 {
    let field = &value[key];
    field
        .as_f64()
        .or_else(|| field.as_str().and_then(|s| s.trim().parse().ok()))
        .unwrap_or(0.0)
}

fn json_str(value: &serde_json::Value, key: &str) -> String {
    value[key].as_str().unwrap_or_default().to_string()
}

fn first_str(value: &serde_json::Value, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|k| value[*k].as_str())
        .unwrap_or_default()
        .to_string()
}

fn parse_suggestions(value: &serde_json::Value) -> Vec<String> {
    match &value["suggestions"] {
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::to_string)
            .collect(),
        serde_json::Value::String(s) => vec![s.clone()],
        _ => Vec::new(),
    }
}
