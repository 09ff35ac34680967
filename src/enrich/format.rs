//! Summary extraction and notification text.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::model::Item;

const SUMMARY_LIMIT: usize = 100;

static JSON_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("json regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("ws regex"));

fn truncate_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

/// The outermost `{...}` span of `text`, parsed as a JSON object.
fn embedded_object(text: &str) -> Option<Map<String, Value>> {
    let m = JSON_OBJECT.find(text)?;
    match serde_json::from_str::<Value>(m.as_str()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn as_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// One-line summary of a summarizer reply.
///
/// Order: `summary` of an embedded JSON object; a `summary: ...` line; the
/// first 100 characters; `"no summary"` for an empty reply.
pub fn extract_summary(ai_text: &str) -> String {
    if let Some(obj) = embedded_object(ai_text) {
        let summary = obj.get("summary").map(as_text).unwrap_or_default();
        return truncate_chars(&summary, SUMMARY_LIMIT);
    }

    for line in ai_text.lines() {
        if !line.to_lowercase().contains("summary") {
            continue;
        }
        if let Some((_, rest)) = line.split_once(':') {
            let cleaned = rest.trim().trim_matches('"');
            return WHITESPACE.replace_all(cleaned, " ").into_owned();
        }
    }

    if ai_text.is_empty() {
        "no summary".to_string()
    } else {
        truncate_chars(ai_text, SUMMARY_LIMIT)
    }
}

fn signal_label(code: &str) -> &'static str {
    match code {
        "A" => "📊 Action / corporate move",
        "B" => "🏛️ Policy stance",
        "C" => "🚀 Tech breakthrough / product launch",
        "D" => "💬 Sentiment / public spat",
        "E" => "🎮 Pure entertainment",
        _ => "unknown",
    }
}

fn direction_label(code: &str) -> &'static str {
    match code {
        "Long" => "📈 Long",
        "Short" => "📉 Short",
        _ => "➖ Neutral",
    }
}

fn confidence_of(v: Option<&Value>) -> f64 {
    match v {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn confidence_line(score: f64) -> String {
    let shown = if score.fract() == 0.0 {
        format!("{}", score as i64)
    } else {
        format!("{score}")
    };
    if score >= 7.0 {
        format!("⭐⭐⭐ High confidence ({shown}/10)")
    } else if score >= 4.0 {
        format!("⭐⭐ Medium confidence ({shown}/10)")
    } else {
        format!("⭐ Low confidence ({shown}/10) - noise")
    }
}

fn asset_list(assets: Option<&Value>, market: &str) -> String {
    let names: Vec<String> = assets
        .and_then(|a| a.get(market))
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .map(as_text)
                .filter(|s| !s.trim().is_empty())
                .collect()
        })
        .unwrap_or_default();
    if names.is_empty() {
        "no direct impact".to_string()
    } else {
        names.join(", ")
    }
}

/// Notification for a snapshot-mode item.
///
/// A reply carrying the signal JSON is rendered section by section; anything
/// else is forwarded raw under a generic header.
pub fn format_signal(ai_text: &str, image_url: &str) -> String {
    let Some(data) = embedded_object(ai_text) else {
        return format!("🔔 Post analysis\n\n{ai_text}\n\n🖼️ Screenshot: {image_url}");
    };

    let summary = data
        .get("summary")
        .map(as_text)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "none".to_string());
    let signal = data
        .get("signal_type")
        .map(as_text)
        .unwrap_or_else(|| "E".to_string());
    let direction = data
        .get("direction")
        .map(as_text)
        .unwrap_or_else(|| "Neutral".to_string());
    let assets = data.get("assets");
    let expiry = data
        .get("expiry")
        .map(as_text)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string());

    let mut out = format!(
        "📝 Summary\n{summary}\n\n🏷️ Signal type\n{}\n\n📊 Direction\n{}\n\n💼 Affected assets\n",
        signal_label(signal.trim()),
        direction_label(direction.trim()),
    );
    out.push_str(&format!("🇺🇸 US: {}\n", asset_list(assets, "US")));
    out.push_str(&format!("🇨🇳 CN: {}\n", asset_list(assets, "CN")));
    out.push_str(&format!("\n{}\n", confidence_line(confidence_of(data.get("confidence")))));
    out.push_str(&format!("\n⏰ Expiry: {expiry}\n"));

    let risk = data.get("risk").map(as_text).unwrap_or_default();
    let risk = risk.trim();
    if !risk.is_empty() && !risk.eq_ignore_ascii_case("none") {
        out.push_str(&format!("\n⚠️ Key risk\n{risk}\n"));
    }
    out.push_str(&format!("\n🖼️ Screenshot: {image_url}"));
    out
}

/// Notification for a text-mode item.
pub fn format_bulletin(item: &Item, stored_at: &str, ai_text: &str) -> String {
    let conclusion = if ai_text.trim().is_empty() {
        "AI returned no result"
    } else {
        ai_text
    };
    format!(
        "[Bulletin] {}\nPublished: {}\nLink: {}\nStored at: {}\nAI conclusion:\n{}",
        item.title.as_deref().unwrap_or(&item.identity),
        item.published_on.as_deref().unwrap_or("unknown"),
        item.reference_url,
        stored_at,
        conclusion
    )
}
