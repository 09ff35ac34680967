//! Fixed instruction templates handed to the summarizer.

use crate::model::Item;

/// For post snapshots. Asks for a single JSON object that
/// [`super::format::format_signal`] knows how to render.
pub const SNAPSHOT_INSTRUCTIONS: &str = r#"
You are an event-driven trading signal analyst. The input is a screenshot of a
single social media post (text, images, video or a repost).

Compress it into a trading-grade signal, not a content summary:
1. summary: one sentence with the core message and its market implication.
2. signal_type, exactly one of:
   A action / corporate move (buybacks, capacity, orders, M&A)
   B policy stance (tariffs, regulation, trade)
   C technology breakthrough / product launch
   D sentiment / public spat
   E personal life / entertainment (no market impact)
3. direction: Long, Short or Neutral.
4. assets: the most affected US and CN tickers or sectors, strongest first, at most 3 each.
5. confidence: 0-10 (0-3 noise, 4-6 watch, 7-10 actionable).
6. expiry: how long the signal stays relevant.
7. risk: optional key risk.

Output JSON only:
{"summary": "", "signal_type": "A", "direction": "Long", "assets": {"US": [], "CN": []}, "confidence": 7, "expiry": "3 days", "risk": ""}
"#;

/// For ministry bulletins.
pub const BULLETIN_INSTRUCTIONS: &str = r#"
You are a global macro strategist covering trade policy and supply chains.
The input is an official commerce-ministry bulletin.

1. Extract the core facts (controlled items, sanctioned entities, trade data, investigations).
2. First-order impact on affected industries.
3. Geopolitical risk: routine administration or deliberate countermeasure? Give a
   provocation score 0-10 for the likelihood of a sharp US response.
4. Market transmission for CN A-shares and US equities; separate short-term
   sentiment from long-term fundamentals.

Start with a one-line `summary:` and keep the rest concise.
"#;

/// Summarizer input for a text-mode item.
pub fn text_payload(item: &Item) -> String {
    format!(
        "[Title] {}\n[Published] {}\n[Link] {}\n[Body]\n{}",
        item.title.as_deref().unwrap_or_default(),
        item.published_on.as_deref().unwrap_or_default(),
        item.reference_url,
        item.body_text
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Candidate, Detail};

    #[test]
    fn payload_layout() {
        let mut c = Candidate::new("https://l", "mofcom", "https://l");
        c.title = Some("T".into());
        c.published_on = Some("2025-03-04".into());
        let item = Item::with_detail(
            c,
            Detail {
                body_text: "body".into(),
                snapshot_path: None,
            },
        );
        assert_eq!(
            text_payload(&item),
            "[Title] T\n[Published] 2025-03-04\n[Link] https://l\n[Body]\nbody"
        );
    }
}
