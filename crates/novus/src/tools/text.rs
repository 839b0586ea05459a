use std::sync::LazyLock;

use regex::{Captures, Regex};

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());
static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(?:#[xX]([0-9a-fA-F]+)|#([0-9]+)|(lt|gt|quot|apos|amp|nbsp));")
        .unwrap()
});

/// Turns a fragment of markup into plain text.
///
/// Tags are dropped, runs of whitespace collapse into one space, and entities
/// and character references are decoded in one pass. Unknown or invalid
/// references are kept as is.
pub(crate) fn clean_text(raw: &str) -> String {
    let text = TAG.replace_all(raw, " ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    ENTITY.replace_all(&text, decode_entity).into_owned()
}

fn decode_entity(caps: &Captures<'_>) -> String {
    let code = match (caps.get(1), caps.get(2)) {
        (Some(hex), _) => u32::from_str_radix(hex.as_str(), 16).ok(),
        (_, Some(dec)) => dec.as_str().parse().ok(),
        _ => {
            return match &caps[3] {
                "lt" => "<",
                "gt" => ">",
                "quot" => "\"",
                "apos" => "'",
                "nbsp" => "\u{a0}",
                _ => "&",
            }
            .to_owned();
        }
    };
    code.and_then(char::from_u32)
        .map(String::from)
        .unwrap_or_else(|| caps[0].to_owned())
}
