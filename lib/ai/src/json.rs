//! Locating JSON documents inside raw model output.

/// Returns the first balanced JSON object or array in `raw`.
///
/// Models frequently wrap structured answers in prose or Markdown fences.
/// Brackets inside string literals are ignored while scanning. Returns
/// `None` when no complete document is present.
#[must_use]
pub fn extract_json(raw: &str) -> Option<&str> {
    let mut spans = bracket_spans(raw.as_bytes());
    spans.sort_unstable_by_key(|&(start, _)| start);

    spans
        .into_iter()
        .map(|(start, end)| &raw[start..=end])
        .find(|candidate| serde_json::from_str::<serde_json::Value>(candidate).is_ok())
}

/// Pairs each opening bracket with the bracket closing it in one pass.
///
/// Brackets that never close are left out. Quotes only open a string while
/// some bracket is open, so stray quotes in surrounding prose are harmless.
fn bracket_spans(bytes: &[u8]) -> Vec<(usize, usize)> {
    let mut open = Vec::new();
    let mut spans = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (index, &byte) in bytes.iter().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match byte {
            b'"' if !open.is_empty() => in_string = true,
            b'{' | b'[' => open.push(index),
            b'}' | b']' => {
                if let Some(start) = open.pop() {
                    spans.push((start, index));
                }
            }
            _ => {}
        }
    }

    spans
}
