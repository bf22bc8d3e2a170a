use crate::query::query_tokens;

/// Extracts up to `max_fragments` fragments of at most `fragment_len`
/// bytes, chosen around the densest query-token overlap windows. Fragments
/// do not overlap and keep document order.
pub fn highlight_fragments(
    text: &str,
    query: &str,
    max_fragments: usize,
    fragment_len: usize,
) -> Vec<String> {
    if max_fragments == 0 || fragment_len == 0 || text.is_empty() {
        return Vec::new();
    }

    let tokens = query_tokens(query);
    if tokens.is_empty() {
        return Vec::new();
    }

    let lower = text.to_lowercase();
    if lower.len() != text.len() {
        // Case folding changed byte offsets; fall back to a leading
        // fragment rather than risk splitting a character.
        let fragment: String = text.chars().take(fragment_len).collect();
        return vec![fragment];
    }

    // Candidate windows start at each token occurrence.
    let mut candidates: Vec<(usize, usize)> = Vec::new(); // (start, distinct tokens)
    for token in &tokens {
        for (position, _) in lower.match_indices(token.as_str()) {
            let start = floor_char_boundary(text, position);
            let end = floor_char_boundary(text, (start + fragment_len).min(text.len()));
            let window = lower.get(start..end).unwrap_or_default();
            let distinct = tokens.iter().filter(|t| window.contains(t.as_str())).count();
            candidates.push((start, distinct));
        }
    }
    if candidates.is_empty() {
        return Vec::new();
    }

    // Best windows first, then greedily keep non-overlapping ones.
    candidates.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let mut picked: Vec<(usize, usize)> = Vec::new(); // (start, end)
    for (start, _) in candidates {
        let end = floor_char_boundary(text, (start + fragment_len).min(text.len()));
        if picked
            .iter()
            .any(|(s, e)| start < *e && end > *s)
        {
            continue;
        }
        picked.push((start, end));
        if picked.len() == max_fragments {
            break;
        }
    }

    picked.sort_by_key(|(start, _)| *start);
    picked
        .into_iter()
        .filter_map(|(start, end)| text.get(start..end))
        .map(str::trim)
        .filter(|fragment| !fragment.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Largest char boundary at or below `index`.
fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}
