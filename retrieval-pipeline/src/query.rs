/// Canonicalizes a retrieval query before embedding: whitespace collapsed,
/// words shorter than three characters dropped — unless dropping them
/// would leave nothing, in which case the collapsed original survives.
pub fn canonicalize_query(query: &str) -> String {
    let collapsed: Vec<&str> = query.split_whitespace().collect();
    let kept: Vec<&str> = collapsed
        .iter()
        .copied()
        .filter(|word| word.chars().count() >= 3)
        .collect();

    if kept.is_empty() {
        collapsed.join(" ")
    } else {
        kept.join(" ")
    }
}

/// Lowercased alphanumeric tokens of a query, for lexical overlap and
/// highlight windows.
pub fn query_tokens(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
        .collect()
}
