/// Scan the combined request text against the configured word list.
/// Returns the matched words, lowercased, when any are present.
pub fn scan_sensitive(text: &str, words: &[String]) -> Option<Vec<String>> {
    if words.is_empty() || text.is_empty() {
        return None;
    }
    let haystack = text.to_lowercase();
    let hits: Vec<String> = words
        .iter()
        .filter(|word| !word.is_empty())
        .filter(|word| haystack.contains(&word.to_lowercase()))
        .map(|word| word.to_lowercase())
        .collect();
    (!hits.is_empty()).then_some(hits)
}
