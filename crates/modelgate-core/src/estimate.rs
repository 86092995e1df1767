use tiktoken_rs::{get_bpe_from_model, o200k_base};

use crate::error::RelayError;

/// Count tokens for `text` with the model's tokenizer, falling back to the
/// o200k base encoding for models tiktoken does not know.
pub fn count_text_tokens(model: &str, text: &str) -> Result<u64, RelayError> {
    if text.is_empty() {
        return Ok(0);
    }
    let bpe = get_bpe_from_model(model)
        .or_else(|_| o200k_base())
        .map_err(|err| RelayError::count_token_failed(err.to_string()))?;
    Ok(bpe.encode_ordinary(text).len() as u64)
}

/// Estimate prompt tokens for pre-consume pricing.
///
/// With metering enabled the combined text view is tokenized; the fast path
/// (empty combined text) prices from the message-count floor alone so large
/// bodies are never re-walked.
pub fn estimate_prompt_tokens(
    model: &str,
    combined_text: Option<&str>,
    message_count: usize,
) -> Result<u64, RelayError> {
    // Chat framing overhead per message, same floor whether or not the
    // tokenizer runs.
    let overhead = 3 * message_count as u64 + 3;
    match combined_text {
        Some(text) if !text.is_empty() => Ok(count_text_tokens(model, text)? + overhead),
        _ => Ok(overhead),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_are_stable_and_positive() {
        let first = count_text_tokens("gpt-4o-mini", "hello world").unwrap();
        let second = count_text_tokens("gpt-4o-mini", "hello world").unwrap();
        assert_eq!(first, second);
        assert!(first > 0);
    }

    #[test]
    fn unknown_models_fall_back_to_base_encoding() {
        let count = count_text_tokens("some-provider/some-model", "hello world").unwrap();
        assert!(count > 0);
    }

    #[test]
    fn fast_path_prices_from_overhead_only() {
        let tokens = estimate_prompt_tokens("gpt-4o-mini", None, 2).unwrap();
        assert_eq!(tokens, 9);
    }

    #[test]
    fn empty_text_is_zero_tokens() {
        assert_eq!(count_text_tokens("gpt-4o-mini", "").unwrap(), 0);
    }
}
