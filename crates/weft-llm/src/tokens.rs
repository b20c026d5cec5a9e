use std::sync::OnceLock;

use tiktoken_rs::CoreBPE;

/// Shared cl100k_base tokenizer, or `None` if its tables failed to load.
fn tokenizer() -> Option<&'static CoreBPE> {
    static TOKENIZER: OnceLock<Option<CoreBPE>> = OnceLock::new();
    TOKENIZER
        .get_or_init(|| match tiktoken_rs::cl100k_base() {
            Ok(bpe) => Some(bpe),
            Err(e) => {
                tracing::warn!(error = %e, "Tokenizer unavailable, falling back to length estimate");
                None
            }
        })
        .as_ref()
}

/// Token count using BPE tokenization (cl100k_base). Falls back to one
/// token per four characters.
pub fn estimate_tokens(text: &str) -> usize {
    match tokenizer() {
        Some(bpe) => bpe.encode_ordinary(text).len(),
        None => text.chars().count().div_ceil(4),
    }
}
