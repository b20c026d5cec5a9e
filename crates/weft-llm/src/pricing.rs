//! Per-model prices in USD per 1K tokens.

/// Input and output price per 1K tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPrice {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl ModelPrice {
    pub fn estimate(&self, input_tokens: usize, output_tokens: usize) -> f64 {
        (input_tokens as f64 / 1000.0) * self.input_per_1k
            + (output_tokens as f64 / 1000.0) * self.output_per_1k
    }
}

// Longest matching prefix wins, so more specific ids come first.
const PRICES: &[(&str, f64, f64)] = &[
    ("gpt-4o-mini", 0.000_15, 0.000_6),
    ("gpt-4o", 0.002_5, 0.01),
    ("gpt-4-turbo", 0.01, 0.03),
    ("gpt-4", 0.03, 0.06),
    ("gpt-3.5-turbo", 0.000_5, 0.001_5),
    ("claude-3-5-haiku", 0.000_8, 0.004),
    ("claude-3-5-sonnet", 0.003, 0.015),
    ("claude-3-opus", 0.015, 0.075),
    ("claude-3-sonnet", 0.003, 0.015),
    ("claude-3-haiku", 0.000_25, 0.001_25),
    ("text-embedding-3-small", 0.000_02, 0.0),
    ("text-embedding-3-large", 0.000_13, 0.0),
    ("text-embedding-ada-002", 0.000_1, 0.0),
];

/// Price for a model id, by longest known prefix.
pub fn price_for(model_id: &str) -> Option<ModelPrice> {
    PRICES
        .iter()
        .filter(|(prefix, _, _)| model_id.starts_with(prefix))
        .max_by_key(|(prefix, _, _)| prefix.len())
        .map(|&(_, input_per_1k, output_per_1k)| ModelPrice {
            input_per_1k,
            output_per_1k,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longest_prefix_wins() {
        let mini = price_for("gpt-4o-mini-2024-07-18").unwrap();
        assert_eq!(mini.input_per_1k, 0.000_15);
        let full = price_for("gpt-4o-2024-08-06").unwrap();
        assert_eq!(full.input_per_1k, 0.002_5);
        let classic = price_for("gpt-4-0613").unwrap();
        assert_eq!(classic.output_per_1k, 0.06);
    }

    #[test]
    fn test_unknown_model() {
        assert!(price_for("llama3").is_none());
    }

    #[test]
    fn test_estimate() {
        let price = ModelPrice {
            input_per_1k: 1.0,
            output_per_1k: 2.0,
        };
        assert!((price.estimate(500, 250) - 1.0).abs() < 1e-9);
    }
}
