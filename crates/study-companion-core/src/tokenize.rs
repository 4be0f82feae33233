//! Query and document tokenization for lexical retrieval.
//!
//! Text is lowercased and split on anything that is not alphanumeric.
//! English stop-words are dropped so that question scaffolding ("what does",
//! "how is") does not match every chunk, and a light suffix stemmer folds
//! plural and third-person forms together ("converts" → "convert").

/// Words that carry no retrieval signal.
const STOP_WORDS: &[&str] = &[
    "a", "about", "am", "an", "and", "are", "as", "at", "be", "been", "but", "by", "can", "could",
    "did", "do", "does", "doing", "for", "from", "had", "has", "have", "how", "i", "if", "in",
    "into", "is", "it", "its", "me", "my", "of", "on", "or", "our", "so", "such", "than", "that",
    "the", "their", "them", "then", "there", "these", "they", "this", "those", "to", "was", "we",
    "were", "what", "when", "where", "which", "who", "whom", "why", "will", "with", "would",
    "you", "your",
];

/// Tokenize `text` into normalized retrieval terms, in order, with repeats.
pub fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .filter(|w| !is_stop_word(w))
        .map(|w| stem(&w))
        .collect()
}

/// Distinct terms of `text`, in first-seen order.
pub fn unique_terms(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    terms(text)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.binary_search(&word).is_ok()
}

fn stem(word: &str) -> String {
    if word.chars().count() <= 3 || !word.is_ascii() {
        return word.to_string();
    }
    if let Some(base) = word.strip_suffix("ies") {
        return format!("{}y", base);
    }
    if word.ends_with("ss") || word.ends_with("us") || word.ends_with("is") {
        return word.to_string();
    }
    if let Some(base) = word.strip_suffix('s') {
        return base.to_string();
    }
    word.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_words_sorted_for_binary_search() {
        let mut sorted = STOP_WORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, STOP_WORDS);
    }

    #[test]
    fn test_question_scaffolding_removed() {
        assert_eq!(
            terms("What does photosynthesis convert?"),
            vec!["photosynthesis", "convert"]
        );
    }

    #[test]
    fn test_plural_and_verb_forms_fold() {
        assert_eq!(terms("converts"), terms("convert"));
        assert_eq!(terms("Theories"), vec!["theory"]);
        assert_eq!(terms("class"), vec!["class"]);
        assert_eq!(terms("analysis"), vec!["analysis"]);
    }

    #[test]
    fn test_punctuation_and_case() {
        assert_eq!(terms("Light-energy, CHEMICAL energy."), vec![
            "light", "energy", "chemical", "energy"
        ]);
    }

    #[test]
    fn test_unique_terms_keeps_first_order() {
        assert_eq!(
            unique_terms("energy light energy"),
            vec!["energy".to_string(), "light".to_string()]
        );
    }

    #[test]
    fn test_non_ascii_words_kept() {
        assert_eq!(terms("Größe über"), vec!["größe", "über"]);
    }
}
