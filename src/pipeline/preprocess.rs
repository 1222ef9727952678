use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashSet;
use unicode_normalization::UnicodeNormalization;

pub const DEFAULT_MIN_CHARS: usize = 8;

static BARE_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:https?://|www\.)\S+$").expect("compile url pattern"));

static LOW_CONTENT: Lazy<Regex> = Lazy::new(|| {
    let token = r"(?:l(?:o+l)+|lmao+|lmfao+|rofl+|kek+|(?:ha)+h?|(?:he)+h?|(?:hi)+h?|xd+|w+|ｗ+|笑+|草+|first|nice|wow+|omg+|gg|cool|same|yes+|no+|ok+|okay|thanks?|ty)";
    let sep = r"[\s\p{P}\p{S}]";
    Regex::new(&format!(r"(?i)^{sep}*{token}(?:{sep}*{token})*{sep}*$"))
        .expect("compile low-content pattern")
});

/// Comments that survived preprocessing, in input order, with back-references into the raw
/// sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanCorpus {
    pub texts: Vec<String>,
    pub original_indices: Vec<usize>,
}

impl CleanCorpus {
    #[must_use]
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

/// Drops short, noisy and exactly duplicated comments.
///
/// Per text, in order: trim; drop when shorter than `min_chars` characters; drop when the whole
/// text is a bare URL, carries no letter or digit, or is nothing but low-content tokens such as
/// "lol" or "wwww"; drop when its case-folded form was already seen in this call.
#[derive(Debug, Clone, Copy)]
pub struct TextPreprocessor {
    min_chars: usize,
}

impl Default for TextPreprocessor {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_CHARS)
    }
}

impl TextPreprocessor {
    #[must_use]
    pub fn new(min_chars: usize) -> Self {
        Self { min_chars }
    }

    #[must_use]
    pub fn process<S: AsRef<str>>(&self, raw: &[S]) -> CleanCorpus {
        let mut seen: FxHashSet<String> = FxHashSet::default();
        let mut corpus = CleanCorpus::default();

        for (index, text) in raw.iter().enumerate() {
            let trimmed = text.as_ref().trim();
            if trimmed.chars().count() < self.min_chars || is_noise(trimmed) {
                continue;
            }
            if !seen.insert(dedup_key(trimmed)) {
                continue;
            }
            corpus.texts.push(trimmed.to_string());
            corpus.original_indices.push(index);
        }

        corpus
    }
}

fn is_noise(text: &str) -> bool {
    !text.chars().any(char::is_alphanumeric) || BARE_URL.is_match(text) || LOW_CONTENT.is_match(text)
}

fn dedup_key(text: &str) -> String {
    text.nfc().collect::<String>().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn drops_short_and_case_insensitive_duplicates() {
        let corpus = TextPreprocessor::default().process(&["ok", "Great video!!", "great video!!"]);

        assert_eq!(corpus.texts, vec!["Great video!!".to_string()]);
        assert_eq!(corpus.original_indices, vec![1]);
    }

    #[test]
    fn keeps_order_and_trims() {
        let corpus = TextPreprocessor::default().process(&[
            "   the editing here is superb   ",
            "lolololol",
            "I disagree with the second point",
        ]);

        assert_eq!(
            corpus.texts,
            vec![
                "the editing here is superb".to_string(),
                "I disagree with the second point".to_string()
            ]
        );
        assert_eq!(corpus.original_indices, vec![0, 2]);
    }

    #[rstest]
    #[case("https://example.com/watch?v=abc")]
    #[case("www.example.com/some/page")]
    #[case("!!!!!!!!!!")]
    #[case("😂😂😂😂😂😂😂😂")]
    #[case("hahahahaha")]
    #[case("LMAOOOOOO")]
    #[case("wwwwwwwwww")]
    #[case("ｗｗｗｗｗｗｗｗ")]
    #[case("草草草草草草草草")]
    #[case("nice!!!!!!")]
    #[case("lol lol lol lol")]
    #[case("first!!! 🎉🎉")]
    #[case("😂😂😂😂 lol lol")]
    #[case("!!! nice nice")]
    #[case("... hahahaha")]
    #[case("🎉 first 🎉 first")]
    fn drops_whole_string_noise(#[case] text: &str) {
        assert!(TextPreprocessor::default().process(&[text]).is_empty());
    }

    #[rstest]
    #[case("nice explanation of the topic")]
    #[case("see https://example.com for the source")]
    #[case("lol but seriously this is wrong")]
    fn keeps_noise_tokens_inside_real_sentences(#[case] text: &str) {
        assert_eq!(TextPreprocessor::default().process(&[text]).len(), 1);
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        // 7 characters, 21 bytes.
        let corpus = TextPreprocessor::default().process(&["とても良い動画だ", "良い動画です。"]);

        assert_eq!(corpus.texts, vec!["とても良い動画だ".to_string()]);
    }

    #[test]
    fn empty_input_is_empty_output() {
        let corpus = TextPreprocessor::default().process::<&str>(&[]);
        assert!(corpus.is_empty());
        assert_eq!(corpus.len(), 0);
    }
}
