//! Text preprocessing transformers

use super::{
    base::{ColumnMapping, Transformer},
    porter,
};
use crate::core::Example;
use anyhow::Context;
use fancy_regex::Regex;
use phf::{phf_map, phf_set};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::LazyLock;

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:https?://|www\.)\S+").unwrap());
static HTML_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static PUNCT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s]|_").unwrap());
static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+(?:'\w+)?").unwrap());

/// English stop words.
pub static STOP_WORDS: phf::Set<&'static str> = phf_set! {
    "a", "about", "above", "after", "again", "against", "ain", "all", "am", "an",
    "and", "any", "are", "aren", "aren't", "as", "at", "be", "because", "been",
    "before", "being", "below", "between", "both", "but", "by", "can", "couldn",
    "couldn't", "d", "did", "didn", "didn't", "do", "does", "doesn", "doesn't",
    "doing", "don", "don't", "down", "during", "each", "few", "for", "from",
    "further", "had", "hadn", "hadn't", "has", "hasn", "hasn't", "have", "haven",
    "haven't", "having", "he", "her", "here", "hers", "herself", "him",
    "himself", "his", "how", "i", "if", "in", "into", "is", "isn", "isn't", "it",
    "it's", "its", "itself", "just", "ll", "m", "ma", "me", "mightn", "mightn't",
    "more", "most", "mustn", "mustn't", "my", "myself", "needn", "needn't", "no",
    "nor", "not", "now", "o", "of", "off", "on", "once", "only", "or", "other",
    "our", "ours", "ourselves", "out", "over", "own", "re", "s", "same", "shan",
    "shan't", "she", "she's", "should", "should've", "shouldn", "shouldn't", "so",
    "some", "such", "t", "than", "that", "that'll", "the", "their", "theirs",
    "them", "themselves", "then", "there", "these", "they", "this", "those",
    "through", "to", "too", "under", "until", "up", "ve", "very", "was", "wasn",
    "wasn't", "we", "were", "weren", "weren't", "what", "when", "where", "which",
    "while", "who", "whom", "why", "will", "with", "won", "won't", "wouldn",
    "wouldn't", "y", "you", "you'd", "you'll", "you're", "you've", "your",
    "yours", "yourself", "yourselves",
};

/// Irregular inflections and their lemmas.
static IRREGULAR_LEMMAS: phf::Map<&'static str, &'static str> = phf_map! {
    "am" => "be", "are" => "be", "is" => "be", "was" => "be", "were" => "be",
    "been" => "be", "being" => "be",
    "has" => "have", "had" => "have", "having" => "have",
    "does" => "do", "did" => "do", "done" => "do",
    "went" => "go", "gone" => "go", "goes" => "go",
    "made" => "make", "said" => "say", "saw" => "see", "seen" => "see",
    "took" => "take", "taken" => "take", "came" => "come", "got" => "get",
    "gave" => "give", "given" => "give", "knew" => "know", "known" => "know",
    "thought" => "think", "told" => "tell", "found" => "find", "felt" => "feel",
    "left" => "leave", "brought" => "bring", "bought" => "buy", "began" => "begin",
    "begun" => "begin", "kept" => "keep", "held" => "hold", "wrote" => "write",
    "written" => "write", "ran" => "run", "ate" => "eat", "eaten" => "eat",
    "better" => "good", "best" => "good", "worse" => "bad", "worst" => "bad",
    "children" => "child", "men" => "man", "women" => "woman", "people" => "person",
    "mice" => "mouse", "geese" => "goose", "feet" => "foot", "teeth" => "tooth",
    "data" => "datum", "criteria" => "criterion", "analyses" => "analysis",
};

/// Words ending in -ing or -ed that are not inflected verbs.
static NON_INFLECTED: phf::Set<&'static str> = phf_set! {
    "nothing", "something", "anything", "everything", "morning", "evening",
    "ceiling", "wedding", "building", "meeting", "interesting", "hundred",
    "sacred", "naked", "wicked",
};

/// Minimum stem length left after stripping -ing or -ed.
const VERB_MIN_STEM: usize = 3;

/// Suffix rules tried in order: (suffix, replacement, minimum remaining stem length).
const LEMMA_RULES: &[(&str, &str, usize)] = &[
    ("ies", "y", 2),
    ("sses", "ss", 1),
    ("shes", "sh", 1),
    ("ches", "ch", 1),
    ("xes", "x", 1),
    ("zes", "z", 1),
    ("ves", "f", 2),
    ("s", "", 3),
];

/// Applies `f` to every string in a string or array-of-strings value.
fn map_strings<F>(value: &Value, f: F) -> Value
where
    F: Fn(&str) -> String,
{
    match value {
        Value::String(s) => Value::String(f(s)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Value::String(f(s)),
                    other => other.clone(),
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Applies `f` word by word; strings are split on whitespace and re-joined.
fn map_words<F>(value: &Value, f: F) -> Value
where
    F: Fn(&str) -> String,
{
    match value {
        Value::String(s) => Value::String(s.split_whitespace().map(&f).collect::<Vec<_>>().join(" ")),
        Value::Array(_) => map_strings(value, f),
        other => other.clone(),
    }
}

/// Normalises raw text.
#[derive(Debug, Clone)]
pub struct TextCleanerTransformer {
    mapping: ColumnMapping,
    pub lower: bool,
    pub remove_urls: bool,
    pub remove_html: bool,
    pub remove_punctuation: bool,
    pub remove_numbers: bool,
    pub normalize_whitespace: bool,
}

impl TextCleanerTransformer {
    pub fn new(mapping: ColumnMapping) -> Self {
        Self {
            mapping,
            lower: true,
            remove_urls: true,
            remove_html: true,
            remove_punctuation: true,
            remove_numbers: false,
            normalize_whitespace: true,
        }
    }

    pub fn lower(mut self, lower: bool) -> Self {
        self.lower = lower;
        self
    }

    pub fn remove_urls(mut self, remove: bool) -> Self {
        self.remove_urls = remove;
        self
    }

    pub fn remove_html(mut self, remove: bool) -> Self {
        self.remove_html = remove;
        self
    }

    pub fn remove_punctuation(mut self, remove: bool) -> Self {
        self.remove_punctuation = remove;
        self
    }

    pub fn remove_numbers(mut self, remove: bool) -> Self {
        self.remove_numbers = remove;
        self
    }

    pub fn normalize_whitespace(mut self, normalize: bool) -> Self {
        self.normalize_whitespace = normalize;
        self
    }

    pub fn clean(&self, text: &str) -> String {
        let mut text = text.to_string();
        if self.remove_html {
            text = HTML_RE.replace_all(&text, " ").into_owned();
        }
        if self.remove_urls {
            text = URL_RE.replace_all(&text, " ").into_owned();
        }
        if self.lower {
            text = text.to_lowercase();
        }
        if self.remove_punctuation {
            text = PUNCT_RE.replace_all(&text, "").into_owned();
        }
        if self.remove_numbers {
            text = NUMBER_RE.replace_all(&text, "").into_owned();
        }
        if self.normalize_whitespace {
            text = WHITESPACE_RE.replace_all(text.trim(), " ").into_owned();
        }
        text
    }
}

impl Transformer for TextCleanerTransformer {
    fn name(&self) -> String {
        String::from("TextCleanerTransformer")
    }

    fn transform(&self, example: Example) -> anyhow::Result<Example> {
        self.mapping.apply(example, |v| {
            Ok(match v {
                Value::String(s) => Value::String(self.clean(s)),
                other => other.clone(),
            })
        })
    }
}

#[derive(Debug, Clone)]
pub enum TokenizeMode {
    Whitespace,
    Word,
    Regex(Regex),
}

/// Splits text into an array of tokens.
#[derive(Debug, Clone)]
pub struct TokenizerTransformer {
    mapping: ColumnMapping,
    mode: TokenizeMode,
    lowercase: bool,
}

impl TokenizerTransformer {
    pub fn new(mapping: ColumnMapping) -> Self {
        Self {
            mapping,
            mode: TokenizeMode::Word,
            lowercase: false,
        }
    }

    pub fn mode(mut self, mode: TokenizeMode) -> Self {
        self.mode = mode;
        self
    }

    /// Tokenise with a custom pattern; every match is a token.
    pub fn pattern(self, pattern: &str) -> anyhow::Result<Self> {
        let re = Regex::new(pattern).with_context(|| format!("Invalid token pattern `{pattern}`"))?;
        Ok(self.mode(TokenizeMode::Regex(re)))
    }

    pub fn lowercase(mut self, lowercase: bool) -> Self {
        self.lowercase = lowercase;
        self
    }

    pub fn tokenize(&self, text: &str) -> anyhow::Result<Vec<String>> {
        let text = if self.lowercase {
            text.to_lowercase()
        } else {
            text.to_string()
        };
        let tokens = match &self.mode {
            TokenizeMode::Whitespace => text.split_whitespace().map(String::from).collect(),
            TokenizeMode::Word => find_all(&WORD_RE, &text)?,
            TokenizeMode::Regex(re) => find_all(re, &text)?,
        };
        Ok(tokens)
    }
}

fn find_all(re: &Regex, text: &str) -> anyhow::Result<Vec<String>> {
    re.find_iter(text)
        .map(|m| Ok(m?.as_str().to_string()))
        .filter(|t: &anyhow::Result<String>| t.as_ref().map(|t| !t.is_empty()).unwrap_or(true))
        .collect()
}

impl Transformer for TokenizerTransformer {
    fn name(&self) -> String {
        String::from("TokenizerTransformer")
    }

    fn transform(&self, example: Example) -> anyhow::Result<Example> {
        self.mapping.apply(example, |v| match v {
            Value::String(s) => Ok(Value::from(self.tokenize(s)?)),
            other => Ok(other.clone()),
        })
    }
}

/// Drops stop words from token arrays or whitespace-separated strings.
#[derive(Debug, Clone)]
pub struct StopWordsRemoverTransformer {
    mapping: ColumnMapping,
    extra: WordSet,
    keep: WordSet,
    case_sensitive: bool,
}

/// Words as given plus their lower-cased forms, so matching works whichever
/// case mode is chosen afterwards.
#[derive(Debug, Clone, Default)]
struct WordSet {
    exact: HashSet<String>,
    lower: HashSet<String>,
}

impl WordSet {
    fn extend(&mut self, words: &[&str]) {
        for word in words {
            self.exact.insert(word.to_string());
            self.lower.insert(word.to_lowercase());
        }
    }

    fn contains(&self, word: &str, case_sensitive: bool) -> bool {
        if case_sensitive {
            self.exact.contains(word)
        } else {
            self.lower.contains(word)
        }
    }
}

impl StopWordsRemoverTransformer {
    pub fn new(column: &str, target_column: Option<&str>) -> Self {
        Self {
            mapping: ColumnMapping::single(column, target_column),
            extra: WordSet::default(),
            keep: WordSet::default(),
            case_sensitive: false,
        }
    }

    /// Additional words to treat as stop words.
    pub fn extra_stop_words(mut self, words: &[&str]) -> Self {
        self.extra.extend(words);
        self
    }

    /// Built-in stop words that should be kept.
    pub fn keep_words(mut self, words: &[&str]) -> Self {
        self.keep.extend(words);
        self
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn is_stop_word(&self, word: &str) -> bool {
        let key = if self.case_sensitive {
            word.to_string()
        } else {
            word.to_lowercase()
        };
        if self.keep.contains(&key, self.case_sensitive) {
            return false;
        }
        STOP_WORDS.contains(key.as_str()) || self.extra.contains(&key, self.case_sensitive)
    }

    fn filter_value(&self, value: &Value) -> Value {
        match value {
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .filter(|item| item.as_str().map(|w| !self.is_stop_word(w)).unwrap_or(true))
                    .cloned()
                    .collect(),
            ),
            Value::String(s) => Value::String(
                s.split_whitespace()
                    .filter(|w| !self.is_stop_word(w))
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            other => other.clone(),
        }
    }
}

impl Transformer for StopWordsRemoverTransformer {
    fn name(&self) -> String {
        String::from("StopWordsRemoverTransformer")
    }

    fn transform(&self, example: Example) -> anyhow::Result<Example> {
        self.mapping.apply(example, |v| Ok(self.filter_value(v)))
    }
}

/// Reduces words to their Porter stems.
#[derive(Debug, Clone)]
pub struct TextStemmerTransformer {
    mapping: ColumnMapping,
}

impl TextStemmerTransformer {
    pub fn new(mapping: ColumnMapping) -> Self {
        Self { mapping }
    }
}

impl Transformer for TextStemmerTransformer {
    fn name(&self) -> String {
        String::from("TextStemmerTransformer")
    }

    fn transform(&self, example: Example) -> anyhow::Result<Example> {
        self.mapping
            .apply(example, |v| Ok(map_words(v, |w| porter::stem(&w.to_lowercase()))))
    }
}

/// Dictionary and rule based lemmatisation.
#[derive(Debug, Clone)]
pub struct TextLemmatizerTransformer {
    mapping: ColumnMapping,
}

impl TextLemmatizerTransformer {
    pub fn new(mapping: ColumnMapping) -> Self {
        Self { mapping }
    }

    pub fn lemmatize(word: &str) -> String {
        let lower = word.to_lowercase();
        if let Some(lemma) = IRREGULAR_LEMMAS.get(lower.as_str()) {
            return lemma.to_string();
        }
        if STOP_WORDS.contains(lower.as_str()) || lower.ends_with("ss") || lower.ends_with("us") {
            return lower;
        }
        if NON_INFLECTED.contains(lower.as_str()) {
            return lower;
        }
        if let Some(base) = verb_base(&lower) {
            return base;
        }
        for (suffix, replacement, min_stem) in LEMMA_RULES {
            if let Some(stem) = lower.strip_suffix(suffix) {
                if stem.chars().count() >= *min_stem {
                    return format!("{stem}{replacement}");
                }
            }
        }
        lower
    }
}

fn is_consonant(w: &[u8], i: usize) -> bool {
    match w[i] {
        b'a' | b'e' | b'i' | b'o' | b'u' => false,
        b'y' => i == 0 || !is_consonant(w, i - 1),
        _ => true,
    }
}

/// Number of vowel-consonant sequences.
fn measure(w: &[u8]) -> usize {
    (1..w.len())
        .filter(|&i| !is_consonant(w, i - 1) && is_consonant(w, i))
        .count()
}

/// Ends consonant-vowel-consonant with the last not w, x or y.
fn ends_cvc(w: &[u8]) -> bool {
    let n = w.len();
    n >= 3
        && is_consonant(w, n - 1)
        && !is_consonant(w, n - 2)
        && is_consonant(w, n - 3)
        && !matches!(w[n - 1], b'w' | b'x' | b'y')
}

/// Base form of a regular -ing / -ed verb: undoubles a final consonant
/// (running -> run), restores a silent e (making -> make) and turns -ied
/// into -y (tried -> try).
fn verb_base(word: &str) -> Option<String> {
    if !word.bytes().all(|b| b.is_ascii_lowercase()) {
        return None;
    }
    let (stem, suffix) = match (word.strip_suffix("ing"), word.strip_suffix("ed")) {
        (Some(stem), _) => (stem, "ing"),
        (None, Some(stem)) => (stem, "ed"),
        _ => return None,
    };
    let w = stem.as_bytes();
    if w.len() < VERB_MIN_STEM || !(0..w.len()).any(|i| !is_consonant(w, i)) {
        return None;
    }
    if suffix == "ed" && stem.ends_with('i') {
        return Some(format!("{}y", &stem[..stem.len() - 1]));
    }
    let n = w.len();
    if n >= 4
        && w[n - 1] == w[n - 2]
        && is_consonant(w, n - 1)
        && !matches!(w[n - 1], b'l' | b's' | b'z')
    {
        return Some(stem[..n - 1].to_string());
    }
    if measure(w) == 1 && ends_cvc(w) {
        return Some(format!("{stem}e"));
    }
    Some(stem.to_string())
}

impl Transformer for TextLemmatizerTransformer {
    fn name(&self) -> String {
        String::from("TextLemmatizerTransformer")
    }

    fn transform(&self, example: Example) -> anyhow::Result<Example> {
        self.mapping
            .apply(example, |v| Ok(map_words(v, Self::lemmatize)))
    }
}
