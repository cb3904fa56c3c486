//! Synthetic text dataset generators

use crate::core::{Dataset, Example};
use anyhow::{anyhow, bail};
use fancy_regex::Regex;
use log::info;
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::{collections::HashMap, sync::LazyLock};

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{(\w+)\}").unwrap());

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// Produces examples one at a time; seeded generators are reproducible.
pub trait TextGenerator {
    fn name(&self) -> String;

    fn generate_example(&mut self, index: usize) -> anyhow::Result<Example>;

    fn generate(&mut self, num_examples: usize) -> anyhow::Result<Dataset> {
        let examples = (0..num_examples)
            .map(|idx| self.generate_example(idx))
            .collect::<anyhow::Result<Vec<_>>>()?;
        info!("{} generated {} examples", self.name(), examples.len());
        Ok(Dataset::new(examples))
    }
}

fn rng_from(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Generates texts of random pseudo-words.
#[derive(Debug, Clone)]
pub struct RandomTextGenerator {
    min_words: usize,
    max_words: usize,
    word_length_range: (usize, usize),
    include_punctuation: bool,
    categories: Vec<String>,
    include_metadata: bool,
    rng: StdRng,
}

impl RandomTextGenerator {
    pub fn new(min_words: usize, max_words: usize, seed: Option<u64>) -> anyhow::Result<Self> {
        if min_words == 0 || min_words > max_words {
            bail!("Invalid word count range {min_words}..={max_words}");
        }
        Ok(Self {
            min_words,
            max_words,
            word_length_range: (3, 10),
            include_punctuation: true,
            categories: vec![],
            include_metadata: false,
            rng: rng_from(seed),
        })
    }

    pub fn word_length_range(mut self, min: usize, max: usize) -> anyhow::Result<Self> {
        if min == 0 || min > max {
            bail!("Invalid word length range {min}..={max}");
        }
        self.word_length_range = (min, max);
        Ok(self)
    }

    pub fn include_punctuation(mut self, include: bool) -> Self {
        self.include_punctuation = include;
        self
    }

    pub fn categories(mut self, categories: &[&str]) -> Self {
        self.categories = categories.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn include_metadata(mut self, include: bool) -> Self {
        self.include_metadata = include;
        self
    }

    fn random_word(&mut self) -> String {
        let (min, max) = self.word_length_range;
        let len = self.rng.gen_range(min..=max);
        (0..len)
            .map(|_| LETTERS[self.rng.gen_range(0..LETTERS.len())] as char)
            .collect()
    }

    fn random_text(&mut self) -> (String, usize) {
        let num_words = self.rng.gen_range(self.min_words..=self.max_words);
        let words = (0..num_words).map(|_| self.random_word()).collect::<Vec<_>>();
        if !self.include_punctuation {
            return (words.join(" "), num_words);
        }

        let mut text = String::new();
        let mut sentence_left = self.rng.gen_range(5..=15_usize);
        let mut start_of_sentence = true;
        for (idx, word) in words.iter().enumerate() {
            if !text.is_empty() {
                text.push(' ');
            }
            if start_of_sentence {
                let mut chars = word.chars();
                if let Some(first) = chars.next() {
                    text.extend(first.to_uppercase());
                    text.push_str(chars.as_str());
                }
                start_of_sentence = false;
            } else {
                text.push_str(word);
            }

            sentence_left -= 1;
            let is_last = idx + 1 == num_words;
            if sentence_left == 0 || is_last {
                let terminal = match self.rng.gen_range(0..10) {
                    0 => '!',
                    1 => '?',
                    _ => '.',
                };
                text.push(terminal);
                start_of_sentence = true;
                sentence_left = self.rng.gen_range(5..=15);
            } else if self.rng.gen_bool(0.1) {
                text.push(',');
            }
        }
        (text, num_words)
    }
}

impl TextGenerator for RandomTextGenerator {
    fn name(&self) -> String {
        String::from("RandomTextGenerator")
    }

    fn generate_example(&mut self, index: usize) -> anyhow::Result<Example> {
        let (text, word_count) = self.random_text();
        let mut example = Example::new();
        example.insert("id".to_string(), json!(index));
        if self.include_metadata {
            example.insert(
                "metadata".to_string(),
                json!({
                    "word_count": word_count,
                    "char_count": text.chars().count(),
                    "generator": "random",
                }),
            );
        }
        example.insert("text".to_string(), Value::String(text));
        if let Some(category) = self.categories.choose(&mut self.rng) {
            example.insert("category".to_string(), Value::String(category.clone()));
        }
        Ok(example)
    }
}

type FieldFn = Box<dyn Fn(&mut StdRng) -> Value + Send + Sync>;

/// How the value of an extra column is produced.
pub enum FieldSpec {
    Choices(Vec<Value>),
    Constant(Value),
    Generator(FieldFn),
}

impl FieldSpec {
    pub fn generator<F>(f: F) -> Self
    where
        F: Fn(&mut StdRng) -> Value + Send + Sync + 'static,
    {
        FieldSpec::Generator(Box::new(f))
    }

    fn sample(&self, rng: &mut StdRng) -> Value {
        match self {
            FieldSpec::Choices(choices) => choices.choose(rng).cloned().unwrap_or(Value::Null),
            FieldSpec::Constant(value) => value.clone(),
            FieldSpec::Generator(f) => f(rng),
        }
    }
}

impl From<Value> for FieldSpec {
    /// Arrays become choice lists; anything else is a constant.
    fn from(value: Value) -> Self {
        match value {
            Value::Array(choices) => FieldSpec::Choices(choices),
            other => FieldSpec::Constant(other),
        }
    }
}

/// Template definition as read from a JSON or TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateSpec {
    pub templates: Vec<String>,
    pub variables: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Fills `{placeholder}` templates with randomly chosen variable values.
pub struct TemplateTextGenerator {
    templates: Vec<String>,
    variables: HashMap<String, Vec<String>>,
    fields: Vec<(String, FieldSpec)>,
    rng: StdRng,
}

impl TemplateTextGenerator {
    /// Every placeholder used in `templates` must have at least one value in
    /// `variables`.
    pub fn new(
        templates: Vec<String>,
        variables: HashMap<String, Vec<String>>,
        seed: Option<u64>,
    ) -> anyhow::Result<Self> {
        if templates.is_empty() {
            bail!("At least one template is required");
        }
        for template in templates.iter() {
            for name in placeholders(template)? {
                match variables.get(&name) {
                    Some(values) if !values.is_empty() => {}
                    Some(_) => bail!("Variable `{name}` has no values"),
                    None => bail!("Template `{template}` uses unknown variable `{name}`"),
                }
            }
        }
        Ok(Self {
            templates,
            variables,
            fields: vec![],
            rng: rng_from(seed),
        })
    }

    pub fn from_spec(spec: TemplateSpec) -> anyhow::Result<Self> {
        let generator = Self::new(spec.templates, spec.variables, spec.seed)?;
        Ok(spec
            .fields
            .into_iter()
            .fold(generator, |g, (name, value)| g.field(&name, FieldSpec::from(value))))
    }

    /// Adds an extra column; columns appear in the order they were added.
    pub fn field(mut self, name: &str, spec: FieldSpec) -> Self {
        self.fields.push((name.to_string(), spec));
        self
    }

    fn fill(&mut self, template: &str) -> anyhow::Result<String> {
        let mut out = String::with_capacity(template.len());
        let mut last = 0;
        for caps in PLACEHOLDER_RE.captures_iter(template) {
            let caps = caps?;
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let value = self
                .variables
                .get(name.as_str())
                .and_then(|values| values.choose(&mut self.rng))
                .ok_or_else(|| anyhow!("No value for variable `{}`", name.as_str()))?;
            out.push_str(&template[last..whole.start()]);
            out.push_str(value);
            last = whole.end();
        }
        out.push_str(&template[last..]);
        Ok(out)
    }
}

fn placeholders(template: &str) -> anyhow::Result<Vec<String>> {
    PLACEHOLDER_RE
        .captures_iter(template)
        .map(|caps| {
            let caps = caps?;
            Ok(caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default())
        })
        .collect()
}

impl TextGenerator for TemplateTextGenerator {
    fn name(&self) -> String {
        String::from("TemplateTextGenerator")
    }

    fn generate_example(&mut self, index: usize) -> anyhow::Result<Example> {
        let template_id = self.rng.gen_range(0..self.templates.len());
        let template = self.templates[template_id].clone();
        let text = self.fill(&template)?;

        let mut example = Example::new();
        example.insert("id".to_string(), json!(index));
        example.insert("text".to_string(), Value::String(text));
        example.insert("template_id".to_string(), json!(template_id));
        for (name, spec) in self.fields.iter() {
            example.insert(name.clone(), spec.sample(&mut self.rng));
        }
        Ok(example)
    }
}
