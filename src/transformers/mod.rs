//! Data transformers for preprocessing, cleaning, and augmenting datasets

pub mod base;
pub mod porter;
pub mod text;

pub use base::{ChainTransformer, ColumnMapping, ColumnTransformer, FunctionTransformer, Transformer};
pub use text::{
    StopWordsRemoverTransformer, TextCleanerTransformer, TextLemmatizerTransformer,
    TextStemmerTransformer, TokenizeMode, TokenizerTransformer,
};
