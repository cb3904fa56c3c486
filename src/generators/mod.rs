//! Synthetic data generators

pub mod base;

pub use base::{FieldSpec, RandomTextGenerator, TemplateSpec, TemplateTextGenerator, TextGenerator};
