//! Dataset splitters for dividing datasets into train, validation, and test sets

pub mod base;

pub use base::{
    CustomSplitter, GroupSplitter, RandomSplitter, Split, SplitRatios, Splits, Splitter,
    StratifiedSplitter, TimeSplitter,
};
