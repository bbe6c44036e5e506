//! Composite Scoring
//!
//! Weighted 0-100 scores assembled from independently normalized signals.
//!
//! - [`composite`]: weight redistribution and sigmoid normalization
//! - [`sentiment`]: a fear/greed style market composite built on top

pub mod composite;
pub mod sentiment;

pub use composite::{
    sigmoid_normalize, weighted_average, CompositeComponent, CompositeScore, NEUTRAL_SCORE,
};
pub use sentiment::{SentimentComposite, SentimentInputs, SentimentLevel, SentimentReading};
