//! Market Sentiment Composite
//!
//! Live fear/greed style reading assembled from whichever market signals are
//! available. Each signal is normalized with its own calibrated steepness and
//! weighted; missing signals drop out and their weight is redistributed.

use serde::{Deserialize, Serialize};

use super::composite::{sigmoid_normalize, weighted_average, CompositeComponent};

/// Raw signals; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SentimentInputs {
    /// Current price and its 30-day average
    pub price: Option<(f64, f64)>,
    /// 24h volume and its average
    pub volume: Option<(f64, f64)>,
    /// Realized volatility and its average (higher reads as fear)
    pub volatility: Option<(f64, f64)>,
    /// Perpetual funding rate, zero-centred
    pub funding_rate: Option<f64>,
    /// Social or search interest and its average
    pub social_interest: Option<(f64, f64)>,
    /// External fear/greed reading already on 0-100
    pub fear_greed: Option<f64>,
}

/// Per-signal weight and sigmoid steepness
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentimentComposite {
    pub price_weight: f64,
    pub price_k: f64,
    pub volume_weight: f64,
    pub volume_k: f64,
    pub volatility_weight: f64,
    pub volatility_k: f64,
    pub funding_weight: f64,
    pub funding_k: f64,
    pub social_weight: f64,
    pub social_k: f64,
    pub fear_greed_weight: f64,
}

impl Default for SentimentComposite {
    fn default() -> Self {
        Self {
            // +/-10% from the 30-day average spans most of the curve
            price_weight: 0.25,
            price_k: 10.0,
            volume_weight: 0.15,
            volume_k: 2.0,
            volatility_weight: 0.20,
            volatility_k: 3.0,
            // Funding rates live around 1e-4 per interval
            funding_weight: 0.15,
            funding_k: 5000.0,
            social_weight: 0.10,
            social_k: 2.0,
            fear_greed_weight: 0.15,
        }
    }
}

/// Five-band classification of a 0-100 reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLevel {
    ExtremeFear,
    Fear,
    Neutral,
    Greed,
    ExtremeGreed,
}

impl SentimentLevel {
    pub fn from_score(score: f64) -> Self {
        if score < 25.0 {
            Self::ExtremeFear
        } else if score < 45.0 {
            Self::Fear
        } else if score <= 55.0 {
            Self::Neutral
        } else if score <= 75.0 {
            Self::Greed
        } else {
            Self::ExtremeGreed
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::ExtremeFear => "Extreme Fear",
            Self::Fear => "Fear",
            Self::Neutral => "Neutral",
            Self::Greed => "Greed",
            Self::ExtremeGreed => "Extreme Greed",
        }
    }
}

impl std::fmt::Display for SentimentLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Computed composite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentReading {
    pub score: f64,
    pub level: SentimentLevel,
    /// Signals that contributed
    pub components: Vec<CompositeComponent>,
}

impl SentimentComposite {
    /// Per-signal components for the present inputs
    pub fn components(&self, inputs: &SentimentInputs) -> Vec<CompositeComponent> {
        let mut components = Vec::with_capacity(6);

        if let Some((price, average)) = inputs.price {
            components.push(CompositeComponent::new(
                "price_momentum",
                sigmoid_normalize(price, average, self.price_k),
                self.price_weight,
            ));
        }
        if let Some((volume, average)) = inputs.volume {
            components.push(CompositeComponent::new(
                "volume",
                sigmoid_normalize(volume, average, self.volume_k),
                self.volume_weight,
            ));
        }
        if let Some((volatility, average)) = inputs.volatility {
            components.push(CompositeComponent::new(
                "volatility",
                100.0 - sigmoid_normalize(volatility, average, self.volatility_k),
                self.volatility_weight,
            ));
        }
        if let Some(rate) = inputs.funding_rate {
            components.push(CompositeComponent::new(
                "funding_rate",
                sigmoid_normalize(rate, 0.0, self.funding_k),
                self.funding_weight,
            ));
        }
        if let Some((interest, average)) = inputs.social_interest {
            components.push(CompositeComponent::new(
                "social_interest",
                sigmoid_normalize(interest, average, self.social_k),
                self.social_weight,
            ));
        }
        if let Some(reading) = inputs.fear_greed {
            components.push(CompositeComponent::new(
                "fear_greed_index",
                reading.clamp(0.0, 100.0),
                self.fear_greed_weight,
            ));
        }

        components
    }

    /// Weighted composite of the present inputs
    pub fn compute(&self, inputs: &SentimentInputs) -> SentimentReading {
        let components = self.components(inputs);
        let result = weighted_average(&components);
        let components = components
            .into_iter()
            .filter(|c| result.labels.contains(&c.label))
            .collect();

        SentimentReading {
            score: result.score,
            level: SentimentLevel::from_score(result.score),
            components,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
