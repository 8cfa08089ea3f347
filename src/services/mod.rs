pub mod preferences;
pub mod ranking;
pub mod recommendations;

pub use preferences::PreferenceAggregator;
pub use ranking::ScoringWeights;
pub use recommendations::RecommendationService;
