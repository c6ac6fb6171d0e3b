pub mod normalize;
pub mod similarity;

pub use normalize::{normalize_name, normalize_optional, NormalizationProfile};
pub use similarity::{fuzzy_score, sales_person_similarity, similarity_breakdown};
