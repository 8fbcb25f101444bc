// 📈 Credit Score Heuristic
//
// score = 500 + amount delta + purpose delta + term delta + noise[-50, 50]
// clamped to [300, 850], then bucketed into six ratings.
//
// The noise term makes exact scores non-reproducible; tests seed the RNG
// or assert on bounds and bucket edges only.

use rand::Rng;
use serde::{Deserialize, Serialize};

pub const BASE_SCORE: i32 = 500;
pub const MIN_SCORE: i32 = 300;
pub const MAX_SCORE: i32 = 850;
pub const NOISE: i32 = 50;

/// (upper bound inclusive, delta)
const AMOUNT_BRACKETS: &[(f64, i32)] = &[
    (500_000.0, 50),
    (1_000_000.0, 30),
    (5_000_000.0, 0),
    (10_000_000.0, -30),
];
const AMOUNT_ABOVE_ALL: i32 = -60;

/// (upper bound inclusive in months, delta)
const TERM_BRACKETS: &[(u32, i32)] = &[(6, 30), (12, 15), (24, 0)];
const TERM_ABOVE_ALL: i32 = -25;

/// First matching keyword group wins
const PURPOSE_KEYWORDS: &[(&[&str], i32)] = &[
    (&["business", "trade", "retail", "shop", "stock"], 40),
    (&["agricultur", "farm", "livestock", "poultry"], 20),
    (&["school", "education", "fees", "tuition", "medical", "health", "hospital"], 10),
    (&["wedding", "party", "celebration", "personal", "consumption"], -20),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CreditRating {
    VeryPoor,
    Poor,
    Fair,
    Good,
    VeryGood,
    Excellent,
}

impl CreditRating {
    pub fn from_score(score: i32) -> Self {
        match score {
            s if s >= 800 => CreditRating::Excellent,
            s if s >= 740 => CreditRating::VeryGood,
            s if s >= 670 => CreditRating::Good,
            s if s >= 580 => CreditRating::Fair,
            s if s >= 450 => CreditRating::Poor,
            _ => CreditRating::VeryPoor,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CreditRating::Excellent => "Excellent",
            CreditRating::VeryGood => "Very Good",
            CreditRating::Good => "Good",
            CreditRating::Fair => "Fair",
            CreditRating::Poor => "Poor",
            CreditRating::VeryPoor => "Very Poor",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CreditScore {
    pub score: i32,
    pub rating: CreditRating,
}

impl CreditScore {
    /// Clamp a raw score into [MIN_SCORE, MAX_SCORE] and rate it
    pub fn from_raw(raw: i32) -> Self {
        let score = raw.clamp(MIN_SCORE, MAX_SCORE);
        CreditScore {
            score,
            rating: CreditRating::from_score(score),
        }
    }
}

/// Inputs the heuristic looks at
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditRequest {
    pub amount: f64,
    pub purpose: String,
    pub term_months: u32,
}

impl CreditRequest {
    pub fn new(amount: f64, purpose: &str, term_months: u32) -> Self {
        CreditRequest {
            amount,
            purpose: purpose.to_string(),
            term_months,
        }
    }

    pub fn amount_delta(&self) -> i32 {
        AMOUNT_BRACKETS
            .iter()
            .find(|(limit, _)| self.amount <= *limit)
            .map(|(_, delta)| *delta)
            .unwrap_or(AMOUNT_ABOVE_ALL)
    }

    pub fn purpose_delta(&self) -> i32 {
        let purpose = self.purpose.to_lowercase();
        PURPOSE_KEYWORDS
            .iter()
            .find(|(keywords, _)| keywords.iter().any(|k| purpose.contains(k)))
            .map(|(_, delta)| *delta)
            .unwrap_or(0)
    }

    pub fn term_delta(&self) -> i32 {
        TERM_BRACKETS
            .iter()
            .find(|(limit, _)| self.term_months <= *limit)
            .map(|(_, delta)| *delta)
            .unwrap_or(TERM_ABOVE_ALL)
    }

    /// Deterministic part of the score (no noise, no clamp)
    pub fn base_score(&self) -> i32 {
        BASE_SCORE + self.amount_delta() + self.purpose_delta() + self.term_delta()
    }

    pub fn score_with<R: Rng>(&self, rng: &mut R) -> CreditScore {
        let noise = rng.gen_range(-NOISE..=NOISE);
        CreditScore::from_raw(self.base_score() + noise)
    }

    pub fn score(&self) -> CreditScore {
        self.score_with(&mut rand::thread_rng())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_base_score_deltas() {
        // small business loan, short term: 500 + 50 + 40 + 30
        let req = CreditRequest::new(300_000.0, "Retail shop stock", 6);
        assert_eq!(req.base_score(), 620);

        // large wedding loan, long term: 500 - 60 - 20 - 25
        let req = CreditRequest::new(20_000_000.0, "Wedding", 36);
        assert_eq!(req.base_score(), 395);

        // unknown purpose contributes nothing
        let req = CreditRequest::new(2_000_000.0, "misc", 18);
        assert_eq!(req.base_score(), 500);
    }

    #[test]
    fn test_bracket_edges_are_inclusive() {
        assert_eq!(CreditRequest::new(500_000.0, "", 6).amount_delta(), 50);
        assert_eq!(CreditRequest::new(500_001.0, "", 6).amount_delta(), 30);
        assert_eq!(CreditRequest::new(1.0, "", 12).term_delta(), 15);
        assert_eq!(CreditRequest::new(1.0, "", 13).term_delta(), 0);
        assert_eq!(CreditRequest::new(1.0, "", 25).term_delta(), -25);
    }

    #[test]
    fn test_score_stays_within_noise_band() {
        let req = CreditRequest::new(2_000_000.0, "School fees", 12);
        let base = req.base_score();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..1000 {
            let s = req.score_with(&mut rng);
            assert!(s.score >= base - NOISE && s.score <= base + NOISE);
            assert_eq!(s.rating, CreditRating::from_score(s.score));
        }
    }

    #[test]
    fn test_purpose_keyword_groups() {
        let delta = |purpose: &str| CreditRequest::new(1.0, purpose, 12).purpose_delta();

        assert_eq!(delta("Retail expansion"), 40);
        assert_eq!(delta("Trade in maize"), 40);
        assert_eq!(delta("Farm inputs"), 20);
        assert_eq!(delta("Livestock"), 20);
        assert_eq!(delta("School fees"), 10);
        assert_eq!(delta("Medical bills"), 10);
        assert_eq!(delta("Celebration"), -20);
        assert_eq!(delta("WEDDING"), -20);
        assert_eq!(delta("roofing"), 0);
    }

    #[test]
    fn test_first_matching_group_wins() {
        // business (+40) is listed before farm (+20)
        let req = CreditRequest::new(1.0, "farming business", 12);
        assert_eq!(req.purpose_delta(), 40);
    }

    #[test]
    fn test_score_is_clamped() {
        let low = CreditScore::from_raw(120);
        assert_eq!(low.score, MIN_SCORE);
        assert_eq!(low.rating, CreditRating::VeryPoor);

        let high = CreditScore::from_raw(990);
        assert_eq!(high.score, MAX_SCORE);
        assert_eq!(high.rating, CreditRating::Excellent);

        assert_eq!(CreditScore::from_raw(MIN_SCORE).score, 300);
        assert_eq!(CreditScore::from_raw(MAX_SCORE).score, 850);
        assert_eq!(CreditScore::from_raw(612).score, 612);
    }

    #[test]
    fn test_scores_from_rng_stay_in_bounds() {
        let mut rng = StdRng::seed_from_u64(42);
        let worst = CreditRequest::new(50_000_000.0, "party", 60);
        let best = CreditRequest::new(100_000.0, "retail business", 3);

        for _ in 0..1000 {
            assert!((MIN_SCORE..=MAX_SCORE).contains(&worst.score_with(&mut rng).score));
            assert!((MIN_SCORE..=MAX_SCORE).contains(&best.score_with(&mut rng).score));
        }
    }

    #[test]
    fn test_rating_bucket_boundaries() {
        assert_eq!(CreditRating::from_score(850), CreditRating::Excellent);
        assert_eq!(CreditRating::from_score(800), CreditRating::Excellent);
        assert_eq!(CreditRating::from_score(799), CreditRating::VeryGood);
        assert_eq!(CreditRating::from_score(740), CreditRating::VeryGood);
        assert_eq!(CreditRating::from_score(739), CreditRating::Good);
        assert_eq!(CreditRating::from_score(670), CreditRating::Good);
        assert_eq!(CreditRating::from_score(669), CreditRating::Fair);
        assert_eq!(CreditRating::from_score(580), CreditRating::Fair);
        assert_eq!(CreditRating::from_score(579), CreditRating::Poor);
        assert_eq!(CreditRating::from_score(450), CreditRating::Poor);
        assert_eq!(CreditRating::from_score(449), CreditRating::VeryPoor);
        assert_eq!(CreditRating::from_score(300), CreditRating::VeryPoor);
    }

    #[test]
    fn test_ratings_are_ordered() {
        assert!(CreditRating::Excellent > CreditRating::VeryGood);
        assert!(CreditRating::Fair > CreditRating::Poor);
        assert_eq!(CreditRating::VeryGood.as_str(), "Very Good");
    }
}
