// 🪪 Borrower-ID Generator
//
// Borrower codes look like "JD001": name initials + a 3-digit sequence.
// Uniqueness is only guaranteed inside one generator (one run); two runs
// against the same database rely on the UNIQUE constraint on borrower_code.

use chrono::Utc;
use std::collections::HashSet;

pub const MAX_SEQUENCE: u32 = 999;
const FALLBACK_INITIALS: &str = "BR";

pub struct BorrowerIdGenerator {
    seen: HashSet<String>,
}

impl BorrowerIdGenerator {
    pub fn new() -> Self {
        BorrowerIdGenerator {
            seen: HashSet::new(),
        }
    }

    /// Seed with codes that already exist (e.g. every borrower_code in the DB)
    pub fn with_existing<I, S>(existing: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        BorrowerIdGenerator {
            seen: existing.into_iter().map(Into::into).collect(),
        }
    }

    /// Mark an externally supplied code as taken
    pub fn reserve(&mut self, code: &str) -> bool {
        self.seen.insert(code.to_string())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Next free code for this name
    pub fn generate(&mut self, first_name: &str, last_name: &str) -> String {
        let prefix = initials(first_name, last_name);

        for seq in 1..=MAX_SEQUENCE {
            let candidate = format!("{}{:03}", prefix, seq);
            if self.seen.insert(candidate.clone()) {
                return candidate;
            }
        }

        // All 999 taken: timestamp suffix, bumped until unseen
        let mut stamp = Utc::now().timestamp_millis();
        loop {
            let candidate = format!("{}{}", prefix, stamp);
            if self.seen.insert(candidate.clone()) {
                return candidate;
            }
            stamp += 1;
        }
    }
}

impl Default for BorrowerIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Uppercase initials: first letter of each name, or the first two letters
/// of a lone name. Non-letters are ignored.
pub fn initials(first_name: &str, last_name: &str) -> String {
    let first_letters: Vec<char> = first_name.chars().filter(|c| c.is_alphabetic()).collect();
    let last_letter = last_name.chars().find(|c| c.is_alphabetic());

    let picked: Vec<char> = match (first_letters.first(), last_letter) {
        (Some(f), Some(l)) => vec![*f, l],
        (Some(_), None) => first_letters.iter().take(2).copied().collect(),
        (None, Some(l)) => vec![l],
        (None, None) => Vec::new(),
    };

    if picked.is_empty() {
        return FALLBACK_INITIALS.to_string();
    }

    picked.iter().flat_map(|c| c.to_uppercase()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initials() {
        assert_eq!(initials("Jane", "Doe"), "JD");
        assert_eq!(initials("mary", "nakato kizza"), "MN");
        assert_eq!(initials("Cher", ""), "CH");
        assert_eq!(initials("", ""), "BR");
        assert_eq!(initials("123", "456"), "BR");
        assert_eq!(initials("", "Okello"), "O");
    }

    #[test]
    fn test_sequence_probing() {
        let mut gen = BorrowerIdGenerator::new();

        assert_eq!(gen.generate("Jane", "Doe"), "JD001");
        assert_eq!(gen.generate("John", "Dube"), "JD002");
        assert_eq!(gen.generate("Alice", "Smith"), "AS001");
    }

    #[test]
    fn test_seeded_with_existing() {
        let mut gen = BorrowerIdGenerator::with_existing(vec!["JD001", "JD002"]);
        assert_eq!(gen.generate("Jane", "Doe"), "JD003");
    }

    #[test]
    fn test_reserved_codes_are_skipped() {
        let mut gen = BorrowerIdGenerator::new();
        assert!(gen.reserve("JD001"));
        assert!(!gen.reserve("JD001"));
        assert_eq!(gen.generate("Jane", "Doe"), "JD002");
    }

    #[test]
    fn test_timestamp_fallback_after_999() {
        let existing: Vec<String> = (1..=MAX_SEQUENCE).map(|n| format!("JD{:03}", n)).collect();
        let mut gen = BorrowerIdGenerator::with_existing(existing);

        let a = gen.generate("Jane", "Doe");
        let b = gen.generate("Jane", "Doe");

        assert!(a.starts_with("JD"));
        assert!(a.len() > 5);
        assert_ne!(a, b);
    }

    #[test]
    fn test_never_duplicates_within_a_run() {
        let mut gen = BorrowerIdGenerator::new();
        let mut produced = HashSet::new();

        for i in 0..2500 {
            let first = if i % 2 == 0 { "Jane" } else { "Joseph" };
            let code = gen.generate(first, "Doe");
            assert!(produced.insert(code), "duplicate at iteration {}", i);
        }

        assert_eq!(gen.len(), 2500);
    }
}
