use std::collections::HashSet;
use std::fmt;

use rand::Rng;

use crate::error::{AppError, AppResult};

/// The 6-digit code a new member enters at sign-up to join a branch
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct JoinCode(String);

impl JoinCode {
    pub const LENGTH: usize = 6;

    /// Validates user input; surrounding whitespace is ignored.
    pub fn parse(code: &str) -> AppResult<Self> {
        let code = code.trim();
        if code.len() == Self::LENGTH && code.chars().all(|c| c.is_ascii_digit()) {
            Ok(JoinCode(code.to_owned()))
        } else {
            Err(AppError::validation("Join code must be exactly 6 digits"))
        }
    }

    pub fn random(rng: &mut impl Rng) -> Self {
        JoinCode(rng.gen_range(100_000..=999_999u32).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A fixed budget of join code draws, shared by every collision a single
/// branch creation runs into: codes already in use and codes lost to a
/// concurrent insert both spend from it.
#[derive(Debug)]
pub struct JoinCodeDraws {
    limit: usize,
    used: usize,
}

impl JoinCodeDraws {
    pub fn new(limit: usize) -> Self {
        Self { limit, used: 0 }
    }

    pub fn used(&self) -> usize {
        self.used
    }

    /// Draws codes until one is not in `taken`, failing once the budget is spent.
    pub fn next_unused(
        &mut self,
        taken: &HashSet<JoinCode>,
        mut draw: impl FnMut() -> JoinCode,
    ) -> AppResult<JoinCode> {
        while self.used < self.limit {
            self.used += 1;
            let candidate = draw();
            if !taken.contains(&candidate) {
                return Ok(candidate);
            }
            tracing::debug!(attempt = self.used, "join code collision, drawing again");
        }

        Err(AppError::conflict(format!(
            "Could not generate a unique join code after {} attempts",
            self.limit
        )))
    }
}

impl fmt::Display for JoinCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn parse_accepts_only_six_digits() {
        assert_eq!(JoinCode::parse(" 482913 ").unwrap().as_str(), "482913");
        assert!(JoinCode::parse("48291").is_err());
        assert!(JoinCode::parse("4829134").is_err());
        assert!(JoinCode::parse("48a913").is_err());
    }

    #[test]
    fn random_codes_are_six_digits() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let code = JoinCode::random(&mut rng);
            assert!(JoinCode::parse(code.as_str()).is_ok());
        }
    }

    #[test]
    fn collisions_are_redrawn() {
        let taken: HashSet<_> = [JoinCode("482913".to_owned())].into_iter().collect();
        let mut draws = vec!["482913", "482913", "120044"].into_iter();

        let code = JoinCodeDraws::new(10)
            .next_unused(&taken, || JoinCode(draws.next().unwrap().to_owned()))
            .unwrap();

        assert_eq!(code.as_str(), "120044");
    }

    #[test]
    fn generation_fails_once_attempts_run_out() {
        let taken: HashSet<_> = [JoinCode("482913".to_owned())].into_iter().collect();
        let mut draws = 0;

        let result = JoinCodeDraws::new(3).next_unused(&taken, || {
            draws += 1;
            JoinCode("482913".to_owned())
        });

        assert!(matches!(result, Err(AppError::Conflict(_))));
        assert_eq!(draws, 3);
    }

    #[test]
    fn insert_conflicts_spend_the_same_budget() {
        let mut taken: HashSet<_> = [JoinCode("482913".to_owned())].into_iter().collect();
        let mut sequence = vec!["482913", "120044", "120044", "555555"].into_iter();
        let mut drawn = 0;
        let mut draws = JoinCodeDraws::new(3);

        let first = draws
            .next_unused(&taken, || {
                drawn += 1;
                JoinCode(sequence.next().unwrap().to_owned())
            })
            .unwrap();
        assert_eq!(first.as_str(), "120044");

        // Another branch claimed it between the check and the insert.
        taken.insert(first);
        let second = draws.next_unused(&taken, || {
            drawn += 1;
            JoinCode(sequence.next().unwrap().to_owned())
        });

        assert!(matches!(second, Err(AppError::Conflict(_))));
        assert_eq!(drawn, 3);
        assert_eq!(draws.used(), 3);
    }
}
