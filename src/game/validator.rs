//! Paddle input validation: per-player rate limiting and shape checks

use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;

use crate::session::SessionId;
use crate::util::rate_limit::PlayerRateLimiter;
use crate::ws::protocol::PlayerInput;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputRejection {
    #[error("input rate exceeded")]
    RateLimited,

    #[error("direction must be -1, 0 or 1")]
    BadDirection,

    #[error("input timestamp missing")]
    MissingTimestamp,

    #[error("input timestamp too far from server time")]
    SkewedTimestamp,
}

/// Rejects input bursts and malformed paddle commands.
///
/// Rejections are never reported back to the sender.
pub struct InputValidator {
    limiters: DashMap<SessionId, PlayerRateLimiter>,
    rate: u32,
    max_skew_ms: f64,
}

impl InputValidator {
    pub fn new(rate: u32, max_skew_ms: u64) -> Self {
        Self {
            limiters: DashMap::new(),
            rate,
            max_skew_ms: max_skew_ms as f64,
        }
    }

    /// Validate one control message and return the paddle direction
    pub fn validate(
        &self,
        session: SessionId,
        input: &PlayerInput,
        now_ms: u64,
    ) -> Result<i8, InputRejection> {
        let allowed = self
            .limiters
            .entry(session)
            .or_insert_with(|| PlayerRateLimiter::new(self.rate))
            .check();
        if !allowed {
            return Err(InputRejection::RateLimited);
        }

        let direction = input
            .direction
            .as_ref()
            .and_then(parse_direction)
            .ok_or(InputRejection::BadDirection)?;

        let timestamp = input.timestamp.ok_or(InputRejection::MissingTimestamp)?;
        if !timestamp.is_finite() || (now_ms as f64 - timestamp).abs() > self.max_skew_ms {
            return Err(InputRejection::SkewedTimestamp);
        }

        Ok(direction)
    }

    /// Forget a player's history once they leave for good
    pub fn clear(&self, session: SessionId) {
        self.limiters.remove(&session);
    }

    #[cfg(test)]
    pub fn tracked(&self) -> usize {
        self.limiters.len()
    }
}

fn parse_direction(value: &Value) -> Option<i8> {
    let raw = value.as_f64()?;
    if raw == -1.0 {
        Some(-1)
    } else if raw == 0.0 {
        Some(0)
    } else if raw == 1.0 {
        Some(1)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    const NOW: u64 = 1_700_000_000_000;

    fn input(direction: Value, timestamp: Option<f64>) -> PlayerInput {
        PlayerInput {
            kind: None,
            direction: Some(direction),
            timestamp,
        }
    }

    #[test]
    fn accepts_each_legal_direction() {
        let validator = InputValidator::new(100, 30_000);
        let id = Uuid::new_v4();
        for d in [-1, 0, 1] {
            assert_eq!(
                validator.validate(id, &input(json!(d), Some(NOW as f64)), NOW),
                Ok(d as i8)
            );
        }
    }

    #[test]
    fn rejects_out_of_range_direction() {
        let validator = InputValidator::new(100, 30_000);
        let id = Uuid::new_v4();
        for bad in [json!(2), json!(-1.5), json!("up"), json!(null)] {
            assert_eq!(
                validator.validate(id, &input(bad, Some(NOW as f64)), NOW),
                Err(InputRejection::BadDirection)
            );
        }
        let missing = PlayerInput {
            timestamp: Some(NOW as f64),
            ..PlayerInput::default()
        };
        assert_eq!(
            validator.validate(id, &missing, NOW),
            Err(InputRejection::BadDirection)
        );
    }

    #[test]
    fn rejects_missing_or_skewed_timestamps() {
        let validator = InputValidator::new(100, 30_000);
        let id = Uuid::new_v4();
        assert_eq!(
            validator.validate(id, &input(json!(1), None), NOW),
            Err(InputRejection::MissingTimestamp)
        );
        assert_eq!(
            validator.validate(id, &input(json!(1), Some((NOW - 60_000) as f64)), NOW),
            Err(InputRejection::SkewedTimestamp)
        );
        assert_eq!(
            validator.validate(id, &input(json!(1), Some(f64::INFINITY)), NOW),
            Err(InputRejection::SkewedTimestamp)
        );
        assert!(validator
            .validate(id, &input(json!(1), Some((NOW - 10_000) as f64)), NOW)
            .is_ok());
    }

    #[test]
    fn bursts_are_rate_limited_per_player() {
        let validator = InputValidator::new(30, 30_000);
        let greedy = Uuid::new_v4();
        let polite = Uuid::new_v4();
        let ok = input(json!(1), Some(NOW as f64));

        let accepted = (0..100)
            .filter(|_| validator.validate(greedy, &ok, NOW).is_ok())
            .count();
        assert_eq!(accepted, 30);
        assert_eq!(
            validator.validate(greedy, &ok, NOW),
            Err(InputRejection::RateLimited)
        );
        assert!(validator.validate(polite, &ok, NOW).is_ok());
    }

    #[test]
    fn clear_releases_player_state() {
        let validator = InputValidator::new(30, 30_000);
        let id = Uuid::new_v4();
        let _ = validator.validate(id, &input(json!(0), Some(NOW as f64)), NOW);
        assert_eq!(validator.tracked(), 1);

        validator.clear(id);
        assert_eq!(validator.tracked(), 0);
    }
}
