use rand::Rng;
use serde::Serialize;

use fortuna_db::LedgerError;
use fortuna_db::models::PrizeKind;

/// One segment of the wheel. `value` is the payout in the unit implied by
/// `kind`: currency for money prizes, an attempt count for bonus segments,
/// a percentage for discounts, a token for the rest.
#[derive(Debug, Clone, Serialize)]
pub struct WheelPrize {
    pub segment: &'static str,
    pub title: &'static str,
    pub weight: u32,
    pub kind: PrizeKind,
    pub value: &'static str,
}

impl WheelPrize {
    pub fn bonus_attempts(&self) -> Option<i64> {
        match self.kind {
            PrizeKind::BonusAttempts => self.value.parse().ok(),
            _ => None,
        }
    }
}

/// The production table: nine segments, weights summing to 100.
pub const DEFAULT_WHEEL: &[WheelPrize] = &[
    WheelPrize { segment: "🍒", title: "10 in cash", weight: 15, kind: PrizeKind::Money, value: "10" },
    WheelPrize { segment: "🍋", title: "20 in cash", weight: 15, kind: PrizeKind::Money, value: "20" },
    WheelPrize { segment: "🍊", title: "1 free attempt", weight: 15, kind: PrizeKind::BonusAttempts, value: "1" },
    WheelPrize { segment: "🍇", title: "5 in cash", weight: 15, kind: PrizeKind::Money, value: "5" },
    WheelPrize { segment: "🍉", title: "A sweet treat", weight: 10, kind: PrizeKind::Other, value: "candy" },
    WheelPrize { segment: "💰", title: "100 in cash", weight: 5, kind: PrizeKind::Money, value: "100" },
    WheelPrize { segment: "🎁", title: "A gift", weight: 5, kind: PrizeKind::Other, value: "gift" },
    WheelPrize { segment: "⭐", title: "5 free attempts", weight: 10, kind: PrizeKind::BonusAttempts, value: "5" },
    WheelPrize { segment: "🍀", title: "10% off the next game", weight: 10, kind: PrizeKind::Discount, value: "10" },
];

/// Weighted selector over a fixed table. Selection probability of a
/// segment is `weight / sum(weights)`; the weights need not sum to
/// anything in particular. No shared state: drawing is a pure function of
/// the table and the RNG handed in.
#[derive(Debug, Clone)]
pub struct PrizeWheel {
    segments: Vec<WheelPrize>,
    total_weight: u64,
}

impl PrizeWheel {
    pub fn new(segments: Vec<WheelPrize>) -> Result<Self, LedgerError> {
        let total_weight: u64 = segments.iter().map(|s| u64::from(s.weight)).sum();
        if total_weight == 0 {
            return Err(LedgerError::invalid(
                "prize table must have a positive total weight",
            ));
        }
        Ok(Self {
            segments,
            total_weight,
        })
    }

    pub fn standard() -> Result<Self, LedgerError> {
        Self::new(DEFAULT_WHEEL.to_vec())
    }

    pub fn segments(&self) -> &[WheelPrize] {
        &self.segments
    }

    pub fn draw(&self) -> &WheelPrize {
        self.draw_with(&mut rand::rng())
    }

    pub fn draw_with<R: Rng + ?Sized>(&self, rng: &mut R) -> &WheelPrize {
        let mut roll = rng.random_range(0..self.total_weight);
        for segment in &self.segments {
            let weight = u64::from(segment.weight);
            if roll < weight {
                return segment;
            }
            roll -= weight;
        }
        // roll < total_weight, so the scan lands inside some segment; the
        // tail is unreachable but keeps the signature total.
        &self.segments[self.segments.len() - 1]
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn rejects_tables_without_weight() {
        assert!(matches!(
            PrizeWheel::new(Vec::new()),
            Err(LedgerError::InvalidArgument(_))
        ));

        let weightless = vec![WheelPrize {
            segment: "x",
            title: "nothing",
            weight: 0,
            kind: PrizeKind::Other,
            value: "none",
        }];
        assert!(matches!(
            PrizeWheel::new(weightless),
            Err(LedgerError::InvalidArgument(_))
        ));
    }

    #[test]
    fn bonus_attempts_only_on_attempt_segments() {
        let wheel = PrizeWheel::standard().unwrap();
        let bonuses: Vec<i64> = wheel
            .segments()
            .iter()
            .filter_map(WheelPrize::bonus_attempts)
            .collect();
        assert_eq!(bonuses, vec![1, 5]);
        assert!(wheel.segments()[0].bonus_attempts().is_none());
    }

    #[test]
    fn empirical_frequencies_track_weights() {
        let wheel = PrizeWheel::standard().unwrap();
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let trials = 10_000u32;

        let mut counts: HashMap<&str, u32> = HashMap::new();
        for _ in 0..trials {
            *counts.entry(wheel.draw_with(&mut rng).segment).or_default() += 1;
        }

        // Weights sum to 100, so each expected share is weight percent;
        // allow three percentage points either way.
        for segment in wheel.segments() {
            let observed = f64::from(*counts.get(segment.segment).unwrap_or(&0));
            let observed_pct = observed * 100.0 / f64::from(trials);
            let expected_pct = f64::from(segment.weight);
            assert!(
                (observed_pct - expected_pct).abs() <= 3.0,
                "segment {} drawn {observed_pct:.1}% of the time, expected about {expected_pct}%",
                segment.segment
            );
        }
    }

    #[test]
    fn single_segment_wheel_always_lands_on_it() {
        let wheel = PrizeWheel::new(vec![WheelPrize {
            segment: "⭐",
            title: "5 free attempts",
            weight: 7,
            kind: PrizeKind::BonusAttempts,
            value: "5",
        }])
        .unwrap();

        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            assert_eq!(wheel.draw_with(&mut rng).segment, "⭐");
        }
    }
}
