// Weekly late-fee accrual on overdue principal

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

const SECONDS_PER_WEEK: i64 = 7 * 24 * 60 * 60;

/// Default surcharge per started week past due (5%).
pub const DEFAULT_WEEKLY_RATE: Decimal = dec!(0.05);

/// Computes accrued late fees. Pure: the caller supplies `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LateFeeCalculator {
    weekly_rate: Decimal,
}

impl LateFeeCalculator {
    pub fn new(weekly_rate: Decimal) -> Self {
        Self { weekly_rate }
    }

    /// Accrued fee for `outstanding` principal that fell due at `due_date`.
    ///
    /// `outstanding` must exclude any previously accrued fee so fees never
    /// compound on fees. Any time past due counts as a full first week.
    /// Returns `None` if the fee is not representable.
    pub fn compute(
        &self,
        due_date: Option<DateTime<Utc>>,
        outstanding: Decimal,
        now: DateTime<Utc>,
    ) -> Option<Decimal> {
        let Some(due_date) = due_date else {
            return Some(Decimal::ZERO);
        };
        if outstanding <= Decimal::ZERO || now <= due_date {
            return Some(Decimal::ZERO);
        }

        let elapsed = (now - due_date).num_seconds();
        let weeks_late = elapsed.div_euclid(SECONDS_PER_WEEK) + 1;

        outstanding
            .checked_mul(self.weekly_rate)?
            .checked_mul(Decimal::from(weeks_late))
            .map(|fee| fee.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
    }
}

impl Default for LateFeeCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_WEEKLY_RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn due() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()
    }

    #[test]
    fn no_fee_exactly_at_due_date() {
        let calc = LateFeeCalculator::default();
        assert_eq!(calc.compute(Some(due()), dec!(1000), due()), Some(Decimal::ZERO));
    }

    #[test]
    fn one_second_late_charges_a_full_week() {
        let calc = LateFeeCalculator::default();
        let fee = calc.compute(Some(due()), dec!(1000), due() + Duration::seconds(1));
        assert_eq!(fee, Some(dec!(50)));
    }

    #[test]
    fn eight_days_late_charges_two_weeks() {
        let calc = LateFeeCalculator::default();
        let fee = calc.compute(Some(due()), dec!(1000), due() + Duration::days(8));
        assert_eq!(fee, Some(dec!(100)));
    }

    #[test]
    fn six_days_late_is_still_one_week() {
        let calc = LateFeeCalculator::default();
        let fee = calc.compute(Some(due()), dec!(1000), due() + Duration::days(6));
        assert_eq!(fee, Some(dec!(50)));
    }

    #[test]
    fn settled_principal_accrues_nothing() {
        let calc = LateFeeCalculator::default();
        let later = due() + Duration::days(60);
        assert_eq!(calc.compute(Some(due()), Decimal::ZERO, later), Some(Decimal::ZERO));
        assert_eq!(calc.compute(Some(due()), dec!(-10), later), Some(Decimal::ZERO));
    }

    #[test]
    fn missing_due_date_accrues_nothing() {
        let calc = LateFeeCalculator::default();
        assert_eq!(calc.compute(None, dec!(1000), Utc::now()), Some(Decimal::ZERO));
    }

    #[test]
    fn fee_is_rounded_to_minor_units() {
        let calc = LateFeeCalculator::default();
        // 333.33 * 0.05 = 16.6665
        let fee = calc.compute(Some(due()), dec!(333.33), due() + Duration::hours(1));
        assert_eq!(fee, Some(dec!(16.67)));
    }

    #[test]
    fn custom_rate_is_honoured() {
        let calc = LateFeeCalculator::new(dec!(0.10));
        let fee = calc.compute(Some(due()), dec!(200), due() + Duration::days(15));
        // three started weeks at 10%
        assert_eq!(fee, Some(dec!(60)));
    }

    #[test]
    fn overflow_is_reported_not_panicked() {
        let calc = LateFeeCalculator::default();
        let later = due() + Duration::days(7000);
        assert_eq!(calc.compute(Some(due()), Decimal::MAX, later), None);
    }
}
