use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

/// Policy constants for the booking/payment core.
///
/// Fee percentages, payout thresholds and timing offsets are deployment
/// policy, not code; the engines receive this struct at construction and the
/// CLI can override the defaults from a JSON file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Platform cut applied to every payout, as a fraction (0.2 = 20%).
    pub system_fee_rate: Decimal,
    /// Flat fee charged by the transfer gateway per payout.
    pub gateway_fee: Decimal,
    /// Minimum available balance before a teacher is included in a payout batch.
    pub payout_threshold: Decimal,
    /// Minutes an unpaid booking may stay pending before the sweep expires it.
    pub booking_expiry_minutes: i64,
    /// Minutes before class start at which the reminder fires.
    pub reminder_lead_minutes: i64,
    /// Minutes before class end at which the participant check fires.
    pub class_end_check_minutes: i64,
    /// Interval between expiry sweep runs.
    pub expiry_sweep_interval_minutes: i64,
    /// Interval between payout batch runs.
    pub payout_batch_interval_minutes: i64,
    /// Job retry policy: attempts before a job is dead-lettered.
    pub job_max_attempts: u32,
    /// Job retry policy: base backoff in seconds, doubled per attempt.
    pub job_backoff_base_secs: i64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            system_fee_rate: dec!(0.20),
            gateway_fee: dec!(30),
            payout_threshold: dec!(500),
            booking_expiry_minutes: 30,
            reminder_lead_minutes: 15,
            class_end_check_minutes: 5,
            expiry_sweep_interval_minutes: 5,
            payout_batch_interval_minutes: 60 * 24,
            job_max_attempts: 5,
            job_backoff_base_secs: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = PolicyConfig::default();
        assert!(cfg.system_fee_rate > Decimal::ZERO && cfg.system_fee_rate < Decimal::ONE);
        assert!(cfg.payout_threshold > Decimal::ZERO);
        assert!(cfg.job_max_attempts > 0);
    }

    #[test]
    fn test_partial_override_from_json() {
        let cfg: PolicyConfig =
            serde_json::from_str(r#"{"payout_threshold": "1000", "job_max_attempts": 2}"#).unwrap();
        assert_eq!(cfg.payout_threshold, dec!(1000));
        assert_eq!(cfg.job_max_attempts, 2);
        // untouched fields keep their defaults
        assert_eq!(cfg.gateway_fee, dec!(30));
    }
}
