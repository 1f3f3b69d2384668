//! Property-based tests for the money and journal-fold invariants:
//! - Parsed amounts are always strictly positive at 4-digit scale
//! - Event formatting always yields exactly 2 fractional digits
//! - Folding a journal reconstructs the balance exactly

use proptest::prelude::*;
use rust_decimal::Decimal;
use wallet_engine::models::EntryType;
use wallet_engine::money;

/// Strategy for valid stored amounts: positive, at most 4 fractional digits.
fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (1u64..10_000_000_000u64).prop_map(|units| Decimal::new(units as i64, 4))
}

/// Strategy for a movement: credit or debit of a valid amount.
fn movement_strategy() -> impl Strategy<Value = (bool, Decimal)> {
    (any::<bool>(), amount_strategy())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_parse_amount_roundtrips_at_stored_scale(amount in amount_strategy()) {
        let parsed = money::parse_amount(&amount.to_string()).unwrap();
        prop_assert_eq!(parsed, amount);
        prop_assert_eq!(parsed.scale(), money::STORED_SCALE);
    }

    #[test]
    fn prop_parsed_amounts_are_strictly_positive(amount in amount_strategy()) {
        let parsed = money::parse_amount(&amount.to_string()).unwrap();
        prop_assert!(parsed > Decimal::ZERO);
    }

    #[test]
    fn prop_event_amount_has_two_fraction_digits(amount in amount_strategy()) {
        let formatted = money::event_amount(amount);
        let (_, fraction) = formatted.split_once('.').expect("missing fraction");
        prop_assert_eq!(fraction.len(), 2);
        prop_assert!(!formatted.starts_with('-'));
    }

    #[test]
    fn prop_negative_amounts_rejected(units in 1u64..10_000_000_000u64) {
        let negative = -Decimal::new(units as i64, 4);
        prop_assert!(money::parse_amount(&negative.to_string()).is_err());
    }

    /// Folding movements with the credit/debit direction of each entry type
    /// reconstructs the running balance exactly. Debits that would drive
    /// the balance negative are skipped, mirroring the engine's
    /// insufficient-funds rejection.
    #[test]
    fn prop_journal_fold_reconstructs_balance(movements in prop::collection::vec(movement_strategy(), 0..64)) {
        let mut balance = Decimal::ZERO;
        let mut journal: Vec<(EntryType, Decimal)> = Vec::new();

        for (credit, amount) in movements {
            if credit {
                balance += amount;
                journal.push((EntryType::Deposit, amount));
            } else if balance >= amount {
                balance -= amount;
                journal.push((EntryType::Withdrawal, amount));
            }
        }

        let folded = journal.iter().fold(Decimal::ZERO, |acc, (entry_type, amount)| {
            if entry_type.is_credit() {
                acc + amount
            } else {
                acc - amount
            }
        });

        prop_assert_eq!(folded, balance);
        prop_assert!(balance >= Decimal::ZERO);
    }
}
