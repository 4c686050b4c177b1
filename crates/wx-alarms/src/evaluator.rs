//! Condition evaluation against an observation.
//!
//! Logical nodes short-circuit left to right. A change-detection node compares
//! the current reading with the alarm's stored baseline and then replaces the
//! baseline with the current reading, whatever the outcome. Change nodes on a
//! skipped branch are not visited, so their baselines stay as they were.

use std::collections::BTreeMap;

use crate::condition::{ChangeKind, Condition};
use crate::error::EvaluationError;
use crate::field::{Field, Observation};

/// Per-alarm change-detection baselines, keyed by field.
pub type PreviousValues = BTreeMap<Field, f64>;

/// Evaluates `condition` against `observation`, updating change baselines.
pub fn evaluate(
    condition: &Condition,
    observation: &Observation,
    previous: &mut PreviousValues,
) -> Result<bool, EvaluationError> {
    match condition {
        Condition::And(left, right) => {
            Ok(evaluate(left, observation, previous)? && evaluate(right, observation, previous)?)
        }
        Condition::Or(left, right) => {
            Ok(evaluate(left, observation, previous)? || evaluate(right, observation, previous)?)
        }
        Condition::Compare(c) => {
            let value = reading(observation, c.field)?;
            Ok(c.op.evaluate(value, c.threshold))
        }
        Condition::Change(c) => {
            let current = reading(observation, c.field)?;
            let changed = previous.get(&c.field).is_some_and(|&prev| match c.kind {
                ChangeKind::Any => (current - prev).abs() > 0.0,
                ChangeKind::Increase => current > prev,
                ChangeKind::Decrease => current < prev,
            });
            previous.insert(c.field, current);
            Ok(changed)
        }
    }
}

fn reading(observation: &Observation, field: Field) -> Result<f64, EvaluationError> {
    observation
        .get(field)
        .ok_or(EvaluationError::MissingField { field })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::parse;
    use chrono::Utc;

    fn obs(pairs: &[(Field, f64)]) -> Observation {
        pairs
            .iter()
            .fold(Observation::new(Utc::now()), |o, &(f, v)| o.with(f, v))
    }

    fn run(text: &str, values: &[f64], field: Field) -> Vec<bool> {
        let cond = parse(text).unwrap();
        let mut previous = PreviousValues::new();
        values
            .iter()
            .map(|&v| evaluate(&cond, &obs(&[(field, v)]), &mut previous).unwrap())
            .collect()
    }

    mod comparison_tests {
        use super::*;

        #[test]
        fn threshold_with_units() {
            let cond = parse("temperature > 85F").unwrap();
            let mut prev = PreviousValues::new();
            assert!(evaluate(&cond, &obs(&[(Field::Temperature, 30.0)]), &mut prev).unwrap());
            assert!(!evaluate(&cond, &obs(&[(Field::Temperature, 29.0)]), &mut prev).unwrap());
            assert!(prev.is_empty());
        }

        #[test]
        fn missing_field_is_an_error() {
            let cond = parse("humidity > 50").unwrap();
            let result = evaluate(&cond, &obs(&[(Field::Temperature, 20.0)]), &mut PreviousValues::new());
            assert_eq!(
                result,
                Err(EvaluationError::MissingField {
                    field: Field::Humidity
                })
            );
        }

        #[test]
        fn or_short_circuits_missing_field() {
            let cond = parse("temperature > 10 || humidity > 50").unwrap();
            let result = evaluate(&cond, &obs(&[(Field::Temperature, 20.0)]), &mut PreviousValues::new());
            assert_eq!(result, Ok(true));
        }
    }

    mod change_detection_tests {
        use super::*;
        use test_case::test_case;

        #[test]
        fn first_reading_only_records_baseline() {
            let cond = parse("*lightning_count").unwrap();
            let mut prev = PreviousValues::new();
            assert!(!evaluate(&cond, &obs(&[(Field::LightningCount, 4.0)]), &mut prev).unwrap());
            assert_eq!(prev.get(&Field::LightningCount), Some(&4.0));
        }

        #[test_case("*lightning_count", Field::LightningCount,
            &[0.0, 0.0, 1.0, 1.0, 3.0, 3.0, 2.0],
            &[false, false, true, false, true, false, true] ; "any change")]
        #[test_case(">rain_rate", Field::RainRate,
            &[0.0, 0.0, 0.5, 2.0, 2.0, 1.0, 3.0],
            &[false, false, true, true, false, false, true] ; "increase")]
        #[test_case("<lightning_distance", Field::LightningDistance,
            &[50.0, 50.0, 30.0, 10.0, 2.0, 5.0, 3.0],
            &[false, false, true, true, true, false, true] ; "decrease")]
        fn change_sequences(text: &str, field: Field, values: &[f64], expected: &[bool]) {
            assert_eq!(run(text, values, field), expected);
        }

        #[test]
        fn baseline_updates_even_when_false() {
            let cond = parse(">rain_rate").unwrap();
            let mut prev = PreviousValues::new();
            for v in [5.0, 3.0] {
                evaluate(&cond, &obs(&[(Field::RainRate, v)]), &mut prev).unwrap();
            }
            assert_eq!(prev.get(&Field::RainRate), Some(&3.0));
        }

        #[test]
        fn short_circuit_skips_right_baseline() {
            let cond = parse("temperature > 100 && *lightning_count").unwrap();
            let mut prev = PreviousValues::new();
            let reading = obs(&[(Field::Temperature, 20.0), (Field::LightningCount, 3.0)]);
            assert!(!evaluate(&cond, &reading, &mut prev).unwrap());
            assert!(!prev.contains_key(&Field::LightningCount));
        }

        #[test]
        fn or_true_left_skips_right_baseline() {
            let cond = parse("temperature > 0 || >rain_rate").unwrap();
            let mut prev = PreviousValues::new();
            let reading = obs(&[(Field::Temperature, 20.0), (Field::RainRate, 1.0)]);
            assert!(evaluate(&cond, &reading, &mut prev).unwrap());
            assert!(prev.is_empty());
        }

        #[test]
        fn shared_field_baseline_across_nodes() {
            let cond = parse("*lux || >lux").unwrap();
            let mut prev = PreviousValues::new();
            assert!(!evaluate(&cond, &obs(&[(Field::Lux, 10.0)]), &mut prev).unwrap());
            assert!(evaluate(&cond, &obs(&[(Field::Lux, 20.0)]), &mut prev).unwrap());
            assert_eq!(prev.get(&Field::Lux), Some(&20.0));
        }
    }
}
