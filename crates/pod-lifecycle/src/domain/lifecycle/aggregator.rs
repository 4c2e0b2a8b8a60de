//! Sums declared CPU and memory across a unit's containers.
//!
//! Quantities use the Kubernetes grammar (`250m`, `0.5`, `128Mi`, `1e3`, ...).
//! CPU is normalized to milli-units and memory to bytes, rounding fractional
//! results up the same way the API server's `MilliValue()`/`Value()` do.

use std::collections::BTreeMap;

use thiserror::Error;

use super::types::ContainerSpec;
use super::types::ResourceTotals;

pub const CPU: &str = "cpu";
pub const MEMORY: &str = "memory";

/// i128 holds at most 38 full decimal digits; lower digits are folded into the exponent.
const MAX_DIGITS: usize = 38;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuantityError {
    #[error("empty quantity")]
    Empty,
    #[error("invalid quantity `{0}`")]
    Invalid(String),
    #[error("negative quantity `{0}`")]
    Negative(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Suffix {
    /// Multiplier of `1024^n`.
    Binary(u32),
    /// Multiplier of `10^n`.
    Decimal(i32),
}

impl Suffix {
    fn parse(suffix: &str) -> Option<Self> {
        let suffix = match suffix {
            "" => Self::Decimal(0),
            "Ki" => Self::Binary(1),
            "Mi" => Self::Binary(2),
            "Gi" => Self::Binary(3),
            "Ti" => Self::Binary(4),
            "Pi" => Self::Binary(5),
            "Ei" => Self::Binary(6),
            "n" => Self::Decimal(-9),
            "u" => Self::Decimal(-6),
            "m" => Self::Decimal(-3),
            "k" => Self::Decimal(3),
            "M" => Self::Decimal(6),
            "G" => Self::Decimal(9),
            "T" => Self::Decimal(12),
            "P" => Self::Decimal(15),
            "E" => Self::Decimal(18),
            exponent => {
                let digits = exponent
                    .strip_prefix('e')
                    .or_else(|| exponent.strip_prefix('E'))?;
                Self::Decimal(digits.parse().ok()?)
            }
        };
        Some(suffix)
    }
}

/// Parses a CPU quantity into milli-units.
pub fn cpu_milli(quantity: &str) -> Result<u64, QuantityError> {
    scaled_value(quantity, 3)
}

/// Parses a memory quantity into bytes.
pub fn memory_bytes(quantity: &str) -> Result<u64, QuantityError> {
    scaled_value(quantity, 0)
}

/// Returns `ceil(quantity * 10^scale)`, saturating at `u64::MAX`.
fn scaled_value(quantity: &str, scale: i32) -> Result<u64, QuantityError> {
    let quantity = quantity.trim();
    if quantity.is_empty() {
        return Err(QuantityError::Empty);
    }
    let invalid = || QuantityError::Invalid(quantity.to_string());

    let (negative, unsigned) = match quantity.as_bytes()[0] {
        b'-' => (true, &quantity[1..]),
        b'+' => (false, &quantity[1..]),
        _ => (false, quantity),
    };

    let number_len = unsigned
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(unsigned.len());
    let (number, suffix) = unsigned.split_at(number_len);
    let suffix = Suffix::parse(suffix).ok_or_else(invalid)?;

    let (integer, fraction) = number.split_once('.').unwrap_or((number, ""));
    if (integer.is_empty() && fraction.is_empty()) || fraction.contains('.') {
        return Err(invalid());
    }

    let digits = format!("{integer}{fraction}");
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(0);
    }
    if negative {
        return Err(QuantityError::Negative(quantity.to_string()));
    }

    let (digits, dropped) = digits.split_at(digits.len().min(MAX_DIGITS));
    let mut mantissa: i128 = digits.parse().map_err(|_| invalid())?;
    // Bumping the truncated mantissa keeps the final ceil exact.
    if dropped.bytes().any(|b| b != b'0') {
        mantissa += 1;
    }
    let fraction_len = i32::try_from(fraction.len()).map_err(|_| invalid())?;
    let dropped_len = i32::try_from(dropped.len()).map_err(|_| invalid())?;
    let mut exponent = scale.saturating_sub(fraction_len).saturating_add(dropped_len);
    match suffix {
        Suffix::Binary(power) => match mantissa.checked_mul(1i128 << (10 * power)) {
            Some(scaled) => mantissa = scaled,
            None => return Ok(u64::MAX),
        },
        Suffix::Decimal(power) => exponent = exponent.saturating_add(power),
    }

    let value = apply_exponent(mantissa, exponent);
    Ok(u64::try_from(value).unwrap_or(u64::MAX))
}

/// `ceil(mantissa * 10^exponent)` for a positive mantissa, saturating.
fn apply_exponent(mantissa: i128, exponent: i32) -> i128 {
    if exponent >= 0 {
        let mut value = mantissa;
        for _ in 0..exponent {
            match value.checked_mul(10) {
                Some(next) => value = next,
                None => return i128::MAX,
            }
        }
        return value;
    }

    let mut divisor: i128 = 1;
    for _ in 0..exponent.unsigned_abs() {
        match divisor.checked_mul(10) {
            Some(next) => divisor = next,
            // divisor already exceeds any mantissa, so the result rounds up to 1
            None => return 1,
        }
    }
    let quotient = mantissa / divisor;
    if mantissa % divisor == 0 {
        quotient
    } else {
        quotient + 1
    }
}

fn declared(
    resources: &BTreeMap<String, String>,
    name: &str,
    parse: fn(&str) -> Result<u64, QuantityError>,
) -> u64 {
    resources
        .get(name)
        .and_then(|quantity| parse(quantity).ok())
        .unwrap_or(0)
}

/// Declared resources of a single container. Missing or unparsable declarations count as zero.
pub fn container_totals(container: &ContainerSpec) -> ResourceTotals {
    ResourceTotals {
        cpu_limit_milli: declared(&container.limits, CPU, cpu_milli),
        memory_limit_bytes: declared(&container.limits, MEMORY, memory_bytes),
        cpu_request_milli: declared(&container.requests, CPU, cpu_milli),
        memory_request_bytes: declared(&container.requests, MEMORY, memory_bytes),
    }
}

/// Elementwise sum of declared resources across `containers`.
pub fn aggregate(containers: &[ContainerSpec]) -> ResourceTotals {
    containers.iter().map(container_totals).sum()
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn cpu_quantities() {
        assert_eq!(cpu_milli("250m"), Ok(250));
        assert_eq!(cpu_milli("1"), Ok(1000));
        assert_eq!(cpu_milli("0.5"), Ok(500));
        assert_eq!(cpu_milli("1.5"), Ok(1500));
        assert_eq!(cpu_milli(".1"), Ok(100));
        assert_eq!(cpu_milli("2k"), Ok(2_000_000));
        assert_eq!(cpu_milli("1e3"), Ok(1_000_000));
        assert_eq!(cpu_milli("+3"), Ok(3000));
    }

    #[test]
    fn cpu_fractions_round_up() {
        assert_eq!(cpu_milli("100n"), Ok(1));
        assert_eq!(cpu_milli("1500u"), Ok(2));
        assert_eq!(cpu_milli("0.0001"), Ok(1));
        assert_eq!(cpu_milli("0"), Ok(0));
    }

    #[test]
    fn memory_quantities() {
        assert_eq!(memory_bytes("134217728"), Ok(134_217_728));
        assert_eq!(memory_bytes("128Mi"), Ok(134_217_728));
        assert_eq!(memory_bytes("1Gi"), Ok(1_073_741_824));
        assert_eq!(memory_bytes("1.5Gi"), Ok(1_610_612_736));
        assert_eq!(memory_bytes("1G"), Ok(1_000_000_000));
        assert_eq!(memory_bytes("128974848"), Ok(128_974_848));
        assert_eq!(memory_bytes("129e6"), Ok(129_000_000));
        assert_eq!(memory_bytes("123E-1"), Ok(13));
        assert_eq!(memory_bytes("1Ki"), Ok(1024));
    }

    #[test]
    fn memory_saturates() {
        assert_eq!(memory_bytes("100Ei"), Ok(u64::MAX));
        assert_eq!(memory_bytes("1e40"), Ok(u64::MAX));
    }

    #[test]
    fn long_quantities_saturate_like_exponents() {
        let spelled_out = format!("1{}", "0".repeat(40));
        assert_eq!(memory_bytes(&spelled_out), Ok(u64::MAX));
        assert_eq!(memory_bytes(&format!("{spelled_out}Ei")), Ok(u64::MAX));
        assert_eq!(
            aggregate(&[ContainerSpec::new("big").with_limit(MEMORY, &spelled_out)])
                .memory_limit_bytes,
            u64::MAX
        );
    }

    #[test]
    fn long_fractions_still_round_up() {
        let tiny = format!("0.{}1", "0".repeat(45));
        assert_eq!(memory_bytes(&tiny), Ok(1));

        let just_over_one = format!("1.{}1", "0".repeat(45));
        assert_eq!(memory_bytes(&just_over_one), Ok(2));

        let exact = format!("2.{}", "0".repeat(45));
        assert_eq!(memory_bytes(&exact), Ok(2));
    }

    #[test]
    fn invalid_quantities() {
        assert_eq!(cpu_milli(""), Err(QuantityError::Empty));
        assert_eq!(cpu_milli("abc"), Err(QuantityError::Invalid("abc".to_string())));
        assert_eq!(cpu_milli("1.2.3"), Err(QuantityError::Invalid("1.2.3".to_string())));
        assert_eq!(cpu_milli("5Qi"), Err(QuantityError::Invalid("5Qi".to_string())));
        assert_eq!(cpu_milli("."), Err(QuantityError::Invalid(".".to_string())));
        assert_eq!(cpu_milli("-1"), Err(QuantityError::Negative("-1".to_string())));
        assert_eq!(cpu_milli("-0"), Ok(0));
    }

    #[test]
    fn aggregate_empty_is_zero() {
        assert_eq!(aggregate(&[]), ResourceTotals::default());
    }

    #[test]
    fn aggregate_is_additive() {
        for n in 1..=4u64 {
            let containers: Vec<_> = (0..n)
                .map(|i| {
                    ContainerSpec::new(format!("c{i}"))
                        .with_limit(CPU, "500m")
                        .with_limit(MEMORY, "268435456")
                })
                .collect();

            let totals = aggregate(&containers);
            assert_eq!(totals.cpu_limit_milli, 500 * n);
            assert_eq!(totals.memory_limit_bytes, 268_435_456 * n);
            assert_eq!(totals.cpu_request_milli, 0);
            assert_eq!(totals.memory_request_bytes, 0);
        }
    }

    #[test]
    fn container_without_resources_contributes_zero() {
        assert_eq!(
            container_totals(&ContainerSpec::new("sidecar")),
            ResourceTotals::default()
        );
    }

    #[test]
    fn aggregate_mixes_limits_and_requests() {
        let containers = vec![
            ContainerSpec::new("main")
                .with_limit(CPU, "1")
                .with_limit(MEMORY, "1Gi")
                .with_request(CPU, "250m")
                .with_request(MEMORY, "256Mi"),
            ContainerSpec::new("sidecar")
                .with_request(CPU, "50m")
                .with_limit(MEMORY, "not-a-quantity"),
        ];

        assert_eq!(
            aggregate(&containers),
            ResourceTotals {
                cpu_limit_milli: 1000,
                memory_limit_bytes: 1_073_741_824,
                cpu_request_milli: 300,
                memory_request_bytes: 268_435_456,
            }
        );
    }
}
