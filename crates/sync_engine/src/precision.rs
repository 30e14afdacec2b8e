//! Platform time precision check.

use contracts::{Clock, ContractError};

/// Smallest time step every timestamp must resolve.
pub const REQUIRED_RESOLUTION_S: f64 = 1e-6;

/// Verify that the current epoch time stored as `f64` still resolves one microsecond.
///
/// A platform that cannot would silently corrupt every sample timestamp, so
/// callers treat failure as fatal before any sensor is created.
pub fn ensure_time_precision(clock: &dyn Clock) -> Result<(), ContractError> {
    let now = clock.now();
    check_resolution(now)?;
    tracing::debug!(now, "time precision verified");
    Ok(())
}

fn check_resolution(now: f64) -> Result<(), ContractError> {
    if !now.is_finite() {
        return Err(ContractError::Precision {
            message: format!("clock reading {now} is not finite"),
        });
    }

    let step = (now + REQUIRED_RESOLUTION_S) - now;
    if step <= 0.0 || (step - REQUIRED_RESOLUTION_S).abs() > REQUIRED_RESOLUTION_S / 2.0 {
        return Err(ContractError::Precision {
            message: format!(
                "time {now} cannot resolve {REQUIRED_RESOLUTION_S}s (observed step {step})"
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ManualClock, SystemClock};

    #[test]
    fn test_system_clock_has_precision() {
        assert!(ensure_time_precision(&SystemClock).is_ok());
    }

    #[test]
    fn test_far_future_time_lacks_precision() {
        let clock = ManualClock::new(1e12);
        let err = ensure_time_precision(&clock).unwrap_err();
        assert!(matches!(err, ContractError::Precision { .. }));
    }

    #[test]
    fn test_non_finite_time_rejected() {
        assert!(check_resolution(f64::NAN).is_err());
    }
}
