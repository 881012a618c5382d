use super::{ConfigError, OpsConfig};

/// Validate cross-field constraints that serde defaults cannot express.
pub fn validate_config(config: &OpsConfig) -> Result<(), ConfigError> {
    let confidence = config.decision.confidence_threshold;
    if !(0.0..=1.0).contains(&confidence) || !confidence.is_finite() {
        return Err(ConfigError::Invalid(format!(
            "decision.confidence_threshold must be within [0.0, 1.0], got {confidence}"
        )));
    }

    let variance = config.decision.miles_variance_threshold;
    if !variance.is_finite() || variance < 0.0 {
        return Err(ConfigError::Invalid(format!(
            "decision.miles_variance_threshold must be >= 0.0, got {variance}"
        )));
    }

    if config.telemetry.default_hours_back < 1 {
        return Err(ConfigError::Invalid(
            "telemetry.default_hours_back must be at least 1".to_string(),
        ));
    }

    if config.telemetry.max_events_per_tenant < 1 {
        return Err(ConfigError::Invalid(
            "telemetry.max_events_per_tenant must be at least 1".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OpsConfig;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&OpsConfig::default()).is_ok());
    }

    #[test]
    fn test_rejects_negative_variance_threshold() {
        let mut config = OpsConfig::default();
        config.decision.miles_variance_threshold = -0.1;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_rejects_zero_hours_back() {
        let mut config = OpsConfig::default();
        config.telemetry.default_hours_back = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Invalid(_))
        ));
    }
}
