//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (dependencies reference declared services)
//! - Validate value ranges (percentages, bucket counts, intervals)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use thiserror::Error;
use url::Url;

use crate::config::schema::GatewayConfig;

/// A single semantic problem found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("service '{0}' is declared more than once")]
    DuplicateService(String),

    #[error("service '{0}' has no instances")]
    NoInstances(String),

    #[error("service '{service}' has invalid instance url '{url}'")]
    InvalidInstanceUrl { service: String, url: String },

    #[error("service '{service}' depends on unknown service '{dependency}'")]
    UnknownDependency { service: String, dependency: String },

    #[error("service '{0}' depends on itself")]
    SelfDependency(String),

    #[error("invalid value for {field}: {reason}")]
    OutOfRange { field: &'static str, reason: String },

    #[error("event_bus.broker_url '{0}' is not a valid url")]
    InvalidBrokerUrl(String),
}

/// Validate a parsed configuration, collecting every problem.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let mut seen = HashSet::new();
    for service in &config.services {
        if !seen.insert(service.name.as_str()) {
            errors.push(ValidationError::DuplicateService(service.name.clone()));
        }
        if service.instances.is_empty() {
            errors.push(ValidationError::NoInstances(service.name.clone()));
        }
        for raw in &service.instances {
            let valid = Url::parse(raw)
                .map(|u| matches!(u.scheme(), "http" | "https") && u.host().is_some())
                .unwrap_or(false);
            if !valid {
                errors.push(ValidationError::InvalidInstanceUrl {
                    service: service.name.clone(),
                    url: raw.clone(),
                });
            }
        }
    }

    let names: HashSet<&str> = config.services.iter().map(|s| s.name.as_str()).collect();
    for service in &config.services {
        for dependency in &service.dependencies {
            if dependency == &service.name {
                errors.push(ValidationError::SelfDependency(service.name.clone()));
            } else if !names.contains(dependency.as_str()) {
                errors.push(ValidationError::UnknownDependency {
                    service: service.name.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
    }

    let breaker = &config.breaker;
    if breaker.error_threshold_percentage > 100 {
        errors.push(ValidationError::OutOfRange {
            field: "breaker.error_threshold_percentage",
            reason: "must be between 0 and 100".into(),
        });
    }
    if breaker.rolling_count_buckets == 0 {
        errors.push(ValidationError::OutOfRange {
            field: "breaker.rolling_count_buckets",
            reason: "must be greater than 0".into(),
        });
    } else if breaker.rolling_count_timeout_ms < u64::from(breaker.rolling_count_buckets) {
        errors.push(ValidationError::OutOfRange {
            field: "breaker.rolling_count_timeout_ms",
            reason: "must be at least one millisecond per bucket".into(),
        });
    }
    if breaker.capacity == 0 {
        errors.push(ValidationError::OutOfRange {
            field: "breaker.capacity",
            reason: "must be greater than 0".into(),
        });
    }
    if config.health_check.interval_secs == 0 {
        errors.push(ValidationError::OutOfRange {
            field: "health_check.interval_secs",
            reason: "must be greater than 0".into(),
        });
    }

    if config.event_bus.enabled
        && config.event_bus.broker_url != "memory://"
        && Url::parse(&config.event_bus.broker_url).is_err()
    {
        errors.push(ValidationError::InvalidBrokerUrl(
            config.event_bus.broker_url.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
