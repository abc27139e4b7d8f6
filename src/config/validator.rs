//! Configuration validation

use super::*;
use anyhow::Result;
use std::collections::HashSet;

/// Validate complete configuration
pub fn validate_config(config: &HarnessConfig) -> Result<()> {
    validate_images(&config.images)?;
    validate_services(&config.services)?;
    validate_readiness(&config.readiness)?;
    validate_runner(&config.runner)?;

    Ok(())
}

/// Validate image pre-pull settings
pub fn validate_images(images: &ImageConfig) -> Result<()> {
    if images.pull_command.is_empty() {
        anyhow::bail!("images.pull_command must name a program");
    }
    if images.max_attempts == 0 {
        anyhow::bail!("images.max_attempts must be at least 1");
    }
    if let Some(empty) = images.list.iter().position(|i| i.trim().is_empty()) {
        anyhow::bail!("images.list[{}] is empty", empty);
    }

    Ok(())
}

/// Validate the service bundle
pub fn validate_services(services: &[ServiceConfig]) -> Result<()> {
    let mut names = HashSet::new();

    for (i, service) in services.iter().enumerate() {
        if service.name.trim().is_empty() {
            anyhow::bail!("services[{}] has no name", i);
        }
        if !names.insert(service.name.as_str()) {
            anyhow::bail!("duplicate service name: {}", service.name);
        }
        if service.binary.as_os_str().is_empty() {
            anyhow::bail!("service {} has no binary", service.name);
        }
        if service.health_addr.is_some() && service.startup_timeout_secs == 0 {
            anyhow::bail!("service {} has a health address but a zero startup timeout", service.name);
        }
    }

    Ok(())
}

/// Validate node readiness polling
pub fn validate_readiness(readiness: &ReadinessConfig) -> Result<()> {
    if readiness.timeout_secs == 0 {
        anyhow::bail!("readiness timeout must be at least 1s");
    }
    if readiness.poll_interval_ms == 0 {
        anyhow::bail!("readiness poll interval must be greater than zero");
    }
    if readiness.poll_interval() > readiness.timeout() {
        anyhow::bail!(
            "readiness poll interval ({:?}) exceeds the timeout ({:?})",
            readiness.poll_interval(),
            readiness.timeout()
        );
    }

    Ok(())
}

/// Validate spec commands
pub fn validate_runner(runner: &RunnerConfig) -> Result<()> {
    let mut names = HashSet::new();

    for spec in &runner.specs {
        if spec.command.is_empty() {
            anyhow::bail!("spec {} has an empty command", spec.name);
        }
        if !names.insert(spec.name.as_str()) {
            anyhow::bail!("duplicate spec name: {}", spec.name);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&HarnessConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_readiness() {
        let mut readiness = ReadinessConfig::default();
        assert!(validate_readiness(&readiness).is_ok());

        readiness.poll_interval_ms = 0;
        assert!(validate_readiness(&readiness).is_err());

        readiness.poll_interval_ms = 5000;
        readiness.timeout_secs = 2;
        assert!(validate_readiness(&readiness).is_err());

        readiness.timeout_secs = 0;
        assert!(validate_readiness(&readiness).is_err());
    }

    #[test]
    fn test_validate_services_duplicates() {
        let mut services = HarnessConfig::default().services;
        services.push(services[0].clone());
        let err = validate_services(&services).unwrap_err();
        assert!(err.to_string().contains("duplicate service name: etcd"));
    }

    #[test]
    fn test_validate_services_empty_binary() {
        let mut services = HarnessConfig::default().services;
        services[1].binary = PathBuf::new();
        assert!(validate_services(&services).is_err());
    }

    #[test]
    fn test_validate_images() {
        let mut images = ImageConfig::default();
        images.max_attempts = 0;
        assert!(validate_images(&images).is_err());

        let mut images = ImageConfig::default();
        images.pull_command.clear();
        assert!(validate_images(&images).is_err());

        let mut images = ImageConfig::default();
        images.list.push("  ".to_string());
        assert!(validate_images(&images).is_err());
    }

    #[test]
    fn test_validate_runner() {
        let runner = RunnerConfig {
            specs: vec![SpecCommand {
                name: "empty".to_string(),
                command: vec![],
            }],
        };
        assert!(validate_runner(&runner).is_err());
    }
}
