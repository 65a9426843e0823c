use crate::config::types::{CrawlOptions, RuleFile, UserAgents};
use crate::ConfigError;
use url::Url;

/// Validates a parsed rule file
pub fn validate(file: &RuleFile) -> Result<(), ConfigError> {
    validate_options(&file.options)?;
    validate_entry(file.entry.as_deref())?;

    if file.pages.is_empty() {
        return Err(ConfigError::Validation(
            "rule file must define at least one page".to_string(),
        ));
    }

    for (name, group) in &file.groups {
        if let Some(agents) = &group.user_agents {
            validate_user_agents(agents)
                .map_err(|e| ConfigError::Validation(format!("group '{}': {}", name, e)))?;
        }
        if group.cookie.as_deref().is_some_and(str::is_empty) {
            return Err(ConfigError::Validation(format!(
                "group '{}': cookie cannot be empty",
                name
            )));
        }
    }

    Ok(())
}

/// Validates crawl options
pub fn validate_options(options: &CrawlOptions) -> Result<(), ConfigError> {
    if options.total_concurrent < 1 {
        return Err(ConfigError::Validation(format!(
            "total-concurrent must be >= 1, got {}",
            options.total_concurrent
        )));
    }

    if options.poll_interval < 1 {
        return Err(ConfigError::Validation(format!(
            "poll-interval must be >= 1ms, got {}ms",
            options.poll_interval
        )));
    }

    if let Some(agents) = &options.user_agents {
        validate_user_agents(agents).map_err(ConfigError::Validation)?;
    }

    if options.entry_cookie.as_deref().is_some_and(str::is_empty) {
        return Err(ConfigError::Validation(
            "entry-cookie cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_user_agents(agents: &UserAgents) -> Result<(), String> {
    let agents = agents.to_vec();
    if agents.is_empty() {
        return Err("user-agents cannot be an empty list".to_string());
    }
    if agents.iter().any(|a| a.trim().is_empty()) {
        return Err("user-agents cannot contain empty strings".to_string());
    }
    Ok(())
}

fn validate_entry(entry: Option<&str>) -> Result<(), ConfigError> {
    let Some(entry) = entry else {
        return Ok(());
    };
    let url = Url::parse(entry)
        .map_err(|e| ConfigError::Validation(format!("Invalid entry URL '{}': {}", entry, e)))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "Entry URL '{}' must use http or https",
            entry
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_are_valid() {
        assert!(validate_options(&CrawlOptions::default()).is_ok());
    }

    #[test]
    fn test_zero_total_concurrent_rejected() {
        let options = CrawlOptions {
            total_concurrent: 0,
            ..Default::default()
        };
        let err = validate_options(&options).unwrap_err();
        assert!(err.to_string().contains("total-concurrent"));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let options = CrawlOptions {
            poll_interval: 0,
            ..Default::default()
        };
        assert!(validate_options(&options).is_err());
    }

    #[test]
    fn test_empty_user_agents_rejected() {
        let options = CrawlOptions {
            user_agents: Some(UserAgents::Many(vec![])),
            ..Default::default()
        };
        assert!(validate_options(&options).is_err());

        let options = CrawlOptions {
            user_agents: Some(UserAgents::One("  ".to_string())),
            ..Default::default()
        };
        assert!(validate_options(&options).is_err());
    }

    #[test]
    fn test_empty_entry_cookie_rejected() {
        let options = CrawlOptions {
            entry_cookie: Some(String::new()),
            ..Default::default()
        };
        assert!(validate_options(&options).is_err());
    }

    #[test]
    fn test_entry_scheme_checked() {
        assert!(validate_entry(Some("https://example.com/")).is_ok());
        assert!(validate_entry(Some("ftp://example.com/")).is_err());
        assert!(validate_entry(Some("not a url")).is_err());
        assert!(validate_entry(None).is_ok());
    }
}
