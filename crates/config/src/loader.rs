use std::{path::Path, sync::LazyLock};

use anyhow::bail;
use indoc::indoc;
use regex::Regex;
use serde::Deserialize;
use toml::Value;

use crate::Config;

static ENV_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*env\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("env reference pattern is valid")
});

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read configuration from {}: {e}", path.display()))?;

    let mut raw_config: Value = toml::from_str(&content)?;
    expand_env_references(&mut raw_config)?;

    let config = Config::deserialize(raw_config)?;
    validate(&config)?;

    Ok(config)
}

/// Replaces `{{ env.VAR }}` occurrences in every string value with the
/// environment variable's content. A reference to an unset variable is a
/// hard error so secrets never silently degrade to an empty string.
fn expand_env_references(value: &mut Value) -> anyhow::Result<()> {
    match value {
        Value::String(s) => {
            if !s.contains("{{") {
                return Ok(());
            }

            let mut expanded = String::with_capacity(s.len());
            let mut last = 0;

            for capture in ENV_REFERENCE.captures_iter(s) {
                let whole = capture.get(0).expect("capture 0 always present");
                let name = &capture[1];

                let Ok(var) = std::env::var(name) else {
                    bail!("environment variable '{name}' referenced in configuration is not set");
                };

                expanded.push_str(&s[last..whole.start()]);
                expanded.push_str(&var);
                last = whole.end();
            }

            expanded.push_str(&s[last..]);
            *s = expanded;
        }
        Value::Array(values) => {
            for value in values {
                expand_env_references(value)?;
            }
        }
        Value::Table(map) => {
            for (_, value) in map.iter_mut() {
                expand_env_references(value)?;
            }
        }
        Value::Integer(_) | Value::Float(_) | Value::Boolean(_) | Value::Datetime(_) => (),
    }

    Ok(())
}

pub(crate) fn validate(config: &Config) -> anyhow::Result<()> {
    if config.providers.is_empty() {
        bail!(indoc! {r#"
            No model providers configured. Relay requires at least one provider to execute runs.

            Example configuration:

              [providers.openai]
              type = "openai"
              api_key = "{{ env.OPENAI_API_KEY }}"
        "#});
    }

    if config.signing.secret.is_none() {
        bail!(indoc! {r#"
            No feedback token signing secret configured. Set one under [signing]:

              [signing]
              secret = "{{ env.RELAY_SIGNING_SECRET }}"
        "#});
    }

    if config.store.path.as_os_str().is_empty() {
        bail!(indoc! {r#"
            No run store path configured. Set one under [store]:

              [store]
              path = "/var/lib/relay"
        "#});
    }

    if config.tools.search_api_key.is_some() && config.tools.search_engine_id.is_none() {
        bail!("tools.search_api_key is set but tools.search_engine_id is missing");
    }

    for (tenant_name, tenant) in &config.tenants {
        let referenced = tenant
            .fallback_order
            .iter()
            .chain(tenant.allowed_providers.iter().flatten());

        for provider in referenced {
            if !config.providers.contains_key(provider) {
                bail!("tenant '{tenant_name}' references unknown provider '{provider}'");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use insta::assert_snapshot;
    use serde::Deserialize;
    use toml::Value;

    use crate::Config;

    fn parse_and_validate(config_str: &str) -> anyhow::Result<Config> {
        let config: Config = toml::from_str(config_str)?;
        super::validate(&config)?;
        Ok(config)
    }

    const MINIMAL: &str = indoc! {r#"
        [store]
        path = "/tmp/relay"

        [signing]
        secret = "s3cret"

        [providers.openai]
        type = "openai"
        api_key = "sk-test"
    "#};

    #[test]
    fn minimal_config_validates() {
        parse_and_validate(MINIMAL).unwrap();
    }

    #[test]
    fn missing_providers_fails() {
        let error = parse_and_validate(indoc! {r#"
            [store]
            path = "/tmp/relay"

            [signing]
            secret = "s3cret"
        "#})
        .unwrap_err();

        assert_snapshot!(error.to_string(), @r#"
        No model providers configured. Relay requires at least one provider to execute runs.

        Example configuration:

          [providers.openai]
          type = "openai"
          api_key = "{{ env.OPENAI_API_KEY }}"
        "#);
    }

    #[test]
    fn missing_signing_secret_fails() {
        let error = parse_and_validate(indoc! {r#"
            [store]
            path = "/tmp/relay"

            [providers.openai]
            type = "openai"
            api_key = "sk-test"
        "#})
        .unwrap_err();

        assert_snapshot!(error.to_string(), @r#"
        No feedback token signing secret configured. Set one under [signing]:

          [signing]
          secret = "{{ env.RELAY_SIGNING_SECRET }}"
        "#);
    }

    #[test]
    fn missing_store_path_fails() {
        let error = parse_and_validate(indoc! {r#"
            [signing]
            secret = "s3cret"

            [providers.openai]
            type = "openai"
            api_key = "sk-test"
        "#})
        .unwrap_err();

        assert_snapshot!(error.to_string(), @r#"
        No run store path configured. Set one under [store]:

          [store]
          path = "/var/lib/relay"
        "#);
    }

    #[test]
    fn search_key_without_engine_id_fails() {
        let config_str = format!("{MINIMAL}\n[tools]\nsearch_api_key = \"g-key\"\n");
        let error = parse_and_validate(&config_str).unwrap_err();

        assert_snapshot!(
            error.to_string(),
            @"tools.search_api_key is set but tools.search_engine_id is missing"
        );
    }

    #[test]
    fn tenant_referencing_unknown_provider_fails() {
        let config_str = format!("{MINIMAL}\n[tenants.acme]\napi_key = \"k\"\nfallback_order = [\"bedrock\"]\n");
        let error = parse_and_validate(&config_str).unwrap_err();

        assert_snapshot!(error.to_string(), @"tenant 'acme' references unknown provider 'bedrock'");
    }

    #[test]
    fn env_references_expand() {
        temp_env::with_var("RELAY_TEST_KEY", Some("expanded-key"), || {
            let mut value: Value = toml::from_str(indoc! {r#"
                api_key = "{{ env.RELAY_TEST_KEY }}"
                plain = "left alone"
            "#})
            .unwrap();

            super::expand_env_references(&mut value).unwrap();
            let table = value.as_table().unwrap();

            assert_eq!(table["api_key"].as_str(), Some("expanded-key"));
            assert_eq!(table["plain"].as_str(), Some("left alone"));
        });
    }

    #[test]
    fn unset_env_reference_fails() {
        temp_env::with_var_unset("RELAY_DEFINITELY_UNSET", || {
            let mut value: Value = toml::from_str(r#"api_key = "{{ env.RELAY_DEFINITELY_UNSET }}""#).unwrap();
            let error = super::expand_env_references(&mut value).unwrap_err();

            assert_snapshot!(
                error.to_string(),
                @"environment variable 'RELAY_DEFINITELY_UNSET' referenced in configuration is not set"
            );
        });
    }

    #[test]
    fn deny_unknown_fields_at_top_level() {
        let value: Value = toml::from_str("unknown_section = 1").unwrap();
        assert!(Config::deserialize(value).is_err());
    }
}
