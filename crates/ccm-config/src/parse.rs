//! TOML rendition of the chip configuration file.
//!
//! Tables become sections; nested tables are flattened into dotted keys.
//! Keys outside any table land in [`ROOT_SECTION`].

use ccm_core::{ChipConfig, ConfigError, ConfigSource, ConfigValue};

/// Section holding keys that appear before the first table.
pub const ROOT_SECTION: &str = "general";

/// Parses configuration text. `origin` names the text in error messages.
pub fn parse_config(
    text: &str,
    origin: &str,
    source: ConfigSource,
) -> Result<ChipConfig, ConfigError> {
    let table: toml::Table = text.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        origin: origin.to_string(),
        reason: e.message().to_string(),
    })?;

    let mut config = ChipConfig::new(source);
    for (key, value) in table {
        match value {
            toml::Value::Table(section) => flatten_into(&mut config, &key, "", section),
            other => {
                config.insert(ROOT_SECTION, key, convert(other));
            }
        }
    }
    Ok(config)
}

fn flatten_into(config: &mut ChipConfig, section: &str, prefix: &str, table: toml::Table) {
    for (key, value) in table {
        let full_key = if prefix.is_empty() {
            key
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            toml::Value::Table(inner) => flatten_into(config, section, &full_key, inner),
            other => {
                config.insert(section, full_key, convert(other));
            }
        }
    }
}

fn convert(value: toml::Value) -> ConfigValue {
    match value {
        toml::Value::String(s) => ConfigValue::Str(s),
        toml::Value::Integer(i) => ConfigValue::Int(i),
        toml::Value::Float(f) => ConfigValue::Float(f),
        toml::Value::Boolean(b) => ConfigValue::Bool(b),
        toml::Value::Datetime(d) => ConfigValue::Str(d.to_string()),
        toml::Value::Array(items) => ConfigValue::List(items.into_iter().map(convert).collect()),
        // Tables inside arrays have no section to live in; keep them as text.
        toml::Value::Table(t) => ConfigValue::Str(t.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sections() {
        let text = r#"
version = 3

[audio]
interface = "i2s"
sample_rate = 48000
gain = 0.5

[resources]
fm_rx = true
paths = ["fm", "voice"]

[resources.limits]
max_users = 2
"#;
        let cfg = parse_config(text, "test", ConfigSource::Default).unwrap();

        assert_eq!(cfg.get_int(ROOT_SECTION, "version"), Some(3));
        assert_eq!(cfg.get_str("audio", "interface").as_deref(), Some("i2s"));
        assert_eq!(cfg.get_int("audio", "sample_rate"), Some(48000));
        assert_eq!(cfg.get("audio", "gain"), Some(&ConfigValue::Float(0.5)));
        assert_eq!(cfg.get_bool("resources", "fm_rx"), Some(true));
        assert_eq!(cfg.get_int("resources", "limits.max_users"), Some(2));
        assert_eq!(
            cfg.get("resources", "paths"),
            Some(&ConfigValue::List(vec![
                ConfigValue::Str("fm".into()),
                ConfigValue::Str("voice".into()),
            ]))
        );
    }

    #[test]
    fn test_parse_error_names_origin() {
        let err = parse_config("[audio\nrate = 1", "broken.toml", ConfigSource::Default)
            .unwrap_err();
        match err {
            ConfigError::Parse { origin, .. } => assert_eq!(origin, "broken.toml"),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_keeps_source() {
        let cfg = parse_config("", "memory profile", ConfigSource::MemoryProfile).unwrap();
        assert!(cfg.is_empty());
        assert_eq!(cfg.source(), &ConfigSource::MemoryProfile);
    }
}
