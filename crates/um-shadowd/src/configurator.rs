//! Canonical sync set construction.
//!
//! Expands the `synchronize` configuration (core thing, list form, map
//! form) into the set of (thing, shadow) pairs the sync plane manages.
//! The empty shadow name denotes the classic shadow.

use std::collections::HashSet;

use um_protocol::errors::ShadowError;
use um_protocol::validator::{validate_shadow_name, validate_thing_name};

use crate::config::SynchronizeConfig;
use crate::sync::requests::ShadowKey;

/// Expand configuration into the canonical sync set.
///
/// `core_thing_name` is the platform-provided name the `core_thing`
/// entry inherits; it may change at runtime, in which case the set is
/// rebuilt through this same function.
pub fn build_sync_set(
    config: &SynchronizeConfig,
    core_thing_name: &str,
) -> Result<HashSet<ShadowKey>, ShadowError> {
    let mut set = HashSet::new();

    if let Some(core) = &config.core_thing {
        if core_thing_name.is_empty() {
            return Err(ShadowError::InvalidConfiguration(
                "core_thing is configured but the platform thing name is not set".into(),
            ));
        }
        add_entry(
            &mut set,
            core_thing_name,
            core.classic_shadow,
            &core.named_shadows,
        )?;
    }

    for entry in &config.shadow_documents {
        add_entry(
            &mut set,
            &entry.thing_name,
            entry.classic_shadow,
            &entry.named_shadows,
        )?;
    }

    for (thing_name, shadows) in &config.shadow_documents_map {
        add_entry(&mut set, thing_name, shadows.classic_shadow, &shadows.named_shadows)?;
    }

    Ok(set)
}

fn add_entry(
    set: &mut HashSet<ShadowKey>,
    thing_name: &str,
    classic_shadow: bool,
    named_shadows: &[String],
) -> Result<(), ShadowError> {
    validate_thing_name(thing_name).map_err(invalid_config)?;

    if classic_shadow {
        set.insert(ShadowKey::new(thing_name, ""));
    }
    for shadow_name in named_shadows {
        if shadow_name.is_empty() {
            return Err(ShadowError::InvalidConfiguration(format!(
                "empty named shadow configured for {thing_name}"
            )));
        }
        validate_shadow_name(shadow_name).map_err(invalid_config)?;
        set.insert(ShadowKey::new(thing_name, shadow_name.as_str()));
    }
    Ok(())
}

fn invalid_config(error: ShadowError) -> ShadowError {
    ShadowError::InvalidConfiguration(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;

    fn synchronize(toml: &str) -> SynchronizeConfig {
        ServiceConfig::from_toml(&format!("thing_name = \"gw-01\"\n{toml}"))
            .unwrap()
            .synchronize
    }

    #[test]
    fn expands_all_three_forms() {
        let config = synchronize(
            r#"
[synchronize.core_thing]
classic_shadow = true
named_shadows = ["config"]

[[synchronize.shadow_documents]]
thing_name = "sensor-7"
named_shadows = ["calibration", "firmware"]

[synchronize.shadow_documents_map]
sensor-8 = { classic_shadow = true }
"#,
        );
        let set = build_sync_set(&config, "gw-01").unwrap();
        assert_eq!(set.len(), 5);
        assert!(set.contains(&ShadowKey::new("gw-01", "")));
        assert!(set.contains(&ShadowKey::new("gw-01", "config")));
        assert!(set.contains(&ShadowKey::new("sensor-7", "calibration")));
        assert!(set.contains(&ShadowKey::new("sensor-7", "firmware")));
        assert!(set.contains(&ShadowKey::new("sensor-8", "")));
        // List form without classic_shadow does not add the classic shadow.
        assert!(!set.contains(&ShadowKey::new("sensor-7", "")));
    }

    #[test]
    fn core_thing_inherits_platform_name() {
        let config = synchronize(
            r#"
[synchronize.core_thing]
classic_shadow = true
"#,
        );
        let set = build_sync_set(&config, "edge-gw-42").unwrap();
        assert!(set.contains(&ShadowKey::new("edge-gw-42", "")));

        let err = build_sync_set(&config, "").unwrap_err();
        assert!(matches!(err, ShadowError::InvalidConfiguration(_)));
    }

    #[test]
    fn invalid_names_rejected() {
        let config = synchronize(
            r#"
[[synchronize.shadow_documents]]
thing_name = "bad thing"
classic_shadow = true
"#,
        );
        let err = build_sync_set(&config, "gw-01").unwrap_err();
        assert!(matches!(err, ShadowError::InvalidConfiguration(_)));

        let config = synchronize(
            r#"
[[synchronize.shadow_documents]]
thing_name = "sensor-7"
named_shadows = [""]
"#,
        );
        let err = build_sync_set(&config, "gw-01").unwrap_err();
        assert!(matches!(err, ShadowError::InvalidConfiguration(_)));
    }

    #[test]
    fn empty_configuration_yields_empty_set() {
        let config = synchronize("");
        assert!(build_sync_set(&config, "gw-01").unwrap().is_empty());
    }
}
