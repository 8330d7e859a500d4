//! Host-side units — built-in verifiers and manifest-declared command units.

pub mod command;
pub mod verifiers;

use crate::core::registry::Registry;
use crate::core::types::CapforgeConfig;
use command::CommandUnit;
use std::sync::Arc;
use tracing::info;

/// Register every manifest unit, in manifest order. Returns how many were stored.
pub fn register_config(registry: &mut Registry, config: &CapforgeConfig) -> Result<usize, String> {
    let mut stored = 0;
    for (id, spec) in &config.units {
        let unit = CommandUnit::from_spec(id, spec)?;
        if registry.register(Arc::new(unit)) {
            stored += 1;
        }
    }
    info!(catalog = %config.name, units = stored, "registered manifest units");
    Ok(stored)
}

/// Fresh registry holding the manifest's units.
pub fn registry_from_config(config: &CapforgeConfig) -> Result<Registry, String> {
    let mut registry = Registry::new();
    register_config(&mut registry, config)?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::parse_config;

    #[test]
    fn test_cf022_register_config_preserves_order() {
        let config = parse_config(
            r#"
version: "1.0"
name: demo
units:
  org.demo.second:
    outputs: [token]
    run: echo b
  org.demo.first:
    outputs: [token]
    run: echo a
"#,
        )
        .unwrap();
        let registry = registry_from_config(&config).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.providers_of("token"),
            vec!["org.demo.second", "org.demo.first"]
        );
    }

    #[test]
    fn test_cf022_register_config_error() {
        let config = parse_config("version: \"1.0\"\nname: demo\nunits:\n  u: {}\n").unwrap();
        let mut registry = Registry::new();
        assert!(register_config(&mut registry, &config).is_err());
    }
}
