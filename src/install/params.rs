//! Installation parameters for one install attempt.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Read-only inputs to an installation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationParameters {
    /// Installer CLI arguments, flattened to `"key value"` tokens.
    #[serde(default)]
    pub installer_args: BTreeMap<String, String>,
    /// Greengrass runtime parameters.
    #[serde(default)]
    pub greengrass_parameters: BTreeMap<String, String>,
    /// Greengrass root directory on the device; holds the installer script.
    pub root_directory: PathBuf,
}

/// Flatten installer args into one `"key value"` token per pair, in key order.
pub fn installer_arguments(params: &InstallationParameters) -> Vec<String> {
    params
        .installer_args
        .iter()
        .map(|(k, v)| format!("{} {}", k, v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattening_keeps_pairs_together_in_key_order() {
        let mut params = InstallationParameters {
            root_directory: PathBuf::from("/greengrass"),
            ..Default::default()
        };
        params
            .installer_args
            .insert("--thing-name".to_string(), "core-01".to_string());
        params
            .installer_args
            .insert("--aws-region".to_string(), "us-west-2".to_string());
        params
            .installer_args
            .insert("--provision".to_string(), "true".to_string());

        assert_eq!(
            installer_arguments(&params),
            vec![
                "--aws-region us-west-2",
                "--provision true",
                "--thing-name core-01"
            ]
        );
    }

    #[test]
    fn empty_args_flatten_to_nothing() {
        let params = InstallationParameters::default();
        assert!(installer_arguments(&params).is_empty());
    }

    #[test]
    fn deserializes_from_toml() {
        let params: InstallationParameters = toml::from_str(
            r#"
            root_directory = "/opt/greengrass"

            [installer_args]
            "--thing-name" = "core-01"

            [greengrass_parameters]
            region = "eu-central-1"
            "#,
        )
        .unwrap();
        assert_eq!(params.root_directory, PathBuf::from("/opt/greengrass"));
        assert_eq!(installer_arguments(&params), vec!["--thing-name core-01"]);
        assert_eq!(params.greengrass_parameters["region"], "eu-central-1");
    }
}
