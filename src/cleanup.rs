//! What a test run leaves behind when it tears down.
//!
//! A [`CleanupContext`] holds three persistence flags. By default installed
//! software and generated files are kept and AWS resources are removed.
//! [`PersistMode`] values tweak those defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Teardown policy. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupContext {
    persist_aws_resources: bool,
    persist_installed_software: bool,
    persist_generated_files: bool,
}

impl CleanupContext {
    pub fn builder() -> CleanupContextBuilder {
        CleanupContextBuilder::default()
    }

    /// Apply `modes` to the defaults.
    ///
    /// Duplicates collapse and modes apply in canonical order with `None`
    /// first, so `[AwsResources, None]` keeps AWS resources and input
    /// order never matters.
    pub fn from_modes<I>(modes: I) -> Self
    where
        I: IntoIterator<Item = PersistMode>,
    {
        let modes: BTreeSet<PersistMode> = modes.into_iter().collect();
        modes
            .into_iter()
            .fold(Self::builder(), |builder, mode| mode.apply(builder))
            .build()
    }

    pub fn persist_aws_resources(&self) -> bool {
        self.persist_aws_resources
    }

    pub fn persist_installed_software(&self) -> bool {
        self.persist_installed_software
    }

    pub fn persist_generated_files(&self) -> bool {
        self.persist_generated_files
    }
}

impl Default for CleanupContext {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Clone)]
pub struct CleanupContextBuilder {
    persist_aws_resources: bool,
    persist_installed_software: bool,
    persist_generated_files: bool,
}

impl Default for CleanupContextBuilder {
    fn default() -> Self {
        Self {
            persist_aws_resources: false,
            persist_installed_software: true,
            persist_generated_files: true,
        }
    }
}

impl CleanupContextBuilder {
    pub fn persist_aws_resources(mut self, persist: bool) -> Self {
        self.persist_aws_resources = persist;
        self
    }

    pub fn persist_installed_software(mut self, persist: bool) -> Self {
        self.persist_installed_software = persist;
        self
    }

    pub fn persist_generated_files(mut self, persist: bool) -> Self {
        self.persist_generated_files = persist;
        self
    }

    pub fn build(self) -> CleanupContext {
        CleanupContext {
            persist_aws_resources: self.persist_aws_resources,
            persist_installed_software: self.persist_installed_software,
            persist_generated_files: self.persist_generated_files,
        }
    }
}

/// A named adjustment to the cleanup defaults.
///
/// Variant order is the order [`CleanupContext::from_modes`] applies them in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PersistMode {
    /// Clear every persistence flag.
    #[serde(rename = "none")]
    None,
    #[serde(rename = "aws.resources")]
    AwsResources,
    #[serde(rename = "installed.software")]
    InstalledSoftware,
    #[serde(rename = "generated.files")]
    GeneratedFiles,
}

impl PersistMode {
    pub const ALL: [PersistMode; 4] = [
        PersistMode::None,
        PersistMode::AwsResources,
        PersistMode::InstalledSoftware,
        PersistMode::GeneratedFiles,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PersistMode::None => "none",
            PersistMode::AwsResources => "aws.resources",
            PersistMode::InstalledSoftware => "installed.software",
            PersistMode::GeneratedFiles => "generated.files",
        }
    }

    pub fn apply(self, builder: CleanupContextBuilder) -> CleanupContextBuilder {
        match self {
            PersistMode::None => builder
                .persist_aws_resources(false)
                .persist_installed_software(false)
                .persist_generated_files(false),
            PersistMode::AwsResources => builder.persist_aws_resources(true),
            PersistMode::InstalledSoftware => builder.persist_installed_software(true),
            PersistMode::GeneratedFiles => builder.persist_generated_files(true),
        }
    }
}

impl fmt::Display for PersistMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown persist mode '{0}' (expected one of: none, aws.resources, installed.software, generated.files)")]
pub struct UnknownPersistMode(pub String);

impl FromStr for PersistMode {
    type Err = UnknownPersistMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PersistMode::ALL
            .into_iter()
            .find(|mode| mode.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownPersistMode(s.to_string()))
    }
}
