//! Debian packages through dpkg-query and apt-get

use crate::runner;
use anyhow::Result;
use convergence::{CommandOutput, PackageManager};
use std::process::Command;

#[derive(Debug, Default)]
pub struct AptPackages;

impl AptPackages {
    /// Installed version, if any
    fn installed_version(&self, name: &str) -> Result<Option<String>> {
        let output = runner::run(
            "dpkg-query",
            &["--show", "--showformat=${Status}\t${Version}", name],
        )?;
        // dpkg-query exits 1 for packages it has never heard of
        if !output.success() {
            return Ok(None);
        }
        Ok(parse_status(&output.stdout_str()))
    }

    fn apt_get(&self, args: &[&str]) -> Result<CommandOutput> {
        runner::output(
            Command::new("apt-get")
                .env("DEBIAN_FRONTEND", "noninteractive")
                .args(["-y", "-q"])
                .args(args),
        )
    }
}

impl PackageManager for AptPackages {
    fn is_installed(&self, name: &str, version: Option<&str>) -> Result<bool> {
        let installed = self.installed_version(name)?;
        log::debug!("package {name}: installed {installed:?}, wanted {version:?}");
        Ok(match (installed, version) {
            (Some(have), Some(want)) => have == want,
            (Some(_), None) => true,
            (None, _) => false,
        })
    }

    fn install(&self, name: &str, version: Option<&str>) -> Result<CommandOutput> {
        let target = match version {
            Some(v) => format!("{name}={v}"),
            None => name.to_string(),
        };
        self.apt_get(&["install", &target])
    }

    fn remove(&self, name: &str) -> Result<CommandOutput> {
        self.apt_get(&["remove", name])
    }
}

/// Parse `<want> <flag> <status>\t<version>`; only `installed` counts
fn parse_status(line: &str) -> Option<String> {
    let (status, version) = line.trim().split_once('\t')?;
    if status.split_whitespace().last() != Some("installed") || version.is_empty() {
        return None;
    }
    Some(version.to_string())
}
