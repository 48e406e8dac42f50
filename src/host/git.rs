//! Git checkouts through the `git` command line

use crate::runner;
use anyhow::{Context, Result, bail};
use convergence::{Checkout, CheckoutSpec, SourceControl};
use std::path::Path;

#[derive(Debug, Default)]
pub struct GitCli;

impl GitCli {
    fn git(&self, user: Option<&str>, args: &[&str]) -> Result<String> {
        let output = runner::output(&mut runner::command_as(user, "git", args))?;
        if !output.success() {
            bail!(
                "git {} failed: {}",
                args.join(" "),
                output.stderr_str().trim()
            );
        }
        Ok(output.stdout_str().trim().to_string())
    }
}

impl SourceControl for GitCli {
    fn checkout(&self, path: &Path) -> Result<Option<Checkout>> {
        if !path.join(".git").exists() {
            return Ok(None);
        }
        let dir = path.display().to_string();
        let repository = self.git(None, &["-C", &dir, "remote", "get-url", "origin"])?;
        let revision = self.git(None, &["-C", &dir, "rev-parse", "HEAD"])?;
        Ok(Some(Checkout {
            repository,
            revision,
        }))
    }

    fn resolve(&self, repository: &str, reference: &str) -> Result<String> {
        if is_commit(reference) {
            return Ok(reference.to_string());
        }
        let listing = self.git(None, &["ls-remote", repository, reference])?;
        parse_ls_remote(&listing, reference)
            .with_context(|| format!("{reference} not found in {repository}"))
    }

    fn sync(&self, spec: &CheckoutSpec) -> Result<()> {
        let user = spec.user.as_deref();
        let dir = spec.path.display().to_string();

        if self.checkout(&spec.path)?.is_none() {
            log::info!("cloning {} into {dir}", spec.repository);
            self.git(user, &["clone", "--no-checkout", &spec.repository, &dir])?;
        } else {
            self.git(user, &["-C", &dir, "remote", "set-url", "origin", &spec.repository])?;
            self.git(user, &["-C", &dir, "fetch", "--tags", "origin"])?;
        }

        let revision = self.resolve(&spec.repository, &spec.reference)?;
        self.git(user, &["-C", &dir, "checkout", "--force", "--quiet", &revision])?;
        Ok(())
    }
}

fn is_commit(reference: &str) -> bool {
    reference.len() == 40 && reference.chars().all(|c| c.is_ascii_hexdigit())
}

/// Pick the commit for `reference` from `git ls-remote` output
///
/// Annotated tags list both the tag object and the peeled commit (`^{}`);
/// the peeled line wins. `ls-remote` matches by suffix, so names such as
/// `refs/tags/legacy/v1.0` are skipped.
fn parse_ls_remote(listing: &str, reference: &str) -> Option<String> {
    let names_reference = |name: &str| {
        name == reference
            || name.strip_prefix("refs/heads/") == Some(reference)
            || name.strip_prefix("refs/tags/") == Some(reference)
    };

    let mut found = None;
    for line in listing.lines() {
        let Some((sha, name)) = line.split_once('\t') else {
            continue;
        };
        match name.strip_suffix("^{}") {
            Some(tag) if names_reference(tag) => return Some(sha.to_string()),
            Some(_) => {}
            None if names_reference(name) && found.is_none() => found = Some(sha.to_string()),
            None => {}
        }
    }
    found
}
