//! Well-known lock names used by director jobs.
//!
//! Deployment, release, and stemcell locks wait up to the configured
//! deployment timeout; compile locks wait much longer since a package build
//! on another director can take minutes.

use crate::context::LockContext;
use crate::error::{LockError, Result};
use crate::lock::{LeaseWatch, Lock, LockOptions};

pub fn deployment_lock_name(deployment: &str) -> String {
    format!("lock:deployment:{}", deployment)
}

pub fn release_lock_name(release: &str) -> String {
    format!("lock:release:{}", release)
}

pub fn stemcell_lock_name(name: &str, version: &str) -> String {
    format!("lock:stemcells:{}:{}", name, version)
}

pub fn compile_lock_name(package_id: &str, stemcell_id: &str) -> String {
    format!("lock:compile:{}:{}", package_id, stemcell_id)
}

/// Lock guarding every change to one deployment.
pub fn deployment_lock(ctx: &LockContext, deployment: &str) -> Result<Lock> {
    Lock::new(
        deployment_lock_name(deployment),
        ctx,
        LockOptions::new()
            .deployment_name(deployment)
            .timeout(ctx.defaults().deployment_timeout),
    )
}

pub fn release_lock(ctx: &LockContext, release: &str) -> Result<Lock> {
    Lock::new(
        release_lock_name(release),
        ctx,
        LockOptions::new().timeout(ctx.defaults().deployment_timeout),
    )
}

pub fn stemcell_lock(ctx: &LockContext, name: &str, version: &str) -> Result<Lock> {
    Lock::new(
        stemcell_lock_name(name, version),
        ctx,
        LockOptions::new().timeout(ctx.defaults().deployment_timeout),
    )
}

pub fn compile_lock(
    ctx: &LockContext,
    package_id: &str,
    stemcell_id: &str,
    deployment: Option<&str>,
) -> Result<Lock> {
    let mut options = LockOptions::new().timeout(ctx.defaults().compile_timeout);
    if let Some(deployment) = deployment {
        options = options.deployment_name(deployment);
    }
    Lock::new(compile_lock_name(package_id, stemcell_id), ctx, options)
}

/// Run `section` while holding the deployment lock.
///
/// The section gets the lease's [`LeaseWatch`] and should call
/// [`LeaseWatch::checkpoint`] between steps.
pub fn with_deployment_lock<T, E, F>(
    ctx: &LockContext,
    deployment: &str,
    section: F,
) -> std::result::Result<T, E>
where
    F: FnOnce(&LeaseWatch) -> std::result::Result<T, E>,
    E: From<LockError>,
{
    deployment_lock(ctx, deployment)?.protect(section)
}

/// Run `section` while holding a lock on every release in `releases`.
///
/// Locks are taken in sorted order with duplicates removed, so two jobs
/// locking overlapping release sets cannot deadlock each other. The watch
/// handed to `section` reports the loss of any of the leases.
pub fn with_release_locks<S, T, E, F>(
    ctx: &LockContext,
    releases: &[S],
    section: F,
) -> std::result::Result<T, E>
where
    S: AsRef<str>,
    F: FnOnce(&LeaseWatch) -> std::result::Result<T, E>,
    E: From<LockError>,
{
    let mut names: Vec<&str> = releases.iter().map(AsRef::as_ref).collect();
    names.sort_unstable();
    names.dedup();
    if names.is_empty() {
        return section(&LeaseWatch::unleased(ctx));
    }
    nest_release_locks(ctx, &names, None, section)
}

fn nest_release_locks<T, E, F>(
    ctx: &LockContext,
    names: &[&str],
    outer: Option<&LeaseWatch>,
    section: F,
) -> std::result::Result<T, E>
where
    F: FnOnce(&LeaseWatch) -> std::result::Result<T, E>,
    E: From<LockError>,
{
    let Some((first, rest)) = names.split_first() else {
        return Err(LockError::InvalidLock("no release locks to take".to_string()).into());
    };
    release_lock(ctx, first)?.protect(|watch| {
        let nested;
        let watch = match outer {
            Some(outer) => {
                nested = watch.nested_in(outer);
                &nested
            }
            None => watch,
        };
        if rest.is_empty() {
            section(watch)
        } else {
            nest_release_locks(ctx, rest, Some(watch), section)
        }
    })
}
