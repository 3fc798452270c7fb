//! fleetlock: lease-based distributed locks for fleet orchestration directors.
//!
//! Directors that share a [`store::LockRecordStore`] use [`lock::Lock`] to
//! serialize work on deployments, releases, stemcells, and package
//! compilations. Leases expire unless renewed, so a crashed director never
//! blocks the fleet for longer than one lease.
//!
//! The `fleetlock` binary exposes the same locks to shell scripts and lets
//! operators inspect and clear lock records.

pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod exit_codes;
pub mod fs;
pub mod lock;
pub mod lock_helper;
pub mod store;
pub mod task;

#[cfg(test)]
mod test_support;
