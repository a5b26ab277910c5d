//! Deployment-scoped credential storage
//!
//! A [`SecretSlot`] holds at most one credential. [`SecretSlot::acquire`]
//! fills it and returns a [`SecretGuard`]; dropping the guard empties the
//! slot, which zeroes the credential. Whatever path a deployment leaves by
//! (success, error or a timeout dropping its future) the guard goes with it.

use crate::error::{Error, Result};
use command_executor::Secret;
use std::sync::{Mutex, MutexGuard};

/// Single-occupancy holder for the deployment credential
#[derive(Debug, Default)]
pub struct SecretSlot {
    held: Mutex<Option<Secret>>,
}

impl SecretSlot {
    /// Empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `secret` for the lifetime of the returned guard
    ///
    /// Fails with [`Error::DeploymentInProgress`] while another guard is alive.
    pub fn acquire(&self, secret: Secret) -> Result<SecretGuard<'_>> {
        let mut held = self.lock();
        if held.is_some() {
            return Err(Error::DeploymentInProgress);
        }
        *held = Some(secret);
        Ok(SecretGuard { slot: self })
    }

    /// Whether a guard currently holds a credential
    pub fn is_held(&self) -> bool {
        self.lock().is_some()
    }

    // A panic while holding the lock leaves the Option intact.
    fn lock(&self) -> MutexGuard<'_, Option<Secret>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Access to the stored credential; clears the slot on drop
#[derive(Debug)]
pub struct SecretGuard<'a> {
    slot: &'a SecretSlot,
}

impl SecretGuard<'_> {
    /// Copy of the credential for a single privileged command
    pub fn secret(&self) -> Secret {
        self.slot.lock().clone().unwrap_or_default()
    }
}

impl Drop for SecretGuard<'_> {
    fn drop(&mut self) {
        // Secret zeroes its buffer on drop.
        self.slot.lock().take();
    }
}
