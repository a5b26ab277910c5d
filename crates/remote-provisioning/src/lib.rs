//! # Remote provisioning
//!
//! Installs the inference engine on another machine over SSH: connect,
//! fingerprint the hardware, pick the containerized (CUDA) or native
//! (ROCm, Vulkan, CPU) install path, then verify the engine answers its
//! health endpoint.
//!
//! ```no_run
//! use command_executor::Secret;
//! use remote_provisioning::{ConnectionConfig, OpenSshShell, RemoteDeploySettings, RemoteProvisioner};
//! use std::sync::Arc;
//!
//! # async fn example() -> remote_provisioning::Result<()> {
//! let provisioner = RemoteProvisioner::new(
//!     Arc::new(OpenSshShell::new()?),
//!     RemoteDeploySettings::default(),
//! );
//! let config = ConnectionConfig::new("192.168.1.50", "clara", Secret::new("hunter2"));
//!
//! let setup = provisioner.test_remote_setup(&config).await;
//! if setup.success {
//!     let outcome = provisioner.deploy_remote(&config).await;
//!     println!("{:?}", outcome.url);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod hardware;
pub mod provisioner;
pub mod secret;
pub mod session;

pub use error::{Error, Result};
pub use hardware::{Accelerator, Confidence, HardwareProfile, ProbeResults, derive_profile};
pub use provisioner::{
    DeployOutcome, DeploymentMethod, RemoteDeploySettings, RemoteProvisioner, RemoteSetupResult,
};
pub use secret::{SecretGuard, SecretSlot};
pub use session::{AuthMethod, ConnectionConfig, OpenSshShell, RemoteShell, SessionId};
