//! Remote hardware detection
//!
//! A fixed set of read-only probes runs over the session; [`derive_profile`]
//! turns their answers into a [`HardwareProfile`] without touching the
//! network, so the decision table is testable on its own.

use crate::error::{Error, Result};
use crate::session::{RemoteShell, SessionId};
use command_executor::Command;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

/// Acceleration stack the engine should be installed with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accelerator {
    /// NVIDIA GPU, deployed as a container
    Cuda,
    /// AMD GPU through ROCm
    Rocm,
    /// Any GPU with a Vulkan driver
    Vulkan,
    /// No usable GPU
    Cpu,
}

impl Accelerator {
    /// Name passed to the install script's `--backend`
    pub fn as_str(&self) -> &'static str {
        match self {
            Accelerator::Cuda => "cuda",
            Accelerator::Rocm => "rocm",
            Accelerator::Vulkan => "vulkan",
            Accelerator::Cpu => "cpu",
        }
    }
}

impl fmt::Display for Accelerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How sure the detection is about its recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// Tooling and device nodes agree
    High,
    /// One signal only
    Medium,
    /// Fallback after partial or conflicting signals
    Low,
}

/// What the remote host offers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareProfile {
    /// Normalised architecture (`x86_64` or `aarch64`)
    pub architecture: String,
    /// Docker is installed
    pub container_runtime: bool,
    /// `nvidia-smi` lists a GPU
    pub nvidia: bool,
    /// `rocminfo` succeeds or `/dev/kfd` exists
    pub rocm: bool,
    /// `vulkaninfo` succeeds
    pub vulkan: bool,
    /// Model name from `/proc/cpuinfo`
    pub cpu_model: Option<String>,
    /// Stack to install
    pub recommended: Accelerator,
    /// Certainty of `recommended`
    pub confidence: Confidence,
    /// Why a weaker stack than the hardware suggests was chosen
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

/// Raw probe answers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeResults {
    /// `uname -m`
    pub architecture: String,
    /// `command -v docker`
    pub docker: bool,
    /// `nvidia-smi -L`
    pub nvidia_smi: bool,
    /// `rocminfo`
    pub rocminfo: bool,
    /// `vulkaninfo --summary`
    pub vulkaninfo: bool,
    /// `/dev/kfd` exists
    pub dev_kfd: bool,
    /// `/dev/dri` exists
    pub dev_dri: bool,
    /// `/dev/nvidia0` exists
    pub dev_nvidia0: bool,
    /// CPU model name
    pub cpu_model: Option<String>,
}

fn normalize_arch(raw: &str) -> Option<&'static str> {
    match raw.trim() {
        "x86_64" | "amd64" => Some("x86_64"),
        "aarch64" | "arm64" => Some("aarch64"),
        _ => None,
    }
}

/// Decide the install stack from probe answers
pub fn derive_profile(probes: &ProbeResults) -> Result<HardwareProfile> {
    let raw_arch = probes.architecture.trim();
    let Some(architecture) = normalize_arch(raw_arch) else {
        return Err(Error::UnsupportedHardware(if raw_arch.is_empty() {
            "could not determine CPU architecture".to_string()
        } else {
            format!("architecture '{}' is not supported", raw_arch)
        }));
    };

    let rocm = probes.rocminfo || probes.dev_kfd;
    let mut fallback_reason = None;

    let (recommended, confidence) = if probes.nvidia_smi {
        let confidence = if probes.dev_nvidia0 {
            Confidence::High
        } else {
            Confidence::Medium
        };
        (Accelerator::Cuda, confidence)
    } else if rocm {
        let confidence = if probes.rocminfo && probes.dev_kfd {
            Confidence::High
        } else {
            Confidence::Medium
        };
        (Accelerator::Rocm, confidence)
    } else if probes.vulkaninfo {
        let confidence = if probes.dev_dri {
            Confidence::High
        } else {
            Confidence::Medium
        };
        (Accelerator::Vulkan, confidence)
    } else if probes.dev_nvidia0 {
        fallback_reason = Some("NVIDIA device present but nvidia-smi is unavailable".to_string());
        (Accelerator::Cpu, Confidence::Low)
    } else if probes.dev_dri {
        fallback_reason = Some("GPU device present but no Vulkan driver found".to_string());
        (Accelerator::Cpu, Confidence::Low)
    } else {
        fallback_reason = Some("no GPU acceleration detected".to_string());
        (Accelerator::Cpu, Confidence::Medium)
    };

    Ok(HardwareProfile {
        architecture: architecture.to_string(),
        container_runtime: probes.docker,
        nvidia: probes.nvidia_smi,
        rocm,
        vulkan: probes.vulkaninfo,
        cpu_model: probes.cpu_model.clone(),
        recommended,
        confidence,
        fallback_reason,
    })
}

fn sh(script: &str) -> Command {
    Command::builder("sh").arg("-c").arg(script).build()
}

async fn succeeds(shell: &dyn RemoteShell, session: &SessionId, command: Command) -> Result<bool> {
    let output = shell.exec(session, &command).await?;
    debug!(command = %command.display(), exit_code = ?output.exit_code, "hardware probe");
    Ok(output.success())
}

fn parse_cpu_model(cpuinfo: &str) -> Option<String> {
    cpuinfo
        .lines()
        .find(|line| line.starts_with("model name"))
        .and_then(|line| line.split_once(':'))
        .map(|(_, model)| model.trim().to_string())
        .filter(|model| !model.is_empty())
}

/// Run every probe in `session`
pub async fn probe(shell: &dyn RemoteShell, session: &SessionId) -> Result<ProbeResults> {
    let uname = shell.exec(session, &Command::builder("uname").arg("-m").build()).await?;
    let cpuinfo = shell
        .exec(
            session,
            &Command::builder("grep")
                .args(["-m1", "model name", "/proc/cpuinfo"])
                .build(),
        )
        .await?;

    Ok(ProbeResults {
        architecture: uname.stdout_trimmed().to_string(),
        docker: succeeds(shell, session, sh("command -v docker")).await?,
        nvidia_smi: succeeds(shell, session, Command::builder("nvidia-smi").arg("-L").build())
            .await?,
        rocminfo: succeeds(shell, session, Command::new("rocminfo")).await?,
        vulkaninfo: succeeds(
            shell,
            session,
            Command::builder("vulkaninfo").arg("--summary").build(),
        )
        .await?,
        dev_kfd: succeeds(shell, session, Command::builder("test").args(["-e", "/dev/kfd"]).build())
            .await?,
        dev_dri: succeeds(shell, session, Command::builder("test").args(["-d", "/dev/dri"]).build())
            .await?,
        dev_nvidia0: succeeds(
            shell,
            session,
            Command::builder("test").args(["-e", "/dev/nvidia0"]).build(),
        )
        .await?,
        cpu_model: parse_cpu_model(&cpuinfo.stdout),
    })
}

/// Probe the host and derive its profile
pub async fn detect(shell: &dyn RemoteShell, session: &SessionId) -> Result<HardwareProfile> {
    let probes = probe(shell, session).await?;
    let profile = derive_profile(&probes)?;
    info!(
        architecture = %profile.architecture,
        recommended = %profile.recommended,
        confidence = ?profile.confidence,
        "remote hardware detected"
    );
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x86() -> ProbeResults {
        ProbeResults {
            architecture: "x86_64".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_cuda_preferred() {
        let profile = derive_profile(&ProbeResults {
            nvidia_smi: true,
            dev_nvidia0: true,
            dev_dri: true,
            vulkaninfo: true,
            ..x86()
        })
        .unwrap();
        assert_eq!(profile.recommended, Accelerator::Cuda);
        assert_eq!(profile.confidence, Confidence::High);
        assert_eq!(profile.fallback_reason, None);
    }

    #[test]
    fn test_rocm_from_device_node_only() {
        let profile = derive_profile(&ProbeResults {
            dev_kfd: true,
            ..x86()
        })
        .unwrap();
        assert_eq!(profile.recommended, Accelerator::Rocm);
        assert_eq!(profile.confidence, Confidence::Medium);
        assert!(profile.rocm);
    }

    #[test]
    fn test_vulkan() {
        let profile = derive_profile(&ProbeResults {
            architecture: "arm64".to_string(),
            vulkaninfo: true,
            dev_dri: true,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(profile.architecture, "aarch64");
        assert_eq!(profile.recommended, Accelerator::Vulkan);
        assert_eq!(profile.confidence, Confidence::High);
    }

    #[test]
    fn test_cpu_fallbacks() {
        let bare = derive_profile(&x86()).unwrap();
        assert_eq!(bare.recommended, Accelerator::Cpu);
        assert_eq!(bare.confidence, Confidence::Medium);

        let orphan = derive_profile(&ProbeResults {
            dev_nvidia0: true,
            ..x86()
        })
        .unwrap();
        assert_eq!(orphan.recommended, Accelerator::Cpu);
        assert_eq!(orphan.confidence, Confidence::Low);
        assert!(orphan.fallback_reason.unwrap().contains("nvidia-smi"));
    }

    #[test]
    fn test_unsupported_architecture() {
        let err = derive_profile(&ProbeResults {
            architecture: "armv7l\n".to_string(),
            nvidia_smi: true,
            ..Default::default()
        })
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unsupported hardware: architecture 'armv7l' is not supported"
        );
        assert!(matches!(
            derive_profile(&ProbeResults::default()),
            Err(Error::UnsupportedHardware(_))
        ));
    }

    #[test]
    fn test_parse_cpu_model() {
        let cpuinfo = "model name\t: AMD Ryzen 9 7950X 16-Core Processor\n";
        assert_eq!(
            parse_cpu_model(cpuinfo).as_deref(),
            Some("AMD Ryzen 9 7950X 16-Core Processor")
        );
        assert_eq!(parse_cpu_model(""), None);
    }

    #[test]
    fn test_profile_serialization() {
        let profile = derive_profile(&x86()).unwrap();
        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["recommended"], "cpu");
        assert_eq!(json["confidence"], "medium");
        assert_eq!(json["fallback_reason"], "no GPU acceleration detected");
    }
}
