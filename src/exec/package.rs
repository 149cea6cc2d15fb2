//! Package-manager detection and command mapping.
//!
//! The execution service never guesses a host's package manager from the
//! control node; detection runs over the live connection, probing for the
//! manager binaries in preference order. Detection is behind a trait so an
//! embedding application with richer host facts can supply its own detector.

use async_trait::async_trait;

use crate::connection::{Connection, ConnectionResult, ExecuteOptions};

/// Supported package managers, in detection preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Apt,
    Dnf,
    Yum,
    Pacman,
    Zypper,
    Apk,
}

/// A package operation the service can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageOp {
    /// Install the package.
    Install,
    /// Remove the package.
    Remove,
    /// Upgrade the package to the latest available version.
    Update,
}

impl PackageManager {
    /// All supported managers, in detection preference order.
    pub const ALL: [PackageManager; 6] = [
        PackageManager::Apt,
        PackageManager::Dnf,
        PackageManager::Yum,
        PackageManager::Pacman,
        PackageManager::Zypper,
        PackageManager::Apk,
    ];

    /// The binary probed for during detection.
    pub fn probe_binary(&self) -> &'static str {
        match self {
            PackageManager::Apt => "apt-get",
            PackageManager::Dnf => "dnf",
            PackageManager::Yum => "yum",
            PackageManager::Pacman => "pacman",
            PackageManager::Zypper => "zypper",
            PackageManager::Apk => "apk",
        }
    }

    /// Build the non-interactive command line for an operation on a package.
    ///
    /// The package name is shell-quoted; nothing a caller passes here can
    /// break out of the argument position.
    pub fn command_for(&self, op: PackageOp, package: &str) -> String {
        let package = shell_words::quote(package);
        match (self, op) {
            (PackageManager::Apt, PackageOp::Install) => {
                format!("apt-get install -y {}", package)
            }
            (PackageManager::Apt, PackageOp::Remove) => format!("apt-get remove -y {}", package),
            (PackageManager::Apt, PackageOp::Update) => {
                format!("apt-get install --only-upgrade -y {}", package)
            }
            (PackageManager::Dnf, PackageOp::Install) => format!("dnf install -y {}", package),
            (PackageManager::Dnf, PackageOp::Remove) => format!("dnf remove -y {}", package),
            (PackageManager::Dnf, PackageOp::Update) => format!("dnf upgrade -y {}", package),
            (PackageManager::Yum, PackageOp::Install) => format!("yum install -y {}", package),
            (PackageManager::Yum, PackageOp::Remove) => format!("yum remove -y {}", package),
            (PackageManager::Yum, PackageOp::Update) => format!("yum update -y {}", package),
            (PackageManager::Pacman, PackageOp::Install) => {
                format!("pacman -S --noconfirm {}", package)
            }
            (PackageManager::Pacman, PackageOp::Remove) => {
                format!("pacman -R --noconfirm {}", package)
            }
            (PackageManager::Pacman, PackageOp::Update) => {
                format!("pacman -S --noconfirm {}", package)
            }
            (PackageManager::Zypper, PackageOp::Install) => {
                format!("zypper --non-interactive install {}", package)
            }
            (PackageManager::Zypper, PackageOp::Remove) => {
                format!("zypper --non-interactive remove {}", package)
            }
            (PackageManager::Zypper, PackageOp::Update) => {
                format!("zypper --non-interactive update {}", package)
            }
            (PackageManager::Apk, PackageOp::Install) => format!("apk add {}", package),
            (PackageManager::Apk, PackageOp::Remove) => format!("apk del {}", package),
            (PackageManager::Apk, PackageOp::Update) => format!("apk upgrade {}", package),
        }
    }
}

impl std::fmt::Display for PackageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.probe_binary())
    }
}

/// Determines the package manager in use on a live connection.
#[async_trait]
pub trait PackageManagerDetector: Send + Sync {
    /// Probe the host. `Ok(None)` means no supported manager was found.
    async fn detect(&self, connection: &dyn Connection)
        -> ConnectionResult<Option<PackageManager>>;
}

/// Default detector: probes `command -v <binary>` for each supported manager
/// in preference order.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandProbeDetector;

#[async_trait]
impl PackageManagerDetector for CommandProbeDetector {
    async fn detect(
        &self,
        connection: &dyn Connection,
    ) -> ConnectionResult<Option<PackageManager>> {
        for manager in PackageManager::ALL {
            let probe = format!("command -v {}", manager.probe_binary());
            let result = connection.execute(&probe, ExecuteOptions::new()).await?;
            if result.success && !result.stdout.trim().is_empty() {
                return Ok(Some(manager));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn detection_order_prefers_apt() {
        assert_eq!(PackageManager::ALL[0], PackageManager::Apt);
    }

    #[test]
    fn install_command_lines() {
        assert_eq!(
            PackageManager::Apt.command_for(PackageOp::Install, "nginx"),
            "apt-get install -y nginx"
        );
        assert_eq!(
            PackageManager::Pacman.command_for(PackageOp::Install, "nginx"),
            "pacman -S --noconfirm nginx"
        );
        assert_eq!(
            PackageManager::Apk.command_for(PackageOp::Remove, "nginx"),
            "apk del nginx"
        );
    }

    #[test]
    fn update_maps_to_manager_specific_upgrade() {
        assert_eq!(
            PackageManager::Apt.command_for(PackageOp::Update, "nginx"),
            "apt-get install --only-upgrade -y nginx"
        );
        assert_eq!(
            PackageManager::Dnf.command_for(PackageOp::Update, "nginx"),
            "dnf upgrade -y nginx"
        );
    }

    #[test]
    fn package_names_are_shell_quoted() {
        let command = PackageManager::Apt.command_for(PackageOp::Install, "bad; rm -rf /");
        assert_eq!(command, "apt-get install -y 'bad; rm -rf /'");
    }
}
