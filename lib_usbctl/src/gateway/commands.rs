use std::fmt;

use crate::models::BusId;

use super::CommandSpec;

/// Host family the daemon runs on. Decides which tool speaks for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// `usbip` from the kernel tools, bound state read from sysfs.
    Linux,
    /// `usbipd` (usbipd-win) driving WSL attachments.
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Linux
        }
    }
}

/// A state-changing operation on one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Bind,
    Unbind,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Bind => "bind",
            Verb::Unbind => "unbind",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// # Command Set
///
/// Builds the exact command lines for one [`Platform`]. Bus IDs are only
/// accepted as [`BusId`], so nothing unvalidated ever becomes an argument.
#[derive(Debug, Clone, Copy)]
pub struct CommandSet {
    platform: Platform,
}

impl CommandSet {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }

    pub fn for_current_platform() -> Self {
        Self::new(Platform::current())
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Listing commands in the order they are tried; the first one that
    /// succeeds wins.
    pub fn list_candidates(&self) -> Vec<CommandSpec> {
        match self.platform {
            Platform::Linux => vec![
                CommandSpec::new("usbip", ["list", "-l"]),
                CommandSpec::new("/usr/bin/usbip", ["list", "-l"]),
                CommandSpec::new("/usr/sbin/usbip", ["list", "-l"]),
                CommandSpec::new("usbip", ["list", "--local"]),
            ],
            Platform::Windows => vec![CommandSpec::new("usbipd", ["wsl", "list"])],
        }
    }

    pub fn mutation(&self, verb: Verb, busid: &BusId) -> CommandSpec {
        match (self.platform, verb) {
            (Platform::Linux, Verb::Bind) => CommandSpec::new("usbip", ["bind", "-b", busid.as_str()]),
            (Platform::Linux, Verb::Unbind) => CommandSpec::new("usbip", ["unbind", "-b", busid.as_str()]),
            (Platform::Windows, Verb::Bind) => {
                CommandSpec::new("usbipd", ["wsl", "attach", "--busid", busid.as_str()])
            }
            (Platform::Windows, Verb::Unbind) => {
                CommandSpec::new("usbipd", ["wsl", "detach", "--busid", busid.as_str()])
            }
        }
    }
}

impl Default for CommandSet {
    fn default() -> Self {
        Self::for_current_platform()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Gateway;

    #[test]
    fn test_every_generated_program_is_allowed() {
        let id = BusId::parse("1-1.2").unwrap();
        for platform in [Platform::Linux, Platform::Windows] {
            let set = CommandSet::new(platform);
            let mut all = set.list_candidates();
            all.push(set.mutation(Verb::Bind, &id));
            all.push(set.mutation(Verb::Unbind, &id));
            for cmd in all {
                assert!(Gateway::is_allowed(&cmd.program), "{cmd} is not allowed");
            }
        }
    }

    #[test]
    fn test_linux_bind_passes_busid_as_its_own_argument() {
        let id = BusId::parse("2-1.1").unwrap();
        let cmd = CommandSet::new(Platform::Linux).mutation(Verb::Bind, &id);
        assert_eq!(cmd.program, "usbip");
        assert_eq!(cmd.args, vec!["bind", "-b", "2-1.1"]);
    }

    #[test]
    fn test_windows_uses_wsl_attach_and_detach() {
        let id = BusId::parse("1-4").unwrap();
        let set = CommandSet::new(Platform::Windows);
        assert_eq!(set.mutation(Verb::Bind, &id).to_string(), "usbipd wsl attach --busid 1-4");
        assert_eq!(set.mutation(Verb::Unbind, &id).to_string(), "usbipd wsl detach --busid 1-4");
    }

    #[test]
    fn test_linux_list_order() {
        let lines: Vec<String> = CommandSet::new(Platform::Linux)
            .list_candidates()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            lines,
            vec![
                "usbip list -l",
                "/usr/bin/usbip list -l",
                "/usr/sbin/usbip list -l",
                "usbip list --local",
            ]
        );
    }
}
