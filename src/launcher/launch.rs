// SPDX-License-Identifier: MIT

//! Start the target inside the sandbox container.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use windows::Win32::System::Threading;

use super::monitor::SandboxedProcess;
use crate::args::ArgumentBuilder;
use crate::args::launch_quote::{quote_command_line, to_wide};
use crate::config::ContainerConfig;
use crate::error::{BrokerError, OsError};
use crate::sandbox::{AttributeList, CapabilitySet, SandboxProfile, to_wide_os};

/// How the process is started.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Defaults to the executable's directory.
    pub working_dir: Option<PathBuf>,
    /// Leave the main thread suspended; the caller resumes it.
    pub suspended: bool,
    /// Plain arguments placed ahead of the argument envelope.
    pub extra_args: Vec<String>,
}

/// Launches executables inside one named sandbox container.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessLauncher {
    container: ContainerConfig,
}

impl ProcessLauncher {
    pub fn new(container: ContainerConfig) -> Self {
        ProcessLauncher { container }
    }

    pub fn container(&self) -> &ContainerConfig {
        &self.container
    }

    /// Launch with the default options.
    pub fn launch(
        &self,
        executable: &Path,
        arguments: &ArgumentBuilder,
        launch_key: u32,
    ) -> Result<SandboxedProcess, BrokerError> {
        self.launch_with(executable, arguments, launch_key, &LaunchOptions::default())
    }

    /// Start `executable` in the container, passing `arguments` as an
    /// envelope encrypted with `launch_key`.
    pub fn launch_with(
        &self,
        executable: &Path,
        arguments: &ArgumentBuilder,
        launch_key: u32,
        options: &LaunchOptions,
    ) -> Result<SandboxedProcess, BrokerError> {
        let exe = resolve_executable(executable)?;
        let cwd = match &options.working_dir {
            Some(dir) => get_full_path_name(dir)?,
            None => exe
                .parent()
                .map(Path::to_path_buf)
                .ok_or_else(|| BrokerError::launch_message("executable has no parent directory"))?,
        };

        let profile = SandboxProfile::get_or_create(
            &self.container.name,
            &self.container.display_name,
            &self.container.description,
        )?;
        let capabilities = CapabilitySet::standard()?;
        let security = profile.security_capabilities(&capabilities);
        let mut attributes = AttributeList::new(1)?;
        attributes.add(&security)?;

        let envelope = arguments.build_encrypted(launch_key)?;
        let exe_str = exe
            .to_str()
            .ok_or_else(|| BrokerError::launch_message("executable path is not valid unicode"))?;
        let mut args = options.extra_args.clone();
        args.push(envelope);
        let mut cmdline = to_wide(&quote_command_line(exe_str, &args)?);

        let app = to_wide_os(exe.as_os_str());
        let w_cwd = to_wide_os(cwd.as_os_str());

        let mut si_ex = Threading::STARTUPINFOEXW::default();
        si_ex.StartupInfo.cb = std::mem::size_of::<Threading::STARTUPINFOEXW>() as u32;
        si_ex.lpAttributeList = attributes.as_raw();

        let flags = if options.suspended {
            Threading::EXTENDED_STARTUPINFO_PRESENT | Threading::CREATE_SUSPENDED
        } else {
            Threading::EXTENDED_STARTUPINFO_PRESENT
        };

        debug!(
            exe = %exe.display(),
            cwd = %cwd.display(),
            keys = ?arguments.arguments().iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
            "creating sandboxed process",
        );
        let mut pi = Threading::PROCESS_INFORMATION::default();
        unsafe {
            Threading::CreateProcessW(
                windows::core::PCWSTR(app.as_ptr()),              // application name
                Some(windows::core::PWSTR(cmdline.as_mut_ptr())), // command line; the OS may write to it
                None,                                             // process attributes
                None,                                             // thread attributes
                false,                                            // no handle inheritance
                flags,
                None, // inherit the environment
                windows::core::PCWSTR(w_cwd.as_ptr()),
                &si_ex.StartupInfo,
                &mut pi,
            )
        }
        .map_err(|e| BrokerError::Launch(e.into()))?;

        let process = SandboxedProcess::new(pi);
        info!(pid = process.pid(), exe = %exe.display(), container = %profile.name(), suspended = options.suspended, "launched sandboxed process");
        Ok(process)
    }
}

/// Turn the executable into an absolute path, searching `PATH` for bare names.
pub fn resolve_executable(executable: &Path) -> Result<PathBuf, BrokerError> {
    let bare_name = executable.components().count() == 1 && !executable.is_absolute();
    if bare_name {
        let found = which::which(executable.as_os_str())?;
        debug!(name = %executable.display(), found = %found.display(), "resolved executable from PATH");
        return get_full_path_name(&found);
    }
    get_full_path_name(executable)
}

// Get the canonical Win32 path, not the extended-length path that canonicalize() generates.
fn get_full_path_name(path: &Path) -> Result<PathBuf, BrokerError> {
    let path = path
        .canonicalize()
        .map_err(|e| BrokerError::Launch(OsError::from(e)))?;
    let bytes = path.as_os_str().as_encoded_bytes();
    if bytes.starts_with(br"\\?\") && !bytes.starts_with(br"\\?\UNC\") {
        // Stripping an ASCII prefix keeps the remaining bytes a valid encoding.
        Ok(PathBuf::from(unsafe { OsStr::from_encoded_bytes_unchecked(&bytes[4..]) }))
    } else {
        Ok(path)
    }
}
