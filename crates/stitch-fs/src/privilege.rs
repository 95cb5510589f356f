use std::sync::OnceLock;

static FAST_EXTEND: OnceLock<bool> = OnceLock::new();

/// Try to acquire the OS privilege required to extend files without
/// zero-filling. Attempted once per process; the result is cached.
///
/// On Windows this enables `SeManageVolumePrivilege` on the process token,
/// which `SetFileValidData` requires. On unix no privilege is needed for
/// `fallocate`, so this always reports true. Fully best-effort: a denied
/// privilege only means preallocation takes the slow path.
pub fn acquire_fast_extend_privilege() -> bool {
    *FAST_EXTEND.get_or_init(|| match platform::acquire() {
        Ok(()) => true,
        Err(e) => {
            tracing::info!(error = %e, "fast file extend privilege unavailable");
            false
        }
    })
}

#[cfg(windows)]
mod platform {
    use windows::Win32::Foundation::{CloseHandle, HANDLE, LUID};
    use windows::Win32::Security::{
        AdjustTokenPrivileges, LUID_AND_ATTRIBUTES, LookupPrivilegeValueW, SE_PRIVILEGE_ENABLED,
        TOKEN_ADJUST_PRIVILEGES, TOKEN_PRIVILEGES, TOKEN_QUERY,
    };
    use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};
    use windows::core::w;

    pub fn acquire() -> windows::core::Result<()> {
        unsafe {
            let mut token = HANDLE::default();
            OpenProcessToken(
                GetCurrentProcess(),
                TOKEN_ADJUST_PRIVILEGES | TOKEN_QUERY,
                &mut token,
            )?;

            let result = (|| {
                let mut luid = LUID::default();
                LookupPrivilegeValueW(None, w!("SeManageVolumePrivilege"), &mut luid)?;
                let privileges = TOKEN_PRIVILEGES {
                    PrivilegeCount: 1,
                    Privileges: [LUID_AND_ATTRIBUTES {
                        Luid: luid,
                        Attributes: SE_PRIVILEGE_ENABLED,
                    }],
                };
                AdjustTokenPrivileges(token, false, Some(&raw const privileges), 0, None, None)
            })();

            let _ = CloseHandle(token);
            result
        }
    }
}

#[cfg(not(windows))]
mod platform {
    use std::convert::Infallible;

    pub fn acquire() -> Result<(), Infallible> {
        Ok(())
    }
}
