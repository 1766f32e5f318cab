//! Utility functions for HTTP client construction and disk space queries

use crate::config::HttpConfig;
use crate::error::{Error, Result};
use std::path::Path;

/// Build the outbound HTTP client from configuration
///
/// An empty or absent proxy means direct connections.
///
/// # Examples
///
/// ```
/// use tentacle::config::HttpConfig;
/// use tentacle::utils::build_http_client;
///
/// let client = build_http_client(&HttpConfig::default()).unwrap();
/// # drop(client);
/// ```
pub fn build_http_client(config: &HttpConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();

    if let Some(proxy_url) = config.proxy.as_deref()
        && !proxy_url.is_empty()
    {
        let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| Error::Config {
            message: format!("invalid proxy url {proxy_url:?}: {e}"),
            key: Some("http.proxy".to_string()),
        })?;
        builder = builder.proxy(proxy);
    }

    if let Some(user_agent) = config.user_agent.as_deref() {
        builder = builder.user_agent(user_agent);
    }

    if let Some(timeout) = config.connect_timeout {
        builder = builder.connect_timeout(timeout);
    }

    builder.build().map_err(Error::Network)
}

/// Get available disk space for a given path
///
/// Uses platform-specific APIs to query filesystem statistics:
/// - Linux / macOS: statvfs
/// - Windows: GetDiskFreeSpaceExW
///
/// The path must exist; pass the parent directory of a file that is about to
/// be created.
pub fn get_available_space(path: &Path) -> std::io::Result<u64> {
    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        // SAFETY: c_path is a valid null-terminated string, stat is zero
        // initialised, and it is only read after statvfs reports success.
        unsafe {
            let mut stat: libc::statvfs = std::mem::zeroed();
            if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
                return Err(std::io::Error::last_os_error());
            }

            // f_bavail is available blocks for unprivileged users
            #[allow(clippy::unnecessary_cast)]
            let available_bytes = (stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64);
            Ok(available_bytes)
        }
    }

    #[cfg(windows)]
    {
        use std::os::windows::ffi::OsStrExt;
        use winapi::um::fileapi::GetDiskFreeSpaceExW;

        let wide_path: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        // SAFETY: wide_path is null-terminated and every out pointer refers
        // to a live, aligned u64 that is only read after a successful call.
        unsafe {
            let mut free_bytes_available: u64 = 0;
            let mut _total_bytes: u64 = 0;
            let mut _total_free_bytes: u64 = 0;

            if GetDiskFreeSpaceExW(
                wide_path.as_ptr(),
                &mut free_bytes_available as *mut u64 as *mut _,
                &mut _total_bytes as *mut u64 as *mut _,
                &mut _total_free_bytes as *mut u64 as *mut _,
            ) == 0
            {
                return Err(std::io::Error::last_os_error());
            }

            Ok(free_bytes_available)
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = path;
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "Disk space checking is not supported on this platform",
        ))
    }
}

/// Fail with [`Error::InsufficientSpace`] if the filesystem holding `target`
/// reports less than `required` free bytes
///
/// A failed query is logged and treated as "enough space"; the allocation
/// itself will surface a real shortage.
pub fn ensure_space_for(target: &Path, required: u64) -> Result<()> {
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    match get_available_space(dir) {
        Ok(available) if available < required => {
            Err(Error::InsufficientSpace { required, available })
        }
        Ok(_) => Ok(()),
        Err(e) => {
            tracing::warn!(path = %dir.display(), error = %e, "Could not query free disk space");
            Ok(())
        }
    }
}
