//! Default filesystem locations shared by the daemon and the client.

use std::path::PathBuf;

use crate::error::{NextmeetError, NextmeetResult};

/// State directory holding the socket and the daemon's marker files.
pub fn default_state_dir() -> NextmeetResult<PathBuf> {
    let cache_dir = dirs::cache_dir().ok_or_else(|| {
        NextmeetError::Io(std::io::Error::other(
            "could not determine the cache directory",
        ))
    })?;
    Ok(cache_dir.join("nextmeet"))
}

/// Default UNIX socket path the daemon binds and the client connects to.
pub fn default_socket_path() -> NextmeetResult<PathBuf> {
    Ok(default_state_dir()?.join("socket"))
}
