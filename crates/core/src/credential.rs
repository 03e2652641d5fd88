use std::fmt;
#[cfg(unix)]
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

pub const TOKEN_ENV: &str = "SETPUSH_TOKEN";
pub const TOKEN_FILE_NAME: &str = "token";

/// Bearer token for the remote catalog. Obtained once at startup and passed
/// into the catalog client explicitly.
#[derive(Clone)]
pub struct Credential {
    token: String,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn bearer(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .finish()
    }
}

pub fn token_path(config_dir: &Path) -> PathBuf {
    config_dir.join(TOKEN_FILE_NAME)
}

pub fn authenticate(config_dir: &Path) -> Result<Credential> {
    authenticate_from(std::env::var(TOKEN_ENV).ok().as_deref(), config_dir)
}

fn authenticate_from(env_token: Option<&str>, config_dir: &Path) -> Result<Credential> {
    if let Some(token) = env_token.map(str::trim).filter(|t| !t.is_empty()) {
        return Ok(Credential::new(token));
    }

    let path = token_path(config_dir);
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::AuthRequired {
                message: format!("no token: set {TOKEN_ENV} or write {}", path.display()),
            });
        }
        Err(e) => return Err(Error::Io(e)),
    };

    let token = text.trim();
    if token.is_empty() {
        return Err(Error::AuthRequired {
            message: format!("token file is empty: {}", path.display()),
        });
    }
    Ok(Credential::new(token))
}

pub fn save_token(config_dir: &Path, token: &str) -> Result<()> {
    let token = token.trim();
    if token.is_empty() {
        return Err(Error::InvalidConfig {
            message: "token is empty".to_string(),
        });
    }
    std::fs::create_dir_all(config_dir)?;
    let path = token_path(config_dir);
    let tmp = path.with_extension("tmp");
    // A leftover temp file may carry wider permissions than ours.
    match std::fs::remove_file(&tmp) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
        _ => {}
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
        let mut f = std::fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .mode(0o600)
            .open(&tmp)?;
        f.write_all(token.as_bytes())?;
        f.sync_all()?;
        std::fs::rename(&tmp, &path)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        Ok(())
    }

    #[cfg(not(unix))]
    {
        std::fs::write(&tmp, token.as_bytes())?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}
