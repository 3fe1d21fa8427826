use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Command;

use crate::mail::{Credentials, FolderGroup};

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default account name (if not set, uses first account)
    pub default_account: Option<String>,
    /// Named accounts
    pub accounts: HashMap<String, AccountConfig>,
    pub fetch: FetchConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Imap,
    Maildir,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    /// Your email address, also the login unless `username` is set
    pub email: String,
    pub backend: Backend,
    /// IMAP server host
    pub server: String,
    pub port: u16,
    pub username: Option<String>,
    /// Shell command that prints the password (e.g. "pass show mail")
    pub password_command: Option<String>,
    /// Environment variable holding the password
    pub password_env: Option<String>,
    /// Maildir root for the maildir backend
    pub maildir: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Folders to fetch, each a name or a list of aliases tried in order
    pub folders: Vec<FolderGroup>,
    /// Number of parallel folder workers (each opens its own session)
    pub workers: usize,
    /// Only fetch the last N days; omit for all history
    pub days: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_account: None,
            accounts: HashMap::new(),
            fetch: FetchConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            email: String::new(),
            backend: Backend::Imap,
            server: "imap.gmail.com".to_string(),
            port: 993,
            username: None,
            password_command: None,
            password_env: None,
            maildir: shellexpand::tilde("~/Mail").into_owned(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            folders: FolderGroup::defaults(),
            workers: 4,
            days: None,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        let path = dirs::data_dir()
            .map(|p| p.join("mailthreads/email_threads.json"))
            .unwrap_or_else(|| PathBuf::from("email_threads.json"));
        Self {
            path: path.to_string_lossy().into_owned(),
        }
    }
}

impl Config {
    /// Get account names in sorted order
    pub fn account_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.accounts.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get the default account name
    pub fn default_account_name(&self) -> Option<&str> {
        self.default_account.as_deref().or_else(|| {
            self.accounts
                .keys()
                .min()
                .map(|s| s.as_str())
        })
    }

    /// Get account config by name
    pub fn get_account(&self, name: &str) -> Option<&AccountConfig> {
        self.accounts.get(name)
    }

    pub fn output_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.output.path).into_owned())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("mailthreads/config.toml"))
            .unwrap_or_else(|| PathBuf::from("~/.config/mailthreads/config.toml"))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("invalid config")
    }

    /// Load the config file, falling back to defaults if it is missing or broken
    pub fn load() -> Self {
        let config_path = Self::config_path();

        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match Self::parse(&content) {
                    Ok(config) => return config,
                    Err(e) => tracing::warn!(path = %config_path.display(), "config parse error: {:#}", e),
                },
                Err(e) => tracing::warn!(path = %config_path.display(), "config read error: {}", e),
            }
        }

        Self::default()
    }
}

impl AccountConfig {
    pub fn maildir_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.maildir).into_owned())
    }

    /// Resolve the login, running `password_command` or reading
    /// `password_env` for the password.
    pub fn credentials(&self) -> Result<Credentials> {
        let username = self.username.clone().unwrap_or_else(|| self.email.clone());

        let password = if let Some(var) = &self.password_env {
            std::env::var(var).with_context(|| format!("environment variable {} not set", var))?
        } else if let Some(cmd) = &self.password_command {
            let output = Command::new("sh")
                .args(["-c", cmd])
                .output()
                .with_context(|| format!("failed to run password command `{}`", cmd))?;
            if !output.status.success() {
                bail!("password command `{}` exited with {}", cmd, output.status);
            }
            String::from_utf8_lossy(&output.stdout).trim_end().to_string()
        } else {
            bail!("account {} has no password_command or password_env", self.email);
        };

        Ok(Credentials { username, password })
    }
}
