use anyhow::{bail, Context, Result};
use std::fmt;
use std::fs;
use std::path::Path;

/// Archive account read from a one line `account password` file.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    account: String,
    password: String,
}

impl Credentials {
    pub fn new(account: &str, password: &str) -> Self {
        Self {
            account: account.to_string(),
            password: password.to_string(),
        }
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Unable to read credentials file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Malformed credentials file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let line = content.lines().next().unwrap_or_default();
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [account, password] => Ok(Self::new(account, password)),
            _ => bail!("Expected 'account password' on the first line"),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account", &self.account)
            .field("password", &"***")
            .finish()
    }
}
