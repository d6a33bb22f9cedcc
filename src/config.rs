use std::path::PathBuf;

/// Cipher preference list offered during key exchange, strongest first.
/// Entries the transport does not implement are skipped with a debug log.
pub const DEFAULT_CIPHERS: &[&str] = &[
    "aes128-ctr",
    "aes192-ctr",
    "aes256-ctr",
    "aes128-gcm@openssh.com",
    "aes256-gcm@openssh.com",
    "chacha20-poly1305@openssh.com",
    "arcfour256",
    "arcfour128",
    "aes128-cbc",
    "3des-cbc",
    "aes192-cbc",
    "aes256-cbc",
];

/// Connection settings for one SSH endpoint. Password and private-key
/// authentication are both attempted when configured; the key is tried first.
#[derive(Debug, Clone)]
pub struct SshConfig {
    pub user: String,
    pub password: Option<String>,
    pub key_path: Option<PathBuf>,
    pub ciphers: Vec<String>,
}

impl SshConfig {
    pub fn new(
        user: impl Into<String>,
        password: Option<String>,
        key_path: Option<PathBuf>,
    ) -> Self {
        SshConfig {
            user: user.into(),
            password,
            key_path,
            ciphers: DEFAULT_CIPHERS.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        SshConfig::new("root", None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_carries_cipher_list() {
        let config = SshConfig::default();
        assert_eq!(config.user, "root");
        assert!(config.ciphers.iter().any(|c| c == "aes256-ctr"));
        assert!(config.ciphers.iter().any(|c| c == "aes128-gcm@openssh.com"));
    }
}
