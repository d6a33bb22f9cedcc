//! SFTP session handle backed by an SSH connection.
//!
//! The transport dials and authenticates with `russh` (password and/or
//! private-key auth, configurable cipher preference, pluggable host-key
//! verification defaulting to accept-any) and runs the `sftp` subsystem
//! through `russh-sftp`. FUSE dispatch is synchronous, so every call bridges
//! onto the runtime with `Handle::block_on`; callers run on plain threads,
//! never on a runtime worker.

use std::borrow::Cow;
use std::io::SeekFrom;
use std::sync::Arc;

use russh::client::{self, Handle};
use russh::keys::{HashAlg, PrivateKeyWithHashAlg, PublicKey};
use russh::Disconnect;
use russh_sftp::client::SftpSession as RawSftpSession;
use russh_sftp::protocol::{FileAttributes, OpenFlags, StatusCode};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::runtime::Handle as RuntimeHandle;

use crate::config::SshConfig;
use crate::sftp::{RemoteDirEntry, RemoteStat, SftpError, SftpHandle, SftpResult, SftpSession};

struct ClientHandler;

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        // Host-key verification is pluggable in principle; the default
        // accepts any key, matching classic sshfs behavior.
        tracing::warn!(
            "accepting server host key without verification: {}",
            server_public_key.fingerprint(HashAlg::Sha256)
        );
        Ok(true)
    }
}

/// Production [`SftpSession`] over one authenticated SSH connection.
pub struct SftpClient {
    rt: RuntimeHandle,
    sftp: RawSftpSession,
    ssh: Handle<ClientHandler>,
}

impl SftpClient {
    /// Dial `server` (a `host:port` address), authenticate, and open the
    /// SFTP subsystem. A failure here is fatal for the mount that needed
    /// the session.
    pub async fn connect(config: &SshConfig, server: &str) -> SftpResult<SftpClient> {
        let mut preferred = russh::Preferred::DEFAULT.clone();
        let ciphers = cipher_preference(&config.ciphers);
        if !ciphers.is_empty() {
            preferred.cipher = Cow::Owned(ciphers);
        }

        let ssh_config = client::Config {
            preferred,
            ..Default::default()
        };

        let mut ssh = client::connect(Arc::new(ssh_config), server, ClientHandler)
            .await
            .map_err(|e| SftpError::Transport(format!("dial {}: {}", server, e)))?;

        authenticate(&mut ssh, config).await?;

        let channel = ssh
            .channel_open_session()
            .await
            .map_err(|e| SftpError::Transport(format!("open channel: {}", e)))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| SftpError::Transport(format!("request sftp subsystem: {}", e)))?;

        let sftp = RawSftpSession::new(channel.into_stream())
            .await
            .map_err(|e| SftpError::Protocol(e.to_string()))?;

        tracing::debug!(server, user = %config.user, "sftp session established");

        Ok(SftpClient {
            rt: RuntimeHandle::current(),
            sftp,
            ssh,
        })
    }
}

async fn authenticate(
    ssh: &mut Handle<ClientHandler>,
    config: &SshConfig,
) -> SftpResult<()> {
    if let Some(key_path) = &config.key_path {
        match russh::keys::load_secret_key(key_path, None) {
            Ok(key) => {
                let hash_alg = ssh.best_supported_rsa_hash().await.ok().flatten().flatten();
                let key = PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg);
                let auth = ssh
                    .authenticate_publickey(&config.user, key)
                    .await
                    .map_err(|e| SftpError::Transport(format!("publickey auth: {}", e)))?;
                if auth.success() {
                    tracing::debug!(user = %config.user, "authenticated with private key");
                    return Ok(());
                }
                tracing::debug!("private key rejected, falling back to password");
            }
            Err(e) => {
                tracing::warn!("could not load private key {}: {}", key_path.display(), e);
            }
        }
    }

    if let Some(password) = &config.password {
        let auth = ssh
            .authenticate_password(&config.user, password)
            .await
            .map_err(|e| SftpError::Transport(format!("password auth: {}", e)))?;
        if auth.success() {
            tracing::debug!(user = %config.user, "authenticated with password");
            return Ok(());
        }
    }

    Err(SftpError::Transport(format!(
        "authentication failed for user {}",
        config.user
    )))
}

fn cipher_preference(names: &[String]) -> Vec<russh::cipher::Name> {
    use russh::cipher;
    let mut out = Vec::new();
    for name in names {
        let mapped = match name.as_str() {
            "aes128-ctr" => Some(cipher::AES_128_CTR),
            "aes192-ctr" => Some(cipher::AES_192_CTR),
            "aes256-ctr" => Some(cipher::AES_256_CTR),
            "aes256-gcm@openssh.com" => Some(cipher::AES_256_GCM),
            "chacha20-poly1305@openssh.com" => Some(cipher::CHACHA20_POLY1305),
            _ => None,
        };
        match mapped {
            Some(c) => out.push(c),
            None => tracing::debug!(cipher = %name, "cipher not supported by transport, skipping"),
        }
    }
    out
}

fn map_sftp_error(path: &str, err: russh_sftp::client::error::Error) -> SftpError {
    use russh_sftp::client::error::Error;
    match err {
        Error::Status(status) if status.status_code == StatusCode::NoSuchFile => {
            SftpError::NotFound(path.to_string())
        }
        other => SftpError::Protocol(other.to_string()),
    }
}

fn attrs_to_stat(attrs: &FileAttributes) -> RemoteStat {
    let mtime = attrs.mtime.unwrap_or(0) as i64;
    RemoteStat {
        mode: attrs.permissions.unwrap_or(0),
        size: attrs.size.unwrap_or(0),
        mtime,
        // The access-time attribute is optional on the wire; mtime stands in
        // when the server does not report one.
        atime: attrs.atime.map(|t| t as i64).unwrap_or(mtime),
        is_dir: attrs.is_dir(),
    }
}

fn open_flags_from_libc(flags: i32) -> OpenFlags {
    let mut out = match flags & libc::O_ACCMODE {
        libc::O_WRONLY => OpenFlags::WRITE,
        libc::O_RDWR => OpenFlags::READ | OpenFlags::WRITE,
        _ => OpenFlags::READ,
    };
    if flags & libc::O_CREAT != 0 {
        out |= OpenFlags::CREATE;
    }
    if flags & libc::O_TRUNC != 0 {
        out |= OpenFlags::TRUNCATE;
    }
    if flags & libc::O_APPEND != 0 {
        out |= OpenFlags::APPEND;
    }
    out
}

impl SftpSession for SftpClient {
    fn stat(&self, path: &str) -> SftpResult<RemoteStat> {
        self.rt.block_on(async {
            let attrs = self
                .sftp
                .metadata(path)
                .await
                .map_err(|e| map_sftp_error(path, e))?;
            Ok(attrs_to_stat(&attrs))
        })
    }

    fn read_dir(&self, path: &str) -> SftpResult<Vec<RemoteDirEntry>> {
        self.rt.block_on(async {
            let entries = self
                .sftp
                .read_dir(path)
                .await
                .map_err(|e| map_sftp_error(path, e))?;
            Ok(entries
                .into_iter()
                .map(|entry| RemoteDirEntry {
                    name: entry.file_name(),
                    stat: attrs_to_stat(&entry.metadata()),
                })
                .collect())
        })
    }

    fn mkdir(&self, path: &str) -> SftpResult<()> {
        self.rt.block_on(async {
            self.sftp
                .create_dir(path)
                .await
                .map_err(|e| map_sftp_error(path, e))
        })
    }

    fn create(&self, path: &str) -> SftpResult<Box<dyn SftpHandle>> {
        self.rt.block_on(async {
            let file = self
                .sftp
                .create(path)
                .await
                .map_err(|e| map_sftp_error(path, e))?;
            Ok(Box::new(SftpFileHandle {
                rt: self.rt.clone(),
                file: Some(file),
            }) as Box<dyn SftpHandle>)
        })
    }

    fn open(&self, path: &str, flags: i32) -> SftpResult<Box<dyn SftpHandle>> {
        self.rt.block_on(async {
            let file = self
                .sftp
                .open_with_flags(path, open_flags_from_libc(flags))
                .await
                .map_err(|e| map_sftp_error(path, e))?;
            Ok(Box::new(SftpFileHandle {
                rt: self.rt.clone(),
                file: Some(file),
            }) as Box<dyn SftpHandle>)
        })
    }

    fn truncate(&self, path: &str, size: u64) -> SftpResult<()> {
        let attrs = FileAttributes {
            size: Some(size),
            ..Default::default()
        };
        self.rt.block_on(async {
            self.sftp
                .set_metadata(path, attrs)
                .await
                .map_err(|e| map_sftp_error(path, e))
        })
    }

    fn chmod(&self, path: &str, mode: u32) -> SftpResult<()> {
        let attrs = FileAttributes {
            permissions: Some(mode),
            ..Default::default()
        };
        self.rt.block_on(async {
            self.sftp
                .set_metadata(path, attrs)
                .await
                .map_err(|e| map_sftp_error(path, e))
        })
    }

    fn chown(&self, path: &str, uid: u32, gid: u32) -> SftpResult<()> {
        let attrs = FileAttributes {
            uid: Some(uid),
            gid: Some(gid),
            ..Default::default()
        };
        self.rt.block_on(async {
            self.sftp
                .set_metadata(path, attrs)
                .await
                .map_err(|e| map_sftp_error(path, e))
        })
    }

    fn remove(&self, path: &str) -> SftpResult<()> {
        self.rt.block_on(async {
            self.sftp
                .remove_file(path)
                .await
                .map_err(|e| map_sftp_error(path, e))
        })
    }

    fn remove_directory(&self, path: &str) -> SftpResult<()> {
        self.rt.block_on(async {
            self.sftp
                .remove_dir(path)
                .await
                .map_err(|e| map_sftp_error(path, e))
        })
    }

    fn rename(&self, old: &str, new: &str) -> SftpResult<()> {
        self.rt.block_on(async {
            self.sftp
                .rename(old, new)
                .await
                .map_err(|e| map_sftp_error(old, e))
        })
    }

    fn close(&self) -> SftpResult<()> {
        self.rt.block_on(async {
            if let Err(e) = self.sftp.close().await {
                tracing::debug!("sftp close: {}", e);
            }
            self.ssh
                .disconnect(Disconnect::ByApplication, "session closed", "en")
                .await
                .map_err(|e| SftpError::Transport(e.to_string()))
        })
    }
}

struct SftpFileHandle {
    rt: RuntimeHandle,
    file: Option<russh_sftp::client::fs::File>,
}

impl SftpFileHandle {
    fn file(&mut self) -> SftpResult<&mut russh_sftp::client::fs::File> {
        self.file
            .as_mut()
            .ok_or_else(|| SftpError::Protocol("handle already closed".to_string()))
    }
}

impl SftpHandle for SftpFileHandle {
    fn seek(&mut self, offset: u64) -> SftpResult<()> {
        let rt = self.rt.clone();
        let file = self.file()?;
        rt.block_on(async {
            file.seek(SeekFrom::Start(offset))
                .await
                .map(|_| ())
                .map_err(SftpError::Io)
        })
    }

    fn read(&mut self, buf: &mut [u8]) -> SftpResult<usize> {
        let rt = self.rt.clone();
        let file = self.file()?;
        rt.block_on(async { file.read(buf).await.map_err(SftpError::Io) })
    }

    fn write(&mut self, buf: &[u8]) -> SftpResult<usize> {
        let rt = self.rt.clone();
        let file = self.file()?;
        rt.block_on(async { file.write(buf).await.map_err(SftpError::Io) })
    }

    fn close(&mut self) -> SftpResult<()> {
        let rt = self.rt.clone();
        match self.file.take() {
            Some(mut file) => rt.block_on(async {
                file.shutdown().await.map_err(SftpError::Io)
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cipher_preference_skips_unsupported() {
        let names = vec![
            "aes256-ctr".to_string(),
            "arcfour128".to_string(),
            "chacha20-poly1305@openssh.com".to_string(),
        ];
        let mapped = cipher_preference(&names);
        assert_eq!(mapped.len(), 2);
    }

    #[test]
    fn test_open_flags_translation() {
        let flags = open_flags_from_libc(libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC);
        assert!(flags.contains(OpenFlags::WRITE));
        assert!(flags.contains(OpenFlags::CREATE));
        assert!(flags.contains(OpenFlags::TRUNCATE));
        assert!(!flags.contains(OpenFlags::READ));
    }

    #[test]
    fn test_stat_falls_back_to_mtime_for_atime() {
        let attrs = FileAttributes {
            mtime: Some(1_700_000_000),
            atime: None,
            ..Default::default()
        };
        let stat = attrs_to_stat(&attrs);
        assert_eq!(stat.atime, stat.mtime);
    }
}
