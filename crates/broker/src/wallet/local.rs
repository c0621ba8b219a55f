use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{WalletError, WalletResult};
use crate::sigs;
use crate::types::{Address, KeyInfo, KeyType, MsgMeta, Signature};

use super::WalletApi;

const KEY_FILE_PREFIX: &str = "wallet-";
const KEY_FILE_SUFFIX: &str = ".json";

/// Keystore-backed wallet holding private keys in process.
///
/// Opened on a directory, every key is persisted as one JSON [`KeyInfo`] file
/// named after its address. [`LocalWallet::in_memory`] keeps keys only for the
/// lifetime of the process.
pub struct LocalWallet {
    keys: RwLock<HashMap<Address, KeyInfo>>,
    dir: Option<PathBuf>,
}

impl LocalWallet {
    pub fn in_memory() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            dir: None,
        }
    }

    /// Opens (creating if needed) the keystore directory and loads every key in it.
    pub fn open(dir: impl Into<PathBuf>) -> WalletResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| keystore_error(&dir, e))?;

        let mut keys = HashMap::new();
        for entry in fs::read_dir(&dir).map_err(|e| keystore_error(&dir, e))? {
            let path = entry.map_err(|e| keystore_error(&dir, e))?.path();
            let is_key_file = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| {
                    name.starts_with(KEY_FILE_PREFIX) && name.ends_with(KEY_FILE_SUFFIX)
                });
            if !is_key_file {
                continue;
            }

            let contents = fs::read(&path).map_err(|e| keystore_error(&path, e))?;
            let info: KeyInfo = serde_json::from_slice(&contents).map_err(|e| {
                WalletError::Keystore(format!("parsing {}: {e}", path.display()))
            })?;
            let address = sigs::address_of(&info)?;
            keys.insert(address, info);
        }

        info!(dir = %dir.display(), keys = keys.len(), "opened local keystore");
        Ok(Self {
            keys: RwLock::new(keys),
            dir: Some(dir),
        })
    }

    fn key_path(dir: &Path, address: &Address) -> PathBuf {
        dir.join(format!("{KEY_FILE_PREFIX}{address}{KEY_FILE_SUFFIX}"))
    }

    fn persist(&self, address: &Address, info: &KeyInfo) -> WalletResult<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let path = Self::key_path(dir, address);
        let contents = serde_json::to_vec(info)
            .map_err(|e| WalletError::Keystore(format!("serializing key: {e}")))?;
        let mut file = open_private(&path).map_err(|e| keystore_error(&path, e))?;
        file.write_all(&contents)
            .and_then(|()| file.sync_all())
            .map_err(|e| keystore_error(&path, e))
    }

    fn unpersist(&self, address: &Address) -> WalletResult<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let path = Self::key_path(dir, address);
        match fs::remove_file(&path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(keystore_error(&path, e)),
            _ => Ok(()),
        }
    }

    fn insert(&self, info: KeyInfo) -> WalletResult<Address> {
        let address = sigs::address_of(&info)?;
        self.persist(&address, &info)?;
        self.keys
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(address.clone(), info);
        Ok(address)
    }

    fn key(&self, address: &Address) -> WalletResult<KeyInfo> {
        self.keys
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(address)
            .cloned()
            .ok_or_else(|| WalletError::KeyNotFound(address.clone()))
    }
}

#[async_trait]
impl WalletApi for LocalWallet {
    async fn new_key(&self, key_type: KeyType) -> WalletResult<Address> {
        let address = self.insert(sigs::generate(key_type))?;
        info!(%address, "generated new key");
        Ok(address)
    }

    async fn has_key(&self, address: &Address) -> WalletResult<bool> {
        Ok(self
            .keys
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(address))
    }

    async fn list_keys(&self) -> WalletResult<Vec<Address>> {
        Ok(self
            .keys
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect())
    }

    async fn sign(
        &self,
        address: &Address,
        payload: &[u8],
        meta: &MsgMeta,
    ) -> WalletResult<Signature> {
        meta.ensure_known()?;
        let key = self.key(address)?;
        debug!(%address, msg_type = %meta.msg_type, len = payload.len(), "signing locally");
        sigs::sign(&key, payload)
    }

    async fn export_key(&self, address: &Address) -> WalletResult<KeyInfo> {
        self.key(address)
    }

    async fn import_key(&self, info: &KeyInfo) -> WalletResult<Address> {
        self.insert(info.clone())
    }

    async fn delete_key(&self, address: &Address) -> WalletResult<()> {
        let mut keys = self.keys.write().unwrap_or_else(|e| e.into_inner());
        if !keys.contains_key(address) {
            return Err(WalletError::KeyNotFound(address.clone()));
        }
        self.unpersist(address)?;
        keys.remove(address);
        Ok(())
    }
}

/// Opens a key file for writing, readable by the owner only from the moment it exists.
fn open_private(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt as _, PermissionsExt as _};
        let file = options.mode(0o600).open(path)?;
        // `mode` only applies on creation; tighten files left by older runs.
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
        Ok(file)
    }
    #[cfg(not(unix))]
    {
        options.open(path)
    }
}

fn keystore_error(path: &Path, error: std::io::Error) -> WalletError {
    WalletError::Keystore(format!("{}: {error}", path.display()))
}
