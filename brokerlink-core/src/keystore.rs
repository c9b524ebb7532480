//! Generates, persists and loads the ECDSA key pair used to register this
//! installation as a trusted device during 2FA.
//!
//! The private key is never logged: [`KeyPair`] derives `Debug` by hand so
//! that the private half always prints as a placeholder.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use k256::ecdsa::{SigningKey, VerifyingKey};
use k256::pkcs8::{DecodePrivateKey as _, DecodePublicKey as _, EncodePrivateKey as _, EncodePublicKey as _, LineEnding};

use crate::error::{Error, Result};

const PRIVATE_KEY_FILE: &str = "key.pem";
const PUBLIC_KEY_FILE: &str = "key.pub.pem";

/// An ECDSA (P-256) key pair used as this installation's device identity.
///
/// Exactly one key pair exists per installation; it is generated once and
/// reloaded on every subsequent start.
pub struct KeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("signing_key", &"<redacted>")
            .field("verifying_key", &self.verifying_key)
            .finish()
    }
}

impl KeyPair {
    /// Generates a fresh key pair using the OS random number generator.
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut rand::rngs::OsRng);
        let verifying_key = *signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// The DER `SubjectPublicKeyInfo` of the public key, base64-encoded.
    ///
    /// This is the value sent as `deviceKey` during 2FA verification.
    pub fn public_key_base64(&self) -> Result<String> {
        let der = self
            .verifying_key
            .to_public_key_der()
            .map_err(|err| Error::Config(format!("could not DER-encode public key: {err}")))?;
        Ok(BASE64.encode(der.as_bytes()))
    }
}

/// Persists and loads a single [`KeyPair`] in a per-user config directory.
pub struct KeyStore {
    dir: PathBuf,
}

impl KeyStore {
    /// Resolves the config directory used to store the key pair.
    ///
    /// Uses the platform convention for per-user application config
    /// directories (e.g. `~/.config/brokerlink` on Linux).
    pub fn resolve_default_dir() -> Result<PathBuf> {
        directories::ProjectDirs::from("io", "brokerlink", "brokerlink")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .ok_or_else(|| Error::Config("could not determine config directory".to_string()))
    }

    /// Creates a key store rooted at the given directory. Creates the
    /// directory (and parents) if it doesn't exist.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn private_key_path(&self) -> PathBuf {
        self.dir.join(PRIVATE_KEY_FILE)
    }

    fn public_key_path(&self) -> PathBuf {
        self.dir.join(PUBLIC_KEY_FILE)
    }

    /// Whether a key pair has already been persisted in this store.
    pub fn has_stored(&self) -> bool {
        self.private_key_path().is_file() && self.public_key_path().is_file()
    }

    /// Loads the persisted key pair. Fails if none has been saved yet.
    pub fn load(&self) -> Result<KeyPair> {
        let private_pem = fs::read_to_string(self.private_key_path())?;
        let public_pem = fs::read_to_string(self.public_key_path())?;
        let signing_key = SigningKey::from_pkcs8_pem(&private_pem)
            .map_err(|err| Error::Config(format!("could not parse stored private key: {err}")))?;
        let verifying_key = VerifyingKey::from_public_key_pem(&public_pem)
            .map_err(|err| Error::Config(format!("could not parse stored public key: {err}")))?;
        Ok(KeyPair {
            signing_key,
            verifying_key,
        })
    }

    /// Persists the given key pair, atomically replacing any prior one.
    ///
    /// Writes to temp files in the same directory and renames them into
    /// place, so a crash mid-write never leaves a half-written key file.
    /// On Unix, the files are made readable only by the owning user.
    pub fn save(&self, key_pair: &KeyPair) -> Result<()> {
        let private_pem = key_pair
            .signing_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|err| Error::Config(format!("could not PEM-encode private key: {err}")))?;
        let public_pem = key_pair
            .verifying_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|err| Error::Config(format!("could not PEM-encode public key: {err}")))?;

        write_owner_only(&self.dir, &self.private_key_path(), private_pem.as_bytes())?;
        write_owner_only(&self.dir, &self.public_key_path(), public_pem.as_bytes())?;
        Ok(())
    }

    /// Loads the stored key pair, generating and persisting a fresh one if
    /// none exists yet.
    pub fn load_or_generate(&self) -> Result<KeyPair> {
        if self.has_stored() {
            self.load()
        } else {
            let key_pair = KeyPair::generate();
            self.save(&key_pair)?;
            Ok(key_pair)
        }
    }
}

fn write_owner_only(dir: &Path, dest: &Path, contents: &[u8]) -> Result<()> {
    let mut tmp_path = dir.to_path_buf();
    tmp_path.push(format!(
        ".{}.tmp",
        dest.file_name().and_then(|n| n.to_str()).unwrap_or("key")
    ));

    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600))?;
    }

    fs::rename(&tmp_path, dest)?;
    Ok(())
}
