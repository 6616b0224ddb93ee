//! Identity and directory files, plus key generation.
//!
//! Identity (`<name>.toml`, secret):
//! ```toml
//! name = "alice"
//! signing_key = "<64 hex>"
//! exchange_key = "<64 hex>"
//! ```
//! Directory:
//! ```toml
//! [[contact]]
//! name = "bob"
//! public_key = "<128 hex>"
//! endpoints = ["192.168.1.7:2001"]
//! ```

use std::path::{Path, PathBuf};

use pigeon_core::{Contact, ContactBook, ContactError, Endpoint, KeyError, Keypair, PublicKey};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct IdentityFile {
    name: String,
    signing_key: String,
    exchange_key: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct DirectoryFile {
    #[serde(default, rename = "contact")]
    contacts: Vec<ContactEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ContactEntry {
    name: String,
    public_key: String,
    endpoints: Vec<String>,
}

/// Name and key pair from an identity file.
pub fn load_identity(path: &Path) -> Result<(String, Keypair), KeyFileError> {
    let text = read(path)?;
    parse_identity(&text).map_err(|e| e.at(path))
}

pub fn parse_identity(text: &str) -> Result<(String, Keypair), KeyFileError> {
    let file: IdentityFile = toml::from_str(text)?;
    pigeon_core::contact::validate_name(&file.name)?;
    let signing = secret(&file.signing_key)?;
    let exchange = secret(&file.exchange_key)?;
    Ok((file.name, Keypair::from_secret_bytes(signing, exchange)))
}

fn secret(hex_str: &str) -> Result<[u8; 32], KeyFileError> {
    let bytes = hex::decode(hex_str.trim()).map_err(KeyError::from)?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        KeyFileError::Key(KeyError::Length {
            expected: 32,
            got: b.len(),
        })
    })
}

pub fn render_identity(name: &str, keypair: &Keypair) -> Result<String, KeyFileError> {
    let (signing, exchange) = keypair.secret_bytes();
    Ok(toml::to_string(&IdentityFile {
        name: name.to_owned(),
        signing_key: hex::encode(signing),
        exchange_key: hex::encode(exchange),
    })?)
}

/// Contacts from a directory file. Any malformed entry fails the whole load.
pub fn load_directory(path: &Path) -> Result<ContactBook, KeyFileError> {
    let text = read(path)?;
    parse_directory(&text).map_err(|e| e.at(path))
}

pub fn parse_directory(text: &str) -> Result<ContactBook, KeyFileError> {
    let file: DirectoryFile = toml::from_str(text)?;
    file.contacts.into_iter().map(ContactEntry::into_contact).collect()
}

impl ContactEntry {
    fn into_contact(self) -> Result<Contact, KeyFileError> {
        let public_key = PublicKey::from_hex(&self.public_key)?;
        public_key.validate()?;
        let endpoints = self
            .endpoints
            .iter()
            .map(|s| {
                s.parse::<Endpoint>().map_err(|_| KeyFileError::Endpoint {
                    contact: self.name.clone(),
                    value: s.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Contact::with_endpoints(self.name, public_key, endpoints)?)
    }
}

/// `[[contact]]` block for publishing in other nodes' directories.
pub fn render_directory_entry(contact: &Contact) -> Result<String, KeyFileError> {
    let file = DirectoryFile {
        contacts: vec![ContactEntry {
            name: contact.name().to_owned(),
            public_key: contact.public_key().to_hex(),
            endpoints: contact.endpoints().iter().map(Endpoint::to_string).collect(),
        }],
    };
    Ok(toml::to_string(&file)?)
}

/// Fresh key pair written to `<dir>/<name>.toml`. Refuses to overwrite.
pub fn keygen(name: &str, dir: &Path) -> Result<(PathBuf, Keypair), KeyFileError> {
    pigeon_core::contact::validate_name(name)?;
    let keypair = Keypair::generate();
    let path = dir.join(format!("{}.toml", name));
    if path.exists() {
        return Err(KeyFileError::Exists(path));
    }
    let text = render_identity(name, &keypair)?;
    std::fs::write(&path, text).map_err(|source| KeyFileError::Io {
        path: path.clone(),
        source,
    })?;
    Ok((path, keypair))
}

fn read(path: &Path) -> Result<String, KeyFileError> {
    std::fs::read_to_string(path).map_err(|source| KeyFileError::Io {
        path: path.to_owned(),
        source,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum KeyFileError {
    #[error("reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{} already exists", .0.display())]
    Exists(PathBuf),
    #[error("{}: {source}", path.display())]
    In {
        path: PathBuf,
        source: Box<KeyFileError>,
    },
    #[error("syntax: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("serialize: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("key: {0}")]
    Key(#[from] KeyError),
    #[error("contact: {0}")]
    Contact(#[from] ContactError),
    #[error("contact {contact}: bad endpoint {value:?}")]
    Endpoint { contact: String, value: String },
}

impl KeyFileError {
    fn at(self, path: &Path) -> Self {
        KeyFileError::In {
            path: path.to_owned(),
            source: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pigeon_core::Directory;

    #[test]
    fn identity_survives_file_round_trip() {
        let kp = Keypair::generate();
        let text = render_identity("alice", &kp).unwrap();
        let (name, back) = parse_identity(&text).unwrap();
        assert_eq!(name, "alice");
        assert_eq!(back.public_key(), kp.public_key());
    }

    #[test]
    fn identity_with_short_key_rejected() {
        let text = "name = \"alice\"\nsigning_key = \"abcd\"\nexchange_key = \"abcd\"\n";
        assert!(matches!(
            parse_identity(text),
            Err(KeyFileError::Key(KeyError::Length { expected: 32, got: 2 }))
        ));
    }

    #[test]
    fn directory_entries_load() {
        let bob = Keypair::generate();
        let text = format!(
            "[[contact]]\nname = \"bob\"\npublic_key = \"{}\"\nendpoints = [\"10.0.0.2:2001\", \"10.0.0.2:2001\", \"10.0.0.3:2002\"]\n",
            bob.public_key().to_hex()
        );
        let book = parse_directory(&text).unwrap();
        let c = book.lookup("bob").unwrap();
        assert_eq!(c.public_key(), bob.public_key());
        assert_eq!(c.endpoints().len(), 2);
    }

    #[test]
    fn empty_directory_is_fine() {
        assert!(parse_directory("").unwrap().is_empty());
    }

    #[test]
    fn malformed_entries_rejected() {
        let key = Keypair::generate().public_key().to_hex();
        let bad_endpoint = format!(
            "[[contact]]\nname = \"bob\"\npublic_key = \"{}\"\nendpoints = [\"nowhere\"]\n",
            key
        );
        assert!(matches!(
            parse_directory(&bad_endpoint),
            Err(KeyFileError::Endpoint { .. })
        ));
        let no_endpoint = format!(
            "[[contact]]\nname = \"bob\"\npublic_key = \"{}\"\nendpoints = []\n",
            key
        );
        assert!(matches!(
            parse_directory(&no_endpoint),
            Err(KeyFileError::Contact(ContactError::NoEndpoints))
        ));
        let bad_key = "[[contact]]\nname = \"bob\"\npublic_key = \"zz\"\nendpoints = [\"10.0.0.1:1\"]\n";
        assert!(matches!(parse_directory(bad_key), Err(KeyFileError::Key(_))));
    }

    #[test]
    fn keygen_writes_loadable_identity() {
        let dir = tempfile::tempdir().unwrap();
        let (path, kp) = keygen("carol", dir.path()).unwrap();
        let (name, loaded) = load_identity(&path).unwrap();
        assert_eq!(name, "carol");
        assert_eq!(loaded.public_key(), kp.public_key());
        assert!(matches!(
            keygen("carol", dir.path()),
            Err(KeyFileError::Exists(_))
        ));
    }

    #[test]
    fn published_entry_parses_back() {
        let kp = Keypair::generate();
        let me = Contact::new("dave", *kp.public_key(), "10.1.1.1:2001".parse().unwrap()).unwrap();
        let text = render_directory_entry(&me).unwrap();
        let book = parse_directory(&text).unwrap();
        assert_eq!(book.lookup("dave"), Some(&me));
    }

    #[test]
    fn ipv6_entry_parses_back() {
        let kp = Keypair::generate();
        let me = Contact::new("dave", *kp.public_key(), "[::1]:2001".parse().unwrap()).unwrap();
        let text = render_directory_entry(&me).unwrap();
        assert!(text.contains("[::1]:2001"), "{}", text);
        let book = parse_directory(&text).unwrap();
        assert_eq!(book.lookup("dave"), Some(&me));
    }

    #[test]
    fn load_errors_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("directory.toml");
        std::fs::write(&path, "[[contact]]\nname = 1\n").unwrap();
        let err = load_directory(&path).unwrap_err();
        assert!(err.to_string().contains("directory.toml"));
    }
}
