//! Membership snapshot carried in OK and ADD bodies.
//!
//! Format: version byte, then a bincode record. OK carries the session key and every
//! current member; ADD carries only the newly joined contact. Records are re-validated
//! on decode.

use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::contact::{Contact, ContactError, Endpoint};
use crate::identity::{KeyError, PublicKey, SessionKey};
use crate::protocol::PROTOCOL_VERSION;

/// Upper bound on an encoded record, checked by bincode before allocating.
const MAX_SNAPSHOT_LEN: u64 = 64 * 1024;

/// Session key (OK only) and contact records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub session_key: Option<SessionKey>,
    pub contacts: Vec<Contact>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotRecord {
    session_key: Option<SessionKey>,
    contacts: Vec<ContactRecord>,
}

#[derive(Serialize, Deserialize)]
struct ContactRecord {
    name: String,
    public_key: PublicKey,
    endpoints: Vec<Endpoint>,
}

impl ContactRecord {
    fn from_contact(c: &Contact) -> Self {
        ContactRecord {
            name: c.name().to_owned(),
            public_key: *c.public_key(),
            endpoints: c.endpoints().to_vec(),
        }
    }

    fn into_contact(self) -> Result<Contact, SnapshotError> {
        self.public_key.validate()?;
        Ok(Contact::with_endpoints(self.name, self.public_key, self.endpoints)?)
    }
}

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_big_endian()
        .with_limit(MAX_SNAPSHOT_LEN)
}

/// Body of an OK: session key plus the current members.
pub fn encode_welcome<'a>(
    session_key: &SessionKey,
    members: impl IntoIterator<Item = &'a Contact>,
) -> Result<Vec<u8>, SnapshotError> {
    encode(Some(session_key), members)
}

/// Body of an ADD: the newly joined contact.
pub fn encode_joiner(contact: &Contact) -> Result<Vec<u8>, SnapshotError> {
    encode(None, [contact])
}

fn encode<'a>(
    session_key: Option<&SessionKey>,
    contacts: impl IntoIterator<Item = &'a Contact>,
) -> Result<Vec<u8>, SnapshotError> {
    let record = SnapshotRecord {
        session_key: session_key.cloned(),
        contacts: contacts.into_iter().map(ContactRecord::from_contact).collect(),
    };
    let mut out = vec![PROTOCOL_VERSION];
    out.extend(options().serialize(&record)?);
    Ok(out)
}

/// Decode and validate a snapshot body.
pub fn decode(bytes: &[u8]) -> Result<Snapshot, SnapshotError> {
    let (&version, rest) = bytes.split_first().ok_or(SnapshotError::Empty)?;
    if version != PROTOCOL_VERSION {
        return Err(SnapshotError::Version(version));
    }
    let record: SnapshotRecord = options().deserialize(rest)?;
    let contacts = record
        .contacts
        .into_iter()
        .map(ContactRecord::into_contact)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Snapshot {
        session_key: record.session_key,
        contacts,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("empty snapshot")]
    Empty,
    #[error("unsupported snapshot version {0}")]
    Version(u8),
    #[error("malformed snapshot: {0}")]
    Decode(#[from] bincode::Error),
    #[error("invalid contact record: {0}")]
    Contact(#[from] ContactError),
    #[error("invalid public key: {0}")]
    Key(#[from] KeyError),
}
