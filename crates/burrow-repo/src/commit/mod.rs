//! Signed commit objects
//!
//! A commit binds a DID to an MST root at a revision, chained to the previous commit and
//! signed by the repository's signing key. Commits are stored as ordinary DAG-CBOR
//! blocks and addressed by CID.

pub mod event;
pub(crate) mod serde_bytes_helper;

use crate::error::{CommitError, Result};
use burrow_common::{Did, KeyCodec, PublicKey, Tid};
use bytes::Bytes;
use cid::Cid as IpldCid;

/// Commit format version written by this crate
pub const COMMIT_VERSION: i64 = 3;

/// Repository commit object
///
/// `prev` is always serialized, as `null` for the genesis commit.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Commit {
    /// Repository DID
    pub did: Did,

    /// Commit version
    pub version: i64,

    /// MST root CID
    pub data: IpldCid,

    /// Revision TID
    pub rev: Tid,

    /// Previous commit CID (None for the genesis commit)
    pub prev: Option<IpldCid>,

    /// Signature over the commit encoded without this field
    #[serde(with = "serde_bytes_helper")]
    pub sig: Bytes,
}

/// The signed portion of a commit
#[derive(serde::Serialize)]
struct UnsignedCommit<'a> {
    did: &'a Did,
    version: i64,
    data: &'a IpldCid,
    rev: &'a Tid,
    prev: &'a Option<IpldCid>,
}

impl Commit {
    /// Create new unsigned commit (current version, empty signature)
    pub fn new_unsigned(did: Did, data: IpldCid, rev: Tid, prev: Option<IpldCid>) -> Self {
        Self {
            did,
            version: COMMIT_VERSION,
            data,
            rev,
            prev,
            sig: Bytes::new(),
        }
    }

    /// Sign this commit with a key
    pub fn sign(mut self, key: &impl SigningKey) -> Result<Self> {
        let unsigned = self.unsigned_bytes()?;
        self.sig = key.sign_bytes(&unsigned)?;
        Ok(self)
    }

    /// Get the repository DID
    pub fn did(&self) -> &Did {
        &self.did
    }

    /// Get the MST root CID
    pub fn data(&self) -> &IpldCid {
        &self.data
    }

    /// Get the revision TID
    pub fn rev(&self) -> &Tid {
        &self.rev
    }

    /// Get the previous commit CID
    pub fn prev(&self) -> Option<&IpldCid> {
        self.prev.as_ref()
    }

    /// Get the signature bytes
    pub fn sig(&self) -> &Bytes {
        &self.sig
    }

    pub(crate) fn unsigned_bytes(&self) -> Result<Vec<u8>> {
        let unsigned = UnsignedCommit {
            did: &self.did,
            version: self.version,
            data: &self.data,
            rev: &self.rev,
            prev: &self.prev,
        };
        serde_ipld_dagcbor::to_vec(&unsigned)
            .map_err(|e| CommitError::Serialization(Box::new(e)).into())
    }

    /// Serialize to DAG-CBOR
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        serde_ipld_dagcbor::to_vec(self).map_err(|e| CommitError::Serialization(Box::new(e)).into())
    }

    /// Deserialize from DAG-CBOR
    ///
    /// Only version 3 commits are accepted.
    pub fn from_cbor(data: &[u8]) -> Result<Self> {
        let commit: Commit = serde_ipld_dagcbor::from_slice(data)
            .map_err(|e| CommitError::Serialization(Box::new(e)))?;
        if commit.version != COMMIT_VERSION {
            return Err(CommitError::InvalidVersion(commit.version).into());
        }
        Ok(commit)
    }

    /// Encode and compute the CID in one pass
    pub fn to_block(&self) -> Result<(IpldCid, Bytes)> {
        let cbor = self.to_cbor()?;
        let cid = crate::mst::util::compute_cid(&cbor)?;
        Ok((cid, Bytes::from(cbor)))
    }

    /// Compute CID of this commit
    pub fn to_cid(&self) -> Result<IpldCid> {
        self.to_block().map(|(cid, _)| cid)
    }

    /// Verify the signature against a public key
    ///
    /// The key type is taken from the key's multicodec.
    pub fn verify(&self, pubkey: &PublicKey) -> std::result::Result<(), CommitError> {
        let unsigned = self
            .unsigned_bytes()
            .map_err(|e| CommitError::Serialization(e.into()))?;
        let signature = self.sig.as_ref();

        match pubkey.codec {
            KeyCodec::Ed25519 => {
                let vk = pubkey
                    .to_ed25519()
                    .map_err(|e| CommitError::InvalidKey(e.to_string()))?;
                let sig = ed25519_dalek::Signature::from_slice(signature)
                    .map_err(|e| CommitError::InvalidSignature(e.to_string()))?;
                vk.verify_strict(&unsigned, &sig)
                    .map_err(|_| CommitError::SignatureVerificationFailed)?;
            }
            KeyCodec::Secp256k1 => {
                use k256::ecdsa::{Signature, VerifyingKey, signature::Verifier};
                let pk = pubkey
                    .to_k256()
                    .map_err(|e| CommitError::InvalidKey(e.to_string()))?;
                let sig = Signature::from_slice(signature)
                    .map_err(|e| CommitError::InvalidSignature(e.to_string()))?;
                VerifyingKey::from(&pk)
                    .verify(&unsigned, &sig)
                    .map_err(|_| CommitError::SignatureVerificationFailed)?;
            }
            KeyCodec::P256 => {
                use p256::ecdsa::{Signature, VerifyingKey, signature::Verifier};
                let pk = pubkey
                    .to_p256()
                    .map_err(|e| CommitError::InvalidKey(e.to_string()))?;
                let sig = Signature::from_slice(signature)
                    .map_err(|e| CommitError::InvalidSignature(e.to_string()))?;
                VerifyingKey::from(&pk)
                    .verify(&unsigned, &sig)
                    .map_err(|_| CommitError::SignatureVerificationFailed)?;
            }
            KeyCodec::Unknown(code) => return Err(CommitError::UnsupportedKeyType(code)),
        }

        Ok(())
    }
}

/// A key that can sign commits
///
/// Implemented for `ed25519_dalek::SigningKey`, `k256::ecdsa::SigningKey` and
/// `p256::ecdsa::SigningKey`. Implementations backed by remote signers may fail, which
/// surfaces as a `Crypto` error from [`Commit::sign`].
pub trait SigningKey {
    /// Sign the given data
    fn sign_bytes(&self, data: &[u8]) -> Result<Bytes>;

    /// Public half, for verification and `did:key` rendering
    fn public_key(&self) -> PublicKey;
}

impl SigningKey for ed25519_dalek::SigningKey {
    fn sign_bytes(&self, data: &[u8]) -> Result<Bytes> {
        use ed25519_dalek::Signer;
        let sig = Signer::sign(self, data);
        Ok(Bytes::copy_from_slice(&sig.to_bytes()))
    }

    fn public_key(&self) -> PublicKey {
        PublicKey::from(&self.verifying_key())
    }
}

impl SigningKey for k256::ecdsa::SigningKey {
    fn sign_bytes(&self, data: &[u8]) -> Result<Bytes> {
        use k256::ecdsa::signature::Signer;
        let sig: k256::ecdsa::Signature = Signer::sign(self, data);
        // low-S form is required for secp256k1 commit signatures
        let sig = sig.normalize_s().unwrap_or(sig);
        Ok(Bytes::copy_from_slice(&sig.to_bytes()))
    }

    fn public_key(&self) -> PublicKey {
        PublicKey::from(self.verifying_key())
    }
}

impl SigningKey for p256::ecdsa::SigningKey {
    fn sign_bytes(&self, data: &[u8]) -> Result<Bytes> {
        use p256::ecdsa::signature::Signer;
        let sig: p256::ecdsa::Signature = Signer::sign(self, data);
        let sig = sig.normalize_s().unwrap_or(sig);
        Ok(Bytes::copy_from_slice(&sig.to_bytes()))
    }

    fn public_key(&self) -> PublicKey {
        PublicKey::from(self.verifying_key())
    }
}
