//! Repository signing keys in `did:key` form
//!
//! Repositories advertise their signing key as a `did:key`: a multicodec-tagged
//! public key, base58btc multibase encoded. [`PublicKey`] parses and prints that form
//! and converts to the verifying key of each supported curve.

const ED25519: u64 = 0xED;
const SECP256K1: u64 = 0xE7;
const P256: u64 = 0x1200;

/// Curve of a [`PublicKey`], by multicodec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCodec {
    /// ed25519
    Ed25519,
    /// secp256k1 (k256)
    Secp256k1,
    /// NIST P-256
    P256,
    /// Anything else
    Unknown(u64),
}

impl KeyCodec {
    /// Multicodec value
    pub fn code(self) -> u64 {
        match self {
            KeyCodec::Ed25519 => ED25519,
            KeyCodec::Secp256k1 => SECP256K1,
            KeyCodec::P256 => P256,
            KeyCodec::Unknown(c) => c,
        }
    }

    fn from_code(code: u64) -> Self {
        match code {
            ED25519 => KeyCodec::Ed25519,
            SECP256K1 => KeyCodec::Secp256k1,
            P256 => KeyCodec::P256,
            other => KeyCodec::Unknown(other),
        }
    }

    fn check(self, bytes: &[u8]) -> Result<(), CryptoError> {
        match self {
            KeyCodec::Ed25519 if bytes.len() != 32 => Err(CryptoError::InvalidLength {
                expected: 32,
                got: bytes.len(),
            }),
            KeyCodec::Ed25519 => Ok(()),
            KeyCodec::Secp256k1 | KeyCodec::P256 => match bytes.first() {
                Some(0x02 | 0x03) if bytes.len() == 33 => Ok(()),
                Some(0x04) if bytes.len() == 65 => Ok(()),
                Some(_) if bytes.len() != 33 && bytes.len() != 65 => {
                    Err(CryptoError::InvalidLength {
                        expected: 33,
                        got: bytes.len(),
                    })
                }
                _ => Err(CryptoError::InvalidFormat),
            },
            KeyCodec::Unknown(code) => Err(CryptoError::UnsupportedCodec(code)),
        }
    }
}

/// Public half of a repository signing key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    /// Curve
    pub codec: KeyCodec,
    /// Raw key bytes; SEC1 for the ECDSA curves
    pub bytes: Vec<u8>,
}

/// Key parsing or conversion failure
#[derive(Debug, Clone, thiserror::Error, miette::Diagnostic, PartialEq, Eq)]
pub enum CryptoError {
    /// Not multibase
    #[error("key is not valid multibase")]
    MultibaseDecode,
    /// Codec prefix missing or truncated
    #[error("key has no multicodec prefix")]
    MulticodecDecode,
    /// Codec not one of the supported curves
    #[error("key codec 0x{0:x} is not supported")]
    UnsupportedCodec(u64),
    /// Wrong byte length for the curve
    #[error("key is {got} bytes, expected {expected}")]
    InvalidLength {
        /// Length for the curve
        expected: usize,
        /// Length seen
        got: usize,
    },
    /// Missing `did:key:` prefix or bad SEC1 tag
    #[error("key is malformed")]
    InvalidFormat,
    /// Curve library rejected the bytes
    #[error("key rejected by curve: {0}")]
    Conversion(String),
}

impl PublicKey {
    /// Parse a multibase Multikey value (the part after `did:key:`)
    pub fn decode(multibase_str: &str) -> Result<PublicKey, CryptoError> {
        let (_, data) =
            multibase::decode(multibase_str).map_err(|_| CryptoError::MultibaseDecode)?;
        let (code, rest) = read_varint(&data).ok_or(CryptoError::MulticodecDecode)?;
        let codec = KeyCodec::from_code(code);
        codec.check(rest)?;
        Ok(PublicKey {
            codec,
            bytes: rest.to_vec(),
        })
    }

    /// Parse a `did:key:z...` identifier
    pub fn from_did_key(did_key: &str) -> Result<PublicKey, CryptoError> {
        did_key
            .strip_prefix("did:key:")
            .ok_or(CryptoError::InvalidFormat)
            .and_then(Self::decode)
    }

    /// Multibase Multikey form
    pub fn encode(&self) -> String {
        let mut buf = Vec::with_capacity(self.bytes.len() + 3);
        write_varint(&mut buf, self.codec.code());
        buf.extend_from_slice(&self.bytes);
        multibase::encode(multibase::Base::Base58Btc, buf)
    }

    /// `did:key` form
    pub fn did_key(&self) -> String {
        format!("did:key:{}", self.encode())
    }

    fn expect_codec(&self, codec: KeyCodec) -> Result<(), CryptoError> {
        if self.codec == codec {
            Ok(())
        } else {
            Err(CryptoError::UnsupportedCodec(self.codec.code()))
        }
    }

    /// ed25519 verifying key
    #[cfg(feature = "crypto-ed25519")]
    pub fn to_ed25519(&self) -> Result<ed25519_dalek::VerifyingKey, CryptoError> {
        self.expect_codec(KeyCodec::Ed25519)?;
        let raw: &[u8; 32] =
            self.bytes
                .as_slice()
                .try_into()
                .map_err(|_| CryptoError::InvalidLength {
                    expected: 32,
                    got: self.bytes.len(),
                })?;
        ed25519_dalek::VerifyingKey::from_bytes(raw)
            .map_err(|e| CryptoError::Conversion(e.to_string()))
    }

    /// secp256k1 public key
    #[cfg(feature = "crypto-k256")]
    pub fn to_k256(&self) -> Result<k256::PublicKey, CryptoError> {
        self.expect_codec(KeyCodec::Secp256k1)?;
        k256::PublicKey::from_sec1_bytes(&self.bytes)
            .map_err(|e| CryptoError::Conversion(e.to_string()))
    }

    /// P-256 public key
    #[cfg(feature = "crypto-p256")]
    pub fn to_p256(&self) -> Result<p256::PublicKey, CryptoError> {
        self.expect_codec(KeyCodec::P256)?;
        p256::PublicKey::from_sec1_bytes(&self.bytes)
            .map_err(|e| CryptoError::Conversion(e.to_string()))
    }
}

#[cfg(feature = "crypto-k256")]
impl From<&k256::ecdsa::VerifyingKey> for PublicKey {
    fn from(key: &k256::ecdsa::VerifyingKey) -> Self {
        PublicKey {
            codec: KeyCodec::Secp256k1,
            bytes: key.to_encoded_point(true).as_bytes().to_vec(),
        }
    }
}

#[cfg(feature = "crypto-p256")]
impl From<&p256::ecdsa::VerifyingKey> for PublicKey {
    fn from(key: &p256::ecdsa::VerifyingKey) -> Self {
        PublicKey {
            codec: KeyCodec::P256,
            bytes: key.to_encoded_point(true).as_bytes().to_vec(),
        }
    }
}

#[cfg(feature = "crypto-ed25519")]
impl From<&ed25519_dalek::VerifyingKey> for PublicKey {
    fn from(key: &ed25519_dalek::VerifyingKey) -> Self {
        PublicKey {
            codec: KeyCodec::Ed25519,
            bytes: key.to_bytes().to_vec(),
        }
    }
}

/// LEB128 unsigned varint, at most ten bytes
fn read_varint(data: &[u8]) -> Option<(u64, &[u8])> {
    let mut value = 0u64;
    for (i, byte) in data.iter().take(10).enumerate() {
        let bits = u64::from(byte & 0x7F);
        if i == 9 && bits > 1 {
            return None;
        }
        value |= bits << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, &data[i + 1..]));
        }
    }
    None
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}
