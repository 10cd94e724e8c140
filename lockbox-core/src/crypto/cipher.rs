//! Field encryption and decryption.
//!
//! Two modes are supported, one per record shape:
//! - AES-256-GCM: 96-bit (12 byte) IV, 128-bit tag appended to the ciphertext
//! - AES-256-CBC: 128-bit (16 byte) IV, PKCS#7 padding
//!
//! A fresh random IV is drawn whenever the caller does not supply one.

use crate::crypto::{keyring::SessionKey, CryptoError, Result};
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const GCM_IV_LEN: usize = 12;
const GCM_TAG_LEN: usize = 16;
const CBC_IV_LEN: usize = 16;
const CBC_BLOCK_LEN: usize = 16;

/// Cipher mode used for a record's secret fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CipherMode {
    /// AES-256-GCM (authenticated)
    Gcm,
    /// AES-256-CBC with PKCS#7 padding
    Cbc,
}

impl CipherMode {
    /// IV length in bytes for this mode.
    pub fn iv_len(&self) -> usize {
        match self {
            Self::Gcm => GCM_IV_LEN,
            Self::Cbc => CBC_IV_LEN,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gcm => "aes-256-gcm",
            Self::Cbc => "aes-256-cbc",
        }
    }
}

/// An encrypted field: ciphertext plus the IV it was produced with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedField {
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,

    #[serde(with = "base64_bytes")]
    pub iv: Vec<u8>,
}

/// Generate a random IV for the given mode.
pub fn generate_iv(mode: CipherMode) -> Vec<u8> {
    let mut iv = vec![0u8; mode.iv_len()];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    iv
}

fn check_iv(mode: CipherMode, iv: &[u8]) -> Result<()> {
    if iv.len() != mode.iv_len() {
        return Err(CryptoError::InvalidIv {
            mode: mode.as_str(),
            expected: mode.iv_len(),
            got: iv.len(),
        });
    }
    Ok(())
}

/// Encrypt `plaintext` under `key`.
///
/// When `iv` is `Some` it is used exactly as given; otherwise a new random
/// IV is generated.
pub fn encrypt(
    key: &SessionKey,
    mode: CipherMode,
    plaintext: &[u8],
    iv: Option<&[u8]>,
) -> Result<EncryptedField> {
    if plaintext.is_empty() {
        return Err(CryptoError::EncryptionFailed(
            "Cannot encrypt empty data".to_string(),
        ));
    }

    let iv = match iv {
        Some(iv) => iv.to_vec(),
        None => generate_iv(mode),
    };
    check_iv(mode, &iv)?;

    let ciphertext = match mode {
        CipherMode::Gcm => {
            let cipher = Aes256Gcm::new(key.as_bytes().into());
            cipher
                .encrypt(Nonce::from_slice(&iv), plaintext)
                .map_err(|e| CryptoError::EncryptionFailed(format!("{}", e)))?
        }
        CipherMode::Cbc => Aes256CbcEnc::new_from_slices(key.as_bytes(), &iv)
            .map_err(|e| CryptoError::EncryptionFailed(format!("{}", e)))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
    };

    Ok(EncryptedField { ciphertext, iv })
}

/// Decrypt a field produced by [`encrypt`].
///
/// GCM verifies the tag and fails on tampering or a wrong key. CBC can only
/// detect bad padding, so a wrong key occasionally yields garbage; callers
/// validate the plaintext further.
pub fn decrypt(key: &SessionKey, mode: CipherMode, field: &EncryptedField) -> Result<Vec<u8>> {
    if field.ciphertext.is_empty() {
        return Err(CryptoError::DecryptionFailed(
            "Cannot decrypt empty data".to_string(),
        ));
    }
    check_iv(mode, &field.iv)?;

    match mode {
        CipherMode::Gcm => {
            if field.ciphertext.len() < GCM_TAG_LEN {
                return Err(CryptoError::DecryptionFailed(
                    "Ciphertext too short - missing auth tag".to_string(),
                ));
            }
            let cipher = Aes256Gcm::new(key.as_bytes().into());
            cipher
                .decrypt(Nonce::from_slice(&field.iv), field.ciphertext.as_slice())
                .map_err(|_| CryptoError::AuthenticationFailed)
        }
        CipherMode::Cbc => {
            if field.ciphertext.len() % CBC_BLOCK_LEN != 0 {
                return Err(CryptoError::DecryptionFailed(format!(
                    "Ciphertext length {} is not a multiple of the block size",
                    field.ciphertext.len()
                )));
            }
            Aes256CbcDec::new_from_slices(key.as_bytes(), &field.iv)
                .map_err(|e| CryptoError::DecryptionFailed(format!("{}", e)))?
                .decrypt_padded_vec_mut::<Pkcs7>(&field.ciphertext)
                .map_err(|_| CryptoError::DecryptionFailed("Invalid padding".to_string()))
        }
    }
}

/// Decrypt to a string
pub fn decrypt_to_string(
    key: &SessionKey,
    mode: CipherMode,
    field: &EncryptedField,
) -> Result<String> {
    let bytes = decrypt(key, mode, field)?;
    String::from_utf8(bytes)
        .map_err(|_| CryptoError::DecryptionFailed("Invalid UTF-8".to_string()))
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Vec<u8>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODES: [CipherMode; 2] = [CipherMode::Gcm, CipherMode::Cbc];

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = SessionKey::generate();
        let plaintext = b"sk_live_51H8xYZ and some trailing text";

        for mode in MODES {
            let encrypted = encrypt(&key, mode, plaintext, None).unwrap();
            assert_eq!(encrypted.iv.len(), mode.iv_len());
            let decrypted = decrypt(&key, mode, &encrypted).unwrap();
            assert_eq!(plaintext.to_vec(), decrypted);
        }
    }

    #[test]
    fn test_different_ivs() {
        let key = SessionKey::generate();

        for mode in MODES {
            let a = encrypt(&key, mode, b"Same data", None).unwrap();
            let b = encrypt(&key, mode, b"Same data", None).unwrap();
            assert_ne!(a.iv, b.iv);
            assert_ne!(a.ciphertext, b.ciphertext);
        }
    }

    #[test]
    fn test_supplied_iv_is_reused() {
        let key = SessionKey::generate();

        for mode in MODES {
            let iv = generate_iv(mode);
            let encrypted = encrypt(&key, mode, b"payload", Some(&iv)).unwrap();
            assert_eq!(encrypted.iv, iv);
        }
    }

    #[test]
    fn test_wrong_iv_length_rejected() {
        let key = SessionKey::generate();
        let result = encrypt(&key, CipherMode::Gcm, b"payload", Some(&[0u8; 16]));
        assert!(matches!(result, Err(CryptoError::InvalidIv { .. })));
    }

    #[test]
    fn test_gcm_wrong_key_fails() {
        let key1 = SessionKey::generate();
        let key2 = SessionKey::generate();

        let encrypted = encrypt(&key1, CipherMode::Gcm, b"Secret data", None).unwrap();
        assert!(matches!(
            decrypt(&key2, CipherMode::Gcm, &encrypted),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_gcm_tampering_detected() {
        let key = SessionKey::generate();
        let mut encrypted = encrypt(&key, CipherMode::Gcm, b"Original data", None).unwrap();
        encrypted.ciphertext[0] ^= 0xFF;

        assert!(decrypt(&key, CipherMode::Gcm, &encrypted).is_err());
    }

    #[test]
    fn test_cbc_truncated_ciphertext_fails() {
        let key = SessionKey::generate();
        let mut encrypted = encrypt(&key, CipherMode::Cbc, b"Original data", None).unwrap();
        encrypted.ciphertext.pop();

        assert!(decrypt(&key, CipherMode::Cbc, &encrypted).is_err());
    }

    #[test]
    fn test_empty_data_fails() {
        let key = SessionKey::generate();

        for mode in MODES {
            assert!(encrypt(&key, mode, b"", None).is_err());
            let empty = EncryptedField {
                ciphertext: vec![],
                iv: generate_iv(mode),
            };
            assert!(decrypt(&key, mode, &empty).is_err());
        }
    }

    #[test]
    fn test_field_serializes_as_base64() {
        let field = EncryptedField {
            ciphertext: vec![1, 2, 3],
            iv: vec![0xff; 12],
        };
        let json = serde_json::to_string(&field).unwrap();
        assert_eq!(json, r#"{"ciphertext":"AQID","iv":"////////////////"}"#);

        let back: EncryptedField = serde_json::from_str(&json).unwrap();
        assert_eq!(back, field);
    }
}
