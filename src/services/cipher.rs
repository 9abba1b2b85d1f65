//! AES-256-CFB stream encryption for content at rest.
//!
//! Output format: 16-byte random IV followed by the ciphertext. There is no
//! authentication tag; integrity is tracked separately through the file hash.

use super::object_store::ByteStream;
use aes::Aes256;
use async_trait::async_trait;
use bytes::Bytes;
use cfb_mode::{BufDecryptor, BufEncryptor, cipher::KeyIvInit};
use futures::{StreamExt, TryStreamExt, future, stream};
use rand::{RngCore, rngs::OsRng};
use std::{io, sync::Arc};
use thiserror::Error;

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("AES key must be {KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("failed to initialise cipher: {0}")]
    CipherInitFailure(String),
    #[error("ciphertext too short: {got} of {IV_LEN} IV bytes available")]
    TruncatedInput { got: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}

fn check_key(key: &[u8]) -> Result<(), CipherError> {
    if key.len() != KEY_LEN {
        return Err(CipherError::InvalidKeyLength(key.len()));
    }
    Ok(())
}

/// Encrypt `input` under `key`, prefixing a fresh random IV.
///
/// The key is validated before `input` is polled.
pub fn encrypt(key: &[u8], input: ByteStream) -> Result<ByteStream, CipherError> {
    check_key(key)?;

    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    let mut encryptor = BufEncryptor::<Aes256>::new_from_slices(key, &iv)
        .map_err(|err| CipherError::CipherInitFailure(err.to_string()))?;

    let body = input.map_ok(move |chunk| {
        let mut buf = chunk.to_vec();
        encryptor.encrypt(&mut buf);
        Bytes::from(buf)
    });

    Ok(stream::once(future::ready(Ok(Bytes::copy_from_slice(&iv))))
        .chain(body)
        .boxed())
}

/// Read the IV prefix from `input` and return a stream of plaintext.
///
/// Fails with `TruncatedInput` when the stream ends before a full IV.
pub async fn decrypt(key: &[u8], mut input: ByteStream) -> Result<ByteStream, CipherError> {
    check_key(key)?;

    let mut iv = Vec::with_capacity(IV_LEN);
    let mut leftover = Bytes::new();
    while iv.len() < IV_LEN {
        match input.next().await {
            Some(Ok(chunk)) => {
                let needed = IV_LEN - iv.len();
                if chunk.len() <= needed {
                    iv.extend_from_slice(&chunk);
                } else {
                    iv.extend_from_slice(&chunk[..needed]);
                    leftover = chunk.slice(needed..);
                }
            }
            Some(Err(err)) => return Err(CipherError::Io(err)),
            None => return Err(CipherError::TruncatedInput { got: iv.len() }),
        }
    }

    let mut decryptor = BufDecryptor::<Aes256>::new_from_slices(key, &iv)
        .map_err(|err| CipherError::CipherInitFailure(err.to_string()))?;

    let lead = (!leftover.is_empty()).then_some(Ok(leftover));
    let body = stream::iter(lead).chain(input).map_ok(move |chunk| {
        let mut buf = chunk.to_vec();
        decryptor.decrypt(&mut buf);
        Bytes::from(buf)
    });
    Ok(body.boxed())
}

/// Cipher capability injected into the upload and download paths.
#[async_trait]
pub trait StreamCipher: Send + Sync {
    fn encrypt(&self, input: ByteStream) -> Result<ByteStream, CipherError>;
    async fn decrypt(&self, input: ByteStream) -> Result<ByteStream, CipherError>;
}

/// [`StreamCipher`] over a fixed, validated 256-bit key.
#[derive(Clone)]
pub struct AesStreamCipher {
    key: Arc<[u8; KEY_LEN]>,
}

impl AesStreamCipher {
    pub fn new(key: &[u8]) -> Result<Self, CipherError> {
        let key: [u8; KEY_LEN] = key
            .try_into()
            .map_err(|_| CipherError::InvalidKeyLength(key.len()))?;
        Ok(Self { key: Arc::new(key) })
    }
}

impl std::fmt::Debug for AesStreamCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesStreamCipher").finish_non_exhaustive()
    }
}

#[async_trait]
impl StreamCipher for AesStreamCipher {
    fn encrypt(&self, input: ByteStream) -> Result<ByteStream, CipherError> {
        encrypt(&self.key[..], input)
    }

    async fn decrypt(&self, input: ByteStream) -> Result<ByteStream, CipherError> {
        decrypt(&self.key[..], input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::object_store::{collect_stream, once_stream};

    const KEY: &[u8; 32] = b"0123456789abcdef0123456789abcdef";

    /// A stream that fails the test if anyone polls it.
    fn untouchable() -> ByteStream {
        stream::poll_fn(|_| -> std::task::Poll<Option<io::Result<Bytes>>> {
            panic!("input stream was polled")
        })
        .boxed()
    }

    fn pieces(parts: &[&'static [u8]]) -> ByteStream {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p)))
                .collect::<Vec<_>>(),
        )
        .boxed()
    }

    #[tokio::test]
    async fn round_trip_across_uneven_chunks() {
        let plaintext = b"The quick brown fox jumps over the lazy dog, twice over.";
        let ciphertext = collect_stream(
            encrypt(KEY, pieces(&[&plaintext[..5], &plaintext[5..23], &plaintext[23..]])).unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(ciphertext.len(), IV_LEN + plaintext.len());
        assert_ne!(&ciphertext[IV_LEN..], &plaintext[..]);

        // re-chunk the ciphertext so the IV straddles a boundary
        let (a, b) = ciphertext.split_at(7);
        let split: ByteStream = stream::iter(vec![
            Ok(Bytes::copy_from_slice(a)),
            Ok(Bytes::copy_from_slice(b)),
        ])
        .boxed();
        let decrypted = collect_stream(decrypt(KEY, split).await.unwrap())
            .await
            .unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[tokio::test]
    async fn empty_plaintext_round_trips() {
        let ciphertext = collect_stream(encrypt(KEY, pieces(&[])).unwrap())
            .await
            .unwrap();
        assert_eq!(ciphertext.len(), IV_LEN);
        let plain = collect_stream(decrypt(KEY, once_stream(ciphertext.into())).await.unwrap())
            .await
            .unwrap();
        assert!(plain.is_empty());
    }

    #[tokio::test]
    async fn each_encryption_uses_a_fresh_iv() {
        let a = collect_stream(encrypt(KEY, pieces(&[b"same"])).unwrap())
            .await
            .unwrap();
        let b = collect_stream(encrypt(KEY, pieces(&[b"same"])).unwrap())
            .await
            .unwrap();
        assert_ne!(a[..IV_LEN], b[..IV_LEN]);
    }

    #[tokio::test]
    async fn wrong_key_length_fails_before_reading_input() {
        assert!(matches!(
            encrypt(b"short", untouchable()),
            Err(CipherError::InvalidKeyLength(5))
        ));
        assert!(matches!(
            decrypt(&[0u8; 33], untouchable()).await,
            Err(CipherError::InvalidKeyLength(33))
        ));
        assert!(matches!(
            AesStreamCipher::new(&[0u8; 16]),
            Err(CipherError::InvalidKeyLength(16))
        ));
    }

    #[tokio::test]
    async fn short_input_is_truncated() {
        let result = decrypt(KEY, pieces(&[b"only-ten-b"])).await;
        assert!(matches!(result, Err(CipherError::TruncatedInput { got: 10 })));
    }

    #[tokio::test]
    async fn trait_object_round_trip() {
        let cipher: Arc<dyn StreamCipher> = Arc::new(AesStreamCipher::new(KEY).unwrap());
        let sealed = cipher.encrypt(pieces(&[b"hello ", b"world"])).unwrap();
        let opened = collect_stream(cipher.decrypt(sealed).await.unwrap())
            .await
            .unwrap();
        assert_eq!(opened, b"hello world");
    }
}
