use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, KeyIvInit};
use bytes::Bytes;
use tokio::sync::mpsc;

use super::{DecryptMessage, DecryptReply, DecryptedView};

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

const BLOCK_SIZE: usize = 16;

fn words_to_bytes(words: [u32; 4]) -> [u8; 16] {
    let mut bytes = [0u8; 16];
    for (chunk, word) in bytes.chunks_exact_mut(4).zip(words) {
        chunk.copy_from_slice(&word.to_be_bytes());
    }
    bytes
}

/// Length of `data` without its PKCS#7 padding. Malformed padding is kept.
fn unpadded_len(data: &[u8]) -> usize {
    let Some(&pad) = data.last() else {
        return 0;
    };
    let pad = pad as usize;
    if pad == 0 || pad > BLOCK_SIZE || pad > data.len() {
        return data.len();
    }
    if data[data.len() - pad..].iter().all(|b| *b as usize == pad) {
        data.len() - pad
    } else {
        data.len()
    }
}

/// AES-128-CBC decryption of one message.
///
/// Trailing bytes that do not fill a whole block are dropped.
pub fn decrypt_aes128(message: &DecryptMessage) -> DecryptedView {
    let key = words_to_bytes(message.key);
    let iv = words_to_bytes(message.iv);

    let usable = message.encrypted.len() / BLOCK_SIZE * BLOCK_SIZE;
    if usable != message.encrypted.len() {
        tracing::warn!(
            source = message.source,
            length = message.encrypted.len(),
            "Encrypted payload is not block aligned, dropping trailing bytes."
        );
    }
    let mut buffer = message.encrypted[..usable].to_vec();

    let decrypted_len = Aes128CbcDec::new(&key.into(), &iv.into())
        .decrypt_padded_mut::<NoPadding>(&mut buffer)
        .map(unpadded_len)
        .unwrap_or_default();

    DecryptedView {
        bytes: Bytes::from(buffer),
        byte_offset: 0,
        byte_length: decrypted_len,
    }
}

/// Spawns the default decrypt worker.
///
/// Messages are decrypted in arrival order on the blocking pool. The worker
/// stops once every request sender is dropped.
pub fn spawn() -> (
    mpsc::UnboundedSender<DecryptMessage>,
    mpsc::UnboundedReceiver<DecryptReply>,
) {
    spawn_with(decrypt_aes128)
}

/// Spawns a worker running `decrypt` for every message.
///
/// A decryption task that fails stops the worker, which closes the reply
/// channel for every caller still waiting.
pub(crate) fn spawn_with(
    decrypt: fn(&DecryptMessage) -> DecryptedView,
) -> (
    mpsc::UnboundedSender<DecryptMessage>,
    mpsc::UnboundedReceiver<DecryptReply>,
) {
    let (request_tx, mut request_rx) = mpsc::unbounded_channel::<DecryptMessage>();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Some(message) = request_rx.recv().await {
            let source = message.source;
            let result = tokio::task::spawn_blocking(move || decrypt(&message)).await;
            match result {
                Ok(decrypted) => {
                    if reply_tx.send(DecryptReply { source, decrypted }).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(source, "Decryption task failed: {e}");
                    break;
                }
            }
        }
        tracing::debug!("Decrypt worker stopped.");
    });

    (request_tx, reply_rx)
}
