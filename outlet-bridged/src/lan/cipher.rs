use aes::Aes128;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use anyhow::{anyhow, bail, Result};

const BLOCK_LEN: usize = 16;

/// Seed of the key every device uses for its UDP announcements
const BROADCAST_KEY_SEED: &[u8] = b"yGAdlopoPVldABfn";

pub fn broadcast_key() -> [u8; 16] {
    md5::compute(BROADCAST_KEY_SEED).0
}

fn cipher_for(key: &[u8]) -> Result<Aes128> {
    Aes128::new_from_slice(key)
        .map_err(|_| anyhow!("local key must be 16 bytes, got {}", key.len()))
}

/// AES-128-ECB with PKCS#7 padding
pub fn encrypt(key: &[u8], plain: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;
    let pad = BLOCK_LEN - plain.len() % BLOCK_LEN;

    let mut buf = Vec::with_capacity(plain.len() + pad);
    buf.extend_from_slice(plain);
    buf.resize(plain.len() + pad, pad as u8);

    for chunk in buf.chunks_exact_mut(BLOCK_LEN) {
        cipher.encrypt_block(aes::Block::from_mut_slice(chunk));
    }
    Ok(buf)
}

pub fn decrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() || data.len() % BLOCK_LEN != 0 {
        bail!("ciphertext length {} is not a multiple of {}", data.len(), BLOCK_LEN);
    }
    let cipher = cipher_for(key)?;

    let mut buf = data.to_vec();
    for chunk in buf.chunks_exact_mut(BLOCK_LEN) {
        cipher.decrypt_block(aes::Block::from_mut_slice(chunk));
    }

    let pad = buf.last().copied().unwrap_or(0) as usize;
    if pad == 0 || pad > BLOCK_LEN || buf[buf.len() - pad..].iter().any(|&b| b as usize != pad) {
        bail!("bad padding, wrong key?");
    }
    buf.truncate(buf.len() - pad);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8] = b"0123456789abcdef";

    #[test]
    fn test_encrypt_pads_to_block() {
        assert_eq!(encrypt(KEY, b"hello").unwrap().len(), 16);
        // A full block still gets a whole block of padding
        assert_eq!(encrypt(KEY, &[7u8; 16]).unwrap().len(), 32);
    }

    #[test]
    fn test_decrypt_recovers_payload() {
        let plain = br#"{"dps":{"1":true}}"#;
        let sealed = encrypt(KEY, plain).unwrap();
        assert_ne!(&sealed[..plain.len()], &plain[..]);
        assert_eq!(decrypt(KEY, &sealed).unwrap(), plain);
    }

    #[test]
    fn test_wrong_key_length_rejected() {
        let err = encrypt(b"short", b"x").unwrap_err();
        assert!(err.to_string().contains("16 bytes"));
    }

    #[test]
    fn test_truncated_ciphertext_rejected() {
        assert!(decrypt(KEY, &[1, 2, 3]).is_err());
        assert!(decrypt(KEY, &[]).is_err());
    }
}
