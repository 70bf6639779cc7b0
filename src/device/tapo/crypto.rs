use crate::device::error::DeviceError;
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::RsaPrivateKey;
use sha1::Sha1;
use sha2::{Digest, Sha256};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

const RSA_KEY_BITS: usize = 1024;

pub(crate) fn new_rsa_keypair() -> Result<RsaPrivateKey, DeviceError> {
    Ok(RsaPrivateKey::new(&mut rand::thread_rng(), RSA_KEY_BITS)?)
}

/// PEM-encoded PKIX `SubjectPublicKeyInfo`, as the handshake expects.
pub(crate) fn pem_public_key(key: &RsaPrivateKey) -> Result<String, DeviceError> {
    Ok(key.to_public_key().to_public_key_pem(LineEnding::LF)?)
}

pub(crate) fn aes128_cbc_encrypt_pkcs7(key: &[u8; 16], iv: &[u8; 16], cleartext: &[u8]) -> Vec<u8> {
    Aes128CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(cleartext)
}

pub(crate) fn aes128_cbc_decrypt_pkcs7(
    key: &[u8; 16],
    iv: &[u8; 16],
    ciphertext: &[u8],
) -> Result<Vec<u8>, DeviceError> {
    Aes128CbcDec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| DeviceError::InvalidPadding)
}

pub(crate) fn sha1_digest(bytes: &[u8]) -> [u8; 20] {
    Sha1::digest(bytes).into()
}

pub(crate) fn sha256_digest(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// Devices identify accounts by the lowercase hex SHA-1 of the email.
pub(crate) fn hash_username(email: &str) -> String {
    hex::encode(sha1_digest(email.as_bytes()))
}

/// Credential digest used by the KLAP handshake.
pub(crate) fn auth_hash(email: &str, password: &str) -> [u8; 32] {
    let mut buffer = Vec::with_capacity(40);
    buffer.extend_from_slice(&sha1_digest(email.as_bytes()));
    buffer.extend_from_slice(&sha1_digest(password.as_bytes()));
    sha256_digest(&buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aes_cbc_round_trips_arbitrary_cleartext() {
        let key = [7u8; 16];
        let iv = [9u8; 16];
        for cleartext in [
            b"".as_slice(),
            b"a".as_slice(),
            b"exactly sixteen!".as_slice(),
            b"{\"method\":\"get_device_info\"}".as_slice(),
        ] {
            let ciphertext = aes128_cbc_encrypt_pkcs7(&key, &iv, cleartext);
            assert_eq!(ciphertext.len() % 16, 0);
            assert!(ciphertext.len() > cleartext.len());
            assert_eq!(
                aes128_cbc_decrypt_pkcs7(&key, &iv, &ciphertext).unwrap(),
                cleartext
            );
        }
    }

    #[test]
    fn malformed_padding_is_rejected() {
        let key = [7u8; 16];
        let iv = [9u8; 16];
        // Not a multiple of the block size.
        assert!(matches!(
            aes128_cbc_decrypt_pkcs7(&key, &iv, &[0u8; 17]),
            Err(DeviceError::InvalidPadding)
        ));
        // Valid length but the final pad byte is garbage after decryption.
        let mut ciphertext = aes128_cbc_encrypt_pkcs7(&key, &iv, b"hello");
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xff;
        assert!(matches!(
            aes128_cbc_decrypt_pkcs7(&key, &iv, &ciphertext),
            Err(DeviceError::InvalidPadding)
        ));
    }

    #[test]
    fn username_hash_is_lowercase_hex_sha1() {
        let hashed = hash_username("test@example.com");
        assert_eq!(hashed.len(), 40);
        assert!(hashed
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        assert_eq!(hashed, hash_username("test@example.com"));
        assert_ne!(hashed, hash_username("other@example.com"));
    }

    #[test]
    fn auth_hash_matches_manual_construction() {
        let email = "test@example.com";
        let password = "test_password";
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&sha1_digest(email.as_bytes()));
        buffer.extend_from_slice(&sha1_digest(password.as_bytes()));
        assert_eq!(auth_hash(email, password), sha256_digest(&buffer));
    }

    #[test]
    fn public_key_pem_is_pkix_wrapped() {
        let key = new_rsa_keypair().unwrap();
        let pem = pem_public_key(&key).unwrap();
        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----\n"));
        assert!(pem.trim_end().ends_with("-----END PUBLIC KEY-----"));
    }
}
