//! Decryption seam.
//!
//! Real ciphers (RC4, AES) live with the host; this layer only needs to ask
//! for a per-object transform and run string/stream payloads through it. The
//! resolver installs a factory when the trailer carries `/Encrypt` and the
//! host has provided one.

/// Decrypts the payloads of one indirect object.
pub trait CipherTransform {
    fn decrypt_string(&self, data: &[u8]) -> Vec<u8>;

    fn decrypt_stream(&self, data: &[u8]) -> Vec<u8> {
        self.decrypt_string(data)
    }
}

/// Creates per-object transforms keyed by `(object number, generation)`.
pub trait CipherTransformFactory {
    fn create_transform(&self, num: u32, generation: u16) -> Box<dyn CipherTransform>;

    /// Whether the document's metadata stream is encrypted. When false the
    /// metadata is fetched with decryption suppressed.
    fn encrypt_metadata(&self) -> bool {
        true
    }
}
