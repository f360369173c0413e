use crate::exception::*;
use miniz_oxide::{deflate::compress_to_vec, inflate::decompress_to_vec};
use serde::{de::DeserializeOwned, Serialize};

pub trait CompressAble {
    fn compress(&self) -> Outcome<Vec<u8>>;
}

pub trait DecompressAble<T> {
    fn decompress(&self) -> Outcome<T>;
}

impl<T> CompressAble for T
where
    T: Serialize + DeserializeOwned,
{
    fn compress(&self) -> Outcome<Vec<u8>> {
        let json = serde_json::to_string(&self).or_persistence("serialize")?;
        let bytes = compress_to_vec(json.as_bytes(), 7);
        Ok(bytes)
    }
}

impl<S, D> DecompressAble<D> for S
where
    S: AsRef<[u8]>,
    D: Serialize + DeserializeOwned,
{
    fn decompress(&self) -> Outcome<D> {
        let bytes = decompress_to_vec(self.as_ref()).or_persistence("inflate")?;
        let json = String::from_utf8(bytes).or_persistence("utf8")?;
        let obj = serde_json::from_str(&json).or_persistence("deserialize")?;
        Ok(obj)
    }
}

/// Identifiers that travel in routes and channel envelopes: non-empty, at most
/// 64 characters from `[A-Za-z0-9_-]`.
pub fn is_route_safe(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
