use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use std::borrow::Cow;

/// Bytes of a base64 string, borrowed or owned.
///
/// SVM payment payloads carry their transaction as standard base64. This wrapper
/// keeps the encoded form around so decode errors can be reported against the
/// original input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64Bytes<'a>(pub Cow<'a, [u8]>);

impl Base64Bytes<'_> {
    /// Decode the base64 string bytes into the raw binary payload.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        b64.decode(&self.0)
    }

    /// Encode raw binary input into base64 string bytes.
    pub fn encode<T: AsRef<[u8]>>(input: T) -> Base64Bytes<'static> {
        let encoded = b64.encode(input.as_ref());
        Base64Bytes(Cow::Owned(encoded.into_bytes()))
    }

    /// The encoded form as a string, assuming it was valid base64 input.
    pub fn as_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.0.as_ref())
    }
}

impl AsRef<[u8]> for Base64Bytes<'_> {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl<'a> From<&'a [u8]> for Base64Bytes<'a> {
    fn from(slice: &'a [u8]) -> Self {
        Base64Bytes(Cow::Borrowed(slice))
    }
}

impl<'a> From<&'a str> for Base64Bytes<'a> {
    fn from(s: &'a str) -> Self {
        Base64Bytes(Cow::Borrowed(s.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_binary_payloads() {
        let raw = [0u8, 1, 2, 254, 255];
        let encoded = Base64Bytes::encode(raw);
        assert_eq!(encoded.decode().unwrap(), raw);
    }

    #[test]
    fn rejects_invalid_base64() {
        let bad = Base64Bytes::from("not-!-base64");
        assert!(bad.decode().is_err());
    }
}
