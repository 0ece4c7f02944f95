const ALPHABET: &[u8; 26] = b"abcdefghijklmnopqrstuvwxyz";

/// Maps each timestamp digit to a letter (`0` -> `a` ... `9` -> `j`); anything
/// else becomes `a`.
pub fn timestamp_key(timestamp: &str) -> String {
    timestamp
        .chars()
        .map(|c| match c.to_digit(10) {
            Some(d) => ALPHABET[d as usize] as char,
            None => 'a',
        })
        .collect()
}

/// Keyed substitution over ASCII letters with a repeating key. Non-letters
/// pass through untouched and do not advance the key.
#[derive(Debug, Clone)]
pub struct KeyedCipher {
    shifts: Vec<u8>,
}

impl KeyedCipher {
    /// Returns `None` for a key without any ASCII letters.
    pub fn new(key: &str) -> Option<Self> {
        let shifts: Vec<u8> = key
            .bytes()
            .filter(|b| b.is_ascii_alphabetic())
            .map(|b| b.to_ascii_lowercase() - b'a')
            .collect();
        if shifts.is_empty() {
            None
        } else {
            Some(Self { shifts })
        }
    }

    pub fn from_timestamp(timestamp: &str) -> Option<Self> {
        Self::new(&timestamp_key(timestamp))
    }

    pub fn encrypt(&self, text: &str) -> String {
        String::from_utf8_lossy(&self.apply_bytes(text.as_bytes(), true)).into_owned()
    }

    pub fn decrypt(&self, text: &str) -> String {
        String::from_utf8_lossy(&self.apply_bytes(text.as_bytes(), false)).into_owned()
    }

    /// Byte-level form of the cipher. Multi-byte UTF-8 sequences are never
    /// ASCII letters, so they survive intact.
    pub fn apply_bytes(&self, data: &[u8], forward: bool) -> Vec<u8> {
        let mut key_index = 0;
        data.iter()
            .map(|&b| {
                if !b.is_ascii_alphabetic() {
                    return b;
                }
                let base = if b.is_ascii_uppercase() { b'A' } else { b'a' };
                let shift = self.shifts[key_index % self.shifts.len()];
                key_index += 1;
                let offset = if forward {
                    (b - base + shift) % 26
                } else {
                    (b - base + 26 - shift) % 26
                };
                base + offset
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_key() {
        assert_eq!(timestamp_key("1700000000123"), "bhaaaaaaaabcd");
        assert_eq!(timestamp_key("12x"), "bca");
    }

    #[test]
    fn test_encrypt_golden_vectors() {
        let cipher = KeyedCipher::from_timestamp("1700000000123").unwrap();
        assert_eq!(cipher.encrypt("HelloWorld-abc XYZ!"), "IllloWorld-bdf YFZ!");

        let cipher = KeyedCipher::from_timestamp("9876543210").unwrap();
        assert_eq!(cipher.encrypt("ZzYyXx"), "IhFeCb");
    }

    #[test]
    fn test_decrypt_inverts_encrypt() {
        let cipher = KeyedCipher::new("Secret").unwrap();
        let plain = "Mixed CASE text, 视频 and digits 123";
        let encrypted = cipher.encrypt(plain);
        assert_ne!(encrypted, plain);
        assert_eq!(cipher.decrypt(&encrypted), plain);
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(KeyedCipher::new("1234").is_none());
        assert!(KeyedCipher::from_timestamp("").is_none());
    }
}
