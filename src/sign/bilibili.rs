use md5::{Digest, Md5};
use std::collections::BTreeMap;

const MIXIN_KEY_ENC_TAB: [usize; 64] = [
    46, 47, 18, 2, 53, 8, 23, 32, 15, 50, 10, 31, 58, 3, 45, 35, 27, 43, 5, 49, 33, 9, 42, 19, 29,
    28, 14, 39, 12, 38, 41, 13, 37, 48, 7, 16, 24, 55, 40, 61, 26, 17, 0, 1, 60, 51, 30, 4, 22, 25,
    54, 21, 56, 59, 6, 63, 57, 62, 11, 36, 20, 34, 44, 52,
];

const XOR_CODE: u64 = 23442827791579;
const MASK_CODE: u64 = 2251799813685247;
const MAX_AID: u64 = 1 << 51;
const BASE: u64 = 58;
const BV_TABLE: &[u8; 58] = b"FcwAPNKTMug3GV5Lj7EJnHpWsx4tb8haYeviqBz6rkCy12mUSDQX9RdoZf";

/// Scrambles the two WBI keys into the 32-character signing key. Returns
/// `None` when the keys are too short to index.
pub fn mixin_key(img_key: &str, sub_key: &str) -> Option<String> {
    let raw: Vec<char> = img_key.chars().chain(sub_key.chars()).collect();
    if raw.len() < 64 {
        return None;
    }
    Some(MIXIN_KEY_ENC_TAB.iter().take(32).map(|&i| raw[i]).collect())
}

/// Extracts a WBI key from its image URL (`.../<key>.png`).
pub fn key_from_url(url: &str) -> Option<String> {
    let file = url.rsplit('/').next()?;
    let key = file.split('.').next()?;
    if key.is_empty() {
        None
    } else {
        Some(key.to_string())
    }
}

/// Signs query parameters: adds `wts`, sorts, strips `!'()*` from values and
/// appends `w_rid = md5(query + mixin)`. Returns the final query string.
pub fn wbi_sign(params: &[(&str, String)], wts: u64, mixin: &str) -> String {
    let mut sorted: BTreeMap<&str, String> = params
        .iter()
        .map(|(k, v)| {
            let cleaned: String = v.chars().filter(|c| !"!'()*".contains(*c)).collect();
            (*k, cleaned)
        })
        .collect();
    sorted.insert("wts", wts.to_string());

    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(sorted.iter())
        .finish();
    let w_rid = hex::encode(Md5::digest(format!("{}{}", query, mixin).as_bytes()));

    format!("{}&w_rid={}", query, w_rid)
}

pub fn bv_to_av(bvid: &str) -> Option<u64> {
    let mut chars: Vec<u8> = bvid.bytes().collect();
    if chars.len() != 12 || !bvid.starts_with("BV1") {
        return None;
    }
    chars.swap(3, 9);
    chars.swap(4, 7);

    let mut value: u64 = 0;
    for c in &chars[3..] {
        let index = BV_TABLE.iter().position(|t| t == c)? as u64;
        value = value.checked_mul(BASE)?.checked_add(index)?;
    }
    Some((value & MASK_CODE) ^ XOR_CODE)
}

pub fn av_to_bv(aid: u64) -> String {
    let mut chars = *b"BV1000000000";
    let mut index = chars.len() - 1;
    let mut value = (MAX_AID | aid) ^ XOR_CODE;
    while value > 0 && index > 2 {
        chars[index] = BV_TABLE[(value % BASE) as usize];
        value /= BASE;
        index -= 1;
    }
    chars.swap(3, 9);
    chars.swap(4, 7);
    String::from_utf8_lossy(&chars).into_owned()
}
