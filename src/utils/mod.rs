pub fn format_number(num: u64) -> String {
    let num_str = num.to_string();
    let chars: Vec<char> = num_str.chars().collect();
    let mut result = String::new();

    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i).is_multiple_of(3) {
            result.push(',');
        }
        result.push(*c);
    }

    result
}

/// Upgrade `http://` and protocol-relative URLs to `https://`.
pub fn to_https(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("http://") {
        format!("https://{}", rest)
    } else if let Some(rest) = url.strip_prefix("//") {
        format!("https://{}", rest)
    } else {
        url.to_string()
    }
}

/// File name stem built from a video title: alphanumerics plus ` -_.`,
/// trimmed, at most 50 characters. Falls back to `fallback` when nothing is
/// left.
pub fn safe_filename(title: &str, fallback: &str) -> String {
    let filtered: String = title
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.'))
        .take(50)
        .collect();
    let trimmed = filtered.trim().trim_matches('.');
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Extension of the last path segment, ignoring query and fragment.
pub fn url_extension(url: &str) -> Option<String> {
    let path = url::Url::parse(url).ok()?.path().to_string();
    let file = path.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    let valid = !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| ext.to_ascii_lowercase())
}
