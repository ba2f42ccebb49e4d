/// Minimal `multipart/form-data` parsing for single-file uploads.

/// Returns the index of the first occurrence of `needle` in `haystack`.
pub fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Splits `haystack` on every occurrence of `needle`, returning the pieces
/// between occurrences (excluding the needle itself).
pub fn split_on<'a>(haystack: &'a [u8], needle: &[u8]) -> Vec<&'a [u8]> {
    let mut result = Vec::new();
    let mut start = 0;
    while start <= haystack.len() {
        if let Some(pos) = find_subsequence(&haystack[start..], needle) {
            result.push(&haystack[start..start + pos]);
            start += pos + needle.len();
        } else {
            result.push(&haystack[start..]);
            break;
        }
    }
    result
}

/// Extracts the boundary token from a Content-Type header value like
/// `multipart/form-data; boundary=----WebKitFormBoundaryXXX`.
pub fn extract_boundary(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .map(|s| s.trim())
        .find(|s| s.starts_with("boundary="))
        .map(|s| s["boundary=".len()..].trim_matches('"').to_owned())
}

/// An uploaded file part.
#[derive(Debug, Clone, PartialEq)]
pub struct FilePart {
    pub filename: Option<String>,
    /// The part's own `Content-Type`, if it declared one.
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// Extracts the first file part (one with a `filename` attribute) from a
/// multipart/form-data body. Returns `None` if not found or on parse error.
pub fn extract_file(body: &[u8], boundary: &str) -> Option<FilePart> {
    let delimiter = format!("--{}", boundary);
    let parts = split_on(body, delimiter.as_bytes());

    for part in parts {
        let sep = b"\r\n\r\n";
        let Some(sep_pos) = find_subsequence(part, sep) else { continue };
        let headers = String::from_utf8_lossy(&part[..sep_pos]);
        let Some(filename) = quoted_attribute(&headers, "filename") else { continue };

        let content_type = headers.lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.trim().eq_ignore_ascii_case("content-type").then(|| value.trim().to_owned())
            });
        let raw = &part[sep_pos + sep.len()..];
        let data = raw.strip_suffix(b"\r\n").unwrap_or(raw).to_vec();
        return Some(FilePart {
            filename: (!filename.is_empty()).then_some(filename),
            content_type,
            data,
        });
    }
    None
}

/// Parses `key="..."` from a header string.
fn quoted_attribute(headers: &str, key: &str) -> Option<String> {
    let pattern = format!("{}=\"", key);
    let pos = headers.find(&pattern)?;
    let rest = &headers[pos + pattern.len()..];
    let end = rest.find('"')?;
    Some(rest[..end].to_owned())
}
