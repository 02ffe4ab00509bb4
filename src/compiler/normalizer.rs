/// Header comparison form: BOM/zero-width characters stripped, internal
/// whitespace collapsed, lowercased.
pub(crate) fn normalize_header(value: &str) -> String {
    let cleaned = value.replace(['\u{feff}', '\u{200b}'], "");
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.to_ascii_lowercase()
}

/// Join-key form of an email address.
pub(crate) fn normalize_email(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}
