use super::FlatField;

/// Encodes flattened fields as `application/x-www-form-urlencoded`.
///
/// Keys and values are percent-encoded per RFC 3986 (spaces become `%20`).
/// Absent values are omitted.
#[must_use]
pub fn urlencode(fields: &[FlatField]) -> String {
    fields
        .iter()
        .filter_map(|field| {
            field.value.as_ref().map(|value| {
                format!(
                    "{}={}",
                    urlencoding::encode(&field.path),
                    urlencoding::encode(value)
                )
            })
        })
        .collect::<Vec<_>>()
        .join("&")
}
