/// Ordered header list used on the upstream leg. Kept as plain pairs so
/// adapters can build headers without pulling in an HTTP framework type.
pub type Headers = Vec<(String, String)>;

pub fn header_set(headers: &mut Headers, name: &str, value: impl Into<String>) {
    header_remove(headers, name);
    headers.push((name.to_string(), value.into()));
}

pub fn header_get<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

pub fn header_remove(headers: &mut Headers, name: &str) {
    headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
}
