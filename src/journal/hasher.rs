//! CF-014: BLAKE3 fingerprints for plans and unit catalogs.

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// Hash an ordered list of components, NUL-separated so `["ab", "c"]`
/// and `["a", "bc"]` differ.
pub fn composite_hash(components: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for c in components {
        hasher.update(c.as_bytes());
        hasher.update(b"\0");
    }
    format!("blake3:{}", hasher.finalize().to_hex())
}

/// Fingerprint of a plan: target plus every step as `id@version`, in order.
pub fn plan_hash<'a, I>(target: &str, steps: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let pinned: Vec<String> = steps
        .into_iter()
        .map(|(id, version)| format!("{}@{}", id, version))
        .collect();
    let mut components = vec![target];
    components.extend(pinned.iter().map(String::as_str));
    composite_hash(&components)
}
