//! Non-fatal reporting of TOML keys a table defines that the typed model
//! doesn't know about — the `toml`-crate equivalent of BurntSushi's
//! `md.Undecoded()` used by the original local-config loader.

/// Logs (at debug level) every key in `table` that isn't in `known`.
/// `context` is prepended to each message for readability (file path,
/// optionally a `[section]` qualifier).
pub fn report_unknown_keys(table: &toml::Value, known: &[&str], context: &str) {
    let Some(table) = table.as_table() else { return };
    for key in table.keys() {
        if !known.contains(&key.as_str()) {
            log::debug!("{context}: undecoded key {key:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn does_not_panic_on_non_table_values() {
        report_unknown_keys(&toml::Value::String("x".into()), &["a"], "ctx");
    }

    #[test]
    fn accepts_known_keys_silently() {
        let v: toml::Value = toml::from_str("a = 1\nb = 2\n").unwrap();
        report_unknown_keys(&v, &["a", "b"], "ctx");
    }
}
