//! Assertions shared by integration tests

/// Assert `stamped` is `<original>_<YYYYMMDDTHHMMSS>`, optionally followed by `_<n>`
pub fn assert_stamped(stamped: &str, original: &str) {
    let prefix = format!("{original}_");
    let rest = stamped
        .strip_prefix(&prefix)
        .unwrap_or_else(|| panic!("{stamped:?} does not start with {prefix:?}"));

    let (timestamp, counter) = match rest.split_once('_') {
        Some((ts, n)) => (ts, Some(n)),
        None => (rest, None),
    };

    let valid = timestamp.len() == 15
        && timestamp.char_indices().all(|(i, c)| {
            if i == 8 {
                c == 'T'
            } else {
                c.is_ascii_digit()
            }
        });
    assert!(valid, "{timestamp:?} is not a YYYYMMDDTHHMMSS timestamp");

    if let Some(n) = counter {
        assert!(
            n.parse::<u32>().is_ok(),
            "collision suffix {n:?} is not a number"
        );
    }
}
