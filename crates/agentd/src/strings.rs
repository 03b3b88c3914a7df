//! String helpers.

/// Concatenates a sequence of string slices into one owned string.
///
/// The result is sized up front; empty inputs contribute nothing.
pub fn concat_all(parts: &[&str]) -> String {
    let size: usize = parts.iter().map(|p| p.len()).sum();
    let mut out = String::with_capacity(size);
    for part in parts {
        out.push_str(part);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concatenates_in_order() {
        assert_eq!(
            concat_all(&["f", "o", "o", "", "b", "a", "r", "!"]),
            "foobar!"
        );
    }

    #[test]
    fn empty_list_yields_empty_string() {
        assert_eq!(concat_all(&[]), "");
    }

    #[test]
    fn single_part() {
        assert_eq!(concat_all(&["alone"]), "alone");
    }

    #[test]
    fn all_empty_parts() {
        assert_eq!(concat_all(&["", "", ""]), "");
    }
}
