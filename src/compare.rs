//! Line comparator.

use std::cmp::Ordering;

/// Compares two lines case-insensitively, one code point at a time.
///
/// Code points are lower-cased before comparison and the first mismatch decides the order.
/// If one line is a case-insensitive prefix of the other the shorter line goes first,
/// so an empty line sorts before any non-empty one.
///
/// Lines that differ only in case compare as [`Ordering::Equal`]; neither chunk sort keeps their
/// relative order.
pub fn compare_lines(a: &str, b: &str) -> Ordering {
    let mut lhs = a.chars().map(fold);
    let mut rhs = b.chars().map(fold);

    loop {
        match (lhs.next(), rhs.next()) {
            (Some(l), Some(r)) if l == r => continue,
            (Some(l), Some(r)) => return l.cmp(&r),
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (None, None) => return Ordering::Equal,
        }
    }
}

/// Single code point lower-case fold.
/// Characters whose lower-case form spans several code points fold to the first of them.
#[inline]
fn fold(ch: char) -> char {
    if ch.is_ascii() {
        return ch.to_ascii_lowercase();
    }
    ch.to_lowercase().next().unwrap_or(ch)
}

#[cfg(test)]
mod test {
    use std::cmp::Ordering;

    use rstest::*;

    use super::compare_lines;

    #[rstest]
    #[case("", "", Ordering::Equal)]
    #[case("", "a", Ordering::Less)]
    #[case("a", "", Ordering::Greater)]
    #[case("apple", "Apple", Ordering::Equal)]
    #[case("apple", "Banana", Ordering::Less)]
    #[case("Zebra", "mango", Ordering::Greater)]
    #[case("app", "APPLE", Ordering::Less)]
    #[case("apples", "apple", Ordering::Greater)]
    #[case("a_b", "aB", Ordering::Less)]
    #[case("ÉCOLE", "école", Ordering::Equal)]
    #[case("école", "zoo", Ordering::Greater)]
    #[case("Ωmega", "ωmega", Ordering::Equal)]
    fn test_compare_lines(#[case] a: &str, #[case] b: &str, #[case] expected: Ordering) {
        assert_eq!(compare_lines(a, b), expected);
        assert_eq!(compare_lines(b, a), expected.reverse());
    }
}
