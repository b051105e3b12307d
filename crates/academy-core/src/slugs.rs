//! URL slugs for catalog entries

/// Turn a display name into a lowercase, hyphen-separated ASCII slug.
///
/// Non-ASCII input is transliterated first, so "Café Crème" becomes
/// `cafe-creme` and names in other scripts still get a readable slug.
pub use slug::slugify;

/// Pick the first of `base`, `base-1`, `base-2`, ... for which `taken`
/// returns false.
pub fn unique_slug<F>(base: &str, mut taken: F) -> String
where
    F: FnMut(&str) -> bool,
{
    if !taken(base) {
        return base.to_string();
    }

    let mut counter = 1u32;
    loop {
        let candidate = format!("{base}-{counter}");
        if !taken(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn is_safe(slug: &str) -> bool {
        slug.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    }

    #[test]
    fn test_slugify_basic() {
        assert_eq!(slugify("Backend Development"), "backend-development");
        assert_eq!(slugify("  Rust & Systems  "), "rust-systems");
        assert_eq!(slugify("Café Crème"), "cafe-creme");
        assert_eq!(slugify("---"), "");
    }

    #[test]
    fn test_slugify_other_scripts() {
        for name in ["مرحبا بالعالم", "Ελληνικά", "Программирование", "数据科学"] {
            let slug = slugify(name);
            assert!(!slug.is_empty(), "{name} folded to an empty slug");
            assert!(is_safe(&slug), "{name} -> {slug}");
        }
    }

    #[test]
    fn test_unique_slug_suffixes() {
        let existing: HashSet<&str> = ["design", "design-1"].into_iter().collect();

        assert_eq!(unique_slug("design", |s| existing.contains(s)), "design-2");
        assert_eq!(unique_slug("data", |s| existing.contains(s)), "data");
    }

    proptest! {
        #[test]
        fn slug_only_contains_safe_chars(input in "\\PC{0,40}") {
            let slug = slugify(&input);
            prop_assert!(is_safe(&slug));
            prop_assert!(!slug.starts_with('-'));
            prop_assert!(!slug.ends_with('-'));
            prop_assert!(!slug.contains("--"));
        }

        #[test]
        fn slugify_is_idempotent(input in "[a-zA-Z0-9 _.-]{0,40}") {
            let once = slugify(&input);
            prop_assert_eq!(slugify(&once), once.clone());
        }
    }
}
