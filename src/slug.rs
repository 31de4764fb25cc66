//! URL identifiers for directory and correspondence rows.
//!
//! Users, incoming and outgoing records get a slug derived from a random
//! UUID generated at insert time. Nothing ever rewrites the slug column, so
//! the identifier stays stable for the lifetime of the row.

use uuid::Uuid;

/// A freshly generated `uid` together with the slug derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlugIdentity {
    pub uid: Uuid,
    pub slug: String,
}

impl SlugIdentity {
    pub fn generate() -> Self {
        Self::from_uid(Uuid::new_v4())
    }

    pub fn from_uid(uid: Uuid) -> Self {
        let slug = slugify(&uid.hyphenated().to_string());
        Self { uid, slug }
    }
}

/// Lower-cases, drops anything that is not alphanumeric, `-`, `_` or
/// whitespace, and collapses whitespace/dash runs into single dashes.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;

    for ch in input.trim().chars() {
        if ch.is_alphanumeric() || ch == '_' {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(ch.to_lowercase());
        } else if ch.is_whitespace() || ch == '-' {
            pending_dash = true;
        }
    }

    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_slug_keeps_hyphenated_form() {
        let uid = Uuid::parse_str("6F9619FF-8B86-D011-B42D-00C04FC964FF").unwrap();
        let identity = SlugIdentity::from_uid(uid);
        assert_eq!(identity.slug, "6f9619ff-8b86-d011-b42d-00c04fc964ff");
        assert_eq!(identity.uid, uid);
    }

    #[test]
    fn generated_slugs_are_distinct() {
        let a = SlugIdentity::generate();
        let b = SlugIdentity::generate();
        assert!(!a.slug.is_empty());
        assert_ne!(a.slug, b.slug);
    }

    #[test]
    fn slugify_collapses_separators_and_strips_symbols() {
        assert_eq!(slugify("  Human Resources & Admin "), "human-resources-admin");
        assert_eq!(slugify("Legal -- Contracts"), "legal-contracts");
        assert_eq!(slugify("R&D_lab"), "rd_lab");
    }

    #[test]
    fn slugify_of_symbols_only_is_empty() {
        assert_eq!(slugify("!!!"), "");
    }
}
