//! Naming conventions for generated routes: model names -> kebab-case -> plural route segments.

/// Convert a model identifier to kebab-case.
/// e.g. "UserProfile" -> "user-profile", "user_profile" -> "user-profile", "HTTPLog" -> "http-log"
pub fn to_kebab_case(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c == '_' || c == ' ' || c == '-' {
            if !out.is_empty() && !out.ends_with('-') {
                out.push('-');
            }
            continue;
        }
        if c.is_uppercase() {
            let prev_lower = i > 0 && (chars[i - 1].is_lowercase() || chars[i - 1].is_ascii_digit());
            let next_lower = chars.get(i + 1).map(|n| n.is_lowercase()).unwrap_or(false);
            let prev_upper = i > 0 && chars[i - 1].is_uppercase();
            if !out.is_empty() && !out.ends_with('-') && (prev_lower || (prev_upper && next_lower)) {
                out.push('-');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Convert a model identifier to camelCase with a lowercase first letter.
/// e.g. "UserProfile" -> "userProfile", "user-profile" -> "userProfile"
pub fn to_camel_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut capitalize_next = false;
    for c in to_kebab_case(s).chars() {
        if c == '-' {
            capitalize_next = true;
        } else if capitalize_next {
            out.extend(c.to_uppercase());
            capitalize_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Pluralize the last word of a kebab-case name.
/// e.g. "user-profile" -> "user-profiles", "category" -> "categories", "address" -> "addresses"
pub fn pluralize(kebab: &str) -> String {
    let (head, last) = match kebab.rfind('-') {
        Some(i) => (&kebab[..=i], &kebab[i + 1..]),
        None => ("", kebab),
    };
    let plural = if last.ends_with('y')
        && !last.ends_with("ay")
        && !last.ends_with("ey")
        && !last.ends_with("oy")
        && !last.ends_with("uy")
    {
        format!("{}ies", &last[..last.len() - 1])
    } else if last.ends_with('s')
        || last.ends_with('x')
        || last.ends_with('z')
        || last.ends_with("ch")
        || last.ends_with("sh")
    {
        format!("{}es", last)
    } else {
        format!("{}s", last)
    };
    format!("{}{}", head, plural)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kebab_from_pascal_and_snake() {
        assert_eq!(to_kebab_case("UserProfile"), "user-profile");
        assert_eq!(to_kebab_case("user_profile"), "user-profile");
        assert_eq!(to_kebab_case("HTTPLog"), "http-log");
        assert_eq!(to_kebab_case("Post"), "post");
    }

    #[test]
    fn camel_from_pascal() {
        assert_eq!(to_camel_case("UserProfile"), "userProfile");
        assert_eq!(to_camel_case("User"), "user");
    }

    #[test]
    fn plural_rules() {
        assert_eq!(pluralize("user-profile"), "user-profiles");
        assert_eq!(pluralize("category"), "categories");
        assert_eq!(pluralize("day"), "days");
        assert_eq!(pluralize("address"), "addresses");
        assert_eq!(pluralize("box"), "boxes");
        assert_eq!(pluralize("match"), "matches");
    }
}
