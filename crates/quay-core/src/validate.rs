//! Name validation for apps and CNAMEs.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::INTERNAL_APP_NAME;

static NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9-]{0,62}$").expect("app name pattern"));

static CNAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\*\.)?[A-Za-z0-9][\w\-.]+$").expect("cname pattern"));

/// Whether the given string is a valid app name: at most 63 characters,
/// lower case letters, digits or dashes, starting with a letter, and not
/// the reserved internal name.
pub fn valid_app_name(name: &str) -> bool {
    name != INTERNAL_APP_NAME && NAME_REGEX.is_match(name)
}

/// Whether the given string is a valid CNAME, optionally wildcarded.
pub fn valid_cname(cname: &str) -> bool {
    CNAME_REGEX.is_match(cname)
}
