//! personId naming rules for remote objects and enrolled identities.

/// Marker object some buckets create to materialize empty folders.
pub const PLACEHOLDER_OBJECT: &str = ".emptyFolderPlaceholder";

/// A trailing `-<digits>` run longer than this is a timestamp suffix.
const TIMESTAMP_MIN_DIGITS: usize = 9;

/// Whether a listing entry carries no face image.
pub fn is_placeholder(object_name: &str) -> bool {
    object_name.is_empty() || object_name == PLACEHOLDER_OBJECT
}

/// Derive a personId from a remote object name.
///
/// The extension is dropped, then a trailing `-<digits>` component with more
/// than 8 digits is treated as an upload timestamp and stripped:
/// `ABC123-202501011200.jpg` → `ABC123`, while `ABC-12.jpg` stays `ABC-12`.
pub fn person_id_from_object_name(object_name: &str) -> String {
    let stem = file_stem(object_name);
    match stem.rsplit_once('-') {
        Some((head, tail)) if is_timestamp(tail) => head.to_string(),
        _ => stem.to_string(),
    }
}

fn is_timestamp(part: &str) -> bool {
    part.len() >= TIMESTAMP_MIN_DIGITS && part.bytes().all(|b| b.is_ascii_digit())
}

/// Name without its last extension. Leading dots do not start an extension.
fn file_stem(name: &str) -> &str {
    let leading = name.len() - name.trim_start_matches('.').len();
    match name[leading..].rfind('.') {
        Some(dot) => &name[..leading + dot],
        None => name,
    }
}

/// Why a personId cannot be used as a gallery directory name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidPersonId {
    #[error("personId is empty")]
    Empty,
    #[error("personId must not contain path separators: {0:?}")]
    Separator(String),
    #[error("personId must not start with '.': {0:?}")]
    Hidden(String),
}

/// Check that a personId is safe to use as a directory name under the gallery root.
///
/// Hidden names are rejected, which also keeps identities clear of the
/// reserved cache directory and of `.`/`..`.
pub fn validate_person_id(person_id: &str) -> Result<(), InvalidPersonId> {
    if person_id.trim().is_empty() {
        return Err(InvalidPersonId::Empty);
    }
    if person_id.contains(['/', '\\', '\0']) {
        return Err(InvalidPersonId::Separator(person_id.to_string()));
    }
    if person_id.starts_with('.') {
        return Err(InvalidPersonId::Hidden(person_id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_suffix_is_stripped() {
        assert_eq!(person_id_from_object_name("ABC123-202501011200"), "ABC123");
        assert_eq!(person_id_from_object_name("ABC123-202501011200.jpg"), "ABC123");
        assert_eq!(person_id_from_object_name("1RV22CS001-1731400000000.png"), "1RV22CS001");
    }

    #[test]
    fn test_short_digit_run_is_kept() {
        assert_eq!(person_id_from_object_name("ABC-12"), "ABC-12");
        assert_eq!(person_id_from_object_name("ABC-12345678.jpg"), "ABC-12345678");
        assert_eq!(person_id_from_object_name("ABC-123456789.jpg"), "ABC");
    }

    #[test]
    fn test_only_last_component_is_considered() {
        assert_eq!(person_id_from_object_name("A-B-202501011200.jpg"), "A-B");
        assert_eq!(person_id_from_object_name("A-202501011200-x.jpg"), "A-202501011200-x");
        assert_eq!(person_id_from_object_name("ABC-.jpg"), "ABC-");
    }

    #[test]
    fn test_no_extension_and_multiple_dots() {
        assert_eq!(person_id_from_object_name("S1"), "S1");
        assert_eq!(person_id_from_object_name("S1.v2.jpg"), "S1.v2");
        assert_eq!(person_id_from_object_name(".hidden"), ".hidden");
    }

    #[test]
    fn test_placeholder() {
        assert!(is_placeholder(""));
        assert!(is_placeholder(".emptyFolderPlaceholder"));
        assert!(!is_placeholder("S1.jpg"));
    }

    #[test]
    fn test_validate_person_id() {
        assert!(validate_person_id("1RV22CS001").is_ok());
        assert!(validate_person_id("ABC-12").is_ok());
        assert_eq!(validate_person_id(""), Err(InvalidPersonId::Empty));
        assert_eq!(validate_person_id("   "), Err(InvalidPersonId::Empty));
        assert!(matches!(validate_person_id("../etc"), Err(InvalidPersonId::Separator(_))));
        assert!(matches!(validate_person_id("a\\b"), Err(InvalidPersonId::Separator(_))));
        assert!(matches!(validate_person_id(".cache"), Err(InvalidPersonId::Hidden(_))));
        assert!(matches!(validate_person_id(".."), Err(InvalidPersonId::Hidden(_))));
    }
}
