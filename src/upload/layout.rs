//! Storage layout
//!
//! Chunk slots, staging files and artifacts share one flat directory. Every
//! temporary name ends with [`TEMP_SUFFIX`] and artifact names may not, so the
//! two namespaces never collide.
//!
//! | kind          | name                                  |
//! |---------------|---------------------------------------|
//! | chunk slot    | `<file_name>_<index>.tmp`             |
//! | chunk staging | `<file_name>_<index>.<uuid>.part.tmp` |
//! | merge staging | `<file_name>.<uuid>.merge.tmp`        |
//! | artifact      | `<file_name>`                         |

use std::fmt;

/// Suffix shared by every temporary file
pub const TEMP_SUFFIX: &str = ".tmp";

/// Longest single path component most filesystems accept
pub const MAX_COMPONENT_LEN: usize = 255;

const PART_MARKER: &str = ".part";
const MERGE_MARKER: &str = ".merge";

/// Decimal digits of the largest chunk index
const MAX_INDEX_DIGITS: usize = 10;

/// Length of a simple-formatted v4 uuid
const UUID_LEN: usize = 32;

/// Bytes the longest temp name adds to a file name: `_<index>.<uuid>.part.tmp`
pub const MAX_TEMP_EXTENSION_LEN: usize =
    1 + MAX_INDEX_DIGITS + 1 + UUID_LEN + PART_MARKER.len() + TEMP_SUFFIX.len();

/// Longest accepted file name in bytes; every temp name derived from it
/// still fits in one path component
pub const MAX_FILE_NAME_LEN: usize = MAX_COMPONENT_LEN - MAX_TEMP_EXTENSION_LEN;

/// Reasons a file name is rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidName {
    Empty,
    TooLong(usize),
    PathSeparator,
    Reserved,
    TempSuffix,
}

impl fmt::Display for InvalidName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidName::Empty => write!(f, "file name is empty"),
            InvalidName::TooLong(len) => {
                write!(f, "file name is {} bytes (max {})", len, MAX_FILE_NAME_LEN)
            }
            InvalidName::PathSeparator => write!(f, "file name contains a path separator or NUL"),
            InvalidName::Reserved => write!(f, "file name is reserved"),
            InvalidName::TempSuffix => {
                write!(f, "file name may not end with '{}'", TEMP_SUFFIX)
            }
        }
    }
}

/// Check that a client-supplied name is a plain artifact name
pub fn validate_file_name(name: &str) -> Result<(), InvalidName> {
    if name.is_empty() {
        return Err(InvalidName::Empty);
    }
    if name.len() > MAX_FILE_NAME_LEN {
        return Err(InvalidName::TooLong(name.len()));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(InvalidName::PathSeparator);
    }
    if name == "." || name == ".." {
        return Err(InvalidName::Reserved);
    }
    if is_temp_name(name) {
        return Err(InvalidName::TempSuffix);
    }
    Ok(())
}

/// Whether a directory entry belongs to the temp namespace
pub fn is_temp_name(name: &str) -> bool {
    name.ends_with(TEMP_SUFFIX)
}

/// Name of the durable slot for one chunk
pub fn slot_name(file_name: &str, index: u32) -> String {
    format!("{}_{}{}", file_name, index, TEMP_SUFFIX)
}

/// Name of the staging file a chunk is written to before it becomes a slot
pub fn chunk_staging_name(file_name: &str, index: u32) -> String {
    format!(
        "{}_{}.{}{}{}",
        file_name,
        index,
        uuid::Uuid::new_v4().simple(),
        PART_MARKER,
        TEMP_SUFFIX
    )
}

/// Name of the staging file an artifact is merged into before publication
pub fn merge_staging_name(file_name: &str) -> String {
    format!(
        "{}.{}{}{}",
        file_name,
        uuid::Uuid::new_v4().simple(),
        MERGE_MARKER,
        TEMP_SUFFIX
    )
}

/// Recover `(file_name, index)` from a slot name
///
/// Staging names and anything else that is not a slot yield `None`.
pub fn parse_slot_name(name: &str) -> Option<(&str, u32)> {
    let stem = name.strip_suffix(TEMP_SUFFIX)?;
    let (file_name, index) = stem.rsplit_once('_')?;
    if file_name.is_empty() || index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((file_name, index.parse().ok()?))
}
