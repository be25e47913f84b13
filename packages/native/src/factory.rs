//! The engine's entry points.

use crate::{NativeResult, RawHandle};

/// Opens and deletes databases.
///
/// Both operations return an open-request handle
/// ([`HandleKind::OpenRequest`](crate::HandleKind::OpenRequest)) whose
/// events report the outcome. An open request fires `upgradeneeded` before
/// `success` when the requested version is newer than the stored one, and
/// `blocked` while other connections hold the database open.
pub trait NativeFactory {
    /// Open `name`, creating or upgrading it to `version` if given.
    fn open(&self, name: &str, version: Option<u64>) -> NativeResult<RawHandle>;

    /// Delete `name`. Succeeds even if it does not exist.
    fn delete_database(&self, name: &str) -> NativeResult<RawHandle>;
}
