//! Fresh blobpath generation.

use tracing::warn;
use uuid::Uuid;

use crate::error::{BlobError, BlobResult};
use crate::flags::OpenFlags;
use crate::store::BlobStore;

const MAX_TRIALS: u32 = 256;

/// Generates a new blobpath that is not in use in `store`.
///
/// Paths are random 32-hex-char names; a candidate is considered taken
/// only if it exists with non-zero size, so a crashed half-created blob
/// does not poison its name forever.
pub fn gen_blob_path(store: &dyn BlobStore) -> BlobResult<String> {
    for _ in 0..MAX_TRIALS {
        let candidate = Uuid::new_v4().simple().to_string();

        match store.open(&candidate, OpenFlags::RDONLY) {
            Err(BlobError::NotFound { .. }) => return Ok(candidate),
            Err(e) => return Err(e),
            Ok(handle) => {
                if handle.size()? == 0 {
                    return Ok(candidate);
                }
                warn!(blobpath = %candidate, "blobpath collision, retrying");
            }
        }
    }
    Err(BlobError::PathGenExhausted {
        attempts: MAX_TRIALS,
    })
}
