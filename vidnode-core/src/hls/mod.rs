pub mod fs;
pub mod layout;
pub mod manifest;
pub mod segments;

pub use fs::{LocalFs, MediaFs, MemoryFs};
pub use layout::{HlsFile, MediaLayout, MASTER_MANIFEST_NAME};
pub use manifest::{
    has_end_tag, render_master_manifest, FinalizeReport, HlsManifestBuilder, StreamOutcome,
    END_LIST_TAG,
};
pub use segments::{list_segment_indices, next_expected_segment_index};
