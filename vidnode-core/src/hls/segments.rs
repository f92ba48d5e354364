use std::io::ErrorKind;

use super::fs::MediaFs;
use super::layout::{parse_segment_name, MediaLayout};
use crate::models::{Resolution, VideoId};
use crate::Result;

/// Indices of every stored segment for one resolution, ascending.
///
/// An absent directory is an empty stream, not an error.
pub async fn list_segment_indices(
    fs: &dyn MediaFs,
    layout: &MediaLayout,
    video_id: &VideoId,
    resolution: Resolution,
) -> Result<Vec<u64>> {
    let dir = layout.segment_dir(video_id, resolution);
    let names = match fs.list_files(&dir).await {
        Ok(names) => names,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut indices: Vec<u64> = names
        .iter()
        .filter_map(|name| parse_segment_name(name, resolution))
        .collect();
    indices.sort_unstable();
    Ok(indices)
}

/// Highest stored index plus one, 0 when nothing is stored. Always derived
/// from the filesystem so a restarted worker resumes correctly.
pub async fn next_expected_segment_index(
    fs: &dyn MediaFs,
    layout: &MediaLayout,
    video_id: &VideoId,
    resolution: Resolution,
) -> Result<u64> {
    let indices = list_segment_indices(fs, layout, video_id, resolution).await?;
    Ok(indices.last().map_or(0, |max| max + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hls::fs::{LocalFs, MemoryFs};
    use bytes::Bytes;

    fn vid() -> VideoId {
        VideoId::parse("abcDEF_-123").unwrap()
    }

    #[tokio::test]
    async fn test_next_index_after_contiguous_run() {
        let fs = MemoryFs::new();
        let layout = MediaLayout::new("/media");
        for i in 0..8 {
            fs.write_atomic(&layout.segment_path(&vid(), Resolution::P720, i), Bytes::new())
                .await
                .unwrap();
        }

        let next = next_expected_segment_index(&fs, &layout, &vid(), Resolution::P720)
            .await
            .unwrap();
        assert_eq!(next, 8);
    }

    #[tokio::test]
    async fn test_next_index_absent_and_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFs::new();
        let layout = MediaLayout::new(dir.path());

        assert_eq!(
            next_expected_segment_index(&fs, &layout, &vid(), Resolution::P720)
                .await
                .unwrap(),
            0
        );

        fs.create_dir_all(&layout.segment_dir(&vid(), Resolution::P720))
            .await
            .unwrap();
        assert_eq!(
            next_expected_segment_index(&fs, &layout, &vid(), Resolution::P720)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_ignores_foreign_files_and_uses_numeric_order() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFs::new();
        let layout = MediaLayout::new(dir.path());
        let seg_dir = layout.segment_dir(&vid(), Resolution::P720);

        for name in [
            "segment-720p-2.ts",
            "segment-720p-10.ts",
            "segment-720p-9.ts",
            "segment-480p-50.ts",
            "notes.txt",
        ] {
            fs.write_atomic(&seg_dir.join(name), Bytes::new()).await.unwrap();
        }

        let indices = list_segment_indices(&fs, &layout, &vid(), Resolution::P720)
            .await
            .unwrap();
        assert_eq!(indices, vec![2, 9, 10]);
        assert_eq!(
            next_expected_segment_index(&fs, &layout, &vid(), Resolution::P720)
                .await
                .unwrap(),
            11
        );
    }
}
