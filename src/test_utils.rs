pub mod test_helpers {
    use std::fs::File;
    use std::io::{Cursor, Write};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use flate2::Compression;
    use flate2::write::GzEncoder;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use tempfile::TempDir;
    use zip::CompressionMethod;
    use zip::write::FileOptions;

    use crate::archive::{Access, Archive, ArchiveError, ArchiveResult, Member};

    /// Encode a small deterministic PNG; `seed` varies the pixel pattern.
    pub fn png_bytes(width: u32, height: u32, seed: u8) -> Vec<u8> {
        let image = RgbImage::from_fn(width, height, |x, y| {
            Rgb([
                (x as u8).wrapping_add(seed),
                (y as u8).wrapping_mul(3),
                seed.wrapping_mul(17),
            ])
        });
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(image)
            .write_to(&mut out, ImageFormat::Png)
            .expect("encode png");
        out.into_inner()
    }

    /// Name used for the `n`-th generated page.
    pub fn page_name(n: usize) -> String {
        format!("page_{n:03}.png")
    }

    /// Builder for archives written to a temporary directory
    #[derive(Default, Clone)]
    pub struct ArchiveFixture {
        entries: Vec<(String, Vec<u8>)>,
        comment: String,
    }

    impl ArchiveFixture {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_entry(mut self, name: &str, bytes: Vec<u8>) -> Self {
            self.entries.push((name.to_string(), bytes));
            self
        }

        /// Append `count` PNG pages named by [`page_name`].
        pub fn with_pages(mut self, count: usize, width: u32, height: u32) -> Self {
            let start = self.entries.len();
            for n in 0..count {
                self.entries
                    .push((page_name(start + n), png_bytes(width, height, n as u8)));
            }
            self
        }

        /// Archive comment, only written by [`ArchiveFixture::write_cbz`].
        pub fn with_comment(mut self, comment: &str) -> Self {
            self.comment = comment.to_string();
            self
        }

        pub fn names(&self) -> Vec<String> {
            self.entries.iter().map(|(name, _)| name.clone()).collect()
        }

        pub fn write_cbz(&self, file_name: &str) -> (TempDir, PathBuf) {
            let dir = TempDir::new().expect("temp dir");
            let path = dir.path().join(file_name);
            self.write_zip_to(&path);
            (dir, path)
        }

        pub fn write_cbt(&self, file_name: &str) -> (TempDir, PathBuf) {
            let dir = TempDir::new().expect("temp dir");
            let path = dir.path().join(file_name);
            let file = File::create(&path).expect("create tar");
            self.write_tar_into(file);
            (dir, path)
        }

        pub fn write_tar_gz(&self, file_name: &str) -> (TempDir, PathBuf) {
            let dir = TempDir::new().expect("temp dir");
            let path = dir.path().join(file_name);
            let file = File::create(&path).expect("create tar.gz");
            let encoder = self.write_tar_into(GzEncoder::new(file, Compression::default()));
            encoder.finish().expect("finish gzip");
            (dir, path)
        }

        fn write_zip_to(&self, path: &Path) {
            let file = File::create(path).expect("create zip");
            let mut zip = zip::ZipWriter::new(file);
            zip.set_comment(self.comment.clone());
            let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

            for (name, bytes) in &self.entries {
                zip.start_file(name.as_str(), options).expect("start zip entry");
                zip.write_all(bytes).expect("write zip entry");
            }
            zip.finish().expect("finish zip");
        }

        fn write_tar_into<W: Write>(&self, writer: W) -> W {
            let mut builder = tar::Builder::new(writer);
            for (name, bytes) in &self.entries {
                let mut header = tar::Header::new_gnu();
                header.set_size(bytes.len() as u64);
                header.set_mode(0o644);
                builder
                    .append_data(&mut header, name, bytes.as_slice())
                    .expect("append tar entry");
            }
            builder.into_inner().expect("finish tar")
        }
    }

    /// In-memory random access archive that counts member reads
    pub struct MemoryArchive {
        members: Vec<Member>,
        data: Vec<Vec<u8>>,
        delays: Vec<(usize, Duration)>,
        reads: AtomicUsize,
        closed: AtomicBool,
    }

    impl MemoryArchive {
        pub fn new<S: Into<String>>(entries: impl IntoIterator<Item = (S, Vec<u8>)>) -> Self {
            let mut members = Vec::new();
            let mut data = Vec::new();
            for (position, (name, bytes)) in entries.into_iter().enumerate() {
                members.push(Member::new(position, name, ""));
                data.push(bytes);
            }
            Self {
                members,
                data,
                delays: Vec::new(),
                reads: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }
        }

        /// Make every read of the member at `position` take `delay`.
        pub fn with_delay(mut self, position: usize, delay: Duration) -> Self {
            self.delays.push((position, delay));
            self
        }

        pub fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    impl Archive for MemoryArchive {
        fn members(&self) -> &[Member] {
            &self.members
        }

        fn read_member(&self, member: &Member) -> ArchiveResult<Vec<u8>> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(ArchiveError::Closed);
            }
            self.reads.fetch_add(1, Ordering::SeqCst);
            for (position, delay) in &self.delays {
                if *position == member.position {
                    thread::sleep(*delay);
                }
            }
            self.data
                .get(member.position)
                .cloned()
                .ok_or_else(|| ArchiveError::InternalInconsistency {
                    name: member.name.clone(),
                })
        }

        fn comment(&self) -> &str {
            ""
        }

        fn access(&self) -> Access {
            Access::RandomAccess
        }

        fn close(&self) -> ArchiveResult<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_helpers::*;
    use crate::archive::Archive;

    #[test]
    fn memory_archive_counts_reads() {
        let archive = MemoryArchive::new(vec![("a.png", vec![1, 2, 3])]);
        let member = archive.members()[0].clone();
        assert_eq!(archive.read_member(&member).unwrap(), vec![1, 2, 3]);
        assert_eq!(archive.reads(), 1);

        archive.close().unwrap();
        assert!(archive.read_member(&member).is_err());
    }

    #[test]
    fn generated_pages_decode() {
        let bytes = png_bytes(12, 8, 9);
        let image = image::load_from_memory(&bytes).unwrap();
        assert_eq!((image.width(), image.height()), (12, 8));
    }
}
