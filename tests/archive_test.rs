use std::fs;
use std::sync::Arc;
use std::thread;

use comicrat::archive::{
    Access, Archive, ArchiveError, FormatRegistry, Member, TarArchive, TarCompression, ZipArchive,
};
use comicrat::test_utils::test_helpers::{ArchiveFixture, page_name, png_bytes};

fn read_all(archive: &dyn Archive) -> Vec<Vec<u8>> {
    archive
        .members()
        .iter()
        .map(|member| archive.read_member(member).unwrap())
        .collect()
}

#[test]
fn test_zip_lists_members_in_archive_order_with_comment() {
    let fixture = ArchiveFixture::new()
        .with_pages(3, 8, 8)
        .with_entry("ComicInfo.xml", b"<ComicInfo/>".to_vec())
        .with_comment("Issue #1");
    let (_dir, path) = fixture.write_cbz("issue.cbz");

    let archive = ZipArchive::open(&path).unwrap();
    let names: Vec<_> = archive.members().iter().map(|m| m.name.clone()).collect();

    assert_eq!(names, fixture.names());
    assert_eq!(archive.comment(), "Issue #1");
    assert_eq!(archive.access(), Access::RandomAccess);
}

#[test]
fn test_zip_and_tar_return_identical_member_bytes() {
    let fixture = ArchiveFixture::new().with_pages(4, 16, 12);
    let (_zip_dir, zip_path) = fixture.write_cbz("same.cbz");
    let (_tar_dir, tar_path) = fixture.write_cbt("same.cbt");

    let zip = ZipArchive::open(&zip_path).unwrap();
    let tar = TarArchive::open(&tar_path, TarCompression::None).unwrap();

    assert_eq!(read_all(&zip), read_all(&tar));
    assert_eq!(read_all(&zip)[2], png_bytes(16, 12, 2));
}

#[test]
fn test_sequential_listing_is_stable_across_opens() {
    let fixture = ArchiveFixture::new().with_pages(6, 4, 4);
    let (_dir, path) = fixture.write_cbt("stable.cbt");

    let first = TarArchive::open(&path, TarCompression::None).unwrap();
    let second = TarArchive::open(&path, TarCompression::None).unwrap();

    let names = |archive: &TarArchive| -> Vec<String> {
        archive.members().iter().map(|m| m.name.clone()).collect()
    };
    assert_eq!(names(&first), names(&second));
    assert_eq!(names(&first), fixture.names());
    assert_eq!(first.access(), Access::Sequential);
    assert_eq!(first.comment(), "");
}

#[test]
fn test_sequential_reads_rescan_from_the_start() {
    let fixture = ArchiveFixture::new().with_pages(5, 4, 4);
    let (_dir, path) = fixture.write_cbt("rescan.cbt");
    let archive = TarArchive::open(&path, TarCompression::None).unwrap();

    // Listing is the one pass paid at open time.
    assert_eq!(archive.scan_count(), 1);

    let last = archive.members()[4].clone();
    let first = archive.members()[0].clone();
    assert_eq!(archive.read_member(&last).unwrap(), png_bytes(4, 4, 4));
    assert_eq!(archive.read_member(&first).unwrap(), png_bytes(4, 4, 0));
    assert_eq!(archive.read_member(&last).unwrap(), png_bytes(4, 4, 4));

    assert_eq!(archive.scan_count(), 4);
}

#[test]
fn test_gzipped_tar_reads_through_registry() {
    let fixture = ArchiveFixture::new().with_pages(3, 6, 6);
    let (_dir, path) = fixture.write_tar_gz("pages.tar.gz");

    let archive = FormatRegistry::default().open(&path).unwrap();
    assert_eq!(archive.access(), Access::Sequential);
    assert_eq!(archive.members().len(), 3);

    let member = archive.find_member(&page_name(1)).unwrap().clone();
    let mut stream = archive.open_member(&member).unwrap();
    let mut bytes = Vec::new();
    std::io::Read::read_to_end(&mut stream, &mut bytes).unwrap();
    assert_eq!(bytes, png_bytes(6, 6, 1));
}

#[test]
fn test_unknown_member_on_rescan_is_an_inconsistency() {
    let fixture = ArchiveFixture::new().with_pages(2, 4, 4);
    let (_dir, path) = fixture.write_cbt("ghost.cbt");
    let archive = TarArchive::open(&path, TarCompression::None).unwrap();

    let ghost = Member::new(1, "ghost.png", "");
    match archive.read_member(&ghost) {
        Err(ArchiveError::InternalInconsistency { name }) => assert_eq!(name, "ghost.png"),
        other => panic!("expected InternalInconsistency, got {other:?}"),
    }
}

#[test]
fn test_container_replaced_mid_session_is_detected() {
    let original = ArchiveFixture::new().with_pages(3, 4, 4);
    let (dir, path) = original.write_cbt("mutated.cbt");
    let archive = TarArchive::open(&path, TarCompression::None).unwrap();
    let third = archive.members()[2].clone();

    let replacement = ArchiveFixture::new().with_pages(1, 4, 4);
    let (_other_dir, other_path) = replacement.write_cbt("short.cbt");
    fs::write(&path, fs::read(&other_path).unwrap()).unwrap();

    assert!(matches!(
        archive.read_member(&third),
        Err(ArchiveError::InternalInconsistency { .. })
    ));
    drop(dir);
}

#[test]
fn test_garbage_files_are_corrupt_archives() {
    let dir = tempfile::TempDir::new().unwrap();
    let registry = FormatRegistry::default();

    for name in ["junk.cbz", "junk.cbt", "junk.tar.gz"] {
        let path = dir.path().join(name);
        fs::write(&path, "this is not an archive of any kind, just text".repeat(40)).unwrap();

        match registry.open(&path) {
            Err(ArchiveError::CorruptArchive { path: reported, .. }) => assert_eq!(reported, path),
            Err(other) => panic!("{name}: expected CorruptArchive, got {other}"),
            Ok(_) => panic!("{name}: expected CorruptArchive, got an archive"),
        }
    }
}

#[test]
fn test_reads_after_close_fail() {
    let fixture = ArchiveFixture::new().with_pages(2, 4, 4);
    let (_zip_dir, zip_path) = fixture.write_cbz("closed.cbz");
    let (_tar_dir, tar_path) = fixture.write_cbt("closed.cbt");

    let registry = FormatRegistry::default();
    for path in [zip_path, tar_path] {
        let archive = registry.open(&path).unwrap();
        let member = archive.members()[0].clone();

        archive.close().unwrap();
        archive.close().unwrap();

        assert!(matches!(
            archive.read_member(&member),
            Err(ArchiveError::Closed)
        ));
    }
}

#[test]
fn test_concurrent_reads_succeed_on_both_variants() {
    let fixture = ArchiveFixture::new().with_pages(8, 10, 10);
    let (_zip_dir, zip_path) = fixture.write_cbz("parallel.cbz");
    let (_tar_dir, tar_path) = fixture.write_cbt("parallel.cbt");

    let registry = FormatRegistry::default();
    for path in [zip_path, tar_path] {
        let archive = registry.open(&path).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|n| {
                let archive = Arc::clone(&archive);
                thread::spawn(move || {
                    let member = archive.members()[n].clone();
                    archive.read_member(&member).unwrap()
                })
            })
            .collect();

        for (n, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.join().unwrap(), png_bytes(10, 10, n as u8));
        }
    }
}

#[test]
fn test_bogus_declared_size_does_not_abort_the_read() {
    let expected = png_bytes(12, 12, 7);
    let (_dir, path) = ArchiveFixture::new()
        .with_entry("page_000.png", expected.clone())
        .write_cbz("inflated.cbz");

    // Claim a ~4GB uncompressed size in the central directory entry.
    let mut bytes = fs::read(&path).unwrap();
    let header = bytes
        .windows(4)
        .rposition(|window| window == b"PK\x01\x02")
        .unwrap();
    bytes[header + 24..header + 28].copy_from_slice(&0xFFFF_FFFEu32.to_le_bytes());
    fs::write(&path, &bytes).unwrap();

    let archive = ZipArchive::open(&path).unwrap();
    let member = archive.members()[0].clone();
    match archive.read_member(&member) {
        Ok(read) => assert_eq!(read, expected),
        Err(ArchiveError::ReadMember { name, .. }) => assert_eq!(name, "page_000.png"),
        Err(other) => panic!("expected bytes or ReadMember, got {other}"),
    }
}

#[cfg(feature = "cbr")]
#[test]
fn test_garbage_rar_is_a_corrupt_archive() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("junk.cbr");
    fs::write(&path, "Rar! this only looks like a rar signature".repeat(40)).unwrap();

    let registry = FormatRegistry::default();
    assert!(matches!(
        registry.open(&path),
        Err(ArchiveError::CorruptArchive { .. })
    ));
    assert!(matches!(
        registry.open(&dir.path().join("missing.cbr")),
        Err(ArchiveError::CorruptArchive { .. })
    ));
}
