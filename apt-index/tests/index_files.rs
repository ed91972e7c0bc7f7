use apt_index::{BinaryPackage, Compression, PackageIndex, Release, DEFAULT_COMPRESSIONS};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_full_index_generation() {
    let temp_dir = TempDir::new().unwrap();
    let dist = temp_dir.path();

    // Two architecture directories under one component, like a published
    // distribution tree.
    for arch in ["amd64", "arm64"] {
        let arch_dir = dist.join("multiverse").join(format!("binary-{}", arch));
        fs::create_dir_all(&arch_dir).unwrap();

        let mut index = PackageIndex::new();
        index.push(BinaryPackage::new("server-tools", "4.2.1", arch));
        index.push(BinaryPackage::new("server-core", "4.2.1", arch));
        index.sort();
        assert_eq!(index.packages()[0].name(), "server-core");

        let body = index.to_string();
        for compression in DEFAULT_COMPRESSIONS {
            let name = format!("Packages{}", compression.extension());
            let data = compression.compress(body.as_bytes()).unwrap();
            fs::write(arch_dir.join(name), data).unwrap();
        }
    }

    let mut release = Release::new();
    release.origin = Some("example".to_string());
    release.suite = Some("4.2".to_string());
    release.architectures = vec!["amd64".to_string(), "arm64".to_string()];
    release.components = vec!["multiverse".to_string()];
    release.scan_index_files(dist).unwrap();
    release.write_to(dist).unwrap();

    // Four index files: two architectures times (Packages, Packages.gz).
    assert_eq!(release.files.len(), 4);

    let manifest = fs::read_to_string(dist.join("Release")).unwrap();
    assert!(manifest.contains("Suite: 4.2"));
    assert!(manifest.contains("MD5Sum:"));
    assert!(manifest.contains("SHA256:"));
    assert!(manifest.contains(" multiverse/binary-amd64/Packages\n"));
    assert!(manifest.contains(" multiverse/binary-arm64/Packages.gz\n"));

    // The compressed variant decompresses back to the plain index.
    let plain = fs::read(dist.join("multiverse/binary-amd64/Packages")).unwrap();
    let gz = fs::read(dist.join("multiverse/binary-amd64/Packages.gz")).unwrap();
    assert_eq!(Compression::Gzip.decompress(&gz).unwrap(), plain);

    let parsed = PackageIndex::parse(std::str::from_utf8(&plain).unwrap()).unwrap();
    assert_eq!(parsed.len(), 2);
}

#[test]
fn test_scanner_output_survives_round_trip() {
    // Output shaped like dpkg-scanpackages, including multi-line fields.
    let scanned = "\
Package: server-core
Version: 4.3.0-rc1
Architecture: amd64
Filename: multiverse/binary-amd64/server-core_4.3.0-rc1_amd64.deb
Size: 4096
SHA256: 0000000000000000000000000000000000000000000000000000000000000000
Description: core server package
 The long description continues here
 over two lines.
";
    let index = PackageIndex::parse(scanned).unwrap();
    assert_eq!(index.len(), 1);
    let emitted = index.to_string();
    let reparsed = PackageIndex::parse(&emitted).unwrap();
    assert_eq!(
        reparsed.packages()[0].field("Description"),
        index.packages()[0].field("Description")
    );
    assert_eq!(reparsed.packages()[0].version(), "4.3.0-rc1");
}
