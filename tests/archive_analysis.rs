//! End-to-end analysis of files, directories and archives.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::TempDir;

use linked_archiver::stream::SerializedStreamFactory;
use linked_archiver::{
    AccessMode, ArchiverOptions, Archiver, Class, Entity, Graph, Literal, MemoryStreamFactory, Property,
    StreamFactory, Subject, Term,
};

fn archiver() -> Archiver {
    let options = ArchiverOptions {
        stable: true,
        ..Default::default()
    };
    Archiver::new(options.resolve().expect("valid options"))
}

fn create_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create directory");
    }
    fs::write(&path, content).expect("Failed to write file");
    path
}

fn as_subject(term: &Term) -> Subject {
    match term {
        Term::Iri(iri) => Subject::Iri(iri.clone()),
        Term::Blank(id) => Subject::Blank(id.clone()),
        Term::Literal(lit) => panic!("expected a node, got literal {:?}", lit),
    }
}

/// The single node linked from `subject` by `property`.
fn linked(graph: &Graph, subject: &Subject, property: Property) -> Subject {
    let objects = graph.objects(subject, property);
    assert_eq!(objects.len(), 1, "expected one {:?} of {:?}", property, subject);
    as_subject(&objects[0])
}

fn literals(graph: &Graph, subject: &Subject, property: Property) -> Vec<String> {
    graph
        .objects(subject, property)
        .into_iter()
        .filter_map(|t| match t {
            Term::Literal(lit) => Some(lit.value),
            _ => None,
        })
        .collect()
}

/// Stored-only ZIP archive.
fn build_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut central = Vec::new();
    for (name, data) in files {
        let offset = out.len() as u32;
        let crc = crc32fast::hash(data);
        let size = (data.len() as u32).to_le_bytes();

        out.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
        out.extend_from_slice(&[20, 0, 0, 0, 0, 0, 0, 0, 0x21, 0]);
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&size);
        out.extend_from_slice(&size);
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(data);

        central.extend_from_slice(&0x0201_4b50u32.to_le_bytes());
        central.extend_from_slice(&[20, 0, 20, 0, 0, 0, 0, 0, 0, 0, 0x21, 0]);
        central.extend_from_slice(&crc.to_le_bytes());
        central.extend_from_slice(&size);
        central.extend_from_slice(&size);
        central.extend_from_slice(&(name.len() as u16).to_le_bytes());
        central.extend_from_slice(&[0u8; 12]);
        central.extend_from_slice(&offset.to_le_bytes());
        central.extend_from_slice(name.as_bytes());
    }
    let cd_offset = out.len() as u32;
    out.extend_from_slice(&central);
    out.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
    out.extend_from_slice(&[0u8; 4]);
    out.extend_from_slice(&(files.len() as u16).to_le_bytes());
    out.extend_from_slice(&(files.len() as u16).to_le_bytes());
    out.extend_from_slice(&(central.len() as u32).to_le_bytes());
    out.extend_from_slice(&cd_offset.to_le_bytes());
    out.extend_from_slice(&[0, 0]);
    out
}

/// ustar archive of regular files.
fn build_tar(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    for (name, data) in files {
        let mut block = [0u8; 512];
        block[..name.len()].copy_from_slice(name.as_bytes());
        block[100..108].copy_from_slice(b"0000644\0");
        block[108..116].copy_from_slice(b"0000000\0");
        block[116..124].copy_from_slice(b"0000000\0");
        block[124..136].copy_from_slice(format!("{:011o}\0", data.len()).as_bytes());
        block[136..148].copy_from_slice(b"14537000000\0");
        block[156] = b'0';
        block[257..263].copy_from_slice(b"ustar\0");
        block[263..265].copy_from_slice(b"00");
        block[148..156].copy_from_slice(b"        ");
        let sum: u64 = block.iter().map(|&b| b as u64).sum();
        block[148..155].copy_from_slice(format!("{:06o}\0", sum).as_bytes());

        out.extend_from_slice(&block);
        out.extend_from_slice(data);
        let padding = (512 - data.len() % 512) % 512;
        out.resize(out.len() + padding, 0);
    }
    out.extend_from_slice(&[0u8; 1024]);
    out
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("Failed to compress");
    encoder.finish().expect("Failed to compress")
}

// ============================================================================
// Plain files
// ============================================================================

mod plain_files {
    use super::*;

    #[tokio::test]
    async fn test_text_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = create_file(temp_dir.path(), "hello.txt", b"hello\n");

        let archiver = archiver();
        let results = archiver.describe_paths(&[path]).await.expect("analysis succeeds");
        let graph = archiver.graph();
        let file = results[0].node.subject().clone();
        assert_eq!(results[0].label.as_deref(), Some("hello.txt"));

        assert!(graph.has_class(&file, Class::FileDataObject));
        assert_eq!(literals(graph, &file, Property::FileName), vec!["hello.txt"]);

        let content = linked(graph, &file, Property::InterpretedAs);
        assert!(graph.has_class(&content, Class::ContentAsText));
        assert_eq!(
            graph.objects(&content, Property::Extent),
            vec![Term::Literal(Literal::from(6u64))]
        );
        assert!(graph.objects(&content, Property::HasFormat).is_empty());

        let mut algorithms: Vec<String> = graph
            .objects(&content, Property::HasHash)
            .iter()
            .flat_map(|h| literals(graph, &as_subject(h), Property::HashAlgorithm))
            .collect();
        algorithms.sort();
        assert_eq!(algorithms, vec!["MD5", "SHA-1", "SHA-256"]);
    }

    #[tokio::test]
    async fn test_binary_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = create_file(temp_dir.path(), "blob.bin", &[0u8, 1, 2, 3, 0, 255]);

        let archiver = archiver();
        let results = archiver.describe_paths(&[path]).await.expect("analysis succeeds");
        let graph = archiver.graph();
        let content = linked(graph, results[0].node.subject(), Property::InterpretedAs);
        assert!(graph.has_class(&content, Class::ContentAsBase64));
    }

    #[tokio::test]
    async fn test_identical_content_shares_node() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let a = create_file(temp_dir.path(), "a.txt", b"same bytes\n");
        let b = create_file(temp_dir.path(), "b.txt", b"same bytes\n");

        let archiver = archiver();
        let results = archiver.describe_paths(&[a, b]).await.expect("analysis succeeds");
        let graph = archiver.graph();
        assert_ne!(results[0].node, results[1].node);
        assert_eq!(
            linked(graph, results[0].node.subject(), Property::InterpretedAs),
            linked(graph, results[1].node.subject(), Property::InterpretedAs)
        );
    }
}

// ============================================================================
// Directories
// ============================================================================

mod directories {
    use super::*;

    #[tokio::test]
    async fn test_nested_folders() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        create_file(temp_dir.path(), "root.txt", b"root\n");
        create_file(temp_dir.path(), "sub/inner.txt", b"inner\n");

        let archiver = archiver();
        let results = archiver
            .describe_paths(&[temp_dir.path().to_path_buf()])
            .await
            .expect("analysis succeeds");
        let graph = archiver.graph();
        let folder = &results[0].node;

        let sub = folder.child("sub");
        let inner = sub.child("inner.txt");
        assert!(graph.has_class(sub.subject(), Class::Folder));
        assert!(graph.has_class(inner.subject(), Class::FileDataObject));
        assert_eq!(linked(graph, inner.subject(), Property::BelongsToContainer), sub.subject().clone());
        assert_eq!(archiver.progress().snapshot().errors, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hard_link_gets_one_node() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let original = create_file(temp_dir.path(), "a/original.txt", b"linked\n");
        fs::create_dir_all(temp_dir.path().join("b")).expect("Failed to create directory");
        fs::hard_link(&original, temp_dir.path().join("b/link.txt")).expect("Failed to link");

        let archiver = archiver();
        archiver
            .describe_paths(&[temp_dir.path().to_path_buf()])
            .await
            .expect("analysis succeeds");
        let graph = archiver.graph();

        let files = graph.subjects_of_class(Class::FileDataObject);
        assert_eq!(files.len(), 1);
        // one node, two containment edges
        assert_eq!(graph.objects(&files[0], Property::BelongsToContainer).len(), 2);
        assert!(archiver.progress().snapshot().cache_hits >= 1);
    }

    #[tokio::test]
    async fn test_directory_torrent_hash() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        create_file(temp_dir.path(), "one.bin", &[1u8; 700]);
        create_file(temp_dir.path(), "two.bin", &[2u8; 300]);

        let options = ArchiverOptions {
            stable: true,
            torrent: true,
            piece_length: 512,
            ..Default::default()
        };
        let archiver = Archiver::new(options.resolve().expect("valid options"));
        let results = archiver
            .describe_paths(&[temp_dir.path().to_path_buf()])
            .await
            .expect("analysis succeeds");
        let graph = archiver.graph();

        let btih = results[0].node.fragment("btih");
        assert_eq!(literals(graph, btih.subject(), Property::HashValue)[0].len(), 40);
        // each file scanned once for its own torrent and reused for the folder
        assert_eq!(archiver.block_cache().scans(), 2);
    }
}

// ============================================================================
// Archives
// ============================================================================

mod archives {
    use super::*;

    #[tokio::test]
    async fn test_zip_with_one_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = create_file(temp_dir.path(), "bundle.zip", &build_zip(&[("a.txt", b"alpha\n")]));

        let archiver = archiver();
        let results = archiver.describe_paths(&[path]).await.expect("analysis succeeds");
        let graph = archiver.graph();

        let content = linked(graph, results[0].node.subject(), Property::InterpretedAs);
        let format = linked(graph, &content, Property::HasFormat);
        assert!(graph.has_class(&format, Class::Archive));
        assert_eq!(literals(graph, &format, Property::MimeType), vec!["application/zip"]);

        let items: Vec<Subject> = graph
            .triples()
            .into_iter()
            .filter(|t| t.object == Term::from(&format) && t.predicate == Property::BelongsToContainer.iri())
            .map(|t| t.subject)
            .collect();
        assert_eq!(items.len(), 1);
        assert!(graph.has_class(&items[0], Class::FileDataObject));
        assert_eq!(literals(graph, &items[0], Property::FileName), vec!["a.txt"]);

        let inner = linked(graph, &items[0], Property::InterpretedAs);
        assert_ne!(inner, content);
        assert!(graph.has_class(&inner, Class::ContentAsText));
    }

    #[tokio::test]
    async fn test_zip_in_zip() {
        let inner = build_zip(&[("deep.txt", b"deep\n")]);
        let outer = build_zip(&[("inner.zip", &inner)]);
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = create_file(temp_dir.path(), "outer.zip", &outer);

        let archiver = archiver();
        archiver.describe_paths(&[path]).await.expect("analysis succeeds");
        let graph = archiver.graph();

        assert_eq!(graph.subjects_of_class(Class::Archive).len(), 2);
        let names: Vec<String> = graph
            .triples()
            .into_iter()
            .filter(|t| t.predicate == Property::FileName.iri())
            .filter_map(|t| match t.object {
                Term::Literal(lit) => Some(lit.value),
                _ => None,
            })
            .collect();
        assert!(names.contains(&"deep.txt".to_string()));
        assert_eq!(archiver.progress().snapshot().containers, 2);
    }

    #[tokio::test]
    async fn test_tar_gz() {
        let tarball = gzip(&build_tar(&[("docs/readme.txt", b"read me\n"), ("data.bin", &[0u8; 10])]));
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = create_file(temp_dir.path(), "release.tar.gz", &tarball);

        let archiver = archiver();
        archiver.describe_paths(&[path]).await.expect("analysis succeeds");
        let graph = archiver.graph();

        let mime_types: Vec<String> = graph
            .triples()
            .into_iter()
            .filter(|t| t.predicate == Property::MimeType.iri())
            .filter_map(|t| match t.object {
                Term::Literal(lit) => Some(lit.value),
                _ => None,
            })
            .collect();
        assert!(mime_types.contains(&"application/gzip".to_string()));
        assert!(mime_types.contains(&"application/x-tar".to_string()));
        assert_eq!(graph.subjects_of_class(Class::Folder).len(), 1);
        assert_eq!(archiver.progress().snapshot().errors, 0);
    }

    #[tokio::test]
    async fn test_truncated_tar_keeps_siblings() {
        let mut tar = build_tar(&[("a.txt", b"first\n"), ("b.txt", b"second\n")]);
        tar.truncate(512 * 2 + 100);
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = create_file(temp_dir.path(), "broken.tar", &tar);

        let archiver = archiver();
        let results = archiver.describe_paths(&[path]).await.expect("analysis succeeds");
        let graph = archiver.graph();

        let content = linked(graph, results[0].node.subject(), Property::InterpretedAs);
        let format = linked(graph, &content, Property::HasFormat);
        assert_eq!(literals(graph, &format, Property::Corrupted), vec!["true"]);
        let item = graph
            .triples()
            .into_iter()
            .find(|t| t.object == Term::Literal(Literal::from("a.txt")))
            .expect("first entry described")
            .subject;
        assert_eq!(graph.objects(&item, Property::InterpretedAs).len(), 1);
        assert!(archiver.progress().snapshot().errors >= 1);
    }

    #[tokio::test]
    async fn test_repeated_entry_name_hashes_each_copy() {
        // `tar -r` appends a second member under an existing name
        let tar = build_tar(&[
            ("a.txt", b"first version\n"),
            ("a.txt", b"second, longer version!!!\n"),
        ]);
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = create_file(temp_dir.path(), "appended.tar", &tar);

        let archiver = archiver();
        archiver.describe_paths(&[path]).await.expect("analysis succeeds");
        let graph = archiver.graph();

        let extents: Vec<String> = graph
            .triples()
            .into_iter()
            .filter(|t| t.predicate == Property::Extent.iri())
            .filter_map(|t| match t.object {
                Term::Literal(lit) => Some(lit.value),
                _ => None,
            })
            .collect();
        assert!(extents.contains(&"14".to_string()));
        assert!(extents.contains(&"26".to_string()));

        let item = graph
            .triples()
            .into_iter()
            .find(|t| t.object == Term::Literal(Literal::from("a.txt")))
            .expect("entry described")
            .subject;
        assert_eq!(graph.objects(&item, Property::InterpretedAs).len(), 2);
        assert_eq!(archiver.progress().snapshot().cache_hits, 0);
    }

    #[tokio::test]
    async fn test_single_access_archive() {
        let zip = build_zip(&[("a.txt", b"alpha\n"), ("b.txt", b"beta\n")]);
        let inner: Arc<dyn StreamFactory> = Arc::new(MemoryStreamFactory::new(zip));
        let source: Arc<dyn StreamFactory> = Arc::new(SerializedStreamFactory::new(inner));
        assert_eq!(source.access_mode(), AccessMode::Single);

        let archiver = archiver();
        let result = tokio::time::timeout(
            Duration::from_secs(10),
            archiver.analyze(Entity::Data(source), archiver.root_context()),
        )
        .await
        .expect("analysis finishes")
        .expect("analysis succeeds");
        assert_eq!(result.label.as_deref(), Some("zip"));

        let graph = archiver.graph();
        let format = linked(graph, result.node.subject(), Property::HasFormat);
        let items: Vec<Subject> = graph
            .triples()
            .into_iter()
            .filter(|t| t.object == Term::from(&format) && t.predicate == Property::BelongsToContainer.iri())
            .map(|t| t.subject)
            .collect();
        assert_eq!(items.len(), 2);
        for item in &items {
            let content = linked(graph, item, Property::InterpretedAs);
            assert!(graph.has_class(&content, Class::ContentAsText));
        }
        assert_eq!(archiver.progress().snapshot().errors, 0);
    }
}

// ============================================================================
// Output
// ============================================================================

mod output {
    use super::*;

    async fn render(dir: &Path) -> String {
        let archiver = archiver();
        archiver
            .describe_paths(&[dir.to_path_buf()])
            .await
            .expect("analysis succeeds");
        let mut out = Vec::new();
        archiver.graph().write_ntriples(&mut out, true).expect("Failed to write");
        String::from_utf8(out).expect("valid UTF-8")
    }

    #[tokio::test]
    async fn test_stable_output_is_reproducible() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        create_file(temp_dir.path(), "a.txt", b"a\n");
        create_file(temp_dir.path(), "z/b.zip", &build_zip(&[("x", b"x"), ("y/z", b"z")]));

        let first = render(temp_dir.path()).await;
        let second = render(temp_dir.path()).await;
        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_compressed_output() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let input = create_file(temp_dir.path(), "in/a.txt", b"a\n");
        let output = temp_dir.path().join("out.nt.gz");

        let archiver = archiver();
        archiver.describe_paths(&[input]).await.expect("analysis succeeds");
        archiver.write_output(&output, true).expect("Failed to write");

        let mut text = String::new();
        GzDecoder::new(fs::File::open(&output).expect("output exists"))
            .read_to_string(&mut text)
            .expect("valid gzip");
        assert_eq!(text.lines().count(), archiver.graph().len());
    }
}
