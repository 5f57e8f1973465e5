use blockvault::{Container, ContainerRegistry, Superblock};
use std::sync::Arc;
use tempfile::tempdir;

#[test]
fn create_write_reopen_and_verify_superblock() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("c1.bv");

    {
        let container = Container::create(&path, 256, 4096).unwrap();
        container.create_file("/hello.txt", b"hello blockvault").unwrap();
        container.make_directory("docs", "/").unwrap();
        container.create_file("/docs/readme.md", b"# readme").unwrap();
    }

    let mut f = std::fs::File::open(&path).unwrap();
    let sb = Superblock::read(&mut f, 4096).unwrap();
    assert_eq!(sb.total_blocks, 256);
    assert_eq!(sb.block_size, 4096);
    assert_ne!(sb.metadata_head_block, blockvault::superblock::SENTINEL_BLOCK);

    let container = Container::open(&path).unwrap();
    assert_eq!(container.read_file("/hello.txt").unwrap(), b"hello blockvault");
    assert_eq!(container.read_file("/docs/readme.md").unwrap(), b"# readme");
    let (dirs, files) = container.list("/").unwrap();
    assert_eq!(dirs, vec!["/docs".to_string()]);
    assert_eq!(files, vec!["/hello.txt".to_string()]);
}

#[test]
fn registry_multiplexes_named_containers() {
    let dir = tempdir().unwrap();
    let registry = ContainerRegistry::new();

    let c1 = registry.create("alpha", &dir.path().join("alpha.bv"), 64, 512).unwrap();
    let c2 = registry.create("beta", &dir.path().join("beta.bv"), 64, 512).unwrap();

    c1.create_file("/a", b"data-a").unwrap();
    c2.create_file("/b", b"data-b").unwrap();

    assert_eq!(registry.get("alpha").unwrap().read_file("/a").unwrap(), b"data-a");
    assert_eq!(registry.get("beta").unwrap().read_file("/b").unwrap(), b"data-b");
    assert!(registry.get("alpha").unwrap().read_file("/b").is_err());

    let mut names = registry.list();
    names.sort();
    assert_eq!(names, vec!["alpha".to_string(), "beta".to_string()]);
}

#[test]
fn large_file_spans_many_blocks_and_dedups_chunks() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("c2.bv");
    let container = Container::create(&path, 64, 512).unwrap();

    // Two files built from a repeating 512-byte pattern: each whole chunk
    // should collapse to the same data block.
    let chunk = vec![0xABu8; 512];
    let mut data = Vec::new();
    for _ in 0..5 {
        data.extend_from_slice(&chunk);
    }
    data.extend_from_slice(b"tail");

    container.create_file("/pattern.bin", &data).unwrap();
    let read_back = container.read_file("/pattern.bin").unwrap();
    assert_eq!(read_back, data);
}

#[test]
fn copy_in_then_copy_out_roundtrips_host_file() {
    let dir = tempdir().unwrap();
    let container = Container::create(&dir.path().join("c3.bv"), 64, 512).unwrap();

    let host_in = dir.path().join("source.txt");
    std::fs::write(&host_in, b"payload from the host filesystem").unwrap();

    container.copy_in(&host_in, "/source.txt").unwrap();

    let host_out = dir.path().join("dest.txt");
    container.copy_out("/source.txt", &host_out).unwrap();

    assert_eq!(std::fs::read(&host_out).unwrap(), b"payload from the host filesystem");
    assert!(container.copy_in(&dir.path().join("missing.txt"), "/nope.txt").is_err());
}

#[test]
fn concurrent_containers_make_progress_independently() {
    let dir = tempdir().unwrap();
    let registry = Arc::new(ContainerRegistry::new());
    registry.create("alpha", &dir.path().join("alpha.bv"), 256, 4096).unwrap();
    registry.create("beta", &dir.path().join("beta.bv"), 256, 4096).unwrap();

    let mut handles = Vec::new();
    for (name, count) in [("alpha", 20), ("beta", 20)] {
        let registry = Arc::clone(&registry);
        handles.push(std::thread::spawn(move || {
            let container = registry.get(name).unwrap();
            for i in 0..count {
                container.create_file(&format!("/f{i}"), format!("{name}-{i}").as_bytes()).unwrap();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    let alpha = registry.get("alpha").unwrap();
    let beta = registry.get("beta").unwrap();
    for i in 0..20 {
        assert_eq!(alpha.read_file(&format!("/f{i}")).unwrap(), format!("alpha-{i}").into_bytes());
        assert_eq!(beta.read_file(&format!("/f{i}")).unwrap(), format!("beta-{i}").into_bytes());
    }
}

#[test]
fn concurrent_writers_on_one_container_serialize() {
    let dir = tempdir().unwrap();
    let registry = ContainerRegistry::new();
    let container = registry.create("shared", &dir.path().join("shared.bv"), 512, 4096).unwrap();

    let mut handles = Vec::new();
    for t in 0..8 {
        let container = Arc::clone(&container);
        handles.push(std::thread::spawn(move || {
            for i in 0..10 {
                container.create_file(&format!("/t{t}-{i}"), b"x").unwrap();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    let (_, files) = container.list("/").unwrap();
    assert_eq!(files.len(), 80);
    assert!(container.basic_health_check());
}
