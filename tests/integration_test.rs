// tests/integration_test.rs

//! Integration tests for pkgcore
//!
//! These tests verify end-to-end functionality across modules.

use flate2::Compression;
use flate2::write::GzEncoder;
use pkgcore::actions::ActionKind;
use pkgcore::{
    Config, Constraint, Fmri, Image, Manifest, PkgPlan, RepoChooser, RepoUri, Version,
};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Store a payload under its content hash and return the hash
fn add_payload(dir: &Path, data: &[u8]) -> String {
    let hash = sha256_hex(data);
    fs::write(dir.join(&hash), data).unwrap();
    hash
}

#[test]
fn test_hash_change_yields_single_pair() {
    let dir = tempdir().unwrap();
    let old_text = "\
set name=pkg.fmri value=pkg://example.org/shell/bash@5.2,5.11-0.1:20240101T000000Z
dir path=usr/bin mode=0755
file 1f2e3d path=usr/bin/bash mode=0555
link path=usr/bin/sh target=bash
";
    let new_text = old_text.replace("1f2e3d", "9a8b7c");

    let old_path = dir.path().join("old.p5m");
    fs::write(&old_path, old_text).unwrap();

    // the new manifest is stored compressed
    let new_path = dir.path().join("new.p5m.gz");
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(new_text.as_bytes()).unwrap();
    fs::write(&new_path, enc.finish().unwrap()).unwrap();

    let old = Manifest::load(&old_path).unwrap();
    let new = Manifest::load(&new_path).unwrap();
    assert_eq!(old.len(), 4);
    assert_eq!(new.len(), 4);

    let diff = Manifest::difference(&old, &new);
    let pairs = diff.pairs();
    assert_eq!(pairs.len(), 1);
    let (o, n) = pairs[0];
    let (o, n) = (o.unwrap(), n.unwrap());
    assert_eq!(o.get_str("path"), Some("usr/bin/bash"));
    assert_eq!(n.get_str("path"), Some("usr/bin/bash"));
    assert_eq!(o.hash(), Some("1f2e3d"));
    assert_eq!(n.hash(), Some("9a8b7c"));

    assert!(Manifest::difference(&old, &old).is_empty());
    assert_ne!(old.digest(), new.digest());
}

#[test]
fn test_install_verify_update() {
    let image_dir = tempdir().unwrap();
    let payload_dir = tempdir().unwrap();

    let motd = add_payload(payload_dir.path(), b"welcome\n");
    let tool_v1 = add_payload(payload_dir.path(), b"#!/bin/sh\necho v1\n");
    let tool_v2 = add_payload(payload_dir.path(), b"#!/bin/sh\necho version 2\n");
    let old_doc = add_payload(payload_dir.path(), b"old notes\n");

    let v1_text = format!(
        "set name=pkg.fmri value=pkg:/demo/tool@1.0,5.11-0.1\n\
         dir path=etc mode=0755\n\
         dir path=opt/tool/bin mode=0755\n\
         dir path=opt/tool/doc mode=0755\n\
         file {motd} path=etc/motd mode=0644\n\
         file {tool_v1} path=opt/tool/bin/tool mode=0755\n\
         file {old_doc} path=opt/tool/doc/NOTES mode=0644\n\
         link path=opt/tool/current target=bin/tool\n"
    );
    let v2_text = format!(
        "set name=pkg.fmri value=pkg:/demo/tool@1.1,5.11-0.1\n\
         dir path=etc mode=0755\n\
         dir path=opt/tool/bin mode=0755\n\
         file {motd} path=etc/motd mode=0644\n\
         file {tool_v2} path=opt/tool/bin/tool mode=0755\n\
         link path=opt/tool/current target=bin/tool\n"
    );

    let image = Image::new(image_dir.path());

    let v1 = Manifest::parse(&v1_text)
        .unwrap()
        .attach_payloads(payload_dir.path())
        .unwrap();
    let plan = PkgPlan::new(&image, v1.fmri());
    let diff = v1.install(&plan, None).unwrap();
    assert_eq!(diff.added.len(), v1.len());
    assert!(v1.verify(&plan).unwrap().is_empty());
    assert_eq!(
        fs::read_link(image_dir.path().join("opt/tool/current")).unwrap(),
        Path::new("bin/tool")
    );

    // a tampered file is reported, nothing else
    fs::write(image_dir.path().join("etc/motd"), b"hacked\n").unwrap();
    let failures = v1.verify(&plan).unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0.get_str("path"), Some("etc/motd"));
    fs::write(image_dir.path().join("etc/motd"), b"welcome\n").unwrap();

    let v2 = Manifest::parse(&v2_text)
        .unwrap()
        .attach_payloads(payload_dir.path())
        .unwrap();
    assert!(v2.fmri().unwrap().is_successor(v1.fmri().unwrap(), Constraint::None));

    let plan = PkgPlan::new(&image, v2.fmri());
    let diff = v2.install(&plan, Some(&v1)).unwrap();
    assert_eq!(diff.removed.len(), 2);
    let changed: Vec<&str> = diff
        .changed
        .iter()
        .filter_map(|(_, n)| n.get_str("path").or_else(|| n.get_str("name")))
        .collect();
    assert_eq!(changed, vec!["pkg.fmri", "opt/tool/bin/tool"]);

    assert_eq!(
        fs::read(image_dir.path().join("opt/tool/bin/tool")).unwrap(),
        b"#!/bin/sh\necho version 2\n"
    );
    assert!(!image_dir.path().join("opt/tool/doc").exists());
    assert!(v2.verify(&plan).unwrap().is_empty());
}

#[test]
fn test_config_driven_filtering() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("pkgcore.json");
    fs::write(
        &config_path,
        r#"{
            "variants": {"variant.arch": "sparc"},
            "facets": {"facet.doc.*": false},
            "filters": ["locale=en | locale=sv"]
        }"#,
    )
    .unwrap();
    let config = Config::load(&config_path).unwrap();

    let m = Manifest::parse(
        "\
file 1 path=usr/bin/ls mode=0555 variant.arch=i386
file 2 path=usr/bin/ls mode=0555 variant.arch=sparc
file 3 path=usr/share/man/man1/ls.1 mode=0444 facet.doc.man=true
file 4 path=usr/lib/locale/sv/ls.mo mode=0444 locale=sv
file 5 path=usr/lib/locale/fr/ls.mo mode=0444 locale=fr
file 6 path=usr/lib/debug/ls mode=0444 variant.debug.osnet=true
",
    )
    .unwrap();

    let filtered = m
        .filter(&config.compiled_filters().unwrap())
        .filter_variants(&config.variants().unwrap(), &config.facets().unwrap());

    let hashes: Vec<&str> = filtered.actions().iter().filter_map(|a| a.hash()).collect();
    assert_eq!(hashes, vec!["2", "4"]);
}

#[test]
fn test_manifest_fmri_and_versions() {
    let m = Manifest::parse(
        "set name=pkg.fmri value=pkg://openindiana.org/library/zlib@1.3.1,5.11-2024.0.0.1:20240315T101500Z\n\
         set name=pkg.summary value=\"zlib compression library\"\n\
         set name=pkg.obsolete value=false\n",
    )
    .unwrap();

    let fmri = m.fmri().unwrap();
    assert_eq!(fmri.publisher(), Some("openindiana.org"));
    assert_eq!(fmri.get_name(), "library/zlib");
    assert!(!m.get_bool("pkg.obsolete", true).unwrap());

    let older: Fmri = "pkg:/library/zlib@1.3,5.11-2023.0.0.1".parse().unwrap();
    assert!(fmri.is_successor(&older, Constraint::None));
    assert!(fmri.is_similar(&older));
    assert!(older < *fmri);

    let release: Version = "1.3".parse().unwrap();
    assert!(fmri.version().unwrap().is_successor(&release, Constraint::Release));

    let tokens: Vec<String> = m
        .search_index()
        .into_iter()
        .filter(|e| e.key == "pkg.summary")
        .map(|e| e.token)
        .collect();
    assert_eq!(tokens, vec!["zlib", "compression", "library"]);
    assert_eq!(m.gen_actions_by_type(ActionKind::Set).count(), 3);
}

#[test]
fn test_manifest_error_names_package() {
    let mut m = Manifest::with_fmri("pkg:/broken/pkg@1.0".parse().unwrap());
    let err = m
        .set_content("dir path=a mode=0755\nfrobnicate path=b\n")
        .unwrap_err();
    let text = err.to_string();
    assert!(text.contains("frobnicate"));
    assert!(text.contains("broken/pkg"));
    assert!(text.contains("line 2"));
}

#[test]
fn test_repo_chooser_shared_across_workers() {
    let chooser = Arc::new(RepoChooser::new());
    let mirrors: Vec<RepoUri> = ["http://a.example.com/", "http://b.example.com", "http://c.example.com"]
        .into_iter()
        .map(RepoUri::new)
        .collect();

    let handles: Vec<_> = mirrors
        .iter()
        .cloned()
        .enumerate()
        .map(|(i, mirror)| {
            let chooser = Arc::clone(&chooser);
            thread::spawn(move || {
                let stats = chooser.stats_for(&mirror);
                let mut stats = stats.lock();
                for _ in 0..5 {
                    stats.record_tx();
                }
                for _ in 0..i {
                    stats.record_error(false, false, false);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let ranked = chooser.get_repostats(&mirrors, &[]);
    let urls: Vec<String> = ranked.iter().map(|(rs, _)| rs.lock().url().to_string()).collect();
    assert_eq!(
        urls,
        vec!["http://a.example.com", "http://b.example.com", "http://c.example.com"]
    );
    assert_eq!(chooser.get_num_visited(&mirrors), 3);
}
