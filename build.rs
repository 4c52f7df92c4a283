// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: manifest file
fn manifest_arg() -> Arg {
    Arg::new("manifest")
        .required(true)
        .value_name("MANIFEST")
        .help("Manifest file (plain or gzip-compressed)")
}

/// Common argument: image root directory
fn root_arg() -> Arg {
    Arg::new("root")
        .short('r')
        .long("root")
        .default_value("/")
        .help("Image root directory")
}

fn build_cli() -> Command {
    Command::new("pkgcore")
        .version(env!("CARGO_PKG_VERSION"))
        .author("pkgcore Contributors")
        .about("Inspect, compare and apply package manifests")
        .subcommand_required(false)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .global(true)
                .help("Configuration file (JSON)"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(clap::ArgAction::SetTrue)
                .global(true)
                .help("Print machine-readable JSON instead of text"),
        )
        .subcommand(
            Command::new("contents")
                .about("Show the actions of a manifest")
                .arg(manifest_arg())
                .arg(
                    Arg::new("filter")
                        .short('f')
                        .long("filter")
                        .action(clap::ArgAction::Append)
                        .help("Filter expression, e.g. \"arch=i386 & debug=false\" (repeatable)"),
                )
                .arg(
                    Arg::new("variant")
                        .long("variant")
                        .value_name("NAME=VALUE")
                        .action(clap::ArgAction::Append)
                        .help("Image variant (repeatable)"),
                )
                .arg(
                    Arg::new("facet")
                        .long("facet")
                        .value_name("NAME=BOOL")
                        .action(clap::ArgAction::Append)
                        .help("Image facet (repeatable)"),
                )
                .arg(
                    Arg::new("type")
                        .short('t')
                        .long("type")
                        .help("Only show actions of this type"),
                ),
        )
        .subcommand(
            Command::new("diff")
                .about("Show what changes between two manifests")
                .arg(Arg::new("old").required(true).help("Original manifest"))
                .arg(Arg::new("new").required(true).help("New manifest")),
        )
        .subcommand(
            Command::new("verify")
                .about("Check an image against a manifest")
                .arg(manifest_arg())
                .arg(root_arg()),
        )
        .subcommand(
            Command::new("install")
                .about("Apply a manifest to an image")
                .arg(manifest_arg())
                .arg(root_arg())
                .arg(
                    Arg::new("payload")
                        .short('p')
                        .long("payload")
                        .required(true)
                        .help("Directory holding payloads named by content hash"),
                )
                .arg(
                    Arg::new("origin")
                        .long("origin")
                        .help("Manifest currently installed, for updates"),
                ),
        )
        .subcommand(
            Command::new("index")
                .about("Print the search index entries of a manifest")
                .arg(manifest_arg()),
        )
        .subcommand(
            Command::new("fmri")
                .about("Parse an FMRI and show its parts")
                .arg(Arg::new("fmri").required(true).help("Package FMRI"))
                .arg(
                    Arg::new("build_release")
                        .short('b')
                        .long("build-release")
                        .help("Build release for versions that omit one"),
                ),
        )
        .subcommand(
            Command::new("version")
                .about("Check whether one version succeeds another")
                .arg(Arg::new("version").required(true).help("Candidate successor"))
                .arg(Arg::new("other").required(true).help("Version to compare against"))
                .arg(
                    Arg::new("constraint")
                        .long("constraint")
                        .default_value("auto")
                        .value_parser([
                            "none",
                            "auto",
                            "release",
                            "release-major",
                            "release-minor",
                            "branch",
                            "branch-major",
                            "branch-minor",
                        ])
                        .help("Successor constraint"),
                ),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "elvish", "fish", "powershell", "zsh"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer)
        .expect("Failed to render man page");

    let man_path = man_dir.join("pkgcore.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");

    println!("cargo:warning=Man page generated at {}", man_path.display());
}
