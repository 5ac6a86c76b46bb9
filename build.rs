// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    Command::new("driftdb")
        .version(env!("CARGO_PKG_VERSION"))
        .author("driftdb contributors")
        .about("Offline-mergeable CRDT key-value store")
        .subcommand_required(true)
        .subcommand(
            Command::new("stats")
                .about("Print entry/author/tombstone counts and the consistency flag")
                .arg(Arg::new("path").required(true).help("Path to the driftdb file")),
        )
        .subcommand(
            Command::new("list")
                .about("List keys, optionally filtered by scope and/or key")
                .arg(Arg::new("path").required(true).help("Path to the driftdb file"))
                .arg(Arg::new("scope").long("scope").help("Restrict to this scope"))
                .arg(Arg::new("key").long("key").help("Restrict to this key")),
        )
        .subcommand(
            Command::new("get")
                .about("Read every version at a (scope, key)")
                .arg(Arg::new("path").required(true).help("Path to the driftdb file"))
                .arg(Arg::new("key").long("key").required(true).help("Key to read"))
                .arg(
                    Arg::new("scope")
                        .long("scope")
                        .default_value("")
                        .help("Scope to read from"),
                ),
        )
        .subcommand(
            Command::new("search")
                .about("Full-text search over entry text")
                .arg(Arg::new("path").required(true).help("Path to the driftdb file"))
                .arg(
                    Arg::new("search_text")
                        .long("search-text")
                        .required(true)
                        .help("Full-text query"),
                ),
        )
        .subcommand(
            Command::new("erase-version-history")
                .about("Collapse a replica to a single-author database with no history")
                .arg(Arg::new("path").required(true).help("Path to the driftdb file")),
        )
        .subcommand(
            Command::new("merge")
                .about("Merge one replica into another")
                .arg(Arg::new("source").long("source").required(true).help("Source replica path"))
                .arg(Arg::new("dest").long("dest").required(true).help("Destination replica path"))
                .arg(
                    Arg::new("dry_run")
                        .long("dry-run")
                        .action(clap::ArgAction::SetTrue)
                        .help("Compute the change set without applying it"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("driftdb.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");

    println!("cargo:warning=Man page generated at {}", man_path.display());
}
