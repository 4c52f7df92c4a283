// src/main.rs

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use pkgcore::actions::ActionKind;
use pkgcore::{Config, Constraint, Filter, Fmri, Image, Manifest, PkgPlan, Version};
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "pkgcore")]
#[command(author, version, about = "Inspect, compare and apply package manifests", long_about = None)]
struct Cli {
    /// Configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the actions of a manifest
    Contents {
        /// Manifest file (plain or gzip-compressed)
        manifest: PathBuf,
        /// Filter expression, e.g. "arch=i386 & debug=false" (repeatable)
        #[arg(short, long = "filter")]
        filters: Vec<String>,
        /// Image variant as NAME=VALUE (repeatable)
        #[arg(long = "variant", value_parser = parse_variant_arg)]
        variants: Vec<(String, String)>,
        /// Image facet as NAME=true|false (repeatable)
        #[arg(long = "facet", value_parser = parse_facet_arg)]
        facets: Vec<(String, bool)>,
        /// Only show actions of this type
        #[arg(short = 't', long = "type")]
        action_type: Option<String>,
    },
    /// Show what changes between two manifests
    Diff {
        /// Original manifest
        old: PathBuf,
        /// New manifest
        new: PathBuf,
    },
    /// Check an image against a manifest
    Verify {
        manifest: PathBuf,
        /// Image root directory
        #[arg(short, long, default_value = "/")]
        root: PathBuf,
    },
    /// Apply a manifest to an image
    Install {
        manifest: PathBuf,
        /// Image root directory
        #[arg(short, long, default_value = "/")]
        root: PathBuf,
        /// Directory holding payloads named by content hash
        #[arg(short, long)]
        payload: PathBuf,
        /// Manifest currently installed, for updates
        #[arg(long)]
        origin: Option<PathBuf>,
    },
    /// Print the search index entries of a manifest
    Index { manifest: PathBuf },
    /// Parse an FMRI and show its parts
    Fmri {
        fmri: String,
        /// Build release for versions that omit one
        #[arg(short, long)]
        build_release: Option<String>,
    },
    /// Check whether one version succeeds another
    Version {
        /// Candidate successor
        version: String,
        /// Version to compare against
        other: String,
        /// One of none, auto, release, release-major, release-minor,
        /// branch, branch-major, branch-minor
        #[arg(long, default_value = "auto")]
        constraint: String,
    },
    /// Generate shell completion scripts
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Parse `NAME=VALUE` for --variant
fn parse_variant_arg(s: &str) -> std::result::Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", s))?;
    if name.is_empty() || value.is_empty() {
        return Err(format!("expected NAME=VALUE, got '{}'", s));
    }
    let name = if name.starts_with("variant.") {
        name.to_string()
    } else {
        format!("variant.{}", name)
    };
    Ok((name, value.to_string()))
}

/// Parse `NAME=true|false` for --facet
fn parse_facet_arg(s: &str) -> std::result::Result<(String, bool), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=true|false, got '{}'", s))?;
    let value = match value.to_lowercase().as_str() {
        "true" => true,
        "false" => false,
        _ => return Err(format!("facet value must be true or false, got '{}'", value)),
    };
    let name = if name.starts_with("facet.") {
        name.to_string()
    } else {
        format!("facet.{}", name)
    };
    Ok((name, value))
}

fn load_manifest(path: &Path) -> Result<Manifest> {
    Manifest::load(path).with_context(|| format!("Failed to load manifest {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Contents {
            manifest,
            filters,
            variants,
            facets,
            action_type,
        }) => {
            // flags override the configuration file
            if !filters.is_empty() {
                config.filters = filters;
            }
            config.variants.extend(variants);
            config.facets.extend(facets);

            let compiled: Vec<Filter> = config.compiled_filters()?;
            let kind = action_type
                .map(|t| t.parse::<ActionKind>().map_err(anyhow::Error::msg))
                .transpose()?;

            let m = load_manifest(&manifest)?
                .filter(&compiled)
                .filter_variants(&config.variants()?, &config.facets()?);

            let mut actions: Vec<_> = m
                .actions()
                .iter()
                .filter(|a| kind.is_none_or(|k| a.kind() == k))
                .collect();
            actions.sort();

            if cli.json {
                print_json(&actions)?;
            } else {
                for action in actions {
                    println!("{}", action);
                }
            }
            Ok(())
        }
        Some(Commands::Diff { old, new }) => {
            let old = load_manifest(&old)?;
            let new = load_manifest(&new)?;
            let diff = Manifest::difference(&old, &new);

            if cli.json {
                print_json(&diff)?;
            } else if diff.is_empty() {
                println!("Manifests are identical");
            } else {
                print!("{}", diff.humanized());
            }
            Ok(())
        }
        Some(Commands::Verify { manifest, root }) => {
            let m = load_manifest(&manifest)?
                .filter_variants(&config.variants()?, &config.facets()?);
            let image = Image::new(&root);
            let plan = PkgPlan::new(&image, m.fmri());
            let failures = m.verify(&plan)?;

            if cli.json {
                let report: Vec<_> = failures
                    .iter()
                    .map(|(action, errors)| {
                        serde_json::json!({
                            "action": action.to_string(),
                            "errors": errors,
                        })
                    })
                    .collect();
                print_json(&report)?;
            } else {
                for (action, errors) in &failures {
                    println!("{} {}", action.name(), action.distinguished_name());
                    for error in errors {
                        println!("    {}", error);
                    }
                }
            }

            if failures.is_empty() {
                info!("{} actions verified in {}", m.len(), root.display());
                Ok(())
            } else {
                Err(anyhow::anyhow!(
                    "{} of {} actions failed verification",
                    failures.len(),
                    m.len()
                ))
            }
        }
        Some(Commands::Install {
            manifest,
            root,
            payload,
            origin,
        }) => {
            let variants = config.variants()?;
            let facets = config.facets()?;
            let m = load_manifest(&manifest)?
                .filter_variants(&variants, &facets)
                .attach_payloads(&payload)?;
            let origin = origin
                .map(|p| load_manifest(&p).map(|o| o.filter_variants(&variants, &facets)))
                .transpose()?;

            let image = Image::new(&root);
            let plan = PkgPlan::new(&image, m.fmri());
            let diff = m.install(&plan, origin.as_ref())?;

            if cli.json {
                print_json(&diff)?;
            } else {
                println!(
                    "Installed into {}: {} added, {} changed, {} removed",
                    root.display(),
                    diff.added.len(),
                    diff.changed.len(),
                    diff.removed.len()
                );
            }
            Ok(())
        }
        Some(Commands::Index { manifest }) => {
            let m = load_manifest(&manifest)?;
            let mut entries = m.search_index();
            entries.sort();

            if cli.json {
                print_json(&entries)?;
            } else {
                for e in entries {
                    println!(
                        "{} {} {} {}",
                        e.action_type,
                        e.key,
                        e.token,
                        e.full_value.as_deref().unwrap_or("-")
                    );
                }
            }
            Ok(())
        }
        Some(Commands::Fmri {
            fmri,
            build_release,
        }) => {
            let build = build_release.unwrap_or_else(|| config.build_release.clone());
            let parsed = Fmri::parse(&fmri, Some(&build))?;
            let publisher = config.default_publisher.as_deref();

            if cli.json {
                print_json(&serde_json::json!({
                    "fmri": parsed.get_fmri(publisher, false, true, true),
                    "publisher": parsed.publisher().or(publisher),
                    "name": parsed.get_name(),
                    "version": parsed.version().map(|v| v.to_string()),
                    "timestamp": parsed.get_timestamp().map(|t| t.to_string()),
                    "dir_path": parsed.get_dir_path(false).ok(),
                }))?;
            } else {
                println!("FMRI:      {}", parsed.get_fmri(publisher, false, true, true));
                println!("Short:     {}", parsed.get_short_fmri(publisher, false, true));
                println!("Publisher: {}", parsed.publisher().or(publisher).unwrap_or("-"));
                println!("Name:      {}", parsed.get_name());
                if let Some(version) = parsed.version() {
                    println!("Release:   {}", version.release());
                    println!("Build:     {}", version.build_release());
                    if let Some(branch) = version.branch() {
                        println!("Branch:    {}", branch);
                    }
                    if let Some(ts) = version.get_timestamp() {
                        println!("Timestamp: {}", ts);
                    }
                }
            }
            Ok(())
        }
        Some(Commands::Version {
            version,
            other,
            constraint,
        }) => {
            let constraint: Constraint = constraint.parse().map_err(anyhow::Error::msg)?;
            let a = Version::parse(&version, Some(&config.build_release))?;
            let b = Version::parse(&other, Some(&config.build_release))?;
            let successor = a.is_successor(&b, constraint);

            if cli.json {
                print_json(&serde_json::json!({
                    "version": a,
                    "other": b,
                    "constraint": constraint.as_str(),
                    "ordering": format!("{:?}", a.cmp(&b)),
                    "successor": successor,
                }))?;
            } else {
                println!("{} {:?} {}", a, a.cmp(&b), b);
                println!(
                    "{} {} a successor of {} under '{}'",
                    a,
                    if successor { "is" } else { "is not" },
                    b,
                    constraint
                );
            }
            Ok(())
        }
        Some(Commands::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "pkgcore", &mut io::stdout());
            Ok(())
        }
        None => {
            // No command provided, show help
            println!("pkgcore v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'pkgcore --help' for usage information");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkgcore::compile_filter;

    #[test]
    fn test_parse_variant_arg() {
        assert_eq!(
            parse_variant_arg("arch=i386").unwrap(),
            ("variant.arch".to_string(), "i386".to_string())
        );
        assert_eq!(
            parse_variant_arg("variant.debug.osnet=true").unwrap().0,
            "variant.debug.osnet"
        );
        assert!(parse_variant_arg("arch").is_err());
        assert!(parse_variant_arg("arch=").is_err());
    }

    #[test]
    fn test_parse_facet_arg() {
        assert_eq!(
            parse_facet_arg("doc.man=False").unwrap(),
            ("facet.doc.man".to_string(), false)
        );
        assert_eq!(parse_facet_arg("facet.locale.*=true").unwrap().1, true);
        assert!(parse_facet_arg("doc=maybe").is_err());
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_filter_flag_parses() {
        let cli = Cli::try_parse_from([
            "pkgcore",
            "contents",
            "m.p5m",
            "-f",
            "arch=i386",
            "--variant",
            "arch=sparc",
            "--json",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Some(Commands::Contents {
                filters, variants, ..
            }) => {
                assert_eq!(filters, vec!["arch=i386"]);
                assert_eq!(variants[0].1, "sparc");
                assert!(compile_filter(&filters[0]).is_ok());
            }
            _ => panic!("expected contents command"),
        }
    }
}
