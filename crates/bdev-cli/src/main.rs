#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use bdev::mount::{Direction, PathCache, Table};
use bdev::probe::{FilterFlag, ProbeOutcome, Prober, Usage, part_flags, sb_flags};
use bdev::{BdevError, cache::DevCache};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Exit codes: 0 success, 2 nothing found, 4 usage/other errors,
/// 8 ambivalent low-level probing result.
const EXIT_OK: i32 = 0;
const EXIT_NOTHING: i32 = 2;
const EXIT_ERROR: i32 = 4;

#[derive(Parser)]
#[command(name = "bdev", about = "Block device identification and mount-table toolkit")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Probe devices for filesystem, RAID and partition-table signatures.
    Probe {
        /// Devices or image files to probe.
        #[arg(required = true)]
        devices: Vec<PathBuf>,
        /// Gather every match instead of failing on ambivalent results.
        #[arg(long)]
        full: bool,
        /// Restrict probing to these signature names (comma separated).
        #[arg(long, value_delimiter = ',')]
        types: Vec<String>,
        /// Restrict probing to these usage classes (filesystem, raid,
        /// crypto, other).
        #[arg(long, value_delimiter = ',')]
        usages: Vec<String>,
        /// Report magic offsets and partition-entry details too.
        #[arg(long)]
        extra: bool,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
    /// Erase all recognized signatures from a device.
    Wipe {
        device: PathBuf,
        /// Only report what would be erased.
        #[arg(long)]
        no_act: bool,
    },
    /// Query a mount table (kernel mountinfo by default).
    Mounts {
        /// Table file to parse instead of /proc/self/mountinfo.
        #[arg(long)]
        file: Option<PathBuf>,
        /// Find the filesystem mounted on this target.
        #[arg(long)]
        target: Option<String>,
        /// Find the filesystem mounted from this source (path or
        /// TAG=VALUE).
        #[arg(long)]
        source: Option<String>,
        /// Find the filesystem this path lives on.
        #[arg(long)]
        mountpoint: Option<String>,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
    /// Maintain the persistent device cache.
    Cache {
        /// Cache file to use instead of the configured one.
        #[arg(long)]
        file: Option<PathBuf>,
        /// Drop entries for devices that no longer exist.
        #[arg(long)]
        gc: bool,
    },
}

#[derive(Serialize)]
struct MountOutput<'a> {
    source: Option<&'a str>,
    target: Option<&'a str>,
    fstype: Option<&'a str>,
    options: Option<&'a str>,
    root: Option<&'a str>,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            let code = err
                .downcast_ref::<BdevError>()
                .map_or(EXIT_ERROR, BdevError::exit_code);
            std::process::exit(code);
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = if std::env::var_os("BDEV_DEBUG").is_some() {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Probe {
            devices,
            full,
            types,
            usages,
            extra,
            json,
        } => probe_cmd(&devices, full, &types, &usages, extra, json),
        Command::Wipe { device, no_act } => wipe_cmd(&device, no_act),
        Command::Mounts {
            file,
            target,
            source,
            mountpoint,
            json,
        } => mounts_cmd(file, target, source, mountpoint, json),
        Command::Cache { file, gc } => cache_cmd(file, gc),
    }
}

fn parse_usage(name: &str) -> Result<Usage> {
    match name {
        "filesystem" => Ok(Usage::Filesystem),
        "raid" => Ok(Usage::Raid),
        "crypto" => Ok(Usage::Crypto),
        "other" => Ok(Usage::Other),
        _ => anyhow::bail!("unknown usage class: {name}"),
    }
}

fn probe_cmd(
    devices: &[PathBuf],
    full: bool,
    types: &[String],
    usages: &[String],
    extra: bool,
    json: bool,
) -> Result<i32> {
    let mut results: Vec<BTreeMap<String, String>> = Vec::new();
    let mut found_any = false;

    for device in devices {
        let mut pr = Prober::from_filename(device)
            .with_context(|| format!("cannot open {}", device.display()))?;

        let mut flags = sb_flags::DEFAULT | sb_flags::USAGE | sb_flags::VERSION;
        if extra {
            flags |= sb_flags::MAGIC;
            pr.set_partitions_flags(part_flags::MAGIC | part_flags::ENTRY_DETAILS);
        }
        pr.set_superblocks_flags(flags);

        if !types.is_empty() {
            let names: Vec<&str> = types.iter().map(String::as_str).collect();
            pr.filter_superblocks_type(FilterFlag::OnlyIn, &names)?;
        }
        if !usages.is_empty() {
            let classes: Vec<Usage> = usages
                .iter()
                .map(|u| parse_usage(u))
                .collect::<Result<_>>()?;
            pr.filter_superblocks_usage(FilterFlag::OnlyIn, &classes)?;
        }

        let outcome = if full {
            pr.do_fullprobe()
        } else {
            pr.do_safeprobe()
        }?;
        if outcome == ProbeOutcome::Found {
            found_any = true;
        }

        let mut tags: BTreeMap<String, String> = pr
            .values()
            .map(|v| (v.name().to_owned(), v.as_str().into_owned()))
            .collect();
        tags.insert("DEVNAME".to_owned(), device.display().to_string());
        results.push(tags);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for tags in &results {
            let dev = tags.get("DEVNAME").map_or("?", String::as_str);
            let rendered: Vec<String> = tags
                .iter()
                .filter(|(name, _)| *name != "DEVNAME")
                .map(|(name, value)| format!("{name}=\"{value}\""))
                .collect();
            println!("{dev}: {}", rendered.join(" "));
        }
    }

    Ok(if found_any { EXIT_OK } else { EXIT_NOTHING })
}

fn wipe_cmd(device: &PathBuf, no_act: bool) -> Result<i32> {
    let mut pr = Prober::from_filename_rw(device)
        .with_context(|| format!("cannot open {} read-write", device.display()))?;
    pr.set_superblocks_flags(sb_flags::DEFAULT | sb_flags::MAGIC);
    pr.set_partitions_flags(part_flags::MAGIC);

    let mut wiped = 0_u32;
    while pr.do_probe()? == ProbeOutcome::Found {
        if let Some(t) = pr.lookup_value("TYPE").or_else(|| pr.lookup_value("PTTYPE")) {
            let offset = pr
                .lookup_value("SBMAGIC_OFFSET")
                .or_else(|| pr.lookup_value("PTMAGIC_OFFSET"))
                .map_or_else(String::new, |v| v.as_str().into_owned());
            println!(
                "{}: {} signature at offset {offset}{}",
                device.display(),
                t.as_str(),
                if no_act { " (not erased)" } else { " erased" }
            );
        }
        // A real wipe steps the prober back so backup superblocks surface;
        // a dry run lets the loop advance naturally.
        pr.do_wipe(no_act)?;
        wiped += 1;
    }

    Ok(if wiped > 0 { EXIT_OK } else { EXIT_NOTHING })
}

fn mounts_cmd(
    file: Option<PathBuf>,
    target: Option<String>,
    source: Option<String>,
    mountpoint: Option<String>,
    json: bool,
) -> Result<i32> {
    let path = file.unwrap_or_else(|| PathBuf::from(bdev::mount::PROC_MOUNTINFO));
    let mut tb = Table::from_file(&path)
        .with_context(|| format!("cannot parse {}", path.display()))?;
    tb.set_cache(PathCache::new());

    let selected: Vec<&std::sync::Arc<bdev::mount::FsEntry>> =
        if let Some(target) = &target {
            tb.find_target(target, Direction::Backward).into_iter().collect()
        } else if let Some(source) = &source {
            tb.find_source(source, Direction::Backward).into_iter().collect()
        } else if let Some(path) = &mountpoint {
            tb.find_mountpoint(path, Direction::Backward).into_iter().collect()
        } else {
            tb.iter().collect()
        };

    if selected.is_empty() {
        return Ok(EXIT_NOTHING);
    }

    if json {
        let out: Vec<MountOutput> = selected
            .iter()
            .map(|fs| MountOutput {
                source: fs.source(),
                target: fs.target(),
                fstype: fs.fstype(),
                options: fs.options(),
                root: fs.root(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        for fs in &selected {
            println!("{fs}");
        }
    }
    Ok(EXIT_OK)
}

fn cache_cmd(file: Option<PathBuf>, gc: bool) -> Result<i32> {
    let mut cache = match file {
        Some(path) => DevCache::open_file(path),
        None => DevCache::open(),
    }?;

    if gc {
        cache.gc();
        cache.save()?;
    }

    for dev in cache.devices() {
        let tags: Vec<String> = dev
            .tags
            .iter()
            .map(|(name, value)| format!("{name}=\"{value}\""))
            .collect();
        println!("{} {}", dev.name, tags.join(" "));
    }
    Ok(EXIT_OK)
}
