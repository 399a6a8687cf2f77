//! Command-line front end for building 3DS RomFS images.

use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use ctr_object::write::{
    EmptyFileOffset, RomFsBuilder,
    romfs::{RomFsLayout, SkipHidden},
};
use fs_err as fs;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "ctr-romfs",
    version,
    about = "Build 3DS RomFS images from a directory tree",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        short,
        long,
        global = true,
        action = ArgAction::Count,
        help = "Increase log verbosity (-v debug, -vv trace); RUST_LOG overrides"
    )]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a RomFS image from a directory
    Build(BuildCmd),
    /// Print the planned layout of a directory without writing anything
    Plan(SourceArgs),
}

#[derive(Args, Debug)]
struct SourceArgs {
    #[arg(value_name = "DIR", help = "Directory to pack")]
    dir: PathBuf,

    #[arg(long, help = "Skip dot-prefixed files and directories")]
    skip_hidden: bool,
}

#[derive(Args, Debug)]
struct BuildCmd {
    #[command(flatten)]
    source: SourceArgs,

    #[arg(short, long, value_name = "FILE", help = "Output image path")]
    output: PathBuf,

    #[arg(
        long,
        value_enum,
        default_value_t = EmptyOffsetArg::Zero,
        help = "Data offset stored for zero-size files"
    )]
    empty_file_offset: EmptyOffsetArg,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EmptyOffsetArg {
    /// 0x00
    Zero,
    /// 0x40
    Legacy,
}

impl From<EmptyOffsetArg> for EmptyFileOffset {
    fn from(arg: EmptyOffsetArg) -> Self {
        match arg {
            EmptyOffsetArg::Zero => EmptyFileOffset::Zero,
            EmptyOffsetArg::Legacy => EmptyFileOffset::Legacy,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Build(cmd) => run_build(cmd),
        Command::Plan(source) => run_plan(source),
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn open_source(source: &SourceArgs) -> anyhow::Result<RomFsBuilder> {
    let builder = if source.skip_hidden {
        RomFsBuilder::from_directory_filtered(&source.dir, SkipHidden)
    } else {
        RomFsBuilder::from_directory(&source.dir)
    };
    builder.with_context(|| format!("failed to import {}", source.dir.display()))
}

fn run_build(cmd: BuildCmd) -> anyhow::Result<()> {
    let builder = open_source(&cmd.source)?.empty_file_offset(cmd.empty_file_offset.into());

    if builder.size() == 0 {
        warn!(dir = %cmd.source.dir.display(), "romfs.cli.nothing_to_pack");
        return Ok(());
    }

    let image = builder.build().context("failed to build romfs")?;
    fs::write(&cmd.output, image.as_bytes())
        .with_context(|| format!("failed to write {}", cmd.output.display()))?;

    let superblock = image.superblock_hash().map(hex::encode).unwrap_or_default();
    info!(
        output = %cmd.output.display(),
        size = image.len(),
        hash_region_size = image.hash_region_size(),
        superblock_hash = %superblock,
        "romfs.cli.written"
    );
    Ok(())
}

fn run_plan(source: SourceArgs) -> anyhow::Result<()> {
    let builder = open_source(&source)?;
    print!("{}", render_layout(builder.layout()));
    Ok(())
}

fn render_layout(layout: &RomFsLayout) -> String {
    if layout.is_empty() {
        return "no romfs (nothing to pack)\n".to_string();
    }

    let mut out = String::new();
    out.push_str(&format!("directories:      {}\n", layout.dir_count()));
    out.push_str(&format!("files:            {}\n", layout.file_count()));
    out.push_str(&format!("dir buckets:      {}\n", layout.dir_bucket_count()));
    out.push_str(&format!("file buckets:     {}\n", layout.file_bucket_count()));
    out.push_str(&format!("dir table:        {:#x}\n", layout.dir_table_len()));
    out.push_str(&format!("file table:       {:#x}\n", layout.file_table_len()));
    out.push_str(&format!("data offset:      {:#x}\n", layout.data_offset()));
    out.push_str(&format!("data:             {:#x}\n", layout.data_len()));
    for (i, level) in layout.levels().iter().enumerate() {
        out.push_str(&format!(
            "level {i}:          offset {:#x} size {:#x}\n",
            level.offset, level.size
        ));
    }
    out.push_str(&format!("total:            {:#x}\n", layout.total_size()));
    out
}
