mod output;

use anyhow::{Context, Result};
use carpack_core::{
    BlockSource, BlockStore, CarHeader, CarReader, ChunkerConfig, Cid, CodecRegistry,
    EncoderConfig, Error as CoreError, ExportOptions, Exporter, HashAlgorithm, IndexedCarReader,
    LogStore, PackInput, Packer, UnpackOptions, files_from_paths, find_implicit_roots,
    hash_archive, load_archive, parse_cid, resolve_roots, unpack_file, unpack_to_dir,
};
use clap::{ArgAction, Parser, Subcommand};
use output::{
    BlocksOutput, EntryInfo, HashOutput, LsOutput, OutputWriter, PackOutput, RootsOutput,
    UnpackOutput,
};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Carpack - pack files into content-addressed archives (CAR) and back
#[derive(Parser)]
#[command(name = "carpack")]
#[command(about = "Pack and unpack content-addressed archives (CAR)", long_about = None)]
#[command(version)]
struct Cli {
    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack files into an archive (reads stdin when no paths are given)
    #[command(visible_alias = "p")]
    Pack {
        /// Files or directories to pack
        paths: Vec<PathBuf>,

        /// Include paths that start with "."
        #[arg(short = 'H', long)]
        hidden: bool,

        /// Do not wrap a single input file in a directory
        #[arg(long = "no-wrap", action = ArgAction::SetFalse)]
        wrap: bool,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Chunk size in bytes
        #[arg(long, env = "CARPACK_CHUNK_SIZE")]
        chunk_size: Option<usize>,

        /// Use content-defined chunking (ignores --chunk-size)
        #[arg(long)]
        cdc: bool,

        /// Maximum links per file node
        #[arg(long, env = "CARPACK_TREE_WIDTH")]
        tree_width: Option<usize>,

        /// Directory size above which entries are sharded
        #[arg(long, env = "CARPACK_SHARD_THRESHOLD")]
        shard_threshold: Option<usize>,

        /// Hash algorithm (sha2-256, sha2-512, blake3)
        #[arg(long, default_value = "sha2-256")]
        hash: String,
    },

    /// Unpack files and directories from an archive (reads stdin when no archive is given)
    #[command(visible_alias = "un")]
    Unpack {
        /// Archive to unpack
        car: Option<PathBuf>,

        /// Root CID to unpack (repeatable)
        #[arg(short, long = "root")]
        roots: Vec<String>,

        /// Output directory; without it a single file is written to stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Verify every block against its CID
        #[arg(
            long,
            value_name = "BOOL",
            action = ArgAction::Set,
            num_args = 0..=1,
            require_equals = true,
            default_value_t = true,
            default_missing_value = "true",
            overrides_with = "no_verify"
        )]
        verify: bool,

        /// Same as --verify=false
        #[arg(long, overrides_with = "verify")]
        no_verify: bool,

        /// Skip missing blocks instead of failing
        #[arg(long)]
        tolerate_missing: bool,
    },

    /// List root CIDs of an archive
    Roots {
        /// Archive to read (reads stdin when omitted)
        car: Option<PathBuf>,

        /// List roots found implicitly from the blocks in the archive
        #[arg(short, long)]
        implicit: bool,
    },

    /// List files and directories in an archive
    #[command(visible_alias = "list")]
    Ls {
        /// Archive to read (reads stdin when omitted)
        car: Option<PathBuf>,

        /// Root CID to list from
        #[arg(short, long)]
        root: Option<String>,

        /// Print CIDs and byte sizes
        #[arg(short, long)]
        verbose: bool,
    },

    /// List block CIDs in an archive
    Blocks {
        /// Archive to read (reads stdin when omitted)
        car: Option<PathBuf>,
    },

    /// Compute the CID of an archive
    Hash {
        /// Archive to hash (reads stdin when omitted)
        car: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let output = OutputWriter::new(cli.json);

    let result = match cli.command {
        Commands::Pack {
            paths,
            hidden,
            wrap,
            output: out,
            chunk_size,
            cdc,
            tree_width,
            shard_threshold,
            hash,
        } => encoder_config(chunk_size, cdc, tree_width, shard_threshold, &hash, wrap)
            .and_then(|config| cmd_pack(&paths, hidden, out.as_deref(), config, &output)),
        Commands::Unpack {
            car,
            roots,
            output: out,
            verify,
            no_verify,
            tolerate_missing,
        } => cmd_unpack(
            car.as_deref(),
            &roots,
            out.as_deref(),
            verify && !no_verify,
            tolerate_missing,
            &output,
        ),
        Commands::Roots { car, implicit } => cmd_roots(car.as_deref(), implicit, &output),
        Commands::Ls { car, root, verbose } => {
            cmd_ls(car.as_deref(), root.as_deref(), verbose, &output)
        }
        Commands::Blocks { car } => cmd_blocks(car.as_deref(), &output),
        Commands::Hash { car } => cmd_hash(car.as_deref(), &output),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            output.write_error(&err, 1);
            ExitCode::FAILURE
        }
    }
}

/// Log to stderr, filtered by `CARPACK_LOG` (default `warn`).
fn init_tracing() {
    let filter = EnvFilter::try_from_env("CARPACK_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn encoder_config(
    chunk_size: Option<usize>,
    cdc: bool,
    tree_width: Option<usize>,
    shard_threshold: Option<usize>,
    hash: &str,
    wrap: bool,
) -> Result<EncoderConfig> {
    let hash = HashAlgorithm::parse(hash).with_context(|| format!("Invalid hash: {}", hash))?;
    let mut config = EncoderConfig::new().with_hash(hash).with_wrap(wrap);

    if cdc {
        config = config.with_chunker(ChunkerConfig::content_defined());
    } else if let Some(size) = chunk_size {
        config = config.with_chunk_size(size);
    }
    if let Some(width) = tree_width {
        config = config.with_tree_width(width);
    }
    if let Some(threshold) = shard_threshold {
        config = config.with_shard_threshold(threshold);
    }

    config.validate().context("Invalid encoder settings")?;
    Ok(config)
}

fn cmd_pack(
    paths: &[PathBuf],
    hidden: bool,
    out: Option<&Path>,
    config: EncoderConfig,
    output: &OutputWriter,
) -> Result<()> {
    let packer = Packer::new(config)?;

    let input = if paths.is_empty() {
        PackInput::stream(io::stdin())
    } else {
        PackInput::Files(files_from_paths(paths, hidden).context("Failed to collect inputs")?)
    };

    match out {
        Some(path) => {
            let summary = packer
                .pack_to_file(input, path)
                .with_context(|| format!("Failed to pack into {}", path.display()))?;
            let data = PackOutput::new(&summary, Some(path.display().to_string()));
            output.write_status(&data, || format!("{}\n", summary.root))
        }
        None => {
            let stdout = BufWriter::new(io::stdout().lock());
            let (summary, mut stdout) = packer
                .pack_to_writer(input, stdout)
                .context("Failed to pack to stdout")?;
            stdout.flush()?;
            let data = PackOutput::new(&summary, None);
            output.write_status(&data, || format!("{}\n", summary.root))
        }
    }
}

/// An archive opened for random access.
///
/// Files are indexed in place; stdin is copied into a temporary log store
/// that is removed once the command is done.
enum Archive {
    File(IndexedCarReader<BufReader<File>>),
    Stdin { store: LogStore, header: CarHeader },
}

impl Archive {
    fn open(car: Option<&Path>) -> Result<Self> {
        match car {
            Some(path) => {
                let reader = IndexedCarReader::open(path)
                    .with_context(|| format!("Failed to read archive {}", path.display()))?;
                Ok(Archive::File(reader))
            }
            None => {
                let store = LogStore::temporary().context("Failed to create temporary store")?;
                let header = load_archive(io::stdin().lock(), &store)
                    .context("Failed to read archive from stdin")?;
                Ok(Archive::Stdin { store, header })
            }
        }
    }

    fn source(&self) -> &dyn BlockSource {
        match self {
            Archive::File(reader) => reader,
            Archive::Stdin { store, .. } => store,
        }
    }

    fn resolve_roots(&self, explicit: &[Cid]) -> carpack_core::Result<Vec<Cid>> {
        match self {
            Archive::File(reader) => resolve_roots(explicit, reader.roots(), || Ok(reader.blocks())),
            Archive::Stdin { store, header } => {
                resolve_roots(explicit, &header.roots, || store.blocks())
            }
        }
    }

    fn close(self) -> Result<()> {
        if let Archive::Stdin { store, .. } = self {
            store.close().context("Failed to remove temporary store")?;
        }
        Ok(())
    }
}

fn parse_roots<S: AsRef<str>>(roots: &[S]) -> Result<Vec<Cid>> {
    roots
        .iter()
        .map(|s| {
            let s = s.as_ref();
            parse_cid(s).with_context(|| format!("Invalid CID: {}", s))
        })
        .collect()
}

fn cmd_unpack(
    car: Option<&Path>,
    roots: &[String],
    out: Option<&Path>,
    verify: bool,
    tolerate_missing: bool,
    output: &OutputWriter,
) -> Result<()> {
    let explicit = parse_roots(roots)?;
    let archive = Archive::open(car)?;
    let roots = archive.resolve_roots(&explicit)?;

    let Some(dir) = out else {
        let [root] = roots.as_slice() else {
            anyhow::bail!("Multiple roots - specify output path with --output");
        };
        let mut stdout = BufWriter::new(io::stdout().lock());
        match unpack_file(archive.source(), *root, verify, &mut stdout) {
            Err(CoreError::InvalidInput { .. }) => {
                anyhow::bail!("Not a file - specify output path with --output")
            }
            result => result.context("Failed to write file content")?,
        };
        stdout.flush()?;
        return archive.close();
    };

    let options = UnpackOptions {
        roots: roots.clone(),
        verify,
        tolerate_missing,
    };
    let summary = unpack_to_dir(archive.source(), &roots, dir, &options)
        .with_context(|| format!("Failed to unpack to {}", dir.display()))?;
    archive.close()?;

    let data = UnpackOutput::new(summary, dir.display().to_string());
    output.write(&data, || {
        let mut text = format!(
            "Unpacked {} files, {} directories ({} bytes) to {}\n",
            data.files, data.directories, data.bytes, data.destination
        );
        for entry in &data.missing {
            text.push_str(&format!("missing: {}\n", entry.path));
        }
        text
    })
}

fn open_input(car: Option<&Path>) -> Result<Box<dyn Read>> {
    match car {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open archive {}", path.display()))?;
            Ok(Box::new(BufReader::new(file)))
        }
        None => Ok(Box::new(io::stdin().lock())),
    }
}

fn cmd_roots(car: Option<&Path>, implicit: bool, output: &OutputWriter) -> Result<()> {
    let reader = CarReader::new(open_input(car)?).context("Failed to read archive header")?;
    let roots = if implicit {
        find_implicit_roots(reader.blocks(), &CodecRegistry::default())
            .context("Failed to infer roots")?
    } else {
        reader.roots().to_vec()
    };

    let data = RootsOutput {
        success: true,
        result_code: 0,
        implicit,
        roots: roots.iter().map(Cid::to_string).collect(),
    };
    output.write(&data, || lines(&data.roots))
}

fn cmd_ls(
    car: Option<&Path>,
    root: Option<&str>,
    verbose: bool,
    output: &OutputWriter,
) -> Result<()> {
    let explicit = parse_roots(root.as_slice())?;
    let archive = Archive::open(car)?;
    let roots = archive.resolve_roots(&explicit)?;
    let [root] = roots.as_slice() else {
        return Err(CoreError::ambiguous_root(roots.clone()).into());
    };

    let options = ExportOptions {
        verify: true,
        root_name: Some(".".to_string()),
    };

    let mut entries = Vec::new();
    let mut stdout = io::stdout().lock();
    for entry in Exporter::new(archive.source(), *root, &options) {
        let entry = match entry {
            Ok(entry) => EntryInfo::from(entry),
            Err(err) if err.is_fatal_for_listing() => {
                return Err(err).context("Failed to list archive");
            }
            Err(err) => {
                tracing::warn!("{}", err);
                continue;
            }
        };
        if output.is_json() {
            entries.push(entry);
        } else {
            writeln!(stdout, "{}", entry.to_line(verbose))?;
        }
    }
    drop(stdout);
    archive.close()?;

    let data = LsOutput {
        success: true,
        result_code: 0,
        root: root.to_string(),
        entries,
    };
    output.write(&data, String::new)
}

fn cmd_blocks(car: Option<&Path>, output: &OutputWriter) -> Result<()> {
    let reader = CarReader::new(open_input(car)?).context("Failed to read archive header")?;
    let mut blocks = Vec::new();
    let mut stdout = io::stdout().lock();

    for frame in reader.cids() {
        let frame = frame.context("Failed to read archive")?;
        if output.is_json() {
            blocks.push(frame.cid.to_string());
        } else {
            writeln!(stdout, "{}", frame.cid)?;
        }
    }

    drop(stdout);

    let data = BlocksOutput {
        success: true,
        result_code: 0,
        blocks,
    };
    output.write(&data, String::new)
}

fn cmd_hash(car: Option<&Path>, output: &OutputWriter) -> Result<()> {
    let cid = hash_archive(open_input(car)?).context("Failed to hash archive")?;
    let data = HashOutput {
        success: true,
        result_code: 0,
        cid: cid.to_string(),
    };
    output.write(&data, || format!("{}\n", data.cid))
}

fn lines(items: &[String]) -> String {
    items.iter().map(|item| format!("{}\n", item)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unpack_verify(args: &[&str]) -> bool {
        let cli = Cli::try_parse_from(["carpack", "unpack"].iter().chain(args)).unwrap();
        match cli.command {
            Commands::Unpack {
                verify, no_verify, ..
            } => verify && !no_verify,
            _ => panic!("expected unpack"),
        }
    }

    #[test]
    fn test_verify_flag_forms() {
        assert!(unpack_verify(&["a.car"]));
        assert!(unpack_verify(&["--verify", "a.car"]));
        assert!(unpack_verify(&["--verify=true", "a.car"]));
        assert!(!unpack_verify(&["--verify=false", "a.car"]));
        assert!(!unpack_verify(&["--no-verify", "a.car"]));
    }

    #[test]
    fn test_last_verify_flag_wins() {
        assert!(unpack_verify(&["--no-verify", "--verify", "a.car"]));
        assert!(!unpack_verify(&["--verify", "--no-verify", "a.car"]));
    }

    #[test]
    fn test_verify_rejects_non_bool() {
        let parsed = Cli::try_parse_from(["carpack", "unpack", "--verify=maybe", "a.car"]);
        assert!(parsed.is_err());
    }
}
