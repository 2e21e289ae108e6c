use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use qfilt_core::{read_header, Config, DiskFilter, Filter};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "qfilt", about = "Quotient filter CLI — compile, lookup, describe")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Compile newline-separated terms into a quotient filter
    Compile {
        /// Name of the file to write the quotient filter to
        #[arg(long, short, default_value = "qf.bin")]
        output: PathBuf,
        /// File to read terms from (default is stdin)
        #[arg(long, short)]
        input: Option<PathBuf>,
        /// Use the bit-packed table layout
        #[arg(long, short = 'p')]
        bitpacked: bool,
        /// Store each term's 0-based line number in this many bits
        #[arg(long)]
        storage_bits: Option<u32>,
    },
    /// Look up a term in a compiled quotient filter
    Lookup {
        /// File containing the quotient filter
        #[arg(long, short)]
        input: PathBuf,
        /// Use the memory-mapped reader instead of positioned reads
        #[arg(long)]
        mmap: bool,
        /// Term to look up; multiple words are joined with spaces
        term: Vec<String>,
    },
    /// Read the header from a quotient filter and describe it
    Describe {
        /// File containing the quotient filter
        #[arg(long, short)]
        input: PathBuf,
        /// Emit the header as JSON
        #[arg(long)]
        json: bool,
        /// Also load the filter and dump its slot table
        #[arg(long)]
        dump: bool,
    },
}

#[cfg(unix)]
fn fsync_dir(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;
    let dir = path.parent().unwrap_or(Path::new("."));
    let f = std::fs::OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_DIRECTORY)
        .open(dir)?;
    f.sync_all()
}

#[cfg(not(unix))]
fn fsync_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}

fn compile(
    output: PathBuf,
    input: Option<PathBuf>,
    bitpacked: bool,
    storage_bits: Option<u32>,
) -> Result<()> {
    if output.exists() {
        bail!("refusing to over-write existing file: {}", output.display());
    }
    let reader: Box<dyn BufRead> = match &input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("opening {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let mut filter = Filter::with_config(Config {
        bit_packed: bitpacked,
        storage_bits: storage_bits.unwrap_or(0),
        ..Config::default()
    });
    let start = Instant::now();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let term = line.trim();
        if storage_bits.is_some() {
            filter.insert_with_value(term.as_bytes(), line_no as u64);
        } else {
            filter.insert(term.as_bytes());
        }
    }
    info!(
        elapsed = ?start.elapsed(),
        entries = filter.len(),
        "built in-memory quotient filter"
    );

    // write next to the destination, publish atomically
    let dir = output.parent().unwrap_or(Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .prefix("qfilt_")
        .tempfile_in(dir)
        .with_context(|| format!("creating temp file in {}", dir.display()))?;
    let written = filter
        .write_to(tmp.as_file_mut())
        .context("writing quotient filter")?;
    tmp.as_file_mut().sync_all()?;
    tmp.persist(&output)
        .with_context(|| format!("publishing {}", output.display()))?;
    let _ = fsync_dir(&output);
    info!(bytes = written, output = %output.display(), "wrote quotient filter");
    Ok(())
}

fn lookup(input: PathBuf, mmap: bool, term: Vec<String>) -> Result<()> {
    let filter = if mmap {
        DiskFilter::open_mmap(&input)
    } else {
        DiskFilter::open(&input)
    }
    .with_context(|| format!("lookup: can't read input file {}", input.display()))?;
    let term = term.join(" ");
    let (found, value) = filter.lookup(term.as_bytes())?;
    print!("lookup {term:?}: {found}");
    if filter.has_storage() && found {
        print!(" - value: {value}");
    }
    println!();
    Ok(())
}

fn describe(input: PathBuf, json: bool, dump: bool) -> Result<()> {
    let header = read_header(&input)
        .with_context(|| format!("describe: can't read input file {}", input.display()))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&header)?);
    } else {
        println!("Quotient filter version {}", header.version);
        let not = if header.bit_packed { "" } else { "not " };
        println!(
            "{not}bitpacked - {} entries, {} quotient bits, {} storage bits",
            header.entries, header.q_bits, header.storage_bits
        );
    }
    if dump {
        let mut filter = Filter::new();
        let mut stream = File::open(&input)?;
        filter.read_from(&mut stream)?;
        print!("{}", filter.debug_dump(true));
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Compile {
            output,
            input,
            bitpacked,
            storage_bits,
        } => compile(output, input, bitpacked, storage_bits),
        Cmd::Lookup { input, mmap, term } => lookup(input, mmap, term),
        Cmd::Describe { input, json, dump } => describe(input, json, dump),
    }
}
