//! Command-line entry point.
//
//  `sift [flags] [file] "<query>"` — one JSON document out, or one per
//  line in NDJSON mode. Exit code 0 on success and on a broken pipe, 1 on
//  anything else.

use std::cell::Cell;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::debug;

use sift::{
    parse_query, Budget, CancelFlag, EmitMode, JsonValue, LineError, NdjsonDriver, NdjsonOptions,
    Options, Projector, SiftError, Sink,
};

const READ_CHUNK: usize = 64 * 1024;

#[derive(Parser, Debug)]
#[command(
    name = "sift",
    version,
    about = "Project fields out of JSON streams without loading whole documents"
)]
struct Cli {
    /// Input file, or the query itself when reading from stdin
    #[arg(value_name = "FILE_OR_QUERY")]
    first: String,

    /// Selection query when an input file is given
    #[arg(value_name = "QUERY")]
    second: Option<String>,

    /// Treat input as newline-delimited JSON, one document per line
    #[arg(long, visible_alias = "jsonl")]
    ndjson: bool,

    /// In NDJSON mode, report failing lines on stderr and keep going
    #[arg(long, requires = "ndjson")]
    skip_errors: bool,

    /// NDJSON line length cap in bytes
    #[arg(long, value_name = "BYTES", default_value_t = sift::ndjson::DEFAULT_MAX_LINE_LENGTH)]
    max_line_length: usize,

    /// Pretty-print the output document
    #[arg(long, conflicts_with = "compact")]
    pretty: bool,

    /// Compact output (the default)
    #[arg(long)]
    compact: bool,

    /// Emit the exact source bytes of each match instead of rebuilt JSON
    #[arg(long, conflicts_with = "ndjson")]
    raw: bool,

    /// Stop after this many matches
    #[arg(long, value_name = "N")]
    max_matches: Option<u64>,

    /// Stop after this many input bytes
    #[arg(long, value_name = "BYTES")]
    max_bytes: Option<u64>,

    /// Wall-clock budget in milliseconds
    #[arg(long, value_name = "MS")]
    max_duration_ms: Option<u64>,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => {}
        Err(e) => {
            eprintln!("sift: {} ({})", e, e.code());
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<(), SiftError> {
    let (path, query) = match &cli.second {
        Some(query) => (Some(cli.first.as_str()), query.as_str()),
        None => (None, cli.first.as_str()),
    };

    let cancel = CancelFlag::new();
    let opts = Options {
        mode: if cli.raw {
            EmitMode::Raw
        } else {
            EmitMode::Object
        },
        budget: Budget {
            max_matches: cli.max_matches,
            max_bytes: cli.max_bytes,
            max_duration: cli.max_duration_ms.map(Duration::from_millis),
        },
        cancel: cancel.clone(),
        fanout: None,
    };

    let mut reader: Box<dyn Read> = match path {
        Some(path) => {
            debug!("reading {}", path);
            Box::new(File::open(path)?)
        }
        None => Box::new(io::stdin().lock()),
    };

    if cli.ndjson {
        run_ndjson(&cli, query, opts, reader.as_mut())
    } else if cli.raw {
        run_raw(query, opts, cancel, reader.as_mut())
    } else {
        run_document(&cli, query, opts, reader.as_mut())
    }
}

/// Standard mode: the final projection as one document.
fn run_document(
    cli: &Cli,
    query: &str,
    opts: Options,
    reader: &mut dyn Read,
) -> Result<(), SiftError> {
    let selection = Arc::new(parse_query(query)?);
    let mut projector = Projector::new(selection, sift::NullSink, opts);
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        projector.process_chunk(&buf[..n])?;
    }
    projector.finish()?;
    if let Some(result) = projector.take_result() {
        let text = if cli.pretty {
            result.to_pretty_string()
        } else {
            result.to_compact_string()
        };
        write_line(text.as_bytes())?;
    }
    Ok(())
}

/// Raw mode: stream each match's source bytes as they complete.
fn run_raw(
    query: &str,
    opts: Options,
    cancel: CancelFlag,
    reader: &mut dyn Read,
) -> Result<(), SiftError> {
    let selection = Arc::new(parse_query(query)?);
    let sink = RawStdout {
        out: BufWriter::new(io::stdout().lock()),
        cancel,
        failed: None,
    };
    let mut projector = Projector::new(selection, sink, opts);

    let mut buf = vec![0u8; READ_CHUNK];
    let outcome = loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break projector.finish(),
            Ok(n) => n,
            Err(e) => break Err(e.into()),
        };
        if let Err(e) = projector.process_chunk(&buf[..n]) {
            break Err(e);
        }
    };

    let mut sink = projector.into_sink();
    if let Some(e) = sink.failed.take() {
        // A vanished downstream is a normal way for a pipe to end.
        if e.kind() == io::ErrorKind::BrokenPipe {
            return Ok(());
        }
        return Err(e.into());
    }
    outcome?;
    if let Err(e) = sink.out.flush() {
        if e.kind() != io::ErrorKind::BrokenPipe {
            return Err(e.into());
        }
    }
    Ok(())
}

/// NDJSON mode: one projected document per input line.
fn run_ndjson(
    cli: &Cli,
    query: &str,
    opts: Options,
    reader: &mut dyn Read,
) -> Result<(), SiftError> {
    let mut driver = NdjsonDriver::from_query(
        query,
        NdjsonOptions {
            skip_errors: cli.skip_errors,
            max_line_length: cli.max_line_length,
            engine: opts,
        },
    )?;

    let mut out = BufWriter::new(io::stdout().lock());
    let broken = Cell::new(None::<io::ErrorKind>);
    let mut on_match = |value: JsonValue| {
        if broken.get().is_some() {
            return;
        }
        let text = value.to_compact_string();
        let write = out
            .write_all(text.as_bytes())
            .and_then(|_| out.write_all(b"\n"));
        if let Err(e) = write {
            broken.set(Some(e.kind()));
        }
    };
    let mut on_error = |e: LineError| {
        eprintln!("sift: line {}: {} ({})", e.line, e.error, e.error.code());
    };

    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        driver.push(&buf[..n], &mut on_match, &mut on_error)?;
        if let Some(kind) = broken.get() {
            if kind == io::ErrorKind::BrokenPipe {
                return Ok(());
            }
            return Err(SiftError::Io {
                message: format!("stdout write failed: {:?}", kind),
            });
        }
    }
    driver.finish(&mut on_match, &mut on_error)?;
    drop(on_match);
    if let Err(e) = out.flush() {
        if e.kind() != io::ErrorKind::BrokenPipe {
            return Err(e.into());
        }
    }
    Ok(())
}

fn write_line(bytes: &[u8]) -> Result<(), SiftError> {
    let mut out = io::stdout().lock();
    let write = out.write_all(bytes).and_then(|_| out.write_all(b"\n"));
    match write {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Sink that streams raw matches to stdout and cancels the engine when the
/// pipe closes, so the run winds down at the next checkpoint.
struct RawStdout<W: Write> {
    out: W,
    cancel: CancelFlag,
    failed: Option<io::Error>,
}

impl<W: Write> Sink for RawStdout<W> {
    fn on_raw_match(&mut self, bytes: &[u8]) {
        if self.failed.is_some() {
            return;
        }
        let write = self
            .out
            .write_all(bytes)
            .and_then(|_| self.out.write_all(b"\n"));
        if let Err(e) = write {
            self.cancel.cancel();
            self.failed = Some(e);
        }
    }
}
