use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};
use structopt::StructOpt;

use faxanadu_extract::{
    commit_messages, decode_messages, encode_messages, Error, MessageRegion, Rom, ScriptRegion,
    ScriptTable, PRG_SIZE,
};

#[derive(Debug, StructOpt)]
struct Opt {
    /// Log at debug level unless RUST_LOG says otherwise
    #[structopt(short, long)]
    verbose: bool,

    #[structopt(flatten)]
    layout: LayoutOpt,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(Debug, StructOpt)]
struct LayoutOpt {
    /// PRG offset of the script entry point table
    #[structopt(long, parse(try_from_str = parse_offset), default_value = "0x31F6B")]
    script_table_offset: usize,

    /// Number of entries in the script entry point table
    #[structopt(long, default_value = "152")]
    num_scripts: usize,

    /// PRG offset of the message strings
    #[structopt(long, parse(try_from_str = parse_offset), default_value = "0x34300")]
    messages_offset: usize,
}

impl LayoutOpt {
    fn script_region(&self) -> ScriptRegion {
        ScriptRegion {
            offset: self.script_table_offset,
            script_count: self.num_scripts,
            ..ScriptRegion::FAXANADU
        }
    }

    fn message_region(&self) -> MessageRegion {
        MessageRegion {
            offset: self.messages_offset,
            ..MessageRegion::FAXANADU
        }
    }
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Write the messages and scripts of a ROM to a JSON dump
    Dump {
        #[structopt(parse(from_os_str))]
        path_rom: PathBuf,

        #[structopt(parse(from_os_str))]
        path_dump: PathBuf,
    },

    /// Write a copy of a ROM with the content of a JSON dump patched in
    Patch {
        #[structopt(parse(from_os_str))]
        path_rom: PathBuf,

        #[structopt(parse(from_os_str))]
        path_dump: PathBuf,

        /// Defaults to <ROM stem>-patched.nes next to the ROM
        #[structopt(long, parse(from_os_str))]
        out: Option<PathBuf>,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct Dump {
    messages: Vec<String>,
    #[serde(flatten)]
    table: ScriptTable,
}

fn parse_offset(s: &str) -> eyre::Result<usize> {
    let offset = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16)?,
        None => s.parse()?,
    };
    eyre::ensure!(offset < PRG_SIZE, "offset must be within PRG: {:#X}", offset);

    Ok(offset)
}

fn patched_path(path_rom: &Path) -> PathBuf {
    let stem = path_rom
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    path_rom.with_file_name(format!("{}-patched.nes", stem))
}

fn report(err: Error) -> eyre::Report {
    if err.is_content_error() {
        eyre::Report::new(err)
            .wrap_err("dump content does not fit the ROM; edit the dump and retry")
    } else {
        err.into()
    }
}

fn dump(layout: &LayoutOpt, path_rom: &Path, path_dump: &Path) -> eyre::Result<()> {
    let rom = Rom::from_ines_bytes(std::fs::read(path_rom)?)?;

    let dump = Dump {
        messages: decode_messages(&rom, &layout.message_region())?,
        table: ScriptTable::decode_all(&rom, &layout.script_region())?,
    };

    let wtr = BufWriter::new(File::create(path_dump)?);
    serde_json::to_writer_pretty(wtr, &dump)?;

    info!(
        "wrote {} scripts, {} shops and {} messages to {}",
        dump.table.len(),
        dump.table.shops().len(),
        dump.messages.len(),
        path_dump.display()
    );
    Ok(())
}

fn patch(
    layout: &LayoutOpt,
    path_rom: &Path,
    path_dump: &Path,
    path_out: &Path,
) -> eyre::Result<()> {
    let mut rom = Rom::from_ines_bytes(std::fs::read(path_rom)?)?;
    let dump: Dump = serde_json::from_reader(BufReader::new(File::open(path_dump)?))?;

    let message_region = layout.message_region();
    let script_region = layout.script_region();

    // Encode everything before the first write.
    let messages = encode_messages(&dump.messages, &message_region).map_err(report)?;
    let scripts = dump.table.encode_all(&script_region).map_err(report)?;

    commit_messages(&mut rom, &message_region, &messages)?;
    ScriptTable::commit(&mut rom, &script_region, &scripts)?;

    std::fs::write(path_out, rom.to_ines_bytes())?;

    info!(
        "scripts {}/{} bytes, messages {}/{} bytes, wrote {}",
        scripts.len() - script_region.table_len(),
        script_region.len,
        messages.len(),
        message_region.len,
        path_out.display()
    );
    Ok(())
}

fn main() -> eyre::Result<()> {
    let opt = Opt::from_args();

    let level = if opt.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match &opt.cmd {
        Command::Dump {
            path_rom,
            path_dump,
        } => dump(&opt.layout, path_rom, path_dump),
        Command::Patch {
            path_rom,
            path_dump,
            out,
        } => {
            let path_out = out.clone().unwrap_or_else(|| patched_path(path_rom));
            patch(&opt.layout, path_rom, path_dump, &path_out)
        }
    }
}
