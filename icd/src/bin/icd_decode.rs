//! Decode hex-encoded ICD frames.
//!
//! Each frame is tried as a command first, then as a reply. Frames come from
//! the command line, or one per line on stdin when none are given.
//!
//! ```text
//! icd_decode "02 53 03 .. .. 03"
//! tcpdump ... | icd_decode --json
//! ```

use std::io::{self, BufRead};

use anyhow::{bail, Context, Result};
use clap::Parser;
use icd::{decode_reply, Command, FrameError, Reply};

/// ICD frame decoder
#[derive(Parser, Debug)]
#[command(name = "icd_decode")]
#[command(about = "Decode hex-encoded antenna pedestal ICD frames")]
#[command(version)]
struct Args {
    /// Print replies as JSON
    #[arg(long)]
    json: bool,

    /// Hex-encoded frames (whitespace and ':' separators allowed)
    frames: Vec<String>,
}

fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let digits: Vec<u8> = text
        .bytes()
        .filter(|b| !b.is_ascii_whitespace() && *b != b':')
        .collect();
    if digits.len() % 2 != 0 {
        bail!("odd number of hex digits in '{text}'");
    }
    digits
        .chunks(2)
        .map(|pair| {
            let s = std::str::from_utf8(pair)?;
            u8::from_str_radix(s, 16).with_context(|| format!("invalid hex byte '{s}'"))
        })
        .collect()
}

fn describe(bytes: &[u8], json: bool) -> Result<String> {
    let command_err = match Command::decode(bytes) {
        Ok(command) => return Ok(format!("command {:?}", command)),
        Err(e) => e,
    };
    match decode_reply(bytes) {
        Ok(Reply::Status(data)) if json => Ok(serde_json::to_string_pretty(&data)?),
        Ok(Reply::FirmwareInfo(info)) if json => Ok(serde_json::to_string_pretty(&info)?),
        Ok(reply) => Ok(format!("reply {:?}", reply)),
        // Checksum and envelope errors are the same either way
        Err(FrameError::UnknownSelector { .. }) => bail!("{command_err}"),
        Err(e) => bail!("{e}"),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let lines: Vec<String> = if args.frames.is_empty() {
        io::stdin()
            .lock()
            .lines()
            .collect::<io::Result<_>>()
            .context("failed to read stdin")?
    } else {
        args.frames
    };

    let mut failures = 0usize;
    for line in lines.iter().filter(|l| !l.trim().is_empty()) {
        let result = parse_hex(line).and_then(|bytes| describe(&bytes, args.json));
        match result {
            Ok(text) => println!("{text}"),
            Err(e) => {
                failures += 1;
                println!("error: {e:#}");
            }
        }
    }

    if failures > 0 {
        bail!("{failures} frame(s) failed to decode");
    }
    Ok(())
}
