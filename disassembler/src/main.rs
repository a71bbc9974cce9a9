use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use rw_script::{InstructionFlags, InstructionInfo, ScmFile, ScmOpcodes, ScmTarget, ScriptDisassembly};

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Inst {
    address: u32,
    opcode: String,
    mnemonic: String,
    negated: bool,
    operands: Vec<String>,
}

impl Inst {
    fn new(address: u32, info: &InstructionInfo, opcodes: &ScmOpcodes<()>) -> Self {
        let mnemonic = opcodes
            .find_opcode(info.opcode)
            .map(|meta| meta.signature.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        Self {
            address,
            opcode: format!("{:04X}", info.opcode),
            mnemonic,
            negated: info.flags.contains(InstructionFlags::NEGATED_CONDITIONAL),
            operands: info.operands.iter().map(|op| op.to_string()).collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Header {
    target: ScmTarget,
    globals_size: usize,
    code_section: u32,
    main_size: u32,
    models: Vec<String>,
    mission_offsets: Vec<u32>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Listing {
    header: Header,
    insts: Vec<Inst>,
}

impl Listing {
    pub fn build(file: &ScmFile, start: Option<u32>) -> Result<Self> {
        let opcodes = ScmOpcodes::<()>::standard();
        let start = start.unwrap_or_else(|| file.code_section());

        let mut disassembly = ScriptDisassembly::new(&opcodes, file);
        disassembly.disassemble(start)?;

        let insts = disassembly
            .instructions()
            .iter()
            .map(|(address, info)| Inst::new(*address, info, &opcodes))
            .collect();

        Ok(Self {
            header: Header {
                target: file.target(),
                globals_size: file.globals_size(),
                code_section: file.code_section(),
                main_size: file.main_size(),
                models: file.models().to_vec(),
                mission_offsets: file.mission_offsets().to_vec(),
            },
            insts,
        })
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut writer = std::fs::File::create(path)
            .with_context(|| format!("creating {}", path.display()))?;
        serde_yaml::to_writer(&mut writer, self)?;
        log::info!("wrote {} instructions to {}", self.insts.len(), path.display());
        Ok(())
    }
}

/// Dump the main section of a main.scm image as YAML
#[derive(ClapParser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, required = true)]
    input: PathBuf,

    #[arg(short, long, required = true)]
    output: PathBuf,

    /// First address to decode, defaults to the start of the code section
    #[arg(short, long)]
    start: Option<u32>,
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let file = ScmFile::open(&args.input)?;
    let listing = Listing::build(&file, args.start)?;
    listing.write(args.output)?;

    Ok(())
}
