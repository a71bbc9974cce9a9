use anyhow::Context;
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::error::{ScmFileError, ScriptError, ScriptResult};
use crate::types::{ScmAddress, ScmOpcode, SCM_STRING_SIZE};

/// Size of the section-skipping `GOTO <int32>` at the head of every section.
const JUMP_OP_SIZE: u32 = 2 + 1 + 4;
/// Offset of the int32 target inside that jump.
const JUMP_PARAM_SIZE: u32 = 2 + 1;
/// Each section body starts after the jump plus one padding byte.
const SECTION_HEADER_SIZE: u32 = JUMP_OP_SIZE + 1;

pub const MODEL_NAME_SIZE: usize = 24;

/// Which game the image was compiled for, taken from the byte following the
/// first jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScmTarget {
    NoTarget,
    Gta3,
    ViceCity,
    SanAndreas,
}

impl ScmTarget {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0xC6 => ScmTarget::Gta3,
            0x6D => ScmTarget::ViceCity,
            0x73 => ScmTarget::SanAndreas,
            _ => ScmTarget::NoTarget,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            ScmTarget::Gta3 => 0xC6,
            ScmTarget::ViceCity => 0x6D,
            ScmTarget::SanAndreas => 0x73,
            ScmTarget::NoTarget => 0x00,
        }
    }
}

/// Absolute offsets of the SCM sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScmLayout {
    pub global_section: u32,
    pub model_section: u32,
    pub mission_section: u32,
    pub code_section: u32,
}

/// A loaded `main.scm` image.
///
/// The whole file is kept in memory; instruction addresses are absolute
/// offsets into it.
#[derive(Debug, Clone)]
pub struct ScmFile {
    data: Vec<u8>,
    target: ScmTarget,
    layout: ScmLayout,
    models: Vec<String>,
    main_size: u32,
    largest_mission_size: u32,
    mission_offsets: Vec<u32>,
}

fn jump(out: &mut Vec<u8>, target: u32, pad: u8) {
    let mut buf = [0u8; SECTION_HEADER_SIZE as usize];
    LittleEndian::write_u16(&mut buf[0..2], 0x0002 as ScmOpcode);
    buf[2] = 0x01;
    LittleEndian::write_u32(&mut buf[3..7], target);
    buf[7] = pad;
    out.extend_from_slice(&buf);
}

fn truncated(data: &[u8], offset: usize, need: usize) -> ScmFileError {
    ScmFileError::Truncated {
        offset,
        need,
        len: data.len(),
    }
}

fn load_u32(data: &[u8], offset: u32) -> Result<u32, ScmFileError> {
    let start = offset as usize;
    data.get(start..start + 4)
        .map(LittleEndian::read_u32)
        .ok_or_else(|| truncated(data, start, 4))
}

impl ScmFile {
    pub fn load(data: Vec<u8>) -> Result<Self, ScmFileError> {
        let target = data
            .get(JUMP_OP_SIZE as usize)
            .copied()
            .map(ScmTarget::from_byte)
            .ok_or_else(|| truncated(&data, JUMP_OP_SIZE as usize, 1))?;

        let global_section = SECTION_HEADER_SIZE;
        let model_section = load_u32(&data, JUMP_PARAM_SIZE)?
            .checked_add(SECTION_HEADER_SIZE)
            .ok_or(ScmFileError::BadSection {
                section: "model",
                offset: u32::MAX,
            })?;
        if model_section < global_section {
            return Err(ScmFileError::BadSection {
                section: "model",
                offset: model_section,
            });
        }

        let mission_jump = model_section - SECTION_HEADER_SIZE;
        let mission_section = load_u32(&data, mission_jump + JUMP_PARAM_SIZE)?
            .checked_add(SECTION_HEADER_SIZE)
            .filter(|&s| s > model_section)
            .ok_or(ScmFileError::BadSection {
                section: "mission",
                offset: mission_jump,
            })?;

        let code_jump = mission_section - SECTION_HEADER_SIZE;
        let code_section = load_u32(&data, code_jump + JUMP_PARAM_SIZE)?;
        if code_section < mission_section {
            return Err(ScmFileError::BadSection {
                section: "code",
                offset: code_section,
            });
        }

        let model_count = load_u32(&data, model_section)?;
        let mut models = Vec::with_capacity(model_count.min(4096) as usize);
        let mut cursor = model_section as usize + 4;
        for _ in 0..model_count {
            let raw = data
                .get(cursor..cursor + MODEL_NAME_SIZE)
                .ok_or_else(|| truncated(&data, cursor, MODEL_NAME_SIZE))?;
            let end = raw.iter().position(|&b| b == 0).unwrap_or(MODEL_NAME_SIZE);
            models.push(String::from_utf8_lossy(&raw[..end]).into_owned());
            cursor += MODEL_NAME_SIZE;
        }

        let main_size = load_u32(&data, mission_section)?;
        let largest_mission_size = load_u32(&data, mission_section + 4)?;
        let mission_count = load_u32(&data, mission_section + 8)?;
        let mut mission_offsets = Vec::with_capacity(mission_count.min(4096) as usize);
        for i in 0..mission_count {
            mission_offsets.push(load_u32(&data, mission_section + 12 + i * 4)?);
        }

        log::debug!(
            "scm: target={:?} models={} missions={} code=0x{:X} main_size=0x{:X}",
            target,
            models.len(),
            mission_offsets.len(),
            code_section,
            main_size
        );

        Ok(Self {
            data,
            target,
            layout: ScmLayout {
                global_section,
                model_section,
                mission_section,
                code_section,
            },
            models,
            main_size,
            largest_mission_size,
            mission_offsets,
        })
    }

    pub fn open(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        Self::load(data).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn target(&self) -> ScmTarget {
        self.target
    }

    pub fn layout(&self) -> ScmLayout {
        self.layout
    }

    pub fn global_section(&self) -> u32 {
        self.layout.global_section
    }

    pub fn model_section(&self) -> u32 {
        self.layout.model_section
    }

    pub fn mission_section(&self) -> u32 {
        self.layout.mission_section
    }

    pub fn code_section(&self) -> u32 {
        self.layout.code_section
    }

    /// Bytes of global variable storage the image declares.
    pub fn globals_size(&self) -> usize {
        (self.layout.model_section - self.layout.global_section) as usize
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn main_size(&self) -> u32 {
        self.main_size
    }

    pub fn largest_mission_size(&self) -> u32 {
        self.largest_mission_size
    }

    pub fn mission_offsets(&self) -> &[u32] {
        &self.mission_offsets
    }

    fn bytes(&self, offset: ScmAddress, n: usize) -> ScriptResult<&[u8]> {
        let start = offset as usize;
        start
            .checked_add(n)
            .and_then(|end| self.data.get(start..end))
            .ok_or(ScriptError::PcOutOfRange {
                pc: offset,
                len: self.data.len(),
            })
    }

    pub fn read_u8(&self, offset: ScmAddress) -> ScriptResult<u8> {
        Ok(self.bytes(offset, 1)?[0])
    }

    pub fn read_i8(&self, offset: ScmAddress) -> ScriptResult<i8> {
        Ok(self.read_u8(offset)? as i8)
    }

    pub fn read_u16(&self, offset: ScmAddress) -> ScriptResult<u16> {
        Ok(LittleEndian::read_u16(self.bytes(offset, 2)?))
    }

    pub fn read_i16(&self, offset: ScmAddress) -> ScriptResult<i16> {
        Ok(LittleEndian::read_i16(self.bytes(offset, 2)?))
    }

    pub fn read_u32(&self, offset: ScmAddress) -> ScriptResult<u32> {
        Ok(LittleEndian::read_u32(self.bytes(offset, 4)?))
    }

    pub fn read_i32(&self, offset: ScmAddress) -> ScriptResult<i32> {
        Ok(LittleEndian::read_i32(self.bytes(offset, 4)?))
    }

    pub fn read_string(&self, offset: ScmAddress) -> ScriptResult<[u8; SCM_STRING_SIZE]> {
        let mut out = [0u8; SCM_STRING_SIZE];
        out.copy_from_slice(self.bytes(offset, SCM_STRING_SIZE)?);
        Ok(out)
    }
}

/// Lays out a well-formed SCM image around hand-written code.
///
/// Section offsets depend on the global size, the model names and the number
/// of mission slots, so set those before asking for [`code_start`].
///
/// [`code_start`]: ScmFileBuilder::code_start
#[derive(Debug, Clone)]
pub struct ScmFileBuilder {
    target: ScmTarget,
    globals: u32,
    models: Vec<String>,
    mission_slots: usize,
    main: Vec<u8>,
    missions: Vec<Vec<u8>>,
}

impl Default for ScmFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ScmFileBuilder {
    pub fn new() -> Self {
        Self {
            target: ScmTarget::Gta3,
            globals: 0,
            models: Vec::new(),
            mission_slots: 0,
            main: Vec::new(),
            missions: Vec::new(),
        }
    }

    pub fn target(mut self, target: ScmTarget) -> Self {
        self.target = target;
        self
    }

    /// Reserve `bytes` of zeroed global storage after the header.
    pub fn globals(mut self, bytes: u32) -> Self {
        self.globals = bytes;
        self
    }

    pub fn model(mut self, name: &str) -> Self {
        self.models.push(name.to_string());
        self
    }

    pub fn reserve_missions(mut self, count: usize) -> Self {
        self.mission_slots = self.mission_slots.max(count);
        self
    }

    pub fn main_code(mut self, code: Vec<u8>) -> Self {
        self.main = code;
        self
    }

    pub fn mission(mut self, code: Vec<u8>) -> Self {
        self.missions.push(code);
        self.mission_slots = self.mission_slots.max(self.missions.len());
        self
    }

    fn model_jump(&self) -> u32 {
        SECTION_HEADER_SIZE + self.globals
    }

    fn mission_jump(&self) -> u32 {
        self.model_jump() + SECTION_HEADER_SIZE + 4 + (self.models.len() * MODEL_NAME_SIZE) as u32
    }

    /// Address of the first byte of main code.
    pub fn code_start(&self) -> u32 {
        self.mission_jump() + SECTION_HEADER_SIZE + 12 + (self.mission_slots * 4) as u32
    }

    /// Address the next [`mission`](ScmFileBuilder::mission) will be placed at.
    pub fn next_mission_address(&self) -> u32 {
        let placed: usize = self.missions.iter().map(Vec::len).sum();
        self.code_start() + (self.main.len() + placed) as u32
    }

    pub fn build(&self) -> Vec<u8> {
        let code_start = self.code_start();
        let mut out = Vec::with_capacity(code_start as usize + self.main.len());

        jump(&mut out, self.model_jump(), self.target.to_byte());
        out.resize(out.len() + self.globals as usize, 0);

        jump(&mut out, self.mission_jump(), 0);
        out.extend_from_slice(&(self.models.len() as u32).to_le_bytes());
        for name in &self.models {
            let mut buf = [0u8; MODEL_NAME_SIZE];
            for (dst, src) in buf.iter_mut().zip(name.bytes()) {
                *dst = src;
            }
            out.extend_from_slice(&buf);
        }

        jump(&mut out, code_start, 0);
        let main_size = code_start + self.main.len() as u32;
        let largest = self.missions.iter().map(Vec::len).max().unwrap_or(0) as u32;
        out.extend_from_slice(&main_size.to_le_bytes());
        out.extend_from_slice(&largest.to_le_bytes());
        out.extend_from_slice(&(self.mission_slots as u32).to_le_bytes());
        let mut offset = main_size;
        for slot in 0..self.mission_slots {
            let len = self.missions.get(slot).map(Vec::len).unwrap_or(0) as u32;
            out.extend_from_slice(&offset.to_le_bytes());
            offset += len;
        }

        out.extend_from_slice(&self.main);
        for mission in &self.missions {
            out.extend_from_slice(mission);
        }
        out
    }

    pub fn build_file(&self) -> Result<ScmFile, ScmFileError> {
        ScmFile::load(self.build())
    }
}
