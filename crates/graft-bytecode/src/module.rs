//! Module image format
//!
//! A module image is the on-disk unit the host loads: a named set of types,
//! each declaring methods with decoded instruction bodies, plus an optional
//! entry point.

use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use crate::instruction::{Instruction, MethodRef};
use thiserror::Error;

/// Magic number for Graft module images: "GRFT"
pub const MAGIC: [u8; 4] = *b"GRFT";

/// Current image format version
pub const VERSION: u32 = 1;

/// Size of the fixed header (magic, version, flags, checksum)
const HEADER_LEN: usize = 16;

/// Marker for "no entry point" in the encoded entry point slot
const NO_ENTRY: u32 = u32::MAX;

/// Module encoding/decoding errors
#[derive(Debug, Error)]
pub enum ModuleError {
    /// Decode error
    #[error("Decode error: {0}")]
    DecodeError(#[from] DecodeError),

    /// Invalid magic number
    #[error("Invalid magic number: expected GRFT, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported version
    #[error("Unsupported version: {0} (current: {VERSION})")]
    UnsupportedVersion(u32),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Checksum stored in the header
        expected: u32,
        /// Checksum computed over the payload
        actual: u32,
    },

    /// Entry point does not address a declared method
    #[error("Entry point {type_index}:{method_index} does not name a declared method")]
    InvalidEntryPoint {
        /// Type table index
        type_index: u32,
        /// Method table index within the type
        method_index: u32,
    },
}

/// Module flags
pub mod flags {
    /// Image was produced by rewriting another image
    pub const PATCHED: u32 = 1 << 0;
}

/// Location of the entry point method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPoint {
    /// Index into the type table
    pub type_index: u32,
    /// Index into that type's method table
    pub method_index: u32,
}

/// A loadable module image
#[derive(Debug, Clone)]
pub struct ModuleImage {
    /// Magic number (must be "GRFT")
    pub magic: [u8; 4],
    /// Format version
    pub version: u32,
    /// Module flags
    pub flags: u32,
    /// Declared types
    pub types: Vec<TypeDef>,
    /// Entry point, if the module is runnable
    pub entry_point: Option<EntryPoint>,
    /// Module metadata
    pub metadata: Metadata,
}

/// Type definition
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDef {
    /// Fully qualified type name
    pub name: String,
    /// Declared methods
    pub methods: Vec<MethodDef>,
}

impl TypeDef {
    /// Create an empty type
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    /// First declared method with the given name
    pub fn method(&self, name: &str) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Signature of one of this type's methods
    pub fn signature(&self, method: &MethodDef) -> MethodRef {
        method.signature(&self.name)
    }

    fn encode(&self, writer: &mut BytecodeWriter) -> Result<(), DecodeError> {
        writer.emit_string(&self.name);
        writer.emit_u32(self.methods.len() as u32);
        for method in &self.methods {
            method.encode(writer)?;
        }
        Ok(())
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let name = reader.read_string()?;
        let method_count = reader.read_u32()? as usize;
        let mut methods = Vec::with_capacity(method_count.min(reader.remaining()));
        for _ in 0..method_count {
            methods.push(MethodDef::decode(reader)?);
        }
        Ok(Self { name, methods })
    }
}

/// Method definition
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    /// Method name
    pub name: String,
    /// Parameter type names (receiver excluded)
    pub params: Vec<String>,
    /// Return type name
    pub returns: String,
    /// Whether the method takes a receiver
    pub has_this: bool,
    /// Number of locals beyond the arguments
    pub local_count: u16,
    /// Instruction body
    pub body: Vec<Instruction>,
}

impl MethodDef {
    /// Create a static method with no extra locals
    pub fn new_static(name: &str, params: &[&str], returns: &str, body: Vec<Instruction>) -> Self {
        Self {
            name: name.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            returns: returns.to_string(),
            has_this: false,
            local_count: 0,
            body,
        }
    }

    /// Signature of this method when declared on `owner`
    pub fn signature(&self, owner: &str) -> MethodRef {
        MethodRef {
            owner: owner.to_string(),
            name: self.name.clone(),
            params: self.params.clone(),
            returns: self.returns.clone(),
            has_this: self.has_this,
        }
    }

    /// Total local slots: receiver, parameters, then declared locals
    pub fn frame_size(&self) -> usize {
        usize::from(self.has_this) + self.params.len() + self.local_count as usize
    }

    fn encode(&self, writer: &mut BytecodeWriter) -> Result<(), DecodeError> {
        writer.emit_string(&self.name);
        writer.emit_u16(self.params.len() as u16);
        for param in &self.params {
            writer.emit_string(param);
        }
        writer.emit_string(&self.returns);
        writer.emit_u8(u8::from(self.has_this));
        writer.emit_u16(self.local_count);
        writer.emit_body(&self.body)
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let name = reader.read_string()?;
        let param_count = reader.read_u16()? as usize;
        let mut params = Vec::with_capacity(param_count);
        for _ in 0..param_count {
            params.push(reader.read_string()?);
        }
        let returns = reader.read_string()?;
        let has_this = reader.read_u8()? != 0;
        let local_count = reader.read_u16()?;
        let body = reader.read_body()?;
        Ok(Self {
            name,
            params,
            returns,
            has_this,
            local_count,
            body,
        })
    }
}

/// Module metadata
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    /// Logical module name
    pub name: String,
    /// Free-form version string
    pub version: Option<String>,
}

impl Metadata {
    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_string(&self.name);
        match &self.version {
            Some(version) => {
                writer.emit_u8(1);
                writer.emit_string(version);
            }
            None => writer.emit_u8(0),
        }
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let name = reader.read_string()?;
        let version = if reader.read_u8()? != 0 {
            Some(reader.read_string()?)
        } else {
            None
        };
        Ok(Self { name, version })
    }
}

impl ModuleImage {
    /// Create a new empty image
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            flags: 0,
            types: Vec::new(),
            entry_point: None,
            metadata: Metadata {
                name: name.into(),
                version: None,
            },
        }
    }

    /// Logical module name
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Type with the given fully qualified name
    pub fn find_type(&self, name: &str) -> Option<&TypeDef> {
        self.types.iter().find(|t| t.name == name)
    }

    /// Add a type and return its index
    pub fn add_type(&mut self, ty: TypeDef) -> u32 {
        self.types.push(ty);
        (self.types.len() - 1) as u32
    }

    /// Declaring type and method of the entry point
    pub fn entry_point(&self) -> Option<(&TypeDef, &MethodDef)> {
        let entry = self.entry_point?;
        let ty = self.types.get(entry.type_index as usize)?;
        let method = ty.methods.get(entry.method_index as usize)?;
        Some((ty, method))
    }

    /// Encode the image to its binary form
    ///
    /// Format:
    /// - Header: magic (4 bytes) + version (u32) + flags (u32) + checksum (u32)
    /// - Type table
    /// - Entry point (two u32, `u32::MAX` when absent)
    /// - Metadata
    pub fn encode(&self) -> Result<Vec<u8>, ModuleError> {
        let mut writer = BytecodeWriter::new();

        writer.buffer.extend_from_slice(&self.magic);
        writer.emit_u32(self.version);
        writer.emit_u32(self.flags);
        let checksum_offset = writer.offset();
        writer.emit_u32(0);

        writer.emit_u32(self.types.len() as u32);
        for ty in &self.types {
            ty.encode(&mut writer)?;
        }

        match self.entry_point {
            Some(entry) => {
                writer.emit_u32(entry.type_index);
                writer.emit_u32(entry.method_index);
            }
            None => {
                writer.emit_u32(NO_ENTRY);
                writer.emit_u32(NO_ENTRY);
            }
        }

        self.metadata.encode(&mut writer);

        let checksum = crc32fast::hash(&writer.buffer[HEADER_LEN..]);
        writer.patch_u32(checksum_offset, checksum);

        Ok(writer.into_bytes())
    }

    /// Decode an image from its binary form
    pub fn decode(data: &[u8]) -> Result<Self, ModuleError> {
        let mut reader = BytecodeReader::new(data);

        let magic_bytes = reader.read_bytes(4)?;
        let magic = [magic_bytes[0], magic_bytes[1], magic_bytes[2], magic_bytes[3]];
        if magic != MAGIC {
            return Err(ModuleError::InvalidMagic(magic));
        }

        let version = reader.read_u32()?;
        if version != VERSION {
            return Err(ModuleError::UnsupportedVersion(version));
        }

        let flags = reader.read_u32()?;
        let stored_checksum = reader.read_u32()?;

        let calculated_checksum = crc32fast::hash(&data[HEADER_LEN..]);
        if stored_checksum != calculated_checksum {
            return Err(ModuleError::ChecksumMismatch {
                expected: stored_checksum,
                actual: calculated_checksum,
            });
        }

        let type_count = reader.read_u32()? as usize;
        let mut types = Vec::with_capacity(type_count.min(reader.remaining()));
        for _ in 0..type_count {
            types.push(TypeDef::decode(&mut reader)?);
        }

        let type_index = reader.read_u32()?;
        let method_index = reader.read_u32()?;
        let entry_point = if type_index == NO_ENTRY {
            None
        } else {
            let valid = types
                .get(type_index as usize)
                .is_some_and(|t| (method_index as usize) < t.methods.len());
            if !valid {
                return Err(ModuleError::InvalidEntryPoint {
                    type_index,
                    method_index,
                });
            }
            Some(EntryPoint {
                type_index,
                method_index,
            })
        };

        let metadata = Metadata::decode(&mut reader)?;

        Ok(Self {
            magic,
            version,
            flags,
            types,
            entry_point,
            metadata,
        })
    }
}
