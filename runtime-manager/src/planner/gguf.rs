//! GGUF header and metadata reader.
//!
//! Only the header and the key/value metadata section are read. Tensor data
//! is never touched, so this is cheap even for very large files.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{Error, Result};

const GGUF_MAGIC: &[u8; 4] = b"GGUF";
/// Longer strings are skipped, not stored.
const MAX_STORED_STRING: u64 = 64 * 1024;
/// Anything longer is treated as a corrupt file.
const MAX_STRING_LEN: u64 = 64 * 1024 * 1024;
const MAX_ARRAY_DEPTH: usize = 4;

/// More repeating blocks than any published model; larger values mean a
/// corrupt header.
pub const MAX_BLOCK_COUNT: u64 = 4096;

/// Context length used when the file does not declare one.
pub const DEFAULT_CONTEXT_LENGTH: u64 = 8192;

// GGUF value type ids.
const TYPE_U8: u32 = 0;
const TYPE_I8: u32 = 1;
const TYPE_U16: u32 = 2;
const TYPE_I16: u32 = 3;
const TYPE_U32: u32 = 4;
const TYPE_I32: u32 = 5;
const TYPE_F32: u32 = 6;
const TYPE_BOOL: u32 = 7;
const TYPE_STRING: u32 = 8;
const TYPE_ARRAY: u32 = 9;
const TYPE_U64: u32 = 10;
const TYPE_I64: u32 = 11;
const TYPE_F64: u32 = 12;

/// Metadata of a GGUF file. Scalar values are kept in their string form;
/// arrays are recorded as `[<len>]`.
#[derive(Debug, Clone)]
pub struct GgufMetadata {
    pub version: u32,
    pub tensor_count: u64,
    pub metadata: HashMap<String, String>,
}

impl GgufMetadata {
    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| Error::Gguf(format!("cannot open {}: {}", path.display(), e)))?;
        Self::from_reader(BufReader::new(file))
            .map_err(|e| Error::Gguf(format!("{}: {}", path.display(), e)))
    }

    pub fn from_reader<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != GGUF_MAGIC {
            return Err(invalid("not a GGUF file"));
        }

        let version = reader.read_u32::<LittleEndian>()?;
        if !(2..=3).contains(&version) {
            return Err(invalid(&format!("unsupported GGUF version {}", version)));
        }

        let tensor_count = reader.read_u64::<LittleEndian>()?;
        let kv_count = reader.read_u64::<LittleEndian>()?;

        let mut metadata = HashMap::new();
        for _ in 0..kv_count {
            let key = read_string(&mut reader)?
                .ok_or_else(|| invalid("metadata key too long"))?;
            let value_type = reader.read_u32::<LittleEndian>()?;
            if let Some(value) = read_value(&mut reader, value_type, 0)? {
                metadata.insert(key, value);
            }
        }

        Ok(Self {
            version,
            tensor_count,
            metadata,
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn architecture(&self) -> Option<&str> {
        self.get("general.architecture")
    }

    fn arch_u64(&self, suffix: &str) -> Option<u64> {
        let arch = self.architecture()?;
        self.get(&format!("{}.{}", arch, suffix))?.parse().ok()
    }

    /// Repeating transformer blocks.
    pub fn block_count(&self) -> Result<u64> {
        let blocks = self
            .arch_u64("block_count")
            .filter(|n| *n > 0)
            .ok_or_else(|| Error::Gguf("missing block_count".to_string()))?;
        if blocks > MAX_BLOCK_COUNT {
            return Err(Error::Gguf(format!("block_count {} out of range", blocks)));
        }
        Ok(blocks)
    }

    /// Trained context length, or [`DEFAULT_CONTEXT_LENGTH`].
    pub fn context_length(&self) -> u64 {
        self.arch_u64("context_length")
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_CONTEXT_LENGTH)
    }

    /// Bytes of f16 KV cache needed per token of context.
    pub fn kv_bytes_per_token(&self) -> Result<u64> {
        let blocks = self.block_count()?;
        let heads = self
            .arch_u64("attention.head_count")
            .ok_or_else(|| Error::Gguf("missing attention.head_count".to_string()))?;
        let kv_heads = self.arch_u64("attention.head_count_kv").unwrap_or(heads);

        let head_dim = match self.arch_u64("embedding_length") {
            Some(embedding) if heads > 0 => Some(embedding / heads),
            _ => None,
        };
        let key_length = self
            .arch_u64("attention.key_length")
            .or(head_dim)
            .ok_or_else(|| Error::Gguf("cannot determine attention key length".to_string()))?;
        let value_length = self.arch_u64("attention.value_length").unwrap_or(key_length);

        let per_token = key_length
            .checked_add(value_length)
            .and_then(|dims| dims.checked_mul(kv_heads))
            .and_then(|n| n.checked_mul(blocks))
            .and_then(|n| n.checked_mul(2))
            .ok_or_else(|| Error::Gguf("KV cache size per token overflows".to_string()))?;
        if per_token == 0 {
            return Err(Error::Gguf("KV cache size per token is zero".to_string()));
        }
        Ok(per_token)
    }
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

/// `None` when the string was too long to keep and has been skipped.
fn read_string<R: Read>(reader: &mut R) -> io::Result<Option<String>> {
    let len = reader.read_u64::<LittleEndian>()?;
    if len > MAX_STRING_LEN {
        return Err(invalid(&format!("string length {} out of range", len)));
    }
    if len > MAX_STORED_STRING {
        let skipped = io::copy(&mut reader.by_ref().take(len), &mut io::sink())?;
        if skipped != len {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
        }
        return Ok(None);
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

fn read_value<R: Read>(reader: &mut R, value_type: u32, depth: usize) -> io::Result<Option<String>> {
    let value = match value_type {
        TYPE_U8 => reader.read_u8()?.to_string(),
        TYPE_I8 => reader.read_i8()?.to_string(),
        TYPE_U16 => reader.read_u16::<LittleEndian>()?.to_string(),
        TYPE_I16 => reader.read_i16::<LittleEndian>()?.to_string(),
        TYPE_U32 => reader.read_u32::<LittleEndian>()?.to_string(),
        TYPE_I32 => reader.read_i32::<LittleEndian>()?.to_string(),
        TYPE_F32 => reader.read_f32::<LittleEndian>()?.to_string(),
        TYPE_BOOL => (reader.read_u8()? != 0).to_string(),
        TYPE_STRING => return read_string(reader),
        TYPE_U64 => reader.read_u64::<LittleEndian>()?.to_string(),
        TYPE_I64 => reader.read_i64::<LittleEndian>()?.to_string(),
        TYPE_F64 => reader.read_f64::<LittleEndian>()?.to_string(),
        TYPE_ARRAY => {
            if depth >= MAX_ARRAY_DEPTH {
                return Err(invalid("arrays nested too deeply"));
            }
            let item_type = reader.read_u32::<LittleEndian>()?;
            let len = reader.read_u64::<LittleEndian>()?;
            for _ in 0..len {
                read_value(reader, item_type, depth + 1)?;
            }
            format!("[{}]", len)
        }
        other => return Err(invalid(&format!("unknown value type {}", other))),
    };
    Ok(Some(value))
}
